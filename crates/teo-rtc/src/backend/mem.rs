use super::*;

use base64::Engine as _;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, Weak};
use teo_core::{Error, Uniq};

const SDP_TAG: &str = "a=x-teo-mem:";

/// Operations of a [MemPeerConnection] that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemOp {
    /// [PeerConnection::create_offer].
    CreateOffer,

    /// [PeerConnection::create_answer].
    CreateAnswer,

    /// [PeerConnection::set_local_description].
    SetLocalDescription,

    /// [PeerConnection::set_remote_description].
    SetRemoteDescription,

    /// [PeerConnection::add_ice_candidate].
    AddIceCandidate,
}

/// What a mem session description carries.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct MemSdp {
    conn: Uniq,
    tracks: Vec<(String, MediaTrack)>,
}

impl MemSdp {
    fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        let body = base64::engine::general_purpose::STANDARD.encode(json);
        Ok(format!("v=0\r\ns=teo-mem\r\n{SDP_TAG}{body}\r\n"))
    }

    fn decode(sdp: &str) -> Result<Self> {
        let body = sdp
            .lines()
            .find_map(|l| l.strip_prefix(SDP_TAG))
            .ok_or_else(|| Error::id("InvalidSdp"))?;
        let json = base64::engine::general_purpose::STANDARD
            .decode(body.trim())
            .map_err(Error::err)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// A simulated network. Peer connections created by factories on the
/// same net can negotiate with each other without any real networking.
#[derive(Default)]
pub struct MemNet {
    conns: Mutex<HashMap<Uniq, Weak<MemPeerConnection>>>,
}

impl std::fmt::Debug for MemNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemNet").finish()
    }
}

impl MemNet {
    /// Construct a new, empty net.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Construct a connection factory for the given local peer.
    pub fn factory(self: &Arc<Self>, local: impl Into<PeerId>) -> Arc<MemFactory> {
        Arc::new(MemFactory {
            net: self.clone(),
            local: local.into(),
            conns: Mutex::new(Vec::new()),
        })
    }

    fn register(&self, conn: &Arc<MemPeerConnection>) {
        let mut lock = self.conns.lock().unwrap();
        lock.retain(|_, c| c.strong_count() > 0);
        lock.insert(conn.uniq, Arc::downgrade(conn));
    }

    fn lookup(&self, uniq: Uniq) -> Option<Arc<MemPeerConnection>> {
        self.conns.lock().unwrap().get(&uniq).and_then(|c| c.upgrade())
    }
}

/// [ConnectionFactory] producing [MemPeerConnection]s.
pub struct MemFactory {
    net: Arc<MemNet>,
    local: PeerId,
    conns: Mutex<Vec<(PeerId, Weak<MemPeerConnection>)>>,
}

impl std::fmt::Debug for MemFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFactory")
            .field("local", &self.local)
            .finish()
    }
}

impl MemFactory {
    /// The most recently created connection to `peer_id`,
    /// if it is still alive.
    pub fn connection(&self, peer_id: &str) -> Option<Arc<MemPeerConnection>> {
        self.conns
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == peer_id)
            .and_then(|(_, c)| c.upgrade())
    }

    /// How many connections to `peer_id` this factory ever created.
    pub fn created_count(&self, peer_id: &str) -> usize {
        self.conns
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == peer_id)
            .count()
    }
}

impl ConnectionFactory for MemFactory {
    fn new_connection(
        &self,
        peer_id: &PeerId,
        _config: &RtcConfig,
    ) -> Result<(DynPeerConnection, PeerConnectionEventRecv)> {
        let (evt_send, evt_recv) = tokio::sync::mpsc::unbounded_channel();

        let conn = Arc::new(MemPeerConnection {
            uniq: Uniq::default(),
            local: self.local.clone(),
            remote_peer: peer_id.clone(),
            net: self.net.clone(),
            evt_send,
            state: Mutex::new(MemConnState::default()),
        });

        self.net.register(&conn);
        self.conns
            .lock()
            .unwrap()
            .push((peer_id.clone(), Arc::downgrade(&conn)));

        let out: DynPeerConnection = conn;
        Ok((out, evt_recv))
    }
}

#[derive(Default)]
struct MemConnState {
    closed: bool,
    gathered: bool,
    linked: bool,
    local_desc: Option<SessionDescription>,
    remote_desc: Option<SessionDescription>,
    remote_conn: Option<Uniq>,
    channels: Vec<Arc<MemDataChannel>>,
    senders: Vec<TrackSender>,
    remote_tracks: Vec<(String, MediaTrack)>,
    remote_candidates: usize,
    ice_state: IceConnectionState,
    fail_next: HashSet<MemOp>,
}

impl MemConnState {
    fn check(&mut self, op: MemOp) -> Result<()> {
        if self.closed {
            return Err(Error::id_info("InvalidState", "connection closed"));
        }
        if self.fail_next.remove(&op) {
            return Err(Error::id_info("MemInjectedFailure", format!("{op:?}")));
        }
        Ok(())
    }

    fn sdp(&self, uniq: Uniq) -> Result<String> {
        MemSdp {
            conn: uniq,
            tracks: self
                .senders
                .iter()
                .map(|s| (s.stream_id.clone(), s.track.clone()))
                .collect(),
        }
        .encode()
    }
}

/// A simulated peer connection.
pub struct MemPeerConnection {
    uniq: Uniq,
    local: PeerId,
    remote_peer: PeerId,
    net: Arc<MemNet>,
    evt_send: tokio::sync::mpsc::UnboundedSender<PeerConnectionEvent>,
    state: Mutex<MemConnState>,
}

impl std::fmt::Debug for MemPeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemPeerConnection")
            .field("uniq", &self.uniq)
            .field("local", &self.local)
            .field("remote_peer", &self.remote_peer)
            .finish()
    }
}

impl MemPeerConnection {
    /// Identity of this connection on its [MemNet].
    pub fn uniq(&self) -> Uniq {
        self.uniq
    }

    /// The peer this connection was created for.
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    /// Make the next invocation of `op` fail.
    pub fn fail_next(&self, op: MemOp) {
        self.state.lock().unwrap().fail_next.insert(op);
    }

    /// Transition the ice connection state, emitting the event.
    pub fn set_ice_state(&self, ice_state: IceConnectionState) {
        self.state.lock().unwrap().ice_state = ice_state;
        self.emit(PeerConnectionEvent::IceConnectionState(ice_state));
    }

    /// Current ice connection state.
    pub fn ice_state(&self) -> IceConnectionState {
        self.state.lock().unwrap().ice_state
    }

    /// Emit an arbitrary event.
    pub fn emit(&self, evt: PeerConnectionEvent) {
        let _ = self.evt_send.send(evt);
    }

    /// Returns `true` once [PeerConnection::close] was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Local tracks currently attached.
    pub fn local_tracks(&self) -> Vec<MediaTrack> {
        self.state
            .lock()
            .unwrap()
            .senders
            .iter()
            .map(|s| s.track.clone())
            .collect()
    }

    /// Remote tracks announced by the last applied remote description.
    pub fn remote_tracks(&self) -> Vec<MediaTrack> {
        self.state
            .lock()
            .unwrap()
            .remote_tracks
            .iter()
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// How many remote ice candidates were applied successfully.
    pub fn remote_candidate_count(&self) -> usize {
        self.state.lock().unwrap().remote_candidates
    }

    /// Once both descriptions are applied, find the connection on the other
    /// end and hand it any data channels we opened.
    fn maybe_link(&self) {
        let (remote, unpaired) = {
            let mut lock = self.state.lock().unwrap();
            if lock.closed
                || lock.linked
                || lock.local_desc.is_none()
                || lock.remote_desc.is_none()
            {
                return;
            }
            let remote = match lock.remote_conn.and_then(|u| self.net.lookup(u))
            {
                Some(remote) => remote,
                None => return,
            };
            lock.linked = true;
            lock.ice_state = IceConnectionState::Connected;
            let unpaired = lock
                .channels
                .iter()
                .filter(|c| !c.is_paired())
                .cloned()
                .collect::<Vec<_>>();
            (remote, unpaired)
        };

        tracing::trace!(local = %self.local, remote = %self.remote_peer, "mem link");

        self.emit(PeerConnectionEvent::IceConnectionState(
            IceConnectionState::Connected,
        ));

        for chan in unpaired {
            remote.accept_channel(&chan);
        }
    }

    fn accept_channel(&self, offered: &Arc<MemDataChannel>) {
        if self.state.lock().unwrap().closed {
            return;
        }
        let (chan, recv) = MemDataChannel::new(offered.label());
        MemDataChannel::pair(offered, &chan);
        self.emit(PeerConnectionEvent::DataChannel(chan.clone(), recv));
        chan.open();
        offered.open();
    }

    fn linked_remote(&self) -> Option<Arc<MemPeerConnection>> {
        let lock = self.state.lock().unwrap();
        if !lock.linked {
            return None;
        }
        lock.remote_conn.and_then(|u| self.net.lookup(u))
    }

    fn negotiation_needed(&self) {
        self.emit(PeerConnectionEvent::NegotiationNeeded);
    }
}

impl PeerConnection for MemPeerConnection {
    fn create_offer(&self) -> BoxFuture<'_, Result<SessionDescription>> {
        Box::pin(async move {
            let mut lock = self.state.lock().unwrap();
            lock.check(MemOp::CreateOffer)?;
            Ok(SessionDescription::offer(lock.sdp(self.uniq)?))
        })
    }

    fn create_answer(&self) -> BoxFuture<'_, Result<SessionDescription>> {
        Box::pin(async move {
            let mut lock = self.state.lock().unwrap();
            lock.check(MemOp::CreateAnswer)?;
            match &lock.remote_desc {
                Some(d) if d.sdp_type == SdpType::Offer => (),
                _ => {
                    return Err(Error::id_info(
                        "InvalidState",
                        "no remote offer to answer",
                    ))
                }
            }
            Ok(SessionDescription::answer(lock.sdp(self.uniq)?))
        })
    }

    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let gather = {
                let mut lock = self.state.lock().unwrap();
                lock.check(MemOp::SetLocalDescription)?;
                lock.local_desc = Some(desc);
                !std::mem::replace(&mut lock.gathered, true)
            };

            if gather {
                self.emit(PeerConnectionEvent::IceCandidate(Some(
                    IceCandidate {
                        candidate: format!(
                            "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                            self.uniq,
                            40000 + (self.uniq.0 % 20000),
                        ),
                        sdp_mid: Some("0".into()),
                        sdp_m_line_index: Some(0),
                        username_fragment: None,
                    },
                )));
                self.emit(PeerConnectionEvent::IceCandidate(None));
            }

            self.maybe_link();
            Ok(())
        })
    }

    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let (added, removed) = {
                let mut lock = self.state.lock().unwrap();
                lock.check(MemOp::SetRemoteDescription)?;
                if desc.sdp_type != SdpType::Offer {
                    match &lock.local_desc {
                        Some(d) if d.sdp_type == SdpType::Offer => (),
                        _ => {
                            return Err(Error::id_info(
                                "InvalidState",
                                "answer without a local offer",
                            ))
                        }
                    }
                }
                let sdp = MemSdp::decode(&desc.sdp)?;
                if let Some(cur) = lock.remote_conn {
                    if cur != sdp.conn {
                        return Err(Error::id_info(
                            "InvalidState",
                            "description from a different connection",
                        ));
                    }
                }
                lock.remote_conn = Some(sdp.conn);
                lock.remote_desc = Some(desc);

                let prev = std::mem::replace(&mut lock.remote_tracks, sdp.tracks);
                let added = if !lock.remote_tracks.is_empty()
                    && lock.remote_tracks != prev
                {
                    let id = lock.remote_tracks[0].0.clone();
                    Some(MediaStream {
                        id,
                        tracks: lock
                            .remote_tracks
                            .iter()
                            .map(|(_, t)| t.clone())
                            .collect(),
                    })
                } else {
                    None
                };
                let removed = if lock.remote_tracks.is_empty() {
                    prev.first().map(|(id, _)| id.clone())
                } else {
                    None
                };
                (added, removed)
            };

            if let Some(stream) = added {
                self.emit(PeerConnectionEvent::Track(stream));
            }
            if let Some(id) = removed {
                self.emit(PeerConnectionEvent::RemoveStream(id));
            }

            self.maybe_link();
            Ok(())
        })
    }

    fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().local_desc.clone()
    }

    fn add_ice_candidate(
        &self,
        _candidate: IceCandidate,
    ) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut lock = self.state.lock().unwrap();
            lock.check(MemOp::AddIceCandidate)?;
            if lock.remote_desc.is_none() {
                return Err(Error::id_info(
                    "InvalidState",
                    "remote description not set",
                ));
            }
            lock.remote_candidates += 1;
            Ok(())
        })
    }

    fn create_data_channel(
        &self,
        label: &str,
        _init: &DataChannelInit,
    ) -> Result<(DynDataChannel, DataChannelEventRecv)> {
        let (chan, recv) = MemDataChannel::new(label);

        let first = {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return Err(Error::id_info("InvalidState", "connection closed"));
            }
            lock.channels.push(chan.clone());
            lock.channels.len() == 1
        };

        if let Some(remote) = self.linked_remote() {
            remote.accept_channel(&chan);
        } else if first {
            self.negotiation_needed();
        }

        let out: DynDataChannel = chan;
        Ok((out, recv))
    }

    fn add_track(
        &self,
        stream_id: &str,
        track: MediaTrack,
    ) -> Result<TrackSender> {
        let sender = TrackSender {
            id: Uniq::default(),
            stream_id: stream_id.to_string(),
            track,
        };

        {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return Err(Error::id_info("InvalidState", "connection closed"));
            }
            lock.senders.push(sender.clone());
        }

        self.negotiation_needed();
        Ok(sender)
    }

    fn remove_track(&self, sender: &TrackSender) -> Result<()> {
        {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return Err(Error::id_info("InvalidState", "connection closed"));
            }
            let before = lock.senders.len();
            lock.senders.retain(|s| s.id != sender.id);
            if lock.senders.len() == before {
                return Err(Error::id("UnknownSender"));
            }
        }

        self.negotiation_needed();
        Ok(())
    }

    fn close(&self) {
        let channels = {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return;
            }
            lock.closed = true;
            lock.ice_state = IceConnectionState::Closed;
            std::mem::take(&mut lock.channels)
        };

        tracing::trace!(local = %self.local, remote = %self.remote_peer, "mem close");

        for chan in channels {
            chan.close();
        }
    }
}

#[derive(Default)]
struct MemChanState {
    open: bool,
    closed: bool,
    peer: Option<Weak<MemDataChannel>>,
    queue: Vec<Vec<u8>>,
}

/// A simulated data channel.
pub struct MemDataChannel {
    label: String,
    evt_send: tokio::sync::mpsc::UnboundedSender<DataChannelEvent>,
    state: Mutex<MemChanState>,
}

impl std::fmt::Debug for MemDataChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDataChannel")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish()
    }
}

impl MemDataChannel {
    fn new(label: &str) -> (Arc<Self>, DataChannelEventRecv) {
        let (evt_send, evt_recv) = tokio::sync::mpsc::unbounded_channel();
        let chan = Arc::new(Self {
            label: label.to_string(),
            evt_send,
            state: Mutex::new(MemChanState::default()),
        });
        (chan, evt_recv)
    }

    fn pair(a: &Arc<Self>, b: &Arc<Self>) {
        a.state.lock().unwrap().peer = Some(Arc::downgrade(b));
        b.state.lock().unwrap().peer = Some(Arc::downgrade(a));
    }

    fn is_paired(&self) -> bool {
        self.state.lock().unwrap().peer.is_some()
    }

    fn open(&self) {
        let (peer, queue) = {
            let mut lock = self.state.lock().unwrap();
            if lock.open || lock.closed {
                return;
            }
            lock.open = true;
            (
                lock.peer.as_ref().and_then(|p| p.upgrade()),
                std::mem::take(&mut lock.queue),
            )
        };

        let _ = self.evt_send.send(DataChannelEvent::Open);

        if let Some(peer) = peer {
            for data in queue {
                peer.deliver(data);
            }
        }
    }

    fn deliver(&self, data: Vec<u8>) {
        if self.state.lock().unwrap().closed {
            return;
        }
        let _ = self.evt_send.send(DataChannelEvent::Message(data));
    }
}

impl DataChannel for MemDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }

    fn send(&self, data: Vec<u8>) -> Result<()> {
        let peer = {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return Err(Error::id("ChannelClosed"));
            }
            if !lock.open {
                lock.queue.push(data);
                return Ok(());
            }
            lock.peer.as_ref().and_then(|p| p.upgrade())
        };

        match peer {
            Some(peer) => {
                peer.deliver(data);
                Ok(())
            }
            None => Err(Error::id("ChannelClosed")),
        }
    }

    fn close(&self) {
        let peer = {
            let mut lock = self.state.lock().unwrap();
            if lock.closed {
                return;
            }
            lock.closed = true;
            lock.open = false;
            lock.queue.clear();
            lock.peer.take().and_then(|p| p.upgrade())
        };

        let _ = self.evt_send.send(DataChannelEvent::Close);

        if let Some(peer) = peer {
            peer.close();
        }
    }
}
