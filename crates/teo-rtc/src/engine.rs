use crate::*;
use teo_signal::{DynRelayTransport, SignalDesc};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Callback invoked when a remote stream attaches (`Some`) or a call ends
/// (`None`).
pub type CallAnswerCb =
    Arc<dyn Fn(&PeerId, Option<MediaStream>) + 'static + Send + Sync>;

pub(crate) enum PeerCmd {
    Signal(SignalPayload),
    Evt(PeerConnectionEvent),
    Chan(DataChannelEvent),
    Renegotiate(u64),
}

/// Negotiation state kept alongside a registry record.
/// Dropping it aborts every task driving the record.
#[derive(Default)]
pub(crate) struct PeerSession {
    pub cmd_send: Option<UnboundedSender<PeerCmd>>,
    pub pending_channel: Option<DynDataChannel>,
    pub local_senders: Vec<TrackSender>,
    pub hangup_on_remote_remove: bool,
    pub suppress_disconnect: bool,
    pub tasks: Vec<AbortTask<()>>,
}

fn spawn_forward<E: 'static + Send>(
    mut recv: UnboundedReceiver<E>,
    cmd_send: UnboundedSender<PeerCmd>,
    wrap: fn(E) -> PeerCmd,
) -> AbortTask<()> {
    AbortTask::spawn(async move {
        while let Some(evt) = recv.recv().await {
            if cmd_send.send(wrap(evt)).is_err() {
                break;
            }
        }
    })
}

/// Drives the per-peer offer / answer / ice state machines.
pub(crate) struct Engine {
    this: Weak<Engine>,
    config: Arc<RtcConfig>,
    factory: DynConnectionFactory,
    channel: Arc<SignalChannel>,
    call_answer: Mutex<Option<CallAnswerCb>>,
}

impl Engine {
    pub fn new(
        config: Arc<RtcConfig>,
        factory: DynConnectionFactory,
        relay: DynRelayTransport,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Engine>| {
            let handler: Weak<dyn NegotiationHandler> = this.clone();
            Self {
                this: this.clone(),
                config,
                factory,
                channel: SignalChannel::new(relay, handler),
                call_answer: Mutex::new(None),
            }
        })
    }

    pub fn channel(&self) -> &Arc<SignalChannel> {
        &self.channel
    }

    pub fn registry(&self) -> &Arc<Mutex<Registry>> {
        self.channel.registry()
    }

    pub fn set_call_answer(&self, cb: Option<CallAnswerCb>) {
        *self.call_answer.lock().unwrap() = cb;
    }

    pub fn notify_call(&self, peer_id: &PeerId, stream: Option<MediaStream>) {
        let cb = self.call_answer.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(peer_id, stream);
        }
    }

    fn is_live(&self, peer_id: &PeerId, uniq: Uniq) -> bool {
        self.registry().lock().unwrap().live(peer_id, uniq).is_some()
    }

    /// Start negotiating a direct connection to `peer_id` as initiator.
    pub fn connect(&self, peer_id: &PeerId) {
        if peer_id.is_empty() {
            tracing::debug!("ignoring connect to empty peer id");
            return;
        }
        if *peer_id == self.channel.local_id() {
            tracing::debug!(%peer_id, "ignoring connect to self");
            return;
        }
        self.create_connection(peer_id, Role::Initiator);
    }

    /// Create and register a fresh connection. A responder replaces any
    /// existing record, an initiator only starts if there is none.
    fn create_connection(&self, peer_id: &PeerId, role: Role) -> bool {
        let (conn, evt_recv) =
            match self.factory.new_connection(peer_id, &self.config) {
                Ok(r) => r,
                Err(err) => {
                    tracing::warn!(?err, %peer_id, "failed to create connection");
                    return false;
                }
            };

        let (uniq, cmd_recv) = {
            let mut reg = self.registry().lock().unwrap();

            if role == Role::Initiator && reg.exists(peer_id) {
                conn.close();
                return false;
            }

            let uniq = match reg.create(peer_id, role, conn.clone()) {
                Some(uniq) => uniq,
                None => return false,
            };

            let (cmd_send, cmd_recv) = unbounded_channel();
            let mut tasks =
                vec![spawn_forward(evt_recv, cmd_send.clone(), PeerCmd::Evt)];

            let mut pending_channel = None;
            if role == Role::Initiator {
                match conn.create_data_channel(
                    &self.config.channel_label,
                    &self.config.data_channel_init(),
                ) {
                    Ok((chan, chan_recv)) => {
                        tasks.push(spawn_forward(
                            chan_recv,
                            cmd_send.clone(),
                            PeerCmd::Chan,
                        ));
                        pending_channel = Some(chan);
                    }
                    Err(err) => {
                        tracing::warn!(?err, %peer_id, "failed to open data channel");
                        reg.remove(peer_id);
                        return false;
                    }
                }
            }

            if let Some(rec) = reg.get_mut(peer_id) {
                rec.session.cmd_send = Some(cmd_send);
                rec.session.pending_channel = pending_channel;
                rec.session.tasks = tasks;
            }

            (uniq, cmd_recv)
        };

        if role == Role::Initiator {
            self.channel.send_signal(peer_id, SignalPayload::start());
        }

        // events queue up until the task runs, so the start marker
        // always goes out ahead of the first offer
        let mut reg = self.registry().lock().unwrap();
        match reg.live_mut(peer_id, uniq) {
            Some(rec) => {
                let cmd_send = match rec.session.cmd_send.clone() {
                    Some(cmd_send) => cmd_send,
                    None => return false,
                };
                let task = PeerTask {
                    engine: self.this.clone(),
                    peer_id: peer_id.clone(),
                    uniq,
                    conn,
                    cmd_send,
                    renegotiate_gen: 0,
                    renegotiate_timer: None,
                };
                rec.session.tasks.push(AbortTask::spawn(task.run(cmd_recv)));
                tracing::info!(%peer_id, ?role, %uniq, "negotiating direct connection");
                true
            }
            None => false,
        }
    }

    /// Abandon a failed negotiation. The remote side is told to drop its
    /// half, and the local record is torn down, via the channel close if
    /// there is a channel. Returns `true` if the record is still around.
    fn reset(&self, peer_id: &PeerId, uniq: Uniq, err: std::io::Error) -> bool {
        if !self.is_live(peer_id, uniq) {
            return false;
        }

        tracing::warn!(
            ?err,
            err_id = %err.id(),
            %peer_id,
            %uniq,
            "negotiation failed, resetting",
        );
        self.channel.send_signal(peer_id, SignalPayload::reset());

        let mut reg = self.registry().lock().unwrap();
        let chan = match reg.live(peer_id, uniq) {
            Some(rec) => rec
                .channel
                .clone()
                .or_else(|| rec.session.pending_channel.clone()),
            None => return false,
        };

        match chan {
            Some(chan) => {
                chan.close();
                true
            }
            None => {
                reg.remove(peer_id);
                false
            }
        }
    }

    /// Remove the record and let the call layer know the call is over.
    fn teardown(&self, peer_id: &PeerId, uniq: Uniq) {
        let removed = {
            let mut reg = self.registry().lock().unwrap();
            reg.live(peer_id, uniq).is_some() && reg.remove(peer_id)
        };
        if removed {
            tracing::info!(%peer_id, %uniq, "direct connection closed");
            self.notify_call(peer_id, None);
        }
    }

    /// Drop the record for `peer_id` from the outside, ending any call.
    pub fn disconnect(&self, peer_id: &str) -> bool {
        let (removed, was_connected) = {
            let mut reg = self.registry().lock().unwrap();
            let was_connected = reg.is_connected(peer_id);
            (reg.remove(peer_id), was_connected)
        };
        if was_connected {
            self.notify_call(&PeerId::from(peer_id), None);
        }
        removed
    }

    fn queue_signal(&self, peer_id: &PeerId, payload: SignalPayload) -> bool {
        let cmd_send = self
            .registry()
            .lock()
            .unwrap()
            .get(peer_id)
            .and_then(|r| r.session.cmd_send.clone());
        match cmd_send {
            Some(cmd_send) => cmd_send.send(PeerCmd::Signal(payload)).is_ok(),
            None => false,
        }
    }
}

impl NegotiationHandler for Engine {
    fn start(&self, peer_id: &PeerId) {
        self.connect(peer_id);
    }

    fn closed(&self, peer_id: &PeerId) {
        self.notify_call(peer_id, None);
    }

    fn signal(&self, peer_id: &PeerId, payload: SignalPayload) {
        if peer_id.is_empty() || *peer_id == self.channel.local_id() {
            tracing::debug!(%peer_id, "ignoring signal");
            return;
        }

        match &payload {
            SignalPayload::Desc {
                desc: SignalDesc::Reset,
            } => {
                let (removed, was_connected) = {
                    let mut reg = self.registry().lock().unwrap();
                    let was_connected = reg.is_connected(peer_id);
                    (reg.remove(peer_id), was_connected)
                };
                if removed {
                    tracing::info!(%peer_id, "remote reset");
                    if was_connected {
                        self.notify_call(peer_id, None);
                    }
                }
                return;
            }
            SignalPayload::Desc {
                desc: SignalDesc::Start,
            } => {
                let keep_initiator = {
                    let reg = self.registry().lock().unwrap();
                    match reg.get(peer_id) {
                        Some(rec) => {
                            rec.role == Role::Initiator
                                && !rec.is_connected()
                                && self.channel.local_id() > *peer_id
                        }
                        None => false,
                    }
                };
                if keep_initiator {
                    tracing::debug!(%peer_id, "simultaneous start, keeping initiator role");
                } else {
                    self.create_connection(peer_id, Role::Responder);
                }
                return;
            }
            _ => (),
        }

        if self.queue_signal(peer_id, payload.clone()) {
            return;
        }

        // neither of these can start a negotiation
        let inert = matches!(
            &payload,
            SignalPayload::Desc {
                desc: SignalDesc::Call(_),
            } | SignalPayload::Candidate { candidate: None }
        );
        if inert {
            tracing::debug!(%peer_id, ?payload, "ignoring signal for unknown peer");
            return;
        }

        if self.create_connection(peer_id, Role::Responder)
            && !self.queue_signal(peer_id, payload)
        {
            tracing::debug!(%peer_id, "signal dropped, record went away");
        }
    }
}

struct PeerTask {
    engine: Weak<Engine>,
    peer_id: PeerId,
    uniq: Uniq,
    conn: DynPeerConnection,
    cmd_send: UnboundedSender<PeerCmd>,
    renegotiate_gen: u64,
    renegotiate_timer: Option<AbortTask<()>>,
}

impl PeerTask {
    async fn run(mut self, mut cmd_recv: UnboundedReceiver<PeerCmd>) {
        while let Some(cmd) = cmd_recv.recv().await {
            let engine = match self.engine.upgrade() {
                Some(engine) => engine,
                None => break,
            };

            if !engine.is_live(&self.peer_id, self.uniq) {
                break;
            }

            let keep_going = match cmd {
                PeerCmd::Signal(payload) => {
                    self.on_signal(&engine, payload).await
                }
                PeerCmd::Evt(evt) => self.on_evt(&engine, evt),
                PeerCmd::Chan(evt) => self.on_chan(&engine, evt),
                PeerCmd::Renegotiate(gen) => {
                    if gen == self.renegotiate_gen {
                        self.renegotiate_timer = None;
                        self.offer(&engine).await
                    } else {
                        true
                    }
                }
            };

            if !keep_going {
                break;
            }
        }

        tracing::trace!(peer_id = %self.peer_id, uniq = %self.uniq, "peer task ended");
    }

    async fn on_signal(
        &mut self,
        engine: &Engine,
        payload: SignalPayload,
    ) -> bool {
        let desc = match payload {
            SignalPayload::Desc { desc } => desc,
            SignalPayload::Candidate {
                candidate: Some(candidate),
            } => {
                return match self.conn.add_ice_candidate(candidate).await {
                    Ok(()) => true,
                    Err(err) => engine.reset(&self.peer_id, self.uniq, err),
                };
            }
            SignalPayload::Candidate { candidate: None } => {
                tracing::trace!(peer_id = %self.peer_id, "remote gathering complete");
                return true;
            }
        };

        if let SignalDesc::Call(options) = &desc {
            let mut reg = engine.registry().lock().unwrap();
            if let Some(rec) = reg.live_mut(&self.peer_id, self.uniq) {
                if let serde_json::Value::Object(meta) = &mut rec.metadata {
                    meta.insert(
                        "call".into(),
                        serde_json::json!({
                            "video": options.video,
                            "audio": options.audio,
                            "chat": options.chat,
                        }),
                    );
                }
            }
            tracing::debug!(peer_id = %self.peer_id, ?options, "remote call");
            return true;
        }

        let session = match desc.session() {
            Some(session) => session,
            None => {
                tracing::trace!(peer_id = %self.peer_id, ?desc, "stale marker");
                return true;
            }
        };

        if session.sdp_type == SdpType::Offer {
            let r = async {
                self.conn.set_remote_description(session).await?;
                let answer = self.conn.create_answer().await?;
                self.conn.set_local_description(answer.clone()).await?;
                std::io::Result::Ok(answer)
            }
            .await;

            match r {
                Ok(answer) => {
                    if engine.is_live(&self.peer_id, self.uniq) {
                        tracing::debug!(peer_id = %self.peer_id, "send answer");
                        engine
                            .channel
                            .send_signal(&self.peer_id, SignalPayload::desc(answer));
                    }
                    true
                }
                Err(err) => engine.reset(&self.peer_id, self.uniq, err),
            }
        } else {
            match self.conn.set_remote_description(session).await {
                Ok(()) => true,
                Err(err) => engine.reset(&self.peer_id, self.uniq, err),
            }
        }
    }

    async fn offer(&mut self, engine: &Engine) -> bool {
        let r = async {
            let offer = self.conn.create_offer().await?;
            self.conn.set_local_description(offer.clone()).await?;
            std::io::Result::Ok(offer)
        }
        .await;

        match r {
            Ok(offer) => {
                if engine.is_live(&self.peer_id, self.uniq) {
                    tracing::debug!(peer_id = %self.peer_id, "send offer");
                    engine
                        .channel
                        .send_signal(&self.peer_id, SignalPayload::desc(offer));
                }
                true
            }
            Err(err) => engine.reset(&self.peer_id, self.uniq, err),
        }
    }

    /// Restart the quiescence timer, only the last request within the
    /// window produces an offer.
    fn schedule_renegotiate(&mut self, engine: &Engine) {
        self.renegotiate_gen += 1;
        let gen = self.renegotiate_gen;
        let wait = engine.config.renegotiation_debounce();
        let cmd_send = self.cmd_send.clone();

        if self.renegotiate_timer.is_some() {
            tracing::debug!(peer_id = %self.peer_id, "renegotiation coalesced");
        }

        self.renegotiate_timer = Some(AbortTask::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = cmd_send.send(PeerCmd::Renegotiate(gen));
        }));
    }

    fn on_evt(&mut self, engine: &Engine, evt: PeerConnectionEvent) -> bool {
        use PeerConnectionEvent as E;

        match evt {
            E::Error(err) => {
                tracing::warn!(?err, peer_id = %self.peer_id, "connection error");
            }
            E::IceCandidate(Some(candidate)) => {
                engine
                    .channel
                    .send_signal(&self.peer_id, SignalPayload::candidate(candidate));
            }
            E::IceCandidate(None) => {
                tracing::trace!(peer_id = %self.peer_id, "local gathering complete");
            }
            E::NegotiationNeeded => self.schedule_renegotiate(engine),
            E::IceConnectionState(state) => {
                return self.on_ice_state(engine, state);
            }
            E::DataChannel(chan, chan_recv) => {
                let mut reg = engine.registry().lock().unwrap();
                if let Some(rec) = reg.live_mut(&self.peer_id, self.uniq) {
                    if rec.channel.is_none()
                        && rec.session.pending_channel.is_none()
                    {
                        tracing::debug!(
                            peer_id = %self.peer_id,
                            label = %chan.label(),
                            "remote opened data channel",
                        );
                        rec.session.tasks.push(spawn_forward(
                            chan_recv,
                            self.cmd_send.clone(),
                            PeerCmd::Chan,
                        ));
                        rec.session.pending_channel = Some(chan);
                    } else {
                        tracing::debug!(
                            peer_id = %self.peer_id,
                            label = %chan.label(),
                            "ignoring additional data channel",
                        );
                    }
                }
            }
            E::Track(stream) => {
                {
                    let mut reg = engine.registry().lock().unwrap();
                    if let Some(rec) = reg.live_mut(&self.peer_id, self.uniq) {
                        rec.session.suppress_disconnect = true;
                    }
                }
                tracing::debug!(peer_id = %self.peer_id, stream_id = %stream.id, "remote stream");
                engine.notify_call(&self.peer_id, Some(stream));
            }
            E::RemoveStream(stream_id) => {
                let senders = {
                    let mut reg = engine.registry().lock().unwrap();
                    match reg.live_mut(&self.peer_id, self.uniq) {
                        Some(rec) if rec.session.hangup_on_remote_remove => {
                            rec.session.hangup_on_remote_remove = false;
                            std::mem::take(&mut rec.session.local_senders)
                        }
                        _ => Vec::new(),
                    }
                };
                for sender in senders {
                    if let Err(err) = self.conn.remove_track(&sender) {
                        tracing::debug!(?err, "failed to remove local track");
                    }
                }
                tracing::debug!(peer_id = %self.peer_id, %stream_id, "remote stream removed");
                engine.notify_call(&self.peer_id, None);
            }
        }

        true
    }

    fn on_ice_state(
        &mut self,
        engine: &Engine,
        state: IceConnectionState,
    ) -> bool {
        let (suppressed, chan) = {
            let mut reg = engine.registry().lock().unwrap();
            match reg.live_mut(&self.peer_id, self.uniq) {
                Some(rec) => (
                    std::mem::take(&mut rec.session.suppress_disconnect),
                    rec.channel
                        .clone()
                        .or_else(|| rec.session.pending_channel.clone()),
                ),
                None => return false,
            }
        };

        tracing::debug!(peer_id = %self.peer_id, ?state, suppressed, "ice state");

        match state {
            IceConnectionState::Failed => {
                tracing::warn!(peer_id = %self.peer_id, "ice failed");
                engine.teardown(&self.peer_id, self.uniq);
                false
            }
            IceConnectionState::Disconnected if !suppressed => match chan {
                Some(chan) => {
                    // the close event completes the teardown
                    chan.close();
                    true
                }
                None => {
                    engine.teardown(&self.peer_id, self.uniq);
                    false
                }
            },
            _ => true,
        }
    }

    fn on_chan(&mut self, engine: &Engine, evt: DataChannelEvent) -> bool {
        match evt {
            DataChannelEvent::Open => {
                let mut reg = engine.registry().lock().unwrap();
                let chan = match reg.live_mut(&self.peer_id, self.uniq) {
                    Some(rec) => rec.session.pending_channel.take(),
                    None => return false,
                };
                if let Some(chan) = chan {
                    if reg.attach_channel(&self.peer_id, chan, None) {
                        tracing::info!(
                            peer_id = %self.peer_id,
                            uniq = %self.uniq,
                            "direct channel open",
                        );
                    }
                }
                true
            }
            DataChannelEvent::Message(data) => {
                match String::from_utf8(data) {
                    Ok(msg) => {
                        tracing::trace!(peer_id = %self.peer_id, "recv direct");
                        engine.channel.relay().process(&msg);
                    }
                    Err(err) => {
                        tracing::warn!(?err, peer_id = %self.peer_id, "non-utf8 direct message");
                    }
                }
                true
            }
            DataChannelEvent::Error(err) => {
                tracing::warn!(?err, peer_id = %self.peer_id, "data channel error");
                true
            }
            DataChannelEvent::Close => {
                engine.teardown(&self.peer_id, self.uniq);
                false
            }
        }
    }
}
