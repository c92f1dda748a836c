use crate::*;
use std::collections::HashMap;
use std::sync::{Mutex, Weak};

type ClientMap = HashMap<PeerId, tokio::sync::mpsc::UnboundedSender<RelayFrame>>;

/// An in-process star relay. Clients connect by name, frames sent by a
/// client are stamped with its name as `from` and delivered to the
/// client named in `to`.
pub struct MemRelay {
    clients: Mutex<ClientMap>,
}

impl std::fmt::Debug for MemRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemRelay")
            .field("clients", &self.client_names())
            .finish()
    }
}

impl MemRelay {
    /// Construct a new, empty relay.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(HashMap::new()),
        })
    }

    /// Log a new client in to this relay.
    pub fn connect(
        self: &Arc<Self>,
        name: impl Into<PeerId>,
    ) -> Result<(Arc<MemRelayClient>, MemRelayRecv)> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::id("EmptyClientName"));
        }

        let (send, recv) = tokio::sync::mpsc::unbounded_channel();

        {
            let mut lock = self.clients.lock().unwrap();
            if lock.contains_key(&name) {
                return Err(Error::id_info("ClientNameTaken", &*name));
            }
            lock.insert(name.clone(), send);
        }

        tracing::debug!(%name, "mem relay client connected");

        let client = Arc::new(MemRelayClient {
            name,
            relay: Arc::downgrade(self),
            sent: Mutex::new(Vec::new()),
        });

        Ok((client, MemRelayRecv(recv)))
    }

    /// Drop a client. Its [MemRelayRecv] will end once drained.
    pub fn disconnect(&self, name: &str) {
        if self.clients.lock().unwrap().remove(name).is_some() {
            tracing::debug!(%name, "mem relay client disconnected");
        }
    }

    /// Names of all connected clients.
    pub fn client_names(&self) -> Vec<PeerId> {
        let mut out = self
            .clients
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        out.sort();
        out
    }

    fn deliver(&self, to: &PeerId, frame: RelayFrame) -> bool {
        match self.clients.lock().unwrap().get(to) {
            Some(send) => send.send(frame).is_ok(),
            None => {
                tracing::trace!(%to, "mem relay drop, no such client");
                false
            }
        }
    }
}

/// A client logged in to a [MemRelay].
pub struct MemRelayClient {
    name: PeerId,
    relay: Weak<MemRelay>,
    sent: Mutex<Vec<RelayFrame>>,
}

impl std::fmt::Debug for MemRelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemRelayClient")
            .field("name", &self.name)
            .finish()
    }
}

impl MemRelayClient {
    /// Every frame this client handed to the relay, in order.
    pub fn sent(&self) -> Vec<RelayFrame> {
        self.sent.lock().unwrap().clone()
    }

    /// The signal payloads this client sent, with their destinations.
    pub fn sent_signals(&self) -> Vec<(PeerId, SignalPayload)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.is_signal())
            .filter_map(|f| {
                let to = f.to.clone()?;
                let payload = f.signal_payload().ok()?;
                Some((to, payload))
            })
            .collect()
    }

    /// The non-signal frames this client sent through the relay.
    pub fn sent_app_frames(&self) -> Vec<RelayFrame> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|f| !f.is_signal())
            .cloned()
            .collect()
    }

    /// Forget the record of sent frames.
    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

impl RelayTransport for MemRelayClient {
    fn client_name(&self) -> PeerId {
        self.name.clone()
    }

    fn send(&self, frame: &str) -> bool {
        let mut frame = match RelayFrame::parse(frame) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(?err, "mem relay refused unparsable frame");
                return false;
            }
        };

        let to = match frame.to.clone() {
            Some(to) => to,
            None => return false,
        };

        self.sent.lock().unwrap().push(frame.clone());

        let relay = match self.relay.upgrade() {
            Some(relay) => relay,
            None => return false,
        };

        // the relay server, not the sender, decides who a frame is from
        frame.from = Some(self.name.clone());

        relay.deliver(&to, frame)
    }

    fn process(&self, frame: &str) {
        let frame = match RelayFrame::parse(frame) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(?err, "mem relay cannot process frame");
                return;
            }
        };

        if let Some(relay) = self.relay.upgrade() {
            relay.deliver(&self.name, frame);
        }
    }
}

/// Frames delivered to a [MemRelayClient].
pub struct MemRelayRecv(tokio::sync::mpsc::UnboundedReceiver<RelayFrame>);

impl std::fmt::Debug for MemRelayRecv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemRelayRecv").finish()
    }
}

impl MemRelayRecv {
    /// Receive the next frame, `None` once the client is disconnected.
    pub async fn recv(&mut self) -> Option<RelayFrame> {
        self.0.recv().await
    }

    /// Receive a frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<RelayFrame> {
        self.0.try_recv().ok()
    }
}
