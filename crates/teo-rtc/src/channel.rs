use crate::*;
use teo_signal::{DynRelayTransport, SignalEnvelope};

/// Receiver of the negotiation triggers a [SignalChannel] produces.
pub(crate) trait NegotiationHandler: 'static + Send + Sync {
    /// Begin establishing a direct connection to an unknown peer.
    fn start(&self, peer_id: &PeerId);

    /// The established direct connection to `peer_id` was dropped
    /// without its peer task seeing the channel close.
    fn closed(&self, peer_id: &PeerId);

    /// A signal payload arrived from `peer_id` over the relay.
    fn signal(&self, peer_id: &PeerId, payload: SignalPayload);
}

/// The application-facing send path, multiplexed between open direct
/// channels and the relay, plus the relay-tunneled signaling transport.
pub struct SignalChannel {
    relay: DynRelayTransport,
    registry: Arc<Mutex<Registry>>,
    handler: Weak<dyn NegotiationHandler>,
}

impl std::fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChannel")
            .field("local_id", &self.local_id())
            .finish()
    }
}

impl SignalChannel {
    pub(crate) fn new(
        relay: DynRelayTransport,
        handler: Weak<dyn NegotiationHandler>,
    ) -> Arc<Self> {
        Arc::new(Self {
            relay,
            registry: Arc::new(Mutex::new(Registry::new())),
            handler,
        })
    }

    /// The name the relay client is logged in with.
    pub fn local_id(&self) -> PeerId {
        self.relay.client_name()
    }

    /// The relay transport this channel rides on.
    pub fn relay(&self) -> &DynRelayTransport {
        &self.relay
    }

    pub(crate) fn registry(&self) -> &Arc<Mutex<Registry>> {
        &self.registry
    }

    /// Send an application message. Goes over the direct channel to `to`
    /// if one is open, stamping `from`. Otherwise goes over the relay
    /// unmodified, and, if no connection to `to` exists yet, starts
    /// negotiating one.
    pub fn send(&self, message: &serde_json::Value) -> bool {
        let to = match message.get("to").and_then(|t| t.as_str()) {
            Some(to) if !to.is_empty() => PeerId::from(to),
            _ => {
                tracing::debug!("message without destination, relaying");
                return self.relay.send(&message.to_string());
            }
        };

        let (channel, exists) = {
            let reg = self.registry.lock().unwrap();
            let channel = if reg.is_connected(&to) {
                reg.get_channel(&to)
            } else {
                None
            };
            (channel, reg.exists(&to))
        };

        if let Some(channel) = channel {
            let mut message = message.clone();
            if let Some(obj) = message.as_object_mut() {
                obj.insert(
                    "from".into(),
                    serde_json::Value::String(self.local_id().to_string()),
                );
            }
            return match channel.send(message.to_string().into_bytes()) {
                Ok(()) => {
                    tracing::trace!(%to, "sent direct");
                    true
                }
                Err(err) => {
                    tracing::warn!(?err, %to, "direct send failed");
                    false
                }
            };
        }

        if !exists && to != self.local_id() {
            if let Some(handler) = self.handler.upgrade() {
                handler.start(&to);
            }
        }

        tracing::trace!(%to, "sent via relay");
        self.relay.send(&message.to_string())
    }

    /// [SignalChannel::send] for an already serialized message.
    /// Relay fallback forwards the string untouched.
    pub fn send_str(&self, message: &str) -> bool {
        match serde_json::from_str::<serde_json::Value>(message) {
            Ok(value) => self.send(&value),
            Err(err) => {
                tracing::warn!(?err, "refusing to send unparsable message");
                false
            }
        }
    }

    /// Forward a signal from `sender_id` to the negotiation handler.
    pub fn receive_signal(&self, sender_id: &PeerId, payload: SignalPayload) {
        match self.handler.upgrade() {
            Some(handler) => handler.signal(sender_id, payload),
            None => tracing::trace!(%sender_id, "no signal handler"),
        }
    }

    /// Handle a relay frame carrying the reserved signal command.
    /// Returns `false` if the frame was not a usable signal.
    pub fn on_signal_frame(&self, frame: &RelayFrame) -> bool {
        if !frame.is_signal() {
            return false;
        }

        let from = match &frame.from {
            Some(from) if !from.is_empty() => from.clone(),
            _ => {
                tracing::warn!("signal frame without sender");
                return false;
            }
        };

        match frame.signal_payload() {
            Ok(payload) => {
                tracing::trace!(%from, ?payload, "recv signal");
                self.receive_signal(&from, payload);
                true
            }
            Err(err) => {
                tracing::warn!(?err, %from, "invalid signal payload");
                false
            }
        }
    }

    /// The relay session dropped, no direct connection can renegotiate.
    pub fn on_transport_closed(&self) {
        let connected = {
            let mut reg = self.registry.lock().unwrap();
            tracing::info!(count = reg.len(), "relay closed, dropping all peers");
            let connected = reg
                .peer_ids()
                .into_iter()
                .filter(|p| reg.is_connected(p))
                .collect::<Vec<_>>();
            reg.remove_all();
            connected
        };

        if let Some(handler) = self.handler.upgrade() {
            for peer_id in connected {
                handler.closed(&peer_id);
            }
        }
    }

    /// Send a signal payload to `peer_id`, always over the relay.
    pub fn send_signal(&self, peer_id: &PeerId, payload: SignalPayload) -> bool {
        if peer_id.is_empty() {
            return false;
        }

        let frame = match SignalEnvelope::new(peer_id.clone(), payload).encode()
        {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(?err, "failed to encode signal");
                return false;
            }
        };

        tracing::trace!(%peer_id, %frame, "send signal");
        self.relay.send(&frame)
    }
}
