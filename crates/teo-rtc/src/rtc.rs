use crate::*;
use teo_signal::DynRelayTransport;

/// Direct-connect overlay for a relay client.
///
/// Wire the relay client's lifecycle into [TeoRtc::on_open],
/// [TeoRtc::on_close] and [TeoRtc::on_error], feed it every frame the
/// relay delivers through [TeoRtc::on_relay_frame], and send
/// application messages through [TeoRtc::send].
///
/// Must be used from within a tokio runtime.
#[derive(Clone)]
pub struct TeoRtc {
    engine: Arc<Engine>,
    call: CallController,
}

impl std::fmt::Debug for TeoRtc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeoRtc")
            .field("local_id", &self.local_id())
            .finish()
    }
}

impl TeoRtc {
    /// Construct a new overlay on top of `relay`,
    /// creating connections through `factory`.
    pub fn new(
        config: RtcConfig,
        factory: DynConnectionFactory,
        relay: DynRelayTransport,
    ) -> Self {
        let engine = Engine::new(Arc::new(config), factory, relay);
        let call = CallController::new(engine.clone());
        Self { engine, call }
    }

    /// Our relay client name.
    pub fn local_id(&self) -> PeerId {
        self.engine.channel().local_id()
    }

    /// The signaling channel.
    pub fn signal_channel(&self) -> &Arc<SignalChannel> {
        self.engine.channel()
    }

    /// The call controller.
    pub fn call_controller(&self) -> &CallController {
        &self.call
    }

    /// Send an application message, see [SignalChannel::send].
    pub fn send(&self, message: &serde_json::Value) -> bool {
        self.engine.channel().send(message)
    }

    /// Send a serialized application message.
    pub fn send_str(&self, message: &str) -> bool {
        self.engine.channel().send_str(message)
    }

    /// Handle a frame tagged with the reserved signal command.
    pub fn on_signal(&self, frame: &RelayFrame) -> bool {
        self.engine.channel().on_signal_frame(frame)
    }

    /// Handle a frame received from the relay. Signal frames are consumed,
    /// anything else is handed back for the application.
    pub fn on_relay_frame(&self, frame: RelayFrame) -> Option<RelayFrame> {
        if frame.is_signal() {
            self.on_signal(&frame);
            None
        } else {
            Some(frame)
        }
    }

    /// The relay connection opened.
    pub fn on_open(&self) {
        tracing::info!(local_id = %self.local_id(), "relay open");
    }

    /// The relay connection closed, all direct connections are dropped.
    pub fn on_close(&self) {
        self.engine.channel().on_transport_closed();
    }

    /// The relay connection reported an error.
    pub fn on_error(&self, err: &std::io::Error) {
        tracing::warn!(?err, local_id = %self.local_id(), "relay error");
    }

    /// See [CallController::call].
    pub fn call(
        &self,
        peer_id: &PeerId,
        local_media: Option<&MediaStream>,
        options: CallOptions,
    ) -> bool {
        self.call.call(peer_id, local_media, options)
    }

    /// See [CallController::hangup].
    pub fn hangup(&self, peer_id: &PeerId) -> bool {
        self.call.hangup(peer_id)
    }

    /// See [CallController::register_call_answer].
    pub fn register_call_answer<Cb>(&self, cb: Cb)
    where
        Cb: Fn(&PeerId, Option<MediaStream>) + 'static + Send + Sync,
    {
        self.call.register_call_answer(Arc::new(cb));
    }

    /// See [CallController::unregister_call_answer].
    pub fn unregister_call_answer(&self) {
        self.call.unregister_call_answer();
    }

    /// Snapshot of every peer record, for diagnostics and ui listings.
    pub fn get_webrtc_map(&self) -> HashMap<PeerId, PeerSnapshot> {
        self.engine.registry().lock().unwrap().snapshot()
    }

    /// Returns `true` if messages to `peer_id` go over a direct channel.
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.engine.registry().lock().unwrap().is_connected(peer_id)
    }

    /// Close the direct connection to `peer_id`, if any, ending a call
    /// with it. Later sends fall back to the relay and negotiate again.
    pub fn disconnect(&self, peer_id: &str) -> bool {
        self.engine.disconnect(peer_id)
    }
}
