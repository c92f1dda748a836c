use crate::*;

/// Capability of the relay client the direct-connect overlay rides on.
///
/// The relay client owns its websocket, login and reconnect logic.
/// The overlay only needs to push serialized frames out, and to hand
/// frames it received over a direct channel back into the client's
/// normal dispatch.
pub trait RelayTransport: 'static + Send + Sync {
    /// The name this client logged in to the relay with.
    fn client_name(&self) -> PeerId;

    /// Best-effort send of a serialized frame. The return value indicates
    /// whether the relay accepted it for transmission, not delivery.
    fn send(&self, frame: &str) -> bool;

    /// Dispatch a serialized frame to the application as if it had
    /// been received from the relay.
    fn process(&self, frame: &str);
}

/// Trait-object version of [RelayTransport].
pub type DynRelayTransport = Arc<dyn RelayTransport + 'static + Send + Sync>;
