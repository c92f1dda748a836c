//! Webrtc backend capability.
//!
//! The overlay never touches a webrtc stack directly. It creates peer
//! connections through a [ConnectionFactory], drives them through the
//! [PeerConnection] trait, and reacts to the [PeerConnectionEvent]s
//! they emit.

use std::io::Result;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::RtcConfig;
use teo_signal::PeerId;

pub use teo_signal::{IceCandidate, SdpType, SessionDescription};

mod mem;
pub use mem::*;

/// Ice connection state of a peer connection.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering has not started.
    #[default]
    New,

    /// Checking candidate pairs.
    Checking,

    /// A usable candidate pair was found.
    Connected,

    /// All checks are done.
    Completed,

    /// Connectivity was lost, may recover.
    Disconnected,

    /// Connectivity was lost for good.
    Failed,

    /// The connection was closed.
    Closed,
}

/// Kind of a media track.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio.
    Audio,

    /// Video.
    Video,
}

/// Handle to a media track.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaTrack {
    /// Track id.
    pub id: String,

    /// Audio or video.
    pub kind: TrackKind,
}

impl MediaTrack {
    /// Construct an audio track handle.
    pub fn audio(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Audio,
        }
    }

    /// Construct a video track handle.
    pub fn video(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TrackKind::Video,
        }
    }
}

/// A set of media tracks, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MediaStream {
    /// Stream id.
    pub id: String,

    /// Tracks in this stream.
    pub tracks: Vec<MediaTrack>,
}

/// A local track attached to a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSender {
    /// Sender identity.
    pub id: teo_core::Uniq,

    /// Id of the stream the track was added under.
    pub stream_id: String,

    /// The attached track.
    pub track: MediaTrack,
}

/// Data channel creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChannelInit {
    /// Deliver in order.
    pub ordered: bool,

    /// Partial reliability retransmit window.
    pub max_retransmit_time_ms: Option<u32>,
}

/// Events emitted by a data channel.
#[derive(Debug)]
pub enum DataChannelEvent {
    /// The channel is open, sends are delivered.
    Open,

    /// Incoming message.
    Message(Vec<u8>),

    /// The channel was closed by either side.
    Close,

    /// The channel reported an error.
    Error(std::io::Error),
}

/// Receiver for [DataChannelEvent]s.
pub type DataChannelEventRecv =
    tokio::sync::mpsc::UnboundedReceiver<DataChannelEvent>;

/// A webrtc data channel.
pub trait DataChannel: 'static + Send + Sync {
    /// The channel label.
    fn label(&self) -> &str;

    /// Returns `true` while the channel is open.
    fn is_open(&self) -> bool;

    /// Send a message. Messages sent before the channel opens are queued
    /// and delivered on open.
    fn send(&self, data: Vec<u8>) -> Result<()>;

    /// Close the channel. Closing a closed channel is a no-op.
    fn close(&self);
}

/// Trait-object version of [DataChannel].
pub type DynDataChannel = Arc<dyn DataChannel + 'static + Send + Sync>;

/// Events emitted by a peer connection.
pub enum PeerConnectionEvent {
    /// The connection reported an error.
    Error(std::io::Error),

    /// A local ice candidate was gathered, `None` ends gathering.
    IceCandidate(Option<IceCandidate>),

    /// The connection wants a new offer / answer exchange.
    NegotiationNeeded,

    /// The ice connection state changed.
    IceConnectionState(IceConnectionState),

    /// The remote side opened a data channel.
    DataChannel(DynDataChannel, DataChannelEventRecv),

    /// Remote media tracks attached.
    Track(MediaStream),

    /// The remote side removed the stream with the given id.
    RemoveStream(String),
}

impl std::fmt::Debug for PeerConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error(err) => f.debug_tuple("Error").field(err).finish(),
            Self::IceCandidate(c) => {
                f.debug_tuple("IceCandidate").field(c).finish()
            }
            Self::NegotiationNeeded => f.write_str("NegotiationNeeded"),
            Self::IceConnectionState(s) => {
                f.debug_tuple("IceConnectionState").field(s).finish()
            }
            Self::DataChannel(c, _) => {
                f.debug_tuple("DataChannel").field(&c.label()).finish()
            }
            Self::Track(s) => f.debug_tuple("Track").field(s).finish(),
            Self::RemoveStream(id) => {
                f.debug_tuple("RemoveStream").field(id).finish()
            }
        }
    }
}

/// Receiver for [PeerConnectionEvent]s.
pub type PeerConnectionEventRecv =
    tokio::sync::mpsc::UnboundedReceiver<PeerConnectionEvent>;

/// A webrtc peer connection.
pub trait PeerConnection: 'static + Send + Sync {
    /// Generate an offer.
    fn create_offer(&self) -> BoxFuture<'_, Result<SessionDescription>>;

    /// Generate an answer to the current remote offer.
    fn create_answer(&self) -> BoxFuture<'_, Result<SessionDescription>>;

    /// Apply a local description, starting ice gathering.
    fn set_local_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<()>>;

    /// Apply a remote description.
    fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> BoxFuture<'_, Result<()>>;

    /// The currently applied local description.
    fn local_description(&self) -> Option<SessionDescription>;

    /// Apply a remote ice candidate.
    fn add_ice_candidate(
        &self,
        candidate: IceCandidate,
    ) -> BoxFuture<'_, Result<()>>;

    /// Open a data channel on this connection.
    fn create_data_channel(
        &self,
        label: &str,
        init: &DataChannelInit,
    ) -> Result<(DynDataChannel, DataChannelEventRecv)>;

    /// Attach a local media track.
    fn add_track(&self, stream_id: &str, track: MediaTrack)
        -> Result<TrackSender>;

    /// Detach a previously attached local media track.
    fn remove_track(&self, sender: &TrackSender) -> Result<()>;

    /// Close the connection, releasing all resources.
    /// Closing a closed connection is a no-op.
    fn close(&self);
}

/// Trait-object version of [PeerConnection].
pub type DynPeerConnection = Arc<dyn PeerConnection + 'static + Send + Sync>;

/// Creates peer connections.
pub trait ConnectionFactory: 'static + Send + Sync {
    /// Create a new peer connection intended for the given remote peer.
    fn new_connection(
        &self,
        peer_id: &PeerId,
        config: &RtcConfig,
    ) -> Result<(DynPeerConnection, PeerConnectionEventRecv)>;
}

/// Trait-object version of [ConnectionFactory].
pub type DynConnectionFactory =
    Arc<dyn ConnectionFactory + 'static + Send + Sync>;
