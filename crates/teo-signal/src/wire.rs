use crate::*;

/// A frame as exchanged with the relay server.
///
/// Outgoing frames carry `to`, the relay stamps `from` on delivery.
/// Any application fields beyond the well-known ones are preserved
/// in `extra`, so a message can be re-serialized without loss.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RelayFrame {
    /// Relay command code, [CMD_SIGNAL] for signaling envelopes.
    #[serde(default)]
    pub cmd: u8,

    /// Sender, stamped by the relay server or by a direct channel sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<PeerId>,

    /// Destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<PeerId>,

    /// Command payload.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,

    /// Additional application fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RelayFrame {
    /// Parse a serialized relay frame.
    pub fn parse(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Serialize this frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns `true` if this frame is a signaling envelope.
    pub fn is_signal(&self) -> bool {
        self.cmd == CMD_SIGNAL
    }

    /// Decode the signal payload carried in `data`.
    pub fn signal_payload(&self) -> Result<SignalPayload> {
        SignalPayload::from_value(self.data.clone())
    }
}

/// The SDP type of a session description.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// An offer.
    Offer,

    /// An answer.
    Answer,

    /// A provisional answer.
    Pranswer,
}

/// A webrtc session description.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SessionDescription {
    /// Offer, answer, or provisional answer.
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// The opaque session description body.
    pub sdp: String,
}

impl SessionDescription {
    /// Construct an offer.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Construct an answer.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A webrtc ice candidate.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// The candidate attribute line.
    pub candidate: String,

    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Media description index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,

    /// Ice ufrag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Media a call should carry.
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
#[serde(default)]
pub struct CallOptions {
    /// Send local video tracks.
    pub video: bool,

    /// Send local audio tracks.
    pub audio: bool,

    /// Text chat only, no media required.
    pub chat: bool,
}

impl CallOptions {
    /// Returns `true` if any of video, audio, or chat is requested.
    pub fn any(&self) -> bool {
        self.video || self.audio || self.chat
    }
}

/// The `desc` member of a signal payload: either a real session
/// description, or one of the overlay control markers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum SignalDesc {
    /// Session description offer.
    #[serde(rename = "offer")]
    Offer {
        /// Opaque sdp body.
        sdp: String,
    },

    /// Session description answer.
    #[serde(rename = "answer")]
    Answer {
        /// Opaque sdp body.
        sdp: String,
    },

    /// Provisional session description answer.
    #[serde(rename = "pranswer")]
    Pranswer {
        /// Opaque sdp body.
        sdp: String,
    },

    /// The initiator is starting a fresh connection.
    #[serde(rename = "teocli-start")]
    Start,

    /// The sender abandoned its half of the negotiation.
    #[serde(rename = "teocli-reset")]
    Reset,

    /// The sender is starting a call over the existing connection.
    #[serde(rename = "teocli-call")]
    Call(CallOptions),
}

impl From<SessionDescription> for SignalDesc {
    fn from(d: SessionDescription) -> Self {
        let SessionDescription { sdp_type, sdp } = d;
        match sdp_type {
            SdpType::Offer => Self::Offer { sdp },
            SdpType::Answer => Self::Answer { sdp },
            SdpType::Pranswer => Self::Pranswer { sdp },
        }
    }
}

impl SignalDesc {
    /// Get the session description if this is not a control marker.
    pub fn session(&self) -> Option<SessionDescription> {
        let (sdp_type, sdp) = match self {
            Self::Offer { sdp } => (SdpType::Offer, sdp),
            Self::Answer { sdp } => (SdpType::Answer, sdp),
            Self::Pranswer { sdp } => (SdpType::Pranswer, sdp),
            _ => return None,
        };
        Some(SessionDescription {
            sdp_type,
            sdp: sdp.clone(),
        })
    }
}

/// Payload of a signaling envelope.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum SignalPayload {
    /// A session description or control marker.
    Desc {
        /// The description.
        desc: SignalDesc,
    },

    /// An ice candidate, `None` marks the end of candidates.
    Candidate {
        /// The candidate.
        candidate: Option<IceCandidate>,
    },
}

impl<'de> serde::Deserialize<'de> for SignalPayload {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        Self::from_value(v).map_err(serde::de::Error::custom)
    }
}

impl SignalPayload {
    /// Decode a payload. Anything without a `desc` member is treated as
    /// carrying an ice candidate.
    pub fn from_value(mut v: serde_json::Value) -> Result<Self> {
        let obj = match v.as_object_mut() {
            Some(obj) => obj,
            None => return Err(Error::id("InvalidSignalPayload")),
        };
        if let Some(desc) = obj.remove("desc") {
            let desc = serde_json::from_value(desc)?;
            return Ok(Self::Desc { desc });
        }
        let candidate = match obj.remove("candidate") {
            None | Some(serde_json::Value::Null) => None,
            Some(c) => Some(serde_json::from_value(c)?),
        };
        Ok(Self::Candidate { candidate })
    }

    /// Start marker.
    pub fn start() -> Self {
        Self::Desc {
            desc: SignalDesc::Start,
        }
    }

    /// Reset marker.
    pub fn reset() -> Self {
        Self::Desc {
            desc: SignalDesc::Reset,
        }
    }

    /// Call marker.
    pub fn call(options: CallOptions) -> Self {
        Self::Desc {
            desc: SignalDesc::Call(options),
        }
    }

    /// Session description.
    pub fn desc(desc: SessionDescription) -> Self {
        Self::Desc { desc: desc.into() }
    }

    /// Ice candidate.
    pub fn candidate(candidate: IceCandidate) -> Self {
        Self::Candidate {
            candidate: Some(candidate),
        }
    }
}

/// A signaling envelope, sent over the relay only.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SignalEnvelope {
    /// Always [CMD_SIGNAL].
    pub cmd: u8,

    /// Destination peer.
    pub to: PeerId,

    /// The signal payload.
    pub data: SignalPayload,
}

impl SignalEnvelope {
    /// Wrap a payload for delivery to a peer.
    pub fn new(to: PeerId, data: SignalPayload) -> Self {
        Self {
            cmd: CMD_SIGNAL,
            to,
            data,
        }
    }

    /// Serialize this envelope.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
