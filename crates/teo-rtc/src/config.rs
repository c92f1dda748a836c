use crate::*;

/// An ice (stun / turn) server entry.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase")]
pub struct IceServer {
    /// Server urls, e.g. `stun:stun.l.google.com:19302`.
    pub urls: Vec<String>,

    /// Turn username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Turn credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Direct-connect overlay configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "camelCase", default)]
pub struct RtcConfig {
    /// Ice servers handed to every new peer connection.
    pub ice_servers: Vec<IceServer>,

    /// Label of the data channel the initiator opens.
    pub channel_label: String,

    /// Deliver data channel messages in order.
    pub ordered: bool,

    /// Partial reliability: give up retransmitting after this long.
    /// `None` for a fully reliable channel.
    pub max_retransmit_time_ms: Option<u32>,

    /// Renegotiation requests arriving closer together than this
    /// are coalesced into a single offer.
    pub renegotiation_debounce_ms: u64,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer {
                    urls: vec!["stun:stun.l.google.com:19302".into()],
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: vec!["turn:turn.bistri.com:80".into()],
                    username: Some("homeo".into()),
                    credential: Some("homeo".into()),
                },
            ],
            channel_label: "teocli-rtc".into(),
            ordered: true,
            max_retransmit_time_ms: Some(3000),
            renegotiation_debounce_ms: 50,
        }
    }
}

impl RtcConfig {
    /// The renegotiation quiescence window.
    pub fn renegotiation_debounce(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.renegotiation_debounce_ms)
    }

    /// Options for the data channel the initiator opens.
    pub fn data_channel_init(&self) -> DataChannelInit {
        DataChannelInit {
            ordered: self.ordered,
            max_retransmit_time_ms: self.max_retransmit_time_ms,
        }
    }
}
