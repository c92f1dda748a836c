use crate::*;

/// Which side of the negotiation a connection record was created for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// We opened the data channel and drive the first offer.
    Initiator,

    /// We react to the remote initiator's signals.
    Responder,
}

/// Coarse connection state reported in a [PeerSnapshot].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// A connection object exists, no usable data channel yet.
    Negotiating,

    /// A usable data channel is attached.
    Connected,
}

/// Everything known about a single remote peer.
pub struct PeerConnectionRecord {
    /// Remote peer identity.
    pub peer_id: PeerId,

    /// Identifies this connection attempt.
    pub uniq: Uniq,

    /// Fixed at creation.
    pub role: Role,

    /// The underlying peer connection.
    pub connection: Option<DynPeerConnection>,

    /// The established data channel.
    pub channel: Option<DynDataChannel>,

    /// Free-form auxiliary info, always a json object.
    pub metadata: serde_json::Value,

    pub(crate) session: PeerSession,
}

impl std::fmt::Debug for PeerConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnectionRecord")
            .field("peer_id", &self.peer_id)
            .field("uniq", &self.uniq)
            .field("role", &self.role)
            .field("has_connection", &self.connection.is_some())
            .field("has_channel", &self.channel.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl PeerConnectionRecord {
    /// Returns `true` if a data channel is attached and open.
    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().map(|c| c.is_open()).unwrap_or(false)
    }

    fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        if let Some(channel) = self.session.pending_channel.take() {
            channel.close();
        }
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        // drops the peer task and its forwarders
        self.session = PeerSession::default();
    }
}

/// A diagnostic view of one registry entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSnapshot {
    /// Identifies the connection attempt.
    pub uniq: Uniq,

    /// Negotiation role.
    pub role: Role,

    /// Negotiating or connected.
    pub state: PeerState,

    /// Auxiliary info.
    pub metadata: serde_json::Value,
}

/// Per-peer connection records.
///
/// At most one record exists per peer id. Removing a record closes
/// everything it owns before the entry is dropped.
#[derive(Default)]
pub struct Registry {
    map: HashMap<PeerId, PeerConnectionRecord>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.remove_all();
    }
}

impl Registry {
    /// Construct a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh record with no channel, tearing down any existing
    /// record for the same peer first. An empty peer id is a no-op.
    pub fn create(
        &mut self,
        peer_id: &PeerId,
        role: Role,
        connection: DynPeerConnection,
    ) -> Option<Uniq> {
        if peer_id.is_empty() {
            tracing::debug!("ignoring connection record for empty peer id");
            connection.close();
            return None;
        }

        self.remove(peer_id);

        let uniq = Uniq::default();
        tracing::debug!(%peer_id, ?role, %uniq, "connection record created");

        self.map.insert(
            peer_id.clone(),
            PeerConnectionRecord {
                peer_id: peer_id.clone(),
                uniq,
                role,
                connection: Some(connection),
                channel: None,
                metadata: serde_json::Value::Object(Default::default()),
                session: PeerSession::default(),
            },
        );

        Some(uniq)
    }

    /// Attach an established data channel to an existing record, merging
    /// any metadata object fields. Without a record that holds a
    /// connection this is a no-op returning `false`.
    pub fn attach_channel(
        &mut self,
        peer_id: &str,
        channel: DynDataChannel,
        metadata: Option<serde_json::Value>,
    ) -> bool {
        let rec = match self.map.get_mut(peer_id) {
            Some(rec) if rec.connection.is_some() => rec,
            _ => {
                tracing::debug!(%peer_id, "no connection to attach channel to");
                return false;
            }
        };

        if let Some(old) = rec.channel.replace(channel.clone()) {
            if !Arc::ptr_eq(&old, &channel) {
                old.close();
            }
        }

        if let Some(serde_json::Value::Object(meta)) = metadata {
            if let serde_json::Value::Object(cur) = &mut rec.metadata {
                cur.extend(meta);
            }
        }

        tracing::debug!(
            %peer_id,
            label = %channel.label(),
            "channel attached",
        );
        true
    }

    /// Returns `true` if a record exists for the peer.
    pub fn exists(&self, peer_id: &str) -> bool {
        self.map.contains_key(peer_id)
    }

    /// Returns `true` if the peer has an open data channel.
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.map
            .get(peer_id)
            .map(|r| r.is_connected())
            .unwrap_or(false)
    }

    /// The peer's connection, if any.
    pub fn get_connection(&self, peer_id: &str) -> Option<DynPeerConnection> {
        self.map.get(peer_id).and_then(|r| r.connection.clone())
    }

    /// The peer's data channel, if any.
    pub fn get_channel(&self, peer_id: &str) -> Option<DynDataChannel> {
        self.map.get(peer_id).and_then(|r| r.channel.clone())
    }

    /// Close and detach only the data channel, keeping the connection.
    pub fn remove_channel(&mut self, peer_id: &str) -> bool {
        match self.map.get_mut(peer_id).and_then(|r| r.channel.take()) {
            Some(channel) => {
                tracing::debug!(%peer_id, "channel removed");
                channel.close();
                true
            }
            None => false,
        }
    }

    /// Close the record's channel, then its connection, then forget it.
    /// Returns `false` if there was nothing to remove.
    pub fn remove(&mut self, peer_id: &str) -> bool {
        match self.map.remove(peer_id) {
            Some(mut rec) => {
                tracing::debug!(
                    %peer_id,
                    uniq = %rec.uniq,
                    "connection record removed",
                );
                rec.close();
                true
            }
            None => false,
        }
    }

    /// [Registry::remove] every record.
    pub fn remove_all(&mut self) {
        let peers = self.map.keys().cloned().collect::<Vec<_>>();
        for peer_id in peers {
            self.remove(&peer_id);
        }
    }

    /// Ids of all peers with a record.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.map.keys().cloned().collect()
    }

    /// A point-in-time view of every record.
    pub fn snapshot(&self) -> HashMap<PeerId, PeerSnapshot> {
        self.map
            .iter()
            .map(|(peer_id, r)| {
                let state = if r.is_connected() {
                    PeerState::Connected
                } else {
                    PeerState::Negotiating
                };
                (
                    peer_id.clone(),
                    PeerSnapshot {
                        uniq: r.uniq,
                        role: r.role,
                        state,
                        metadata: r.metadata.clone(),
                    },
                )
            })
            .collect()
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn get(&self, peer_id: &str) -> Option<&PeerConnectionRecord> {
        self.map.get(peer_id)
    }

    pub(crate) fn get_mut(
        &mut self,
        peer_id: &str,
    ) -> Option<&mut PeerConnectionRecord> {
        self.map.get_mut(peer_id)
    }

    /// The record, only if it is still the attempt identified by `uniq`.
    pub(crate) fn live(
        &self,
        peer_id: &str,
        uniq: Uniq,
    ) -> Option<&PeerConnectionRecord> {
        self.map.get(peer_id).filter(|r| r.uniq == uniq)
    }

    pub(crate) fn live_mut(
        &mut self,
        peer_id: &str,
        uniq: Uniq,
    ) -> Option<&mut PeerConnectionRecord> {
        self.map.get_mut(peer_id).filter(|r| r.uniq == uniq)
    }
}
