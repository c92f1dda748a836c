use crate::*;

/// Adds local media to, and removes it from, established connections.
#[derive(Clone)]
pub struct CallController {
    engine: Arc<Engine>,
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController").finish()
    }
}

impl CallController {
    pub(crate) fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Start a call over the open direct connection to `peer_id`.
    ///
    /// Tracks of `local_media` matching `options` are attached, which
    /// renegotiates the connection. Should the remote side remove its
    /// stream later on, the attached tracks are removed as well.
    /// Returns `false` if `options` requests nothing, or if there is no
    /// open direct connection to the peer.
    pub fn call(
        &self,
        peer_id: &PeerId,
        local_media: Option<&MediaStream>,
        options: CallOptions,
    ) -> bool {
        if !options.any() {
            tracing::debug!(%peer_id, "call requests no media");
            return false;
        }

        let conn = {
            let reg = self.engine.registry().lock().unwrap();
            if !reg.is_connected(peer_id) {
                tracing::debug!(%peer_id, "call without direct connection");
                return false;
            }
            match reg.get_connection(peer_id) {
                Some(conn) => conn,
                None => return false,
            }
        };

        let mut senders = Vec::new();
        if let Some(stream) = local_media {
            for track in stream.tracks.iter() {
                let wanted = match track.kind {
                    TrackKind::Video => options.video,
                    TrackKind::Audio => options.audio,
                };
                if !wanted {
                    continue;
                }
                match conn.add_track(&stream.id, track.clone()) {
                    Ok(sender) => senders.push(sender),
                    Err(err) => {
                        tracing::warn!(?err, %peer_id, track_id = %track.id, "failed to add track");
                    }
                }
            }
        }

        {
            let mut reg = self.engine.registry().lock().unwrap();
            match reg.get_mut(peer_id) {
                Some(rec) => {
                    if !senders.is_empty() {
                        rec.session.suppress_disconnect = true;
                    }
                    rec.session.local_senders.extend(senders);
                    rec.session.hangup_on_remote_remove = true;
                }
                None => return false,
            }
        }

        tracing::info!(%peer_id, ?options, "call");
        self.engine
            .channel()
            .send_signal(peer_id, SignalPayload::call(options));
        true
    }

    /// Remove all local tracks attached to the connection with `peer_id`.
    /// The connection and its data channel stay open.
    pub fn hangup(&self, peer_id: &PeerId) -> bool {
        let (conn, senders) = {
            let mut reg = self.engine.registry().lock().unwrap();
            match reg.get_mut(peer_id) {
                Some(rec) => {
                    rec.session.hangup_on_remote_remove = false;
                    (
                        rec.connection.clone(),
                        std::mem::take(&mut rec.session.local_senders),
                    )
                }
                None => return false,
            }
        };

        tracing::info!(%peer_id, tracks = senders.len(), "hangup");

        if let Some(conn) = conn {
            for sender in senders {
                if let Err(err) = conn.remove_track(&sender) {
                    tracing::debug!(?err, %peer_id, "failed to remove track");
                }
            }
        }

        true
    }

    /// Set the callback invoked when a remote stream attaches,
    /// or when a call ends.
    pub fn register_call_answer(&self, cb: CallAnswerCb) {
        self.engine.set_call_answer(Some(cb));
    }

    /// Clear the call answer callback.
    pub fn unregister_call_answer(&self) {
        self.engine.set_call_answer(None);
    }
}
