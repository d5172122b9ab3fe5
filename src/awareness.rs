//! Ephemeral per-participant state ("awareness").
//!
//! Each participant owns exactly one slot, keyed by its yrs client id, and
//! broadcasts arbitrary JSON-like fields through it — cursors here, but also
//! names, colors, presence. Nothing in this store is persisted; a slot
//! vanishes when its participant disconnects or goes stale.
//!
//! Wire messages are `postcard`-framed full-record replacements. Field
//! values travel as compact JSON text and are validated while decoding, so a
//! malformed record is rejected at the codec boundary rather than leaking
//! into the store.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use error_stack::{Report, ResultExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Default)]
pub struct AwarenessError;

impl fmt::Display for AwarenessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("awareness update could not be encoded or decoded")
    }
}

impl std::error::Error for AwarenessError {}

/// One participant's record: field name to JSON-like payload.
pub type AwarenessState = HashMap<String, Value>;

/// Full-record replacement broadcast for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AwarenessUpdate {
    pub(crate) client_id: u64,
    #[serde(with = "json_fields")]
    pub(crate) fields: AwarenessState,
}

mod json_fields {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub(crate) fn serialize<S: Serializer>(
        v: &HashMap<String, Value>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let encoded: HashMap<&str, String> = v
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_string()))
            .collect();
        encoded.serialize(s)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<String, Value>, D::Error> {
        let encoded: HashMap<String, String> = HashMap::deserialize(d)?;
        encoded
            .into_iter()
            .map(|(name, value)| {
                let value = serde_json::from_str(&value).map_err(serde::de::Error::custom)?;
                Ok((name, value))
            })
            .collect()
    }
}

/// Change notification sent to subscribers. Carries no payload beyond the
/// affected participant; subscribers re-read full state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwarenessEvent {
    Updated { client_id: u64 },
    Removed { client_id: u64 },
}

/// The shared ephemeral key-value store for one replica.
pub struct Awareness {
    client_id: u64,
    states: HashMap<u64, AwarenessState>,
    last_seen: HashMap<u64, Instant>,
    dirty: bool,
    events: broadcast::Sender<AwarenessEvent>,
}

impl Awareness {
    /// Creates the store for the participant identified by `client_id`
    /// (normally the yrs document's client id), starting with an empty local
    /// record.
    #[must_use]
    pub fn new(client_id: u64) -> Self {
        let (events, _) = broadcast::channel(64);
        let mut states = HashMap::new();
        states.insert(client_id, AwarenessState::new());
        Self {
            client_id,
            states,
            last_seen: HashMap::new(),
            dirty: false,
            events,
        }
    }

    #[must_use]
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// All current records, own slot included.
    #[must_use]
    pub fn states(&self) -> &HashMap<u64, AwarenessState> {
        &self.states
    }

    #[must_use]
    pub fn local_state(&self) -> Option<&AwarenessState> {
        self.states.get(&self.client_id)
    }

    /// Subscribe to change notifications. Lagged receivers should re-read
    /// [`Awareness::states`] rather than replaying events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AwarenessEvent> {
        self.events.subscribe()
    }

    /// The single local-slot write: sets one field of our own record and
    /// marks the store dirty for the next flush.
    pub fn set_local_field(&mut self, name: &str, value: Value) {
        self.states
            .entry(self.client_id)
            .or_default()
            .insert(name.to_string(), value);
        self.dirty = true;
        let _ = self.events.send(AwarenessEvent::Updated {
            client_id: self.client_id,
        });
    }

    /// Encodes the local record if it changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if encoding fails.
    pub fn flush_local(&mut self) -> Result<Option<Vec<u8>>, Report<AwarenessError>> {
        if !self.dirty {
            return Ok(None);
        }
        let encoded = self.encode_local_state()?;
        self.dirty = false;
        Ok(Some(encoded))
    }

    /// Encodes the local record unconditionally, for heartbeats and for
    /// bringing newly joined participants up to date.
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if encoding fails.
    pub fn encode_local_state(&self) -> Result<Vec<u8>, Report<AwarenessError>> {
        let update = AwarenessUpdate {
            client_id: self.client_id,
            fields: self.local_state().cloned().unwrap_or_default(),
        };
        postcard::to_allocvec(&update).change_context(AwarenessError)
    }

    /// Applies a remote participant's record, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if the bytes cannot be decoded.
    pub fn apply_update(&mut self, update: &[u8]) -> Result<(), Report<AwarenessError>> {
        let update: AwarenessUpdate =
            postcard::from_bytes(update).change_context(AwarenessError)?;
        self.last_seen.insert(update.client_id, Instant::now());
        self.states.insert(update.client_id, update.fields);
        let _ = self.events.send(AwarenessEvent::Updated {
            client_id: update.client_id,
        });
        Ok(())
    }

    /// Drops a participant's record (transport saw it disconnect).
    /// Returns `true` if a record was actually removed.
    pub fn remove_state(&mut self, client_id: u64) -> bool {
        self.last_seen.remove(&client_id);
        if self.states.remove(&client_id).is_some() {
            let _ = self.events.send(AwarenessEvent::Removed { client_id });
            true
        } else {
            false
        }
    }

    /// Remove peers that haven't sent an awareness update within `timeout`.
    /// The local record is never expired. Returns `true` if any peers were
    /// removed.
    pub fn expire_stale_peers(&mut self, timeout: Duration) -> bool {
        let now = Instant::now();
        let stale: Vec<u64> = self
            .last_seen
            .iter()
            .filter(|(cid, seen)| **cid != self.client_id && now.duration_since(**seen) > timeout)
            .map(|(cid, _)| *cid)
            .collect();
        let changed = !stale.is_empty();
        for cid in stale {
            tracing::debug!(client_id = cid, "expiring stale awareness peer");
            self.states.remove(&cid);
            self.last_seen.remove(&cid);
            let _ = self.events.send(AwarenessEvent::Removed { client_id: cid });
        }
        changed
    }
}
