//! An editor augmented with cursor broadcasting.
//!
//! [`CursorEditor`] binds a yrs document to an awareness store and a field
//! name at construction, so an "unattached" editor cannot exist. It owns two
//! responsibilities:
//!
//! - **publishing**: on every local change the host calls
//!   [`CursorEditor::schedule_publish`] (or [`CursorEditor::set_selection`]);
//!   at the end of the turn a single [`CursorEditor::flush_selection`]
//!   converts the *latest* selection to relative anchors and writes them
//!   into the local awareness slot — any number of changes within one turn
//!   coalesce into one publish.
//! - **aggregating**: whenever awareness state changes, every other
//!   participant's published anchors are re-resolved against the current
//!   document and the renderable cursor list is replaced wholesale. Records
//!   that fail to resolve simply drop out until their next update.

use error_stack::Report;
use tokio::sync::broadcast;
use yrs::{Doc, Transact, XmlFragmentRef};

use crate::awareness::{Awareness, AwarenessError};
use crate::decorate;
use crate::relative::{to_absolute, to_relative};
use crate::types::{Cursor, CursorPayload, DecoratedRange, Selection};

pub struct CursorEditor {
    doc: Doc,
    root: XmlFragmentRef,
    awareness: Awareness,
    awareness_field: String,
    selection: Option<Selection>,
    publish_pending: bool,
    cursors: Vec<Cursor>,
    cursors_tx: broadcast::Sender<()>,
}

impl CursorEditor {
    /// Binds `doc` to an awareness store under the given root shared type
    /// and awareness field name, and resolves any cursors already present so
    /// a participant joining an existing session sees them immediately.
    ///
    /// `awareness` should be keyed by `doc.client_id()` so that the local
    /// participant's own slot is excluded from the remote cursor set.
    #[must_use]
    pub fn attach(doc: Doc, root_name: &str, awareness: Awareness, awareness_field: &str) -> Self {
        let root = doc.get_or_insert_xml_fragment(root_name);
        let (cursors_tx, _) = broadcast::channel(64);
        let mut editor = Self {
            doc,
            root,
            awareness,
            awareness_field: awareness_field.to_string(),
            selection: None,
            publish_pending: false,
            cursors: Vec::new(),
            cursors_tx,
        };
        editor.refresh_cursors();
        editor
    }

    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    #[must_use]
    pub fn root(&self) -> &XmlFragmentRef {
        &self.root
    }

    #[must_use]
    pub fn awareness(&self) -> &Awareness {
        &self.awareness
    }

    #[must_use]
    pub fn awareness_field(&self) -> &str {
        &self.awareness_field
    }

    #[must_use]
    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Updates the local selection and schedules a publish.
    pub fn set_selection(&mut self, selection: Option<Selection>) {
        self.selection = selection;
        self.schedule_publish();
    }

    /// Marks the local cursor for publishing at the next flush. Called for
    /// every local document change; selection changes are a subset of those.
    pub fn schedule_publish(&mut self) {
        self.publish_pending = true;
    }

    /// The end-of-turn boundary: publishes the current selection into the
    /// local awareness slot if anything was scheduled since the last flush.
    /// The selection is re-read here, not captured at schedule time, so
    /// rapid changes within one turn coalesce into a single publish of the
    /// final state. Returns `true` if a publish happened.
    pub fn flush_selection(&mut self) -> bool {
        if !self.publish_pending {
            return false;
        }
        self.publish_pending = false;

        let payload = match &self.selection {
            None => CursorPayload::default(),
            Some(selection) => {
                let mut txn = self.doc.transact_mut();
                let anchor = to_relative(&mut txn, &self.root, &selection.anchor);
                let focus = to_relative(&mut txn, &self.root, &selection.focus);
                match (anchor, focus) {
                    (Some(anchor), Some(focus)) => CursorPayload {
                        anchor: Some(anchor),
                        focus: Some(focus),
                    },
                    // Receivers drop partial pairs; publish both or neither.
                    _ => {
                        tracing::warn!(
                            "selection does not address the current document; \
                             publishing empty cursor"
                        );
                        CursorPayload::default()
                    }
                }
            }
        };

        match serde_json::to_value(&payload) {
            Ok(value) => {
                self.awareness.set_local_field(&self.awareness_field, value);
                // Our own publish follows local edits; re-resolve remote
                // cursors against the new document state.
                self.refresh_cursors();
                true
            }
            Err(e) => {
                tracing::warn!(?e, "failed to encode cursor payload");
                false
            }
        }
    }

    /// Publishes an explicit "no cursor" record, for shutdown or when the
    /// participant moves to a different document.
    pub fn clear_local_cursor(&mut self) {
        self.selection = None;
        self.publish_pending = false;
        match serde_json::to_value(&CursorPayload::default()) {
            Ok(value) => self.awareness.set_local_field(&self.awareness_field, value),
            Err(e) => tracing::warn!(?e, "failed to encode cursor payload"),
        }
        self.refresh_cursors();
    }

    /// Encodes the pending local awareness record for the transport, if it
    /// changed since the last flush.
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if encoding fails.
    pub fn flush_awareness(&mut self) -> Result<Option<Vec<u8>>, Report<AwarenessError>> {
        self.awareness.flush_local()
    }

    /// Encodes the local awareness record unconditionally (heartbeats,
    /// catching up a newly joined peer).
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if encoding fails.
    pub fn encode_awareness_state(&self) -> Result<Vec<u8>, Report<AwarenessError>> {
        self.awareness.encode_local_state()
    }

    /// Feeds a remote awareness update from the transport and recomputes the
    /// cursor set.
    ///
    /// # Errors
    ///
    /// Returns [`AwarenessError`] if the bytes cannot be decoded; the
    /// existing cursor set is left untouched in that case.
    pub fn apply_awareness_update(&mut self, update: &[u8]) -> Result<(), Report<AwarenessError>> {
        self.awareness.apply_update(update)?;
        self.refresh_cursors();
        Ok(())
    }

    /// Drops a disconnected participant's record and recomputes the cursor
    /// set.
    pub fn remove_participant(&mut self, client_id: u64) {
        if self.awareness.remove_state(client_id) {
            self.refresh_cursors();
        }
    }

    /// Evicts peers that have not been heard from within `timeout`.
    pub fn expire_stale_participants(&mut self, timeout: std::time::Duration) {
        if self.awareness.expire_stale_peers(timeout) {
            self.refresh_cursors();
        }
    }

    /// Recomputes the remote cursor set from current awareness state against
    /// the current document, replacing the previous set wholesale.
    ///
    /// Runs once at attach and once per awareness change. Per-record
    /// failures (absent endpoints, unresolvable anchors, malformed payloads)
    /// silently drop that record and never affect the others.
    pub fn refresh_cursors(&mut self) {
        let mut cursors = Vec::new();
        {
            let txn = self.doc.transact();
            for (&client_id, state) in self.awareness.states() {
                if client_id == self.awareness.client_id() {
                    continue;
                }
                // No cursor field: the participant isn't editing this
                // document region at all.
                let Some(field) = state.get(&self.awareness_field) else {
                    continue;
                };
                let payload: CursorPayload = match serde_json::from_value(field.clone()) {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::debug!(client_id, ?e, "malformed cursor payload, dropping");
                        continue;
                    }
                };
                let (Some(anchor), Some(focus)) = (payload.anchor, payload.focus) else {
                    continue;
                };
                let Some(anchor) = to_absolute(&txn, &self.root, &anchor) else {
                    tracing::debug!(client_id, "cursor anchor unresolved, dropping");
                    continue;
                };
                let Some(focus) = to_absolute(&txn, &self.root, &focus) else {
                    tracing::debug!(client_id, "cursor focus unresolved, dropping");
                    continue;
                };
                cursors.push(Cursor {
                    anchor,
                    focus,
                    data: field.clone(),
                });
            }
        }
        self.cursors = cursors;
        let _ = self.cursors_tx.send(());
    }

    /// The current fully-resolved remote cursors.
    #[must_use]
    pub fn cursors(&self) -> &[Cursor] {
        &self.cursors
    }

    /// Notified whenever the cursor set is replaced; the render layer
    /// re-reads [`CursorEditor::cursors`] and re-decorates.
    #[must_use]
    pub fn subscribe_cursors(&self) -> broadcast::Receiver<()> {
        self.cursors_tx.subscribe()
    }

    /// Splits the current cursor list onto one text node for rendering.
    #[must_use]
    pub fn decorate(&self, path: &[u32], text: &str) -> Vec<DecoratedRange> {
        decorate::decorate(&self.cursors, path, text)
    }
}
