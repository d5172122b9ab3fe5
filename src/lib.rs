//! Sync Cursors — live remote-cursor tracking for collaborative documents
//!
//! Tracks and renders the text selections of every participant editing a
//! shared **yrs** (Yjs in Rust) document. Selections are broadcast as
//! CRDT-anchored relative positions so they stay visually correct while
//! other participants concurrently insert or delete text anywhere in the
//! document, including before the cursor.
//!
//! # Architecture
//!
//! ```text
//! local selection ──► to_relative ──► Awareness slot ──► transport bytes
//!                                                            │
//!                                                        (network)
//!                                                            │
//! renderer ◄── decorate ◄── cursor list ◄── to_absolute ◄── peers' slots
//! ```
//!
//! - [`relative`] converts between tree-path/offset coordinates and sticky
//!   CRDT anchors; it is the only module with yrs anchor semantics.
//! - [`awareness`] is the ephemeral per-participant field store with a
//!   postcard wire codec; cursor payloads are one field among any others.
//! - [`editor`] binds a document to an awareness channel: it coalesces local
//!   selection changes into one publish per turn and re-resolves all remote
//!   cursors on every awareness change.
//! - [`decorate`] splits the resolved cursor list into per-text-node
//!   highlight/caret ranges for the render layer.
//!
//! The whole crate runs on one logical thread: document reads, awareness
//! reads and the single local-slot write are synchronous in-memory
//! operations, and a superseded recomputation cannot be in flight.

#![warn(clippy::pedantic)]

pub mod awareness;
pub mod decorate;
pub mod editor;
pub mod relative;
pub mod types;

pub use awareness::{Awareness, AwarenessError, AwarenessEvent, AwarenessState};
pub use decorate::decorate;
pub use editor::CursorEditor;
pub use relative::{RelativePosition, node_text, text_at_path, to_absolute, to_relative};
pub use types::{
    AbsolutePosition, Cursor, CursorPayload, DecoratedRange, Selection, compare_paths,
    compare_points,
};
