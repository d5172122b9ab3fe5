//! Shared data types for cursor tracking.
//!
//! Absolute positions address the locally materialized document tree and are
//! only meaningful against the snapshot they were read from; any structural
//! edit invalidates them. Everything that crosses an edit boundary goes
//! through [`RelativePosition`](crate::relative::RelativePosition) instead.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::relative::RelativePosition;

/// A position in the materialized document tree: a path of child indexes
/// leading to a text node, plus a character offset inside that node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsolutePosition {
    pub path: Vec<u32>,
    pub offset: u32,
}

impl AbsolutePosition {
    #[must_use]
    pub fn new(path: Vec<u32>, offset: u32) -> Self {
        Self { path, offset }
    }
}

/// A local selection. `anchor` is the fixed end, `focus` the moving end;
/// direction is derived by comparing the two in document order, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: AbsolutePosition,
    pub focus: AbsolutePosition,
}

impl Selection {
    #[must_use]
    pub fn new(anchor: AbsolutePosition, focus: AbsolutePosition) -> Self {
        Self { anchor, focus }
    }

    /// A collapsed selection with both endpoints at `pos`.
    #[must_use]
    pub fn caret(pos: AbsolutePosition) -> Self {
        Self {
            anchor: pos.clone(),
            focus: pos,
        }
    }

    /// `true` when the focus is at or after the anchor in document order.
    #[must_use]
    pub fn is_forward(&self) -> bool {
        compare_points(&self.focus, &self.anchor) != Ordering::Less
    }
}

/// The cursor field payload published into a participant's awareness slot.
///
/// `None` endpoints serialize as JSON `null`; a participant with no active
/// selection publishes `{ "anchor": null, "focus": null }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPayload {
    #[serde(default)]
    pub anchor: Option<RelativePosition>,
    #[serde(default)]
    pub focus: Option<RelativePosition>,
}

/// A remote participant's cursor, fully resolved against the current local
/// document. Recomputed wholesale on every awareness change, never cached
/// across edits.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub anchor: AbsolutePosition,
    pub focus: AbsolutePosition,
    /// The participant's raw cursor field payload (name, color, whatever
    /// else they published alongside the anchors).
    pub data: serde_json::Value,
}

/// A render instruction scoped to a single text node: the portion of one
/// cursor's span that falls on that node, offsets clipped to the node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecoratedRange {
    pub anchor: AbsolutePosition,
    pub focus: AbsolutePosition,
    pub is_forward: bool,
    /// Set on the focus node; tells the renderer to draw a caret glyph in
    /// addition to the highlight.
    pub is_caret: bool,
    pub data: serde_json::Value,
}

/// Document order over tree paths (depth-first, left-to-right).
///
/// An ancestor path compares [`Ordering::Equal`] to its descendants: for
/// span-inclusion purposes a node overlaps every position inside it.
#[must_use]
pub fn compare_paths(a: &[u32], b: &[u32]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.cmp(y) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

/// Document order over positions: path order first, offset as tiebreaker
/// when both address the same node.
#[must_use]
pub fn compare_points(a: &AbsolutePosition, b: &AbsolutePosition) -> Ordering {
    match compare_paths(&a.path, &b.path) {
        Ordering::Equal if a.path == b.path => a.offset.cmp(&b.offset),
        other => other,
    }
}
