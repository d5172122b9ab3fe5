//! Range splitting: maps the resolved cursor list onto a single text node.
//!
//! Pure function of (cursor list, node path, node text) — recomputed on every
//! render pass, no hidden state.

use std::cmp::Ordering;

use crate::types::{AbsolutePosition, Cursor, DecoratedRange, compare_paths, compare_points};

/// Produces the decorated ranges that the given text node owes to `cursors`.
///
/// A cursor contributes a range iff the node's path lies inside the cursor's
/// span (inclusive, direction-independent). Offsets are taken verbatim on
/// the cursor's own anchor/focus node and clipped to the node boundary on
/// fully-spanned sides. `is_caret` marks the focus node so the renderer can
/// draw a caret glyph there.
///
/// `text` must be the node's current content; offsets are clipped to its
/// length in the document's offset units (bytes for a default yrs `Doc`).
#[must_use]
pub fn decorate(cursors: &[Cursor], path: &[u32], text: &str) -> Vec<DecoratedRange> {
    let text_len = u32::try_from(text.len()).unwrap_or(u32::MAX);
    let mut ranges = Vec::new();

    for cursor in cursors {
        if !spans_node(cursor, path) {
            continue;
        }

        let is_anchor_node = cursor.anchor.path.as_slice() == path;
        let is_focus_node = cursor.focus.path.as_slice() == path;
        let is_forward = compare_points(&cursor.focus, &cursor.anchor) != Ordering::Less;

        let anchor_offset = if is_anchor_node {
            cursor.anchor.offset
        } else if is_forward {
            0
        } else {
            text_len
        };
        let focus_offset = if is_focus_node {
            cursor.focus.offset
        } else if is_forward {
            text_len
        } else {
            0
        };

        ranges.push(DecoratedRange {
            anchor: AbsolutePosition::new(path.to_vec(), anchor_offset),
            focus: AbsolutePosition::new(path.to_vec(), focus_offset),
            is_forward,
            is_caret: is_focus_node,
            data: cursor.data.clone(),
        });
    }

    ranges
}

/// Whether `path` falls within the cursor's span, whichever way it points.
fn spans_node(cursor: &Cursor, path: &[u32]) -> bool {
    let (start, end) = if compare_points(&cursor.anchor, &cursor.focus) == Ordering::Greater {
        (&cursor.focus, &cursor.anchor)
    } else {
        (&cursor.anchor, &cursor.focus)
    };
    compare_paths(path, &start.path) != Ordering::Less
        && compare_paths(path, &end.path) != Ordering::Greater
}
