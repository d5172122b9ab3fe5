//! Translation between absolute tree positions and CRDT-anchored positions.
//!
//! This is the only module that knows how yrs anchors positions; everything
//! else treats [`RelativePosition`] as an opaque token. Anchors use
//! `Assoc::After` (sticky to the left of the following character), so an
//! insertion exactly at the position lands before the anchored character and
//! the position keeps pointing at the same logical character for both
//! selection endpoints.

use serde::{Deserialize, Serialize};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Assoc, GetString, IndexedSequence, ReadTxn, StickyIndex, TransactionMut, XmlFragment,
    XmlFragmentRef, XmlOut, XmlTextRef,
};

use crate::types::AbsolutePosition;

/// A CRDT-anchored position that survives concurrent edits elsewhere in the
/// document. Only meaningful against the document instance that created it.
///
/// `pos` is an encoded sticky index on the character right of the position.
/// `guard` is a second sticky index riding the same character from the other
/// side (`Assoc::Before`, one full character further right). While the
/// character exists the guard resolves exactly one character width past
/// `pos`; once the character is deleted both collapse onto the same gap,
/// which [`to_absolute`] reports as unresolved instead of a slid position.
/// Positions at the very end of a text node have no following character and
/// carry no guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativePosition {
    pos: Vec<u8>,
    guard: Option<Vec<u8>>,
}

/// Converts an absolute position into a CRDT-anchored one.
///
/// Returns `None` only on a caller contract violation: `pos.path` does not
/// address a text node of `root`, or `pos.offset` is past the node's length
/// or not on a character boundary. Inputs within current document bounds
/// always succeed. Out-of-bounds inputs are rejected rather than clamped.
#[must_use]
pub fn to_relative(
    txn: &mut TransactionMut<'_>,
    root: &XmlFragmentRef,
    pos: &AbsolutePosition,
) -> Option<RelativePosition> {
    let node = text_at_path(txn, root, &pos.path)?;
    let text = node.get_string(txn);
    let len = u32::try_from(text.len()).ok()?;
    if pos.offset > len {
        return None;
    }
    let anchor = node.sticky_index(txn, pos.offset, Assoc::After)?;
    let guard = if pos.offset < len {
        // One full character past the anchor, whatever its byte width.
        let width = char_width_at(&text, pos.offset)?;
        let g = node.sticky_index(txn, pos.offset + width, Assoc::Before)?;
        Some(g.encode_v1())
    } else {
        None
    };
    Some(RelativePosition {
        pos: anchor.encode_v1(),
        guard,
    })
}

/// Resolves a CRDT-anchored position back into absolute coordinates against
/// the current document state.
///
/// Returns `None` when the position is unresolved: the anchored character
/// was deleted, the token was produced against a different document
/// instance, or the token bytes are malformed. Callers treat `None` as
/// "do not render this endpoint", never as an error.
#[must_use]
pub fn to_absolute<T: ReadTxn>(
    txn: &T,
    root: &XmlFragmentRef,
    rel: &RelativePosition,
) -> Option<AbsolutePosition> {
    let anchor = StickyIndex::decode_v1(&rel.pos).ok()?;
    let offset = anchor.get_offset(txn)?;
    let node = XmlTextRef::from(offset.branch);
    if let Some(bytes) = &rel.guard {
        let guard = StickyIndex::decode_v1(bytes).ok()?;
        let g = guard.get_offset(txn)?;
        if g.branch != offset.branch {
            return None;
        }
        // Both anchors ride the character right of the position; if the
        // guard no longer sits exactly one character past it, that
        // character is gone.
        let text = node.get_string(txn);
        let width = char_width_at(&text, offset.index)?;
        if g.index != offset.index + width {
            return None;
        }
    }
    let path = path_of(txn, root, &node)?;
    Some(AbsolutePosition::new(path, offset.index))
}

/// Walks `path` down from `root`, returning the addressed text node.
#[must_use]
pub fn text_at_path<T: ReadTxn>(
    txn: &T,
    root: &XmlFragmentRef,
    path: &[u32],
) -> Option<XmlTextRef> {
    let mut node = XmlOut::Fragment(root.clone());
    for &index in path {
        node = child(txn, &node, index)?;
    }
    match node {
        XmlOut::Text(text) => Some(text),
        _ => None,
    }
}

/// Reads the text content of the node addressed by `path`.
#[must_use]
pub fn node_text<T: ReadTxn>(txn: &T, root: &XmlFragmentRef, path: &[u32]) -> Option<String> {
    let node = text_at_path(txn, root, path)?;
    Some(node.get_string(txn))
}

/// Byte width of the character starting at `offset`; `None` when `offset`
/// is at or past the end of `text`, or not a character boundary.
fn char_width_at(text: &str, offset: u32) -> Option<u32> {
    let rest = text.get(offset as usize..)?;
    let c = rest.chars().next()?;
    Some(c.len_utf8() as u32)
}

fn child<T: ReadTxn>(txn: &T, node: &XmlOut, index: u32) -> Option<XmlOut> {
    match node {
        XmlOut::Fragment(f) => f.get(txn, index),
        XmlOut::Element(e) => e.get(txn, index),
        XmlOut::Text(_) => None,
    }
}

/// Depth-first search for `target` under `root`, reconstructing its path.
fn path_of<T: ReadTxn>(txn: &T, root: &XmlFragmentRef, target: &XmlTextRef) -> Option<Vec<u32>> {
    let mut path = Vec::new();
    if descend(txn, &XmlOut::Fragment(root.clone()), target, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn descend<T: ReadTxn>(txn: &T, node: &XmlOut, target: &XmlTextRef, path: &mut Vec<u32>) -> bool {
    let len = match node {
        XmlOut::Fragment(f) => f.len(txn),
        XmlOut::Element(e) => e.len(txn),
        XmlOut::Text(_) => return false,
    };
    for i in 0..len {
        let Some(c) = child(txn, node, i) else {
            continue;
        };
        match &c {
            XmlOut::Text(t) => {
                if t == target {
                    path.push(i);
                    return true;
                }
            }
            _ => {
                path.push(i);
                if descend(txn, &c, target, path) {
                    return true;
                }
                path.pop();
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use yrs::{Doc, Text, Transact, XmlElementPrelim, XmlTextPrelim};

    use super::*;

    /// Two paragraphs: "hello world" and "goodbye".
    fn sample_doc(client_id: u64) -> (Doc, XmlFragmentRef) {
        let doc = Doc::with_client_id(client_id);
        let root = doc.get_or_insert_xml_fragment("content");
        {
            let mut txn = doc.transact_mut();
            let p0 = root.push_back(&mut txn, XmlElementPrelim::empty("paragraph"));
            p0.push_back(&mut txn, XmlTextPrelim::new("hello world"));
            let p1 = root.push_back(&mut txn, XmlElementPrelim::empty("paragraph"));
            p1.push_back(&mut txn, XmlTextPrelim::new("goodbye"));
        }
        (doc, root)
    }

    /// One paragraph holding `text`.
    fn doc_with_text(client_id: u64, text: &str) -> (Doc, XmlFragmentRef) {
        let doc = Doc::with_client_id(client_id);
        let root = doc.get_or_insert_xml_fragment("content");
        {
            let mut txn = doc.transact_mut();
            let p = root.push_back(&mut txn, XmlElementPrelim::empty("paragraph"));
            p.push_back(&mut txn, XmlTextPrelim::new(text));
        }
        (doc, root)
    }

    fn abs(path: &[u32], offset: u32) -> AbsolutePosition {
        AbsolutePosition::new(path.to_vec(), offset)
    }

    #[test]
    fn test_round_trip_without_edits() {
        let (doc, root) = sample_doc(1);

        for pos in [abs(&[0, 0], 0), abs(&[0, 0], 4), abs(&[1, 0], 7)] {
            let rel = {
                let mut txn = doc.transact_mut();
                to_relative(&mut txn, &root, &pos).unwrap()
            };
            let txn = doc.transact();
            assert_eq!(to_absolute(&txn, &root, &rel), Some(pos));
        }
    }

    #[test]
    fn test_survives_edit_in_other_node() {
        let (doc, root) = sample_doc(1);

        let pos = abs(&[1, 0], 3); // before the 'd' of "goodbye"
        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &pos).unwrap()
        };

        {
            let mut txn = doc.transact_mut();
            let other = text_at_path(&txn, &root, &[0, 0]).unwrap();
            other.insert(&mut txn, 0, "XXXX");
        }

        let txn = doc.transact();
        assert_eq!(to_absolute(&txn, &root, &rel), Some(pos));
    }

    #[test]
    fn test_shifts_with_insert_before_anchor() {
        let (doc, root) = sample_doc(1);

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 6)).unwrap() // before 'w'
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.insert(&mut txn, 0, "ab");
        }

        let txn = doc.transact();
        let resolved = to_absolute(&txn, &root, &rel).unwrap();
        assert_eq!(resolved, abs(&[0, 0], 8));
        let text = node_text(&txn, &root, &[0, 0]).unwrap();
        assert_eq!(&text[resolved.offset as usize..resolved.offset as usize + 1], "w");
    }

    #[test]
    fn test_insert_exactly_at_position_keeps_following_char() {
        let (doc, root) = sample_doc(1);

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 6)).unwrap() // before 'w'
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.insert(&mut txn, 6, "big ");
        }

        let txn = doc.transact();
        let resolved = to_absolute(&txn, &root, &rel).unwrap();
        // Still immediately left of the 'w' it anchored.
        assert_eq!(resolved, abs(&[0, 0], 10));
    }

    #[test]
    fn test_deleted_anchor_char_is_unresolved() {
        let (doc, root) = sample_doc(1);

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 6)).unwrap()
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.remove_range(&mut txn, 5, 3); // " wo" — removes the anchored 'w'
        }

        let txn = doc.transact();
        assert_eq!(to_absolute(&txn, &root, &rel), None);
    }

    #[test]
    fn test_delete_elsewhere_still_resolves() {
        let (doc, root) = sample_doc(1);

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 8)).unwrap() // before 'r'
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.remove_range(&mut txn, 0, 5); // "hello"
        }

        let txn = doc.transact();
        assert_eq!(to_absolute(&txn, &root, &rel), Some(abs(&[0, 0], 3)));
    }

    #[test]
    fn test_end_of_node_position() {
        let (doc, root) = sample_doc(1);

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[1, 0], 7)).unwrap() // end of "goodbye"
        };

        // Appends keep an end-of-node caret at the end.
        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[1, 0]).unwrap();
            node.insert(&mut txn, 7, "!!");
        }

        let txn = doc.transact();
        assert_eq!(to_absolute(&txn, &root, &rel), Some(abs(&[1, 0], 9)));
    }

    #[test]
    fn test_round_trip_multibyte_text() {
        // Offsets are byte offsets; every character boundary of "日本語"
        // (three bytes each) must round-trip to itself.
        let (doc, root) = doc_with_text(1, "日本語");
        for offset in [0, 3, 6, 9] {
            let pos = abs(&[0, 0], offset);
            let rel = {
                let mut txn = doc.transact_mut();
                to_relative(&mut txn, &root, &pos).unwrap()
            };
            let txn = doc.transact();
            assert_eq!(to_absolute(&txn, &root, &rel), Some(pos), "byte offset {offset}");
        }

        // Same over mixed one-, two- and three-byte characters.
        let (doc, root) = doc_with_text(2, "aé日b");
        for offset in [0, 1, 3, 6, 7] {
            let pos = abs(&[0, 0], offset);
            let rel = {
                let mut txn = doc.transact_mut();
                to_relative(&mut txn, &root, &pos).unwrap()
            };
            let txn = doc.transact();
            assert_eq!(to_absolute(&txn, &root, &rel), Some(pos), "byte offset {offset}");
        }
    }

    #[test]
    fn test_multibyte_anchor_shifts_with_insert_before_it() {
        let (doc, root) = doc_with_text(1, "日本語");

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 3)).unwrap() // before '本'
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.insert(&mut txn, 0, "é"); // two bytes
        }

        let txn = doc.transact();
        let resolved = to_absolute(&txn, &root, &rel).unwrap();
        assert_eq!(resolved, abs(&[0, 0], 5));
        let text = node_text(&txn, &root, &[0, 0]).unwrap();
        assert_eq!(&text[5..8], "本");
    }

    #[test]
    fn test_deleted_multibyte_anchor_char_is_unresolved() {
        let (doc, root) = doc_with_text(1, "日本語");

        let rel = {
            let mut txn = doc.transact_mut();
            to_relative(&mut txn, &root, &abs(&[0, 0], 3)).unwrap() // before '本'
        };

        {
            let mut txn = doc.transact_mut();
            let node = text_at_path(&txn, &root, &[0, 0]).unwrap();
            node.remove_range(&mut txn, 3, 3); // the three bytes of '本'
        }

        let txn = doc.transact();
        assert_eq!(to_absolute(&txn, &root, &rel), None);
    }

    #[test]
    fn test_mid_character_offset_rejected() {
        let (doc, root) = doc_with_text(1, "日本語");
        let mut txn = doc.transact_mut();
        assert!(to_relative(&mut txn, &root, &abs(&[0, 0], 1)).is_none());
        assert!(to_relative(&mut txn, &root, &abs(&[0, 0], 4)).is_none());
    }

    #[test]
    fn test_token_from_other_document_is_unresolved() {
        let (doc_a, root_a) = sample_doc(1);
        let (doc_b, root_b) = sample_doc(2);

        let rel = {
            let mut txn = doc_a.transact_mut();
            to_relative(&mut txn, &root_a, &abs(&[0, 0], 3)).unwrap()
        };

        let txn = doc_b.transact();
        assert_eq!(to_absolute(&txn, &root_b, &rel), None);
    }

    #[test]
    fn test_out_of_bounds_offset_rejected() {
        let (doc, root) = sample_doc(1);
        let mut txn = doc.transact_mut();
        assert!(to_relative(&mut txn, &root, &abs(&[0, 0], 12)).is_none());
    }

    #[test]
    fn test_non_text_path_rejected() {
        let (doc, root) = sample_doc(1);
        let mut txn = doc.transact_mut();
        // [0] is a paragraph element, not a text node.
        assert!(to_relative(&mut txn, &root, &abs(&[0], 0)).is_none());
        // [3] does not exist.
        assert!(to_relative(&mut txn, &root, &abs(&[3, 0], 0)).is_none());
    }

    #[test]
    fn test_text_at_path_and_node_text() {
        let (doc, root) = sample_doc(1);
        let txn = doc.transact();
        assert_eq!(node_text(&txn, &root, &[0, 0]).as_deref(), Some("hello world"));
        assert_eq!(node_text(&txn, &root, &[1, 0]).as_deref(), Some("goodbye"));
        assert!(node_text(&txn, &root, &[0]).is_none());
    }
}
