//! Text anchors.
//!
//! A [`TextAnchor`] marks a position in a document and moves along with the text around it. The
//! document keeps every anchor in an ordered tree where each node stores the distance to the
//! previous anchor, so an edit only touches the nodes at the edit position and an anchor's offset
//! is an O(log n) prefix sum.
//!
//! The tree only holds weak references. Once the last [`TextAnchor`] handle is dropped, the node is
//! merged into its neighbor the next time an edit or lookup passes by it.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::document::TextDocument;
use crate::error::Result;
use crate::line_tree::{LineId, TextLocation};
use crate::offset_map::{AnchorMovementType, OffsetChangeMapEntry};
use crate::rb_tree::{Measured, NodeId, RbTree, SwapPayload};

/// Callback invoked once when an anchor is deleted.
pub type AnchorDeletedCallback = Box<dyn FnMut(&TextAnchor) + Send>;

#[derive(Debug)]
struct AnchorState {
    node: NodeId,
    deleted: bool,
    movement_type: AnchorMovementType,
    survive_deletion: bool,
}

struct AnchorInner {
    document_id: u64,
    state: Mutex<AnchorState>,
    deleted_handlers: Mutex<Vec<AnchorDeletedCallback>>,
}

/// Handle to a position in a [`TextDocument`].
///
/// Cloning the handle is cheap; all clones refer to the same anchor. Offsets are queried through
/// the owning document, see [`TextAnchor::offset`].
#[derive(Clone)]
pub struct TextAnchor(Arc<AnchorInner>);

impl TextAnchor {
    /// `true` once the text containing the anchor was removed.
    pub fn is_deleted(&self) -> bool {
        self.0.state.lock().deleted
    }

    /// How the anchor reacts to text inserted exactly at its position.
    pub fn movement_type(&self) -> AnchorMovementType {
        self.0.state.lock().movement_type
    }

    /// Change the movement type.
    pub fn set_movement_type(&self, movement_type: AnchorMovementType) {
        self.0.state.lock().movement_type = movement_type;
    }

    /// Whether the anchor survives the removal of the text around it. A surviving anchor moves to
    /// the start of the removed range.
    pub fn survive_deletion(&self) -> bool {
        self.0.state.lock().survive_deletion
    }

    /// Change the survive-deletion flag.
    pub fn set_survive_deletion(&self, survive_deletion: bool) {
        self.0.state.lock().survive_deletion = survive_deletion;
    }

    /// Register a callback that runs once the anchor is deleted. Callbacks run after the document
    /// change that deleted the anchor has been applied completely.
    pub fn on_deleted<F>(&self, callback: F)
    where
        F: FnMut(&TextAnchor) + Send + 'static,
    {
        self.0.deleted_handlers.lock().push(Box::new(callback));
    }

    /// Current offset in `document`.
    pub fn offset(&self, document: &TextDocument) -> Result<usize> {
        document.anchor_offset(self)
    }

    /// Current (line, column) in `document`.
    pub fn location(&self, document: &TextDocument) -> Result<TextLocation> {
        document.anchor_location(self)
    }

    /// Line the anchor is on.
    pub fn line(&self, document: &TextDocument) -> Result<LineId> {
        document.anchor_line(self)
    }

    pub(crate) fn document_id(&self) -> u64 {
        self.0.document_id
    }

    fn node(&self) -> Option<NodeId> {
        let state = self.0.state.lock();
        (!state.deleted).then_some(state.node)
    }

    fn set_node(&self, node: NodeId) {
        self.0.state.lock().node = node;
    }

    fn mark_deleted(&self) {
        self.0.state.lock().deleted = true;
    }

    /// Run and drop the deletion callbacks.
    pub(crate) fn raise_deleted(&self) {
        let handlers = std::mem::take(&mut *self.0.deleted_handlers.lock());
        for mut handler in handlers {
            handler(self);
        }
    }
}

impl PartialEq for TextAnchor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TextAnchor {}

impl fmt::Debug for TextAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("TextAnchor")
            .field("deleted", &state.deleted)
            .field("movement_type", &state.movement_type)
            .field("survive_deletion", &state.survive_deletion)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct AnchorNode {
    anchor: Weak<AnchorInner>,
    /// Distance from the previous anchor (or the document start) to this one.
    length: usize,
}

impl AnchorNode {
    fn upgrade(&self) -> Option<TextAnchor> {
        self.anchor.upgrade().map(TextAnchor)
    }

    fn is_alive(&self) -> bool {
        self.anchor.strong_count() > 0
    }
}

impl Measured for AnchorNode {
    fn length(&self) -> usize {
        self.length
    }
}

impl SwapPayload for AnchorNode {
    fn swap_payload(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.anchor, &mut other.anchor);
    }
}

/// Ordered set of the anchors of one document.
#[derive(Debug)]
pub(crate) struct AnchorTree {
    document_id: u64,
    tree: RbTree<AnchorNode>,
    nodes_to_delete: Vec<NodeId>,
}

impl AnchorTree {
    pub(crate) fn new(document_id: u64) -> Self {
        Self {
            document_id,
            tree: RbTree::new(),
            nodes_to_delete: Vec::new(),
        }
    }

    /// Number of nodes, including those of dropped anchors not purged yet.
    pub(crate) fn node_count(&self) -> usize {
        self.tree.len()
    }

    /// Create an anchor at `offset`. The caller has validated the offset.
    pub(crate) fn create_anchor(&mut self, offset: usize) -> TextAnchor {
        let anchor = TextAnchor(Arc::new(AnchorInner {
            document_id: self.document_id,
            state: Mutex::new(AnchorState {
                node: NodeId::DANGLING,
                deleted: false,
                movement_type: AnchorMovementType::Default,
                survive_deletion: false,
            }),
            deleted_handlers: Mutex::new(Vec::new()),
        }));
        let weak = Arc::downgrade(&anchor.0);
        let total = self.tree.total_length();
        let node = if offset >= total {
            self.tree.insert_before(
                None,
                AnchorNode {
                    anchor: weak,
                    length: offset - total,
                },
            )
        } else {
            // Split the gap containing `offset`.
            let (next, within) = self
                .find_node(offset)
                .unwrap_or((NodeId::DANGLING, offset));
            if let Some(value) = self.tree.value_mut(next) {
                value.length -= within;
            }
            self.tree.refresh(next);
            self.tree.insert_before(
                Some(next),
                AnchorNode {
                    anchor: weak,
                    length: within,
                },
            )
        };
        anchor.set_node(node);
        self.finish();
        anchor
    }

    /// Current offset of a live anchor of this document.
    pub(crate) fn offset_of(&self, anchor: &TextAnchor) -> Option<usize> {
        let node = anchor.node()?;
        let length = self.tree.value(node)?.length;
        Some(self.tree.offset_of(node)? + length)
    }

    /// Move anchors through one change entry. Deleted anchors are appended to `deleted`; their
    /// callbacks must be raised by the caller once the document is consistent.
    pub(crate) fn handle_text_change(
        &mut self,
        entry: &OffsetChangeMapEntry,
        deleted: &mut Vec<TextAnchor>,
    ) {
        if entry.removal_length() == 0 {
            // A pure insertion may split anchors at the same offset by movement type.
            self.insert_text(
                entry.offset(),
                entry.insertion_length(),
                entry.default_anchor_movement_is_before_insertion(),
            );
            self.finish();
            return;
        }
        if self.tree.is_empty() || entry.offset() >= self.tree.total_length() {
            return;
        }
        let Some((first, mut prefix)) = self.find_node(entry.offset()) else {
            return;
        };
        // `prefix` is the part of the first gap in front of the removal; `end` is the end of the
        // removal, both relative to the start of the gap of `node`.
        let mut end = prefix + entry.removal_length();
        let mut node = Some(first);
        let mut first_survivor = None;
        while let Some(current) = node {
            let Some(value) = self.tree.value(current) else {
                break;
            };
            let length = value.length;
            if end <= length {
                break;
            }
            let anchor = value.upgrade();
            let survives = anchor.as_ref().is_some_and(|a| {
                a.survive_deletion() || entry.removal_never_causes_anchor_deletion()
            });
            end -= length;
            if survives {
                first_survivor.get_or_insert(current);
                // Keep the node in front of the removed range.
                if let Some(value) = self.tree.value_mut(current) {
                    value.length = prefix;
                }
                self.tree.refresh(current);
                prefix = 0;
                node = self.tree.next(current);
            } else {
                node = self.tree.next(current);
                self.tree.remove(current);
                self.nodes_to_delete.retain(|&n| n != current);
                if let Some(anchor) = anchor {
                    trace!("anchor deleted by removal at {}", entry.offset());
                    anchor.mark_deleted();
                    deleted.push(anchor);
                }
            }
        }

        // `node` is the first anchor after the removed range, and [first_survivor, node) are the
        // anchors that survived.
        if let Some(id) = node
            && let Some(value) = self.tree.value_mut(id)
        {
            debug_assert!(value.length + prefix >= end);
            value.length = value.length + prefix - end;
        }
        if entry.insertion_length() > 0 {
            if let Some(survivor) = first_survivor {
                self.perform_insert_text(
                    survivor,
                    node,
                    entry.insertion_length(),
                    entry.default_anchor_movement_is_before_insertion(),
                );
            } else if let Some(id) = node
                && let Some(value) = self.tree.value_mut(id)
            {
                value.length += entry.insertion_length();
            }
        }
        if let Some(id) = node {
            self.tree.refresh(id);
        }
        self.finish();
    }

    fn insert_text(&mut self, offset: usize, length: usize, default_before: bool) {
        let total = self.tree.total_length();
        if length == 0 || self.tree.is_empty() || offset > total {
            return;
        }
        if offset == total {
            let begin = self.find_actual_begin_node(self.tree.last());
            self.perform_insert_text(begin, None, length, default_before);
            return;
        }
        let Some((end_node, within)) = self.find_node(offset) else {
            return;
        };
        if within > 0 {
            // No anchor sits exactly at `offset`.
            if let Some(value) = self.tree.value_mut(end_node) {
                value.length += length;
            }
            self.tree.refresh(end_node);
        } else {
            let begin = self.find_actual_begin_node(self.tree.prev(end_node));
            self.perform_insert_text(begin, Some(end_node), length, default_before);
        }
    }

    /// First node at the same offset as `node`.
    fn find_actual_begin_node(&self, mut node: Option<NodeId>) -> NodeId {
        while let Some(id) = node {
            if self.tree.value(id).is_some_and(|v| v.length > 0) {
                return id;
            }
            node = self.tree.prev(id);
        }
        self.tree.first().unwrap_or(NodeId::DANGLING)
    }

    /// Reorder the anchors in `[begin, end)` so that those staying before the insertion come
    /// first, then add `length` to the gap of the first anchor that moves after it.
    fn perform_insert_text(
        &mut self,
        begin: NodeId,
        end: Option<NodeId>,
        length: usize,
        default_before: bool,
    ) {
        let mut before_insertion = Vec::new();
        let mut temp = Some(begin);
        while let Some(id) = temp {
            if Some(id) == end {
                break;
            }
            match self.tree.value(id).and_then(AnchorNode::upgrade) {
                None => self.mark_node_for_delete(id),
                Some(anchor) => {
                    let stays_before = match anchor.movement_type() {
                        AnchorMovementType::BeforeInsertion => true,
                        AnchorMovementType::AfterInsertion => false,
                        AnchorMovementType::Default => default_before,
                    };
                    if stays_before {
                        before_insertion.push(id);
                    }
                }
            }
            temp = self.tree.next(id);
        }

        let mut temp = Some(begin);
        for node in before_insertion {
            let Some(target) = temp else {
                break;
            };
            self.swap_anchors(node, target);
            temp = self.tree.next(target);
        }
        // `temp` is the first node moving after the insertion, or `end`.
        match temp {
            Some(id) => {
                if let Some(value) = self.tree.value_mut(id) {
                    value.length += length;
                }
                self.tree.refresh(id);
            }
            None => debug_assert!(end.is_none()),
        }
    }

    fn swap_anchors(&mut self, n1: NodeId, n2: NodeId) {
        if n1 == n2 {
            return;
        }
        let anchor1 = self.tree.value(n1).and_then(AnchorNode::upgrade);
        let anchor2 = self.tree.value(n2).and_then(AnchorNode::upgrade);
        if anchor1.is_none() && anchor2.is_none() {
            return;
        }
        self.tree.swap_values(n1, n2);
        match (anchor1, anchor2) {
            (None, Some(anchor2)) => {
                self.nodes_to_delete.retain(|&n| n != n1);
                self.mark_node_for_delete(n2);
                anchor2.set_node(n1);
            }
            (Some(anchor1), None) => {
                self.nodes_to_delete.retain(|&n| n != n2);
                self.mark_node_for_delete(n1);
                anchor1.set_node(n2);
            }
            (Some(anchor1), Some(anchor2)) => {
                anchor1.set_node(n2);
                anchor2.set_node(n1);
            }
            (None, None) => {}
        }
    }

    /// Node whose gap contains `offset`, marking dropped anchors passed on the way.
    fn find_node(&mut self, offset: usize) -> Option<(NodeId, usize)> {
        let marks = &mut self.nodes_to_delete;
        self.tree.find_by_offset_visiting(offset, |id, node| {
            if !node.is_alive() && !marks.contains(&id) {
                marks.push(id);
            }
        })
    }

    fn mark_node_for_delete(&mut self, node: NodeId) {
        if !self.nodes_to_delete.contains(&node) {
            self.nodes_to_delete.push(node);
        }
    }

    /// Remove the nodes of dropped anchors, folding their gap into the following node.
    fn delete_marked_nodes(&mut self) {
        while let Some(node) = self.nodes_to_delete.pop() {
            let length = self.tree.value(node).map_or(0, |v| v.length);
            let successor = self.tree.next(node);
            if let Some(successor) = successor
                && let Some(value) = self.tree.value_mut(successor)
            {
                value.length += length;
            }
            self.tree.remove(node);
            if let Some(successor) = successor {
                self.tree.refresh(successor);
            }
        }
    }

    fn finish(&mut self) {
        self.delete_marked_nodes();
        self.tree.reclaim_detached();
        #[cfg(debug_assertions)]
        self.check_invariants();
    }

    /// Panics if the tree is inconsistent or an anchor points at the wrong node.
    pub(crate) fn check_invariants(&self) {
        self.tree.check_invariants();
        for id in self.tree.iter() {
            if let Some(anchor) = self.tree.value(id).and_then(AnchorNode::upgrade) {
                assert!(!anchor.is_deleted(), "deleted anchor still in the tree");
                assert_eq!(anchor.node(), Some(id), "anchor points at the wrong node");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(tree: &mut AnchorTree, offset: usize, removal: usize, insertion: usize) -> usize {
        let mut deleted = Vec::new();
        tree.handle_text_change(
            &OffsetChangeMapEntry::new(offset, removal, insertion),
            &mut deleted,
        );
        deleted.len()
    }

    #[test]
    fn test_anchors_shift_with_insertions() {
        let mut tree = AnchorTree::new(1);
        let a = tree.create_anchor(5);
        let b = tree.create_anchor(2);
        assert_eq!(tree.offset_of(&a), Some(5));
        assert_eq!(tree.offset_of(&b), Some(2));
        replace(&mut tree, 3, 0, 4);
        assert_eq!(tree.offset_of(&a), Some(9));
        assert_eq!(tree.offset_of(&b), Some(2));
        tree.check_invariants();
    }

    #[test]
    fn test_insertion_at_anchor_follows_movement_type() {
        let mut tree = AnchorTree::new(1);
        let after = tree.create_anchor(4);
        let before = tree.create_anchor(4);
        before.set_movement_type(AnchorMovementType::BeforeInsertion);
        replace(&mut tree, 4, 0, 3);
        assert_eq!(tree.offset_of(&before), Some(4));
        assert_eq!(tree.offset_of(&after), Some(7));

        let mut deleted = Vec::new();
        let default = tree.create_anchor(7);
        tree.handle_text_change(
            &OffsetChangeMapEntry::with_flags(7, 0, 2, false, true),
            &mut deleted,
        );
        assert_eq!(tree.offset_of(&default), Some(7));
        assert_eq!(tree.offset_of(&after), Some(7));
    }

    #[test]
    fn test_removal_deletes_contained_anchors() {
        let mut tree = AnchorTree::new(1);
        let inside = tree.create_anchor(5);
        let survivor = tree.create_anchor(6);
        survivor.set_survive_deletion(true);
        let after = tree.create_anchor(10);
        assert_eq!(replace(&mut tree, 3, 5, 0), 1);
        assert!(inside.is_deleted());
        assert_eq!(tree.offset_of(&inside), None);
        assert_eq!(tree.offset_of(&survivor), Some(3));
        assert_eq!(tree.offset_of(&after), Some(5));
    }

    #[test]
    fn test_anchors_at_removal_edges_survive() {
        let mut tree = AnchorTree::new(1);
        let start = tree.create_anchor(3);
        let end = tree.create_anchor(8);
        assert_eq!(replace(&mut tree, 3, 5, 2), 0);
        assert_eq!(tree.offset_of(&start), Some(3));
        assert_eq!(tree.offset_of(&end), Some(5));
    }

    #[test]
    fn test_dropped_anchors_are_purged() {
        let mut tree = AnchorTree::new(1);
        let keep = tree.create_anchor(6);
        for offset in 0..6 {
            drop(tree.create_anchor(offset));
        }
        assert_eq!(replace(&mut tree, 0, 6, 0), 0);
        assert_eq!(tree.offset_of(&keep), Some(0));
        replace(&mut tree, 0, 0, 1);
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.offset_of(&keep), Some(1));
        tree.check_invariants();
    }
}
