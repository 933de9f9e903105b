//! Arena-backed red-black tree with per-subtree sums.
//!
//! Every node carries a value with a length; each node caches the number of nodes and the sum of
//! lengths in its subtree. That is enough for rank queries ("n-th node"), prefix-sum queries
//! ("node containing offset x") and the reverse direction, all in O(log n). The line index and the
//! anchor set both sit on top of this tree.
//!
//! Nodes live in a `Vec` and are addressed by [`NodeId`], a generational index. A removed node is
//! *detached*: its value stays readable until [`RbTree::reclaim_detached`] recycles the slot and hands the value back, after
//! which old ids no longer resolve.

/// Anything with a length that should be summed over subtrees.
pub(crate) trait Measured {
    fn length(&self) -> usize;
}

/// Generational handle of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// An id that never resolves to a node.
    pub(crate) const DANGLING: NodeId = NodeId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    fn slot(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone)]
struct Node<V> {
    value: Option<V>,
    generation: u32,
    attached: bool,
    left: Option<usize>,
    right: Option<usize>,
    parent: Option<usize>,
    color: Color,
    total_count: usize,
    total_length: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct RbTree<V> {
    nodes: Vec<Node<V>>,
    root: Option<usize>,
    free: Vec<usize>,
    detached: Vec<usize>,
}

impl<V: Measured> Default for RbTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Measured> RbTree<V> {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            free: Vec::new(),
            detached: Vec::new(),
        }
    }

    /// Number of attached nodes.
    pub(crate) fn len(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].total_count)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Sum of all attached lengths.
    pub(crate) fn total_length(&self) -> usize {
        self.root.map_or(0, |r| self.nodes[r].total_length)
    }

    fn id_of(&self, slot: usize) -> NodeId {
        NodeId {
            index: slot as u32,
            generation: self.nodes[slot].generation,
        }
    }

    fn resolve(&self, id: NodeId) -> Option<usize> {
        let node = self.nodes.get(id.slot())?;
        (node.generation == id.generation && node.value.is_some()).then_some(id.slot())
    }

    fn resolve_attached(&self, id: NodeId) -> Option<usize> {
        self.resolve(id).filter(|&slot| self.nodes[slot].attached)
    }

    /// `true` while the node is part of the tree.
    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.resolve_attached(id).is_some()
    }

    #[cfg(test)]
    fn is_detached(&self, id: NodeId) -> bool {
        self.resolve(id)
            .is_some_and(|slot| !self.nodes[slot].attached)
    }

    /// Value of an attached or detached node.
    pub(crate) fn value(&self, id: NodeId) -> Option<&V> {
        self.resolve(id).and_then(|slot| self.nodes[slot].value.as_ref())
    }

    /// Mutable value of an attached node. Call [`RbTree::refresh`] after changing its length.
    pub(crate) fn value_mut(&mut self, id: NodeId) -> Option<&mut V> {
        let slot = self.resolve_attached(id)?;
        self.nodes[slot].value.as_mut()
    }

    fn own_length(&self, slot: usize) -> usize {
        self.nodes[slot].value.as_ref().map_or(0, Measured::length)
    }

    fn count_of(&self, slot: Option<usize>) -> usize {
        slot.map_or(0, |s| self.nodes[s].total_count)
    }

    fn length_of(&self, slot: Option<usize>) -> usize {
        slot.map_or(0, |s| self.nodes[s].total_length)
    }

    fn is_red(&self, slot: Option<usize>) -> bool {
        slot.is_some_and(|s| self.nodes[s].color == Color::Red)
    }

    fn alloc(&mut self, value: V) -> usize {
        let length = value.length();
        if let Some(slot) = self.free.pop() {
            let node = &mut self.nodes[slot];
            node.value = Some(value);
            node.attached = true;
            node.left = None;
            node.right = None;
            node.parent = None;
            node.color = Color::Black;
            node.total_count = 1;
            node.total_length = length;
            slot
        } else {
            self.nodes.push(Node {
                value: Some(value),
                generation: 0,
                attached: true,
                left: None,
                right: None,
                parent: None,
                color: Color::Black,
                total_count: 1,
                total_length: length,
            });
            self.nodes.len() - 1
        }
    }

    fn detach(&mut self, slot: usize) {
        let node = &mut self.nodes[slot];
        node.attached = false;
        node.left = None;
        node.right = None;
        node.parent = None;
        self.detached.push(slot);
    }

    /// Recycle the slots of all detached nodes and hand back their last values. Their ids stop
    /// resolving.
    pub(crate) fn reclaim_detached(&mut self) -> Vec<(NodeId, V)> {
        let mut reclaimed = Vec::with_capacity(self.detached.len());
        for slot in std::mem::take(&mut self.detached) {
            if self.nodes[slot].attached {
                continue;
            }
            let id = self.id_of(slot);
            let node = &mut self.nodes[slot];
            if let Some(value) = node.value.take() {
                reclaimed.push((id, value));
            }
            node.generation = node.generation.wrapping_add(1);
            self.free.push(slot);
        }
        reclaimed
    }

    fn leftmost(&self, mut slot: usize) -> usize {
        while let Some(left) = self.nodes[slot].left {
            slot = left;
        }
        slot
    }

    fn rightmost(&self, mut slot: usize) -> usize {
        while let Some(right) = self.nodes[slot].right {
            slot = right;
        }
        slot
    }

    fn successor_slot(&self, slot: usize) -> Option<usize> {
        if let Some(right) = self.nodes[slot].right {
            return Some(self.leftmost(right));
        }
        let mut node = slot;
        while let Some(parent) = self.nodes[node].parent {
            if self.nodes[parent].left == Some(node) {
                return Some(parent);
            }
            node = parent;
        }
        None
    }

    fn predecessor_slot(&self, slot: usize) -> Option<usize> {
        if let Some(left) = self.nodes[slot].left {
            return Some(self.rightmost(left));
        }
        let mut node = slot;
        while let Some(parent) = self.nodes[node].parent {
            if self.nodes[parent].right == Some(node) {
                return Some(parent);
            }
            node = parent;
        }
        None
    }

    pub(crate) fn first(&self) -> Option<NodeId> {
        self.root.map(|r| self.id_of(self.leftmost(r)))
    }

    pub(crate) fn last(&self) -> Option<NodeId> {
        self.root.map(|r| self.id_of(self.rightmost(r)))
    }

    pub(crate) fn next(&self, id: NodeId) -> Option<NodeId> {
        let slot = self.resolve_attached(id)?;
        self.successor_slot(slot).map(|s| self.id_of(s))
    }

    pub(crate) fn prev(&self, id: NodeId) -> Option<NodeId> {
        let slot = self.resolve_attached(id)?;
        self.predecessor_slot(slot).map(|s| self.id_of(s))
    }

    /// Attached nodes in order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.first(), move |&id| self.next(id))
    }

    /// Zero-based rank of an attached node.
    pub(crate) fn index_of(&self, id: NodeId) -> Option<usize> {
        let mut slot = self.resolve_attached(id)?;
        let mut index = self.count_of(self.nodes[slot].left);
        while let Some(parent) = self.nodes[slot].parent {
            if self.nodes[parent].right == Some(slot) {
                index += self.count_of(self.nodes[parent].left) + 1;
            }
            slot = parent;
        }
        Some(index)
    }

    /// Sum of the lengths of all nodes before an attached node.
    pub(crate) fn offset_of(&self, id: NodeId) -> Option<usize> {
        let mut slot = self.resolve_attached(id)?;
        let mut offset = self.length_of(self.nodes[slot].left);
        while let Some(parent) = self.nodes[slot].parent {
            if self.nodes[parent].right == Some(slot) {
                offset += self.length_of(self.nodes[parent].left) + self.own_length(parent);
            }
            slot = parent;
        }
        Some(offset)
    }

    pub(crate) fn find_by_index(&self, mut index: usize) -> Option<NodeId> {
        let mut slot = self.root?;
        loop {
            let left_count = self.count_of(self.nodes[slot].left);
            if index < left_count {
                slot = self.nodes[slot].left?;
            } else if index == left_count {
                return Some(self.id_of(slot));
            } else {
                index -= left_count + 1;
                slot = self.nodes[slot].right?;
            }
        }
    }

    /// First node whose span `[before, before + length)` contains `offset`, together with the
    /// distance from `before` to `offset`. `None` when `offset >= total_length()`.
    pub(crate) fn find_by_offset(&self, offset: usize) -> Option<(NodeId, usize)> {
        self.find_by_offset_visiting(offset, |_, _| {})
    }

    /// [`RbTree::find_by_offset`] that also reports every node whose own span was tested on the
    /// way down.
    pub(crate) fn find_by_offset_visiting(
        &self,
        mut offset: usize,
        mut visit: impl FnMut(NodeId, &V),
    ) -> Option<(NodeId, usize)> {
        let mut slot = self.root?;
        loop {
            if let Some(left) = self.nodes[slot].left {
                let left_length = self.nodes[left].total_length;
                if offset < left_length {
                    slot = left;
                    continue;
                }
                offset -= left_length;
            }
            if let Some(value) = self.nodes[slot].value.as_ref() {
                visit(self.id_of(slot), value);
            }
            let own = self.own_length(slot);
            if offset < own {
                return Some((self.id_of(slot), offset));
            }
            offset -= own;
            slot = self.nodes[slot].right?;
        }
    }

    fn recompute(&mut self, slot: usize) {
        let (left, right) = (self.nodes[slot].left, self.nodes[slot].right);
        let count = 1 + self.count_of(left) + self.count_of(right);
        let length = self.own_length(slot) + self.length_of(left) + self.length_of(right);
        let node = &mut self.nodes[slot];
        node.total_count = count;
        node.total_length = length;
    }

    fn update_upwards(&mut self, slot: usize) {
        let mut current = Some(slot);
        while let Some(s) = current {
            self.recompute(s);
            current = self.nodes[s].parent;
        }
    }

    /// Re-sum the ancestors of a node whose value length changed.
    pub(crate) fn refresh(&mut self, id: NodeId) {
        if let Some(slot) = self.resolve_attached(id) {
            self.update_upwards(slot);
        }
    }

    fn replace_node(&mut self, old: usize, new: Option<usize>) {
        let parent = self.nodes[old].parent;
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.nodes[p].left == Some(old) {
                    self.nodes[p].left = new;
                } else {
                    self.nodes[p].right = new;
                }
            }
        }
        if let Some(n) = new {
            self.nodes[n].parent = parent;
        }
        self.nodes[old].parent = None;
    }

    fn rotate_left(&mut self, p: usize) {
        let Some(q) = self.nodes[p].right else {
            return;
        };
        self.replace_node(p, Some(q));
        let inner = self.nodes[q].left;
        self.nodes[p].right = inner;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(p);
        }
        self.nodes[q].left = Some(p);
        self.nodes[p].parent = Some(q);
        self.recompute(p);
        self.recompute(q);
    }

    fn rotate_right(&mut self, p: usize) {
        let Some(q) = self.nodes[p].left else {
            return;
        };
        self.replace_node(p, Some(q));
        let inner = self.nodes[q].right;
        self.nodes[p].left = inner;
        if let Some(i) = inner {
            self.nodes[i].parent = Some(p);
        }
        self.nodes[q].right = Some(p);
        self.nodes[p].parent = Some(q);
        self.recompute(p);
        self.recompute(q);
    }

    fn insert_as_left(&mut self, parent: usize, new: usize) {
        self.nodes[parent].left = Some(new);
        self.nodes[new].parent = Some(parent);
        self.nodes[new].color = Color::Red;
        self.update_upwards(parent);
        self.fix_after_insert(new);
    }

    fn insert_as_right(&mut self, parent: usize, new: usize) {
        self.nodes[parent].right = Some(new);
        self.nodes[new].parent = Some(parent);
        self.nodes[new].color = Color::Red;
        self.update_upwards(parent);
        self.fix_after_insert(new);
    }

    fn sibling_of(&self, slot: usize) -> Option<usize> {
        let parent = self.nodes[slot].parent?;
        if self.nodes[parent].left == Some(slot) {
            self.nodes[parent].right
        } else {
            self.nodes[parent].left
        }
    }

    fn fix_after_insert(&mut self, mut node: usize) {
        loop {
            let Some(parent) = self.nodes[node].parent else {
                self.nodes[node].color = Color::Black;
                return;
            };
            if self.nodes[parent].color == Color::Black {
                return;
            }
            // A red parent is never the root.
            let Some(grandparent) = self.nodes[parent].parent else {
                self.nodes[parent].color = Color::Black;
                return;
            };
            let uncle = self.sibling_of(parent);
            if let Some(u) = uncle.filter(|&u| self.nodes[u].color == Color::Red) {
                self.nodes[parent].color = Color::Black;
                self.nodes[u].color = Color::Black;
                self.nodes[grandparent].color = Color::Red;
                node = grandparent;
                continue;
            }
            let parent_is_left = self.nodes[grandparent].left == Some(parent);
            if self.nodes[parent].right == Some(node) && parent_is_left {
                self.rotate_left(parent);
                node = parent;
            } else if self.nodes[parent].left == Some(node) && !parent_is_left {
                self.rotate_right(parent);
                node = parent;
            }
            let Some(parent) = self.nodes[node].parent else {
                return;
            };
            let Some(grandparent) = self.nodes[parent].parent else {
                return;
            };
            self.nodes[parent].color = Color::Black;
            self.nodes[grandparent].color = Color::Red;
            if self.nodes[parent].left == Some(node) && self.nodes[grandparent].left == Some(parent)
            {
                self.rotate_right(grandparent);
            } else {
                self.rotate_left(grandparent);
            }
            return;
        }
    }

    /// Insert `value` directly before `before`, or at the end when `before` is `None`.
    pub(crate) fn insert_before(&mut self, before: Option<NodeId>, value: V) -> NodeId {
        let before = before.and_then(|id| self.resolve_attached(id));
        let new = self.alloc(value);
        match (before, self.root) {
            (_, None) => {
                self.root = Some(new);
            }
            (None, Some(root)) => {
                let last = self.rightmost(root);
                self.insert_as_right(last, new);
            }
            (Some(b), Some(_)) => match self.nodes[b].left {
                None => self.insert_as_left(b, new),
                Some(left) => {
                    let target = self.rightmost(left);
                    self.insert_as_right(target, new);
                }
            },
        }
        self.id_of(new)
    }

    /// Insert `value` directly after `after`, or at the front when `after` is `None`.
    pub(crate) fn insert_after(&mut self, after: Option<NodeId>, value: V) -> NodeId {
        let after = after.and_then(|id| self.resolve_attached(id));
        let new = self.alloc(value);
        match (after, self.root) {
            (_, None) => {
                self.root = Some(new);
            }
            (None, Some(root)) => {
                let first = self.leftmost(root);
                self.insert_as_left(first, new);
            }
            (Some(a), Some(_)) => match self.nodes[a].right {
                None => self.insert_as_right(a, new),
                Some(right) => {
                    let target = self.leftmost(right);
                    self.insert_as_left(target, new);
                }
            },
        }
        self.id_of(new)
    }

    /// Detach a node from the tree. Returns `false` if it was not attached.
    pub(crate) fn remove(&mut self, id: NodeId) -> bool {
        let Some(slot) = self.resolve_attached(id) else {
            return false;
        };
        self.unlink(slot);
        self.detach(slot);
        true
    }

    fn unlink(&mut self, removed: usize) {
        if let (Some(_), Some(right)) = (self.nodes[removed].left, self.nodes[removed].right) {
            // Swap in the in-order successor, which has no left child.
            let leftmost = self.leftmost(right);
            self.unlink(leftmost);
            self.replace_node(removed, Some(leftmost));
            let left = self.nodes[removed].left;
            let right = self.nodes[removed].right;
            self.nodes[leftmost].left = left;
            if let Some(l) = left {
                self.nodes[l].parent = Some(leftmost);
            }
            self.nodes[leftmost].right = right;
            if let Some(r) = right {
                self.nodes[r].parent = Some(leftmost);
            }
            self.nodes[leftmost].color = self.nodes[removed].color;
            self.update_upwards(leftmost);
            return;
        }
        let parent = self.nodes[removed].parent;
        let child = self.nodes[removed].left.or(self.nodes[removed].right);
        self.replace_node(removed, child);
        if let Some(p) = parent {
            self.update_upwards(p);
        }
        if self.nodes[removed].color == Color::Black {
            match child {
                Some(c) if self.nodes[c].color == Color::Red => {
                    self.nodes[c].color = Color::Black;
                }
                _ => self.fix_after_delete(child, parent),
            }
        }
    }

    fn sibling_in(&self, node: Option<usize>, parent: usize) -> Option<usize> {
        if self.nodes[parent].left == node {
            self.nodes[parent].right
        } else {
            self.nodes[parent].left
        }
    }

    fn fix_after_delete(&mut self, mut node: Option<usize>, mut parent: Option<usize>) {
        loop {
            let Some(p) = parent else {
                return;
            };
            debug_assert!(node.is_none_or(|n| self.nodes[n].parent == Some(p)));
            let Some(mut sibling) = self.sibling_in(node, p) else {
                debug_assert!(false, "black node without sibling");
                return;
            };
            if self.nodes[sibling].color == Color::Red {
                self.nodes[p].color = Color::Red;
                self.nodes[sibling].color = Color::Black;
                if self.nodes[p].left == node {
                    self.rotate_left(p);
                } else {
                    self.rotate_right(p);
                }
                let Some(s) = self.sibling_in(node, p) else {
                    return;
                };
                sibling = s;
            }
            let sibling_left_red = self.is_red(self.nodes[sibling].left);
            let sibling_right_red = self.is_red(self.nodes[sibling].right);
            if self.nodes[p].color == Color::Black
                && self.nodes[sibling].color == Color::Black
                && !sibling_left_red
                && !sibling_right_red
            {
                self.nodes[sibling].color = Color::Red;
                node = Some(p);
                parent = self.nodes[p].parent;
                continue;
            }
            if self.nodes[p].color == Color::Red
                && self.nodes[sibling].color == Color::Black
                && !sibling_left_red
                && !sibling_right_red
            {
                self.nodes[sibling].color = Color::Red;
                self.nodes[p].color = Color::Black;
                return;
            }
            let node_is_left = self.nodes[p].left == node;
            if node_is_left
                && self.nodes[sibling].color == Color::Black
                && sibling_left_red
                && !sibling_right_red
            {
                self.nodes[sibling].color = Color::Red;
                if let Some(sl) = self.nodes[sibling].left {
                    self.nodes[sl].color = Color::Black;
                }
                self.rotate_right(sibling);
            } else if !node_is_left
                && self.nodes[sibling].color == Color::Black
                && sibling_right_red
                && !sibling_left_red
            {
                self.nodes[sibling].color = Color::Red;
                if let Some(sr) = self.nodes[sibling].right {
                    self.nodes[sr].color = Color::Black;
                }
                self.rotate_left(sibling);
            }
            let Some(sibling) = self.sibling_in(node, p) else {
                return;
            };
            self.nodes[sibling].color = self.nodes[p].color;
            self.nodes[p].color = Color::Black;
            if node_is_left {
                if let Some(sr) = self.nodes[sibling].right {
                    self.nodes[sr].color = Color::Black;
                }
                self.rotate_left(p);
            } else {
                if let Some(sl) = self.nodes[sibling].left {
                    self.nodes[sl].color = Color::Black;
                }
                self.rotate_right(p);
            }
            return;
        }
    }

    /// Detach every node except `keep`, which is left attached but unlinked. The tree is empty
    /// afterwards until [`RbTree::build_balanced`] runs.
    pub(crate) fn clear_except(&mut self, keep: Option<NodeId>) {
        let keep = keep.and_then(|id| self.resolve_attached(id));
        let all: Vec<usize> = self.iter().map(NodeId::slot).collect();
        for slot in all {
            if Some(slot) == keep {
                let node = &mut self.nodes[slot];
                node.left = None;
                node.right = None;
                node.parent = None;
            } else {
                self.detach(slot);
            }
        }
        self.root = None;
    }

    /// Allocate an attached node that is not linked into the tree yet.
    pub(crate) fn alloc_unlinked(&mut self, value: V) -> NodeId {
        let slot = self.alloc(value);
        self.id_of(slot)
    }

    /// Arrange `ids` (attached, unlinked nodes) into a perfectly balanced tree in O(n).
    pub(crate) fn build_balanced(&mut self, ids: &[NodeId]) {
        let slots: Vec<usize> = ids
            .iter()
            .filter_map(|&id| self.resolve_attached(id))
            .collect();
        let height = tree_height(slots.len());
        self.root = self.build_range(&slots, height);
        if let Some(root) = self.root {
            self.nodes[root].parent = None;
            self.nodes[root].color = Color::Black;
        }
    }

    fn build_range(&mut self, slots: &[usize], subtree_height: usize) -> Option<usize> {
        if slots.is_empty() {
            return None;
        }
        let middle = slots.len() / 2;
        let node = slots[middle];
        let left = self.build_range(&slots[..middle], subtree_height.saturating_sub(1));
        let right = self.build_range(&slots[middle + 1..], subtree_height.saturating_sub(1));
        self.nodes[node].left = left;
        self.nodes[node].right = right;
        if let Some(l) = left {
            self.nodes[l].parent = Some(node);
        }
        if let Some(r) = right {
            self.nodes[r].parent = Some(node);
        }
        self.nodes[node].color = if subtree_height == 1 {
            Color::Red
        } else {
            Color::Black
        };
        self.recompute(node);
        Some(node)
    }

    /// Replace the values of two attached nodes, keeping their lengths where they are.
    pub(crate) fn swap_values(&mut self, a: NodeId, b: NodeId)
    where
        V: SwapPayload,
    {
        let (Some(a), Some(b)) = (self.resolve_attached(a), self.resolve_attached(b)) else {
            return;
        };
        if a == b {
            return;
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.nodes.split_at_mut(high);
        if let (Some(x), Some(y)) = (head[low].value.as_mut(), tail[0].value.as_mut()) {
            x.swap_payload(y);
        }
    }

    /// Panics if any red-black or aggregate invariant is violated.
    pub(crate) fn check_invariants(&self) {
        let Some(root) = self.root else {
            return;
        };
        assert_eq!(self.nodes[root].parent, None, "root has a parent");
        assert_eq!(self.nodes[root].color, Color::Black, "root must be black");
        self.check_subtree(root);
    }

    fn check_subtree(&self, slot: usize) -> usize {
        let node = &self.nodes[slot];
        assert!(node.attached, "detached node linked into the tree");
        let mut count = 1;
        let mut length = self.own_length(slot);
        let mut black_heights = [0usize; 2];
        for (i, child) in [node.left, node.right].into_iter().enumerate() {
            if let Some(c) = child {
                assert_eq!(self.nodes[c].parent, Some(slot), "broken parent link");
                if node.color == Color::Red {
                    assert_eq!(self.nodes[c].color, Color::Black, "red node with red child");
                }
                black_heights[i] = self.check_subtree(c);
                count += self.nodes[c].total_count;
                length += self.nodes[c].total_length;
            }
        }
        assert_eq!(black_heights[0], black_heights[1], "unequal black height");
        assert_eq!(node.total_count, count, "stale subtree count");
        assert_eq!(node.total_length, length, "stale subtree length");
        black_heights[0] + usize::from(node.color == Color::Black)
    }
}

/// Values whose non-length payload can be exchanged between two nodes.
pub(crate) trait SwapPayload {
    fn swap_payload(&mut self, other: &mut Self);
}

fn tree_height(size: usize) -> usize {
    if size == 0 {
        0
    } else {
        tree_height(size / 2) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Len(usize);

    impl Measured for Len {
        fn length(&self) -> usize {
            self.0
        }
    }

    fn lengths(tree: &RbTree<Len>) -> Vec<usize> {
        tree.iter().map(|id| tree.value(id).unwrap().0).collect()
    }

    #[test]
    fn test_insert_and_positions() {
        let mut tree = RbTree::new();
        let a = tree.insert_before(None, Len(3));
        let c = tree.insert_before(None, Len(5));
        let b = tree.insert_after(Some(a), Len(2));
        let z = tree.insert_after(None, Len(1));
        assert_eq!(lengths(&tree), vec![1, 3, 2, 5]);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.total_length(), 11);
        assert_eq!(tree.index_of(z), Some(0));
        assert_eq!(tree.index_of(c), Some(3));
        assert_eq!(tree.offset_of(b), Some(4));
        assert_eq!(tree.find_by_index(2), Some(b));
        assert_eq!(tree.find_by_offset(5), Some((b, 1)));
        assert_eq!(tree.find_by_offset(6), Some((c, 0)));
        assert_eq!(tree.find_by_offset(11), None);
        tree.check_invariants();
    }

    #[test]
    fn test_zero_length_nodes_are_skipped_by_offset() {
        let mut tree = RbTree::new();
        let empty = tree.insert_before(None, Len(0));
        let full = tree.insert_before(None, Len(4));
        assert_eq!(tree.find_by_offset(0), Some((full, 0)));
        assert_eq!(tree.offset_of(full), Some(0));
        assert_eq!(tree.index_of(empty), Some(0));
    }

    #[test]
    fn test_remove_keeps_detached_value_until_reclaimed() {
        let mut tree = RbTree::new();
        let a = tree.insert_before(None, Len(1));
        let b = tree.insert_before(None, Len(2));
        assert!(tree.remove(a));
        assert!(!tree.contains(a));
        assert!(tree.is_detached(a));
        assert_eq!(tree.value(a), Some(&Len(1)));
        assert_eq!(tree.index_of(b), Some(0));
        assert_eq!(tree.reclaim_detached(), vec![(a, Len(1))]);
        assert_eq!(tree.value(a), None);
        let c = tree.insert_before(None, Len(7));
        assert_ne!(a, c);
        assert_eq!(tree.value(a), None);
        assert_eq!(lengths(&tree), vec![2, 7]);
    }

    #[test]
    fn test_build_balanced() {
        let mut tree = RbTree::new();
        let ids: Vec<NodeId> = (0..100).map(|i| tree.alloc_unlinked(Len(i))).collect();
        tree.build_balanced(&ids);
        tree.check_invariants();
        assert_eq!(tree.len(), 100);
        assert_eq!(tree.find_by_index(42), Some(ids[42]));
        assert_eq!(tree.offset_of(ids[10]), Some((0..10).sum()));
    }

    #[test]
    fn test_clear_except_keeps_one_node() {
        let mut tree = RbTree::new();
        let a = tree.insert_before(None, Len(1));
        let b = tree.insert_before(None, Len(2));
        tree.clear_except(Some(a));
        assert!(tree.is_empty());
        assert!(tree.is_detached(b));
        let c = tree.alloc_unlinked(Len(4));
        tree.build_balanced(&[a, c]);
        assert_eq!(lengths(&tree), vec![1, 4]);
        tree.check_invariants();
    }

    #[test]
    fn test_random_operations_match_vec_model() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut tree = RbTree::new();
        let mut model: Vec<(NodeId, usize)> = Vec::new();
        for step in 0..4000 {
            let op = rng.gen_range(0..10);
            if op < 6 || model.is_empty() {
                let len = rng.gen_range(0..10);
                let pos = rng.gen_range(0..=model.len());
                let id = if pos == model.len() {
                    tree.insert_before(None, Len(len))
                } else if rng.gen_bool(0.5) {
                    tree.insert_before(Some(model[pos].0), Len(len))
                } else if pos == 0 {
                    tree.insert_after(None, Len(len))
                } else {
                    tree.insert_after(Some(model[pos - 1].0), Len(len))
                };
                model.insert(pos, (id, len));
            } else if op < 9 {
                let pos = rng.gen_range(0..model.len());
                let (id, _) = model.remove(pos);
                assert!(tree.remove(id));
            } else {
                let pos = rng.gen_range(0..model.len());
                let len = rng.gen_range(0..10);
                tree.value_mut(model[pos].0).unwrap().0 = len;
                tree.refresh(model[pos].0);
                model[pos].1 = len;
            }
            if step % 100 == 0 {
                tree.reclaim_detached();
            }
            tree.check_invariants();
            assert_eq!(tree.len(), model.len());
            let expected: Vec<usize> = model.iter().map(|m| m.1).collect();
            assert_eq!(lengths(&tree), expected);
            if !model.is_empty() {
                let pos = rng.gen_range(0..model.len());
                assert_eq!(tree.index_of(model[pos].0), Some(pos));
                let before: usize = model[..pos].iter().map(|m| m.1).sum();
                assert_eq!(tree.offset_of(model[pos].0), Some(before));
            }
        }
    }
}
