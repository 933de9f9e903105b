//! Line heights for the view layer.
//!
//! [`HeightTree`] maps line numbers to vertical positions and back. It is a B+-tree: a leaf holds
//! the heights of up to 16 consecutive lines, an inner node holds up to 16 children together with
//! their cached total height and line count. Every node except the root holds at least 8 entries.
//!
//! Lines are hidden with [`HeightTree::collapse_text`]. A collapsed section is not stored per
//! line. It places a start event in the leaf that holds its first line and an end event in the leaf
//! that holds its last line; while those two leaves differ, the events are repeated in their
//! parents, up to the lowest common ancestor. Every node derives a `collapsed` bitmask from its own
//! events, and children whose bit is set contribute no height. Collapsing and uncollapsing are
//! therefore `O(log n)` no matter how many lines a section covers.
//!
//! The tree implements [`LineTracker`] so it can be attached to a document and follow its lines.

use std::fmt::Write as _;

use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::change::DocumentChange;
use crate::error::{DocumentError, Result};
use crate::line_manager::LineTracker;
use crate::line_tree::{DocumentLine, LineTree};

const MAX_CHILDREN: usize = 16;
const MIN_CHILDREN: usize = (MAX_CHILDREN + 1) / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Start,
    End,
}

/// A collapsed section starting or ending below a node.
///
/// In a leaf `position` is the index of the first or last line. In an inner node it is the index
/// of the child containing that line.
#[derive(Debug, Clone, Copy)]
struct Event {
    section: CollapsedLineSection,
    kind: EventKind,
    position: u8,
}

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Leaf,
    Inner {
        children: [NodeId; MAX_CHILDREN],
        line_counts: [usize; MAX_CHILDREN],
    },
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<NodeId>,
    index_in_parent: u8,
    child_count: u8,
    collapsed: u16,
    events: SmallVec<[Event; 2]>,
    /// Line heights in a leaf, cached child totals in an inner node.
    heights: [f64; MAX_CHILDREN],
    kind: NodeKind,
}

impl Node {
    fn leaf() -> Self {
        Self {
            parent: None,
            index_in_parent: 0,
            child_count: 0,
            collapsed: 0,
            events: SmallVec::new(),
            heights: [0.0; MAX_CHILDREN],
            kind: NodeKind::Leaf,
        }
    }

    fn inner() -> Self {
        Self {
            kind: NodeKind::Inner {
                children: [NodeId(0); MAX_CHILDREN],
                line_counts: [0; MAX_CHILDREN],
            },
            ..Self::leaf()
        }
    }

    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf)
    }

    fn len(&self) -> usize {
        self.child_count as usize
    }

    fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Leaf => &[],
            NodeKind::Inner { children, .. } => &children[..self.len()],
        }
    }

    fn line_counts(&self) -> &[usize] {
        match &self.kind {
            NodeKind::Leaf => &[],
            NodeKind::Inner { line_counts, .. } => &line_counts[..self.len()],
        }
    }

    fn is_collapsed(&self, index: usize) -> bool {
        self.collapsed & (1 << index) != 0
    }

    fn line_count(&self) -> usize {
        self.line_count_until(self.len())
    }

    fn line_count_until(&self, index: usize) -> usize {
        match self.kind {
            NodeKind::Leaf => index,
            NodeKind::Inner { .. } => self.line_counts()[..index].iter().sum(),
        }
    }

    fn total_height(&self) -> f64 {
        self.height_until(self.len())
    }

    /// Height of the visible entries before `index`.
    fn height_until(&self, index: usize) -> f64 {
        (0..index)
            .filter(|&i| !self.is_collapsed(i))
            .map(|i| self.heights[i])
            .sum()
    }

    /// Child that contains `line`; a line past the end maps into the last child.
    fn find_child_for_line(&self, mut line: usize) -> (usize, usize) {
        let counts = self.line_counts();
        for (index, &count) in counts.iter().enumerate() {
            if line < count {
                return (index, line);
            }
            line -= count;
        }
        let last = counts.len().saturating_sub(1);
        (last, line + counts.get(last).copied().unwrap_or(0))
    }

    fn leaf_child_for_visual_position(&self, position: f64) -> usize {
        let mut total = 0.0;
        for i in 0..self.len() {
            if !self.is_collapsed(i) {
                total += self.heights[i];
                if position < total {
                    return i;
                }
            }
        }
        // Past the end, or rounding: the last visible line.
        (0..self.len())
            .rev()
            .find(|&i| !self.is_collapsed(i))
            .unwrap_or(0)
    }

    fn inner_child_for_visual_position(&self, position: f64) -> (usize, f64) {
        let mut total = 0.0;
        for i in 0..self.len() {
            if self.is_collapsed(i) {
                continue;
            }
            let new_total = total + self.heights[i];
            if position < new_total {
                return (i, position - total);
            }
            total = new_total;
        }
        match (0..self.len())
            .rev()
            .find(|&i| self.heights[i] > 0.0 && !self.is_collapsed(i))
        {
            Some(i) => (i, self.heights[i]),
            None => (0, self.heights[0]),
        }
    }
}

/// Outcome of removing a line below a node.
#[derive(Debug, Clone, Copy, Default)]
struct Deletion {
    /// The node is empty and must be removed from its parent.
    node_deleted: bool,
    /// Entries moved to or from the predecessor; its parent must refresh cached data.
    predecessor_changed: bool,
    /// Entries moved to or from the successor.
    successor_changed: bool,
}

/// Handle to a collapsed range of lines in a [`HeightTree`].
///
/// The handle stays valid until the section is uncollapsed, the lines it covers are deleted, or
/// the tree is rebuilt. After that the tree reports it as no longer collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollapsedLineSection {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct SectionState {
    start_leaf: Option<NodeId>,
    start_index: u8,
    end_leaf: Option<NodeId>,
    end_index: u8,
}

#[derive(Debug, Clone)]
struct SectionSlot {
    generation: u32,
    state: Option<SectionState>,
}

/// Maps line numbers (1-based) to visual positions.
#[derive(Debug)]
pub struct HeightTree {
    nodes: Vec<Node>,
    free_nodes: Vec<NodeId>,
    root: NodeId,
    sections: Vec<SectionSlot>,
    free_sections: Vec<u32>,
    default_line_height: f64,
}

impl HeightTree {
    /// A tree of `line_count` lines of `default_line_height` each.
    pub fn new(line_count: usize, default_line_height: f64) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            root: NodeId(0),
            sections: Vec::new(),
            free_sections: Vec::new(),
            default_line_height,
        };
        tree.rebuild(line_count);
        tree
    }

    /// Number of lines, collapsed ones included.
    pub fn line_count(&self) -> usize {
        self.node(self.root).line_count()
    }

    /// Height of all visible lines.
    pub fn total_height(&self) -> f64 {
        self.node(self.root).total_height()
    }

    /// Height given to inserted lines.
    pub fn default_line_height(&self) -> f64 {
        self.default_line_height
    }

    /// Change the default height. Every line whose height equals the old default gets the new one.
    pub fn set_default_line_height(&mut self, height: f64) {
        let old = self.default_line_height;
        if old == height {
            return;
        }
        self.default_line_height = height;
        self.replace_heights(self.root, old, height);
    }

    /// The line at vertical `position`. Positions past the end give the last visible line.
    pub fn get_line_by_visual_position(&self, mut position: f64) -> usize {
        let mut line_number = 1;
        let mut id = self.root;
        loop {
            let node = self.node(id);
            if node.is_leaf() {
                return line_number + node.leaf_child_for_visual_position(position);
            }
            let (child_index, position_in_child) = node.inner_child_for_visual_position(position);
            position = position_in_child;
            line_number += node.line_count_until(child_index);
            id = node.children()[child_index];
        }
    }

    /// Top of `line_number`. A collapsed line reports the position where its section is hidden.
    pub fn get_visual_position(&self, line_number: usize) -> Result<f64> {
        self.check_line(line_number)?;
        let mut position = 0.0;
        let mut id = self.root;
        let mut line = line_number - 1;
        loop {
            let node = self.node(id);
            if node.is_leaf() {
                return Ok(position + node.height_until(line));
            }
            let (child_index, line_in_child) = node.find_child_for_line(line);
            position += node.height_until(child_index);
            if node.is_collapsed(child_index) {
                return Ok(position);
            }
            id = node.children()[child_index];
            line = line_in_child;
        }
    }

    /// Height of `line_number`, whether collapsed or not.
    pub fn get_height(&self, line_number: usize) -> Result<f64> {
        let (leaf, index) = self.leaf_for_line(line_number)?;
        Ok(self.node(leaf).heights[index])
    }

    /// Set the height of `line_number`.
    pub fn set_height(&mut self, line_number: usize, height: f64) -> Result<()> {
        let (leaf, index) = self.leaf_for_line(line_number)?;
        self.node_mut(leaf).heights[index] = height;
        self.propagate_height(leaf);
        Ok(())
    }

    /// `true` if `line_number` is hidden by any collapsed section.
    pub fn is_collapsed(&self, line_number: usize) -> Result<bool> {
        self.check_line(line_number)?;
        let mut id = self.root;
        let mut line = line_number - 1;
        loop {
            let node = self.node(id);
            if node.is_leaf() {
                return Ok(node.is_collapsed(line));
            }
            let (child_index, line_in_child) = node.find_child_for_line(line);
            if node.is_collapsed(child_index) {
                return Ok(true);
            }
            id = node.children()[child_index];
            line = line_in_child;
        }
    }

    /// Hide the lines `start..=end`.
    pub fn collapse_text(&mut self, start: usize, end: usize) -> Result<CollapsedLineSection> {
        self.check_line(start)?;
        self.check_line(end)?;
        if start > end {
            return Err(DocumentError::InvalidSectionRange { start, end });
        }
        let section = self.alloc_section();
        self.add_collapsed_section(self.root, start as isize - 1, end as isize - 1, section);
        debug!(start, end, "collapsed lines");
        #[cfg(debug_assertions)]
        self.check_invariants();
        Ok(section)
    }

    /// Show the lines of `section` again. Does nothing if it is no longer collapsed.
    pub fn uncollapse(&mut self, section: CollapsedLineSection) {
        let Some(state) = self.state(section).copied() else {
            return;
        };
        let (Some(mut start_node), Some(mut end_node)) = (state.start_leaf, state.end_leaf) else {
            return;
        };
        while start_node != end_node {
            self.remove_event(start_node, section, EventKind::Start);
            self.remove_event(end_node, section, EventKind::End);
            let (start, end) = (self.node(start_node), self.node(end_node));
            let (Some(start_parent), Some(end_parent)) = (start.parent, end.parent) else {
                break;
            };
            let (start_index, end_index) = (start.index_in_parent, end.index_in_parent);
            self.update_child_height(start_parent, start_index as usize);
            self.update_child_height(end_parent, end_index as usize);
            start_node = start_parent;
            end_node = end_parent;
        }
        // Both events meet in the lowest common ancestor.
        self.remove_event(start_node, section, EventKind::Start);
        self.remove_event(start_node, section, EventKind::End);
        self.propagate_height(start_node);
        self.reset_section(section);
        trace!(?section, "uncollapsed section");
    }

    /// `false` once the section was uncollapsed or its lines were deleted.
    pub fn is_section_collapsed(&self, section: CollapsedLineSection) -> bool {
        self.state(section).is_some()
    }

    /// First line of a collapsed section.
    pub fn section_start(&self, section: CollapsedLineSection) -> Option<usize> {
        let state = self.state(section)?;
        self.line_number_of(state.start_leaf?, state.start_index)
    }

    /// Last line of a collapsed section.
    pub fn section_end(&self, section: CollapsedLineSection) -> Option<usize> {
        let state = self.state(section)?;
        self.line_number_of(state.end_leaf?, state.end_index)
    }

    /// Every collapsed section, ordered by start line.
    pub fn collapsed_sections(&self) -> Vec<CollapsedLineSection> {
        let mut sections = Vec::new();
        self.collect_sections(self.root, &mut sections);
        sections
    }

    /// Insert a line of default height so that it gets `line_number`.
    pub fn insert_line(&mut self, line_number: usize) -> Result<()> {
        let line_count = self.line_count();
        if line_number == 0 || line_number > line_count + 1 {
            return Err(DocumentError::LineNumberOutOfRange {
                line: line_number,
                line_count,
            });
        }
        self.insert_line_index(line_number - 1);
        Ok(())
    }

    /// Remove `line_number`. Sections starting or ending on it shrink; single-line sections go away.
    pub fn delete_line(&mut self, line_number: usize) -> Result<()> {
        self.check_line(line_number)?;
        self.delete_line_index(line_number - 1);
        Ok(())
    }

    /// Rebuild the tree for `line_count` lines of default height in `O(n)`. All sections are reset.
    pub fn rebuild(&mut self, line_count: usize) {
        for slot in 0..self.sections.len() {
            if let Some(section) = self.live_section(slot) {
                self.reset_section(section);
            }
        }
        self.nodes.clear();
        self.free_nodes.clear();
        if line_count == 0 {
            self.root = self.alloc(Node::leaf());
            return;
        }

        // Inner nodes per level that are neither full nor attached to a parent yet.
        let mut open = vec![self.alloc(Node::inner())];
        let mut position = 0;
        while position < line_count {
            let lines = (line_count - position).min(MAX_CHILDREN);
            let mut leaf = Node::leaf();
            leaf.heights[..lines].fill(self.default_line_height);
            leaf.child_count = lines as u8;
            let leaf = self.alloc(leaf);
            self.append_child(open[0], leaf);
            position += lines;

            let mut level = 0;
            while self.node(open[level]).len() == MAX_CHILDREN {
                if level + 1 == open.len() {
                    let node = self.alloc(Node::inner());
                    open.push(node);
                }
                self.append_child(open[level + 1], open[level]);
                open[level] = self.alloc(Node::inner());
                level += 1;
            }
        }
        for level in 0..open.len() - 1 {
            self.append_child(open[level + 1], open[level]);
        }

        let top = open[open.len() - 1];
        if self.node(top).len() == 1 {
            self.root = self.node(top).children()[0];
            self.detach_root();
            self.free(top);
        } else {
            self.root = top;
            // Only the last node of every level can be underfull.
            self.rebalance_last_child(top);
        }
        debug!(line_count, "rebuilt height tree");
        #[cfg(debug_assertions)]
        self.check_invariants();
    }

    /// Verify occupancy, cached aggregates, collapsed bits and event positions. Panics on
    /// violation.
    pub fn check_invariants(&self) {
        assert!(self.node(self.root).parent.is_none(), "root has a parent");
        self.check_node(self.root, true);
        for slot in 0..self.sections.len() {
            if let Some(section) = self.live_section(slot) {
                let start = self.section_start(section);
                let end = self.section_end(section);
                assert!(start.is_some() && end.is_some(), "section not placed");
                assert!(start <= end, "section {section:?} ends before it starts");
            }
        }
    }

    /// Indented dump of the tree structure.
    pub fn tree_as_string(&self) -> String {
        let mut out = String::new();
        self.append_node(&mut out, self.root, 0, 1);
        out
    }

    fn check_line(&self, line_number: usize) -> Result<()> {
        let line_count = self.line_count();
        if line_number == 0 || line_number > line_count {
            return Err(DocumentError::LineNumberOutOfRange {
                line: line_number,
                line_count,
            });
        }
        Ok(())
    }

    fn leaf_for_line(&self, line_number: usize) -> Result<(NodeId, usize)> {
        self.check_line(line_number)?;
        let mut id = self.root;
        let mut line = line_number - 1;
        while !self.node(id).is_leaf() {
            let node = self.node(id);
            let (child_index, line_in_child) = node.find_child_for_line(line);
            id = node.children()[child_index];
            line = line_in_child;
        }
        Ok((id, line))
    }

    fn line_number_of(&self, leaf: NodeId, index_in_leaf: u8) -> Option<usize> {
        let mut line = index_in_leaf as usize;
        let mut id = leaf;
        while let Some(parent) = self.node(id).parent {
            let index = self.node(id).index_in_parent as usize;
            line += self.node(parent).line_count_until(index);
            id = parent;
        }
        (id == self.root).then_some(line + 1)
    }

    fn insert_line_index(&mut self, line: usize) {
        if let Some(sibling) = self.insert_line_at(self.root, line, self.default_line_height) {
            self.root = self.new_root(self.root, sibling);
        }
    }

    fn delete_line_index(&mut self, line: usize) {
        self.delete_line_at(self.root, line, None, None);
        let root = self.node(self.root);
        if !root.is_leaf() && root.len() == 1 {
            let old_root = self.root;
            self.root = root.children()[0];
            self.detach_root();
            self.free(old_root);
        }
    }

    fn detach_root(&mut self) {
        let root = self.root;
        let node = self.node_mut(root);
        node.parent = None;
        node.index_in_parent = 0;
    }

    // Arena

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        if let Some(id) = self.free_nodes.pop() {
            *self.node_mut(id) = node;
            return id;
        }
        self.nodes.push(node);
        NodeId((self.nodes.len() - 1) as u32)
    }

    fn free(&mut self, id: NodeId) {
        *self.node_mut(id) = Node::leaf();
        self.free_nodes.push(id);
    }

    // Sections

    fn alloc_section(&mut self) -> CollapsedLineSection {
        let slot = match self.free_sections.pop() {
            Some(slot) => slot,
            None => {
                self.sections.push(SectionSlot {
                    generation: 0,
                    state: None,
                });
                (self.sections.len() - 1) as u32
            }
        };
        let entry = &mut self.sections[slot as usize];
        entry.state = Some(SectionState::default());
        CollapsedLineSection {
            slot,
            generation: entry.generation,
        }
    }

    fn live_section(&self, slot: usize) -> Option<CollapsedLineSection> {
        let entry = self.sections.get(slot)?;
        entry.state.map(|_| CollapsedLineSection {
            slot: slot as u32,
            generation: entry.generation,
        })
    }

    fn state(&self, section: CollapsedLineSection) -> Option<&SectionState> {
        self.sections
            .get(section.slot as usize)
            .filter(|entry| entry.generation == section.generation)
            .and_then(|entry| entry.state.as_ref())
    }

    fn state_mut(&mut self, section: CollapsedLineSection) -> Option<&mut SectionState> {
        self.sections
            .get_mut(section.slot as usize)
            .filter(|entry| entry.generation == section.generation)
            .and_then(|entry| entry.state.as_mut())
    }

    fn reset_section(&mut self, section: CollapsedLineSection) {
        let Some(entry) = self.sections.get_mut(section.slot as usize) else {
            return;
        };
        if entry.generation != section.generation || entry.state.is_none() {
            return;
        }
        entry.state = None;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_sections.push(section.slot);
    }

    /// Point the start or end of `event`'s section at `index` in `leaf`.
    fn place_section_end(&mut self, event: &Event, leaf: NodeId, index: u8) {
        if let Some(state) = self.state_mut(event.section) {
            match event.kind {
                EventKind::Start => {
                    state.start_leaf = Some(leaf);
                    state.start_index = index;
                }
                EventKind::End => {
                    state.end_leaf = Some(leaf);
                    state.end_index = index;
                }
            }
        }
    }

    fn start_within(&self, section: CollapsedLineSection, node: NodeId) -> Option<usize> {
        let state = self.state(section)?;
        self.position_within(state.start_leaf, state.start_index, node)
    }

    fn end_within(&self, section: CollapsedLineSection, node: NodeId) -> Option<usize> {
        let state = self.state(section)?;
        self.position_within(state.end_leaf, state.end_index, node)
    }

    /// Index of the entry of `node` that contains the given leaf position, if `node` is an
    /// ancestor of the leaf (or the leaf itself).
    fn position_within(&self, leaf: Option<NodeId>, index_in_leaf: u8, node: NodeId) -> Option<usize> {
        let mut index = index_in_leaf as usize;
        let mut current = leaf;
        while let Some(id) = current {
            if id == node {
                return Some(index);
            }
            let n = self.node(id);
            index = n.index_in_parent as usize;
            current = n.parent;
        }
        None
    }

    // Events and collapsed bits

    fn recompute_collapsed_bits(&self, id: NodeId) -> u16 {
        let node = self.node(id);
        let (start_offset, end_offset) = if node.is_leaf() { (0, 1) } else { (1, 0) };
        let mut bits = 0;
        for event in &node.events {
            let position = event.position as usize;
            bits |= match event.kind {
                EventKind::Start => bits_between(
                    position + start_offset,
                    self.end_within(event.section, id)
                        .map_or(node.len(), |end| end + end_offset),
                ),
                EventKind::End => bits_between(
                    self.start_within(event.section, id)
                        .map_or(0, |start| start + start_offset),
                    position + end_offset,
                ),
            };
        }
        bits
    }

    fn refresh_collapsed(&mut self, id: NodeId) {
        let bits = self.recompute_collapsed_bits(id);
        self.node_mut(id).collapsed = bits;
    }

    /// Shift events at or after `index` by `delta` entries.
    fn adjust_event_positions(&mut self, id: NodeId, index: usize, delta: isize, delete_affected: bool) {
        let is_leaf = self.node(id).is_leaf();
        let removed = if delta < 0 { delta.unsigned_abs() } else { 0 };
        let events = std::mem::take(&mut self.node_mut(id).events);
        let mut kept = SmallVec::new();
        for mut event in events {
            let position = event.position as usize;
            if position >= index {
                if position < index + removed {
                    debug_assert!(delete_affected, "event inside a removed range");
                    continue;
                }
                let new_position = position.saturating_add_signed(delta) as u8;
                if is_leaf {
                    self.place_section_end(&event, id, new_position);
                }
                event.position = new_position;
            }
            kept.push(event);
        }
        self.node_mut(id).events = kept;

        if removed > 0 {
            let node = self.node_mut(id);
            let old = u32::from(node.collapsed);
            let before = old & ((1 << index) - 1);
            let after = (old >> (index + removed)) << index;
            node.collapsed = (before | after) as u16;
        } else {
            self.refresh_collapsed(id);
        }
    }

    /// Move the events of `sibling` entries `start..end` to `this`, starting at `start_here`.
    fn steal_events(&mut self, this: NodeId, sibling: NodeId, start: usize, end: usize, start_here: usize) {
        let this_is_leaf = self.node(this).is_leaf();
        let events = std::mem::take(&mut self.node_mut(sibling).events);
        let mut remaining = SmallVec::new();
        for event in events {
            let position = event.position as usize;
            if !(start..end).contains(&position) {
                remaining.push(event);
                continue;
            }
            let new_position = (position - start + start_here) as u8;
            if this_is_leaf {
                self.place_section_end(&event, this, new_position);
            }
            self.node_mut(this).events.push(Event {
                position: new_position,
                ..event
            });
        }
        self.node_mut(sibling).events = remaining;
    }

    fn remove_event(&mut self, id: NodeId, section: CollapsedLineSection, kind: EventKind) {
        self.node_mut(id)
            .events
            .retain(|event| !(event.section == section && event.kind == kind));
        self.refresh_collapsed(id);
    }

    // Entry movement shared by leaves and inner nodes

    fn reindex_children(&mut self, id: NodeId, from: usize) {
        let node = self.node(id);
        let NodeKind::Inner { children, .. } = node.kind else {
            return;
        };
        for (index, &child) in children.iter().enumerate().take(node.len()).skip(from) {
            let child = self.node_mut(child);
            child.parent = Some(id);
            child.index_in_parent = index as u8;
        }
    }

    fn make_gap(&mut self, id: NodeId, index: usize, amount: usize) {
        let node = self.node_mut(id);
        let len = node.len();
        debug_assert!(index <= len && len + amount <= MAX_CHILDREN);
        node.heights.copy_within(index..len, index + amount);
        if let NodeKind::Inner {
            children,
            line_counts,
        } = &mut node.kind
        {
            children.copy_within(index..len, index + amount);
            line_counts.copy_within(index..len, index + amount);
        }
        node.child_count += amount as u8;
        self.reindex_children(id, index + amount);
        self.adjust_event_positions(id, index, amount as isize, false);
    }

    fn perform_deletion(&mut self, id: NodeId, start: usize, end: usize, delete_affected: bool) {
        let node = self.node_mut(id);
        let len = node.len();
        debug_assert!(start <= end && end <= len);
        node.heights.copy_within(end..len, start);
        if let NodeKind::Inner {
            children,
            line_counts,
        } = &mut node.kind
        {
            children.copy_within(end..len, start);
            line_counts.copy_within(end..len, start);
        }
        node.child_count -= (end - start) as u8;
        self.reindex_children(id, start);
        self.adjust_event_positions(id, start, -((end - start) as isize), delete_affected);
    }

    /// Copy the entries `range` of `source` into `target` at `at`. Counts and parents are left to
    /// the caller.
    fn copy_entries(&mut self, source: NodeId, range: std::ops::Range<usize>, target: NodeId, at: usize) {
        let Node { heights, kind, .. } = *self.node(source);
        let count = range.len();
        let target = self.node_mut(target);
        target.heights[at..at + count].copy_from_slice(&heights[range.clone()]);
        if let (
            NodeKind::Inner {
                children: source_children,
                line_counts: source_counts,
            },
            NodeKind::Inner {
                children,
                line_counts,
            },
        ) = (kind, &mut target.kind)
        {
            children[at..at + count].copy_from_slice(&source_children[range.clone()]);
            line_counts[at..at + count].copy_from_slice(&source_counts[range]);
        }
    }

    fn steal_from_predecessor(&mut self, this: NodeId, prev: NodeId, count: usize) {
        let prev_len = self.node(prev).len();
        debug_assert!(count <= prev_len && self.node(this).len() + count <= MAX_CHILDREN);
        self.make_gap(this, 0, count);
        self.copy_entries(prev, prev_len - count..prev_len, this, 0);
        self.reindex_children(this, 0);
        self.steal_events(this, prev, prev_len - count, prev_len, 0);
        self.node_mut(prev).child_count -= count as u8;
        // A moved section start can change the collapsed state of entries already in `this`.
        self.refresh_collapsed(this);
        self.refresh_collapsed(prev);
    }

    fn steal_from_successor(&mut self, this: NodeId, next: NodeId, count: usize) {
        let len = self.node(this).len();
        debug_assert!(count <= self.node(next).len() && len + count <= MAX_CHILDREN);
        self.copy_entries(next, 0..count, this, len);
        self.node_mut(this).child_count += count as u8;
        self.reindex_children(this, len);
        self.steal_events(this, next, 0, count, len);
        self.perform_deletion(next, 0, count, true);
        self.refresh_collapsed(this);
        self.refresh_collapsed(next);
    }

    /// Restore minimum occupancy of `id` from its siblings. Returns `false` if there is no
    /// sibling to balance with.
    fn rebalance(
        &mut self,
        id: NodeId,
        predecessor: Option<NodeId>,
        successor: Option<NodeId>,
        result: &mut Deletion,
    ) -> bool {
        let len = self.node(id).len();
        let prev_len = predecessor.map_or(0, |prev| self.node(prev).len());
        let next_len = successor.map_or(0, |next| self.node(next).len());
        if let Some(prev) = predecessor
            && prev_len > MIN_CHILDREN
            && prev_len > next_len
        {
            self.steal_from_predecessor(id, prev, (prev_len - MIN_CHILDREN + 1) / 2);
            result.predecessor_changed = true;
        } else if let Some(next) = successor
            && next_len > MIN_CHILDREN
        {
            self.steal_from_successor(id, next, (next_len - MIN_CHILDREN + 1) / 2);
            result.successor_changed = true;
        } else if let Some(prev) = predecessor {
            self.steal_from_successor(prev, id, len);
            result.predecessor_changed = true;
            result.node_deleted = true;
        } else if let Some(next) = successor {
            self.steal_from_predecessor(next, id, len);
            result.successor_changed = true;
            result.node_deleted = true;
        } else {
            return false;
        }
        true
    }

    // Inner node bookkeeping

    /// Refresh the cached data of child `child_index` and re-propagate its events. Returns whether
    /// the collapsed bits of `id` need recomputing.
    fn update_child(&mut self, id: NodeId, child_index: usize) -> bool {
        let child = self.node(id).children()[child_index];
        let (height, lines) = {
            let child = self.node(child);
            (child.total_height(), child.line_count())
        };
        let node = self.node_mut(id);
        node.heights[child_index] = height;
        if let NodeKind::Inner { line_counts, .. } = &mut node.kind {
            line_counts[child_index] = lines;
        }
        let before = node.events.len();
        node.events
            .retain(|event| event.position as usize != child_index);
        let mut recompute = node.events.len() != before;

        let child_events = self.node(child).events.clone();
        for event in child_events {
            // Events whose partner lies in the same child stay below.
            let partner_inside = match event.kind {
                EventKind::Start => self.end_within(event.section, child).is_some(),
                EventKind::End => self.start_within(event.section, child).is_some(),
            };
            if partner_inside {
                continue;
            }
            self.node_mut(id).events.push(Event {
                position: child_index as u8,
                ..event
            });
            recompute = true;
        }
        recompute
    }

    fn update_child_height(&mut self, id: NodeId, child_index: usize) {
        let child = self.node(id).children()[child_index];
        let height = self.node(child).total_height();
        self.node_mut(id).heights[child_index] = height;
    }

    /// Refresh cached heights from `id` up to the root.
    fn propagate_height(&mut self, mut id: NodeId) {
        while let Some(parent) = self.node(id).parent {
            let index = self.node(id).index_in_parent as usize;
            self.update_child_height(parent, index);
            id = parent;
        }
    }

    fn insert_child(&mut self, id: NodeId, index: usize, child: NodeId) -> bool {
        self.make_gap(id, index, 1);
        if let NodeKind::Inner { children, .. } = &mut self.node_mut(id).kind {
            children[index] = child;
        }
        let node = self.node_mut(child);
        node.parent = Some(id);
        node.index_in_parent = index as u8;
        self.update_child(id, index)
    }

    fn append_child(&mut self, id: NodeId, child: NodeId) {
        let index = self.node(id).len();
        self.insert_child(id, index, child);
    }

    fn new_root(&mut self, first: NodeId, second: NodeId) -> NodeId {
        let root = self.alloc(Node::inner());
        self.insert_child(root, 0, first);
        self.insert_child(root, 1, second);
        self.refresh_collapsed(root);
        root
    }

    /// Balance the last child of every level after a rebuild, where all other nodes are full.
    fn rebalance_last_child(&mut self, id: NodeId) {
        let len = self.node(id).len();
        debug_assert!(len >= 2);
        let last = self.node(id).children()[len - 1];
        let prev = self.node(id).children()[len - 2];
        let last_len = self.node(last).len();
        if last_len < MIN_CHILDREN {
            let balanced = (self.node(prev).len() + last_len) / 2;
            self.steal_from_predecessor(last, prev, balanced - last_len);
            self.update_child(id, len - 2);
        }
        if !self.node(last).is_leaf() {
            self.rebalance_last_child(last);
        }
        self.update_child(id, len - 1);
        self.refresh_collapsed(id);
    }

    // Insertion

    /// Insert a line at `line` below `id`. Returns the new right sibling if `id` was split.
    fn insert_line_at(&mut self, id: NodeId, line: usize, height: f64) -> Option<NodeId> {
        if self.node(id).is_leaf() {
            self.leaf_insert_line(id, line, height)
        } else {
            self.inner_insert_line(id, line, height)
        }
    }

    fn leaf_insert_line(&mut self, leaf: NodeId, line: usize, height: f64) -> Option<NodeId> {
        let mut new_leaf = None;
        if self.node(leaf).len() == MAX_CHILDREN {
            let split = MAX_CHILDREN / 2;
            let sibling = self.alloc(Node::leaf());
            self.steal_from_predecessor(sibling, leaf, MAX_CHILDREN - split);
            if line >= split {
                self.leaf_insert_line(sibling, line - split, height);
                return Some(sibling);
            }
            new_leaf = Some(sibling);
        }
        self.make_gap(leaf, line, 1);
        self.node_mut(leaf).heights[line] = height;
        new_leaf
    }

    fn inner_insert_line(&mut self, id: NodeId, line: usize, height: f64) -> Option<NodeId> {
        let (child_index, line_in_child) = self.node(id).find_child_for_line(line);
        let child = self.node(id).children()[child_index];
        let new_child = self.insert_line_at(child, line_in_child, height);
        let mut recompute = self.update_child(id, child_index);
        let mut new_sibling = None;
        if let Some(new_child) = new_child {
            if self.node(id).len() == MAX_CHILDREN {
                let split = MAX_CHILDREN / 2;
                let sibling = self.alloc(Node::inner());
                self.steal_from_predecessor(sibling, id, MAX_CHILDREN - split);
                if child_index < split {
                    recompute |= self.insert_child(id, child_index + 1, new_child);
                } else {
                    self.insert_child(sibling, child_index + 1 - split, new_child);
                    self.refresh_collapsed(sibling);
                }
                new_sibling = Some(sibling);
            } else {
                recompute |= self.insert_child(id, child_index + 1, new_child);
            }
        }
        if recompute {
            self.refresh_collapsed(id);
        }
        new_sibling
    }

    // Deletion

    fn delete_line_at(
        &mut self,
        id: NodeId,
        line: usize,
        predecessor: Option<NodeId>,
        successor: Option<NodeId>,
    ) -> Deletion {
        if self.node(id).is_leaf() {
            self.leaf_delete_line(id, line, predecessor, successor)
        } else {
            self.inner_delete_line(id, line, predecessor, successor)
        }
    }

    fn leaf_delete_line(
        &mut self,
        leaf: NodeId,
        line: usize,
        predecessor: Option<NodeId>,
        successor: Option<NodeId>,
    ) -> Deletion {
        let mut result = self.move_events_off_line(leaf, line, predecessor, successor);
        self.perform_deletion(leaf, line, line + 1, false);
        if self.node(leaf).len() < MIN_CHILDREN {
            self.rebalance(leaf, predecessor, successor, &mut result);
        }
        result
    }

    /// Sections starting or ending on the line about to be deleted move to the neighbouring line.
    fn move_events_off_line(
        &mut self,
        leaf: NodeId,
        line: usize,
        predecessor: Option<NodeId>,
        successor: Option<NodeId>,
    ) -> Deletion {
        let mut result = Deletion::default();
        let len = self.node(leaf).len();
        let events = std::mem::take(&mut self.node_mut(leaf).events);
        let mut kept: SmallVec<[Event; 2]> = SmallVec::new();
        let mut dissolved = Vec::new();
        for mut event in events {
            if event.position as usize != line {
                kept.push(event);
                continue;
            }
            let Some(state) = self.state(event.section).copied() else {
                continue;
            };
            if state.start_leaf == state.end_leaf && state.start_index == state.end_index {
                // Single-line section: both events are in this leaf and both go.
                dissolved.push(event.section);
                continue;
            }
            match event.kind {
                EventKind::Start if line + 1 < len => {
                    event.position += 1;
                    self.place_section_end(&event, leaf, event.position);
                    kept.push(event);
                }
                EventKind::Start => {
                    debug_assert!(successor.is_some(), "section start on the last line");
                    let Some(successor) = successor else {
                        continue;
                    };
                    event.position = 0;
                    self.place_section_end(&event, successor, 0);
                    self.node_mut(successor).events.push(event);
                    self.refresh_collapsed(successor);
                    result.successor_changed = true;
                }
                EventKind::End if line > 0 => {
                    event.position -= 1;
                    self.place_section_end(&event, leaf, event.position);
                    kept.push(event);
                }
                EventKind::End => {
                    debug_assert!(predecessor.is_some(), "section end on the first line");
                    let Some(predecessor) = predecessor else {
                        continue;
                    };
                    let last = (self.node(predecessor).len() - 1) as u8;
                    event.position = last;
                    self.place_section_end(&event, predecessor, last);
                    self.node_mut(predecessor).events.push(event);
                    self.refresh_collapsed(predecessor);
                    result.predecessor_changed = true;
                }
            }
        }
        // The collapsed bits of `leaf` are left alone: the line is about to be removed.
        self.node_mut(leaf).events = kept;
        for section in dissolved {
            self.reset_section(section);
        }
        result
    }

    fn inner_delete_line(
        &mut self,
        id: NodeId,
        line: usize,
        predecessor: Option<NodeId>,
        successor: Option<NodeId>,
    ) -> Deletion {
        let (child_index, line_in_child) = self.node(id).find_child_for_line(line);
        let len = self.node(id).len();
        let (pred_parent, pred_index) = if child_index > 0 {
            (Some(id), child_index - 1)
        } else {
            let last = predecessor.map_or(0, |prev| self.node(prev).len().saturating_sub(1));
            (predecessor, last)
        };
        let (succ_parent, succ_index) = if child_index + 1 < len {
            (Some(id), child_index + 1)
        } else {
            (successor, 0)
        };
        let child = self.node(id).children()[child_index];
        let child_pred = pred_parent.map(|parent| self.node(parent).children()[pred_index]);
        let child_succ = succ_parent.map(|parent| self.node(parent).children()[succ_index]);
        let child_result = self.delete_line_at(child, line_in_child, child_pred, child_succ);

        let mut result = Deletion::default();
        let mut recompute = false;
        if child_result.predecessor_changed
            && let Some(parent) = pred_parent
        {
            let changed = self.update_child(parent, pred_index);
            if parent == id {
                recompute |= changed;
            } else {
                result.predecessor_changed = true;
                if changed {
                    self.refresh_collapsed(parent);
                }
            }
        }
        if child_result.successor_changed
            && let Some(parent) = succ_parent
        {
            let changed = self.update_child(parent, succ_index);
            if parent == id {
                recompute |= changed;
            } else {
                result.successor_changed = true;
                if changed {
                    self.refresh_collapsed(parent);
                }
            }
        }
        if child_result.node_deleted {
            debug_assert_eq!(self.node(child).line_count(), 0);
            self.perform_deletion(id, child_index, child_index + 1, true);
            self.free(child);
            recompute = true;
            // Stealing recomputes the bits itself; a merged node is about to be dropped.
            if self.node(id).len() < MIN_CHILDREN
                && self.rebalance(id, predecessor, successor, &mut result)
            {
                recompute = false;
            }
        } else {
            recompute |= self.update_child(id, child_index);
        }
        if recompute {
            self.refresh_collapsed(id);
        }
        result
    }

    // Collapse

    fn add_collapsed_section(&mut self, id: NodeId, start: isize, end: isize, section: CollapsedLineSection) {
        debug_assert!(start <= end);
        if self.node(id).is_leaf() {
            self.leaf_add_collapsed_section(id, start, end, section);
            return;
        }
        let line_count = self.node(id).line_count() as isize;
        let starts_here = (0..line_count).contains(&start);
        let ends_here = (0..line_count).contains(&end);
        debug_assert!(starts_here || ends_here);
        if starts_here && ends_here {
            let (start_index, start_in_child) = self.node(id).find_child_for_line(start as usize);
            let (end_index, end_in_child) = self.node(id).find_child_for_line(end as usize);
            if start_index == end_index {
                let child = self.node(id).children()[start_index];
                self.add_collapsed_section(child, start_in_child as isize, end_in_child as isize, section);
                self.update_child_height(id, start_index);
                return;
            }
        }
        if starts_here {
            let (start_index, start_in_child) = self.node(id).find_child_for_line(start as usize);
            let child = self.node(id).children()[start_index];
            let shift = start_in_child as isize - start;
            self.add_collapsed_section(child, start + shift, end + shift, section);
            self.update_child_height(id, start_index);
            self.node_mut(id).events.push(Event {
                section,
                kind: EventKind::Start,
                position: start_index as u8,
            });
        }
        if ends_here {
            let (end_index, end_in_child) = self.node(id).find_child_for_line(end as usize);
            let child = self.node(id).children()[end_index];
            let shift = end_in_child as isize - end;
            self.add_collapsed_section(child, start + shift, end + shift, section);
            self.update_child_height(id, end_index);
            self.node_mut(id).events.push(Event {
                section,
                kind: EventKind::End,
                position: end_index as u8,
            });
        }
        self.refresh_collapsed(id);
    }

    fn leaf_add_collapsed_section(&mut self, leaf: NodeId, start: isize, end: isize, section: CollapsedLineSection) {
        let len = self.node(leaf).len() as isize;
        for (kind, line) in [(EventKind::Start, start), (EventKind::End, end)] {
            if !(0..len).contains(&line) {
                continue;
            }
            let event = Event {
                section,
                kind,
                position: line as u8,
            };
            self.place_section_end(&event, leaf, event.position);
            self.node_mut(leaf).events.push(event);
        }
        self.refresh_collapsed(leaf);
    }

    fn collect_sections(&self, id: NodeId, sections: &mut Vec<CollapsedLineSection>) {
        let node = self.node(id);
        if node.is_leaf() {
            let mut starts: Vec<&Event> = node
                .events
                .iter()
                .filter(|event| event.kind == EventKind::Start)
                .collect();
            starts.sort_by_key(|event| event.position);
            sections.extend(starts.into_iter().map(|event| event.section));
            return;
        }
        for &child in node.children() {
            self.collect_sections(child, sections);
        }
    }

    fn replace_heights(&mut self, id: NodeId, old: f64, new: f64) {
        if self.node(id).is_leaf() {
            let node = self.node_mut(id);
            let len = node.len();
            for height in &mut node.heights[..len] {
                if *height == old {
                    *height = new;
                }
            }
            return;
        }
        for index in 0..self.node(id).len() {
            let child = self.node(id).children()[index];
            self.replace_heights(child, old, new);
            self.update_child_height(id, index);
        }
    }

    // Diagnostics

    fn check_node(&self, id: NodeId, is_root: bool) {
        let node = self.node(id);
        assert!(node.len() <= MAX_CHILDREN);
        if !is_root {
            assert!(node.len() >= MIN_CHILDREN, "node {id:?} is underfull");
            let parent = node.parent.map(|parent| self.node(parent));
            assert_eq!(
                parent.map(|parent| parent.children()[node.index_in_parent as usize]),
                Some(id),
                "parent link of {id:?} is broken"
            );
        }
        assert_eq!(
            node.collapsed,
            self.recompute_collapsed_bits(id),
            "stale collapsed bits in {id:?}"
        );
        if !node.is_leaf() {
            if is_root {
                assert!(node.len() >= 2, "inner root with a single child");
            }
            for (index, &child) in node.children().iter().enumerate() {
                self.check_node(child, false);
                let child = self.node(child);
                assert_eq!(node.heights[index], child.total_height());
                assert_eq!(node.line_counts()[index], child.line_count());
            }
        }
        for event in &node.events {
            let position = event.position as usize;
            assert!(position < node.len(), "event outside of {id:?}");
            let found = match event.kind {
                EventKind::Start => self.start_within(event.section, id),
                EventKind::End => self.end_within(event.section, id),
            };
            assert_eq!(found, Some(position), "misplaced {event:?} in {id:?}");
        }
    }

    fn append_node(&self, out: &mut String, id: NodeId, indent: usize, mut line_number: usize) {
        let node = self.node(id);
        if node.is_leaf() {
            let _ = writeln!(
                out,
                "leaf (LineCount={}, TotalHeight={})",
                node.len(),
                node.total_height()
            );
            for i in 0..node.len() {
                let _ = writeln!(
                    out,
                    "{:indent$}[{i}] @{} height={}, collapsed={}",
                    "",
                    line_number + i,
                    node.heights[i],
                    node.is_collapsed(i),
                    indent = indent + 2
                );
            }
        } else {
            let _ = writeln!(
                out,
                "inner (childCount={}, LineCount={}, TotalHeight={}, collapsed={:x})",
                node.len(),
                node.line_count(),
                node.total_height(),
                node.collapsed
            );
            for (i, &child) in node.children().iter().enumerate() {
                let _ = write!(out, "{:indent$}[{i}] ", "", indent = indent + 2);
                self.append_node(out, child, indent + 2, line_number);
                line_number += node.line_counts()[i];
            }
        }
        for event in &node.events {
            let _ = writeln!(
                out,
                "{:indent$}{:?} {} {:?}",
                "",
                event.kind,
                event.position,
                event.section,
                indent = indent + 2
            );
        }
    }
}

/// Mask with the bits `start..end` set.
fn bits_between(start: usize, end: usize) -> u16 {
    let width = end.saturating_sub(start);
    (((1u32 << width) - 1) << start) as u16
}

impl HeightTree {
    /// The tree was edited directly and no longer mirrors the document; start over with
    /// `line_count` lines of default height.
    fn resync(&mut self, line_count: usize) {
        warn!(
            lines = self.line_count(),
            document_lines = line_count,
            "height tree out of sync with its document, rebuilding"
        );
        self.rebuild(line_count);
    }
}

impl LineTracker for HeightTree {
    fn before_remove_line(&mut self, line: DocumentLine<'_>) {
        // The line is still part of the document.
        let line_count = line.line_tree().line_count();
        if self.line_count() == line_count {
            self.delete_line_index(line.line_number() - 1);
        } else {
            self.resync(line_count - 1);
        }
    }

    fn line_inserted(&mut self, _insertion_pos: DocumentLine<'_>, new_line: DocumentLine<'_>) {
        let line_count = new_line.line_tree().line_count();
        if self.line_count() + 1 == line_count {
            self.insert_line_index(new_line.line_number() - 1);
        } else {
            self.resync(line_count);
        }
    }

    fn rebuild_document(&mut self, lines: &LineTree) {
        self.rebuild(lines.line_count());
    }

    fn change_complete(&mut self, _change: &DocumentChange) {
        #[cfg(debug_assertions)]
        self.check_invariants();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_five_lines_with_collapsed_middle() {
        let mut tree = HeightTree::new(5, 20.0);
        assert_eq!(tree.total_height(), 100.0);

        let section = tree.collapse_text(2, 4).unwrap();
        assert_eq!(tree.total_height(), 40.0);
        assert_eq!(tree.get_line_by_visual_position(20.0), 5);
        assert_eq!(tree.get_visual_position(5).unwrap(), 20.0);
        assert!(tree.is_collapsed(3).unwrap());
        assert!(!tree.is_collapsed(5).unwrap());
        assert_eq!(tree.section_start(section), Some(2));
        assert_eq!(tree.section_end(section), Some(4));
    }

    #[test]
    fn test_uncollapse_restores_heights() {
        let mut tree = HeightTree::new(100, 10.0);
        tree.set_height(40, 25.0).unwrap();
        let before = tree.total_height();

        let section = tree.collapse_text(10, 90).unwrap();
        assert_eq!(tree.total_height(), before - 825.0);
        assert!(tree.is_section_collapsed(section));

        tree.uncollapse(section);
        assert!(!tree.is_section_collapsed(section));
        assert_eq!(tree.section_start(section), None);
        assert_eq!(tree.total_height(), before);
        assert_eq!(tree.get_height(40).unwrap(), 25.0);
        tree.check_invariants();

        // Uncollapsing twice is a no-op.
        tree.uncollapse(section);
        assert_eq!(tree.total_height(), before);
    }

    #[test]
    fn test_visual_position_round_trip() {
        let mut tree = HeightTree::new(300, 12.0);
        for line in (1..=300).step_by(7) {
            tree.set_height(line, 30.0).unwrap();
        }
        for line in 1..=300 {
            let top = tree.get_visual_position(line).unwrap();
            assert_eq!(tree.get_line_by_visual_position(top), line);
        }
        assert_eq!(tree.get_line_by_visual_position(1.0e9), 300);
    }

    #[test]
    fn test_insert_splits_and_delete_merges() {
        let mut tree = HeightTree::new(1, 10.0);
        for line in 2..=1000 {
            tree.insert_line(line).unwrap();
        }
        tree.check_invariants();
        assert_eq!(tree.line_count(), 1000);
        assert_eq!(tree.total_height(), 10_000.0);

        for _ in 0..990 {
            tree.delete_line(1).unwrap();
        }
        tree.check_invariants();
        assert_eq!(tree.line_count(), 10);
        assert_eq!(tree.total_height(), 100.0);
    }

    #[test]
    fn test_deleting_boundary_lines_moves_section() {
        let mut tree = HeightTree::new(60, 10.0);
        let section = tree.collapse_text(15, 40).unwrap();

        tree.delete_line(15).unwrap();
        tree.check_invariants();
        assert_eq!(tree.section_start(section), Some(15));
        assert_eq!(tree.section_end(section), Some(39));

        tree.delete_line(39).unwrap();
        tree.check_invariants();
        assert_eq!(tree.section_end(section), Some(38));
        assert_eq!(tree.total_height(), (58 - 24) as f64 * 10.0);
    }

    #[test]
    fn test_deleting_single_line_section_dissolves_it() {
        let mut tree = HeightTree::new(20, 10.0);
        let section = tree.collapse_text(7, 7).unwrap();
        assert_eq!(tree.total_height(), 190.0);

        tree.delete_line(7).unwrap();
        assert!(!tree.is_section_collapsed(section));
        assert!(tree.collapsed_sections().is_empty());
        assert_eq!(tree.total_height(), 190.0);
        tree.check_invariants();
    }

    #[test]
    fn test_rebuild_resets_sections() {
        let mut tree = HeightTree::new(50, 10.0);
        let section = tree.collapse_text(1, 50).unwrap();
        assert_eq!(tree.total_height(), 0.0);
        assert_eq!(tree.collapsed_sections(), vec![section]);

        tree.rebuild(70);
        assert!(!tree.is_section_collapsed(section));
        assert_eq!(tree.total_height(), 700.0);
        tree.check_invariants();
    }

    #[test]
    fn test_default_height_is_pushed_down() {
        let mut tree = HeightTree::new(40, 10.0);
        tree.set_height(3, 14.0).unwrap();
        tree.set_default_line_height(12.0);
        assert_eq!(tree.get_height(1).unwrap(), 12.0);
        assert_eq!(tree.get_height(3).unwrap(), 14.0);
        assert_eq!(tree.total_height(), 39.0 * 12.0 + 14.0);
        tree.insert_line(41).unwrap();
        assert_eq!(tree.get_height(41).unwrap(), 12.0);
    }

    #[test]
    fn test_invalid_arguments() {
        let mut tree = HeightTree::new(3, 10.0);
        assert_eq!(
            tree.collapse_text(3, 2),
            Err(DocumentError::InvalidSectionRange { start: 3, end: 2 })
        );
        assert_eq!(
            tree.get_height(4),
            Err(DocumentError::LineNumberOutOfRange {
                line: 4,
                line_count: 3
            })
        );
        assert!(tree.insert_line(5).is_err());
        assert!(tree.delete_line(0).is_err());
    }

    #[test]
    fn test_tree_as_string_lists_lines() {
        let mut tree = HeightTree::new(2, 10.0);
        tree.collapse_text(2, 2).unwrap();
        let dump = tree.tree_as_string();
        assert!(dump.starts_with("leaf (LineCount=2, TotalHeight=10)"));
        assert!(dump.contains("[1] @2 height=10, collapsed=true"));
    }
}
