//! Document line index.
//!
//! Lines are nodes of a red-black tree ordered by document position. Each subtree caches its line
//! count and its total character length, so line-number and offset lookups run in O(log n) in both
//! directions. Lines are identified by [`LineId`]; a [`DocumentLine`] is a borrowed view of a line
//! that is still part of the document.

use std::collections::HashMap;
use std::fmt;

use crate::error::{DocumentError, Result};
use crate::rb_tree::{Measured, NodeId, RbTree};

/// Stable identity of a line.
///
/// The id stays valid while the line exists. Once the line is removed (its delimiter was deleted
/// and it merged with a neighbor), [`LineTree::is_deleted`] reports `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineId(NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct LineNode {
    pub(crate) total_length: usize,
    pub(crate) delimiter_length: usize,
}

impl LineNode {
    /// Length without the delimiter.
    pub(crate) fn text_length(&self) -> usize {
        self.total_length - self.delimiter_length
    }

    fn lengths(&self) -> LineLengths {
        LineLengths {
            total_length: self.total_length,
            delimiter_length: self.delimiter_length,
        }
    }
}

impl Measured for LineNode {
    fn length(&self) -> usize {
        self.total_length
    }
}

/// Lengths of a line. Deleted lines keep the lengths they had when they were removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineLengths {
    /// Length including the delimiter.
    pub total_length: usize,
    /// Delimiter length (0, 1 or 2).
    pub delimiter_length: usize,
}

impl LineLengths {
    /// Length without the delimiter.
    pub fn length(&self) -> usize {
        self.total_length - self.delimiter_length
    }
}

/// A 1-based (line, column) position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TextLocation {
    /// Line number, starting at 1.
    pub line: usize,
    /// Column, starting at 1.
    pub column: usize,
}

impl TextLocation {
    /// Create a location.
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    /// The `(0, 0)` location used as "no location".
    pub fn is_empty(&self) -> bool {
        self.line == 0 && self.column == 0
    }
}

impl fmt::Display for TextLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Line {} Col {})", self.line, self.column)
    }
}

/// Balanced tree of document lines.
#[derive(Debug, Clone)]
pub struct LineTree {
    tree: RbTree<LineNode>,
    /// Final lengths of deleted lines whose slots were recycled.
    tombstones: HashMap<LineId, LineLengths>,
}

impl Default for LineTree {
    fn default() -> Self {
        Self::new()
    }
}

impl LineTree {
    /// A tree holding a single empty line.
    pub fn new() -> Self {
        let mut tree = RbTree::new();
        tree.insert_before(None, LineNode::default());
        Self {
            tree,
            tombstones: HashMap::new(),
        }
    }

    /// Number of lines; never zero.
    pub fn line_count(&self) -> usize {
        self.tree.len()
    }

    /// Sum of all line lengths, which equals the text length.
    pub fn text_length(&self) -> usize {
        self.tree.total_length()
    }

    /// Line with the 1-based number `number`.
    pub fn get_by_number(&self, number: usize) -> Result<DocumentLine<'_>> {
        let line_count = self.line_count();
        if number == 0 || number > line_count {
            return Err(DocumentError::LineNumberOutOfRange {
                line: number,
                line_count,
            });
        }
        self.tree
            .find_by_index(number - 1)
            .map(|id| self.view(LineId(id)))
            .ok_or(DocumentError::LineNumberOutOfRange {
                line: number,
                line_count,
            })
    }

    /// Line containing `offset`. An offset at the end of a line's delimiter belongs to the next
    /// line; the text length maps to the last line.
    pub fn get_by_offset(&self, offset: usize) -> Result<DocumentLine<'_>> {
        let length = self.text_length();
        if offset > length {
            return Err(DocumentError::OffsetOutOfRange { offset, length });
        }
        let id = if offset == length {
            self.tree.last()
        } else {
            self.tree.find_by_offset(offset).map(|(id, _)| id)
        };
        id.map(|id| self.view(LineId(id)))
            .ok_or(DocumentError::OffsetOutOfRange { offset, length })
    }

    /// View of a line that is still part of the document.
    pub fn line(&self, id: LineId) -> Option<DocumentLine<'_>> {
        self.tree.contains(id.0).then(|| self.view(id))
    }

    /// `true` once a line has been removed from the document.
    pub fn is_deleted(&self, id: LineId) -> bool {
        !self.tree.contains(id.0)
    }

    /// Lengths of a line; for a deleted line these are the values it had when it was removed.
    pub fn line_lengths(&self, id: LineId) -> Option<LineLengths> {
        match self.tree.value(id.0) {
            Some(node) => Some(node.lengths()),
            None => self.tombstones.get(&id).copied(),
        }
    }

    /// The first line.
    pub fn first_line(&self) -> DocumentLine<'_> {
        // The tree is never empty outside of `rebuild`.
        self.view(LineId(self.tree.first().unwrap_or(NodeId::DANGLING)))
    }

    /// Iterate over all lines in document order.
    pub fn lines(&self) -> impl Iterator<Item = DocumentLine<'_>> + '_ {
        self.tree.iter().map(move |id| self.view(LineId(id)))
    }

    /// 1-based (line, column) to offset. Columns before the line start clamp to the line start,
    /// columns past the end of the line clamp to the line end (before the delimiter).
    pub fn get_offset(&self, line: usize, column: usize) -> Result<usize> {
        let document_line = self.get_by_number(line)?;
        if column == 0 {
            return Ok(document_line.offset());
        }
        if column > document_line.length() {
            return Ok(document_line.end_offset());
        }
        Ok(document_line.offset() + column - 1)
    }

    /// Offset to 1-based (line, column).
    pub fn get_location(&self, offset: usize) -> Result<TextLocation> {
        let line = self.get_by_offset(offset)?;
        Ok(TextLocation::new(
            line.line_number(),
            offset - line.offset() + 1,
        ))
    }

    fn view(&self, id: LineId) -> DocumentLine<'_> {
        DocumentLine { tree: self, id }
    }

    pub(crate) fn node(&self, id: LineId) -> LineNode {
        self.tree.value(id.0).copied().unwrap_or_default()
    }

    /// Id and start offset of the line containing `offset`, with the same end-of-text rule as
    /// [`LineTree::get_by_offset`].
    pub(crate) fn locate(&self, offset: usize) -> Option<(LineId, usize)> {
        let line = self.get_by_offset(offset).ok()?;
        Some((line.id, line.offset()))
    }

    pub(crate) fn offset_of(&self, id: LineId) -> usize {
        self.tree.offset_of(id.0).unwrap_or(0)
    }

    pub(crate) fn next_id(&self, id: LineId) -> Option<LineId> {
        self.tree.next(id.0).map(LineId)
    }

    pub(crate) fn prev_id(&self, id: LineId) -> Option<LineId> {
        self.tree.prev(id.0).map(LineId)
    }

    pub(crate) fn insert_line_after(&mut self, after: LineId, total_length: usize) -> LineId {
        LineId(self.tree.insert_after(
            Some(after.0),
            LineNode {
                total_length,
                delimiter_length: 0,
            },
        ))
    }

    pub(crate) fn remove_line(&mut self, id: LineId) {
        self.tree.remove(id.0);
    }

    pub(crate) fn set_total_length(&mut self, id: LineId, total_length: usize) {
        if let Some(node) = self.tree.value_mut(id.0) {
            node.total_length = total_length;
            self.tree.refresh(id.0);
        }
    }

    pub(crate) fn set_delimiter_length(&mut self, id: LineId, delimiter_length: usize) {
        if let Some(node) = self.tree.value_mut(id.0) {
            node.delimiter_length = delimiter_length;
        }
    }

    /// Replace all lines. The first line keeps its id; every other line is deleted.
    pub(crate) fn rebuild(&mut self, lines: &[LineNode]) {
        let first = self.tree.first();
        self.tree.clear_except(first);
        let mut ids = Vec::with_capacity(lines.len().max(1));
        for (i, node) in lines.iter().enumerate() {
            if i == 0
                && let Some(first) = first
                && let Some(value) = self.tree.value_mut(first)
            {
                *value = *node;
                ids.push(first);
                continue;
            }
            ids.push(self.tree.alloc_unlinked(*node));
        }
        if ids.is_empty() {
            ids.push(self.tree.alloc_unlinked(LineNode::default()));
        }
        self.tree.build_balanced(&ids);
    }

    /// Release deleted lines so their slots can be reused. Their lengths stay readable.
    pub(crate) fn reclaim_deleted(&mut self) {
        for (id, node) in self.tree.reclaim_detached() {
            self.tombstones.insert(LineId(id), node.lengths());
        }
    }

    /// Panics if the tree or the delimiter bookkeeping is inconsistent.
    pub fn check_invariants(&self) {
        self.tree.check_invariants();
        let count = self.line_count();
        assert!(count >= 1, "a document always has one line");
        for (i, line) in self.lines().enumerate() {
            let node = self.node(line.id);
            assert!(node.delimiter_length <= 2, "delimiter length out of range");
            assert!(node.delimiter_length <= node.total_length);
            if i + 1 == count {
                assert_eq!(node.delimiter_length, 0, "last line has a delimiter");
            } else {
                assert!(node.delimiter_length > 0, "inner line without delimiter");
            }
        }
    }
}

/// Borrowed view of a line in the document.
#[derive(Clone, Copy)]
pub struct DocumentLine<'a> {
    tree: &'a LineTree,
    id: LineId,
}

impl<'a> DocumentLine<'a> {
    /// Stable id of this line.
    pub fn id(&self) -> LineId {
        self.id
    }

    /// The tree this line belongs to.
    pub(crate) fn line_tree(&self) -> &'a LineTree {
        self.tree
    }

    /// 1-based line number, O(log n).
    pub fn line_number(&self) -> usize {
        self.tree.tree.index_of(self.id.0).map_or(0, |index| index + 1)
    }

    /// Start offset of the line, O(log n).
    pub fn offset(&self) -> usize {
        self.tree.offset_of(self.id)
    }

    /// Length without the delimiter.
    pub fn length(&self) -> usize {
        self.tree.node(self.id).text_length()
    }

    /// Length including the delimiter.
    pub fn total_length(&self) -> usize {
        self.tree.node(self.id).total_length
    }

    /// Delimiter length: 0 for the last line, otherwise 1 or 2.
    pub fn delimiter_length(&self) -> usize {
        self.tree.node(self.id).delimiter_length
    }

    /// Offset directly before the delimiter.
    pub fn end_offset(&self) -> usize {
        self.offset() + self.length()
    }

    /// The following line, if any.
    pub fn next_line(&self) -> Option<DocumentLine<'a>> {
        self.tree.tree.next(self.id.0).map(|id| self.tree.view(LineId(id)))
    }

    /// The preceding line, if any.
    pub fn previous_line(&self) -> Option<DocumentLine<'a>> {
        self.tree.tree.prev(self.id.0).map(|id| self.tree.view(LineId(id)))
    }
}

impl PartialEq for DocumentLine<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tree, other.tree) && self.id == other.id
    }
}

impl Eq for DocumentLine<'_> {}

impl fmt::Debug for DocumentLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentLine")
            .field("number", &self.line_number())
            .field("offset", &self.offset())
            .field("length", &self.length())
            .field("delimiter_length", &self.delimiter_length())
            .finish()
    }
}
