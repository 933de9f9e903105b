//! Incremental line index maintenance.
//!
//! The text buffer is always mutated first; the [`LineManager`] then brings the [`LineTree`] in
//! line with the new text. Removal merges the lines whose delimiters were deleted, insertion splits
//! lines at every new delimiter. A delimiter is re-read from the text whenever a line length
//! changes, which keeps `"\r"` + `"\n"` pairs joined into a single `"\r\n"` delimiter no matter how
//! they were assembled.
//!
//! Other structures that are indexed by line (for example the height tree) implement
//! [`LineTracker`] and are notified of every structural change as it happens.

use std::any::Any;
use std::fmt;

use ropey::Rope;

use crate::change::DocumentChange;
use crate::line_ending::{NewLines, newlines};
use crate::line_tree::{DocumentLine, LineId, LineNode, LineTree};

/// Observer of line structure changes.
///
/// Callbacks run while the line tree is being updated: the tree is consistent with respect to the
/// line passed in, but lines further down may still have stale lengths. Do not query offsets of
/// other lines from a callback.
pub trait LineTracker: Any + Send {
    /// `line` is about to be removed. Its line number is still valid.
    fn before_remove_line(&mut self, line: DocumentLine<'_>);

    /// The total length of `line` is about to change to `new_total_length`.
    fn set_line_length(&mut self, _line: DocumentLine<'_>, _new_total_length: usize) {}

    /// `new_line` was inserted directly after `insertion_pos`.
    fn line_inserted(&mut self, insertion_pos: DocumentLine<'_>, new_line: DocumentLine<'_>);

    /// The whole line index was rebuilt from scratch.
    fn rebuild_document(&mut self, lines: &LineTree);

    /// A document change finished and every structure is consistent again.
    fn change_complete(&mut self, _change: &DocumentChange) {}
}

/// Handle returned when registering a [`LineTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineTrackerToken(u64);

/// Registered line trackers in registration order.
#[derive(Default)]
pub(crate) struct LineTrackers {
    entries: Vec<(LineTrackerToken, Box<dyn LineTracker>)>,
    next_token: u64,
}

impl fmt::Debug for LineTrackers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineTrackers")
            .field("count", &self.entries.len())
            .finish()
    }
}

impl LineTrackers {
    pub(crate) fn add(&mut self, tracker: Box<dyn LineTracker>) -> LineTrackerToken {
        let token = LineTrackerToken(self.next_token);
        self.next_token += 1;
        self.entries.push((token, tracker));
        token
    }

    pub(crate) fn remove(&mut self, token: LineTrackerToken) -> Option<Box<dyn LineTracker>> {
        let index = self.entries.iter().position(|(t, _)| *t == token)?;
        Some(self.entries.remove(index).1)
    }

    /// First tracker of type `T`.
    pub(crate) fn get<T: LineTracker>(&self) -> Option<&T> {
        self.entries
            .iter()
            .find_map(|(_, tracker)| (&**tracker as &dyn Any).downcast_ref::<T>())
    }

    pub(crate) fn get_mut<T: LineTracker>(&mut self) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find_map(|(_, tracker)| (&mut **tracker as &mut dyn Any).downcast_mut::<T>())
    }

    /// Tracker registered under `token`, if it has type `T`.
    pub(crate) fn get_by_token<T: LineTracker>(&self, token: LineTrackerToken) -> Option<&T> {
        self.entries
            .iter()
            .find(|(t, _)| *t == token)
            .and_then(|(_, tracker)| (&**tracker as &dyn Any).downcast_ref::<T>())
    }

    pub(crate) fn get_by_token_mut<T: LineTracker>(
        &mut self,
        token: LineTrackerToken,
    ) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|(t, _)| *t == token)
            .and_then(|(_, tracker)| (&mut **tracker as &mut dyn Any).downcast_mut::<T>())
    }

    fn before_remove_line(&mut self, line: DocumentLine<'_>) {
        for (_, tracker) in &mut self.entries {
            tracker.before_remove_line(line);
        }
    }

    fn set_line_length(&mut self, line: DocumentLine<'_>, new_total_length: usize) {
        for (_, tracker) in &mut self.entries {
            tracker.set_line_length(line, new_total_length);
        }
    }

    fn line_inserted(&mut self, insertion_pos: DocumentLine<'_>, new_line: DocumentLine<'_>) {
        for (_, tracker) in &mut self.entries {
            tracker.line_inserted(insertion_pos, new_line);
        }
    }

    fn rebuild_document(&mut self, lines: &LineTree) {
        for (_, tracker) in &mut self.entries {
            tracker.rebuild_document(lines);
        }
    }

    pub(crate) fn change_complete(&mut self, change: &DocumentChange) {
        for (_, tracker) in &mut self.entries {
            tracker.change_complete(change);
        }
    }
}

/// Updates a [`LineTree`] after the text it describes was changed.
pub(crate) struct LineManager<'a> {
    lines: &'a mut LineTree,
    text: &'a Rope,
    trackers: &'a mut LineTrackers,
}

impl<'a> LineManager<'a> {
    /// `text` must already contain the change that is about to be applied.
    pub(crate) fn new(
        lines: &'a mut LineTree,
        text: &'a Rope,
        trackers: &'a mut LineTrackers,
    ) -> Self {
        Self {
            lines,
            text,
            trackers,
        }
    }

    /// Rebuild every line from the text in O(n).
    pub(crate) fn rebuild(&mut self) {
        let mut nodes = Vec::new();
        let mut last_delimiter_end = 0;
        for newline in NewLines::new(self.text.chars()) {
            nodes.push(LineNode {
                total_length: newline.end() - last_delimiter_end,
                delimiter_length: newline.length,
            });
            last_delimiter_end = newline.end();
        }
        nodes.push(LineNode {
            total_length: self.text.len_chars() - last_delimiter_end,
            delimiter_length: 0,
        });
        self.lines.rebuild(&nodes);
        self.trackers.rebuild_document(self.lines);
    }

    /// `length` characters at `offset` were removed from the text.
    pub(crate) fn remove(&mut self, offset: usize, length: usize) {
        if length == 0 {
            return;
        }
        let Some((start_line, start_offset)) = self.lines.locate(offset) else {
            return;
        };
        let start = self.lines.node(start_line);
        debug_assert!(offset < start_offset + start.total_length);
        if offset > start_offset + start.text_length() {
            // The removal starts between '\r' and '\n'.
            debug_assert_eq!(start.delimiter_length, 2);
            self.set_line_length(start_line, start.total_length - 1);
            self.remove(offset, length - 1);
            return;
        }
        if offset + length < start_offset + start.total_length {
            self.set_line_length(start_line, start.total_length - length);
            return;
        }

        // The delimiter of the start line was removed; merge with the end line.
        let removed_in_start_line = start_offset + start.total_length - offset;
        let Some((end_line, end_offset)) = self.lines.locate(offset + length) else {
            return;
        };
        if end_line == start_line {
            // Removal up to the end of the document.
            self.set_line_length(start_line, start.total_length - length);
            return;
        }
        let left_in_end_line =
            end_offset + self.lines.node(end_line).total_length - (offset + length);

        let mut next = self.lines.next_id(start_line);
        while let Some(line) = next {
            next = self.lines.next_id(line);
            self.remove_line(line);
            if line == end_line {
                break;
            }
        }
        self.set_line_length(
            start_line,
            start.total_length - removed_in_start_line + left_in_end_line,
        );
    }

    /// `text` was inserted into the text at `offset`.
    pub(crate) fn insert(&mut self, offset: usize, text: &str) {
        let Some((mut line, line_offset)) = self.lines.locate(offset) else {
            return;
        };
        let node = self.lines.node(line);
        debug_assert!(offset <= line_offset + node.total_length);
        if offset > line_offset + node.text_length() {
            // Inserting between '\r' and '\n': split the delimiter first.
            debug_assert_eq!(node.delimiter_length, 2);
            self.set_line_length(line, node.total_length - 1);
            line = self.insert_line_after(line, 1);
            line = self.set_line_length(line, 1);
        }

        let inserted_length = text.chars().count();
        let mut found = newlines(text).peekable();
        if found.peek().is_none() {
            let total = self.lines.node(line).total_length;
            self.set_line_length(line, total + inserted_length);
            return;
        }
        let mut last_delimiter_end = 0;
        for newline in found {
            let line_break_offset = offset + newline.end();
            let line_offset = self.lines.offset_of(line);
            let length_after_insertion_pos = line_offset + self.lines.node(line).total_length
                - (offset + last_delimiter_end);
            line = self.set_line_length(line, line_break_offset - line_offset);
            let new_line = self.insert_line_after(line, length_after_insertion_pos);
            line = self.set_line_length(new_line, length_after_insertion_pos);
            last_delimiter_end = newline.end();
        }
        if last_delimiter_end != inserted_length {
            let total = self.lines.node(line).total_length;
            self.set_line_length(line, total + inserted_length - last_delimiter_end);
        }
    }

    fn remove_line(&mut self, line: LineId) {
        if let Some(view) = self.lines.line(line) {
            self.trackers.before_remove_line(view);
        }
        self.lines.remove_line(line);
    }

    fn insert_line_after(&mut self, line: LineId, total_length: usize) -> LineId {
        let new_line = self.lines.insert_line_after(line, total_length);
        if let (Some(insertion_pos), Some(view)) = (self.lines.line(line), self.lines.line(new_line))
        {
            self.trackers.line_inserted(insertion_pos, view);
        }
        new_line
    }

    /// Set the total length and re-read the delimiter. Returns the line that now holds the text,
    /// which is the previous line when a lone '\n' joins a '\r' in front of it.
    fn set_line_length(&mut self, line: LineId, new_total_length: usize) -> LineId {
        if self.lines.node(line).total_length != new_total_length {
            if let Some(view) = self.lines.line(line) {
                self.trackers.set_line_length(view, new_total_length);
            }
            self.lines.set_total_length(line, new_total_length);
        }
        let delimiter_length = if new_total_length == 0 {
            0
        } else {
            let line_offset = self.lines.offset_of(line);
            match self.text.get_char(line_offset + new_total_length - 1) {
                Some('\r') => 1,
                Some('\n') => {
                    if new_total_length >= 2
                        && self.text.get_char(line_offset + new_total_length - 2) == Some('\r')
                    {
                        2
                    } else if new_total_length == 1
                        && line_offset > 0
                        && self.text.get_char(line_offset - 1) == Some('\r')
                        && let Some(previous) = self.lines.prev_id(line)
                    {
                        self.remove_line(line);
                        let previous_total = self.lines.node(previous).total_length;
                        return self.set_line_length(previous, previous_total + 1);
                    } else {
                        1
                    }
                }
                _ => 0,
            }
        };
        self.lines.set_delimiter_length(line, delimiter_length);
        line
    }
}
