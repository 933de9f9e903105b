//! Undo/redo history of a [`TextDocument`](crate::TextDocument).
//!
//! The stack records every [`DocumentChange`] the document applies. Changes are collected into
//! groups; each outermost document update opens and closes one group, and callers can open
//! larger groups around several updates. Undo and redo always move whole groups.
//!
//! The "original file" marker remembers a position in the linear history (the number of groups
//! on the undo stack). Undoing back to that position makes the document original again; once the
//! redo stack holding the marked position is cleared the marker is unreachable.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::change::DocumentChange;
use crate::error::{DocumentError, Result};

/// What the undo stack is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoStackState {
    /// Recording changes.
    Listening,
    /// Applying an undo; changes are not recorded.
    Undoing,
    /// Applying a redo; changes are not recorded.
    Redoing,
}

/// One undoable step: the changes of a closed group, oldest first.
#[derive(Debug, Clone, Default)]
pub(crate) struct UndoGroup {
    changes: Vec<Arc<DocumentChange>>,
}

impl UndoGroup {
    pub(crate) fn changes(&self) -> &[Arc<DocumentChange>] {
        &self.changes
    }
}

/// Grouped undo/redo history.
#[derive(Debug)]
pub struct UndoStack {
    undo_stack: Vec<UndoGroup>,
    redo_stack: Vec<UndoGroup>,
    size_limit: usize,
    /// Position of the original-file marker in the linear history. May exceed
    /// `undo_stack.len()` while the marked groups sit on the redo stack.
    clean_index: Option<usize>,
    state: UndoStackState,
    group_depth: usize,
    /// Changes recorded since the outermost group was opened.
    changes_in_group: usize,
    /// The open group extends the group on top of the stack instead of starting a new one.
    continuing: bool,
    allow_continue: bool,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new()
    }
}

impl UndoStack {
    /// An empty, unbounded stack whose initial state is marked as original.
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            size_limit: usize::MAX,
            clean_index: Some(0),
            state: UndoStackState::Listening,
            group_depth: 0,
            changes_in_group: 0,
            continuing: false,
            allow_continue: false,
        }
    }

    /// An empty stack keeping at most `size_limit` groups.
    pub fn with_size_limit(size_limit: usize) -> Self {
        Self {
            size_limit,
            ..Self::new()
        }
    }

    /// Current activity.
    pub fn state(&self) -> UndoStackState {
        self.state
    }

    /// `true` if a group can be undone.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// `true` if a group can be redone.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Number of groups that can be undone.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Number of groups that can be redone.
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Nesting depth of open groups; `0` when no group is open.
    pub fn group_depth(&self) -> usize {
        self.group_depth
    }

    /// Maximum number of groups kept on the undo stack.
    pub fn size_limit(&self) -> usize {
        self.size_limit
    }

    /// Change the maximum number of groups, dropping the oldest groups if needed.
    pub fn set_size_limit(&mut self, size_limit: usize) {
        self.size_limit = size_limit;
        self.enforce_size_limit();
    }

    /// `true` if the history is at the position marked by [`mark_as_original_file`].
    ///
    /// [`mark_as_original_file`]: UndoStack::mark_as_original_file
    pub fn is_original_file(&self) -> bool {
        self.clean_index == Some(self.undo_stack.len())
    }

    /// Mark the current position as the original (saved) file.
    pub fn mark_as_original_file(&mut self) {
        self.clean_index = Some(self.undo_stack.len());
        // Later edits must not extend the group that now represents the saved state.
        self.allow_continue = false;
    }

    /// Forget the original-file marker; the document is never original again until re-marked.
    pub fn discard_original_file_marker(&mut self) {
        self.clean_index = None;
    }

    /// Open a group. Changes up to the matching [`end_undo_group`] are undone together.
    ///
    /// [`end_undo_group`]: UndoStack::end_undo_group
    pub fn start_undo_group(&mut self) {
        self.open_group(false);
    }

    /// Open a group that appends to the previous group, if the previous group may be continued.
    ///
    /// Continuation is refused after an undo or redo, after an empty group, and when the previous
    /// group is the original-file position.
    pub fn start_continued_undo_group(&mut self) {
        self.open_group(true);
    }

    fn open_group(&mut self, continued: bool) {
        if self.group_depth == 0 {
            self.changes_in_group = 0;
            self.continuing = continued
                && self.allow_continue
                && !self.undo_stack.is_empty()
                && !self.is_original_file();
        }
        self.group_depth += 1;
        trace!(depth = self.group_depth, continued, "undo group opened");
    }

    /// Close the innermost group.
    pub fn end_undo_group(&mut self) -> Result<()> {
        if self.group_depth == 0 {
            return Err(DocumentError::NoOpenUndoGroup);
        }
        self.group_depth -= 1;
        trace!(depth = self.group_depth, "undo group closed");
        if self.group_depth > 0 {
            return Ok(());
        }

        if self.changes_in_group == 0 && !self.continuing {
            self.allow_continue = false;
        } else {
            self.allow_continue = true;
            self.enforce_size_limit();
        }
        self.changes_in_group = 0;
        self.continuing = false;
        Ok(())
    }

    /// Record a change. Ignored while an undo or redo is being applied.
    pub(crate) fn push(&mut self, change: Arc<DocumentChange>) {
        if self.state != UndoStackState::Listening {
            return;
        }
        if self.group_depth == 0 {
            self.open_group(false);
            self.record(change);
            // A lone push always has a matching open group.
            let _ = self.end_undo_group();
            return;
        }
        self.record(change);
    }

    fn record(&mut self, change: Arc<DocumentChange>) {
        if self.changes_in_group == 0 {
            self.clear_redo_and_adjust_clean();
            let extend_top = self.continuing && !self.undo_stack.is_empty();
            if !extend_top {
                self.undo_stack.push(UndoGroup::default());
            }
        }
        self.changes_in_group += 1;
        if let Some(group) = self.undo_stack.last_mut() {
            group.changes.push(change);
        }
    }

    /// Drop the redo history.
    pub fn clear_redo_stack(&mut self) {
        self.clear_redo_and_adjust_clean();
    }

    /// Drop the whole history. The original-file marker survives only if it marks the current
    /// position.
    pub fn clear_all(&mut self) -> Result<()> {
        self.verify_idle()?;
        self.clean_index = self.is_original_file().then_some(0);
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.allow_continue = false;
        debug!("undo history cleared");
        Ok(())
    }

    fn verify_idle(&self) -> Result<()> {
        if self.group_depth != 0 || self.state != UndoStackState::Listening {
            return Err(DocumentError::UndoInProgress);
        }
        Ok(())
    }

    fn clear_redo_and_adjust_clean(&mut self) {
        if self.redo_stack.is_empty() {
            return;
        }

        // A marker on the redo side becomes unreachable.
        if let Some(clean_index) = self.clean_index
            && clean_index > self.undo_stack.len()
        {
            self.clean_index = None;
        }

        self.redo_stack.clear();
    }

    fn enforce_size_limit(&mut self) {
        if self.undo_stack.len() <= self.size_limit {
            return;
        }
        let excess = self.undo_stack.len() - self.size_limit;
        self.undo_stack.drain(..excess);
        self.clean_index = self
            .clean_index
            .and_then(|clean_index| clean_index.checked_sub(excess));
        debug!(dropped = excess, "undo groups dropped over size limit");
    }

    /// Take the newest group for undoing. The caller applies the inverse changes newest first and
    /// then calls [`finish_undo`](Self::finish_undo).
    pub(crate) fn begin_undo(&mut self) -> Result<UndoGroup> {
        self.verify_idle()?;
        let group = self.undo_stack.pop().ok_or(DocumentError::NothingToUndo)?;
        self.state = UndoStackState::Undoing;
        self.allow_continue = false;
        debug!(changes = group.changes.len(), "undo");
        Ok(group)
    }

    pub(crate) fn finish_undo(&mut self, group: UndoGroup) {
        self.redo_stack.push(group);
        self.state = UndoStackState::Listening;
    }

    /// Take the newest undone group for redoing. The caller reapplies the changes oldest first
    /// and then calls [`finish_redo`](Self::finish_redo).
    pub(crate) fn begin_redo(&mut self) -> Result<UndoGroup> {
        self.verify_idle()?;
        let group = self.redo_stack.pop().ok_or(DocumentError::NothingToRedo)?;
        self.state = UndoStackState::Redoing;
        self.allow_continue = false;
        debug!(changes = group.changes.len(), "redo");
        Ok(group)
    }

    pub(crate) fn finish_redo(&mut self, group: UndoGroup) {
        self.undo_stack.push(group);
        self.state = UndoStackState::Listening;
        self.enforce_size_limit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(offset: usize, inserted: &str) -> Arc<DocumentChange> {
        Arc::new(DocumentChange::from_strs(offset, "", inserted))
    }

    fn inserted(group: &UndoGroup) -> Vec<String> {
        group
            .changes()
            .iter()
            .map(|c| c.inserted_text().to_string())
            .collect()
    }

    #[test]
    fn test_lone_pushes_form_separate_groups() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.push(change(1, "b"));
        assert_eq!(stack.undo_depth(), 2);
        assert!(!stack.is_original_file());
    }

    #[test]
    fn test_group_collects_changes() {
        let mut stack = UndoStack::new();
        stack.start_undo_group();
        stack.push(change(0, "a"));
        stack.start_undo_group();
        stack.push(change(1, "b"));
        stack.end_undo_group().unwrap();
        stack.end_undo_group().unwrap();
        assert_eq!(stack.undo_depth(), 1);

        let group = stack.begin_undo().unwrap();
        assert_eq!(inserted(&group), vec!["a", "b"]);
        assert_eq!(stack.state(), UndoStackState::Undoing);
        stack.finish_undo(group);
        assert!(stack.can_redo());
        assert!(stack.is_original_file());
    }

    #[test]
    fn test_empty_group_is_discarded() {
        let mut stack = UndoStack::new();
        stack.start_undo_group();
        stack.end_undo_group().unwrap();
        assert!(!stack.can_undo());
        assert_eq!(stack.end_undo_group(), Err(DocumentError::NoOpenUndoGroup));
    }

    #[test]
    fn test_continued_group_appends() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.start_continued_undo_group();
        stack.push(change(1, "b"));
        stack.end_undo_group().unwrap();
        assert_eq!(stack.undo_depth(), 1);
    }

    #[test]
    fn test_continuation_refused_after_empty_group_and_undo() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.start_undo_group();
        stack.end_undo_group().unwrap();
        stack.start_continued_undo_group();
        stack.push(change(1, "b"));
        stack.end_undo_group().unwrap();
        assert_eq!(stack.undo_depth(), 2);

        let group = stack.begin_undo().unwrap();
        stack.finish_undo(group);
        stack.start_continued_undo_group();
        stack.push(change(1, "c"));
        stack.end_undo_group().unwrap();
        assert_eq!(stack.undo_depth(), 2);
        assert!(!stack.can_redo());
    }

    #[test]
    fn test_pushes_ignored_while_undoing() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        let group = stack.begin_undo().unwrap();
        stack.push(change(0, "x"));
        assert_eq!(stack.begin_redo().err(), Some(DocumentError::UndoInProgress));
        stack.finish_undo(group);
        assert_eq!(stack.undo_depth(), 0);
        assert_eq!(stack.redo_depth(), 1);
    }

    #[test]
    fn test_undo_refused_while_group_open() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.start_undo_group();
        assert_eq!(stack.begin_undo().err(), Some(DocumentError::UndoInProgress));
        assert_eq!(stack.clear_all(), Err(DocumentError::UndoInProgress));
        stack.end_undo_group().unwrap();
        assert!(stack.begin_undo().is_ok());
    }

    #[test]
    fn test_nothing_to_undo_or_redo() {
        let mut stack = UndoStack::new();
        assert_eq!(stack.begin_undo().err(), Some(DocumentError::NothingToUndo));
        assert_eq!(stack.begin_redo().err(), Some(DocumentError::NothingToRedo));
    }

    #[test]
    fn test_size_limit_drops_oldest_groups() {
        let mut stack = UndoStack::with_size_limit(2);
        for (i, text) in ["a", "b", "c"].into_iter().enumerate() {
            stack.push(change(i, text));
        }
        assert_eq!(stack.undo_depth(), 2);
        // The initial marker fell off the bottom.
        assert!(!stack.is_original_file());

        let group = stack.begin_undo().unwrap();
        assert_eq!(inserted(&group), vec!["c"]);
        stack.finish_undo(group);

        stack.set_size_limit(0);
        assert_eq!(stack.undo_depth(), 0);
        assert_eq!(stack.redo_depth(), 1);
    }

    #[test]
    fn test_original_file_marker_tracks_history() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.mark_as_original_file();
        assert!(stack.is_original_file());

        stack.push(change(1, "b"));
        assert!(!stack.is_original_file());

        let group = stack.begin_undo().unwrap();
        stack.finish_undo(group);
        assert!(stack.is_original_file());

        let group = stack.begin_undo().unwrap();
        stack.finish_undo(group);
        assert!(!stack.is_original_file());

        // Branching off drops the marked position with the redo history.
        stack.push(change(0, "z"));
        assert!(!stack.can_redo());
        assert!(!stack.is_original_file());
        let group = stack.begin_undo().unwrap();
        stack.finish_undo(group);
        assert!(!stack.is_original_file());
    }

    #[test]
    fn test_marker_blocks_continuation() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.mark_as_original_file();
        stack.start_continued_undo_group();
        stack.push(change(1, "b"));
        stack.end_undo_group().unwrap();
        assert_eq!(stack.undo_depth(), 2);
    }

    #[test]
    fn test_clear_all_keeps_marker_only_at_current_position() {
        let mut stack = UndoStack::new();
        stack.push(change(0, "a"));
        stack.mark_as_original_file();
        stack.clear_all().unwrap();
        assert!(stack.is_original_file());
        assert!(!stack.can_undo());

        stack.push(change(0, "b"));
        stack.clear_all().unwrap();
        assert!(!stack.is_original_file());
    }
}
