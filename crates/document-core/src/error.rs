//! Error type shared by every document operation.
//!
//! All validation happens before a structure is touched, so an `Err` always means the document is
//! unchanged.

use thiserror::Error;

/// Errors reported by the document model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    /// An offset lies outside `0..=length`.
    #[error("offset {offset} is out of range (document length {length})")]
    OffsetOutOfRange {
        /// Requested offset.
        offset: usize,
        /// Text length at the time of the request.
        length: usize,
    },
    /// `offset + count` extends past the end of the text.
    #[error("range {offset}+{count} is out of range (document length {length})")]
    RangeOutOfBounds {
        /// Range start.
        offset: usize,
        /// Range length.
        count: usize,
        /// Text length at the time of the request.
        length: usize,
    },
    /// A line number outside `1..=line_count`.
    #[error("line number {line} is out of range (1..={line_count})")]
    LineNumberOutOfRange {
        /// Requested line number.
        line: usize,
        /// Number of lines in the document.
        line_count: usize,
    },
    /// The offset change map does not describe the requested change.
    #[error("offset change map is not valid for this document change")]
    InvalidOffsetChangeMap,
    /// A collapsed section was requested with `start > end`.
    #[error("collapsed section start line {start} is after end line {end}")]
    InvalidSectionRange {
        /// First line of the section.
        start: usize,
        /// Last line of the section.
        end: usize,
    },
    /// The document was accessed from a thread that does not own it.
    #[error("the document can only be accessed from the thread that owns it")]
    WrongThread,
    /// A mutation was started while another change was being applied.
    #[error("cannot change the document within another document change")]
    ReentrantChange,
    /// `end_update` was called without a matching `begin_update`.
    #[error("no update is active")]
    NoActiveUpdate,
    /// `end_update` was called from inside a change notification.
    #[error("cannot end an update from within a document change")]
    EndUpdateDuringChange,
    /// Two versions from different documents were compared.
    #[error("versions do not belong to the same document")]
    VersionMismatch,
    /// An anchor created by another document was passed in.
    #[error("the anchor belongs to a different document")]
    ForeignAnchor,
    /// The anchor was deleted together with the text containing it.
    #[error("the anchor was deleted")]
    AnchorDeleted,
    /// Allocating the full text failed.
    #[error("text of {length} characters is too large to materialize")]
    TextTooLarge {
        /// Length of the text that could not be allocated.
        length: usize,
    },
    /// The undo stack is empty.
    #[error("nothing to undo")]
    NothingToUndo,
    /// The redo stack is empty.
    #[error("nothing to redo")]
    NothingToRedo,
    /// The undo stack was used while it is applying an undo or redo.
    #[error("the undo stack is busy applying an undo or redo")]
    UndoInProgress,
    /// The undo stack has no open group to end.
    #[error("no undo group is open")]
    NoOpenUndoGroup,
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = DocumentError> = std::result::Result<T, E>;
