#![warn(missing_docs)]
//! Document Core - Headless Text Document Model
//!
//! # Overview
//!
//! `document-core` is the data-structure layer underneath a text editor: a mutable text buffer
//! together with the indices an editor view needs to stay fast on large files. It does not render
//! anything; a view layer consumes line offsets, anchors and line heights from it.
//!
//! # Core Features
//!
//! - **Text Storage**: rope-backed buffer, O(log n) edits and slicing, cached full text
//! - **Line Index**: red-black tree of lines, O(log n) offset ↔ line conversion, `\n`, `\r` and `\r\n`
//! - **Text Anchors**: positions that move with the text, with movement and deletion policies
//! - **Height Tree**: B+-tree of line heights with O(log n) collapsing of line ranges (folding)
//! - **Versions**: change records and checkpoints to translate stale offsets from snapshots
//! - **Undo History**: grouped undo/redo with size limit and an original-file marker
//!
//! # Architecture Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  TextDocument (owner check, updates, events) │  ← Public API
//! ├──────────────────────────────────────────────┤
//! │  Undo Stack          │  Version History      │  ← Change Records
//! ├──────────────────────────────────────────────┤
//! │  Anchor Tree         │  Height Tree          │  ← Position Tracking
//! ├──────────────────────────────────────────────┤
//! │  Line Manager + Line Tree                    │  ← Line Access
//! ├──────────────────────────────────────────────┤
//! │  Rope Text Buffer                            │  ← Text Storage
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```rust
//! use document_core::{TextDocument, TextLocation};
//!
//! let mut doc = TextDocument::new("ab\ncd\nef");
//! assert_eq!(doc.line_count(), 3);
//!
//! let line = doc.get_line_by_number(2).unwrap();
//! assert_eq!((line.offset(), line.length(), line.delimiter_length()), (3, 2, 1));
//!
//! doc.insert(1, "\n").unwrap();
//! assert_eq!(doc.line_count(), 4);
//! assert_eq!(doc.get_location(2).unwrap(), TextLocation::new(2, 1));
//! ```
//!
//! ## Folding With The Height Tree
//!
//! ```rust
//! use document_core::TextDocument;
//!
//! let mut doc = TextDocument::new("1\n2\n3\n4\n5");
//! doc.add_height_tree(20.0).unwrap();
//!
//! let heights = doc.height_tree_mut().unwrap();
//! assert_eq!(heights.total_height(), 100.0);
//! let section = heights.collapse_text(2, 4).unwrap();
//! assert_eq!(heights.total_height(), 40.0);
//! assert_eq!(heights.get_line_by_visual_position(20.0), 5);
//! heights.uncollapse(section);
//! assert_eq!(heights.total_height(), 100.0);
//! ```
//!
//! # Module Description
//!
//! - [`text`] - rope text buffer, snapshots and search
//! - [`line_tree`] / [`line_manager`] - line index and its incremental maintenance
//! - [`anchor`] - text anchors
//! - [`height_tree`] - line heights and collapsed sections
//! - [`offset_map`] / [`change`] / [`version`] - change records and version history
//! - [`undo`] - undo/redo history
//! - [`text_utilities`] - whitespace and caret-stop helpers
//! - [`document`] - the `TextDocument` facade
//!
//! # Unicode Support
//!
//! - All offsets and lengths count Unicode scalar values (`char`)
//! - Caret navigation respects grapheme clusters

pub mod anchor;
pub mod change;
pub mod document;
pub mod error;
pub mod height_tree;
pub mod line_ending;
pub mod line_manager;
pub mod line_tree;
pub mod offset_map;
mod rb_tree;
pub mod text;
pub mod text_utilities;
pub mod undo;
pub mod version;

pub use anchor::{AnchorDeletedCallback, TextAnchor};
pub use change::DocumentChange;
pub use document::{
    ChangeHandler, DocumentHandler, DocumentOptions, SnapshotProvider, SubscriptionToken,
    TextDocument,
};
pub use error::{DocumentError, Result};
pub use height_tree::{CollapsedLineSection, HeightTree};
pub use line_ending::{LineEnding, NewLine};
pub use line_manager::{LineTracker, LineTrackerToken};
pub use line_tree::{DocumentLine, LineId, LineLengths, LineTree, TextLocation};
pub use offset_map::{
    AnchorMovementType, OffsetChangeMap, OffsetChangeMapEntry, OffsetChangeMappingType,
};
pub use text::{StringComparison, TextBuffer, TextSnapshot, TextSource};
pub use text_utilities::{
    CaretPositioningMode, CharacterClass, LogicalDirection, SimpleSegment, next_caret_position,
};
pub use undo::{UndoStack, UndoStackState};
pub use version::{Version, VersionProvider};
