//! Offset remapping across edits.
//!
//! An [`OffsetChangeMapEntry`] describes one atomic removal+insertion at an offset, plus two flags
//! that control what happens to positions touching the edited range. An [`OffsetChangeMap`] is an
//! ordered list of entries; applying them in sequence translates an offset from the coordinate
//! space before a document change into the space after it.

use crate::error::{DocumentError, Result};

/// How a position reacts to text inserted exactly at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AnchorMovementType {
    /// Follow the change's default: after the insertion, unless the change was made with
    /// [`OffsetChangeMappingType::KeepAnchorBeforeInsertion`].
    #[default]
    Default,
    /// Stay in front of the inserted text.
    BeforeInsertion,
    /// Move behind the inserted text.
    AfterInsertion,
}

/// How [`crate::TextDocument::replace_with_mapping`] builds the offset change map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OffsetChangeMappingType {
    /// A single entry: the removed text is replaced by the inserted text. Anchors inside the
    /// removed range are deleted.
    #[default]
    Normal,
    /// Two entries: first remove, then insert at the same offset. Positions inside the removed
    /// range collapse to the start and then follow their movement type.
    RemoveAndInsert,
    /// Characters are replaced one by one, so positions inside the replaced range keep their
    /// relative offset where possible.
    CharacterReplace,
    /// Like `Normal`, but positions with [`AnchorMovementType::Default`] stay in front of the
    /// insertion.
    KeepAnchorBeforeInsertion,
}

/// One atomic removal+insertion at an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetChangeMapEntry {
    offset: usize,
    removal_length: usize,
    insertion_length: usize,
    removal_never_causes_anchor_deletion: bool,
    default_anchor_movement_is_before_insertion: bool,
}

impl OffsetChangeMapEntry {
    /// Entry with default flags.
    pub fn new(offset: usize, removal_length: usize, insertion_length: usize) -> Self {
        Self {
            offset,
            removal_length,
            insertion_length,
            removal_never_causes_anchor_deletion: false,
            default_anchor_movement_is_before_insertion: false,
        }
    }

    /// Entry with explicit flags.
    pub fn with_flags(
        offset: usize,
        removal_length: usize,
        insertion_length: usize,
        removal_never_causes_anchor_deletion: bool,
        default_anchor_movement_is_before_insertion: bool,
    ) -> Self {
        Self {
            offset,
            removal_length,
            insertion_length,
            removal_never_causes_anchor_deletion,
            default_anchor_movement_is_before_insertion,
        }
    }

    /// Offset of the change.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of removed characters.
    pub fn removal_length(&self) -> usize {
        self.removal_length
    }

    /// Number of inserted characters.
    pub fn insertion_length(&self) -> usize {
        self.insertion_length
    }

    /// If set, anchors inside the removed range survive regardless of their own setting.
    pub fn removal_never_causes_anchor_deletion(&self) -> bool {
        self.removal_never_causes_anchor_deletion
    }

    /// If set, [`AnchorMovementType::Default`] behaves like `BeforeInsertion`.
    pub fn default_anchor_movement_is_before_insertion(&self) -> bool {
        self.default_anchor_movement_is_before_insertion
    }

    /// Translate `old_offset` through this entry.
    pub fn get_new_offset(&self, old_offset: usize, movement: AnchorMovementType) -> usize {
        let insertion_length = self.insertion_length;
        let removal_length = self.removal_length;
        if !(removal_length == 0 && old_offset == self.offset) {
            // Not exactly at an insertion point.
            if old_offset <= self.offset {
                return old_offset;
            }
            if old_offset >= self.offset + removal_length {
                return old_offset + insertion_length - removal_length;
            }
        }
        // At an insertion point or inside the removed range.
        let before = match movement {
            AnchorMovementType::AfterInsertion => false,
            AnchorMovementType::BeforeInsertion => true,
            AnchorMovementType::Default => self.default_anchor_movement_is_before_insertion,
        };
        if before {
            self.offset
        } else {
            self.offset + insertion_length
        }
    }

    /// The same change in reverse.
    pub fn invert(&self) -> Self {
        Self {
            offset: self.offset,
            removal_length: self.insertion_length,
            insertion_length: self.removal_length,
            removal_never_causes_anchor_deletion: self.removal_never_causes_anchor_deletion,
            default_anchor_movement_is_before_insertion: self
                .default_anchor_movement_is_before_insertion,
        }
    }
}

/// Ordered list of entries describing one document change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct OffsetChangeMap {
    entries: Vec<OffsetChangeMapEntry>,
}

impl OffsetChangeMap {
    /// An empty map: no offset moves.
    pub fn new() -> Self {
        Self::default()
    }

    /// A map with a single entry.
    pub fn from_entry(entry: OffsetChangeMapEntry) -> Self {
        Self {
            entries: vec![entry],
        }
    }

    /// Build the map for a `replace(offset, removal_length, text of insertion_length)` using
    /// `mapping`.
    pub fn for_mapping_type(
        mapping: OffsetChangeMappingType,
        offset: usize,
        removal_length: usize,
        insertion_length: usize,
    ) -> Self {
        // A one-sided change has nothing to replace character-wise or in two steps.
        let mapping = if removal_length == 0 || insertion_length == 0 {
            match mapping {
                OffsetChangeMappingType::KeepAnchorBeforeInsertion => mapping,
                _ => OffsetChangeMappingType::Normal,
            }
        } else {
            mapping
        };
        match mapping {
            OffsetChangeMappingType::Normal => Self::from_entry(OffsetChangeMapEntry::new(
                offset,
                removal_length,
                insertion_length,
            )),
            OffsetChangeMappingType::KeepAnchorBeforeInsertion => {
                Self::from_entry(OffsetChangeMapEntry::with_flags(
                    offset,
                    removal_length,
                    insertion_length,
                    false,
                    true,
                ))
            }
            OffsetChangeMappingType::RemoveAndInsert => Self {
                entries: vec![
                    OffsetChangeMapEntry::new(offset, removal_length, 0),
                    OffsetChangeMapEntry::new(offset, 0, insertion_length),
                ],
            },
            OffsetChangeMappingType::CharacterReplace => {
                if insertion_length > removal_length {
                    Self::from_entry(OffsetChangeMapEntry::new(
                        offset + removal_length - 1,
                        1,
                        1 + insertion_length - removal_length,
                    ))
                } else if insertion_length < removal_length {
                    Self::from_entry(OffsetChangeMapEntry::with_flags(
                        offset + insertion_length,
                        removal_length - insertion_length,
                        0,
                        true,
                        false,
                    ))
                } else {
                    Self::new()
                }
            }
        }
    }

    /// Append an entry.
    pub fn push(&mut self, entry: OffsetChangeMapEntry) {
        self.entries.push(entry);
    }

    /// The entries in application order.
    pub fn entries(&self) -> &[OffsetChangeMapEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no entry is present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Translate `offset` through every entry in order.
    pub fn get_new_offset(&self, offset: usize, movement: AnchorMovementType) -> usize {
        self.entries
            .iter()
            .fold(offset, |offset, entry| entry.get_new_offset(offset, movement))
    }

    /// The map of the reverse change: entries reversed, each inverted.
    pub fn invert(&self) -> Self {
        Self {
            entries: self.entries.iter().rev().map(OffsetChangeMapEntry::invert).collect(),
        }
    }

    /// Check that the entries stay inside the changed range and add up to the change's net
    /// length delta.
    pub fn is_valid_for_document_change(
        &self,
        offset: usize,
        removal_length: usize,
        insertion_length: usize,
    ) -> bool {
        let mut end_offset = offset + removal_length;
        for entry in &self.entries {
            if entry.offset < offset || entry.offset + entry.removal_length > end_offset {
                return false;
            }
            end_offset = end_offset + entry.insertion_length - entry.removal_length;
        }
        end_offset == offset + insertion_length
    }

    pub(crate) fn validate(
        &self,
        offset: usize,
        removal_length: usize,
        insertion_length: usize,
    ) -> Result<()> {
        if self.is_valid_for_document_change(offset, removal_length, insertion_length) {
            Ok(())
        } else {
            Err(DocumentError::InvalidOffsetChangeMap)
        }
    }
}

impl FromIterator<OffsetChangeMapEntry> for OffsetChangeMap {
    fn from_iter<I: IntoIterator<Item = OffsetChangeMapEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
