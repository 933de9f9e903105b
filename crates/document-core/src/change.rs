//! Document change records.
//!
//! A [`DocumentChange`] is the immutable description of one atomic edit: the offset, the exact
//! removed and inserted text, and optionally an [`OffsetChangeMap`] that refines how positions
//! inside the edited range move. Change records are handed to change subscribers, stored in the
//! version history and in the undo stack.
//!
//! Offsets and lengths are **character offsets**.

use ropey::Rope;

use crate::error::Result;
use crate::offset_map::{AnchorMovementType, OffsetChangeMap, OffsetChangeMapEntry};

/// One atomic document edit.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    offset: usize,
    removed_text: Rope,
    inserted_text: Rope,
    offset_change_map: Option<OffsetChangeMap>,
}

impl DocumentChange {
    /// Create a change record. A supplied map must describe exactly this change.
    pub fn new(
        offset: usize,
        removed_text: Rope,
        inserted_text: Rope,
        offset_change_map: Option<OffsetChangeMap>,
    ) -> Result<Self> {
        if let Some(map) = &offset_change_map {
            map.validate(offset, removed_text.len_chars(), inserted_text.len_chars())?;
        }
        Ok(Self {
            offset,
            removed_text,
            inserted_text,
            offset_change_map,
        })
    }

    /// Convenience constructor from string slices without a map.
    pub fn from_strs(offset: usize, removed_text: &str, inserted_text: &str) -> Self {
        Self {
            offset,
            removed_text: Rope::from_str(removed_text),
            inserted_text: Rope::from_str(inserted_text),
            offset_change_map: None,
        }
    }

    /// Offset of the change.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Text that was removed.
    pub fn removed_text(&self) -> &Rope {
        &self.removed_text
    }

    /// Text that was inserted.
    pub fn inserted_text(&self) -> &Rope {
        &self.inserted_text
    }

    /// Number of removed characters.
    pub fn removal_length(&self) -> usize {
        self.removed_text.len_chars()
    }

    /// Number of inserted characters.
    pub fn insertion_length(&self) -> usize {
        self.inserted_text.len_chars()
    }

    /// `true` if the change neither removes nor inserts anything.
    pub fn is_empty(&self) -> bool {
        self.removal_length() == 0 && self.insertion_length() == 0
    }

    /// The explicit map, if one was given.
    pub fn offset_change_map(&self) -> Option<&OffsetChangeMap> {
        self.offset_change_map.as_ref()
    }

    /// The explicit map, or the single entry describing the whole change.
    pub fn effective_offset_change_map(&self) -> OffsetChangeMap {
        match &self.offset_change_map {
            Some(map) => map.clone(),
            None => OffsetChangeMap::from_entry(self.single_entry()),
        }
    }

    pub(crate) fn single_entry(&self) -> OffsetChangeMapEntry {
        OffsetChangeMapEntry::new(self.offset, self.removal_length(), self.insertion_length())
    }

    /// Translate an offset from before this change to after it.
    pub fn get_new_offset(&self, offset: usize, movement: AnchorMovementType) -> usize {
        match &self.offset_change_map {
            Some(map) => map.get_new_offset(offset, movement),
            None => self.single_entry().get_new_offset(offset, movement),
        }
    }

    /// The change that undoes this one.
    pub fn invert(&self) -> Self {
        Self {
            offset: self.offset,
            removed_text: self.inserted_text.clone(),
            inserted_text: self.removed_text.clone(),
            offset_change_map: self.offset_change_map.as_ref().map(OffsetChangeMap::invert),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentError;
    use crate::offset_map::OffsetChangeMappingType;

    #[test]
    fn test_lengths_are_characters() {
        let change = DocumentChange::from_strs(2, "é", "日本語");
        assert_eq!(change.removal_length(), 1);
        assert_eq!(change.insertion_length(), 3);
        assert!(!change.is_empty());
    }

    #[test]
    fn test_get_new_offset_without_map() {
        let change = DocumentChange::from_strs(3, "ab", "xyz");
        assert_eq!(change.get_new_offset(1, AnchorMovementType::Default), 1);
        assert_eq!(change.get_new_offset(4, AnchorMovementType::Default), 6);
        assert_eq!(change.get_new_offset(4, AnchorMovementType::BeforeInsertion), 3);
        assert_eq!(change.get_new_offset(8, AnchorMovementType::Default), 9);
    }

    #[test]
    fn test_invalid_map_is_rejected() {
        let map = OffsetChangeMap::from_entry(OffsetChangeMapEntry::new(0, 1, 1));
        let result = DocumentChange::new(3, Rope::from_str("ab"), Rope::from_str("x"), Some(map));
        assert_eq!(result, Err(DocumentError::InvalidOffsetChangeMap));
    }

    #[test]
    fn test_invert_swaps_texts_and_map() {
        let map =
            OffsetChangeMap::for_mapping_type(OffsetChangeMappingType::RemoveAndInsert, 1, 2, 1);
        let change =
            DocumentChange::new(1, Rope::from_str("bc"), Rope::from_str("X"), Some(map)).unwrap();
        let inverse = change.invert();
        assert_eq!(inverse.removed_text(), &Rope::from_str("X"));
        assert_eq!(inverse.inserted_text(), &Rope::from_str("bc"));
        assert_eq!(inverse.offset_change_map().map(OffsetChangeMap::len), Some(2));
        let moved = change.get_new_offset(5, AnchorMovementType::Default);
        assert_eq!(moved, 4);
        assert_eq!(inverse.get_new_offset(moved, AnchorMovementType::Default), 5);
    }
}
