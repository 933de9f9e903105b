//! Document versions.
//!
//! Every change appended to a [`VersionProvider`] closes the current checkpoint and opens a new
//! one; the checkpoints form a forward-linked list. A [`Version`] is a handle to one checkpoint.
//! Holding an old version keeps the changes after it alive, so [`Version::changes_to`] and
//! [`Version::move_offset_to`] can replay them, for example to translate an offset computed on a
//! snapshot in a background thread into the current document.

use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};

use crate::change::DocumentChange;
use crate::error::{DocumentError, Result};
use crate::offset_map::AnchorMovementType;

static NEXT_PROVIDER_ID: AtomicU64 = AtomicU64::new(1);

struct VersionNode {
    provider_id: u64,
    id: u64,
    next: OnceLock<(Arc<DocumentChange>, Arc<VersionNode>)>,
}

impl Drop for VersionNode {
    fn drop(&mut self) {
        // Unlink iteratively; a long history would otherwise drop recursively.
        let mut next = self.next.take();
        while let Some((_, node)) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// A checkpoint in the change history of one document.
#[derive(Clone)]
pub struct Version(Arc<VersionNode>);

impl Version {
    /// `true` if both versions come from the same provider.
    pub fn belongs_to_same_document(&self, other: &Version) -> bool {
        self.0.provider_id == other.0.provider_id
    }

    /// Order two versions of the same document: `Less` if `self` is older.
    pub fn compare_age(&self, other: &Version) -> Result<Ordering> {
        if !self.belongs_to_same_document(other) {
            return Err(DocumentError::VersionMismatch);
        }
        Ok(self.0.id.cmp(&other.0.id))
    }

    /// The changes leading from `self` to `other`. When `other` is older, the inverted changes are
    /// returned in reverse order.
    pub fn changes_to(&self, other: &Version) -> Result<Vec<DocumentChange>> {
        match self.compare_age(other)? {
            Ordering::Less => Ok(self.forward_changes(other)),
            Ordering::Equal => Ok(Vec::new()),
            Ordering::Greater => Ok(other
                .forward_changes(self)
                .iter()
                .rev()
                .map(DocumentChange::invert)
                .collect()),
        }
    }

    /// Translate an offset in `self` into the offset it has in `other`.
    pub fn move_offset_to(
        &self,
        other: &Version,
        offset: usize,
        movement: AnchorMovementType,
    ) -> Result<usize> {
        Ok(self
            .changes_to(other)?
            .iter()
            .fold(offset, |offset, change| change.get_new_offset(offset, movement)))
    }

    /// Changes from `self` up to the newer `other`.
    fn forward_changes(&self, other: &Version) -> Vec<DocumentChange> {
        let mut changes = Vec::with_capacity((other.0.id - self.0.id) as usize);
        let mut node = &self.0;
        while !Arc::ptr_eq(node, &other.0) {
            let Some((change, next)) = node.next.get() else {
                break;
            };
            changes.push(DocumentChange::clone(change));
            node = next;
        }
        changes
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Version {}

impl fmt::Debug for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Version")
            .field("document", &self.0.provider_id)
            .field("id", &self.0.id)
            .finish()
    }
}

/// Produces the version chain of one document.
#[derive(Debug)]
pub struct VersionProvider {
    current: Version,
}

impl Default for VersionProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionProvider {
    /// A provider with a fresh initial version.
    pub fn new() -> Self {
        Self {
            current: Version(Arc::new(VersionNode {
                provider_id: NEXT_PROVIDER_ID.fetch_add(1, AtomicOrdering::Relaxed),
                id: 0,
                next: OnceLock::new(),
            })),
        }
    }

    /// The latest version.
    pub fn current_version(&self) -> &Version {
        &self.current
    }

    /// Close the current version with `change` and start a new one.
    pub fn append_change(&mut self, change: Arc<DocumentChange>) {
        let next = Arc::new(VersionNode {
            provider_id: self.current.0.provider_id,
            id: self.current.0.id + 1,
            next: OnceLock::new(),
        });
        // The current node is never linked twice: it is replaced right below.
        let linked = self
            .current
            .0
            .next
            .set((change, Arc::clone(&next)))
            .is_ok();
        debug_assert!(linked);
        self.current = Version(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(offset: usize, removed: &str, inserted: &str) -> Arc<DocumentChange> {
        Arc::new(DocumentChange::from_strs(offset, removed, inserted))
    }

    #[test]
    fn test_compare_age() {
        let mut provider = VersionProvider::new();
        let v0 = provider.current_version().clone();
        provider.append_change(change(0, "", "a"));
        let v1 = provider.current_version().clone();
        assert_eq!(v0.compare_age(&v1), Ok(Ordering::Less));
        assert_eq!(v1.compare_age(&v0), Ok(Ordering::Greater));
        assert_eq!(v1.compare_age(&v1), Ok(Ordering::Equal));

        let other = VersionProvider::new();
        assert!(!v0.belongs_to_same_document(other.current_version()));
        assert_eq!(
            v0.compare_age(other.current_version()),
            Err(DocumentError::VersionMismatch)
        );
    }

    #[test]
    fn test_changes_forward_and_backward() {
        let mut provider = VersionProvider::new();
        let v0 = provider.current_version().clone();
        provider.append_change(change(0, "initial", "nw"));
        provider.append_change(change(1, "", "e"));
        let v2 = provider.current_version().clone();

        let forward = v0.changes_to(&v2).unwrap();
        let inserted: Vec<String> = forward.iter().map(|c| c.inserted_text().to_string()).collect();
        assert_eq!(inserted, vec!["nw", "e"]);

        let backward = v2.changes_to(&v0).unwrap();
        let inserted: Vec<String> = backward
            .iter()
            .map(|c| c.inserted_text().to_string())
            .collect();
        assert_eq!(inserted, vec!["", "initial"]);
    }

    #[test]
    fn test_move_offset_to() {
        let mut provider = VersionProvider::new();
        let v0 = provider.current_version().clone();
        provider.append_change(change(2, "", "xyz"));
        provider.append_change(change(0, "a", ""));
        let v2 = provider.current_version().clone();
        assert_eq!(
            v0.move_offset_to(&v2, 5, AnchorMovementType::Default),
            Ok(7)
        );
        assert_eq!(
            v2.move_offset_to(&v0, 7, AnchorMovementType::Default),
            Ok(5)
        );
    }

    #[test]
    fn test_long_history_drops_without_recursion() {
        let mut provider = VersionProvider::new();
        let first = provider.current_version().clone();
        for i in 0..200_000 {
            provider.append_change(change(i, "", "x"));
        }
        drop(provider);
        drop(first);
    }
}
