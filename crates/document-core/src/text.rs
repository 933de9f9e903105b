//! Text storage.
//!
//! [`TextBuffer`] is the mutable character sequence behind a document, backed by a
//! [`ropey::Rope`] so that local edits and slicing stay logarithmic even for very large texts.
//! [`TextSnapshot`] is an immutable copy of a buffer at one version; cloning a rope shares its
//! nodes, so taking a snapshot is cheap.
//!
//! All offsets and lengths are **character offsets** (Unicode scalar values).

use std::sync::{Arc, OnceLock};

use regex::RegexBuilder;
use ropey::{Rope, RopeSlice};

use crate::error::{DocumentError, Result};
use crate::version::Version;

/// How [`TextSource::index_of_str`] compares characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringComparison {
    /// Exact character comparison.
    #[default]
    Ordinal,
    /// Case-insensitive comparison (Unicode simple case folding).
    OrdinalIgnoreCase,
}

/// Validate that `offset..offset + count` lies within a text of `length` characters.
pub(crate) fn check_range(offset: usize, count: usize, length: usize) -> Result<()> {
    if offset > length {
        return Err(DocumentError::OffsetOutOfRange { offset, length });
    }
    match offset.checked_add(count) {
        Some(end) if end <= length => Ok(()),
        _ => Err(DocumentError::RangeOutOfBounds {
            offset,
            count,
            length,
        }),
    }
}

/// Validate that `offset` lies within `0..=length`.
pub(crate) fn check_offset(offset: usize, length: usize) -> Result<()> {
    if offset > length {
        Err(DocumentError::OffsetOutOfRange { offset, length })
    } else {
        Ok(())
    }
}

/// Copy a rope into a single string, reporting allocation failure instead of aborting.
pub(crate) fn materialize(slice: RopeSlice<'_>) -> Result<String> {
    let mut out = String::new();
    out.try_reserve_exact(slice.len_bytes())
        .map_err(|_| DocumentError::TextTooLarge {
            length: slice.len_chars(),
        })?;
    for chunk in slice.chunks() {
        out.push_str(chunk);
    }
    Ok(out)
}

fn byte_to_char(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// Read access shared by the live buffer and snapshots.
pub trait TextSource {
    /// The rope holding the text.
    fn rope(&self) -> &Rope;

    /// The full text.
    fn text(&self) -> Result<Arc<str>>;

    /// Length in characters.
    fn text_length(&self) -> usize {
        self.rope().len_chars()
    }

    /// Character at `offset`; `offset` must be less than the text length.
    fn char_at(&self, offset: usize) -> Result<char> {
        let length = self.text_length();
        if offset >= length {
            return Err(DocumentError::OffsetOutOfRange { offset, length });
        }
        Ok(self.rope().char(offset))
    }

    /// Borrow `count` characters starting at `offset`.
    fn slice(&self, offset: usize, count: usize) -> Result<RopeSlice<'_>> {
        check_range(offset, count, self.text_length())?;
        Ok(self.rope().slice(offset..offset + count))
    }

    /// Copy `count` characters starting at `offset`.
    fn text_range(&self, offset: usize, count: usize) -> Result<String> {
        materialize(self.slice(offset, count)?)
    }

    /// First offset of `ch` within `start..start + count`.
    fn index_of(&self, ch: char, start: usize, count: usize) -> Result<Option<usize>> {
        let slice = self.slice(start, count)?;
        Ok(slice.chars().position(|c| c == ch).map(|i| start + i))
    }

    /// Last offset of `ch` within `start..start + count`.
    fn last_index_of(&self, ch: char, start: usize, count: usize) -> Result<Option<usize>> {
        check_range(start, count, self.text_length())?;
        let mut chars = self.rope().chars_at(start + count);
        let mut offset = start + count;
        while offset > start {
            offset -= 1;
            if chars.prev() == Some(ch) {
                return Ok(Some(offset));
            }
        }
        Ok(None)
    }

    /// First offset of any of `any` within `start..start + count`.
    fn index_of_any(&self, any: &[char], start: usize, count: usize) -> Result<Option<usize>> {
        let slice = self.slice(start, count)?;
        Ok(slice
            .chars()
            .position(|c| any.contains(&c))
            .map(|i| start + i))
    }

    /// First occurrence of `needle` that lies completely within `start..start + count`.
    ///
    /// An empty needle matches at `start`.
    fn index_of_str(
        &self,
        needle: &str,
        start: usize,
        count: usize,
        comparison: StringComparison,
    ) -> Result<Option<usize>> {
        let haystack = self.text_range(start, count)?;
        if needle.is_empty() {
            return Ok(Some(start));
        }
        let found = match comparison {
            StringComparison::Ordinal => haystack.find(needle),
            StringComparison::OrdinalIgnoreCase => case_insensitive(needle)
                .and_then(|re| re.find(&haystack).map(|m| m.start())),
        };
        Ok(found.map(|byte| start + byte_to_char(&haystack, byte)))
    }

    /// Last occurrence of `needle` that lies completely within `start..start + count`.
    ///
    /// An empty needle matches at `start + count`.
    fn last_index_of_str(
        &self,
        needle: &str,
        start: usize,
        count: usize,
        comparison: StringComparison,
    ) -> Result<Option<usize>> {
        let haystack = self.text_range(start, count)?;
        if needle.is_empty() {
            return Ok(Some(start + count));
        }
        let found = match comparison {
            StringComparison::Ordinal => haystack.rfind(needle),
            StringComparison::OrdinalIgnoreCase => case_insensitive(needle).and_then(|re| {
                // Matches may overlap, so restart one character after every hit.
                let mut last = None;
                let mut at = 0;
                while let Some(m) = re.find_at(&haystack, at) {
                    last = Some(m.start());
                    let step = haystack[m.start()..]
                        .chars()
                        .next()
                        .map_or(1, char::len_utf8);
                    at = m.start() + step;
                    if at > haystack.len() {
                        break;
                    }
                }
                last
            }),
        };
        Ok(found.map(|byte| start + byte_to_char(&haystack, byte)))
    }
}

fn case_insensitive(needle: &str) -> Option<regex::Regex> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Mutable document text.
///
/// Caches the last full-text string; the cache is dropped on every mutation.
#[derive(Debug, Clone, Default)]
pub struct TextBuffer {
    rope: Rope,
    cached_text: OnceLock<Arc<str>>,
}

impl TextBuffer {
    /// Create a buffer holding `text`.
    pub fn new(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
            cached_text: OnceLock::new(),
        }
    }

    /// Create a buffer from an existing rope.
    pub fn from_rope(rope: Rope) -> Self {
        Self {
            rope,
            cached_text: OnceLock::new(),
        }
    }

    /// Replace `count` characters at `offset` with `text`.
    pub fn replace(&mut self, offset: usize, count: usize, text: &str) -> Result<()> {
        check_range(offset, count, self.rope.len_chars())?;
        self.remove_unchecked(offset, count);
        self.insert_unchecked(offset, text);
        Ok(())
    }

    /// Insert `text` at `offset`.
    pub fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        check_offset(offset, self.rope.len_chars())?;
        self.insert_unchecked(offset, text);
        Ok(())
    }

    /// Remove `count` characters at `offset`.
    pub fn remove(&mut self, offset: usize, count: usize) -> Result<()> {
        check_range(offset, count, self.rope.len_chars())?;
        self.remove_unchecked(offset, count);
        Ok(())
    }

    /// Replace the whole content.
    pub fn set_text(&mut self, text: &str) {
        self.rope = Rope::from_str(text);
        self.cached_text = OnceLock::new();
    }

    pub(crate) fn insert_unchecked(&mut self, offset: usize, text: &str) {
        if !text.is_empty() {
            self.rope.insert(offset, text);
            self.cached_text = OnceLock::new();
        }
    }

    pub(crate) fn remove_unchecked(&mut self, offset: usize, count: usize) {
        if count > 0 {
            self.rope.remove(offset..offset + count);
            self.cached_text = OnceLock::new();
        }
    }

    /// Take an immutable copy tagged with `version`.
    pub fn snapshot(&self, version: Option<Version>) -> TextSnapshot {
        TextSnapshot::new(self.rope.clone(), version)
    }
}

impl TextSource for TextBuffer {
    fn rope(&self) -> &Rope {
        &self.rope
    }

    fn text(&self) -> Result<Arc<str>> {
        if let Some(text) = self.cached_text.get() {
            return Ok(Arc::clone(text));
        }
        let text: Arc<str> = Arc::from(materialize(self.rope.slice(..))?);
        Ok(Arc::clone(self.cached_text.get_or_init(|| text)))
    }
}

/// Immutable text at one point in time.
///
/// Snapshots are `Send + Sync` and can be read from any thread while the document keeps
/// changing.
#[derive(Debug, Clone)]
pub struct TextSnapshot {
    rope: Rope,
    version: Option<Version>,
    cached_text: OnceLock<Arc<str>>,
}

impl TextSnapshot {
    /// Wrap a rope as a snapshot.
    pub fn new(rope: Rope, version: Option<Version>) -> Self {
        Self {
            rope,
            version,
            cached_text: OnceLock::new(),
        }
    }

    /// Snapshot of a plain string without version information.
    pub fn from_text(text: &str) -> Self {
        Self::new(Rope::from_str(text), None)
    }

    /// The document version this snapshot was taken at, if versions are tracked.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }
}

impl TextSource for TextSnapshot {
    fn rope(&self) -> &Rope {
        &self.rope
    }

    fn text(&self) -> Result<Arc<str>> {
        if let Some(text) = self.cached_text.get() {
            return Ok(Arc::clone(text));
        }
        let text: Arc<str> = Arc::from(materialize(self.rope.slice(..))?);
        Ok(Arc::clone(self.cached_text.get_or_init(|| text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_and_cache_invalidation() {
        let mut buffer = TextBuffer::new("hello world");
        assert_eq!(&*buffer.text().unwrap(), "hello world");
        buffer.replace(0, 5, "goodbye").unwrap();
        assert_eq!(&*buffer.text().unwrap(), "goodbye world");
        buffer.remove(7, 6).unwrap();
        assert_eq!(&*buffer.text().unwrap(), "goodbye");
        buffer.insert(7, "!").unwrap();
        assert_eq!(&*buffer.text().unwrap(), "goodbye!");
    }

    #[test]
    fn test_range_errors() {
        let mut buffer = TextBuffer::new("abc");
        assert_eq!(
            buffer.replace(4, 0, "x"),
            Err(DocumentError::OffsetOutOfRange {
                offset: 4,
                length: 3
            })
        );
        assert_eq!(
            buffer.remove(2, 2),
            Err(DocumentError::RangeOutOfBounds {
                offset: 2,
                count: 2,
                length: 3
            })
        );
        assert!(buffer.char_at(3).is_err());
        assert_eq!(buffer.char_at(2).unwrap(), 'c');
        assert_eq!(&*buffer.text().unwrap(), "abc");
    }

    #[test]
    fn test_char_searches() {
        let buffer = TextBuffer::new("a,b,c,d");
        assert_eq!(buffer.index_of(',', 0, 7).unwrap(), Some(1));
        assert_eq!(buffer.index_of(',', 2, 5).unwrap(), Some(3));
        assert_eq!(buffer.index_of(',', 2, 1).unwrap(), None);
        assert_eq!(buffer.last_index_of(',', 0, 7).unwrap(), Some(5));
        assert_eq!(buffer.last_index_of(',', 0, 5).unwrap(), Some(3));
        assert_eq!(buffer.index_of_any(&['c', 'd'], 0, 7).unwrap(), Some(4));
    }

    #[test]
    fn test_string_searches() {
        let buffer = TextBuffer::new("Foo foo FOO");
        assert_eq!(
            buffer
                .index_of_str("foo", 0, 11, StringComparison::Ordinal)
                .unwrap(),
            Some(4)
        );
        assert_eq!(
            buffer
                .index_of_str("foo", 0, 11, StringComparison::OrdinalIgnoreCase)
                .unwrap(),
            Some(0)
        );
        assert_eq!(
            buffer
                .last_index_of_str("foo", 0, 11, StringComparison::OrdinalIgnoreCase)
                .unwrap(),
            Some(8)
        );
        assert_eq!(
            buffer
                .last_index_of_str("foo", 0, 10, StringComparison::OrdinalIgnoreCase)
                .unwrap(),
            Some(4)
        );
        assert_eq!(
            buffer
                .index_of_str("a.b", 0, 11, StringComparison::OrdinalIgnoreCase)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_search_offsets_are_characters() {
        let buffer = TextBuffer::new("你好世界你好");
        assert_eq!(
            buffer
                .index_of_str("你好", 1, 5, StringComparison::Ordinal)
                .unwrap(),
            Some(4)
        );
        assert_eq!(buffer.index_of('界', 0, 6).unwrap(), Some(3));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut buffer = TextBuffer::new("abc");
        let snapshot = buffer.snapshot(None);
        buffer.insert(3, "def").unwrap();
        assert_eq!(&*snapshot.text().unwrap(), "abc");
        assert_eq!(snapshot.text_length(), 3);
        assert_eq!(buffer.text_length(), 6);
    }
}
