//! Whitespace and caret-stop helpers over any [`TextSource`].

use unicode_segmentation::UnicodeSegmentation;

use crate::line_tree::DocumentLine;
use crate::text::TextSource;

/// A plain `(offset, length)` range of characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SimpleSegment {
    /// Start offset.
    pub offset: usize,
    /// Length in characters.
    pub length: usize,
}

impl SimpleSegment {
    /// Create a segment.
    pub fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    /// Offset just past the segment.
    pub fn end_offset(&self) -> usize {
        self.offset + self.length
    }
}

/// Direction of a caret movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalDirection {
    /// Towards the start of the text.
    Backward,
    /// Towards the end of the text.
    Forward,
}

/// Which positions count as caret stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaretPositioningMode {
    /// Every grapheme cluster boundary.
    #[default]
    Normal,
    /// Boundaries between characters of different [`CharacterClass`].
    WordBorder,
    /// Word borders that start a word (not followed by whitespace). The end of the text is
    /// never a word start.
    WordStart,
}

/// Coarse classification used to find word borders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterClass {
    /// Punctuation, symbols and anything else.
    Other,
    /// Whitespace other than line terminators.
    Whitespace,
    /// Letters, digits and `_`.
    IdentifierPart,
    /// `\r` or `\n`.
    LineTerminator,
}

/// Classify `c`.
pub fn character_class(c: char) -> CharacterClass {
    match c {
        '\r' | '\n' => CharacterClass::LineTerminator,
        '_' => CharacterClass::IdentifierPart,
        c if c.is_whitespace() => CharacterClass::Whitespace,
        c if c.is_alphanumeric() => CharacterClass::IdentifierPart,
        _ => CharacterClass::Other,
    }
}

fn is_tab_or_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

/// The run of spaces and tabs starting at `offset`.
pub fn get_whitespace_after<S: TextSource + ?Sized>(source: &S, offset: usize) -> SimpleSegment {
    let length = source.text_length();
    let start = offset.min(length);
    let run = source
        .rope()
        .chars_at(start)
        .take_while(|&c| is_tab_or_space(c))
        .count();
    SimpleSegment::new(start, run)
}

/// The run of spaces and tabs ending at `offset`.
pub fn get_whitespace_before<S: TextSource + ?Sized>(source: &S, offset: usize) -> SimpleSegment {
    let end = offset.min(source.text_length());
    let mut chars = source.rope().chars_at(end);
    let mut start = end;
    while let Some(c) = chars.prev() {
        if !is_tab_or_space(c) {
            break;
        }
        start -= 1;
    }
    SimpleSegment::new(start, end - start)
}

/// Indentation of `line`.
pub fn get_leading_whitespace<S: TextSource + ?Sized>(
    source: &S,
    line: &DocumentLine<'_>,
) -> SimpleSegment {
    let segment = get_whitespace_after(source, line.offset());
    SimpleSegment::new(segment.offset, segment.length.min(line.length()))
}

/// Whitespace at the end of `line`, excluding the delimiter. A line made only of whitespace has
/// no trailing whitespace; all of it is leading.
pub fn get_trailing_whitespace<S: TextSource + ?Sized>(
    source: &S,
    line: &DocumentLine<'_>,
) -> SimpleSegment {
    let segment = get_whitespace_before(source, line.end_offset());
    if segment.offset <= line.offset() {
        SimpleSegment::new(line.end_offset(), 0)
    } else {
        segment
    }
}

const WINDOW: usize = 256;
const MARGIN: usize = 32;

/// Characters around a position together with their grapheme cluster boundaries.
struct GraphemeWindow {
    start: usize,
    chars: Vec<char>,
    boundaries: Vec<bool>,
}

impl GraphemeWindow {
    fn around<S: TextSource + ?Sized>(source: &S, position: usize) -> Self {
        let length = source.text_length();
        let start = position.saturating_sub(WINDOW);
        let end = position.saturating_add(WINDOW).min(length);
        let text = source.rope().slice(start..end).to_string();
        let chars: Vec<char> = text.chars().collect();
        let mut boundaries = vec![false; chars.len() + 1];
        let mut index = 0;
        for grapheme in text.graphemes(true) {
            boundaries[index] = true;
            index += grapheme.chars().count();
        }
        boundaries[chars.len()] = true;
        Self {
            start,
            chars,
            boundaries,
        }
    }

    fn covers(&self, position: usize, length: usize) -> bool {
        let end = self.start + self.chars.len();
        position > self.start
            && position < end
            && (self.start == 0 || position >= self.start + MARGIN)
            && (end == length || position + MARGIN <= end)
    }

    fn is_boundary(&self, position: usize) -> bool {
        self.boundaries[position - self.start]
    }

    /// First character of the cluster that ends at `position`.
    fn cluster_before(&self, position: usize) -> char {
        let mut index = position - self.start - 1;
        while index > 0 && !self.boundaries[index] {
            index -= 1;
        }
        self.chars[index]
    }

    fn char_at(&self, position: usize) -> char {
        self.chars[position - self.start]
    }
}

fn stops_between(mode: CaretPositioningMode, before: CharacterClass, after: CharacterClass) -> bool {
    match mode {
        CaretPositioningMode::Normal => true,
        CaretPositioningMode::WordBorder => before != after,
        CaretPositioningMode::WordStart => {
            before != after
                && !matches!(
                    after,
                    CharacterClass::Whitespace | CharacterClass::LineTerminator
                )
        }
    }
}

/// The next caret stop from `offset` in `direction`, or `None` if there is none.
///
/// `offset` may lie outside the text: `-1` moving forward finds the first stop, and any offset
/// past the end moving backward finds the last one.
pub fn next_caret_position<S: TextSource + ?Sized>(
    source: &S,
    offset: isize,
    direction: LogicalDirection,
    mode: CaretPositioningMode,
) -> Option<usize> {
    let length = source.text_length();
    if length == 0 {
        // An empty text has a normal stop at 0 but no word borders.
        let reaches_zero = match direction {
            LogicalDirection::Forward => offset < 0,
            LogicalDirection::Backward => offset > 0,
        };
        return (mode == CaretPositioningMode::Normal && reaches_zero).then_some(0);
    }

    let rope = source.rope();
    let mut window: Option<GraphemeWindow> = None;
    let mut offset = offset;
    loop {
        let next = match direction {
            LogicalDirection::Forward => offset.checked_add(1)?,
            LogicalDirection::Backward => offset.checked_sub(1)?,
        };
        let position = usize::try_from(next).ok()?;
        if position > length {
            return None;
        }

        if position == 0 {
            if mode == CaretPositioningMode::Normal || !rope.char(0).is_whitespace() {
                return Some(0);
            }
        } else if position == length {
            let last_is_border = mode == CaretPositioningMode::Normal
                || !rope.char(length - 1).is_whitespace();
            if mode != CaretPositioningMode::WordStart && last_is_border {
                return Some(position);
            }
        } else {
            if !window.as_ref().is_some_and(|w| w.covers(position, length)) {
                window = Some(GraphemeWindow::around(source, position));
            }
            if let Some(w) = &window
                && w.is_boundary(position)
            {
                let before = character_class(w.cluster_before(position));
                let after = character_class(w.char_at(position));
                if stops_between(mode, before, after) {
                    return Some(position);
                }
            }
        }
        offset = next;
    }
}
