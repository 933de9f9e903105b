//! Line ending helpers.
//!
//! The document keeps text exactly as given: `"\n"`, `"\r"` and `"\r\n"` are all line
//! delimiters, and a `'\r'` directly followed by `'\n'` always forms a single two-character
//! delimiter. Offsets are character offsets.

use std::iter::Peekable;
use std::str::Chars;

/// A line delimiter found in a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewLine {
    /// Character offset of the first delimiter character.
    pub offset: usize,
    /// Delimiter length: 1 for `"\n"`/`"\r"`, 2 for `"\r\n"`.
    pub length: usize,
}

impl NewLine {
    /// Offset directly after the delimiter.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Iterator over the delimiters in a character stream.
pub struct NewLines<I: Iterator<Item = char>> {
    chars: Peekable<I>,
    position: usize,
}

impl<I: Iterator<Item = char>> NewLines<I> {
    /// Scan `chars`, reporting offsets relative to the first character.
    pub fn new(chars: I) -> Self {
        Self {
            chars: chars.peekable(),
            position: 0,
        }
    }
}

impl<I: Iterator<Item = char>> Iterator for NewLines<I> {
    type Item = NewLine;

    fn next(&mut self) -> Option<NewLine> {
        loop {
            let ch = self.chars.next()?;
            let offset = self.position;
            self.position += 1;
            match ch {
                '\n' => return Some(NewLine { offset, length: 1 }),
                '\r' => {
                    if self.chars.peek() == Some(&'\n') {
                        self.chars.next();
                        self.position += 1;
                        return Some(NewLine { offset, length: 2 });
                    }
                    return Some(NewLine { offset, length: 1 });
                }
                _ => {}
            }
        }
    }
}

/// Iterate over all delimiters of `text`.
pub fn newlines(text: &str) -> NewLines<Chars<'_>> {
    NewLines::new(text.chars())
}

/// Find the first delimiter at or after character `offset`.
pub fn find_next_newline(text: &str, offset: usize) -> Option<NewLine> {
    NewLines::new(text.chars().skip(offset))
        .next()
        .map(|nl| NewLine {
            offset: nl.offset + offset,
            length: nl.length,
        })
}

/// Returns `true` for the two characters that can start or end a delimiter.
pub fn is_newline(ch: char) -> bool {
    ch == '\n' || ch == '\r'
}

/// A newline sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// Unix-style LF (`'\n'`).
    #[default]
    Lf,
    /// Windows-style CRLF (`"\r\n"`).
    Crlf,
    /// Classic Mac CR (`'\r'`).
    Cr,
}

impl LineEnding {
    /// Detect the dominant line ending from a source text.
    ///
    /// Policy: any CRLF gives [`LineEnding::Crlf`], otherwise any lone CR gives
    /// [`LineEnding::Cr`], otherwise [`LineEnding::Lf`].
    pub fn detect_in_text(text: &str) -> Self {
        if text.contains("\r\n") {
            Self::Crlf
        } else if text.contains('\r') {
            Self::Cr
        } else {
            Self::Lf
        }
    }

    /// The delimiter text.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::Crlf => "\r\n",
            Self::Cr => "\r",
        }
    }

    /// Delimiter length in characters.
    pub fn char_len(self) -> usize {
        self.as_str().len()
    }

    /// Replace every delimiter in `text` with this line ending.
    pub fn normalize(self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    out.push_str(self.as_str());
                }
                '\n' => out.push_str(self.as_str()),
                _ => out.push(ch),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newlines_mixed() {
        let found: Vec<NewLine> = newlines("a\nb\r\nc\rd").collect();
        assert_eq!(
            found,
            vec![
                NewLine { offset: 1, length: 1 },
                NewLine { offset: 3, length: 2 },
                NewLine { offset: 6, length: 1 },
            ]
        );
    }

    #[test]
    fn test_lf_cr_is_two_delimiters() {
        let found: Vec<NewLine> = newlines("a\n\rb").collect();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], NewLine { offset: 2, length: 1 });
    }

    #[test]
    fn test_find_next_newline_from_offset() {
        assert_eq!(
            find_next_newline("ab\r\ncd\ne", 3),
            Some(NewLine { offset: 3, length: 1 })
        );
        assert_eq!(
            find_next_newline("ab\r\ncd\ne", 4),
            Some(NewLine { offset: 6, length: 1 })
        );
        assert_eq!(find_next_newline("abc", 0), None);
    }

    #[test]
    fn test_offsets_are_characters() {
        let found = find_next_newline("你好\n", 0);
        assert_eq!(found, Some(NewLine { offset: 2, length: 1 }));
    }

    #[test]
    fn test_detect_and_normalize() {
        assert_eq!(LineEnding::detect_in_text("a\r\nb\nc"), LineEnding::Crlf);
        assert_eq!(LineEnding::detect_in_text("a\rb"), LineEnding::Cr);
        assert_eq!(LineEnding::detect_in_text("a\nb"), LineEnding::Lf);
        assert_eq!(LineEnding::Lf.normalize("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(LineEnding::Crlf.normalize("a\nb\r"), "a\r\nb\r\n");
    }
}
