/**
Entity spans: the structured output of every decoder and the unit compared by the scorer.
*/
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::Display;

/// An entity span represents a named object in named entity recognition (NER). It contains a
/// start and an end (i.e. the *inclusive* token indices where it starts and ends) and a category,
/// which is the associated entity class (such as `LOC`, `NAME`, `PER`, etc.).
///
/// Spans serialize as a `[category, start, end]` triple, the format used by prediction records.
#[derive(Debug, Hash, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "(String, usize, usize)", into = "(String, usize, usize)")]
pub struct EntitySpan {
    // Field order matters for the derived `Ord`: spans sort by position first.
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) category: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The start of a span was found after its end.
pub struct InvertedSpanError {
    pub start: usize,
    pub end: usize,
}

impl Display for InvertedSpanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid span: start ({}) is located after end ({})",
            self.start, self.end
        )
    }
}

impl Error for InvertedSpanError {}

impl EntitySpan {
    /// Builds a span. Fails if `start > end`.
    pub fn new<S: Into<String>>(
        category: S,
        start: usize,
        end: usize,
    ) -> Result<Self, InvertedSpanError> {
        if start > end {
            return Err(InvertedSpanError { start, end });
        }
        Ok(Self {
            start,
            end,
            category: category.into(),
        })
    }

    /// Only used by decoders, which already guarantee `start <= end`.
    pub(crate) fn new_unchecked(category: String, start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self {
            start,
            end,
            category,
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of tokens covered by the span.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// A span always covers at least one token.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns a copy of this span moved `offset` tokens to the right.
    pub fn shifted(&self, offset: usize) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            category: self.category.clone(),
        }
    }

    pub fn as_tuple(&self) -> (&str, usize, usize) {
        (self.category.as_str(), self.start, self.end)
    }

    /// Slices the mention out of the original text.
    ///
    /// * `text`: The original text.
    /// * `offsets`: Character offsets `(begin, end)` (end exclusive) of every token of `text`.
    ///
    /// Returns `None` if the span or the offsets fall outside of the text.
    pub fn mention<'t>(&self, text: &'t str, offsets: &[(usize, usize)]) -> Option<&'t str> {
        let (char_begin, _) = *offsets.get(self.start)?;
        let (_, char_end) = *offsets.get(self.end)?;
        if char_begin > char_end {
            return None;
        }
        let mut indices = text.char_indices().map(|(i, _)| i).chain([text.len()]);
        let byte_begin = indices.nth(char_begin)?;
        let byte_end = match char_end - char_begin {
            0 => byte_begin,
            n => indices.nth(n - 1)?,
        };
        text.get(byte_begin..byte_end)
    }
}

impl Display for EntitySpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.category, self.start, self.end)
    }
}

impl TryFrom<(String, usize, usize)> for EntitySpan {
    type Error = InvertedSpanError;
    fn try_from(value: (String, usize, usize)) -> Result<Self, Self::Error> {
        Self::new(value.0, value.1, value.2)
    }
}

impl From<EntitySpan> for (String, usize, usize) {
    fn from(value: EntitySpan) -> Self {
        (value.category, value.start, value.end)
    }
}
