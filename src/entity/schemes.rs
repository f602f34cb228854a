/**
This modules gives the tooling necessary to parse tag symbols (such as `B-PER`) and to decide,
for every supported markup, where a chunk starts, continues and ends.
*/
use crate::config::ConfigError;
use enum_iterator::{all, Sequence};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Sequence, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
/// Enumeration of the supported markups. They are used to indicate how we are supposed to parse
/// and chunk the different tag symbols.
pub enum Markup {
    /// `B`, `I` and `O` prefixes (also known as IOB2).
    Bio,
    /// `B`, `I`, `O`, `E` and `S` prefixes (also known as BIOES or IOBES).
    Bios,
    /// `B`, `I`, `L`, `O` and `U` prefixes. `L` plays the role of `E` and `U` the role of `S`.
    Bilou,
}

impl Markup {
    pub(crate) fn supported() -> String {
        all::<Markup>().map(|m| m.to_string()).join(", ")
    }

    /// Reads the prefix character of a tag symbol. Characters which are not part of this markup
    /// are rejected.
    pub(crate) fn prefix_of(&self, c: char) -> Option<Prefix> {
        match (self, c) {
            (_, 'O') => Some(Prefix::O),
            (_, 'B') => Some(Prefix::B),
            (_, 'I') => Some(Prefix::I),
            (Self::Bios, 'E') | (Self::Bilou, 'L') => Some(Prefix::E),
            (Self::Bios, 'S') | (Self::Bilou, 'U') => Some(Prefix::S),
            _ => None,
        }
    }

    /// The character used by this markup to write `prefix`.
    pub(crate) fn letter(&self, prefix: Prefix) -> char {
        match (self, prefix) {
            (_, Prefix::O) => 'O',
            (_, Prefix::B) => 'B',
            (_, Prefix::I) => 'I',
            (Self::Bilou, Prefix::E) => 'L',
            (Self::Bilou, Prefix::S) => 'U',
            (_, Prefix::E) => 'E',
            (_, Prefix::S) => 'S',
        }
    }

    /// Does this markup mark the last token of a span?
    pub(crate) fn has_closing_prefixes(&self) -> bool {
        !matches!(self, Self::Bio)
    }

    pub(crate) fn start_patterns(&self) -> &'static [(PatternPrefix, PatternPrefix, Cond)] {
        match self {
            Self::Bio => &BIO_START_PATTERNS,
            Self::Bios | Self::Bilou => &BIOS_START_PATTERNS,
        }
    }

    pub(crate) fn inside_patterns(&self) -> &'static [(PatternPrefix, PatternPrefix, Cond)] {
        match self {
            Self::Bio => &BIO_INSIDE_PATTERNS,
            Self::Bios | Self::Bilou => &BIOS_INSIDE_PATTERNS,
        }
    }

    pub(crate) fn end_patterns(&self) -> &'static [(PatternPrefix, PatternPrefix, Cond)] {
        match self {
            Self::Bio => &BIO_END_PATTERNS,
            Self::Bios | Self::Bilou => &BIOS_END_PATTERNS,
        }
    }
}

impl FromStr for Markup {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bio" | "iob2" => Ok(Self::Bio),
            "bios" | "bioes" | "iobes" => Ok(Self::Bios),
            "bilou" => Ok(Self::Bilou),
            _ => Err(ConfigError::UnknownMarkup(String::from(s))),
        }
    }
}

impl TryFrom<String> for Markup {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Markup> for String {
    fn from(value: Markup) -> Self {
        value.to_string()
    }
}

impl Display for Markup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bio => "bio",
            Self::Bios => "bios",
            Self::Bilou => "bilou",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, PartialEq, Hash, Clone, Copy, Sequence, Eq, Serialize, Deserialize)]
/// Prefix represent an annotation specifying the place of a token in a chunk. `E` and `S` are
/// written `L` and `U` with the Bilou markup.
pub enum Prefix {
    /// Outside of any chunk.
    O,
    /// First token of a chunk.
    B,
    /// Token inside a chunk.
    I,
    /// Last token of a chunk.
    E,
    /// Chunk made of a single token.
    S,
}

impl Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, PartialEq, Hash, Clone, Copy)]
/// The prefixes used by the pattern tables. `Any` is a marker matching every prefix.
pub(crate) enum PatternPrefix {
    O,
    B,
    I,
    E,
    S,
    Any,
}

impl PatternPrefix {
    /// This functions verifies that this pattern prefix matches the prefix of a token.
    fn matches(&self, prefix: Prefix) -> bool {
        matches!(
            (self, prefix),
            (PatternPrefix::Any, _)
                | (PatternPrefix::O, Prefix::O)
                | (PatternPrefix::B, Prefix::B)
                | (PatternPrefix::I, Prefix::I)
                | (PatternPrefix::E, Prefix::E)
                | (PatternPrefix::S, Prefix::S)
        )
    }
}

#[derive(Debug, PartialEq, Hash, Clone, Copy)]
/// Condition on the categories of the previous and current tokens.
pub(crate) enum Cond {
    Same,
    Diff,
    Any,
}

use PatternPrefix as P;

const BIO_START_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 1] = [(P::Any, P::B, Cond::Any)];
const BIO_INSIDE_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 2] =
    [(P::B, P::I, Cond::Same), (P::I, P::I, Cond::Same)];
const BIO_END_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 6] = [
    (P::I, P::O, Cond::Any),
    (P::I, P::I, Cond::Diff),
    (P::I, P::B, Cond::Any),
    (P::B, P::O, Cond::Any),
    (P::B, P::I, Cond::Diff),
    (P::B, P::B, Cond::Any),
];

const BIOS_START_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 2] =
    [(P::Any, P::B, Cond::Any), (P::Any, P::S, Cond::Any)];
const BIOS_INSIDE_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 4] = [
    (P::B, P::I, Cond::Same),
    (P::B, P::E, Cond::Same),
    (P::I, P::I, Cond::Same),
    (P::I, P::E, Cond::Same),
];
const BIOS_END_PATTERNS: [(PatternPrefix, PatternPrefix, Cond); 2] =
    [(P::S, P::Any, Cond::Any), (P::E, P::Any, Cond::Any)];

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
/// A parsed tag symbol, such as `B-PER`. The category is borrowed from the symbol when possible.
pub struct Tag<'a> {
    pub(crate) prefix: Prefix,
    /// The category, such as `"PER"`. Empty for the `O` tag.
    pub(crate) category: Cow<'a, str>,
}

impl<'a> Default for Tag<'a> {
    fn default() -> Self {
        Self::outside()
    }
}

impl<'a> Tag<'a> {
    pub fn outside() -> Self {
        Tag {
            prefix: Prefix::O,
            category: Cow::Borrowed(""),
        }
    }

    pub fn new<S: Into<Cow<'a, str>>>(prefix: Prefix, category: S) -> Self {
        match prefix {
            Prefix::O => Self::outside(),
            _ => Tag {
                prefix,
                category: category.into(),
            },
        }
    }

    /// Parses a tag symbol.
    ///
    /// * `symbol`: The symbol to parse, such as `B-PER` or `PER-B`.
    /// * `markup`: Only the prefixes of this markup are accepted.
    /// * `suffix`: Is the prefix located at the end of the symbol?
    /// * `delimiter`: The character separating the prefix from the category.
    ///
    /// Every symbol which can not be read (special tokens such as `[CLS]`, prefixes foreign to
    /// the markup, missing category) is read as `O`.
    pub fn parse(symbol: &'a str, markup: Markup, suffix: bool, delimiter: char) -> Self {
        Self::try_parse(symbol, markup, suffix, delimiter).unwrap_or_default()
    }

    fn try_parse(symbol: &'a str, markup: Markup, suffix: bool, delimiter: char) -> Option<Self> {
        let mut chars = symbol.chars();
        let prefix_char = if suffix {
            chars.next_back()?
        } else {
            chars.next()?
        };
        let prefix = markup.prefix_of(prefix_char)?;
        if prefix == Prefix::O {
            return Some(Self::outside());
        }
        let rest = chars.as_str();
        let category = if suffix {
            rest.strip_suffix(delimiter)?
        } else {
            rest.strip_prefix(delimiter)?
        };
        if category.is_empty() {
            return None;
        }
        Some(Tag {
            prefix,
            category: Cow::Borrowed(category),
        })
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn is_outside(&self) -> bool {
        self.prefix == Prefix::O
    }

    /// Writes the tag back as a symbol.
    pub fn render(&self, markup: Markup, suffix: bool, delimiter: char) -> String {
        let letter = markup.letter(self.prefix);
        match (self.prefix, suffix) {
            (Prefix::O, _) => String::from(letter),
            (_, false) => format!("{}{}{}", letter, delimiter, self.category),
            (_, true) => format!("{}{}{}", self.category, delimiter, letter),
        }
    }

    pub fn into_owned(self) -> Tag<'static> {
        Tag {
            prefix: self.prefix,
            category: Cow::Owned(self.category.into_owned()),
        }
    }

    #[inline]
    fn check_category(&self, prev: &Tag, cond: Cond) -> bool {
        match cond {
            Cond::Any => true,
            Cond::Same => prev.category == self.category,
            Cond::Diff => prev.category != self.category,
        }
    }

    /// Check whether the prefix patterns are matched.
    ///
    /// * `prev`: Previous token
    /// * `patterns`: Patterns to match the token against
    fn check_patterns(&self, prev: &Tag, patterns: &[(PatternPrefix, PatternPrefix, Cond)]) -> bool {
        patterns.iter().any(|(prev_prefix, current_prefix, cond)| {
            prev_prefix.matches(prev.prefix)
                && current_prefix.matches(self.prefix)
                && self.check_category(prev, *cond)
        })
    }

    /// Check whether the current token is the start of chunk.
    pub(crate) fn is_start(&self, prev: &Tag, markup: Markup) -> bool {
        self.check_patterns(prev, markup.start_patterns())
    }

    /// Check whether the current token is the inside of chunk.
    pub(crate) fn is_inside(&self, prev: &Tag, markup: Markup) -> bool {
        self.check_patterns(prev, markup.inside_patterns())
    }

    /// Check whether the *previous* token is the end of chunk.
    pub(crate) fn is_end(&self, prev: &Tag, markup: Markup) -> bool {
        self.check_patterns(prev, markup.end_patterns())
    }
}

impl<'a> Display for Tag<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.prefix {
            Prefix::O => write!(f, "O"),
            _ => write!(f, "{}-{}", self.prefix, self.category),
        }
    }
}
