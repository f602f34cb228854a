use crate::entity::schemes::Markup;
use ahash::AHashSet;
use itertools::Itertools;
use std::{error::Error, fmt::Display};

#[derive(Debug, PartialEq, Eq)]
pub enum AutoDetectError {
    /// The prefixes found in the symbols do not belong to a single markup.
    NoMarkupMatches(Vec<char>),
}

impl Display for AutoDetectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMarkupMatches(prefixes) => write!(
                f,
                "No markup could be detected from the following prefixes: {:?}",
                prefixes
            ),
        }
    }
}

impl Error for AutoDetectError {}

const BIO_PREFIXES: [char; 3] = ['B', 'I', 'O'];
const BIOS_PREFIXES: [char; 5] = ['B', 'I', 'O', 'E', 'S'];
const BILOU_PREFIXES: [char; 5] = ['B', 'I', 'O', 'L', 'U'];

/// This impl block contains the logic of the auto-detect feature.
impl Markup {
    /// Detects the markup of a tag vocabulary (e.g. the labels of a tagging model) by looking at
    /// the prefixes it uses. Symbols which do not look like tags, such as `[CLS]`, are ignored.
    /// The smallest compatible markup is returned, so a vocabulary using only `B`, `I` and `O` is
    /// read as `Bio`.
    ///
    /// * `symbols`: The tag symbols.
    /// * `suffix`: Is the prefix located at the end of the symbols?
    /// * `delimiter`: The character separating the prefix from the category.
    pub fn detect<S: AsRef<str>>(
        symbols: &[S],
        suffix: bool,
        delimiter: char,
    ) -> Result<Markup, AutoDetectError> {
        let prefixes: AHashSet<char> = symbols
            .iter()
            .filter_map(|s| prefix_char(s.as_ref(), suffix, delimiter))
            .collect();
        let fits = |allowed: &[char]| prefixes.iter().all(|p| allowed.contains(p));
        if fits(&BIO_PREFIXES) {
            Ok(Markup::Bio)
        } else if fits(&BIOS_PREFIXES) {
            Ok(Markup::Bios)
        } else if fits(&BILOU_PREFIXES) {
            Ok(Markup::Bilou)
        } else {
            Err(AutoDetectError::NoMarkupMatches(
                prefixes.into_iter().sorted().collect(),
            ))
        }
    }
}

/// Returns the prefix character of a symbol shaped like a tag, `O` included.
fn prefix_char(symbol: &str, suffix: bool, delimiter: char) -> Option<char> {
    if symbol == "O" {
        return Some('O');
    }
    let mut chars = symbol.chars();
    let (prefix, separator) = if suffix {
        (chars.next_back()?, chars.next_back()?)
    } else {
        (chars.next()?, chars.next()?)
    };
    let has_category = chars.next().is_some();
    (separator == delimiter && has_category && prefix.is_ascii_uppercase()).then_some(prefix)
}
