/**
Groups sequences of tag symbols into entity spans.

The grouping is strict: a span is only reported when its tokens follow the markup exactly. The
autofix mode first repairs the sequence (see [`repair_tags`]) and then groups it strictly.
*/
use crate::config::DecodeConfig;
use crate::span::EntitySpan;

mod autodetect;
mod repair;
mod schemes;

// Re-exporting
pub use autodetect::AutoDetectError;
pub use repair::{repair_tags, Repair, RepairKind};
pub use schemes::{Markup, Prefix, Tag};

/// Parses every symbol of a sequence with the markup, suffix and delimiter of `config`.
pub fn parse_tags<'a, S: AsRef<str>>(symbols: &'a [S], config: &DecodeConfig) -> Vec<Tag<'a>> {
    symbols
        .iter()
        .map(|s| Tag::parse(s.as_ref(), config.markup(), config.suffix(), config.delimiter()))
        .collect()
}

/// Retrieves the entities of a sequence of tag symbols. Positions are the indices of the
/// symbols. Malformed spans are dropped, unless `config.autofix()` is true, in which case the
/// sequence is repaired first.
///
/// * `symbols`: Tag symbols such as `["B-PER", "E-PER", "O"]`.
/// * `config`: Markup, suffix, delimiter and autofix flag.
pub fn get_entities<S: AsRef<str>>(symbols: &[S], config: &DecodeConfig) -> Vec<EntitySpan> {
    get_entities_with_repairs(symbols, config).0
}

/// Same as [`get_entities`], but also returns the repairs applied by the autofix mode. The list
/// of repairs is empty when autofix is disabled.
pub fn get_entities_with_repairs<S: AsRef<str>>(
    symbols: &[S],
    config: &DecodeConfig,
) -> (Vec<EntitySpan>, Vec<Repair>) {
    let tags = parse_tags(symbols, config);
    if config.autofix() {
        let (repaired, repairs) = repair_tags(&tags, config.markup());
        if !repairs.is_empty() {
            tracing::debug!(count = repairs.len(), repairs = ?repairs, "repaired tag sequence");
        }
        (group_tags(&repaired, config.markup()), repairs)
    } else {
        (group_tags(&tags, config.markup()), Vec::new())
    }
}

/// Strictly groups parsed tags into spans. The sequence is read as if an `O` tag was placed both
/// before its first token and after its last token.
pub fn group_tags(tags: &[Tag], markup: Markup) -> Vec<EntitySpan> {
    let extended = ExtendedTags::new(tags);
    let mut entities = Vec::new();
    let mut i = 0;
    while i < tags.len() {
        let current = &tags[i];
        if current.is_start(extended.prev(i), markup) {
            let end = extended.forward(i + 1, current, markup);
            if extended.is_end(end, markup) {
                entities.push(EntitySpan::new_unchecked(
                    current.category.to_string(),
                    i,
                    end - 1,
                ));
            }
            i = end;
        } else {
            i += 1;
        }
    }
    entities
}

/// View of the tags extended with an `O` tag at both ends.
struct ExtendedTags<'t, 'a> {
    tags: &'t [Tag<'a>],
    outside: Tag<'static>,
}

impl<'t, 'a> ExtendedTags<'t, 'a> {
    fn new(tags: &'t [Tag<'a>]) -> Self {
        Self {
            tags,
            outside: Tag::outside(),
        }
    }

    fn at(&self, i: usize) -> &Tag<'_> {
        self.tags.get(i).unwrap_or(&self.outside)
    }

    fn prev(&self, i: usize) -> &Tag<'_> {
        match i {
            0 => &self.outside,
            _ => self.at(i - 1),
        }
    }

    /// Returns the index following the last token inside the current chunk.
    ///
    /// * `start`: Index at which we are starting to look for a token not inside.
    /// * `prev`: Previous token. It is necessary to know if the token at index `start` is inside
    ///   or not.
    fn forward<'s>(&'s self, start: usize, prev: &'s Tag<'s>, markup: Markup) -> usize {
        let mut prev = prev;
        for j in start..self.tags.len() {
            let current = self.at(j);
            if current.is_inside(prev, markup) {
                prev = current;
            } else {
                return j;
            }
        }
        self.tags.len()
    }

    /// Is the token at `i - 1` the last token of a chunk?
    fn is_end(&self, i: usize, markup: Markup) -> bool {
        self.at(i).is_end(self.prev(i), markup)
    }
}
