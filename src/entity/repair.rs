use crate::entity::schemes::{Markup, Prefix, Tag};
use serde::{Deserialize, Serialize};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Why a tag was rewritten.
pub enum RepairKind {
    /// An inside (or last) tag without an open span of its category.
    OrphanInside,
    /// A last tag without an open span of its category. Becomes a single-token span.
    OrphanEnd,
    /// The category changed in the middle of a span. The open span is closed on the previous
    /// token.
    CategoryMismatch,
    /// The span was still open before an `O`, a new span or the end of the sequence.
    Unterminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// A single rewrite performed by [`repair_tags`]. When a token is rewritten twice, only the
/// first and last prefixes are kept.
pub struct Repair {
    pub index: usize,
    pub category: String,
    pub from: Prefix,
    pub to: Prefix,
    pub kind: RepairKind,
}

impl Display for Repair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}-{} -> {}-{} ({:?})",
            self.index, self.from, self.category, self.to, self.category, self.kind
        )
    }
}

/// Repairs a sequence of tags so that every non-`O` tag belongs to a well-formed span. The input
/// is left untouched; the repaired sequence is returned with the list of rewrites.
///
/// The policy is the following:
/// * an `I-X` which does not continue a span of category `X` opens a new span (`B-X`);
/// * a category change in the middle of a span closes the span on the previous token;
/// * an `E-X` which does not continue a span of category `X` becomes `S-X`;
/// * a span still open before `O`, before a new span or at the end of the sequence is closed on
///   its last token.
///
/// With the `Bio` markup, spans do not need to be closed and only the first rule applies.
pub fn repair_tags<'a>(tags: &[Tag<'a>], markup: Markup) -> (Vec<Tag<'a>>, Vec<Repair>) {
    let mut repairer = Repairer {
        tags: tags.to_vec(),
        repairs: Vec::new(),
        closes: markup.has_closing_prefixes(),
    };
    // Index of the last token of the open span, if any.
    let mut open: Option<usize> = None;
    for i in 0..tags.len() {
        let continues = open.is_some_and(|j| repairer.tags[j].category == tags[i].category);
        match tags[i].prefix {
            Prefix::O => {
                repairer.close(open.take(), RepairKind::Unterminated);
            }
            Prefix::B => {
                repairer.close(open.take(), RepairKind::Unterminated);
                open = Some(i);
            }
            Prefix::S => {
                repairer.close(open.take(), RepairKind::Unterminated);
            }
            Prefix::I if continues => {
                open = Some(i);
            }
            Prefix::I => {
                let kind = match open {
                    Some(_) => RepairKind::CategoryMismatch,
                    None => RepairKind::OrphanInside,
                };
                repairer.close(open.take(), RepairKind::CategoryMismatch);
                repairer.rewrite(i, Prefix::B, kind);
                open = Some(i);
            }
            Prefix::E if continues => {
                open = None;
            }
            Prefix::E => {
                let kind = match open {
                    Some(_) => RepairKind::CategoryMismatch,
                    None => RepairKind::OrphanEnd,
                };
                repairer.close(open.take(), RepairKind::CategoryMismatch);
                repairer.rewrite(i, Prefix::S, kind);
            }
        }
    }
    repairer.close(open, RepairKind::Unterminated);
    (repairer.tags, repairer.repairs)
}

struct Repairer<'a> {
    tags: Vec<Tag<'a>>,
    repairs: Vec<Repair>,
    closes: bool,
}

impl<'a> Repairer<'a> {
    /// Closes the span whose last token is at `last`.
    fn close(&mut self, last: Option<usize>, kind: RepairKind) {
        let Some(j) = last else { return };
        if !self.closes {
            return;
        }
        let to = match self.tags[j].prefix {
            Prefix::B => Prefix::S,
            Prefix::I => Prefix::E,
            _ => return,
        };
        self.rewrite(j, to, kind);
    }

    fn rewrite(&mut self, index: usize, to: Prefix, kind: RepairKind) {
        let from = self.tags[index].prefix;
        self.tags[index].prefix = to;
        match self.repairs.last_mut() {
            Some(previous) if previous.index == index => previous.to = to,
            _ => self.repairs.push(Repair {
                index,
                category: self.tags[index].category.to_string(),
                from,
                to,
                kind,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DecodeConfigBuilder;
    use crate::entity::{get_entities_with_repairs, group_tags, parse_tags};
    use crate::metrics::DivByZeroStrat;
    use quickcheck::{self, TestResult};
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    fn parse(symbols: &[&'static str], markup: Markup) -> Vec<Tag<'static>> {
        symbols
            .iter()
            .map(|s| Tag::parse(s, markup, false, '-'))
            .collect()
    }

    fn render(tags: &[Tag], markup: Markup) -> Vec<String> {
        tags.iter().map(|t| t.render(markup, false, '-')).collect()
    }

    #[rstest]
    #[case(vec!["O", "I-PER", "E-PER"], vec!["O", "B-PER", "E-PER"])]
    #[case(vec!["B-PER", "I-PER", "O"], vec!["B-PER", "E-PER", "O"])]
    #[case(vec!["B-PER", "I-LOC", "E-LOC"], vec!["S-PER", "B-LOC", "E-LOC"])]
    #[case(vec!["B-PER", "I-PER", "I-LOC", "E-LOC"], vec!["B-PER", "E-PER", "B-LOC", "E-LOC"])]
    #[case(vec!["O", "E-PER"], vec!["O", "S-PER"])]
    #[case(vec!["B-PER"], vec!["S-PER"])]
    #[case(vec!["I-PER"], vec!["S-PER"])]
    #[case(vec!["B-PER", "B-LOC", "E-LOC"], vec!["S-PER", "B-LOC", "E-LOC"])]
    #[case(vec!["B-PER", "E-LOC"], vec!["S-PER", "S-LOC"])]
    fn test_repair_bios(#[case] input: Vec<&'static str>, #[case] expected: Vec<&str>) {
        let tags = parse(&input, Markup::Bios);
        let (repaired, _) = repair_tags(&tags, Markup::Bios);
        assert_eq!(render(&repaired, Markup::Bios), expected);
    }

    #[rstest]
    #[case(vec!["O", "I-PER", "I-PER"], vec!["O", "B-PER", "I-PER"])]
    #[case(vec!["B-PER", "I-LOC"], vec!["B-PER", "B-LOC"])]
    #[case(vec!["B-PER", "I-PER", "O"], vec!["B-PER", "I-PER", "O"])]
    fn test_repair_bio(#[case] input: Vec<&'static str>, #[case] expected: Vec<&str>) {
        let tags = parse(&input, Markup::Bio);
        let (repaired, _) = repair_tags(&tags, Markup::Bio);
        assert_eq!(render(&repaired, Markup::Bio), expected);
    }

    #[test]
    fn test_repairs_are_reported() {
        let tags = parse(&["O", "I-PER", "O"], Markup::Bios);
        let (_, repairs) = repair_tags(&tags, Markup::Bios);
        assert_eq!(
            repairs,
            vec![Repair {
                index: 1,
                category: String::from("PER"),
                from: Prefix::I,
                to: Prefix::S,
                kind: RepairKind::OrphanInside,
            }]
        );
        assert_eq!(tags[1].prefix(), Prefix::I);
    }

    #[test]
    fn test_repair_keeps_bilou_letters() {
        let tags = parse(&["B-PER", "I-PER"], Markup::Bilou);
        let (repaired, _) = repair_tags(&tags, Markup::Bilou);
        assert_eq!(render(&repaired, Markup::Bilou), vec!["B-PER", "L-PER"]);
    }

    #[test]
    fn test_repair_serde() {
        let tags = parse(&["B-PER", "I-PER"], Markup::Bios);
        let (_, repairs) = repair_tags(&tags, Markup::Bios);
        let json = serde_json::to_string(&repairs).unwrap();
        assert_eq!(
            json,
            r#"[{"index":1,"category":"PER","from":"I","to":"E","kind":"Unterminated"}]"#
        );
        let parsed: Vec<Repair> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, repairs);
    }

    #[quickcheck]
    fn propertie_test_autofix_accepts_any_symbols(
        picks: Vec<(u8, String)>,
        markup: Markup,
        suffix: bool,
    ) -> TestResult {
        if picks.len() > 64 {
            return TestResult::discard();
        }
        let letters = ['O', 'B', 'I', 'E', 'S', 'L', 'U'];
        // Half raw strings, half symbols shaped like tags.
        let symbols: Vec<String> = picks
            .into_iter()
            .map(|(p, s)| match p % 2 {
                0 => s,
                _ if suffix => format!("{}-{}", s, letters[p as usize % letters.len()]),
                _ => format!("{}-{}", letters[p as usize % letters.len()], s),
            })
            .collect();
        let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
            .markup(markup)
            .suffix(suffix)
            .autofix(true)
            .build()
            .unwrap();
        let (spans, repairs) = get_entities_with_repairs(&symbols, &config);
        let in_bounds = spans
            .iter()
            .all(|e| e.start() <= e.end() && e.end() < symbols.len());
        let disjoint = spans.windows(2).all(|w| w[0].end() < w[1].start());
        let repaired_tokens = repairs.iter().all(|r| r.index < symbols.len());
        let tagged = parse_tags(&symbols, &config)
            .iter()
            .filter(|t| !t.is_outside())
            .count();
        let covered: usize = spans.iter().map(|e| e.len()).sum();
        TestResult::from_bool(in_bounds && disjoint && repaired_tokens && covered == tagged)
    }

    #[quickcheck]
    fn propertie_test_every_tagged_token_ends_in_a_span(picks: Vec<(u8, bool)>) -> TestResult {
        if picks.len() > 64 {
            return TestResult::discard();
        }
        let prefixes = [Prefix::O, Prefix::B, Prefix::I, Prefix::E, Prefix::S];
        let tags: Vec<Tag> = picks
            .iter()
            .map(|(p, per)| {
                let category = if *per { "PER" } else { "LOC" };
                Tag::new(prefixes[*p as usize % prefixes.len()], category)
            })
            .collect();
        let (repaired, _) = repair_tags(&tags, Markup::Bios);
        let covered: usize = group_tags(&repaired, Markup::Bios)
            .iter()
            .map(|e| e.len())
            .sum();
        let tagged = repaired.iter().filter(|t| !t.is_outside()).count();
        let (twice, second_repairs) = repair_tags(&repaired, Markup::Bios);
        TestResult::from_bool(covered == tagged && twice == repaired && second_repairs.is_empty())
    }
}
