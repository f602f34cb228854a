use super::sequence::{check_tag_channels, spans_from_tag_ids};
use super::{Decode, DecodeError, FloatExt, ScoreTensor};
use crate::config::DecodeConfig;
use crate::entity::{Markup, Prefix, Tag};
use crate::label::LabelMap;
use crate::span::EntitySpan;
use itertools::Itertools;
use ndarray::{s, Array1, Array2, Axis, Zip};
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Transition scores between tags. `transitions[[i, j]]` is added when tag `j` follows tag `i`,
/// `start[j]` when the sequence starts with `j` and `end[i]` when it ends with `i`. Illegal
/// transitions are worth `-inf`.
pub struct TransitionMatrix {
    transitions: Array2<f64>,
    start: Array1<f64>,
    end: Array1<f64>,
}

impl TransitionMatrix {
    /// Learned transition weights, without start and end scores.
    pub fn new(transitions: Array2<f64>) -> Result<Self, DecodeError> {
        let (rows, cols) = transitions.dim();
        if rows != cols {
            return Err(DecodeError::TransitionShapeMismatch {
                expected: rows,
                found: (rows, cols),
            });
        }
        Ok(Self {
            transitions,
            start: Array1::zeros(rows),
            end: Array1::zeros(rows),
        })
    }

    /// Adds learned start and end scores.
    pub fn with_start_end(
        mut self,
        start: Array1<f64>,
        end: Array1<f64>,
    ) -> Result<Self, DecodeError> {
        let n = self.num_tags();
        for v in [&start, &end] {
            if v.len() != n {
                return Err(DecodeError::TransitionShapeMismatch {
                    expected: n,
                    found: (v.len(), 1),
                });
            }
        }
        self.start = start;
        self.end = end;
        Ok(self)
    }

    /// Hard constraints of the markup: legal transitions are worth `0` and illegal ones `-inf`.
    /// Symbols which are not tags of the markup (e.g. `[CLS]`) behave like `O`.
    pub fn from_markup(labels: &LabelMap, config: &DecodeConfig) -> Self {
        let markup = config.markup();
        let tags = labels
            .iter()
            .map(|(_, symbol)| Tag::parse(symbol, markup, config.suffix(), config.delimiter()))
            .collect_vec();
        let outside = Tag::outside();
        let weight = |allowed: bool| if allowed { 0.0 } else { f64::NEG_INFINITY };
        let n = tags.len();
        let transitions =
            Array2::from_shape_fn((n, n), |(i, j)| weight(is_allowed(&tags[i], &tags[j], markup)));
        let start = Array1::from_shape_fn(n, |j| weight(is_allowed(&outside, &tags[j], markup)));
        let end = Array1::from_shape_fn(n, |i| weight(is_allowed(&tags[i], &outside, markup)));
        Self {
            transitions,
            start,
            end,
        }
    }

    /// Adds the constraints of the markup to learned weights.
    pub fn constrained(
        mut self,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Self, DecodeError> {
        self.check_labels(labels)?;
        let constraints = Self::from_markup(labels, config);
        self.transitions += &constraints.transitions;
        self.start += &constraints.start;
        self.end += &constraints.end;
        Ok(self)
    }

    pub fn num_tags(&self) -> usize {
        self.transitions.nrows()
    }

    pub fn transitions(&self) -> &Array2<f64> {
        &self.transitions
    }

    pub(crate) fn check_labels(&self, labels: &LabelMap) -> Result<(), DecodeError> {
        if self.num_tags() != labels.len() {
            return Err(DecodeError::TransitionShapeMismatch {
                expected: labels.len(),
                found: self.transitions.dim(),
            });
        }
        Ok(())
    }
}

/// Can `next` follow `prev` in a well-formed sequence?
fn is_allowed(prev: &Tag, next: &Tag, markup: Markup) -> bool {
    let same = prev.category() == next.category();
    match markup {
        Markup::Bio => match next.prefix() {
            Prefix::I => matches!(prev.prefix(), Prefix::B | Prefix::I) && same,
            _ => true,
        },
        Markup::Bios | Markup::Bilou => match prev.prefix() {
            Prefix::B | Prefix::I => matches!(next.prefix(), Prefix::I | Prefix::E) && same,
            _ => matches!(next.prefix(), Prefix::O | Prefix::B | Prefix::S),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Finds the best scoring tag sequence given the emissions of the model and the transition
/// matrix.
pub struct ViterbiDecoder {
    transitions: TransitionMatrix,
}

impl ViterbiDecoder {
    pub fn new(transitions: TransitionMatrix) -> Self {
        Self { transitions }
    }

    pub fn transitions(&self) -> &TransitionMatrix {
        &self.transitions
    }

    /// Returns the best tag id of every valid position.
    pub fn tag_ids<F: FloatExt>(&self, tensor: &ScoreTensor<F>) -> Result<Vec<usize>, DecodeError> {
        let num_tags = self.transitions.num_tags();
        if tensor.channels() != num_tags {
            return Err(DecodeError::ChannelMismatch {
                expected: num_tags,
                found: tensor.channels(),
            });
        }
        let valid_len = tensor.valid_len()?;
        if valid_len == 0 {
            return Ok(Vec::new());
        }
        let emissions = tensor
            .scores()
            .slice(s![..valid_len, ..])
            .mapv(|v| v.to_f64().unwrap_or(f64::NAN));
        if let Some((position, _)) = emissions.indexed_iter().find(|(_, v)| v.is_nan()) {
            return Err(DecodeError::UndefinedOrder {
                position: position.0,
            });
        }
        let mut score = &self.transitions.start + &emissions.row(0);
        let mut backpointers = Array2::<usize>::zeros((valid_len, num_tags));
        for (t, emission) in emissions.axis_iter(Axis(0)).enumerate().skip(1) {
            let mut next = Array1::<f64>::zeros(num_tags);
            for (k, column) in self.transitions.transitions.axis_iter(Axis(1)).enumerate() {
                let candidates = &score + &column;
                let best = candidates
                    .argmax()
                    .map_err(|e| DecodeError::from_min_max(e, t))?;
                backpointers[[t, k]] = best;
                next[k] = candidates[best];
            }
            Zip::from(&mut next)
                .and(&emission)
                .for_each(|n, &e| *n += e);
            score = next;
        }
        score += &self.transitions.end;
        let mut best = score
            .argmax()
            .map_err(|e| DecodeError::from_min_max(e, valid_len - 1))?;
        let mut path = vec![best; valid_len];
        for t in (1..valid_len).rev() {
            best = backpointers[[t, best]];
            path[t - 1] = best;
        }
        Ok(path)
    }
}

impl Decode for ViterbiDecoder {
    fn decode<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Vec<EntitySpan>, DecodeError> {
        check_tag_channels(tensor, labels)?;
        self.transitions.check_labels(labels)?;
        let ids = self.tag_ids(tensor)?;
        Ok(spans_from_tag_ids(&ids, labels, config))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DecodeConfigBuilder;
    use crate::decoder::ArgmaxDecoder;
    use crate::metrics::DivByZeroStrat;
    use ndarray::array;

    fn labels() -> LabelMap {
        LabelMap::new(["O", "B-PER", "I-PER", "E-PER", "S-PER"]).unwrap()
    }

    fn config(markup: Markup) -> DecodeConfig {
        DecodeConfigBuilder::<DivByZeroStrat>::new()
            .markup(markup)
            .leading_token_offset(0)
            .build()
            .unwrap()
    }

    #[test]
    fn test_from_markup_forbids_illegal_transitions() {
        let matrix = TransitionMatrix::from_markup(&labels(), &config(Markup::Bios));
        let t = matrix.transitions();
        // O -> I-PER and B-PER -> O are illegal, B-PER -> E-PER is legal.
        assert_eq!(t[[0, 2]], f64::NEG_INFINITY);
        assert_eq!(t[[1, 0]], f64::NEG_INFINITY);
        assert_eq!(t[[1, 3]], 0.0);
        assert_eq!(matrix.start[2], f64::NEG_INFINITY);
        assert_eq!(matrix.end[1], f64::NEG_INFINITY);
        assert_eq!(matrix.end[3], 0.0);
    }

    #[test]
    fn test_viterbi_follows_constraints_where_argmax_does_not() {
        // Emissions prefer B-PER, I-PER, O, which is malformed in Bios.
        let emissions = array![
            [0.0f32, 0.9, 0.1, 0.0, 0.5],
            [0.0, 0.0, 0.9, 0.6, 0.0],
            [0.7, 0.0, 0.0, 0.0, 0.0]
        ];
        let tensor = ScoreTensor::new(emissions.view(), 3);
        let config = config(Markup::Bios);
        assert!(ArgmaxDecoder
            .decode(&tensor, &labels(), &config)
            .unwrap()
            .is_empty());
        let decoder = ViterbiDecoder::new(TransitionMatrix::from_markup(&labels(), &config));
        assert_eq!(decoder.tag_ids(&tensor).unwrap(), vec![1, 3, 0]);
        let spans = decoder.decode(&tensor, &labels(), &config).unwrap();
        assert_eq!(spans, vec![EntitySpan::new("PER", 0, 1).unwrap()]);
    }

    #[test]
    fn test_learned_weights() {
        // Strong O -> S-PER preference.
        let mut weights = Array2::<f64>::zeros((5, 5));
        weights[[0, 4]] = 10.0;
        let matrix = TransitionMatrix::new(weights)
            .unwrap()
            .constrained(&labels(), &config(Markup::Bios))
            .unwrap();
        let emissions = array![[1.0f64, 0.0, 0.0, 0.0, 0.0], [1.0, 0.0, 0.0, 0.0, 0.0]];
        let tensor = ScoreTensor::new(emissions.view(), 2);
        let decoder = ViterbiDecoder::new(matrix);
        assert_eq!(decoder.tag_ids(&tensor).unwrap(), vec![0, 4]);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(matches!(
            TransitionMatrix::new(Array2::zeros((2, 3))),
            Err(DecodeError::TransitionShapeMismatch { .. })
        ));
        let matrix = TransitionMatrix::new(Array2::zeros((3, 3))).unwrap();
        assert!(matrix
            .clone()
            .with_start_end(Array1::zeros(2), Array1::zeros(3))
            .is_err());
        let decoder = ViterbiDecoder::new(matrix);
        let emissions = Array2::<f32>::zeros((2, 5));
        let tensor = ScoreTensor::new(emissions.view(), 2);
        assert_eq!(
            decoder.decode(&tensor, &labels(), &config(Markup::Bios)),
            Err(DecodeError::TransitionShapeMismatch {
                expected: 5,
                found: (3, 3)
            })
        );
    }

    #[test]
    fn test_empty_and_nan() {
        let decoder = ViterbiDecoder::new(TransitionMatrix::from_markup(
            &labels(),
            &config(Markup::Bio),
        ));
        let emissions = Array2::<f32>::zeros((3, 5));
        let tensor = ScoreTensor::new(emissions.view(), 0);
        assert!(decoder.tag_ids(&tensor).unwrap().is_empty());
        let mut emissions = Array2::<f32>::zeros((3, 5));
        emissions[[2, 1]] = f32::NAN;
        let tensor = ScoreTensor::new(emissions.view(), 3);
        assert_eq!(
            decoder.tag_ids(&tensor),
            Err(DecodeError::UndefinedOrder { position: 2 })
        );
    }
}
