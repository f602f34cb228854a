use super::{Decode, DecodeError, FloatExt, ScoreTensor};
use crate::config::{ConfigError, DecodeConfig};
use crate::label::LabelMap;
use crate::span::EntitySpan;
use ndarray::{s, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
/// A span found by the pointer network, before its channel is mapped to a category.
pub struct SpanCandidate {
    /// Index `n` of the channel pair `(2n, 2n + 1)`.
    pub label: usize,
    pub start: usize,
    pub end: usize,
}

/// Extracts the span candidates of a pointer-network output.
///
/// * `scores`: Activations of shape `[seq_len, 2 * num_labels]`. Channel `2n` holds the start
///   activations of label `n` and channel `2n + 1` its end activations.
/// * `text_len`: Only positions in `[0, text_len)` are considered.
/// * `confidence`: A position is active when its activation is strictly greater.
/// * `enable_nested_entities`: Can a start be paired with more than one end?
/// * `leading_token_offset`: Subtracted from every position. Candidates starting before it are
///   dropped.
///
/// Every start is paired with the following ends, up to (excluded) the next start of the same
/// label. Without nesting only the closest end is kept. The candidates are sorted by start.
pub fn extract_span_candidates<F: FloatExt>(
    scores: ArrayView2<F>,
    text_len: usize,
    confidence: F,
    enable_nested_entities: bool,
    leading_token_offset: usize,
) -> Vec<SpanCandidate> {
    let num_labels = scores.ncols() / 2;
    let text_len = text_len.min(scores.nrows());
    let scores = scores.slice(s![..text_len, ..]);
    let active = |channel: usize| -> Vec<usize> {
        scores
            .index_axis(Axis(1), channel)
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > confidence)
            .map(|(i, _)| i)
            .collect()
    };
    let mut candidates = Vec::new();
    for label in 0..num_labels {
        let starts = active(2 * label);
        let ends = active(2 * label + 1);
        for (k, &start) in starts.iter().enumerate() {
            let next_start = starts.get(k + 1).copied();
            for &end in ends.iter().filter(|&&j| j >= start) {
                if next_start.is_some_and(|next| end >= next) {
                    break;
                }
                if start >= leading_token_offset {
                    candidates.push(SpanCandidate {
                        label,
                        start: start - leading_token_offset,
                        end: end - leading_token_offset,
                    });
                }
                if !enable_nested_entities {
                    break;
                }
            }
        }
    }
    // Stable: ties keep label then end order.
    candidates.sort_by_key(|c| c.start);
    candidates
}

/// Converts raw logits to the activation space of the pointer network: `sigmoid(x)^2`.
pub fn sigmoid_squared<F: FloatExt>(logits: ArrayView2<F>) -> Array2<F> {
    logits.mapv(|x| {
        let sigmoid = F::one() / (F::one() + (-x).exp());
        sigmoid * sigmoid
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Decodes spans from independent start/end channels per category.
pub struct PointerDecoder {
    raw_logits: bool,
}

impl PointerDecoder {
    /// The scores are raw logits and go through [`sigmoid_squared`] before thresholding.
    pub fn with_raw_logits() -> Self {
        Self { raw_logits: true }
    }
}

impl Decode for PointerDecoder {
    fn decode<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Vec<EntitySpan>, DecodeError> {
        let expected = 2 * labels.num_categories();
        if tensor.channels() != expected {
            return Err(DecodeError::ChannelMismatch {
                expected,
                found: tensor.channels(),
            });
        }
        let confidence = F::from(config.confidence())
            .ok_or(ConfigError::UnrepresentableConfidence(config.confidence()))?;
        let text_len = tensor.valid_len()?;
        let activated;
        let scores = if self.raw_logits {
            activated = sigmoid_squared(tensor.scores());
            activated.view()
        } else {
            tensor.scores().reborrow()
        };
        let candidates = extract_span_candidates(
            scores,
            text_len,
            confidence,
            config.enable_nested_entities(),
            config.leading_token_offset(),
        );
        let mut spans = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match labels.channel_category(candidate.label) {
                Some(category) => spans.push(EntitySpan::new_unchecked(
                    String::from(category),
                    candidate.start,
                    candidate.end,
                )),
                None => tracing::warn!(channel = candidate.label, "channel without category"),
            }
        }
        tracing::debug!(text_len, spans = spans.len(), "decoded pointer-network scores");
        Ok(spans)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DecodeConfigBuilder;
    use crate::metrics::DivByZeroStrat;
    use ndarray::array;
    use quickcheck_macros::quickcheck;
    use rstest::rstest;

    /// One label, activations set to 1 at the given starts and ends.
    fn single_label(len: usize, starts: &[usize], ends: &[usize]) -> Array2<f32> {
        let mut scores = Array2::zeros((len, 2));
        for &s in starts {
            scores[[s, 0]] = 1.0;
        }
        for &e in ends {
            scores[[e, 1]] = 1.0;
        }
        scores
    }

    fn positions(candidates: &[SpanCandidate]) -> Vec<(usize, usize)> {
        candidates.iter().map(|c| (c.start, c.end)).collect()
    }

    #[rstest]
    #[case(&[2, 5], &[4, 7], false, vec![(2, 4), (5, 7)])]
    #[case(&[2, 5], &[4, 7], true, vec![(2, 4), (5, 7)])]
    #[case(&[2], &[4, 7], false, vec![(2, 4)])]
    #[case(&[2], &[4, 7], true, vec![(2, 4), (2, 7)])]
    #[case(&[2, 3], &[4], false, vec![(3, 4)])]
    #[case(&[5], &[2], true, vec![])]
    #[case(&[3], &[3], false, vec![(3, 3)])]
    fn test_pairing(
        #[case] starts: &[usize],
        #[case] ends: &[usize],
        #[case] nested: bool,
        #[case] expected: Vec<(usize, usize)>,
    ) {
        let scores = single_label(10, starts, ends);
        let candidates = extract_span_candidates(scores.view(), 10, 0.5, nested, 0);
        assert_eq!(positions(&candidates), expected);
    }

    #[test]
    fn test_text_len_clips_positions() {
        let scores = single_label(10, &[2], &[8]);
        assert!(extract_span_candidates(scores.view(), 6, 0.5, false, 0).is_empty());
    }

    #[test]
    fn test_leading_token_offset() {
        let scores = single_label(10, &[0, 3], &[1, 5]);
        let candidates = extract_span_candidates(scores.view(), 10, 0.5, false, 1);
        assert_eq!(positions(&candidates), vec![(2, 4)]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let mut scores = single_label(4, &[1], &[2]);
        scores[[1, 0]] = 0.5;
        assert!(extract_span_candidates(scores.view(), 4, 0.5, false, 0).is_empty());
    }

    #[test]
    fn test_sorted_by_start_across_labels() {
        let scores = array![
            [0.0f32, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.9, 0.9],
            [0.9, 0.0, 0.0, 0.0],
            [0.0, 0.9, 0.0, 0.0]
        ];
        let candidates = extract_span_candidates(scores.view(), 4, 0.5, false, 0);
        assert_eq!(
            candidates,
            vec![
                SpanCandidate {
                    label: 1,
                    start: 1,
                    end: 1
                },
                SpanCandidate {
                    label: 0,
                    start: 2,
                    end: 3
                }
            ]
        );
    }

    #[test]
    fn test_decode_maps_channels_to_categories() {
        let labels = LabelMap::with_outside_sentinel(["PER", "LOC"]).unwrap();
        let scores = array![
            [0.0f32, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.9, 0.9],
            [0.9, 0.0, 0.0, 0.0],
            [0.0, 0.9, 0.0, 0.0]
        ];
        let tensor = ScoreTensor::new(scores.view(), 4);
        let spans = PointerDecoder::default()
            .decode(&tensor, &labels, &DecodeConfig::default())
            .unwrap();
        let tuples: Vec<_> = spans.iter().map(|s| s.as_tuple()).collect();
        assert_eq!(tuples, vec![("LOC", 0, 0), ("PER", 1, 2)]);
    }

    #[test]
    fn test_decode_rejects_channel_mismatch() {
        let labels = LabelMap::new(["PER", "LOC"]).unwrap();
        let scores = Array2::<f32>::zeros((4, 3));
        let tensor = ScoreTensor::new(scores.view(), 4);
        assert_eq!(
            PointerDecoder::default().decode(&tensor, &labels, &DecodeConfig::default()),
            Err(DecodeError::ChannelMismatch {
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn test_decode_raw_logits() {
        let labels = LabelMap::new(["PER"]).unwrap();
        // sigmoid(3)^2 ~ 0.91 and sigmoid(0)^2 = 0.25
        let logits = array![[0.0f64, 0.0], [3.0, 0.0], [0.0, 3.0]];
        let tensor = ScoreTensor::new(logits.view(), 3);
        let config = DecodeConfigBuilder::<DivByZeroStrat>::new()
            .confidence(0.8)
            .build()
            .unwrap();
        let spans = PointerDecoder::with_raw_logits()
            .decode(&tensor, &labels, &config)
            .unwrap();
        assert_eq!(spans, vec![EntitySpan::new("PER", 0, 1).unwrap()]);
        let activated = sigmoid_squared(logits.view());
        assert!((activated[[0, 0]] - 0.25).abs() < 1e-12);
    }

    #[quickcheck]
    fn propertie_test_candidates_are_well_formed(cells: Vec<(u8, u8, bool)>, nested: bool) -> bool {
        let mut scores = Array2::<f32>::zeros((16, 4));
        for (row, col, on) in cells {
            scores[[row as usize % 16, col as usize % 4]] = if on { 0.9 } else { 0.1 };
        }
        let candidates = extract_span_candidates(scores.view(), 12, 0.5, nested, 1);
        candidates.iter().all(|c| c.start <= c.end && c.end < 11 && c.label < 2)
            && candidates.windows(2).all(|w| w[0].start <= w[1].start)
    }
}
