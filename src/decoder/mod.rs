/**
Decoders turning the score tensor of one example into entity spans.

Three decoders share the [`Decode`] contract: the pointer-network decoder, the arg-max sequence
tagging decoder and the Viterbi sequence tagging decoder. [`SpanDecoder`] is the closed set of
them, selected from `DecodeConfig::strategy`.
*/
use crate::config::{ConfigError, DecodeConfig, Strategy};
use crate::label::LabelMap;
use crate::span::EntitySpan;
use ndarray::{ArrayView1, ArrayView2, ScalarOperand};
use ndarray_stats::errors::MinMaxError;
use num::Float;
use std::error::Error;
use std::fmt::{Debug, Display};

mod pointer;
mod sequence;
mod viterbi;

pub use pointer::{extract_span_candidates, sigmoid_squared, PointerDecoder, SpanCandidate};
pub use sequence::ArgmaxDecoder;
pub use viterbi::{TransitionMatrix, ViterbiDecoder};

/// Internal extension trait for Num's Float trait
pub trait FloatExt: Float + Send + Sync + Clone + ScalarOperand + Debug {}

impl<T: Float + Send + Sync + Clone + Copy + ScalarOperand + Debug> FloatExt for T {}

#[derive(Debug, Clone, PartialEq)]
/// Errors raised while decoding. They all indicate a wiring mistake between the model layer and
/// the decoders.
pub enum DecodeError {
    /// The number of score channels does not match the label map.
    ChannelMismatch { expected: usize, found: usize },
    /// The mask does not cover the whole score tensor.
    MaskLengthMismatch { expected: usize, found: usize },
    /// The true length of the example is larger than the score tensor.
    LengthExceedsTensor { length: usize, seq_len: usize },
    /// The transition matrix does not match the label map.
    TransitionShapeMismatch {
        expected: usize,
        found: (usize, usize),
    },
    /// A score could not be compared (e.g. `NaN`).
    UndefinedOrder { position: usize },
    /// There is no score to pick from (zero channels or zero tags).
    EmptyScores { position: usize },
    Config(ConfigError),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelMismatch { expected, found } => write!(
                f,
                "The score tensor has {} channels but the label map requires {}",
                found, expected
            ),
            Self::MaskLengthMismatch { expected, found } => write!(
                f,
                "The mask has length {} but the score tensor has {} positions",
                found, expected
            ),
            Self::LengthExceedsTensor { length, seq_len } => write!(
                f,
                "The length of the example ({}) is larger than the score tensor ({})",
                length, seq_len
            ),
            Self::TransitionShapeMismatch { expected, found } => write!(
                f,
                "The transition matrix has shape {:?} but the label map has {} tags",
                found, expected
            ),
            Self::UndefinedOrder { position } => {
                write!(f, "The scores at position {} can not be ordered", position)
            }
            Self::EmptyScores { position } => {
                write!(f, "There is no score to pick from at position {}", position)
            }
            Self::Config(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl Error for DecodeError {}

impl From<ConfigError> for DecodeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl DecodeError {
    pub(crate) fn from_min_max(error: MinMaxError, position: usize) -> Self {
        match error {
            MinMaxError::EmptyInput => Self::EmptyScores { position },
            MinMaxError::UndefinedOrder => Self::UndefinedOrder { position },
        }
    }
}

#[derive(Debug, Clone, Copy)]
/// Read-only view of the scores produced by a model for one example.
pub struct ScoreTensor<'a, F> {
    /// Shape `[seq_len, channels]`.
    scores: ArrayView2<'a, F>,
    /// True (unpadded) length.
    length: usize,
    mask: Option<ArrayView1<'a, u8>>,
}

impl<'a, F: FloatExt> ScoreTensor<'a, F> {
    pub fn new(scores: ArrayView2<'a, F>, length: usize) -> Self {
        Self {
            scores,
            length,
            mask: None,
        }
    }

    /// Adds a validity mask. A position is valid when its mask value is non-zero.
    pub fn with_mask(mut self, mask: ArrayView1<'a, u8>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn scores(&self) -> ArrayView2<'a, F> {
        self.scores
    }

    pub fn seq_len(&self) -> usize {
        self.scores.nrows()
    }

    pub fn channels(&self) -> usize {
        self.scores.ncols()
    }

    /// Number of positions to decode: the true length, cut at the first masked position.
    pub fn valid_len(&self) -> Result<usize, DecodeError> {
        let seq_len = self.seq_len();
        if self.length > seq_len {
            return Err(DecodeError::LengthExceedsTensor {
                length: self.length,
                seq_len,
            });
        }
        match self.mask {
            None => Ok(self.length),
            Some(mask) if mask.len() != seq_len => Err(DecodeError::MaskLengthMismatch {
                expected: seq_len,
                found: mask.len(),
            }),
            Some(mask) => {
                let unmasked = mask.iter().take_while(|m| **m != 0).count();
                Ok(self.length.min(unmasked))
            }
        }
    }
}

/// The contract shared by every decoder. Decoding is a pure function of the scores, the label
/// map and the configuration.
pub trait Decode {
    /// Decodes the spans of one example. Positions index the text tokens, i.e. they are shifted
    /// by `config.leading_token_offset()`.
    fn decode<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Vec<EntitySpan>, DecodeError>;
}

#[derive(Debug, Clone, PartialEq)]
/// The closed set of decoders.
pub enum SpanDecoder {
    Pointer(PointerDecoder),
    Argmax(ArgmaxDecoder),
    Viterbi(ViterbiDecoder),
}

impl SpanDecoder {
    /// Builds the decoder selected by `config.strategy()`. The Viterbi decoder only uses the
    /// transition constraints of the markup; use [`SpanDecoder::viterbi`] to supply learned
    /// transition weights.
    pub fn from_config(config: &DecodeConfig, labels: &LabelMap) -> Result<Self, ConfigError> {
        config.validate()?;
        let decoder = match config.strategy() {
            Strategy::Pointer => Self::Pointer(PointerDecoder::default()),
            Strategy::Argmax => Self::Argmax(ArgmaxDecoder),
            Strategy::Viterbi => Self::Viterbi(ViterbiDecoder::new(
                TransitionMatrix::from_markup(labels, config),
            )),
        };
        tracing::debug!(strategy = %config.strategy(), "selected decoder");
        Ok(decoder)
    }

    pub fn viterbi(transitions: TransitionMatrix) -> Self {
        Self::Viterbi(ViterbiDecoder::new(transitions))
    }

    /// Tag id of every valid position, for the sequence tagging decoders.
    fn tag_ids<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
    ) -> Result<Option<Vec<usize>>, DecodeError> {
        match self {
            Self::Pointer(_) => Ok(None),
            Self::Argmax(d) => {
                sequence::check_tag_channels(tensor, labels)?;
                d.tag_ids(tensor).map(Some)
            }
            Self::Viterbi(d) => {
                sequence::check_tag_channels(tensor, labels)?;
                d.transitions().check_labels(labels)?;
                d.tag_ids(tensor).map(Some)
            }
        }
    }

    /// The decoded tag symbols of the text tokens. The pointer-network decoder has no tag
    /// sequence and returns `None`.
    pub fn tag_sequence<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Option<Vec<String>>, DecodeError> {
        Ok(self.tag_ids(tensor, labels)?.map(|ids| {
            sequence::symbols_from_tag_ids(&ids, labels, config)
                .into_iter()
                .map(String::from)
                .collect()
        }))
    }

    /// Decodes the spans and the tag symbols with a single pass over the scores.
    pub fn decode_with_tags<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<(Vec<EntitySpan>, Option<Vec<String>>), DecodeError> {
        let Some(ids) = self.tag_ids(tensor, labels)? else {
            return Ok((self.decode(tensor, labels, config)?, None));
        };
        let symbols = sequence::symbols_from_tag_ids(&ids, labels, config);
        let spans = sequence::spans_from_symbols(&symbols, config);
        Ok((spans, Some(symbols.into_iter().map(String::from).collect())))
    }
}

impl Decode for SpanDecoder {
    fn decode<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Vec<EntitySpan>, DecodeError> {
        match self {
            Self::Pointer(d) => d.decode(tensor, labels, config),
            Self::Argmax(d) => d.decode(tensor, labels, config),
            Self::Viterbi(d) => d.decode(tensor, labels, config),
        }
    }
}

/// Decodes one example with the decoder selected by `config.strategy()`.
///
/// * `tensor`: The scores of the example, its true length and its mask.
/// * `labels`: The categories (pointer network) or the tag symbols (sequence tagging).
/// * `config`: The decoding configuration.
pub fn decode<F: FloatExt>(
    tensor: &ScoreTensor<F>,
    labels: &LabelMap,
    config: &DecodeConfig,
) -> Result<Vec<EntitySpan>, DecodeError> {
    SpanDecoder::from_config(config, labels)?.decode(tensor, labels, config)
}
