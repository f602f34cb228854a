use super::{Decode, DecodeError, FloatExt, ScoreTensor};
use crate::config::DecodeConfig;
use crate::entity::get_entities_with_repairs;
use crate::label::{LabelMap, OUTSIDE};
use crate::span::EntitySpan;
use ndarray::{s, Axis};
use ndarray_stats::QuantileExt;

/// Checks that the score tensor has one channel per tag symbol.
pub(crate) fn check_tag_channels<F: FloatExt>(
    tensor: &ScoreTensor<F>,
    labels: &LabelMap,
) -> Result<(), DecodeError> {
    if tensor.channels() != labels.len() {
        return Err(DecodeError::ChannelMismatch {
            expected: labels.len(),
            found: tensor.channels(),
        });
    }
    Ok(())
}

/// Maps decoded tag ids to symbols and skips the leading special tokens.
pub(crate) fn symbols_from_tag_ids<'l>(
    ids: &[usize],
    labels: &'l LabelMap,
    config: &DecodeConfig,
) -> Vec<&'l str> {
    ids.iter()
        .skip(config.leading_token_offset())
        .map(|&id| {
            labels.label(id).unwrap_or_else(|| {
                tracing::warn!(id, "decoded a tag id outside of the label map");
                OUTSIDE
            })
        })
        .collect()
}

/// Groups the decoded tags into spans.
pub(crate) fn spans_from_tag_ids(
    ids: &[usize],
    labels: &LabelMap,
    config: &DecodeConfig,
) -> Vec<EntitySpan> {
    spans_from_symbols(&symbols_from_tag_ids(ids, labels, config), config)
}

/// Groups decoded tag symbols into spans, repairing them first in autofix mode.
pub(crate) fn spans_from_symbols(symbols: &[&str], config: &DecodeConfig) -> Vec<EntitySpan> {
    let (spans, repairs) = get_entities_with_repairs(symbols, config);
    tracing::debug!(
        tokens = symbols.len(),
        spans = spans.len(),
        repairs = repairs.len(),
        "decoded tag sequence"
    );
    spans
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Picks the highest-scoring tag of every valid token independently.
pub struct ArgmaxDecoder;

impl ArgmaxDecoder {
    /// Returns the tag id of every valid position.
    pub fn tag_ids<F: FloatExt>(&self, tensor: &ScoreTensor<F>) -> Result<Vec<usize>, DecodeError> {
        let valid_len = tensor.valid_len()?;
        tensor
            .scores()
            .slice(s![..valid_len, ..])
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(position, row)| {
                row.argmax()
                    .map_err(|e| DecodeError::from_min_max(e, position))
            })
            .collect()
    }
}

impl Decode for ArgmaxDecoder {
    fn decode<F: FloatExt>(
        &self,
        tensor: &ScoreTensor<F>,
        labels: &LabelMap,
        config: &DecodeConfig,
    ) -> Result<Vec<EntitySpan>, DecodeError> {
        check_tag_channels(tensor, labels)?;
        let ids = self.tag_ids(tensor)?;
        Ok(spans_from_tag_ids(&ids, labels, config))
    }
}
