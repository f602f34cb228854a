/**
Long texts are decoded through overlapping windows. The spans found in every window are shifted
back to text coordinates and merged.
*/
use crate::config::ConfigError;
use crate::span::EntitySpan;
use std::collections::BTreeSet;
use std::ops::Range;

/// Token ranges covering `[0, len)`, each at most `seg_len` tokens long. Consecutive windows
/// overlap by `backoff` tokens. A `seg_len` of `0` disables windowing.
pub fn windows(len: usize, seg_len: usize, backoff: usize) -> Result<Vec<Range<usize>>, ConfigError> {
    if seg_len == 0 {
        return Ok(vec![0..len]);
    }
    if backoff >= seg_len {
        return Err(ConfigError::InvalidBackoff { seg_len, backoff });
    }
    Ok((0..len)
        .step_by(seg_len - backoff)
        .map(|start| start..(start + seg_len).min(len))
        .collect())
}

/// Shifts the spans of every window by the window start, then sorts and deduplicates them. A span
/// found twice in the overlap of two windows is kept once.
pub fn merge_window_spans<I>(per_window: I) -> Vec<EntitySpan>
where
    I: IntoIterator<Item = (Range<usize>, Vec<EntitySpan>)>,
{
    per_window
        .into_iter()
        .flat_map(|(window, spans)| {
            spans
                .into_iter()
                .map(move |span| span.shifted(window.start))
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
