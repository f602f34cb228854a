/**
Bidirectional mapping between label names and dense integer ids.
*/
use crate::config::ConfigError;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Name of the "no entity" sentinel occupying id 0 when requested.
pub const OUTSIDE: &str = "O";

/// Bijective mapping between labels and ids. Ids are dense and start at 0, or at 1 when the
/// `"O"` sentinel occupies id 0.
///
/// For pointer-network decoding the labels are entity categories (`"PER"`, `"LOC"`, ...). For
/// sequence tagging they are tag symbols (`"O"`, `"B-PER"`, `"I-PER"`, `"[CLS]"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LabelMapRepr", into = "LabelMapRepr")]
pub struct LabelMap {
    id2label: Vec<String>,
    label2id: AHashMap<String, usize>,
    has_sentinel: bool,
}

#[derive(Serialize, Deserialize)]
struct LabelMapRepr {
    labels: Vec<String>,
    #[serde(default)]
    outside_sentinel: bool,
}

impl TryFrom<LabelMapRepr> for LabelMap {
    type Error = ConfigError;
    fn try_from(value: LabelMapRepr) -> Result<Self, Self::Error> {
        Self::build(value.labels, value.outside_sentinel)
    }
}

impl From<LabelMap> for LabelMapRepr {
    fn from(value: LabelMap) -> Self {
        let skip = usize::from(value.has_sentinel);
        LabelMapRepr {
            labels: value.id2label.into_iter().skip(skip).collect(),
            outside_sentinel: value.has_sentinel,
        }
    }
}

impl LabelMap {
    /// Builds a label map whose ids start at 0, in the order of `labels`.
    pub fn new<I, S>(labels: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(labels.into_iter().map(Into::into).collect(), false)
    }

    /// Builds a label map where id 0 is reserved for the `"O"` sentinel and the given labels start
    /// at 1.
    pub fn with_outside_sentinel<I, S>(labels: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(labels.into_iter().map(Into::into).collect(), true)
    }

    fn build(labels: Vec<String>, has_sentinel: bool) -> Result<Self, ConfigError> {
        if labels.is_empty() {
            return Err(ConfigError::EmptyLabels);
        }
        let mut id2label = Vec::with_capacity(labels.len() + usize::from(has_sentinel));
        if has_sentinel {
            id2label.push(String::from(OUTSIDE));
        }
        id2label.extend(labels);
        let mut label2id = AHashMap::with_capacity(id2label.len());
        for (id, label) in id2label.iter().enumerate() {
            if label.is_empty() {
                return Err(ConfigError::EmptyLabel(id));
            }
            if label2id.insert(label.clone(), id).is_some() {
                return Err(ConfigError::DuplicateLabel(label.clone()));
            }
        }
        tracing::debug!(labels = ?id2label, has_sentinel, "built label map");
        Ok(Self {
            id2label,
            label2id,
            has_sentinel,
        })
    }

    /// Total number of ids, the sentinel included.
    pub fn len(&self) -> usize {
        self.id2label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2label.is_empty()
    }

    pub fn has_outside_sentinel(&self) -> bool {
        self.has_sentinel
    }

    /// Number of real labels, i.e. without the sentinel.
    pub fn num_categories(&self) -> usize {
        self.len() - usize::from(self.has_sentinel)
    }

    pub fn id<S: Borrow<str>>(&self, label: S) -> Option<usize> {
        self.label2id.get(label.borrow()).copied()
    }

    pub fn label(&self, id: usize) -> Option<&str> {
        self.id2label.get(id).map(String::as_str)
    }

    /// Maps the `n`-th channel pair of a pointer-network output to its category. The sentinel, if
    /// any, has no channel.
    pub fn channel_category(&self, channel: usize) -> Option<&str> {
        self.label(channel + usize::from(self.has_sentinel))
    }

    /// Iterates over `(id, label)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.id2label
            .iter()
            .enumerate()
            .map(|(i, l)| (i, l.as_str()))
    }

    /// Labels without the sentinel, in id order.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.id2label
            .iter()
            .skip(usize::from(self.has_sentinel))
            .map(String::as_str)
    }
}
