/**
Per-batch glue between a model and the decoders.

An [`Evaluation`] run decodes every example of every batch and feeds the spans to an
[`EntityScorer`]. A [`Prediction`] run decodes the examples and collects [`PredictionRecord`]s
(also called reviews). Both follow the same state machine:

`Idle -> Started -> [step(batch)]* -> Ended`

`step` is rejected before `start` and after `end`. `end` can be reached without any batch.
*/
use crate::config::{ConfigError, DecodeConfig};
use crate::decoder::{Decode, DecodeError, FloatExt, ScoreTensor, SpanDecoder};
use crate::label::LabelMap;
use crate::metrics::{ClassMetrics, DivisionByZeroError, EntityScorer, OverallMetrics};
use crate::span::EntitySpan;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_jsonlines::{json_lines, write_json_lines};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::path::Path;

/// The model layer. It produces the score tensor of a single example.
pub trait ScoreModel {
    /// What the model needs to score an example (token ids, attention mask, ...).
    type Input;
    type Float: FloatExt;
    type Error: Error + Send + Sync + 'static;

    fn scores(&self, input: &Self::Input) -> Result<ModelOutput<Self::Float>, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
/// Owned scores of one example, as returned by a [`ScoreModel`].
pub struct ModelOutput<F> {
    /// Shape `[seq_len, channels]`.
    pub scores: Array2<F>,
    /// True (unpadded) length.
    pub length: usize,
    pub mask: Option<Array1<u8>>,
}

impl<F: FloatExt> ModelOutput<F> {
    pub fn new(scores: Array2<F>, length: usize) -> Self {
        Self {
            scores,
            length,
            mask: None,
        }
    }

    pub fn with_mask(mut self, mask: Array1<u8>) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn tensor(&self) -> ScoreTensor<'_, F> {
        let tensor = ScoreTensor::new(self.scores.view(), self.length);
        match &self.mask {
            Some(mask) => tensor.with_mask(mask.view()),
            None => tensor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
/// Identifier of an example: its index (e.g. the batch step) or a name.
pub enum ExampleId {
    Index(usize),
    Name(String),
}

impl From<usize> for ExampleId {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

impl From<String> for ExampleId {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<&str> for ExampleId {
    fn from(value: &str) -> Self {
        Self::Name(String::from(value))
    }
}

impl Display for ExampleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{}", i),
            Self::Name(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// An example of a batch. The gold spans are only used by evaluation runs.
pub struct Example<I> {
    pub id: ExampleId,
    pub input: I,
    pub gold: Vec<EntitySpan>,
}

impl<I> Example<I> {
    pub fn new<Id: Into<ExampleId>>(id: Id, input: I) -> Self {
        Self {
            id: id.into(),
            input,
            gold: Vec::new(),
        }
    }

    pub fn with_gold(mut self, gold: Vec<EntitySpan>) -> Self {
        self.gold = gold;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// The decoded spans of an example, serialized as
/// `{"id": ..., "entities": [[category, start, end], ...]}`.
pub struct PredictionRecord {
    pub id: ExampleId,
    pub entities: Vec<EntitySpan>,
    /// Decoded tag symbols, for the sequence tagging decoders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_seq: Option<Vec<String>>,
}

impl PredictionRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Writes the records to `path`, one JSON object per line.
pub fn write_reviews<P: AsRef<Path>>(
    path: P,
    records: &[PredictionRecord],
) -> Result<(), AdapterError> {
    write_json_lines(path, records)?;
    tracing::info!(records = records.len(), "wrote reviews");
    Ok(())
}

/// Reads records written by [`write_reviews`].
pub fn read_reviews<P: AsRef<Path>>(path: P) -> Result<Vec<PredictionRecord>, AdapterError> {
    let records = json_lines::<PredictionRecord, P>(path)?.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Started,
    Ended,
}

impl Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
/// Enum of errors wrapping the actual error structs.
pub enum AdapterError {
    /// The operation is not allowed in the current state of the run.
    InvalidState {
        operation: &'static str,
        state: RunState,
    },
    Config(ConfigError),
    Decode {
        id: ExampleId,
        error: DecodeError,
    },
    DivisionByZero(DivisionByZeroError),
    Model {
        id: ExampleId,
        error: Box<dyn Error + Send + Sync>,
    },
    Io(std::io::Error),
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidState { operation, state } => write!(
                f,
                "Can not call `{}` when the run is in the {} state",
                operation, state
            ),
            Self::Config(e) => std::fmt::Display::fmt(e, f),
            Self::Decode { id, error } => write!(f, "Could not decode example {}: {}", id, error),
            Self::DivisionByZero(e) => std::fmt::Display::fmt(e, f),
            Self::Model { id, error } => write!(f, "The model failed on example {}: {}", id, error),
            Self::Io(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl Error for AdapterError {}

impl From<ConfigError> for AdapterError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DivisionByZeroError> for AdapterError {
    fn from(value: DivisionByZeroError) -> Self {
        Self::DivisionByZero(value)
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Decoded spans of one example.
struct Decoded {
    spans: Vec<EntitySpan>,
    tag_seq: Option<Vec<String>>,
}

/// Everything needed to decode an example, shared by both runs.
struct Pipeline<'m, M> {
    model: &'m M,
    decoder: SpanDecoder,
    labels: &'m LabelMap,
    config: &'m DecodeConfig,
    state: RunState,
}

impl<'m, M> Pipeline<'m, M>
where
    M: ScoreModel + Sync,
    M::Input: Sync,
{
    fn new(model: &'m M, labels: &'m LabelMap, config: &'m DecodeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            model,
            decoder: SpanDecoder::from_config(config, labels)?,
            labels,
            config,
            state: RunState::Idle,
        })
    }

    fn transition(&mut self, operation: &'static str) -> Result<(), AdapterError> {
        let next = match (operation, self.state) {
            ("start", RunState::Idle | RunState::Ended) => RunState::Started,
            ("step", RunState::Started) => RunState::Started,
            ("end", RunState::Started) => RunState::Ended,
            (_, state) => return Err(AdapterError::InvalidState { operation, state }),
        };
        self.state = next;
        Ok(())
    }

    fn decode_example(
        &self,
        example: &Example<M::Input>,
        with_tags: bool,
    ) -> Result<Decoded, AdapterError> {
        let output = self
            .model
            .scores(&example.input)
            .map_err(|e| AdapterError::Model {
                id: example.id.clone(),
                error: Box::new(e),
            })?;
        let tensor = output.tensor();
        let decoded = if with_tags {
            self.decoder
                .decode_with_tags(&tensor, self.labels, self.config)
        } else {
            self.decoder
                .decode(&tensor, self.labels, self.config)
                .map(|spans| (spans, None))
        };
        let (spans, tag_seq) = decoded.map_err(|error| AdapterError::Decode {
            id: example.id.clone(),
            error,
        })?;
        Ok(Decoded { spans, tag_seq })
    }

    /// Decodes a batch, in parallel when configured. The results keep the order of the batch.
    fn decode_batch(
        &self,
        batch: &[Example<M::Input>],
        with_tags: bool,
    ) -> Result<Vec<Decoded>, AdapterError> {
        if self.config.parallel() {
            batch
                .par_iter()
                .map(|example| self.decode_example(example, with_tags))
                .collect()
        } else {
            batch
                .iter()
                .map(|example| self.decode_example(example, with_tags))
                .collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Final result of an evaluation run.
pub struct EvaluationReport {
    pub overall: OverallMetrics,
    pub classes: BTreeMap<String, ClassMetrics>,
    pub batches: usize,
    pub examples: usize,
}

/// An evaluation run: decodes every example and scores the spans against the gold spans.
pub struct Evaluation<'m, M> {
    pipeline: Pipeline<'m, M>,
    scorer: EntityScorer,
    batches: usize,
    examples: usize,
}

impl<'m, M> Evaluation<'m, M>
where
    M: ScoreModel + Sync,
    M::Input: Sync,
{
    pub fn new(
        model: &'m M,
        labels: &'m LabelMap,
        config: &'m DecodeConfig,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            pipeline: Pipeline::new(model, labels, config)?,
            scorer: EntityScorer::new(config.zero_division()),
            batches: 0,
            examples: 0,
        })
    }

    /// Replaces the decoder selected by the configuration, e.g. with a Viterbi decoder using
    /// learned transitions.
    pub fn with_decoder(mut self, decoder: SpanDecoder) -> Self {
        self.pipeline.decoder = decoder;
        self
    }

    pub fn state(&self) -> RunState {
        self.pipeline.state
    }

    pub fn scorer(&self) -> &EntityScorer {
        &self.scorer
    }

    /// Starts a run and resets the accumulators.
    pub fn start(&mut self) -> Result<(), AdapterError> {
        self.pipeline.transition("start")?;
        self.scorer.reset();
        self.batches = 0;
        self.examples = 0;
        tracing::info!(strategy = %self.pipeline.config.strategy(), "evaluation started");
        Ok(())
    }

    /// Decodes a batch and updates the scorer, in the order of the batch.
    pub fn step(&mut self, batch: &[Example<M::Input>]) -> Result<(), AdapterError> {
        self.pipeline.transition("step")?;
        let decoded = self.pipeline.decode_batch(batch, false)?;
        for (example, result) in batch.iter().zip(decoded) {
            self.scorer.update(&example.gold, &result.spans);
        }
        self.batches += 1;
        self.examples += batch.len();
        tracing::debug!(batch = self.batches, examples = batch.len(), "evaluated batch");
        Ok(())
    }

    /// Ends the run and computes the metrics.
    pub fn end(&mut self) -> Result<EvaluationReport, AdapterError> {
        self.pipeline.transition("end")?;
        let (overall, classes) = self.scorer.result()?;
        tracing::info!(
            precision = overall.precision,
            recall = overall.recall,
            f1 = overall.f1,
            batches = self.batches,
            examples = self.examples,
            "evaluation ended"
        );
        Ok(EvaluationReport {
            overall,
            classes,
            batches: self.batches,
            examples: self.examples,
        })
    }
}

/// A prediction run: decodes every example and collects the records.
pub struct Prediction<'m, M> {
    pipeline: Pipeline<'m, M>,
    records: Vec<PredictionRecord>,
    with_tag_sequences: bool,
}

impl<'m, M> Prediction<'m, M>
where
    M: ScoreModel + Sync,
    M::Input: Sync,
{
    pub fn new(
        model: &'m M,
        labels: &'m LabelMap,
        config: &'m DecodeConfig,
    ) -> Result<Self, AdapterError> {
        Ok(Self {
            pipeline: Pipeline::new(model, labels, config)?,
            records: Vec::new(),
            with_tag_sequences: false,
        })
    }

    pub fn with_decoder(mut self, decoder: SpanDecoder) -> Self {
        self.pipeline.decoder = decoder;
        self
    }

    /// Also records the decoded tag symbols (sequence tagging decoders only).
    pub fn with_tag_sequences(mut self, with_tag_sequences: bool) -> Self {
        self.with_tag_sequences = with_tag_sequences;
        self
    }

    pub fn state(&self) -> RunState {
        self.pipeline.state
    }

    pub fn start(&mut self) -> Result<(), AdapterError> {
        self.pipeline.transition("start")?;
        self.records.clear();
        tracing::info!(strategy = %self.pipeline.config.strategy(), "prediction started");
        Ok(())
    }

    pub fn step(&mut self, batch: &[Example<M::Input>]) -> Result<(), AdapterError> {
        self.pipeline.transition("step")?;
        let decoded = self
            .pipeline
            .decode_batch(batch, self.with_tag_sequences)?;
        self.records
            .extend(batch.iter().zip(decoded).map(|(example, result)| PredictionRecord {
                id: example.id.clone(),
                entities: result.spans,
                tag_seq: result.tag_seq,
            }));
        Ok(())
    }

    /// Ends the run and returns the records, in the order of the batches.
    pub fn end(&mut self) -> Result<Vec<PredictionRecord>, AdapterError> {
        self.pipeline.transition("end")?;
        tracing::info!(records = self.records.len(), "prediction ended");
        Ok(std::mem::take(&mut self.records))
    }
}
