/*!
This library decodes named entity spans from the output of NER models and scores them against
gold annotations. It is built with a focus on performance and soundness.

# DECODERS
Every decoder takes the score tensor of one example (shape `[seq_len, channels]`), its true
length and an optional validity mask. Decoding is a pure function of these inputs, a
[`LabelMap`] and a [`DecodeConfig`].
* Pointer network: every category owns a start channel and an end channel. Positions whose
    activation is above the confidence threshold are paired into spans.
* Arg-max: one score per tag symbol, the best tag of every token is picked independently.
* Viterbi: one score per tag symbol, the best tag sequence is found with a transition matrix.

The leading special token (e.g. `[CLS]`) is removed from every position: the spans index the
text tokens.

# MARKUPS
The sequence tagging decoders group tags into spans following a markup:
* BIO (also called IOB2): `B` begins a span and `I` continues it.
* BIOS (also called BIOES or IOBES): `E` closes a span of two tokens or more and `S` is a span of
    a single token.
* BILOU: same as BIOS, with `L` (last) and `U` (unit) in place of `E` and `S`.

The grouping is strict: malformed spans are dropped. The autofix mode repairs the sequence first.

# Terminology
* A category is an entity we are interested in, such as `LOC` for location or `PER` for person.
* A tag symbol is a string made of a prefix and a category, such as `B-PER`. `O` is outside of
    any span.
* A span is a category with an inclusive `[start, end]` token range.
*/

mod adapter;
mod config;
mod decoder;
mod entity;
mod label;
mod metrics;
mod reporter;
mod segment;
mod span;

// The public api starts here
pub use span::{EntitySpan, InvertedSpanError};

pub use label::{LabelMap, OUTSIDE};

pub use config::{ConfigError, ConfigParsingError, DecodeConfig, DecodeConfigBuilder, Strategy};

pub use entity::{
    get_entities, get_entities_with_repairs, group_tags, parse_tags, repair_tags,
    AutoDetectError, Markup, Prefix, Repair, RepairKind, Tag,
};

pub use decoder::{
    decode, extract_span_candidates, sigmoid_squared, ArgmaxDecoder, Decode, DecodeError,
    FloatExt, PointerDecoder, ScoreTensor, SpanCandidate, SpanDecoder, TransitionMatrix,
    ViterbiDecoder,
};

pub use metrics::{
    ClassMetrics, DivByZeroStrat, DivisionByZeroError, EntityScorer, Metric, OverallMetrics,
    ParsingDivisionByZeroStrategyError,
};

pub use reporter::{Average, ClassMetricsInner, Reporter};

pub use adapter::{
    read_reviews, write_reviews, AdapterError, Evaluation, EvaluationReport, Example, ExampleId,
    ModelOutput, Prediction, PredictionRecord, RunState, ScoreModel,
};

pub use segment::{merge_window_spans, windows};
