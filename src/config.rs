/*
 * This modules contains the configuration of the decoders and of the scorer. The `DecodeConfig`
 * struct is built once (with `Default`, the `DecodeConfigBuilder` or deserialized from JSON) and
 * passed by reference to every decoding call. It is never mutated afterwards.
*/
use crate::entity::Markup;
use crate::metrics::DivByZeroStrat;
use either::Either as LeftOrRight;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
/// Errors caused by a wiring mistake between the model layer and the decoders. They are never
/// recoverable.
pub enum ConfigError {
    /// The markup identifier is not one of the supported schemes.
    UnknownMarkup(String),
    /// The decoding strategy identifier is unknown.
    UnknownStrategy(String),
    /// The confidence threshold must be inside `[0, 1]`.
    ConfidenceOutOfRange(f32),
    /// The confidence threshold can not be represented with the float type of the scores.
    UnrepresentableConfidence(f32),
    /// A label map needs at least one label.
    EmptyLabels,
    /// The label at the given id is an empty string.
    EmptyLabel(usize),
    /// The same label was given twice.
    DuplicateLabel(String),
    /// Consecutive windows must advance: the backoff must be smaller than the window length.
    InvalidBackoff { seg_len: usize, backoff: usize },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownMarkup(m) => write!(
                f,
                "Unknown markup scheme: {}. Supported schemes are: {}",
                m,
                Markup::supported()
            ),
            Self::UnknownStrategy(s) => write!(f, "Unknown decoding strategy: {}", s),
            Self::ConfidenceOutOfRange(c) => {
                write!(f, "Confidence threshold must be in [0, 1], got {}", c)
            }
            Self::UnrepresentableConfidence(c) => write!(
                f,
                "Confidence threshold {} can not be converted to the float type of the scores",
                c
            ),
            Self::EmptyLabels => write!(f, "A label map needs at least one label"),
            Self::EmptyLabel(id) => write!(f, "The label with id {} is empty", id),
            Self::DuplicateLabel(l) => write!(f, "The label {} is present more than once", l),
            Self::InvalidBackoff { seg_len, backoff } => write!(
                f,
                "The window backoff ({}) must be smaller than the window length ({})",
                backoff, seg_len
            ),
        }
    }
}

impl Error for ConfigError {}

/// The closed set of decoding strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Independent start/end channels per category, decoded by threshold and pairing.
    #[default]
    Pointer,
    /// One score per tag symbol, decoded by arg-max on each token.
    Argmax,
    /// One score per tag symbol, decoded by Viterbi with a transition matrix.
    Viterbi,
}

impl FromStr for Strategy {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pointer" | "pn" | "span" => Ok(Self::Pointer),
            "argmax" | "softmax" => Ok(Self::Argmax),
            "viterbi" | "crf" => Ok(Self::Viterbi),
            _ => Err(ConfigError::UnknownStrategy(String::from(s))),
        }
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// Config struct shared by every decoder, the scorer and the adapters. It implements the default
/// trait.
pub struct DecodeConfig {
    /// Which decoder is used by the adapters.
    pub(crate) strategy: Strategy,
    /// Activation threshold of the pointer-network start and end channels. Must be in `[0, 1]`.
    pub(crate) confidence: f32,
    /// Can a start position be paired with more than one end position?
    pub(crate) enable_nested_entities: bool,
    /// Number of special tokens (such as `[CLS]`) in front of the text tokens. Decoded positions
    /// are shifted left by this amount so they index the text tokens.
    pub(crate) leading_token_offset: usize,
    /// Tagging scheme of the sequence-tagging decoders.
    pub(crate) markup: Markup,
    /// Repair malformed tag sequences instead of dropping the malformed spans.
    pub(crate) autofix: bool,
    /// If the prefix (e.g. 'I', 'B', 'E', ...) located at the end of the tag symbols? If so,
    /// this parameter should be `true`.
    pub(crate) suffix: bool,
    /// Character separating the prefix from the category in a tag symbol.
    pub(crate) delimiter: char,
    /// What to do when a metric has a zero denominator.
    pub(crate) zero_division: DivByZeroStrat,
    /// Decode the examples of a batch on multiple threads.
    pub(crate) parallel: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Pointer,
            confidence: 0.5,
            enable_nested_entities: false,
            leading_token_offset: 1,
            markup: Markup::Bios,
            autofix: false,
            suffix: false,
            delimiter: '-',
            zero_division: DivByZeroStrat::ReplaceBy0,
            parallel: false,
        }
    }
}

impl DecodeConfig {
    /// Validates the values which can not be enforced by the type system.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }

    /// Parses and validates a JSON configuration. Missing fields take their default value.
    pub fn from_json(json: &str) -> Result<Self, ConfigParsingError> {
        let config: Self = serde_json::from_str(json).map_err(ConfigParsingError::Json)?;
        config.validate().map_err(ConfigParsingError::Invalid)?;
        Ok(config)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }
    pub fn confidence(&self) -> f32 {
        self.confidence
    }
    pub fn enable_nested_entities(&self) -> bool {
        self.enable_nested_entities
    }
    pub fn leading_token_offset(&self) -> usize {
        self.leading_token_offset
    }
    pub fn markup(&self) -> Markup {
        self.markup
    }
    pub fn autofix(&self) -> bool {
        self.autofix
    }
    pub fn suffix(&self) -> bool {
        self.suffix
    }
    pub fn delimiter(&self) -> char {
        self.delimiter
    }
    pub fn zero_division(&self) -> DivByZeroStrat {
        self.zero_division
    }
    pub fn parallel(&self) -> bool {
        self.parallel
    }
}

#[derive(Debug)]
/// The JSON configuration could not be read.
pub enum ConfigParsingError {
    Json(serde_json::Error),
    Invalid(ConfigError),
}

impl Display for ConfigParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "Could not parse the configuration: {}", e),
            Self::Invalid(e) => std::fmt::Display::fmt(e, f),
        }
    }
}

impl Error for ConfigParsingError {}

impl Display for DecodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = format!("Decoding strategy: {}\n Confidence threshold: {}\n Nested entities enabled: {}\n Leading token offset: {}\n Markup scheme: {}\n Autofix enabled: {}\n Prefix located at the end of the tags: {}\n Delimiter: {:?}\n Strategy when encountering a division by zero: {:?}\n Using parallel computations: {}", self.strategy, self.confidence, self.enable_nested_entities, self.leading_token_offset, self.markup, self.autofix, self.suffix, self.delimiter, self.zero_division, self.parallel);
        write!(f, "{}", string)
    }
}

/// This builder can be used to build and customize a `DecodeConfig` structure.
pub struct DecodeConfigBuilder<ZeroDiv>
where
    ZeroDiv: Into<DivByZeroStrat>,
{
    inner: DecodeConfig,
    zero_division: LeftOrRight<ZeroDiv, DivByZeroStrat>,
}

impl Default for DecodeConfigBuilder<DivByZeroStrat> {
    fn default() -> Self {
        Self::new()
    }
}

impl<ZeroDiv> DecodeConfigBuilder<ZeroDiv>
where
    ZeroDiv: Into<DivByZeroStrat>,
{
    pub fn new() -> Self {
        Self {
            inner: DecodeConfig::default(),
            zero_division: LeftOrRight::Right(DivByZeroStrat::ReplaceBy0),
        }
    }
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.inner.strategy = strategy;
        self
    }
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.inner.confidence = confidence;
        self
    }
    pub fn enable_nested_entities(mut self, enable: bool) -> Self {
        self.inner.enable_nested_entities = enable;
        self
    }
    pub fn leading_token_offset(mut self, offset: usize) -> Self {
        self.inner.leading_token_offset = offset;
        self
    }
    pub fn markup(mut self, markup: Markup) -> Self {
        self.inner.markup = markup;
        self
    }
    pub fn autofix(mut self, autofix: bool) -> Self {
        self.inner.autofix = autofix;
        self
    }
    pub fn suffix(mut self, suffix: bool) -> Self {
        self.inner.suffix = suffix;
        self
    }
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.inner.delimiter = delimiter;
        self
    }
    pub fn division_by_zero(mut self, division_by_zero: ZeroDiv) -> Self {
        self.zero_division = LeftOrRight::Left(division_by_zero);
        self
    }
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.inner.parallel = parallel;
        self
    }
    /// Builds and validates the configuration.
    pub fn build(self) -> Result<DecodeConfig, ConfigError> {
        let mut config = self.inner;
        config.zero_division = self.zero_division.either_into();
        config.validate()?;
        Ok(config)
    }
}
