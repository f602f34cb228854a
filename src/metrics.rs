/**
Exact-match scoring of predicted entity spans against gold spans, micro-averaged.
*/
use crate::reporter::{ClassMetricsInner, Reporter};
use crate::span::EntitySpan;
use ahash::{AHashMap, AHashSet};
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display};
use std::str::FromStr;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Serialize, Deserialize)]
pub enum Metric {
    Precision,
    Recall,
    FScore,
}

impl Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
/// What to do when a metric has a zero denominator (no gold span or no predicted span).
pub enum DivByZeroStrat {
    /// The metric is worth `1`. An evaluation without any gold and predicted span is perfect.
    ReplaceBy1,
    /// Returns an error
    ReturnError,
    /// The metric is worth `0`.
    #[default]
    ReplaceBy0,
}

#[derive(Debug)]
pub struct ParsingDivisionByZeroStrategyError<S: Debug + Display>(S);

impl<S: Debug + Display> Display for ParsingDivisionByZeroStrategyError<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Could not parse the {} into a `DivByZeroStrat`", self.0)
    }
}

impl<S: Debug + Display> Error for ParsingDivisionByZeroStrategyError<S> {}

impl FromStr for DivByZeroStrat {
    type Err = ParsingDivisionByZeroStrategyError<String>;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "replaceby1" | "replacebyone" => Ok(DivByZeroStrat::ReplaceBy1),
            "replaceby0" | "replacebyzero" => Ok(DivByZeroStrat::ReplaceBy0),
            "returnerror" | "error" => Ok(DivByZeroStrat::ReturnError),
            _ => Err(ParsingDivisionByZeroStrategyError(String::from(s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A metric had a zero denominator and the scorer was asked to fail in that case.
pub struct DivisionByZeroError {
    pub metric: Metric,
    /// `None` for the overall metrics.
    pub category: Option<String>,
}

impl Display for DivisionByZeroError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.category {
            Some(c) => write!(
                f,
                "Encountered division by zero while computing the {} of {}",
                self.metric, c
            ),
            None => write!(
                f,
                "Encountered division by zero while computing the overall {}",
                self.metric
            ),
        }
    }
}

impl Error for DivisionByZeroError {}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
/// Micro-averaged metrics over every category. Serialized with the `acc`, `recall` and `f1` keys.
pub struct OverallMetrics {
    #[serde(rename = "acc")]
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
/// Metrics of a single category.
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of gold spans of this category.
    pub support: usize,
    /// Number of predicted spans of this category.
    pub found: usize,
    /// Number of predicted spans of this category which are also gold spans.
    pub right: usize,
}

/// Stateful accumulator of gold spans (`origins`), predicted spans (`founds`) and correctly
/// predicted spans (`rights`).
///
/// A predicted span is right only when its category, start and end are all equal to those of a
/// gold span of the same update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityScorer {
    origins: Vec<EntitySpan>,
    founds: Vec<EntitySpan>,
    rights: Vec<EntitySpan>,
    zero_division: DivByZeroStrat,
}

impl EntityScorer {
    pub fn new(zero_division: DivByZeroStrat) -> Self {
        Self {
            zero_division,
            ..Default::default()
        }
    }

    /// Adds the spans of one example.
    ///
    /// * `gold`: The spans of the annotation.
    /// * `predicted`: The decoded spans.
    pub fn update(&mut self, gold: &[EntitySpan], predicted: &[EntitySpan]) {
        let gold_set: AHashSet<&EntitySpan> = gold.iter().collect();
        self.rights
            .extend(predicted.iter().filter(|p| gold_set.contains(p)).cloned());
        self.origins.extend_from_slice(gold);
        self.founds.extend_from_slice(predicted);
    }

    /// Concatenates the spans of another accumulator, such as one filled by another worker.
    pub fn merge(&mut self, other: EntityScorer) {
        self.origins.extend(other.origins);
        self.founds.extend(other.founds);
        self.rights.extend(other.rights);
    }

    pub fn reset(&mut self) {
        self.origins.clear();
        self.founds.clear();
        self.rights.clear();
    }

    pub fn origins(&self) -> &[EntitySpan] {
        &self.origins
    }

    pub fn founds(&self) -> &[EntitySpan] {
        &self.founds
    }

    pub fn rights(&self) -> &[EntitySpan] {
        &self.rights
    }

    pub fn zero_division(&self) -> DivByZeroStrat {
        self.zero_division
    }

    /// Computes the overall metrics from the pooled counts (micro-averaging) and the metrics of
    /// every category present in the gold spans. Categories which were only predicted count in
    /// the overall precision but get no row.
    pub fn result(
        &self,
    ) -> Result<(OverallMetrics, BTreeMap<String, ClassMetrics>), DivisionByZeroError> {
        let overall = self.overall()?;
        let origin_counts = count_categories(&self.origins);
        let found_counts = count_categories(&self.founds);
        let right_counts = count_categories(&self.rights);
        let mut classes = BTreeMap::new();
        for (category, support) in origin_counts {
            let found = found_counts.get(category).copied().unwrap_or(0);
            let right = right_counts.get(category).copied().unwrap_or(0);
            let (precision, recall, f1) =
                compute(support, found, right, self.zero_division, Some(category))?;
            classes.insert(
                String::from(category),
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support,
                    found,
                    right,
                },
            );
        }
        Ok((overall, classes))
    }

    /// Overall metrics only.
    pub fn overall(&self) -> Result<OverallMetrics, DivisionByZeroError> {
        let (precision, recall, f1) = compute(
            self.origins.len(),
            self.founds.len(),
            self.rights.len(),
            self.zero_division,
            None,
        )?;
        Ok(OverallMetrics {
            precision,
            recall,
            f1,
        })
    }

    /// Builds a printable report of the result.
    pub fn report(&self) -> Result<Reporter, DivisionByZeroError> {
        let (overall, classes) = self.result()?;
        let mut reporter = Reporter::default();
        reporter.insert(ClassMetricsInner::new_overall(
            overall,
            self.origins.len(),
        ));
        for (class, metrics) in classes {
            reporter.insert(ClassMetricsInner::new_class(class, metrics));
        }
        Ok(reporter)
    }
}

fn count_categories(spans: &[EntitySpan]) -> AHashMap<&str, usize> {
    let mut counts = AHashMap::new();
    for span in spans {
        *counts.entry(span.category()).or_insert(0) += 1;
    }
    counts
}

/// Returns precision, recall and f1.
fn compute(
    origin: usize,
    found: usize,
    right: usize,
    zero_division: DivByZeroStrat,
    category: Option<&str>,
) -> Result<(f64, f64, f64), DivisionByZeroError> {
    let precision = divide(right, found, zero_division, Metric::Precision, category)?;
    let recall = divide(right, origin, zero_division, Metric::Recall, category)?;
    let f1 = if precision + recall == 0.0 {
        0.0
    } else {
        2.0 * precision * recall / (precision + recall)
    };
    Ok((precision, recall, f1))
}

fn divide(
    numerator: usize,
    denominator: usize,
    zero_division: DivByZeroStrat,
    metric: Metric,
    category: Option<&str>,
) -> Result<f64, DivisionByZeroError> {
    if denominator != 0 {
        return Ok(numerator as f64 / denominator as f64);
    }
    let replacement = match zero_division {
        DivByZeroStrat::ReturnError => {
            return Err(DivisionByZeroError {
                metric,
                category: category.map(String::from),
            })
        }
        DivByZeroStrat::ReplaceBy0 => 0.0,
        DivByZeroStrat::ReplaceBy1 => 1.0,
    };
    tracing::warn!(
        %metric,
        category = category.unwrap_or("overall"),
        replacement,
        "encountered a division by zero"
    );
    Ok(replacement)
}
