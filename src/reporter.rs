/**
This modules gives a few tools to prettyprint the output for all the categories and the overall
metrics.
*/
use crate::metrics::{ClassMetrics, OverallMetrics};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::Display;

/// The reporter holds the metrics of every category and the overall metrics. It can be used to
/// display the results (i.e. prettyprint them) as if they were collected into a dataframe. The
/// reporter is built with `EntityScorer::report`.
///
/// # Example
///
/// ```rust
/// use spanlab::{EntityScorer, EntitySpan};
///
/// let gold = vec![EntitySpan::new("PER", 0, 1).unwrap(), EntitySpan::new("LOC", 3, 3).unwrap()];
/// let predicted = vec![EntitySpan::new("PER", 0, 1).unwrap(), EntitySpan::new("LOC", 2, 3).unwrap()];
/// let mut scorer = EntityScorer::default();
/// scorer.update(&gold, &predicted);
///
/// let expected_report = "Class, Precision, Recall, Fscore, Support
/// Overall_Micro, 0.5, 0.5, 0.5, 2
/// LOC, 0, 0, 0, 1
/// PER, 1, 1, 1, 1\n";
///
/// assert_eq!(expected_report, scorer.report().unwrap().to_string());
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Reporter {
    pub(crate) classes: BTreeSet<ClassMetricsInner>,
}

impl Reporter {
    pub(crate) fn insert(&mut self, metrics: ClassMetricsInner) -> bool {
        self.classes.insert(metrics)
    }

    /// Returns the row of a category, or of the overall metrics with `"Overall_Micro"`.
    pub fn get(&self, class: &str) -> Option<&ClassMetricsInner> {
        self.classes.iter().find(|c| c.class == class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassMetricsInner> {
        self.classes.iter()
    }
}

/// The Reporter struct acts as a dataframe when displayed.
impl Display for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Class, Precision, Recall, Fscore, Support")?;
        for v in self.classes.iter() {
            writeln!(f, "{}", v)?
        }
        Ok(())
    }
}

#[derive(Debug, Hash, PartialEq, Eq, Copy, Clone, Serialize, Deserialize, PartialOrd, Ord)]
/// The overall rows are ordered before the per-category rows.
pub enum Average {
    Micro,
    None,
}

impl Average {
    pub(crate) const OVERALL_MICRO: &'static str = "Overall_Micro";
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// A single line of the report. The lines are compared on their class and average only.
pub struct ClassMetricsInner {
    /// The class, such as "PER", "GEO", "MISC", or "Overall_Micro".
    pub class: String,
    /// The average used to compute this class' metrics
    pub average: Average,
    pub precision: f64,
    pub recall: f64,
    pub fscore: f64,
    /// Number of gold spans
    pub support: usize,
}

impl PartialEq for ClassMetricsInner {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class && self.average == other.average
    }
}
impl Eq for ClassMetricsInner {}

impl PartialOrd for ClassMetricsInner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ClassMetricsInner {
    fn cmp(&self, other: &Self) -> Ordering {
        self.average
            .cmp(&other.average)
            .then_with(|| self.class.cmp(&other.class))
    }
}

impl ClassMetricsInner {
    pub(crate) fn new_overall(overall: OverallMetrics, support: usize) -> Self {
        ClassMetricsInner {
            class: String::from(Average::OVERALL_MICRO),
            average: Average::Micro,
            precision: overall.precision,
            recall: overall.recall,
            fscore: overall.f1,
            support,
        }
    }

    pub(crate) fn new_class(class: String, metrics: ClassMetrics) -> Self {
        ClassMetricsInner {
            class,
            average: Average::None,
            precision: metrics.precision,
            recall: metrics.recall,
            fscore: metrics.f1,
            support: metrics.support,
        }
    }
}

/// The Classmetrics struct acts as a line in a dataframe when displayed.
impl Display for ClassMetricsInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}, {}",
            self.class, self.precision, self.recall, self.fscore, self.support
        )
    }
}
