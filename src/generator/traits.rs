//! Core generator trait and series types.

use thiserror::Error;

use super::GeneratorKind;

/// Errors raised while constructing a generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Upper bound for random values must be at least 1.
    #[error("max value must be positive")]
    InvalidMaxValue,

    /// A fixed value table does not cover the series grid exactly.
    #[error("value table has {actual} entries, grid needs {expected}")]
    TableSize { expected: usize, actual: usize },
}

/// Identity of one synthetic series within a generator's grid.
///
/// Rendered as metric `test<metric>` with label `lab="<label>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesId {
    /// Metric index.
    pub metric: u32,
    /// Label value index.
    pub label: u32,
}

/// One value reported for one series during a collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub series: SeriesId,
    pub value: f64,
}

/// Fixed `metric_count × label_count` grid of series identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesGrid {
    metric_count: u32,
    label_count: u32,
}

impl SeriesGrid {
    pub fn new(metric_count: u32, label_count: u32) -> Self {
        Self {
            metric_count,
            label_count,
        }
    }

    pub fn metric_count(&self) -> u32 {
        self.metric_count
    }

    pub fn label_count(&self) -> u32 {
        self.label_count
    }

    /// Total number of series in the grid.
    pub fn len(&self) -> usize {
        self.metric_count as usize * self.label_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate series in metric-major order.
    pub fn iter(&self) -> impl Iterator<Item = SeriesId> + use<> {
        let labels = self.label_count;
        (0..self.metric_count)
            .flat_map(move |metric| (0..labels).map(move |label| SeriesId { metric, label }))
    }

    /// Exposition name of a metric index.
    pub fn metric_name(metric: u32) -> String {
        format!("test{metric}")
    }
}

/// A deterministic synthetic metric source with a closed-form running sum.
///
/// Every call to [`collect`](MetricsGenerator::collect) advances the
/// generator by exactly one cycle. [`sum`](MetricsGenerator::sum) is the
/// total of every value handed out so far and depends only on the cycle
/// count and construction-time state, never on timing.
///
/// Implementations are not internally synchronized; the exporter serializes
/// access behind a lock.
pub trait MetricsGenerator: Send + 'static {
    /// Variant tag of this generator.
    fn kind(&self) -> GeneratorKind;

    /// Series grid this generator reports on.
    fn grid(&self) -> SeriesGrid;

    /// Number of completed collections.
    fn cycle(&self) -> u64;

    /// Produce the values for one scrape and advance the cycle.
    fn collect(&mut self) -> Vec<Sample>;

    /// Sum of all values produced so far. Zero before the first collect.
    fn sum(&self) -> i64;
}
