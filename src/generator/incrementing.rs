//! Incrementing generator: every series reports the current cycle number.

use super::{GeneratorKind, MetricsGenerator, Sample, SeriesGrid};

/// Reports value `i` for every series on the i-th collection (1-indexed).
///
/// Closed form: `sum = M·L·c·(c+1)/2`.
#[derive(Debug, Clone)]
pub struct IncrementingGenerator {
    grid: SeriesGrid,
    cycle: u64,
}

impl IncrementingGenerator {
    pub fn new(grid: SeriesGrid) -> Self {
        Self { grid, cycle: 0 }
    }
}

impl MetricsGenerator for IncrementingGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Incrementing
    }

    fn grid(&self) -> SeriesGrid {
        self.grid
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn collect(&mut self) -> Vec<Sample> {
        self.cycle += 1;
        let value = self.cycle as f64;
        self.grid
            .iter()
            .map(|series| Sample { series, value })
            .collect()
    }

    fn sum(&self) -> i64 {
        let c = self.cycle as i64;
        self.grid.len() as i64 * c * (c + 1) / 2
    }
}
