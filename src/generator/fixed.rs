//! Static generator: every series always reports 1.

use super::{GeneratorKind, MetricsGenerator, Sample, SeriesGrid};

/// Constant-valued generator. Closed form: `sum = M·L·c`.
#[derive(Debug, Clone)]
pub struct StaticGenerator {
    grid: SeriesGrid,
    cycle: u64,
}

impl StaticGenerator {
    pub fn new(grid: SeriesGrid) -> Self {
        Self { grid, cycle: 0 }
    }
}

impl MetricsGenerator for StaticGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Static
    }

    fn grid(&self) -> SeriesGrid {
        self.grid
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn collect(&mut self) -> Vec<Sample> {
        self.cycle += 1;
        self.grid
            .iter()
            .map(|series| Sample { series, value: 1.0 })
            .collect()
    }

    fn sum(&self) -> i64 {
        self.grid.len() as i64 * self.cycle as i64
    }
}
