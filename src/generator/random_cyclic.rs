//! Random-cyclic generator: a fixed random table replayed with a rotating offset.
//!
//! At construction `M·L` integers are drawn uniformly from `[0, max_value)`.
//! On the collection with zero-based index `c`, series `s` reports
//! `table[(c + s) mod M·L]`. Every collection therefore serves the whole table
//! exactly once, so `sum = c · Σtable` for any `c`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{GeneratorError, GeneratorKind, MetricsGenerator, Sample, SeriesGrid};

#[derive(Debug, Clone)]
pub struct RandomCyclicGenerator {
    grid: SeriesGrid,
    values: Vec<i64>,
    table_sum: i64,
    cycle: u64,
}

impl RandomCyclicGenerator {
    /// Draw a fresh table from `rng`.
    pub fn new<R: Rng + ?Sized>(
        grid: SeriesGrid,
        max_value: u32,
        rng: &mut R,
    ) -> Result<Self, GeneratorError> {
        if max_value == 0 {
            return Err(GeneratorError::InvalidMaxValue);
        }
        let values = (0..grid.len())
            .map(|_| i64::from(rng.gen_range(0..max_value)))
            .collect();
        Self::from_table(grid, values)
    }

    /// Draw a reproducible table from a seed.
    pub fn with_seed(grid: SeriesGrid, max_value: u32, seed: u64) -> Result<Self, GeneratorError> {
        Self::new(grid, max_value, &mut StdRng::seed_from_u64(seed))
    }

    /// Use a caller-provided table. Its length must match the grid.
    pub fn from_table(grid: SeriesGrid, values: Vec<i64>) -> Result<Self, GeneratorError> {
        if values.len() != grid.len() {
            return Err(GeneratorError::TableSize {
                expected: grid.len(),
                actual: values.len(),
            });
        }
        let table_sum = values.iter().sum();
        Ok(Self {
            grid,
            values,
            table_sum,
            cycle: 0,
        })
    }

    /// Sum of the whole value table.
    pub fn table_sum(&self) -> i64 {
        self.table_sum
    }
}

impl MetricsGenerator for RandomCyclicGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::RandomCyclic
    }

    fn grid(&self) -> SeriesGrid {
        self.grid
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn collect(&mut self) -> Vec<Sample> {
        let len = self.values.len();
        let offset = if len == 0 {
            0
        } else {
            (self.cycle % len as u64) as usize
        };
        self.cycle += 1;

        self.grid
            .iter()
            .enumerate()
            .map(|(i, series)| Sample {
                series,
                value: self.values[(offset + i) % len] as f64,
            })
            .collect()
    }

    fn sum(&self) -> i64 {
        self.table_sum * self.cycle as i64
    }
}
