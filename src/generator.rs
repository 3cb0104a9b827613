//! Metric Generators
//!
//! Deterministic synthetic metric streams, each carrying its own running-sum
//! oracle. The variant set is closed:
//!
//! - [`IncrementingGenerator`]: every series reports the cycle number
//! - [`StaticGenerator`]: every series reports 1
//! - [`RandomCyclicGenerator`]: a fixed random table replayed with rotation
//! - [`OscillatingGenerator`]: an incrementing source replayed every other scrape
//!
//! # Example
//!
//! ```
//! use scrapebench::generator::{IncrementingGenerator, MetricsGenerator, SeriesGrid};
//!
//! let mut generator = IncrementingGenerator::new(SeriesGrid::new(100, 100));
//! generator.collect();
//! assert_eq!(generator.sum(), 10_000);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

mod fixed;
mod incrementing;
mod oscillating;
mod random_cyclic;
mod traits;

pub use fixed::StaticGenerator;
pub use incrementing::IncrementingGenerator;
pub use oscillating::OscillatingGenerator;
pub use random_cyclic::RandomCyclicGenerator;
pub use traits::{GeneratorError, MetricsGenerator, Sample, SeriesGrid, SeriesId};

/// Generator variant.
///
/// The string form doubles as the exporter-spec name and the `job` label of
/// the target registration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum GeneratorKind {
    #[serde(rename = "inc")]
    #[strum(serialize = "inc")]
    Incrementing,
    #[serde(rename = "static")]
    #[strum(serialize = "static")]
    Static,
    #[serde(rename = "randcyclic")]
    #[strum(serialize = "randcyclic")]
    RandomCyclic,
    #[serde(rename = "oscillate")]
    #[strum(serialize = "oscillate")]
    Oscillating,
}

/// Default number of metric names per generator.
pub const DEFAULT_METRIC_COUNT: u32 = 100;
/// Default number of label values per metric.
pub const DEFAULT_LABEL_COUNT: u32 = 100;
/// Default exclusive upper bound for random-cyclic values.
pub const DEFAULT_MAX_VALUE: u32 = 100_000;

/// Builds generators of any kind with shared grid settings.
///
/// With a seed, the n-th random-cyclic generator built draws its table from
/// `seed + n`, so a whole run is reproducible.
#[derive(Debug)]
pub struct GeneratorFactory {
    grid: SeriesGrid,
    max_value: u32,
    seed: Option<u64>,
    built: AtomicU64,
}

impl GeneratorFactory {
    pub fn new(grid: SeriesGrid, max_value: u32, seed: Option<u64>) -> Self {
        Self {
            grid,
            max_value,
            seed,
            built: AtomicU64::new(0),
        }
    }

    pub fn grid(&self) -> SeriesGrid {
        self.grid
    }

    /// Build a new generator of the given kind.
    pub fn build(&self, kind: GeneratorKind) -> Result<Box<dyn MetricsGenerator>, GeneratorError> {
        let n = self.built.fetch_add(1, Ordering::Relaxed);
        let generator: Box<dyn MetricsGenerator> = match kind {
            GeneratorKind::Incrementing => Box::new(IncrementingGenerator::new(self.grid)),
            GeneratorKind::Static => Box::new(StaticGenerator::new(self.grid)),
            GeneratorKind::RandomCyclic => {
                let mut rng = match self.seed {
                    Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
                    None => StdRng::from_entropy(),
                };
                Box::new(RandomCyclicGenerator::new(
                    self.grid,
                    self.max_value,
                    &mut rng,
                )?)
            }
            GeneratorKind::Oscillating => Box::new(OscillatingGenerator::new(self.grid)),
        };
        Ok(generator)
    }
}

impl Default for GeneratorFactory {
    fn default() -> Self {
        Self::new(
            SeriesGrid::new(DEFAULT_METRIC_COUNT, DEFAULT_LABEL_COUNT),
            DEFAULT_MAX_VALUE,
            None,
        )
    }
}
