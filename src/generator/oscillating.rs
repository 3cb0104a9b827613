//! Oscillating (replay) generator.
//!
//! Simulates a source whose values change more slowly than it is scraped.
//! Even-parity calls take a fresh payload from an inner
//! [`IncrementingGenerator`] and cache it with the inner cumulative sum;
//! odd-parity calls serve that cached payload again.
//!
//! Each call reports a contribution of `latest cached sum - previous cached sum`,
//! which is the inner generator's increment for the payload being served. The
//! generator's own sum is the total of those contributions, so it tracks
//! exactly what the backend ingested, replays included.

use super::{GeneratorKind, IncrementingGenerator, MetricsGenerator, Sample, SeriesGrid};

#[derive(Debug, Clone)]
pub struct OscillatingGenerator {
    inner: IncrementingGenerator,
    calls: u64,
    payload: Vec<Sample>,
    /// Inner cumulative sums at the previous and the latest fresh computation.
    cached_sums: [i64; 2],
    reported: i64,
}

impl OscillatingGenerator {
    pub fn new(grid: SeriesGrid) -> Self {
        Self {
            inner: IncrementingGenerator::new(grid),
            calls: 0,
            payload: Vec::new(),
            cached_sums: [0, 0],
            reported: 0,
        }
    }

    /// Contribution of the payload currently cached.
    pub fn current_delta(&self) -> i64 {
        self.cached_sums[1] - self.cached_sums[0]
    }

    /// Sum of the wrapped incrementing generator (fresh payloads only).
    pub fn inner_sum(&self) -> i64 {
        self.inner.sum()
    }
}

impl MetricsGenerator for OscillatingGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Oscillating
    }

    fn grid(&self) -> SeriesGrid {
        self.inner.grid()
    }

    fn cycle(&self) -> u64 {
        self.calls
    }

    fn collect(&mut self) -> Vec<Sample> {
        if self.calls % 2 == 0 {
            self.payload = self.inner.collect();
            self.cached_sums = [self.cached_sums[1], self.inner.sum()];
        }
        self.calls += 1;
        self.reported += self.current_delta();
        self.payload.clone()
    }

    fn sum(&self) -> i64 {
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_total(samples: &[Sample]) -> i64 {
        samples.iter().map(|s| s.value).sum::<f64>() as i64
    }

    #[test]
    fn test_sum_zero_before_collect() {
        let generator = OscillatingGenerator::new(SeriesGrid::new(10, 10));
        assert_eq!(generator.sum(), 0);
        assert_eq!(generator.cycle(), 0);
    }

    #[test]
    fn test_odd_calls_replay_previous_payload() {
        let mut generator = OscillatingGenerator::new(SeriesGrid::new(2, 2));

        let first = generator.collect();
        let replay = generator.collect();
        let fresh = generator.collect();

        assert_eq!(first, replay);
        assert!(first.iter().all(|s| s.value == 1.0));
        assert!(fresh.iter().all(|s| s.value == 2.0));
        assert_eq!(generator.cycle(), 3);
    }

    #[test]
    fn test_delta_equals_inner_increment() {
        let mut generator = OscillatingGenerator::new(SeriesGrid::new(100, 100));

        generator.collect();
        assert_eq!(generator.current_delta(), 10_000);
        generator.collect();
        assert_eq!(generator.current_delta(), 10_000);

        let before = generator.inner_sum();
        generator.collect();
        assert_eq!(generator.current_delta(), generator.inner_sum() - before);
        assert_eq!(generator.current_delta(), 20_000);
    }

    #[test]
    fn test_reported_total_equals_served_total() {
        for calls in 0..12 {
            let mut generator = OscillatingGenerator::new(SeriesGrid::new(3, 4));
            let mut served = 0;
            for _ in 0..calls {
                served += payload_total(&generator.collect());
            }
            assert_eq!(generator.sum(), served, "after {calls} calls");
        }
    }

    #[test]
    fn test_even_call_count_doubles_inner_sum() {
        let mut generator = OscillatingGenerator::new(SeriesGrid::new(10, 10));
        for _ in 0..10 {
            generator.collect();
        }
        // Five fresh payloads, each served twice.
        assert_eq!(generator.inner_sum(), 100 * 5 * 6 / 2);
        assert_eq!(generator.sum(), 2 * generator.inner_sum());
    }
}
