//! Text exposition of generator samples.
//!
//! Each exporter instance owns its own [`Registry`]; nothing is registered
//! process-wide, so instances and test runs stay isolated.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::generator::{Sample, SeriesGrid};

/// Label name carrying the label index of a series.
pub const LABEL_NAME: &str = "lab";

/// Per-instance gauge registry mirroring a generator's series grid.
pub struct Exposition {
    registry: Registry,
    gauges: Vec<GaugeVec>,
    label_values: Vec<String>,
}

impl Exposition {
    /// Register one gauge family per metric of the grid.
    pub fn new(grid: SeriesGrid) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let mut gauges = Vec::with_capacity(grid.metric_count() as usize);
        for metric in 0..grid.metric_count() {
            let name = SeriesGrid::metric_name(metric);
            let gauge = GaugeVec::new(Opts::new(name.clone(), name), &[LABEL_NAME])?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.push(gauge);
        }
        let label_values = (0..grid.label_count()).map(|l| l.to_string()).collect();

        Ok(Self {
            registry,
            gauges,
            label_values,
        })
    }

    /// Content type of the rendered payload.
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    /// Apply `samples` to the gauges and encode every family.
    pub fn render(&self, samples: &[Sample]) -> Result<String, prometheus::Error> {
        for sample in samples {
            let (Some(gauge), Some(label)) = (
                self.gauges.get(sample.series.metric as usize),
                self.label_values.get(sample.series.label as usize),
            ) else {
                tracing::warn!(series = ?sample.series, "Sample outside exposition grid");
                continue;
            };
            gauge.with_label_values(&[label.as_str()]).set(sample.value);
        }

        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Exposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exposition")
            .field("metric_count", &self.gauges.len())
            .field("label_count", &self.label_values.len())
            .finish_non_exhaustive()
    }
}
