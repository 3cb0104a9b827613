//! Exporter Layer
//!
//! Binds generators to scrape endpoints the backend can discover.
//!
//! - [`ExporterInstance`]: one generator behind one HTTP endpoint, with
//!   graceful stop and exact final-sum capture
//! - [`TargetRegistration`]: file-SD record announcing an instance
//! - [`Exposition`]: per-instance gauge registry rendering the text format

use std::path::PathBuf;

use thiserror::Error;

mod discovery;
mod exposition;
mod instance;

pub use discovery::{TargetGroup, TargetRegistration};
pub use exposition::{Exposition, LABEL_NAME};
pub use instance::{
    DEFAULT_SHUTDOWN_GRACE, ExporterInstance, InstanceState, InstanceSum, METRICS_PATH,
};

/// Errors that can occur while starting an exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Could not bind the scrape listener.
    #[error("unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the discovery record.
    #[error("unable to write registration file '{}': {source}", path.display())]
    Registration {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Exposition registry setup failed.
    #[error("exposition error: {0}")]
    Exposition(#[from] prometheus::Error),

    /// Registration record could not be encoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other network I/O error.
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
}
