//! File-based service discovery records.
//!
//! One JSON file per target, in the format the backend's file-SD reader
//! expects:
//!
//! ```json
//! [ { "targets": ["localhost:10000"], "labels": { "job": "inc" } } ]
//! ```
//!
//! Files are written to a temporary name and renamed into place so the
//! backend never observes a partial record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ExporterError;

/// One target group of a file-SD record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGroup {
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Discovery record for a single exporter instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegistration {
    pub address: String,
    pub job: String,
}

impl TargetRegistration {
    pub fn new(address: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            job: job.into(),
        }
    }

    /// Name of the registration file for a port.
    pub fn file_name(port: u16) -> String {
        format!("load-{port}.json")
    }

    /// Serialized record contents.
    pub fn to_groups(&self) -> Vec<TargetGroup> {
        vec![TargetGroup {
            targets: vec![self.address.clone()],
            labels: BTreeMap::from([("job".to_string(), self.job.clone())]),
        }]
    }

    /// Write the record into `dir`, creating the directory if needed.
    ///
    /// Returns the path of the written file.
    pub async fn write(&self, dir: &Path, port: u16) -> Result<PathBuf, ExporterError> {
        let path = dir.join(Self::file_name(port));
        let contents = serde_json::to_vec_pretty(&self.to_groups())?;
        let registration_err = |source| ExporterError::Registration {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(registration_err)?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(registration_err)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(registration_err)?;

        tracing::debug!(target = %self.address, job = %self.job, path = %path.display(), "Target registered");
        Ok(path)
    }
}
