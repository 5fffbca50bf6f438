//! JSON report persistence. Every report is written twice: once under a
//! timestamped name for history and once as `latest_<category>.json` so
//! downstream tooling has a stable path to read.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("no report found for category '{0}'")]
    NotFound(String),
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: &Path) -> Result<Self, ReportError> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn latest_path(&self, category: &str) -> PathBuf {
        self.dir.join(format!("latest_{}.json", category))
    }

    /// Persist a report, returning the timestamped path.
    pub fn write<T: Serialize>(&self, category: &str, payload: &T) -> Result<PathBuf, ReportError> {
        let json = serde_json::to_string_pretty(payload)?;
        let stamped = self.dir.join(format!(
            "{}_{}.json",
            category,
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        fs::write(&stamped, &json)?;
        fs::write(self.latest_path(category), &json)?;
        info!("wrote {} report to {}", category, stamped.display());
        Ok(stamped)
    }

    /// Read back the most recent report of a category.
    pub fn read_latest<T: DeserializeOwned>(&self, category: &str) -> Result<T, ReportError> {
        let path = self.latest_path(category);
        if !path.exists() {
            return Err(ReportError::NotFound(category.to_string()));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
