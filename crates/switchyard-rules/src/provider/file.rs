//! Local file vehicle.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::RulesError;
use crate::provider::vehicle::{Fetched, Vehicle, VehicleType, modified};

/// Reads provider content from a local file.
///
/// A refresh whose file modification time equals the previous read is
/// reported as [`Fetched::NotModified`] without reading the file.
#[derive(Debug)]
pub struct FileVehicle {
    path: PathBuf,
    last_modified: Mutex<Option<SystemTime>>,
}

impl FileVehicle {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_modified: Mutex::new(None),
        }
    }

    async fn read(&self) -> Result<Bytes, RulesError> {
        let mtime = modified(&self.path).await;
        let content = tokio::fs::read(&self.path)
            .await
            .map_err(|e| RulesError::Fetch {
                source_name: self.path.display().to_string(),
                reason: e.to_string(),
            })?;
        *self.last_modified.lock() = mtime;
        Ok(Bytes::from(content))
    }
}

#[async_trait]
impl Vehicle for FileVehicle {
    fn kind(&self) -> VehicleType {
        VehicleType::File
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    async fn fetch(&self) -> Result<Fetched, RulesError> {
        let previous = *self.last_modified.lock();
        if let Some(prev) = previous
            && modified(&self.path).await == Some(prev)
        {
            debug!(path = %self.path.display(), "provider file unchanged");
            return Ok(Fetched::NotModified);
        }
        self.read().await.map(Fetched::Content)
    }

    async fn initial(&self, _max_age: std::time::Duration) -> Result<Bytes, RulesError> {
        self.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn reads_file_then_reports_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.yaml");
        std::fs::write(&path, "payload:\n  - example.com\n").unwrap();

        let vehicle = FileVehicle::new(&path);
        assert_eq!(vehicle.path(), Some(path.as_path()));
        let bytes = vehicle.initial(Duration::ZERO).await.unwrap();
        assert!(bytes.starts_with(b"payload:"));
        assert_eq!(vehicle.fetch().await.unwrap(), Fetched::NotModified);
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let vehicle = FileVehicle::new("/nonexistent/switchyard/rules.yaml");
        let err = vehicle.initial(Duration::ZERO).await.unwrap_err();
        assert!(err.is_fetch());
    }
}
