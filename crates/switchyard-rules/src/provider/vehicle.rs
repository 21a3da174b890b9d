//! Fetch vehicles behind rule providers.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::RulesError;

/// Which kind of vehicle backs a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    File,
    Http,
    Inline,
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Http => "http",
            Self::Inline => "inline",
        })
    }
}

/// Result of a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    Content(Bytes),
    /// The source reports no change since the previous fetch.
    NotModified,
}

/// Source of raw provider content.
#[async_trait]
pub trait Vehicle: Send + Sync + fmt::Debug {
    fn kind(&self) -> VehicleType;

    /// Local file backing this vehicle, if any.
    fn path(&self) -> Option<&Path> {
        None
    }

    /// Fetch current content for a refresh.
    async fn fetch(&self) -> Result<Fetched, RulesError>;

    /// Fetch content for the first load.
    ///
    /// `max_age` is the provider's refresh interval; vehicles with an
    /// on-disk cache may serve it when younger than that.
    async fn initial(&self, max_age: Duration) -> Result<Bytes, RulesError> {
        let _ = max_age;
        match self.fetch().await? {
            Fetched::Content(bytes) => Ok(bytes),
            Fetched::NotModified => Err(RulesError::Provider(
                "source reported no content on first load".into(),
            )),
        }
    }
}

/// Content carried in configuration.
#[derive(Debug, Clone)]
pub struct InlineVehicle {
    content: Bytes,
}

impl InlineVehicle {
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Inline payload given as a list of entries, stored as text lines.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        for entry in entries {
            text.push_str(entry.as_ref());
            text.push('\n');
        }
        Self::new(text)
    }
}

#[async_trait]
impl Vehicle for InlineVehicle {
    fn kind(&self) -> VehicleType {
        VehicleType::Inline
    }

    async fn fetch(&self) -> Result<Fetched, RulesError> {
        Ok(Fetched::Content(self.content.clone()))
    }
}

/// Modification time of a file, `None` when it does not exist.
pub(crate) async fn modified(path: &Path) -> Option<std::time::SystemTime> {
    tokio::fs::metadata(path).await.ok()?.modified().ok()
}
