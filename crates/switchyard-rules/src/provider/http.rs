//! HTTP vehicle with an on-disk cache.
//!
//! Fetched bodies are written atomically to the cache path. On the first
//! load a cache younger than the refresh interval is served without
//! touching the network; an older cache is used only when the fetch fails.
//! Refreshes send `If-None-Match` / `If-Modified-Since` and treat `304` as
//! unchanged.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{ETAG, HeaderMap, HeaderName, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, USER_AGENT};
use switchyard_core::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_HTTP_USER_AGENT};
use tracing::{debug, warn};

use crate::error::RulesError;
use crate::provider::vehicle::{Fetched, Vehicle, VehicleType, modified};

/// Validators from the last successful response.
#[derive(Debug, Default, Clone)]
struct Validators {
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

/// Fetches provider content from an HTTP(S) URL.
#[derive(Debug)]
pub struct HttpVehicle {
    url: String,
    cache_path: Option<PathBuf>,
    client: reqwest::Client,
    headers: HeaderMap,
    validators: Mutex<Validators>,
}

impl HttpVehicle {
    /// Create a vehicle for `url`, caching bodies at `cache_path`.
    pub fn new(url: impl Into<String>, cache_path: Option<PathBuf>) -> Result<Self, RulesError> {
        Self::with_options(
            url,
            cache_path,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            &[],
        )
    }

    /// Create a vehicle with a request timeout and extra request headers.
    pub fn with_options(
        url: impl Into<String>,
        cache_path: Option<PathBuf>,
        timeout: Duration,
        headers: &[(String, String)],
    ) -> Result<Self, RulesError> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RulesError::Http(format!("failed to build HTTP client: {e}")))?;

        let mut map = HeaderMap::new();
        map.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_HTTP_USER_AGENT));
        for (name, value) in headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| RulesError::Provider(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| RulesError::Provider(format!("invalid value for header {name}: {e}")))?;
            map.insert(name, value);
        }

        Ok(Self {
            url,
            cache_path,
            client,
            headers: map,
            validators: Mutex::new(Validators::default()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn fetch_error(&self, reason: impl Into<String>) -> RulesError {
        RulesError::Fetch {
            source_name: self.url.clone(),
            reason: reason.into(),
        }
    }

    async fn request(&self, conditional: bool) -> Result<Fetched, RulesError> {
        debug!(url = %self.url, conditional, "fetching remote rule provider");
        let mut request = self.client.get(&self.url).headers(self.headers.clone());
        if conditional {
            let validators = self.validators.lock().clone();
            if let Some(etag) = validators.etag {
                request = request.header(IF_NONE_MATCH, etag);
            }
            if let Some(since) = validators.last_modified {
                request = request.header(IF_MODIFIED_SINCE, since);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.fetch_error(format!("request failed: {e}")))?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url = %self.url, "remote rule provider not modified");
            return Ok(Fetched::NotModified);
        }
        if !status.is_success() {
            return Err(RulesError::Http(format!("HTTP {status} for {}", self.url)));
        }

        let validators = Validators {
            etag: response.headers().get(ETAG).cloned(),
            last_modified: response.headers().get(LAST_MODIFIED).cloned(),
        };
        let body = response
            .bytes()
            .await
            .map_err(|e| self.fetch_error(format!("failed to read response body: {e}")))?;
        *self.validators.lock() = validators;
        debug!(url = %self.url, bytes = body.len(), "fetched remote rule provider");

        if let Some(path) = &self.cache_path
            && let Err(e) = write_cache(path, &body).await
        {
            warn!(path = %path.display(), error = %e, "failed to write provider cache");
        }
        Ok(Fetched::Content(body))
    }

    async fn read_cache(&self) -> Option<Bytes> {
        let path = self.cache_path.as_ref()?;
        tokio::fs::read(path).await.ok().map(Bytes::from)
    }
}

#[async_trait]
impl Vehicle for HttpVehicle {
    fn kind(&self) -> VehicleType {
        VehicleType::Http
    }

    fn path(&self) -> Option<&Path> {
        self.cache_path.as_deref()
    }

    async fn fetch(&self) -> Result<Fetched, RulesError> {
        self.request(true).await
    }

    async fn initial(&self, max_age: Duration) -> Result<Bytes, RulesError> {
        if let Some(path) = &self.cache_path
            && let Some(mtime) = modified(path).await
            && is_fresh(mtime, max_age)
            && let Some(cached) = self.read_cache().await
        {
            debug!(url = %self.url, cache = %path.display(), "using fresh provider cache");
            return Ok(cached);
        }

        match self.request(false).await {
            Ok(Fetched::Content(body)) => Ok(body),
            Ok(Fetched::NotModified) => self
                .read_cache()
                .await
                .ok_or_else(|| self.fetch_error("304 without a cached copy")),
            Err(fetch_err) => match self.read_cache().await {
                Some(cached) => {
                    warn!(
                        url = %self.url,
                        error = %fetch_err,
                        "fetch failed, using stale provider cache"
                    );
                    Ok(cached)
                }
                None => Err(fetch_err),
            },
        }
    }
}

fn is_fresh(mtime: SystemTime, max_age: Duration) -> bool {
    !max_age.is_zero()
        && SystemTime::now()
            .duration_since(mtime)
            .is_ok_and(|age| age < max_age)
}

/// Write content to a cache file atomically (write-to-temp + rename).
///
/// On Windows the destination is removed first since `rename` fails when
/// the target already exists.
async fn write_cache(path: &Path, content: &[u8]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, content).await?;
    #[cfg(target_os = "windows")]
    {
        let _ = tokio::fs::remove_file(path).await;
    }
    tokio::fs::rename(&tmp_path, path).await
}
