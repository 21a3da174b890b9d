//! Rule providers: named, independently refreshed rule sources.
//!
//! A [`RuleProvider`] owns a fetch [`Vehicle`] and publishes the parsed
//! content as an immutable [`ProviderSnapshot`] behind an atomic pointer.
//! Matching only loads the pointer; a refresh parses into a new snapshot
//! and swaps it in, so in-flight matches keep the structure they started
//! with.
//!
//! Lifecycle: [`RuleProvider::initial`] performs the first blocking load,
//! [`RuleProvider::start`] spawns the periodic refresh task,
//! [`RuleProvider::stop`] / [`RuleProvider::close`] end it.

pub mod file;
#[cfg(feature = "http")]
pub mod http;
pub mod strategy;
pub mod vehicle;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use switchyard_core::{ERROR_FETCH, ERROR_PARSE, UPDATE_SKIPPED, UPDATE_UNCHANGED, UPDATE_UPDATED};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::RulesError;
use crate::metadata::Metadata;
use crate::parser::{ParseContext, PayloadFormat};

pub use file::FileVehicle;
#[cfg(feature = "http")]
pub use http::HttpVehicle;
pub use strategy::{Behavior, Classical, Strategy};
pub use vehicle::{Fetched, InlineVehicle, Vehicle, VehicleType};

/// Lifecycle state of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ProviderState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Refreshing = 3,
    /// The first load failed; the provider never became usable.
    Failed = 4,
}

impl ProviderState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Refreshing,
            4 => Self::Failed,
            _ => Self::Uninitialized,
        }
    }
}

/// One published version of a provider's content.
#[derive(Debug)]
pub struct ProviderSnapshot {
    pub strategy: Strategy,
    /// SHA-256 of the raw content the strategy was built from.
    pub digest: [u8; 32],
    pub updated_at: OffsetDateTime,
}

impl ProviderSnapshot {
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Result of a refresh attempt that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New content was parsed and published.
    Updated { rules: usize },
    /// The source reported, or hashed to, the current content.
    Unchanged,
    /// Another refresh of this provider was in flight.
    Skipped,
}

impl UpdateOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Updated { .. } => UPDATE_UPDATED,
            Self::Unchanged => UPDATE_UNCHANGED,
            Self::Skipped => UPDATE_SKIPPED,
        }
    }
}

/// Notification passed to an update hook after each refresh attempt.
#[derive(Debug, Clone, Copy)]
pub struct ProviderEvent<'a> {
    pub provider: &'a str,
    /// One of the update/error labels from `switchyard_core`.
    pub result: &'static str,
    pub rules: usize,
}

pub type UpdateHook = Arc<dyn Fn(ProviderEvent<'_>) + Send + Sync>;

/// Serializable summary for status output.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub name: String,
    pub behavior: Behavior,
    pub format: PayloadFormat,
    pub vehicle: VehicleType,
    pub rule_count: usize,
    /// Unix timestamp of the last published snapshot.
    pub updated_at: Option<i64>,
    pub interval_secs: u64,
    pub state: ProviderState,
}

/// A named rule source with hot-swappable content.
pub struct RuleProvider {
    name: String,
    behavior: Behavior,
    format: PayloadFormat,
    interval: Duration,
    vehicle: Arc<dyn Vehicle>,
    ctx: ParseContext,
    snapshot: ArcSwapOption<ProviderSnapshot>,
    state: AtomicU8,
    /// Held for the duration of one fetch, parse and swap.
    refresh_lock: tokio::sync::Mutex<()>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    on_update: RwLock<Option<UpdateHook>>,
    closed: AtomicBool,
}

impl RuleProvider {
    pub fn new(
        name: impl Into<String>,
        behavior: Behavior,
        format: PayloadFormat,
        interval: Duration,
        vehicle: Arc<dyn Vehicle>,
        ctx: ParseContext,
    ) -> Self {
        Self {
            name: name.into(),
            behavior,
            format,
            interval,
            vehicle,
            ctx,
            snapshot: ArcSwapOption::empty(),
            state: AtomicU8::new(ProviderState::Uninitialized as u8),
            refresh_lock: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
            on_update: RwLock::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn vehicle_type(&self) -> VehicleType {
        self.vehicle.kind()
    }

    pub fn state(&self) -> ProviderState {
        ProviderState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ProviderState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Install a hook called after every refresh attempt.
    pub fn set_update_hook(&self, hook: UpdateHook) {
        *self.on_update.write() = Some(hook);
    }

    fn notify(&self, result: &'static str, rules: usize) {
        let hook = self.on_update.read().clone();
        if let Some(hook) = hook {
            hook(ProviderEvent {
                provider: &self.name,
                result,
                rules,
            });
        }
    }

    /// The current snapshot; `None` before the first successful load.
    pub fn snapshot(&self) -> Option<Arc<ProviderSnapshot>> {
        self.snapshot.load_full()
    }

    /// Match against the current snapshot. No snapshot means no match.
    pub fn matches(&self, meta: &mut Metadata, src: bool) -> bool {
        let guard = self.snapshot.load();
        guard
            .as_ref()
            .is_some_and(|snapshot| snapshot.strategy.matches(meta, src))
    }

    pub fn count(&self) -> usize {
        self.snapshot
            .load()
            .as_ref()
            .map_or(0, |s| s.strategy.count())
    }

    pub fn should_resolve_ip(&self) -> bool {
        self.snapshot
            .load()
            .as_ref()
            .is_some_and(|s| s.strategy.should_resolve_ip())
    }

    pub fn should_find_process(&self) -> bool {
        self.snapshot
            .load()
            .as_ref()
            .is_some_and(|s| s.strategy.should_find_process())
    }

    pub fn updated_at(&self) -> Option<OffsetDateTime> {
        self.snapshot.load().as_ref().map(|s| s.updated_at)
    }

    pub fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.name.clone(),
            behavior: self.behavior,
            format: self.format,
            vehicle: self.vehicle.kind(),
            rule_count: self.count(),
            updated_at: self.updated_at().map(OffsetDateTime::unix_timestamp),
            interval_secs: self.interval.as_secs(),
            state: self.state(),
        }
    }

    /// First load. Failure leaves the provider in [`ProviderState::Failed`]
    /// and is a configuration error for the caller.
    pub async fn initial(&self) -> Result<usize, RulesError> {
        let _guard = self.refresh_lock.lock().await;
        self.set_state(ProviderState::Loading);
        let result = async {
            let content = self.vehicle.initial(self.interval).await?;
            self.publish(content).await
        }
        .await;
        match result {
            Ok(rules) => {
                self.set_state(ProviderState::Ready);
                info!(
                    provider = %self.name,
                    behavior = %self.behavior,
                    vehicle = %self.vehicle.kind(),
                    rules,
                    "rule provider loaded"
                );
                Ok(rules)
            }
            Err(e) => {
                self.set_state(ProviderState::Failed);
                Err(e)
            }
        }
    }

    /// Refresh once. Overlapping calls are skipped, not queued.
    ///
    /// On error the previous snapshot stays published.
    pub async fn update(&self) -> Result<UpdateOutcome, RulesError> {
        let Ok(_guard) = self.refresh_lock.try_lock() else {
            debug!(provider = %self.name, "refresh already in flight, skipping");
            self.notify(UPDATE_SKIPPED, self.count());
            return Ok(UpdateOutcome::Skipped);
        };
        if self.snapshot.load().is_none() {
            return Err(RulesError::Provider(format!(
                "provider '{}' has not been loaded",
                self.name
            )));
        }

        self.set_state(ProviderState::Refreshing);
        let result = self.refresh().await;
        self.set_state(ProviderState::Ready);

        match &result {
            Ok(outcome @ UpdateOutcome::Updated { rules }) => {
                info!(provider = %self.name, rules, "rule provider updated");
                self.notify(outcome.as_label(), *rules);
            }
            Ok(outcome) => {
                debug!(provider = %self.name, "rule provider unchanged");
                self.notify(outcome.as_label(), self.count());
            }
            Err(e) => {
                let label = if e.is_fetch() { ERROR_FETCH } else { ERROR_PARSE };
                self.notify(label, self.count());
            }
        }
        result
    }

    async fn refresh(&self) -> Result<UpdateOutcome, RulesError> {
        let content = match self.vehicle.fetch().await? {
            Fetched::NotModified => return Ok(UpdateOutcome::Unchanged),
            Fetched::Content(content) => content,
        };
        let digest: [u8; 32] = Sha256::digest(&content).into();
        if self
            .snapshot
            .load()
            .as_ref()
            .is_some_and(|s| s.digest == digest)
        {
            return Ok(UpdateOutcome::Unchanged);
        }
        let rules = self.publish(content).await?;
        Ok(UpdateOutcome::Updated { rules })
    }

    /// Parse `content` off the async workers and swap it in.
    async fn publish(&self, content: bytes::Bytes) -> Result<usize, RulesError> {
        let digest: [u8; 32] = Sha256::digest(&content).into();
        let behavior = self.behavior;
        let format = self.format;
        let ctx = self.ctx.clone();
        let strategy = tokio::task::spawn_blocking(move || {
            Strategy::build(behavior, format, &content, &ctx)
        })
        .await
        .map_err(|e| RulesError::Provider(format!("parse task failed: {e}")))??;

        let rules = strategy.count();
        self.snapshot.store(Some(Arc::new(ProviderSnapshot {
            strategy,
            digest,
            updated_at: OffsetDateTime::now_utc(),
        })));
        Ok(rules)
    }

    /// Spawn the periodic refresh task. A zero interval never refreshes.
    ///
    /// The task holds only a weak reference, so dropping the last
    /// `Arc<RuleProvider>` also ends it.
    pub fn start(self: &Arc<Self>) {
        if self.interval.is_zero() || self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refresh_loop(
            Arc::downgrade(self),
            self.interval,
            cancel.clone(),
        ));
        *task = Some((cancel, handle));
        debug!(provider = %self.name, interval_secs = self.interval.as_secs(), "provider refresh started");
    }

    /// Stop the refresh task; the current snapshot stays published.
    pub fn stop(&self) {
        if let Some((cancel, _handle)) = self.task.lock().take() {
            cancel.cancel();
            debug!(provider = %self.name, "provider refresh stopped");
        }
    }

    /// Stop refreshing for good and drop the update hook.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.stop();
        *self.on_update.write() = None;
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

async fn refresh_loop(provider: Weak<RuleProvider>, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; the initial load already ran.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(provider) = provider.upgrade() else {
            break;
        };
        if let Err(e) = provider.update().await {
            warn!(
                provider = %provider.name,
                error = %e,
                "rule provider refresh failed, keeping previous rules"
            );
        }
    }
}

impl Drop for RuleProvider {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.task.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for RuleProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleProvider")
            .field("name", &self.name)
            .field("behavior", &self.behavior)
            .field("format", &self.format)
            .field("vehicle", &self.vehicle.kind())
            .field("rules", &self.count())
            .field("state", &self.state())
            .finish()
    }
}
