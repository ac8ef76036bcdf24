//! Per-resource tiered loader.
//!
//! One task per mounted source walks the tiers sequentially. All state
//! publication happens under a single lock that also carries the current
//! generation, so a result computed for a superseded source never reaches
//! observers and any object it allocated is revoked on the spot.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lumen_core::{LoaderSettings, Locale, TextKey};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RecompressError, RecompressTierError};
use crate::objects::{ObjectRef, ObjectStore};
use crate::policy::{RetryPolicy, Tier};
use crate::resource::{Recompressor, ResourceFetcher, ResourceSink, ResourceSource};

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub allow_recompression: bool,
    pub max_dimension: u32,
    pub show_download_on_fail: bool,
    pub locale: Locale,
}

impl LoaderOptions {
    pub fn from_settings(settings: &LoaderSettings, locale: Locale) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            attempt_timeout: settings.attempt_timeout(),
            allow_recompression: settings.allow_recompression,
            max_dimension: settings.max_dimension,
            show_download_on_fail: settings.show_download_on_fail,
            locale,
        }
    }
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self::from_settings(&LoaderSettings::default(), Locale::default())
    }
}

/// What the user sees once every tier has failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fallback {
    /// Link to the original, never to a degraded copy.
    Download { href: String, label: String },
    Placeholder { label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Loading,
    Loaded,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub current_source: ResourceSource,
    pub terminal_state: TerminalState,
}

/// Observable loader state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoaderView {
    Loading {
        attempt: u32,
        tier: Tier,
        source: ResourceSource,
    },
    Loaded {
        attempt: u32,
        tier: Tier,
        source: ResourceSource,
    },
    Exhausted {
        attempt: u32,
        source: ResourceSource,
        fallback: Fallback,
    },
}

impl LoaderView {
    pub fn terminal_state(&self) -> TerminalState {
        match self {
            LoaderView::Loading { .. } => TerminalState::Loading,
            LoaderView::Loaded { .. } => TerminalState::Loaded,
            LoaderView::Exhausted { .. } => TerminalState::Exhausted,
        }
    }

    pub fn attempt_number(&self) -> u32 {
        match self {
            LoaderView::Loading { attempt, .. }
            | LoaderView::Loaded { attempt, .. }
            | LoaderView::Exhausted { attempt, .. } => *attempt,
        }
    }

    pub fn current_source(&self) -> &ResourceSource {
        match self {
            LoaderView::Loading { source, .. }
            | LoaderView::Loaded { source, .. }
            | LoaderView::Exhausted { source, .. } => source,
        }
    }

    pub fn retry_attempt(&self) -> RetryAttempt {
        RetryAttempt {
            attempt_number: self.attempt_number(),
            current_source: self.current_source().clone(),
            terminal_state: self.terminal_state(),
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, LoaderView::Loading { .. })
    }

    fn initial(uri: &str) -> Self {
        LoaderView::Loading {
            attempt: 1,
            tier: Tier::Direct,
            source: ResourceSource::Remote(uri.to_string()),
        }
    }
}

/// Injected collaborators, shared by every mounted handle.
#[derive(Clone)]
pub struct LoaderDeps {
    pub sink: Arc<dyn ResourceSink>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub recompressor: Arc<dyn Recompressor>,
    pub objects: ObjectStore,
}

#[derive(Clone)]
pub struct ResilientLoader {
    deps: LoaderDeps,
}

impl ResilientLoader {
    pub fn new(deps: LoaderDeps) -> Self {
        Self { deps }
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.deps.objects
    }

    /// Start loading `source`. Tier 1 begins immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(&self, source: impl Into<String>, options: LoaderOptions) -> LoaderHandle {
        let source = source.into();
        let (view_tx, view_rx) = watch::channel(LoaderView::initial(&source));
        let engine = Arc::new(Engine {
            deps: self.deps.clone(),
            options,
        });
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                generation: 0,
                source: source.clone(),
                held: None,
            }),
            view_tx,
            objects: self.deps.objects.clone(),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            engine
                .clone()
                .run(shared.clone(), 0, source, cancel.clone()),
        );

        LoaderHandle {
            engine,
            shared,
            view_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// A mounted resource. Dropping it cancels in-flight work and revokes any
/// held object reference.
pub struct LoaderHandle {
    engine: Arc<Engine>,
    shared: Arc<Shared>,
    view_rx: watch::Receiver<LoaderView>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LoaderHandle {
    pub fn view(&self) -> LoaderView {
        self.view_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoaderView> {
        self.view_rx.clone()
    }

    pub fn source(&self) -> String {
        self.shared.lock().source.clone()
    }

    /// Wait until the current source is loaded or exhausted.
    pub async fn wait_settled(&mut self) -> LoaderView {
        let settled = self
            .view_rx
            .wait_for(LoaderView::is_settled)
            .await
            .map(|view| view.clone());
        // The sender lives in `shared`, so the channel cannot close under us.
        settled.unwrap_or_else(|_| self.view())
    }

    /// Switch to a different source, restarting from attempt 1. The same
    /// URI is a no-op.
    pub fn set_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        let generation = {
            let mut inner = self.shared.lock();
            if inner.source == source {
                return;
            }
            inner.generation += 1;
            inner.source = source.clone();
            if let Some(held) = inner.held.take() {
                self.shared.objects.revoke(&held);
            }
            self.shared.view_tx.send_replace(LoaderView::initial(&source));
            inner.generation
        };
        debug!(source = %source, generation, "Loader source changed");

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.cancel = CancellationToken::new();
        self.task = Some(tokio::spawn(self.engine.clone().run(
            self.shared.clone(),
            generation,
            source,
            self.cancel.clone(),
        )));
    }

    /// Tear down; equivalent to dropping the handle.
    pub fn unmount(self) {}
}

impl Drop for LoaderHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut inner = self.shared.lock();
        inner.generation += 1;
        if let Some(held) = inner.held.take() {
            self.shared.objects.revoke(&held);
        }
    }
}

struct Inner {
    generation: u64,
    source: String,
    held: Option<ObjectRef>,
}

struct Shared {
    inner: Mutex<Inner>,
    view_tx: watch::Sender<LoaderView>,
    objects: ObjectStore,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish `view` if `generation` is still current.
    fn publish(&self, generation: u64, view: LoaderView) -> bool {
        let inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        self.view_tx.send_replace(view);
        true
    }

    /// Take ownership of `object`, revoking the previously held one. A stale
    /// generation revokes `object` instead.
    fn install(&self, generation: u64, object: ObjectRef) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            self.objects.revoke(&object);
            return false;
        }
        if let Some(previous) = inner.held.replace(object) {
            self.objects.revoke(&previous);
        }
        true
    }
}

struct Engine {
    deps: LoaderDeps,
    options: LoaderOptions,
}

impl Engine {
    async fn run(
        self: Arc<Self>,
        shared: Arc<Shared>,
        generation: u64,
        original: String,
        cancel: CancellationToken,
    ) {
        let policy = RetryPolicy::new(self.options.max_attempts, self.options.allow_recompression);
        let mut attempt = 1;
        let mut tier = policy.tier_for(attempt);

        loop {
            let source = match tier {
                Tier::Direct => ResourceSource::Remote(original.clone()),
                Tier::CacheBusted => ResourceSource::Remote(cache_busted(&original)),
                Tier::Recompressed => {
                    let pending = LoaderView::Loading {
                        attempt,
                        tier,
                        source: ResourceSource::Remote(original.clone()),
                    };
                    if !shared.publish(generation, pending) {
                        return;
                    }

                    let recompressed = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!(source = %original, "Recompression fetch aborted");
                            return;
                        }
                        result = tokio::time::timeout(
                            self.options.attempt_timeout,
                            self.recompressed(&original),
                        ) => result.unwrap_or(Err(RecompressTierError::TimedOut(
                            self.options.attempt_timeout,
                        ))),
                    };
                    match recompressed {
                        Ok(bytes) => {
                            let object = self.deps.objects.create(bytes);
                            if !shared.install(generation, object.clone()) {
                                return;
                            }
                            ResourceSource::Local(object)
                        }
                        Err(e) => {
                            warn!(source = %original, "Recompression failed: {}", e);
                            shared.publish(generation, self.exhausted(&original, attempt));
                            return;
                        }
                    }
                }
            };

            let loading = LoaderView::Loading {
                attempt,
                tier,
                source: source.clone(),
            };
            if !shared.publish(generation, loading) {
                return;
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = tokio::time::timeout(
                    self.options.attempt_timeout,
                    self.deps.sink.load(&source),
                ) => outcome,
            };
            match outcome {
                Ok(Ok(())) => {
                    info!(source = %original, attempt, tier = tier.number(), "Resource loaded");
                    shared.publish(
                        generation,
                        LoaderView::Loaded {
                            attempt,
                            tier,
                            source,
                        },
                    );
                    return;
                }
                Ok(Err(e)) => {
                    debug!(source = %original, attempt, tier = tier.number(), "Load attempt failed: {}", e);
                }
                Err(_) => {
                    debug!(source = %original, attempt, tier = tier.number(), "Load attempt timed out");
                }
            }

            let decision = policy.next_tier(attempt);
            if !decision.should_retry {
                warn!(source = %original, attempts = attempt, "Resource exhausted all tiers");
                shared.publish(generation, self.exhausted(&original, attempt));
                return;
            }
            attempt += 1;
            tier = decision.tier;
        }
    }

    async fn recompressed(&self, url: &str) -> Result<Vec<u8>, RecompressTierError> {
        let bytes = self.deps.fetcher.fetch(url).await?;
        let recompressor = self.deps.recompressor.clone();
        let max_dimension = self.options.max_dimension;
        let output = tokio::task::spawn_blocking(move || {
            recompressor.recompress(&bytes, max_dimension)
        })
        .await
        .map_err(|e| RecompressError::Task(e.to_string()))??;
        Ok(output)
    }

    fn exhausted(&self, original: &str, attempt: u32) -> LoaderView {
        let locale = self.options.locale;
        let fallback = if self.options.show_download_on_fail {
            Fallback::Download {
                href: original.to_string(),
                label: locale.text(TextKey::DownloadOriginal).to_string(),
            }
        } else {
            Fallback::Placeholder {
                label: locale.text(TextKey::PreviewUnavailable).to_string(),
            }
        };
        LoaderView::Exhausted {
            attempt,
            source: ResourceSource::Remote(original.to_string()),
            fallback,
        }
    }
}

static LAST_CACHE_BUST: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing millisecond stamp, even within one millisecond.
fn cache_bust_stamp() -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    let mut last = LAST_CACHE_BUST.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_CACHE_BUST.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn cache_busted(uri: &str) -> String {
    let stamp = cache_bust_stamp().to_string();
    match url::Url::parse(uri) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("_t", &stamp);
            url.to_string()
        }
        Err(_) => {
            let separator = if uri.contains('?') { '&' } else { '?' };
            format!("{uri}{separator}_t={stamp}")
        }
    }
}
