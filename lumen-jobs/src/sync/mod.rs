//! Dual-source job status synchronization.
//!
//! A push source (realtime channel keyed by job id) and a poll source
//! (fixed-interval point reads) are merged into one callback stream. The
//! two sources are not ordered relative to each other; the only guarantee
//! is dedup-by-last-value: a status identical to the last forwarded one is
//! swallowed, anything else is forwarded.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{Stream, StreamExt};
use lumen_core::{JobRecord, StatusEvent};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, trace, warn};

pub mod poll;
pub mod push;

pub use poll::HttpPollSource;
pub use push::WsPushSource;

pub type RecordStream = Pin<Box<dyn Stream<Item = JobRecord> + Send>>;

type StatusCallback = Box<dyn FnMut(StatusEvent) + Send>;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("url cannot carry path segments: {0}")]
    NotABase(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected HTTP status {0}")]
    UnexpectedStatus(u16),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Realtime change notifications for one job.
#[async_trait::async_trait]
pub trait PushSource: Send + Sync {
    /// Open a subscription; dropping the stream must close it.
    async fn connect(&self, job_id: &str) -> Result<RecordStream, SyncError>;
}

/// Point-in-time read of one job.
#[async_trait::async_trait]
pub trait PollSource: Send + Sync {
    async fn fetch(&self, job_id: &str) -> Result<JobRecord, SyncError>;
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub poll_interval: Duration,
    pub poll_enabled: bool,
    /// Upper bound on one poll request; an elapsed request waits for the next tick.
    pub request_timeout: Duration,
    /// Drop records whose tool type is set and differs from this one.
    pub tool_type: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            poll_enabled: true,
            request_timeout: Duration::from_millis(2500),
            tool_type: None,
        }
    }
}

impl From<&lumen_core::SyncSettings> for SyncOptions {
    fn from(settings: &lumen_core::SyncSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            poll_enabled: settings.poll_enabled,
            request_timeout: settings.request_timeout(),
            tool_type: None,
        }
    }
}

/// Factory for per-job subscriptions over a fixed pair of sources.
#[derive(Clone)]
pub struct SyncChannel {
    push: Option<Arc<dyn PushSource>>,
    poll: Option<Arc<dyn PollSource>>,
    options: SyncOptions,
}

impl SyncChannel {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            push: None,
            poll: None,
            options,
        }
    }

    pub fn with_push(mut self, source: Arc<dyn PushSource>) -> Self {
        self.push = Some(source);
        self
    }

    pub fn with_poll(mut self, source: Arc<dyn PollSource>) -> Self {
        self.poll = Some(source);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Start delivering status events for `job_id` to `on_status`.
    ///
    /// Must be called inside a tokio runtime. The callback must not
    /// unsubscribe its own subscription.
    pub fn subscribe<F>(&self, job_id: impl Into<String>, on_status: F) -> Subscription
    where
        F: FnMut(StatusEvent) + Send + 'static,
    {
        let job_id = job_id.into();
        let callback: Arc<Mutex<Option<StatusCallback>>> =
            Arc::new(Mutex::new(Some(Box::new(on_status))));

        let worker = SyncWorker {
            job_id: job_id.clone(),
            push: self.push.clone(),
            poll: self.poll.clone(),
            options: self.options.clone(),
            callback: Arc::clone(&callback),
            last_forwarded: None,
        };
        let task = tokio::spawn(worker.run());

        info!(job_id = %job_id, "status sync subscribed");
        Subscription {
            job_id,
            callback,
            task: Some(task),
        }
    }
}

/// Handle for one job's status stream. Dropping it unsubscribes.
pub struct Subscription {
    job_id: String,
    callback: Arc<Mutex<Option<StatusCallback>>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Tear down push listener and poll timer. No callback runs after this returns.
    pub fn unsubscribe(mut self) {
        self.shutdown();
    }

    /// Whether both sources are done (terminal seen and push closed, or torn down).
    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    fn shutdown(&mut self) {
        // Waits for an in-flight callback to return before clearing it.
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(job_id = %self.job_id, "status sync unsubscribed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct SyncWorker {
    job_id: String,
    push: Option<Arc<dyn PushSource>>,
    poll: Option<Arc<dyn PollSource>>,
    options: SyncOptions,
    callback: Arc<Mutex<Option<StatusCallback>>>,
    last_forwarded: Option<String>,
}

/// Aborts the wrapped task when dropped, so forwarding tasks die with the worker.
struct AbortOnDrop(Option<JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

impl SyncWorker {
    async fn run(mut self) {
        let (push_tx, mut push_rx) = mpsc::channel::<JobRecord>(16);
        let mut push_open = self.push.is_some();
        let _push_task = AbortOnDrop(
            self.push
                .clone()
                .map(|source| tokio::spawn(forward_push(source, self.job_id.clone(), push_tx))),
        );

        // Polling runs in its own task so a slow request never holds up push.
        let (poll_tx, mut poll_rx) = mpsc::channel::<JobRecord>(16);
        let mut poll_task = AbortOnDrop(
            self.poll
                .clone()
                .filter(|_| self.options.poll_enabled)
                .map(|source| {
                    tokio::spawn(forward_poll(
                        source,
                        self.job_id.clone(),
                        self.options.clone(),
                        poll_tx,
                    ))
                }),
        );
        let mut polling = poll_task.0.is_some();

        while push_open || polling {
            tokio::select! {
                received = push_rx.recv(), if push_open => match received {
                    Some(record) => self.deliver(record, "push"),
                    None => {
                        push_open = false;
                        if polling {
                            info!(job_id = %self.job_id, "push channel gone, continuing with polling");
                        }
                    }
                },
                received = poll_rx.recv(), if polling => match received {
                    Some(record) => self.deliver(record, "poll"),
                    None => polling = false,
                },
            }

            if polling && self.terminal_seen() {
                polling = false;
                poll_task = AbortOnDrop(None);
                debug!(job_id = %self.job_id, "terminal status seen, polling stopped");
            }
        }

        drop(poll_task);
        debug!(job_id = %self.job_id, "status sync sources exhausted");
    }

    fn terminal_seen(&self) -> bool {
        self.last_forwarded
            .as_deref()
            .and_then(lumen_core::JobStatus::parse)
            .is_some_and(lumen_core::JobStatus::is_terminal)
    }

    fn deliver(&mut self, record: JobRecord, source: &'static str) {
        if record.id != self.job_id {
            trace!(job_id = %self.job_id, other = %record.id, source, "dropping record for another job");
            return;
        }

        if let (Some(wanted), Some(actual)) = (&self.options.tool_type, &record.tool_type) {
            if wanted != actual {
                trace!(job_id = %self.job_id, tool = %actual, source, "dropping record for another tool");
                return;
            }
        }

        let event = StatusEvent::from(record);
        let key = event.status.trim().to_ascii_lowercase();
        if self.last_forwarded.as_deref() == Some(key.as_str()) {
            trace!(job_id = %self.job_id, status = %event.status, source, "duplicate status swallowed");
            return;
        }
        self.last_forwarded = Some(key);

        debug!(job_id = %self.job_id, status = %event.status, source, "forwarding status");
        let mut callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(on_status) = callback.as_mut() {
            on_status(event);
        }
    }
}

async fn forward_poll(
    source: Arc<dyn PollSource>,
    job_id: String,
    options: SyncOptions,
    tx: mpsc::Sender<JobRecord>,
) {
    let period = options.poll_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match tokio::time::timeout(options.request_timeout, source.fetch(&job_id)).await {
            Ok(Ok(record)) => {
                if tx.send(record).await.is_err() {
                    return;
                }
            }
            Ok(Err(err)) => warn!(job_id = %job_id, "status poll failed: {err}"),
            Err(_) => warn!(
                job_id = %job_id,
                timeout_ms = options.request_timeout.as_millis() as u64,
                "status poll timed out"
            ),
        }
    }
}

async fn forward_push(source: Arc<dyn PushSource>, job_id: String, tx: mpsc::Sender<JobRecord>) {
    let mut stream = match source.connect(&job_id).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(job_id = %job_id, "push channel unavailable: {err}");
            return;
        }
    };

    while let Some(record) = stream.next().await {
        if tx.send(record).await.is_err() {
            return;
        }
    }
    debug!(job_id = %job_id, "push stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedSender;

    /// Push source backed by an unbounded channel the test feeds.
    struct ChannelPush {
        rx: Mutex<Option<mpsc::UnboundedReceiver<JobRecord>>>,
    }

    impl ChannelPush {
        fn new() -> (Arc<Self>, UnboundedSender<JobRecord>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    rx: Mutex::new(Some(rx)),
                }),
                tx,
            )
        }
    }

    #[async_trait::async_trait]
    impl PushSource for ChannelPush {
        async fn connect(&self, _job_id: &str) -> Result<RecordStream, SyncError> {
            let mut rx = self.rx.lock().unwrap().take().expect("connected twice");
            Ok(Box::pin(async_stream::stream! {
                while let Some(record) = rx.recv().await {
                    yield record;
                }
            }))
        }
    }

    struct FailingPush;

    #[async_trait::async_trait]
    impl PushSource for FailingPush {
        async fn connect(&self, _job_id: &str) -> Result<RecordStream, SyncError> {
            Err(SyncError::UnexpectedStatus(503))
        }
    }

    /// Poll source replaying a script; the last entry repeats.
    struct ScriptedPoll {
        script: Mutex<VecDeque<JobRecord>>,
        calls: AtomicUsize,
    }

    impl ScriptedPoll {
        fn new(statuses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    statuses
                        .iter()
                        .map(|status| JobRecord::new("j1", *status))
                        .collect(),
                ),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PollSource for ScriptedPoll {
        async fn fetch(&self, _job_id: &str) -> Result<JobRecord, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let record = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            record.ok_or(SyncError::UnexpectedStatus(404))
        }
    }

    /// Poll source whose requests never complete.
    #[derive(Default)]
    struct HangingPoll {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl PollSource for HangingPoll {
        async fn fetch(&self, _job_id: &str) -> Result<JobRecord, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn options(poll_ms: u64) -> SyncOptions {
        SyncOptions {
            poll_interval: Duration::from_millis(poll_ms),
            ..SyncOptions::default()
        }
    }

    fn collector() -> (
        Arc<Mutex<Vec<String>>>,
        impl FnMut(StatusEvent) + Send + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |event: StatusEvent| {
            sink.lock().unwrap().push(event.status)
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_then_push_duplicate_is_forwarded_once() {
        let (push, push_tx) = ChannelPush::new();
        let poll = ScriptedPoll::new(&["running"]);
        let channel = SyncChannel::new(options(400))
            .with_push(push)
            .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(450)).await;
        settle().await;
        push_tx.send(JobRecord::new("j1", "running")).unwrap();
        settle().await;

        assert_eq!(poll.calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["running".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_push_preempts_the_next_poll() {
        let (push, push_tx) = ChannelPush::new();
        let poll = ScriptedPoll::new(&["completed"]);
        let channel = SyncChannel::new(options(400))
            .with_push(push)
            .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        push_tx.send(JobRecord::new("j1", "completed")).unwrap();
        settle().await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(poll.calls(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["completed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_stops_after_terminal() {
        let poll = ScriptedPoll::new(&["queued", "running", "failed"]);
        let channel = SyncChannel::new(options(1000)).with_poll(poll.clone());

        let (seen, on_status) = collector();
        let sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        settle().await;

        assert_eq!(poll.calls(), 3);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["queued".to_string(), "running".to_string(), "failed".to_string()]
        );
        assert!(sub.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_poll_results_are_deduplicated() {
        let poll = ScriptedPoll::new(&["running", "running", "Running", "completed"]);
        let channel = SyncChannel::new(options(100)).with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["running".to_string(), "completed".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_polling_never_fetches() {
        let (push, push_tx) = ChannelPush::new();
        let poll = ScriptedPoll::new(&["running"]);
        let channel = SyncChannel::new(SyncOptions {
            poll_enabled: false,
            ..options(100)
        })
        .with_push(push)
        .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        push_tx.send(JobRecord::new("j1", "queued")).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;

        assert_eq!(poll.calls(), 0);
        assert_eq!(*seen.lock().unwrap(), vec!["queued".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_push_degrades_to_polling() {
        let poll = ScriptedPoll::new(&["running"]);
        let channel = SyncChannel::new(options(500))
            .with_push(Arc::new(FailingPush))
            .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["running".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_stops_both_sources() {
        let (push, push_tx) = ChannelPush::new();
        let poll = ScriptedPoll::new(&["queued", "running"]);
        let channel = SyncChannel::new(options(100))
            .with_push(push)
            .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(poll.calls(), 1);

        sub.unsubscribe();
        settle().await;

        let _ = push_tx.send(JobRecord::new("j1", "completed"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(poll.calls(), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["queued".to_string()]);
        assert!(push_tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn records_for_other_tools_or_jobs_are_dropped() {
        let (push, push_tx) = ChannelPush::new();
        let channel = SyncChannel::new(SyncOptions {
            poll_enabled: false,
            tool_type: Some("upscaler".to_string()),
            ..options(100)
        })
        .with_push(push);

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        push_tx
            .send(JobRecord::new("j1", "running").with_tool_type("colorize"))
            .unwrap();
        push_tx
            .send(JobRecord::new("j9", "running").with_tool_type("upscaler"))
            .unwrap();
        push_tx
            .send(JobRecord::new("j1", "running").with_tool_type("upscaler"))
            .unwrap();
        push_tx.send(JobRecord::new("j1", "completed")).unwrap();
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["running".to_string(), "completed".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_poll_does_not_hold_up_push() {
        let (push, push_tx) = ChannelPush::new();
        let poll = Arc::new(HangingPoll::default());
        let channel = SyncChannel::new(SyncOptions {
            request_timeout: Duration::from_secs(60),
            ..options(100)
        })
        .with_push(push)
        .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let _sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(poll.calls.load(Ordering::SeqCst), 1);

        push_tx.send(JobRecord::new("j1", "completed")).unwrap();
        settle().await;

        assert_eq!(*seen.lock().unwrap(), vec!["completed".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_poll_retries_on_the_next_tick() {
        let poll = Arc::new(HangingPoll::default());
        let channel = SyncChannel::new(SyncOptions {
            request_timeout: Duration::from_millis(500),
            ..options(1000)
        })
        .with_poll(poll.clone());

        let (seen, on_status) = collector();
        let sub = channel.subscribe("j1", on_status);

        tokio::time::sleep(Duration::from_millis(3200)).await;
        settle().await;

        assert_eq!(poll.calls.load(Ordering::SeqCst), 3);
        assert!(seen.lock().unwrap().is_empty());
        assert!(!sub.is_finished());
    }
}
