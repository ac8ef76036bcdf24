//! Single-active-job status tracker.
//!
//! One `JobStatusTracker` is created at application start and shared as an
//! `Arc`. It holds at most one job; registering a new job supersedes the
//! previous one. Status only moves forward through the liveness order, and
//! the first terminal status fires the notification cue exactly once.

use chrono::{DateTime, Utc};
use lumen_core::{JobStatus, StatusEvent};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::notification::NotificationEffect;

/// The job currently being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedJob {
    pub job_id: String,
    pub tool_name: String,
    pub status: JobStatus,
    /// Set once the terminal cue has been fired for this job.
    pub has_notified: bool,
    pub output_url: Option<String>,
    pub error_message: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl TrackedJob {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Why a status update did not change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    NoActiveJob,
    UnknownStatus(String),
    /// Same or earlier position in the lifecycle, or the job is already terminal.
    NotForward {
        current: JobStatus,
        received: JobStatus,
    },
    /// The update belongs to a job that is no longer tracked.
    StaleJob { received: String },
}

/// Result of folding one status update into the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusTransition {
    Advanced { from: JobStatus, to: JobStatus },
    /// `notified` is true when this update fired the cue.
    Terminal { status: JobStatus, notified: bool },
    Ignored(IgnoreReason),
}

impl StatusTransition {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusTransition::Terminal { .. })
    }
}

/// Process-wide store for the tracked job.
///
/// Observers subscribe through [`JobStatusTracker::subscribe`]; every accepted
/// mutation is published to them.
pub struct JobStatusTracker {
    state: watch::Sender<Option<TrackedJob>>,
    notification: NotificationEffect,
}

impl JobStatusTracker {
    pub fn new(notification: NotificationEffect) -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            notification,
        }
    }

    /// Start tracking `job_id`, replacing whatever was tracked before.
    pub fn register(
        &self,
        job_id: impl Into<String>,
        tool_name: impl Into<String>,
        initial_status: JobStatus,
    ) {
        let job = TrackedJob {
            job_id: job_id.into(),
            tool_name: tool_name.into(),
            status: initial_status,
            has_notified: false,
            output_url: None,
            error_message: None,
            registered_at: Utc::now(),
        };
        info!(
            job_id = %job.job_id,
            tool = %job.tool_name,
            status = %job.status,
            "tracking job"
        );

        let previous = self.state.send_replace(Some(job));
        if let Some(previous) = previous {
            if previous.is_active() {
                debug!(job_id = %previous.job_id, "superseded active job");
            }
        }
    }

    /// Fold a raw status string into the tracked job.
    pub fn update_status(&self, status: &str) -> StatusTransition {
        self.fold(None, &StatusEvent::new(status))
    }

    /// Fold an event for `job_id`; events for any other job are ignored.
    pub fn apply(&self, job_id: &str, event: &StatusEvent) -> StatusTransition {
        self.fold(Some(job_id), event)
    }

    /// Drop the tracked job.
    pub fn clear(&self) {
        if let Some(job) = self.state.send_replace(None) {
            debug!(job_id = %job.job_id, "cleared tracked job");
        }
    }

    /// True while a job is tracked and not yet terminal.
    pub fn is_active(&self) -> bool {
        self.state.borrow().as_ref().is_some_and(TrackedJob::is_active)
    }

    pub fn current(&self) -> Option<TrackedJob> {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<TrackedJob>> {
        self.state.subscribe()
    }

    fn fold(&self, expected_id: Option<&str>, event: &StatusEvent) -> StatusTransition {
        let mut transition = StatusTransition::Ignored(IgnoreReason::NoActiveJob);

        // The check-and-set runs under the channel's lock, so two terminal
        // deliveries racing each other cannot both see `has_notified == false`.
        self.state.send_if_modified(|slot| {
            let Some(job) = slot.as_mut() else {
                return false;
            };

            if let Some(expected) = expected_id {
                if job.job_id != expected {
                    transition = StatusTransition::Ignored(IgnoreReason::StaleJob {
                        received: expected.to_string(),
                    });
                    return false;
                }
            }

            let Some(next) = event.job_status() else {
                transition =
                    StatusTransition::Ignored(IgnoreReason::UnknownStatus(event.status.clone()));
                return false;
            };

            if !job.status.can_advance_to(next) {
                transition = StatusTransition::Ignored(IgnoreReason::NotForward {
                    current: job.status,
                    received: next,
                });
                return false;
            }

            let from = job.status;
            job.status = next;
            if event.output_url.is_some() {
                job.output_url = event.output_url.clone();
            }
            if event.error_message.is_some() {
                job.error_message = event.error_message.clone();
            }

            transition = if next.is_terminal() {
                let notified = !job.has_notified;
                job.has_notified = true;
                StatusTransition::Terminal {
                    status: next,
                    notified,
                }
            } else {
                StatusTransition::Advanced { from, to: next }
            };
            true
        });

        match &transition {
            StatusTransition::Advanced { from, to } => {
                debug!(from = %from, to = %to, "job status advanced");
            }
            StatusTransition::Terminal { status, notified } => {
                info!(status = %status, "job reached terminal status");
                if *notified {
                    self.notification.fire();
                }
            }
            StatusTransition::Ignored(IgnoreReason::UnknownStatus(raw)) => {
                warn!(status = %raw, "ignoring unrecognized job status");
            }
            StatusTransition::Ignored(reason) => {
                debug!(?reason, "ignoring job status update");
            }
        }

        transition
    }
}

impl std::fmt::Debug for JobStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStatusTracker")
            .field("current", &*self.state.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{Notifier, NotifyError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl Notifier for CountingNotifier {
        fn play(&self) -> Result<(), NotifyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn tracker() -> (JobStatusTracker, Arc<CountingNotifier>) {
        let notifier = Arc::new(CountingNotifier::default());
        let tracker = JobStatusTracker::new(NotificationEffect::new(notifier.clone()));
        (tracker, notifier)
    }

    fn plays(notifier: &CountingNotifier) -> usize {
        notifier.0.load(Ordering::SeqCst)
    }

    #[test]
    fn empty_tracker_is_inactive() {
        let (tracker, _) = tracker();
        assert!(!tracker.is_active());
        assert!(tracker.current().is_none());
        assert_eq!(
            tracker.update_status("running"),
            StatusTransition::Ignored(IgnoreReason::NoActiveJob)
        );
    }

    #[test]
    fn upscaler_job_lifecycle() {
        let (tracker, notifier) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Pending);
        assert!(tracker.is_active());

        tracker.update_status("queued");
        assert!(tracker.is_active());
        tracker.update_status("running");
        assert!(tracker.is_active());
        assert_eq!(plays(&notifier), 0);

        let transition = tracker.apply(
            "j1",
            &StatusEvent::new("completed").with_output_url("https://x/y.jpg"),
        );
        assert_eq!(
            transition,
            StatusTransition::Terminal {
                status: JobStatus::Completed,
                notified: true
            }
        );
        assert!(!tracker.is_active());
        assert_eq!(plays(&notifier), 1);

        let job = tracker.current().unwrap();
        assert!(job.has_notified);
        assert_eq!(job.output_url.as_deref(), Some("https://x/y.jpg"));
    }

    #[test]
    fn duplicate_terminal_updates_notify_once() {
        let (tracker, notifier) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Running);

        assert!(tracker.update_status("completed").is_terminal());
        for raw in ["completed", "completed", "failed", "cancelled"] {
            assert!(matches!(
                tracker.update_status(raw),
                StatusTransition::Ignored(IgnoreReason::NotForward { .. })
            ));
        }

        assert_eq!(plays(&notifier), 1);
        assert_eq!(tracker.current().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn unknown_and_backward_statuses_are_ignored() {
        let (tracker, notifier) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Running);

        assert_eq!(
            tracker.update_status("succeeded"),
            StatusTransition::Ignored(IgnoreReason::UnknownStatus("succeeded".to_string()))
        );
        assert_eq!(
            tracker.update_status("queued"),
            StatusTransition::Ignored(IgnoreReason::NotForward {
                current: JobStatus::Running,
                received: JobStatus::Queued
            })
        );

        assert_eq!(tracker.current().unwrap().status, JobStatus::Running);
        assert_eq!(plays(&notifier), 0);
    }

    #[test]
    fn stale_job_updates_are_ignored() {
        let (tracker, notifier) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Running);
        tracker.register("j2", "restore", JobStatus::Pending);

        let transition = tracker.apply("j1", &StatusEvent::new("completed"));
        assert_eq!(
            transition,
            StatusTransition::Ignored(IgnoreReason::StaleJob {
                received: "j1".to_string()
            })
        );
        assert_eq!(tracker.current().unwrap().status, JobStatus::Pending);
        assert_eq!(plays(&notifier), 0);
    }

    #[test]
    fn register_supersedes_and_resets_notification_flag() {
        let (tracker, notifier) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Running);
        tracker.update_status("failed");
        assert!(tracker.current().unwrap().has_notified);

        tracker.register("j2", "upscaler", JobStatus::Pending);
        let job = tracker.current().unwrap();
        assert_eq!(job.job_id, "j2");
        assert!(!job.has_notified);
        assert!(tracker.is_active());

        tracker.update_status("cancelled");
        assert_eq!(plays(&notifier), 2);
    }

    #[test]
    fn clear_drops_the_job() {
        let (tracker, _) = tracker();
        tracker.register("j1", "upscaler", JobStatus::Queued);
        tracker.clear();

        assert!(!tracker.is_active());
        assert!(tracker.current().is_none());
    }

    #[tokio::test]
    async fn observers_see_accepted_updates_only() {
        let (tracker, _) = tracker();
        let mut rx = tracker.subscribe();

        tracker.register("j1", "upscaler", JobStatus::Pending);
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        tracker.update_status("bogus");
        assert!(!rx.has_changed().unwrap());

        tracker.update_status("starting");
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|job| job.status),
            Some(JobStatus::Starting)
        );
    }
}
