//! One tracked job, wired end to end.
//!
//! `JobWatch` registers a job with the tracker, opens its sync subscription
//! and folds every forwarded event into the tracker. The first terminal
//! transition calls the handler; later duplicates never reach it.

use std::sync::Arc;

use lumen_core::{JobStatus, StatusEvent};
use serde::Serialize;
use tokio::sync::watch;

use crate::sync::{Subscription, SyncChannel};
use crate::tracker::{JobStatusTracker, StatusTransition};

/// How a job ended, as seen by the initiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed { output_url: Option<String> },
    Failed { error_message: Option<String> },
    Cancelled,
}

impl TerminalOutcome {
    fn from_event(status: JobStatus, event: &StatusEvent) -> Option<Self> {
        match status {
            JobStatus::Completed => Some(Self::Completed {
                output_url: event.output_url.clone(),
            }),
            JobStatus::Failed => Some(Self::Failed {
                error_message: event.error_message.clone(),
            }),
            JobStatus::Cancelled => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Initiator-side branch taken when the job ends.
pub trait TerminalHandler: Send + 'static {
    fn on_terminal(&mut self, job_id: &str, outcome: &TerminalOutcome);
}

impl<F> TerminalHandler for F
where
    F: FnMut(&str, &TerminalOutcome) + Send + 'static,
{
    fn on_terminal(&mut self, job_id: &str, outcome: &TerminalOutcome) {
        self(job_id, outcome)
    }
}

pub struct JobWatch {
    job_id: String,
    subscription: Subscription,
    outcome: watch::Receiver<Option<TerminalOutcome>>,
}

impl JobWatch {
    /// Register `job_id` and start synchronizing its status.
    pub fn start<H>(
        tracker: Arc<JobStatusTracker>,
        channel: &SyncChannel,
        job_id: impl Into<String>,
        tool_name: impl Into<String>,
        initial_status: JobStatus,
        mut handler: H,
    ) -> Self
    where
        H: TerminalHandler,
    {
        let job_id = job_id.into();
        tracker.register(job_id.clone(), tool_name, initial_status);

        let (outcome_tx, outcome) = watch::channel(None);
        let watched_id = job_id.clone();
        let subscription = channel.subscribe(job_id.clone(), move |event: StatusEvent| {
            let StatusTransition::Terminal { status, .. } = tracker.apply(&watched_id, &event)
            else {
                return;
            };
            if let Some(result) = TerminalOutcome::from_event(status, &event) {
                handler.on_terminal(&watched_id, &result);
                outcome_tx.send_replace(Some(result));
            }
        });

        Self {
            job_id,
            subscription,
            outcome,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// The terminal outcome, if one has been reached.
    pub fn outcome(&self) -> Option<TerminalOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait until the job ends. Returns `None` if the watch was torn down first.
    pub async fn wait_terminal(&mut self) -> Option<TerminalOutcome> {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }

    /// Stop synchronizing. The tracker keeps the last known state.
    pub fn stop(self) {
        self.subscription.unsubscribe();
    }
}
