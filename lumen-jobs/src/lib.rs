//! Remote job tracking.
//!
//! - **tracker**: the single-active-job state machine
//! - **notification**: the once-per-job audible cue
//! - **sync**: push + poll status synchronization with dedup
//! - **watch**: wiring of the three for one job, with a terminal handler

pub mod notification;
pub mod sync;
pub mod tracker;
pub mod watch;

pub use notification::{
    CommandNotifier, NotificationEffect, Notifier, NotifyError, SilentNotifier, TerminalBell,
};
pub use sync::{
    HttpPollSource, PollSource, PushSource, RecordStream, Subscription, SyncChannel, SyncError,
    SyncOptions, WsPushSource,
};
pub use tracker::{IgnoreReason, JobStatusTracker, StatusTransition, TrackedJob};
pub use watch::{JobWatch, TerminalHandler, TerminalOutcome};
