use std::sync::Arc;

use clap::Parser;
use lumen_core::{Config, JobStatus, NotificationSettings};
use lumen_jobs::{
    CommandNotifier, HttpPollSource, JobStatusTracker, JobWatch, NotificationEffect, SyncChannel,
    SyncOptions, TerminalBell, TerminalOutcome, WsPushSource,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Job identifier assigned by the job store
    job_id: String,

    /// Tool that created the job; records for other tools are ignored
    #[clap(long, value_name = "NAME")]
    tool: Option<String>,

    /// Status the job is known to be in right now
    #[clap(long, default_value = "pending")]
    status: String,
}

pub async fn run(config: &Config, args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = &config.settings;
    let initial: JobStatus = args.status.parse()?;
    if initial.is_terminal() {
        println!("{} is already {}", args.job_id, initial);
        return Ok(());
    }

    let api_key = config.api_key().map(str::to_string);
    let mut poll =
        HttpPollSource::new(&settings.sync.api_base_url, settings.sync.request_timeout())?
            .with_api_key(api_key.clone());
    if let Some(tool) = &args.tool {
        poll = poll.with_tool_type(tool.clone());
    }

    let mut options = SyncOptions::from(&settings.sync);
    options.tool_type = args.tool.clone();
    let mut channel = SyncChannel::new(options).with_poll(Arc::new(poll));
    if let Some(push_url) = config.push_url() {
        channel = channel.with_push(Arc::new(WsPushSource::new(push_url).with_api_key(api_key)));
    } else {
        info!("No push_url configured, polling only");
    }

    let tracker = Arc::new(JobStatusTracker::new(notification_effect(&settings.notification)));
    let mut states = tracker.subscribe();
    let printer = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let current = states.borrow_and_update().clone();
            if let Some(job) = current {
                println!("{} [{}] {}", job.job_id, job.tool_name, job.status);
            }
        }
    });

    let tool_name = args.tool.clone().unwrap_or_else(|| "job".to_string());
    let mut job = JobWatch::start(
        tracker.clone(),
        &channel,
        args.job_id.clone(),
        tool_name,
        initial,
        |job_id: &str, outcome: &TerminalOutcome| {
            info!(job_id, ?outcome, "Job reached a terminal status");
        },
    );

    let outcome = tokio::select! {
        outcome = job.wait_terminal() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!(job_id = %args.job_id, "Interrupted before the job finished");
            None
        }
    };

    job.stop();
    printer.abort();

    if let Some(outcome) = outcome {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

fn notification_effect(settings: &NotificationSettings) -> NotificationEffect {
    if !settings.enabled {
        return NotificationEffect::silent();
    }

    match settings.command.as_deref() {
        Some(command) => match CommandNotifier::new(command) {
            Ok(notifier) => NotificationEffect::new(Arc::new(notifier)),
            Err(e) => {
                warn!("Ignoring notification command: {}", e);
                NotificationEffect::new(Arc::new(TerminalBell))
            }
        },
        None => NotificationEffect::new(Arc::new(TerminalBell)),
    }
}
