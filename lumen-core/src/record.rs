//! Job record read model and the normalized event shape both sync sources emit.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// A job row as the external store exposes it.
///
/// `status` stays a raw string: validation happens where the status is
/// consumed, so a malformed value can be logged and ignored instead of
/// failing deserialization of the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl JobRecord {
    pub fn new(id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: status.into(),
            tool_type: None,
            output_url: None,
            error_message: None,
            updated_at: None,
        }
    }

    pub fn with_tool_type(mut self, tool_type: impl Into<String>) -> Self {
        self.tool_type = Some(tool_type.into());
        self
    }

    pub fn with_output_url(mut self, url: impl Into<String>) -> Self {
        self.output_url = Some(url.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Status update as delivered to channel subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusEvent {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            output_url: None,
            error_message: None,
        }
    }

    pub fn with_output_url(mut self, url: impl Into<String>) -> Self {
        self.output_url = Some(url.into());
        self
    }

    pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    /// The validated status, or `None` when the raw value is unrecognized.
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.job_status().is_some_and(JobStatus::is_terminal)
    }
}

impl From<&JobRecord> for StatusEvent {
    fn from(record: &JobRecord) -> Self {
        Self {
            status: record.status.clone(),
            output_url: record.output_url.clone(),
            error_message: record.error_message.clone(),
        }
    }
}

impl From<JobRecord> for StatusEvent {
    fn from(record: JobRecord) -> Self {
        Self {
            status: record.status,
            output_url: record.output_url,
            error_message: record.error_message,
        }
    }
}
