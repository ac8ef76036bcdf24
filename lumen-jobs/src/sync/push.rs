use futures::StreamExt;
use lumen_core::JobRecord;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use super::{PushSource, RecordStream, SyncError};

/// Realtime job changes over a WebSocket.
///
/// Connects to `<url>?job_id=<id>` and yields one record per text frame.
/// Frames may carry a bare record or a change envelope (`{"record": ...}` or
/// `{"new": ...}`); anything else (heartbeats, acks) is skipped.
#[derive(Debug, Clone)]
pub struct WsPushSource {
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PushPayload {
    Envelope {
        #[serde(alias = "new")]
        record: JobRecord,
    },
    Bare(JobRecord),
}

impl WsPushSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub(crate) fn subscribe_url(&self, job_id: &str) -> Result<Url, SyncError> {
        let mut url = Url::parse(&self.url)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("job_id", job_id);
            if let Some(api_key) = &self.api_key {
                query.append_pair("apikey", api_key);
            }
        }
        Ok(url)
    }
}

pub(crate) fn parse_push_payload(text: &str) -> Option<JobRecord> {
    match serde_json::from_str::<PushPayload>(text) {
        Ok(PushPayload::Envelope { record }) | Ok(PushPayload::Bare(record)) => Some(record),
        Err(e) => {
            debug!("skipping non-record push frame: {}", e);
            None
        }
    }
}

#[async_trait::async_trait]
impl PushSource for WsPushSource {
    async fn connect(&self, job_id: &str) -> Result<RecordStream, SyncError> {
        let url = self.subscribe_url(job_id)?;

        info!("Connecting to push channel for job {}", job_id);
        let (mut ws_stream, _) = connect_async(url.as_str()).await?;
        info!("Push channel established for job {}", job_id);

        let job_id = job_id.to_string();
        let stream = async_stream::stream! {
            while let Some(msg) = ws_stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(record) = parse_push_payload(text.as_str()) {
                            yield record;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("Push channel for job {} closed by server", job_id);
                        break;
                    }
                    Err(e) => {
                        warn!("Push channel error for job {}: {}", job_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
