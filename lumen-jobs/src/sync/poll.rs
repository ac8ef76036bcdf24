use std::time::Duration;

use lumen_core::JobRecord;
use url::Url;

use super::{PollSource, SyncError};

/// Reads `GET <base>/jobs/<id>` from the job store HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPollSource {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
    tool_type: Option<String>,
}

impl HttpPollSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::NotABase(base_url.to_string()));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: None,
            tool_type: None,
        })
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Restrict reads to records of one tool type.
    pub fn with_tool_type(mut self, tool_type: impl Into<String>) -> Self {
        self.tool_type = Some(tool_type.into());
        self
    }

    pub(crate) fn job_url(&self, job_id: &str) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::NotABase(self.base_url.to_string()))?
            .pop_if_empty()
            .push("jobs")
            .push(job_id);
        if let Some(tool_type) = &self.tool_type {
            url.query_pairs_mut().append_pair("tool_type", tool_type);
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl PollSource for HttpPollSource {
    async fn fetch(&self, job_id: &str) -> Result<JobRecord, SyncError> {
        let url = self.job_url(job_id)?;

        let mut request = self.client.get(url);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::UnexpectedStatus(status.as_u16()));
        }

        Ok(response.json::<JobRecord>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_appends_segments() {
        let source =
            HttpPollSource::new("https://jobs.example.com/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            source.job_url("j1").unwrap().as_str(),
            "https://jobs.example.com/api/jobs/j1"
        );
    }

    #[test]
    fn job_url_escapes_ids_and_adds_tool_filter() {
        let source = HttpPollSource::new("http://127.0.0.1:54321", Duration::from_secs(5))
            .unwrap()
            .with_tool_type("upscaler");
        assert_eq!(
            source.job_url("a/b c").unwrap().as_str(),
            "http://127.0.0.1:54321/jobs/a%2Fb%20c?tool_type=upscaler"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            HttpPollSource::new("mailto:ops@example.com", Duration::from_secs(5)),
            Err(SyncError::NotABase(_))
        ));
        assert!(matches!(
            HttpPollSource::new("not a url", Duration::from_secs(5)),
            Err(SyncError::InvalidUrl(_))
        ));
    }
}
