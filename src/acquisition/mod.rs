//! Page acquisition: the HTTP unit of work the scheduler drives.
//!
//! The scheduler sees an opaque [`Task`]; this module supplies the one
//! Trawl actually runs — fetch a page, classify the outcome. Rendering
//! and field extraction are downstream collaborators.

pub mod http_client;

use async_trait::async_trait;
use url::Url;

use crate::scheduler::error::SchedulerError;
use crate::scheduler::task::Task;
use self::http_client::{classify_status, HttpClient, PageResponse};

/// Fetch one URL as a schedulable unit of work.
///
/// URL validation happens at execution, so a malformed URL settles as a
/// terminal task failure instead of aborting its batch.
pub struct PageFetchTask {
    client: HttpClient,
    url: String,
    max_retries: Option<u32>,
}

impl PageFetchTask {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            max_retries: None,
        }
    }

    /// Override the scheduler-wide retry limit for this URL.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    fn validate_url(&self) -> Result<(), SchedulerError> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| SchedulerError::TerminalValidation(format!("invalid URL: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => Ok(()),
            other => Err(SchedulerError::TerminalValidation(format!(
                "unsupported scheme: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Task for PageFetchTask {
    type Output = PageResponse;

    fn id(&self) -> String {
        self.url.clone()
    }

    fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    async fn execute(&self) -> Result<PageResponse, SchedulerError> {
        self.validate_url()?;
        let response = self.client.get(&self.url).await?;
        classify_status(response.status)?;
        Ok(response)
    }
}
