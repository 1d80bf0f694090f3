//! Async HTTP client wrapping reqwest.
//!
//! Not a browser — just HTTP requests. Performs exactly one attempt per
//! call and classifies the outcome; retry policy belongs to the
//! scheduler's retry coordinator, not the transport.

use std::time::Duration;

use crate::scheduler::error::SchedulerError;

/// Response from a page fetch.
#[derive(Debug, Clone)]
pub struct PageResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers (selected subset).
    pub headers: Vec<(String, String)>,
    /// Response body as text.
    pub body: String,
}

/// HTTP client for page-fetch units of work.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    /// HTTP/1.1-only fallback client for sites that reject HTTP/2.
    h1_client: reqwest::Client,
}

impl HttpClient {
    /// Create a new HTTP client with standard Chrome user-agent.
    pub fn new(timeout_ms: u64) -> Self {
        let ua = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                  AppleWebKit/537.36 (KHTML, like Gecko) \
                  Chrome/131.0.0.0 Safari/537.36";

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .build()
            .unwrap_or_default();

        let h1_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(ua)
            .http1_only()
            .build()
            .unwrap_or_default();

        Self { client, h1_client }
    }

    /// Perform a single GET request.
    ///
    /// Falls back to HTTP/1.1 on protocol errors (some CDNs reject
    /// HTTP/2). Transport failures come back classified; the response is
    /// returned for every HTTP status, including errors — status policy
    /// is the caller's concern.
    pub async fn get(&self, url: &str) -> Result<PageResponse, SchedulerError> {
        match self.get_inner(&self.client, url).await {
            Ok(resp) => Ok(resp),
            Err(e) => {
                let err_str = format!("{e}");
                if err_str.contains("http2")
                    || err_str.contains("protocol")
                    || err_str.contains("connection closed")
                {
                    self.get_inner(&self.h1_client, url).await
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn get_inner(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<PageResponse, SchedulerError> {
        let resp = client
            .get(url)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();

        let headers: Vec<(String, String)> = resp
            .headers()
            .iter()
            .filter(|(k, _)| {
                matches!(
                    k.as_str(),
                    "content-type"
                        | "content-language"
                        | "last-modified"
                        | "cache-control"
                        | "retry-after"
                        | "x-robots-tag"
                )
            })
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body = resp.text().await.unwrap_or_default();

        Ok(PageResponse {
            url: url.to_string(),
            final_url,
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest transport error into the scheduler taxonomy.
fn classify_transport_error(err: reqwest::Error) -> SchedulerError {
    if err.is_builder() {
        return SchedulerError::TerminalValidation(err.to_string());
    }
    // Timeouts, refused connections, and mid-stream resets are all worth
    // another attempt.
    SchedulerError::TransientNetwork(err.to_string())
}

/// Map an HTTP status into the scheduler taxonomy. `Ok` for statuses a
/// scrape can use (including redirects already followed by the client).
pub fn classify_status(status: u16) -> Result<(), SchedulerError> {
    match status {
        200..=399 => Ok(()),
        429 => Err(SchedulerError::TransientNetwork(
            "rate limited by remote (429)".into(),
        )),
        500..=599 => Err(SchedulerError::TransientNetwork(format!(
            "server error ({status})"
        ))),
        _ => Err(SchedulerError::TerminalValidation(format!(
            "client error ({status})"
        ))),
    }
}
