use std::time::Duration;

use tracing::debug;

use crate::error::PipelineError;

/// Browser-like user agent; the weather-data endpoint rejects obvious bots.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0";

/// Outcome of a fetch that the pipeline can survive losing.
///
/// Station-listing and region-polygon requests are essential and go through
/// [`HttpClient::get_essential`], which turns any failure into an error.
/// Per-station rainfall requests are not, and `Unavailable` carries the
/// reason so the caller can log it and move on.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Vec<u8>),
    Unavailable(String),
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn send(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: Option<&str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, agent);
        }
        request.send().await
    }

    /// GET a payload the run cannot proceed without. Transport failures and
    /// non-success statuses are fatal.
    pub async fn get_essential(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<u8>, PipelineError> {
        let response = self.send(url, query, None).await?;
        debug!(url, status = %response.status(), "essential fetch response");
        let response = response.error_for_status()?;
        let bytes = response.bytes().await?;
        debug!(url, bytes = bytes.len(), "essential fetch complete");
        Ok(bytes.to_vec())
    }

    /// GET a payload the run can proceed without. Every failure mode maps to
    /// a tagged `Unavailable` outcome rather than an error.
    pub async fn get_optional(
        &self,
        url: &str,
        query: &[(&str, &str)],
        user_agent: Option<&str>,
    ) -> FetchOutcome {
        match self.send(url, query, user_agent).await {
            Ok(response) => {
                let status = response.status();
                debug!(url, status = %status, "optional fetch response");
                if !status.is_success() {
                    return FetchOutcome::Unavailable(format!("HTTP status {status}"));
                }
                match response.bytes().await {
                    Ok(bytes) => FetchOutcome::Success(bytes.to_vec()),
                    Err(e) => FetchOutcome::Unavailable(format!("body read failed: {e}")),
                }
            }
            Err(e) => FetchOutcome::Unavailable(e.to_string()),
        }
    }
}
