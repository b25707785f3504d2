//! Daemon HTTP Client

use anyhow::{bail, Context, Result};
use reqwest::{Response, StatusCode};
use runwright_common::{
    ErrorResponse, MessageResponse, Report, RunStatus, SubmitRequest, SubmitResponse,
};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Report fetch outcome
#[derive(Debug)]
pub enum ReportFetch {
    Ready(Report),
    StillRunning,
}

/// Client for communicating with the Runwright daemon
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Check if the daemon is healthy
    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self.send(self.http.get(self.url("/api/health"))).await?;
        decode(resp).await
    }

    pub async fn submit(&self, url: &str, agents: Option<Vec<String>>) -> Result<SubmitResponse> {
        let body = SubmitRequest {
            url: url.to_string(),
            agents,
        };
        let resp = self
            .send(self.http.post(self.url("/api/run-tests")).json(&body))
            .await?;
        decode(resp).await
    }

    pub async fn status(&self, run_id: &str) -> Result<RunStatus> {
        let resp = self
            .send(self.http.get(self.url(&format!("/api/test-status/{}", run_id))))
            .await?;
        decode(resp).await
    }

    pub async fn report(&self, run_id: &str) -> Result<ReportFetch> {
        let resp = self
            .send(self.http.get(self.url(&format!("/api/test-results/{}", run_id))))
            .await?;
        if resp.status() == StatusCode::ACCEPTED {
            return Ok(ReportFetch::StillRunning);
        }
        decode(resp).await.map(ReportFetch::Ready)
    }

    pub async fn cancel(&self, run_id: &str) -> Result<MessageResponse> {
        let resp = self
            .send(self.http.post(self.url(&format!("/api/cancel-test/{}", run_id))))
            .await?;
        decode(resp).await
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Response> {
        req.send()
            .await
            .with_context(|| format!("cannot reach daemon at {}", self.base))
    }
}

/// Decode a success body, or turn the daemon's `{"error": ...}` into an error.
async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .json::<T>()
            .await
            .context("unexpected response from daemon");
    }

    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => bail!("{} ({})", err.error, status),
        Err(_) if text.is_empty() => bail!("daemon returned {}", status),
        Err(_) => bail!("daemon returned {}: {}", status, text),
    }
}
