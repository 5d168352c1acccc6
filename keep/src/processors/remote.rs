use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use crate::config::RemoteConfig;
use crate::error::{KeepError, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_BASE_SECS: f64 = 1.0;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const POLL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize)]
struct SubmitRequest<'a> {
    task_type: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a serde_json::Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ProcessorsResponse {
    #[serde(default)]
    processors: Vec<ProcessorEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProcessorEntry {
    task_type: String,
}

/// Outcome of `TaskClient::poll`.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub status: PollStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub task_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    NotFound,
    Unknown,
}

impl PollStatus {
    fn parse(s: &str) -> Self {
        match s {
            "queued" => PollStatus::Queued,
            "processing" => PollStatus::Processing,
            "completed" => PollStatus::Completed,
            "failed" => PollStatus::Failed,
            "not_found" => PollStatus::NotFound,
            _ => PollStatus::Unknown,
        }
    }
}

/// HTTP client for the keepnotes.ai task-delegation API (original_source
/// `task_client.py`). Enforces HTTPS except for localhost so bearer tokens
/// never cross the wire in cleartext.
pub struct TaskClient {
    client: Client,
    base_url: Url,
    available: OnceCell<bool>,
}

impl TaskClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let api_url = config.api_url.trim_end_matches('/');
        let url = Url::parse(api_url)?;

        if url.scheme() != "https" {
            let host = url.host_str().unwrap_or("");
            if !matches!(host, "localhost" | "127.0.0.1" | "::1") {
                return Err(KeepError::invalid(format!(
                    "task API URL must use HTTPS (got {api_url}); use HTTPS or localhost for local development"
                )));
            }
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {}", config.api_key)
                .parse()
                .map_err(|_| KeepError::invalid("API key contains invalid header characters"))?,
        );
        if let Some(project) = &config.project {
            headers.insert(
                "X-Project",
                project
                    .parse()
                    .map_err(|_| KeepError::invalid("project name contains invalid header characters"))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: url,
            available: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    pub async fn discover_processors(&self) -> Vec<String> {
        match self.discover_processors_inner().await {
            Ok(types) => types,
            Err(error) => {
                tracing::warn!(%error, "failed to discover remote processors");
                Vec::new()
            }
        }
    }

    async fn discover_processors_inner(&self) -> Result<Vec<String>> {
        let url = self.url("/v1/processors")?;
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let data: ProcessorsResponse = resp.json().await?;
        Ok(data.processors.into_iter().map(|p| p.task_type).collect())
    }

    /// Submit a task for remote processing. Retries transient (5xx,
    /// timeout, connect) failures with exponential backoff; 4xx other than
    /// 429 is not retried.
    pub async fn submit(
        &self,
        task_type: &str,
        content: &str,
        metadata: Option<&serde_json::Map<String, Value>>,
    ) -> Result<String> {
        let url = self.url("/v1/tasks")?;
        let payload = SubmitRequest {
            task_type,
            content,
            metadata,
        };

        let mut last_error: Option<KeepError> = None;

        for attempt in 0..MAX_RETRIES {
            let response = self.client.post(url.clone()).json(&payload).send().await;

            match response {
                Ok(resp) if resp.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(5.0)
                        .min(60.0);
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                    continue;
                }
                Ok(resp) if resp.status().is_client_error() => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(KeepError::RemoteRejected(format!(
                        "task submission rejected: {status} {body}"
                    )));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    last_error = Some(KeepError::ProviderTransient(format!(
                        "task submission failed with {}",
                        resp.status()
                    )));
                }
                Ok(resp) => {
                    let data: SubmitResponse = resp.json().await?;
                    return Ok(data.task_id);
                }
                Err(error) => {
                    last_error = Some(KeepError::from(error));
                }
            }

            if attempt + 1 < MAX_RETRIES {
                let delay = RETRY_BACKOFF_BASE_SECS * 2f64.powi(attempt as i32);
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            KeepError::ProviderTransient(format!("task submission failed after {MAX_RETRIES} attempts"))
        }))
    }

    /// Poll task status. A 404 maps to `PollStatus::NotFound` rather than
    /// an error — the task may simply have already been acknowledged.
    pub async fn poll(&self, task_id: &str) -> Result<PollResult> {
        let url = self.url(&format!("/v1/tasks/{task_id}"))?;
        let resp = self
            .client
            .get(url)
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(PollResult {
                status: PollStatus::NotFound,
                result: None,
                error: Some("task not found".to_string()),
                task_type: None,
            });
        }

        let resp = resp.error_for_status()?;
        let data: Value = resp.json().await?;
        Ok(PollResult {
            status: PollStatus::parse(data.get("status").and_then(Value::as_str).unwrap_or("unknown")),
            result: data.get("result").cloned(),
            error: data
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
            task_type: data
                .get("task_type")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Acknowledge (delete) a completed task. A 404 is treated as success —
    /// the server may have already reaped it via retention.
    pub async fn acknowledge(&self, task_id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/tasks/{task_id}"))?;
        match self.client.delete(url).send().await {
            Ok(resp) if resp.status() == StatusCode::NOT_FOUND => Ok(()),
            Ok(resp) => {
                resp.error_for_status()?;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(task_id, %error, "failed to acknowledge remote task");
                Ok(())
            }
        }
    }

    /// True if the service is reachable and has at least one processor
    /// registered. Cached after the first check.
    pub async fn available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async { !self.discover_processors().await.is_empty() })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> RemoteConfig {
        RemoteConfig {
            api_url: url.to_string(),
            api_key: "secret".to_string(),
            project: None,
        }
    }

    #[test]
    fn rejects_non_https_non_localhost() {
        assert!(TaskClient::new(&config("http://example.com")).is_err());
    }

    #[test]
    fn allows_localhost_over_http() {
        assert!(TaskClient::new(&config("http://localhost:8080")).is_ok());
    }

    #[test]
    fn allows_https() {
        assert!(TaskClient::new(&config("https://api.keepnotes.ai")).is_ok());
    }
}
