//! Asynchronous bulk jobs for OpenAI-compatible providers

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::core::client::{first_choice_content, post_json, read_json, OpenAiClient};
use crate::core::errors::{Result, TranslationError};
use crate::core::models::ChatMessage;

/// Completion window requested for every job
pub const COMPLETION_WINDOW: &str = "24h";

/// Endpoint each request line targets
const BATCH_ENDPOINT: &str = "/v1/chat/completions";

/// One chat completion inside a bulk job
#[derive(Debug, Clone, Serialize)]
pub struct BatchRequest {
    pub custom_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Lifecycle state of a bulk job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Validating,
    InProgress,
    Finalizing,
    Completed,
    Failed,
    Expired,
    Cancelling,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    /// No further transitions will happen
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Expired | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Validating => "validating",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Finalizing => "finalizing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Cancelling => "cancelling",
            BatchStatus::Cancelled => "cancelled",
            BatchStatus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RequestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub completed: u64,
    #[serde(default)]
    pub failed: u64,
}

/// Remote bulk job handle
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub output_file_id: Option<String>,
    #[serde(default)]
    pub error_file_id: Option<String>,
    #[serde(default)]
    pub request_counts: Option<RequestCounts>,
}

/// One line of a job's output file
#[derive(Debug, Clone, Deserialize)]
pub struct BatchResult {
    pub custom_id: String,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BatchResult {
    /// Model output of this request.
    ///
    /// OpenAI nests the completion under `response.body`; some compatible
    /// providers put `choices` directly under `response`.
    pub fn content(&self) -> Result<&str> {
        let response = self.response.as_ref().ok_or_else(|| {
            TranslationError::format(format!(
                "Request {} has no response: {}",
                self.custom_id,
                self.error.as_ref().map(Value::to_string).unwrap_or_default()
            ))
        })?;

        match response.get("body") {
            Some(body) if body.is_object() => first_choice_content(body),
            _ => first_choice_content(response),
        }
    }
}

impl OpenAiClient {
    pub(crate) async fn submit_batch(&self, requests: &[BatchRequest], description: &str) -> Option<BatchJob> {
        match self.try_submit_batch(requests, description).await {
            Ok(job) => {
                info!("Created batch job {} with {} requests", job.id, requests.len());
                Some(job)
            }
            Err(e) => {
                warn!("Failed to create batch job: {}", e);
                None
            }
        }
    }

    async fn try_submit_batch(&self, requests: &[BatchRequest], description: &str) -> Result<BatchJob> {
        if requests.is_empty() {
            return Err(TranslationError::config("Batch job needs at least one request"));
        }

        // Dropping the temp file removes it, whichever way this returns
        let file = self.write_request_file(requests)?;
        let file_id = self.upload_file(file.path()).await?;
        debug!("Uploaded batch input as {}", file_id);

        let body = json!({
            "input_file_id": file_id,
            "endpoint": BATCH_ENDPOINT,
            "completion_window": COMPLETION_WINDOW,
            "metadata": {"description": description},
        });
        let value = post_json(&self.http, &self.endpoint("batches"), &self.config.api_key, &body).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn write_request_file(&self, requests: &[BatchRequest]) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("sfx-batch-")
            .suffix(".jsonl")
            .tempfile_in(&self.scratch_dir)?;

        for request in requests {
            let line = json!({
                "custom_id": request.custom_id,
                "method": "POST",
                "url": BATCH_ENDPOINT,
                "body": self.request_body(&request.messages),
            });
            serde_json::to_writer(&mut file, &line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;

        Ok(file)
    }

    async fn upload_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "batch.jsonl".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/jsonl")?;
        let form = reqwest::multipart::Form::new().text("purpose", "batch").part("file", part);

        let response = self
            .http
            .post(self.endpoint("files"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranslationError::TransportError {
                message: e.to_string(),
            })?;

        let value = read_json(response).await?;
        value["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TranslationError::format(format!("Upload response has no file id: {}", value)))
    }

    pub(crate) async fn poll_status(&self, job_id: &str) -> Result<BatchJob> {
        let response = self
            .http
            .get(self.endpoint(&format!("batches/{}", job_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| TranslationError::TransportError {
                message: e.to_string(),
            })?;

        Ok(serde_json::from_value(read_json(response).await?)?)
    }

    pub(crate) async fn fetch_results(&self, job: &BatchJob) -> Option<Vec<BatchResult>> {
        match self.try_fetch_results(job).await {
            Ok(results) => Some(results),
            Err(e) => {
                warn!("Failed to fetch results of batch job {}: {}", job.id, e);
                None
            }
        }
    }

    async fn try_fetch_results(&self, job: &BatchJob) -> Result<Vec<BatchResult>> {
        let file_id = job
            .output_file_id
            .as_deref()
            .ok_or_else(|| TranslationError::format(format!("Batch job {} has no output file", job.id)))?;

        let response = self
            .http
            .get(self.endpoint(&format!("files/{}/content", file_id)))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| TranslationError::TransportError {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(TranslationError::ApiError {
                status: status.as_u16(),
                message: text,
            });
        }

        Ok(parse_result_lines(&text))
    }
}

/// Parse an NDJSON output file, skipping lines that do not decode
pub fn parse_result_lines(text: &str) -> Vec<BatchResult> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<BatchResult>(line) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!("Skipping undecodable result line ({}): {}", e, line);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::client::{ClientBackend, TranslationClient};
    use crate::core::config::RetryPolicy;
    use crate::core::registry::{ClientKind, ProviderConfig};

    fn batch_client(url: &str) -> TranslationClient {
        let mut config = ProviderConfig::new("gateway", url, "qwen-plus", ClientKind::OpenAi);
        config.api_key = "sk-batch".into();
        config.batch_api = Some(true);
        TranslationClient::new(config, RetryPolicy::immediate()).unwrap()
    }

    fn requests() -> Vec<BatchRequest> {
        vec![BatchRequest {
            custom_id: "request-0".into(),
            messages: vec![ChatMessage::user("hi")],
        }]
    }

    #[test]
    fn test_status_terminal_states() {
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
        assert!(BatchStatus::Expired.is_terminal());
        assert!(!BatchStatus::InProgress.is_terminal());
        assert!(!BatchStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let job: BatchJob = serde_json::from_str(r#"{"id": "b1", "status": "queued_somewhere"}"#).unwrap();
        assert_eq!(job.status, BatchStatus::Unknown);
    }

    #[test]
    fn test_result_content_shapes() {
        let lines = concat!(
            r#"{"custom_id": "request-0", "response": {"status_code": 200, "body": {"choices": [{"message": {"content": "{\"a\": \"x\"}"}}]}}}"#,
            "\n",
            r#"{"custom_id": "request-1", "response": {"choices": [{"message": {"content": "{\"b\": \"y\"}"}}]}}"#,
            "\n\nnot json\n",
            r#"{"custom_id": "request-2", "error": {"message": "boom"}}"#,
        );

        let results = parse_result_lines(lines);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].content().unwrap(), r#"{"a": "x"}"#);
        assert_eq!(results[1].content().unwrap(), r#"{"b": "y"}"#);
        assert!(results[2].content().is_err());
    }

    #[tokio::test]
    async fn test_submit_uploads_then_creates_job() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/files")
            .match_header("authorization", "Bearer sk-batch")
            .match_body(mockito::Matcher::Regex("request-0".into()))
            .with_status(200)
            .with_body(r#"{"id": "file-123", "object": "file"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/batches")
            .match_body(mockito::Matcher::PartialJson(json!({
                "input_file_id": "file-123",
                "completion_window": "24h"
            })))
            .with_status(200)
            .with_body(r#"{"id": "batch-9", "status": "validating"}"#)
            .create_async()
            .await;

        let job = batch_client(&server.url()).submit_batch(&requests(), "test").await.unwrap();

        assert_eq!(job.id, "batch-9");
        assert_eq!(job.status, BatchStatus::Validating);
        upload.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn test_submit_failure_returns_none() {
        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/files")
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        assert!(batch_client(&server.url()).submit_batch(&requests(), "test").await.is_none());
    }

    fn scratch_client(url: &str, scratch: &Path) -> OpenAiClient {
        match batch_client(url).backend() {
            ClientBackend::OpenAi(c) => OpenAiClient {
                scratch_dir: scratch.to_path_buf(),
                ..c.clone()
            },
            ClientBackend::RawHttp(_) => panic!("expected an OpenAI-compatible backend"),
        }
    }

    fn leftover_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_request_file_removed_after_failed_upload() {
        let scratch = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/files")
            .with_status(500)
            .with_body("upstream down")
            .create_async()
            .await;

        let client = scratch_client(&server.url(), scratch.path());
        assert!(client.submit_batch(&requests(), "test").await.is_none());

        upload.assert_async().await;
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_request_file_removed_after_successful_submit() {
        let scratch = tempfile::tempdir().unwrap();
        let mut server = mockito::Server::new_async().await;
        let _upload = server
            .mock("POST", "/files")
            .with_status(200)
            .with_body(r#"{"id": "file-1"}"#)
            .create_async()
            .await;
        let _create = server
            .mock("POST", "/batches")
            .with_status(200)
            .with_body(r#"{"id": "batch-1", "status": "validating"}"#)
            .create_async()
            .await;

        let client = scratch_client(&server.url(), scratch.path());
        assert!(client.submit_batch(&requests(), "test").await.is_some());

        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[test]
    fn test_request_file_lives_in_scratch_dir() {
        let scratch = tempfile::tempdir().unwrap();
        let client = scratch_client("http://127.0.0.1:9", scratch.path());

        let file = client.write_request_file(&requests()).unwrap();
        assert!(file.path().starts_with(scratch.path()));
        let line = std::fs::read_to_string(file.path()).unwrap();
        assert!(line.contains("\"custom_id\":\"request-0\""));

        drop(file);
        assert_eq!(leftover_files(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_poll_and_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _status = server
            .mock("GET", "/batches/batch-9")
            .with_status(200)
            .with_body(r#"{"id": "batch-9", "status": "completed", "output_file_id": "file-out"}"#)
            .create_async()
            .await;
        let _content = server
            .mock("GET", "/files/file-out/content")
            .with_status(200)
            .with_body(concat!(
                r#"{"custom_id": "request-0", "response": {"body": {"choices": [{"message": {"content": "{}"}}]}}}"#,
                "\n"
            ))
            .create_async()
            .await;

        let client = batch_client(&server.url());
        let job = client.poll_status("batch-9").await.unwrap();
        assert_eq!(job.status, BatchStatus::Completed);

        let results = client.fetch_results(&job).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].custom_id, "request-0");
    }

    #[tokio::test]
    async fn test_fetch_without_output_file() {
        let client = batch_client("http://127.0.0.1:9");
        let job = BatchJob {
            id: "b".into(),
            status: BatchStatus::Completed,
            output_file_id: None,
            error_file_id: None,
            request_counts: None,
        };
        assert!(client.fetch_results(&job).await.is_none());
    }
}
