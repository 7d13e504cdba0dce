//! Translation clients with retry logic

use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::core::batch_job::{BatchJob, BatchRequest, BatchResult};
use crate::core::config::RetryPolicy;
use crate::core::errors::{Result, TranslationError};
use crate::core::models::ChatMessage;
use crate::core::protocol::{extract_json_object, parse_object_strict};
use crate::core::registry::{ClientKind, ProviderConfig};

/// Hosts known to expose the OpenAI batch job API
const BATCH_CAPABLE_HOSTS: &[&str] = &["dashscope.aliyuncs.com", "api.openai.com"];

/// Translation client for one provider and model
#[derive(Debug, Clone)]
pub struct TranslationClient {
    backend: ClientBackend,
    retry: RetryPolicy,
}

/// Concrete protocol spoken with the provider
#[derive(Debug, Clone)]
pub enum ClientBackend {
    /// OpenAI-compatible chat completions in JSON mode
    OpenAi(OpenAiClient),
    /// Raw chat completion POST with defensive output parsing
    RawHttp(RawHttpClient),
}

impl TranslationClient {
    /// Create a client, picking the backend from the configured client type
    pub fn new(config: ProviderConfig, retry: RetryPolicy) -> Result<Self> {
        if config.api_url.is_empty() {
            return Err(TranslationError::config(format!("Provider {} has no api_url", config.id)));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .build()?;

        let backend = match config.client_type {
            ClientKind::OpenAi => ClientBackend::OpenAi(OpenAiClient {
                http,
                config,
                scratch_dir: std::env::temp_dir(),
            }),
            ClientKind::RawHttp => ClientBackend::RawHttp(RawHttpClient { http, config }),
        };

        Ok(Self { backend, retry })
    }

    pub fn config(&self) -> &ProviderConfig {
        match &self.backend {
            ClientBackend::OpenAi(c) => &c.config,
            ClientBackend::RawHttp(c) => &c.config,
        }
    }

    pub fn backend(&self) -> &ClientBackend {
        &self.backend
    }

    /// Display name of the provider
    pub fn name(&self) -> &str {
        &self.config().name
    }

    pub fn model(&self) -> &str {
        &self.config().model
    }

    /// Send one chat completion and return the JSON object the model produced.
    ///
    /// Failed attempts are retried up to `max_retries` times in total with a
    /// linearly growing pause; the last error is carried by
    /// [`TranslationError::TranslationFailure`].
    pub async fn call(&self, messages: &[ChatMessage], max_retries: u32) -> Result<Map<String, Value>> {
        let attempts = max_retries.max(1);
        let mut made = 0;
        let mut last_error = None;

        for attempt in 0..attempts {
            made = attempt + 1;
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, self.name());
            }

            match self.complete(messages).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!("{} succeeded after {} retries", self.name(), attempt);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!("{} attempt {}/{} failed: {}", self.name(), made, attempts, e);
                    let retryable = e.is_retryable();
                    last_error = Some(e);

                    if !retryable {
                        break;
                    }
                    if made < attempts {
                        sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }

        Err(TranslationError::TranslationFailure {
            attempts: made,
            last_error: Box::new(
                last_error.unwrap_or_else(|| TranslationError::config("no attempt was made")),
            ),
        })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Map<String, Value>> {
        match &self.backend {
            ClientBackend::OpenAi(c) => c.complete(messages).await,
            ClientBackend::RawHttp(c) => c.complete(messages).await,
        }
    }

    /// Whether the provider accepts asynchronous bulk jobs
    pub fn supports_batch(&self) -> bool {
        match &self.backend {
            ClientBackend::OpenAi(c) => c.supports_batch(),
            ClientBackend::RawHttp(_) => false,
        }
    }

    /// Upload requests and start a bulk job; `None` on any failure
    pub async fn submit_batch(&self, requests: &[BatchRequest], description: &str) -> Option<BatchJob> {
        match &self.backend {
            ClientBackend::OpenAi(c) if c.supports_batch() => c.submit_batch(requests, description).await,
            _ => {
                warn!("{} does not support the batch API", self.name());
                None
            }
        }
    }

    pub async fn poll_status(&self, job_id: &str) -> Result<BatchJob> {
        match &self.backend {
            ClientBackend::OpenAi(c) if c.supports_batch() => c.poll_status(job_id).await,
            _ => Err(TranslationError::BatchUnsupported {
                provider: self.name().to_string(),
            }),
        }
    }

    /// Download the results of a completed job; `None` on any failure
    pub async fn fetch_results(&self, job: &BatchJob) -> Option<Vec<BatchResult>> {
        match &self.backend {
            ClientBackend::OpenAi(c) if c.supports_batch() => c.fetch_results(job).await,
            _ => None,
        }
    }
}

/// OpenAI-compatible chat completion client
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) config: ProviderConfig,
    /// Where batch request files are written before upload
    pub(crate) scratch_dir: PathBuf,
}

impl OpenAiClient {
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn supports_batch(&self) -> bool {
        self.config.batch_api.unwrap_or_else(|| {
            BATCH_CAPABLE_HOSTS
                .iter()
                .any(|host| self.config.api_url.contains(host))
        })
    }

    /// Request body shared by sync calls and batch request lines
    pub(crate) fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "messages": messages,
            "response_format": {"type": "json_object"},
        })
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Map<String, Value>> {
        let body = self.request_body(messages);
        let response = post_json(&self.http, &self.endpoint("chat/completions"), &self.config.api_key, &body).await?;
        parse_object_strict(first_choice_content(&response)?)
    }
}

/// Client for providers reached with a plain POST to the full endpoint URL
#[derive(Debug, Clone)]
pub struct RawHttpClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl RawHttpClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Map<String, Value>> {
        let body = json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
        });

        let response = post_json(&self.http, &self.config.api_url, &self.config.api_key, &body).await?;
        extract_json_object(first_choice_content(&response)?)
    }
}

/// POST a JSON body and decode the JSON reply
pub(crate) async fn post_json(http: &reqwest::Client, url: &str, api_key: &str, body: &Value) -> Result<Value> {
    debug!("POST {}", url);
    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(|e| TranslationError::TransportError {
            message: e.to_string(),
        })?;

    read_json(response).await
}

/// Decode a response, turning non-success statuses into API errors
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await.map_err(|e| TranslationError::TransportError {
        message: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(TranslationError::ApiError {
            status: status.as_u16(),
            message: text,
        });
    }

    serde_json::from_str(&text)
        .map_err(|e| TranslationError::format(format!("Response is not JSON ({}): {}", e, text)))
}

/// `choices[0].message.content` of a chat completion
pub(crate) fn first_choice_content(response: &Value) -> Result<&str> {
    response["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .ok_or_else(|| TranslationError::format(format!("No message content in response: {}", response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ChatMessage;

    fn completion(content: &str) -> String {
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
            "usage": {"total_tokens": 10}
        })
        .to_string()
    }

    fn client(url: &str, kind: ClientKind) -> TranslationClient {
        let mut config = ProviderConfig::new("test", url, "test-model", kind);
        config.api_key = "sk-test".into();
        TranslationClient::new(config, RetryPolicy::immediate()).unwrap()
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("sys"), ChatMessage::user("hi")]
    }

    #[tokio::test]
    async fn test_openai_call_uses_json_mode() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({
                "model": "test-model",
                "response_format": {"type": "json_object"}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion(r#"{"a": "门_打开"}"#))
            .create_async()
            .await;

        let result = client(&server.url(), ClientKind::OpenAi).call(&messages(), 3).await.unwrap();

        assert_eq!(result["a"], json!("门_打开"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_raw_http_extracts_wrapped_json() {
        let mut server = mockito::Server::new_async().await;
        let url = format!("{}/v1/chat/completions", server.url());
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(completion("结果如下：{\"a\": \"门_关闭\"} 完成"))
            .create_async()
            .await;

        let result = client(&url, ClientKind::RawHttp).call(&messages(), 3).await.unwrap();

        assert_eq!(result["a"], json!("门_关闭"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_malformed_output_exhausts_retries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(completion("not json at all"))
            .expect(3)
            .create_async()
            .await;

        let err = client(&server.url(), ClientKind::OpenAi)
            .call(&messages(), 3)
            .await
            .unwrap_err();

        match err {
            TranslationError::TranslationFailure { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last_error, TranslationError::ResponseFormatError { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_attempt_count_comes_from_caller() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = client(&server.url(), ClientKind::OpenAi);
        assert_eq!(client.retry, RetryPolicy::immediate());

        let err = client.call(&messages(), 2).await.unwrap_err();
        assert!(matches!(err, TranslationError::TranslationFailure { attempts: 2, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body(r#"{"error": "invalid key"}"#)
            .expect(1)
            .create_async()
            .await;

        let err = client(&server.url(), ClientKind::OpenAi)
            .call(&messages(), 3)
            .await
            .unwrap_err();

        assert!(matches!(err, TranslationError::TranslationFailure { attempts: 1, .. }));
        mock.assert_async().await;
    }

    #[test]
    fn test_supports_batch_by_host() {
        let dash = client("https://dashscope.aliyuncs.com/compatible-mode/v1", ClientKind::OpenAi);
        let other = client("https://api.deepseek.com/v1", ClientKind::OpenAi);
        let raw = client("https://dashscope.aliyuncs.com/compatible-mode/v1", ClientKind::RawHttp);

        assert!(dash.supports_batch());
        assert!(!other.supports_batch());
        assert!(!raw.supports_batch());
    }

    #[test]
    fn test_batch_override() {
        let mut config = ProviderConfig::new("gw", "http://localhost:9000/v1", "m", ClientKind::OpenAi);
        config.batch_api = Some(true);
        let client = TranslationClient::new(config, RetryPolicy::default()).unwrap();
        assert!(client.supports_batch());
    }

    #[tokio::test]
    async fn test_raw_client_has_no_batch_api() {
        let raw = client("http://localhost:1/v1/chat/completions", ClientKind::RawHttp);
        assert!(raw.submit_batch(&[], "x").await.is_none());
        assert!(matches!(
            raw.poll_status("job").await,
            Err(TranslationError::BatchUnsupported { .. })
        ));
    }
}
