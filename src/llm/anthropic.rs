//! Anthropic Messages API client with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use super::error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
use super::{ChatMessage, ChatRequest, ChatResponse, ContentBlock, LlmClient, TokenUsage, ToolDefinition};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Messages API client with automatic retry for transient errors.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    retry_config: RetryConfig,
}

impl AnthropicClient {
    /// Create a new client. `timeout` bounds each HTTP exchange.
    pub fn new(api_key: String, timeout: Duration) -> Result<Self, LlmError> {
        Self::with_retry_config(api_key, timeout, RetryConfig::default())
    }

    /// Create a new client with a custom retry configuration.
    pub fn with_retry_config(
        api_key: String,
        timeout: Duration,
        retry_config: RetryConfig,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::network_error(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            api_key,
            retry_config,
        })
    }

    /// Seconds from the `retry-after` header, sent with 429 and 529 responses.
    fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Map a non-success status to an error. 529 (`overloaded_error`) is
    /// rate limiting but keeps its own code.
    fn status_error(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
    ) -> LlmError {
        let code = status.as_u16();
        let message = api_error_message(body);
        match classify_http_status(code) {
            LlmErrorKind::RateLimited => LlmError {
                status_code: Some(code),
                ..LlmError::rate_limited(message, retry_after)
            },
            LlmErrorKind::ClientError => LlmError::client_error(code, message),
            _ => LlmError::server_error(code, message),
        }
    }

    /// One POST to the Messages endpoint.
    async fn send_once(&self, request: &MessagesRequest<'_>) -> Result<ChatResponse, LlmError> {
        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                let what = if e.is_timeout() {
                    "timed out"
                } else if e.is_connect() {
                    "could not connect"
                } else {
                    "transport error"
                };
                LlmError::network_error(format!("Messages API {}: {}", what, e))
            })?;

        let status = response.status();
        let retry_after = Self::retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::status_error(status, &body, retry_after));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            LlmError::parse_error(format!("unexpected Messages API body ({}): {}", e, body))
        })?;
        Ok(parsed.into_chat_response(request.model))
    }

    /// Send with backoff on transient failures, bounded by the retry
    /// config's attempt count and total duration.
    async fn send_with_retry(&self, request: &MessagesRequest<'_>) -> anyhow::Result<ChatResponse> {
        let started = Instant::now();
        let deadline = started + self.retry_config.max_retry_duration;
        let mut attempt: u32 = 0;

        loop {
            let error = match self.send_once(request).await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(
                            "Messages API call for {} succeeded on attempt {} after {:?}",
                            request.model,
                            attempt + 1,
                            started.elapsed()
                        );
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let retryable = self.retry_config.should_retry(&error)
                && attempt < self.retry_config.max_retries;
            let delay = error
                .suggested_delay(attempt)
                .min(deadline.saturating_duration_since(Instant::now()));

            if !retryable || delay.is_zero() {
                tracing::error!(
                    "Messages API call for {} abandoned after {} attempt(s): {}",
                    request.model,
                    attempt + 1,
                    error
                );
                return Err(error.into());
            }

            tracing::warn!(
                "Messages API {} on attempt {}, backing off {:?}",
                error.kind,
                attempt + 1,
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// The `error.message` of an API error body, or the raw body when it has
/// another shape.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| format!("{}: {}", b.error.kind, b.error.message))
        .unwrap_or_else(|_| body.to_string())
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat_completion(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        let body = MessagesRequest {
            model: request.model,
            max_tokens: request.max_tokens,
            system: request.system,
            messages: request.messages,
            tools: request.tools,
        };

        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            "Sending request to Anthropic"
        );

        self.send_with_retry(&body).await
    }
}

/// Messages API request format.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

/// Messages API response format.
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<ResponseUsage>,
    #[serde(default)]
    model: Option<String>,
}

/// Content block as returned by the API. Block types the loop does not
/// use (e.g. thinking) are dropped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

impl MessagesResponse {
    fn into_chat_response(self, requested_model: &str) -> ChatResponse {
        let content = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
                ResponseBlock::ToolUse { id, name, input } => {
                    // The API omits `input` for argument-less calls.
                    let input = if input.is_null() {
                        Value::Object(Default::default())
                    } else {
                        input
                    };
                    Some(ContentBlock::ToolUse { id, name, input })
                }
                ResponseBlock::Other => None,
            })
            .collect();

        ChatResponse {
            content,
            stop_reason: self.stop_reason,
            usage: self
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
                .unwrap_or_default(),
            model: self.model.or_else(|| Some(requested_model.to_string())),
        }
    }
}
