//! Language model clients that turn a prompt into candidate SQL text.

use crate::config::Secret;
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Sampling temperature for SQL generation.
pub const GENERATION_TEMPERATURE: f32 = 0.1;

/// Upper bound on tokens produced per completion.
pub const GENERATION_MAX_TOKENS: u32 = 500;

const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// One prompt pair sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

/// Something that can produce SQL from a prompt.
///
/// Implementations own their own timeout and transport retry policy; the
/// translator only sees the final text or an error.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> DbResult<String>;

    fn model(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct OpenAiOptions {
    pub api_key: Secret,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Failure of a single HTTP attempt.
struct AttemptError {
    error: DbError,
    transient: bool,
}

/// Client for any OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    options: OpenAiOptions,
    endpoint: String,
}

impl std::fmt::Debug for OpenAiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGenerator")
            .field("model", &self.options.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl OpenAiGenerator {
    pub fn new(options: OpenAiOptions) -> DbResult<Self> {
        if options.api_key.is_empty() {
            return Err(DbError::config("language model API key is empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| DbError::config(format!("Failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/chat/completions", options.base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            options,
            endpoint,
        })
    }

    async fn attempt(&self, request: &GenerationRequest) -> Result<String, AttemptError> {
        let body = ChatRequest {
            model: &self.options.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: GENERATION_TEMPERATURE,
            max_tokens: GENERATION_MAX_TOKENS,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.options.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| AttemptError {
                transient: e.is_timeout() || e.is_connect() || e.is_request(),
                error: if e.is_timeout() {
                    DbError::timeout("language model request", self.options.request_timeout.as_secs())
                } else {
                    DbError::translation_failed(format!("language model request failed: {}", e))
                },
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError {
                transient: status.is_server_error() || status.as_u16() == 429,
                error: DbError::translation_failed(format!(
                    "language model returned HTTP {}",
                    status.as_u16()
                )),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| AttemptError {
            transient: false,
            error: DbError::translation_failed(format!(
                "failed to parse language model response: {}",
                e
            )),
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AttemptError {
                transient: false,
                error: DbError::translation_failed("language model returned no content"),
            })
    }
}

#[async_trait]
impl SqlGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> DbResult<String> {
        debug!(model = %self.options.model, "Requesting SQL completion");
        match self.attempt(request).await {
            Ok(text) => Ok(text),
            Err(first) if first.transient => {
                warn!(error = %first.error, "Language model call failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.attempt(request).await.map_err(|e| e.error)
            }
            Err(first) => Err(first.error),
        }
    }

    fn model(&self) -> &str {
        &self.options.model
    }
}
