//! OpenAI-compatible chat-completions backend.
//!
//! Works against any provider that speaks `POST {base}/chat/completions`
//! with bearer auth (DeepSeek is the default in config). Error mapping is
//! strict about what counts as transient: only timeouts, 429 and 5xx reach
//! the gateway as retryable.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use planforge_config::ReasoningConfig;
use planforge_utils::{ConfigError, ReasoningError, redact};

use crate::types::{ReasoningBackend, ReasoningRequest, ReasoningResult};

/// HTTP backend for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl OpenAiCompatBackend {
    /// Build from config, resolving the API key from the configured env var.
    pub fn new_from_config(config: &ReasoningConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "reasoning".to_string(),
                value: redact(&e.to_string()),
            })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

/// Map a reqwest transport error into the reasoning taxonomy.
fn map_transport_error(error: &reqwest::Error, timeout: Duration) -> ReasoningError {
    if error.is_timeout() {
        ReasoningError::Timeout {
            seconds: timeout.as_secs(),
        }
    } else {
        ReasoningError::Transport {
            detail: redact(&error.to_string()),
        }
    }
}

/// Map a non-success HTTP status into the reasoning taxonomy.
fn map_status_error(status: reqwest::StatusCode, body: &str) -> ReasoningError {
    let detail = redact(&body.chars().take(300).collect::<String>());
    match status.as_u16() {
        401 | 403 => ReasoningError::Unauthorized { detail },
        429 => ReasoningError::RateLimited { detail },
        400..=499 => ReasoningError::Malformed {
            detail: format!("{status}: {detail}"),
        },
        _ => ReasoningError::Transport {
            detail: format!("{status}: {detail}"),
        },
    }
}

#[async_trait::async_trait]
impl ReasoningBackend for OpenAiCompatBackend {
    async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResult, ReasoningError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(
            model = %self.model,
            temperature = request.temperature,
            max_tokens = request.max_tokens,
            prompt_bytes = request.user.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(&e, request.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            ReasoningError::Transport {
                detail: format!("response decode failed: {}", redact(&e.to_string())),
            }
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ReasoningError::Transport {
                detail: "response contained no choices".to_string(),
            })?;
        let text = choice.message.content.unwrap_or_default();
        let (tokens_input, tokens_output) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        let mut result = ReasoningResult::new(
            text,
            parsed.model.unwrap_or_else(|| self.model.clone()),
        )
        .with_tokens(tokens_input, tokens_output);
        if let Some(reason) = choice.finish_reason {
            result = result.with_finish_reason(reason);
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "openai-compat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn auth_statuses_map_to_unauthorized() {
        let err = map_status_error(StatusCode::UNAUTHORIZED, "bad key");
        assert!(matches!(err, ReasoningError::Unauthorized { .. }));
        assert!(!err.is_transient());

        let err = map_status_error(StatusCode::FORBIDDEN, "no access");
        assert!(matches!(err, ReasoningError::Unauthorized { .. }));
    }

    #[test]
    fn rate_limit_maps_to_retryable() {
        let err = map_status_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, ReasoningError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn other_client_errors_are_malformed_and_terminal() {
        let err = map_status_error(StatusCode::BAD_REQUEST, "unknown model");
        assert!(matches!(err, ReasoningError::Malformed { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient_transport() {
        let err = map_status_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, ReasoningError::Transport { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn status_error_bodies_are_redacted_and_capped() {
        let body = format!("leaked bearer token {}", "x".repeat(64));
        let err = map_status_error(StatusCode::BAD_REQUEST, &body);
        let msg = err.to_string();
        assert!(!msg.contains(&"x".repeat(64)));
    }
}
