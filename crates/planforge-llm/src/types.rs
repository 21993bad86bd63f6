//! Backend seam types: one request/response shape every backend speaks.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use planforge_utils::ReasoningError;

/// A reasoning backend. Implementations must be safe to share across an
/// async runtime; the gateway holds one behind an `Arc`.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// One request/response round trip. No retries here; retry policy is
    /// the gateway's job.
    async fn invoke(&self, request: ReasoningRequest) -> Result<ReasoningResult, ReasoningError>;

    /// Backend name for logs and artifact headers.
    fn name(&self) -> &str;
}

/// A single reasoning call: system instructions, user prompt, sampling
/// parameters, and free-form metadata that backends may log or forward.
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ReasoningRequest {
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            max_tokens: 8192,
            timeout: Duration::from_secs(180),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// What came back from a reasoning call, with whatever usage accounting the
/// provider reported.
#[derive(Debug, Clone)]
pub struct ReasoningResult {
    pub text: String,
    pub model: String,
    pub tokens_input: Option<u64>,
    pub tokens_output: Option<u64>,
    pub finish_reason: Option<String>,
}

impl ReasoningResult {
    #[must_use]
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
            tokens_input: None,
            tokens_output: None,
            finish_reason: None,
        }
    }

    #[must_use]
    pub fn with_tokens(mut self, input: Option<u64>, output: Option<u64>) -> Self {
        self.tokens_input = input;
        self.tokens_output = output;
        self
    }

    #[must_use]
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Total tokens when the provider reported both directions.
    #[must_use]
    pub fn tokens_total(&self) -> Option<u64> {
        match (self.tokens_input, self.tokens_output) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_sampling_params() {
        let request = ReasoningRequest::new("sys", "user")
            .with_temperature(0.1)
            .with_max_tokens(256)
            .with_timeout(Duration::from_secs(30))
            .with_metadata("purpose", serde_json::json!("selection"));
        assert_eq!(request.temperature, 0.1);
        assert_eq!(request.max_tokens, 256);
        assert_eq!(request.timeout, Duration::from_secs(30));
        assert_eq!(request.metadata["purpose"], "selection");
    }

    #[test]
    fn tokens_total_requires_both_directions() {
        let result = ReasoningResult::new("text", "model").with_tokens(Some(100), Some(50));
        assert_eq!(result.tokens_total(), Some(150));

        let partial = ReasoningResult::new("text", "model").with_tokens(Some(100), None);
        assert_eq!(partial.tokens_total(), None);
    }
}
