//! Error taxonomy for planforge.
//!
//! Each failure domain gets its own enum; `PlanForgeError` is the umbrella
//! type that the CLI maps to exit codes. The `UserFriendlyError` trait adds
//! the human-facing layer (message, context, suggestions) on top of the
//! technical `Display` output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Category of an error, used to group suggestions and pick exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Input,
    Configuration,
    Network,
    Reasoning,
    Validation,
    Storage,
}

/// Human-facing error reporting.
///
/// `user_message` is the one-line summary, `context` explains what the
/// system was doing, `suggestions` are concrete next steps.
pub trait UserFriendlyError {
    fn user_message(&self) -> String;

    fn context(&self) -> Option<String> {
        None
    }

    fn suggestions(&self) -> Vec<String> {
        Vec::new()
    }

    fn category(&self) -> ErrorCategory;

    /// Full report for terminal output.
    fn display_for_user(&self) -> String {
        let mut out = format!("✗ {}", self.user_message());
        if let Some(context) = self.context() {
            out.push_str(&format!("\n\n  Context: {context}"));
        }
        let suggestions = self.suggestions();
        if !suggestions.is_empty() {
            out.push_str("\n\n  Suggestions:");
            for (i, suggestion) in suggestions.iter().enumerate() {
                out.push_str(&format!("\n    {}. {}", i + 1, suggestion));
            }
        }
        out
    }
}

/// Bad operator input, detected before any network call is attempted.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("work item reference '{input}' does not match PROJECT-NUMBER")]
    BadKeyFormat { input: String },

    #[error("work item URL '{input}' has no parseable issue key in its path")]
    BadKeyUrl { input: String },

    #[error("mode '{mode}' requires a prior artifact for {key}, none found")]
    MissingBaseline { mode: String, key: String },
}

impl UserFriendlyError for InputError {
    fn user_message(&self) -> String {
        match self {
            Self::BadKeyFormat { input } => {
                format!("'{input}' is not a valid work item key")
            }
            Self::BadKeyUrl { input } => {
                format!("could not extract a work item key from '{input}'")
            }
            Self::MissingBaseline { mode, key } => {
                format!("cannot run {mode} for {key}: no prior analysis artifact exists")
            }
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::BadKeyFormat { .. } | Self::BadKeyUrl { .. } => Some(
                "Work item keys are an uppercase project code, a dash, and a number, \
                 e.g. PROJ-123. A full issue URL is also accepted."
                    .to_string(),
            ),
            Self::MissingBaseline { .. } => Some(
                "Refine and story-creation modes replay a previous run's output; \
                 they cannot start from scratch."
                    .to_string(),
            ),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::BadKeyFormat { .. } | Self::BadKeyUrl { .. } => vec![
                "Check the key in your tracker's issue view".to_string(),
                "Example: planforge run PROJ-123".to_string(),
            ],
            Self::MissingBaseline { .. } => vec![
                "Run the full pipeline first: planforge run <KEY>".to_string(),
                "Check --output-dir points at the directory of the earlier run".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Input
    }
}

/// A failed read or write against one of the external services.
///
/// Tracker and code-host failures are fatal for the run; wiki failures are
/// absorbed by the retrieval fallback paths.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("tracker {operation} failed for {key}: {detail}")]
    Tracker {
        operation: String,
        key: String,
        detail: String,
    },

    #[error("wiki {operation} failed in space {space}: {detail}")]
    Wiki {
        operation: String,
        space: String,
        detail: String,
    },

    #[error("code host {operation} failed for {repo}: {detail}")]
    CodeHost {
        operation: String,
        repo: String,
        detail: String,
    },

    #[error("{service} request timed out after {seconds}s")]
    Timeout { service: String, seconds: u64 },

    #[error("{service} rejected the configured credentials")]
    Unauthorized { service: String },
}

impl UserFriendlyError for FetchError {
    fn user_message(&self) -> String {
        match self {
            Self::Tracker { operation, key, .. } => {
                format!("tracker call '{operation}' failed for {key}")
            }
            Self::Wiki {
                operation, space, ..
            } => format!("wiki call '{operation}' failed in space {space}"),
            Self::CodeHost {
                operation, repo, ..
            } => format!("code host call '{operation}' failed for {repo}"),
            Self::Timeout { service, seconds } => {
                format!("{service} did not respond within {seconds}s")
            }
            Self::Unauthorized { service } => {
                format!("{service} rejected the configured credentials")
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Unauthorized { .. } => vec![
                "Verify the credential environment variables named in your config".to_string(),
                "API tokens expire; re-issue one from the service's account settings".to_string(),
            ],
            Self::Timeout { .. } => vec![
                "Retry the run; reads are safe to re-issue".to_string(),
                "Raise the request timeout in the config if the service is slow".to_string(),
            ],
            _ => vec!["Retry the run; reads are safe to re-issue".to_string()],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

/// Which sub-fetch of the context pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStage {
    TrackerEnrichment,
    KnowledgeRetrieval,
    CodeContext,
    Aggregation,
}

impl std::fmt::Display for BuildStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TrackerEnrichment => "tracker-enrichment",
            Self::KnowledgeRetrieval => "knowledge-retrieval",
            Self::CodeContext => "code-context",
            Self::Aggregation => "aggregation",
        };
        f.write_str(name)
    }
}

/// Context assembly failure, tagged with the stage that failed so a run can
/// be diagnosed without a debugger.
#[derive(Debug, Error)]
#[error("context build failed at stage {stage}: {cause}")]
pub struct ContextBuildError {
    pub stage: BuildStage,
    #[source]
    pub cause: FetchError,
}

impl UserFriendlyError for ContextBuildError {
    fn user_message(&self) -> String {
        format!("context assembly failed at stage '{}'", self.stage)
    }

    fn context(&self) -> Option<String> {
        Some(format!("Underlying failure: {}", self.cause))
    }

    fn suggestions(&self) -> Vec<String> {
        self.cause.suggestions()
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Network
    }
}

/// Failures from the remote reasoning service.
///
/// `is_transient` drives the gateway retry policy: timeouts, rate limits and
/// transport faults are retried, authorization and request-shape failures
/// are not.
#[derive(Debug, Error)]
pub enum ReasoningError {
    #[error("reasoning call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("reasoning service rate limited the request: {detail}")]
    RateLimited { detail: String },

    #[error("reasoning service rejected the credentials: {detail}")]
    Unauthorized { detail: String },

    #[error("reasoning request was malformed: {detail}")]
    Malformed { detail: String },

    #[error("reasoning transport failure: {detail}")]
    Transport { detail: String },
}

impl ReasoningError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::Transport { .. }
        )
    }
}

impl UserFriendlyError for ReasoningError {
    fn user_message(&self) -> String {
        match self {
            Self::Timeout { seconds } => {
                format!("the reasoning service did not answer within {seconds}s")
            }
            Self::RateLimited { .. } => "the reasoning service is rate limiting us".to_string(),
            Self::Unauthorized { .. } => {
                "the reasoning service rejected the API key".to_string()
            }
            Self::Malformed { .. } => {
                "the reasoning service rejected the request shape".to_string()
            }
            Self::Transport { .. } => {
                "could not reach the reasoning service".to_string()
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Unauthorized { .. } => vec![
                "Check the API key environment variable named in [reasoning]".to_string(),
            ],
            Self::RateLimited { .. } => vec![
                "Wait a minute and retry; the gateway already backed off".to_string(),
            ],
            Self::Malformed { .. } => vec![
                "Check the configured model name against the provider's catalogue".to_string(),
            ],
            _ => vec![
                "Retry the run; gathered context was persisted and is cheap to rebuild"
                    .to_string(),
                "Use --dry-run to exercise the pipeline without the remote call".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Reasoning
    }
}

/// How serious a single validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One violated rule found while validating reasoning output.
///
/// Validation collects every violation, not just the first; callers decide
/// per mode which rules are fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{rule}: {detail}")]
pub struct ValidationError {
    pub rule: String,
    pub detail: String,
    pub severity: Severity,
}

impl ValidationError {
    #[must_use]
    pub fn error(rule: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            detail: detail.into(),
            severity: Severity::Error,
        }
    }

    #[must_use]
    pub fn warning(rule: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            detail: detail.into(),
            severity: Severity::Warning,
        }
    }
}

/// Configuration loading and credential resolution failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    NotFound { path: String },

    #[error("failed to parse config {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error("environment variable {var} is not set ({purpose})")]
    MissingCredential { var: String, purpose: String },

    #[error("invalid config value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

impl UserFriendlyError for ConfigError {
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { path } => format!("config file '{path}' does not exist"),
            Self::Parse { path, .. } => format!("config file '{path}' is not valid TOML"),
            Self::MissingCredential { var, .. } => {
                format!("required environment variable {var} is not set")
            }
            Self::InvalidValue { key, .. } => format!("config key '{key}' has an invalid value"),
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::MissingCredential { var, purpose } => vec![
                format!("export {var}=<value>  ({purpose})"),
                "Credential env var names can be changed in the config file".to_string(),
            ],
            _ => vec![
                "See planforge.toml.example for the full set of recognized keys".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }
}

/// Artifact store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("another run holds the lock for {key}")]
    LockHeld { key: String },

    #[error("stored artifact at {path} is corrupt: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("snapshot checksum mismatch at {path}")]
    ChecksumMismatch { path: String },
}

impl UserFriendlyError for StoreError {
    fn user_message(&self) -> String {
        match self {
            Self::Io { path, .. } => format!("could not read or write '{path}'"),
            Self::LockHeld { key } => format!("a concurrent run is already working on {key}"),
            Self::Corrupt { path, .. } => format!("stored artifact '{path}' is corrupt"),
            Self::ChecksumMismatch { path } => {
                format!("snapshot '{path}' does not match its recorded checksum")
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::LockHeld { .. } => {
                vec!["Wait for the other run to finish, then retry".to_string()]
            }
            Self::Corrupt { .. } | Self::ChecksumMismatch { .. } => vec![
                "Delete the work item's artifact directory and re-run the full pipeline"
                    .to_string(),
            ],
            Self::Io { .. } => vec![
                "Check the output directory exists and is writable".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        ErrorCategory::Storage
    }
}

/// Umbrella error for the whole pipeline.
#[derive(Debug, Error)]
pub enum PlanForgeError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    ContextBuild(#[from] ContextBuildError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error("reasoning output failed validation: {}", summarize(.defects))]
    FatalDefects { defects: Vec<ValidationError> },

    #[error("reasoning output was unparsable ({raw_len} bytes, no recognizable sections)")]
    Unparsable { raw_len: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn summarize(defects: &[ValidationError]) -> String {
    let shown: Vec<String> = defects.iter().take(3).map(|d| d.rule.clone()).collect();
    if defects.len() > shown.len() {
        format!("{} (+{} more)", shown.join(", "), defects.len() - shown.len())
    } else {
        shown.join(", ")
    }
}

impl UserFriendlyError for PlanForgeError {
    fn user_message(&self) -> String {
        match self {
            Self::Input(e) => e.user_message(),
            Self::Fetch(e) => e.user_message(),
            Self::ContextBuild(e) => e.user_message(),
            Self::Reasoning(e) => e.user_message(),
            Self::FatalDefects { defects } => format!(
                "the generated plan violated {} validation rule(s)",
                defects.len()
            ),
            Self::Unparsable { .. } => {
                "the reasoning response had none of the expected sections".to_string()
            }
            Self::Config(e) => e.user_message(),
            Self::Store(e) => e.user_message(),
        }
    }

    fn context(&self) -> Option<String> {
        match self {
            Self::Input(e) => e.context(),
            Self::ContextBuild(e) => e.context(),
            Self::FatalDefects { defects } => Some(
                defects
                    .iter()
                    .map(|d| format!("{}: {}", d.rule, d.detail))
                    .collect::<Vec<_>>()
                    .join("; "),
            ),
            Self::Unparsable { .. } => Some(
                "The raw response was persisted to the reasoning artifact for inspection."
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Input(e) => e.suggestions(),
            Self::Fetch(e) => e.suggestions(),
            Self::ContextBuild(e) => e.suggestions(),
            Self::Reasoning(e) => e.suggestions(),
            Self::Config(e) => e.suggestions(),
            Self::Store(e) => e.suggestions(),
            Self::FatalDefects { .. } | Self::Unparsable { .. } => vec![
                "Inspect the persisted reasoning artifact for what the model produced"
                    .to_string(),
                "Re-run; generation is not deterministic and often passes on retry".to_string(),
            ],
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Input(e) => e.category(),
            Self::Fetch(e) => e.category(),
            Self::ContextBuild(e) => e.category(),
            Self::Reasoning(e) => e.category(),
            Self::FatalDefects { .. } | Self::Unparsable { .. } => ErrorCategory::Validation,
            Self::Config(e) => e.category(),
            Self::Store(e) => e.category(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_drives_retry() {
        assert!(ReasoningError::Timeout { seconds: 30 }.is_transient());
        assert!(
            ReasoningError::RateLimited {
                detail: "429".into()
            }
            .is_transient()
        );
        assert!(
            ReasoningError::Transport {
                detail: "connection reset".into()
            }
            .is_transient()
        );
        assert!(
            !ReasoningError::Unauthorized {
                detail: "401".into()
            }
            .is_transient()
        );
        assert!(
            !ReasoningError::Malformed {
                detail: "unknown model".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn context_build_error_names_the_stage() {
        let err = ContextBuildError {
            stage: BuildStage::KnowledgeRetrieval,
            cause: FetchError::Timeout {
                service: "wiki".into(),
                seconds: 30,
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("knowledge-retrieval"));
        assert!(msg.contains("wiki"));
    }

    #[test]
    fn fatal_defects_summary_caps_listed_rules() {
        let defects: Vec<ValidationError> = (0..5)
            .map(|i| ValidationError::error(format!("rule-{i}"), "detail"))
            .collect();
        let err = PlanForgeError::FatalDefects { defects };
        let msg = err.to_string();
        assert!(msg.contains("rule-0"));
        assert!(msg.contains("+2 more"));
    }

    #[test]
    fn user_friendly_reports_carry_suggestions() {
        let err = PlanForgeError::Config(ConfigError::MissingCredential {
            var: "REASONING_API_KEY".into(),
            purpose: "reasoning service auth".into(),
        });
        let report = err.display_for_user();
        assert!(report.contains("REASONING_API_KEY"));
        assert!(report.contains("Suggestions:"));
    }
}
