//! Configuration for planforge.
//!
//! Loaded from TOML with precedence: CLI flags > config file > defaults.
//! The file is discovered by searching upward from the working directory for
//! `planforge.toml` or `.planforge/config.toml`; `--config` overrides
//! discovery. Credentials never live in the file itself, only the names of
//! the environment variables that hold them.
//!
//! There is no global config. Each component receives its own slice at
//! construction, so tests can hand-build exactly the knobs they exercise.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use planforge_utils::ConfigError;

/// Top-level configuration, mirroring the TOML file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub wiki: WikiConfig,
    pub code_host: CodeHostConfig,
    pub reasoning: ReasoningConfig,
    pub retrieval: RetrievalConfig,
    pub workflow: WorkflowConfig,
    pub output: OutputConfig,
}

/// Issue tracker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    /// Base URL of the tracker instance, e.g. `https://acme.atlassian.net`.
    pub base_url: String,
    /// Env var holding the account email used for basic auth.
    pub email_env: String,
    /// Env var holding the API token used for basic auth.
    pub token_env: String,
    /// Per-request timeout. Expiry is a hard failure; tracker reads are
    /// never retried implicitly.
    pub request_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            email_env: "TRACKER_EMAIL".to_string(),
            token_env: "TRACKER_API_TOKEN".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl TrackerConfig {
    /// Resolve (email, token) from the configured env vars.
    pub fn resolve_credentials(&self) -> Result<(String, String), ConfigError> {
        let email = require_env(&self.email_env, "tracker account email")?;
        let token = require_env(&self.token_env, "tracker API token")?;
        Ok((email, token))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Wiki connection settings. Shares the tracker's credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WikiConfig {
    /// Base URL of the wiki. Empty means "derive from tracker.base_url"
    /// by appending `/wiki` (the common cloud layout).
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout_secs: 30,
        }
    }
}

impl WikiConfig {
    /// Effective base URL, deriving from the tracker when unset.
    #[must_use]
    pub fn effective_base_url(&self, tracker: &TrackerConfig) -> String {
        if self.base_url.is_empty() {
            format!("{}/wiki", tracker.base_url.trim_end_matches('/'))
        } else {
            self.base_url.clone()
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Code host (GitHub-compatible) settings. The token is optional; without
/// it, public repositories still work within anonymous rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CodeHostConfig {
    pub base_url: String,
    pub token_env: String,
    pub request_timeout_secs: u64,
    /// How many recent commits to summarize.
    pub recent_commits: usize,
    /// Cap on tree entries included in the structure summary.
    pub tree_entry_limit: usize,
}

impl Default for CodeHostConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            request_timeout_secs: 30,
            recent_commits: 5,
            tree_entry_limit: 200,
        }
    }
}

impl CodeHostConfig {
    /// Token is optional: `None` when the env var is unset or empty.
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reasoning service settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReasoningConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    /// Total attempt budget for transient failures (1 = no retries).
    pub max_attempts: u32,
    /// First backoff delay; subsequent delays scale with the attempt number.
    pub initial_backoff_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "REASONING_API_KEY".to_string(),
            temperature: 0.2,
            max_tokens: 8192,
            request_timeout_secs: 180,
            max_attempts: 3,
            initial_backoff_ms: 1000,
        }
    }
}

impl ReasoningConfig {
    pub fn resolve_api_key(&self) -> Result<String, ConfigError> {
        require_env(&self.api_key_env, "reasoning service API key")
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
}

/// Two-tier retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Title of the tier-1 passport document, plus alternates tried in order.
    pub passport_title: String,
    pub passport_alternates: Vec<String>,
    /// Title of the tier-1 architecture document, plus alternates.
    pub architecture_title: String,
    pub architecture_alternates: Vec<String>,
    /// Cap on the tier-2 candidate pool fetched from search.
    pub candidate_limit: usize,
    /// Cap on tier-2 selections, enforced even when the model names more.
    pub selection_limit: usize,
    /// Cap on extracted search keywords.
    pub keyword_limit: usize,
    /// Sampling settings for the one selection call.
    pub selection_temperature: f32,
    pub selection_max_tokens: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            passport_title: "Project Passport".to_string(),
            passport_alternates: vec!["Passport".to_string(), "Project Overview".to_string()],
            architecture_title: "Logical Architecture".to_string(),
            architecture_alternates: vec![
                "Architecture".to_string(),
                "System Architecture".to_string(),
            ],
            candidate_limit: 20,
            selection_limit: 5,
            keyword_limit: 5,
            selection_temperature: 0.1,
            selection_max_tokens: 256,
        }
    }
}

/// Workflow routing settings: status equivalence sets and the optional
/// automatic transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Statuses treated as "backlog" (case-insensitive).
    pub backlog_statuses: Vec<String>,
    /// Statuses treated as "ready for work" (case-insensitive).
    pub ready_statuses: Vec<String>,
    /// Target status for the post-feedback transition.
    pub transition_target: String,
    /// Whether feedback incorporation may transition the item when every
    /// BLOCKING readiness gate is resolved.
    pub auto_transition: bool,
    /// Stories scoring below this are flagged for human review.
    pub confidence_threshold: f64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            backlog_statuses: vec![
                "backlog".to_string(),
                "to do".to_string(),
                "open".to_string(),
            ],
            ready_statuses: vec![
                "ready for work".to_string(),
                "ai to do".to_string(),
                "selected for development".to_string(),
            ],
            transition_target: "AI To Do".to_string(),
            auto_transition: false,
            confidence_threshold: 0.7,
        }
    }
}

impl WorkflowConfig {
    #[must_use]
    pub fn is_backlog_status(&self, status: &str) -> bool {
        let status = status.trim().to_lowercase();
        self.backlog_statuses.iter().any(|s| s.to_lowercase() == status)
    }

    #[must_use]
    pub fn is_ready_status(&self, status: &str) -> bool {
        let status = status.trim().to_lowercase();
        self.ready_statuses.iter().any(|s| s.to_lowercase() == status)
    }
}

/// Artifact output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Root directory for per-item artifact directories.
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "outputs".to_string(),
        }
    }
}

impl Config {
    /// Load from an explicit path, or discover upward from `cwd`.
    /// No file anywhere means pure defaults, which is a valid setup for
    /// dry runs.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound {
                        path: path.display().to_string(),
                    });
                }
                Self::from_file(path)
            }
            None => match discover_config_file() {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.reasoning.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "reasoning.max_attempts".to_string(),
                value: "0 (must be at least 1)".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "reasoning.temperature".to_string(),
                value: self.reasoning.temperature.to_string(),
            });
        }
        if self.retrieval.selection_limit > self.retrieval.candidate_limit {
            return Err(ConfigError::InvalidValue {
                key: "retrieval.selection_limit".to_string(),
                value: format!(
                    "{} (exceeds candidate_limit {})",
                    self.retrieval.selection_limit, self.retrieval.candidate_limit
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.workflow.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                key: "workflow.confidence_threshold".to_string(),
                value: self.workflow.confidence_threshold.to_string(),
            });
        }
        Ok(())
    }
}

fn require_env(var: &str, purpose: &str) -> Result<String, ConfigError> {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            var: var.to_string(),
            purpose: purpose.to_string(),
        })
}

/// Search upward from CWD for `planforge.toml` or `.planforge/config.toml`,
/// then fall back to the per-user config directory.
fn discover_config_file() -> Option<PathBuf> {
    let mut dir = env::current_dir().ok()?;
    loop {
        let direct = dir.join("planforge.toml");
        if direct.is_file() {
            return Some(direct);
        }
        let nested = dir.join(".planforge").join("config.toml");
        if nested.is_file() {
            return Some(nested);
        }
        if !dir.pop() {
            break;
        }
    }
    let user = dirs::config_dir()?.join("planforge").join("config.toml");
    user.is_file().then_some(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn defaults_are_a_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.passport_title, "Project Passport");
        assert_eq!(config.retrieval.architecture_title, "Logical Architecture");
        assert_eq!(config.reasoning.max_attempts, 3);
        assert!(!config.workflow.auto_transition);
    }

    #[test]
    fn partial_file_overlays_defaults() {
        let file = write_config(
            r#"
[tracker]
base_url = "https://acme.atlassian.net"

[reasoning]
model = "deepseek-coder"
max_attempts = 5
"#,
        );
        let config = Config::load(Some(file.path())).expect("load");
        assert_eq!(config.tracker.base_url, "https://acme.atlassian.net");
        assert_eq!(config.reasoning.model, "deepseek-coder");
        assert_eq!(config.reasoning.max_attempts, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.retrieval.candidate_limit, 20);
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let file = write_config("[reasoning]\nmax_attempts = 0\n");
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn selection_limit_cannot_exceed_candidate_limit() {
        let file = write_config("[retrieval]\ncandidate_limit = 3\nselection_limit = 10\n");
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[tracker]\nbase_urll = \"typo\"\n");
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_explicit_path_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/planforge.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn wiki_base_url_derives_from_tracker() {
        let mut config = Config::default();
        config.tracker.base_url = "https://acme.atlassian.net/".to_string();
        assert_eq!(
            config.wiki.effective_base_url(&config.tracker),
            "https://acme.atlassian.net/wiki"
        );
        config.wiki.base_url = "https://wiki.internal".to_string();
        assert_eq!(
            config.wiki.effective_base_url(&config.tracker),
            "https://wiki.internal"
        );
    }

    #[test]
    fn status_classification_is_case_insensitive() {
        let workflow = WorkflowConfig::default();
        assert!(workflow.is_backlog_status("Backlog"));
        assert!(workflow.is_backlog_status("TO DO"));
        assert!(workflow.is_ready_status("AI To Do"));
        assert!(!workflow.is_backlog_status("In Review"));
    }
}
