//! Shared infrastructure for planforge: the error taxonomy used across the
//! workspace and the secret-redaction helpers every user-facing surface runs
//! its output through.

pub mod error;
pub mod redaction;

pub use error::{
    BuildStage, ConfigError, ContextBuildError, ErrorCategory, FetchError, InputError,
    PlanForgeError, ReasoningError, Severity, StoreError, UserFriendlyError, ValidationError,
};
pub use redaction::{redact, redact_error_chain};
