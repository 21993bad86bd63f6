//! Exit code constants and error mapping.
//!
//! Scripts driving the binary key off these codes, so they are part of the
//! stable surface: change values only with a major version bump.

use planforge_utils::{InputError, PlanForgeError, ReasoningError, StoreError};

/// Exit code constants.
pub mod codes {
    /// Operation completed successfully.
    pub const SUCCESS: i32 = 0;

    /// Unexpected internal failure.
    pub const INTERNAL: i32 = 1;

    /// Bad CLI arguments, bad work item reference, or bad configuration.
    pub const CLI_ARGS: i32 = 2;

    /// Another run holds the lock for this work item.
    pub const LOCK_HELD: i32 = 9;

    /// The reasoning call timed out.
    pub const REASONING_TIMEOUT: i32 = 10;

    /// The generated plan failed validation fatally.
    pub const VALIDATION_FAILED: i32 = 65;

    /// An external service (tracker, wiki, code host) was unreachable or
    /// rejected our credentials.
    pub const SERVICE_UNAVAILABLE: i32 = 69;

    /// The reasoning backend failed after exhausting retries.
    pub const REASONING_FAILURE: i32 = 70;

    /// Artifact storage failed.
    pub const STORAGE: i32 = 74;
}

/// Process exit code wrapper returned by `cli::run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(i32);

impl ExitCode {
    pub const SUCCESS: Self = Self(codes::SUCCESS);
    pub const INTERNAL: Self = Self(codes::INTERNAL);
    pub const CLI_ARGS: Self = Self(codes::CLI_ARGS);

    #[must_use]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<&PlanForgeError> for ExitCode {
    fn from(error: &PlanForgeError) -> Self {
        let code = match error {
            PlanForgeError::Input(
                InputError::BadKeyFormat { .. }
                | InputError::BadKeyUrl { .. }
                | InputError::MissingBaseline { .. },
            )
            | PlanForgeError::Config(_) => codes::CLI_ARGS,

            PlanForgeError::Fetch(_) | PlanForgeError::ContextBuild(_) => {
                codes::SERVICE_UNAVAILABLE
            }

            PlanForgeError::Reasoning(ReasoningError::Timeout { .. }) => codes::REASONING_TIMEOUT,
            PlanForgeError::Reasoning(_) => codes::REASONING_FAILURE,

            PlanForgeError::FatalDefects { .. } | PlanForgeError::Unparsable { .. } => {
                codes::VALIDATION_FAILED
            }

            PlanForgeError::Store(StoreError::LockHeld { .. }) => codes::LOCK_HELD,
            PlanForgeError::Store(_) => codes::STORAGE,
        };
        Self(code)
    }
}
