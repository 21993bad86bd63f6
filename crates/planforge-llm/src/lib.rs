//! Reasoning-service gateway for planforge.
//!
//! The pipeline talks to the remote model through one seam: the
//! [`ReasoningBackend`] trait. Production wires in the OpenAI-compatible
//! HTTP backend; `--dry-run` substitutes [`DryRunBackend`]; tests script
//! their own. [`Gateway`] wraps whichever backend is active with the retry
//! policy and per-attempt observability.

mod dry_run;
mod gateway;
mod openai_backend;
mod types;

pub use dry_run::DryRunBackend;
pub use gateway::{Gateway, RetryPolicy};
pub use openai_backend::OpenAiCompatBackend;
pub use types::{ReasoningBackend, ReasoningRequest, ReasoningResult};
