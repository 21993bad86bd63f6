//! planforge - implementation plans for tracked work items
//!
//! planforge turns a tracker issue key into a machine-authored, validated
//! implementation plan. A run fetches the issue, retrieves the team's
//! knowledge-base documents in two tiers, assembles optional repository
//! context, asks a reasoning model for a five-section plan, validates and
//! scores the result, and persists every intermediate artifact under a
//! per-item directory for audit and replay.
//!
//! The crate splits along service seams:
//!
//! - [`adapters`]: tracker, wiki, and code host clients behind traits
//! - [`router`]: pure mode resolution (full, backlog, feedback, refine,
//!   story creation)
//! - [`retrieval`] and [`assembler`]: context stages 2 through 4
//! - [`pipeline`]: orchestration of one run end to end
//! - [`store`]: artifact persistence with canonical-JSON snapshots
//!
//! Validation, configuration, the reasoning gateway, and the error
//! taxonomy live in the `planforge-validation`, `planforge-config`,
//! `planforge-llm`, and `planforge-utils` workspace crates.

pub mod adapters;
pub mod assembler;
pub mod cli;
pub mod context;
pub mod exit_codes;
pub mod pipeline;
pub mod prompts;
pub mod retrieval;
pub mod router;
pub mod snapshot;
pub mod store;
pub mod work_item;

pub use context::{
    CodeContext, CodeSnippet, CodeStatus, CommentRecord, KnowledgeContext, KnowledgeDocument,
    RetrievalTier, SelectionLog, TrackerContext,
};
pub use exit_codes::ExitCode;
pub use pipeline::{Pipeline, RunOptions, RunReport};
pub use router::{ModeDecision, ModeOverride, RouteOutcome};
pub use snapshot::{ExecutionSnapshot, SNAPSHOT_VERSION};
pub use store::{ArtifactStore, StoredAnalysis};
pub use work_item::WorkItemKey;
