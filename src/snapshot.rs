//! The replayable execution snapshot.
//!
//! A snapshot aggregates the three contexts plus the prompt-ready blob and
//! is the unit of persistence for refine flows. Serialization is canonical
//! JSON (RFC 8785), so store/load/re-serialize is byte-identical; a blake3
//! checksum of the canonical bytes travels in a sidecar file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use planforge_utils::StoreError;

use crate::context::{CodeContext, KnowledgeContext, TrackerContext};
use crate::work_item::WorkItemKey;

/// Current snapshot format version. Bump on incompatible layout changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Immutable aggregate of one run's gathered context.
///
/// Refine flows load a stored snapshot and derive a new one via
/// [`ExecutionSnapshot::with_feedback`]; the stored one is never edited in
/// place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub version: u32,
    pub key: WorkItemKey,
    pub tracker: TrackerContext,
    pub knowledge: KnowledgeContext,
    pub code: CodeContext,
    /// Prompt-ready text blob composed by aggregation (stage 4).
    pub prompt_context: String,
    /// Human feedback attached by refine / feedback-incorporation runs.
    #[serde(default)]
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionSnapshot {
    #[must_use]
    pub fn new(
        key: WorkItemKey,
        tracker: TrackerContext,
        knowledge: KnowledgeContext,
        code: CodeContext,
        prompt_context: String,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            key,
            tracker,
            knowledge,
            code,
            prompt_context,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    /// Derive a new snapshot carrying feedback. The prompt context gets a
    /// feedback section appended; everything gathered stays as-is, so no
    /// external service is re-fetched.
    #[must_use]
    pub fn with_feedback(&self, feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        let mut derived = self.clone();
        derived.prompt_context = format!(
            "{}\n\n## Human Feedback\n\n{}\n",
            self.prompt_context.trim_end(),
            feedback
        );
        derived.feedback = Some(feedback);
        derived.created_at = Utc::now();
        derived
    }

    /// Canonical JSON bytes. Deterministic: the same snapshot always
    /// produces the same bytes.
    pub fn to_canonical_json(&self) -> Result<String, StoreError> {
        serde_json_canonicalizer::to_string(self).map_err(|e| StoreError::Corrupt {
            path: format!("snapshot {}", self.key),
            detail: e.to_string(),
        })
    }

    pub fn from_json(raw: &str, path: &str) -> Result<Self, StoreError> {
        let snapshot: Self = serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            path: path.to_string(),
            detail: e.to_string(),
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Corrupt {
                path: path.to_string(),
                detail: format!(
                    "snapshot version {} unsupported (expected {SNAPSHOT_VERSION})",
                    snapshot.version
                ),
            });
        }
        Ok(snapshot)
    }

    /// blake3 hex digest of the canonical bytes.
    pub fn checksum(&self) -> Result<String, StoreError> {
        Ok(blake3::hash(self.to_canonical_json()?.as_bytes())
            .to_hex()
            .to_string())
    }
}
