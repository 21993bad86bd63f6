//! Context snapshots gathered from the external services.
//!
//! All three contexts are immutable once built: re-fetching creates a new
//! snapshot. `CodeContext` is computed after `KnowledgeContext` and reads
//! it only for deduplication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::Display;

use crate::work_item::WorkItemKey;

/// One tracker comment, as needed for feedback detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRecord {
    pub author: String,
    #[serde(default)]
    pub author_account_id: Option<String>,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of a work item's tracker fields at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerContext {
    pub key: WorkItemKey,
    pub summary: String,
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub assignee_account_id: Option<String>,
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    pub components: Vec<String>,
    /// Explicit knowledge-space link field, when the project sets one.
    #[serde(default)]
    pub project_link: Option<String>,
    pub comments: Vec<CommentRecord>,
    pub fetched_at: DateTime<Utc>,
}

impl TrackerContext {
    pub fn format_markdown(&self) -> String {
        let mut out = format!(
            "## Work Item: {}\n\n**Summary:** {}\n**Status:** {}\n",
            self.key, self.summary, self.status
        );
        if let Some(assignee) = &self.assignee {
            out.push_str(&format!("**Assignee:** {assignee}\n"));
        }
        if let Some(parent) = &self.parent {
            out.push_str(&format!("**Parent:** {parent}\n"));
        }
        if !self.labels.is_empty() {
            out.push_str(&format!("**Labels:** {}\n", self.labels.join(", ")));
        }
        if !self.components.is_empty() {
            out.push_str(&format!("**Components:** {}\n", self.components.join(", ")));
        }
        if !self.description.is_empty() {
            out.push_str(&format!("\n### Description\n\n{}\n", self.description));
        }
        out
    }
}

/// Which tier of the two-stage retrieval produced a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RetrievalTier {
    Mandatory,
    Selected,
    /// Candidate dropped because its id duplicated a mandatory document.
    SkippedDuplicate,
}

/// One wiki document attached to the knowledge context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    pub tier: RetrievalTier,
    /// Empty for skipped duplicates; content was not re-fetched.
    pub content: String,
}

/// One entry the selection call could choose from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    pub title: String,
    pub excerpt: String,
}

/// Audit record of the tier-2 selection call, persisted alongside the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionLog {
    pub candidates: Vec<CandidateRecord>,
    pub selected_ids: Vec<String>,
    pub model: String,
    #[serde(default)]
    pub tokens_used: Option<u64>,
    /// Set when the selection degraded to the deterministic fallback.
    #[serde(default)]
    pub fallback_reason: Option<String>,
}

impl SelectionLog {
    pub fn format_markdown(&self) -> String {
        let mut out = String::from("## Candidates Offered\n\n");
        for candidate in &self.candidates {
            out.push_str(&format!("- `{}` {}\n", candidate.id, candidate.title));
        }
        out.push_str("\n## Selected\n\n");
        if self.selected_ids.is_empty() {
            out.push_str("(none)\n");
        } else {
            for id in &self.selected_ids {
                out.push_str(&format!("- `{id}`\n"));
            }
        }
        if let Some(reason) = &self.fallback_reason {
            out.push_str(&format!("\n**Fallback:** {reason}\n"));
        }
        out
    }
}

/// Topic keywords the deduplication pass recognizes in knowledge documents.
const KNOWN_TOPICS: &[&str] = &["architecture", "configuration", "deployment", "testing"];

/// Result of the two-stage retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeContext {
    pub space: String,
    pub documents: Vec<KnowledgeDocument>,
    /// True when both mandatory documents were absent; tier 2 was skipped.
    pub is_new_entity: bool,
    #[serde(default)]
    pub selection: Option<SelectionLog>,
}

impl KnowledgeContext {
    #[must_use]
    pub fn new_entity(space: impl Into<String>) -> Self {
        Self {
            space: space.into(),
            documents: Vec::new(),
            is_new_entity: true,
            selection: None,
        }
    }

    pub fn mandatory_documents(&self) -> impl Iterator<Item = &KnowledgeDocument> {
        self.documents
            .iter()
            .filter(|d| d.tier == RetrievalTier::Mandatory)
    }

    pub fn selected_documents(&self) -> impl Iterator<Item = &KnowledgeDocument> {
        self.documents
            .iter()
            .filter(|d| d.tier == RetrievalTier::Selected)
    }

    /// Attached (non-skipped) documents in retrieval order.
    pub fn attached_documents(&self) -> impl Iterator<Item = &KnowledgeDocument> {
        self.documents
            .iter()
            .filter(|d| d.tier != RetrievalTier::SkippedDuplicate)
    }

    /// Topics the knowledge base already covers, derived from titles and
    /// content of attached documents. `CodeContext` deduplication only
    /// skips topics present here, which keeps `skipped_topics` a subset by
    /// construction.
    #[must_use]
    pub fn covered_topics(&self) -> BTreeSet<String> {
        let mut topics = BTreeSet::new();
        for doc in self.attached_documents() {
            let haystack = format!("{}\n{}", doc.title, doc.content).to_lowercase();
            for topic in KNOWN_TOPICS {
                if haystack.contains(topic) {
                    topics.insert((*topic).to_string());
                }
            }
        }
        topics
    }

    pub fn format_markdown(&self) -> String {
        let mut out = format!("## Knowledge Base (space: {})\n\n", self.space);
        if self.is_new_entity {
            out.push_str(
                "**New entity:** no baseline documentation found; supporting-document \
                 selection was skipped.\n",
            );
        }
        for doc in self.attached_documents() {
            out.push_str(&format!("\n### {} ({})\n\n{}\n", doc.title, doc.tier, doc.content));
        }
        out
    }
}

/// How the repository reference was discovered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoDiscovery {
    ItemDescription,
    KnowledgeDocument { title: String },
}

/// Whether a repository was found at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeStatus {
    Available,
    NoRepositoryFound,
}

/// One config file excerpt included in the code context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub path: String,
    pub content: String,
}

/// Repository metadata for the prompt, deduplicated against the knowledge
/// base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeContext {
    pub status: CodeStatus,
    #[serde(default)]
    pub repo: Option<String>,
    pub tree_summary: String,
    pub config_excerpts: Vec<CodeSnippet>,
    pub recent_commits: Vec<String>,
    /// Topics deliberately omitted because the knowledge base covers them.
    /// Always a subset of `KnowledgeContext::covered_topics()`.
    pub skipped_topics: BTreeSet<String>,
    #[serde(default)]
    pub discovery_source: Option<RepoDiscovery>,
}

impl CodeContext {
    /// The "no repository discoverable" outcome. Not an error.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: CodeStatus::NoRepositoryFound,
            repo: None,
            tree_summary: String::new(),
            config_excerpts: Vec::new(),
            recent_commits: Vec::new(),
            skipped_topics: BTreeSet::new(),
            discovery_source: None,
        }
    }

    pub fn format_markdown(&self) -> String {
        match self.status {
            CodeStatus::NoRepositoryFound => {
                "## Repository\n\n(no repository reference discoverable)\n".to_string()
            }
            CodeStatus::Available => {
                let mut out = format!(
                    "## Repository: {}\n",
                    self.repo.as_deref().unwrap_or("(unknown)")
                );
                if !self.tree_summary.is_empty() {
                    out.push_str(&format!("\n### Structure\n\n```\n{}\n```\n", self.tree_summary));
                }
                for snippet in &self.config_excerpts {
                    out.push_str(&format!(
                        "\n### {}\n\n```\n{}\n```\n",
                        snippet.path, snippet.content
                    ));
                }
                if !self.recent_commits.is_empty() {
                    out.push_str("\n### Recent Changes\n\n");
                    for commit in &self.recent_commits {
                        out.push_str(&format!("- {commit}\n"));
                    }
                }
                if !self.skipped_topics.is_empty() {
                    let skipped: Vec<&str> =
                        self.skipped_topics.iter().map(String::as_str).collect();
                    out.push_str(&format!(
                        "\n_Omitted (covered by knowledge base): {}_\n",
                        skipped.join(", ")
                    ));
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(title: &str, tier: RetrievalTier, content: &str) -> KnowledgeDocument {
        KnowledgeDocument {
            id: title.to_lowercase().replace(' ', "-"),
            title: title.to_string(),
            tier,
            content: content.to_string(),
        }
    }

    #[test]
    fn covered_topics_come_only_from_attached_docs() {
        let knowledge = KnowledgeContext {
            space: "PROJ".into(),
            documents: vec![
                doc("Logical Architecture", RetrievalTier::Mandatory, "services and queues"),
                doc(
                    "Configuration Guide",
                    RetrievalTier::SkippedDuplicate,
                    "",
                ),
            ],
            is_new_entity: false,
            selection: None,
        };
        let topics = knowledge.covered_topics();
        assert!(topics.contains("architecture"));
        // Skipped duplicates do not contribute coverage
        assert!(!topics.contains("configuration"));
    }

    #[test]
    fn topics_match_in_content_too() {
        let knowledge = KnowledgeContext {
            space: "PROJ".into(),
            documents: vec![doc(
                "Project Passport",
                RetrievalTier::Mandatory,
                "Deployment runs through the shared pipeline. Configuration lives in env vars.",
            )],
            is_new_entity: false,
            selection: None,
        };
        let topics = knowledge.covered_topics();
        assert!(topics.contains("deployment"));
        assert!(topics.contains("configuration"));
        assert!(!topics.contains("testing"));
    }

    #[test]
    fn empty_code_context_reports_no_repository() {
        let code = CodeContext::empty();
        assert_eq!(code.status, CodeStatus::NoRepositoryFound);
        assert!(code.format_markdown().contains("no repository"));
    }

    #[test]
    fn selection_log_renders_fallback_reason() {
        let log = SelectionLog {
            candidates: vec![CandidateRecord {
                id: "d1".into(),
                title: "API Guide".into(),
                excerpt: String::new(),
            }],
            selected_ids: vec![],
            model: "test".into(),
            tokens_used: None,
            fallback_reason: Some("selection response unparsable".into()),
        };
        let rendered = log.format_markdown();
        assert!(rendered.contains("(none)"));
        assert!(rendered.contains("unparsable"));
    }
}
