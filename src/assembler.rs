//! Context assembly stages 2 through 4.
//!
//! Stage 2 (knowledge retrieval) lives in [`crate::retrieval`]; this module
//! derives the knowledge space, builds the optional code context, and
//! aggregates everything into the prompt-ready blob. Code context is best
//! effort: any fetch failure degrades to a smaller context with a warning,
//! never a failed run.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use planforge_config::CodeHostConfig;

use crate::adapters::CodeHostClient;
use crate::context::{
    CodeContext, CodeSnippet, CodeStatus, KnowledgeContext, RepoDiscovery, TrackerContext,
};
use crate::prompts;

static SPACE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*$").expect("valid space-label pattern"));
static REPO_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"github\.com[/:]([\w.-]+)/([\w.-]+)").expect("valid repo-ref pattern")
});

/// Config files offered as excerpts, with the knowledge topic each covers.
/// A topic already covered by the knowledge base suppresses its files.
const CONFIG_CANDIDATES: &[(&str, &[&str])] = &[
    (
        "configuration",
        &["Cargo.toml", "package.json", "pyproject.toml", "go.mod"],
    ),
    (
        "deployment",
        &["Dockerfile", "docker-compose.yml", ".github/workflows/ci.yml"],
    ),
];

/// Derive the knowledge space for a work item.
///
/// Priority: the explicit project link field, then the first label shaped
/// like a space key, then the key's project code.
pub fn derive_space(issue: &TrackerContext) -> String {
    if let Some(link) = &issue.project_link {
        let trimmed = link.trim();
        if !trimmed.is_empty() {
            // Links may be bare space keys or wiki URLs ending in the key.
            let tail = trimmed
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(trimmed);
            return tail.to_uppercase();
        }
    }
    if let Some(label) = issue.labels.iter().find(|l| SPACE_LABEL.is_match(l)) {
        return label.to_uppercase();
    }
    issue.key.project().to_string()
}

/// Find a repository reference, searching the item description first and
/// then the mandatory knowledge documents in retrieval order.
pub fn discover_repo(
    issue: &TrackerContext,
    knowledge: &KnowledgeContext,
) -> Option<(String, RepoDiscovery)> {
    if let Some(repo) = extract_repo(&issue.description) {
        return Some((repo, RepoDiscovery::ItemDescription));
    }
    for doc in knowledge.mandatory_documents() {
        if let Some(repo) = extract_repo(&doc.content) {
            return Some((
                repo,
                RepoDiscovery::KnowledgeDocument {
                    title: doc.title.clone(),
                },
            ));
        }
    }
    None
}

fn extract_repo(text: &str) -> Option<String> {
    REPO_REF.captures(text).map(|caps| {
        let owner = &caps[1];
        let repo = caps[2].trim_end_matches(".git");
        format!("{owner}/{repo}")
    })
}

/// Builds the code context for stage 3.
pub struct CodeContextBuilder<'a> {
    code_host: &'a dyn CodeHostClient,
    config: &'a CodeHostConfig,
}

impl<'a> CodeContextBuilder<'a> {
    pub fn new(code_host: &'a dyn CodeHostClient, config: &'a CodeHostConfig) -> Self {
        Self { code_host, config }
    }

    /// Assemble the code context, deduplicated against what the knowledge
    /// base already covers. No discoverable repository yields
    /// [`CodeContext::empty`], which is an ordinary outcome.
    pub async fn build(
        &self,
        issue: &TrackerContext,
        knowledge: &KnowledgeContext,
    ) -> CodeContext {
        let Some((repo, discovery)) = discover_repo(issue, knowledge) else {
            debug!(key = %issue.key, "no repository reference discoverable");
            return CodeContext::empty();
        };
        let Some((owner, name)) = repo.split_once('/') else {
            return CodeContext::empty();
        };

        let covered = knowledge.covered_topics();
        let mut skipped_topics = BTreeSet::new();

        let tree_summary = if covered.contains("architecture") {
            skipped_topics.insert("architecture".to_string());
            String::new()
        } else {
            match self
                .code_host
                .get_tree(owner, name, self.config.tree_entry_limit)
                .await
            {
                Ok(paths) => paths.join("\n"),
                Err(e) => {
                    warn!(repo = %repo, error = %e, "tree fetch failed, omitting structure");
                    String::new()
                }
            }
        };

        let mut config_excerpts = Vec::new();
        for (topic, files) in CONFIG_CANDIDATES {
            if covered.contains(*topic) {
                skipped_topics.insert((*topic).to_string());
                continue;
            }
            for path in *files {
                match self.code_host.get_file(owner, name, path).await {
                    Ok(Some(content)) => config_excerpts.push(CodeSnippet {
                        path: (*path).to_string(),
                        content,
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(repo = %repo, path, error = %e, "config fetch failed, skipping file");
                    }
                }
            }
        }

        let recent_commits = match self
            .code_host
            .list_recent_commits(owner, name, self.config.recent_commits)
            .await
        {
            Ok(commits) => commits,
            Err(e) => {
                warn!(repo = %repo, error = %e, "commit fetch failed, omitting recent changes");
                Vec::new()
            }
        };

        CodeContext {
            status: CodeStatus::Available,
            repo: Some(repo),
            tree_summary,
            config_excerpts,
            recent_commits,
            skipped_topics,
            discovery_source: Some(discovery),
        }
    }
}

/// Stage 4: compose the prompt-ready context blob. Pure and deterministic;
/// section order is fixed (work item, knowledge, rules, repository) so
/// snapshots replay identically.
pub fn build_prompt_context(
    issue: &TrackerContext,
    knowledge: &KnowledgeContext,
    code: &CodeContext,
) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        issue.format_markdown(),
        knowledge.format_markdown(),
        prompts::WORKFLOW_RULES,
        code.format_markdown(),
    )
}
