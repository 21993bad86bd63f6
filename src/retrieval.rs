//! Two-stage knowledge retrieval.
//!
//! Tier 1 fetches the mandatory baseline documents by exact title. Tier 2
//! searches for supporting candidates and asks the reasoning model to pick
//! the few worth attaching. Every degradation path lands on a usable
//! `KnowledgeContext`; retrieval never fails a run on its own.

use serde::Deserialize;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use planforge_config::RetrievalConfig;
use planforge_llm::{Gateway, ReasoningRequest};
use planforge_validation::strip_code_fence;
use regex::Regex;

use crate::adapters::{WikiCandidate, WikiClient};
use crate::context::{
    CandidateRecord, KnowledgeContext, KnowledgeDocument, RetrievalTier, SelectionLog,
    TrackerContext,
};
use crate::prompts;

/// Runs the two-stage retrieval against a wiki space.
pub struct RetrievalFilter<'a> {
    wiki: &'a dyn WikiClient,
    gateway: &'a Gateway,
    config: &'a RetrievalConfig,
}

#[derive(Deserialize)]
struct SelectionResponse {
    selected_ids: Vec<String>,
}

impl<'a> RetrievalFilter<'a> {
    pub fn new(wiki: &'a dyn WikiClient, gateway: &'a Gateway, config: &'a RetrievalConfig) -> Self {
        Self {
            wiki,
            gateway,
            config,
        }
    }

    /// Build the knowledge context for one work item.
    pub async fn retrieve(&self, space: &str, issue: &TrackerContext) -> KnowledgeContext {
        let mut documents = Vec::new();

        let passport = self
            .fetch_mandatory(space, &self.config.passport_title, &self.config.passport_alternates)
            .await;
        let architecture = self
            .fetch_mandatory(
                space,
                &self.config.architecture_title,
                &self.config.architecture_alternates,
            )
            .await;

        if passport.is_none() && architecture.is_none() {
            info!(space, "no baseline documents, treating as new entity");
            return KnowledgeContext::new_entity(space);
        }

        documents.extend(passport);
        documents.extend(architecture);
        let mandatory_ids: HashSet<String> =
            documents.iter().map(|d| d.id.clone()).collect();

        let query = build_search_query(issue, self.config.keyword_limit);
        let candidates = match self
            .wiki
            .search_documents(space, &query, self.config.candidate_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(space, error = %e, "candidate search failed, attaching baseline only");
                return KnowledgeContext {
                    space: space.to_string(),
                    documents,
                    is_new_entity: false,
                    selection: None,
                };
            }
        };

        // Candidates that duplicate a mandatory document are recorded but
        // never offered to the selection call.
        let mut offered = Vec::new();
        for hit in candidates {
            if mandatory_ids.contains(&hit.id) {
                documents.push(KnowledgeDocument {
                    id: hit.id,
                    title: hit.title,
                    tier: RetrievalTier::SkippedDuplicate,
                    content: String::new(),
                });
            } else {
                offered.push(hit);
            }
        }

        if offered.is_empty() {
            debug!(space, "no non-duplicate candidates to select from");
            return KnowledgeContext {
                space: space.to_string(),
                documents,
                is_new_entity: false,
                selection: None,
            };
        }

        let selection = self.select(issue, &offered).await;
        let selected_ids: Vec<String> = selection
            .selected_ids
            .iter()
            .take(self.config.selection_limit)
            .cloned()
            .collect();

        for id in &selected_ids {
            let Some(hit) = offered.iter().find(|c| &c.id == id) else {
                continue;
            };
            match self.wiki.get_document(space, &hit.title).await {
                Ok(Some(doc)) => documents.push(KnowledgeDocument {
                    id: doc.id,
                    title: doc.title,
                    tier: RetrievalTier::Selected,
                    content: doc.content,
                }),
                Ok(None) => {
                    warn!(space, title = %hit.title, "selected document vanished before fetch");
                }
                Err(e) => {
                    warn!(space, title = %hit.title, error = %e, "selected document fetch failed");
                }
            }
        }

        KnowledgeContext {
            space: space.to_string(),
            documents,
            is_new_entity: false,
            selection: Some(SelectionLog {
                selected_ids,
                ..selection
            }),
        }
    }

    /// Try the canonical title, then each alternate in order. Fetch failures
    /// degrade to "absent": a flaky wiki must not block planning.
    async fn fetch_mandatory(
        &self,
        space: &str,
        title: &str,
        alternates: &[String],
    ) -> Option<KnowledgeDocument> {
        let mut titles: Vec<&str> = vec![title];
        titles.extend(alternates.iter().map(String::as_str));
        for candidate in titles {
            match self.wiki.get_document(space, candidate).await {
                Ok(Some(doc)) => {
                    debug!(space, title = candidate, "mandatory document found");
                    return Some(KnowledgeDocument {
                        id: doc.id,
                        title: doc.title,
                        tier: RetrievalTier::Mandatory,
                        content: doc.content,
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(space, title = candidate, error = %e, "mandatory fetch failed, treating as absent");
                }
            }
        }
        None
    }

    /// Ask the model which candidates to attach. Any failure, including an
    /// unparsable reply, degrades to selecting none with the reason logged.
    async fn select(&self, issue: &TrackerContext, offered: &[WikiCandidate]) -> SelectionLog {
        let candidates: Vec<CandidateRecord> = offered
            .iter()
            .map(|c| CandidateRecord {
                id: c.id.clone(),
                title: c.title.clone(),
                excerpt: c.excerpt.clone(),
            })
            .collect();

        let request = ReasoningRequest::new(
            prompts::SELECTION_SYSTEM_PROMPT,
            prompts::build_selection_prompt(issue, &candidates, self.config.selection_limit),
        )
        .with_temperature(self.config.selection_temperature)
        .with_max_tokens(self.config.selection_max_tokens);

        let result = match self.gateway.execute(request).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "selection call failed, selecting no supporting documents");
                return SelectionLog {
                    candidates,
                    selected_ids: Vec::new(),
                    model: self.gateway.backend_name().to_string(),
                    tokens_used: None,
                    fallback_reason: Some(format!("selection call failed: {e}")),
                };
            }
        };

        let offered_ids: HashSet<&str> = offered.iter().map(|c| c.id.as_str()).collect();
        let tokens_used = result.tokens_total();
        match parse_selection(&result.text) {
            Some(ids) => {
                let (valid, hallucinated): (Vec<String>, Vec<String>) = ids
                    .into_iter()
                    .partition(|id| offered_ids.contains(id.as_str()));
                if !hallucinated.is_empty() {
                    warn!(ids = ?hallucinated, "selection returned ids that were never offered");
                }
                SelectionLog {
                    candidates,
                    selected_ids: valid,
                    model: result.model,
                    tokens_used,
                    fallback_reason: None,
                }
            }
            None => {
                warn!("selection response unparsable, selecting no supporting documents");
                SelectionLog {
                    candidates,
                    selected_ids: Vec::new(),
                    model: result.model,
                    tokens_used,
                    fallback_reason: Some("selection response unparsable".to_string()),
                }
            }
        }
    }
}

/// Parse `{"selected_ids": [...]}`, tolerating a surrounding code fence.
fn parse_selection(raw: &str) -> Option<Vec<String>> {
    let body = strip_code_fence(raw.trim());
    serde_json::from_str::<SelectionResponse>(body)
        .ok()
        .map(|r| r.selected_ids)
}

static CAMEL_CASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:[A-Z][a-z0-9]*)+\b").expect("valid camel-case pattern")
});
static ACRONYM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]{2,}\b").expect("valid acronym pattern"));
static TECH_TERM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\w+(?:\.js|\.py|\.rs|DB|SQL|API)\b").expect("valid tech-term pattern")
});

/// Distinctive keywords from the item's summary, for the candidate search.
/// Falls back to the summary itself when nothing distinctive matches.
pub fn build_search_query(issue: &TrackerContext, limit: usize) -> String {
    let mut keywords: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    let text = format!("{} {}", issue.summary, issue.description);
    for pattern in [&*CAMEL_CASE, &*ACRONYM, &*TECH_TERM] {
        for hit in pattern.find_iter(&text) {
            let word = hit.as_str().to_string();
            if seen.insert(word.to_lowercase()) {
                keywords.push(word);
            }
        }
    }
    keywords.truncate(limit);
    if keywords.is_empty() {
        issue.summary.clone()
    } else {
        keywords.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_item::WorkItemKey;
    use chrono::Utc;

    fn issue(summary: &str, description: &str) -> TrackerContext {
        TrackerContext {
            key: WorkItemKey::parse("PROJ-1").unwrap(),
            summary: summary.into(),
            description: description.into(),
            status: "Ready".into(),
            assignee: None,
            assignee_account_id: None,
            labels: vec![],
            parent: None,
            components: vec![],
            project_link: None,
            comments: vec![],
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn query_prefers_distinctive_terms() {
        let item = issue(
            "Integrate PaymentGateway with the billing API",
            "Uses PostgresDB for idempotency keys",
        );
        let query = build_search_query(&item, 5);
        assert!(query.contains("PaymentGateway"));
        assert!(query.contains("API"));
        assert!(query.contains("PostgresDB"));
    }

    #[test]
    fn query_caps_keyword_count() {
        let item = issue(
            "FooBar BazQux AlphaBeta GammaDelta EpsilonZeta EtaTheta",
            "",
        );
        let query = build_search_query(&item, 3);
        assert_eq!(query.split_whitespace().count(), 3);
    }

    #[test]
    fn query_falls_back_to_summary() {
        let item = issue("fix the login page", "");
        assert_eq!(build_search_query(&item, 5), "fix the login page");
    }

    #[test]
    fn selection_parse_tolerates_fences() {
        let fenced = "```json\n{\"selected_ids\": [\"d1\", \"d2\"]}\n```";
        assert_eq!(
            parse_selection(fenced).unwrap(),
            vec!["d1".to_string(), "d2".to_string()]
        );
    }

    #[test]
    fn selection_parse_rejects_prose() {
        assert!(parse_selection("I would pick documents d1 and d2.").is_none());
    }

    #[test]
    fn duplicate_keywords_are_collapsed() {
        let item = issue("RateLimiter RateLimiter RATELIMITER", "");
        let query = build_search_query(&item, 5);
        assert_eq!(query.split_whitespace().count(), 1);
    }
}
