//! Prompt templates.
//!
//! The five-section layout is load-bearing: the validator splits on these
//! exact headings, so changes here must move in lockstep with
//! `planforge-validation`.

use crate::context::{CandidateRecord, TrackerContext};

/// System prompt for the planning call.
pub const SYSTEM_PROMPT: &str = "\
You are a senior software engineer producing an implementation plan for a \
tracked work item. You write for the engineer who will execute the plan, \
not for a manager. Be specific: name files, modules, and acceptance \
criteria. Never invent facts about the codebase; when information is \
missing, say so explicitly with [DATA MISSING: <what>].

Respond in exactly these sections:

## 1. Understanding
## 2. Concerns
## 3. Analysis
## 4. Work Plan
## 5. Definition of Ready

The Work Plan lists steps as `- [ ] **Step N:** <title>` with a layer tag \
(BE, FE, INFRA, DB, QA, DOCS, or GEN), affected files, and an acceptance \
criterion per step. The Definition of Ready lists gates as checkboxes; \
mark gates that must be resolved before work starts as **BLOCKING**.";

/// System prompt for the tier-2 document selection call.
pub const SELECTION_SYSTEM_PROMPT: &str = "\
You select which knowledge-base documents are relevant to a work item. \
Reply with JSON only, no prose: {\"selected_ids\": [\"id\", ...]}. \
Select only documents that would change how the work is planned. An empty \
list is a valid answer.";

/// Workflow rules appended to every assembled context.
pub const WORKFLOW_RULES: &str = "\
## Workflow Rules

- Estimate overall complexity as one of S, M, L, XL.
- Keep the plan executable without further clarification where possible.
- Order steps so each depends only on earlier steps.
- Flag every assumption that a human should confirm.
";

/// User prompt for the planning call: the assembled context plus the ask.
pub fn build_user_prompt(prompt_context: &str) -> String {
    format!(
        "{}\n\n---\n\nProduce the implementation plan for the work item above.\n",
        prompt_context.trim_end()
    )
}

/// User prompt for the backlog pre-analysis call. No Work Plan is asked
/// for; the item is not ready to be planned.
pub fn build_backlog_prompt(prompt_context: &str) -> String {
    format!(
        "{}\n\n---\n\nThis item is still in the backlog. Produce sections 1 through 3 \
         and section 5 only. In place of a work plan, list the open questions \
         that block planning, each as [DATA MISSING: <what>] where facts are \
         absent. Do not produce a Work Plan section.\n",
        prompt_context.trim_end()
    )
}

/// User prompt for feedback incorporation: prior plan plus the new
/// assignee comments, asking for a revised plan.
pub fn build_feedback_prompt(prompt_context: &str, prior_plan: &str, feedback: &str) -> String {
    format!(
        "{}\n\n---\n\n## Previous Plan\n\n{}\n\n## Assignee Feedback\n\n{}\n\n---\n\n\
         Revise the plan to address every feedback point. Keep unaffected \
         steps stable, renumbering only where ordering changes. Respond with \
         the full five-section layout.\n",
        prompt_context.trim_end(),
        prior_plan.trim(),
        feedback.trim()
    )
}

/// User prompt for the tier-2 selection call.
pub fn build_selection_prompt(
    issue: &TrackerContext,
    candidates: &[CandidateRecord],
    limit: usize,
) -> String {
    let mut out = format!(
        "Work item {}: {}\n\n{}\n\nCandidate documents:\n",
        issue.key, issue.summary, issue.description
    );
    for candidate in candidates {
        out.push_str(&format!(
            "- id: {} title: {}",
            candidate.id, candidate.title
        ));
        if !candidate.excerpt.is_empty() {
            out.push_str(&format!(" excerpt: {}", candidate.excerpt));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "\nSelect at most {limit} documents worth reading before planning this item.\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_item::WorkItemKey;
    use chrono::Utc;

    fn issue() -> TrackerContext {
        TrackerContext {
            key: WorkItemKey::parse("PROJ-3").unwrap(),
            summary: "Add rate limiting".into(),
            description: "Public API needs protection".into(),
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
    fn selection_prompt_lists_all_candidates_and_the_cap() {
        let candidates = vec![
            CandidateRecord {
                id: "d1".into(),
                title: "API Guide".into(),
                excerpt: "throttling".into(),
            },
            CandidateRecord {
                id: "d2".into(),
                title: "Runbook".into(),
                excerpt: String::new(),
            },
        ];
        let prompt = build_selection_prompt(&issue(), &candidates, 5);
        assert!(prompt.contains("id: d1"));
        assert!(prompt.contains("id: d2"));
        assert!(prompt.contains("at most 5"));
    }

    #[test]
    fn backlog_prompt_suppresses_the_work_plan() {
        let prompt = build_backlog_prompt("context");
        assert!(prompt.contains("Do not produce a Work Plan"));
    }

    #[test]
    fn feedback_prompt_carries_prior_plan_and_comments() {
        let prompt = build_feedback_prompt("ctx", "- [ ] **Step 1:** old", "split step 1");
        assert!(prompt.contains("Previous Plan"));
        assert!(prompt.contains("old"));
        assert!(prompt.contains("split step 1"));
    }
}
