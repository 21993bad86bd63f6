//! Mode routing.
//!
//! Routing is a pure function over the issue state, any stored analysis
//! baseline, and an optional operator override. It never performs I/O, so
//! every branch is directly testable.

use chrono::{DateTime, Utc};
use tracing::warn;

use planforge_config::WorkflowConfig;
use planforge_validation::AnalysisArtifact;

use crate::context::{CommentRecord, TrackerContext};

/// Operator-supplied mode override from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeOverride {
    Backlog,
    Refine,
    CreateStories,
}

/// The execution mode a run resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeDecision {
    /// Full context build, reasoning, validation, persistence.
    FullPipeline,
    /// Lightweight pre-planning analysis for items still in the backlog.
    BacklogAnalysis,
    /// Re-plan against a stored baseline using new assignee feedback.
    FeedbackIncorporation,
    /// Re-plan from a stored snapshot with operator-supplied feedback.
    Refine,
    /// Decompose an approved plan into child stories.
    StoryCreation,
}

impl ModeDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullPipeline => "full-pipeline",
            Self::BacklogAnalysis => "backlog-analysis",
            Self::FeedbackIncorporation => "feedback-incorporation",
            Self::Refine => "refine",
            Self::StoryCreation => "story-creation",
        }
    }
}

impl std::fmt::Display for ModeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The routing verdict plus the evidence that produced it.
#[derive(Debug)]
pub struct RouteOutcome {
    pub mode: ModeDecision,
    /// Stored analysis the mode builds on, when one informed the decision.
    pub baseline: Option<AnalysisArtifact>,
    /// Assignee comments newer than the baseline, oldest first.
    pub feedback_comments: Vec<CommentRecord>,
}

/// Resolve the execution mode for a run.
///
/// Precedence: operator override, then feedback detection against a stored
/// baseline, then status-based backlog detection, then the full pipeline.
pub fn route(
    issue: &TrackerContext,
    baseline: Option<AnalysisArtifact>,
    workflow: &WorkflowConfig,
    override_mode: Option<ModeOverride>,
) -> RouteOutcome {
    if let Some(forced) = override_mode {
        let mode = match forced {
            ModeOverride::Backlog => ModeDecision::BacklogAnalysis,
            ModeOverride::Refine => ModeDecision::Refine,
            ModeOverride::CreateStories => ModeDecision::StoryCreation,
        };
        return RouteOutcome {
            mode,
            baseline,
            feedback_comments: Vec::new(),
        };
    }

    if let Some(artifact) = baseline {
        let feedback = feedback_comments_since(issue, artifact.generated_at);
        if !feedback.is_empty() {
            return RouteOutcome {
                mode: ModeDecision::FeedbackIncorporation,
                baseline: Some(artifact),
                feedback_comments: feedback,
            };
        }
        if workflow.is_backlog_status(&issue.status) {
            return RouteOutcome {
                mode: ModeDecision::BacklogAnalysis,
                baseline: Some(artifact),
                feedback_comments: Vec::new(),
            };
        }
        return RouteOutcome {
            mode: ModeDecision::FullPipeline,
            baseline: Some(artifact),
            feedback_comments: Vec::new(),
        };
    }

    if workflow.is_backlog_status(&issue.status) {
        return RouteOutcome {
            mode: ModeDecision::BacklogAnalysis,
            baseline: None,
            feedback_comments: Vec::new(),
        };
    }

    if !workflow.is_ready_status(&issue.status) {
        warn!(
            key = %issue.key,
            status = %issue.status,
            "status not in configured backlog or ready sets, running full pipeline"
        );
    }

    RouteOutcome {
        mode: ModeDecision::FullPipeline,
        baseline: None,
        feedback_comments: Vec::new(),
    }
}

/// Assignee comments strictly newer than the stored analysis. Comments by
/// anyone else do not count as feedback.
fn feedback_comments_since(
    issue: &TrackerContext,
    generated_at: DateTime<Utc>,
) -> Vec<CommentRecord> {
    let mut feedback: Vec<CommentRecord> = issue
        .comments
        .iter()
        .filter(|c| c.created_at > generated_at)
        .filter(|c| is_assignee(issue, c))
        .cloned()
        .collect();
    feedback.sort_by_key(|c| c.created_at);
    feedback
}

fn is_assignee(issue: &TrackerContext, comment: &CommentRecord) -> bool {
    // Account ids are authoritative when both sides carry one; display
    // names are a fallback for servers that omit ids.
    match (&issue.assignee_account_id, &comment.author_account_id) {
        (Some(issue_id), Some(author_id)) => issue_id == author_id,
        _ => issue
            .assignee
            .as_deref()
            .is_some_and(|name| name.eq_ignore_ascii_case(&comment.author)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_item::WorkItemKey;
    use chrono::TimeZone;
    use planforge_validation::Complexity;

    fn issue(status: &str) -> TrackerContext {
        TrackerContext {
            key: WorkItemKey::parse("PROJ-7").unwrap(),
            summary: "Add rate limiting".into(),
            description: String::new(),
            status: status.into(),
            assignee: Some("Dana".into()),
            assignee_account_id: Some("acct-dana".into()),
            labels: vec![],
            parent: None,
            components: vec![],
            project_link: None,
            comments: vec![],
            fetched_at: Utc::now(),
        }
    }

    fn artifact(generated_at: DateTime<Utc>) -> AnalysisArtifact {
        AnalysisArtifact {
            understanding: "u".into(),
            concerns: "c".into(),
            analysis: "a".into(),
            work_plan: "w".into(),
            definition_of_ready: "d".into(),
            steps: vec![],
            readiness: vec![],
            questions: vec![],
            complexity: Complexity::M,
            model: "test".into(),
            generated_at,
            defects: vec![],
        }
    }

    fn comment(author: &str, account: Option<&str>, at: DateTime<Utc>) -> CommentRecord {
        CommentRecord {
            author: author.into(),
            author_account_id: account.map(String::from),
            body: "please adjust".into(),
            created_at: at,
        }
    }

    fn workflow() -> WorkflowConfig {
        WorkflowConfig::default()
    }

    #[test]
    fn override_wins_over_everything() {
        let mut item = issue("Backlog");
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        item.comments.push(comment(
            "Dana",
            Some("acct-dana"),
            baseline_time + chrono::Duration::hours(1),
        ));
        let outcome = route(
            &item,
            Some(artifact(baseline_time)),
            &workflow(),
            Some(ModeOverride::Refine),
        );
        assert_eq!(outcome.mode, ModeDecision::Refine);
        assert!(outcome.feedback_comments.is_empty());
    }

    #[test]
    fn backlog_status_without_artifact_routes_to_backlog_analysis() {
        let outcome = route(&issue("Backlog"), None, &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::BacklogAnalysis);
    }

    #[test]
    fn assignee_comment_after_baseline_routes_to_feedback() {
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut item = issue("Ready for AI");
        item.comments.push(comment(
            "Dana",
            Some("acct-dana"),
            baseline_time + chrono::Duration::hours(2),
        ));
        let outcome = route(&item, Some(artifact(baseline_time)), &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::FeedbackIncorporation);
        assert_eq!(outcome.feedback_comments.len(), 1);
    }

    #[test]
    fn assignee_comment_before_baseline_is_not_feedback() {
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut item = issue("Ready for AI");
        item.comments.push(comment(
            "Dana",
            Some("acct-dana"),
            baseline_time - chrono::Duration::hours(2),
        ));
        let outcome = route(&item, Some(artifact(baseline_time)), &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::FullPipeline);
    }

    #[test]
    fn non_assignee_comments_do_not_trigger_feedback() {
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut item = issue("Backlog");
        item.comments.push(comment(
            "Sam",
            Some("acct-sam"),
            baseline_time + chrono::Duration::hours(2),
        ));
        let outcome = route(&item, Some(artifact(baseline_time)), &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::BacklogAnalysis);
    }

    #[test]
    fn feedback_comments_come_back_oldest_first() {
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut item = issue("Ready for AI");
        item.comments.push(comment(
            "Dana",
            Some("acct-dana"),
            baseline_time + chrono::Duration::hours(5),
        ));
        item.comments.push(comment(
            "Dana",
            Some("acct-dana"),
            baseline_time + chrono::Duration::hours(1),
        ));
        let outcome = route(&item, Some(artifact(baseline_time)), &workflow(), None);
        assert_eq!(outcome.feedback_comments.len(), 2);
        assert!(
            outcome.feedback_comments[0].created_at < outcome.feedback_comments[1].created_at
        );
    }

    #[test]
    fn display_name_fallback_when_account_ids_absent() {
        let baseline_time = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut item = issue("Ready for AI");
        item.assignee_account_id = None;
        item.comments.push(comment(
            "dana",
            None,
            baseline_time + chrono::Duration::hours(1),
        ));
        let outcome = route(&item, Some(artifact(baseline_time)), &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::FeedbackIncorporation);
    }

    #[test]
    fn unknown_status_runs_full_pipeline() {
        let outcome = route(&issue("Weird State"), None, &workflow(), None);
        assert_eq!(outcome.mode, ModeDecision::FullPipeline);
    }
}
