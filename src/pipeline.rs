//! Run orchestration.
//!
//! One `Pipeline::run` call handles a single work item end to end: route
//! the mode, assemble context, call the model, validate, persist. Artifacts
//! are written as soon as they exist so a failed run still leaves the
//! context and prompt on disk for inspection.

use camino::Utf8PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use planforge_config::Config;
use planforge_llm::{Gateway, ReasoningRequest};
use planforge_utils::{BuildStage, ContextBuildError, InputError, PlanForgeError};
use planforge_validation::{
    AnalysisArtifact, Complexity, ResponseValidator, ScoringContext, ValidationOutcome,
    ValidationProfile, flag_low_confidence, score_all,
};

use crate::adapters::{CodeHostClient, TrackerClient, WikiClient};
use crate::assembler::{self, CodeContextBuilder};
use crate::context::TrackerContext;
use crate::prompts;
use crate::retrieval::RetrievalFilter;
use crate::router::{self, ModeDecision, ModeOverride, RouteOutcome};
use crate::snapshot::ExecutionSnapshot;
use crate::store::ArtifactStore;
use crate::work_item::WorkItemKey;

/// Per-run options from the CLI.
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    pub mode_override: Option<ModeOverride>,
    /// Operator-supplied feedback text for refine runs.
    pub feedback: Option<String>,
    /// Suppress the status transition even when config allows it.
    pub no_transition: bool,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunReport {
    pub key: WorkItemKey,
    pub mode: ModeDecision,
    pub complexity: Option<Complexity>,
    pub mean_confidence: Option<f64>,
    /// Steps whose confidence fell below the configured threshold.
    pub flagged_steps: Vec<u32>,
    pub plan_path: Option<Utf8PathBuf>,
    pub analysis_path: Option<Utf8PathBuf>,
    pub warnings: Vec<String>,
    pub comments_posted: u32,
    pub transitioned: bool,
}

impl RunReport {
    fn new(key: WorkItemKey, mode: ModeDecision) -> Self {
        Self {
            key,
            mode,
            complexity: None,
            mean_confidence: None,
            flagged_steps: Vec::new(),
            plan_path: None,
            analysis_path: None,
            warnings: Vec::new(),
            comments_posted: 0,
            transitioned: false,
        }
    }
}

pub struct Pipeline {
    tracker: Arc<dyn TrackerClient>,
    wiki: Arc<dyn WikiClient>,
    code_host: Arc<dyn CodeHostClient>,
    gateway: Gateway,
    store: ArtifactStore,
    config: Config,
}

impl Pipeline {
    pub fn new(
        tracker: Arc<dyn TrackerClient>,
        wiki: Arc<dyn WikiClient>,
        code_host: Arc<dyn CodeHostClient>,
        gateway: Gateway,
        store: ArtifactStore,
        config: Config,
    ) -> Self {
        Self {
            tracker,
            wiki,
            code_host,
            gateway,
            store,
            config,
        }
    }

    pub async fn run(
        &self,
        key: &WorkItemKey,
        options: &RunOptions,
    ) -> Result<RunReport, PlanForgeError> {
        let issue = self
            .tracker
            .get_issue(key)
            .await
            .map_err(|cause| ContextBuildError {
                stage: BuildStage::TrackerEnrichment,
                cause,
            })?;

        // Lock before the baseline read so a concurrent run cannot change
        // the routing inputs between read and dispatch.
        let _lock = self.store.lock(key)?;
        let baseline = self.store.load_analysis(key)?.map(|stored| stored.artifact);
        let route = router::route(&issue, baseline, &self.config.workflow, options.mode_override);
        info!(%key, mode = %route.mode, status = %issue.status, "mode resolved");

        match route.mode {
            ModeDecision::FullPipeline => self.run_full(key, &issue, route.mode).await,
            ModeDecision::BacklogAnalysis => self.run_backlog(key, &issue, route.mode).await,
            ModeDecision::FeedbackIncorporation => {
                self.run_feedback(key, &issue, route, options).await
            }
            ModeDecision::Refine => self.run_refine(key, &issue, route, options).await,
            ModeDecision::StoryCreation => self.run_story_creation(key, route).await,
        }
    }

    /// Full pipeline: context build, plan, validate strictly, persist.
    async fn run_full(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
        mode: ModeDecision,
    ) -> Result<RunReport, PlanForgeError> {
        let snapshot = self.assemble(key, issue).await?;
        let prompt = prompts::build_user_prompt(&snapshot.prompt_context);
        self.finish_planning_run(key, issue, mode, &snapshot, &prompt, ValidationProfile::FullPipeline)
            .await
    }

    /// Backlog analysis: same context build, lenient validation, no plan
    /// requirement. Defects are recorded, never fatal.
    async fn run_backlog(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
        mode: ModeDecision,
    ) -> Result<RunReport, PlanForgeError> {
        let snapshot = self.assemble(key, issue).await?;
        let prompt = prompts::build_backlog_prompt(&snapshot.prompt_context);
        self.finish_planning_run(
            key,
            issue,
            mode,
            &snapshot,
            &prompt,
            ValidationProfile::BacklogAnalysis,
        )
        .await
    }

    /// Feedback incorporation: replay the stored snapshot with the new
    /// assignee comments, then optionally transition the issue.
    async fn run_feedback(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
        route: RouteOutcome,
        options: &RunOptions,
    ) -> Result<RunReport, PlanForgeError> {
        let baseline = route.baseline.ok_or_else(|| InputError::MissingBaseline {
            mode: route.mode.to_string(),
            key: key.to_string(),
        })?;
        let stored = self
            .store
            .load_snapshot(key)?
            .ok_or_else(|| InputError::MissingBaseline {
                mode: route.mode.to_string(),
                key: key.to_string(),
            })?;

        let feedback = route
            .feedback_comments
            .iter()
            .map(|c| format!("- {} ({}): {}", c.author, c.created_at.to_rfc3339(), c.body))
            .collect::<Vec<_>>()
            .join("\n");
        let snapshot = stored.with_feedback(feedback.clone());
        self.store.write_snapshot(key, &snapshot)?;
        let prompt =
            prompts::build_feedback_prompt(&snapshot.prompt_context, &baseline.work_plan, &feedback);

        let mut report = self
            .finish_planning_run(
                key,
                issue,
                route.mode,
                &snapshot,
                &prompt,
                ValidationProfile::FullPipeline,
            )
            .await?;

        // Only this mode may move the issue, and only when every blocking
        // readiness gate is resolved.
        let revised = self.store.load_analysis(key)?.map(|s| s.artifact);
        let gates_clear = revised.as_ref().is_some_and(AnalysisArtifact::all_blocking_resolved);
        if self.config.workflow.auto_transition && !options.no_transition {
            if gates_clear {
                self.tracker
                    .transition_status(key, &self.config.workflow.transition_target)
                    .await?;
                info!(%key, target = %self.config.workflow.transition_target, "issue transitioned");
                report.transitioned = true;
            } else {
                report
                    .warnings
                    .push("transition skipped: unresolved blocking readiness gates".to_string());
            }
        }
        Ok(report)
    }

    /// Refine: operator feedback against the stored snapshot, no re-fetch
    /// of any external service beyond the issue itself.
    async fn run_refine(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
        route: RouteOutcome,
        options: &RunOptions,
    ) -> Result<RunReport, PlanForgeError> {
        let feedback = options
            .feedback
            .clone()
            .ok_or_else(|| InputError::MissingBaseline {
                mode: route.mode.to_string(),
                key: key.to_string(),
            })?;
        let stored = self
            .store
            .load_snapshot(key)?
            .ok_or_else(|| InputError::MissingBaseline {
                mode: route.mode.to_string(),
                key: key.to_string(),
            })?;

        let prior_plan = route
            .baseline
            .map(|a| a.work_plan)
            .unwrap_or_default();
        let snapshot = stored.with_feedback(feedback.clone());
        self.store.write_snapshot(key, &snapshot)?;
        let prompt = prompts::build_feedback_prompt(&snapshot.prompt_context, &prior_plan, &feedback);
        self.finish_planning_run(
            key,
            issue,
            route.mode,
            &snapshot,
            &prompt,
            ValidationProfile::FullPipeline,
        )
        .await
    }

    /// Story creation: decompose the stored plan into tracker comments.
    /// No reasoning call; the plan must already exist and be clean.
    async fn run_story_creation(
        &self,
        key: &WorkItemKey,
        route: RouteOutcome,
    ) -> Result<RunReport, PlanForgeError> {
        let artifact = route.baseline.ok_or_else(|| InputError::MissingBaseline {
            mode: route.mode.to_string(),
            key: key.to_string(),
        })?;
        if artifact.steps.is_empty() {
            return Err(InputError::MissingBaseline {
                mode: route.mode.to_string(),
                key: key.to_string(),
            }
            .into());
        }

        let mut report = RunReport::new(key.clone(), route.mode);
        let threshold = self.config.workflow.confidence_threshold;
        let decomposition = render_decomposition(&artifact, threshold);
        self.tracker.add_comment(key, &decomposition).await?;
        report.comments_posted += 1;

        if !artifact.questions.is_empty() {
            let questions = render_questions(&artifact);
            self.tracker.add_comment(key, &questions).await?;
            report.comments_posted += 1;
        }

        report.complexity = Some(artifact.complexity);
        report.flagged_steps = flag_low_confidence(&artifact.steps, threshold);
        Ok(report)
    }

    /// Stages 1 through 4 plus persistence of the context artifacts.
    async fn assemble(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
    ) -> Result<ExecutionSnapshot, PlanForgeError> {
        let space = assembler::derive_space(issue);
        let retrieval = RetrievalFilter::new(self.wiki.as_ref(), &self.gateway, &self.config.retrieval);
        let knowledge = retrieval.retrieve(&space, issue).await;

        let code = CodeContextBuilder::new(self.code_host.as_ref(), &self.config.code_host)
            .build(issue, &knowledge)
            .await;

        let prompt_context = assembler::build_prompt_context(issue, &knowledge, &code);
        if let Some(selection) = &knowledge.selection {
            self.store.write_selection(key, &selection.format_markdown())?;
        }
        self.store.write_context(key, &prompt_context)?;

        let snapshot =
            ExecutionSnapshot::new(key.clone(), issue.clone(), knowledge, code, prompt_context);
        self.store.write_snapshot(key, &snapshot)?;
        Ok(snapshot)
    }

    /// The shared back half of every planning mode: prompt, call, validate,
    /// score, persist, report.
    async fn finish_planning_run(
        &self,
        key: &WorkItemKey,
        issue: &TrackerContext,
        mode: ModeDecision,
        snapshot: &ExecutionSnapshot,
        prompt: &str,
        profile: ValidationProfile,
    ) -> Result<RunReport, PlanForgeError> {
        // The prompt goes to disk before the call so a crash mid-request
        // still leaves the exact question asked.
        self.store.write_prompt(key, prompt)?;

        let reasoning = &self.config.reasoning;
        let request = ReasoningRequest::new(prompts::SYSTEM_PROMPT, prompt)
            .with_temperature(reasoning.temperature)
            .with_max_tokens(reasoning.max_tokens)
            .with_timeout(reasoning.request_timeout());
        let result = self.gateway.execute(request).await?;
        self.store.write_reasoning(key, &result.text)?;

        let mut report = RunReport::new(key.clone(), mode);
        let outcome = ResponseValidator.validate(&result.text, &result.model, profile);
        let mut artifact = match outcome {
            ValidationOutcome::Parsed(artifact) => artifact,
            ValidationOutcome::PartiallyParsed(artifact, defects) => {
                for defect in &defects {
                    warn!(%key, rule = %defect.rule, detail = %defect.detail, "validation defect");
                    report.warnings.push(format!("{}: {}", defect.rule, defect.detail));
                }
                artifact
            }
            ValidationOutcome::Unparsable { raw } => {
                // Raw response is already on disk as the reasoning artifact.
                return Err(PlanForgeError::Unparsable { raw_len: raw.len() });
            }
        };

        let scoring = ScoringContext {
            repo_tree: (!snapshot.code.tree_summary.is_empty())
                .then_some(snapshot.code.tree_summary.as_str()),
            has_knowledge_docs: snapshot.knowledge.attached_documents().next().is_some(),
        };
        let mean = score_all(&mut artifact.steps, scoring);
        let threshold = self.config.workflow.confidence_threshold;
        report.flagged_steps = flag_low_confidence(&artifact.steps, threshold);
        report.mean_confidence = Some(mean);
        report.complexity = Some(artifact.complexity);

        // Analysis is persisted even when defects are fatal so the next
        // run and the operator can see what went wrong.
        report.analysis_path = Some(self.store.write_analysis(key, &artifact)?);

        if profile.is_fatal(&artifact.defects) {
            return Err(PlanForgeError::FatalDefects {
                defects: artifact.defects,
            });
        }

        if profile.requires_plan() {
            report.plan_path = Some(self.store.write_plan(key, &render_plan(issue, &artifact))?);
        }
        Ok(report)
    }
}

/// Presentation form of a validated plan.
fn render_plan(issue: &TrackerContext, artifact: &AnalysisArtifact) -> String {
    let mut out = format!(
        "# Implementation Plan: {} {}\n\n**Complexity:** {:?}  \n**Model:** {}  \n**Generated:** {}\n\n",
        issue.key,
        issue.summary,
        artifact.complexity,
        artifact.model,
        artifact.generated_at.to_rfc3339(),
    );
    out.push_str(&format!("## Work Plan\n\n{}\n\n", artifact.work_plan.trim()));
    out.push_str(&format!(
        "## Definition of Ready\n\n{}\n",
        artifact.definition_of_ready.trim()
    ));
    out
}

/// Tracker comment decomposing the plan into candidate child stories.
fn render_decomposition(artifact: &AnalysisArtifact, threshold: f64) -> String {
    let mut out = String::from(
        "## Technical Decomposition\n\n| Step | Layer | Title | Files | Acceptance |\n|---|---|---|---|---|\n",
    );
    for step in &artifact.steps {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            step.order,
            step.layer,
            step.title,
            step.files.join(", "),
            step.acceptance.replace('|', "\\|"),
        ));
    }

    out.push_str("\n## Executor Rationale\n\n");
    out.push_str(&format!(
        "Overall complexity {:?}; {} steps.\n",
        artifact.complexity,
        artifact.steps.len()
    ));
    let flagged = flag_low_confidence(&artifact.steps, threshold);
    if flagged.is_empty() {
        out.push_str("All steps meet the confidence threshold for autonomous execution.\n");
    } else {
        let listed: Vec<String> = flagged.iter().map(|n| format!("Step {n}")).collect();
        out.push_str(&format!(
            "Below confidence threshold, needs human review: {}.\n",
            listed.join(", ")
        ));
    }
    out
}

/// Tracker comment listing the open clarification questions.
fn render_questions(artifact: &AnalysisArtifact) -> String {
    let mut out = String::from("## Clarification Questions\n\n");
    for question in &artifact.questions {
        out.push_str(&format!("- {}", question.question));
        if !question.context.is_empty() {
            out.push_str(&format!(" _({})_", question.context));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use planforge_validation::{Layer, PlanStep};

    fn step(order: u32, confidence: f64) -> PlanStep {
        PlanStep {
            order,
            title: format!("Step {order}"),
            description: String::new(),
            layer: Layer::BE,
            files: vec!["src/lib.rs".into()],
            acceptance: "tests pass | green".into(),
            depends_on: vec![],
            confidence,
            flags: vec![],
        }
    }

    fn artifact_with_steps(steps: Vec<PlanStep>) -> AnalysisArtifact {
        AnalysisArtifact {
            understanding: "u".into(),
            concerns: "c".into(),
            analysis: "a".into(),
            work_plan: "w".into(),
            definition_of_ready: "d".into(),
            steps,
            readiness: vec![],
            questions: vec![],
            complexity: Complexity::M,
            model: "test".into(),
            generated_at: Utc::now(),
            defects: vec![],
        }
    }

    #[test]
    fn decomposition_escapes_pipes_and_lists_every_step() {
        let artifact = artifact_with_steps(vec![step(1, 0.9), step(2, 0.4)]);
        let comment = render_decomposition(&artifact, 0.7);
        assert!(comment.contains("| 1 | BE |"));
        assert!(comment.contains("| 2 | BE |"));
        assert!(comment.contains("tests pass \\| green"));
        assert!(comment.contains("Step 2"));
        assert!(comment.contains("human review"));
    }

    #[test]
    fn decomposition_notes_when_all_steps_clear_threshold() {
        let artifact = artifact_with_steps(vec![step(1, 0.9)]);
        let comment = render_decomposition(&artifact, 0.7);
        assert!(comment.contains("autonomous execution"));
    }

    #[test]
    fn plan_rendering_carries_both_sections() {
        let artifact = artifact_with_steps(vec![]);
        let issue = TrackerContext {
            key: WorkItemKey::parse("PROJ-1").unwrap(),
            summary: "Do the thing".into(),
            description: String::new(),
            status: "Ready".into(),
            assignee: None,
            assignee_account_id: None,
            labels: vec![],
            parent: None,
            components: vec![],
            project_link: None,
            comments: vec![],
            fetched_at: Utc::now(),
        };
        let plan = render_plan(&issue, &artifact);
        assert!(plan.contains("## Work Plan"));
        assert!(plan.contains("## Definition of Ready"));
    }
}
