//! End-to-end pipeline runs per mode, with every service faked.

mod support;

use chrono::{Duration, Utc};
use std::sync::Arc;

use planforge::adapters::{CodeHostClient, TrackerClient, WikiClient};
use planforge::pipeline::{Pipeline, RunOptions};
use planforge::router::{ModeDecision, ModeOverride};
use planforge::snapshot::ExecutionSnapshot;
use planforge::store::ArtifactStore;
use planforge::{CodeContext, CommentRecord, KnowledgeContext, WorkItemKey};
use planforge_config::Config;
use planforge_llm::{Gateway, ReasoningBackend, RetryPolicy};
use planforge_utils::PlanForgeError;
use planforge_validation::{
    AnalysisArtifact, ClarificationQuestion, Complexity, Layer, PlanStep,
};

use support::{FakeCodeHost, FakeTracker, FakeWiki, ScriptedBackend, sample_issue, valid_response};

struct Harness {
    tracker: Arc<FakeTracker>,
    pipeline: Pipeline,
    store: ArtifactStore,
    _output: tempfile::TempDir,
}

fn harness(
    tracker: FakeTracker,
    backend: ScriptedBackend,
    mutate_config: impl FnOnce(&mut Config),
) -> Harness {
    let output = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.output.dir = output.path().to_str().unwrap().to_string();
    mutate_config(&mut config);

    let tracker = Arc::new(tracker);
    let gateway = Gateway::new(
        Arc::new(backend) as Arc<dyn ReasoningBackend>,
        RetryPolicy::default(),
    );
    let store = ArtifactStore::open(config.output.dir.as_str()).unwrap();
    let pipeline = Pipeline::new(
        tracker.clone() as Arc<dyn TrackerClient>,
        Arc::new(FakeWiki::default()) as Arc<dyn WikiClient>,
        Arc::new(FakeCodeHost::default()) as Arc<dyn CodeHostClient>,
        gateway,
        ArtifactStore::open(config.output.dir.as_str()).unwrap(),
        config,
    );
    Harness {
        tracker,
        pipeline,
        store,
        _output: output,
    }
}

fn key() -> WorkItemKey {
    WorkItemKey::parse("PROJ-5").unwrap()
}

fn seeded_artifact() -> AnalysisArtifact {
    AnalysisArtifact {
        understanding: "u".into(),
        concerns: "c".into(),
        analysis: "a".into(),
        work_plan: "- [ ] **Step 1:** Build it".into(),
        definition_of_ready: "- [x] ready".into(),
        steps: vec![PlanStep {
            order: 1,
            title: "Build it".into(),
            description: "Build the limiter".into(),
            layer: Layer::BE,
            files: vec!["src/limiter.rs".into()],
            acceptance: "429 over the limit".into(),
            depends_on: vec![],
            confidence: 0.9,
            flags: vec![],
        }],
        readiness: vec![],
        questions: vec![ClarificationQuestion {
            question: "What is the SLA target?".into(),
            context: String::new(),
        }],
        complexity: Complexity::M,
        model: "scripted".into(),
        generated_at: Utc::now() - Duration::hours(2),
        defects: vec![],
    }
}

fn seed_snapshot(store: &ArtifactStore, issue: &planforge::TrackerContext) {
    let snapshot = ExecutionSnapshot::new(
        key(),
        issue.clone(),
        KnowledgeContext::new_entity("PROJ"),
        CodeContext::empty(),
        "## Work Item: PROJ-5\n".into(),
    );
    store.write_snapshot(&key(), &snapshot).unwrap();
}

#[tokio::test]
async fn full_pipeline_persists_every_artifact() {
    let issue = sample_issue("PROJ-5", "Ready for Work");
    let h = harness(
        FakeTracker::new(issue),
        ScriptedBackend::replying(vec![&valid_response()]),
        |_| {},
    );

    let report = h.pipeline.run(&key(), &RunOptions::default()).await.unwrap();

    assert_eq!(report.mode, ModeDecision::FullPipeline);
    assert_eq!(report.complexity, Some(Complexity::M));
    assert!(report.plan_path.is_some());
    assert!(report.analysis_path.is_some());

    let dir = h.store.key_dir(&key());
    for artifact in [
        "PROJ-5_context.md",
        "PROJ-5_prompt.md",
        "PROJ-5_reasoning.md",
        "PROJ-5_plan.md",
        "PROJ-5_analysis.json",
        "PROJ-5_snapshot.json",
        "PROJ-5_snapshot.json.blake3",
    ] {
        assert!(dir.join(artifact).exists(), "missing {artifact}");
    }

    // The stored snapshot round-trips through the checksum check.
    let reloaded = h.store.load_snapshot(&key()).unwrap().unwrap();
    assert_eq!(reloaded.key, key());
}

#[tokio::test]
async fn backlog_mode_tolerates_a_missing_work_plan() {
    let issue = sample_issue("PROJ-5", "Backlog");
    let no_plan = "\
## 1. Understanding\n\nStill vague.\n\n\
## 2. Concerns\n\n- [DATA MISSING: owning team]\n\n\
## 3. Analysis\n\nNeeds a decision on scope.\n\n\
## 5. Definition of Ready\n\n- [ ] **BLOCKING** Scope agreed\n";
    let h = harness(
        FakeTracker::new(issue),
        ScriptedBackend::replying(vec![no_plan]),
        |_| {},
    );

    let report = h.pipeline.run(&key(), &RunOptions::default()).await.unwrap();

    assert_eq!(report.mode, ModeDecision::BacklogAnalysis);
    // Lenient profile: defects are recorded, never fatal, and no plan
    // artifact is produced.
    assert!(report.plan_path.is_none());
    let stored = h.store.load_analysis(&key()).unwrap().unwrap();
    assert!(!stored.artifact.all_blocking_resolved());
    assert!(!stored.artifact.questions.is_empty());
}

#[tokio::test]
async fn feedback_mode_transitions_when_gates_clear() {
    let mut issue = sample_issue("PROJ-5", "Ready for Work");
    issue.comments.push(CommentRecord {
        author: "Dana".into(),
        author_account_id: Some("acct-dana".into()),
        body: "Please also document the limits.".into(),
        created_at: Utc::now() - Duration::minutes(5),
    });
    let h = harness(
        FakeTracker::new(issue.clone()),
        ScriptedBackend::replying(vec![&valid_response()]),
        |config| config.workflow.auto_transition = true,
    );
    h.store.write_analysis(&key(), &seeded_artifact()).unwrap();
    seed_snapshot(&h.store, &issue);

    let report = h.pipeline.run(&key(), &RunOptions::default()).await.unwrap();

    assert_eq!(report.mode, ModeDecision::FeedbackIncorporation);
    assert!(report.transitioned);
    assert_eq!(
        h.tracker.transitions.lock().unwrap().as_slice(),
        ["AI To Do".to_string()]
    );
}

#[tokio::test]
async fn feedback_mode_holds_the_transition_on_blocking_gates() {
    let mut issue = sample_issue("PROJ-5", "Ready for Work");
    issue.comments.push(CommentRecord {
        author: "Dana".into(),
        author_account_id: Some("acct-dana".into()),
        body: "Rework step 1.".into(),
        created_at: Utc::now() - Duration::minutes(5),
    });
    let blocked = valid_response().replace(
        "- [x] Acceptance criteria per step",
        "- [ ] **BLOCKING** Capacity review",
    );
    let h = harness(
        FakeTracker::new(issue.clone()),
        ScriptedBackend::replying(vec![&blocked]),
        |config| config.workflow.auto_transition = true,
    );
    h.store.write_analysis(&key(), &seeded_artifact()).unwrap();
    seed_snapshot(&h.store, &issue);

    let report = h.pipeline.run(&key(), &RunOptions::default()).await.unwrap();

    assert!(!report.transitioned);
    assert!(h.tracker.transitions.lock().unwrap().is_empty());
    assert!(report.warnings.iter().any(|w| w.contains("transition skipped")));
}

#[tokio::test]
async fn no_transition_flag_overrides_config() {
    let mut issue = sample_issue("PROJ-5", "Ready for Work");
    issue.comments.push(CommentRecord {
        author: "Dana".into(),
        author_account_id: Some("acct-dana".into()),
        body: "ok".into(),
        created_at: Utc::now() - Duration::minutes(5),
    });
    let h = harness(
        FakeTracker::new(issue.clone()),
        ScriptedBackend::replying(vec![&valid_response()]),
        |config| config.workflow.auto_transition = true,
    );
    h.store.write_analysis(&key(), &seeded_artifact()).unwrap();
    seed_snapshot(&h.store, &issue);

    let options = RunOptions {
        no_transition: true,
        ..RunOptions::default()
    };
    let report = h.pipeline.run(&key(), &options).await.unwrap();

    assert!(!report.transitioned);
    assert!(h.tracker.transitions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn story_creation_posts_decomposition_and_questions() {
    let issue = sample_issue("PROJ-5", "Ready for Work");
    let h = harness(
        FakeTracker::new(issue),
        ScriptedBackend::new(vec![]),
        |_| {},
    );
    h.store.write_analysis(&key(), &seeded_artifact()).unwrap();

    let options = RunOptions {
        mode_override: Some(ModeOverride::CreateStories),
        ..RunOptions::default()
    };
    let report = h.pipeline.run(&key(), &options).await.unwrap();

    assert_eq!(report.mode, ModeDecision::StoryCreation);
    assert_eq!(report.comments_posted, 2);
    let comments = h.tracker.comments_posted.lock().unwrap();
    assert!(comments[0].contains("Technical Decomposition"));
    assert!(comments[0].contains("| 1 | BE |"));
    assert!(comments[1].contains("Clarification Questions"));
    assert!(comments[1].contains("SLA target"));
}

#[tokio::test]
async fn story_creation_without_a_stored_plan_fails() {
    let issue = sample_issue("PROJ-5", "Ready for Work");
    let h = harness(
        FakeTracker::new(issue),
        ScriptedBackend::new(vec![]),
        |_| {},
    );

    let options = RunOptions {
        mode_override: Some(ModeOverride::CreateStories),
        ..RunOptions::default()
    };
    let err = h.pipeline.run(&key(), &options).await.unwrap_err();
    assert!(matches!(err, PlanForgeError::Input(_)));
    assert!(h.tracker.comments_posted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unparsable_response_fails_but_leaves_the_raw_artifact() {
    let issue = sample_issue("PROJ-5", "Ready for Work");
    let h = harness(
        FakeTracker::new(issue),
        ScriptedBackend::replying(vec!["complete nonsense with no sections"]),
        |_| {},
    );

    let err = h.pipeline.run(&key(), &RunOptions::default()).await.unwrap_err();

    assert!(matches!(err, PlanForgeError::Unparsable { .. }));
    let reasoning = h.store.key_dir(&key()).join("PROJ-5_reasoning.md");
    assert!(reasoning.exists());
    assert!(
        std::fs::read_to_string(reasoning)
            .unwrap()
            .contains("complete nonsense")
    );
}
