//! Response validation and extraction.
//!
//! Free text from the reasoning service goes in; a structured
//! [`AnalysisArtifact`] comes out, tagged with how well the text matched
//! the contract: fully parsed, partially parsed with defects, or
//! unparsable. Every violated rule is enumerated; callers decide per mode
//! which defects are fatal.

pub mod confidence;
pub mod plan;
pub mod readiness;
pub mod sections;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use planforge_utils::{Severity, ValidationError};

pub use confidence::{DEFAULT_CONFIDENCE_THRESHOLD, ScoringContext, flag_low_confidence, score_all};
pub use plan::{Layer, MAX_REASONABLE_STEPS, MIN_WORK_PLAN_LENGTH, PlanStep};
pub use readiness::{ReadinessGate, all_blocking_resolved, unresolved_blocking};
pub use sections::{ResponseSections, strip_code_fence};

/// Complexity estimate extracted from the analysis section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Complexity {
    S,
    #[default]
    M,
    L,
    XL,
}

/// A clarification question surfaced from the concerns section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClarificationQuestion {
    pub question: String,
    pub context: String,
}

/// The validated, structured output of a reasoning run. Persisted to the
/// artifact store; later runs read it back to detect prior analysis and
/// compare comment timestamps against `generated_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisArtifact {
    pub understanding: String,
    pub concerns: String,
    pub analysis: String,
    pub work_plan: String,
    pub definition_of_ready: String,
    pub steps: Vec<PlanStep>,
    pub readiness: Vec<ReadinessGate>,
    pub questions: Vec<ClarificationQuestion>,
    pub complexity: Complexity,
    pub model: String,
    pub generated_at: DateTime<Utc>,
    pub defects: Vec<ValidationError>,
}

impl AnalysisArtifact {
    /// Unresolved BLOCKING readiness gates, verbatim.
    #[must_use]
    pub fn unresolved_blocking(&self) -> Vec<&str> {
        readiness::unresolved_blocking(&self.readiness)
    }

    #[must_use]
    pub fn all_blocking_resolved(&self) -> bool {
        readiness::all_blocking_resolved(&self.readiness)
    }

    /// Defects at error severity, ignoring warnings.
    #[must_use]
    pub fn error_defects(&self) -> Vec<&ValidationError> {
        self.defects
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }
}

/// Which response contract to validate against.
///
/// Backlog analysis has no work plan section; its absence there is not a
/// defect at all, and missing readiness questions are non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationProfile {
    FullPipeline,
    BacklogAnalysis,
}

impl ValidationProfile {
    /// Whether the plan section is part of this profile's contract.
    #[must_use]
    pub fn requires_plan(&self) -> bool {
        matches!(self, Self::FullPipeline)
    }

    /// Is this defect list fatal under this profile?
    #[must_use]
    pub fn is_fatal(&self, defects: &[ValidationError]) -> bool {
        match self {
            Self::FullPipeline => defects.iter().any(|d| d.severity == Severity::Error),
            // Backlog analysis tolerates structural gaps; only a fully
            // absent response is fatal, which surfaces as Unparsable.
            Self::BacklogAnalysis => false,
        }
    }
}

/// Tagged validation outcome. The artifact is returned best-effort even
/// when rules were violated.
#[derive(Debug)]
pub enum ValidationOutcome {
    Parsed(AnalysisArtifact),
    PartiallyParsed(AnalysisArtifact, Vec<ValidationError>),
    Unparsable { raw: String },
}

static COMPLEXITY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)complexity[:\s]*`?\(?([SMLX]{1,2})\)?`?").expect("valid complexity pattern")
});

static DATA_MISSING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[DATA MISSING:\s*([^\]]+)\]").expect("valid data-missing pattern")
});

static BULLET_QUESTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-*]\s*(.+\?)\s*$").expect("valid question pattern"));

/// Validates reasoning output against a profile's contract.
#[derive(Debug, Default)]
pub struct ResponseValidator;

impl ResponseValidator {
    /// Validate and extract. Enumerates every violated rule.
    #[must_use]
    pub fn validate(
        &self,
        raw: &str,
        model: &str,
        profile: ValidationProfile,
    ) -> ValidationOutcome {
        let sections = ResponseSections::split(raw);
        if sections.is_empty() {
            debug!(raw_len = raw.len(), "response had no recognizable sections");
            return ValidationOutcome::Unparsable {
                raw: raw.to_string(),
            };
        }

        let mut defects = Vec::new();
        for (name, content) in [
            ("understanding", &sections.understanding),
            ("concerns", &sections.concerns),
            ("analysis", &sections.analysis),
            ("definition-of-ready", &sections.definition_of_ready),
        ] {
            if content.is_empty() {
                let severity = if profile == ValidationProfile::BacklogAnalysis
                    && name == "definition-of-ready"
                {
                    // Backlog analysis treats a missing DoR as advisory
                    Severity::Warning
                } else {
                    Severity::Error
                };
                defects.push(ValidationError {
                    rule: format!("missing-section:{name}"),
                    detail: format!("required section '{name}' not found in response"),
                    severity,
                });
            }
        }

        let steps = if profile.requires_plan() {
            if sections.work_plan.is_empty() {
                defects.push(ValidationError::error(
                    "missing-section:plan",
                    "required section 'work plan' not found in response",
                ));
                Vec::new()
            } else {
                defects.extend(plan::validate_work_plan(&sections.work_plan));
                plan::extract_steps(&sections.work_plan)
            }
        } else {
            Vec::new()
        };

        // Steps with missing or dubious metadata were flagged by the
        // extractor rather than dropped; surface those flags as warnings.
        for step in &steps {
            for flag in &step.flags {
                defects.push(ValidationError::warning(
                    "story-flagged",
                    format!("step {}: {flag}", step.order),
                ));
            }
        }

        let readiness = readiness::parse_gates(&sections.definition_of_ready);
        let questions = extract_questions(&sections.concerns);
        let complexity = extract_complexity(&sections.analysis);

        let artifact = AnalysisArtifact {
            understanding: sections.understanding,
            concerns: sections.concerns,
            analysis: sections.analysis,
            work_plan: sections.work_plan,
            definition_of_ready: sections.definition_of_ready,
            steps,
            readiness,
            questions,
            complexity,
            model: model.to_string(),
            generated_at: Utc::now(),
            defects: defects.clone(),
        };

        if defects.is_empty() {
            ValidationOutcome::Parsed(artifact)
        } else {
            debug!(defect_count = defects.len(), "response partially parsed");
            ValidationOutcome::PartiallyParsed(artifact, defects)
        }
    }
}

/// Pull clarification questions out of the concerns section: explicit
/// `[DATA MISSING: ...]` markers plus bulleted questions.
#[must_use]
pub fn extract_questions(concerns: &str) -> Vec<ClarificationQuestion> {
    let mut questions: Vec<ClarificationQuestion> = Vec::new();

    for captures in DATA_MISSING_PATTERN.captures_iter(concerns) {
        let subject = captures[1].trim().to_string();
        questions.push(ClarificationQuestion {
            question: format!("What is {subject}?"),
            context: format!("Data marked as missing: {subject}"),
        });
    }

    for captures in BULLET_QUESTION_PATTERN.captures_iter(concerns) {
        let question = captures[1].trim().to_string();
        if !questions.iter().any(|q| q.question == question) {
            questions.push(ClarificationQuestion {
                question,
                context: "From concerns section".to_string(),
            });
        }
    }

    questions
}

/// Extract the S/M/L/XL complexity estimate from the analysis section.
/// Defaults to M when no marker is found.
#[must_use]
pub fn extract_complexity(analysis: &str) -> Complexity {
    let marker = COMPLEXITY_PATTERN
        .captures(analysis)
        .map(|c| c[1].to_uppercase());
    match marker.as_deref() {
        Some("S") => Complexity::S,
        Some("L") => Complexity::L,
        Some("XL") => Complexity::XL,
        Some("M") => Complexity::M,
        _ => Complexity::M,
    }
}
