//! Heuristic confidence scoring for decomposed stories.
//!
//! Scores 0.0-1.0 from data-availability signals, no extra reasoning call.
//! The signals are additive; flags record each deduction so a reviewer can
//! see why a story scored low.

use std::sync::LazyLock;

use regex::Regex;

use crate::plan::{Layer, PlanStep};

/// Stories under this default score are flagged for human review.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Acceptance criteria matching any of these are considered too vague to
/// verify.
static VAGUE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\bworks\s+(correctly|properly|as\s+expected)\b",
        r"(?i)\b(should|must)\s+work\b",
        r"(?i)\bis\s+(done|complete|finished)\b",
        r"(?i)\beverything\s+(passes|works)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid vagueness pattern"))
    .collect()
});

static WORD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\w+").expect("valid word pattern"));

const TITLE_STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "for", "to", "in", "of", "with", "on", "is", "are",
];

/// External evidence available for cross-referencing a story.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringContext<'a> {
    /// Repository tree summary, when a code context was gathered.
    pub repo_tree: Option<&'a str>,
    /// Whether any knowledge documents were attached.
    pub has_knowledge_docs: bool,
}

/// Score one story in place: sets `confidence` and appends deduction flags.
pub fn score_step(step: &mut PlanStep, ctx: ScoringContext<'_>) {
    let mut score: f64 = 0.0;
    let mut flags = Vec::new();

    // Files field present
    if step.files.iter().any(|f| !f.trim().is_empty()) {
        score += 0.2;
    } else {
        flags.push("no files specified".to_string());
    }

    // Specific acceptance criteria
    if step.acceptance.trim().is_empty() {
        flags.push("no acceptance criteria".to_string());
    } else if VAGUE_PATTERNS.iter().any(|p| p.is_match(&step.acceptance)) {
        flags.push("vague acceptance criteria".to_string());
    } else {
        score += 0.2;
    }

    // A concrete layer
    if step.layer == Layer::GEN {
        flags.push("generic layer (GEN)".to_string());
    } else {
        score += 0.1;
    }

    // Files cross-referenced against the repository tree
    match ctx.repo_tree {
        Some(tree) if !step.files.is_empty() => {
            let matched = step
                .files
                .iter()
                .filter(|path| {
                    let basename = path.rsplit('/').next().unwrap_or(path).trim();
                    !basename.is_empty() && tree.contains(basename)
                })
                .count();
            if matched > 0 {
                score += 0.2;
            } else {
                flags.push("files not found in repository tree".to_string());
            }
        }
        Some(_) => {
            flags.push("cannot verify files against repository".to_string());
        }
        None => {
            // Partial credit: absence of a repository is not the story's fault
            score += 0.1;
            flags.push("no repository context available (partial credit)".to_string());
        }
    }

    // Knowledge base coverage
    if ctx.has_knowledge_docs {
        score += 0.15;
    } else {
        flags.push("no knowledge documentation available".to_string());
    }

    // Title specificity
    let significant = WORD_PATTERN
        .find_iter(&step.title.to_lowercase())
        .filter(|w| !TITLE_STOPWORDS.contains(&w.as_str()))
        .count();
    if significant > 5 {
        score += 0.15;
    } else if significant > 3 {
        score += 0.08;
        flags.push("title could be more specific".to_string());
    } else {
        flags.push("title is too generic".to_string());
    }

    step.confidence = (score.clamp(0.0, 1.0) * 100.0).round() / 100.0;
    step.flags.extend(flags);
}

/// Score every story and return the overall (mean) confidence.
pub fn score_all(steps: &mut [PlanStep], ctx: ScoringContext<'_>) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    for step in steps.iter_mut() {
        score_step(step, ctx);
    }
    let total: f64 = steps.iter().map(|s| s.confidence).sum();
    (total / steps.len() as f64 * 100.0).round() / 100.0
}

/// Orders of stories scoring below the threshold.
#[must_use]
pub fn flag_low_confidence(steps: &[PlanStep], threshold: f64) -> Vec<u32> {
    steps
        .iter()
        .filter(|s| s.confidence < threshold)
        .map(|s| s.order)
        .collect()
}
