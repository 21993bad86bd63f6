//! Work plan rules and story decomposition.
//!
//! The plan section is the highest-failure-rate part of model output, so it
//! gets the strictest rules: checkbox step format, a layer tag per step
//! from the fixed taxonomy, bounded step counts. Decomposition turns each
//! step into a story without ever dropping one; dubious steps are flagged,
//! not discarded.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::LazyLock;
use strum::{Display, EnumString};

use planforge_utils::ValidationError;

/// Minimum characters for a plan section to count as substantive.
pub const MIN_WORK_PLAN_LENGTH: usize = 50;
/// Step counts above this draw a warning; the task likely needs splitting.
pub const MAX_REASONABLE_STEPS: usize = 15;

/// Fixed layer taxonomy for plan steps.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Layer {
    BE,
    FE,
    INFRA,
    DB,
    QA,
    DOCS,
    GEN,
}

/// One decomposed story extracted from a plan step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub order: u32,
    pub title: String,
    pub description: String,
    pub layer: Layer,
    pub files: Vec<String>,
    pub acceptance: String,
    pub depends_on: Vec<u32>,
    /// Heuristic confidence, filled in by scoring after extraction.
    #[serde(default)]
    pub confidence: f64,
    /// Why confidence was deducted, for the human reviewing the plan.
    #[serde(default)]
    pub flags: Vec<String>,
}

// The regex crate has no look-around; step bodies and field values are
// sliced between marker offsets instead.
static STEP_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)-\s*\[\s*\]\s*\*\*Step\s+(\d+):\*\*").expect("valid step marker pattern")
});

static LAYER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*Layer:\*\*\s*\[?(\w+)\]?").expect("valid layer pattern")
});

static FILES_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\*\*Files:\*\*").expect("valid files label pattern"));

static ACCEPTANCE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*Acceptance:\*\*").expect("valid acceptance label pattern")
});

static DEPENDS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*\*Depends\s+on:\*\*").expect("valid depends label pattern")
});

/// Where a multi-line field value ends: the next metadata bullet or a
/// blank line.
static FIELD_STOP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\s*\*\*|\n\n").expect("valid field stop pattern"));

/// Acceptance text ends at the next bold marker.
static ACCEPTANCE_STOP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n\s*-\s*\*\*|\*\*").expect("valid acceptance stop pattern")
});

static STEP_REF_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Step\s+(\d+)").expect("valid step-ref pattern"));

/// Each step's number and the body text up to the next step marker.
fn step_bodies(work_plan: &str) -> Vec<(u32, &str)> {
    let markers: Vec<(usize, usize, u32)> = STEP_MARKER
        .captures_iter(work_plan)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let number = c.get(1)?.as_str().parse().ok()?;
            Some((whole.start(), whole.end(), number))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(i, (_, marker_end, number))| {
            let body_end = markers
                .get(i + 1)
                .map_or(work_plan.len(), |(next_start, ..)| *next_start);
            (*number, work_plan[*marker_end..body_end].trim())
        })
        .collect()
}

/// The value following a field label, cut at the stop marker.
fn field_value<'a>(body: &'a str, label: &Regex, stop: &Regex) -> Option<&'a str> {
    let found = label.find(body)?;
    let rest = &body[found.end()..];
    let end = stop.find(rest).map_or(rest.len(), |s| s.start());
    Some(rest[..end].trim())
}

/// Validate the work plan section. Returns every violated rule.
#[must_use]
pub fn validate_work_plan(work_plan: &str) -> Vec<ValidationError> {
    let mut defects = Vec::new();
    let trimmed = work_plan.trim();

    if trimmed.is_empty() {
        defects.push(ValidationError::error("missing-section:plan", "Work Plan section is empty"));
        return defects;
    }
    if trimmed.len() < MIN_WORK_PLAN_LENGTH {
        defects.push(ValidationError::error(
            "plan-too-short",
            format!(
                "Work Plan is {} chars, minimum {MIN_WORK_PLAN_LENGTH}",
                trimmed.len()
            ),
        ));
        return defects;
    }

    let step_numbers: Vec<u32> = step_bodies(work_plan)
        .iter()
        .map(|(number, _)| *number)
        .collect();

    if step_numbers.is_empty() {
        defects.push(ValidationError::error(
            "plan-no-steps",
            "no steps found (expected '- [ ] **Step N:** description')",
        ));
        return defects;
    }

    let layers: Vec<String> = LAYER_PATTERN
        .captures_iter(work_plan)
        .map(|c| c[1].to_uppercase())
        .collect();

    if layers.len() < step_numbers.len() {
        defects.push(ValidationError::error(
            "plan-missing-layers",
            format!(
                "found {} layer tags for {} steps",
                layers.len(),
                step_numbers.len()
            ),
        ));
    }

    let unknown: Vec<&String> = layers
        .iter()
        .filter(|l| Layer::from_str(l).is_err())
        .collect();
    if !unknown.is_empty() {
        defects.push(ValidationError::error(
            "plan-unknown-layer",
            format!(
                "unknown layer tags {:?}; valid: BE, FE, INFRA, DB, QA, DOCS, GEN",
                unknown
            ),
        ));
    }

    if step_numbers.len() > MAX_REASONABLE_STEPS {
        defects.push(ValidationError::warning(
            "plan-step-count",
            format!(
                "{} steps exceeds the {MAX_REASONABLE_STEPS}-step threshold; consider splitting the work item",
                step_numbers.len()
            ),
        ));
    }

    let expected: Vec<u32> = (1..=step_numbers.len() as u32).collect();
    if step_numbers != expected {
        defects.push(ValidationError::warning(
            "plan-step-sequence",
            format!("step numbers {step_numbers:?}, expected {expected:?}"),
        ));
    }

    defects
}

/// Extract every step as a story. Steps are never dropped: unknown or
/// missing layers fall back to GEN with a flag.
#[must_use]
pub fn extract_steps(work_plan: &str) -> Vec<PlanStep> {
    let mut steps = Vec::new();

    for (order, body) in step_bodies(work_plan) {
        let mut flags = Vec::new();
        let layer = match LAYER_PATTERN.captures(body) {
            Some(c) => match Layer::from_str(&c[1].to_uppercase()) {
                Ok(layer) => layer,
                Err(_) => {
                    flags.push(format!("unknown layer '{}', defaulted to GEN", &c[1]));
                    Layer::GEN
                }
            },
            None => {
                flags.push("no layer tag, defaulted to GEN".to_string());
                Layer::GEN
            }
        };

        let files = field_value(body, &FILES_LABEL, &FIELD_STOP)
            .map(parse_file_list)
            .unwrap_or_default();

        let acceptance = field_value(body, &ACCEPTANCE_LABEL, &ACCEPTANCE_STOP)
            .map(str::to_string)
            .unwrap_or_default();

        let depends_on = field_value(body, &DEPENDS_LABEL, &FIELD_STOP)
            .map(parse_dependencies)
            .unwrap_or_default();

        let title = body
            .lines()
            .next()
            .map(clean_title)
            .unwrap_or_else(|| format!("Step {order}"));

        let description = strip_metadata_lines(body);

        steps.push(PlanStep {
            order,
            title,
            description,
            layer,
            files,
            acceptance,
            depends_on,
            confidence: 0.0,
            flags,
        });
    }

    steps.sort_by_key(|s| s.order);
    steps
}

fn parse_file_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(|f| f.trim().trim_start_matches('-').trim())
        .filter(|f| !f.is_empty() && !f.starts_with("**"))
        .map(|f| f.trim_matches('`').to_string())
        .collect()
}

fn parse_dependencies(raw: &str) -> Vec<u32> {
    let trimmed = raw.trim().to_lowercase();
    if matches!(trimmed.as_str(), "none" | "n/a" | "-" | "") {
        return Vec::new();
    }
    STEP_REF_PATTERN
        .captures_iter(raw)
        .filter_map(|c| c[1].parse().ok())
        .collect()
}

fn clean_title(first_line: &str) -> String {
    // Metadata sometimes rides the title line
    static TITLE_TRAILER: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\s*-\s*\*\*Layer.*$").expect("valid trailer pattern"));
    TITLE_TRAILER.replace(first_line.trim(), "").trim().to_string()
}

fn strip_metadata_lines(body: &str) -> String {
    body.lines()
        .filter(|line| {
            let lowered = line.trim_start().trim_start_matches('-').trim().to_lowercase();
            !(lowered.starts_with("**layer:")
                || lowered.starts_with("**files:")
                || lowered.starts_with("**acceptance:")
                || lowered.starts_with("**depends on:"))
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use planforge_utils::Severity;

    // `\x20` keeps the two-space indent that a bare `\` line continuation
    // would otherwise strip; the tests match on the indented lines.
    const GOOD_PLAN: &str = "\
- [ ] **Step 1:** Add a rate limiter middleware\n\
\x20 - **Layer:** [BE]\n\
\x20 - **Files:** src/middleware/limiter.rs, src/app.rs\n\
\x20 - **Acceptance:** Requests over the limit get 429\n\
- [ ] **Step 2:** Surface limit errors in the UI\n\
\x20 - **Layer:** [FE]\n\
\x20 - **Files:** web/src/errors.ts\n\
\x20 - **Acceptance:** A toast appears on 429\n\
\x20 - **Depends on:** Step 1\n";

    #[test]
    fn good_plan_has_no_defects() {
        assert!(validate_work_plan(GOOD_PLAN).is_empty());
    }

    #[test]
    fn empty_plan_is_a_missing_section() {
        let defects = validate_work_plan("   ");
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].rule, "missing-section:plan");
    }

    #[test]
    fn short_plan_is_rejected() {
        let defects = validate_work_plan("- do stuff");
        assert_eq!(defects[0].rule, "plan-too-short");
    }

    #[test]
    fn prose_without_steps_is_rejected() {
        let defects =
            validate_work_plan("First we will refactor the module, then we will add tests to it.");
        assert!(defects.iter().any(|d| d.rule == "plan-no-steps"));
    }

    #[test]
    fn missing_layer_tag_is_an_error() {
        let plan = GOOD_PLAN.replace("  - **Layer:** [FE]\n", "");
        let defects = validate_work_plan(&plan);
        assert!(defects.iter().any(|d| d.rule == "plan-missing-layers"));
    }

    #[test]
    fn unknown_layer_tag_is_an_error() {
        let plan = GOOD_PLAN.replace("[FE]", "[MOBILE]");
        let defects = validate_work_plan(&plan);
        assert!(defects.iter().any(|d| d.rule == "plan-unknown-layer"));
    }

    #[test]
    fn excessive_step_count_warns() {
        let mut plan = String::new();
        for i in 1..=16 {
            plan.push_str(&format!(
                "- [ ] **Step {i}:** Do part {i}\n  - **Layer:** [GEN]\n"
            ));
        }
        let defects = validate_work_plan(&plan);
        let warning = defects
            .iter()
            .find(|d| d.rule == "plan-step-count")
            .expect("step count warning");
        assert_eq!(warning.severity, Severity::Warning);
    }

    #[test]
    fn non_sequential_numbering_warns() {
        let plan = GOOD_PLAN.replace("**Step 2:**", "**Step 5:**");
        let defects = validate_work_plan(&plan);
        assert!(defects.iter().any(|d| d.rule == "plan-step-sequence"));
    }

    #[test]
    fn extraction_captures_all_step_fields() {
        let steps = extract_steps(GOOD_PLAN);
        assert_eq!(steps.len(), 2);

        assert_eq!(steps[0].order, 1);
        assert_eq!(steps[0].title, "Add a rate limiter middleware");
        assert_eq!(steps[0].layer, Layer::BE);
        assert_eq!(
            steps[0].files,
            vec!["src/middleware/limiter.rs", "src/app.rs"]
        );
        assert!(steps[0].acceptance.contains("429"));
        assert!(steps[0].depends_on.is_empty());

        assert_eq!(steps[1].layer, Layer::FE);
        assert_eq!(steps[1].depends_on, vec![1]);
    }

    #[test]
    fn step_without_layer_falls_back_to_gen_with_flag() {
        let plan = "- [ ] **Step 1:** Mystery work\n  - **Files:** somewhere\n";
        let steps = extract_steps(plan);
        assert_eq!(steps.len(), 1, "step must not be dropped");
        assert_eq!(steps[0].layer, Layer::GEN);
        assert!(steps[0].flags.iter().any(|f| f.contains("no layer tag")));
    }

    #[test]
    fn dependencies_accept_none_markers() {
        let plan = "- [ ] **Step 1:** Standalone\n  - **Layer:** [BE]\n  - **Depends on:** none\n";
        let steps = extract_steps(plan);
        assert!(steps[0].depends_on.is_empty());
    }

    #[test]
    fn steps_are_sorted_by_order() {
        let plan = "\
- [ ] **Step 2:** Second\n  - **Layer:** [QA]\n\
- [ ] **Step 1:** First\n  - **Layer:** [BE]\n";
        let steps = extract_steps(plan);
        assert_eq!(steps[0].order, 1);
        assert_eq!(steps[1].order, 2);
    }

    #[test]
    fn layer_parsing_is_case_insensitive() {
        assert_eq!(Layer::from_str("be").unwrap(), Layer::BE);
        assert_eq!(Layer::from_str("Infra").unwrap(), Layer::INFRA);
        assert!(Layer::from_str("MOBILE").is_err());
    }
}
