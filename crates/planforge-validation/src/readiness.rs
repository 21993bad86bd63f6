//! Readiness checklist parsing.
//!
//! The Definition of Ready section is a markdown checklist. Checked boxes
//! are resolved gates; entries carrying a BLOCKING marker must all be
//! resolved before the workflow may advance automatically.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// One named boolean gate from the readiness checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessGate {
    pub name: String,
    pub resolved: bool,
    pub blocking: bool,
    /// The checklist line exactly as the model wrote it. Unresolved
    /// BLOCKING gates are surfaced to callers verbatim.
    pub raw: String,
}

static GATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*-\s*\[(\s|x|X)\]\s*(.+)$").expect("valid gate pattern")
});

static BLOCKING_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\*{0,2}BLOCKING\*{0,2}\s*:?").expect("valid blocking pattern")
});

/// Parse the checklist out of a Definition of Ready section.
#[must_use]
pub fn parse_gates(definition_of_ready: &str) -> Vec<ReadinessGate> {
    GATE_PATTERN
        .captures_iter(definition_of_ready)
        .map(|captures| {
            let resolved = !captures[1].trim().is_empty();
            let body = captures[2].trim();
            let blocking = BLOCKING_MARKER.is_match(body);
            let name = BLOCKING_MARKER.replace(body, "").trim().to_string();
            ReadinessGate {
                name,
                resolved,
                blocking,
                raw: captures[0].trim().to_string(),
            }
        })
        .collect()
}

/// Unresolved BLOCKING gates, verbatim. Empty means the workflow may
/// advance.
#[must_use]
pub fn unresolved_blocking(gates: &[ReadinessGate]) -> Vec<&str> {
    gates
        .iter()
        .filter(|g| g.blocking && !g.resolved)
        .map(|g| g.raw.as_str())
        .collect()
}

/// True when every BLOCKING gate is resolved. Vacuously true with no
/// blocking gates at all.
#[must_use]
pub fn all_blocking_resolved(gates: &[ReadinessGate]) -> bool {
    gates.iter().all(|g| !g.blocking || g.resolved)
}
