//! Section splitting for free-form model output.
//!
//! Responses are markdown with five numbered headers. The splitter is
//! tolerant about header depth (`##` or `###`) and case, strict about the
//! numbering and order.

use regex::Regex;
use std::sync::LazyLock;

/// The raw text of each recognized section. Empty string = not found.
#[derive(Debug, Clone, Default)]
pub struct ResponseSections {
    pub understanding: String,
    pub concerns: String,
    pub analysis: String,
    pub work_plan: String,
    pub definition_of_ready: String,
}

/// Any numbered `##`/`###` header line. Sections are the text between
/// consecutive matches; the `regex` crate has no look-around, so the
/// splitter slices on header offsets instead.
static SECTION_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^#{2,3}\s*([1-5])\.\s*([^\n]*)$").expect("valid section header pattern")
});

/// (section number, expected title prefix after lowercasing and stripping
/// non-alphanumerics). Trailing text after the title is tolerated.
const SECTION_TITLES: &[(u8, &str)] = &[
    (1, "understanding"),
    (2, "concerns"),
    (3, "analysis"),
    (4, "workplan"),
    (5, "definitionofready"),
];

fn normalize_title(title: &str) -> String {
    title
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl ResponseSections {
    /// Split raw model output into sections. Unrecognized sections stay
    /// empty; the caller decides which absences are defects.
    #[must_use]
    pub fn split(raw: &str) -> Self {
        // Every numbered header is a boundary, recognized or not, so a
        // mislabeled section never bleeds into its neighbor's content.
        let headers: Vec<(usize, usize, u8, String)> = SECTION_HEADER
            .captures_iter(raw)
            .filter_map(|c| {
                let whole = c.get(0)?;
                let number: u8 = c.get(1)?.as_str().parse().ok()?;
                let title = normalize_title(c.get(2)?.as_str());
                Some((whole.start(), whole.end(), number, title))
            })
            .collect();

        let mut sections = Self::default();
        for (i, (_, header_end, number, title)) in headers.iter().enumerate() {
            let Some((_, expected)) = SECTION_TITLES.iter().find(|(n, _)| n == number) else {
                continue;
            };
            if !title.starts_with(expected) {
                continue;
            }
            let content_end = headers
                .get(i + 1)
                .map_or(raw.len(), |(next_start, ..)| *next_start);
            let content = raw[*header_end..content_end].trim().to_string();
            let slot = match number {
                1 => &mut sections.understanding,
                2 => &mut sections.concerns,
                3 => &mut sections.analysis,
                4 => &mut sections.work_plan,
                _ => &mut sections.definition_of_ready,
            };
            if slot.is_empty() {
                *slot = content;
            }
        }
        sections
    }

    /// True when no section was recognized at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.understanding.is_empty()
            && self.concerns.is_empty()
            && self.analysis.is_empty()
            && self.work_plan.is_empty()
            && self.definition_of_ready.is_empty()
    }
}

/// Strip a surrounding markdown code fence, if present. Models often wrap
/// JSON answers in ```json fences.
#[must_use]
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}
