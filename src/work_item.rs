//! Work item key validation.
//!
//! A key is an uppercase project code, a dash, and a sequence number, e.g.
//! `PROJ-123`. Construction validates against the fixed pattern; a full
//! issue URL is also accepted and the key is taken from its last path
//! segment. Parsing is lossless: `Display` reproduces the exact canonical
//! form, including any leading zeros in the sequence.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use planforge_utils::InputError;

static KEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9]*-\d+$").expect("valid key pattern"));

/// A validated work item identifier. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItemKey {
    project: String,
    sequence: String,
}

impl WorkItemKey {
    /// Parse a raw key or an issue URL.
    pub fn parse(input: &str) -> Result<Self, InputError> {
        let trimmed = input.trim();
        if trimmed.contains("://") {
            let candidate = trimmed
                .split('/')
                .rev()
                .find(|segment| !segment.is_empty() && !segment.contains('?'))
                .map(str::to_uppercase)
                .ok_or_else(|| InputError::BadKeyUrl {
                    input: trimmed.to_string(),
                })?;
            Self::from_key(&candidate).map_err(|_| InputError::BadKeyUrl {
                input: trimmed.to_string(),
            })
        } else {
            Self::from_key(trimmed)
        }
    }

    fn from_key(key: &str) -> Result<Self, InputError> {
        if !KEY_PATTERN.is_match(key) {
            return Err(InputError::BadKeyFormat {
                input: key.to_string(),
            });
        }
        // Pattern guarantees exactly one dash between code and digits
        let (project, sequence) = key.split_once('-').expect("pattern requires a dash");
        Ok(Self {
            project: project.to_string(),
            sequence: sequence.to_string(),
        })
    }

    /// The uppercase project code, e.g. `PROJ`.
    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    /// The sequence part as written, e.g. `123`.
    #[must_use]
    pub fn sequence(&self) -> &str {
        &self.sequence
    }
}

impl fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.project, self.sequence)
    }
}

impl FromStr for WorkItemKey {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for WorkItemKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WorkItemKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
