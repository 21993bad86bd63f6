//! CLI argument definitions and parsing structures.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::router::ModeOverride;

/// planforge - implementation plans for tracked work items
#[derive(Parser)]
#[command(name = "planforge")]
#[command(about = "Turns a tracker issue into a reviewed, machine-authored implementation plan")]
#[command(long_about = r#"
planforge gathers everything known about a tracker work item (the issue
itself, the team's knowledge base, the linked repository), asks a reasoning
model for a structured implementation plan, validates the result, and
persists every intermediate artifact for audit and replay.

EXAMPLES:
  # Plan a work item by key or by URL
  planforge run PROJ-123
  planforge run https://tracker.example.com/browse/PROJ-123

  # Pre-analyze a backlog item (no work plan required)
  planforge run PROJ-123 --mode backlog

  # Re-plan from the stored snapshot with operator feedback
  planforge run PROJ-123 --mode refine --feedback "split step 3 into BE and DB work"

  # Decompose an approved plan into tracker comments
  planforge run PROJ-123 --mode create-stories

  # Exercise the whole pipeline without a real model call
  planforge run PROJ-123 --dry-run

  # Inspect what was last generated for an item
  planforge show PROJ-123

CONFIGURATION:
  planforge.toml is discovered by searching upward from CWD, then the user
  config directory. Credentials come from environment variables named in
  the config (TRACKER_EMAIL, TRACKER_API_TOKEN, REASONING_API_KEY, ...).
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Execution mode override. Without one the mode is routed from the item's
/// status and stored artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Force the full pipeline regardless of status
    Full,
    /// Force backlog pre-analysis
    Backlog,
    /// Re-plan from the stored snapshot with --feedback text
    Refine,
    /// Decompose the stored plan into tracker comments
    CreateStories,
}

impl ModeArg {
    /// `full` is not an override: routing already lands on the full
    /// pipeline for any status outside the backlog set.
    #[must_use]
    pub fn to_override(self) -> Option<ModeOverride> {
        match self {
            Self::Full => None,
            Self::Backlog => Some(ModeOverride::Backlog),
            Self::Refine => Some(ModeOverride::Refine),
            Self::CreateStories => Some(ModeOverride::CreateStories),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline for one work item
    Run {
        /// Work item key (PROJ-123) or tracker URL
        item: String,

        /// Override the routed execution mode
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,

        /// Use the offline placeholder backend instead of a real model
        #[arg(long)]
        dry_run: bool,

        /// Output directory for artifacts (overrides config)
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Feedback text for refine mode
        #[arg(long, required_if_eq("mode", "refine"))]
        feedback: Option<String>,

        /// Never transition the issue, even when config allows it
        #[arg(long)]
        no_transition: bool,
    },

    /// Show what was last generated for a work item
    Show {
        /// Work item key (PROJ-123) or tracker URL
        item: String,

        /// Output directory to read from (overrides config)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}
