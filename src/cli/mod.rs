//! Command-line interface for planforge.
//!
//! - `args`: CLI argument definitions and parsing structures (clap)
//! - `run`: entry point, config loading, and command dispatch

pub mod args;
mod run;

pub use args::{Cli, Commands, ModeArg};
pub use run::run;
