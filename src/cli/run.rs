//! CLI entry point and dispatch.
//!
//! `run()` parses arguments, loads configuration, builds the tokio runtime
//! and the service clients, and dispatches to the pipeline. All user-facing
//! output happens here; `main.rs` only maps the returned code to a process
//! exit.

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use planforge_config::Config;
use planforge_llm::{DryRunBackend, Gateway, OpenAiCompatBackend, ReasoningBackend, RetryPolicy};
use planforge_utils::{PlanForgeError, UserFriendlyError};
use planforge_validation::flag_low_confidence;

use super::args::{Cli, Commands};
use crate::adapters::{HttpCodeHost, HttpTracker, HttpWiki};
use crate::exit_codes::ExitCode;
use crate::pipeline::{Pipeline, RunOptions, RunReport};
use crate::store::ArtifactStore;
use crate::work_item::WorkItemKey;

pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let (item, output_dir) = match &cli.command {
        Commands::Run {
            item, output_dir, ..
        }
        | Commands::Show { item, output_dir } => (item.clone(), output_dir.clone()),
    };

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err.display_for_user());
            return Err(ExitCode::CLI_ARGS);
        }
    };
    if let Some(dir) = output_dir {
        config.output.dir = dir.to_string_lossy().into_owned();
    }

    let key = match WorkItemKey::parse(&item) {
        Ok(key) => key,
        Err(err) => {
            eprintln!("{}", err.display_for_user());
            return Err(ExitCode::CLI_ARGS);
        }
    };

    match cli.command {
        Commands::Run {
            mode,
            dry_run,
            feedback,
            no_transition,
            ..
        } => {
            let options = RunOptions {
                mode_override: mode.and_then(super::args::ModeArg::to_override),
                feedback,
                no_transition,
            };
            run_pipeline(&config, &key, &options, dry_run)
        }
        Commands::Show { .. } => show(&config, &key),
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "planforge=warn"
    } else if verbose {
        "planforge=debug"
    } else {
        "planforge=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_pipeline(
    config: &Config,
    key: &WorkItemKey,
    options: &RunOptions,
    dry_run: bool,
) -> Result<(), ExitCode> {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let result = build_pipeline(config, dry_run)
        .map_err(PlanForgeError::from)
        .and_then(|pipeline| rt.block_on(pipeline.run(key, options)));

    match result {
        Ok(report) => {
            print_report(config, &report);
            Ok(())
        }
        Err(error) => {
            eprintln!("{}", error.display_for_user());
            Err(ExitCode::from(&error))
        }
    }
}

fn build_pipeline(config: &Config, dry_run: bool) -> Result<Pipeline, planforge_utils::ConfigError> {
    let backend: Arc<dyn ReasoningBackend> = if dry_run {
        Arc::new(DryRunBackend)
    } else {
        Arc::new(OpenAiCompatBackend::new_from_config(&config.reasoning)?)
    };
    let gateway = Gateway::new(
        backend,
        RetryPolicy {
            max_attempts: config.reasoning.max_attempts,
            initial_backoff: config.reasoning.initial_backoff(),
        },
    );

    let tracker = Arc::new(HttpTracker::new_from_config(&config.tracker)?);
    let wiki = Arc::new(HttpWiki::new_from_config(&config.wiki, &config.tracker)?);
    let code_host = Arc::new(HttpCodeHost::new_from_config(&config.code_host)?);
    let store = ArtifactStore::open(config.output.dir.as_str())
        .map_err(|e| planforge_utils::ConfigError::InvalidValue {
            key: "output.dir".to_string(),
            value: e.to_string(),
        })?;

    Ok(Pipeline::new(
        tracker,
        wiki,
        code_host,
        gateway,
        store,
        config.clone(),
    ))
}

fn print_report(config: &Config, report: &RunReport) {
    println!("✓ {} completed in {} mode", report.key, report.mode);
    if let Some(complexity) = report.complexity {
        println!("  Complexity: {complexity:?}");
    }
    if let Some(mean) = report.mean_confidence {
        println!(
            "  Mean step confidence: {mean:.2} (threshold {:.2})",
            config.workflow.confidence_threshold
        );
    }
    if !report.flagged_steps.is_empty() {
        let listed: Vec<String> = report.flagged_steps.iter().map(|n| format!("{n}")).collect();
        println!("  Needs human review: step(s) {}", listed.join(", "));
    }
    if let Some(path) = &report.plan_path {
        println!("  Plan: {path}");
    }
    if let Some(path) = &report.analysis_path {
        println!("  Analysis: {path}");
    }
    if report.comments_posted > 0 {
        println!("  Tracker comments posted: {}", report.comments_posted);
    }
    if report.transitioned {
        println!("  Issue transitioned to '{}'", config.workflow.transition_target);
    }
    for warning in &report.warnings {
        println!("  ⚠ {warning}");
    }
}

fn show(config: &Config, key: &WorkItemKey) -> Result<(), ExitCode> {
    let store = match ArtifactStore::open(config.output.dir.as_str()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{}", e.display_for_user());
            return Err(ExitCode::from(&PlanForgeError::from(e)));
        }
    };

    match store.load_analysis(key) {
        Ok(Some(stored)) => {
            let artifact = &stored.artifact;
            println!("{key} (generated {} by {})", artifact.generated_at.to_rfc3339(), artifact.model);
            println!("  Complexity: {:?}", artifact.complexity);
            println!("  Steps: {}", artifact.steps.len());
            let flagged = flag_low_confidence(&artifact.steps, config.workflow.confidence_threshold);
            if !flagged.is_empty() {
                let listed: Vec<String> = flagged.iter().map(|n| format!("{n}")).collect();
                println!("  Below confidence threshold: step(s) {}", listed.join(", "));
            }
            let unresolved = artifact.unresolved_blocking();
            if unresolved.is_empty() {
                println!("  All blocking readiness gates resolved");
            } else {
                println!("  Unresolved blocking gates:");
                for gate in unresolved {
                    println!("    {gate}");
                }
            }
            if !artifact.questions.is_empty() {
                println!("  Open questions: {}", artifact.questions.len());
            }
            println!("  Artifacts: {}", store.key_dir(key));
            Ok(())
        }
        Ok(None) => {
            println!("{key}: no stored analysis under {}", store.root());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.display_for_user());
            Err(ExitCode::from(&PlanForgeError::from(e)))
        }
    }
}
