//! # modsync
//!
//! Command line front-end. Loads configuration and the managed module
//! list, sets up logging and hands the requested steps to the
//! orchestrator.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use modsync_core::pipeline::{RunOutcome, SyncEvent, SyncEventKind};
use modsync_core::state::read_managed_modules;
use modsync_core::{Config, Credentials, Orchestrator, RunArgs, RunReport, StepSet};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Log level variable (`debug|info|warn|error`)
const LOG_LEVEL_ENV: &str = "LOG_LEVEL";
/// When set, logs are appended to this file instead of stderr
const LOG_FILE_ENV: &str = "MODSYNC_LOG_FILE";

const SYNC_STEPS: &[&str] = &[
    "use_pdk_ref",
    "clone",
    "pdk_update",
    "create_commit",
    "push",
    "create_pr",
];
const GEM_TESTING_STEPS: &[&str] = &[
    "use_gem_ref",
    "clone",
    "gem_file_update",
    "create_commit",
    "push",
    "create_pr",
];

#[derive(Parser)]
#[command(name = "modsync")]
#[command(author, version, about = "Keep a fleet of module repositories in sync with their template")]
struct Cli {
    /// Debug logging, overrides LOG_LEVEL
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file, overrides MODSYNC_CONFIG_PATH
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Clone, Default)]
struct BatchOptions {
    /// Step argument as key=value, repeatable
    #[arg(short, long = "arg", value_parser = parse_key_val)]
    args: Vec<(String, String)>,

    /// Managed modules file, overrides the configured one
    #[arg(long)]
    modules_file: Option<PathBuf>,

    /// Check that every module exists on the platform first
    #[arg(long)]
    validate_modules: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run an arbitrary set of steps; order on the command line does not matter
    Run {
        /// Comma separated step names
        #[arg(short, long, value_delimiter = ',', required = true)]
        steps: Vec<String>,

        #[command(flatten)]
        batch: BatchOptions,
    },
    /// Update every module against the template and open pull requests
    Sync {
        /// Prepended to every pull request title
        #[arg(long)]
        additional_title: Option<String>,

        #[command(flatten)]
        batch: BatchOptions,
    },
    /// Point every module's Gemfile at a gem revision and open pull requests
    GemTesting {
        /// Prepended to every pull request title
        #[arg(long)]
        additional_title: Option<String>,

        #[command(flatten)]
        batch: BatchOptions,
    },
    /// Print the effective configuration
    ShowConfig,
    /// Compare the local code generator version with a wanted one
    CheckVersion {
        /// Wanted version, e.g. 2.7.1
        wanted: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    match dotenv {
        Ok(path) => tracing::debug!("Loaded environment from {}", path.display()),
        Err(e) => tracing::debug!("No .env loaded: {}", e),
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load()?,
    };

    match cli.command {
        Command::ShowConfig => {
            print!("{}", config.to_toml());
            Ok(())
        }
        Command::CheckVersion { wanted } => {
            let orchestrator = Orchestrator::new(config, Credentials::default())?;
            if orchestrator.check_tool_version(&wanted).await {
                println!("pdk is up to date");
            }
            Ok(())
        }
        Command::Run { steps, batch } => run_batch(config, steps.as_slice(), Vec::new(), batch).await,
        Command::Sync {
            additional_title,
            batch,
        } => {
            let defaults = ref_defaults("{ref}", "pdksync_{ref}", additional_title);
            run_batch(config, SYNC_STEPS, defaults, batch).await
        }
        Command::GemTesting {
            additional_title,
            batch,
        } => {
            let defaults =
                ref_defaults("gem_testing{ref}", "gem_testing{ref}", additional_title);
            run_batch(config, GEM_TESTING_STEPS, defaults, batch).await
        }
    }
}

async fn run_batch<S: AsRef<str>>(
    config: Config,
    step_names: &[S],
    defaults: Vec<(String, String)>,
    batch: BatchOptions,
) -> Result<()> {
    let steps = StepSet::parse(step_names)?;
    // Explicit --arg values come last and win
    let args = RunArgs::from_pairs(defaults.into_iter().chain(batch.args))?;

    let modules_file = batch
        .modules_file
        .unwrap_or_else(|| config.managed_modules.clone());
    let modules = if steps.only_gem_steps() {
        Vec::new()
    } else {
        read_managed_modules(&modules_file)?
    };

    let (tx, mut rx) = mpsc::channel::<SyncEvent>(64);
    let progress = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_progress(&event);
        }
    });

    let mut orchestrator =
        Orchestrator::new(config, Credentials::from_env())?.with_event_channel(tx);
    if batch.validate_modules {
        orchestrator.validate_modules(&modules).await?;
    }
    let report = orchestrator.run(&steps, args, &modules).await?;
    drop(orchestrator);
    if let Err(e) = progress.await {
        tracing::warn!("Progress printer stopped early: {}", e);
    }

    print_report(&report, batch.json)?;
    if let RunOutcome::Aborted { .. } = report.outcome {
        std::process::exit(1);
    }
    Ok(())
}

fn ref_defaults(
    branch_name: &str,
    title: &str,
    additional_title: Option<String>,
) -> Vec<(String, String)> {
    let mut pairs = vec![
        ("branch_name".to_string(), branch_name.to_string()),
        ("commit_message".to_string(), title.to_string()),
        ("pr_title".to_string(), title.to_string()),
    ];
    if let Some(extra) = additional_title {
        pairs.push(("additional_title".to_string(), extra));
    }
    pairs
}

fn print_progress(event: &SyncEvent) {
    let module = event.module.as_deref().unwrap_or("-");
    let step = event.step.map(|s| s.as_str()).unwrap_or("-");
    let detail = event.detail.as_deref().unwrap_or("");
    match event.kind {
        SyncEventKind::StepFailed => println!("[{}] {} failed {}", module, step, detail),
        SyncEventKind::StepSkipped => println!("[{}] {} skipped: {}", module, step, detail),
        SyncEventKind::PullRequestCreated => println!("[{}] opened {}", module, detail),
        SyncEventKind::RunAborted => println!("Run aborted at {} on {}: {}", step, module, detail),
        _ => {}
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    print!("{}", report.render_pull_requests());
    if !report.test_rows.is_empty() {
        print!("{}", report.render_test_table());
    }
    for handle in &report.background {
        println!(
            "Background pid {} in {} writing to {}",
            handle.pid,
            handle.dir.display(),
            handle.stdout_path.display()
        );
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        "debug".to_string()
    } else {
        std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string())
    };
    let filter = EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new("info"));

    match std::env::var_os(LOG_FILE_ENV) {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Unable to open log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("branch_name=temp_branch").unwrap(),
            ("branch_name".to_string(), "temp_branch".to_string())
        );
        assert_eq!(parse_key_val("command=a=b").unwrap().1, "a=b");
        assert!(parse_key_val("novalue").is_err());
    }

    #[test]
    fn test_sync_steps_parse() {
        let steps = StepSet::parse(SYNC_STEPS).unwrap();
        assert!(steps.derives_ref());
        assert!(StepSet::parse(GEM_TESTING_STEPS).is_ok());
    }

    #[test]
    fn test_explicit_args_override_defaults() {
        let defaults = ref_defaults("{ref}", "pdksync_{ref}", None);
        let explicit = vec![("pr_title".to_string(), "custom".to_string())];
        let args = RunArgs::from_pairs(defaults.into_iter().chain(explicit)).unwrap();
        assert_eq!(args.pr.pr_title.as_deref(), Some("custom"));
        assert_eq!(args.commit.branch_name.as_deref(), Some("{ref}"));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "modsync",
            "run",
            "--steps",
            "create_pr,clone",
            "--arg",
            "pr_title=hello",
        ])
        .unwrap();
        match cli.command {
            Command::Run { steps, batch } => {
                assert_eq!(steps, vec!["create_pr", "clone"]);
                assert_eq!(batch.args.len(), 1);
            }
            _ => panic!("expected run"),
        }
    }
}
