//! Logbook CLI - per-commit test and coverage history.

use clap::Parser;
use logbook::cli::{Cli, Commands, ConfigCommands};
use logbook::commands::{self, CommandResult, RecordOptions};
use logbook::config::ConfigOverrides;
use logbook::vcs::find_git_root;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter; falls back to `RUST_LOG`.
const LOG_ENV: &str = "LB_LOG";

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    init_logging(cli.verbose);

    // Determine repo path: --repo flag > LB_REPO env > auto-detect git root > cwd
    let repo_path = resolve_repo_path(cli.repo_path, human);

    if let Err(e) = run_command(cli.command, &repo_path, human) {
        report_error(&e.to_string(), human);
        process::exit(1);
    }
}

/// Install the stderr subscriber. stdout is reserved for command output.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the repository path.
///
/// Priority: --repo flag > LB_REPO env var > git root detection > current working directory
///
/// An explicit path is used literally. Otherwise the git root of the current
/// directory is used so the history file lands in the same place from any
/// subdirectory.
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                report_error(
                    &format!("Specified repo path does not exist: {}", path.display()),
                    human,
                );
                process::exit(1);
            }
            path
        }
        None => {
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            find_git_root(&cwd).unwrap_or(cwd)
        }
    }
}

fn run_command(command: Commands, repo_path: &Path, human: bool) -> Result<(), logbook::Error> {
    match command {
        Commands::Record {
            history_file,
            timeout,
            skip_tests,
            dry_run,
        } => {
            let mut overrides = overrides_for(history_file);
            if let Some(secs) = timeout {
                overrides = overrides.with_test_timeout(secs);
            }
            let options = RecordOptions {
                skip_tests,
                dry_run,
            };
            let result = commands::record(repo_path, &overrides, options)?;
            output(&result, human);
        }
        Commands::Init { history_file } => {
            let result = commands::init(repo_path, &overrides_for(history_file))?;
            output(&result, human);
        }
        Commands::Log {
            limit,
            history_file,
        } => {
            let result = commands::log(repo_path, &overrides_for(history_file), limit)?;
            output(&result, human);
        }
        Commands::Show { id, history_file } => {
            let result = commands::show(repo_path, &overrides_for(history_file), &id)?;
            output(&result, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(repo_path, &ConfigOverrides::new())?;
                output(&result, human);
            }
        },
    }

    Ok(())
}

fn overrides_for(history_file: Option<String>) -> ConfigOverrides {
    match history_file {
        Some(file) => ConfigOverrides::new().with_history_file(file),
        None => ConfigOverrides::new(),
    }
}

/// Print output in JSON or human-readable format.
fn output<T: CommandResult>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

fn report_error(message: &str, human: bool) {
    if human {
        eprintln!("Error: {}", message);
    } else {
        eprintln!("{}", serde_json::json!({ "error": message }));
    }
}
