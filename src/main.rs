//! CLI entry point: one refactor cycle per invocation.

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use refactor_loop::core::types::CycleOutcome;
use refactor_loop::cycle::{CycleReport, run_cycle};
use refactor_loop::exit_codes;
use refactor_loop::io::config::{ProjectPaths, Settings};
use refactor_loop::io::model::HttpModelClient;
use refactor_loop::io::vcs::{GitClient, VcsClient};
use refactor_loop::logging;

#[derive(Parser)]
#[command(
    name = "refactor-loop",
    version,
    about = "Autonomous one-commit-per-run refactoring agent"
)]
struct Cli {
    /// Push the work branch after a successful commit; exit 1 if the push fails.
    #[arg(long)]
    test_mode: bool,
    /// Use the secondary model transport (REFACTOR_ALT_* variables).
    #[arg(long)]
    alt_provider: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(exit_codes::CONFIG_OR_FATAL as u8);
        }
    };

    match run(&cli, &settings) {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            error!(err = %format!("{err:#}"), "fatal error");
            eprintln!("fatal: {err:#}");
            ExitCode::from(exit_codes::CONFIG_OR_FATAL as u8)
        }
    }
}

fn run(cli: &Cli, settings: &Settings) -> Result<i32> {
    let root = env::current_dir().context("resolve current directory")?;
    let paths = ProjectPaths::new(root);
    logging::init(&paths.log_path)?;

    let model = if cli.alt_provider {
        HttpModelClient::alternate(settings).context("configure alternate model transport")?
    } else {
        HttpModelClient::primary(settings).context("configure model transport")?
    };
    let vcs = GitClient::new(&paths.clone_dir);

    let report = run_cycle(&paths, settings, &model, &vcs)?;
    Ok(exit_code_for(cli, settings, &vcs, &report))
}

fn exit_code_for(
    cli: &Cli,
    settings: &Settings,
    vcs: &GitClient,
    report: &CycleReport,
) -> i32 {
    if report.outcome == CycleOutcome::Fatal {
        return exit_codes::CONFIG_OR_FATAL;
    }
    if !report.committed {
        info!(outcome = %report.outcome, "cycle finished without a commit");
        return exit_codes::NO_COMMIT;
    }

    info!(
        outcome = %report.outcome,
        subject = report.description.as_deref().unwrap_or(""),
        "cycle finished with a commit"
    );
    if !cli.test_mode {
        return exit_codes::OK;
    }
    match vcs.push(&settings.work_branch) {
        Ok(true) => {
            info!(branch = %settings.work_branch, "work branch pushed");
            exit_codes::OK
        }
        Ok(false) => {
            warn!(branch = %settings.work_branch, "push rejected");
            exit_codes::NO_COMMIT
        }
        Err(err) => {
            warn!(err = %format!("{err:#}"), "push failed");
            exit_codes::NO_COMMIT
        }
    }
}
