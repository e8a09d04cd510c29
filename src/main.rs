//! `book-maker`: run book transformation phases against a project.
//!
//! Credentials come from the environment (or a `.env` file). `list` and
//! `check` only need the prompt library. Run commands refuse to start when any
//! registered task lacks its specification file.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use book_maker::config::{self, Config};
use book_maker::orchestrator::Orchestrator;
use book_maker::tasks::{phase_directory, PhaseRegistry, PromptLibrary};

#[derive(Parser)]
#[command(
    name = "book-maker",
    version,
    about = "Phase-ordered LLM agent pipeline for book transformation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Target {
    /// Project id in the state store.
    #[arg(long)]
    project_id: String,

    /// Model override; defaults to CLAUDE_MODEL.
    #[arg(long)]
    model: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the phase registry.
    List,
    /// Verify every registered task has a specification file.
    Check,
    /// Run a range of phases.
    Pipeline {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value_t = 1)]
        start_phase: u32,
        /// Defaults to the last registered phase.
        #[arg(long)]
        end_phase: Option<u32>,
    },
    /// Run a single phase.
    Phase {
        phase: u32,
        #[command(flatten)]
        target: Target,
    },
    /// Run a single task.
    Task {
        name: String,
        #[arg(long)]
        phase: u32,
        /// Chapter id for unit-level tasks.
        #[arg(long)]
        unit_id: Option<String>,
        #[command(flatten)]
        target: Target,
    },
    /// Print project status as JSON.
    Status {
        #[arg(long)]
        project_id: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    book_maker::logging::init();

    match run(Cli::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    match cli.command {
        Command::List => cmd_list(),
        Command::Check => cmd_check().await,
        Command::Pipeline {
            target,
            start_phase,
            end_phase,
        } => {
            let orchestrator = orchestrator().await?;
            let end_phase = end_phase.unwrap_or_else(|| orchestrator.registry().last_phase());
            let report = orchestrator
                .run_pipeline_report(
                    &target.project_id,
                    start_phase,
                    end_phase,
                    target.model.as_deref(),
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(report.success)
        }
        Command::Phase { phase, target } => Ok(orchestrator().await?
            .run_phase(&target.project_id, phase, target.model.as_deref())
            .await),
        Command::Task {
            name,
            phase,
            unit_id,
            target,
        } => {
            let result = orchestrator().await?
                .run_single_task(
                    &target.project_id,
                    &name,
                    phase,
                    unit_id.as_deref(),
                    target.model.as_deref(),
                )
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(result.success)
        }
        Command::Status { project_id } => {
            let status = orchestrator().await?.status(&project_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(true)
        }
    }
}

async fn orchestrator() -> Result<Orchestrator> {
    let config = Config::from_env().context("failed to load configuration")?;
    Orchestrator::from_config(&config).await
}

fn cmd_list() -> Result<bool> {
    let registry = PhaseRegistry::book().context("invalid phase registry")?;
    for (phase, tasks) in registry.phases() {
        println!("Phase {} ({})", phase, phase_directory(phase)?);
        for task in tasks {
            let scope = if task.is_unit_level { "per chapter" } else { "project" };
            if task.depends_on.is_empty() {
                println!("  {} [{}]", task.name, scope);
            } else {
                println!(
                    "  {} [{}] after {}",
                    task.name,
                    scope,
                    task.depends_on.join(", ")
                );
            }
        }
    }
    println!("{} tasks", registry.task_count());
    Ok(true)
}

async fn cmd_check() -> Result<bool> {
    let registry = PhaseRegistry::book().context("invalid phase registry")?;
    let library = PromptLibrary::new(config::prompts_dir());
    match library.verify(&registry).await {
        Ok(()) => {
            tracing::info!(
                "All {} task specifications found under {}",
                registry.task_count(),
                library.root().display()
            );
            Ok(true)
        }
        Err(e) => {
            tracing::error!("{}", e);
            Ok(false)
        }
    }
}
