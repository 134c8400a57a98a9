mod config;

use clap::{Parser, Subcommand};
use cohort_agent::{OllamaBackend, RetryingInference};
use cohort_channel::{InMemoryChannel, MessageChannel};
use cohort_core::MessageBody;
use cohort_orchestrator::{
    FileSnapshotStore, LocalSpawner, Orchestrator, OrchestratorSnapshot, SnapshotStore, TaskState,
};
use config::CohortConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cohort", about = "Cohort: a self-organising pool of AI worker agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cohort.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one project to completion
    Run {
        /// Project requirements
        #[arg(short, long, conflicts_with = "file")]
        requirements: Option<String>,
        /// Read the requirements from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },
    /// Validate the configuration and print it
    Check,
    /// Inspect persisted state
    Snapshot {
        #[command(subcommand)]
        action: SnapshotAction,
    },
}

#[derive(Subcommand)]
enum SnapshotAction {
    /// Summarise a snapshot file
    Show {
        path: PathBuf,
        /// Print the whole snapshot as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = CohortConfig::load(&cli.config)
        .await?
        .with_env(|key| std::env::var(key).ok());
    config.validate()?;

    match cli.command {
        Commands::Run {
            requirements,
            file,
            timeout_secs,
        } => {
            let requirements = match (requirements, file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path).await.map_err(|e| {
                    anyhow::anyhow!("Failed to read requirements '{}': {}", path.display(), e)
                })?,
                (None, None) => anyhow::bail!("pass --requirements or --file"),
            };
            run(config, requirements, Duration::from_secs(timeout_secs)).await?;
        }
        Commands::Check => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("Configuration OK");
        }
        Commands::Snapshot { action } => match action {
            SnapshotAction::Show { path, json } => {
                let store = FileSnapshotStore::new(&path);
                let Some(snapshot) = store.load().await? else {
                    anyhow::bail!("no snapshot at '{}'", path.display());
                };
                if json {
                    println!("{}", serde_json::to_string_pretty(&snapshot)?);
                } else {
                    print_snapshot(&snapshot);
                }
            }
        },
    }

    Ok(())
}

async fn run(config: CohortConfig, requirements: String, timeout: Duration) -> anyhow::Result<()> {
    let channel: Arc<dyn MessageChannel> = Arc::new(InMemoryChannel::new(config.channel.clone()));
    let inference = Arc::new(RetryingInference::new(
        Arc::new(OllamaBackend::new()),
        config.retry.clone(),
    ));
    let spawner = Arc::new(LocalSpawner::new(
        channel.clone(),
        inference,
        config.model.clone(),
        config.runtime.clone(),
    ));

    let snapshot_path = config.orchestrator.snapshot_path.clone();
    let mut orchestrator = Orchestrator::new(config.orchestrator, channel, spawner);
    if let Some(path) = snapshot_path {
        orchestrator = orchestrator.with_store(Arc::new(FileSnapshotStore::new(path)));
        if orchestrator.restore_from_store().await? {
            info!("Resumed from snapshot");
        }
    }

    info!(model = %config.model.model_id, url = %config.model.base_url, "Starting agent pool");
    let handle = orchestrator.start();
    let mut progress = handle.subscribe_progress().await?;
    let project_id = handle.submit_project(requirements).await?;
    info!(%project_id, "Project submitted");

    let reporter = tokio::spawn(async move {
        while let Some(message) = progress.recv().await {
            if let MessageBody::ProgressReport(report) = message.body {
                if report.project_id != project_id {
                    continue;
                }
                println!(
                    "[{:?}] {}/{} done, {} failed, {} blocked{}",
                    report.state,
                    report.completed,
                    report.total,
                    report.failed,
                    report.blocked,
                    if report.note.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", report.note)
                    }
                );
            }
        }
    });

    let outcome = tokio::select! {
        result = handle.wait_for_project(project_id, timeout) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            None
        }
    };

    if let Some(result) = &outcome {
        let status = handle.status().await?;
        for task in status.tasks.iter().filter(|t| t.project_id == project_id) {
            println!("\n## {} [{}]", task.title, task.state);
            match (&task.artifact, &task.failure) {
                (Some(artifact), _) => println!("{}", artifact.content),
                (None, Some(failure)) => println!("failed: {failure}"),
                (None, None) => {}
            }
        }
        println!("\n{}", serde_json::to_string_pretty(&handle.metrics().to_json().await)?);
        if let Err(e) = result {
            warn!(error = %e, "Project did not finish");
        }
    }

    handle.shutdown().await?;
    reporter.abort();

    match outcome {
        Some(Ok(report)) if report.state == cohort_core::ProjectState::Completed => Ok(()),
        Some(Ok(report)) => anyhow::bail!("project finished in state {:?}", report.state),
        Some(Err(e)) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_snapshot(snapshot: &OrchestratorSnapshot) {
    println!("Snapshot taken at {}", snapshot.taken_at);
    println!("Projects: {}", snapshot.projects.len());
    for project in &snapshot.projects {
        let done = project
            .tasks
            .iter()
            .filter(|id| {
                snapshot
                    .tasks
                    .iter()
                    .any(|t| t.id == **id && t.state == TaskState::Completed)
            })
            .count();
        println!(
            "  {} [{:?}{}] {}/{} tasks completed",
            project.id,
            project.state,
            if project.degraded { ", degraded" } else { "" },
            done,
            project.tasks.len()
        );
    }
    println!("Tasks: {}", snapshot.tasks.len());
    for task in &snapshot.tasks {
        println!(
            "  {} [{}] {} (retries: {})",
            task.id, task.state, task.title, task.retry_count
        );
    }
    println!("Agents at snapshot time: {}", snapshot.agents.len());
    for agent in &snapshot.agents {
        println!(
            "  {} ({}) completed {} failed {}",
            agent.id, agent.role, agent.tasks_completed, agent.tasks_failed
        );
    }
    let metrics = &snapshot.metrics;
    println!(
        "Completion rate: {:.2} ({} completed, {} failed, {} retried)",
        metrics.completion_rate(),
        metrics.tasks_completed,
        metrics.tasks_failed,
        metrics.tasks_retried
    );
}
