//! FlowForge CLI: drives an in-process `Engine` directly rather than an
//! HTTP client. §6.1.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;

use flowforge_config::FlowForgeConfig;
use flowforge_core::fetcher::SourceFetcher;
use flowforge_core::script::ScriptExecutor;
use flowforge_db::{CredentialRepo, PgCredentialRepo, PgPipelineRepo, PgProjectRepo, PgRunRepo, PipelineRepo, ProjectRepo, RunRepo};
use flowforge_engine::Engine;
use flowforge_executor::fetcher::GitSourceFetcher;
use flowforge_executor::script::LocalScriptExecutor;

#[derive(Parser)]
#[command(name = "flowforge", about = "FlowForge CI/CD control plane", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: FlowForgeConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and trigger pipelines
    Pipelines {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Inspect and control pipeline runs
    Runs {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Parse a pipeline spec document and syntax-check its step scripts
    Validate {
        /// Path to a pipeline spec JSON document
        path: String,
    },
    /// Run the Engine as a long-lived process: seeds the Scheduler with
    /// every `schedule`-triggered pipeline and the well-known `cleanup`
    /// job, then blocks until interrupted.
    Serve,
}

#[derive(Subcommand)]
enum PipelineCommands {
    /// List all pipelines across every project
    List,
    /// Trigger a manual run of a pipeline
    Trigger {
        /// Pipeline ID
        pipeline: String,
        /// Actor name recorded on the run
        #[arg(long, default_value = "cli")]
        actor: String,
    },
}

#[derive(Subcommand)]
enum RunCommands {
    /// Show a run's current status
    Show {
        /// Run ID
        id: String,
    },
    /// Stream a run's logs
    Logs {
        /// Run ID
        id: String,
        /// Keep streaming until the run reaches a terminal state
        #[arg(short, long)]
        follow: bool,
    },
    /// Cancel a live run
    Cancel {
        /// Run ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let config = cli.config;

    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--database-url / FLOWFORGE_DATABASE_URL is required"))?;
    let pool = flowforge_db::create_pool(&database_url).await?;
    flowforge_db::run_migrations(&pool).await?;

    let projects: Arc<dyn ProjectRepo> = Arc::new(PgProjectRepo::new(pool.clone()));
    let credentials: Arc<dyn CredentialRepo> = Arc::new(PgCredentialRepo::new(pool.clone()));
    let pipelines: Arc<dyn PipelineRepo> = Arc::new(PgPipelineRepo::new(pool.clone()));
    let runs: Arc<dyn RunRepo> = Arc::new(PgRunRepo::new(pool.clone()));
    let fetcher: Arc<dyn SourceFetcher> = Arc::new(GitSourceFetcher::new());
    let script_executor: Arc<dyn ScriptExecutor> = Arc::new(LocalScriptExecutor::new(config.data_path.join("scripts")));

    let engine = Engine::new(
        config.clone(),
        projects.clone(),
        credentials,
        pipelines.clone(),
        runs.clone(),
        fetcher,
        script_executor.clone(),
    );

    match cli.command {
        Commands::Pipelines { command } => match command {
            PipelineCommands::List => commands::pipelines::list(pipelines.as_ref()).await?,
            PipelineCommands::Trigger { pipeline, actor } => {
                commands::pipelines::trigger(&engine, &pipeline, &actor).await?
            }
        },
        Commands::Runs { command } => match command {
            RunCommands::Show { id } => commands::runs::show(runs.as_ref(), &id).await?,
            RunCommands::Logs { id, follow } => commands::runs::logs(&engine, &id, follow).await?,
            RunCommands::Cancel { id } => commands::runs::cancel(&engine, &id).await?,
        },
        Commands::Validate { path } => commands::validate(script_executor.as_ref(), &path).await?,
        Commands::Serve => commands::serve(engine, pipelines).await?,
    }

    Ok(())
}
