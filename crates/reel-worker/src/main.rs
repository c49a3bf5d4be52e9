//! Task-runner binary.
//!
//! Exit codes: 0 success (including already-finished no-ops), 1 invalid
//! invocation or fatal error, 2 task failed due to an external factor.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reel_models::TaskId;
use reel_worker::{TaskController, WorkerConfig, WorkerContext};

#[derive(Debug, Parser)]
#[command(name = "reel-worker", about = "ReelGen video generation worker")]
struct Cli {
    /// Task ID to process
    task_id: Option<String>,

    /// Task ID (alternative to the positional argument)
    #[arg(long = "task-id")]
    task_id_flag: Option<String>,

    /// API key for the task store
    #[arg(long)]
    api_key: Option<String>,

    /// Path to a configuration file (exported to the environment)
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug mode
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("VERBOSE", "true");
    }
    if cli.debug {
        std::env::set_var("DEBUG", "true");
    }
    if let Some(api_key) = &cli.api_key {
        std::env::set_var("TASK_STORE_API_KEY", api_key);
    }
    if let Some(config_file) = &cli.config {
        dotenvy::from_path(config_file).ok();
    }

    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::from_default_env()
                .add_directive(format!("reel={default_level}").parse().unwrap()),
        )
        .init();

    let Some(task_id) = cli.task_id.or(cli.task_id_flag) else {
        eprintln!("Usage: reel-worker <task_id> or reel-worker --task-id <task_id>");
        eprintln!("Optional: --api-key <key> --verbose --debug --config <file>");
        std::process::exit(1);
    };
    let task_id = TaskId::from_string(task_id);

    info!(task_id = %task_id, "Starting reel-worker");

    let config = WorkerConfig::from_env();
    let ctx = match WorkerContext::from_env(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to initialize worker context: {e}");
            std::process::exit(1);
        }
    };

    let controller = TaskController::new(ctx);
    match controller.run(&task_id).await {
        Ok(outcome) => {
            info!(task_id = %task_id, outcome = ?outcome, "Task completed");
            std::process::exit(0);
        }
        Err(e) if e.is_external() => {
            error!(task_id = %task_id, error = %e, "Task failed due to an external factor");
            std::process::exit(2);
        }
        Err(e) => {
            error!(task_id = %task_id, error = %e, "Task failed");
            std::process::exit(1);
        }
    }
}
