use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bdd_core::{BrowserKind, ExecutionStatus};
use clap::{Parser, Subcommand};
use orchestrator::{run_blocking, SchedulingContext};
use server::config::AppConfig;
use server::routes::parse_submission;
use server::{create_router, state::AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(name = "bdd-runner")]
#[command(about = "Execute behavioral test specifications in a real browser", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file (defaults to ./bdd-runner.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Execute one specification file and print its result as JSON
    Run {
        spec: PathBuf,

        #[arg(long)]
        base_url: Option<String>,

        /// Request a visible browser window (falls back to headless without a display)
        #[arg(long)]
        headed: bool,

        #[arg(long)]
        browser: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            serve(config).await
        }
        Commands::Run {
            spec,
            base_url,
            headed,
            browser,
        } => {
            if headed {
                config.headless = false;
            }
            if let Some(browser) = browser {
                config.browser = BrowserKind::parse(&browser)
                    .with_context(|| format!("Unsupported browser: {}", browser))?;
            }
            let passed = run_file(config, &spec, base_url).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let state = AppState::from_config(&config).await?;
    let app = create_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Runs the specification to completion and reports whether every
/// scenario passed.
async fn run_file(config: AppConfig, path: &Path, base_url: Option<String>) -> Result<bool> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    if let Some(inner) = raw.get_mut("specification").map(serde_json::Value::take) {
        raw = inner;
    }

    let state = AppState::from_config(&config).await?;
    let (specification, mut run_config) = parse_submission(raw, &state.run_defaults)?;
    if base_url.is_some() {
        run_config.base_url = base_url;
    }

    let orchestrator = state.orchestrator.clone();
    let task_id = orchestrator.submit(specification, run_config).await;
    tracing::info!(task_id = %task_id, "Running specification {}", path.display());

    let task = tokio::task::spawn_blocking(move || {
        run_blocking(&orchestrator, &task_id, SchedulingContext::current())
    })
    .await
    .context("Execution thread failed")??;

    let result = task
        .result
        .context("Task finished without a result")?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(result.status == ExecutionStatus::Passed)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();
}
