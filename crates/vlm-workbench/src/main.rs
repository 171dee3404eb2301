//! `vlm-workbench`: compare teacher and student VLM responses and label them.
//!
//! # Usage
//!
//! ```bash
//! # Interactive session against the default backend
//! vlm-workbench
//!
//! # One-shot comparison, snapshot printed as JSON
//! vlm-workbench --image road.jpg compare
//!
//! # Custom backend and config
//! WORKBENCH_BACKEND_URL=http://gpu-01:8000 vlm-workbench --config workbench.toml health
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, info_span, Instrument};
use vlm_session::{SessionDriver, SessionOptions, SharedBackend};
use vlm_workbench::health::probe;
use vlm_workbench::{HealthMonitor, HttpBackend, Repl, WorkbenchConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (overridden by WORKBENCH_* env vars and flags)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backend origin (overrides WORKBENCH_BACKEND_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Image to load on startup
    #[arg(long)]
    image: Option<PathBuf>,

    /// Prompt to start with instead of the configured default
    #[arg(long)]
    prompt: Option<String>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Interactive session (default)
    Interactive,
    /// Run one comparison and print the resulting snapshot as JSON
    Compare,
    /// Probe the backend once and print its health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = WorkbenchConfig::load(args.config.as_deref())?;
    if let Some(url) = args.base_url.clone() {
        config.base_url = url;
    }
    if let Some(prompt) = args.prompt.clone() {
        config.default_prompt = prompt;
    }
    config.validate()?;
    let config = Arc::new(config);

    let client = Arc::new(HttpBackend::new(Arc::clone(&config))?);
    let backend: SharedBackend = client.clone();

    let mode = args.mode.unwrap_or(Mode::Interactive);
    if mode == Mode::Health {
        return match probe(backend.as_ref()).await {
            Some(status) => {
                println!("{}", serde_json::to_string_pretty(&status)?);
                Ok(())
            }
            None => bail!("backend at {} is not reachable", config.base_url),
        };
    }

    let driver = SessionDriver::new(
        Arc::clone(&backend),
        SessionOptions {
            feedback_expiry: config.feedback_expiry(),
            initial_prompt: config.default_prompt.clone(),
        },
    );
    let span = info_span!("workbench", session_id = %driver.session_id());
    run_session(args, config, client, driver, mode)
        .instrument(span)
        .await
}

async fn run_session(
    args: Args,
    config: Arc<WorkbenchConfig>,
    client: Arc<HttpBackend>,
    mut driver: SessionDriver,
    mode: Mode,
) -> Result<()> {
    info!(backend = %config.base_url, ?mode, "Workbench starting");
    if let Some(path) = &args.image {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string();
        driver.load_image(bytes, file_name);
    }

    match mode {
        Mode::Compare => {
            driver.run_comparison()?;
            driver.settle_comparison().await;
            let snapshot = driver.snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            if let Some(banner) = snapshot.error_banner {
                bail!("comparison finished with errors: {banner}");
            }
            Ok(())
        }
        Mode::Interactive | Mode::Health => {
            let health = HealthMonitor::spawn(driver.backend().clone(), config.health_interval());
            Repl::new(driver, client, health).run().await
        }
    }
}
