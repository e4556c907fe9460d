//! Matrix Runner
//!
//! Runs the integration test matrix: every listed repository is taken
//! through a full task cycle on a bounded pool of workers.
//!
//! Architecture:
//! - Configuration: load settings from environment, repos from args too
//! - Runtime: podman CLI behind the `RuntimeClient` trait
//! - Task: network, resources, endpoint, tests and teardown per repo
//! - Scheduler: worker pool streaming results as tasks finish
//!
//! Exits non-zero if any repository failed.

use anyhow::{Context, Result};
use matrix_core::RuntimeClient;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use matrix_runner::podman::check_podman_available;
use matrix_runner::suite::ClientContainerSuite;
use matrix_runner::{Config, PodmanRuntime, Scheduler, TaskRunner, TaskSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "matrix_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Matrix Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: workers={}, repos={}, resources={}",
        config.worker_count,
        config.repos.len(),
        config.resources.len()
    );

    if config.repos.is_empty() {
        warn!("No repositories given, nothing to do");
        return Ok(());
    }

    check_podman_available(&config.podman_bin)?;
    let client: Arc<dyn RuntimeClient> = Arc::new(PodmanRuntime::new(config.podman_bin.clone()));

    let suite = Arc::new(ClientContainerSuite::new(
        config.test_client_image.clone(),
        config.pull_settle_delay,
    ));
    let runner = Arc::new(TaskRunner::new(TaskSettings::from(&config), suite));
    let scheduler = Scheduler::new(config.worker_count, runner);

    let results = scheduler.run_all(config.repos.clone(), client).await;

    let mut failed = 0;
    for result in &results {
        let secs = result.duration().num_milliseconds() as f64 / 1000.0;
        match &result.error {
            None => info!("  PASS {} ({:.1}s)", result.repo_name, secs),
            Some(e) => {
                failed += 1;
                error!("  FAIL {} ({:.1}s): {}", result.repo_name, secs, e);
            }
        }
    }

    info!(
        "Finished {} repo(s): {} passed, {} failed",
        results.len(),
        results.len() - failed,
        failed
    );

    if failed > 0 {
        anyhow::bail!("{} of {} repo(s) failed", failed, results.len());
    }

    Ok(())
}

/// Loads configuration from the environment, adding repos from arguments
fn load_config() -> Result<Config> {
    let config = Config::from_env()
        .context("Failed to load configuration from environment")?
        .with_repos(std::env::args().skip(1));
    config.validate()?;
    Ok(config)
}
