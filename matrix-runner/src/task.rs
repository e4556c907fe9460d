//! Task cycle
//!
//! One task takes one repo through:
//! network -> resources -> image -> endpoint -> readiness -> tests -> teardown
//!
//! Teardown always runs, in reverse creation order, for every object that
//! got a handle. Teardown failures never replace the primary error.

use chrono::Utc;
use matrix_core::{
    CleanupError, CleanupStep, NetworkHandle, RepoJob, ResourceSpec, RuntimeClient, TaskError,
    TaskResult,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::endpoint::Endpoint;
use crate::network::NetworkBinding;
use crate::readiness::ReadinessSettings;
use crate::repo::{Repo, RepoSettings};
use crate::resource::{Resource, ResourcePool, ResourceSettings, clean_all};
use crate::suite::TestSuite;

/// Everything a task needs besides the job itself
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub network_prefix: String,
    pub network_driver: String,
    pub repo: RepoSettings,
    pub resource: ResourceSettings,
    pub resources: Vec<ResourceSpec>,
    pub readiness: ReadinessSettings,
}

impl From<&Config> for TaskSettings {
    fn from(config: &Config) -> Self {
        Self {
            network_prefix: config.network_prefix.clone(),
            network_driver: config.network_driver.clone(),
            repo: RepoSettings {
                namespace: config.image_namespace.clone(),
                tag: config.image_tag.clone(),
                settle_delay: config.pull_settle_delay,
            },
            resource: ResourceSettings {
                namespace: config.image_namespace.clone(),
                settle_delay: config.pull_settle_delay,
            },
            resources: config.resources.clone(),
            readiness: config.readiness.clone(),
        }
    }
}

/// Objects a task has created so far
#[derive(Default)]
struct TaskState {
    network: Option<NetworkHandle>,
    resources: Vec<Resource>,
    endpoint: Option<Endpoint>,
}

impl TaskState {
    /// Endpoint, then resources in reverse, then network
    async fn teardown(&mut self, client: Arc<dyn RuntimeClient>) -> CleanupError {
        let mut errors = CleanupError::new();

        if let Some(endpoint) = self.endpoint.as_mut() {
            if let Err(e) = endpoint.clean().await {
                errors.merge(e);
            }
        }

        errors.merge(clean_all(client.as_ref(), &mut self.resources).await);

        if let Some(network) = self.network.take() {
            if let Err(e) = NetworkBinding::new(client).remove(&network).await {
                warn!("Failed to remove network {}: {}", network.name, e);
                errors.push(&network.name, CleanupStep::Remove, e);
            }
        }

        errors
    }
}

/// Runs complete task cycles
pub struct TaskRunner {
    settings: Arc<TaskSettings>,
    suite: Arc<dyn TestSuite>,
}

impl TaskRunner {
    pub fn new(settings: TaskSettings, suite: Arc<dyn TestSuite>) -> Self {
        Self {
            settings: Arc::new(settings),
            suite,
        }
    }

    /// Runs one job to completion, teardown included
    ///
    /// Provisioning and tests run in their own task. The state they fill in
    /// lives outside it, so teardown still runs if that task panics.
    pub async fn run(&self, job: RepoJob) -> TaskResult {
        let started_at = Utc::now();
        info!("Starting task for {}", job.name);

        let state = Arc::new(Mutex::new(TaskState::default()));
        let outcome = tokio::spawn(provision_and_test(
            Arc::clone(&self.settings),
            Arc::clone(&self.suite),
            job.clone(),
            Arc::clone(&state),
        ))
        .await
        .unwrap_or_else(|e| {
            error!("Task for {} panicked: {}", job.name, e);
            Err(TaskError::Panicked(e.to_string()))
        });

        let cleanup = state.lock().await.teardown(job.client.clone()).await;

        let error = match outcome {
            Ok(()) if cleanup.is_empty() => None,
            Ok(()) => Some(TaskError::Cleanup(cleanup)),
            Err(e) => Some(e.with_cleanup(cleanup)),
        };

        match error {
            None => {
                info!("Task for {} succeeded", job.name);
                TaskResult::succeeded(job.name, started_at)
            }
            Some(e) => {
                error!("Task for {} failed: {}", job.name, e);
                TaskResult::failed(job.name, started_at, e)
            }
        }
    }
}

/// Holds the state lock throughout; a panic releases it on unwind
async fn provision_and_test(
    settings: Arc<TaskSettings>,
    suite: Arc<dyn TestSuite>,
    job: RepoJob,
    state: Arc<Mutex<TaskState>>,
) -> Result<(), TaskError> {
    let mut state = state.lock().await;

    let network = NetworkBinding::new(job.client.clone())
        .create_isolated(&settings.network_prefix, &settings.network_driver)
        .await?;
    state.network = Some(network.clone());

    let pool = ResourcePool::new(job.client.clone(), job.name.clone(), settings.resource.clone());
    match pool.provision(&settings.resources).await {
        Ok(resources) => state.resources = resources,
        Err(partial) => {
            let (owned, error) = partial.into_owned();
            state.resources = owned;
            return Err(error);
        }
    }

    let repo = Repo::ensure_image(&job.name, job.client.clone(), &settings.repo).await?;

    let endpoint =
        Endpoint::create(repo, &network, &state.resources, &settings.readiness).await?;
    let endpoint = state.endpoint.insert(endpoint);

    suite.run(endpoint).await
}
