//! Endpoint lifecycle
//!
//! The endpoint is the container built from the repository under test. It
//! is created on the task network, wired to the task's resources through
//! env vars and links derived from each resource's endpoint target, started,
//! and polled until ready.
//!
//! Teardown is best-effort: stop and remove are both attempted and all
//! failures are reported together.

use matrix_core::{
    CleanupError, ContainerHandle, ContainerOptions, Link, NetworkHandle, RuntimeClient,
    RuntimeError, TaskError,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cleanup::{remove_leftover, teardown_container};
use crate::network::NetworkBinding;
use crate::readiness::{ReadinessCheck, ReadinessSettings};
use crate::repo::Repo;
use crate::resource::Resource;

/// Network alias every endpoint answers to, as seen by the test client
pub const ENDPOINT_ALIAS: &str = "ApiServer";

/// Env vars and links an endpoint receives for its resources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Wiring {
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    pub links: Vec<Link>,
}

/// Derives endpoint wiring from resources
///
/// For each resource with a container, in order:
/// - `<TARGET>_HOST=<container name>`
/// - the resource's extra endpoint env, in key order
/// - a link `<container name>:<target>`
///
/// Identical resource lists always produce identical wiring.
pub fn derive_wiring(resources: &[Resource]) -> Wiring {
    let mut wiring = Wiring::default();

    for resource in resources {
        let Some(container) = resource.container_name() else {
            continue;
        };

        wiring.env.push(format!(
            "{}_HOST={}",
            env_key(&resource.endpoint_target),
            container
        ));
        for (key, value) in &resource.endpoint_env {
            wiring.env.push(format!("{}={}", key, value));
        }
        wiring
            .links
            .push(Link::new(container, resource.endpoint_target.clone()));
    }

    wiring
}

/// `db-main` -> `DB_MAIN`
fn env_key(target: &str) -> String {
    target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Container name of a repo's endpoint
pub fn container_name(repo: &str) -> String {
    format!("{}-endpoint", repo)
}

/// A resource as seen from the endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLink {
    pub name: String,
    pub endpoint_target: String,
    pub container: String,
}

/// The container under test
pub struct Endpoint {
    repo: Repo,
    network: NetworkHandle,
    container: Option<ContainerHandle>,
    resources: Vec<ResourceLink>,
}

impl Endpoint {
    /// Creates, starts and waits for an endpoint
    ///
    /// # Arguments
    /// * `repo` - Repo whose image is already present
    /// * `network` - Task network the endpoint joins
    /// * `resources` - Provisioned resources, connected to the network under their target
    /// * `readiness` - Readiness polling settings
    ///
    /// If start or readiness fails, the endpoint's own container is torn down
    /// before returning; any teardown failure rides along with the error.
    pub async fn create(
        repo: Repo,
        network: &NetworkHandle,
        resources: &[Resource],
        readiness: &ReadinessSettings,
    ) -> Result<Self, TaskError> {
        let client = repo.client().clone();
        let name = container_name(repo.name());

        let network = attach_resources(client.clone(), network, resources).await?;
        remove_leftover(client.as_ref(), &name).await?;

        let wiring = derive_wiring(resources);
        let options = ContainerOptions::new(&name, repo.reference())
            .with_env(wiring.env)
            .with_network(&network.id)
            .with_aliases(vec![ENDPOINT_ALIAS.to_string()]);

        info!("Creating endpoint container {}", name);
        let container = client
            .create_container(&options)
            .await
            .map_err(|source| TaskError::ContainerCreate {
                name: name.clone(),
                source,
            })?;

        let mut endpoint = Self {
            repo,
            network,
            container: Some(container),
            resources: resources
                .iter()
                .filter_map(|r| {
                    r.container_name().map(|c| ResourceLink {
                        name: r.name.clone(),
                        endpoint_target: r.endpoint_target.clone(),
                        container: c.to_string(),
                    })
                })
                .collect(),
        };

        if let Err(error) = endpoint.launch(&wiring.links, readiness).await {
            warn!("Endpoint {} failed to come up: {}", name, error);
            let cleanup = endpoint.clean().await.err().unwrap_or_default();
            return Err(error.with_cleanup(cleanup));
        }

        Ok(endpoint)
    }

    async fn launch(&self, links: &[Link], readiness: &ReadinessSettings) -> Result<(), TaskError> {
        let Some(container) = &self.container else {
            return Ok(());
        };

        self.client()
            .start_container(container, links)
            .await
            .map_err(|source| TaskError::ContainerStart {
                name: container.name.clone(),
                source,
            })?;
        debug!("Endpoint container {} started", container.name);

        ReadinessCheck::new(self.client().clone(), readiness.clone())
            .wait(&self.network, container)
            .await
    }

    pub fn name(&self) -> &str {
        self.repo.name()
    }

    pub fn client(&self) -> &Arc<dyn RuntimeClient> {
        self.repo.client()
    }

    pub fn repo(&self) -> &Repo {
        &self.repo
    }

    pub fn network(&self) -> &NetworkHandle {
        &self.network
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn resources(&self) -> &[ResourceLink] {
        &self.resources
    }

    /// Stops (if running) and removes the endpoint container
    ///
    /// Every step is attempted; a `None` container is a no-op.
    pub async fn clean(&mut self) -> Result<(), CleanupError> {
        let client = self.repo.client().clone();
        teardown_container(client.as_ref(), &mut self.container)
            .await
            .into_result()
    }
}

/// Connects each resource to the network under its target alias
///
/// Returns a network snapshot re-read by id; the `connect` responses are
/// not used for membership.
async fn attach_resources(
    client: Arc<dyn RuntimeClient>,
    network: &NetworkHandle,
    resources: &[Resource],
) -> Result<NetworkHandle, TaskError> {
    let binding = NetworkBinding::new(client);

    for resource in resources {
        if let Some(container) = &resource.container {
            binding
                .connect(network, container, &[resource.endpoint_target.clone()])
                .await?;
        }
    }

    let current = binding.refresh(network).await?;
    for resource in resources {
        if let Some(container) = &resource.container {
            if !current.has_member(&container.id) {
                return Err(TaskError::Network {
                    network: network.name.clone(),
                    source: RuntimeError::NotFound(format!(
                        "resource {} did not join the network",
                        container.name
                    )),
                });
            }
        }
    }

    Ok(current)
}
