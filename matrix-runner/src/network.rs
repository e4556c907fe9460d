//! Network binding
//!
//! Every task gets its own network named `<prefix>-<uuid>`, so containers of
//! concurrently running tasks never resolve each other by name.
//!
//! Membership returned by `connect` is not trusted. `refresh` fetches the
//! network by id and is the only authoritative read.

use matrix_core::{ContainerHandle, NetworkHandle, RuntimeClient, RuntimeError, TaskError};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Network operations over an injected runtime client
#[derive(Clone)]
pub struct NetworkBinding {
    client: Arc<dyn RuntimeClient>,
}

impl NetworkBinding {
    pub fn new(client: Arc<dyn RuntimeClient>) -> Self {
        Self { client }
    }

    /// Creates a uniquely named network for one task
    pub async fn create_isolated(
        &self,
        prefix: &str,
        driver: &str,
    ) -> Result<NetworkHandle, TaskError> {
        let name = prefixed_name(prefix);

        let network = self
            .client
            .create_network(&name, driver)
            .await
            .map_err(|source| network_error(&name, source))?;

        info!("Created network {} ({})", network.name, network.id);
        Ok(network)
    }

    /// Attaches a container to the network under the given aliases
    ///
    /// The returned handle may not list the new member yet.
    pub async fn connect(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
        aliases: &[String],
    ) -> Result<NetworkHandle, TaskError> {
        debug!(
            "Connecting {} to network {} as {:?}",
            container.name, network.name, aliases
        );
        self.client
            .connect(network, container, aliases)
            .await
            .map_err(|source| network_error(&network.name, source))
    }

    /// Re-reads the network by id
    pub async fn refresh(&self, network: &NetworkHandle) -> Result<NetworkHandle, TaskError> {
        self.client
            .get_network(&network.id)
            .await
            .map_err(|source| network_error(&network.name, source))
    }

    /// Whether the container is currently a member, checked against a fresh read
    pub async fn is_member(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> Result<bool, TaskError> {
        Ok(self.refresh(network).await?.has_member(&container.id))
    }

    /// Resolves the container's address on the network
    ///
    /// # Errors
    /// `TaskError::Network` if the container is not a member after a refresh
    pub async fn container_ip(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> Result<IpAddr, TaskError> {
        let current = self.refresh(network).await?;
        if !current.has_member(&container.id) {
            return Err(network_error(
                &network.name,
                RuntimeError::NotFound(format!("container {} is not attached", container.name)),
            ));
        }

        self.client
            .get_container_ip(&current, container)
            .await
            .map_err(|source| network_error(&network.name, source))
    }

    pub async fn remove(&self, network: &NetworkHandle) -> Result<(), RuntimeError> {
        self.client.remove_network(network).await?;
        info!("Removed network {}", network.name);
        Ok(())
    }
}

/// `<prefix>-<uuid v4>`
pub fn prefixed_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

fn network_error(network: &str, source: RuntimeError) -> TaskError {
    TaskError::Network {
        network: network.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use matrix_core::ContainerOptions;

    async fn setup() -> (FakeRuntime, NetworkBinding, NetworkHandle, ContainerHandle) {
        let runtime = FakeRuntime::new();
        let client = runtime.clone().into_client();
        let binding = NetworkBinding::new(client.clone());
        let network = binding.create_isolated("test-network", "bridge").await.unwrap();
        let container = client
            .create_container(&ContainerOptions::new("db-resource", "postgres:latest"))
            .await
            .unwrap();
        (runtime, binding, network, container)
    }

    #[test]
    fn test_prefixed_names_are_unique() {
        let a = prefixed_name("matrix");
        let b = prefixed_name("matrix");
        assert!(a.starts_with("matrix-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_create_isolated_networks_differ() {
        let runtime = FakeRuntime::new();
        let binding = NetworkBinding::new(runtime.clone().into_client());

        let first = binding.create_isolated("matrix", "bridge").await.unwrap();
        let second = binding.create_isolated("matrix", "bridge").await.unwrap();

        assert_ne!(first.name, second.name);
        assert_ne!(first.id, second.id);
        assert_eq!(first.driver, "bridge");
        assert_eq!(runtime.network_names().len(), 2);
    }

    #[tokio::test]
    async fn test_connect_then_refresh_shows_member() {
        let (_runtime, binding, network, container) = setup().await;

        binding.connect(&network, &container, &[]).await.unwrap();
        let current = binding.refresh(&network).await.unwrap();

        assert_eq!(current.containers.len(), 1);
        assert!(current.has_member(&container.id));
    }

    #[tokio::test]
    async fn test_stale_connect_membership_is_not_authoritative() {
        let (runtime, binding, network, container) = setup().await;
        runtime.stale_connect();

        let returned = binding.connect(&network, &container, &[]).await.unwrap();
        assert!(!returned.has_member(&container.id));

        assert!(binding.is_member(&network, &container).await.unwrap());
    }

    #[tokio::test]
    async fn test_container_ip_requires_membership() {
        let (runtime, binding, network, container) = setup().await;
        runtime.stale_connect();

        let err = binding.container_ip(&network, &container).await.unwrap_err();
        assert!(matches!(err, TaskError::Network { .. }));

        // Trusting the handle returned by connect would still fail here; the
        // refresh inside container_ip is what sees the new member.
        let stale = binding.connect(&network, &container, &[]).await.unwrap();
        let ip = binding.container_ip(&stale, &container).await.unwrap();
        assert!(ip.is_ipv4());
    }

    #[tokio::test]
    async fn test_remove_network() {
        let (runtime, binding, network, _container) = setup().await;

        binding.remove(&network).await.unwrap();
        assert!(runtime.network_names().is_empty());
        assert!(binding.refresh(&network).await.is_err());
    }
}
