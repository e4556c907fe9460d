//! Runtime client abstraction
//!
//! The orchestrator never talks to a container engine directly. Every
//! lifecycle component receives an `Arc<dyn RuntimeClient>` and issues the
//! primitive image, container and network calls through it. Implementations
//! must tolerate concurrent calls from several workers.

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::Path;

use crate::domain::container::{ContainerHandle, ContainerOptions, Link};
use crate::domain::network::NetworkHandle;
use crate::error::RuntimeError;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Primitive container engine operations
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Whether the image is present in the local store
    async fn has_image(&self, image: &str) -> RuntimeResult<bool>;

    /// Pulls `image:tag`, blocking until done
    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<()>;

    /// Builds `image` from a local build context
    async fn build_image(&self, image: &str, context_dir: &Path) -> RuntimeResult<()>;

    /// Creates (but does not start) a container
    async fn create_container(&self, options: &ContainerOptions) -> RuntimeResult<ContainerHandle>;

    /// Starts a created container with the given link declarations
    async fn start_container(&self, container: &ContainerHandle, links: &[Link])
    -> RuntimeResult<()>;

    async fn stop_container(&self, container: &ContainerHandle) -> RuntimeResult<()>;

    async fn remove_container(&self, container: &ContainerHandle) -> RuntimeResult<()>;

    async fn is_running(&self, container: &ContainerHandle) -> RuntimeResult<bool>;

    /// Blocks until the container exits and returns its exit code
    async fn wait_container(&self, container: &ContainerHandle) -> RuntimeResult<i64>;

    /// Looks a container up by name, `None` if it does not exist
    async fn find_container(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>>;

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkHandle>;

    async fn remove_network(&self, network: &NetworkHandle) -> RuntimeResult<()>;

    /// Attaches a container to a network
    ///
    /// The returned handle is not guaranteed to reflect the new membership.
    /// Use `get_network` before trusting `containers`.
    async fn connect(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
        aliases: &[String],
    ) -> RuntimeResult<NetworkHandle>;

    /// Fetches the current state of a network by id
    async fn get_network(&self, id: &str) -> RuntimeResult<NetworkHandle>;

    /// Address of the container on the given network
    async fn get_container_ip(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> RuntimeResult<IpAddr>;

    /// Containers (running or not) created from `image:tag`
    async fn containers_by_image(&self, image: &str, tag: &str)
    -> RuntimeResult<Vec<ContainerHandle>>;
}
