//! Test step
//!
//! Runs the test suite against a ready endpoint. The default suite starts a
//! test-client container on the task network, linked to the endpoint as
//! `ApiServer`, and judges the run by the client's exit code. A client
//! container left over from an earlier run is removed first.

use async_trait::async_trait;
use matrix_core::{ContainerOptions, Link, TaskError};
use std::time::Duration;
use tracing::{info, warn};

use crate::cleanup::{remove_leftover, teardown_container};
use crate::endpoint::{ENDPOINT_ALIAS, Endpoint};
use crate::repo::{ensure_local_image, split_reference};

/// A test step run against a ready endpoint
#[async_trait]
pub trait TestSuite: Send + Sync {
    async fn run(&self, endpoint: &Endpoint) -> Result<(), TaskError>;
}

/// Runs a test-client image against the endpoint
pub struct ClientContainerSuite {
    image: String,
    settle_delay: Duration,
}

impl ClientContainerSuite {
    /// # Arguments
    /// * `image` - Test client image reference
    /// * `settle_delay` - Pause after pulling the client image
    pub fn new(image: impl Into<String>, settle_delay: Duration) -> Self {
        Self {
            image: image.into(),
            settle_delay,
        }
    }

    /// Container name of the test client for a repo
    pub fn container_name(repo: &str) -> String {
        format!("{}-client", repo)
    }
}

#[async_trait]
impl TestSuite for ClientContainerSuite {
    async fn run(&self, endpoint: &Endpoint) -> Result<(), TaskError> {
        let client = endpoint.client().clone();
        let Some(target) = endpoint.container() else {
            return Err(TaskError::ContainerStart {
                name: endpoint.name().to_string(),
                source: matrix_core::RuntimeError::NotFound("endpoint container".to_string()),
            });
        };

        let (image, tag) = split_reference(&self.image);
        ensure_local_image(client.as_ref(), image, tag, self.settle_delay).await?;

        let name = Self::container_name(endpoint.name());
        remove_leftover(client.as_ref(), &name).await?;

        let options = ContainerOptions::new(&name, format!("{}:{}", image, tag))
            .with_env(vec![format!("API_HOST={}", ENDPOINT_ALIAS)])
            .with_network(&endpoint.network().id);

        info!("Running tests against {}", endpoint.name());
        let container = client
            .create_container(&options)
            .await
            .map_err(|source| TaskError::ContainerCreate {
                name: name.clone(),
                source,
            })?;

        let mut handle = Some(container.clone());
        let outcome = async {
            client
                .start_container(&container, &[Link::new(&target.name, ENDPOINT_ALIAS)])
                .await
                .map_err(|source| TaskError::ContainerStart {
                    name: name.clone(),
                    source,
                })?;

            let exit_code = client
                .wait_container(&container)
                .await
                .map_err(|source| TaskError::ContainerStart {
                    name: name.clone(),
                    source,
                })?;

            if exit_code != 0 {
                return Err(TaskError::TestFailed {
                    name: endpoint.name().to_string(),
                    exit_code,
                });
            }
            Ok::<(), TaskError>(())
        }
        .await;

        let cleanup = teardown_container(client.as_ref(), &mut handle).await;
        if !cleanup.is_empty() {
            warn!("Failed to clean test client {}: {}", name, cleanup);
        }

        match outcome {
            Ok(()) => {
                info!("Tests against {} passed", endpoint.name());
                cleanup.into_result().map_err(TaskError::from)
            }
            Err(error) => Err(error.with_cleanup(cleanup)),
        }
    }
}
