//! Resource pool
//!
//! Provisions the dependency containers (databases, caches, ...) an endpoint
//! needs. Resources are provisioned in configured order and named per task as
//! `<repo>-<resource>-resource`.
//!
//! Reuse contract: when a container with the derived name already exists it
//! is reused as-is. It is NOT started and NOT checked for health; callers
//! must not assume a reused resource was freshly booted.
//!
//! The pool performs no wiring. Each `Resource` carries its endpoint target
//! and the endpoint derives env and links from it.

use matrix_core::{
    CleanupError, ContainerHandle, ContainerOptions, ResourceSpec, RuntimeClient, TaskError,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cleanup::teardown_container;
use crate::repo::{ensure_local_image, split_reference};

/// A dependency container owned by one task
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub endpoint_target: String,
    pub endpoint_env: BTreeMap<String, String>,
    pub container: Option<ContainerHandle>,
    /// Found already existing rather than created by this task
    pub reused: bool,
}

impl Resource {
    fn from_spec(spec: &ResourceSpec) -> Self {
        Self {
            name: spec.name.clone(),
            endpoint_target: spec.endpoint_target.clone(),
            endpoint_env: spec.endpoint_env.clone(),
            container: None,
            reused: false,
        }
    }

    /// Name of the underlying container, if one exists
    pub fn container_name(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.name.as_str())
    }

    /// Stops and removes the container, attempting every step
    pub async fn clean(&mut self, client: &dyn RuntimeClient) -> Result<(), CleanupError> {
        teardown_container(client, &mut self.container)
            .await
            .into_result()
    }
}

/// Cleans resources in reverse provisioning order, collecting every failure
pub async fn clean_all(client: &dyn RuntimeClient, resources: &mut [Resource]) -> CleanupError {
    let mut errors = CleanupError::new();
    for resource in resources.iter_mut().rev() {
        if let Err(e) = resource.clean(client).await {
            errors.merge(e);
        }
    }
    errors
}

/// A failed provisioning run
///
/// Ownership of everything built so far moves to the caller, which is
/// responsible for tearing it down. The pool never rolls back itself.
#[derive(Debug)]
pub struct PartialProvision {
    /// Resources fully provisioned before the failure
    pub provisioned: Vec<Resource>,
    /// The resource that failed, if its container was created
    pub failed: Option<Resource>,
    pub error: TaskError,
}

impl PartialProvision {
    /// Every resource that holds a container and so needs teardown
    pub fn into_owned(self) -> (Vec<Resource>, TaskError) {
        let mut owned = self.provisioned;
        owned.extend(self.failed);
        (owned, self.error)
    }
}

/// Settings for resource images
#[derive(Debug, Clone)]
pub struct ResourceSettings {
    /// Namespace of default resource images (`<namespace>/the-matrix-<name>`)
    pub namespace: String,
    pub settle_delay: Duration,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            namespace: "ihsw".to_string(),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// Provisions resources for one task
pub struct ResourcePool {
    client: Arc<dyn RuntimeClient>,
    scope: String,
    settings: ResourceSettings,
}

impl ResourcePool {
    /// Creates a pool scoped to one task
    ///
    /// # Arguments
    /// * `client` - Runtime client
    /// * `scope` - Task scope (the repo name), prefixed onto container names
    /// * `settings` - Image settings
    pub fn new(
        client: Arc<dyn RuntimeClient>,
        scope: impl Into<String>,
        settings: ResourceSettings,
    ) -> Self {
        Self {
            client,
            scope: scope.into(),
            settings,
        }
    }

    /// Deterministic container name of a resource in this scope
    pub fn container_name(&self, spec: &ResourceSpec) -> String {
        format!("{}-{}-resource", self.scope, spec.name)
    }

    /// Provisions every spec in order, stopping at the first error
    pub async fn provision(
        &self,
        specs: &[ResourceSpec],
    ) -> Result<Vec<Resource>, PartialProvision> {
        let mut provisioned = Vec::with_capacity(specs.len());

        for spec in specs {
            let mut resource = Resource::from_spec(spec);
            match self.provision_one(spec, &mut resource).await {
                Ok(()) => provisioned.push(resource),
                Err(error) => {
                    warn!(
                        "Provisioning resource {} for {} failed after {} resource(s): {}",
                        spec.name,
                        self.scope,
                        provisioned.len(),
                        error
                    );
                    let failed = resource.container.is_some().then_some(resource);
                    return Err(PartialProvision {
                        provisioned,
                        failed,
                        error,
                    });
                }
            }
        }

        info!("Provisioned {} resource(s) for {}", provisioned.len(), self.scope);
        Ok(provisioned)
    }

    async fn provision_one(
        &self,
        spec: &ResourceSpec,
        resource: &mut Resource,
    ) -> Result<(), TaskError> {
        let name = self.container_name(spec);

        let existing = self
            .client
            .find_container(&name)
            .await
            .map_err(|source| TaskError::ContainerCreate {
                name: name.clone(),
                source,
            })?;

        if let Some(container) = existing {
            info!(
                "Reusing existing resource container {} (state not verified)",
                container.name
            );
            resource.container = Some(container);
            resource.reused = true;
            return Ok(());
        }

        info!("Creating resource container {}", name);
        let image = self.resolve_image(spec).await?;

        let container = self
            .client
            .create_container(&ContainerOptions::new(&name, &image))
            .await
            .map_err(|source| TaskError::ContainerCreate {
                name: name.clone(),
                source,
            })?;
        resource.container = Some(container.clone());

        self.client
            .start_container(&container, &[])
            .await
            .map_err(|source| TaskError::ContainerStart {
                name: name.clone(),
                source,
            })?;

        debug!("Resource container {} started", name);
        Ok(())
    }

    /// Builds from the context dir, or pulls the image if absent
    async fn resolve_image(&self, spec: &ResourceSpec) -> Result<String, TaskError> {
        let image = spec
            .image
            .clone()
            .unwrap_or_else(|| format!("{}/the-matrix-{}", self.settings.namespace, spec.name));

        if let Some(dir) = &spec.context_dir {
            info!("Building resource image {} from {}", image, dir.display());
            self.client
                .build_image(&image, dir)
                .await
                .map_err(|source| TaskError::Pull {
                    image: image.clone(),
                    source,
                })?;
            return Ok(image);
        }

        let (name, tag) = split_reference(&image);
        ensure_local_image(self.client.as_ref(), name, tag, self.settings.settle_delay).await?;
        Ok(format!("{}:{}", name, tag))
    }
}
