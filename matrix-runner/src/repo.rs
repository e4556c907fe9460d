//! Repo lifecycle
//!
//! Resolves a repository name to a locally available image:
//! - Reuses an image already in the local store as-is (no refresh)
//! - Otherwise pulls it under the configured tag, then waits a settle delay
//!
//! A stale local image is never re-pulled.

use matrix_core::{ContainerHandle, RuntimeClient, TaskError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Tag used when an image reference carries none
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Image naming and pull settings for repositories
#[derive(Debug, Clone)]
pub struct RepoSettings {
    pub namespace: String,
    pub tag: String,
    pub settle_delay: Duration,
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            namespace: "ihsw".to_string(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            settle_delay: Duration::from_secs(5),
        }
    }
}

/// A repository whose image is available locally
#[derive(Clone)]
pub struct Repo {
    name: String,
    image: String,
    tag: String,
    client: Arc<dyn RuntimeClient>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repo")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("tag", &self.tag)
            .finish()
    }
}

impl Repo {
    /// Ensures the repo's image is present, pulling it if absent
    ///
    /// # Arguments
    /// * `name` - Repository name, the image is `<namespace>/<name>`
    /// * `client` - Runtime client
    /// * `settings` - Namespace, tag and settle delay
    ///
    /// # Errors
    /// `TaskError::Pull` if the presence check or the pull fails. No retry.
    pub async fn ensure_image(
        name: &str,
        client: Arc<dyn RuntimeClient>,
        settings: &RepoSettings,
    ) -> Result<Self, TaskError> {
        let image = image_name(&settings.namespace, name);

        ensure_local_image(
            client.as_ref(),
            &image,
            &settings.tag,
            settings.settle_delay,
        )
        .await?;

        Ok(Self {
            name: name.to_string(),
            image,
            tag: settings.tag.clone(),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &Arc<dyn RuntimeClient> {
        &self.client
    }

    /// Full image reference, `image:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Containers on the runtime that were created from this repo's image
    pub async fn containers(&self) -> Result<Vec<ContainerHandle>, TaskError> {
        self.client
            .containers_by_image(&self.image, &self.tag)
            .await
            .map_err(|source| TaskError::ContainerCreate {
                name: self.reference(),
                source,
            })
    }
}

/// Image name of a repository under a namespace
pub fn image_name(namespace: &str, repo: &str) -> String {
    format!("{}/{}", namespace, repo)
}

/// Splits `image[:tag]` into name and tag
///
/// A `:` before the last `/` belongs to a registry port, not a tag.
pub fn split_reference(reference: &str) -> (&str, &str) {
    let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[last_slash..].rfind(':') {
        Some(pos) => {
            let split = last_slash + pos;
            (&reference[..split], &reference[split + 1..])
        }
        None => (reference, DEFAULT_IMAGE_TAG),
    }
}

/// Pulls `image:tag` unless it is already in the local store
///
/// Returns `true` if a pull happened. After a pull, sleeps `settle_delay`
/// so follow-up creates can resolve the image.
pub async fn ensure_local_image(
    client: &dyn RuntimeClient,
    image: &str,
    tag: &str,
    settle_delay: Duration,
) -> Result<bool, TaskError> {
    let reference = format!("{}:{}", image, tag);

    let present = client
        .has_image(&reference)
        .await
        .map_err(|source| TaskError::Pull {
            image: reference.clone(),
            source,
        })?;

    if present {
        debug!("Image {} already present, reusing", reference);
        return Ok(false);
    }

    info!("Pulling image {}", reference);
    client
        .pull_image(image, tag)
        .await
        .map_err(|source| TaskError::Pull {
            image: reference.clone(),
            source,
        })?;

    if !settle_delay.is_zero() {
        debug!("Waiting {:?} for image {} to settle", settle_delay, reference);
        tokio::time::sleep(settle_delay).await;
    }

    info!("Image {} pulled", reference);
    Ok(true)
}
