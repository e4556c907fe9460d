//! Best-effort container teardown
//!
//! Every step is attempted even when an earlier one fails: a failed stop
//! never prevents the remove. Failures are collected, not short-circuited.

use matrix_core::{CleanupError, CleanupStep, ContainerHandle, RuntimeClient, TaskError};
use tracing::{debug, warn};

/// Stops (if running) and removes a container
///
/// A `None` handle is a no-op. On a successful remove the handle is taken,
/// so cleaning twice is harmless.
pub async fn teardown_container(
    client: &dyn RuntimeClient,
    handle: &mut Option<ContainerHandle>,
) -> CleanupError {
    let mut errors = CleanupError::new();

    let Some(container) = handle.as_ref() else {
        return errors;
    };

    // Stop when running, or when the state could not be read.
    let should_stop = match client.is_running(container).await {
        Ok(running) => running,
        Err(e) if e.is_not_found() => {
            debug!("Container {} is already gone", container.name);
            *handle = None;
            return errors;
        }
        Err(e) => {
            warn!("Failed to inspect container {}: {}", container.name, e);
            errors.push(&container.name, CleanupStep::Inspect, e);
            true
        }
    };

    if should_stop {
        debug!("Stopping container {}", container.name);
        if let Err(e) = client.stop_container(container).await {
            warn!("Failed to stop container {}: {}", container.name, e);
            errors.push(&container.name, CleanupStep::Stop, e);
        }
    }

    debug!("Removing container {}", container.name);
    match client.remove_container(container).await {
        Ok(()) => {
            debug!("Container {} removed", container.name);
            *handle = None;
        }
        Err(e) => {
            warn!("Failed to remove container {}: {}", container.name, e);
            errors.push(&container.name, CleanupStep::Remove, e);
        }
    }

    errors
}

/// Tears down a container left over under `name` by an earlier run
///
/// Found by name, so a leftover from any image or tag is caught. Only a
/// failed remove is an error; the name is free once it succeeds.
pub async fn remove_leftover(client: &dyn RuntimeClient, name: &str) -> Result<(), TaskError> {
    let existing = client
        .find_container(name)
        .await
        .map_err(|source| TaskError::ContainerCreate {
            name: name.to_string(),
            source,
        })?;

    let Some(container) = existing else {
        return Ok(());
    };

    warn!("Removing leftover container {}", container.name);
    let mut handle = Some(container);
    let errors = teardown_container(client, &mut handle).await;

    if handle.is_none() {
        return Ok(());
    }
    match errors.failures.into_iter().last() {
        Some(failure) => Err(TaskError::ContainerCreate {
            name: name.to_string(),
            source: failure.source,
        }),
        None => Ok(()),
    }
}
