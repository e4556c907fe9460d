//! Error types for the Matrix orchestrator
//!
//! Two layers:
//! - `RuntimeError`: a single runtime-client call failed
//! - `TaskError`: a lifecycle step of a task failed, carrying the runtime cause
//!
//! Teardown failures are collected in `CleanupError` and attached to the
//! primary failure instead of replacing it.

use std::fmt;
use thiserror::Error;

/// Errors raised by a runtime client implementation
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A runtime command exited unsuccessfully
    #[error("`{command}` failed (exit code {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// The runtime could not be reached at all
    #[error("I/O error talking to the container runtime: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime answered with output we could not understand
    #[error("Failed to parse runtime output: {0}")]
    Parse(String),

    /// Object lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// An HTTP probe against a container failed
    #[error("HTTP probe failed: {0}")]
    Http(String),
}

impl RuntimeError {
    /// Create a command failure from its parts
    pub fn command_failed(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Check if this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for RuntimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Terminal error of a task, or of one lifecycle step within it
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Failed to pull image {image}: {source}")]
    Pull {
        image: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to create container {name}: {source}")]
    ContainerCreate {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Failed to start container {name}: {source}")]
    ContainerStart {
        name: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Network {network}: {source}")]
    Network {
        network: String,
        #[source]
        source: RuntimeError,
    },

    #[error("Container {name} was not ready after {waited_ms}ms")]
    ReadinessTimeout { name: String, waited_ms: u128 },

    #[error("Tests against {name} failed with exit code {exit_code}")]
    TestFailed { name: String, exit_code: i64 },

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("{primary}; teardown also failed: {cleanup}")]
    WithCleanup {
        primary: Box<TaskError>,
        cleanup: CleanupError,
    },
}

impl TaskError {
    /// Attaches a teardown failure to this error without hiding it
    pub fn with_cleanup(self, cleanup: CleanupError) -> Self {
        if cleanup.is_empty() {
            return self;
        }
        Self::WithCleanup {
            primary: Box::new(self),
            cleanup,
        }
    }

    /// The error that caused the task to fail, ignoring teardown noise
    pub fn primary(&self) -> &TaskError {
        match self {
            Self::WithCleanup { primary, .. } => primary.primary(),
            other => other,
        }
    }

    /// Teardown failures carried by this error, if any
    pub fn cleanup(&self) -> Option<&CleanupError> {
        match self {
            Self::Cleanup(cleanup) => Some(cleanup),
            Self::WithCleanup { cleanup, .. } => Some(cleanup),
            _ => None,
        }
    }

    pub fn is_container_start(&self) -> bool {
        matches!(self.primary(), Self::ContainerStart { .. })
    }

    pub fn is_container_create(&self) -> bool {
        matches!(self.primary(), Self::ContainerCreate { .. })
    }
}

/// Which teardown step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    Inspect,
    Stop,
    Remove,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            CleanupStep::Inspect => "inspect",
            CleanupStep::Stop => "stop",
            CleanupStep::Remove => "remove",
        };
        f.write_str(step)
    }
}

/// A single failed teardown step
#[derive(Debug, Error)]
#[error("{step} {object}: {source}")]
pub struct CleanupFailure {
    pub object: String,
    pub step: CleanupStep,
    #[source]
    pub source: RuntimeError,
}

/// Every teardown failure of one cleanup pass
#[derive(Debug, Default)]
pub struct CleanupError {
    pub failures: Vec<CleanupFailure>,
}

impl CleanupError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed step
    pub fn push(&mut self, object: impl Into<String>, step: CleanupStep, source: RuntimeError) {
        self.failures.push(CleanupFailure {
            object: object.into(),
            step,
            source,
        });
    }

    /// Folds another pass into this one
    pub fn merge(&mut self, other: CleanupError) {
        self.failures.extend(other.failures);
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// `Ok(())` when nothing failed
    pub fn into_result(self) -> Result<(), CleanupError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for CleanupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cleanup step(s) failed", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for CleanupError {}
