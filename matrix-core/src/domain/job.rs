//! Job domain types

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::error::TaskError;
use crate::runtime::RuntimeClient;

/// One repository to run through a full task cycle
///
/// Immutable once sent to the scheduler.
#[derive(Clone)]
pub struct RepoJob {
    pub name: String,
    pub client: Arc<dyn RuntimeClient>,
}

impl RepoJob {
    pub fn new(name: impl Into<String>, client: Arc<dyn RuntimeClient>) -> Self {
        Self {
            name: name.into(),
            client,
        }
    }
}

impl fmt::Debug for RepoJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoJob").field("name", &self.name).finish()
    }
}

/// Outcome of one task
#[derive(Debug)]
pub struct TaskResult {
    pub repo_name: String,
    pub error: Option<TaskError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn succeeded(repo_name: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            repo_name: repo_name.into(),
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        repo_name: impl Into<String>,
        started_at: DateTime<Utc>,
        error: TaskError,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            error: Some(error),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Wall-clock time the task took
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
