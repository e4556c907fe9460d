//! Network domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Driver used when none is configured
pub const DEFAULT_NETWORK_DRIVER: &str = "bridge";

/// Snapshot of a runtime network
///
/// `containers` holds the ids of member containers as seen when the
/// snapshot was taken. Only a snapshot fetched by id is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub containers: BTreeSet<String>,
}

impl NetworkHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            driver: driver.into(),
            containers: BTreeSet::new(),
        }
    }

    /// Whether the container id was a member when this snapshot was taken
    pub fn has_member(&self, container_id: &str) -> bool {
        self.containers.contains(container_id)
    }
}
