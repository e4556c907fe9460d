//! Container domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a container known to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Parameters for creating a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOptions {
    /// Container name, unique on the runtime
    pub name: String,
    /// Fully qualified image reference
    pub image: String,
    /// `KEY=VALUE` pairs
    pub env: Vec<String>,
    /// Network to attach at creation time, if any
    pub network: Option<String>,
    /// Extra names the container answers to on that network
    pub aliases: Vec<String>,
}

impl ContainerOptions {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }
}

/// Legacy link declaration: make `container` resolvable as `alias`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub container: String,
    pub alias: String,
}

impl Link {
    pub fn new(container: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.alias)
    }
}
