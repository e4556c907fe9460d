//! Resource configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration of one dependency container an endpoint needs
///
/// Loaded from JSON, e.g.
/// `{"name": "db", "endpoint_target": "db", "context_dir": "./db"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Short resource name, used in the container name
    pub name: String,

    /// Label the endpoint uses to reach this resource
    pub endpoint_target: String,

    /// Prebuilt image to use
    #[serde(default)]
    pub image: Option<String>,

    /// Build context to build the image from
    #[serde(default)]
    pub context_dir: Option<PathBuf>,

    /// Extra variables injected into the endpoint, verbatim
    #[serde(default)]
    pub endpoint_env: BTreeMap<String, String>,
}

impl ResourceSpec {
    pub fn new(name: impl Into<String>, endpoint_target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint_target: endpoint_target.into(),
            image: None,
            context_dir: None,
            endpoint_env: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = Some(dir.into());
        self
    }

    pub fn with_endpoint_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.endpoint_env.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_from_json_defaults() {
        let spec: ResourceSpec =
            serde_json::from_str(r#"{"name": "db", "endpoint_target": "db"}"#).unwrap();

        assert_eq!(spec, ResourceSpec::new("db", "db"));
        assert!(spec.endpoint_env.is_empty());
    }

    #[test]
    fn test_spec_from_json_full() {
        let spec: ResourceSpec = serde_json::from_str(
            r#"{
                "name": "db",
                "endpoint_target": "database",
                "context_dir": "./db",
                "endpoint_env": {"DATABASE_HOST": "Db"}
            }"#,
        )
        .unwrap();

        assert_eq!(spec.context_dir, Some(PathBuf::from("./db")));
        assert_eq!(
            spec.endpoint_env.get("DATABASE_HOST"),
            Some(&"Db".to_string())
        );
    }
}
