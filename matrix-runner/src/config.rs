//! Runner configuration
//!
//! Defines all configurable parameters for the orchestrator including
//! pool size, image naming, network isolation, readiness probing and the
//! resources every endpoint depends on.

use anyhow::Context;
use matrix_core::{DEFAULT_NETWORK_DRIVER, ResourceSpec};
use std::path::Path;
use std::time::Duration;

use crate::readiness::{ReadinessProbe, ReadinessSettings};

/// Runner configuration
///
/// All delays and timeouts are configurable. The defaults are starting
/// points only; tune them for the images under test.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repositories to test
    pub repos: Vec<String>,

    /// Number of tasks allowed to run at once against the runtime
    pub worker_count: usize,

    /// Registry namespace images live under (`<namespace>/<repo>`)
    pub image_namespace: String,

    /// Tag pulled for repo images
    pub image_tag: String,

    /// Prefix for per-task network names
    pub network_prefix: String,

    /// Driver for per-task networks
    pub network_driver: String,

    /// Pause after a pull before the image is used
    pub pull_settle_delay: Duration,

    /// How endpoints are judged ready
    pub readiness: ReadinessSettings,

    /// Dependency containers provisioned for every endpoint
    pub resources: Vec<ResourceSpec>,

    /// Image that runs the test suite against an endpoint
    pub test_client_image: String,

    /// Podman binary to invoke
    pub podman_bin: String,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(repos: Vec<String>) -> Self {
        let image_namespace = "ihsw".to_string();
        Self {
            repos,
            worker_count: 2,
            test_client_image: format!("{}/the-matrix-client", image_namespace),
            image_namespace,
            image_tag: "latest".to_string(),
            network_prefix: "matrix".to_string(),
            network_driver: DEFAULT_NETWORK_DRIVER.to_string(),
            pull_settle_delay: Duration::from_secs(5),
            readiness: ReadinessSettings::default(),
            resources: Vec::new(),
            podman_bin: "podman".to_string(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - REPOS (optional, comma separated)
    /// - WORKER_COUNT (optional, default: 2)
    /// - IMAGE_NAMESPACE (optional, default: ihsw)
    /// - IMAGE_TAG (optional, default: latest)
    /// - NETWORK_PREFIX (optional, default: matrix)
    /// - NETWORK_DRIVER (optional, default: bridge)
    /// - PULL_SETTLE_DELAY (optional, seconds, default: 5)
    /// - READY_WARM_UP (optional, milliseconds, default: 0)
    /// - READY_INTERVAL (optional, milliseconds, default: 500)
    /// - READY_TIMEOUT (optional, seconds, default: 30)
    /// - READY_HTTP_PORT / READY_HTTP_PATH (optional, enables the HTTP probe)
    /// - RESOURCES_FILE (optional, JSON list of resource specs)
    /// - TEST_CLIENT_IMAGE (optional, default: <namespace>/the-matrix-client)
    /// - PODMAN_BIN (optional, default: podman)
    pub fn from_env() -> anyhow::Result<Self> {
        let repos = std::env::var("REPOS")
            .map(|s| parse_repo_list(&s))
            .unwrap_or_default();

        let mut config = Self::new(repos);

        if let Some(worker_count) = env_parse::<usize>("WORKER_COUNT") {
            config.worker_count = worker_count;
        }

        if let Ok(namespace) = std::env::var("IMAGE_NAMESPACE") {
            config.test_client_image = format!("{}/the-matrix-client", namespace);
            config.image_namespace = namespace;
        }

        if let Ok(tag) = std::env::var("IMAGE_TAG") {
            config.image_tag = tag;
        }

        if let Ok(prefix) = std::env::var("NETWORK_PREFIX") {
            config.network_prefix = prefix;
        }

        if let Ok(driver) = std::env::var("NETWORK_DRIVER") {
            config.network_driver = driver;
        }

        if let Some(secs) = env_parse::<u64>("PULL_SETTLE_DELAY") {
            config.pull_settle_delay = Duration::from_secs(secs);
        }

        if let Some(ms) = env_parse::<u64>("READY_WARM_UP") {
            config.readiness.warm_up = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse::<u64>("READY_INTERVAL") {
            config.readiness.interval = Duration::from_millis(ms);
        }

        if let Some(secs) = env_parse::<u64>("READY_TIMEOUT") {
            config.readiness.timeout = Duration::from_secs(secs);
        }

        if let Some(port) = env_parse::<u16>("READY_HTTP_PORT") {
            let path = std::env::var("READY_HTTP_PATH").unwrap_or_else(|_| "/".to_string());
            config.readiness.probe = ReadinessProbe::Http { port, path };
        }

        if let Ok(path) = std::env::var("RESOURCES_FILE") {
            config.resources = load_resources(Path::new(&path))?;
        }

        if let Ok(image) = std::env::var("TEST_CLIENT_IMAGE") {
            config.test_client_image = image;
        }

        if let Ok(bin) = std::env::var("PODMAN_BIN") {
            config.podman_bin = bin;
        }

        Ok(config)
    }

    /// Appends repositories given on the command line
    pub fn with_repos(mut self, repos: impl IntoIterator<Item = String>) -> Self {
        self.repos.extend(repos);
        self
    }

    /// Adds a resource every endpoint depends on
    pub fn with_resource(mut self, spec: ResourceSpec) -> Self {
        self.resources.push(spec);
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.image_namespace.is_empty() {
            anyhow::bail!("image_namespace cannot be empty");
        }

        if self.image_tag.is_empty() {
            anyhow::bail!("image_tag cannot be empty");
        }

        if self.network_prefix.is_empty() {
            anyhow::bail!("network_prefix cannot be empty");
        }

        if self.readiness.interval.is_zero() {
            anyhow::bail!("readiness interval must be greater than 0");
        }

        if self.readiness.timeout < self.readiness.warm_up {
            anyhow::bail!("readiness timeout must not be shorter than the warm-up");
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.resources {
            if spec.name.is_empty() || spec.endpoint_target.is_empty() {
                anyhow::bail!("resource name and endpoint_target cannot be empty");
            }
            if !seen.insert(spec.name.as_str()) {
                anyhow::bail!("resource '{}' is configured twice", spec.name);
            }
        }

        let mut repos = std::collections::HashSet::new();
        for repo in &self.repos {
            if !repos.insert(repo.as_str()) {
                anyhow::bail!("repo '{}' is listed twice", repo);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

/// Loads a JSON list of resource specs
pub fn load_resources(path: &Path) -> anyhow::Result<Vec<ResourceSpec>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read resources file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse resources file {}", path.display()))
}

fn parse_repo_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}
