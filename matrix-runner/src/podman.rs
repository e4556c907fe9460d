//! Podman runtime client
//!
//! Implements `RuntimeClient` by shelling out to the podman CLI:
//! - Checking podman availability at startup
//! - Image presence, pull and build
//! - Container create/start/stop/remove/wait and state inspection
//! - Network create/remove/connect and membership lookups
//!
//! Podman has no `--link`. Link declarations are satisfied through network
//! aliases: resources join the task network under their endpoint target,
//! and the endpoint under its own alias, so link aliases resolve via DNS.

use anyhow::{Context, Result};
use async_trait::async_trait;
use matrix_core::runtime::RuntimeResult;
use matrix_core::{
    ContainerHandle, ContainerOptions, Link, NetworkHandle, RuntimeClient, RuntimeError,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Checks if podman is installed and available
pub fn check_podman_available(bin: &str) -> Result<()> {
    let output = std::process::Command::new(bin)
        .arg("--version")
        .output()
        .with_context(|| format!("Failed to execute '{} --version'. Is podman installed?", bin))?;

    if !output.status.success() {
        anyhow::bail!("Podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("Podman is available: {}", version.trim());

    Ok(())
}

/// Runtime client backed by the podman CLI
#[derive(Debug, Clone)]
pub struct PodmanRuntime {
    bin: String,
}

impl PodmanRuntime {
    /// # Arguments
    /// * `bin` - Podman executable name or path
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    /// Runs podman and returns trimmed stdout, failing on non-zero exit
    async fn run(&self, args: &[&str]) -> RuntimeResult<String> {
        let command = format!("{} {}", self.bin, args.join(" "));
        debug!("Running {}", command);

        let output = Command::new(&self.bin).args(args).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        // Always log stdout/stderr as debug
        if !stdout.is_empty() {
            debug!("podman {} stdout: {}", args[0], stdout);
        }
        if !stderr.is_empty() {
            debug!("podman {} stderr: {}", args[0], stderr);
        }

        if !output.status.success() {
            if is_missing(&stderr) {
                return Err(RuntimeError::NotFound(stderr));
            }
            let exit_code = output.status.code().unwrap_or(-1);
            return Err(RuntimeError::command_failed(command, exit_code, stderr));
        }

        Ok(stdout)
    }

    /// Runs an `exists`-style command: exit 0 is true, exit 1 is false
    async fn exists(&self, args: &[&str]) -> RuntimeResult<bool> {
        match self.run(args).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::CommandFailed { exit_code: 1, .. }) => Ok(false),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn inspect_id(&self, name: &str) -> RuntimeResult<String> {
        self.run(&["inspect", "--type", "container", "--format", "{{.Id}}", name])
            .await
    }
}

/// Whether podman's stderr reports a missing object
fn is_missing(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such container")
        || lower.contains("no such network")
        || lower.contains("no such object")
        || lower.contains("network not found")
}

#[derive(Debug, Deserialize)]
struct NetworkInspect {
    name: String,
    id: String,
    #[serde(default)]
    driver: String,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkAttachment {
    #[serde(rename = "IPAddress", default)]
    ip_address: String,
}

fn parse_network_inspect(json: &str) -> RuntimeResult<NetworkHandle> {
    let mut entries: Vec<NetworkInspect> = serde_json::from_str(json)?;
    if entries.is_empty() {
        return Err(RuntimeError::NotFound("network".to_string()));
    }
    let entry = entries.swap_remove(0);
    Ok(NetworkHandle::new(entry.id, entry.name, entry.driver))
}

fn parse_ps(json: &str) -> RuntimeResult<Vec<ContainerHandle>> {
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let entries: Vec<PsEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .map(|e| {
            let name = e.names.into_iter().next().unwrap_or_else(|| e.id.clone());
            ContainerHandle::new(e.id, name)
        })
        .collect())
}

fn parse_container_ip(json: &str, network: &str) -> RuntimeResult<IpAddr> {
    let networks: HashMap<String, NetworkAttachment> = serde_json::from_str(json)?;
    let attachment = networks
        .get(network)
        .ok_or_else(|| RuntimeError::NotFound(format!("container not attached to {}", network)))?;
    attachment
        .ip_address
        .parse()
        .map_err(|_| RuntimeError::Parse(format!("invalid IP address '{}'", attachment.ip_address)))
}

#[async_trait]
impl RuntimeClient for PodmanRuntime {
    async fn has_image(&self, image: &str) -> RuntimeResult<bool> {
        self.exists(&["image", "exists", image]).await
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<()> {
        let reference = format!("{}:{}", image, tag);
        self.run(&["pull", "--quiet", reference.as_str()]).await?;
        Ok(())
    }

    async fn build_image(&self, image: &str, context_dir: &Path) -> RuntimeResult<()> {
        let dir = context_dir.to_string_lossy().into_owned();
        self.run(&["build", "--tag", image, dir.as_str()]).await?;
        Ok(())
    }

    async fn create_container(&self, options: &ContainerOptions) -> RuntimeResult<ContainerHandle> {
        let mut args: Vec<String> = vec!["create".into(), "--name".into(), options.name.clone()];

        if let Some(network) = &options.network {
            args.push("--network".into());
            args.push(network.clone());
            for alias in &options.aliases {
                args.push("--network-alias".into());
                args.push(alias.clone());
            }
        }
        for env in &options.env {
            args.push("-e".into());
            args.push(env.clone());
        }
        args.push(options.image.clone());

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&args).await?;
        debug!("Created container {} with ID: {}", options.name, id);

        Ok(ContainerHandle::new(id, options.name.clone()))
    }

    async fn start_container(
        &self,
        container: &ContainerHandle,
        links: &[Link],
    ) -> RuntimeResult<()> {
        for link in links {
            debug!(
                "Link {} for {} resolves through its network alias",
                link, container.name
            );
        }
        self.run(&["start", container.name.as_str()]).await?;
        Ok(())
    }

    async fn stop_container(&self, container: &ContainerHandle) -> RuntimeResult<()> {
        self.run(&["stop", container.name.as_str()]).await?;
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerHandle) -> RuntimeResult<()> {
        self.run(&["rm", "-f", container.name.as_str()]).await?;
        Ok(())
    }

    async fn is_running(&self, container: &ContainerHandle) -> RuntimeResult<bool> {
        let state = self
            .run(&[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{.State.Running}}",
                container.name.as_str(),
            ])
            .await?;
        state
            .parse()
            .map_err(|_| RuntimeError::Parse(format!("unexpected running state '{}'", state)))
    }

    async fn wait_container(&self, container: &ContainerHandle) -> RuntimeResult<i64> {
        let code = self.run(&["wait", container.name.as_str()]).await?;
        code.parse()
            .map_err(|_| RuntimeError::Parse(format!("unexpected exit code '{}'", code)))
    }

    async fn find_container(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
        if !self.exists(&["container", "exists", name]).await? {
            return Ok(None);
        }
        let id = self.inspect_id(name).await?;
        Ok(Some(ContainerHandle::new(id, name)))
    }

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkHandle> {
        self.run(&["network", "create", "--driver", driver, name]).await?;

        match self.get_network(name).await {
            Ok(network) => Ok(network),
            Err(e) => {
                warn!("Created network {} but could not inspect it, removing", name);
                if let Err(rm) = self.run(&["network", "rm", name]).await {
                    warn!("Failed to remove network {}: {}", name, rm);
                }
                Err(e)
            }
        }
    }

    async fn remove_network(&self, network: &NetworkHandle) -> RuntimeResult<()> {
        self.run(&["network", "rm", network.name.as_str()]).await?;
        Ok(())
    }

    async fn connect(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
        aliases: &[String],
    ) -> RuntimeResult<NetworkHandle> {
        let mut args = vec!["network", "connect"];
        for alias in aliases {
            args.push("--alias");
            args.push(alias.as_str());
        }
        args.push(network.name.as_str());
        args.push(container.name.as_str());

        self.run(&args).await?;
        Ok(network.clone())
    }

    async fn get_network(&self, id: &str) -> RuntimeResult<NetworkHandle> {
        let json = self.run(&["network", "inspect", id]).await?;
        let mut network = parse_network_inspect(&json)?;

        let filter = format!("network={}", network.name);
        let members = self
            .run(&["ps", "-a", "--no-trunc", "--filter", filter.as_str(), "--format", "{{.ID}}"])
            .await?;
        network.containers = members.lines().map(|l| l.trim().to_string()).collect();

        Ok(network)
    }

    async fn get_container_ip(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> RuntimeResult<IpAddr> {
        let json = self
            .run(&[
                "inspect",
                "--type",
                "container",
                "--format",
                "{{json .NetworkSettings.Networks}}",
                container.name.as_str(),
            ])
            .await?;
        parse_container_ip(&json, &network.name)
    }

    async fn containers_by_image(
        &self,
        image: &str,
        tag: &str,
    ) -> RuntimeResult<Vec<ContainerHandle>> {
        let filter = format!("ancestor={}:{}", image, tag);
        let json = self
            .run(&["ps", "-a", "--no-trunc", "--filter", filter.as_str(), "--format", "json"])
            .await?;
        parse_ps(&json)
    }
}
