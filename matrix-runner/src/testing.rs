//! In-memory runtime used by unit tests
//!
//! Records every call in order and lets tests inject failures per object
//! name, so lifecycle code can be checked without a container engine.

use async_trait::async_trait;
use matrix_core::runtime::RuntimeResult;
use matrix_core::{
    ContainerHandle, ContainerOptions, Link, NetworkHandle, RuntimeClient, RuntimeError,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub links: Vec<Link>,
    pub running: bool,
    pub aliases: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    images: HashSet<String>,
    containers: BTreeMap<String, FakeContainer>,
    networks: BTreeMap<String, NetworkHandle>,
    calls: Vec<String>,
    next_id: u64,
    fail_pull: HashSet<String>,
    fail_create: HashSet<String>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    fail_connect: HashSet<String>,
    never_running: HashSet<String>,
    exit_codes: HashMap<String, i64>,
    ips: HashMap<String, IpAddr>,
    stale_connect: bool,
}

impl FakeState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", self.next_id)
    }

    fn container_by_id(&mut self, id: &str) -> Option<&mut FakeContainer> {
        self.containers.values_mut().find(|c| c.id == id)
    }

    fn network_by_ref(&mut self, reference: &str) -> Option<&mut NetworkHandle> {
        self.networks
            .values_mut()
            .find(|n| n.id == reference || n.name == reference)
    }
}

/// Shared, cloneable fake runtime
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_client(self) -> Arc<dyn RuntimeClient> {
        Arc::new(self)
    }

    /// Marks an image reference (`image:tag`) as already present
    pub fn with_image(self, reference: &str) -> Self {
        self.state.lock().unwrap().images.insert(reference.to_string());
        self
    }

    /// Registers an existing container, optionally running
    pub fn with_container(self, name: &str, image: &str, running: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let id = state.next_id();
            state.containers.insert(
                name.to_string(),
                FakeContainer {
                    id,
                    name: name.to_string(),
                    image: image.to_string(),
                    env: Vec::new(),
                    links: Vec::new(),
                    running,
                    aliases: Vec::new(),
                },
            );
        }
        self
    }

    pub fn fail_pull(&self, image: &str) {
        self.state.lock().unwrap().fail_pull.insert(image.to_string());
    }

    pub fn fail_create(&self, container: &str) {
        self.state.lock().unwrap().fail_create.insert(container.to_string());
    }

    pub fn fail_start(&self, container: &str) {
        self.state.lock().unwrap().fail_start.insert(container.to_string());
    }

    pub fn fail_stop(&self, container: &str) {
        self.state.lock().unwrap().fail_stop.insert(container.to_string());
    }

    pub fn fail_connect(&self, container: &str) {
        self.state.lock().unwrap().fail_connect.insert(container.to_string());
    }

    /// Containers that exit as soon as they start
    pub fn never_running(&self, container: &str) {
        self.state.lock().unwrap().never_running.insert(container.to_string());
    }

    pub fn set_exit_code(&self, container: &str, code: i64) {
        self.state.lock().unwrap().exit_codes.insert(container.to_string(), code);
    }

    /// Address reported for a container while it is on a network
    pub fn set_ip(&self, container: &str, ip: IpAddr) {
        self.state.lock().unwrap().ips.insert(container.to_string(), ip);
    }

    /// Makes `connect` hand back the network as it was before connecting
    pub fn stale_connect(&self) {
        self.state.lock().unwrap().stale_connect = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.state.lock().unwrap().containers.get(name).cloned()
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .networks
            .values()
            .map(|n| n.name.clone())
            .collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn failure(command: &str, target: &str) -> RuntimeError {
    RuntimeError::command_failed(format!("{} {}", command, target), 125, "injected failure")
}

#[async_trait]
impl RuntimeClient for FakeRuntime {
    async fn has_image(&self, image: &str) -> RuntimeResult<bool> {
        Ok(self.state.lock().unwrap().images.contains(image))
    }

    async fn pull_image(&self, image: &str, tag: &str) -> RuntimeResult<()> {
        let reference = format!("{}:{}", image, tag);
        self.record(format!("pull:{}", reference));
        let mut state = self.state.lock().unwrap();
        if state.fail_pull.contains(image) {
            return Err(failure("pull", &reference));
        }
        state.images.insert(reference);
        Ok(())
    }

    async fn build_image(&self, image: &str, _context_dir: &Path) -> RuntimeResult<()> {
        self.record(format!("build:{}", image));
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(&self, options: &ContainerOptions) -> RuntimeResult<ContainerHandle> {
        self.record(format!("create:{}", options.name));
        let mut state = self.state.lock().unwrap();
        if state.fail_create.contains(&options.name) || state.containers.contains_key(&options.name)
        {
            return Err(failure("create", &options.name));
        }

        let id = state.next_id();
        if let Some(network) = &options.network {
            let network = state
                .network_by_ref(network)
                .ok_or_else(|| RuntimeError::NotFound(network.clone()))?;
            network.containers.insert(id.clone());
        }

        state.containers.insert(
            options.name.clone(),
            FakeContainer {
                id: id.clone(),
                name: options.name.clone(),
                image: options.image.clone(),
                env: options.env.clone(),
                links: Vec::new(),
                running: false,
                aliases: options.aliases.clone(),
            },
        );
        Ok(ContainerHandle::new(id, options.name.clone()))
    }

    async fn start_container(
        &self,
        container: &ContainerHandle,
        links: &[Link],
    ) -> RuntimeResult<()> {
        self.record(format!("start:{}", container.name));
        let mut state = self.state.lock().unwrap();
        if state.fail_start.contains(&container.name) {
            return Err(failure("start", &container.name));
        }
        let running = !state.never_running.contains(&container.name);
        let fake = state
            .containers
            .get_mut(&container.name)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))?;
        fake.links = links.to_vec();
        fake.running = running;
        Ok(())
    }

    async fn stop_container(&self, container: &ContainerHandle) -> RuntimeResult<()> {
        self.record(format!("stop:{}", container.name));
        let mut state = self.state.lock().unwrap();
        if state.fail_stop.contains(&container.name) {
            return Err(failure("stop", &container.name));
        }
        let fake = state
            .containers
            .get_mut(&container.name)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))?;
        fake.running = false;
        Ok(())
    }

    async fn remove_container(&self, container: &ContainerHandle) -> RuntimeResult<()> {
        self.record(format!("remove:{}", container.name));
        let mut state = self.state.lock().unwrap();
        let removed = state
            .containers
            .remove(&container.name)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))?;
        for network in state.networks.values_mut() {
            network.containers.remove(&removed.id);
        }
        Ok(())
    }

    async fn is_running(&self, container: &ContainerHandle) -> RuntimeResult<bool> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(&container.name)
            .map(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))
    }

    async fn wait_container(&self, container: &ContainerHandle) -> RuntimeResult<i64> {
        self.record(format!("wait:{}", container.name));
        let mut state = self.state.lock().unwrap();
        let code = state.exit_codes.get(&container.name).copied().unwrap_or(0);
        let fake = state
            .containers
            .get_mut(&container.name)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))?;
        fake.running = false;
        Ok(code)
    }

    async fn find_container(&self, name: &str) -> RuntimeResult<Option<ContainerHandle>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|c| ContainerHandle::new(c.id.clone(), c.name.clone())))
    }

    async fn create_network(&self, name: &str, driver: &str) -> RuntimeResult<NetworkHandle> {
        self.record(format!("network_create:{}", name));
        let mut state = self.state.lock().unwrap();
        if state.networks.values().any(|n| n.name == name) {
            return Err(failure("network create", name));
        }
        let id = format!("net-{}", state.next_id());
        let network = NetworkHandle::new(id.clone(), name, driver);
        state.networks.insert(id, network.clone());
        Ok(network)
    }

    async fn remove_network(&self, network: &NetworkHandle) -> RuntimeResult<()> {
        self.record(format!("network_remove:{}", network.name));
        let mut state = self.state.lock().unwrap();
        let current = state
            .networks
            .get(&network.id)
            .ok_or_else(|| RuntimeError::NotFound(network.name.clone()))?;
        if !current.containers.is_empty() {
            return Err(RuntimeError::command_failed(
                format!("network rm {}", network.name),
                2,
                "network has active endpoints",
            ));
        }
        state.networks.remove(&network.id);
        Ok(())
    }

    async fn connect(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
        aliases: &[String],
    ) -> RuntimeResult<NetworkHandle> {
        self.record(format!("connect:{}:{}", network.name, container.name));
        let mut state = self.state.lock().unwrap();
        if state.fail_connect.contains(&container.name) {
            return Err(failure("network connect", &container.name));
        }
        let stale = state.stale_connect;
        let fake = state
            .container_by_id(&container.id)
            .ok_or_else(|| RuntimeError::NotFound(container.name.clone()))?;
        fake.aliases.extend(aliases.iter().cloned());

        let current = state
            .networks
            .get_mut(&network.id)
            .ok_or_else(|| RuntimeError::NotFound(network.name.clone()))?;
        current.containers.insert(container.id.clone());

        if stale {
            Ok(network.clone())
        } else {
            Ok(current.clone())
        }
    }

    async fn get_network(&self, id: &str) -> RuntimeResult<NetworkHandle> {
        self.state
            .lock()
            .unwrap()
            .networks
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))
    }

    async fn get_container_ip(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> RuntimeResult<IpAddr> {
        let state = self.state.lock().unwrap();
        let current = state
            .networks
            .get(&network.id)
            .ok_or_else(|| RuntimeError::NotFound(network.name.clone()))?;
        if !current.containers.contains(&container.id) {
            return Err(RuntimeError::NotFound(format!(
                "{} on {}",
                container.name, network.name
            )));
        }
        if let Some(ip) = state.ips.get(&container.name) {
            return Ok(*ip);
        }
        let host = current
            .containers
            .iter()
            .position(|id| id == &container.id)
            .unwrap_or(0) as u8;
        Ok(IpAddr::V4(Ipv4Addr::new(10, 88, 0, host + 2)))
    }

    async fn containers_by_image(
        &self,
        image: &str,
        tag: &str,
    ) -> RuntimeResult<Vec<ContainerHandle>> {
        let reference = format!("{}:{}", image, tag);
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .values()
            .filter(|c| c.image == reference)
            .map(|c| ContainerHandle::new(c.id.clone(), c.name.clone()))
            .collect())
    }
}
