//! Endpoint readiness
//!
//! Replaces fixed warm-up sleeps with polling against an explicit signal:
//! - `Running`: the runtime reports the container process as running
//! - `Http`: a GET against the container's address on the task network succeeds
//!
//! The probe must pass `required_passes` times in a row before the deadline.

use matrix_core::{ContainerHandle, NetworkHandle, RuntimeClient, RuntimeError, TaskError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::network::NetworkBinding;

/// Signal used to decide an endpoint is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessProbe {
    Running,
    Http { port: u16, path: String },
}

/// Polling parameters
#[derive(Debug, Clone)]
pub struct ReadinessSettings {
    pub probe: ReadinessProbe,
    /// Delay before the first probe
    pub warm_up: Duration,
    /// Delay between probes
    pub interval: Duration,
    /// Overall deadline, warm-up included
    pub timeout: Duration,
    /// Consecutive passes needed
    pub required_passes: u32,
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            probe: ReadinessProbe::Running,
            warm_up: Duration::ZERO,
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            required_passes: 3,
        }
    }
}

/// Polls a container until its probe passes
pub struct ReadinessCheck {
    client: Arc<dyn RuntimeClient>,
    settings: ReadinessSettings,
    http: reqwest::Client,
}

impl ReadinessCheck {
    pub fn new(client: Arc<dyn RuntimeClient>, settings: ReadinessSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(settings.interval.max(Duration::from_millis(100)))
            .no_proxy()
            .build()
            .unwrap_or_default();
        Self {
            client,
            settings,
            http,
        }
    }

    /// Waits until the container is ready
    ///
    /// # Errors
    /// `TaskError::ReadinessTimeout` if the probe has not passed enough
    /// times when the timeout elapses
    pub async fn wait(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> Result<(), TaskError> {
        let started = Instant::now();
        let deadline = started + self.settings.timeout;

        if !self.settings.warm_up.is_zero() {
            debug!("Warming up {} for {:?}", container.name, self.settings.warm_up);
            tokio::time::sleep(self.settings.warm_up).await;
        }

        let required = self.settings.required_passes.max(1);
        let mut passes = 0;

        loop {
            match self.probe(network, container).await {
                Ok(true) => passes += 1,
                Ok(false) => passes = 0,
                Err(e) => {
                    debug!("Readiness probe for {} failed: {}", container.name, e);
                    passes = 0;
                }
            }

            if passes >= required {
                info!(
                    "Container {} ready after {:?}",
                    container.name,
                    started.elapsed()
                );
                return Ok(());
            }

            if Instant::now() + self.settings.interval > deadline {
                return Err(TaskError::ReadinessTimeout {
                    name: container.name.clone(),
                    waited_ms: started.elapsed().as_millis(),
                });
            }

            tokio::time::sleep(self.settings.interval).await;
        }
    }

    async fn probe(
        &self,
        network: &NetworkHandle,
        container: &ContainerHandle,
    ) -> Result<bool, TaskError> {
        match &self.settings.probe {
            ReadinessProbe::Running => self.client.is_running(container).await.map_err(|source| {
                TaskError::ContainerStart {
                    name: container.name.clone(),
                    source,
                }
            }),
            ReadinessProbe::Http { port, path } => {
                let ip = NetworkBinding::new(self.client.clone())
                    .container_ip(network, container)
                    .await?;
                let url = format!("http://{}:{}{}", ip, port, path);

                let response = self.http.get(&url).send().await.map_err(|e| {
                    TaskError::ContainerStart {
                        name: container.name.clone(),
                        source: RuntimeError::Http(e.to_string()),
                    }
                })?;
                Ok(response.status().is_success())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use matrix_core::ContainerOptions;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings() -> ReadinessSettings {
        ReadinessSettings {
            interval: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
            ..Default::default()
        }
    }

    async fn started(runtime: &FakeRuntime, name: &str) -> (NetworkHandle, ContainerHandle) {
        let network = runtime.create_network("ready-net", "bridge").await.unwrap();
        let container = runtime
            .create_container(
                &ContainerOptions::new(name, "ihsw/web:latest").with_network(&network.id),
            )
            .await
            .unwrap();
        runtime.start_container(&container, &[]).await.unwrap();
        (network, container)
    }

    /// Answers every request on a local port with the given status line
    async fn serve(status: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    status
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        port
    }

    fn http_settings(port: u16) -> ReadinessSettings {
        ReadinessSettings {
            probe: ReadinessProbe::Http {
                port,
                path: "/health".to_string(),
            },
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(600),
            required_passes: 2,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_container_becomes_ready() {
        let runtime = FakeRuntime::new();
        let (network, container) = started(&runtime, "web").await;

        let check = ReadinessCheck::new(runtime.clone().into_client(), settings());
        check.wait(&network, &container).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exited_container_times_out() {
        let runtime = FakeRuntime::new();
        runtime.never_running("web");
        let (network, container) = started(&runtime, "web").await;

        let check = ReadinessCheck::new(runtime.clone().into_client(), settings());
        let err = check.wait(&network, &container).await.unwrap_err();

        match err {
            TaskError::ReadinessTimeout { name, waited_ms } => {
                assert_eq!(name, "web");
                assert!(waited_ms <= 2000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_up_is_applied() {
        let runtime = FakeRuntime::new();
        let (network, container) = started(&runtime, "web").await;

        let check = ReadinessCheck::new(
            runtime.clone().into_client(),
            ReadinessSettings {
                warm_up: Duration::from_secs(1),
                ..settings()
            },
        );

        let start = Instant::now();
        check.wait(&network, &container).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_http_check_becomes_ready() {
        let port = serve("200 OK").await;
        let runtime = FakeRuntime::new();
        let (network, container) = started(&runtime, "web").await;
        runtime.set_ip("web", IpAddr::V4(Ipv4Addr::LOCALHOST));

        let check = ReadinessCheck::new(runtime.clone().into_client(), http_settings(port));
        check.wait(&network, &container).await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_status_times_out() {
        let port = serve("503 Service Unavailable").await;
        let runtime = FakeRuntime::new();
        let (network, container) = started(&runtime, "web").await;
        runtime.set_ip("web", IpAddr::V4(Ipv4Addr::LOCALHOST));

        let check = ReadinessCheck::new(runtime.clone().into_client(), http_settings(port));
        let err = check.wait(&network, &container).await.unwrap_err();

        assert!(matches!(err, TaskError::ReadinessTimeout { ref name, .. } if name == "web"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_check_off_network_times_out() {
        let runtime = FakeRuntime::new();
        let network = runtime.create_network("ready-net", "bridge").await.unwrap();
        let container = runtime
            .create_container(&ContainerOptions::new("loner", "ihsw/web:latest"))
            .await
            .unwrap();
        runtime.start_container(&container, &[]).await.unwrap();

        let check = ReadinessCheck::new(runtime.clone().into_client(), http_settings(80));
        let err = check.wait(&network, &container).await.unwrap_err();

        assert!(matches!(err, TaskError::ReadinessTimeout { ref name, .. } if name == "loner"));
    }
}
