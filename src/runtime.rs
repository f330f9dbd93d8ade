//! Wiring of all components plus the process-wide shutdown hook.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ControllerConfig;
use crate::control::ControlApi;
use crate::hub::BroadcastHub;
use crate::instance::InstanceRegistry;
use crate::poller::StatusPoller;
use crate::server::ControlServer;
use crate::supervisor::Supervisor;

pub struct Controller {
    config: ControllerConfig,
    supervisor: Supervisor,
    control: ControlApi,
    hub: Arc<BroadcastHub>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl Controller {
    pub fn new(config: ControllerConfig) -> Self {
        let registry = Arc::new(InstanceRegistry::new(&config.instances));
        let hub = Arc::new(BroadcastHub::new());
        let tasks = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor::new(
            registry,
            config.worker.clone(),
            config.timings.clone(),
            tasks.clone(),
            shutdown.clone(),
        );
        let control = ControlApi::new(supervisor.clone(), hub.clone());

        Self {
            config,
            supervisor,
            control,
            hub,
            tasks,
            shutdown,
        }
    }

    pub fn control(&self) -> ControlApi {
        self.control.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn server(&self) -> ControlServer {
        ControlServer::new(self.control(), self.shutdown.clone(), &self.config.listen_addr)
    }

    /// Start the status poller as a tracked task; it ends when the shutdown
    /// token is cancelled.
    pub fn spawn_poller(&self) {
        let poller = StatusPoller::new(
            self.supervisor.clone(),
            self.hub.clone(),
            &self.config.probe_host,
            &self.config.timings,
        );
        self.tasks.spawn(poller.run(self.shutdown.clone()));
    }

    /// Stop every worker and wait for all background tasks. Idempotent.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }

    /// Run the poller and HTTP server until `signal` resolves (or the server
    /// fails), then shut everything down.
    pub async fn run(self, signal: impl Future<Output = ()>) -> Result<()> {
        tracing::info!(
            "Managing {} instances: {}",
            self.config.instances.len(),
            self.config
                .instances
                .iter()
                .map(|i| format!("{} (port {}, gpu {})", i.id, i.port, i.gpu))
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.spawn_poller();
        let mut server_task = tokio::spawn(self.server().start());

        let finished_early = tokio::select! {
            _ = signal => {
                tracing::info!("Shutdown signal received, cleaning up...");
                None
            }
            res = &mut server_task => Some(res),
        };

        self.shutdown().await;

        let server_result = match finished_early {
            Some(res) => res,
            None => server_task.await,
        };
        match server_result {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_exits_cleanly_on_signal() {
        let config = ControllerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            instances: vec![InstanceConfig { id: "a".into(), port: 1, gpu: 0, url: None }],
            ..ControllerConfig::default()
        };
        let controller = Controller::new(config);
        let token = controller.shutdown_token();

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            controller.run(tokio::time::sleep(Duration::from_millis(200))),
        )
        .await
        .expect("controller should shut down promptly");
        assert!(result.is_ok());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ControllerConfig {
            listen_addr: occupied.local_addr().unwrap().to_string(),
            ..ControllerConfig::default()
        };
        let controller = Controller::new(config);
        let result = controller.run(std::future::pending()).await;
        assert!(result.is_err());
    }
}
