pub mod error;
pub mod process;
pub mod state_machine;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{Timings, WorkerConfig};
use crate::instance::{Instance, InstanceRegistry};
use crate::process_monitor;
use error::SupervisorError;
use process::ProcessHandle;
use state_machine::InstanceStatus;

/// Grace period after SIGKILL before giving up on reaping.
const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

/// Owns the lifecycle of every configured worker: launching, stopping
/// (whole process tree), restarting and watching for unsolicited exits.
///
/// Cheap to clone; all clones share the same registry, task tracker and
/// shutdown token.
#[derive(Clone)]
pub struct Supervisor {
    registry: Arc<InstanceRegistry>,
    worker: Arc<WorkerConfig>,
    timings: Timings,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

enum WatchOutcome {
    Alive,
    Exited(String),
    /// Handle was taken by stop/reclaim or replaced by a newer launch.
    Detached,
}

impl Supervisor {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        worker: WorkerConfig,
        timings: Timings,
        tasks: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            worker: Arc::new(worker),
            timings,
            tasks,
            shutdown,
        }
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Launch the worker for `id`.
    ///
    /// The status check and the spawn happen in the same critical section,
    /// so two concurrent starts can never both spawn. Once shutdown has
    /// begun no new worker is launched.
    pub fn start(&self, id: &str) -> Result<String, SupervisorError> {
        let generation = self.registry.with_instance(id, |inst| {
            // shutdown() 은 cancel 후 registry 를 스캔하므로 여기서 확인하면
            // 스캔에서 누락되는 프로세스가 생기지 않음
            if self.shutdown.is_cancelled() {
                return Err(SupervisorError::ShuttingDown(id.to_string()));
            }
            if inst.status().is_active() {
                return Err(SupervisorError::AlreadyActive(id.to_string()));
            }

            let command = self.worker.command_for(inst.gpu, inst.port);
            tracing::info!("[{}] launching: {} {}", id, command.program, command.args.join(" "));

            match ProcessHandle::spawn(&command) {
                Ok(handle) => {
                    let pid = handle.pid();
                    let generation = inst.begin_launch(handle)?;
                    tracing::info!("[{}] spawned pid {} (launch #{})", id, pid, generation);
                    Ok(generation)
                }
                Err(e) => {
                    let _ = inst.transition(InstanceStatus::Error);
                    tracing::error!("[{}] failed to spawn worker: {}", id, e);
                    Err(SupervisorError::LaunchFailure {
                        id: id.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        })??;

        self.spawn_crash_watch(id, generation);
        Ok(format!("{} starting...", id))
    }

    /// Terminate the worker and all its descendants, waiting up to the
    /// configured stop timeout. On timeout the tree is force-killed and
    /// `StopTimeout` is still reported.
    pub async fn stop(&self, id: &str) -> Result<String, SupervisorError> {
        let (mut process, generation) = self.registry.with_instance(id, |inst| {
            if inst.status() == InstanceStatus::Stopped {
                return Err(SupervisorError::NotActive(id.to_string()));
            }
            let generation = inst.generation();
            inst.take_process()
                .map(|p| (p, generation))
                .ok_or_else(|| SupervisorError::NotActive(id.to_string()))
        })??;

        let pid = process.pid();
        tracing::info!("[{}] stopping pid {}", id, pid);
        process_monitor::terminate_tree_async(pid, false).await;

        let timeout = self.timings.stop_timeout();
        let result = match process.wait_timeout(timeout).await {
            Ok(Some(status)) => {
                tracing::info!("[{}] stopped ({})", id, status);
                Ok(format!("{} stopped", id))
            }
            Ok(None) => {
                tracing::warn!("[{}] pid {} still alive after {:?}, force-killing", id, pid, timeout);
                force_kill(&mut process).await;
                Err(SupervisorError::StopTimeout {
                    id: id.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
            Err(e) => {
                tracing::error!("[{}] failed to wait for pid {}: {}", id, pid, e);
                force_kill(&mut process).await;
                Err(SupervisorError::Internal(format!("failed to wait for {}: {}", id, e)))
            }
        };

        // 그 사이 새로 시작된 경우(generation 변경)에는 상태를 건드리지 않음
        self.registry.with_instance(id, |inst| {
            if inst.generation() == generation {
                let _ = inst.transition(InstanceStatus::Stopped);
            }
        })?;
        result
    }

    /// Stop, pause, start. A failed stop is returned as-is and no start is
    /// attempted.
    pub async fn restart(&self, id: &str) -> Result<String, SupervisorError> {
        self.stop(id).await?;
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::info!("[{}] restart abandoned, shutting down", id);
                return Err(SupervisorError::ShuttingDown(id.to_string()));
            }
            _ = tokio::time::sleep(self.timings.restart_delay()) => {}
        }
        self.start(id)
    }

    /// Kill a process that was detached from its instance (startup timeout)
    /// off the caller's path.
    pub fn reclaim(&self, id: &str, mut process: ProcessHandle) {
        let id = id.to_string();
        let timeout = self.timings.stop_timeout();
        self.tasks.spawn(async move {
            let pid = process.pid();
            tracing::warn!("[{}] reclaiming orphaned pid {}", id, pid);
            process_monitor::terminate_tree_async(pid, false).await;
            match process.wait_timeout(timeout).await {
                Ok(Some(_)) => tracing::info!("[{}] orphaned pid {} terminated", id, pid),
                _ => force_kill(&mut process).await,
            }
        });
    }

    /// Shutdown hook: cancel the background loops and stop every worker
    /// that still has a process, then wait for tracked tasks to finish.
    pub async fn shutdown(&self) {
        tracing::info!("Supervisor shutting down");
        self.shutdown.cancel();

        let active: Vec<String> = self
            .registry
            .with_all(|all| all.iter().filter(|i| i.has_process()).map(|i| i.id.clone()).collect())
            .unwrap_or_default();

        let results = futures::future::join_all(active.iter().map(|id| self.stop(id))).await;
        for (id, result) in active.iter().zip(results) {
            match result {
                Ok(_) => tracing::info!("[{}] stopped during shutdown", id),
                Err(e) => tracing::warn!("[{}] shutdown stop: {}", id, e),
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("Supervisor shutdown complete");
    }

    fn spawn_crash_watch(&self, id: &str, generation: u64) {
        let registry = self.registry.clone();
        let interval = self.timings.crash_watch_interval();
        let shutdown = self.shutdown.clone();
        let id = id.to_string();

        self.tasks.spawn(async move {
            tracing::debug!("[{}] crash-watch started (launch #{})", id, generation);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                match registry.with_instance(&id, |inst| check_exit(inst, generation)) {
                    Ok(WatchOutcome::Alive) => {}
                    Ok(WatchOutcome::Exited(status)) => {
                        tracing::warn!("[{}] worker exited on its own ({})", id, status);
                        break;
                    }
                    Ok(WatchOutcome::Detached) => break,
                    Err(e) => {
                        tracing::error!("[{}] crash-watch aborted: {}", id, e);
                        break;
                    }
                }
            }
            tracing::debug!("[{}] crash-watch finished (launch #{})", id, generation);
        });
    }
}

fn check_exit(inst: &mut Instance, generation: u64) -> WatchOutcome {
    if inst.generation() != generation {
        return WatchOutcome::Detached;
    }
    let Some(process) = inst.process_mut() else {
        return WatchOutcome::Detached;
    };

    match process.try_exit_status() {
        Ok(None) => WatchOutcome::Alive,
        Ok(Some(status)) => {
            inst.take_process();
            let _ = inst.transition(InstanceStatus::Stopped);
            WatchOutcome::Exited(status.to_string())
        }
        Err(e) => {
            tracing::warn!("[{}] could not poll exit status: {}", inst.id, e);
            WatchOutcome::Alive
        }
    }
}

async fn force_kill(process: &mut ProcessHandle) {
    process_monitor::terminate_tree_async(process.pid(), true).await;
    if let Ok(None) | Err(_) = process.wait_timeout(FORCE_KILL_GRACE).await {
        tracing::error!("pid {} survived SIGKILL grace period", process.pid());
    }
}
