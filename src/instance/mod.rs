use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::InstanceConfig;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::process::ProcessHandle;
use crate::supervisor::state_machine::{InstanceStatus, StateMachine, TransitionError};

/// One managed worker. Created once from configuration and never removed;
/// only the runtime fields change.
#[derive(Debug)]
pub struct Instance {
    pub id: String,
    pub port: u16,
    pub gpu: u32,
    pub url: String,
    state: StateMachine,
    process: Option<ProcessHandle>,
    started_at: Option<Instant>,
    last_broadcast: Option<InstanceStatus>,
    /// Bumped on every successful launch so stale watchers can tell
    /// their process has been replaced.
    generation: u64,
}

/// Read-only view used by the status endpoints and WebSocket snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub id: String,
    pub port: u16,
    pub gpu: u32,
    pub url: String,
    pub status: InstanceStatus,
}

impl Instance {
    pub fn new(cfg: &InstanceConfig) -> Self {
        let state = StateMachine::new();
        // 초기 상태는 구독 시 스냅샷으로 전달되므로 다시 알리지 않음
        let last_broadcast = Some(state.state);
        Self {
            id: cfg.id.clone(),
            port: cfg.port,
            gpu: cfg.gpu,
            url: cfg.display_url(),
            state,
            process: None,
            started_at: None,
            last_broadcast,
            generation: 0,
        }
    }

    pub fn status(&self) -> InstanceStatus {
        self.state.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_process(&self) -> bool {
        self.process.is_some()
    }

    pub fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        self.process.as_mut()
    }

    /// The single entry point for status changes. Illegal moves are
    /// rejected and logged instead of overwriting the current status.
    pub fn transition(&mut self, to: InstanceStatus) -> Result<bool, TransitionError> {
        let from = self.status();
        match self.state.transition(to) {
            Ok(changed) => {
                if changed {
                    tracing::info!("[{}] {} -> {}", self.id, from, to);
                }
                Ok(changed)
            }
            Err(e) => {
                tracing::warn!("[{}] rejected transition: {}", self.id, e);
                Err(e)
            }
        }
    }

    /// Attach a freshly spawned process: Starting, new start timestamp,
    /// broadcast tracking cleared so the next poll re-announces.
    pub fn begin_launch(&mut self, process: ProcessHandle) -> Result<u64, TransitionError> {
        self.transition(InstanceStatus::Starting)?;
        self.process = Some(process);
        self.started_at = Some(Instant::now());
        self.last_broadcast = None;
        self.generation += 1;
        Ok(self.generation)
    }

    /// Detach the process handle (stop, crash, timeout reclaim).
    pub fn take_process(&mut self) -> Option<ProcessHandle> {
        self.process.take()
    }

    /// How long ago the current start was issued.
    pub fn elapsed_since_start(&self, now: Instant) -> Option<Duration> {
        self.started_at.map(|t| now.saturating_duration_since(t))
    }

    /// Returns the current status if it differs from the last one
    /// announced, recording it as announced.
    pub fn take_unbroadcast(&mut self) -> Option<InstanceStatus> {
        let status = self.status();
        if self.last_broadcast == Some(status) {
            return None;
        }
        self.last_broadcast = Some(status);
        Some(status)
    }

    pub fn mark_broadcast(&mut self) -> InstanceStatus {
        let status = self.status();
        self.last_broadcast = Some(status);
        status
    }

    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            port: self.port,
            gpu: self.gpu,
            url: self.url.clone(),
            status: self.status(),
        }
    }
}

/// Lock-guarded table of all instances, shared by the supervisor, the
/// poller, crash watchers and request handlers.
///
/// With only a couple of entries a single mutex over the whole table is
/// enough; every read-modify-write happens inside one critical section.
/// The lock is never held across an `.await`.
pub struct InstanceRegistry {
    instances: Mutex<Vec<Instance>>,
}

impl InstanceRegistry {
    pub fn new(configs: &[InstanceConfig]) -> Self {
        Self {
            instances: Mutex::new(configs.iter().map(Instance::new).collect()),
        }
    }

    /// Mutex 락 획득 헬퍼
    fn lock(&self) -> Result<MutexGuard<'_, Vec<Instance>>, SupervisorError> {
        self.instances.lock().map_err(|e| {
            tracing::error!("InstanceRegistry lock poisoned: {}", e);
            SupervisorError::Internal("instance registry lock poisoned".to_string())
        })
    }

    /// Run `f` on one instance inside the registry's critical section.
    pub fn with_instance<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Instance) -> R,
    ) -> Result<R, SupervisorError> {
        let mut instances = self.lock()?;
        let instance = instances
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| SupervisorError::InvalidInstance(id.to_string()))?;
        Ok(f(instance))
    }

    /// Run `f` over the whole table inside one critical section.
    pub fn with_all<R>(&self, f: impl FnOnce(&mut [Instance]) -> R) -> Result<R, SupervisorError> {
        let mut instances = self.lock()?;
        Ok(f(&mut instances))
    }

    pub fn ids(&self) -> Vec<String> {
        self.with_all(|all| all.iter().map(|i| i.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.with_instance(id, |_| ()).is_ok()
    }

    pub fn status(&self, id: &str) -> Option<InstanceStatus> {
        self.with_instance(id, |i| i.status()).ok()
    }

    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        self.with_all(|all| all.iter().map(Instance::snapshot).collect())
            .unwrap_or_default()
    }
}
