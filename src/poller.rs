//! Periodic status resolution: probes the port of every Starting/Running
//! worker, promotes Starting -> Running once it answers, enforces the
//! startup timeout, and announces every status change exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::hub::{BroadcastHub, StatusEvent};
use crate::instance::Instance;
use crate::probe;
use crate::supervisor::process::ProcessHandle;
use crate::supervisor::state_machine::InstanceStatus;
use crate::supervisor::Supervisor;

pub struct StatusPoller {
    supervisor: Supervisor,
    hub: Arc<BroadcastHub>,
    probe_host: String,
    interval: Duration,
    probe_timeout: Duration,
    startup_timeout: Duration,
}

impl StatusPoller {
    pub fn new(
        supervisor: Supervisor,
        hub: Arc<BroadcastHub>,
        probe_host: &str,
        timings: &crate::config::Timings,
    ) -> Self {
        Self {
            supervisor,
            hub,
            probe_host: probe_host.to_string(),
            interval: timings.poll_interval(),
            probe_timeout: timings.probe_timeout(),
            startup_timeout: timings.startup_timeout(),
        }
    }

    /// Poll until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!("Status poller started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let emitted = self.poll_once().await;
                    if emitted > 0 {
                        tracing::debug!("Poll cycle emitted {} status events", emitted);
                    }
                }
            }
        }
        tracing::info!("Status poller stopped");
    }

    /// One pass over all instances. Returns the number of events broadcast.
    /// Failures on one instance are logged and do not affect the others.
    pub async fn poll_once(&self) -> usize {
        let registry = self.supervisor.registry();
        let mut emitted = 0;

        for id in registry.ids() {
            let target = match registry.with_instance(&id, |inst| {
                inst.status().is_active().then(|| (inst.port, inst.generation()))
            }) {
                Ok(target) => target,
                Err(e) => {
                    tracing::error!("[{}] poll skipped: {}", id, e);
                    continue;
                }
            };

            // 프로브는 락 밖에서 수행 (최대 probe_timeout 만큼 대기)
            let observation = match target {
                Some((port, generation)) => {
                    let reachable = probe::is_reachable(&self.probe_host, port, self.probe_timeout).await;
                    Some((reachable, generation))
                }
                None => None,
            };

            let outcome = registry.with_instance(&id, |inst| {
                let orphan = observation.and_then(|(reachable, generation)| {
                    resolve(inst, reachable, generation, self.startup_timeout, Instant::now())
                });
                // Broadcast inside the critical section so events for one
                // instance leave in the same order the transitions happened.
                let announced = match inst.take_unbroadcast() {
                    Some(status) => {
                        self.hub.broadcast(&StatusEvent::status_update(&inst.id, status));
                        true
                    }
                    None => false,
                };
                (orphan, announced)
            });

            match outcome {
                Ok((orphan, announced)) => {
                    if announced {
                        emitted += 1;
                    }
                    if let Some(process) = orphan {
                        self.supervisor.reclaim(&id, process);
                    }
                }
                Err(e) => tracing::error!("[{}] poll update failed: {}", id, e),
            }
        }
        emitted
    }
}

/// Apply one probe result. Returns the process handle when the startup
/// timeout detached it, so the caller can kill it off the polling path.
fn resolve(
    inst: &mut Instance,
    reachable: bool,
    generation: u64,
    startup_timeout: Duration,
    now: Instant,
) -> Option<ProcessHandle> {
    // probe 도중 stop/restart/crash 가 일어났으면 결과를 버림
    if inst.generation() != generation || !inst.status().is_active() {
        return None;
    }

    if reachable {
        let _ = inst.transition(InstanceStatus::Running);
        return None;
    }

    let timed_out = inst.status() == InstanceStatus::Starting
        && inst.elapsed_since_start(now).map_or(false, |e| e > startup_timeout);
    if timed_out {
        tracing::warn!(
            "[{}] port {} did not open within {:?}, marking stopped",
            inst.id,
            inst.port,
            startup_timeout
        );
        let _ = inst.transition(InstanceStatus::Stopped);
        return inst.take_process();
    }
    None
}
