//! Command dispatch shared by the HTTP handlers.
//!
//! Every command validates the instance id, runs the supervisor operation,
//! announces the instance's resulting status to all viewers whatever the
//! outcome, and reports `{status, message}`. Business failures never become
//! transport errors.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hub::{BroadcastHub, StatusEvent, Subscription};
use crate::instance::{InstanceRegistry, InstanceSnapshot};
use crate::supervisor::error::SupervisorError;
use crate::supervisor::Supervisor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandResult {
    pub status: Outcome,
    pub message: String,
}

impl CommandResult {
    fn from_result(result: Result<String, SupervisorError>) -> Self {
        match result {
            Ok(message) => Self { status: Outcome::Success, message },
            Err(e) => {
                tracing::warn!("Command failed [{}]: {}", e.error_code(), e);
                Self { status: Outcome::Error, message: e.to_string() }
            }
        }
    }
}

/// `{"status": "stopped" | "starting" | "running" | "error" | "unknown"}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    pub status: String,
}

#[derive(Debug, Clone, Copy)]
enum Command {
    Start,
    Stop,
    Restart,
}

#[derive(Clone)]
pub struct ControlApi {
    supervisor: Supervisor,
    hub: Arc<BroadcastHub>,
}

impl ControlApi {
    pub fn new(supervisor: Supervisor, hub: Arc<BroadcastHub>) -> Self {
        Self { supervisor, hub }
    }

    fn registry(&self) -> &Arc<InstanceRegistry> {
        self.supervisor.registry()
    }

    pub async fn start(&self, id: &str) -> CommandResult {
        self.dispatch(Command::Start, id).await
    }

    pub async fn stop(&self, id: &str) -> CommandResult {
        self.dispatch(Command::Stop, id).await
    }

    pub async fn restart(&self, id: &str) -> CommandResult {
        self.dispatch(Command::Restart, id).await
    }

    /// Unknown ids report `unknown` instead of failing.
    pub fn status(&self, id: &str) -> StatusReply {
        let status = self
            .registry()
            .status(id)
            .map(|s| s.as_str())
            .unwrap_or("unknown");
        StatusReply { status: status.to_string() }
    }

    pub fn instances(&self) -> Vec<InstanceSnapshot> {
        self.registry().snapshot()
    }

    /// Register a viewer. The snapshot is taken under the registry lock, and
    /// every broadcast is also issued under that lock, so no update can
    /// slip in between the snapshot and the registration.
    pub fn subscribe(&self) -> Subscription {
        let hub = self.hub.clone();
        let subscribe_now = move |all: &mut [crate::instance::Instance]| {
            let snapshot = all
                .iter()
                .map(|i| StatusEvent::status_update(&i.id, i.status()))
                .collect();
            hub.subscribe(snapshot)
        };
        match self.registry().with_all(subscribe_now) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!("Snapshot failed, subscribing without one: {}", e);
                self.hub.subscribe(Vec::new())
            }
        }
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    async fn dispatch(&self, command: Command, id: &str) -> CommandResult {
        if !self.registry().contains(id) {
            return CommandResult::from_result(Err(SupervisorError::InvalidInstance(id.to_string())));
        }

        tracing::info!("[{}] {:?} requested", id, command);
        let result = match command {
            Command::Start => self.supervisor.start(id),
            Command::Stop => self.supervisor.stop(id).await,
            Command::Restart => self.supervisor.restart(id).await,
        };

        self.announce(id);
        CommandResult::from_result(result)
    }

    /// Push the instance's current status to every viewer and record it as
    /// the last broadcast value.
    fn announce(&self, id: &str) {
        let result = self.registry().with_instance(id, |inst| {
            let status = inst.mark_broadcast();
            self.hub.broadcast(&StatusEvent::status_update(&inst.id, status));
        });
        if let Err(e) = result {
            tracing::error!("[{}] announce failed: {}", id, e);
        }
    }
}
