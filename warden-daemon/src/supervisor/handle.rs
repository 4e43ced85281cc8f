//! SupervisorHandle - cheap-to-clone interface to the supervisor actor

use tokio::sync::{mpsc, oneshot};

use crate::errors::{DaemonError, Result};
use crate::state::ServiceInfo;

use super::command::SupervisorCommand;

/// Handle for sending commands to the supervisor.
/// Cloning only clones the channel sender.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub(super) fn new(tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DaemonError::Internal("Supervisor closed".into()))?;
        reply_rx
            .await
            .map_err(|_| DaemonError::Internal("Supervisor dropped response".into()))
    }

    /// Load a service and its dependencies without starting anything
    pub async fn load(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Load { name, reply })
            .await?
    }

    /// Load (if needed) and explicitly start a service
    pub async fn start(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Start { name, reply })
            .await?
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Stop { name, reply })
            .await?
    }

    pub async fn restart(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Restart { name, reply })
            .await?
    }

    /// Clear the failed state of a service
    pub async fn reset(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Reset { name, reply })
            .await?
    }

    pub async fn trigger(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Trigger { name, reply })
            .await?
    }

    pub async fn status(&self, name: &str) -> Result<ServiceInfo> {
        let name = name.to_string();
        self.request(|reply| SupervisorCommand::Status { name, reply })
            .await?
    }

    /// Every loaded service, in load order
    pub async fn list(&self) -> Result<Vec<ServiceInfo>> {
        self.request(|reply| SupervisorCommand::List { reply }).await
    }

    /// Service names in start order, for one service or the whole graph
    pub async fn start_order(&self, name: Option<&str>) -> Result<Vec<String>> {
        let name = name.map(str::to_string);
        self.request(|reply| SupervisorCommand::StartOrder { name, reply })
            .await?
    }

    /// Graphviz export of the named services (loaded on demand) or the whole graph
    pub async fn graph_dot(&self, names: &[String]) -> Result<String> {
        let names = names.to_vec();
        self.request(|reply| SupervisorCommand::GraphDot { names, reply })
            .await?
    }

    /// Stop every service and wait until all are down
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SupervisorCommand::Shutdown { reply })
            .await
    }
}
