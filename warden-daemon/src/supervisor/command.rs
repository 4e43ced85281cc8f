//! Messages handled by the supervisor actor

use tokio::sync::oneshot;

use crate::errors::Result;
use crate::graph::ServiceId;
use crate::state::ServiceInfo;

/// Commands sent through a [`SupervisorHandle`](super::SupervisorHandle)
pub enum SupervisorCommand {
    // === Loading ===
    Load {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },

    // === Lifecycle ===
    Start {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Restart {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Trigger {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },

    // === Queries ===
    Status {
        name: String,
        reply: oneshot::Sender<Result<ServiceInfo>>,
    },
    List {
        reply: oneshot::Sender<Vec<ServiceInfo>>,
    },
    StartOrder {
        /// Whole graph when `None`
        name: Option<String>,
        reply: oneshot::Sender<Result<Vec<String>>>,
    },
    GraphDot {
        /// Whole graph when empty
        names: Vec<String>,
        reply: oneshot::Sender<Result<String>>,
    },

    /// Stop every service and reply once all are down
    Shutdown { reply: oneshot::Sender<()> },
}

/// Timers armed by the supervisor, delivered back to its own loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Restart(ServiceId),
    Kill { service: ServiceId, pid: u32 },
}
