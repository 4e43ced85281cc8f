use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use crate::config::ServiceType;
use crate::graph::ServiceId;

/// Status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceStatus {
    #[default]
    Stopped,
    Starting,
    Started,
    Stopping,
    /// Terminal until reset
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Started => "started",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Failed => "failed",
        }
    }

    /// Starting, started or stopping
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Starting | ServiceStatus::Started | ServiceStatus::Stopping
        )
    }

    /// Stopped or failed
    pub fn is_down(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => ExitStatus::Code(code),
            (None, Some(signal)) => ExitStatus::Signal(signal),
            // Neither code nor signal: report as a generic failure
            (None, None) => ExitStatus::Code(-1),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exited with code {}", code),
            ExitStatus::Signal(signal) => write!(f, "killed by signal {}", signal),
        }
    }
}

/// Why a service ended up in `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The launcher could not start the command
    LaunchFailed(String),
    /// A scripted or bgprocess start command did not succeed
    StartCommandFailed(ExitStatus),
    /// A process service exited while still starting
    ExitedBeforeStarted(ExitStatus),
    /// A required dependency failed
    DependencyFailed(String),
    /// The bgprocess pid file was missing or unreadable
    PidFileUnreadable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::LaunchFailed(reason) => write!(f, "launch failed: {}", reason),
            FailureReason::StartCommandFailed(status) => {
                write!(f, "start command {}", status)
            }
            FailureReason::ExitedBeforeStarted(status) => {
                write!(f, "process {} before it started", status)
            }
            FailureReason::DependencyFailed(name) => write!(f, "dependency '{}' failed", name),
            FailureReason::PidFileUnreadable => f.write_str("could not read pid file"),
        }
    }
}

/// A live process belonging to a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// Runtime state of a single service
#[derive(Debug, Clone, Default)]
pub struct ServiceState {
    pub status: ServiceStatus,
    /// Process currently owned by the service (the start command while starting,
    /// the supervised process once started, the stop command while stopping)
    pub process: Option<ProcessInfo>,
    pub last_exit: Option<ExitStatus>,
    pub failure: Option<FailureReason>,
    /// Automatic restarts since the last explicit start
    pub restart_count: u32,
    /// Instants of recent automatic restarts, for the restart limit window
    pub restart_times: VecDeque<Instant>,

    /// Started by an explicit command
    pub explicit: bool,
    /// Number of active dependents holding this service
    pub required_by: usize,
    /// Dependencies this service currently holds
    pub holding: Vec<ServiceId>,

    /// A stop arrived during an in-flight start
    pub pending_stop: bool,
    /// Start again once the current stop completes
    pub start_after_stop: bool,
    /// A launch has been requested and not yet reported back
    pub launch_in_flight: bool,
    /// The stop action (signal, stop command) has been issued
    pub stop_issued: bool,
    /// Triggered services only
    pub triggered: bool,
    /// Brought down by a restarting dependency; come back when it does
    pub restart_with_dependency: bool,
    /// Going down after an unexpected exit; starts again when the restart timer fires
    pub awaiting_restart: bool,
}

impl ServiceState {
    /// Explicitly started or held by an active dependent
    pub fn is_wanted(&self) -> bool {
        self.explicit || self.required_by > 0
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.map(|p| p.pid)
    }
}

/// Read-only snapshot of a service, as reported by `status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<ExitStatus>,
    pub failure: Option<FailureReason>,
    pub restart_count: u32,
    pub explicit: bool,
    pub required_by: usize,
}

impl fmt::Display for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.service_type, self.status)?;
        if let Some(pid) = self.pid {
            write!(f, " pid {}", pid)?;
        }
        if let Some(failure) = &self.failure {
            write!(f, " ({})", failure)?;
        }
        Ok(())
    }
}
