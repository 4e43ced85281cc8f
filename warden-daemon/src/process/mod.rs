//! Process management for the warden daemon
//!
//! This module provides:
//! - `LaunchSpec` - what to run for one phase of a service
//! - `ProcessLauncher` - the seam between the supervisor and real processes
//! - `TokioLauncher` - launcher built on `tokio::process`, using `warden-exec`
//!   when resource limits must be applied

mod command;
mod spawn;

pub use command::LaunchSpec;
pub use spawn::find_warden_exec;

use std::path::{Path, PathBuf};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::graph::ServiceId;
use crate::lifecycle::StopSignal;
use crate::state::ExitStatus;

/// Capacity of the exit event channel handed to launchers
pub const EXIT_CHANNEL_CAPACITY: usize = 256;

/// Message for process exit events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExitEvent {
    pub service: ServiceId,
    pub pid: u32,
    pub status: ExitStatus,
}

/// A launched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("empty command")]
    EmptyCommand,

    #[error("working directory '{0}' does not exist")]
    WorkingDirMissing(PathBuf),

    #[error(
        "warden-exec binary not found; it must be installed alongside warden-daemon \
         to apply resource limits"
    )]
    WrapperNotFound,

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited before its pid was known")]
    NoPid,

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },
}

/// Starts and signals service processes.
///
/// `launch` returns once the process exists; its exit is reported later as a
/// [`ProcessExitEvent`] on the channel the launcher was built with.
pub trait ProcessLauncher {
    fn launch(&mut self, spec: &LaunchSpec) -> Result<ProcessHandle, LaunchError>;

    fn signal(&mut self, pid: u32, signal: StopSignal) -> Result<(), LaunchError>;
}

/// Launcher that spawns real processes on the tokio runtime
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    exit_tx: mpsc::Sender<ProcessExitEvent>,
}

impl TokioLauncher {
    pub fn new(exit_tx: mpsc::Sender<ProcessExitEvent>) -> Self {
        Self { exit_tx }
    }
}

impl ProcessLauncher for TokioLauncher {
    fn launch(&mut self, spec: &LaunchSpec) -> Result<ProcessHandle, LaunchError> {
        let mut cmd = spawn::build_command(spec)?;
        let child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: spec.program_and_args[0].clone(),
            source,
        })?;
        let pid = child.id().ok_or(LaunchError::NoPid)?;
        debug!("Service {} spawned with PID {}", spec.service_name, pid);

        tokio::spawn(spawn::monitor_process(
            spec.service,
            spec.service_name.clone(),
            pid,
            child,
            self.exit_tx.clone(),
        ));

        Ok(ProcessHandle { pid })
    }

    fn signal(&mut self, pid: u32, signal: StopSignal) -> Result<(), LaunchError> {
        let sig = match signal {
            StopSignal::Term => Signal::SIGTERM,
            StopSignal::Kill => Signal::SIGKILL,
        };
        debug!("Sending {} to process {}", signal, pid);
        match kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => Ok(()),
            // Already gone; its exit event is on the way
            Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(LaunchError::Signal { pid, source }),
        }
    }
}

/// Read the pid a forking daemon wrote to its pid file
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!("Cannot read pid file {}: {}", path.display(), e);
            return None;
        }
    };
    match contents.trim().parse::<u32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            warn!("Pid file {} does not contain a valid pid", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests;
