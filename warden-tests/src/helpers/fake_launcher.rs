//! Recording launcher that never spawns anything
//!
//! Launches get a made-up pid and are recorded. Exits are delivered through
//! the same channel the supervisor reads real exit events from, either
//! explicitly by the test or automatically when a stop signal is sent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use warden_daemon::graph::ServiceId;
use warden_daemon::lifecycle::{LaunchPhase, StopSignal};
use warden_daemon::process::{
    LaunchError, LaunchSpec, ProcessExitEvent, ProcessHandle, ProcessLauncher,
};
use warden_daemon::state::ExitStatus;

const SIGKILL: i32 = 9;
const SIGTERM: i32 = 15;
const FIRST_PID: u32 = 1000;

/// One recorded launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub service: String,
    pub phase: LaunchPhase,
    pub program_and_args: Vec<String>,
    pub pid: u32,
}

#[derive(Debug, Clone, Copy)]
struct LiveProcess {
    service: ServiceId,
    pid: u32,
}

#[derive(Debug, Default)]
struct Recorder {
    launches: Vec<LaunchRecord>,
    signals: Vec<(String, StopSignal)>,
    live: HashMap<String, LiveProcess>,
    failing: HashSet<String>,
    ignore_term: HashSet<String>,
    next_pid: u32,
}

#[derive(Debug, Clone)]
pub struct FakeLauncher {
    inner: Arc<Mutex<Recorder>>,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
}

impl FakeLauncher {
    pub fn new(exit_tx: mpsc::Sender<ProcessExitEvent>) -> Self {
        let recorder = Recorder {
            next_pid: FIRST_PID,
            ..Recorder::default()
        };
        Self {
            inner: Arc::new(Mutex::new(recorder)),
            exit_tx,
        }
    }

    /// Make every launch of `service` fail
    pub fn fail_launches_of(&self, service: &str) {
        self.inner.lock().unwrap().failing.insert(service.to_string());
    }

    /// Keep processes of `service` alive on SIGTERM, so only SIGKILL stops them
    pub fn ignore_term_for(&self, service: &str) {
        self.inner.lock().unwrap().ignore_term.insert(service.to_string());
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.inner.lock().unwrap().launches.clone()
    }

    /// Services in launch order, for start-order assertions
    pub fn launched_services(&self) -> Vec<String> {
        self.launches().into_iter().map(|l| l.service).collect()
    }

    pub fn launch_count(&self, service: &str) -> usize {
        self.launches().iter().filter(|l| l.service == service).count()
    }

    pub fn signals(&self) -> Vec<(String, StopSignal)> {
        self.inner.lock().unwrap().signals.clone()
    }

    /// Pid of the process currently running for `service`
    pub fn live_pid(&self, service: &str) -> Option<u32> {
        self.inner.lock().unwrap().live.get(service).map(|p| p.pid)
    }

    /// Report that the live process of `service` exited. Returns false if the
    /// service has no live process.
    pub async fn exit(&self, service: &str, status: ExitStatus) -> bool {
        let process = self.inner.lock().unwrap().live.remove(service);
        match process {
            Some(process) => self
                .exit_tx
                .send(ProcessExitEvent {
                    service: process.service,
                    pid: process.pid,
                    status,
                })
                .await
                .is_ok(),
            None => false,
        }
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&mut self, spec: &LaunchSpec) -> Result<ProcessHandle, LaunchError> {
        let mut recorder = self.inner.lock().unwrap();
        if recorder.failing.contains(&spec.service_name) {
            return Err(LaunchError::Spawn {
                program: spec.program_and_args.first().cloned().unwrap_or_default(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
            });
        }

        let pid = recorder.next_pid;
        recorder.next_pid += 1;
        recorder.launches.push(LaunchRecord {
            service: spec.service_name.clone(),
            phase: spec.phase,
            program_and_args: spec.program_and_args.clone(),
            pid,
        });
        recorder.live.insert(
            spec.service_name.clone(),
            LiveProcess {
                service: spec.service,
                pid,
            },
        );
        Ok(ProcessHandle { pid })
    }

    fn signal(&mut self, pid: u32, signal: StopSignal) -> Result<(), LaunchError> {
        let mut recorder = self.inner.lock().unwrap();
        let Some(name) = recorder
            .live
            .iter()
            .find(|(_, process)| process.pid == pid)
            .map(|(name, _)| name.clone())
        else {
            return Ok(());
        };
        recorder.signals.push((name.clone(), signal));

        let status = match signal {
            StopSignal::Term if recorder.ignore_term.contains(&name) => return Ok(()),
            StopSignal::Term => ExitStatus::Signal(SIGTERM),
            StopSignal::Kill => ExitStatus::Signal(SIGKILL),
        };
        if let Some(process) = recorder.live.remove(&name) {
            // The actor is busy performing actions; the event is read once it is done
            let _ = self.exit_tx.try_send(ProcessExitEvent {
                service: process.service,
                pid: process.pid,
                status,
            });
        }
        Ok(())
    }
}
