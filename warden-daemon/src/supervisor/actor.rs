//! SupervisorActor - owns the graph, the state machine and the launcher
//!
//! Every input (control command, process exit, timer) is handled to completion
//! on the actor's task: the state machine is driven, then the actions it returns
//! are performed, feeding any resulting events back in until none remain.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::env::EnvLookup;
use crate::errors::{DaemonError, Result};
use crate::graph::{ServiceGraph, ServiceId};
use crate::lifecycle::{Action, LaunchPhase, Lifecycle};
use crate::loader::ServiceLoader;
use crate::process::{LaunchSpec, ProcessExitEvent, ProcessLauncher, read_pid_file};
use crate::source::ServiceSource;
use crate::state::ServiceInfo;

use super::command::{SupervisorCommand, TimerEvent};
use super::handle::SupervisorHandle;

/// Capacity of the command and timer channels
const CHANNEL_CAPACITY: usize = 64;

pub struct SupervisorActor<S, E, L> {
    graph: ServiceGraph,
    loader: ServiceLoader<S, E>,
    lifecycle: Lifecycle,
    launcher: L,
    /// Relative working directories are resolved against this
    base_dir: PathBuf,

    rx: mpsc::Receiver<SupervisorCommand>,
    exit_rx: mpsc::Receiver<ProcessExitEvent>,
    timer_tx: mpsc::Sender<TimerEvent>,
    timer_rx: mpsc::Receiver<TimerEvent>,
    restart_timers: HashMap<ServiceId, JoinHandle<()>>,

    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl<S, E, L> SupervisorActor<S, E, L>
where
    S: ServiceSource,
    E: EnvLookup,
    L: ProcessLauncher,
{
    /// Create the actor and its handle. `exit_rx` must receive the exit events of
    /// processes started by `launcher`.
    pub fn create(
        loader: ServiceLoader<S, E>,
        launcher: L,
        exit_rx: mpsc::Receiver<ProcessExitEvent>,
        base_dir: PathBuf,
    ) -> (SupervisorHandle, Self) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = Self {
            graph: ServiceGraph::new(),
            loader,
            lifecycle: Lifecycle::new(),
            launcher,
            base_dir,
            rx,
            exit_rx,
            timer_tx,
            timer_rx,
            restart_timers: HashMap::new(),
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        };
        (SupervisorHandle::new(tx), actor)
    }

    /// Run the actor until shutdown completes or every handle is dropped.
    pub async fn run(mut self) {
        info!("Supervisor started");
        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.process_command(cmd),
                    None => {
                        debug!("All supervisor handles dropped");
                        break;
                    }
                },
                Some(event) = self.exit_rx.recv() => self.handle_exit(event),
                Some(event) = self.timer_rx.recv() => self.handle_timer(event),
            }

            if self.shutting_down && self.all_down() {
                break;
            }
        }

        for (_, timer) in self.restart_timers.drain() {
            timer.abort();
        }
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        info!("Supervisor stopped");
    }

    fn process_command(&mut self, cmd: SupervisorCommand) {
        match cmd {
            SupervisorCommand::Load { name, reply } => {
                let result = self.loader.load(&mut self.graph, &name).map(|_| ());
                let _ = reply.send(result);
            }
            SupervisorCommand::Start { name, reply } => {
                let result = self.refuse_if_shutting_down().and_then(|()| {
                    let id = self.loader.load(&mut self.graph, &name)?;
                    let actions = self.lifecycle.start(&mut self.graph, id)?;
                    self.perform(actions);
                    Ok(())
                });
                let _ = reply.send(result);
            }
            SupervisorCommand::Stop { name, reply } => {
                let result =
                    self.with_loaded(&name, |lifecycle, graph, id| lifecycle.stop(graph, id));
                let _ = reply.send(result);
            }
            SupervisorCommand::Restart { name, reply } => {
                let result = self.refuse_if_shutting_down().and_then(|()| {
                    let id = self.loader.load(&mut self.graph, &name)?;
                    let actions = self.lifecycle.restart(&mut self.graph, id)?;
                    self.perform(actions);
                    Ok(())
                });
                let _ = reply.send(result);
            }
            SupervisorCommand::Reset { name, reply } => {
                let result =
                    self.with_loaded(&name, |lifecycle, graph, id| lifecycle.reset(graph, id));
                let _ = reply.send(result);
            }
            SupervisorCommand::Trigger { name, reply } => {
                let result =
                    self.with_loaded(&name, |lifecycle, graph, id| lifecycle.trigger(graph, id));
                let _ = reply.send(result);
            }
            SupervisorCommand::Status { name, reply } => {
                let result = self
                    .lookup(&name)
                    .map(|id| self.graph.service(id).info());
                let _ = reply.send(result);
            }
            SupervisorCommand::List { reply } => {
                let infos: Vec<ServiceInfo> = self
                    .graph
                    .ids()
                    .map(|id| self.graph.service(id).info())
                    .collect();
                let _ = reply.send(infos);
            }
            SupervisorCommand::StartOrder { name, reply } => {
                let result = self.start_order(name.as_deref());
                let _ = reply.send(result);
            }
            SupervisorCommand::GraphDot { names, reply } => {
                let result = self.graph_dot(&names);
                let _ = reply.send(result);
            }
            SupervisorCommand::Shutdown { reply } => {
                self.shutdown_waiters.push(reply);
                self.begin_shutdown();
            }
        }
    }

    fn refuse_if_shutting_down(&self) -> Result<()> {
        if self.shutting_down {
            return Err(DaemonError::Internal("Supervisor is shutting down".into()));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<ServiceId> {
        self.graph
            .lookup(name)
            .ok_or_else(|| DaemonError::ServiceNotFound(name.to_string()))
    }

    /// Run a lifecycle command against an already loaded service
    fn with_loaded(
        &mut self,
        name: &str,
        command: impl FnOnce(&mut Lifecycle, &mut ServiceGraph, ServiceId) -> Result<Vec<Action>>,
    ) -> Result<()> {
        let id = self.lookup(name)?;
        let actions = command(&mut self.lifecycle, &mut self.graph, id)?;
        self.perform(actions);
        Ok(())
    }

    fn start_order(&mut self, name: Option<&str>) -> Result<Vec<String>> {
        let order = match name {
            Some(name) => {
                let id = self.loader.load(&mut self.graph, name)?;
                self.graph.topological_start_order(id)?
            }
            None => self.graph.start_order()?,
        };
        Ok(order
            .into_iter()
            .map(|id| self.graph.name(id).to_string())
            .collect())
    }

    fn graph_dot(&mut self, names: &[String]) -> Result<String> {
        let mut roots = Vec::with_capacity(names.len());
        for name in names {
            roots.push(self.loader.load(&mut self.graph, name)?);
        }
        Ok(self.graph.to_dot(&roots))
    }

    fn begin_shutdown(&mut self) {
        if !self.shutting_down {
            info!("Shutting down, stopping all services");
            self.shutting_down = true;
        }
        let actions = self.lifecycle.shutdown(&mut self.graph);
        self.perform(actions);
    }

    fn all_down(&self) -> bool {
        self.graph.ids().all(|id| !self.graph.state(id).status.is_active())
    }

    // === Events ===

    fn handle_exit(&mut self, event: ProcessExitEvent) {
        if event.service.index() >= self.graph.len() {
            warn!("Exit event for unknown service {}", event.service);
            return;
        }
        let actions = self.lifecycle.process_exited(
            &mut self.graph,
            event.service,
            event.pid,
            event.status,
            Instant::now(),
        );
        self.perform(actions);
    }

    fn handle_timer(&mut self, event: TimerEvent) {
        let actions = match event {
            TimerEvent::Restart(service) => {
                self.restart_timers.remove(&service);
                if self.shutting_down {
                    return;
                }
                self.lifecycle.restart_timer_fired(&mut self.graph, service)
            }
            TimerEvent::Kill { service, pid } => {
                self.lifecycle.kill_timer_fired(&mut self.graph, service, pid)
            }
        };
        self.perform(actions);
    }

    // === Actions ===

    /// Perform actions until the state machine has nothing more to ask for.
    fn perform(&mut self, actions: Vec<Action>) {
        let mut pending = VecDeque::from(actions);
        while let Some(action) = pending.pop_front() {
            pending.extend(self.perform_action(action));
        }
    }

    fn perform_action(&mut self, action: Action) -> Vec<Action> {
        match action {
            Action::Launch { service, phase } => self.launch(service, phase),
            Action::Signal {
                service,
                pid,
                signal,
            } => {
                if let Err(e) = self.launcher.signal(pid, signal) {
                    warn!(
                        "Failed to send {} to service {}: {}",
                        signal,
                        self.graph.name(service),
                        e
                    );
                }
                Vec::new()
            }
            Action::ArmKillTimer {
                service,
                pid,
                after,
            } => {
                // Stale kill timers are ignored by the state machine
                self.arm_timer(after, TimerEvent::Kill { service, pid });
                Vec::new()
            }
            Action::ScheduleRestart { service, after } => {
                debug!(
                    "Service {} restarts in {:?}",
                    self.graph.name(service),
                    after
                );
                let timer = self.arm_timer(after, TimerEvent::Restart(service));
                if let Some(previous) = self.restart_timers.insert(service, timer) {
                    previous.abort();
                }
                Vec::new()
            }
            Action::ReadPidFile { service } => {
                let pid = self.pid_file_path(service).and_then(|path| read_pid_file(&path));
                self.lifecycle
                    .pid_file_read(&mut self.graph, service, pid, Utc::now())
            }
        }
    }

    fn launch(&mut self, service: ServiceId, phase: LaunchPhase) -> Vec<Action> {
        let name = self.graph.name(service).to_string();
        let launched = LaunchSpec::for_service(
            service,
            self.graph.service(service),
            phase,
            &self.base_dir,
        )
        .and_then(|spec| {
            self.launcher
                .launch(&spec)
                .map_err(|e| DaemonError::Launch {
                    service: name.clone(),
                    reason: e.to_string(),
                })
        });

        match launched {
            Ok(handle) => self.lifecycle.launch_succeeded(
                &mut self.graph,
                service,
                phase,
                handle.pid,
                Utc::now(),
            ),
            Err(e) => {
                error!("{}", e);
                let reason = match e {
                    DaemonError::Launch { reason, .. } => reason,
                    other => other.to_string(),
                };
                self.lifecycle
                    .launch_failed(&mut self.graph, service, phase, reason)
            }
        }
    }

    fn arm_timer(&self, after: Duration, event: TimerEvent) -> JoinHandle<()> {
        let timer_tx = self.timer_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = timer_tx.send(event).await;
        })
    }

    /// Pid file of a bgprocess service, resolved like its working directory
    fn pid_file_path(&self, service: ServiceId) -> Option<PathBuf> {
        let config = &self.graph.service(service).config;
        let pid_file = config.pid_file.as_deref()?;
        let working_dir = match &config.working_dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        };
        Some(working_dir.join(pid_file))
    }
}
