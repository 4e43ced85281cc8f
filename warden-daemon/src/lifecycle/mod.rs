//! Service lifecycle state machine
//!
//! The state machine does no I/O. Commands and process events update service
//! state in the [`ServiceGraph`] and return the [`Action`]s the supervisor must
//! perform. Every event is propagated through a FIFO work queue: a service whose
//! state changes queues its neighbours, and each queued service is re-evaluated
//! against the current state of the graph until the queue is empty.
//!
//! Activation follows a hold model. A service is wanted when it was started
//! explicitly or is held by an active dependent. Starting a service makes it hold
//! its dependencies; a service that is stopped or failed releases its holds.

mod action;

pub use action::{Action, LaunchPhase, StopSignal};

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::{DependencyType, RestartConfig, ServiceType};
use crate::errors::{DaemonError, Result};
use crate::graph::{DepFilter, ServiceGraph, ServiceId};
use crate::state::{ExitStatus, FailureReason, ProcessInfo, ServiceState, ServiceStatus};

/// Outcome of checking a starting service's dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Ready,
    Waiting,
    /// A hard dependency failed
    Failed(ServiceId),
    /// A hard dependency is stopping; get out of its way
    Cancelled,
}

/// How a forced stop treats the dependents it brings down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ForceMode {
    /// Stop for good: dependents lose their explicit activation
    ClearExplicit,
    /// Dependents come back when the service restarts
    RestartWithDependency,
}

#[derive(Debug, Default)]
pub struct Lifecycle {
    queue: VecDeque<ServiceId>,
    actions: Vec<Action>,
    /// Set once by `shutdown`; nothing restarts afterwards
    shutting_down: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    // === Commands ===

    /// Explicitly start a service (and, through holds, its dependencies).
    pub fn start(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Result<Vec<Action>> {
        let name = graph.name(id).to_string();
        let state = graph.state_mut(id);
        if state.status == ServiceStatus::Failed {
            return Err(DaemonError::ServiceFailed(name));
        }
        if !state.status.is_active() {
            state.restart_count = 0;
            state.restart_times.clear();
        }
        state.explicit = true;
        state.restart_with_dependency = false;
        state.awaiting_restart = false;
        state.pending_stop = false;
        info!("Starting service {}", name);
        self.enqueue(id);
        Ok(self.run(graph))
    }

    /// Explicitly stop a service. Hard dependents are stopped first.
    pub fn stop(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Result<Vec<Action>> {
        info!("Stopping service {}", graph.name(id));
        self.force_down(graph, id, ForceMode::ClearExplicit);
        // A starting service is cancelled on evaluation instead
        if graph.state(id).status == ServiceStatus::Started {
            self.begin_stop(graph, id);
        }
        Ok(self.run(graph))
    }

    /// Stop and start again a started service; otherwise the same as `start`.
    pub fn restart(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Result<Vec<Action>> {
        if graph.state(id).status != ServiceStatus::Started {
            return self.start(graph, id);
        }
        info!("Restarting service {}", graph.name(id));
        graph.state_mut(id).start_after_stop = true;
        self.force_down(graph, id, ForceMode::RestartWithDependency);
        self.begin_stop(graph, id);
        Ok(self.run(graph))
    }

    /// Bring every service down for good.
    pub fn shutdown(&mut self, graph: &mut ServiceGraph) -> Vec<Action> {
        self.shutting_down = true;
        let ids: Vec<ServiceId> = graph.ids().collect();
        for &id in &ids {
            let state = graph.state_mut(id);
            state.explicit = false;
            state.start_after_stop = false;
            state.awaiting_restart = false;
            state.restart_with_dependency = false;
            self.enqueue(id);
        }
        self.run(graph)
    }

    /// Return a failed service to stopped. No effect on other states.
    pub fn reset(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Result<Vec<Action>> {
        if graph.state(id).status != ServiceStatus::Failed {
            return Ok(Vec::new());
        }
        info!("Resetting service {}", graph.name(id));
        graph.state_mut(id).failure = None;
        self.set_status(graph, id, ServiceStatus::Stopped);
        Ok(self.run(graph))
    }

    /// Mark a triggered service as triggered.
    pub fn trigger(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Result<Vec<Action>> {
        if graph.service(id).service_type() != ServiceType::Triggered {
            return Err(DaemonError::NotTriggered(graph.name(id).to_string()));
        }
        debug!("Service {} triggered", graph.name(id));
        graph.state_mut(id).triggered = true;
        self.enqueue(id);
        Ok(self.run(graph))
    }

    // === Events ===

    /// The launcher started a command for `id`.
    pub fn launch_succeeded(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        phase: LaunchPhase,
        pid: u32,
        now: DateTime<Utc>,
    ) -> Vec<Action> {
        let state = graph.state_mut(id);
        state.launch_in_flight = false;
        state.process = Some(ProcessInfo {
            pid,
            started_at: now,
        });
        info!(
            "Service {} {} command running with pid {}",
            graph.name(id),
            match phase {
                LaunchPhase::Start => "start",
                LaunchPhase::StopScript => "stop",
            },
            pid
        );

        let status = graph.state(id).status;
        if phase == LaunchPhase::Start
            && status == ServiceStatus::Starting
            && graph.service(id).service_type() == ServiceType::Process
        {
            self.enter_started(graph, id);
        } else {
            self.enqueue(id);
        }
        self.run(graph)
    }

    /// The launcher could not start a command for `id`.
    pub fn launch_failed(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        phase: LaunchPhase,
        reason: String,
    ) -> Vec<Action> {
        graph.state_mut(id).launch_in_flight = false;
        let status = graph.state(id).status;
        match phase {
            LaunchPhase::Start if status != ServiceStatus::Stopping => {
                self.enter_failed(graph, id, FailureReason::LaunchFailed(reason));
            }
            _ => {
                warn!("Service {}: {}", graph.name(id), reason);
                self.enqueue(id);
            }
        }
        self.run(graph)
    }

    /// A process owned by `id` has exited.
    pub fn process_exited(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        pid: u32,
        status: ExitStatus,
        now: Instant,
    ) -> Vec<Action> {
        if graph.state(id).pid() != Some(pid) {
            debug!("Ignoring exit of stale pid {} for service {}", pid, graph.name(id));
            return Vec::new();
        }

        let state = graph.state_mut(id);
        state.process = None;
        state.last_exit = Some(status);
        let service_status = state.status;
        let stop_issued = state.stop_issued;
        let service_type = graph.service(id).service_type();
        info!("Service {} process {} {}", graph.name(id), pid, status);

        match (service_status, service_type) {
            (ServiceStatus::Starting, ServiceType::Scripted | ServiceType::BgProcess) => {
                if !status.success() {
                    self.enter_failed(graph, id, FailureReason::StartCommandFailed(status));
                } else if service_type == ServiceType::BgProcess
                    && graph.service(id).config.pid_file.is_some()
                {
                    graph.state_mut(id).launch_in_flight = true;
                    self.actions.push(Action::ReadPidFile { service: id });
                } else {
                    self.enter_started(graph, id);
                }
            }
            (ServiceStatus::Starting, _) => {
                self.enter_failed(graph, id, FailureReason::ExitedBeforeStarted(status));
            }
            (ServiceStatus::Started, ServiceType::Process) => {
                self.unexpected_exit(graph, id, status, now);
            }
            (ServiceStatus::Stopping, _) => {
                if service_type == ServiceType::Scripted && stop_issued && !status.success() {
                    warn!("Stop command of service {} {}", graph.name(id), status);
                }
                self.enqueue(id);
            }
            _ => {}
        }
        self.run(graph)
    }

    /// The pid file of a bgprocess service has been read (`None` if unreadable).
    pub fn pid_file_read(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        pid: Option<u32>,
        now: DateTime<Utc>,
    ) -> Vec<Action> {
        let state = graph.state(id);
        if state.status != ServiceStatus::Starting || !state.launch_in_flight {
            return Vec::new();
        }
        graph.state_mut(id).launch_in_flight = false;
        match pid {
            Some(pid) => {
                graph.state_mut(id).process = Some(ProcessInfo {
                    pid,
                    started_at: now,
                });
                self.enter_started(graph, id);
            }
            None => self.enter_failed(graph, id, FailureReason::PidFileUnreadable),
        }
        self.run(graph)
    }

    /// The delay before an automatic restart has passed.
    pub fn restart_timer_fired(&mut self, graph: &mut ServiceGraph, id: ServiceId) -> Vec<Action> {
        let state = graph.state_mut(id);
        if !state.awaiting_restart {
            return Vec::new();
        }
        state.awaiting_restart = false;
        info!("Restarting service {} after unexpected exit", graph.name(id));
        self.enqueue(id);
        self.run(graph)
    }

    /// The stop timeout of a process has passed.
    pub fn kill_timer_fired(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        pid: u32,
    ) -> Vec<Action> {
        let state = graph.state(id);
        if state.status == ServiceStatus::Stopping && state.pid() == Some(pid) {
            warn!(
                "Service {} did not stop in time, sending SIGKILL to {}",
                graph.name(id),
                pid
            );
            self.actions.push(Action::Signal {
                service: id,
                pid,
                signal: StopSignal::Kill,
            });
        }
        std::mem::take(&mut self.actions)
    }

    // === Propagation ===

    fn enqueue(&mut self, id: ServiceId) {
        if !self.queue.contains(&id) {
            self.queue.push_back(id);
        }
    }

    fn run(&mut self, graph: &mut ServiceGraph) -> Vec<Action> {
        while let Some(id) = self.queue.pop_front() {
            self.evaluate(graph, id);
        }
        std::mem::take(&mut self.actions)
    }

    fn evaluate(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        match graph.state(id).status {
            ServiceStatus::Stopped => self.evaluate_stopped(graph, id),
            ServiceStatus::Starting => self.evaluate_starting(graph, id),
            ServiceStatus::Started => self.evaluate_started(graph, id),
            ServiceStatus::Stopping => self.evaluate_stopping(graph, id),
            ServiceStatus::Failed => self.release_holds(graph, id),
        }
    }

    fn evaluate_stopped(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let state = graph.state(id);
        // Keeps its holds until it starts again
        if !self.shutting_down && (state.restart_with_dependency || state.awaiting_restart) {
            return;
        }
        if state.is_wanted() {
            self.begin_start(graph, id);
        } else {
            self.release_holds(graph, id);
        }
    }

    fn evaluate_starting(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let state = graph.state(id);
        let in_flight = state.launch_in_flight || state.process.is_some();

        if !state.is_wanted() {
            if in_flight {
                // Applied once the start completes
                graph.state_mut(id).pending_stop = true;
            } else {
                info!("Start of service {} cancelled", graph.name(id));
                self.enter_stopped(graph, id);
            }
            return;
        }
        if in_flight {
            return;
        }

        match self.readiness(graph, id) {
            Readiness::Waiting => return,
            Readiness::Failed(dep) => {
                let reason = FailureReason::DependencyFailed(graph.name(dep).to_string());
                self.enter_failed(graph, id, reason);
                return;
            }
            Readiness::Cancelled => {
                info!(
                    "Start of service {} cancelled, a dependency is stopping",
                    graph.name(id)
                );
                graph.state_mut(id).restart_with_dependency = !self.shutting_down;
                self.enter_stopped(graph, id);
                return;
            }
            Readiness::Ready => {}
        }

        match graph.service(id).service_type() {
            ServiceType::Internal => self.enter_started(graph, id),
            ServiceType::Triggered => {
                if graph.state(id).triggered {
                    self.enter_started(graph, id);
                } else {
                    debug!("Service {} waiting for trigger", graph.name(id));
                }
            }
            ServiceType::Process | ServiceType::BgProcess | ServiceType::Scripted => {
                graph.state_mut(id).launch_in_flight = true;
                self.actions.push(Action::Launch {
                    service: id,
                    phase: LaunchPhase::Start,
                });
            }
        }
    }

    fn evaluate_started(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let regular_down = graph.dependency_edges(id).iter().any(|edge| {
            edge.dep_type == DependencyType::Regular
                && graph.state(edge.dependency).status != ServiceStatus::Started
        });
        if !graph.state(id).is_wanted() || regular_down {
            self.begin_stop(graph, id);
        }
    }

    fn evaluate_stopping(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        // Hard dependents go down first
        let blocked = graph.dependent_edges(id).iter().any(|edge| {
            let status = graph.state(edge.dependent).status;
            match edge.dep_type {
                DependencyType::Regular => !status.is_down(),
                DependencyType::Milestone => status == ServiceStatus::Starting,
                DependencyType::WaitsFor | DependencyType::After => false,
            }
        });
        if blocked {
            return;
        }

        let state = graph.state(id);
        if state.launch_in_flight {
            return;
        }
        let service = graph.service(id);
        let service_type = service.service_type();

        match state.process {
            Some(process) => {
                if state.stop_issued {
                    return;
                }
                let stop_timeout = service.config.stop_timeout;
                graph.state_mut(id).stop_issued = true;
                self.actions.push(Action::Signal {
                    service: id,
                    pid: process.pid,
                    signal: StopSignal::Term,
                });
                match service_type {
                    ServiceType::BgProcess => {
                        // Not our child: no exit event will follow
                        self.enter_stopped(graph, id);
                    }
                    _ => self.actions.push(Action::ArmKillTimer {
                        service: id,
                        pid: process.pid,
                        after: stop_timeout,
                    }),
                }
            }
            None => {
                if service_type == ServiceType::Scripted
                    && !state.stop_issued
                    && !service.config.stop_command.is_empty()
                {
                    let state = graph.state_mut(id);
                    state.stop_issued = true;
                    state.launch_in_flight = true;
                    self.actions.push(Action::Launch {
                        service: id,
                        phase: LaunchPhase::StopScript,
                    });
                } else {
                    self.enter_stopped(graph, id);
                }
            }
        }
    }

    /// Check whether the dependencies of a starting service allow it to proceed.
    fn readiness(&self, graph: &ServiceGraph, id: ServiceId) -> Readiness {
        let mut waiting = false;
        for edge in graph.dependency_edges(id) {
            let dep = edge.dependency;
            let status = graph.state(dep).status;
            match edge.dep_type {
                DependencyType::Regular | DependencyType::Milestone => match status {
                    ServiceStatus::Started => {}
                    ServiceStatus::Failed => return Readiness::Failed(dep),
                    ServiceStatus::Stopping => return Readiness::Cancelled,
                    ServiceStatus::Starting | ServiceStatus::Stopped => {
                        if edge.dep_type == DependencyType::Regular
                            || !depends_on(graph, dep, id)
                        {
                            waiting = true;
                        }
                    }
                },
                DependencyType::WaitsFor => match status {
                    ServiceStatus::Starting => {
                        if !depends_on(graph, dep, id) {
                            waiting = true;
                        }
                    }
                    ServiceStatus::Stopping => waiting = true,
                    _ => {}
                },
                DependencyType::After => {
                    if status == ServiceStatus::Starting && !depends_on(graph, dep, id) {
                        waiting = true;
                    }
                }
            }
        }
        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }

    // === Transitions ===

    fn set_status(&mut self, graph: &mut ServiceGraph, id: ServiceId, status: ServiceStatus) {
        let old = graph.state(id).status;
        if old == status {
            return;
        }
        graph.state_mut(id).status = status;
        info!("Service {}: {} -> {}", graph.name(id), old, status);

        for dep in graph.dependencies_of(id, DepFilter::Any) {
            self.enqueue(dep);
        }
        for dependent in graph.dependents_of(id, DepFilter::Any) {
            self.enqueue(dependent);
        }
        self.enqueue(id);
    }

    fn begin_start(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        for dep in graph.dependencies_of(id, DepFilter::Activating) {
            if !graph.state(id).holding.contains(&dep) {
                graph.state_mut(id).holding.push(dep);
                graph.state_mut(dep).required_by += 1;
            }
            // A dependency waiting out its restart delay is needed now
            let dep_state = graph.state_mut(dep);
            if dep_state.status == ServiceStatus::Stopped
                && (dep_state.awaiting_restart || dep_state.restart_with_dependency)
            {
                dep_state.awaiting_restart = false;
                dep_state.restart_with_dependency = false;
            }
            self.enqueue(dep);
        }

        let state = graph.state_mut(id);
        state.failure = None;
        state.pending_stop = false;
        state.stop_issued = false;
        self.set_status(graph, id, ServiceStatus::Starting);
        self.clear_restart_flags(graph, id);
    }

    fn begin_stop(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        graph.state_mut(id).pending_stop = false;
        self.set_status(graph, id, ServiceStatus::Stopping);
    }

    fn enter_started(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        self.set_status(graph, id, ServiceStatus::Started);
    }

    fn enter_stopped(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let state = graph.state_mut(id);
        state.process = None;
        state.launch_in_flight = false;
        state.stop_issued = false;
        state.pending_stop = false;
        state.triggered = false;
        if state.start_after_stop {
            state.start_after_stop = false;
            state.explicit = true;
        }
        let awaiting_restart = state.awaiting_restart;
        self.set_status(graph, id, ServiceStatus::Stopped);

        if awaiting_restart {
            let delay = graph.service(id).config.restart.delay;
            self.actions.push(Action::ScheduleRestart {
                service: id,
                after: delay,
            });
        }
    }

    fn enter_failed(&mut self, graph: &mut ServiceGraph, id: ServiceId, reason: FailureReason) {
        warn!("Service {} failed: {}", graph.name(id), reason);
        let state = graph.state_mut(id);
        state.failure = Some(reason);
        state.process = None;
        state.explicit = false;
        state.launch_in_flight = false;
        state.stop_issued = false;
        state.pending_stop = false;
        state.start_after_stop = false;
        state.awaiting_restart = false;
        state.restart_with_dependency = false;
        self.set_status(graph, id, ServiceStatus::Failed);
    }

    /// Handle the exit of a started process service that nobody asked to stop.
    fn unexpected_exit(
        &mut self,
        graph: &mut ServiceGraph,
        id: ServiceId,
        status: ExitStatus,
        now: Instant,
    ) {
        let config = graph.service(id).config.restart.clone();
        let state = graph.state_mut(id);
        let may_restart =
            !self.shutting_down && state.is_wanted() && config.should_restart_on_exit(status);
        let restart = may_restart && restart_allowed(state, &config, now);
        if restart {
            state.restart_times.push_back(now);
            state.restart_count += 1;
        }

        if may_restart && !restart {
            warn!(
                "Service {} exceeded its restart limit ({} in {:?})",
                graph.name(id),
                config.limit_count,
                config.limit_interval
            );
        }

        if restart && config.smooth_recovery {
            info!("Service {} recovering in place", graph.name(id));
            graph.state_mut(id).launch_in_flight = true;
            self.actions.push(Action::Launch {
                service: id,
                phase: LaunchPhase::Start,
            });
            return;
        }

        if restart {
            graph.state_mut(id).awaiting_restart = true;
            self.force_down(graph, id, ForceMode::RestartWithDependency);
        } else {
            self.force_down(graph, id, ForceMode::ClearExplicit);
        }
        self.begin_stop(graph, id);
    }

    /// Bring `root` down along with every active service that hard-depends on it.
    fn force_down(&mut self, graph: &mut ServiceGraph, root: ServiceId, mode: ForceMode) {
        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);

        while let Some(current) = queue.pop_front() {
            let state = graph.state_mut(current);
            match mode {
                ForceMode::ClearExplicit => {
                    state.explicit = false;
                    state.restart_with_dependency = false;
                    state.awaiting_restart = false;
                    state.start_after_stop = false;
                }
                ForceMode::RestartWithDependency => {
                    if current != root {
                        state.restart_with_dependency = true;
                    }
                }
            }
            if mode == ForceMode::ClearExplicit {
                self.release_soft_holds(graph, current);
            }
            self.enqueue(current);

            for edge in graph.dependent_edges(current).to_vec() {
                let dependent = graph.state(edge.dependent);
                let hard = match edge.dep_type {
                    DependencyType::Regular => true,
                    DependencyType::Milestone => dependent.status == ServiceStatus::Starting,
                    DependencyType::WaitsFor | DependencyType::After => false,
                };
                let involved = dependent.status.is_active()
                    || dependent.restart_with_dependency
                    || dependent.awaiting_restart;
                if hard && involved && seen.insert(edge.dependent) {
                    queue.push_back(edge.dependent);
                }
            }
        }
    }

    /// Drop the holds that waits-for dependents, and milestone dependents that have
    /// already started, have on `id`.
    fn release_soft_holds(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        for edge in graph.dependent_edges(id).to_vec() {
            let soft = match edge.dep_type {
                DependencyType::WaitsFor => true,
                DependencyType::Milestone => {
                    graph.state(edge.dependent).status == ServiceStatus::Started
                }
                DependencyType::Regular | DependencyType::After => false,
            };
            if soft && drop_hold(graph.state_mut(edge.dependent), id) {
                let state = graph.state_mut(id);
                state.required_by = state.required_by.saturating_sub(1);
                debug!(
                    "Service {} released its hold on {}",
                    graph.name(edge.dependent),
                    graph.name(id)
                );
                self.enqueue(id);
            }
        }
    }

    fn release_holds(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let holding = std::mem::take(&mut graph.state_mut(id).holding);
        for dep in holding {
            let state = graph.state_mut(dep);
            state.required_by = state.required_by.saturating_sub(1);
            self.enqueue(dep);
        }
    }

    /// `id` is starting again: bring back the dependents it took down with it.
    fn clear_restart_flags(&mut self, graph: &mut ServiceGraph, id: ServiceId) {
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for dependent in graph.dependents_of(current, DepFilter::Any) {
                let state = graph.state_mut(dependent);
                if state.restart_with_dependency {
                    state.restart_with_dependency = false;
                    self.enqueue(dependent);
                    queue.push_back(dependent);
                }
            }
        }
    }
}

fn drop_hold(state: &mut ServiceState, dep: ServiceId) -> bool {
    match state.holding.iter().position(|&held| held == dep) {
        Some(pos) => {
            state.holding.remove(pos);
            true
        }
        None => false,
    }
}

/// Whether `from` transitively depends on `to` (any edge type)
fn depends_on(graph: &ServiceGraph, from: ServiceId, to: ServiceId) -> bool {
    graph.dependency_closure(&[from]).contains(&to)
}

/// Check the restart limit, forgetting restarts that fell out of the window.
fn restart_allowed(state: &mut ServiceState, config: &RestartConfig, now: Instant) -> bool {
    if config.limit_count == 0 {
        return true;
    }
    while let Some(&oldest) = state.restart_times.front() {
        if now.saturating_duration_since(oldest) > config.limit_interval {
            state.restart_times.pop_front();
        } else {
            break;
        }
    }
    (state.restart_times.len() as u32) < config.limit_count
}
