use std::fmt;
use std::time::Duration;

use crate::graph::ServiceId;

/// Which command of a service a launch is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaunchPhase {
    /// `command`
    Start,
    /// `stop-command` (scripted services)
    StopScript,
}

/// Signals the state machine sends to service processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopSignal {
    Term,
    Kill,
}

impl StopSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopSignal::Term => "SIGTERM",
            StopSignal::Kill => "SIGKILL",
        }
    }
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An effect requested by the state machine, performed by the supervisor.
///
/// The outcome comes back as an event: `Launch` as `launch_succeeded` /
/// `launch_failed` (and later `process_exited`), timers as `restart_timer_fired` /
/// `kill_timer_fired`, `ReadPidFile` as `pid_file_read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Launch {
        service: ServiceId,
        phase: LaunchPhase,
    },
    Signal {
        service: ServiceId,
        pid: u32,
        signal: StopSignal,
    },
    ArmKillTimer {
        service: ServiceId,
        pid: u32,
        after: Duration,
    },
    ScheduleRestart {
        service: ServiceId,
        after: Duration,
    },
    ReadPidFile {
        service: ServiceId,
    },
}

impl Action {
    pub fn service(&self) -> ServiceId {
        match self {
            Action::Launch { service, .. }
            | Action::Signal { service, .. }
            | Action::ArmKillTimer { service, .. }
            | Action::ScheduleRestart { service, .. }
            | Action::ReadPidFile { service } => *service,
        }
    }
}
