//! Service description configuration
//!
//! This module provides:
//! - `lexer` - splitting description lines into settings and value tokens
//! - `ServiceSettings` - the per-service accumulator the loader drives line by line
//! - `ServiceConfig` - the validated, immutable settings stored on a graph node
//! - Resource limit, restart and duration value types

mod duration;
pub mod lexer;
mod restart;
mod rlimits;
mod settings;

pub use duration::parse_duration;
pub use lexer::{Directive, LexError, Line, LogicalLine, ValueCursor, logical_lines, split_line};
pub use restart::{RestartConfig, RestartPolicy};
pub use rlimits::{LimitValue, ResourceKind, RlimitEntry, parse_rlimit};
pub use settings::{PrelimDep, PrelimDepDir, ServiceConfig, ServiceSettings, SettingError};

use std::fmt;

/// Kind of service, declared with `type = ...`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceType {
    /// A long-running process supervised directly
    #[default]
    Process,
    /// A command that forks a daemon into the background and exits
    BgProcess,
    /// Start (and optionally stop) commands that run to completion
    Scripted,
    /// No process; started once its dependencies are satisfied
    Internal,
    /// No process; started once its dependencies are satisfied and it is triggered
    Triggered,
}

impl ServiceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(ServiceType::Process),
            "bgprocess" => Some(ServiceType::BgProcess),
            "scripted" => Some(ServiceType::Scripted),
            "internal" => Some(ServiceType::Internal),
            "triggered" => Some(ServiceType::Triggered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Process => "process",
            ServiceType::BgProcess => "bgprocess",
            ServiceType::Scripted => "scripted",
            ServiceType::Internal => "internal",
            ServiceType::Triggered => "triggered",
        }
    }

    /// Whether this type runs a command (and so needs `command`)
    pub fn runs_command(&self) -> bool {
        matches!(
            self,
            ServiceType::Process | ServiceType::BgProcess | ServiceType::Scripted
        )
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of dependency edge between two services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// `depends-on`: the dependency must be started, and its stop forces the dependent down
    Regular,
    /// `waits-for`: the dependent waits for a start attempt, successful or not
    WaitsFor,
    /// `depends-ms`: required to start once; inert after the dependent has started
    Milestone,
    /// `after` (or `before` on the other side): ordering only, never activates the
    /// dependency
    After,
}

impl DependencyType {
    pub const ALL: [DependencyType; 4] = [
        DependencyType::Regular,
        DependencyType::WaitsFor,
        DependencyType::Milestone,
        DependencyType::After,
    ];

    /// The directive that declares this dependency type
    pub fn setting_name(&self) -> &'static str {
        match self {
            DependencyType::Regular => "depends-on",
            DependencyType::WaitsFor => "waits-for",
            DependencyType::Milestone => "depends-ms",
            DependencyType::After => "after",
        }
    }

    pub fn from_setting(setting: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.setting_name() == setting)
    }

    /// Whether a failure of the dependency fails a dependent that is still starting
    pub fn requires_success(&self) -> bool {
        matches!(self, DependencyType::Regular | DependencyType::Milestone)
    }

    /// Whether an active dependent holds the dependency up
    pub fn activates(&self) -> bool {
        *self != DependencyType::After
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.setting_name())
    }
}

#[cfg(test)]
mod tests;
