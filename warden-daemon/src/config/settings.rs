//! Per-service settings accumulator
//!
//! The loader feeds every directive of a description into [`ServiceSettings::apply`]
//! in file order, then calls [`ServiceSettings::finish`] to validate the whole
//! record and split it into the node's [`ServiceConfig`] and the still-unresolved
//! dependency names.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::duration::parse_duration;
use super::restart::{RestartConfig, RestartPolicy};
use super::rlimits::{ResourceKind, RlimitEntry, parse_rlimit};
use super::{DependencyType, ServiceType};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Problems with a single directive, or with the record as a whole
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("service type already declared")]
    TypeRedeclared,

    #[error("unknown service type '{0}'")]
    UnknownServiceType(String),

    #[error("setting '{setting}' is not valid for {service_type} services")]
    InvalidForType {
        setting: String,
        service_type: ServiceType,
    },

    #[error("setting '{0}' requires a value")]
    MissingValue(String),

    #[error("setting '{0}' takes a single value")]
    ExpectedSingleValue(String),

    #[error("invalid value for '{setting}': {reason}")]
    InvalidValue { setting: String, reason: String },

    #[error("unknown resource limit '{0}'")]
    UnknownResource(String),

    #[error("{0} services require a 'command' setting")]
    MissingCommand(ServiceType),
}

/// A dependency by name, resolved into a graph edge by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrelimDep {
    pub name: String,
    pub dep_type: DependencyType,
    /// Declared with `before`: the edge points from the named service to this one
    pub reversed: bool,
}

impl PrelimDep {
    pub fn new(name: impl Into<String>, dep_type: DependencyType) -> Self {
        Self {
            name: name.into(),
            dep_type,
            reversed: false,
        }
    }

    /// `before = name`, i.e. `name` is ordered after this service
    pub fn before(name: impl Into<String>) -> Self {
        Self {
            reversed: true,
            ..Self::new(name, DependencyType::After)
        }
    }
}

/// A `depends-on.d`-style directory whose entries are dependency names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrelimDepDir {
    pub dir: String,
    pub dep_type: DependencyType,
}

/// Which service types accept a setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    RunsCommand,
    Process,
    BgProcess,
    Scripted,
}

impl Scope {
    fn allows(&self, service_type: ServiceType) -> bool {
        match self {
            Scope::RunsCommand => service_type.runs_command(),
            Scope::Process => service_type == ServiceType::Process,
            Scope::BgProcess => service_type == ServiceType::BgProcess,
            Scope::Scripted => service_type == ServiceType::Scripted,
        }
    }
}

/// Validated settings of a loaded service
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub service_type: ServiceType,
    /// Start command (argv), substitution already applied
    pub command: Vec<String>,
    /// Stop command for scripted services
    pub stop_command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Limits in declaration order
    pub rlimits: Vec<RlimitEntry>,
    pub restart: RestartConfig,
    /// Time allowed between SIGTERM and SIGKILL
    pub stop_timeout: Duration,
    pub pid_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_type: ServiceType::default(),
            command: Vec::new(),
            stop_command: Vec::new(),
            working_dir: None,
            rlimits: Vec::new(),
            restart: RestartConfig::default(),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            pid_file: None,
            env_file: None,
            log_file: None,
        }
    }
}

/// Mutable record built up directive by directive while a description loads
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub service_type: Option<ServiceType>,
    pub command: Vec<String>,
    pub stop_command: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub depends: Vec<PrelimDep>,
    pub dep_dirs: Vec<PrelimDepDir>,
    pub rlimits: Vec<RlimitEntry>,
    pub restart: RestartConfig,
    pub stop_timeout: Option<Duration>,
    pub pid_file: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    /// Type-restricted settings seen so far, re-checked once the type is final
    scoped: Vec<(String, Scope)>,
}

fn single_value<I>(setting: &str, values: I) -> Result<String, SettingError>
where
    I: IntoIterator<Item = String>,
{
    let mut values = values.into_iter();
    let value = values
        .next()
        .ok_or_else(|| SettingError::MissingValue(setting.to_string()))?;
    if values.next().is_some() {
        return Err(SettingError::ExpectedSingleValue(setting.to_string()));
    }
    Ok(value)
}

fn invalid(setting: &str, reason: impl Into<String>) -> SettingError {
    SettingError::InvalidValue {
        setting: setting.to_string(),
        reason: reason.into(),
    }
}

fn parse_bool(setting: &str, value: &str) -> Result<bool, SettingError> {
    match value {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(invalid(setting, format!("expected yes or no, got '{}'", other))),
    }
}

impl ServiceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one directive. `values` are the already unquoted and substituted tokens.
    pub fn apply<I>(&mut self, setting: &str, values: I) -> Result<(), SettingError>
    where
        I: IntoIterator<Item = String>,
    {
        if let Some(dep_type) = DependencyType::from_setting(setting) {
            let name = single_value(setting, values)?;
            self.depends.push(PrelimDep::new(name, dep_type));
            return Ok(());
        }

        if setting == "before" {
            let name = single_value(setting, values)?;
            self.depends.push(PrelimDep::before(name));
            return Ok(());
        }

        if let Some(base) = setting.strip_suffix(".d")
            && let Some(dep_type) = DependencyType::from_setting(base)
            && dep_type.activates()
        {
            let dir = single_value(setting, values)?;
            self.dep_dirs.push(PrelimDepDir { dir, dep_type });
            return Ok(());
        }

        if let Some(suffix) = setting.strip_prefix("rlimit-") {
            let resource = ResourceKind::from_setting_suffix(suffix)
                .ok_or_else(|| SettingError::UnknownResource(suffix.to_string()))?;
            let value = single_value(setting, values)?;
            let entry = parse_rlimit(resource, &value).map_err(|reason| invalid(setting, reason))?;
            self.check_scope(setting, Scope::RunsCommand)?;
            self.rlimits.push(entry);
            return Ok(());
        }

        match setting {
            "type" => {
                if self.service_type.is_some() {
                    return Err(SettingError::TypeRedeclared);
                }
                let value = single_value(setting, values)?;
                let service_type = ServiceType::parse(&value)
                    .ok_or(SettingError::UnknownServiceType(value))?;
                self.check_scoped_against(service_type)?;
                self.service_type = Some(service_type);
            }
            "command" | "stop-command" => {
                let scope = if setting == "command" {
                    Scope::RunsCommand
                } else {
                    Scope::Scripted
                };
                self.check_scope(setting, scope)?;
                let parts: Vec<String> = values.into_iter().collect();
                if parts.is_empty() {
                    return Err(SettingError::MissingValue(setting.to_string()));
                }
                if setting == "command" {
                    self.command.extend(parts);
                } else {
                    self.stop_command.extend(parts);
                }
            }
            "working-dir" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                self.working_dir = Some(PathBuf::from(single_value(setting, values)?));
            }
            "restart" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                let value = single_value(setting, values)?;
                self.restart.policy =
                    RestartPolicy::parse(&value).map_err(|reason| invalid(setting, reason))?;
            }
            "smooth-recovery" => {
                self.check_scope(setting, Scope::Process)?;
                let value = single_value(setting, values)?;
                self.restart.smooth_recovery = parse_bool(setting, &value)?;
            }
            "restart-delay" | "restart-limit-interval" | "stop-timeout" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                let value = single_value(setting, values)?;
                let duration = parse_duration(&value).map_err(|reason| invalid(setting, reason))?;
                match setting {
                    "restart-delay" => self.restart.delay = duration,
                    "restart-limit-interval" => self.restart.limit_interval = duration,
                    _ => self.stop_timeout = Some(duration),
                }
            }
            "restart-limit-count" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                let value = single_value(setting, values)?;
                self.restart.limit_count = value
                    .parse()
                    .map_err(|_| invalid(setting, format!("expected a count, got '{}'", value)))?;
            }
            "pid-file" => {
                self.check_scope(setting, Scope::BgProcess)?;
                self.pid_file = Some(PathBuf::from(single_value(setting, values)?));
            }
            "env-file" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                self.env_file = Some(PathBuf::from(single_value(setting, values)?));
            }
            "logfile" => {
                self.check_scope(setting, Scope::RunsCommand)?;
                self.log_file = Some(PathBuf::from(single_value(setting, values)?));
            }
            unknown => return Err(SettingError::UnknownSetting(unknown.to_string())),
        }

        Ok(())
    }

    /// Reject a type-restricted setting now if the type is known, otherwise
    /// remember it for the check in `type` / `finish`.
    fn check_scope(&mut self, setting: &str, scope: Scope) -> Result<(), SettingError> {
        if let Some(service_type) = self.service_type
            && !scope.allows(service_type)
        {
            return Err(SettingError::InvalidForType {
                setting: setting.to_string(),
                service_type,
            });
        }
        self.scoped.push((setting.to_string(), scope));
        Ok(())
    }

    fn check_scoped_against(&self, service_type: ServiceType) -> Result<(), SettingError> {
        match self.scoped.iter().find(|(_, scope)| !scope.allows(service_type)) {
            Some((setting, _)) => Err(SettingError::InvalidForType {
                setting: setting.clone(),
                service_type,
            }),
            None => Ok(()),
        }
    }

    /// The declared type, or the default when none was declared
    pub fn effective_type(&self) -> ServiceType {
        self.service_type.unwrap_or_default()
    }

    /// Validate the complete record and split off the unresolved dependencies.
    pub fn finish(self) -> Result<(ServiceConfig, Vec<PrelimDep>), SettingError> {
        let service_type = self.effective_type();
        self.check_scoped_against(service_type)?;

        if service_type.runs_command() && self.command.is_empty() {
            return Err(SettingError::MissingCommand(service_type));
        }

        let config = ServiceConfig {
            service_type,
            command: self.command,
            stop_command: self.stop_command,
            working_dir: self.working_dir,
            rlimits: self.rlimits,
            restart: self.restart,
            stop_timeout: self.stop_timeout.unwrap_or(DEFAULT_STOP_TIMEOUT),
            pid_file: self.pid_file,
            env_file: self.env_file,
            log_file: self.log_file,
        };
        Ok((config, self.depends))
    }
}
