//! Launch specification for a service command

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::RlimitEntry;
use crate::env::build_service_env;
use crate::errors::Result;
use crate::graph::{Service, ServiceId};
use crate::lifecycle::LaunchPhase;

/// Everything the launcher needs to start one command of a service
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub service: ServiceId,
    pub service_name: String,
    pub phase: LaunchPhase,
    /// Program and arguments (e.g., ["/usr/sbin/sshd", "-D"])
    pub program_and_args: Vec<String>,
    pub working_dir: PathBuf,
    pub environment: HashMap<String, String>,
    /// Applied in order by `warden-exec`
    pub rlimits: Vec<RlimitEntry>,
    /// Append stdout and stderr here; discarded when unset
    pub log_file: Option<PathBuf>,
}

impl LaunchSpec {
    /// Build the launch of `phase` for a loaded service.
    ///
    /// A relative `working-dir` is resolved against `base_dir`; a relative
    /// `env-file` or `logfile` against the resulting working directory.
    pub fn for_service(
        id: ServiceId,
        service: &Service,
        phase: LaunchPhase,
        base_dir: &Path,
    ) -> Result<Self> {
        let config = &service.config;
        let program_and_args = match phase {
            LaunchPhase::Start => config.command.clone(),
            LaunchPhase::StopScript => config.stop_command.clone(),
        };
        let working_dir = match &config.working_dir {
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        };
        let environment = build_service_env(config.env_file.as_deref(), &working_dir)?;
        let log_file = config.log_file.as_ref().map(|path| working_dir.join(path));

        Ok(Self {
            service: id,
            service_name: service.name.clone(),
            phase,
            program_and_args,
            working_dir,
            environment,
            rlimits: config.rlimits.clone(),
            log_file,
        })
    }

    /// Resource limits can only be applied by the exec wrapper
    pub fn needs_wrapper(&self) -> bool {
        !self.rlimits.is_empty()
    }
}
