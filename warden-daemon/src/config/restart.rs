//! Restart policy and automatic-restart tuning

use std::time::Duration;

use crate::state::ExitStatus;

/// Restart policy for services (bitfield).
///
/// Keywords: `no`/`false`, `on-failure`, `on-success`, `yes`/`true`/`always` (all flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartPolicy(u8);

impl RestartPolicy {
    pub const ON_FAILURE: u8 = 1;
    pub const ON_SUCCESS: u8 = 1 << 1;

    pub fn no() -> Self { Self(0) }
    pub fn on_failure() -> Self { Self(Self::ON_FAILURE) }
    pub fn on_success() -> Self { Self(Self::ON_SUCCESS) }
    pub fn always() -> Self { Self(Self::ON_FAILURE | Self::ON_SUCCESS) }

    pub fn contains(&self, flag: u8) -> bool { self.0 & flag != 0 }
    pub fn is_no(&self) -> bool { self.0 == 0 }

    /// Whether an unexpected exit with this status should be followed by a restart.
    /// Death by signal counts as failure.
    pub fn should_restart_on_exit(&self, status: ExitStatus) -> bool {
        if status.success() {
            self.contains(Self::ON_SUCCESS)
        } else {
            self.contains(Self::ON_FAILURE)
        }
    }

    /// Parse a restart policy keyword
    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "no" | "false" => Ok(Self::no()),
            "on-failure" => Ok(Self::on_failure()),
            "on-success" => Ok(Self::on_success()),
            "yes" | "true" | "always" => Ok(Self::always()),
            unknown => Err(format!(
                "unknown restart policy `{}`. Valid values: yes, no, on-failure, on-success",
                unknown
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.0 {
            0 => "no",
            Self::ON_FAILURE => "on-failure",
            Self::ON_SUCCESS => "on-success",
            _ => "yes",
        }
    }
}

/// Everything that governs automatic restarts of one service
#[derive(Debug, Clone, PartialEq)]
pub struct RestartConfig {
    pub policy: RestartPolicy,
    /// Relaunch in place without stopping dependents (process services only)
    pub smooth_recovery: bool,
    /// Pause between an unexpected exit and the restart
    pub delay: Duration,
    /// Window in which automatic restarts are counted
    pub limit_interval: Duration,
    /// Maximum automatic restarts within `limit_interval`; 0 means no limit
    pub limit_count: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            policy: RestartPolicy::no(),
            smooth_recovery: false,
            delay: Duration::from_millis(200),
            limit_interval: Duration::from_secs(10),
            limit_count: 3,
        }
    }
}

impl RestartConfig {
    pub fn should_restart_on_exit(&self, status: ExitStatus) -> bool {
        self.policy.should_restart_on_exit(status)
    }
}
