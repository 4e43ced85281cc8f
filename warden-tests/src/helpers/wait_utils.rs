//! Async utilities to wait for state transitions

use std::time::Duration;

use tokio::time::{Instant, sleep};
use warden_daemon::errors::DaemonError;
use warden_daemon::state::ServiceStatus;
use warden_daemon::supervisor::SupervisorHandle;

use super::fake_launcher::FakeLauncher;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Error type for wait operations
#[derive(Debug)]
pub enum WaitError {
    Timeout,
    ServiceNotFound,
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => write!(f, "Wait operation timed out"),
            WaitError::ServiceNotFound => write!(f, "Service not found"),
        }
    }
}

impl std::error::Error for WaitError {}

/// Wait for a service to reach a specific status
pub async fn wait_for_status(
    handle: &SupervisorHandle,
    service_name: &str,
    expected_status: ServiceStatus,
    timeout: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        match handle.status(service_name).await {
            Ok(info) if info.status == expected_status => return Ok(()),
            Ok(_) => {}
            Err(DaemonError::ServiceNotFound(_)) => return Err(WaitError::ServiceNotFound),
            Err(_) => return Err(WaitError::Timeout),
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(WaitError::Timeout)
}

/// Wait until `service_name` has been launched at least `count` times
pub async fn wait_for_launches(
    launcher: &FakeLauncher,
    service_name: &str,
    count: usize,
    timeout: Duration,
) -> Result<(), WaitError> {
    let start = Instant::now();

    while start.elapsed() < timeout {
        if launcher.launch_count(service_name) >= count {
            return Ok(());
        }
        sleep(POLL_INTERVAL).await;
    }

    Err(WaitError::Timeout)
}
