//! Building and spawning service commands

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{LaunchError, LaunchSpec, ProcessExitEvent};
use crate::graph::ServiceId;
use crate::state::ExitStatus;

/// Cached result of the warden-exec lookup
static WARDEN_EXEC_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Locate the `warden-exec` binary next to the current executable.
/// Checks as a sibling first, then in the parent directory (handles the
/// `target/debug/deps/` layout during `cargo test`).
pub fn find_warden_exec() -> Option<PathBuf> {
    WARDEN_EXEC_PATH
        .get_or_init(|| {
            let exe = std::env::current_exe().ok()?;

            let sibling = exe.with_file_name("warden-exec");
            if sibling.is_file() && verify_binary_permissions(&sibling) {
                debug!("Found warden-exec at {:?}", sibling);
                return Some(sibling);
            }

            let parent = exe.parent()?.parent()?.join("warden-exec");
            if parent.is_file() && verify_binary_permissions(&parent) {
                debug!("Found warden-exec at {:?}", parent);
                return Some(parent);
            }

            None
        })
        .clone()
}

/// The wrapper must be a regular file owned by root or by us, and not writable
/// by group or others.
fn verify_binary_permissions(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let meta = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => {
            warn!("Cannot stat warden-exec at {:?}: {}", path, e);
            return false;
        }
    };

    if meta.file_type().is_symlink() {
        warn!("Rejecting warden-exec at {:?}: is a symlink", path);
        return false;
    }

    let file_uid = meta.uid();
    let my_euid = nix::unistd::geteuid().as_raw();
    if file_uid != 0 && file_uid != my_euid {
        warn!(
            "Rejecting warden-exec at {:?}: owned by uid {} (expected root or uid {})",
            path, file_uid, my_euid
        );
        return false;
    }

    let mode = meta.mode();
    if mode & 0o022 != 0 {
        warn!(
            "Rejecting warden-exec at {:?}: writable by group or others (mode {:o})",
            path, mode
        );
        return false;
    }

    true
}

/// Arguments for `warden-exec`: one `--rlimit` per entry, then the command
pub(crate) fn wrapper_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args = Vec::with_capacity(spec.rlimits.len() * 2 + spec.program_and_args.len() + 1);
    for entry in &spec.rlimits {
        args.push("--rlimit".to_string());
        args.push(entry.to_wrapper_arg());
    }
    args.push("--".to_string());
    args.extend(spec.program_and_args.iter().cloned());
    args
}

/// Build a `Command` from a `LaunchSpec`: wrapper, working directory,
/// environment and output redirection.
pub(crate) fn build_command(spec: &LaunchSpec) -> Result<Command, LaunchError> {
    let Some(program) = spec.program_and_args.first() else {
        return Err(LaunchError::EmptyCommand);
    };

    let mut cmd = if spec.needs_wrapper() {
        let exec_path = find_warden_exec().ok_or(LaunchError::WrapperNotFound)?;
        let args = wrapper_args(spec);
        debug!("Spawning via warden-exec: {:?} {:?}", exec_path, args);
        let mut cmd = Command::new(exec_path);
        cmd.args(args);
        cmd
    } else {
        let args = &spec.program_and_args[1..];
        debug!("Spawning command: {} {:?}", program, args);
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd
    };

    if !spec.working_dir.is_dir() {
        return Err(LaunchError::WorkingDirMissing(spec.working_dir.clone()));
    }

    let (stdout, stderr) = match &spec.log_file {
        Some(path) => open_log_file(path)?,
        None => (Stdio::null(), Stdio::null()),
    };

    cmd.current_dir(&spec.working_dir)
        .env_clear()
        .envs(&spec.environment)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        // Own process group: a terminal ^C reaches the daemon only
        .process_group(0);

    Ok(cmd)
}

fn open_log_file(path: &Path) -> Result<(Stdio, Stdio), LaunchError> {
    let to_err = |source| LaunchError::LogFile {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_err)?;
    let stderr = file.try_clone().map_err(to_err)?;
    Ok((Stdio::from(file), Stdio::from(stderr)))
}

/// Wait for a child and report its exit
pub(crate) async fn monitor_process(
    service: ServiceId,
    service_name: String,
    pid: u32,
    mut child: Child,
    exit_tx: mpsc::Sender<ProcessExitEvent>,
) {
    let status = match child.wait().await {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            warn!("Error waiting for service {} (pid {}): {}", service_name, pid, e);
            ExitStatus::Code(-1)
        }
    };
    debug!("Service {} process {} {}", service_name, pid, status);

    let event = ProcessExitEvent {
        service,
        pid,
        status,
    };
    match exit_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!(
                "Exit event channel full for service {}, applying backpressure",
                service_name
            );
            if exit_tx.send(event).await.is_err() {
                debug!("Exit event channel closed for service {}", service_name);
            }
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("Exit event channel closed for service {}", service_name);
        }
    }
}
