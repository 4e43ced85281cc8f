//! Supervision of real processes spawned through /bin/sh

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use warden_daemon::loader::ServiceLoader;
use warden_daemon::source::DirServiceSource;
use warden_daemon::state::{ExitStatus, FailureReason, ServiceStatus};
use warden_daemon::supervisor::{SupervisorHandle, create_supervisor};
use warden_tests::helpers::harness::test_env;
use warden_tests::wait_for_status;

const TIMEOUT: Duration = Duration::from_secs(10);
const SIGTERM: i32 = 15;

fn write_service(dir: &Path, name: &str, text: &str) {
    fs::write(dir.join(name), text).unwrap();
}

/// Supervisor over `dir`, running commands with `dir` as base directory
fn supervisor(dir: &Path) -> (SupervisorHandle, JoinHandle<()>) {
    let loader = ServiceLoader::new(DirServiceSource::new(vec![dir.to_path_buf()]), test_env());
    create_supervisor(loader, dir.to_path_buf())
}

async fn wait_for_file(path: &Path, timeout: Duration) -> Option<String> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Ok(content) = fs::read_to_string(path)
            && !content.is_empty()
        {
            return Some(content);
        }
        sleep(Duration::from_millis(50)).await;
    }
    None
}

#[tokio::test]
async fn test_process_runs_until_stopped() {
    let dir = TempDir::new().unwrap();
    write_service(dir.path(), "sleeper", "type = process\ncommand = /bin/sleep 30\n");
    let (handle, task) = supervisor(dir.path());

    handle.start("sleeper").await.unwrap();
    let info = handle.status("sleeper").await.unwrap();
    assert_eq!(info.status, ServiceStatus::Started);
    assert!(info.pid.is_some());
    assert!(info.started_at.is_some());

    handle.stop("sleeper").await.unwrap();
    wait_for_status(&handle, "sleeper", ServiceStatus::Stopped, TIMEOUT)
        .await
        .unwrap();
    let info = handle.status("sleeper").await.unwrap();
    assert_eq!(info.last_exit, Some(ExitStatus::Signal(SIGTERM)));
    assert_eq!(info.pid, None);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_scripted_output_goes_to_logfile() {
    let dir = TempDir::new().unwrap();
    write_service(
        dir.path(),
        "hello",
        "type = scripted\ncommand = /bin/sh -c \"echo hello from $ONEVAR\"\nlogfile = hello.log\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("hello").await.unwrap();
    wait_for_status(&handle, "hello", ServiceStatus::Started, TIMEOUT)
        .await
        .unwrap();
    let log = fs::read_to_string(dir.path().join("hello.log")).unwrap();
    assert_eq!(log, "hello from a\n");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_env_file_and_working_dir() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join("work")).unwrap();
    fs::write(dir.path().join("work").join("greeting.env"), "GREETING=hi there\n").unwrap();
    write_service(
        dir.path(),
        "greeter",
        "type = scripted\nworking-dir = work\nenv-file = greeting.env\n\
         command = /bin/sh -c \"echo $$GREETING > greeting.txt\"\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("greeter").await.unwrap();
    wait_for_status(&handle, "greeter", ServiceStatus::Started, TIMEOUT)
        .await
        .unwrap();
    let greeting = fs::read_to_string(dir.path().join("work").join("greeting.txt")).unwrap();
    assert_eq!(greeting, "hi there\n");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_missing_env_file_fails_launch() {
    let dir = TempDir::new().unwrap();
    write_service(
        dir.path(),
        "broken",
        "type = process\nenv-file = nowhere.env\ncommand = /bin/sleep 30\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("broken").await.unwrap();
    let info = handle.status("broken").await.unwrap();
    assert_eq!(info.status, ServiceStatus::Failed);
    assert!(matches!(info.failure, Some(FailureReason::LaunchFailed(_))));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_crashing_process_is_restarted() {
    let dir = TempDir::new().unwrap();
    write_service(
        dir.path(),
        "crashy",
        "type = process\ncommand = /bin/sh -c \"echo run >> runs.txt; exit 1\"\n\
         restart = on-failure\nrestart-delay = 50ms\nrestart-limit-count = 2\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("crashy").await.unwrap();

    // One start plus two restarts, then the limit is reached
    let runs = dir.path().join("runs.txt");
    let start = Instant::now();
    while start.elapsed() < TIMEOUT {
        let count = fs::read_to_string(&runs).map(|s| s.lines().count()).unwrap_or(0);
        let status = handle.status("crashy").await.unwrap().status;
        if count == 3 && status == ServiceStatus::Stopped {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    sleep(Duration::from_millis(300)).await;
    assert_eq!(fs::read_to_string(&runs).unwrap().lines().count(), 3);
    let info = handle.status("crashy").await.unwrap();
    assert_eq!(info.status, ServiceStatus::Stopped);
    assert_eq!(info.restart_count, 2);
    assert_eq!(info.last_exit, Some(ExitStatus::Code(1)));

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_bgprocess_tracks_pid_file() {
    let dir = TempDir::new().unwrap();
    write_service(
        dir.path(),
        "forker",
        "type = bgprocess\npid-file = forker.pid\n\
         command = /bin/sh -c \"sleep 30 > /dev/null 2>&1 & echo $$! > forker.pid\"\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("forker").await.unwrap();
    wait_for_status(&handle, "forker", ServiceStatus::Started, TIMEOUT)
        .await
        .unwrap();
    let recorded = wait_for_file(&dir.path().join("forker.pid"), TIMEOUT)
        .await
        .unwrap();
    let pid: u32 = recorded.trim().parse().unwrap();
    assert_eq!(handle.status("forker").await.unwrap().pid, Some(pid));

    handle.stop("forker").await.unwrap();
    wait_for_status(&handle, "forker", ServiceStatus::Stopped, TIMEOUT)
        .await
        .unwrap();

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_terminates_dependency_chain() {
    let dir = TempDir::new().unwrap();
    write_service(dir.path(), "db", "type = process\ncommand = /bin/sleep 30\n");
    write_service(
        dir.path(),
        "web",
        "type = process\ncommand = /bin/sleep 30\ndepends-on = db\n",
    );
    let (handle, task) = supervisor(dir.path());

    handle.start("web").await.unwrap();
    assert_eq!(
        handle.status("db").await.unwrap().status,
        ServiceStatus::Started
    );

    handle.shutdown().await.unwrap();
    tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap();
}
