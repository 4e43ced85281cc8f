use super::spawn::{build_command, wrapper_args};
use super::*;
use crate::config::{LimitValue, ResourceKind, RlimitEntry, ServiceConfig, ServiceType};
use crate::graph::ServiceGraph;
use crate::lifecycle::LaunchPhase;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;

fn spec(program_and_args: &[&str], working_dir: &Path) -> LaunchSpec {
    let mut graph = ServiceGraph::new();
    let id = graph.insert("svc", ServiceConfig::default()).unwrap();
    LaunchSpec {
        service: id,
        service_name: "svc".to_string(),
        phase: LaunchPhase::Start,
        program_and_args: program_and_args.iter().map(|s| s.to_string()).collect(),
        working_dir: working_dir.to_path_buf(),
        environment: HashMap::from([("PATH".to_string(), "/usr/bin:/bin".to_string())]),
        rlimits: Vec::new(),
        log_file: None,
    }
}

async fn next_exit(rx: &mut mpsc::Receiver<ProcessExitEvent>) -> ProcessExitEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for exit event")
        .expect("exit channel closed")
}

#[test]
fn test_build_command_plain() {
    let dir = tempfile::tempdir().unwrap();
    let spec = spec(&["/bin/echo", "hello", "world"], dir.path());

    let cmd = build_command(&spec).unwrap();
    let std_cmd = cmd.as_std();
    assert_eq!(std_cmd.get_program(), OsStr::new("/bin/echo"));
    let args: Vec<&OsStr> = std_cmd.get_args().collect();
    assert_eq!(args, vec![OsStr::new("hello"), OsStr::new("world")]);
    assert_eq!(std_cmd.get_current_dir(), Some(dir.path()));
}

#[test]
fn test_build_command_empty() {
    let dir = tempfile::tempdir().unwrap();
    let spec = spec(&[], dir.path());
    assert!(matches!(build_command(&spec), Err(LaunchError::EmptyCommand)));
}

#[test]
fn test_build_command_missing_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let spec = spec(&["/bin/true"], &dir.path().join("nope"));
    assert!(matches!(
        build_command(&spec),
        Err(LaunchError::WorkingDirMissing(_))
    ));
}

#[test]
fn test_wrapper_args() {
    let dir = tempfile::tempdir().unwrap();
    let mut spec = spec(&["/usr/sbin/server", "-f"], dir.path());
    assert!(!spec.needs_wrapper());
    spec.rlimits = vec![
        RlimitEntry {
            resource: ResourceKind::NoFile,
            soft: Some(LimitValue::Value(50)),
            hard: Some(LimitValue::Value(100)),
        },
        RlimitEntry {
            resource: ResourceKind::Core,
            soft: Some(LimitValue::Unlimited),
            hard: None,
        },
    ];
    assert!(spec.needs_wrapper());

    assert_eq!(
        wrapper_args(&spec),
        vec![
            "--rlimit",
            "nofile=50:100",
            "--rlimit",
            "core=-:",
            "--",
            "/usr/sbin/server",
            "-f"
        ]
    );
}

#[test]
fn test_spec_for_service() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("work")).unwrap();
    std::fs::write(dir.path().join("work/svc.env"), "WARDEN_SPEC_TEST=yes\n").unwrap();

    let mut graph = ServiceGraph::new();
    let config = ServiceConfig {
        service_type: ServiceType::Scripted,
        command: vec!["/bin/mount".to_string()],
        stop_command: vec!["/bin/umount".to_string(), "-a".to_string()],
        working_dir: Some("work".into()),
        env_file: Some("svc.env".into()),
        log_file: Some("out.log".into()),
        ..Default::default()
    };
    let id = graph.insert("mounts", config).unwrap();

    let start = LaunchSpec::for_service(id, graph.service(id), LaunchPhase::Start, dir.path())
        .unwrap();
    assert_eq!(start.program_and_args, vec!["/bin/mount"]);
    assert_eq!(start.working_dir, dir.path().join("work"));
    assert_eq!(start.log_file, Some(dir.path().join("work/out.log")));
    assert_eq!(
        start.environment.get("WARDEN_SPEC_TEST").map(String::as_str),
        Some("yes")
    );

    let stop =
        LaunchSpec::for_service(id, graph.service(id), LaunchPhase::StopScript, dir.path())
            .unwrap();
    assert_eq!(stop.program_and_args, vec!["/bin/umount", "-a"]);
    assert_eq!(stop.phase, LaunchPhase::StopScript);
}

#[tokio::test]
async fn test_launch_reports_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
    let mut launcher = TokioLauncher::new(tx);

    let spec = spec(&["/bin/sh", "-c", "exit 3"], dir.path());
    let handle = launcher.launch(&spec).unwrap();

    let event = next_exit(&mut rx).await;
    assert_eq!(event.pid, handle.pid);
    assert_eq!(event.service, spec.service);
    assert_eq!(event.status, ExitStatus::Code(3));
}

#[tokio::test]
async fn test_launch_appends_to_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("svc.log");
    std::fs::write(&log, "earlier\n").unwrap();

    let (tx, mut rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
    let mut launcher = TokioLauncher::new(tx);
    let mut spec = spec(&["/bin/sh", "-c", "echo out; echo err >&2"], dir.path());
    spec.log_file = Some(log.clone());

    launcher.launch(&spec).unwrap();
    assert!(next_exit(&mut rx).await.status.success());

    let contents = std::fs::read_to_string(&log).unwrap();
    assert!(contents.starts_with("earlier\n"));
    assert!(contents.contains("out\n"));
    assert!(contents.contains("err\n"));
}

#[tokio::test]
async fn test_signal_terminates_process() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
    let mut launcher = TokioLauncher::new(tx);

    let handle = launcher
        .launch(&spec(&["/bin/sleep", "30"], dir.path()))
        .unwrap();
    launcher.signal(handle.pid, StopSignal::Term).unwrap();

    let event = next_exit(&mut rx).await;
    assert_eq!(event.status, ExitStatus::Signal(Signal::SIGTERM as i32));
}

#[tokio::test]
async fn test_launch_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, _rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
    let mut launcher = TokioLauncher::new(tx);

    let err = launcher
        .launch(&spec(&["/nonexistent/warden-test-binary"], dir.path()))
        .unwrap_err();
    assert!(matches!(err, LaunchError::Spawn { ref program, .. } if program == "/nonexistent/warden-test-binary"));
}

#[test]
fn test_read_pid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("daemon.pid");

    assert_eq!(read_pid_file(&path), None);
    std::fs::write(&path, "4242\n").unwrap();
    assert_eq!(read_pid_file(&path), Some(4242));
    std::fs::write(&path, "not a pid").unwrap();
    assert_eq!(read_pid_file(&path), None);
    std::fs::write(&path, "0").unwrap();
    assert_eq!(read_pid_file(&path), None);
}
