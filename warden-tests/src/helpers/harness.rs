//! Test harness that runs a supervisor actor without real processes

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use warden_daemon::errors::Result;
use warden_daemon::loader::ServiceLoader;
use warden_daemon::process::EXIT_CHANNEL_CAPACITY;
use warden_daemon::source::{DirServiceSource, MemoryServiceSource, ServiceSource};
use warden_daemon::state::{ExitStatus, ServiceInfo, ServiceStatus};
use warden_daemon::supervisor::{SupervisorActor, SupervisorHandle};

use super::fake_launcher::FakeLauncher;

/// Environment used for `$VAR` substitution in test descriptions
pub fn test_env() -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("ONEVAR".to_string(), "a".to_string());
    vars.insert("TWOVAR".to_string(), "hellohello".to_string());
    vars
}

/// Directory holding the description files shipped with this crate
pub fn test_services_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("test-services")
}

/// Supervisor running on its own task, launching through a [`FakeLauncher`]
pub struct TestSupervisorHarness {
    pub handle: SupervisorHandle,
    pub launcher: FakeLauncher,
    task: JoinHandle<()>,
}

impl TestSupervisorHarness {
    pub fn new<S>(source: S, base_dir: &Path) -> Self
    where
        S: ServiceSource + Send + 'static,
    {
        let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
        let launcher = FakeLauncher::new(exit_tx);
        let loader = ServiceLoader::new(source, test_env());
        let (handle, actor) =
            SupervisorActor::create(loader, launcher.clone(), exit_rx, base_dir.to_path_buf());
        let task = tokio::spawn(actor.run());
        Self {
            handle,
            launcher,
            task,
        }
    }

    /// Harness over in-memory descriptions
    pub fn from_memory(source: MemoryServiceSource, base_dir: &Path) -> Self {
        Self::new(source, base_dir)
    }

    /// Harness over description files in `dirs`
    pub fn from_dirs(dirs: Vec<PathBuf>, base_dir: &Path) -> Self {
        Self::new(DirServiceSource::new(dirs), base_dir)
    }

    pub async fn start(&self, name: &str) -> Result<()> {
        self.handle.start(name).await
    }

    pub async fn stop(&self, name: &str) -> Result<()> {
        self.handle.stop(name).await
    }

    pub async fn status(&self, name: &str) -> Result<ServiceStatus> {
        Ok(self.handle.status(name).await?.status)
    }

    pub async fn info(&self, name: &str) -> Result<ServiceInfo> {
        self.handle.status(name).await
    }

    /// Report that the live process of `name` exited
    pub async fn exit(&self, name: &str, status: ExitStatus) {
        assert!(
            self.launcher.exit(name, status).await,
            "service {} has no live process",
            name
        );
    }

    /// Stop every service and wait for the supervisor task to finish
    pub async fn shutdown(self) {
        self.handle.shutdown().await.unwrap();
        self.task.await.unwrap();
    }
}
