//! Supervisor actor
//!
//! A single tokio task owns the service graph, the loader, the lifecycle state
//! machine and the process launcher. Everything else talks to it through a
//! [`SupervisorHandle`].
//!
//! ## Module Structure
//!
//! - `actor` - SupervisorActor (event loop, performs state machine actions)
//! - `handle` - SupervisorHandle (cheap-to-clone interface for sending commands)
//! - `command` - SupervisorCommand and TimerEvent

mod actor;
mod command;
mod handle;

pub use actor::SupervisorActor;
pub use command::{SupervisorCommand, TimerEvent};
pub use handle::SupervisorHandle;

use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::env::EnvLookup;
use crate::loader::ServiceLoader;
use crate::process::{EXIT_CHANNEL_CAPACITY, TokioLauncher};
use crate::source::ServiceSource;

/// Spawn a supervisor that launches real processes.
///
/// Relative working directories of services are resolved against `base_dir`.
pub fn create_supervisor<S, E>(
    loader: ServiceLoader<S, E>,
    base_dir: PathBuf,
) -> (SupervisorHandle, JoinHandle<()>)
where
    S: ServiceSource + Send + 'static,
    E: EnvLookup + Send + 'static,
{
    let (exit_tx, exit_rx) = mpsc::channel(EXIT_CHANNEL_CAPACITY);
    let launcher = TokioLauncher::new(exit_tx);
    let (handle, actor) = SupervisorActor::create(loader, launcher, exit_rx, base_dir);
    let task = tokio::spawn(actor.run());
    (handle, task)
}
