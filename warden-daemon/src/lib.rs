use std::path::PathBuf;

pub mod config;
pub mod env;
pub mod errors;
pub mod graph;
pub mod lifecycle;
pub mod loader;
pub mod process;
pub mod source;
pub mod state;
pub mod supervisor;

const SERVICE_DIR_NAME: &str = "warden.d";
const SYSTEM_SERVICE_DIR: &str = "/etc/warden.d";

/// Service directories searched when none are given: the user's, then the system's
pub fn default_service_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::with_capacity(2);
    if let Some(config_dir) = dirs::config_dir() {
        dirs.push(config_dir.join(SERVICE_DIR_NAME));
    }
    dirs.push(PathBuf::from(SYSTEM_SERVICE_DIR));
    dirs
}
