use std::collections::HashMap;
use std::path::Path;

use crate::errors::{DaemonError, Result};

/// Source of variable values for `$NAME` substitution in service descriptions.
///
/// The loader never reads the process environment directly; it is handed one of
/// these so tests can substitute from a fixed map.
pub trait EnvLookup {
    fn lookup(&self, name: &str) -> Option<String>;
}

/// Looks variables up in the daemon's own environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn lookup(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

impl<T: EnvLookup + ?Sized> EnvLookup for &T {
    fn lookup(&self, name: &str) -> Option<String> {
        (**self).lookup(name)
    }
}

/// Load environment variables from a .env file
pub fn load_env_file(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Err(DaemonError::EnvFileNotFound(path.to_path_buf()));
    }

    let mut env = HashMap::new();

    for item in dotenvy::from_path_iter(path).map_err(|e| DaemonError::EnvFileParse {
        path: path.to_path_buf(),
        source: e,
    })? {
        let (key, value) = item.map_err(|e| DaemonError::EnvFileParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        env.insert(key, value);
    }

    Ok(env)
}

/// Build the environment for a service process.
///
/// Priority (highest to lowest):
/// 1. Variables from the service's `env-file`
/// 2. The daemon's own environment
///
/// A relative `env-file` path is resolved against `base_dir`.
pub fn build_service_env(
    env_file: Option<&Path>,
    base_dir: &Path,
) -> Result<HashMap<String, String>> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    if let Some(env_file) = env_file {
        let resolved = if env_file.is_relative() {
            base_dir.join(env_file)
        } else {
            env_file.to_path_buf()
        };
        env.extend(load_env_file(&resolved)?);
    }

    Ok(env)
}
