//! Where service descriptions come from
//!
//! The loader only needs description text by name, plus the entries of
//! `depends-on.d`-style directories. [`DirServiceSource`] reads both from the
//! filesystem; [`MemoryServiceSource`] serves them from memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::{DaemonError, Result};

pub trait ServiceSource {
    /// Description text for `name`, or `None` if there is no such service
    fn read_description(&self, name: &str) -> Result<Option<String>>;

    /// Service names listed in a dependency directory of `service`
    fn list_dependency_dir(&self, service: &str, dir: &str) -> Result<Vec<String>>;
}

impl<T: ServiceSource + ?Sized> ServiceSource for Box<T> {
    fn read_description(&self, name: &str) -> Result<Option<String>> {
        (**self).read_description(name)
    }

    fn list_dependency_dir(&self, service: &str, dir: &str) -> Result<Vec<String>> {
        (**self).list_dependency_dir(service, dir)
    }
}

/// Service names are plain file names
fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains('/') && !name.contains('\0')
}

/// Reads descriptions from files named after the service.
///
/// Directories are searched in order and the first match wins.
#[derive(Debug, Clone)]
pub struct DirServiceSource {
    dirs: Vec<PathBuf>,
}

impl DirServiceSource {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Path of the description file for `name`, if any directory has one
    fn find(&self, name: &str) -> Option<PathBuf> {
        if !is_valid_name(name) {
            return None;
        }
        self.dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }
}

impl ServiceSource for DirServiceSource {
    fn read_description(&self, name: &str) -> Result<Option<String>> {
        let Some(path) = self.find(name) else {
            return Ok(None);
        };
        debug!("Reading service description {}", path.display());
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| DaemonError::SourceRead { path, source })
    }

    fn list_dependency_dir(&self, service: &str, dir: &str) -> Result<Vec<String>> {
        let base = self
            .find(service)
            .and_then(|path| path.parent().map(Path::to_path_buf))
            .ok_or_else(|| DaemonError::ServiceNotFound(service.to_string()))?;
        let dir_path = base.join(dir);

        let entries = match std::fs::read_dir(&dir_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Dependency directory {} of service '{}' does not exist",
                    dir_path.display(),
                    service
                );
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(DaemonError::SourceRead {
                    path: dir_path,
                    source,
                });
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DaemonError::SourceRead {
                path: dir_path.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_valid_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Descriptions held in memory, keyed by service name
#[derive(Debug, Default)]
pub struct MemoryServiceSource {
    descriptions: HashMap<String, String>,
    /// Dependency directories, keyed by directory name
    dep_dirs: HashMap<String, Vec<String>>,
    reads: RefCell<HashMap<String, usize>>,
}

impl MemoryServiceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.descriptions.insert(name.into(), text.into());
    }

    /// Builder form of [`MemoryServiceSource::insert`]
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }

    pub fn insert_dir(&mut self, dir: impl Into<String>, entries: &[&str]) {
        self.dep_dirs
            .insert(dir.into(), entries.iter().map(|e| e.to_string()).collect());
    }

    /// How many times the description of `name` has been read
    pub fn read_count(&self, name: &str) -> usize {
        self.reads.borrow().get(name).copied().unwrap_or(0)
    }
}

impl ServiceSource for MemoryServiceSource {
    fn read_description(&self, name: &str) -> Result<Option<String>> {
        *self.reads.borrow_mut().entry(name.to_string()).or_default() += 1;
        Ok(self.descriptions.get(name).cloned())
    }

    fn list_dependency_dir(&self, _service: &str, dir: &str) -> Result<Vec<String>> {
        Ok(self.dep_dirs.get(dir).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests;
