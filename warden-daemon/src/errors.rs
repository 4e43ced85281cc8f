use std::path::PathBuf;
use thiserror::Error;

/// Render a cycle as `a -> b -> a`
fn format_cycle(names: &[String]) -> String {
    names.join(" -> ")
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Error in description of service '{service}': {reason}\n  at: {line}")]
    ServiceDescription {
        service: String,
        line: String,
        reason: String,
    },

    #[error("Dependency cycle detected: {}", format_cycle(.0))]
    DependencyCycle(Vec<String>),

    #[error("Failed to launch service {service}: {reason}")]
    Launch { service: String, reason: String },

    #[error("Service {0} has failed; reset it before starting again")]
    ServiceFailed(String),

    #[error("Service {0} is not a triggered service")]
    NotTriggered(String),

    #[error("Failed to read service description {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment file not found: {0}")]
    EnvFileNotFound(PathBuf),

    #[error("Failed to parse environment file {path}: {source}")]
    EnvFileParse {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Build a description error for one line of a service file
    pub fn description(service: &str, line: &str, reason: impl Into<String>) -> Self {
        DaemonError::ServiceDescription {
            service: service.to_string(),
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
