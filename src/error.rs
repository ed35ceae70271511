//! Error types for Berth

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for Berth operations
pub type Result<T> = std::result::Result<T, BerthError>;

/// Kind of name a service refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `depends_on` entry
    Dependency,
    /// Named volume mount
    Volume,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Dependency => write!(f, "service"),
            ReferenceKind::Volume => write!(f, "volume"),
        }
    }
}

/// Berth error types
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("Descriptor parse error: {0}")]
    Parse(String),

    #[error("No descriptor found in {}", .0.display())]
    DescriptorNotFound(PathBuf),

    #[error("Interpolation error: {0}")]
    Interpolation(String),

    #[error("Service '{service}' references undefined {kind} '{name}'")]
    DanglingReference {
        service: String,
        kind: ReferenceKind,
        name: String,
    },

    #[error("Circular dependency: {}", .0.join(" -> "))]
    CircularDependency(Vec<String>),

    #[error("Service '{0}' must have either 'image' or 'build' specified")]
    MissingImage(String),

    #[error("Container name '{name}' is used by both '{first}' and '{second}'")]
    DuplicateContainerName {
        name: String,
        first: String,
        second: String,
    },

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invalid port mapping '{spec}': {reason}")]
    InvalidPort { spec: String, reason: String },

    #[error("Invalid volume mount '{spec}': {reason}")]
    InvalidMount { spec: String, reason: String },

    #[error("Invalid restart policy: {0}")]
    InvalidRestartPolicy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Descriptor is invalid: {0} error(s)")]
    Invalid(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl BerthError {
    pub(crate) fn invalid_port(spec: &str, reason: impl Into<String>) -> Self {
        BerthError::InvalidPort {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_mount(spec: &str, reason: impl Into<String>) -> Self {
        BerthError::InvalidMount {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
