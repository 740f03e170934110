//! The two error kinds of the tool.
//!
//! `ConfigurationError` is raised locally, before anything is handed to the
//! provisioning engine. `ProvisioningError` wraps whatever the external tools
//! report and is passed through untouched.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("invalid account id {0:?}: expected 12 digits")]
    InvalidAccount(String),

    #[error("invalid region {0:?}")]
    InvalidRegion(String),

    #[error("failed to read {}: {source}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8", .path.display())]
    NotUtf8 { path: PathBuf },

    #[error("container build context {} does not exist or is not a directory", .0.display())]
    MissingBuildContext(PathBuf),

    #[error("failed to walk container build context {}: {source}", .path.display())]
    WalkBuildContext {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("container build context {} has no Dockerfile", .0.display())]
    MissingDockerfile(PathBuf),

    #[error("cpu {cpu} with memory {memory_mib} MiB is not a valid Fargate size")]
    InvalidTaskSize { cpu: u32, memory_mib: u32 },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid logical id {0:?}: must be non-empty and alphanumeric")]
    InvalidLogicalId(String),

    #[error("duplicate resource id {0}")]
    DuplicateResource(String),

    #[error("resource {from} references missing resource {to}")]
    DanglingReference { from: String, to: String },

    #[error("resource {from} references {to} as a {expected}, but it is a {found}")]
    WrongReferenceKind {
        from: String,
        to: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("dependency cycle: {0}")]
    Cycle(String),
}

#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}: {stderr}", .status.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}
