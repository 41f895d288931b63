//! Error surfaced by a patch operation.

use crate::patch::reference::ReferenceError;
use crate::traits::{BuildError, EmitError, InstallError, ParseError};
use std::path::PathBuf;
use std::time::Duration;

/// The single descriptive error returned per patch call.
#[derive(thiserror::Error, Debug)]
pub enum PatchError {
    /// Malformed or unresolvable image reference or tag
    #[error(transparent)]
    Reference(#[from] ReferenceError),

    /// Release descriptor names an OS family with no mapping
    #[error("unsupported OS: {name}")]
    UnsupportedOs { name: String },

    /// Release descriptor could not be parsed
    #[error("unable to parse os-release data: {0}")]
    ReleaseDescriptor(#[source] ParseError),

    /// Scanner report could not be loaded
    #[error("unable to load report {path}: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    /// Source policy rejects the update source before any build work
    #[error("{distribution} is not supported via source policies due to BusyBox not being in the {repos} repos\nPlease use a different RPM-based image")]
    Policy { distribution: String, repos: String },

    /// No package manager available for the resolved OS
    #[error("no package manager available for OS {os_type} {os_version}")]
    PackageManager { os_type: String, os_version: String },

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("patch exceeded timeout {0:?}")]
    Timeout(Duration),

    /// The shared context was cancelled by a peer task or the deadline
    #[error("patch operation cancelled")]
    Cancelled,

    #[error("failed to render progress: {0}")]
    Progress(#[source] std::io::Error),

    #[error("failed to prepare working folder {path}: {source}")]
    WorkingFolder {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another in-flight operation owns the working folder
    #[error("working folder {0} is in use by another patch operation")]
    WorkingFolderBusy(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("patch task failed: {0}")]
    Task(String),
}

impl PatchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PatchError::Timeout(_))
    }
}
