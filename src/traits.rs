//! Collaborator seams consumed by the patch orchestrator.
//!
//! The orchestrator never talks to a build engine, a scanner report or a
//! distribution's package tooling directly. Each of those is reached through
//! one of the traits below so that the orchestration logic (ordering,
//! cancellation, failure reconciliation) can be exercised in isolation.

use crate::model::{OsDescriptor, OsFamily, Platform, UpdateManifest};
use crate::patch::config::BackendOptions;
use crate::patch::policy::SourcePolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// Collaborator Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to parse content: {0}")]
    InvalidContent(String),
    #[error("Unsupported scanner: {0}")]
    UnsupportedScanner(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Package manager failure while applying updates.
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("failed to install packages {0:?}")]
    PackagesFailed(Vec<String>),
    #[error("package manager failed: {0}")]
    Failed(String),
}

/// Build engine failures: connection, graph construction, solve, export.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("failed to connect to build engine: {0}")]
    Connect(String),
    #[error("failed to resolve image {image}: {message}")]
    ResolveImage { image: String, message: String },
    #[error("unable to extract {path} from image state: {message}")]
    ReadFile { path: String, message: String },
    #[error("unable to marshal platform definition: {0}")]
    Marshal(String),
    #[error("solve failed: {0}")]
    Solve(String),
    #[error("export failed: {0}")]
    Export(String),
}

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("unsupported VEX format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to serialize VEX document: {0}")]
    Serialize(String),
    #[error("failed to write VEX document: {0}")]
    Io(#[from] std::io::Error),
}

/// No package manager exists for an OS type/version combination.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported OS {os_type} {version}")]
pub struct UnsupportedOs {
    pub os_type: String,
    pub version: String,
}

// ============================================================================
// Build Engine Types
// ============================================================================

/// Metadata key under which the base image configuration is attached.
pub const IMAGE_CONFIG_KEY: &str = "containerimage.config";

/// Lazily evaluated image filesystem state: a base image plus the
/// operations a package manager layered on top of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageState {
    pub base: String,
    pub steps: Vec<String>,
}

impl ImageState {
    pub fn from_image(image: impl Into<String>) -> Self {
        Self {
            base: image.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    /// Serializes the state into a definition for the given platform.
    pub fn marshal(&self, platform: &Platform) -> Result<Definition, BuildError> {
        if self.base.is_empty() {
            return Err(BuildError::Marshal("image state has no base".to_string()));
        }

        let bytes = serde_json::to_vec(&DefinitionDocument {
            platform,
            state: self,
        })
        .map_err(|e| BuildError::Marshal(e.to_string()))?;

        Ok(Definition {
            platform: platform.clone(),
            bytes,
        })
    }
}

#[derive(Serialize)]
struct DefinitionDocument<'a> {
    platform: &'a Platform,
    state: &'a ImageState,
}

/// Marshalled, platform-specific build definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub platform: Platform,
    pub bytes: Vec<u8>,
}

/// Base image configuration as resolved by the build engine.
#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub image: String,
    pub state: ImageState,
    pub config_data: Vec<u8>,
}

/// Solved build graph plus attached metadata, consumed by export.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub definition: Definition,
    pub metadata: BTreeMap<String, Vec<u8>>,
}

impl BuildResult {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            metadata: BTreeMap::new(),
        }
    }

    pub fn add_meta(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.metadata.insert(key.into(), value);
    }

    pub fn image_config(&self) -> Option<&[u8]> {
        self.metadata.get(IMAGE_CONFIG_KEY).map(Vec::as_slice)
    }
}

/// Where and under which name the patched image is exported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    pub image_name: String,
    pub tar_path: PathBuf,
}

/// Progress of a single build vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexState {
    Started,
    Completed,
    Cached,
    Log(String),
    Failed(String),
}

/// One unit of progress emitted by the build engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolveStatus {
    pub vertex: String,
    pub name: String,
    pub state: VertexState,
}

pub type StatusSender = mpsc::Sender<SolveStatus>;
pub type StatusReceiver = mpsc::Receiver<SolveStatus>;

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Loads an update manifest from a scanner report.
pub trait ReportParser: Send + Sync {
    fn parse(&self, path: &Path, scanner: &str) -> Result<UpdateManifest, ParseError>;
}

/// Parses release-descriptor content into a field → value mapping.
pub trait ReleaseParser: Send + Sync {
    fn parse(&self, content: &[u8]) -> Result<HashMap<String, String>, ParseError>;
}

/// Result of applying updates to an image state.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub state: ImageState,
    /// Names of packages that could not be updated (only populated when
    /// errors are ignored).
    pub failed_packages: Vec<String>,
}

/// OS-family-specific component that rewrites package state in the image.
#[async_trait]
pub trait PackageManager: Send + Sync {
    fn os_family(&self) -> OsFamily;

    fn package_type(&self) -> &'static str {
        self.os_family().package_type()
    }

    /// Applies `manifest` or, when `None`, every update the package manager
    /// finds on its own.
    async fn install_updates(
        &self,
        manifest: Option<&UpdateManifest>,
        ignore_errors: bool,
    ) -> Result<InstallOutcome, InstallError>;
}

/// Produces a package manager for a resolved OS identity.
pub trait PackageManagerFactory: Send + Sync {
    fn resolve(
        &self,
        os: &OsDescriptor,
        config: &ImageConfig,
        working_folder: &Path,
    ) -> Result<Arc<dyn PackageManager>, UnsupportedOs>;
}

/// Connected build engine session.
#[async_trait]
pub trait BuildBackend: Send + Sync {
    /// Resolves the base image and its configuration.
    async fn resolve_image(&self, image: &str) -> Result<ImageConfig, BuildError>;

    async fn read_file(&self, state: &ImageState, path: &str) -> Result<Vec<u8>, BuildError>;

    /// Solves `definition`, applying `policy` to its sources when given.
    async fn solve(
        &self,
        definition: &Definition,
        policy: Option<&SourcePolicy>,
        status: &StatusSender,
    ) -> Result<BuildResult, BuildError>;

    /// Writes the image archive for a solved result.
    async fn export(
        &self,
        result: &BuildResult,
        target: &ExportTarget,
        status: &StatusSender,
    ) -> Result<(), BuildError>;
}

#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, options: &BackendOptions) -> Result<Arc<dyn BuildBackend>, BuildError>;
}

/// Writes a VEX document describing the applied updates.
#[async_trait]
pub trait VexEmitter: Send + Sync {
    async fn emit(
        &self,
        manifest: &UpdateManifest,
        manager: &dyn PackageManager,
        image_name: &str,
        format: &str,
        output: &Path,
    ) -> Result<(), EmitError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_requires_base() {
        let platform = Platform::normalize("linux", "x86_64");
        let err = ImageState::default().marshal(&platform).unwrap_err();
        assert!(matches!(err, BuildError::Marshal(_)));
    }

    #[test]
    fn test_marshal_embeds_platform_and_steps() {
        let platform = Platform::normalize("linux", "aarch64");
        let state = ImageState::from_image("docker.io/library/alpine:3.19").with_step("apk upgrade");

        let def = state.marshal(&platform).unwrap();
        assert_eq!(def.platform, platform);

        let doc: serde_json::Value = serde_json::from_slice(&def.bytes).unwrap();
        assert_eq!(doc["platform"]["architecture"], "arm64");
        assert_eq!(doc["state"]["steps"][0], "apk upgrade");
    }

    #[test]
    fn test_build_result_metadata() {
        let def = ImageState::from_image("alpine")
            .marshal(&Platform::normalize("linux", "x86_64"))
            .unwrap();
        let mut result = BuildResult::new(def);
        assert!(result.image_config().is_none());

        result.add_meta(IMAGE_CONFIG_KEY, b"{}".to_vec());
        assert_eq!(result.image_config(), Some(&b"{}"[..]));
    }
}
