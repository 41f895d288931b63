//! Patch module - orchestration of in-place container image patching.
//!
//! This module provides the core of the patcher:
//! - **Reference**: source reference parsing and patched tag computation via [`PatchTarget`]
//! - **Detection**: OS identification from `/etc/os-release` via [`OsDetector`]
//! - **Dispatch**: package manager selection via [`PackageManagerResolver`]
//! - **Admission**: source-policy checks via [`SourcePolicy`]
//! - **Pipeline**: the sequential build stages via [`pipeline::BuildPipeline`]
//! - **Progress**: status rendering via [`ProgressReporter`]

pub mod cancel;
pub mod config;
pub mod error;
pub mod join;
pub mod manifest;
pub mod operation;
pub mod os;
pub mod pipeline;
pub mod pkgmgr;
pub mod policy;
pub mod progress;
pub mod reference;
pub mod workdir;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{BackendOptions, PatchRequest};
pub use error::PatchError;
pub use manifest::{reconcile, ManifestReportParser, NATIVE_SCANNER};
pub use operation::{Collaborators, PatchOutcome};
pub use os::{classify_os_name, OsDetector, OsReleaseParser, OS_NAME_PATTERNS};
pub use pipeline::{BuildJob, BuildPipeline, PatchStats, PipelineOutcome, Stage};
pub use pkgmgr::{PackageManagerRegistry, PackageManagerResolver};
pub use policy::SourcePolicy;
pub use progress::{PlainDisplay, ProgressDisplay, ProgressMode, ProgressReporter, TtyDisplay};
pub use reference::{ImageReference, PatchTarget, ReferenceError};
pub use workdir::WorkingFolder;
