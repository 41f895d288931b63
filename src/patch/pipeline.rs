//! Build pipeline for one patched image.
//!
//! Stages run strictly in sequence inside the build task:
//! 1. **ResolveImage**: load the base image state and configuration
//! 2. **DetectOs**: read `/etc/os-release`, or trust the report metadata
//! 3. **ResolvePackageManager**: dispatch on OS type and version
//! 4. **InstallUpdates**: delegate to the package manager
//! 5. **MarshalDefinition**: serialize the new state for a linux platform
//! 6. **Solve**, then **AttachConfig** of the base image configuration
//! 7. **ReconcileManifest** and **EmitVex** (report-driven runs only)
//! 8. **Export** the image archive
//!
//! Any failure aborts the remaining stages; nothing is compensated.
//! Every suspending collaborator call observes the shared cancellation.

use crate::model::{OsDescriptor, Platform, UpdateManifest};
use crate::patch::cancel::CancelToken;
use crate::patch::error::PatchError;
use crate::patch::manifest::reconcile;
use crate::patch::os::{OsDetector, OS_RELEASE_PATH};
use crate::patch::pkgmgr::{OsSource, PackageManagerResolver};
use crate::patch::policy::SourcePolicy;
use crate::traits::{
    BuildBackend, ExportTarget, PackageManagerFactory, ReleaseParser, StatusSender, VexEmitter,
    IMAGE_CONFIG_KEY,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Pipeline Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ResolveImage,
    DetectOs,
    ResolvePackageManager,
    InstallUpdates,
    MarshalDefinition,
    Solve,
    AttachConfig,
    ReconcileManifest,
    EmitVex,
    Export,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::ResolveImage => "resolve_image",
            Stage::DetectOs => "detect_os",
            Stage::ResolvePackageManager => "resolve_package_manager",
            Stage::InstallUpdates => "install_updates",
            Stage::MarshalDefinition => "marshal_definition",
            Stage::Solve => "solve",
            Stage::AttachConfig => "attach_config",
            Stage::ReconcileManifest => "reconcile_manifest",
            Stage::EmitVex => "emit_vex",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// VEX document requested for a report-driven run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VexRequest {
    pub output: PathBuf,
    pub format: String,
}

/// Inputs of one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Normalized source reference handed to the build engine
    pub source: String,
    pub target: ExportTarget,
    /// Report-derived updates; `None` lets the package manager decide
    pub manifest: Option<UpdateManifest>,
    pub working_folder: PathBuf,
    pub ignore_errors: bool,
    pub vex: Option<VexRequest>,
    /// Admitted source policy, applied by the engine at solve time
    pub source_policy: Option<SourcePolicy>,
}

/// Wall-clock time of a completed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTiming {
    pub stage: Stage,
    pub duration_ms: u64,
}

/// Statistics about a pipeline run.
#[derive(Debug, Default, Clone)]
pub struct PatchStats {
    pub total_duration_ms: u64,

    /// Completed stages in execution order
    pub stages: Vec<StageTiming>,

    /// Updates requested by the report (0 without a report)
    pub requested_updates: usize,

    pub failed_packages: usize,
}

impl PatchStats {
    fn record(&mut self, stage: Stage, started: Instant) {
        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(stage = stage.name(), duration_ms, "Stage completed");
        self.stages.push(StageTiming { stage, duration_ms });
    }

    pub fn completed(&self, stage: Stage) -> bool {
        self.stages.iter().any(|t| t.stage == stage)
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub os: OsDescriptor,
    pub package_type: &'static str,
    /// Report updates that were actually applied
    pub validated_manifest: Option<UpdateManifest>,
    pub failed_packages: Vec<String>,
    pub vex_written: bool,
    pub stats: PatchStats,
}

// ============================================================================
// Pipeline Executor
// ============================================================================

pub struct BuildPipeline {
    backend: Arc<dyn BuildBackend>,
    release_parser: Arc<dyn ReleaseParser>,
    package_managers: Arc<dyn PackageManagerFactory>,
    vex_emitter: Arc<dyn VexEmitter>,
    host_platform: Platform,
}

impl BuildPipeline {
    pub fn new(
        backend: Arc<dyn BuildBackend>,
        release_parser: Arc<dyn ReleaseParser>,
        package_managers: Arc<dyn PackageManagerFactory>,
        vex_emitter: Arc<dyn VexEmitter>,
    ) -> Self {
        Self {
            backend,
            release_parser,
            package_managers,
            vex_emitter,
            host_platform: Platform::host(),
        }
    }

    /// Overrides the detected host platform.
    pub fn with_host_platform(mut self, platform: Platform) -> Self {
        self.host_platform = platform;
        self
    }

    /// Runs every stage for `job`, streaming progress into `status`.
    ///
    /// `status` is dropped when the run ends, which closes the progress
    /// stream on success and failure alike.
    pub async fn run(
        &self,
        job: BuildJob,
        status: StatusSender,
        token: &CancelToken,
    ) -> Result<PipelineOutcome, PatchError> {
        let start = Instant::now();
        let mut stats = PatchStats {
            requested_updates: job.manifest.as_ref().map_or(0, |m| m.updates.len()),
            ..PatchStats::default()
        };

        // ====================================================================
        // Base image
        // ====================================================================

        info!(image = %job.source, "Resolving base image");
        let stage_start = Instant::now();
        let config = token.run(self.backend.resolve_image(&job.source)).await?;
        stats.record(Stage::ResolveImage, stage_start);

        // ====================================================================
        // OS identity and package manager
        // ====================================================================

        let stage_start = Instant::now();
        let os = match OsSource::from_manifest(job.manifest.as_ref()) {
            OsSource::Report(manifest) => {
                debug!("Using OS metadata from report");
                manifest.os_descriptor()
            }
            OsSource::Image => {
                let content = token
                    .run(self.backend.read_file(&config.state, OS_RELEASE_PATH))
                    .await?;
                OsDetector::new(self.release_parser.as_ref()).detect(&content)?
            }
        };
        stats.record(Stage::DetectOs, stage_start);
        info!(os = %os, "Target OS identified");

        let stage_start = Instant::now();
        let manager = PackageManagerResolver::new(self.package_managers.as_ref()).resolve(
            &os,
            &config,
            &job.working_folder,
        )?;
        stats.record(Stage::ResolvePackageManager, stage_start);

        // ====================================================================
        // Package updates
        // ====================================================================

        info!(ignore_errors = job.ignore_errors, "Installing updates");
        let stage_start = Instant::now();
        let installed = token
            .run(manager.install_updates(job.manifest.as_ref(), job.ignore_errors))
            .await?;
        stats.record(Stage::InstallUpdates, stage_start);
        stats.failed_packages = installed.failed_packages.len();
        if !installed.failed_packages.is_empty() {
            warn!(
                packages = ?installed.failed_packages,
                "Some packages failed to update and were skipped"
            );
        }

        // ====================================================================
        // Build graph
        // ====================================================================

        let stage_start = Instant::now();
        let platform = self.host_platform.clone().for_container_target();
        let definition = installed.state.marshal(&platform)?;
        stats.record(Stage::MarshalDefinition, stage_start);

        let stage_start = Instant::now();
        let mut result = token
            .run(self.backend.solve(&definition, job.source_policy.as_ref(), &status))
            .await?;
        stats.record(Stage::Solve, stage_start);

        let stage_start = Instant::now();
        result.add_meta(IMAGE_CONFIG_KEY, config.config_data.clone());
        stats.record(Stage::AttachConfig, stage_start);

        // ====================================================================
        // Manifest reconciliation and VEX
        // ====================================================================

        let mut validated_manifest = None;
        let mut vex_written = false;
        if let Some(requested) = &job.manifest {
            let stage_start = Instant::now();
            let validated = reconcile(requested, &installed.failed_packages);
            stats.record(Stage::ReconcileManifest, stage_start);

            match &job.vex {
                Some(vex) if !validated.updates.is_empty() => {
                    let stage_start = Instant::now();
                    token
                        .run(self.vex_emitter.emit(
                            &validated,
                            manager.as_ref(),
                            &job.target.image_name,
                            &vex.format,
                            &vex.output,
                        ))
                        .await?;
                    stats.record(Stage::EmitVex, stage_start);
                    vex_written = true;
                    info!(output = %vex.output.display(), format = %vex.format, "VEX document written");
                }
                Some(_) => info!("No updates were applied, skipping VEX document"),
                None => {}
            }
            validated_manifest = Some(validated);
        }

        // ====================================================================
        // Export
        // ====================================================================

        let stage_start = Instant::now();
        token
            .run(self.backend.export(&result, &job.target, &status))
            .await?;
        stats.record(Stage::Export, stage_start);

        stats.total_duration_ms = start.elapsed().as_millis() as u64;
        info!(
            image = %job.target.image_name,
            path = %job.target.tar_path.display(),
            duration_ms = stats.total_duration_ms,
            "Patched image exported"
        );

        Ok(PipelineOutcome {
            os,
            package_type: manager.package_type(),
            validated_manifest,
            failed_packages: installed.failed_packages,
            vex_written,
            stats,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
