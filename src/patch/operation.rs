//! One patch operation, from reference resolution to the joined
//! build and progress tasks.

use crate::model::{OsDescriptor, UpdateManifest};
use crate::patch::cancel::CancelToken;
use crate::patch::config::PatchRequest;
use crate::patch::error::PatchError;
use crate::patch::join::join_first_error;
use crate::patch::manifest::ManifestReportParser;
use crate::patch::os::OsReleaseParser;
use crate::patch::pipeline::{BuildJob, BuildPipeline, PatchStats, VexRequest};
use crate::patch::policy::check_source_policy;
use crate::patch::progress::{stderr_display, DisplayFactory, ProgressMode, ProgressReporter};
use crate::patch::reference::PatchTarget;
use crate::patch::workdir::WorkingFolder;
use crate::traits::{
    BackendConnector, ExportTarget, PackageManagerFactory, ReleaseParser, ReportParser, VexEmitter,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Capacity of the status stream between build and progress tasks.
const STATUS_BUFFER: usize = 64;

/// External components a patch operation delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn BackendConnector>,
    pub report_parser: Arc<dyn ReportParser>,
    pub release_parser: Arc<dyn ReleaseParser>,
    pub package_managers: Arc<dyn PackageManagerFactory>,
    pub vex_emitter: Arc<dyn VexEmitter>,
    /// Progress display override; stderr when `None`
    pub display: Option<DisplayFactory>,
}

impl Collaborators {
    /// Uses the native manifest report parser and the os-release parser.
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        package_managers: Arc<dyn PackageManagerFactory>,
        vex_emitter: Arc<dyn VexEmitter>,
    ) -> Self {
        Self {
            connector,
            report_parser: Arc::new(ManifestReportParser),
            release_parser: Arc::new(OsReleaseParser),
            package_managers,
            vex_emitter,
            display: None,
        }
    }

    pub fn with_report_parser(mut self, parser: Arc<dyn ReportParser>) -> Self {
        self.report_parser = parser;
        self
    }

    pub fn with_release_parser(mut self, parser: Arc<dyn ReleaseParser>) -> Self {
        self.release_parser = parser;
        self
    }

    pub fn with_display(mut self, display: DisplayFactory) -> Self {
        self.display = Some(display);
        self
    }
}

/// Successful patch result.
#[derive(Debug, Clone)]
pub struct PatchOutcome {
    /// Name the image archive was exported under
    pub patched_image: String,
    pub export_path: PathBuf,
    pub os: OsDescriptor,
    pub validated_manifest: Option<UpdateManifest>,
    pub failed_packages: Vec<String>,
    pub vex_written: bool,
    /// Working folder kept for inspection (debug mode only)
    pub retained_working_folder: Option<PathBuf>,
    pub stats: PatchStats,
}

/// Runs one patch operation under `token`.
///
/// Fast-failing checks (reference, report, source policy) run before the
/// build engine is contacted. The working folder is released when this
/// function returns, whichever way it exits.
pub async fn run_operation(
    request: PatchRequest,
    collaborators: Collaborators,
    token: CancelToken,
) -> Result<PatchOutcome, PatchError> {
    let target = PatchTarget::resolve(&request.image, request.patched_tag.as_deref())?;
    info!(source = %target.source, patched = %target.patched_image, "Resolved image reference");

    let working_folder = WorkingFolder::acquire(request.working_folder.as_deref(), request.debug)?;

    let manifest = match &request.report {
        Some(path) => {
            let manifest = collaborators
                .report_parser
                .parse(path, &request.scanner)
                .map_err(|source| PatchError::Report {
                    path: path.clone(),
                    source,
                })?;
            debug!(updates = ?manifest.updates, "Updates to apply");
            Some(manifest)
        }
        None => None,
    };

    let source_policy = check_source_policy(request.source_policy.as_deref())?;

    let backend = token.run(collaborators.connector.connect(&request.backend)).await?;
    let pipeline = BuildPipeline::new(
        backend,
        collaborators.release_parser.clone(),
        collaborators.package_managers.clone(),
        collaborators.vex_emitter.clone(),
    );

    let job = BuildJob {
        source: target.source.to_string(),
        target: ExportTarget {
            image_name: target.patched_image.clone(),
            tar_path: request.export_path.clone(),
        },
        manifest,
        working_folder: working_folder.path().to_path_buf(),
        ignore_errors: request.ignore_errors,
        vex: request.output.clone().map(|output| VexRequest {
            output,
            format: request.format.clone(),
        }),
        source_policy,
    };

    let mode = ProgressMode::for_debug(request.debug);
    let display = match &collaborators.display {
        Some(factory) => (factory.as_ref())(mode),
        None => stderr_display(mode),
    };

    let (status_tx, status_rx) = mpsc::channel(STATUS_BUFFER);
    let build = {
        let token = token.clone();
        async move { pipeline.run(job, status_tx, &token).await }
    };
    let progress = ProgressReporter::new(display).run(status_rx, token.clone());

    let (outcome, ()) = join_first_error(&token, build, progress).await?;

    let retained_working_folder = (request.debug && working_folder.is_created())
        .then(|| working_folder.path().to_path_buf());

    Ok(PatchOutcome {
        patched_image: target.patched_image,
        export_path: request.export_path,
        os: outcome.os,
        validated_manifest: outcome.validated_manifest,
        failed_packages: outcome.failed_packages,
        vex_written: outcome.vex_written,
        retained_working_folder,
        stats: outcome.stats,
    })
}
