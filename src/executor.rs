use crate::patch::cancel::CancelToken;
use crate::patch::config::PatchRequest;
use crate::patch::error::PatchError;
use crate::patch::operation::{run_operation, Collaborators, PatchOutcome};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument};

/// Time allowed for deferred cleanup after the deadline passes.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(1);

const DEFAULT_CONCURRENCY: usize = 4;

type ClaimedFolders = Arc<Mutex<HashSet<PathBuf>>>;

/// Supervises patch operations: admission, deadline and cancellation.
pub struct PatchExecutor {
    semaphore: Arc<Semaphore>,
    claimed: ClaimedFolders,
    grace_period: Duration,
}

impl Default for PatchExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl PatchExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            claimed: Arc::new(Mutex::new(HashSet::new())),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Runs `request` to completion or until its timeout expires.
    ///
    /// On expiry the operation is cancelled and given the grace period to
    /// unwind, then [`PatchError::Timeout`] is returned whether or not it
    /// finished. The operation task is not aborted; it keeps its working
    /// folder claim until it has actually exited.
    #[instrument(skip(self, request, collaborators), fields(image = %request.image))]
    pub async fn execute(
        &self,
        request: PatchRequest,
        collaborators: Collaborators,
    ) -> Result<PatchOutcome, PatchError> {
        request.validate()?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PatchError::Task(format!("Semaphore error: {}", e)))?;

        let claim = FolderClaim::acquire(&self.claimed, request.working_folder.as_deref())?;
        let timeout = request.timeout;
        let token = CancelToken::new();

        info!(timeout_secs = timeout.as_secs(), "Starting patch");

        let operation = {
            let token = token.clone();
            tokio::spawn(async move {
                let _claim = claim;
                run_operation(request, collaborators, token).await
            })
        };

        tokio::select! {
            joined = operation => {
                let result = joined.map_err(|e| PatchError::Task(e.to_string()))?;
                match &result {
                    Ok(outcome) => info!(
                        image = %outcome.patched_image,
                        duration_ms = outcome.stats.total_duration_ms,
                        "Finished patch"
                    ),
                    Err(err) => error!(error = %err, "Patch failed"),
                }
                result
            }
            _ = tokio::time::sleep(timeout) => {
                token.cancel();
                tokio::time::sleep(self.grace_period).await;
                let err = PatchError::Timeout(timeout);
                error!(error = %err, "Patch timed out");
                Err(err)
            }
        }
    }
}

/// Runs one patch operation with a fresh default executor.
///
/// Each call gets its own concurrency limit and working-folder registry, so
/// concurrent calls are not checked against each other. Share one
/// [`PatchExecutor`] to keep operations from claiming the same folder.
pub async fn patch(
    request: PatchRequest,
    collaborators: Collaborators,
) -> Result<PatchOutcome, PatchError> {
    PatchExecutor::default().execute(request, collaborators).await
}

/// Exclusive claim on an explicitly requested working folder.
struct FolderClaim {
    claimed: ClaimedFolders,
    path: Option<PathBuf>,
}

/// Registry key for `folder`, stable whether or not it exists yet.
///
/// Relative paths are resolved against `base`. The deepest existing
/// ancestor is canonicalized and the missing components appended, so the
/// key does not change once the operation creates the folder.
fn claim_key(folder: &Path, base: &Path) -> std::io::Result<PathBuf> {
    let absolute = base.join(folder);
    let mut missing = Vec::new();
    for ancestor in absolute.ancestors() {
        match std::fs::canonicalize(ancestor) {
            Ok(mut key) => {
                key.extend(missing.iter().rev());
                return Ok(key);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(name) = ancestor.file_name() {
                    missing.push(name.to_os_string());
                }
            }
            Err(e) => return Err(e),
        }
    }
    Ok(absolute)
}

impl FolderClaim {
    fn acquire(claimed: &ClaimedFolders, folder: Option<&Path>) -> Result<Self, PatchError> {
        let path = folder
            .map(|f| {
                std::env::current_dir()
                    .and_then(|cwd| claim_key(f, &cwd))
                    .map_err(|source| PatchError::WorkingFolder {
                        path: f.to_path_buf(),
                        source,
                    })
            })
            .transpose()?;

        if let Some(path) = &path {
            let mut folders = claimed
                .lock()
                .map_err(|_| PatchError::Task("working folder registry poisoned".to_string()))?;
            if !folders.insert(path.clone()) {
                return Err(PatchError::WorkingFolderBusy(path.clone()));
            }
        }

        Ok(Self {
            claimed: Arc::clone(claimed),
            path,
        })
    }
}

impl Drop for FolderClaim {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            if let Ok(mut folders) = self.claimed.lock() {
                folders.remove(path);
            }
        }
    }
}
