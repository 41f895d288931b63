//! Working folder owned by a single patch operation.

use crate::patch::error::PatchError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Permission bits applied to folders this operation creates.
pub const WORKING_FOLDER_MODE: u32 = 0o744;

const TEMP_PREFIX: &str = "image-patcher-";

/// Working folder for package-manager scratch files.
///
/// A folder created by the operation is removed on drop, on every exit
/// path, unless debug mode is on; then it is kept and its path logged for
/// manual cleanup. Folders that already existed are never removed.
#[derive(Debug)]
pub struct WorkingFolder {
    path: PathBuf,
    created: bool,
    debug: bool,
}

impl WorkingFolder {
    /// Uses `requested` (creating it if missing) or a fresh temporary folder.
    pub fn acquire(requested: Option<&Path>, debug: bool) -> Result<Self, PatchError> {
        let (path, created) = match requested {
            None => {
                let path = tempfile::Builder::new()
                    .prefix(TEMP_PREFIX)
                    .tempdir()
                    .map_err(|source| PatchError::WorkingFolder {
                        path: std::env::temp_dir(),
                        source,
                    })?
                    .keep();
                (path, true)
            }
            Some(path) => (path.to_path_buf(), ensure_dir(path)?),
        };

        let folder = Self {
            path,
            created,
            debug,
        };
        if created {
            folder.set_permissions()?;
        }

        debug!(path = %folder.path.display(), created, "Working folder ready");
        Ok(folder)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    #[cfg(unix)]
    fn set_permissions(&self) -> Result<(), PatchError> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(WORKING_FOLDER_MODE))
            .map_err(|source| PatchError::WorkingFolder {
                path: self.path.clone(),
                source,
            })
    }

    #[cfg(not(unix))]
    fn set_permissions(&self) -> Result<(), PatchError> {
        Ok(())
    }
}

impl Drop for WorkingFolder {
    fn drop(&mut self) {
        if !self.created {
            return;
        }
        if self.debug {
            warn!(
                path = %self.path.display(),
                "Debug mode: working folder needs to be manually cleaned up"
            );
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove working folder");
        }
    }
}

/// Creates `path` if missing; returns whether it was created.
fn ensure_dir(path: &Path) -> Result<bool, PatchError> {
    let to_error = |source| PatchError::WorkingFolder {
        path: path.to_path_buf(),
        source,
    };

    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => Err(to_error(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a directory",
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(path).map_err(to_error)?;
            Ok(true)
        }
        Err(e) => Err(to_error(e)),
    }
}
