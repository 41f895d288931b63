//! Package manager selection for a resolved OS identity.

use crate::model::{OsDescriptor, OsFamily, UpdateManifest};
use crate::patch::error::PatchError;
use crate::traits::{ImageConfig, PackageManager, PackageManagerFactory, UnsupportedOs};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Where the OS identity used for dispatch comes from.
#[derive(Debug, Clone, Copy)]
pub enum OsSource<'a> {
    /// Detect from the live image's release descriptor.
    Image,
    /// Trust the report metadata; the image is never inspected.
    Report(&'a UpdateManifest),
}

impl OsSource<'_> {
    pub fn from_manifest(manifest: Option<&UpdateManifest>) -> OsSource<'_> {
        match manifest {
            Some(manifest) => OsSource::Report(manifest),
            None => OsSource::Image,
        }
    }
}

/// Resolves package managers through a [`PackageManagerFactory`].
pub struct PackageManagerResolver<'a> {
    factory: &'a dyn PackageManagerFactory,
}

impl<'a> PackageManagerResolver<'a> {
    pub fn new(factory: &'a dyn PackageManagerFactory) -> Self {
        Self { factory }
    }

    pub fn resolve(
        &self,
        os: &OsDescriptor,
        config: &ImageConfig,
        working_folder: &Path,
    ) -> Result<Arc<dyn PackageManager>, PatchError> {
        let manager = self
            .factory
            .resolve(os, config, working_folder)
            .map_err(|e| PatchError::PackageManager {
                os_type: e.os_type,
                os_version: e.version,
            })?;

        info!(
            os = %os,
            package_type = manager.package_type(),
            "Resolved package manager"
        );
        Ok(manager)
    }
}

/// Builds a manager for a given OS version, or `None` if the version is not
/// supported.
pub type ManagerBuilder =
    Box<dyn Fn(&str, &ImageConfig, &Path) -> Option<Arc<dyn PackageManager>> + Send + Sync>;

/// Factory dispatching to per-family builders.
#[derive(Default)]
pub struct PackageManagerRegistry {
    builders: HashMap<OsFamily, ManagerBuilder>,
}

impl PackageManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a builder for `family`, replacing any previous one.
    pub fn register<F>(mut self, family: OsFamily, builder: F) -> Self
    where
        F: Fn(&str, &ImageConfig, &Path) -> Option<Arc<dyn PackageManager>> + Send + Sync + 'static,
    {
        debug!(family = %family, "Registering package manager");
        self.builders.insert(family, Box::new(builder));
        self
    }

    pub fn supports(&self, family: OsFamily) -> bool {
        self.builders.contains_key(&family)
    }
}

impl fmt::Debug for PackageManagerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut families: Vec<_> = self.builders.keys().map(OsFamily::as_str).collect();
        families.sort_unstable();
        f.debug_struct("PackageManagerRegistry")
            .field("families", &families)
            .finish()
    }
}

impl PackageManagerFactory for PackageManagerRegistry {
    fn resolve(
        &self,
        os: &OsDescriptor,
        config: &ImageConfig,
        working_folder: &Path,
    ) -> Result<Arc<dyn PackageManager>, UnsupportedOs> {
        let unsupported = || UnsupportedOs {
            os_type: os.os_type.clone(),
            version: os.version.clone(),
        };

        let family: OsFamily = os.os_type.parse().map_err(|_| unsupported())?;
        let builder = self.builders.get(&family).ok_or_else(unsupported)?;
        builder(&os.version, config, working_folder).ok_or_else(unsupported)
    }
}
