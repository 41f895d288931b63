//! Update manifest loading and post-install reconciliation.

use crate::model::UpdateManifest;
use crate::traits::{ParseError, ReportParser};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

/// Scanner id for reports that already are update manifests.
pub const NATIVE_SCANNER: &str = "native";

/// Filters the requested updates down to those that were applied.
///
/// The result keeps the OS and architecture metadata of `requested` and the
/// relative order of its updates, dropping every package named in
/// `failed_packages`.
pub fn reconcile(requested: &UpdateManifest, failed_packages: &[String]) -> UpdateManifest {
    let failed: HashSet<&str> = failed_packages.iter().map(String::as_str).collect();

    let mut validated = requested.empty_like();
    validated.updates = requested
        .updates
        .iter()
        .filter(|update| !failed.contains(update.name.as_str()))
        .cloned()
        .collect();

    debug!(
        requested = requested.updates.len(),
        failed = failed_packages.len(),
        applied = validated.updates.len(),
        "Reconciled update manifest"
    );
    validated
}

/// Reads reports written as JSON update manifests.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestReportParser;

impl ReportParser for ManifestReportParser {
    fn parse(&self, path: &Path, scanner: &str) -> Result<UpdateManifest, ParseError> {
        if scanner != NATIVE_SCANNER {
            return Err(ParseError::UnsupportedScanner(scanner.to_string()));
        }

        let content = std::fs::read(path)?;
        serde_json::from_slice(&content).map_err(|e| ParseError::InvalidContent(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ManifestConfig, Metadata, OsInfo, UpdatePackage};

    fn manifest(names: &[&str]) -> UpdateManifest {
        UpdateManifest {
            metadata: Metadata {
                os: OsInfo {
                    os_type: "debian".to_string(),
                    version: "12".to_string(),
                },
                config: ManifestConfig {
                    arch: "arm64".to_string(),
                },
            },
            updates: names
                .iter()
                .map(|name| UpdatePackage {
                    name: name.to_string(),
                    installed_version: "1.0".to_string(),
                    fixed_version: "1.1".to_string(),
                    vulnerability_id: String::new(),
                })
                .collect(),
        }
    }

    fn names(m: &UpdateManifest) -> Vec<&str> {
        m.updates.iter().map(|u| u.name.as_str()).collect()
    }

    #[test]
    fn test_failed_packages_are_dropped_in_order() {
        let requested = manifest(&["openssl", "curl", "zlib", "bash", "tar"]);
        let failed = vec!["zlib".to_string(), "openssl".to_string()];

        let validated = reconcile(&requested, &failed);
        assert_eq!(names(&validated), vec!["curl", "bash", "tar"]);
        assert_eq!(validated.updates.len(), requested.updates.len() - failed.len());
        assert_eq!(validated.metadata, requested.metadata);
    }

    #[test]
    fn test_no_failures_keeps_everything() {
        let requested = manifest(&["a", "b"]);
        assert_eq!(reconcile(&requested, &[]), requested);
    }

    #[test]
    fn test_unknown_failed_names_are_ignored() {
        let requested = manifest(&["a", "b"]);
        let validated = reconcile(&requested, &["c".to_string()]);
        assert_eq!(names(&validated), vec!["a", "b"]);
    }

    #[test]
    fn test_all_failed_yields_empty_manifest() {
        let requested = manifest(&["a"]);
        let validated = reconcile(&requested, &["a".to_string()]);
        assert!(validated.updates.is_empty());
        assert_eq!(validated.metadata.config.arch, "arm64");
    }

    #[test]
    fn test_native_report_parser() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, serde_json::to_vec(&manifest(&["libc6"])).unwrap()).unwrap();

        let parsed = ManifestReportParser.parse(&path, NATIVE_SCANNER).unwrap();
        assert_eq!(names(&parsed), vec!["libc6"]);

        assert!(matches!(
            ManifestReportParser.parse(&path, "grype"),
            Err(ParseError::UnsupportedScanner(_))
        ));
        assert!(matches!(
            ManifestReportParser.parse(&dir.path().join("missing.json"), NATIVE_SCANNER),
            Err(ParseError::IoError(_))
        ));
    }
}
