//! Per-operation configuration.

use crate::patch::error::PatchError;
use crate::patch::policy::SOURCE_POLICY_ENV;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SCANNER: &str = "trivy";
const DEFAULT_FORMAT: &str = "openvex";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_EXPORT_PATH: &str = "patched.tar";

/// Connection options for the build engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendOptions {
    /// Engine address, e.g. `unix:///run/buildkit/buildkitd.sock`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

/// Immutable configuration of one patch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub image: String,
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub patched_tag: Option<String>,
    #[serde(default)]
    pub working_folder: Option<PathBuf>,
    #[serde(default = "default_scanner")]
    pub scanner: String,
    #[serde(default = "default_format")]
    pub format: String,
    /// VEX document destination
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub ignore_errors: bool,
    #[serde(default = "default_timeout", rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub backend: BackendOptions,
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
    #[serde(default)]
    pub source_policy: Option<PathBuf>,
    /// Keeps created working folders and renders progress plainly
    #[serde(default)]
    pub debug: bool,
}

fn default_scanner() -> String {
    DEFAULT_SCANNER.to_string()
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_export_path() -> PathBuf {
    PathBuf::from(DEFAULT_EXPORT_PATH)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

impl PatchRequest {
    /// Creates a request for `image` with default settings.
    ///
    /// Defaults:
    /// - Scanner: `trivy`, format: `openvex`
    /// - Timeout: 5 minutes
    /// - Export path: `patched.tar`
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            report: None,
            patched_tag: None,
            working_folder: None,
            scanner: default_scanner(),
            format: default_format(),
            output: None,
            ignore_errors: false,
            timeout: DEFAULT_TIMEOUT,
            backend: BackendOptions::default(),
            export_path: default_export_path(),
            source_policy: None,
            debug: false,
        }
    }

    /// Loads a request from a JSON document.
    pub fn from_json_file(path: &Path) -> Result<Self, PatchError> {
        let content = std::fs::read(path).map_err(|e| {
            PatchError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let request: Self = serde_json::from_slice(&content)
            .map_err(|e| PatchError::Config(format!("invalid request {}: {}", path.display(), e)))?;
        request.validate()?;
        Ok(request)
    }

    pub fn with_report(mut self, report: impl Into<PathBuf>, scanner: impl Into<String>) -> Self {
        self.report = Some(report.into());
        self.scanner = scanner.into();
        self
    }

    pub fn with_patched_tag(mut self, tag: impl Into<String>) -> Self {
        self.patched_tag = Some(tag.into());
        self
    }

    pub fn with_working_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.working_folder = Some(folder.into());
        self
    }

    /// Requests a VEX document in `format` written to `output`.
    pub fn with_vex_output(mut self, output: impl Into<PathBuf>, format: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self.format = format.into();
        self
    }

    pub fn with_ignore_errors(mut self, ignore: bool) -> Self {
        self.ignore_errors = ignore;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backend(mut self, backend: BackendOptions) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_export_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.export_path = path.into();
        self
    }

    pub fn with_source_policy(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_policy = Some(path.into());
        self
    }

    /// Fills `source_policy` from the environment, if set and not empty.
    pub fn with_source_policy_from_env(mut self) -> Self {
        if let Some(path) = std::env::var_os(SOURCE_POLICY_ENV).filter(|v| !v.is_empty()) {
            self.source_policy = Some(PathBuf::from(path));
        }
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Checks settings that cannot be validated by the type system.
    pub fn validate(&self) -> Result<(), PatchError> {
        if self.image.trim().is_empty() {
            return Err(PatchError::Config("image reference is required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(PatchError::Config("timeout must be greater than zero".to_string()));
        }
        if self.export_path.as_os_str().is_empty() {
            return Err(PatchError::Config("export path is required".to_string()));
        }
        if self.report.is_some() && self.scanner.is_empty() {
            return Err(PatchError::Config("scanner is required with a report".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let request = PatchRequest::new("alpine:3.19");
        assert_eq!(request.scanner, "trivy");
        assert_eq!(request.format, "openvex");
        assert_eq!(request.timeout, Duration::from_secs(300));
        assert_eq!(request.export_path, PathBuf::from("patched.tar"));
        assert!(!request.debug);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let request = PatchRequest::new("ubuntu:22.04")
            .with_report("report.json", "native")
            .with_patched_tag("fixed")
            .with_vex_output("vex.json", "openvex")
            .with_ignore_errors(true)
            .with_timeout(Duration::from_secs(30))
            .with_debug(true);

        assert_eq!(request.report, Some(PathBuf::from("report.json")));
        assert_eq!(request.scanner, "native");
        assert_eq!(request.patched_tag.as_deref(), Some("fixed"));
        assert!(request.ignore_errors);
        assert!(request.debug);
    }

    #[test]
    fn test_validation() {
        assert!(PatchRequest::new(" ").validate().is_err());
        assert!(PatchRequest::new("alpine")
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PatchRequest::new("alpine").with_export_path("").validate().is_err());
    }

    // Only test touching the policy variable; tests share the process env.
    #[test]
    fn test_source_policy_from_env() {
        std::env::set_var(SOURCE_POLICY_ENV, "/etc/patch/policy.json");
        let request = PatchRequest::new("alpine").with_source_policy_from_env();
        assert_eq!(request.source_policy, Some(PathBuf::from("/etc/patch/policy.json")));

        std::env::set_var(SOURCE_POLICY_ENV, "");
        let request = PatchRequest::new("alpine")
            .with_source_policy("explicit.json")
            .with_source_policy_from_env();
        assert_eq!(request.source_policy, Some(PathBuf::from("explicit.json")));

        std::env::remove_var(SOURCE_POLICY_ENV);
        assert!(PatchRequest::new("alpine")
            .with_source_policy_from_env()
            .source_policy
            .is_none());
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        std::fs::write(
            &path,
            r#"{"image": "nginx:1.25", "timeout_secs": 42, "ignore_errors": true,
                "backend": {"address": "tcp://127.0.0.1:1234"}}"#,
        )
        .unwrap();

        let request = PatchRequest::from_json_file(&path).unwrap();
        assert_eq!(request.image, "nginx:1.25");
        assert_eq!(request.timeout, Duration::from_secs(42));
        assert!(request.ignore_errors);
        assert_eq!(request.scanner, "trivy");
        assert_eq!(request.backend.address.as_deref(), Some("tcp://127.0.0.1:1234"));

        std::fs::write(&path, r#"{"image": "nginx", "timeout_secs": 0}"#).unwrap();
        assert!(matches!(
            PatchRequest::from_json_file(&path),
            Err(PatchError::Config(_))
        ));
    }
}
