use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Set of package updates to apply to one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    pub metadata: Metadata,
    #[serde(default)]
    pub updates: Vec<UpdatePackage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub os: OsInfo,
    #[serde(default)]
    pub config: ManifestConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsInfo {
    #[serde(rename = "type")]
    pub os_type: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestConfig {
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePackage {
    pub name: String,
    #[serde(rename = "installedVersion")]
    pub installed_version: String,
    #[serde(rename = "fixedVersion")]
    pub fixed_version: String,
    #[serde(rename = "vulnerabilityID", default, skip_serializing_if = "String::is_empty")]
    pub vulnerability_id: String,
}

impl UpdateManifest {
    /// Copy of this manifest's OS and architecture metadata with no updates.
    pub fn empty_like(&self) -> Self {
        Self {
            metadata: self.metadata.clone(),
            updates: Vec::new(),
        }
    }

    /// OS identity as recorded in the report metadata.
    pub fn os_descriptor(&self) -> OsDescriptor {
        OsDescriptor {
            os_type: self.metadata.os.os_type.clone(),
            version: self.metadata.os.version.clone(),
        }
    }
}

/// Canonical OS type plus verbatim version, as detected or as reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsDescriptor {
    pub os_type: String,
    pub version: String,
}

impl fmt::Display for OsDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.os_type, self.version)
    }
}

/// OS families a package manager can be dispatched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OsFamily {
    Alpine,
    Debian,
    Ubuntu,
    Amazon,
    Centos,
    CblMariner,
    Azurelinux,
    Redhat,
    Rocky,
    Oracle,
    Alma,
}

impl OsFamily {
    pub const ALL: [OsFamily; 11] = [
        OsFamily::Alpine,
        OsFamily::Debian,
        OsFamily::Ubuntu,
        OsFamily::Amazon,
        OsFamily::Centos,
        OsFamily::CblMariner,
        OsFamily::Azurelinux,
        OsFamily::Redhat,
        OsFamily::Rocky,
        OsFamily::Oracle,
        OsFamily::Alma,
    ];

    /// Canonical identifier used in manifests and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Alpine => "alpine",
            OsFamily::Debian => "debian",
            OsFamily::Ubuntu => "ubuntu",
            OsFamily::Amazon => "amazon",
            OsFamily::Centos => "centos",
            OsFamily::CblMariner => "cbl-mariner",
            OsFamily::Azurelinux => "azurelinux",
            OsFamily::Redhat => "redhat",
            OsFamily::Rocky => "rocky",
            OsFamily::Oracle => "oracle",
            OsFamily::Alma => "alma",
        }
    }

    /// Package format handled by this family's package manager.
    pub fn package_type(&self) -> &'static str {
        match self {
            OsFamily::Alpine => "apk",
            OsFamily::Debian | OsFamily::Ubuntu => "deb",
            _ => "rpm",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        OsFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == lowered)
            .ok_or_else(|| s.to_string())
    }
}

/// Target platform of the build definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Normalized platform of the running host.
    pub fn host() -> Self {
        Self::normalize(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Maps Rust target names onto OCI platform names.
    pub fn normalize(os: &str, arch: &str) -> Self {
        let os = match os {
            "macos" => "darwin",
            other => other,
        }
        .to_string();

        let (architecture, variant) = match arch {
            "x86_64" | "amd64" => ("amd64", None),
            "x86" | "i386" | "i686" => ("386", None),
            "aarch64" | "arm64" => ("arm64", Some("v8")),
            "arm" | "armv7" => ("arm", Some("v7")),
            "powerpc64" | "ppc64le" => ("ppc64le", None),
            "s390x" => ("s390x", None),
            "riscv64" => ("riscv64", None),
            other => (other, None),
        };

        Self {
            os,
            architecture: architecture.to_string(),
            variant: variant.map(str::to_string),
        }
    }

    /// Image definitions always target linux regardless of the host OS.
    pub fn for_container_target(mut self) -> Self {
        if self.os != "linux" {
            self.os = "linux".to_string();
        }
        self
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_family_round_trips_canonical_names() {
        for family in OsFamily::ALL {
            assert_eq!(family.as_str().parse::<OsFamily>().unwrap(), family);
        }
        assert_eq!("CBL-Mariner".parse::<OsFamily>().unwrap(), OsFamily::CblMariner);
        assert_eq!("windows".parse::<OsFamily>().unwrap_err(), "windows");
    }

    #[test]
    fn test_package_types() {
        assert_eq!(OsFamily::Alpine.package_type(), "apk");
        assert_eq!(OsFamily::Ubuntu.package_type(), "deb");
        assert_eq!(OsFamily::Azurelinux.package_type(), "rpm");
    }

    #[test]
    fn test_platform_is_forced_to_linux() {
        let platform = Platform::normalize("macos", "aarch64").for_container_target();
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.architecture, "arm64");
        assert_eq!(platform.to_string(), "linux/arm64/v8");

        let platform = Platform::normalize("windows", "x86_64").for_container_target();
        assert_eq!(platform.to_string(), "linux/amd64");
    }

    #[test]
    fn test_manifest_deserialization() {
        let json = r#"{
            "metadata": {"os": {"type": "debian", "version": "12"}, "config": {"arch": "amd64"}},
            "updates": [{"name": "openssl", "installedVersion": "3.0.1", "fixedVersion": "3.0.9"}]
        }"#;

        let manifest: UpdateManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.metadata.os.os_type, "debian");
        assert_eq!(manifest.updates[0].fixed_version, "3.0.9");
        assert!(manifest.empty_like().updates.is_empty());
        assert_eq!(manifest.os_descriptor().to_string(), "debian 12");
    }
}
