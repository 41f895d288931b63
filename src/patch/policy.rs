//! Source-policy admission check.
//!
//! Source policies redirect base image sources. Some RPM distributions lack
//! the tooling image the patch process needs in their repositories, so
//! policies pointing at them are rejected before any build work starts.

use crate::patch::error::PatchError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable naming the source-policy file.
pub const SOURCE_POLICY_ENV: &str = "EXPERIMENTAL_BUILDKIT_SOURCE_POLICY";

/// Identifier fragments of incompatible distributions, with display names
/// and the repositories lacking the tooling image.
const INCOMPATIBLE_SOURCES: &[(&str, &str, &str)] = &[
    ("redhat", "RedHat", "RHEL"),
    ("rockylinux", "RockyLinux", "RockyLinux"),
    ("alma", "AlmaLinux", "AlmaLinux"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePolicy {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub selector: SourceSelector,
    #[serde(default)]
    pub updates: Option<SourceSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSelector {
    #[serde(default)]
    pub identifier: String,
}

impl SourcePolicy {
    /// Reads a JSON source-policy document.
    pub fn from_file(path: &Path) -> Result<Self, PatchError> {
        let content = std::fs::read(path).map_err(|e| {
            PatchError::Config(format!("failed to read source policy {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&content).map_err(|e| {
            PatchError::Config(format!("invalid source policy {}: {}", path.display(), e))
        })
    }

    /// Rejects policies whose update sources are known to be incompatible.
    ///
    /// Rules are checked in order; the first incompatible one is reported.
    pub fn validate(&self) -> Result<(), PatchError> {
        for rule in &self.rules {
            let Some(updates) = &rule.updates else {
                continue;
            };
            if let Some((_, distribution, repos)) = INCOMPATIBLE_SOURCES
                .iter()
                .find(|(fragment, _, _)| updates.identifier.contains(fragment))
            {
                return Err(PatchError::Policy {
                    distribution: distribution.to_string(),
                    repos: repos.to_string(),
                });
            }
        }

        debug!(rules = self.rules.len(), "Source policy admitted");
        Ok(())
    }
}

/// Loads the policy at `path` (if any) and validates it.
pub fn check_source_policy(path: Option<&Path>) -> Result<Option<SourcePolicy>, PatchError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let policy = SourcePolicy::from_file(path)?;
    policy.validate()?;
    Ok(Some(policy))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(identifiers: &[&str]) -> SourcePolicy {
        SourcePolicy {
            rules: identifiers
                .iter()
                .map(|id| PolicyRule {
                    action: "CONVERT".to_string(),
                    selector: SourceSelector {
                        identifier: "docker-image://docker.io/library/alpine:latest".to_string(),
                    },
                    updates: Some(SourceSelector {
                        identifier: id.to_string(),
                    }),
                })
                .collect(),
        }
    }

    #[test]
    fn test_rejects_incompatible_distributions() {
        let cases = [
            ("docker-image://registry.access.redhat.com/ubi9", "RedHat", "RHEL"),
            ("docker-image://docker.io/rockylinux/rockylinux:9", "RockyLinux", "RockyLinux"),
            ("docker-image://docker.io/library/almalinux:9", "AlmaLinux", "AlmaLinux"),
        ];

        for (identifier, expected, expected_repos) in cases {
            match policy(&[identifier]).validate() {
                Err(PatchError::Policy { distribution, repos }) => {
                    assert_eq!(distribution, expected);
                    assert_eq!(repos, expected_repos);
                }
                other => panic!("unexpected result for {identifier}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_any_rule_can_trigger_rejection() {
        let p = policy(&["docker-image://docker.io/library/alpine:3.19", "docker-image://almalinux:8"]);
        assert!(matches!(p.validate(), Err(PatchError::Policy { .. })));
    }

    #[test]
    fn test_admits_compatible_policies() {
        assert!(policy(&["docker-image://docker.io/library/busybox:1.36"]).validate().is_ok());
        assert!(SourcePolicy::default().validate().is_ok());
        assert!(check_source_policy(None).unwrap().is_none());
    }

    #[test]
    fn test_policy_error_message_names_distribution() {
        let err = policy(&["rockylinux:9"]).validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("RockyLinux is not supported via source policies"));
        assert!(message.contains("Please use a different RPM-based image"));

        let err = policy(&["docker-image://registry.redhat.io/ubi8"]).validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "RedHat is not supported via source policies due to BusyBox not being in the RHEL repos\n\
             Please use a different RPM-based image"
        );
    }

    #[test]
    fn test_loads_policy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{"rules":[{"action":"CONVERT","selector":{"identifier":"docker-image://alpine"},"updates":{"identifier":"docker-image://registry.redhat.io/ubi8"}}]}"#,
        )
        .unwrap();

        assert!(matches!(
            check_source_policy(Some(&path)),
            Err(PatchError::Policy { .. })
        ));

        std::fs::write(
            &path,
            r#"{"rules":[{"action":"CONVERT","selector":{"identifier":"docker-image://docker.io/library/alpine:3.19"},"updates":{"identifier":"docker-image://mirror.example.com/library/alpine:3.19"}}]}"#,
        )
        .unwrap();
        let admitted = check_source_policy(Some(&path)).unwrap().unwrap();
        assert_eq!(admitted.rules[0].action, "CONVERT");
        assert_eq!(
            admitted.rules[0].updates.as_ref().unwrap().identifier,
            "docker-image://mirror.example.com/library/alpine:3.19"
        );

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            check_source_policy(Some(&path)),
            Err(PatchError::Config(_))
        ));
    }
}
