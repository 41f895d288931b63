//! Image reference parsing and patched tag computation.
//!
//! Parses references like `ghcr.io/org/app:1.2` or `ubuntu@sha256:...` and
//! derives the name the patched image is exported under.

use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Registry assumed when the reference names none.
const DEFAULT_DOMAIN: &str = "docker.io";

/// Namespace for single-component names on the default registry.
const DEFAULT_NAMESPACE: &str = "library";

/// Tag applied to name-only references.
const DEFAULT_TAG: &str = "latest";

/// Suffix (or whole tag, for digest-only references) of patched images.
pub const PATCHED_TAG_SUFFIX: &str = "patched";

const MAX_NAME_LENGTH: usize = 255;
const MAX_TAG_LENGTH: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("empty image reference")]
    Empty,
    #[error("invalid reference format '{reference}': {reason}")]
    InvalidName { reference: String, reason: String },
    #[error("invalid digest '{0}': expected algorithm:hex")]
    InvalidDigest(String),
    #[error("invalid tag format: {reason} with patched tag {tag}")]
    InvalidTag { tag: String, reason: String },
}

/// Parsed `repository[:tag][@digest]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository as written by the caller, without tag or digest
    pub repository: String,
    /// Registry hostname (e.g. "docker.io", "ghcr.io")
    pub domain: String,
    /// Repository path on the registry (e.g. "library/ubuntu")
    pub path: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parses an image reference without applying any default tag.
    pub fn parse(reference: &str) -> Result<Self, ReferenceError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                validate_digest(digest)?;
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A tag colon can only appear after the last slash; an earlier one
        // belongs to a registry port.
        let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (repository, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(tag) = &tag {
            validate_tag(tag).map_err(|reason| ReferenceError::InvalidName {
                reference: reference.to_string(),
                reason,
            })?;
        }

        let (domain, path) = split_domain(repository);
        validate_path(&path).map_err(|reason| ReferenceError::InvalidName {
            reference: reference.to_string(),
            reason,
        })?;

        if domain.len() + 1 + path.len() > MAX_NAME_LENGTH {
            return Err(ReferenceError::InvalidName {
                reference: reference.to_string(),
                reason: format!("repository name must not be more than {MAX_NAME_LENGTH} characters"),
            });
        }

        Ok(Self {
            repository: repository.to_string(),
            domain,
            path,
            tag,
            digest,
        })
    }

    pub fn is_name_only(&self) -> bool {
        self.tag.is_none() && self.digest.is_none()
    }

    /// Applies the `latest` tag to name-only references.
    pub fn with_default_tag(mut self) -> Self {
        if self.is_name_only() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }

    /// Fully qualified repository name, e.g. `docker.io/library/ubuntu`.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.domain, self.path)
    }

    /// Checks that `tag` can be applied to this repository.
    pub fn validate_tag_for(&self, tag: &str) -> Result<(), ReferenceError> {
        validate_tag(tag).map_err(|reason| ReferenceError::InvalidTag {
            tag: tag.to_string(),
            reason,
        })
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Source reference and the name its patched image is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchTarget {
    pub source: ImageReference,
    pub patched_tag: String,
    /// `<repository>:<patched tag>`
    pub patched_image: String,
}

impl PatchTarget {
    /// Resolves the source reference and computes the output tag.
    ///
    /// An explicit `patched_tag` is used verbatim. Otherwise the output tag
    /// is `<source tag>-patched`, or `patched` for digest-only references.
    pub fn resolve(image: &str, patched_tag: Option<&str>) -> Result<Self, ReferenceError> {
        let mut source = ImageReference::parse(image)?;
        if source.is_name_only() {
            warn!(image, "Image name has no tag or digest, using latest as tag");
            source = source.with_default_tag();
        }

        let patched_tag = match patched_tag.filter(|t| !t.is_empty()) {
            Some(tag) => tag.to_string(),
            None => match &source.tag {
                Some(tag) => format!("{}-{}", tag, PATCHED_TAG_SUFFIX),
                None => {
                    warn!(
                        "No output tag specified for digest-referenced image, defaulting to `{}`",
                        PATCHED_TAG_SUFFIX
                    );
                    PATCHED_TAG_SUFFIX.to_string()
                }
            },
        };

        source.validate_tag_for(&patched_tag)?;
        let patched_image = format!("{}:{}", source.repository, patched_tag);

        Ok(Self {
            source,
            patched_tag,
            patched_image,
        })
    }

    /// Tag of the source image, if it was referenced by tag.
    pub fn source_tag(&self) -> Option<&str> {
        self.source.tag.as_deref()
    }
}

fn split_domain(repository: &str) -> (String, String) {
    if let Some((first, rest)) = repository.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (first.to_string(), rest.to_string());
        }
    }

    let path = if repository.contains('/') {
        repository.to_string()
    } else {
        format!("{}/{}", DEFAULT_NAMESPACE, repository)
    };
    (DEFAULT_DOMAIN.to_string(), path)
}

fn validate_path(path: &str) -> Result<(), String> {
    for component in path.split('/') {
        if component.is_empty() {
            return Err("empty path component".to_string());
        }
        let valid_chars = component
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-'));
        if !valid_chars {
            return Err(format!(
                "repository component '{}' must be lowercase alphanumeric",
                component
            ));
        }
        let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
        if !component.starts_with(alnum) || !component.ends_with(alnum) {
            return Err(format!(
                "repository component '{}' must start and end with an alphanumeric character",
                component
            ));
        }
    }
    Ok(())
}

fn validate_tag(tag: &str) -> Result<(), String> {
    if tag.is_empty() {
        return Err("tag must not be empty".to_string());
    }
    if tag.len() > MAX_TAG_LENGTH {
        return Err(format!("tag must not be more than {MAX_TAG_LENGTH} characters"));
    }
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    if !tag.starts_with(word) {
        return Err(format!("tag '{}' must start with a word character", tag));
    }
    if !tag.chars().all(|c| word(c) || c == '.' || c == '-') {
        return Err(format!("tag '{}' contains invalid characters", tag));
    }
    Ok(())
}

fn validate_digest(digest: &str) -> Result<(), ReferenceError> {
    let invalid = || ReferenceError::InvalidDigest(digest.to_string());
    let (algorithm, encoded) = digest.split_once(':').ok_or_else(invalid)?;
    if algorithm.is_empty()
        || !algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '+' | '.' | '_' | '-'))
    {
        return Err(invalid());
    }
    if encoded.len() < 32 || !encoded.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_tagged_reference_gets_suffixed_tag() {
        let target = PatchTarget::resolve("ubuntu:20.04", None).unwrap();
        assert_eq!(target.patched_tag, "20.04-patched");
        assert_eq!(target.patched_image, "ubuntu:20.04-patched");
        assert_eq!(target.source.qualified_name(), "docker.io/library/ubuntu");
    }

    #[test]
    fn test_digest_only_reference_gets_plain_patched_tag() {
        let target = PatchTarget::resolve(&format!("ubuntu@{}", DIGEST), None).unwrap();
        assert_eq!(target.source_tag(), None);
        assert_eq!(target.patched_tag, "patched");
        assert_eq!(target.patched_image, "ubuntu:patched");
    }

    #[test]
    fn test_name_only_reference_defaults_to_latest() {
        let target = PatchTarget::resolve("nginx", None).unwrap();
        assert_eq!(target.source_tag(), Some("latest"));
        assert_eq!(target.patched_image, "nginx:latest-patched");
        assert_eq!(target.source.to_string(), "docker.io/library/nginx:latest");
    }

    #[test]
    fn test_explicit_tag_used_verbatim() {
        let target = PatchTarget::resolve("ubuntu:20.04", Some("hotfix")).unwrap();
        assert_eq!(target.patched_image, "ubuntu:hotfix");

        let target = PatchTarget::resolve(&format!("ubuntu@{}", DIGEST), Some("v2")).unwrap();
        assert_eq!(target.patched_image, "ubuntu:v2");

        // Empty explicit tag behaves like no tag
        let target = PatchTarget::resolve("ubuntu:22.04", Some("")).unwrap();
        assert_eq!(target.patched_tag, "22.04-patched");
    }

    #[test]
    fn test_invalid_patched_tag_is_reference_error() {
        let err = PatchTarget::resolve("ubuntu:20.04", Some("-bad")).unwrap_err();
        match err {
            ReferenceError::InvalidTag { tag, .. } => assert_eq!(tag, "-bad"),
            other => panic!("unexpected error: {other:?}"),
        }

        let long = "a".repeat(129);
        assert!(PatchTarget::resolve("ubuntu:20.04", Some(&long)).is_err());
    }

    #[test]
    fn test_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/team/app:1.0").unwrap();
        assert_eq!(r.domain, "localhost:5000");
        assert_eq!(r.path, "team/app");
        assert_eq!(r.tag.as_deref(), Some("1.0"));

        let target = PatchTarget::resolve("localhost:5000/team/app", None).unwrap();
        assert_eq!(target.patched_image, "localhost:5000/team/app:latest-patched");
    }

    #[test]
    fn test_tag_and_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/app:1.2@{}", DIGEST)).unwrap();
        assert_eq!(r.domain, "ghcr.io");
        assert_eq!(r.tag.as_deref(), Some("1.2"));
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_rejects_malformed_references() {
        assert_eq!(ImageReference::parse("  "), Err(ReferenceError::Empty));
        assert!(matches!(
            ImageReference::parse("Ubuntu:20.04"),
            Err(ReferenceError::InvalidName { .. })
        ));
        assert!(matches!(
            ImageReference::parse("ubuntu@sha256:xyz"),
            Err(ReferenceError::InvalidDigest(_))
        ));
        assert!(ImageReference::parse("ubuntu:").is_err());
        assert!(ImageReference::parse("org//app").is_err());
    }
}
