//! OS detection from the image's release descriptor (`/etc/os-release`).

use crate::model::{OsDescriptor, OsFamily};
use crate::patch::error::PatchError;
use crate::traits::{ParseError, ReleaseParser};
use std::collections::HashMap;
use tracing::error;

/// Location of the release descriptor inside the image root filesystem.
pub const OS_RELEASE_PATH: &str = "/etc/os-release";

const NAME_FIELD: &str = "NAME";
const VERSION_FIELD: &str = "VERSION_ID";

/// Ordered name patterns; the first substring match wins.
///
/// Adding or reordering entries changes which image families are
/// recognized, so this table is versioned together with the crate.
pub const OS_NAME_PATTERNS: &[(&str, OsFamily)] = &[
    ("alpine", OsFamily::Alpine),
    ("debian", OsFamily::Debian),
    ("ubuntu", OsFamily::Ubuntu),
    ("amazon", OsFamily::Amazon),
    ("centos", OsFamily::Centos),
    ("mariner", OsFamily::CblMariner),
    ("azure linux", OsFamily::Azurelinux),
    ("red hat", OsFamily::Redhat),
    ("rocky", OsFamily::Rocky),
    ("oracle", OsFamily::Oracle),
    ("alma", OsFamily::Alma),
];

/// Maps a human readable OS name onto its family.
pub fn classify_os_name(name: &str) -> Option<OsFamily> {
    let lowered = name.to_lowercase();
    OS_NAME_PATTERNS
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, family)| *family)
}

/// Detects the OS identity from raw release-descriptor bytes.
pub struct OsDetector<'a> {
    parser: &'a dyn ReleaseParser,
}

impl<'a> OsDetector<'a> {
    pub fn new(parser: &'a dyn ReleaseParser) -> Self {
        Self { parser }
    }

    /// Returns the canonical OS type and the verbatim `VERSION_ID`.
    pub fn detect(&self, content: &[u8]) -> Result<OsDescriptor, PatchError> {
        let fields = self
            .parser
            .parse(content)
            .map_err(PatchError::ReleaseDescriptor)?;

        let name = fields.get(NAME_FIELD).map(String::as_str).unwrap_or_default();
        let family = classify_os_name(name).ok_or_else(|| {
            error!(os_name = name, "unsupported osType");
            PatchError::UnsupportedOs {
                name: name.to_string(),
            }
        })?;

        Ok(OsDescriptor {
            os_type: family.as_str().to_string(),
            version: fields.get(VERSION_FIELD).cloned().unwrap_or_default(),
        })
    }
}

/// Parser for the freedesktop `os-release` key=value format.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsReleaseParser;

impl ReleaseParser for OsReleaseParser {
    fn parse(&self, content: &[u8]) -> Result<HashMap<String, String>, ParseError> {
        let text = std::str::from_utf8(content)
            .map_err(|e| ParseError::InvalidContent(format!("os-release is not UTF-8: {}", e)))?;

        let mut fields = HashMap::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, raw) = line.split_once('=').ok_or_else(|| {
                ParseError::InvalidContent(format!("line {}: missing '='", index + 1))
            })?;
            let key = key.trim();
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ParseError::InvalidContent(format!(
                    "line {}: invalid key '{}'",
                    index + 1,
                    key
                )));
            }

            let value = unquote(raw.trim()).ok_or_else(|| {
                ParseError::InvalidContent(format!("line {}: unterminated quote", index + 1))
            })?;
            fields.insert(key.to_string(), value);
        }

        Ok(fields)
    }
}

fn unquote(raw: &str) -> Option<String> {
    let quote = match raw.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Some(raw.to_string()),
    };

    let inner = &raw[1..];
    let mut value = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quote == '"' => value.push(chars.next()?),
            c if c == quote => return Some(value),
            c => value.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(content: &str) -> Result<OsDescriptor, PatchError> {
        OsDetector::new(&OsReleaseParser).detect(content.as_bytes())
    }

    #[test]
    fn test_every_table_entry_is_detected_in_any_case() {
        let cases = [
            ("Alpine Linux", "alpine"),
            ("Debian GNU/Linux", "debian"),
            ("Ubuntu", "ubuntu"),
            ("Amazon Linux", "amazon"),
            ("CentOS Linux", "centos"),
            ("Common Base Linux Mariner", "cbl-mariner"),
            ("Microsoft Azure Linux", "azurelinux"),
            ("Red Hat Enterprise Linux", "redhat"),
            ("Rocky Linux", "rocky"),
            ("Oracle Linux Server", "oracle"),
            ("AlmaLinux", "alma"),
        ];

        for (name, expected) in cases {
            for variant in [name.to_string(), name.to_uppercase(), name.to_lowercase()] {
                let os = detect(&format!("NAME=\"{}\"\nVERSION_ID=\"1.0\"\n", variant)).unwrap();
                assert_eq!(os.os_type, expected, "name {variant}");
                assert_eq!(os.version, "1.0");
            }
        }
    }

    #[test]
    fn test_first_pattern_wins() {
        // Mentions both debian and ubuntu; debian comes first in the table
        assert_eq!(classify_os_name("Ubuntu (Debian based)"), Some(OsFamily::Debian));
    }

    #[test]
    fn test_unknown_name_is_unsupported() {
        let err = detect("NAME=\"Gentoo\"\nVERSION_ID=2.14\n").unwrap_err();
        match err {
            PatchError::UnsupportedOs { name } => assert_eq!(name, "Gentoo"),
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(matches!(
            detect("VERSION_ID=1\n"),
            Err(PatchError::UnsupportedOs { .. })
        ));
    }

    #[test]
    fn test_version_is_taken_verbatim() {
        let os = detect("NAME=\"Alpine Linux\"\nVERSION_ID=3.19.1_alpha\n").unwrap();
        assert_eq!(os.version, "3.19.1_alpha");

        let os = detect("NAME=Debian\n").unwrap();
        assert_eq!(os.version, "");
    }

    #[test]
    fn test_parser_handles_quotes_and_comments() {
        let content = b"# comment\n\nNAME='Rocky Linux'\nPRETTY_NAME=\"Say \\\"hi\\\"\"\nID=rocky\n";
        let fields = OsReleaseParser.parse(content).unwrap();
        assert_eq!(fields["NAME"], "Rocky Linux");
        assert_eq!(fields["PRETTY_NAME"], "Say \"hi\"");
        assert_eq!(fields["ID"], "rocky");
    }

    #[test]
    fn test_parser_rejects_malformed_content() {
        assert!(OsReleaseParser.parse(b"NAME\n").is_err());
        assert!(OsReleaseParser.parse(b"NAME=\"unterminated\n").is_err());
        assert!(matches!(
            detect("garbage line"),
            Err(PatchError::ReleaseDescriptor(_))
        ));
    }
}
