//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constraint::VersionConstraint;

/// File name of the project manifest inside a project directory.
pub const MANIFEST_NAME: &str = "apm.json";

pub type Result<T> = std::result::Result<T, ManifestError>;

#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    #[error("I/O error: {0}")]
    #[diagnostic(
        code(apm::manifest::io),
        help("Check that the project directory contains an apm.json")
    )]
    Io(#[from] std::io::Error),

    #[error("manifest is not valid JSON: {0}")]
    #[diagnostic(code(apm::manifest::malformed))]
    Json(#[from] serde_json::Error),

    #[error("{name:?} is not a valid package name")]
    #[diagnostic(
        code(apm::manifest::invalid_name),
        help("Names are lowercase words separated by '-' within a segment and '/' between segments, e.g. review/security-rules")
    )]
    InvalidName { name: String },
}

/// The project-side declaration of top-level dependencies.
///
/// This is the set of "currently declared constraints" that freshness
/// checks and resolutions run against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionConstraint>,
}

impl PackageManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let manifest: PackageManifest = serde_json::from_slice(&fs::read(path)?)?;
        validate_name(&manifest.name)?;
        for name in manifest.dependencies.keys() {
            validate_name(name)?;
        }
        Ok(manifest)
    }

    pub fn store(&self, path: &Path) -> Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        fs::write(path, bytes)?;
        Ok(())
    }
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*(/[a-z0-9]+(-[a-z0-9]+)*)*$")
            .expect("name pattern compiles")
    })
}

/// Package names are lowercase dash-separated words, optionally namespaced
/// with '/' segments.
pub fn validate_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ManifestError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_namespaced_names() {
        for name in [
            "core",
            "lint-prompts",
            "review/security-rules",
            "org2/sub/agent-pack",
        ] {
            assert!(validate_name(name).is_ok(), "rejected {}", name);
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "",
            "UpperCase",
            "double--dash",
            "/leading",
            "trailing/",
            "spa ce",
            "under_score",
        ] {
            assert!(validate_name(name).is_err(), "accepted {}", name);
        }
    }

    #[test]
    fn load_and_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_NAME);

        let mut manifest = PackageManifest {
            name: "demo-project".to_string(),
            dependencies: BTreeMap::new(),
        };
        manifest.dependencies.insert(
            "review/security-rules".to_string(),
            "^1.4".parse().unwrap(),
        );
        manifest.store(&path).unwrap();

        let back = PackageManifest::load(&path).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn load_rejects_invalid_dependency_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_NAME);
        fs::write(
            &path,
            r#"{ "name": "demo", "dependencies": { "Not A Name": "^1" } }"#,
        )
        .unwrap();
        let err = PackageManifest::load(&path).unwrap_err();
        assert!(matches!(err, ManifestError::InvalidName { .. }));
    }
}
