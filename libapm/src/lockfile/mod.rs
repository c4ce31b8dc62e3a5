//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! The persisted record of a resolution and its codec.
//!
//! A lockfile is a plain value: it is read whole at the start of an
//! operation and written once at the end. Entries are keyed by package
//! name in a `BTreeMap`, so serialization is sorted and diff-friendly;
//! identical inputs (including the generation timestamp, which is an
//! explicit argument rather than ambient clock state) produce identical
//! bytes.
//!
//! The lockfile is a single-writer resource: exactly one client process
//! is assumed to write a given project's lockfile at a time. Writes go
//! through a temp file and an atomic rename, so a partially written
//! lockfile is never observable at the final path.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::constraint::VersionConstraint;
use crate::digest::Digest;
use crate::metadata::PackageKind;
use crate::resolver::{DependencyGraph, ResolvedNode};

pub mod merge;
pub mod verify;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// File name of the lockfile inside a project directory.
pub const LOCKFILE_NAME: &str = "apm.lock";

pub type Result<T> = std::result::Result<T, LockfileError>;

#[derive(Debug, Error, Diagnostic)]
pub enum LockfileError {
    #[error("lockfile schema version {found} is not supported; this build reads version {supported}")]
    #[diagnostic(
        code(apm::lockfile::schema_mismatch),
        help("Re-generate the lockfile with a matching apm release instead of editing it by hand")
    )]
    SchemaMismatch { found: u32, supported: u32 },

    #[error("lockfile is malformed: {details}")]
    #[diagnostic(code(apm::lockfile::malformed))]
    Malformed { details: String },

    #[error("no artifact information for {name}; the registry did not report a source and digest")]
    #[diagnostic(code(apm::lockfile::missing_artifact))]
    MissingArtifact { name: String },

    #[error("lockfile serialization error: {0}")]
    #[diagnostic(code(apm::lockfile::json))]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(apm::lockfile::io))]
    Io(#[from] std::io::Error),
}

/// Where a resolved artifact lives and what its content hashes to.
///
/// Supplied from the registry/installer side; the resolver records it but
/// never fetches artifact bytes itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactInfo {
    pub resolved: String,
    pub integrity: Digest,
}

/// One pinned package.
///
/// `dependencies` preserves the ranges exactly as the package declared
/// them at resolution time; freshness and merge checks compare against
/// these to detect drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockfileEntry {
    pub version: Version,
    pub resolved: String,
    pub integrity: Digest,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionConstraint>,
    pub kind: PackageKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, LockfileEntry>,
}

impl Lockfile {
    /// Build a lockfile from a resolved graph, one entry per node.
    ///
    /// `artifact` maps a node to its source locator and integrity digest;
    /// a `None` from it aborts the conversion, since an entry without an
    /// artifact record could never be verified at install time.
    pub fn from_graph<F>(
        graph: &DependencyGraph,
        generated_at: DateTime<Utc>,
        mut artifact: F,
    ) -> Result<Self>
    where
        F: FnMut(&ResolvedNode) -> Option<ArtifactInfo>,
    {
        let mut entries = BTreeMap::new();
        for node in graph.nodes.values() {
            let info = artifact(node).ok_or_else(|| LockfileError::MissingArtifact {
                name: node.name.clone(),
            })?;
            entries.insert(
                node.name.clone(),
                LockfileEntry {
                    version: node.version.clone(),
                    resolved: info.resolved,
                    integrity: info.integrity,
                    dependencies: node.dependencies.clone(),
                    kind: node.kind,
                },
            );
        }
        Ok(Lockfile {
            schema_version: SCHEMA_VERSION,
            generated_at,
            entries,
        })
    }

    /// Parse lockfile bytes, refusing schema versions this build does not
    /// understand rather than guessing at their meaning.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| LockfileError::Malformed {
                details: e.to_string(),
            })?;
        let found = value
            .get("schemaVersion")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| LockfileError::Malformed {
                details: "missing schemaVersion field".to_string(),
            })? as u32;
        if found != SCHEMA_VERSION {
            return Err(LockfileError::SchemaMismatch {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        serde_json::from_value(value).map_err(|e| LockfileError::Malformed {
            details: e.to_string(),
        })
    }

    /// Stable serialized form: pretty JSON, entries sorted by name, one
    /// trailing newline.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::parse(&fs::read(path)?)
    }

    /// Write the lockfile in a single atomic step: the bytes land in a
    /// temp file in the target directory and are renamed over `path`.
    pub fn store(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or_else(|| Path::new(".")))?;
        tmp.write_all(&bytes)?;
        tmp.persist(path).map_err(|e| LockfileError::Io(e.error))?;
        info!(path = %path.display(), entries = self.entries.len(), "wrote lockfile");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::VersionConstraint;
    use crate::digest::DigestAlgorithm;
    use crate::resolver::stub::StubProvider;
    use crate::resolver::Resolver;

    pub(crate) fn entry(version: &str, deps: &[(&str, &str)]) -> LockfileEntry {
        LockfileEntry {
            version: version.parse().unwrap(),
            resolved: format!("https://registry.test/blobs/x/{}", version),
            integrity: Digest::from_bytes(version.as_bytes(), DigestAlgorithm::Sha256),
            dependencies: deps
                .iter()
                .map(|(n, c)| (n.to_string(), c.parse().unwrap()))
                .collect(),
            kind: PackageKind::Prompt,
        }
    }

    pub(crate) fn lockfile(entries: Vec<(&str, LockfileEntry)>) -> Lockfile {
        Lockfile {
            schema_version: SCHEMA_VERSION,
            generated_at: "2026-08-05T12:00:00Z".parse().unwrap(),
            entries: entries
                .into_iter()
                .map(|(n, e)| (n.to_string(), e))
                .collect(),
        }
    }

    fn graph_artifact(node: &ResolvedNode) -> Option<ArtifactInfo> {
        let resolved = format!("https://registry.test/blobs/{}/{}", node.name, node.version);
        Some(ArtifactInfo {
            integrity: Digest::from_bytes(resolved.as_bytes(), DigestAlgorithm::Sha256),
            resolved,
        })
    }

    #[test]
    fn codec_round_trip() {
        let lf = lockfile(vec![
            ("alpha", entry("1.0.0", &[("beta", "^2")])),
            ("beta", entry("2.3.1", &[])),
        ]);
        let bytes = lf.to_bytes().unwrap();
        let back = Lockfile::parse(&bytes).unwrap();
        assert_eq!(lf, back);
    }

    #[test]
    fn serialized_entries_are_sorted_by_name() {
        let lf = lockfile(vec![
            ("zeta", entry("1.0.0", &[])),
            ("alpha", entry("1.0.0", &[])),
            ("midway", entry("1.0.0", &[])),
        ]);
        let text = String::from_utf8(lf.to_bytes().unwrap()).unwrap();
        let alpha = text.find("\"alpha\"").unwrap();
        let midway = text.find("\"midway\"").unwrap();
        let zeta = text.find("\"zeta\"").unwrap();
        assert!(alpha < midway && midway < zeta);
    }

    #[test]
    fn future_schema_version_is_a_hard_error() {
        let lf = lockfile(vec![("alpha", entry("1.0.0", &[]))]);
        let text = String::from_utf8(lf.to_bytes().unwrap()).unwrap();
        let bumped = text.replace("\"schemaVersion\": 1", "\"schemaVersion\": 2");
        let err = Lockfile::parse(bumped.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            LockfileError::SchemaMismatch {
                found: 2,
                supported: SCHEMA_VERSION
            }
        ));
    }

    #[test]
    fn missing_schema_version_is_malformed() {
        let err = Lockfile::parse(b"{\"entries\": {}}").unwrap_err();
        assert!(matches!(err, LockfileError::Malformed { .. }));
        let err = Lockfile::parse(b"not json at all").unwrap_err();
        assert!(matches!(err, LockfileError::Malformed { .. }));
    }

    #[test]
    fn resolving_twice_yields_identical_bytes() {
        let mut provider = StubProvider::new();
        provider.publish("app", "1.0.0", &[("lib", "^1"), ("rules", "^2")]);
        provider.publish("lib", "1.2.0", &[("rules", "^2")]);
        provider.publish("rules", "2.0.1", &[]);

        let resolver = Resolver::new(&provider);
        let when = "2026-08-05T12:00:00Z".parse().unwrap();
        let constraint: VersionConstraint = "^1".parse().unwrap();

        let first = resolver.resolve("app", &constraint).unwrap();
        let second = resolver.resolve("app", &constraint).unwrap();
        let a = Lockfile::from_graph(&first, when, graph_artifact).unwrap();
        let b = Lockfile::from_graph(&second, when, graph_artifact).unwrap();
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn missing_artifact_aborts_conversion() {
        let mut provider = StubProvider::new();
        provider.publish("app", "1.0.0", &[]);
        let graph = Resolver::new(&provider)
            .resolve("app", &"^1".parse().unwrap())
            .unwrap();
        let when = "2026-08-05T12:00:00Z".parse().unwrap();
        let err = Lockfile::from_graph(&graph, when, |_| None).unwrap_err();
        assert!(matches!(err, LockfileError::MissingArtifact { name } if name == "app"));
    }

    #[test]
    fn store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCKFILE_NAME);
        let lf = lockfile(vec![("alpha", entry("1.0.0", &[]))]);
        lf.store(&path).unwrap();
        let back = Lockfile::load(&path).unwrap();
        assert_eq!(lf, back);
    }
}
