//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Freshness and integrity checks against a lockfile.
//!
//! Freshness asks whether the lockfile still satisfies the currently
//! declared top-level ranges, using the constraint matcher only; it never
//! re-resolves. Frozen installs turn a stale answer into a hard refusal,
//! which is what makes CI installs reproduce the locked state exactly.

use std::collections::BTreeMap;

use miette::Diagnostic;
use semver::Version;
use thiserror::Error;
use tracing::debug;

use super::{Lockfile, LockfileEntry};
use crate::constraint::VersionConstraint;
use crate::digest::Digest;

pub type Result<T> = std::result::Result<T, VerifyError>;

fn names_display(stale: &[String]) -> String {
    stale.join(", ")
}

#[derive(Debug, Error, Diagnostic)]
pub enum VerifyError {
    #[error(
        "integrity mismatch for {name}: lockfile records {recorded} but the artifact hashes to {actual}"
    )]
    #[diagnostic(
        code(apm::verify::integrity_mismatch),
        help("The artifact is corrupt or has been tampered with; do not install it")
    )]
    IntegrityMismatch {
        name: String,
        recorded: Digest,
        actual: Digest,
    },

    #[error("lockfile is stale for: {}", names_display(.stale))]
    #[diagnostic(
        code(apm::verify::lockfile_stale),
        help("Run a regular install to re-resolve, or revert the manifest change")
    )]
    LockfileStale { stale: Vec<String> },
}

/// Why one declared package makes the lockfile stale.
#[derive(Debug, Clone, PartialEq)]
pub enum StaleReason {
    /// Declared in the manifest but absent from the lockfile.
    Missing { name: String },
    /// Locked at a version the current declared range no longer accepts.
    Unsatisfied {
        name: String,
        declared: VersionConstraint,
        locked: Version,
    },
}

impl StaleReason {
    pub fn name(&self) -> &str {
        match self {
            StaleReason::Missing { name } => name,
            StaleReason::Unsatisfied { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    Fresh,
    Stale(Vec<StaleReason>),
}

impl Freshness {
    /// Frozen-mode adapter: stale becomes a hard error listing the
    /// offending packages.
    pub fn into_result(self) -> Result<()> {
        match self {
            Freshness::Fresh => Ok(()),
            Freshness::Stale(reasons) => Err(VerifyError::LockfileStale {
                stale: reasons.iter().map(|r| r.name().to_string()).collect(),
            }),
        }
    }
}

/// Check every currently declared top-level range against the lockfile.
pub fn verify_fresh(
    lockfile: &Lockfile,
    declared: &BTreeMap<String, VersionConstraint>,
) -> Freshness {
    let mut reasons = Vec::new();
    for (name, constraint) in declared {
        match lockfile.entries.get(name) {
            None => reasons.push(StaleReason::Missing { name: name.clone() }),
            Some(entry) if !constraint.matches(&entry.version) => {
                reasons.push(StaleReason::Unsatisfied {
                    name: name.clone(),
                    declared: constraint.clone(),
                    locked: entry.version.clone(),
                })
            }
            Some(_) => {}
        }
    }
    if reasons.is_empty() {
        debug!("lockfile satisfies all declared constraints");
        Freshness::Fresh
    } else {
        debug!(stale = reasons.len(), "lockfile is stale");
        Freshness::Stale(reasons)
    }
}

/// Byte-wise digest comparison. A mismatch is always fatal for the
/// affected package; it means registry corruption or tampering.
pub fn verify_integrity(name: &str, entry: &LockfileEntry, actual: &Digest) -> Result<()> {
    if entry.integrity == *actual {
        Ok(())
    } else {
        Err(VerifyError::IntegrityMismatch {
            name: name.to_string(),
            recorded: entry.integrity.clone(),
            actual: actual.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{entry, lockfile};
    use super::*;
    use crate::digest::DigestAlgorithm;

    fn declared(pairs: &[(&str, &str)]) -> BTreeMap<String, VersionConstraint> {
        pairs
            .iter()
            .map(|(n, c)| (n.to_string(), c.parse().unwrap()))
            .collect()
    }

    #[test]
    fn satisfied_constraints_are_fresh() {
        let lf = lockfile(vec![
            ("foo", entry("1.2.0", &[])),
            ("bar", entry("2.0.0", &[])),
        ]);
        let result = verify_fresh(&lf, &declared(&[("foo", "^1.0"), ("bar", "^2")]));
        assert_eq!(result, Freshness::Fresh);
    }

    #[test]
    fn widened_major_requirement_is_stale() {
        let lf = lockfile(vec![("foo", entry("1.2.0", &[]))]);
        let result = verify_fresh(&lf, &declared(&[("foo", "^2.0.0")]));
        match result {
            Freshness::Stale(reasons) => {
                assert_eq!(reasons.len(), 1);
                assert_eq!(reasons[0].name(), "foo");
                assert!(matches!(reasons[0], StaleReason::Unsatisfied { .. }));
            }
            Freshness::Fresh => panic!("expected stale"),
        }
    }

    #[test]
    fn newly_declared_package_is_stale() {
        let lf = lockfile(vec![("foo", entry("1.2.0", &[]))]);
        let result = verify_fresh(&lf, &declared(&[("foo", "^1"), ("brand-new", "^1")]));
        match result {
            Freshness::Stale(reasons) => {
                assert_eq!(
                    reasons,
                    vec![StaleReason::Missing {
                        name: "brand-new".to_string()
                    }]
                );
            }
            Freshness::Fresh => panic!("expected stale"),
        }
    }

    #[test]
    fn extra_locked_entries_do_not_affect_freshness() {
        // Transitive dependencies live in the lockfile without being
        // declared at top level.
        let lf = lockfile(vec![
            ("foo", entry("1.2.0", &[("transitive", "^3")])),
            ("transitive", entry("3.1.0", &[])),
        ]);
        let result = verify_fresh(&lf, &declared(&[("foo", "^1")]));
        assert_eq!(result, Freshness::Fresh);
    }

    #[test]
    fn frozen_adapter_lists_stale_names() {
        let lf = lockfile(vec![("foo", entry("1.2.0", &[]))]);
        let err = verify_fresh(&lf, &declared(&[("foo", "^2")]))
            .into_result()
            .unwrap_err();
        match err {
            VerifyError::LockfileStale { stale } => assert_eq!(stale, vec!["foo".to_string()]),
            other => panic!("expected LockfileStale, got {:?}", other),
        }
    }

    #[test]
    fn integrity_round_trip_and_mutation() {
        let bytes = b"artifact contents";
        let mut locked = entry("1.0.0", &[]);
        locked.integrity = Digest::from_bytes(bytes, DigestAlgorithm::Sha256);

        let actual = Digest::from_bytes(bytes, DigestAlgorithm::Sha256);
        assert!(verify_integrity("foo", &locked, &actual).is_ok());

        let tampered = Digest::from_bytes(b"artifact content!", DigestAlgorithm::Sha256);
        let err = verify_integrity("foo", &locked, &tampered).unwrap_err();
        assert!(matches!(err, VerifyError::IntegrityMismatch { name, .. } if name == "foo"));
    }
}
