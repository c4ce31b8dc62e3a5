//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Combining an existing lockfile with a partial re-resolution.
//!
//! A partial update re-resolves only the touched packages (and whatever
//! they transitively pull in); every other entry is carried over
//! unchanged, which is what keeps a one-package update from disturbing
//! the rest of the project. A kept entry that can no longer accept a
//! re-resolved version escalates to an error instead of producing an
//! inconsistent lockfile.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use miette::Diagnostic;
use semver::Version;
use thiserror::Error;
use tracing::debug;

use super::{Lockfile, LockfileEntry};
use crate::constraint::VersionConstraint;

pub type Result<T> = std::result::Result<T, MergeError>;

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error(
        "kept package {name} declares {dependency} {declared}, which re-resolved {dependency} {resolved} no longer satisfies"
    )]
    #[diagnostic(
        code(apm::merge::dependency_conflict),
        help("Re-resolve the whole project instead of only the touched packages")
    )]
    DependencyConflict {
        name: String,
        dependency: String,
        declared: VersionConstraint,
        resolved: Version,
    },
}

/// Merge a fresh partial resolution into an existing lockfile.
///
/// `fresh` covers `touched` and its transitive closure; those entries
/// win. Everything else in `existing` is kept verbatim, then entries no
/// current root can reach are pruned.
pub fn merge(
    existing: &Lockfile,
    fresh: &Lockfile,
    touched: &BTreeSet<String>,
    roots: &BTreeMap<String, VersionConstraint>,
) -> Result<Lockfile> {
    let mut entries: BTreeMap<String, LockfileEntry> = BTreeMap::new();

    for (name, entry) in &fresh.entries {
        entries.insert(name.clone(), entry.clone());
    }

    for (name, entry) in &existing.entries {
        if entries.contains_key(name) {
            continue;
        }
        // A kept entry must still accept every re-resolved version it
        // depends on; otherwise the partial update is unsound.
        for (dependency, declared) in &entry.dependencies {
            if let Some(fresh_entry) = fresh.entries.get(dependency) {
                if !declared.matches(&fresh_entry.version) {
                    return Err(MergeError::DependencyConflict {
                        name: name.clone(),
                        dependency: dependency.clone(),
                        declared: declared.clone(),
                        resolved: fresh_entry.version.clone(),
                    });
                }
            }
        }
        entries.insert(name.clone(), entry.clone());
    }

    let reachable = reachable_from(&entries, roots);
    let before = entries.len();
    entries.retain(|name, _| reachable.contains(name));
    if entries.len() != before {
        debug!(
            dropped = before - entries.len(),
            touched = touched.len(),
            "pruned orphaned lockfile entries"
        );
    }

    Ok(Lockfile {
        schema_version: super::SCHEMA_VERSION,
        generated_at: fresh.generated_at,
        entries,
    })
}

fn reachable_from(
    entries: &BTreeMap<String, LockfileEntry>,
    roots: &BTreeMap<String, VersionConstraint>,
) -> BTreeSet<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<&str> = roots.keys().map(String::as_str).collect();
    while let Some(name) = queue.pop_front() {
        if !seen.insert(name.to_string()) {
            continue;
        }
        if let Some(entry) = entries.get(name) {
            queue.extend(entry.dependencies.keys().map(String::as_str));
        }
    }
    seen
}
