//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Depth-first, memoized expansion of declared constraints into a closed,
//! acyclic dependency graph.
//!
//! One resolution run pins at most one version per package name. When a
//! second edge reaches an already-resolved name, the existing choice must
//! satisfy the new range too, otherwise the run fails with a conflict that
//! names both requesting edges; there is no side-by-side multi-version
//! install. Cycles are detected on the recursion path and reported with
//! the full chain. Resolution is all-or-nothing: a partial graph is never
//! returned.

use std::collections::BTreeMap;

use miette::Diagnostic;
use semver::Version;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};

use crate::constraint::{best_match, VersionConstraint};
use crate::metadata::{MetadataError, MetadataProvider, PackageKind};

pub type Result<T> = std::result::Result<T, ResolveError>;

/// Bound on the length of any dependency chain, counted per edge. Keeps
/// pathological or adversarial chains from recursing without limit.
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Requester label used for the top-level edges of a resolution.
const ROOT_REQUESTER: &str = "the project manifest";

fn chain_display(path: &[String]) -> String {
    path.join(" -> ")
}

fn versions_display(versions: &[Version]) -> String {
    if versions.is_empty() {
        return "none".to_string();
    }
    versions
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error(
        "no version of {name} satisfies {requested} (required by {requested_by}); available: {}",
        versions_display(.available)
    )]
    #[diagnostic(
        code(apm::resolver::no_satisfying_version),
        help("Widen the declared range or publish a matching version")
    )]
    NoSatisfyingVersion {
        name: String,
        requested: VersionConstraint,
        requested_by: String,
        available: Vec<Version>,
    },

    #[error(
        "conflicting requirements for {name}: {first_requested_by} requires {first_requested} (selected {selected}) but {requested_by} requires {requested}"
    )]
    #[diagnostic(
        code(apm::resolver::version_conflict),
        help("The two ranges admit no common version; only one version per package can be installed")
    )]
    VersionConflict {
        name: String,
        selected: Version,
        first_requested_by: String,
        first_requested: VersionConstraint,
        requested_by: String,
        requested: VersionConstraint,
    },

    #[error("dependency cycle detected: {}", chain_display(.path))]
    #[diagnostic(
        code(apm::resolver::cyclic_dependency),
        help("One of the packages on the cycle must drop its dependency edge")
    )]
    CyclicDependency { path: Vec<String> },

    #[error(
        "dependency chain exceeds the depth limit of {limit}: {}",
        chain_display(.path)
    )]
    #[diagnostic(code(apm::resolver::max_depth_exceeded))]
    MaxDepthExceeded { path: Vec<String>, limit: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Metadata(#[from] MetadataError),
}

/// One resolved package. Edges are name references into the owning graph's
/// table; the declared ranges ride along for drift detection in the
/// lockfile.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedNode {
    pub name: String,
    pub version: Version,
    pub kind: PackageKind,
    pub depth: usize,
    pub dependencies: BTreeMap<String, VersionConstraint>,
}

/// The output of a successful resolution: a flat name-keyed table of
/// nodes. Closed world: every name referenced by a node's dependencies is
/// itself a key of `nodes`.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraph {
    pub root: String,
    pub nodes: BTreeMap<String, ResolvedNode>,
}

impl DependencyGraph {
    pub fn node(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes.get(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

struct ResolutionState {
    /// Names on the current recursion path, in order.
    visiting: Vec<String>,
    resolved: BTreeMap<String, ResolvedNode>,
    /// The edge that first pinned each resolved name; conflict reports
    /// name it alongside the newly failing edge.
    selected_by: BTreeMap<String, (String, VersionConstraint)>,
}

impl ResolutionState {
    fn new() -> Self {
        ResolutionState {
            visiting: Vec::new(),
            resolved: BTreeMap::new(),
            selected_by: BTreeMap::new(),
        }
    }
}

pub struct Resolver<'a, P> {
    provider: &'a P,
    max_depth: usize,
}

impl<'a, P: MetadataProvider> Resolver<'a, P> {
    pub fn new(provider: &'a P) -> Self {
        Self::with_max_depth(provider, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(provider: &'a P, max_depth: usize) -> Self {
        Resolver {
            provider,
            max_depth,
        }
    }

    /// Expand a single root package into a dependency graph.
    pub fn resolve(&self, root: &str, constraint: &VersionConstraint) -> Result<DependencyGraph> {
        debug!(package = root, requested = %constraint, "resolving dependency graph");
        let mut state = ResolutionState::new();
        self.resolve_edge(root, constraint, ROOT_REQUESTER, 0, &mut state)?;
        Ok(DependencyGraph {
            root: root.to_string(),
            nodes: state.resolved,
        })
    }

    /// Resolve a whole manifest: every declared top-level range lands in
    /// one shared resolution space, so cross-edge compatibility holds
    /// across the entire project, not just under a single root.
    pub fn resolve_manifest(
        &self,
        project: &str,
        declared: &BTreeMap<String, VersionConstraint>,
    ) -> Result<DependencyGraph> {
        debug!(
            project,
            roots = declared.len(),
            "resolving manifest dependency graph"
        );
        let mut state = ResolutionState::new();
        for (name, constraint) in declared {
            self.resolve_edge(name, constraint, project, 0, &mut state)?;
        }
        Ok(DependencyGraph {
            root: project.to_string(),
            nodes: state.resolved,
        })
    }

    fn resolve_edge(
        &self,
        name: &str,
        constraint: &VersionConstraint,
        requested_by: &str,
        depth: usize,
        state: &mut ResolutionState,
    ) -> Result<()> {
        if depth > self.max_depth {
            let mut path = state.visiting.clone();
            path.push(name.to_string());
            return Err(ResolveError::MaxDepthExceeded {
                path,
                limit: self.max_depth,
            });
        }

        // Memoized hit: one version per name, and the new edge must accept
        // the version that was already pinned.
        if let Some(node) = state.resolved.get(name) {
            if constraint.matches(&node.version) {
                trace!(package = name, version = %node.version, "reusing resolved version");
                return Ok(());
            }
            let (first_requested_by, first_requested) = state.selected_by[name].clone();
            return Err(ResolveError::VersionConflict {
                name: name.to_string(),
                selected: node.version.clone(),
                first_requested_by,
                first_requested,
                requested_by: requested_by.to_string(),
                requested: constraint.clone(),
            });
        }

        if let Some(pos) = state.visiting.iter().position(|n| n == name) {
            let mut path = state.visiting[pos..].to_vec();
            path.push(name.to_string());
            return Err(ResolveError::CyclicDependency { path });
        }

        let available = self.provider.list_versions(name)?;
        let version = match best_match(&available, constraint) {
            Some(version) => version.clone(),
            None => {
                return Err(ResolveError::NoSatisfyingVersion {
                    name: name.to_string(),
                    requested: constraint.clone(),
                    requested_by: requested_by.to_string(),
                    available,
                })
            }
        };
        let descriptor = self.provider.describe(name, &version)?;
        trace!(package = name, version = %version, "selected version");

        state.visiting.push(name.to_string());
        for (dep_name, dep_constraint) in &descriptor.dependencies {
            self.resolve_edge(dep_name, dep_constraint, name, depth + 1, state)?;
        }
        state.visiting.pop();

        state.selected_by.insert(
            name.to_string(),
            (requested_by.to_string(), constraint.clone()),
        );
        state.resolved.insert(
            name.to_string(),
            ResolvedNode {
                name: name.to_string(),
                version,
                kind: descriptor.kind,
                depth,
                dependencies: descriptor.dependencies,
            },
        );
        Ok(())
    }
}
