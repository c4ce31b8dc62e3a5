//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use miette::{Diagnostic, IntoDiagnostic, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use libapm::lockfile::{Lockfile, LOCKFILE_NAME};
use libapm::manifest::{PackageManifest, MANIFEST_NAME};

#[derive(Parser, Debug)]
#[command(name = "apmtree", version, about = "Render the dependency tree pinned by an apm lockfile", long_about = None)]
struct Cli {
    /// Project directory containing apm.json and apm.lock
    #[arg(short = 'R', long = "project-dir", env = "APM_PROJECT", default_value = ".")]
    project_dir: PathBuf,

    /// Only render trees rooted at packages whose name contains this substring
    #[arg(short = 'n', long)]
    package: Option<String>,

    /// Output format
    #[arg(short = 'F', long = "format", default_value_t = OutputFormat::Tree)]
    format: OutputFormat,

    /// Maximum depth to print for the tree (0 = unlimited)
    #[arg(short = 'd', long = "max-depth", default_value_t = 0)]
    max_depth: usize,

    /// Increase log verbosity (use multiple times)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Tree,
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Tree => write!(f, "tree"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Error, Debug, Diagnostic)]
#[error("apmtree error: {message}")]
#[diagnostic(code(apm::apmtree_error), help("See logs with RUST_LOG=apmtree=debug for more details."))]
struct ApmTreeError {
    message: String,
}

/// The machine-readable resolution result: the flat resolved map plus the
/// nested trees under each declared root.
#[derive(Serialize)]
struct Payload {
    resolved: BTreeMap<String, String>,
    trees: Vec<TreeNode>,
}

#[derive(Debug, Serialize, PartialEq)]
struct TreeNode {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cycle: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<TreeNode>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let env_filter = match cli.verbose {
        0 => EnvFilter::from_default_env().add_directive("apmtree=info".parse().into_diagnostic()?),
        1 => EnvFilter::from_default_env().add_directive("apmtree=debug".parse().into_diagnostic()?),
        _ => EnvFilter::from_default_env().add_directive("apmtree=trace".parse().into_diagnostic()?),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let manifest_path = cli.project_dir.join(MANIFEST_NAME);
    let manifest = PackageManifest::load(&manifest_path).map_err(|e| ApmTreeError {
        message: format!("Failed to load manifest at {:?}: {}", manifest_path, e),
    })?;

    let lock_path = cli.project_dir.join(LOCKFILE_NAME);
    let lockfile = Lockfile::load(&lock_path).map_err(|e| ApmTreeError {
        message: format!("Failed to load lockfile at {:?}: {}", lock_path, e),
    })?;

    // Declared roots, optionally narrowed by the package filter.
    let roots: Vec<String> = manifest
        .dependencies
        .keys()
        .filter(|name| match &cli.package {
            Some(needle) => name.contains(needle.as_str()),
            None => true,
        })
        .cloned()
        .collect();

    if roots.is_empty() {
        println!("No declared packages match.");
        return Ok(());
    }

    match cli.format {
        OutputFormat::Tree => {
            for root in &roots {
                print_tree(&lockfile, root, cli.max_depth);
                println!();
            }
        }
        OutputFormat::Json => {
            let resolved = lockfile
                .entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.version.to_string()))
                .collect();
            let trees = roots
                .iter()
                .map(|root| build_tree(&lockfile, root, &mut Vec::new(), cli.max_depth, 1))
                .collect();
            let payload = Payload { resolved, trees };
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).into_diagnostic()?
            );
        }
    }

    Ok(())
}

fn print_tree(lockfile: &Lockfile, root: &str, max_depth: usize) {
    match lockfile.entries.get(root) {
        Some(entry) => println!("{}@{} [{}]", root, entry.version, entry.kind),
        None => {
            warn!(package = root, "declared package missing from lockfile");
            println!("{} (missing)", root);
            return;
        }
    }
    let mut path = vec![root.to_string()];
    print_tree_rec(lockfile, root, 1, max_depth, &mut path);
}

fn print_tree_rec(
    lockfile: &Lockfile,
    node: &str,
    depth: usize,
    max_depth: usize,
    path: &mut Vec<String>,
) {
    if max_depth != 0 && depth > max_depth {
        return;
    }
    let Some(entry) = lockfile.entries.get(node) else {
        return;
    };
    for dep in entry.dependencies.keys() {
        let indent = "  ".repeat(depth);
        match lockfile.entries.get(dep) {
            Some(dep_entry) if path.contains(dep) => {
                println!("{}└─ {}@{} (cycle)", indent, dep, dep_entry.version);
            }
            Some(dep_entry) => {
                println!("{}└─ {}@{} [{}]", indent, dep, dep_entry.version, dep_entry.kind);
                path.push(dep.clone());
                print_tree_rec(lockfile, dep, depth + 1, max_depth, path);
                path.pop();
            }
            None => {
                warn!(package = dep.as_str(), "dependency missing from lockfile");
                println!("{}└─ {} (missing)", indent, dep);
            }
        }
    }
}

fn build_tree(
    lockfile: &Lockfile,
    node: &str,
    path: &mut Vec<String>,
    max_depth: usize,
    depth: usize,
) -> TreeNode {
    let Some(entry) = lockfile.entries.get(node) else {
        return TreeNode {
            name: node.to_string(),
            version: None,
            cycle: false,
            dependencies: Vec::new(),
        };
    };
    if path.iter().any(|n| n == node) {
        return TreeNode {
            name: node.to_string(),
            version: Some(entry.version.to_string()),
            cycle: true,
            dependencies: Vec::new(),
        };
    }

    let dependencies = if max_depth != 0 && depth > max_depth {
        Vec::new()
    } else {
        path.push(node.to_string());
        let children = entry
            .dependencies
            .keys()
            .map(|dep| build_tree(lockfile, dep, path, max_depth, depth + 1))
            .collect();
        path.pop();
        children
    };

    TreeNode {
        name: node.to_string(),
        version: Some(entry.version.to_string()),
        cycle: false,
        dependencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libapm::digest::{Digest, DigestAlgorithm};
    use libapm::lockfile::LockfileEntry;
    use libapm::metadata::PackageKind;

    fn lockfile(entries: &[(&str, &str, &[(&str, &str)])]) -> Lockfile {
        Lockfile {
            schema_version: libapm::lockfile::SCHEMA_VERSION,
            generated_at: "2026-08-05T12:00:00Z".parse().unwrap(),
            entries: entries
                .iter()
                .map(|(name, version, deps)| {
                    (
                        name.to_string(),
                        LockfileEntry {
                            version: version.parse().unwrap(),
                            resolved: format!("https://registry.test/blobs/{}/{}", name, version),
                            integrity: Digest::from_bytes(name.as_bytes(), DigestAlgorithm::Sha256),
                            dependencies: deps
                                .iter()
                                .map(|(n, c)| (n.to_string(), c.parse().unwrap()))
                                .collect(),
                            kind: PackageKind::Prompt,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn builds_nested_tree() {
        let lf = lockfile(&[
            ("root", "1.0.0", &[("child", "^2")]),
            ("child", "2.1.0", &[]),
        ]);
        let tree = build_tree(&lf, "root", &mut Vec::new(), 0, 1);
        assert_eq!(tree.name, "root");
        assert_eq!(tree.version.as_deref(), Some("1.0.0"));
        assert_eq!(tree.dependencies.len(), 1);
        assert_eq!(tree.dependencies[0].name, "child");
        assert!(tree.dependencies[0].dependencies.is_empty());
    }

    #[test]
    fn cycle_in_hand_edited_lockfile_terminates() {
        let lf = lockfile(&[
            ("a", "1.0.0", &[("b", "^1")]),
            ("b", "1.0.0", &[("a", "^1")]),
        ]);
        let tree = build_tree(&lf, "a", &mut Vec::new(), 0, 1);
        let b = &tree.dependencies[0];
        assert_eq!(b.name, "b");
        let back = &b.dependencies[0];
        assert_eq!(back.name, "a");
        assert!(back.cycle);
        assert!(back.dependencies.is_empty());
    }

    #[test]
    fn missing_dependency_is_marked() {
        let lf = lockfile(&[("root", "1.0.0", &[("ghost", "^1")])]);
        let tree = build_tree(&lf, "root", &mut Vec::new(), 0, 1);
        let ghost = &tree.dependencies[0];
        assert_eq!(ghost.name, "ghost");
        assert_eq!(ghost.version, None);
    }

    #[test]
    fn depth_limit_truncates_children() {
        let lf = lockfile(&[
            ("root", "1.0.0", &[("mid", "^1")]),
            ("mid", "1.0.0", &[("leaf", "^1")]),
            ("leaf", "1.0.0", &[]),
        ]);
        let tree = build_tree(&lf, "root", &mut Vec::new(), 1, 1);
        assert_eq!(tree.dependencies.len(), 1);
        assert!(tree.dependencies[0].dependencies.is_empty());
    }
}
