//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

mod error;
use error::{ApmError, Result};

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use libapm::digest::Digest;
use libapm::lockfile::merge::merge;
use libapm::lockfile::verify::{verify_fresh, verify_integrity, Freshness, StaleReason};
use libapm::lockfile::{ArtifactInfo, Lockfile, LOCKFILE_NAME};
use libapm::manifest::{PackageManifest, MANIFEST_NAME};
use libapm::metadata::{MetadataProvider, RestMetadataProvider};
use libapm::resolver::{DependencyGraph, Resolver};

/// apm - agent package registry client
///
/// The apm command resolves a project's declared package dependencies
/// against the registry and maintains the project lockfile. It records
/// exact versions, source locators and integrity digests; fetching and
/// unpacking artifacts is the installer's job.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct App {
    /// Project directory containing apm.json and apm.lock
    ///
    /// Defaults to the current working directory.
    #[clap(short = 'R', long = "project-dir", global = true)]
    project_dir: Option<PathBuf>,

    /// Registry base URL
    #[clap(
        long,
        env = "APM_REGISTRY",
        default_value = "https://registry.apm.dev",
        global = true
    )]
    registry: String,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolve the declared dependencies and write the lockfile
    ///
    /// The install command expands every range declared in apm.json into a
    /// concrete dependency graph and pins it in apm.lock. With --frozen it
    /// instead checks that the existing lockfile still satisfies the
    /// manifest and refuses to re-resolve if it does not.
    Install {
        /// Fail (exit status 2) if the lockfile is stale instead of re-resolving
        #[clap(long)]
        frozen: bool,

        /// Resolve and report, but do not write the lockfile
        #[clap(short = 'n', long)]
        dry_run: bool,
    },

    /// Re-resolve only the named packages and merge into the lockfile
    ///
    /// The update command re-resolves the named top-level packages against
    /// their declared ranges and merges the result into the existing
    /// lockfile; every untouched entry is carried over unchanged.
    Update {
        /// Declared packages to re-resolve
        packages: Vec<String>,
    },

    /// Check a downloaded artifact against the lockfile digest
    ///
    /// The verify command recomputes the content digest of a downloaded
    /// artifact and compares it byte-wise with the digest recorded in the
    /// lockfile. A mismatch means corruption or tampering.
    Verify {
        /// Package name as recorded in the lockfile
        package: String,

        /// Path to the downloaded artifact
        artifact: PathBuf,
    },

    /// Report whether the lockfile still satisfies the manifest
    Status {
        /// Output format (default: table)
        #[clap(short = 'o')]
        output_format: Option<String>,
    },
}

#[derive(Serialize)]
struct StatusOutput {
    fresh: bool,
    pinned: usize,
    generated_at: DateTime<Utc>,
    stale: Vec<StaleOutput>,
}

#[derive(Serialize)]
struct StaleOutput {
    name: String,
    reason: String,
}

fn main() -> ExitCode {
    if let Err(err) = init_logging() {
        eprintln!("{}", err);
        return ExitCode::FAILURE;
    }

    let cli = App::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("{:?}", miette::Report::new(err));
            ExitCode::from(code)
        }
    }
}

fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .map_err(|e| ApmError::LoggingEnv(format!("Failed to parse environment filter: {}", e)))?;

    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Determine the project directory: the -R argument if given, otherwise
/// the current working directory.
fn determine_project_dir(project_dir: Option<PathBuf>) -> PathBuf {
    match project_dir {
        Some(path) => {
            debug!("Using explicitly provided project directory: {}", path.display());
            path
        }
        None => PathBuf::from("."),
    }
}

fn run(cli: App) -> Result<()> {
    let project_dir = determine_project_dir(cli.project_dir);
    match cli.command {
        Commands::Install { frozen, dry_run } => {
            cmd_install(&project_dir, &cli.registry, frozen, dry_run)
        }
        Commands::Update { packages } => cmd_update(&project_dir, &cli.registry, &packages),
        Commands::Verify { package, artifact } => cmd_verify(&project_dir, &package, &artifact),
        Commands::Status { output_format } => cmd_status(&project_dir, output_format.as_deref()),
    }
}

fn cmd_install(project_dir: &Path, registry: &str, frozen: bool, dry_run: bool) -> Result<()> {
    let manifest = PackageManifest::load(&project_dir.join(MANIFEST_NAME))?;
    let lock_path = project_dir.join(LOCKFILE_NAME);

    if frozen {
        info!("frozen install: checking lockfile freshness");
        let lockfile = Lockfile::load(&lock_path)?;
        verify_fresh(&lockfile, &manifest.dependencies).into_result()?;
        println!(
            "Lockfile satisfies {}; {} package(s) pinned.",
            MANIFEST_NAME,
            lockfile.entries.len()
        );
        return Ok(());
    }

    let provider = RestMetadataProvider::new(registry);
    let resolver = Resolver::new(&provider);
    let graph = resolver.resolve_manifest(&manifest.name, &manifest.dependencies)?;
    info!(packages = graph.len(), "resolution complete");

    let lockfile = lock_graph(&provider, &graph)?;
    if dry_run {
        println!("Would pin {} package(s):", lockfile.entries.len());
        for (name, entry) in &lockfile.entries {
            println!("  {} {}", name, entry.version);
        }
        return Ok(());
    }

    lockfile.store(&lock_path)?;
    println!(
        "Pinned {} package(s) in {}.",
        lockfile.entries.len(),
        lock_path.display()
    );
    Ok(())
}

fn cmd_update(project_dir: &Path, registry: &str, packages: &[String]) -> Result<()> {
    if packages.is_empty() {
        return Err("no packages named; run 'apm install' for a full re-resolution".into());
    }

    let manifest = PackageManifest::load(&project_dir.join(MANIFEST_NAME))?;
    let lock_path = project_dir.join(LOCKFILE_NAME);
    let existing = Lockfile::load(&lock_path)?;

    let mut subset = BTreeMap::new();
    for name in packages {
        let constraint = manifest.dependencies.get(name).cloned().ok_or_else(|| {
            ApmError::Other(format!("{} is not declared in {}", name, MANIFEST_NAME))
        })?;
        subset.insert(name.clone(), constraint);
    }

    let provider = RestMetadataProvider::new(registry);
    let resolver = Resolver::new(&provider);
    let graph = resolver.resolve_manifest(&manifest.name, &subset)?;
    let fresh = lock_graph(&provider, &graph)?;

    let touched: BTreeSet<String> = packages.iter().cloned().collect();
    let merged = merge(&existing, &fresh, &touched, &manifest.dependencies)?;
    merged.store(&lock_path)?;
    println!(
        "Updated {} package(s); {} now pinned in {}.",
        touched.len(),
        merged.entries.len(),
        lock_path.display()
    );
    Ok(())
}

fn cmd_verify(project_dir: &Path, package: &str, artifact: &Path) -> Result<()> {
    let lockfile = Lockfile::load(&project_dir.join(LOCKFILE_NAME))?;
    let entry = lockfile.entries.get(package).ok_or_else(|| {
        ApmError::Other(format!("{} is not present in the lockfile", package))
    })?;

    let bytes = fs::read(artifact)?;
    let actual = Digest::from_bytes(&bytes, entry.integrity.algorithm);
    verify_integrity(package, entry, &actual)?;
    println!(
        "{} {}: integrity OK ({}).",
        package, entry.version, entry.integrity
    );
    Ok(())
}

fn cmd_status(project_dir: &Path, output_format: Option<&str>) -> Result<()> {
    let manifest = PackageManifest::load(&project_dir.join(MANIFEST_NAME))?;
    let lock_path = project_dir.join(LOCKFILE_NAME);
    if !lock_path.exists() {
        println!("No lockfile; run 'apm install' to create one.");
        return Ok(());
    }
    let lockfile = Lockfile::load(&lock_path)?;
    let freshness = verify_fresh(&lockfile, &manifest.dependencies);

    let output = StatusOutput {
        fresh: freshness == Freshness::Fresh,
        pinned: lockfile.entries.len(),
        generated_at: lockfile.generated_at,
        stale: match &freshness {
            Freshness::Fresh => Vec::new(),
            Freshness::Stale(reasons) => reasons
                .iter()
                .map(|reason| StaleOutput {
                    name: reason.name().to_string(),
                    reason: match reason {
                        StaleReason::Missing { .. } => "declared but not locked".to_string(),
                        StaleReason::Unsatisfied {
                            declared, locked, ..
                        } => format!("locked at {} but {} is required", locked, declared),
                    },
                })
                .collect(),
        },
    };

    match output_format.unwrap_or("table") {
        "table" => {
            if output.fresh {
                println!(
                    "Lockfile is fresh: {} package(s) pinned at {}.",
                    output.pinned, output.generated_at
                );
            } else {
                println!("Lockfile is stale:");
                for stale in &output.stale {
                    println!("  {}: {}", stale.name, stale.reason);
                }
            }
        }
        "json" => {
            println!("{}", serde_json::to_string_pretty(&output).map_err(|e| {
                ApmError::Other(format!("failed to serialize status output: {}", e))
            })?);
        }
        other => {
            return Err(ApmError::Other(format!(
                "unsupported output format: {} (supported: table, json)",
                other
            )))
        }
    }
    Ok(())
}

/// Collect artifact records for every resolved node, then build the
/// lockfile. The registry reports the source locator and digest; the
/// client records them without ever fetching artifact bytes.
fn lock_graph<P: MetadataProvider>(provider: &P, graph: &DependencyGraph) -> Result<Lockfile> {
    let mut artifacts = BTreeMap::new();
    for node in graph.nodes.values() {
        let descriptor = provider.describe(&node.name, &node.version)?;
        artifacts.insert(
            node.name.clone(),
            ArtifactInfo {
                resolved: descriptor.resolved,
                integrity: descriptor.integrity,
            },
        );
    }
    let lockfile = Lockfile::from_graph(graph, Utc::now(), |node| {
        artifacts.get(&node.name).cloned()
    })?;
    Ok(lockfile)
}
