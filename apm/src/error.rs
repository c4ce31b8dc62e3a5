//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use libapm::lockfile::merge::MergeError;
use libapm::lockfile::verify::VerifyError;
use libapm::lockfile::LockfileError;
use libapm::manifest::ManifestError;
use libapm::metadata::MetadataError;
use libapm::resolver::ResolveError;
use miette::Diagnostic;
use thiserror::Error;

/// Result type for apm operations
pub type Result<T> = std::result::Result<T, ApmError>;

/// Errors that can occur in apm operations
#[derive(Debug, Error, Diagnostic)]
pub enum ApmError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(apm::cli::io_error), help("Check file paths and permissions"))]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    #[diagnostic(code(apm::cli::manifest_error), help("Check the project's apm.json"))]
    Manifest(#[from] ManifestError),

    #[error("lockfile error: {0}")]
    #[diagnostic(code(apm::cli::lockfile_error), help("Check the project's apm.lock"))]
    Lockfile(#[from] LockfileError),

    #[error("resolution error: {0}")]
    #[diagnostic(code(apm::cli::resolve_error))]
    Resolve(#[from] ResolveError),

    #[error("verification error: {0}")]
    #[diagnostic(code(apm::cli::verify_error))]
    Verify(#[from] VerifyError),

    #[error("merge error: {0}")]
    #[diagnostic(code(apm::cli::merge_error))]
    Merge(#[from] MergeError),

    #[error("registry error: {0}")]
    #[diagnostic(code(apm::cli::metadata_error))]
    Metadata(#[from] MetadataError),

    #[error("logging environment setup error: {0}")]
    #[diagnostic(
        code(apm::cli::logging_env_error),
        help("Check your RUST_LOG configuration and try again")
    )]
    LoggingEnv(String),

    #[error("other error: {0}")]
    #[diagnostic(code(apm::cli::other_error), help("See error message for details"))]
    Other(String),
}

impl ApmError {
    /// Frozen-mode staleness gets its own status so callers can tell
    /// "re-resolve needed" apart from hard failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            ApmError::Verify(VerifyError::LockfileStale { .. }) => 2,
            _ => 1,
        }
    }
}

/// Convert a string to an ApmError::Other
impl From<String> for ApmError {
    fn from(s: String) -> Self {
        ApmError::Other(s)
    }
}

/// Convert a &str to an ApmError::Other
impl From<&str> for ApmError {
    fn from(s: &str) -> Self {
        ApmError::Other(s.to_string())
    }
}
