//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Package metadata as published by the registry, and the provider
//! abstraction the resolver reads it through.
//!
//! The resolver only ever consumes two operations: list the published
//! versions of a name, and describe one concrete version. Everything else
//! about the registry (transport, retries, authentication) stays behind
//! the [`MetadataProvider`] trait, which is also what resolver tests stub.

use std::collections::BTreeMap;

use miette::Diagnostic;
use semver::Version;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;
use tracing::debug;

use crate::constraint::VersionConstraint;
use crate::digest::Digest;
use crate::retry::RetryPolicy;

pub type Result<T> = std::result::Result<T, MetadataError>;

#[derive(Debug, Error, Diagnostic)]
pub enum MetadataError {
    #[error("package {name} is not known to the registry")]
    #[diagnostic(
        code(apm::metadata::package_not_found),
        help("Check the package name and the registry you are pointed at")
    )]
    PackageNotFound { name: String },

    #[error("package {name} has no published version {version}")]
    #[diagnostic(code(apm::metadata::version_not_found))]
    VersionNotFound { name: String, version: Version },

    #[error("registry request to {url} timed out")]
    #[diagnostic(
        code(apm::metadata::timeout),
        help("The registry may be slow or unreachable; transient failures are retried with backoff")
    )]
    Timeout { url: String },

    #[error("registry returned status {status} for {url}")]
    #[diagnostic(code(apm::metadata::status))]
    Status { url: String, status: u16 },

    #[error("registry transport error for {url}: {details}")]
    #[diagnostic(code(apm::metadata::transport))]
    Transport { url: String, details: String },

    #[error("could not decode registry response from {url}: {details}")]
    #[diagnostic(code(apm::metadata::decode))]
    Decode { url: String, details: String },
}

impl MetadataError {
    /// Transient errors are retried with backoff; everything else is a
    /// definitive answer. 404 in particular feeds straight into the
    /// no-satisfying-version path and is never retried.
    pub fn is_transient(&self) -> bool {
        match self {
            MetadataError::Timeout { .. } | MetadataError::Transport { .. } => true,
            MetadataError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// The registry's format tag for an installable package.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PackageKind {
    Prompt,
    Rule,
    Agent,
}

/// What the registry declares for one concrete package version.
///
/// Read-only input to the resolver. `resolved` and `integrity` describe
/// the published artifact; the resolver records them in the lockfile but
/// never fetches the artifact itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageVersionDescriptor {
    pub name: String,
    pub version: Version,
    pub kind: PackageKind,
    /// Source locator of the packaged artifact (registry blob URL).
    pub resolved: String,
    /// Content digest of the artifact as published.
    pub integrity: Digest,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionConstraint>,
}

/// The two registry operations the resolver consumes.
pub trait MetadataProvider {
    /// All published versions of `name`, ascending.
    fn list_versions(&self, name: &str) -> Result<Vec<Version>>;

    /// The declared metadata of one concrete version.
    fn describe(&self, name: &str, version: &Version) -> Result<PackageVersionDescriptor>;
}

/// REST adapter for the registry's metadata endpoints.
///
/// Endpoints:
/// - `GET {base}/packages/{name}/versions` -> JSON array of versions
/// - `GET {base}/packages/{name}/{version}` -> JSON descriptor
pub struct RestMetadataProvider {
    base_uri: String,
    client: reqwest::blocking::Client,
    retry: RetryPolicy,
}

impl RestMetadataProvider {
    pub fn new(base_uri: &str) -> Self {
        Self::with_retry(base_uri, RetryPolicy::default())
    }

    pub fn with_retry(base_uri: &str, retry: RetryPolicy) -> Self {
        RestMetadataProvider {
            base_uri: base_uri.trim_end_matches('/').to_string(),
            client: reqwest::blocking::Client::new(),
            retry,
        }
    }

    fn get_json<T, N>(&self, url: &str, not_found: N) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
        N: Fn() -> MetadataError,
    {
        self.retry
            .run(std::thread::sleep, MetadataError::is_transient, || {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .map_err(|e| classify_transport(url, e))?;
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(not_found());
                }
                if !status.is_success() {
                    return Err(MetadataError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                response.json::<T>().map_err(|e| MetadataError::Decode {
                    url: url.to_string(),
                    details: e.to_string(),
                })
            })
    }
}

fn classify_transport(url: &str, err: reqwest::Error) -> MetadataError {
    if err.is_timeout() {
        MetadataError::Timeout {
            url: url.to_string(),
        }
    } else {
        MetadataError::Transport {
            url: url.to_string(),
            details: err.to_string(),
        }
    }
}

impl MetadataProvider for RestMetadataProvider {
    fn list_versions(&self, name: &str) -> Result<Vec<Version>> {
        let url = format!("{}/packages/{}/versions", self.base_uri, name);
        debug!(package = name, "listing versions from registry");
        let mut versions: Vec<Version> = self.get_json(&url, || MetadataError::PackageNotFound {
            name: name.to_string(),
        })?;
        versions.sort();
        Ok(versions)
    }

    fn describe(&self, name: &str, version: &Version) -> Result<PackageVersionDescriptor> {
        let url = format!("{}/packages/{}/{}", self.base_uri, name, version);
        debug!(package = name, version = %version, "fetching version metadata");
        self.get_json(&url, || MetadataError::VersionNotFound {
            name: name.to_string(),
            version: version.clone(),
        })
    }
}
