//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use miette::Diagnostic;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as Sha2Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DigestError>;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum DigestError {
    #[error("hashing algorithm {algorithm:?} is not known by this library")]
    #[diagnostic(
        code(apm::digest::unknown_algorithm),
        help("Supported algorithms: sha256, sha512")
    )]
    UnknownAlgorithm { algorithm: String },

    #[error("digest {digest:?} is not formatted properly: {details}")]
    #[diagnostic(
        code(apm::digest::invalid_format),
        help("Integrity digests look like sha256-<base64>")
    )]
    InvalidFormat { digest: String, details: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha512,
}

impl Default for DigestAlgorithm {
    fn default() -> Self {
        DigestAlgorithm::Sha256
    }
}

/// A content digest in the registry's `<algorithm>-<base64>` wire form.
///
/// The value part is the standard base64 encoding of the raw hash bytes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub value: String,
}

impl Digest {
    pub fn from_bytes(bytes: &[u8], algorithm: DigestAlgorithm) -> Self {
        let value = match algorithm {
            DigestAlgorithm::Sha256 => STANDARD.encode(Sha256::digest(bytes)),
            DigestAlgorithm::Sha512 => STANDARD.encode(Sha512::digest(bytes)),
        };
        Digest { algorithm, value }
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, value) = s.split_once('-').ok_or_else(|| DigestError::InvalidFormat {
            digest: s.to_string(),
            details: "missing '-' separator".to_string(),
        })?;
        let algorithm = match algorithm {
            "sha256" => DigestAlgorithm::Sha256,
            "sha512" => DigestAlgorithm::Sha512,
            other => {
                return Err(DigestError::UnknownAlgorithm {
                    algorithm: other.to_string(),
                })
            }
        };
        if value.is_empty() {
            return Err(DigestError::InvalidFormat {
                digest: s.to_string(),
                details: "empty digest value".to_string(),
            });
        }
        STANDARD
            .decode(value)
            .map_err(|e| DigestError::InvalidFormat {
                digest: s.to_string(),
                details: e.to_string(),
            })?;
        Ok(Digest {
            algorithm,
            value: value.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let algorithm = match self.algorithm {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{}-{}", algorithm, self.value)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
