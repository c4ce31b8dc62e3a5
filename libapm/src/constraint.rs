//  This Source Code Form is subject to the terms of
//  the Mozilla Public License, v. 2.0. If a copy of the
//  MPL was not distributed with this file, You can
//  obtain one at https://mozilla.org/MPL/2.0/.

//! Version ranges and the matcher that picks a concrete version for them.
//!
//! A [`VersionConstraint`] is the declared range on a dependency edge. It
//! wraps `semver::VersionReq`, so the accepted syntax is the usual semver
//! range language:
//!
//! - exact pins: `=1.2.3`
//! - caret (compatible within the same major): `^1.2`, or bare `1.2.3`
//! - tilde (compatible within the same minor): `~1.2.3`
//! - wildcards: `1.*`
//! - comparator ranges: `>=1.2, <2.0`
//!
//! [`best_match`] is the selection rule used on every edge of a resolution:
//! among the candidates satisfying the range, the highest version wins.

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConstraintError>;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ConstraintError {
    #[error("invalid version requirement {expr:?}: {details}")]
    #[diagnostic(
        code(apm::constraint::invalid_requirement),
        help("Requirements use semver range syntax, e.g. ^1.2, ~1.2.3, =1.0.0 or >=1, <2")
    )]
    InvalidRequirement { expr: String, details: String },
}

/// A declared version range on a dependency edge.
///
/// Immutable; owned by whatever declared it (a package version descriptor
/// or the project manifest). Serializes as the range string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionConstraint {
    req: VersionReq,
}

impl VersionConstraint {
    pub fn parse(expr: &str) -> Result<Self> {
        let req = VersionReq::parse(expr).map_err(|e| ConstraintError::InvalidRequirement {
            expr: expr.to_string(),
            details: e.to_string(),
        })?;
        Ok(VersionConstraint { req })
    }

    /// The range that accepts every version.
    pub fn any() -> Self {
        VersionConstraint {
            req: VersionReq::STAR,
        }
    }

    /// True when the concrete version lies inside the declared range.
    pub fn matches(&self, version: &Version) -> bool {
        self.req.matches(version)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.req)
    }
}

impl FromStr for VersionConstraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Select the best concrete version for a constraint.
///
/// Filters `candidates` to those satisfying `constraint` and returns the
/// highest under semver total ordering. `None` is the no-match result, not
/// an error; the caller decides how to report it. Pure and deterministic
/// for a fixed candidate list.
pub fn best_match<'a>(
    candidates: &'a [Version],
    constraint: &VersionConstraint,
) -> Option<&'a Version> {
    candidates.iter().filter(|v| constraint.matches(v)).max()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(raw: &[&str]) -> Vec<Version> {
        raw.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn caret_selects_highest_compatible() {
        let candidates = versions(&["1.0.0", "1.2.0", "2.0.0"]);
        let constraint = VersionConstraint::parse("^1.0.0").unwrap();
        assert_eq!(
            best_match(&candidates, &constraint),
            Some(&"1.2.0".parse().unwrap())
        );
    }

    #[test]
    fn tilde_stays_within_minor() {
        let candidates = versions(&["1.0.0", "1.0.4", "1.2.0", "2.0.0"]);
        let constraint = VersionConstraint::parse("~1.0.0").unwrap();
        assert_eq!(
            best_match(&candidates, &constraint),
            Some(&"1.0.4".parse().unwrap())
        );
    }

    #[test]
    fn no_candidate_satisfies() {
        let candidates = versions(&["1.0.0", "1.2.0", "2.0.0"]);
        let constraint = VersionConstraint::parse("^3.0.0").unwrap();
        assert_eq!(best_match(&candidates, &constraint), None);
    }

    #[test]
    fn exact_pin_matches_only_itself() {
        let candidates = versions(&["1.0.0", "1.0.1"]);
        let constraint = VersionConstraint::parse("=1.0.0").unwrap();
        assert_eq!(
            best_match(&candidates, &constraint),
            Some(&"1.0.0".parse().unwrap())
        );
    }

    #[test]
    fn wildcard_accepts_everything() {
        let candidates = versions(&["0.1.0", "3.4.5"]);
        assert_eq!(
            best_match(&candidates, &VersionConstraint::any()),
            Some(&"3.4.5".parse().unwrap())
        );
    }

    #[test]
    fn empty_candidate_list_never_matches() {
        let constraint = VersionConstraint::parse("^1").unwrap();
        assert_eq!(best_match(&[], &constraint), None);
    }

    #[test]
    fn invalid_requirement_is_rejected() {
        let err = VersionConstraint::parse("not-a-range").unwrap_err();
        assert!(matches!(err, ConstraintError::InvalidRequirement { .. }));
    }

    #[test]
    fn round_trips_through_display() {
        let constraint = VersionConstraint::parse(">=1.2, <2").unwrap();
        let reparsed = VersionConstraint::parse(&constraint.to_string()).unwrap();
        assert_eq!(constraint, reparsed);
    }
}
