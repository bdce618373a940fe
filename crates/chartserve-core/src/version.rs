//! Version constraints and version selection
//!
//! Chart versions in the wild are loosely formatted (`v1.2.3`, `1.2`), and
//! constraints follow the Masterminds syntax used by Helm: space separated
//! comparators, `||` alternatives and hyphen ranges. Everything is mapped
//! onto `semver::VersionReq` after normalization.

use semver::{Version, VersionReq};
use std::cmp::Ordering;

use crate::error::{CoreError, Result};

/// A parsed chart version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    /// Empty constraint: highest available version
    Latest,

    /// A complete version that must be available verbatim
    Exact(String),

    /// Any other constraint: highest version satisfying one alternative
    Range {
        raw: String,
        alternatives: Vec<VersionReq>,
    },
}

impl VersionConstraint {
    /// Parse a constraint string
    pub fn parse(constraint: &str) -> Result<Self> {
        let trimmed = constraint.trim();
        if trimmed.is_empty() {
            return Ok(VersionConstraint::Latest);
        }
        if is_pinned(trimmed) {
            return Ok(VersionConstraint::Exact(trimmed.to_string()));
        }

        let alternatives = trimmed
            .split("||")
            .map(|alt| parse_alternative(trimmed, alt))
            .collect::<Result<Vec<_>>>()?;

        Ok(VersionConstraint::Range {
            raw: trimmed.to_string(),
            alternatives,
        })
    }

    /// True for a fully pinned version
    pub fn is_pinned(&self) -> bool {
        matches!(self, VersionConstraint::Exact(_))
    }

    /// Check one candidate version string against this constraint
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            VersionConstraint::Latest => parse_lenient(candidate).is_some(),
            VersionConstraint::Exact(version) => candidate == version,
            VersionConstraint::Range { alternatives, .. } => parse_lenient(candidate)
                .map(|v| alternatives.iter().any(|req| req.matches(&v)))
                .unwrap_or(false),
        }
    }

    /// Pick the best candidate
    ///
    /// Returns the candidate exactly as given, so callers can map it back
    /// to their own entries. Deterministic for a fixed candidate set.
    pub fn select<'a, I>(&self, candidates: I) -> Option<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut candidates = candidates.into_iter();
        match self {
            VersionConstraint::Exact(version) => candidates.find(|c| *c == version.as_str()),
            _ => candidates
                .filter(|c| self.matches(c))
                .filter_map(|c| parse_lenient(c).map(|v| (v, c)))
                .max_by(|(va, a), (vb, b)| compare(va, a, vb, b))
                .map(|(_, c)| c),
        }
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionConstraint::Latest => f.write_str("latest"),
            VersionConstraint::Exact(v) => f.write_str(v),
            VersionConstraint::Range { raw, .. } => f.write_str(raw),
        }
    }
}

fn compare(va: &Version, a: &str, vb: &Version, b: &str) -> Ordering {
    // `1.0` and `1.0.0` parse equal; fall back to the raw text
    va.cmp(vb).then_with(|| a.cmp(b))
}

/// True when `version` is a complete semantic version (optionally `v` prefixed)
pub fn is_pinned(version: &str) -> bool {
    let stripped = version.trim().strip_prefix('v').unwrap_or(version.trim());
    Version::parse(stripped).is_ok()
}

/// Parse a version leniently: optional `v`, missing minor/patch default to 0
pub fn parse_lenient(version: &str) -> Option<Version> {
    let stripped = version.trim().strip_prefix('v').unwrap_or(version.trim());
    if let Ok(v) = Version::parse(stripped) {
        return Some(v);
    }

    // Split off pre-release/build so `1.2-rc.1` pads correctly
    let split_at = stripped.find(['-', '+']).unwrap_or(stripped.len());
    let (core, rest) = stripped.split_at(split_at);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(rest);
    Version::parse(&padded).ok()
}

/// Convert one `||` alternative into a `VersionReq`
fn parse_alternative(full: &str, alternative: &str) -> Result<VersionReq> {
    let invalid = |message: String| CoreError::InvalidConstraint {
        constraint: full.to_string(),
        message,
    };

    let alternative = alternative.trim();
    if alternative.is_empty() {
        return Err(invalid("empty alternative".to_string()));
    }

    // Hyphen range: `1.2 - 1.4.5`
    if let Some((low, high)) = alternative.split_once(" - ") {
        let req = format!(">={}, <={}", strip_v(low.trim()), strip_v(high.trim()));
        return VersionReq::parse(&req).map_err(|e| invalid(e.to_string()));
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in alternative.split([' ', ',']).filter(|t| !t.is_empty()) {
        if token.chars().all(is_op_char) {
            pending_op = Some(token);
            continue;
        }
        let token = match pending_op.take() {
            Some(op) => format!("{}{}", op, token),
            None => token.to_string(),
        };
        comparators.push(normalize_comparator(&token).map_err(&invalid)?);
    }
    if let Some(op) = pending_op {
        return Err(invalid(format!("operator '{}' without a version", op)));
    }

    VersionReq::parse(&comparators.join(", ")).map_err(|e| invalid(e.to_string()))
}

fn is_op_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '~' | '^' | '!')
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

fn normalize_comparator(token: &str) -> std::result::Result<String, String> {
    let split_at = token.find(|c: char| !is_op_char(c)).unwrap_or(token.len());
    let (op, version) = token.split_at(split_at);
    let version = strip_v(version);

    if op.contains('!') {
        return Err(format!("unsupported operator '{}'", op));
    }

    let wildcard = version.split('.').any(|p| matches!(p, "*" | "x" | "X"));
    Ok(match op {
        // Bare versions are exact matches, wildcards stay operator-free
        "" if wildcard => version.to_string(),
        "" => format!("={}", version),
        "~>" => format!("~{}", version),
        _ => format!("{}{}", op, version),
    })
}
