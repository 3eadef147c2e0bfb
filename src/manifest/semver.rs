//! Semantic Versioning
//!
//! Version parsing, ordering, and constraint matching per SemVer 2.0.0.
//!
//! Supported constraint forms:
//! - Exact: `1.2.3`
//! - Comparison: `>=1.2.3`, `<=2.0.0`, `>1.0.0`, `<2.0.0`, `=1.2.3`
//! - Range: `>=1.2.3 <2.0.0` (whitespace-separated, AND semantics)
//! - Caret: `^1.2.3` (>=1.2.3 <2.0.0; `^0.2.3` -> <0.3.0; `^0.0.3` -> <0.0.4)
//! - Tilde: `~1.2.3` (>=1.2.3 <1.3.0)
//! - Wildcard: `*`, `1.*`, `1.2.*`
//!
//! A prerelease version satisfies a comparator only when the comparator's
//! operand is itself a prerelease, or the operator is exact equality. Build
//! metadata never participates in ordering or equality.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Parse failure for a version or constraint string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {what} at offset {offset}: expected {expected} in '{input}'")]
pub struct ParseError {
    pub what: &'static str,
    pub input: String,
    pub offset: usize,
    pub expected: &'static str,
}

impl ParseError {
    fn version(input: &str, offset: usize, expected: &'static str) -> Self {
        Self {
            what: "version",
            input: input.to_string(),
            offset,
            expected,
        }
    }

    fn constraint(input: &str, offset: usize, expected: &'static str) -> Self {
        Self {
            what: "constraint",
            input: input.to_string(),
            offset,
            expected,
        }
    }
}

fn version_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(
            r"^(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)(?:-(?P<prerelease>(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+(?P<build>[0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$",
        )
        .expect("semver pattern is valid")
    })
}

/// A semantic version. Immutable; ordering and equality ignore build metadata.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse a version string. A leading `v` is tolerated.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        let body = trimmed.strip_prefix('v').unwrap_or(trimmed);

        let captures = version_pattern()
            .captures(body)
            .ok_or_else(|| ParseError::version(input, 0, "MAJOR.MINOR.PATCH[-prerelease][+build]"))?;

        // The pattern guarantees the numeric groups parse
        Ok(Self {
            major: captures["major"].parse().unwrap(),
            minor: captures["minor"].parse().unwrap(),
            patch: captures["patch"].parse().unwrap(),
            prerelease: captures.name("prerelease").map(|m| m.as_str().to_string()),
            build: captures.name("build").map(|m| m.as_str().to_string()),
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    fn core(&self) -> (u64, u64, u64) {
        (self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        // Build metadata excluded per SemVer 2.0.0
        self.core() == other.core() && self.prerelease == other.prerelease
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.core().hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.core().cmp(&other.core()) {
            Ordering::Equal => {}
            other => return other,
        }
        // A release outranks any prerelease of the same core
        match (&self.prerelease, &other.prerelease) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => compare_prerelease(a, b),
        }
    }
}

/// SemVer prerelease comparison: dot-separated identifiers, numeric compared
/// numerically, numeric always lower than alphanumeric, shorter list loses
/// when all shared identifiers are equal.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let parts_a: Vec<&str> = a.split('.').collect();
    let parts_b: Vec<&str> = b.split('.').collect();

    for (pa, pb) in parts_a.iter().zip(parts_b.iter()) {
        let na = pa.parse::<u64>();
        let nb = pb.parse::<u64>();
        let ordering = match (na, nb) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => pa.cmp(pb),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    parts_a.len().cmp(&parts_b.len())
}

/// Comparator operators supported by constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ConstraintOp {
    fn check(self, version: &Version, operand: &Version) -> bool {
        match self {
            ConstraintOp::Eq => version == operand,
            ConstraintOp::Gt => version > operand,
            ConstraintOp::Ge => version >= operand,
            ConstraintOp::Lt => version < operand,
            ConstraintOp::Le => version <= operand,
        }
    }
}

/// A version constraint: a set of comparators combined with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConstraint {
    original: String,
    comparators: Vec<(ConstraintOp, Version)>,
}

impl VersionConstraint {
    /// Parse a constraint expression.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let original = input.trim().to_string();
        if original.is_empty() {
            return Err(ParseError::constraint(input, 0, "a non-empty constraint"));
        }

        let mut comparators = Vec::new();
        let mut offset = 0usize;
        for part in original.split_whitespace() {
            // Track the part's offset for diagnostics
            offset = original[offset..]
                .find(part)
                .map(|pos| offset + pos)
                .unwrap_or(offset);
            parse_single(part, &original, offset, &mut comparators)?;
            offset += part.len();
        }

        Ok(Self {
            original,
            comparators,
        })
    }

    /// Check whether `version` satisfies every comparator.
    ///
    /// Strict prerelease rule: a prerelease version only matches a comparator
    /// whose operand is also a prerelease, or an exact-equality comparator.
    pub fn satisfies(&self, version: &Version) -> bool {
        self.comparators.iter().all(|(op, operand)| {
            if version.is_prerelease() && !operand.is_prerelease() && *op != ConstraintOp::Eq {
                return false;
            }
            op.check(version, operand)
        })
    }

    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl FromStr for VersionConstraint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.original)
    }
}

fn parse_single(
    part: &str,
    original: &str,
    offset: usize,
    out: &mut Vec<(ConstraintOp, Version)>,
) -> Result<(), ParseError> {
    // Wildcards first; `1.2.*` would otherwise fail version parsing
    if part.contains('*') {
        return parse_wildcard(part, original, offset, out);
    }

    if let Some(rest) = part.strip_prefix('^') {
        return parse_caret(rest, original, offset, out);
    }

    if let Some(rest) = part.strip_prefix('~') {
        let base = Version::parse(rest)
            .map_err(|_| ParseError::constraint(original, offset, "a version after '~'"))?;
        let upper = Version::new(base.major, base.minor + 1, 0);
        out.push((ConstraintOp::Ge, base));
        out.push((ConstraintOp::Lt, upper));
        return Ok(());
    }

    for (prefix, op) in [
        (">=", ConstraintOp::Ge),
        ("<=", ConstraintOp::Le),
        (">", ConstraintOp::Gt),
        ("<", ConstraintOp::Lt),
        ("=", ConstraintOp::Eq),
    ] {
        if let Some(rest) = part.strip_prefix(prefix) {
            let version = Version::parse(rest).map_err(|_| {
                ParseError::constraint(original, offset + prefix.len(), "a version after operator")
            })?;
            out.push((op, version));
            return Ok(());
        }
    }

    // Bare version: exact match
    let version = Version::parse(part)
        .map_err(|_| ParseError::constraint(original, offset, "an operator or version"))?;
    out.push((ConstraintOp::Eq, version));
    Ok(())
}

/// Caret: compatible within the leftmost non-zero component.
/// `^1.2.3` -> >=1.2.3 <2.0.0; `^0.2.3` -> >=0.2.3 <0.3.0;
/// `^0.0.3` -> >=0.0.3 <0.0.4.
fn parse_caret(
    rest: &str,
    original: &str,
    offset: usize,
    out: &mut Vec<(ConstraintOp, Version)>,
) -> Result<(), ParseError> {
    let base = Version::parse(rest)
        .map_err(|_| ParseError::constraint(original, offset, "a version after '^'"))?;

    let upper = if base.major > 0 {
        Version::new(base.major + 1, 0, 0)
    } else if base.minor > 0 {
        Version::new(0, base.minor + 1, 0)
    } else {
        Version::new(0, 0, base.patch + 1)
    };

    out.push((ConstraintOp::Ge, base));
    out.push((ConstraintOp::Lt, upper));
    Ok(())
}

fn parse_wildcard(
    part: &str,
    original: &str,
    offset: usize,
    out: &mut Vec<(ConstraintOp, Version)>,
) -> Result<(), ParseError> {
    if part == "*" {
        out.push((ConstraintOp::Ge, Version::new(0, 0, 0)));
        return Ok(());
    }

    let segments: Vec<&str> = part.split('.').collect();
    let bad = || ParseError::constraint(original, offset, "'*', 'MAJOR.*' or 'MAJOR.MINOR.*'");

    match segments.as_slice() {
        [major, "*"] | [major, "*", "*"] => {
            let major: u64 = major.parse().map_err(|_| bad())?;
            out.push((ConstraintOp::Ge, Version::new(major, 0, 0)));
            out.push((ConstraintOp::Lt, Version::new(major + 1, 0, 0)));
            Ok(())
        }
        [major, minor, "*"] => {
            let major: u64 = major.parse().map_err(|_| bad())?;
            let minor: u64 = minor.parse().map_err(|_| bad())?;
            out.push((ConstraintOp::Ge, Version::new(major, minor, 0)));
            out.push((ConstraintOp::Lt, Version::new(major, minor + 1, 0)));
            Ok(())
        }
        _ => Err(bad()),
    }
}

/// Convenience: does `version` satisfy `constraint`? Both are parsed.
pub fn satisfies(version: &str, constraint: &str) -> Result<bool, ParseError> {
    let version = Version::parse(version)?;
    let constraint = VersionConstraint::parse(constraint)?;
    Ok(constraint.satisfies(&version))
}
