//! Package reference and version parsing.
//!
//! References follow the `name/version[@owner/channel]` grammar:
//! - `glm/0.9.9.1@g-truc/stable` - pinned version with owner/channel
//! - `spdlog/>=1.2,<2.0@bincrafters/stable` - version range
//! - `zlib/latest` - wildcard, concretized during resolution

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("invalid package reference: {0}")]
    InvalidReference(String),
    #[error("invalid version: {0}")]
    InvalidVersion(String),
    #[error("invalid version range: {0}")]
    InvalidRange(String),
}

/// One dot-separated version segment. Numeric when all digits.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Number(u64),
    Text(String),
}

impl Segment {
    fn parse(s: &str) -> Segment {
        match s.parse::<u64>() {
            Ok(n) => Segment::Number(n),
            Err(_) => Segment::Text(s.to_string()),
        }
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Number(a), Segment::Number(b)) => a.cmp(b),
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
            // Numeric segments order above non-numeric at the same position,
            // so mixed comparisons stay deterministic.
            (Segment::Number(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(_), Segment::Number(_)) => Ordering::Less,
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Number(n) => write!(f, "{}", n),
            Segment::Text(t) => write!(f, "{}", t),
        }
    }
}

/// A concrete version: dot-separated segments, mixed numeric and text.
///
/// Accepts schemes semver would reject (`20180214`, `0.2`, `2.5.0.1`).
/// A version that is a strict prefix of a longer one orders below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<Segment>,
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::InvalidVersion("empty version".to_string()));
        }
        if s.split('.').any(|seg| seg.is_empty()) {
            return Err(ParseError::InvalidVersion(s.to_string()));
        }
        Ok(Version {
            segments: s.split('.').map(Segment::parse).collect(),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.segments.iter().zip(other.segments.iter()) {
            match a.cmp(b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.segments.len().cmp(&other.segments.len())
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Comparison operators usable inside a version range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Op {
    fn token(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
        }
    }
}

/// One `op version` clause of a range, e.g. `>=1.2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparator {
    pub op: Op,
    pub version: Version,
}

impl Comparator {
    pub fn matches(&self, version: &Version) -> bool {
        match self.op {
            Op::Eq => version == &self.version,
            Op::Gt => version > &self.version,
            Op::Gte => version >= &self.version,
            Op::Lt => version < &self.version,
            Op::Lte => version <= &self.version,
        }
    }

    fn parse(s: &str) -> Result<Self, ParseError> {
        let s = s.trim();
        // Two-char operators first so ">=" doesn't parse as ">" + "=1.2".
        for op in [Op::Gte, Op::Lte, Op::Gt, Op::Lt, Op::Eq] {
            if let Some(rest) = s.strip_prefix(op.token()) {
                let version = rest.trim().parse()?;
                return Ok(Comparator { op, version });
            }
        }
        Err(ParseError::InvalidRange(s.to_string()))
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.token(), self.version)
    }
}

/// The version part of a package reference.
///
/// `Latest` satisfies any concrete version but is always concretized during
/// resolution; it never enters the build stage unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Exact(Version),
    Range(Vec<Comparator>),
    Latest,
}

impl VersionSpec {
    /// Check whether a concrete version satisfies this spec.
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Exact(v) => version == v,
            VersionSpec::Range(comparators) => comparators.iter().all(|c| c.matches(version)),
            VersionSpec::Latest => true,
        }
    }

    /// True for an exact, already-concrete version.
    pub fn is_pinned(&self) -> bool {
        matches!(self, VersionSpec::Exact(_))
    }
}

impl FromStr for VersionSpec {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "latest" {
            return Ok(VersionSpec::Latest);
        }
        if s.starts_with(['>', '<', '=']) {
            let comparators = s
                .split(',')
                .map(Comparator::parse)
                .collect::<Result<Vec<_>, _>>()?;
            if comparators.is_empty() {
                return Err(ParseError::InvalidRange(s.to_string()));
            }
            return Ok(VersionSpec::Range(comparators));
        }
        Ok(VersionSpec::Exact(s.parse()?))
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Exact(v) => write!(f, "{}", v),
            VersionSpec::Range(comparators) => {
                for (i, c) in comparators.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", c)?;
                }
                Ok(())
            }
            VersionSpec::Latest => write!(f, "latest"),
        }
    }
}

/// A parsed `name/version[@owner/channel]` reference.
///
/// Immutable once parsed; `Display` reproduces the source string exactly for
/// exact-version references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageReference {
    pub name: String,
    pub version: VersionSpec,
    pub ownership: Option<Ownership>,
}

/// The `owner/channel` suffix of a reference, e.g. `bincrafters/stable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ownership {
    pub owner: String,
    pub channel: String,
}

impl PackageReference {
    /// Build a reference pinned to a concrete version.
    pub fn pinned(name: &str, version: Version, ownership: Option<Ownership>) -> Self {
        Self {
            name: name.to_string(),
            version: VersionSpec::Exact(version),
            ownership,
        }
    }

    /// The concrete version, if this reference is pinned.
    pub fn concrete_version(&self) -> Option<&Version> {
        match &self.version {
            VersionSpec::Exact(v) => Some(v),
            _ => None,
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
}

impl FromStr for PackageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (head, ownership) = match s.split_once('@') {
            Some((head, tail)) => {
                let (owner, channel) = tail
                    .split_once('/')
                    .ok_or_else(|| ParseError::InvalidReference(s.to_string()))?;
                if !valid_name(owner) || !valid_name(channel) {
                    return Err(ParseError::InvalidReference(s.to_string()));
                }
                (
                    head,
                    Some(Ownership {
                        owner: owner.to_string(),
                        channel: channel.to_string(),
                    }),
                )
            }
            None => (s, None),
        };

        let (name, version) = head
            .split_once('/')
            .ok_or_else(|| ParseError::InvalidReference(s.to_string()))?;
        if !valid_name(name) {
            return Err(ParseError::InvalidReference(s.to_string()));
        }

        Ok(PackageReference {
            name: name.to_string(),
            version: version.parse()?,
            ownership,
        })
    }
}

impl fmt::Display for PackageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let Some(ref own) = self.ownership {
            write!(f, "@{}/{}", own.owner, own.channel)?;
        }
        Ok(())
    }
}
