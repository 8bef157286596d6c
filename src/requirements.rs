//! Requirement sets and dependency resolution.
//!
//! A recipe's declared requirements (plus any collected transitively) are
//! resolved against a package index into one concrete reference per package
//! name. Conflicts are never resolved by "last wins": differing requests for
//! the same package fail resolution unless one is an explicit override.
//! Every conflict and unresolved requirement is collected and reported in a
//! single pass.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::index::PackageIndex;
use crate::reference::{PackageReference, Version, VersionSpec};

/// One declared dependency request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub reference: PackageReference,
    /// Explicit overrides win over transitively conflicting requests
    /// (including `latest`), demoting the conflict to a warning.
    pub is_override: bool,
    /// Who declared this requirement, for conflict reports.
    pub required_by: String,
}

impl Requirement {
    pub fn new(reference: PackageReference, required_by: &str) -> Self {
        Self {
            reference,
            is_override: false,
            required_by: required_by.to_string(),
        }
    }

    pub fn with_override(mut self) -> Self {
        self.is_override = true;
        self
    }
}

/// A version conflict between requesters of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionConflict {
    pub package: String,
    /// (required_by, requested version spec), in declaration order.
    pub requests: Vec<(String, String)>,
}

impl fmt::Display for VersionConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version conflict for '{}':", self.package)?;
        for (requester, spec) in &self.requests {
            write!(f, "\n  {} requires {}/{}", requester, self.package, spec)?;
        }
        Ok(())
    }
}

/// A requirement the index could not concretize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub reference: PackageReference,
    pub required_by: String,
    pub available: Vec<Version>,
}

impl fmt::Display for UnresolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot resolve {} (required by {})",
            self.reference, self.required_by
        )?;
        if self.available.is_empty() {
            write!(f, ": no versions known to the index")
        } else {
            let listed: Vec<String> = self.available.iter().map(Version::to_string).collect();
            write!(f, ": available versions {}", listed.join(", "))
        }
    }
}

/// All resolution failures from one pass, reported together so a caller can
/// fix every declaration in one iteration.
#[derive(Error, Debug)]
#[error("{}", self.render())]
pub struct ResolveError {
    pub conflicts: Vec<VersionConflict>,
    pub unresolved: Vec<UnresolvedDependency>,
}

impl ResolveError {
    fn render(&self) -> String {
        let mut lines = Vec::new();
        for conflict in &self.conflicts {
            lines.push(conflict.to_string());
        }
        for dep in &self.unresolved {
            lines.push(dep.to_string());
        }
        lines.join("\n")
    }
}

/// An override that silenced a conflicting request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideNote {
    pub package: String,
    pub winner: String,
    pub overridden: Vec<(String, String)>,
}

impl fmt::Display for OverrideNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "override pins {}/{}", self.package, self.winner)?;
        for (requester, spec) in &self.overridden {
            write!(f, "; ignores {}/{} from {}", self.package, spec, requester)?;
        }
        Ok(())
    }
}

/// The outcome of a successful resolution: one concrete reference per
/// package, in declaration order, plus warning-level override notes.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pinned: Vec<PackageReference>,
    pub warnings: Vec<OverrideNote>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&PackageReference> {
        self.pinned.iter().find(|r| r.name == name)
    }

    pub fn pinned(&self) -> &[PackageReference] {
        &self.pinned
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }
}

/// The declared requirements of one recipe graph, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RequirementSet {
    requirements: Vec<Requirement>,
}

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, requirement: Requirement) {
        self.requirements.push(requirement);
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter()
    }

    /// Resolve every requirement to a concrete reference.
    ///
    /// Deterministic: packages are processed in declaration order of their
    /// first request, and for a fixed index state resolving twice yields
    /// identical results. All conflicts and unresolved requirements are
    /// gathered before failing.
    pub fn resolve(&self, index: &dyn PackageIndex) -> Result<Resolution, ResolveError> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&Requirement>> = HashMap::new();
        for req in &self.requirements {
            let name = req.reference.name.as_str();
            groups.entry(name).or_insert_with(|| {
                order.push(name);
                Vec::new()
            });
            groups.get_mut(name).unwrap().push(req);
        }

        let mut resolution = Resolution::default();
        let mut conflicts = Vec::new();
        let mut unresolved = Vec::new();

        for name in order {
            let group = &groups[name];
            let winner = match elect_winner(name, group) {
                Ok((winner, note)) => {
                    resolution.warnings.extend(note);
                    winner
                }
                Err(conflict) => {
                    conflicts.push(conflict);
                    continue;
                }
            };

            match concretize(winner, index) {
                Ok(reference) => resolution.pinned.push(reference),
                Err(dep) => unresolved.push(dep),
            }
        }

        if conflicts.is_empty() && unresolved.is_empty() {
            Ok(resolution)
        } else {
            Err(ResolveError {
                conflicts,
                unresolved,
            })
        }
    }
}

/// Pick the winning requirement for one package, or report the conflict.
///
/// Overrides beat everything, including `latest`; a lone `latest` defers to
/// any pinning request without conflict; otherwise differing specs conflict.
fn elect_winner<'a>(
    name: &str,
    group: &[&'a Requirement],
) -> Result<(&'a Requirement, Option<OverrideNote>), VersionConflict> {
    let overrides: Vec<&'a Requirement> =
        group.iter().copied().filter(|r| r.is_override).collect();

    if let Some(&first) = overrides.first() {
        if overrides
            .iter()
            .any(|r| r.reference.version != first.reference.version)
        {
            // Two overrides that disagree cannot be reconciled.
            return Err(conflict_of(name, &overrides));
        }
        let losers: Vec<(String, String)> = group
            .iter()
            .filter(|r| !r.is_override && r.reference.version != first.reference.version)
            .map(|r| (r.required_by.clone(), r.reference.version.to_string()))
            .collect();
        let note = (!losers.is_empty()).then(|| OverrideNote {
            package: name.to_string(),
            winner: first.reference.version.to_string(),
            overridden: losers,
        });
        return Ok((first, note));
    }

    // `latest` is a wildcard; it only wins when nothing pins.
    let pinning: Vec<&'a Requirement> = group
        .iter()
        .copied()
        .filter(|r| r.reference.version != VersionSpec::Latest)
        .collect();
    let contenders = if pinning.is_empty() {
        group.to_vec()
    } else {
        pinning
    };

    let first = contenders[0];
    if contenders
        .iter()
        .any(|r| r.reference.version != first.reference.version)
    {
        return Err(conflict_of(name, &contenders));
    }
    Ok((first, None))
}

fn conflict_of(name: &str, requesters: &[&Requirement]) -> VersionConflict {
    VersionConflict {
        package: name.to_string(),
        requests: requesters
            .iter()
            .map(|r| (r.required_by.clone(), r.reference.version.to_string()))
            .collect(),
    }
}

/// Concretize one requirement against the index.
fn concretize(
    requirement: &Requirement,
    index: &dyn PackageIndex,
) -> Result<PackageReference, UnresolvedDependency> {
    let reference = &requirement.reference;
    let available = index.list_versions(&reference.name, reference.ownership.as_ref());

    let chosen = match &reference.version {
        VersionSpec::Exact(v) => available.iter().find(|a| *a == v).cloned(),
        // Highest listed version wins; the index decides availability.
        _ => available
            .iter()
            .filter(|a| reference.version.satisfies(a))
            .max()
            .cloned(),
    };

    match chosen {
        Some(version) => Ok(PackageReference::pinned(
            &reference.name,
            version,
            reference.ownership.clone(),
        )),
        None => Err(UnresolvedDependency {
            reference: reference.clone(),
            required_by: requirement.required_by.clone(),
            available,
        }),
    }
}
