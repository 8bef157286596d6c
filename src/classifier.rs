//! Artifact classification - maps build outputs into a package layout.
//!
//! An ordered list of glob rules is evaluated against the build output tree.
//! Every matching rule copies the file into its destination category, so one
//! file may land in several categories. Flattened destinations collapse the
//! directory structure (native libraries from differently-pathed build dirs
//! converge into one flat `lib`/`bin`); unflattened destinations keep the
//! relative path (header trees stay `#include`-able downstream).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("invalid artifact pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// Two distinct sources mapped to one destination path. Never resolved
    /// by overwriting; the caller must adjust the rules.
    #[error(
        "packaging collision: '{first}' and '{second}' both map to '{dest}'",
        first = first.display(),
        second = second.display(),
        dest = dest.display()
    )]
    PackagingCollision {
        dest: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
}

/// Destination category inside a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Headers,
    Lib,
    Bin,
}

impl Destination {
    pub fn dir_name(self) -> &'static str {
        match self {
            Destination::Headers => "headers",
            Destination::Lib => "lib",
            Destination::Bin => "bin",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// One packaging rule, applied in declaration order.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactRule {
    pub pattern: String,
    pub dest: Destination,
    #[serde(default)]
    pub flatten: bool,
}

impl ArtifactRule {
    pub fn new(pattern: &str, dest: Destination, flatten: bool) -> Self {
        Self {
            pattern: pattern.to_string(),
            dest,
            flatten,
        }
    }
}

/// The classified package: destination-relative path -> source path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageLayout {
    entries: BTreeMap<PathBuf, PathBuf>,
}

impl PackageLayout {
    /// All copy operations as (source, destination) pairs. Destinations are
    /// package-relative, category directory included.
    pub fn copy_ops(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries.iter().map(|(dest, src)| (src.as_path(), dest.as_path()))
    }

    /// Destination paths under one category.
    pub fn files_in(&self, dest: Destination) -> impl Iterator<Item = &Path> {
        self.entries
            .keys()
            .filter(move |p| p.starts_with(dest.dir_name()))
            .map(PathBuf::as_path)
    }

    pub fn contains(&self, dest: &str) -> bool {
        self.entries.contains_key(Path::new(dest))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walk the output listing once and apply the rules in order.
///
/// Files matching no rule are excluded, not an error. Glob `*` spans
/// directory separators, so `*.hpp` matches `inc/a/x.hpp`.
pub fn classify(
    files: &[PathBuf],
    rules: &[ArtifactRule],
) -> Result<PackageLayout, ClassifyError> {
    let compiled = rules
        .iter()
        .map(|rule| {
            Pattern::new(&rule.pattern).map_err(|source| ClassifyError::BadPattern {
                pattern: rule.pattern.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let options = MatchOptions {
        require_literal_separator: false,
        ..MatchOptions::new()
    };

    let mut layout = PackageLayout::default();
    for file in files {
        for (rule, pattern) in rules.iter().zip(&compiled) {
            if !pattern.matches_path_with(file, options) {
                continue;
            }

            let relative = if rule.flatten {
                PathBuf::from(file.file_name().unwrap_or(file.as_os_str()))
            } else {
                file.clone()
            };
            let dest = Path::new(rule.dest.dir_name()).join(relative);

            match layout.entries.get(&dest) {
                // Same source matched twice (two rules, one target): fine.
                Some(existing) if existing == file => {}
                Some(existing) => {
                    return Err(ClassifyError::PackagingCollision {
                        dest,
                        first: existing.clone(),
                        second: file.clone(),
                    });
                }
                None => {
                    layout.entries.insert(dest, file.clone());
                }
            }
        }
    }
    Ok(layout)
}
