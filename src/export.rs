//! Export filtering - selects the files shipped with a recipe definition.
//!
//! Includes are applied first, then excludes; an exclude always wins. This
//! keeps local build-output directories out of a distributed recipe.

use std::path::PathBuf;

use glob::{MatchOptions, Pattern};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("invalid export pattern '{pattern}': {source}")]
    BadPattern {
        pattern: String,
        source: glob::PatternError,
    },
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ExportError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| ExportError::BadPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Filter a source listing down to the exported set, preserving order.
///
/// An empty include list exports nothing; excludes are applied afterwards
/// and take precedence on conflict.
pub fn filter(
    files: &[PathBuf],
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>, ExportError> {
    let include = compile(include)?;
    let exclude = compile(exclude)?;

    let options = MatchOptions {
        require_literal_separator: false,
        ..MatchOptions::new()
    };

    Ok(files
        .iter()
        .filter(|file| include.iter().any(|p| p.matches_path_with(file, options)))
        .filter(|file| !exclude.iter().any(|p| p.matches_path_with(file, options)))
        .cloned()
        .collect())
}
