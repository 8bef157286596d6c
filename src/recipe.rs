//! Recipe model - the declarative surface the engine consumes.
//!
//! A recipe is a TOML document:
//!
//! ```toml
//! [package]
//! name = "vkaEngine"
//! version = "0.0.1"
//! license = "MIT"
//!
//! requires = ["glm/0.9.9.1@g-truc/stable", "spdlog/1.3.0@bincrafters/stable"]
//!
//! [build]
//! tool = "cmake"
//! policy = "missing"
//!
//! [settings]
//! os = ["linux", "windows", "macos"]
//! build_type = ["debug", "release"]
//! arch = ["x86", "x64", "arm64"]
//!
//! [options.shared]
//! values = [false, true]
//! default = false
//!
//! [[artifacts]]
//! pattern = "*.hpp"
//! dest = "headers"
//!
//! [[artifacts]]
//! pattern = "*.lib"
//! dest = "lib"
//! flatten = true
//!
//! [export]
//! include = ["src/*"]
//! exclude = ["build/*"]
//!
//! [metadata]
//! libs = ["vkaEngine"]
//! include_dirs = ["src"]
//! ```
//!
//! References and option defaults are validated once at load time; a loaded
//! `Recipe` is immutable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::ArtifactRule;
use crate::reference::{PackageReference, ParseError, Version, VersionSpec};
use crate::requirements::{Requirement, RequirementSet};
use crate::settings::{OptionDecl, SettingsError, SettingsMatrix};

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("failed to read recipe: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse recipe: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid requirement in recipe: {0}")]
    Reference(#[from] ParseError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("requirement '{0}' cannot be both override and latest")]
    OverrideLatest(String),
}

/// Metadata a packaged recipe publishes for downstream consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMetadata {
    /// Library names to link, in link order.
    #[serde(default)]
    pub libs: Vec<String>,
    /// Include directories, relative to the package root.
    #[serde(default)]
    pub include_dirs: Vec<PathBuf>,
}

/// When to rebuild: consult the store first, or always.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPolicy {
    #[default]
    Missing,
    Always,
}

/// External build-tool hint plus rebuild policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildDecl {
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default)]
    pub policy: BuildPolicy,
}

fn default_tool() -> String {
    "cmake".to_string()
}

impl Default for BuildDecl {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            policy: BuildPolicy::Missing,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PackageFields {
    name: String,
    version: String,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    requires: Vec<RequireEntry>,
}

/// A requirement entry: plain reference string, or a table with flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RequireEntry {
    Plain(String),
    Detailed {
        #[serde(rename = "ref")]
        reference: String,
        #[serde(default)]
        r#override: bool,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportSpec {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecipeDoc {
    package: PackageFields,
    #[serde(default)]
    build: BuildDecl,
    #[serde(default)]
    settings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    options: BTreeMap<String, OptionDecl>,
    #[serde(default)]
    artifacts: Vec<ArtifactRule>,
    #[serde(default)]
    export: ExportSpec,
    #[serde(default)]
    metadata: RecipeMetadata,
}

/// A loaded, validated recipe.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub version: Version,
    pub license: Option<String>,
    pub author: Option<String>,
    pub url: Option<String>,
    pub description: Option<String>,
    pub build: BuildDecl,
    pub artifacts: Vec<ArtifactRule>,
    pub export: ExportSpec,
    pub metadata: RecipeMetadata,
    requires: Vec<Requirement>,
    settings: BTreeMap<String, Vec<String>>,
    options: BTreeMap<String, OptionDecl>,
}

impl Recipe {
    /// Parse and validate a recipe document.
    pub fn parse(source: &str) -> Result<Self, RecipeError> {
        let doc: RecipeDoc = toml::from_str(source)?;

        let version: Version = doc.package.version.parse()?;
        let required_by = format!("{}/{}", doc.package.name, version);

        let mut requires = Vec::with_capacity(doc.package.requires.len());
        for entry in &doc.package.requires {
            let (raw, is_override) = match entry {
                RequireEntry::Plain(s) => (s.as_str(), false),
                RequireEntry::Detailed {
                    reference,
                    r#override,
                } => (reference.as_str(), *r#override),
            };
            let reference: PackageReference = raw.parse()?;
            if is_override && reference.version == VersionSpec::Latest {
                // An override must pin; "latest override" is meaningless.
                return Err(RecipeError::OverrideLatest(raw.to_string()));
            }
            let mut requirement = Requirement::new(reference, &required_by);
            if is_override {
                requirement = requirement.with_override();
            }
            requires.push(requirement);
        }

        let matrix = SettingsMatrix::new(doc.settings.clone(), doc.options.clone());
        matrix.check()?;

        Ok(Recipe {
            name: doc.package.name,
            version,
            license: doc.package.license,
            author: doc.package.author,
            url: doc.package.url,
            description: doc.package.description,
            build: doc.build,
            artifacts: doc.artifacts,
            export: doc.export,
            metadata: doc.metadata,
            requires,
            settings: doc.settings,
            options: doc.options,
        })
    }

    /// Load a recipe from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RecipeError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// This recipe's own pinned reference.
    pub fn reference(&self) -> PackageReference {
        PackageReference::pinned(&self.name, self.version.clone(), None)
    }

    /// The declared requirements as a fresh set, in declaration order.
    pub fn requirement_set(&self) -> RequirementSet {
        let mut set = RequirementSet::new();
        for requirement in &self.requires {
            set.add(requirement.clone());
        }
        set
    }

    pub fn requires(&self) -> &[Requirement] {
        &self.requires
    }

    /// The declared settings matrix and options.
    pub fn matrix(&self) -> SettingsMatrix {
        SettingsMatrix::new(self.settings.clone(), self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Destination;
    use crate::settings::{OptionValue, Profile};

    const VKA: &str = r#"
[package]
name = "vkaEngine"
version = "0.0.1"
license = "MIT"
description = "A vulkan rendering framework"

requires = [
    "glm/0.9.9.1@g-truc/stable",
    "spdlog/1.3.0@bincrafters/stable",
]

[build]
tool = "cmake"
policy = "missing"

[settings]
os = ["linux", "windows", "macos"]
build_type = ["debug", "release"]
arch = ["x86", "x64", "arm64"]

[options.shared]
values = [false, true]
default = false

[[artifacts]]
pattern = "*.hpp"
dest = "headers"

[[artifacts]]
pattern = "*.lib"
dest = "lib"
flatten = true

[export]
include = ["src/*"]
exclude = ["build/*"]

[metadata]
libs = ["vkaEngine"]
include_dirs = ["src"]
"#;

    #[test]
    fn test_parse_full_recipe() {
        let recipe = Recipe::parse(VKA).unwrap();
        assert_eq!(recipe.name, "vkaEngine");
        assert_eq!(recipe.reference().to_string(), "vkaEngine/0.0.1");
        assert_eq!(recipe.requires().len(), 2);
        assert_eq!(
            recipe.requires()[0].reference.to_string(),
            "glm/0.9.9.1@g-truc/stable"
        );
        assert_eq!(recipe.requires()[0].required_by, "vkaEngine/0.0.1");
        assert_eq!(recipe.build.tool, "cmake");
        assert_eq!(recipe.build.policy, BuildPolicy::Missing);
        assert_eq!(recipe.artifacts.len(), 2);
        assert_eq!(recipe.artifacts[0].dest, Destination::Headers);
        assert!(!recipe.artifacts[0].flatten);
        assert_eq!(recipe.metadata.libs, vec!["vkaEngine"]);
        assert_eq!(recipe.metadata.include_dirs, vec![PathBuf::from("src")]);
    }

    #[test]
    fn test_matrix_from_recipe() {
        let recipe = Recipe::parse(VKA).unwrap();
        let mut profile = Profile::default();
        for (k, v) in [("os", "linux"), ("build_type", "release"), ("arch", "x64")] {
            profile.settings.insert(k.to_string(), v.to_string());
        }
        let config = recipe.matrix().instantiate(&profile).unwrap();
        assert_eq!(config.option("shared"), Some(&OptionValue::Bool(false)));
    }

    #[test]
    fn test_override_entry() {
        let recipe = Recipe::parse(
            r#"
[package]
name = "app"
version = "1.0"
requires = [
    "zlib/1.2.11",
    { ref = "zlib/1.2.8@conan/stable", override = true },
]
"#,
        )
        .unwrap();
        assert!(!recipe.requires()[0].is_override);
        assert!(recipe.requires()[1].is_override);
    }

    #[test]
    fn test_rejects_bad_reference() {
        let err = Recipe::parse(
            r#"
[package]
name = "app"
version = "1.0"
requires = ["not a reference"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, RecipeError::Reference(_)));
    }

    #[test]
    fn test_rejects_latest_override() {
        let err = Recipe::parse(
            r#"
[package]
name = "app"
version = "1.0"
requires = [{ ref = "zlib/latest", override = true }]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, RecipeError::OverrideLatest(_)));
    }

    #[test]
    fn test_rejects_bad_option_default() {
        let err = Recipe::parse(
            r#"
[package]
name = "app"
version = "1.0"

[options.shared]
values = [false]
default = true
"#,
        )
        .unwrap_err();
        assert!(matches!(err, RecipeError::Settings(_)));
    }
}
