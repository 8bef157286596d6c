//! Build-settings matrix and configuration instantiation.
//!
//! A recipe declares a matrix of settings (os, compiler, build_type, arch,
//! cppstd) with closed value sets, plus options with defaults (shared).
//! Instantiation validates a request against the declaration and produces a
//! `Configuration` whose canonical key identifies the build artifact.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// Every problem with the request, collected in one pass.
    #[error("invalid build configuration: {}", problems.join("; "))]
    InvalidSetting { problems: Vec<String> },
}

/// A single option value as written in a recipe or profile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Str(s) => write!(f, "{}", s),
        }
    }
}

/// Declared option: finite value set plus a default.
#[derive(Debug, Clone, Deserialize)]
pub struct OptionDecl {
    pub values: Vec<OptionValue>,
    pub default: OptionValue,
}

/// Requested settings and options, e.g. parsed from a profile file or `-s`/
/// `-o` flags. Missing options fall back to declared defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionValue>,
}

/// The declared settings axes and options of one recipe.
#[derive(Debug, Clone, Default)]
pub struct SettingsMatrix {
    settings: BTreeMap<String, Vec<String>>,
    options: BTreeMap<String, OptionDecl>,
}

impl SettingsMatrix {
    pub fn new(
        settings: BTreeMap<String, Vec<String>>,
        options: BTreeMap<String, OptionDecl>,
    ) -> Self {
        Self { settings, options }
    }

    /// Validate the declaration itself: option defaults must be members of
    /// their own value sets.
    pub fn check(&self) -> Result<(), SettingsError> {
        let problems: Vec<String> = self
            .options
            .iter()
            .filter(|(_, decl)| !decl.values.contains(&decl.default))
            .map(|(name, decl)| {
                format!(
                    "default '{}' for option '{}' is not in its value set",
                    decl.default, name
                )
            })
            .collect();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::InvalidSetting { problems })
        }
    }

    /// Validate a request against the declaration and bind a configuration.
    ///
    /// Every declared setting needs a requested value; unknown names and
    /// out-of-set values are rejected. All problems are reported together.
    pub fn instantiate(&self, profile: &Profile) -> Result<Configuration, SettingsError> {
        let mut problems = Vec::new();

        for (name, value) in &profile.settings {
            match self.settings.get(name) {
                None => problems.push(format!("unknown setting '{}'", name)),
                Some(allowed) if !allowed.iter().any(|v| v == value) => problems.push(format!(
                    "value '{}' not allowed for setting '{}' (allowed: {})",
                    value,
                    name,
                    allowed.join(", ")
                )),
                Some(_) => {}
            }
        }
        for name in self.settings.keys() {
            if !profile.settings.contains_key(name) {
                problems.push(format!("missing value for setting '{}'", name));
            }
        }

        let mut options = BTreeMap::new();
        for (name, value) in &profile.options {
            match self.options.get(name) {
                None => problems.push(format!("unknown option '{}'", name)),
                Some(decl) if !decl.values.contains(value) => problems.push(format!(
                    "value '{}' not allowed for option '{}'",
                    value, name
                )),
                Some(_) => {
                    options.insert(name.clone(), value.clone());
                }
            }
        }
        for (name, decl) in &self.options {
            options
                .entry(name.clone())
                .or_insert_with(|| decl.default.clone());
        }

        if !problems.is_empty() {
            return Err(SettingsError::InvalidSetting { problems });
        }

        Ok(Configuration {
            settings: profile.settings.clone(),
            options,
        })
    }
}

/// A validated binding of one point in the settings × options space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    settings: BTreeMap<String, String>,
    options: BTreeMap<String, OptionValue>,
}

impl Configuration {
    pub fn setting(&self, name: &str) -> Option<&str> {
        self.settings.get(name).map(String::as_str)
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn settings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.settings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.options.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Canonical, order-independent encoding of this configuration.
    ///
    /// Two instantiations with the same values produce the same key no
    /// matter how the request was spelled; build caches rely on this for
    /// artifact identity.
    pub fn canonical_key(&self) -> String {
        // Namespace prefixes keep a setting and an option with the same
        // name from aliasing in the key.
        let mut parts: Vec<String> = self
            .settings
            .iter()
            .map(|(k, v)| format!("s:{}={}", k, v))
            .collect();
        parts.extend(self.options.iter().map(|(k, v)| format!("o:{}={}", k, v)));
        parts.sort();
        parts.join(";")
    }

    /// Short hex digest of the canonical key, for store directory names.
    pub fn key_digest(&self) -> String {
        let digest = Sha256::digest(self.canonical_key().as_bytes());
        hex::encode(&digest[..8])
    }
}
