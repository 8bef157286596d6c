//! Declarative build-recipe engine for versioned native dependencies.
//!
//! A recipe is a TOML document describing a buildable package: its versioned
//! requirements, its build-settings matrix and options, how an external tool
//! is invoked, and how the tool's outputs are classified into a package
//! layout (headers, lib, bin) for downstream consumers.
//!
//! # Example Recipe
//!
//! ```toml
//! [package]
//! name = "vkaEngine"
//! version = "0.0.1"
//!
//! requires = ["glm/0.9.9.1@g-truc/stable", "spdlog/1.3.0@bincrafters/stable"]
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
//! pattern = "*.a"
//! dest = "lib"
//! flatten = true
//!
//! [metadata]
//! libs = ["vkaEngine"]
//! include_dirs = ["src"]
//! ```
//!
//! # Data Flow
//!
//! Requirements resolve against a [`index::PackageIndex`] into pinned
//! references; a [`settings::Configuration`] parameterizes one
//! [`lifecycle::RecipeInstance`], which moves through
//! `Loaded -> Configured -> Built -> Packaged -> Published` driving an
//! external [`lifecycle::BuildTool`]; the outputs are classified by
//! [`classifier::classify`] into a package layout whose metadata feeds the
//! next recipe's resolution. The [`engine::Engine`] drives the whole flow
//! and coalesces duplicate builds per canonical configuration key.

pub mod cache;
pub mod classifier;
pub mod engine;
pub mod export;
pub mod index;
pub mod invoke;
pub mod lifecycle;
pub mod output;
pub mod recipe;
pub mod reference;
pub mod requirements;
pub mod settings;
pub mod store;

pub use engine::{BuildReport, Engine, EngineError};
pub use recipe::{Recipe, RecipeMetadata};
pub use reference::{PackageReference, Version, VersionSpec};
pub use requirements::{Requirement, RequirementSet};
pub use settings::{Configuration, Profile, SettingsMatrix};
