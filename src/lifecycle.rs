//! Recipe lifecycle - drives one build configuration through its stages.
//!
//! A `RecipeInstance` binds one recipe to one configuration and moves
//! through `Loaded -> Configured -> Built -> Packaged -> Published`, one
//! direction, no skipping. The external build tool is a collaborator behind
//! the `BuildTool` trait: the engine emits an invocation descriptor and
//! consumes an exit outcome plus the produced file listing; it never touches
//! a compiler itself.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::classifier::{classify, ClassifyError, PackageLayout};
use crate::recipe::{Recipe, RecipeMetadata};
use crate::requirements::Resolution;
use crate::settings::Configuration;

/// Lifecycle stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Loaded,
    Configured,
    Built,
    Packaged,
    Published,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loaded => "loaded",
            Stage::Configured => "configured",
            Stage::Built => "built",
            Stage::Packaged => "packaged",
            Stage::Published => "published",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("cannot {action} an instance in stage '{stage}'")]
    InvalidTransition { action: &'static str, stage: Stage },

    /// External tool failure. Fatal for this instance; retrying a native
    /// build blindly is not safe, so retries are caller policy.
    #[error("build failed ({})", match code {
        Some(code) => format!("exit code {}", code),
        None if *timed_out => "timed out".to_string(),
        None => "tool did not start".to_string(),
    })]
    BuildFailed { code: Option<i32>, timed_out: bool },

    #[error("configure failed: {0}")]
    ConfigureFailed(String),

    #[error(transparent)]
    Packaging(#[from] ClassifyError),
}

/// What the engine hands the external build tool: a complete command
/// description plus the directory its outputs are expected under.
/// Translating settings into toolchain flags is the adapter's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInvocation {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    pub output_dir: PathBuf,
}

/// What came back from the tool.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    /// Exit code zero; `outputs` lists produced files relative to the
    /// invocation's output directory.
    Success { outputs: Vec<PathBuf> },
    Failed { code: Option<i32> },
    /// A caller-imposed timeout fired.
    TimedOut,
}

/// External build-tool collaborator.
pub trait BuildTool {
    /// Translate a recipe + configuration + resolved dependencies into an
    /// invocation descriptor.
    fn configure(
        &self,
        recipe: &Recipe,
        config: &Configuration,
        resolution: &Resolution,
    ) -> Result<BuildInvocation, LifecycleError>;

    /// Run the descriptor, blocking until the tool exits.
    fn invoke(&self, invocation: &BuildInvocation) -> BuildOutcome;
}

/// One recipe bound to one configuration, passing through the lifecycle
/// exactly once.
#[derive(Debug)]
pub struct RecipeInstance {
    recipe: Recipe,
    config: Configuration,
    stage: Stage,
    failed: bool,
    resolution: Option<Resolution>,
    invocation: Option<BuildInvocation>,
    outputs: Vec<PathBuf>,
    layout: Option<PackageLayout>,
}

impl RecipeInstance {
    pub fn new(recipe: Recipe, config: Configuration) -> Self {
        Self {
            recipe,
            config,
            stage: Stage::Loaded,
            failed: false,
            resolution: None,
            invocation: None,
            outputs: Vec::new(),
            layout: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// The resolved dependency set, once configured.
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// The build-tool descriptor, once configured.
    pub fn invocation(&self) -> Option<&BuildInvocation> {
        self.invocation.as_ref()
    }

    /// The classified layout, once packaged.
    pub fn layout(&self) -> Option<&PackageLayout> {
        self.layout.as_ref()
    }

    fn gate(&self, expected: Stage, action: &'static str) -> Result<(), LifecycleError> {
        if self.failed || self.stage != expected {
            return Err(LifecycleError::InvalidTransition {
                action,
                stage: self.stage,
            });
        }
        Ok(())
    }

    /// Bind the resolved requirements and configuration to a build-tool
    /// invocation. Valid only from `Loaded`.
    ///
    /// Every declared requirement must be pinned by the resolution before
    /// any build starts.
    pub fn configure(
        &mut self,
        resolution: Resolution,
        tool: &dyn BuildTool,
    ) -> Result<&BuildInvocation, LifecycleError> {
        self.gate(Stage::Loaded, "configure")?;

        for requirement in self.recipe.requires() {
            if resolution.get(&requirement.reference.name).is_none() {
                return Err(LifecycleError::ConfigureFailed(format!(
                    "requirement '{}' is not pinned by the resolution",
                    requirement.reference.name
                )));
            }
        }

        let invocation = tool.configure(&self.recipe, &self.config, &resolution)?;
        self.resolution = Some(resolution);
        self.invocation = Some(invocation);
        self.stage = Stage::Configured;
        Ok(self.invocation.as_ref().unwrap())
    }

    /// Invoke the external tool. Valid only from `Configured`; a second
    /// `build()` after success or failure is rejected with
    /// `InvalidTransition` (cached results live in the build cache, not in
    /// re-driven instances).
    pub fn build(&mut self, tool: &dyn BuildTool) -> Result<(), LifecycleError> {
        self.gate(Stage::Configured, "build")?;
        let invocation = self.invocation.as_ref().unwrap();

        match tool.invoke(invocation) {
            BuildOutcome::Success { outputs } => {
                self.outputs = outputs;
                self.stage = Stage::Built;
                Ok(())
            }
            BuildOutcome::Failed { code } => {
                self.failed = true;
                Err(LifecycleError::BuildFailed {
                    code,
                    timed_out: false,
                })
            }
            BuildOutcome::TimedOut => {
                self.failed = true;
                Err(LifecycleError::BuildFailed {
                    code: None,
                    timed_out: true,
                })
            }
        }
    }

    /// Classify the build outputs into the package layout. Valid only from
    /// `Built`; a packaging collision leaves the instance failed.
    pub fn package(&mut self) -> Result<&PackageLayout, LifecycleError> {
        self.gate(Stage::Built, "package")?;
        match classify(&self.outputs, &self.recipe.artifacts) {
            Ok(layout) => {
                self.layout = Some(layout);
                self.stage = Stage::Packaged;
                Ok(self.layout.as_ref().unwrap())
            }
            Err(err) => {
                self.failed = true;
                Err(err.into())
            }
        }
    }

    /// Emit the metadata downstream recipes consume. Valid only from
    /// `Packaged`.
    pub fn publish_metadata(&mut self) -> Result<RecipeMetadata, LifecycleError> {
        self.gate(Stage::Packaged, "publish")?;
        self.stage = Stage::Published;
        Ok(self.recipe.metadata.clone())
    }

    /// Abandon the instance, releasing any pending build outputs. Allowed up
    /// to and including `Built`; packaging commits, so later stages refuse.
    pub fn abort(mut self) -> Result<(), LifecycleError> {
        if self.stage > Stage::Built {
            return Err(LifecycleError::InvalidTransition {
                action: "abort",
                stage: self.stage,
            });
        }
        self.outputs.clear();
        self.invocation = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::recipe::Recipe;
    use crate::settings::Profile;

    const RECIPE: &str = r#"
[package]
name = "vkaEngine"
version = "0.0.1"

[settings]
os = ["linux", "windows"]
build_type = ["debug", "release"]

[options.shared]
values = [false, true]
default = false

[[artifacts]]
pattern = "*.hpp"
dest = "headers"

[[artifacts]]
pattern = "*.a"
dest = "lib"
flatten = true

[metadata]
libs = ["vkaEngine"]
include_dirs = ["src"]
"#;

    /// Stub collaborator with a scripted outcome.
    struct StubTool {
        outcome: fn() -> BuildOutcome,
    }

    impl BuildTool for StubTool {
        fn configure(
            &self,
            recipe: &Recipe,
            _config: &Configuration,
            _resolution: &Resolution,
        ) -> Result<BuildInvocation, LifecycleError> {
            Ok(BuildInvocation {
                command: recipe.build.tool.clone(),
                args: vec!["--build".to_string()],
                working_dir: PathBuf::from("work"),
                env: Vec::new(),
                output_dir: PathBuf::from("out"),
            })
        }

        fn invoke(&self, _invocation: &BuildInvocation) -> BuildOutcome {
            (self.outcome)()
        }
    }

    fn ok_tool() -> StubTool {
        StubTool {
            outcome: || BuildOutcome::Success {
                outputs: vec![
                    PathBuf::from("src/Engine.hpp"),
                    PathBuf::from("build/libvkaEngine.a"),
                ],
            },
        }
    }

    fn instance() -> RecipeInstance {
        let recipe = Recipe::parse(RECIPE).unwrap();
        let mut profile = Profile::default();
        profile
            .settings
            .insert("os".to_string(), "linux".to_string());
        profile
            .settings
            .insert("build_type".to_string(), "release".to_string());
        let config = recipe.matrix().instantiate(&profile).unwrap();
        RecipeInstance::new(recipe, config)
    }

    fn empty_resolution() -> Resolution {
        crate::requirements::RequirementSet::new()
            .resolve(&MemoryIndex::new())
            .unwrap()
    }

    #[test]
    fn test_full_lifecycle() {
        let tool = ok_tool();
        let mut instance = instance();
        assert_eq!(instance.stage(), Stage::Loaded);

        let invocation = instance.configure(empty_resolution(), &tool).unwrap();
        assert_eq!(invocation.command, "cmake");
        assert_eq!(instance.stage(), Stage::Configured);

        instance.build(&tool).unwrap();
        assert_eq!(instance.stage(), Stage::Built);

        let layout = instance.package().unwrap();
        assert!(layout.contains("headers/src/Engine.hpp"));
        assert!(layout.contains("lib/libvkaEngine.a"));

        let metadata = instance.publish_metadata().unwrap();
        assert_eq!(metadata.libs, vec!["vkaEngine"]);
        assert_eq!(instance.stage(), Stage::Published);
    }

    #[test]
    fn test_package_before_build_is_rejected() {
        let tool = ok_tool();
        let mut instance = instance();
        instance.configure(empty_resolution(), &tool).unwrap();
        let err = instance.package().unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                action: "package",
                stage: Stage::Configured
            }
        ));
    }

    #[test]
    fn test_build_before_configure_is_rejected() {
        let tool = ok_tool();
        let mut instance = instance();
        assert!(matches!(
            instance.build(&tool),
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_build_twice_is_rejected() {
        let tool = ok_tool();
        let mut instance = instance();
        instance.configure(empty_resolution(), &tool).unwrap();
        instance.build(&tool).unwrap();
        assert!(matches!(
            instance.build(&tool),
            Err(LifecycleError::InvalidTransition {
                action: "build",
                ..
            })
        ));
    }

    #[test]
    fn test_failed_build_is_fatal() {
        let failing = StubTool {
            outcome: || BuildOutcome::Failed { code: Some(2) },
        };
        let mut instance = instance();
        instance.configure(empty_resolution(), &failing).unwrap();
        let err = instance.build(&failing).unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::BuildFailed {
                code: Some(2),
                timed_out: false
            }
        ));
        // No retry, no later stage.
        assert!(matches!(
            instance.build(&failing),
            Err(LifecycleError::InvalidTransition { .. })
        ));
        assert!(matches!(
            instance.package(),
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_timeout_is_surfaced() {
        let timing_out = StubTool {
            outcome: || BuildOutcome::TimedOut,
        };
        let mut instance = instance();
        instance.configure(empty_resolution(), &timing_out).unwrap();
        assert!(matches!(
            instance.build(&timing_out),
            Err(LifecycleError::BuildFailed {
                code: None,
                timed_out: true
            })
        ));
    }

    #[test]
    fn test_abort_allowed_until_built() {
        let tool = ok_tool();

        let instance_loaded = instance();
        assert!(instance_loaded.abort().is_ok());

        let mut instance_built = instance();
        instance_built.configure(empty_resolution(), &tool).unwrap();
        instance_built.build(&tool).unwrap();
        assert!(instance_built.abort().is_ok());
    }

    #[test]
    fn test_abort_refused_after_packaging() {
        let tool = ok_tool();
        let mut instance = instance();
        instance.configure(empty_resolution(), &tool).unwrap();
        instance.build(&tool).unwrap();
        instance.package().unwrap();
        assert!(matches!(
            instance.abort(),
            Err(LifecycleError::InvalidTransition {
                action: "abort",
                stage: Stage::Packaged
            })
        ));
    }

    #[test]
    fn test_configure_requires_pinned_requirements() {
        let tool = ok_tool();
        let recipe = Recipe::parse(
            r#"
[package]
name = "app"
version = "1.0"
requires = ["zlib/1.2.11"]
"#,
        )
        .unwrap();
        let config = recipe.matrix().instantiate(&Profile::default()).unwrap();
        let mut instance = RecipeInstance::new(recipe, config);
        // Empty resolution does not pin zlib.
        let err = instance.configure(empty_resolution(), &tool).unwrap_err();
        assert!(matches!(err, LifecycleError::ConfigureFailed(_)));
        assert_eq!(instance.stage(), Stage::Loaded);
    }

    #[test]
    fn test_packaging_collision_fails_instance() {
        let tool = StubTool {
            outcome: || BuildOutcome::Success {
                outputs: vec![
                    PathBuf::from("build/win/libvkaEngine.a"),
                    PathBuf::from("build/mac/libvkaEngine.a"),
                ],
            },
        };
        let mut instance = instance();
        instance.configure(empty_resolution(), &tool).unwrap();
        instance.build(&tool).unwrap();
        assert!(matches!(
            instance.package(),
            Err(LifecycleError::Packaging(
                ClassifyError::PackagingCollision { .. }
            ))
        ));
        assert!(matches!(
            instance.publish_metadata(),
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }
}
