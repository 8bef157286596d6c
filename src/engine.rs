//! Engine driver - ties resolution, lifecycle, cache, and store together.
//!
//! One `Engine` is shared across build workers; each `build()` call drives a
//! single recipe × profile through the full data flow: instantiate the
//! configuration, claim the build-cache key, resolve requirements, run the
//! lifecycle against the external tool, then publish the artifact to the
//! cache, the metadata to the index, and (when a store is attached) the
//! files to disk. Independent profiles may run on separate threads; stages
//! within one instance stay sequential.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::{BuildCache, BuiltArtifact, Claim};
use crate::classifier::PackageLayout;
use crate::index::MemoryIndex;
use crate::lifecycle::{BuildTool, LifecycleError, RecipeInstance};
use crate::recipe::{BuildPolicy, Recipe, RecipeMetadata};
use crate::reference::PackageReference;
use crate::requirements::{OverrideNote, ResolveError};
use crate::settings::{Profile, SettingsError};
use crate::store::{PackageStore, StoreError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one build produced.
#[derive(Debug)]
pub struct BuildReport {
    pub reference: PackageReference,
    pub config_digest: String,
    pub metadata: RecipeMetadata,
    /// True when the artifact came from the cache without rebuilding.
    pub cached: bool,
    /// Where the package was installed, when a store is attached.
    pub package_dir: Option<PathBuf>,
    pub warnings: Vec<OverrideNote>,
    pub artifact: Arc<BuiltArtifact>,
}

/// Shared engine state: the dependency index, the coalescing build cache,
/// and an optional on-disk store.
pub struct Engine {
    index: Arc<MemoryIndex>,
    cache: Arc<BuildCache>,
    store: Option<PackageStore>,
}

impl Engine {
    pub fn new(index: Arc<MemoryIndex>) -> Self {
        Self {
            index,
            cache: Arc::new(BuildCache::new()),
            store: None,
        }
    }

    pub fn with_store(mut self, store: PackageStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn index(&self) -> &MemoryIndex {
        &self.index
    }

    /// Drive one recipe × profile through the lifecycle.
    ///
    /// Build policy `missing` short-circuits on a cached artifact;
    /// `always` rebuilds but still coalesces concurrent duplicates.
    pub fn build(
        &self,
        recipe: &Recipe,
        profile: &Profile,
        tool: &dyn BuildTool,
    ) -> Result<BuildReport, EngineError> {
        let config = recipe.matrix().instantiate(profile)?;
        let reference = recipe.reference();
        // Cache identity is the recipe reference plus the configuration.
        let key = format!("{}#{}", reference, config.canonical_key());
        let config_digest = config.key_digest();

        match self.cache.claim(&key) {
            Claim::Ready(artifact) if recipe.build.policy == BuildPolicy::Missing => {
                return Ok(BuildReport {
                    package_dir: self
                        .store
                        .as_ref()
                        .and_then(|s| s.package_dir(&reference, &config_digest).ok()),
                    reference,
                    config_digest,
                    metadata: artifact.metadata.clone(),
                    cached: true,
                    warnings: Vec::new(),
                    artifact,
                });
            }
            Claim::Ready(_) | Claim::Build => {}
        }

        // A prior process may have installed this configuration already;
        // policy `missing` trusts the store without rebuilding.
        if recipe.build.policy == BuildPolicy::Missing {
            if let Some(store) = &self.store {
                if store.has_package(&reference, &config_digest) {
                    if let Ok(metadata) = store.load_metadata(&reference, &config_digest) {
                        let artifact = self.cache.publish(
                            &key,
                            BuiltArtifact {
                                layout: PackageLayout::default(),
                                metadata: metadata.clone(),
                            },
                        );
                        self.index.publish(reference.clone(), metadata.clone());
                        return Ok(BuildReport {
                            package_dir: store.package_dir(&reference, &config_digest).ok(),
                            reference,
                            config_digest,
                            metadata,
                            cached: true,
                            warnings: Vec::new(),
                            artifact,
                        });
                    }
                }
            }
        }

        // We hold the claim; a failure must release it so a waiter can
        // take over instead of blocking forever.
        match self.run_lifecycle(recipe, config.clone(), tool) {
            Ok((instance, metadata, warnings)) => {
                let built = BuiltArtifact {
                    layout: instance.layout().cloned().unwrap_or_default(),
                    metadata: metadata.clone(),
                };
                // Policy `always` rebuilt past a Ready slot; the fresh
                // artifact must supersede it, not lose to first-writer-wins.
                let artifact = if recipe.build.policy == BuildPolicy::Always {
                    self.cache.replace(&key, built)
                } else {
                    self.cache.publish(&key, built)
                };
                self.index.publish(reference.clone(), metadata.clone());

                let package_dir = match &self.store {
                    Some(store) => {
                        let output_root = instance
                            .invocation()
                            .map(|i| i.output_dir.clone())
                            .unwrap_or_default();
                        Some(store.install(
                            &reference,
                            &config_digest,
                            &output_root,
                            &artifact.layout,
                            &metadata,
                        )?)
                    }
                    None => None,
                };

                Ok(BuildReport {
                    reference,
                    config_digest,
                    metadata,
                    cached: false,
                    package_dir,
                    warnings,
                    artifact,
                })
            }
            Err(err) => {
                self.cache.abandon(&key);
                Err(err)
            }
        }
    }

    fn run_lifecycle(
        &self,
        recipe: &Recipe,
        config: crate::settings::Configuration,
        tool: &dyn BuildTool,
    ) -> Result<(RecipeInstance, RecipeMetadata, Vec<OverrideNote>), EngineError> {
        let resolution = recipe.requirement_set().resolve(self.index.as_ref())?;
        let warnings = resolution.warnings.clone();

        let mut instance = RecipeInstance::new(recipe.clone(), config);
        instance.configure(resolution, tool)?;
        instance.build(tool)?;
        instance.package()?;
        let metadata = instance.publish_metadata()?;
        Ok((instance, metadata, warnings))
    }
}
