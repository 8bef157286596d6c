//! On-disk package store.
//!
//! The engine core works on abstract listings and copy operations; this is
//! the glue that makes them real. A packaged artifact lands under
//! `<store>/<name>/<version>/<config-digest>/` with its published metadata
//! as `metadata.json` next to the files. The store directory is guarded by
//! an exclusive lock file so concurrent kiln processes do not interleave
//! writes. First writer wins: an already-present package is left untouched.

use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use walkdir::WalkDir;

use crate::classifier::PackageLayout;
use crate::recipe::RecipeMetadata;
use crate::reference::PackageReference;

const METADATA_FILE: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid package metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("store '{0}' is locked by another process")]
    Locked(PathBuf),
    #[error("cannot install an unpinned reference: {0}")]
    Unpinned(PackageReference),
}

/// RAII guard for the store lock; releases and removes the lock file on drop.
struct StoreLock {
    _file: File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Root directory holding installed packages.
#[derive(Debug, Clone)]
pub struct PackageStore {
    root: PathBuf,
}

impl PackageStore {
    /// Open (creating if needed) a store at the given root.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default store location under the user data directory.
    pub fn default_root() -> PathBuf {
        if let Ok(path) = std::env::var("KILN_STORE") {
            return PathBuf::from(path);
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kiln/store")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory one packaged configuration installs into.
    pub fn package_dir(
        &self,
        reference: &PackageReference,
        config_digest: &str,
    ) -> Result<PathBuf, StoreError> {
        let version = reference
            .concrete_version()
            .ok_or_else(|| StoreError::Unpinned(reference.clone()))?;
        Ok(self
            .root
            .join(&reference.name)
            .join(version.to_string())
            .join(config_digest))
    }

    /// Whether this configuration is already installed (build policy
    /// `missing` consults this before building).
    pub fn has_package(&self, reference: &PackageReference, config_digest: &str) -> bool {
        self.package_dir(reference, config_digest)
            .map(|dir| dir.join(METADATA_FILE).is_file())
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<StoreLock, StoreError> {
        let path = self.root.join(".lock");
        let file = File::create(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(self.root.clone()))?;
        Ok(StoreLock { _file: file, path })
    }

    /// Materialize a classified layout from the build output tree, then
    /// write the published metadata. Returns the package directory.
    ///
    /// An already-installed package is returned as-is (first writer wins).
    pub fn install(
        &self,
        reference: &PackageReference,
        config_digest: &str,
        output_root: &Path,
        layout: &PackageLayout,
        metadata: &RecipeMetadata,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.package_dir(reference, config_digest)?;
        let _lock = self.lock()?;

        if dir.join(METADATA_FILE).is_file() {
            return Ok(dir);
        }

        for (src, dest) in layout.copy_ops() {
            let target = dir.join(dest);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(output_root.join(src), target)?;
        }

        std::fs::create_dir_all(&dir)?;
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(dir.join(METADATA_FILE), json)?;
        Ok(dir)
    }

    /// Read back the metadata of an installed package.
    pub fn load_metadata(
        &self,
        reference: &PackageReference,
        config_digest: &str,
    ) -> Result<RecipeMetadata, StoreError> {
        let dir = self.package_dir(reference, config_digest)?;
        let json = std::fs::read_to_string(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// List every file under a root, relative to it and sorted. The abstract
/// listing the classifier and export filter consume.
pub fn walk_tree(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{classify, ArtifactRule, Destination};

    fn layout_for(files: &[&str]) -> PackageLayout {
        let paths: Vec<PathBuf> = files.iter().map(PathBuf::from).collect();
        classify(
            &paths,
            &[
                ArtifactRule::new("*.hpp", Destination::Headers, false),
                ArtifactRule::new("*.a", Destination::Lib, true),
            ],
        )
        .unwrap()
    }

    fn seed_outputs(root: &Path, files: &[&str]) {
        for file in files {
            let path = root.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        }
    }

    #[test]
    fn test_install_and_read_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out");
        let files = ["src/Engine.hpp", "build/libvkaEngine.a"];
        seed_outputs(&out, &files);

        let store = PackageStore::open(dir.path().join("store")).unwrap();
        let reference: PackageReference = "vkaEngine/0.0.1".parse().unwrap();
        let metadata = RecipeMetadata {
            libs: vec!["vkaEngine".to_string()],
            include_dirs: vec![PathBuf::from("src")],
        };

        let pkg = store
            .install(&reference, "deadbeef", &out, &layout_for(&files), &metadata)
            .unwrap();
        assert!(pkg.join("headers/src/Engine.hpp").is_file());
        assert!(pkg.join("lib/libvkaEngine.a").is_file());
        assert!(store.has_package(&reference, "deadbeef"));
        assert_eq!(store.load_metadata(&reference, "deadbeef").unwrap(), metadata);
    }

    #[test]
    fn test_first_writer_wins() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out");
        seed_outputs(&out, &["src/Engine.hpp"]);

        let store = PackageStore::open(dir.path().join("store")).unwrap();
        let reference: PackageReference = "vkaEngine/0.0.1".parse().unwrap();
        let first = RecipeMetadata {
            libs: vec!["first".to_string()],
            include_dirs: vec![],
        };
        let second = RecipeMetadata {
            libs: vec!["second".to_string()],
            include_dirs: vec![],
        };

        let layout = layout_for(&["src/Engine.hpp"]);
        store
            .install(&reference, "k", &out, &layout, &first)
            .unwrap();
        store
            .install(&reference, "k", &out, &layout, &second)
            .unwrap();
        assert_eq!(store.load_metadata(&reference, "k").unwrap(), first);
    }

    #[test]
    fn test_unpinned_reference_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = PackageStore::open(dir.path()).unwrap();
        let reference: PackageReference = "zlib/latest".parse().unwrap();
        assert!(matches!(
            store.package_dir(&reference, "k"),
            Err(StoreError::Unpinned(_))
        ));
        assert!(!store.has_package(&reference, "k"));
    }

    #[test]
    fn test_walk_tree_is_relative_and_sorted() {
        let dir = tempfile::TempDir::new().unwrap();
        seed_outputs(dir.path(), &["b/two", "a/one"]);
        assert_eq!(
            walk_tree(dir.path()),
            vec![PathBuf::from("a/one"), PathBuf::from("b/two")]
        );
    }
}
