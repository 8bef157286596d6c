//! Package index - the lookup collaborator resolution runs against.
//!
//! The index maps a package name (plus optional owner/channel) to its known
//! concrete versions and their published metadata. It is an explicitly
//! passed, shared object, never process-global state; `MemoryIndex` allows
//! concurrent reads with exclusive writes.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::recipe::RecipeMetadata;
use crate::reference::{Ownership, PackageReference, Version};

/// Version lookup service consumed by `RequirementSet::resolve`.
///
/// Implementations must be safe to share across build workers.
pub trait PackageIndex: Sync {
    /// Known concrete versions for a package, any order.
    fn list_versions(&self, name: &str, ownership: Option<&Ownership>) -> Vec<Version>;

    /// Published metadata for a pinned reference, if any.
    fn fetch_metadata(&self, reference: &PackageReference) -> Option<RecipeMetadata>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IndexKey {
    name: String,
    ownership: Option<(String, String)>,
}

impl IndexKey {
    fn of(name: &str, ownership: Option<&Ownership>) -> Self {
        Self {
            name: name.to_string(),
            ownership: ownership.map(|o| (o.owner.clone(), o.channel.clone())),
        }
    }
}

/// In-memory index. Reads take the shared lock; publishing takes the
/// exclusive lock. First writer wins for a given version.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<IndexKey, BTreeMap<Version, RecipeMetadata>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pinned reference with its metadata. Returns false when the
    /// reference is not pinned or the version was already present.
    pub fn publish(&self, reference: PackageReference, metadata: RecipeMetadata) -> bool {
        let Some(version) = reference.concrete_version().cloned() else {
            return false;
        };
        let key = IndexKey::of(&reference.name, reference.ownership.as_ref());
        let mut entries = self.entries.write().expect("index lock poisoned");
        let versions = entries.entry(key).or_default();
        match versions.entry(version) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(metadata);
                true
            }
        }
    }
}

impl PackageIndex for MemoryIndex {
    fn list_versions(&self, name: &str, ownership: Option<&Ownership>) -> Vec<Version> {
        let entries = self.entries.read().expect("index lock poisoned");
        entries
            .get(&IndexKey::of(name, ownership))
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn fetch_metadata(&self, reference: &PackageReference) -> Option<RecipeMetadata> {
        let version = reference.concrete_version()?;
        let entries = self.entries.read().expect("index lock poisoned");
        entries
            .get(&IndexKey::of(
                &reference.name,
                reference.ownership.as_ref(),
            ))
            .and_then(|versions| versions.get(version))
            .cloned()
    }
}
