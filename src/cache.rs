//! Build cache keyed by canonical configuration key.
//!
//! Two instances with the same canonical key are the same artifact and must
//! not be built twice. Concurrent claims for one key coalesce: the first
//! claimant builds, the rest block until the result is published and then
//! share it. A failed build abandons its claim and wakes a waiter to take
//! over - the engine never retries on its own.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use crate::classifier::PackageLayout;
use crate::recipe::RecipeMetadata;

/// A finished build, shared between coalesced callers.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltArtifact {
    pub layout: PackageLayout,
    pub metadata: RecipeMetadata,
}

#[derive(Debug)]
enum Slot {
    Building,
    Done(Arc<BuiltArtifact>),
}

/// Outcome of claiming a key.
#[derive(Debug)]
pub enum Claim {
    /// This caller builds; it must then `publish` or `abandon` the key.
    Build,
    /// Someone already built it.
    Ready(Arc<BuiltArtifact>),
}

/// Shared in-process artifact cache. Reads and writes go through one lock;
/// waiters block on a condvar, not by spinning.
#[derive(Debug, Default)]
pub struct BuildCache {
    slots: Mutex<HashMap<String, Slot>>,
    changed: Condvar,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a key. Blocks while another caller is building it.
    pub fn claim(&self, key: &str) -> Claim {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        loop {
            match slots.get(key) {
                None => {
                    slots.insert(key.to_string(), Slot::Building);
                    return Claim::Build;
                }
                Some(Slot::Done(artifact)) => return Claim::Ready(Arc::clone(artifact)),
                Some(Slot::Building) => {
                    slots = self.changed.wait(slots).expect("cache lock poisoned");
                }
            }
        }
    }

    /// Non-blocking lookup of a finished artifact.
    pub fn get(&self, key: &str) -> Option<Arc<BuiltArtifact>> {
        let slots = self.slots.lock().expect("cache lock poisoned");
        match slots.get(key) {
            Some(Slot::Done(artifact)) => Some(Arc::clone(artifact)),
            _ => None,
        }
    }

    /// Publish a finished build. First writer wins: if the key is already
    /// done, the existing artifact is kept and returned.
    pub fn publish(&self, key: &str, artifact: BuiltArtifact) -> Arc<BuiltArtifact> {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        let shared = match slots.get(key) {
            Some(Slot::Done(existing)) => Arc::clone(existing),
            _ => {
                let shared = Arc::new(artifact);
                slots.insert(key.to_string(), Slot::Done(Arc::clone(&shared)));
                shared
            }
        };
        self.changed.notify_all();
        shared
    }

    /// Publish a finished build unconditionally, superseding any cached
    /// artifact. Rebuilds that must not hand back a stale slot (build
    /// policy `always`) go through this instead of `publish`.
    pub fn replace(&self, key: &str, artifact: BuiltArtifact) -> Arc<BuiltArtifact> {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        let shared = Arc::new(artifact);
        slots.insert(key.to_string(), Slot::Done(Arc::clone(&shared)));
        self.changed.notify_all();
        shared
    }

    /// Drop a claim after a failed build so a waiter can take over.
    pub fn abandon(&self, key: &str) {
        let mut slots = self.slots.lock().expect("cache lock poisoned");
        if matches!(slots.get(key), Some(Slot::Building)) {
            slots.remove(key);
        }
        self.changed.notify_all();
    }
}
