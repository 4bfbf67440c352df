//! Two-tier object cache
//!
//! Held objects are pinned for the life of the store. Everything else sits
//! in a bounded LRU and is reloaded from the cache files after eviction.

use crate::core::model::{ExtensionExtra, ExtensionPointExtra, ObjectId, RegistryObject};
use ahash::AHashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

fn capacity(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

pub struct ObjectCache {
    held: AHashMap<ObjectId, RegistryObject>,
    reclaimable: LruCache<ObjectId, RegistryObject>,
}

impl ObjectCache {
    pub fn new(reclaimable_capacity: usize) -> Self {
        ObjectCache {
            held: AHashMap::new(),
            reclaimable: LruCache::new(capacity(reclaimable_capacity)),
        }
    }

    pub fn get(&mut self, id: ObjectId) -> Option<RegistryObject> {
        if let Some(object) = self.held.get(&id) {
            return Some(object.clone());
        }
        self.reclaimable.get(&id).cloned()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.held.contains_key(&id) || self.reclaimable.contains(&id)
    }

    /// Insert, replacing any cached version
    pub fn put(&mut self, object: RegistryObject, hold: bool) {
        let id = object.id();
        if hold {
            self.reclaimable.pop(&id);
            self.held.insert(id, object);
        } else if !self.held.contains_key(&id) {
            self.reclaimable.put(id, object);
        }
    }

    /// Insert a freshly loaded object unless a version is already cached
    pub fn put_loaded(&mut self, object: RegistryObject, hold: bool) {
        if !self.contains(object.id()) {
            self.put(object, hold);
        }
    }

    /// Move a cached object into the held tier
    pub fn pin(&mut self, id: ObjectId) -> bool {
        if self.held.contains_key(&id) {
            return true;
        }
        match self.reclaimable.pop(&id) {
            Some(object) => {
                self.held.insert(id, object);
                true
            }
            None => false,
        }
    }

    /// Drop an object from both tiers
    ///
    /// With `release == false` a held object stays pinned.
    pub fn remove(&mut self, id: ObjectId, release: bool) -> Option<RegistryObject> {
        let reclaimed = self.reclaimable.pop(&id);
        if release {
            self.held.remove(&id).or(reclaimed)
        } else {
            reclaimed
        }
    }

    /// Drop the reclaimable tier
    pub fn trim(&mut self) -> usize {
        let dropped = self.reclaimable.len();
        self.reclaimable.clear();
        dropped
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    pub fn reclaimable_len(&self) -> usize {
        self.reclaimable.len()
    }

    pub fn held_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.held.keys().copied()
    }
}

/// Lazily loaded part of a cache-loaded object
#[derive(Debug, Clone)]
pub enum ExtraData {
    ExtensionPoint(Arc<ExtensionPointExtra>),
    Extension(Arc<ExtensionExtra>),
}

/// Reclaimable cache of extras, keyed by the owning object's id
pub struct ExtraCache {
    entries: LruCache<ObjectId, ExtraData>,
}

impl ExtraCache {
    pub fn new(capacity_hint: usize) -> Self {
        ExtraCache {
            entries: LruCache::new(capacity(capacity_hint)),
        }
    }

    pub fn get(&mut self, id: ObjectId) -> Option<ExtraData> {
        self.entries.get(&id).cloned()
    }

    pub fn put(&mut self, id: ObjectId, extra: ExtraData) {
        self.entries.put(id, extra);
    }

    pub fn remove(&mut self, id: ObjectId) {
        self.entries.pop(&id);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
