//! Registry object store
//!
//! The store maps object ids to model objects. Objects created this session
//! are pinned; objects read from the cache files live in a reclaimable tier
//! and are decoded again on demand after eviction.
//!
//! # Loading
//!
//! A miss on an extension point loads its whole tree (the point, its
//! extensions and their elements of depth 1..2). A miss on an extension or a
//! shallow element reads that single record. A miss on a deeper element
//! reads it together with its subtree from the extra stream.
//!
//! # Locking
//!
//! All state sits behind one internal mutex so handles can resolve ids
//! without taking the registry lock.

pub mod cache;
pub mod contributions;
pub mod orphans;

use crate::core::config::RegistryConfig;
use crate::core::error::{RegistryError, Result};
use crate::core::model::{
    BundleId, ConfigurationElement, Contribution, Extension, ExtensionExtra, ExtensionPoint,
    ExtensionPointExtra, Extra, ObjectId, ObjectKind, RegistryObject,
};
use crate::core::table::{TableIndex, TableReader};
use ahash::AHashMap;
use cache::{ExtraCache, ExtraData, ObjectCache};
use contributions::ContributionSet;
use orphans::OrphanIndex;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// First id handed out when there is no cache
const FIRST_ID: u32 = 1;

/// Object counts per cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Pinned objects: created this session, mutated, or not reloadable
    pub held: usize,
    /// Cache-loaded objects in the LRU tier
    pub reclaimable: usize,
    /// Cached extra records
    pub extras: usize,
    /// Objects the cache files can still supply
    pub indexed_offsets: usize,
}

pub struct ObjectStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    next_id: u32,
    objects: ObjectCache,
    extras: ExtraCache,
    offsets: AHashMap<ObjectId, u32>,
    extension_points: AHashMap<String, ObjectId>,
    contributions: ContributionSet,
    orphans: OrphanIndex,
    reader: Option<Arc<TableReader>>,
    flushing_enabled: bool,
    hold: bool,
    dirty: bool,
}

fn orphan_loader(
    reader: &Option<Arc<TableReader>>,
) -> impl FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>> + '_ {
    move || reader.as_ref().map_or_else(|| Ok(Vec::new()), |r| r.load_orphans())
}

fn contribution_loader(
    reader: &Option<Arc<TableReader>>,
) -> impl FnOnce() -> Result<Vec<Contribution>> + '_ {
    move || reader.as_ref().map_or_else(|| Ok(Vec::new()), |r| r.load_contributions())
}

fn stale(id: ObjectId, kind: ObjectKind) -> RegistryError {
    RegistryError::StaleHandle { id, kind }
}

impl ObjectStore {
    /// Empty store for a cold start
    pub fn new(config: &RegistryConfig) -> Self {
        ObjectStore {
            inner: Mutex::new(StoreInner {
                next_id: FIRST_ID,
                objects: ObjectCache::new(config.object_cache_capacity),
                extras: ExtraCache::new(config.extra_cache_capacity),
                offsets: AHashMap::new(),
                extension_points: AHashMap::new(),
                contributions: ContributionSet::fresh(),
                orphans: OrphanIndex::fresh(),
                reader: None,
                flushing_enabled: config.flushing_enabled,
                hold: false,
                dirty: false,
            }),
        }
    }

    /// Store backed by a validated cache
    ///
    /// With `lazy_cache_loading` off, every object is decoded now and pinned.
    pub fn from_cache(config: &RegistryConfig, reader: TableReader, index: TableIndex) -> Result<Self> {
        let point_count = index.extension_points.len();
        let mut inner = StoreInner {
            next_id: index.next_id.max(FIRST_ID),
            objects: ObjectCache::new(config.object_cache_capacity),
            extras: ExtraCache::new(config.extra_cache_capacity),
            offsets: index.offsets,
            extension_points: index.extension_points.into_iter().collect(),
            contributions: ContributionSet::default(),
            orphans: OrphanIndex::default(),
            reader: Some(Arc::new(reader)),
            flushing_enabled: config.flushing_enabled,
            hold: false,
            dirty: false,
        };

        if !config.lazy_cache_loading {
            inner.read_all(point_count)?;
        }

        Ok(ObjectStore {
            inner: Mutex::new(inner),
        })
    }

    /// Reserve the next object id
    pub fn allocate_id(&self) -> ObjectId {
        let mut inner = self.inner.lock();
        let id = ObjectId(inner.next_id);
        inner.next_id += 1;
        id
    }

    pub fn next_id(&self) -> u32 {
        self.inner.lock().next_id
    }

    /// Insert an object that already carries its id
    ///
    /// Objects that cannot be decoded from the cache files are always held.
    pub fn add(&self, object: RegistryObject, hold: bool) -> ObjectId {
        let mut inner = self.inner.lock();
        let id = object.id();
        let hold = hold || !inner.offsets.contains_key(&id) || !object.is_reconstructible();
        inner.objects.put(object, hold);
        id
    }

    pub fn get(&self, id: ObjectId, kind: ObjectKind) -> Result<RegistryObject> {
        self.inner.lock().get(id, kind)
    }

    pub fn extension_point(&self, id: ObjectId) -> Result<Arc<ExtensionPoint>> {
        match self.get(id, ObjectKind::ExtensionPoint)? {
            RegistryObject::ExtensionPoint(point) => Ok(point),
            _ => Err(stale(id, ObjectKind::ExtensionPoint)),
        }
    }

    pub fn extension(&self, id: ObjectId) -> Result<Arc<Extension>> {
        match self.get(id, ObjectKind::Extension)? {
            RegistryObject::Extension(extension) => Ok(extension),
            _ => Err(stale(id, ObjectKind::Extension)),
        }
    }

    pub fn configuration_element(&self, id: ObjectId, kind: ObjectKind) -> Result<Arc<ConfigurationElement>> {
        match self.get(id, kind)? {
            RegistryObject::ConfigurationElement(element) => Ok(element),
            _ => Err(stale(id, kind)),
        }
    }

    /// Drop an object from the cache and the offset index
    pub fn remove(&self, id: ObjectId, release: bool) {
        let mut inner = self.inner.lock();
        inner.objects.remove(id, release);
        inner.offsets.remove(&id);
        inner.extras.remove(id);
    }

    /// Replace the children of an extension point and pin it
    pub fn set_extension_point_children(&self, id: ObjectId, children: Arc<[ObjectId]>) -> Result<()> {
        let mut inner = self.inner.lock();
        let point = match inner.get(id, ObjectKind::ExtensionPoint)? {
            RegistryObject::ExtensionPoint(point) => point,
            _ => return Err(stale(id, ObjectKind::ExtensionPoint)),
        };
        inner.objects.pin(id);
        point.set_children(children);
        Ok(())
    }

    /// While hold is on, objects loaded from the cache are pinned
    pub fn set_hold(&self, hold: bool) {
        self.inner.lock().hold = hold;
    }

    /// Drop everything that can be reloaded from the cache files
    pub fn trim(&self) {
        let mut inner = self.inner.lock();
        let dropped = inner.objects.trim();
        inner.extras.clear();
        inner.contributions.trim();
        inner.orphans.trim();
        debug!("Trimmed object store: {} reclaimable objects dropped", dropped);
    }

    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            held: inner.objects.held_len(),
            reclaimable: inner.objects.reclaimable_len(),
            extras: inner.extras.len(),
            indexed_offsets: inner.offsets.len(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    pub fn extension_point_extra(&self, point: &ExtensionPoint) -> Result<Arc<ExtensionPointExtra>> {
        let offset = match point.extra() {
            Extra::Inline(extra) => return Ok(Arc::clone(extra)),
            Extra::Cached(offset) => *offset,
        };
        let mut inner = self.inner.lock();
        if let Some(ExtraData::ExtensionPoint(extra)) = inner.extras.get(point.id()) {
            return Ok(extra);
        }
        let reader = inner.reader()?;
        let extra = Arc::new(reader.load_extension_point_extra(offset)?);
        inner
            .extras
            .put(point.id(), ExtraData::ExtensionPoint(Arc::clone(&extra)));
        Ok(extra)
    }

    pub fn extension_extra(&self, extension: &Extension) -> Result<Arc<ExtensionExtra>> {
        let offset = match extension.extra() {
            Extra::Inline(extra) => return Ok(Arc::clone(extra)),
            Extra::Cached(offset) => *offset,
        };
        let mut inner = self.inner.lock();
        if let Some(ExtraData::Extension(extra)) = inner.extras.get(extension.id()) {
            return Ok(extra);
        }
        let reader = inner.reader()?;
        let extra = Arc::new(reader.load_extension_extra(offset)?);
        inner
            .extras
            .put(extension.id(), ExtraData::Extension(Arc::clone(&extra)));
        Ok(extra)
    }

    pub fn extension_point_id(&self, unique_id: &str) -> Option<ObjectId> {
        self.inner.lock().extension_points.get(unique_id).copied()
    }

    pub fn add_extension_point_name(&self, unique_id: &str, id: ObjectId) {
        self.inner
            .lock()
            .extension_points
            .insert(unique_id.to_string(), id);
    }

    pub fn remove_extension_point_name(&self, unique_id: &str) -> Option<ObjectId> {
        self.inner.lock().extension_points.remove(unique_id)
    }

    /// Every indexed extension point as `(unique id, object id)`
    pub fn extension_point_index(&self) -> Vec<(String, ObjectId)> {
        self.inner
            .lock()
            .extension_points
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect()
    }

    pub fn add_contribution(&self, contribution: Contribution) -> Arc<Contribution> {
        let mut inner = self.inner.lock();
        inner.dirty = true;
        inner.contributions.add(contribution)
    }

    pub fn remove_contribution(&self, contributor: BundleId) -> Result<Option<Arc<Contribution>>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let removed = inner
            .contributions
            .remove(contributor, contribution_loader(&inner.reader))?;
        if removed.is_some() {
            inner.dirty = true;
        }
        Ok(removed)
    }

    pub fn contribution(&self, contributor: BundleId) -> Result<Option<Arc<Contribution>>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .contributions
            .get(contributor, contribution_loader(&inner.reader))
    }

    pub fn has_contribution(&self, contributor: BundleId) -> Result<bool> {
        Ok(self.contribution(contributor)?.is_some())
    }

    pub fn contributions(&self) -> Result<Vec<Arc<Contribution>>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.contributions.all(contribution_loader(&inner.reader))
    }

    /// Contributions whose namespace is `namespace`
    pub fn contributions_in(&self, namespace: &str) -> Result<Vec<Arc<Contribution>>> {
        let mut inner = self.inner.lock();
        let all = {
            let inner = &mut *inner;
            inner.contributions.all(contribution_loader(&inner.reader))?
        };
        let mut matching = Vec::new();
        for contribution in all {
            if inner.namespace_of(&contribution)?.as_deref() == Some(namespace) {
                matching.push(contribution);
            }
        }
        Ok(matching)
    }

    /// Namespace of a contribution, resolved through its first child when
    /// it was read from the cache
    pub fn namespace_of(&self, contribution: &Contribution) -> Result<Option<String>> {
        self.inner.lock().namespace_of(contribution)
    }

    /// Namespaces of every known contribution
    ///
    /// Empty contributions read from the cache have no child to take a
    /// namespace from and are skipped.
    pub fn namespaces(&self) -> Result<BTreeSet<String>> {
        let mut inner = self.inner.lock();
        let all = {
            let inner = &mut *inner;
            inner.contributions.all(contribution_loader(&inner.reader))?
        };
        let mut namespaces = BTreeSet::new();
        for contribution in all {
            if let Some(namespace) = inner.namespace_of(&contribution)? {
                namespaces.insert(namespace);
            }
        }
        Ok(namespaces)
    }

    pub fn orphans_of(&self, point: &str) -> Result<Vec<ObjectId>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.orphans.orphans_of(point, orphan_loader(&inner.reader))
    }

    pub fn orphans(&self) -> Result<Vec<(String, Vec<ObjectId>)>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner.orphans.all(orphan_loader(&inner.reader))
    }

    pub fn add_orphan(&self, point: &str, extension: ObjectId) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .orphans
            .add_orphan(point, extension, orphan_loader(&inner.reader))
    }

    pub fn add_orphans(&self, point: &str, extensions: &[ObjectId]) -> Result<()> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .orphans
            .add_orphans(point, extensions, orphan_loader(&inner.reader))
    }

    pub fn remove_orphan(&self, point: &str, extension: ObjectId) -> Result<bool> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .orphans
            .remove_orphan(point, extension, orphan_loader(&inner.reader))
    }

    pub fn remove_orphans(&self, point: &str) -> Result<Vec<ObjectId>> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        inner
            .orphans
            .remove_orphans(point, orphan_loader(&inner.reader))
    }
}

impl StoreInner {
    fn reader(&self) -> Result<Arc<TableReader>> {
        self.reader
            .clone()
            .ok_or_else(|| RegistryError::CorruptCache("object refers to a cache that is not open".to_string()))
    }

    fn load_hold(&self) -> bool {
        self.hold || !self.flushing_enabled
    }

    fn get(&mut self, id: ObjectId, kind: ObjectKind) -> Result<RegistryObject> {
        if let Some(object) = self.objects.get(id) {
            return if object.matches(kind) {
                Ok(object)
            } else {
                Err(stale(id, kind))
            };
        }

        let offset = *self.offsets.get(&id).ok_or_else(|| stale(id, kind))?;
        let reader = self.reader().map_err(|_| stale(id, kind))?;
        let hold = self.load_hold();

        let loaded = match kind {
            ObjectKind::ExtensionPoint => reader.load_extension_point_tree(offset)?,
            ObjectKind::Extension => vec![RegistryObject::Extension(Arc::new(
                reader.load_extension(offset)?,
            ))],
            ObjectKind::ConfigurationElement => vec![RegistryObject::ConfigurationElement(
                Arc::new(reader.load_configuration_element(offset)?),
            )],
            ObjectKind::ThirdLevelConfigurationElement => reader
                .load_third_level(offset)?
                .into_iter()
                .map(|ce| RegistryObject::ConfigurationElement(Arc::new(ce)))
                .collect(),
        };
        debug!("Loaded {:?} {} with {} objects", kind, id, loaded.len());

        let mut requested = None;
        for object in loaded {
            let object_id = object.id();
            // Purged this session; the mapped files still describe it
            if !self.offsets.contains_key(&object_id) {
                continue;
            }
            if object_id == id {
                requested = Some(object.clone());
            }
            self.objects.put_loaded(object, hold);
        }

        match self.objects.get(id).or(requested) {
            Some(object) if object.matches(kind) => Ok(object),
            _ => Err(stale(id, kind)),
        }
    }

    fn namespace_of(&mut self, contribution: &Contribution) -> Result<Option<String>> {
        if let Some(namespace) = contribution.namespace() {
            return Ok(Some(namespace.to_string()));
        }
        let Some((first, is_point)) = contribution.first_child() else {
            return Ok(None);
        };

        let namespace = if is_point {
            match self.get(first, ObjectKind::ExtensionPoint)? {
                RegistryObject::ExtensionPoint(point) => match point.extra() {
                    Extra::Inline(extra) => Some(extra.namespace.clone()),
                    Extra::Cached(offset) => {
                        Some(self.reader()?.load_extension_point_extra(*offset)?.namespace)
                    }
                },
                _ => None,
            }
        } else {
            match self.get(first, ObjectKind::Extension)? {
                RegistryObject::Extension(extension) => extension.namespace().map(str::to_string),
                _ => None,
            }
        };

        Ok(contribution
            .namespace_or_init(|| namespace)
            .map(str::to_string))
    }

    fn read_all(&mut self, point_count: usize) -> Result<()> {
        let reader = self.reader()?;
        let objects = reader.read_all(point_count)?;
        let count = objects.len();
        for object in objects {
            self.objects.put(object, true);
        }
        let loader = contribution_loader(&self.reader);
        self.contributions.all(loader)?;
        let loader = orphan_loader(&self.reader);
        self.orphans.all(loader)?;
        info!("Read whole registry cache: {} objects", count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(store: &ObjectStore, name: &str) -> ObjectId {
        let id = store.allocate_id();
        let (namespace, _) = crate::core::model::split_identifier(name).unwrap();
        store.add(
            RegistryObject::ExtensionPoint(Arc::new(ExtensionPoint::new(
                id,
                vec![],
                Extra::inline(ExtensionPointExtra {
                    label: None,
                    schema: None,
                    unique_identifier: name.to_string(),
                    namespace: namespace.to_string(),
                    contributor: 1,
                }),
            ))),
            true,
        );
        store.add_extension_point_name(name, id);
        id
    }

    #[test]
    fn test_session_objects_survive_trim() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let id = point(&store, "org.p.point");
        store.trim();
        let loaded = store.extension_point(id).unwrap();
        assert_eq!(
            store.extension_point_extra(&loaded).unwrap().unique_identifier,
            "org.p.point"
        );
        assert_eq!(store.stats().held, 1);
    }

    #[test]
    fn test_unknown_id_is_stale() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let err = store.extension(ObjectId(77)).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::StaleHandle { id: ObjectId(77), kind: ObjectKind::Extension }
        ));
    }

    #[test]
    fn test_kind_mismatch_is_stale() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let id = point(&store, "org.p.point");
        assert!(store.extension(id).is_err());
    }

    #[test]
    fn test_removed_object_is_stale() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let id = point(&store, "org.p.point");
        store.remove(id, true);
        assert!(store.extension_point(id).is_err());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let a = store.allocate_id();
        let b = store.allocate_id();
        assert_eq!(a, ObjectId(1));
        assert!(b > a);
        assert_eq!(store.next_id(), 3);
    }

    #[test]
    fn test_contribution_namespaces() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let id = point(&store, "org.p.point");
        store.add_contribution(Contribution::new(1, &[id], &[]).with_namespace("org.p"));
        store.add_contribution(Contribution::new(2, &[], &[]).with_namespace("org.empty"));

        assert!(store.is_dirty());
        assert!(store.has_contribution(1).unwrap());
        assert!(!store.has_contribution(3).unwrap());
        let namespaces: Vec<_> = store.namespaces().unwrap().into_iter().collect();
        assert_eq!(namespaces, vec!["org.empty".to_string(), "org.p".to_string()]);
        assert_eq!(store.contributions_in("org.p").unwrap().len(), 1);
    }

    #[test]
    fn test_children_swap_pins_point() {
        let store = ObjectStore::new(&RegistryConfig::in_memory());
        let id = point(&store, "org.p.point");
        store
            .set_extension_point_children(id, vec![ObjectId(40)].into())
            .unwrap();
        assert_eq!(&*store.extension_point(id).unwrap().children(), &[ObjectId(40)]);
    }
}
