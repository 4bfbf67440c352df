//! The extension registry facade
//!
//! [`ExtensionRegistry`] ties the store, the linker and the dispatcher
//! together. Mutations run under the write side of one reader/writer lock
//! and end by scheduling at most one dispatch unit; queries take the read
//! side so a multi-step lookup never observes half of a write batch.

use crate::core::config::{CacheEnvironment, RegistryConfig};
use crate::core::error::Result;
use crate::core::files::FileManager;
use crate::core::handle::{ConfigurationElementHandle, ExtensionHandle, ExtensionPointHandle};
use crate::core::linker::Linker;
use crate::core::model::{split_identifier, BundleId, ContributionDecl, ObjectId};
use crate::core::module::{ModuleEvent, ModuleSource};
use crate::core::notify::{
    DispatchReport, DispatchUnit, Dispatcher, ListenerList, PendingChanges, RegistryChangeEvent,
    RegistryChangeListener,
};
use crate::core::store::{ObjectStore, StoreStats};
use crate::core::table::{TableReader, TableWriter};
use crossbeam::channel::Receiver;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ExtensionRegistry {
    store: Arc<ObjectStore>,
    /// Guards mutations and multi-step reads; holds the deltas of the batch in progress
    access: RwLock<PendingChanges>,
    listeners: Mutex<ListenerList>,
    dispatcher: Dispatcher,
    config: RegistryConfig,
    env: CacheEnvironment,
    files: Option<Arc<dyn FileManager>>,
    modules: Arc<dyn ModuleSource>,
    from_cache: bool,
    stopped: AtomicBool,
}

impl ExtensionRegistry {
    /// Start a registry
    ///
    /// A valid cache is used as is. A missing or rejected cache means a cold
    /// start: every installed module is added from `modules`.
    pub fn open(
        config: RegistryConfig,
        env: CacheEnvironment,
        files: Option<Arc<dyn FileManager>>,
        modules: Arc<dyn ModuleSource>,
    ) -> Result<Self> {
        config.validate()?;
        let stamp = Self::compute_stamp(&config, modules.as_ref());

        let cached = match (&files, config.cache_enabled) {
            (Some(files), true) => Self::open_cache(&config, &env, files.as_ref(), stamp)?,
            _ => None,
        };
        let from_cache = cached.is_some();
        let store = Arc::new(match cached {
            Some(store) => store,
            None => ObjectStore::new(&config),
        });

        let registry = ExtensionRegistry {
            store,
            access: RwLock::new(PendingChanges::default()),
            listeners: Mutex::new(ListenerList::default()),
            dispatcher: Dispatcher::start()?,
            config,
            env,
            files,
            modules,
            from_cache,
            stopped: AtomicBool::new(false),
        };

        if from_cache {
            info!("Using registry cache");
        } else {
            let installed = registry.modules.installed();
            info!("Building registry from {} installed modules", installed.len());
            registry.add_all(&installed)?;
        }
        Ok(registry)
    }

    fn open_cache(
        config: &RegistryConfig,
        env: &CacheEnvironment,
        files: &dyn FileManager,
        stamp: i64,
    ) -> Result<Option<ObjectStore>> {
        let opened = match TableReader::open(files, env, stamp) {
            Ok(Some(opened)) => opened,
            Ok(None) => {
                debug!("No registry cache found");
                return Ok(None);
            }
            Err(e) if e.is_cache_failure() => {
                warn!("Registry cache unusable, rebuilding: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let (reader, index) = opened;
        match ObjectStore::from_cache(config, reader, index) {
            Ok(store) => Ok(Some(store)),
            Err(e) if e.is_cache_failure() => {
                warn!("Registry cache unreadable, rebuilding: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn compute_stamp(config: &RegistryConfig, modules: &dyn ModuleSource) -> i64 {
        if config.check_config {
            modules.registry_stamp()
        } else {
            0
        }
    }

    /// True when startup used the on-disk cache
    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ----- mutation -----

    /// Add one module's contribution
    ///
    /// Returns `false` when the module was not added (no namespace, or
    /// already registered).
    pub fn add(&self, decl: &ContributionDecl) -> Result<bool> {
        Ok(self.add_all(std::slice::from_ref(decl))? == 1)
    }

    /// Add several contributions as one batch with a single change event
    ///
    /// Returns how many were actually added.
    pub fn add_all(&self, decls: &[ContributionDecl]) -> Result<usize> {
        let mut changes = self.access.write();
        let record_additions = self.records_additions();
        let outcome = Self::link_all(&mut Linker::new(&self.store, &mut changes, record_additions), decls);
        self.fire_change_event(&mut changes);
        outcome
    }

    fn link_all(linker: &mut Linker<'_>, decls: &[ContributionDecl]) -> Result<usize> {
        let mut added = 0;
        for decl in decls {
            if linker.add_contribution(decl)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove everything a module contributed
    ///
    /// Returns `false` for unknown modules.
    pub fn remove(&self, module: BundleId) -> Result<bool> {
        let mut changes = self.access.write();
        let outcome = Linker::new(&self.store, &mut changes, self.records_additions())
            .remove_contribution(module);
        self.fire_change_event(&mut changes);
        outcome
    }

    /// Apply a module lifecycle change
    ///
    /// Returns whether the registry changed.
    pub fn handle_module_event(&self, event: ModuleEvent) -> Result<bool> {
        match event {
            ModuleEvent::Resolved(decl) => {
                let guard = self.access.upgradable_read();
                if self.store.has_contribution(decl.module.id)? {
                    return Ok(false);
                }
                let mut changes = RwLockUpgradableReadGuard::upgrade(guard);
                let outcome = Linker::new(&self.store, &mut changes, self.records_additions())
                    .add_contribution(&decl);
                self.fire_change_event(&mut changes);
                outcome
            }
            ModuleEvent::Unresolved(module) | ModuleEvent::Uninstalled(module) => self.remove(module),
        }
    }

    fn records_additions(&self) -> bool {
        self.config.debug_events || !self.listeners.lock().is_empty()
    }

    /// Hand the finished batch to the dispatcher
    fn fire_change_event(&self, changes: &mut PendingChanges) {
        if changes.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().snapshot();
        if listeners.is_empty() && !changes.has_removals() && !self.config.debug_events {
            changes.take();
            return;
        }

        let (deltas, purge) = changes.take();
        self.dispatcher.schedule(DispatchUnit {
            listeners,
            event: RegistryChangeEvent::new(Arc::new(deltas)),
            purge,
            store: Arc::clone(&self.store),
            debug_events: self.config.debug_events,
        });
    }

    // ----- listeners -----

    /// Register a listener, optionally restricted to one namespace
    ///
    /// Registering the same listener again replaces its filter.
    pub fn add_listener(&self, listener: Arc<dyn RegistryChangeListener>, filter: Option<&str>) {
        self.listeners.lock().add(listener, filter.map(str::to_string));
    }

    pub fn remove_listener(&self, listener: &Arc<dyn RegistryChangeListener>) -> bool {
        self.listeners.lock().remove(listener)
    }

    /// Block until every change event scheduled so far was delivered
    pub fn wait_idle(&self) {
        self.dispatcher.wait_idle();
    }

    /// Reports of dispatches in which a listener failed
    pub fn reports(&self) -> Receiver<DispatchReport> {
        self.dispatcher.reports()
    }

    // ----- queries -----

    fn point_handle(&self, id: ObjectId) -> ExtensionPointHandle {
        ExtensionPointHandle::new(Arc::clone(&self.store), id)
    }

    fn extension_handle(&self, id: ObjectId) -> ExtensionHandle {
        ExtensionHandle::new(Arc::clone(&self.store), id)
    }

    /// Extension point with the given unique identifier
    pub fn extension_point(&self, unique_id: &str) -> Option<ExtensionPointHandle> {
        let _read = self.access.read();
        self.store
            .extension_point_id(unique_id)
            .map(|id| self.point_handle(id))
    }

    /// Extension point `simple_id` of `namespace`
    pub fn extension_point_in(&self, namespace: &str, simple_id: &str) -> Option<ExtensionPointHandle> {
        self.extension_point(&format!("{}.{}", namespace, simple_id))
    }

    /// Every extension point, ordered by unique identifier
    pub fn extension_points(&self) -> Vec<ExtensionPointHandle> {
        let _read = self.access.read();
        let mut index = self.store.extension_point_index();
        index.sort();
        index.into_iter().map(|(_, id)| self.point_handle(id)).collect()
    }

    /// Extension points declared by the modules of `namespace`, fragments included
    pub fn extension_points_in(&self, namespace: &str) -> Result<Vec<ExtensionPointHandle>> {
        let _read = self.access.read();
        Ok(self
            .store
            .contributions_in(namespace)?
            .iter()
            .flat_map(|c| c.extension_points())
            .map(|id| self.point_handle(id))
            .collect())
    }

    /// Linked extensions declared by the modules of `namespace`
    pub fn extensions_in(&self, namespace: &str) -> Result<Vec<ExtensionHandle>> {
        let _read = self.access.read();
        self.linked_extensions_in(namespace)
    }

    fn linked_extensions_in(&self, namespace: &str) -> Result<Vec<ExtensionHandle>> {
        let mut linked = Vec::new();
        for contribution in self.store.contributions_in(namespace)? {
            for id in contribution.extensions() {
                let extension = self.store.extension(id)?;
                let point = &self.store.extension_extra(&extension)?.extension_point_identifier;
                if self.store.extension_point_id(point).is_some() {
                    linked.push(self.extension_handle(id));
                }
            }
        }
        Ok(linked)
    }

    /// Linked extension with the given unique identifier
    ///
    /// The namespace part of the identifier selects the modules searched.
    pub fn extension(&self, unique_id: &str) -> Result<Option<ExtensionHandle>> {
        let Some((namespace, _)) = split_identifier(unique_id) else {
            return Ok(None);
        };
        let _read = self.access.read();
        for handle in self.linked_extensions_in(namespace)? {
            if handle.unique_identifier()?.as_deref() == Some(unique_id) {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    /// Extension `extension_id` linked to the point `point_id`
    pub fn extension_for(&self, point_id: &str, extension_id: &str) -> Result<Option<ExtensionHandle>> {
        match split_identifier(point_id) {
            Some((namespace, point)) => self.extension_in(namespace, point, extension_id),
            None => Ok(None),
        }
    }

    /// Extension `extension_id` linked to the point `namespace.point`
    pub fn extension_in(&self, namespace: &str, point: &str, extension_id: &str) -> Result<Option<ExtensionHandle>> {
        let _read = self.access.read();
        let unique = format!("{}.{}", namespace, point);
        match self.store.extension_point_id(&unique) {
            Some(id) => self.point_handle(id).extension(extension_id),
            None => Ok(None),
        }
    }

    /// Top-level elements of every extension linked to `point_id`
    pub fn configuration_elements_for(&self, point_id: &str) -> Result<Vec<ConfigurationElementHandle>> {
        match split_identifier(point_id) {
            Some((namespace, point)) => self.configuration_elements_in(namespace, point),
            None => Ok(Vec::new()),
        }
    }

    pub fn configuration_elements_in(&self, namespace: &str, point: &str) -> Result<Vec<ConfigurationElementHandle>> {
        let _read = self.access.read();
        match self.store.extension_point_id(&format!("{}.{}", namespace, point)) {
            Some(id) => self.point_handle(id).configuration_elements(),
            None => Ok(Vec::new()),
        }
    }

    /// Top-level elements of one extension of `namespace.point`
    pub fn configuration_elements_of(
        &self,
        namespace: &str,
        point: &str,
        extension_id: &str,
    ) -> Result<Vec<ConfigurationElementHandle>> {
        match self.extension_in(namespace, point, extension_id)? {
            Some(extension) => extension.configuration_elements(),
            None => Ok(Vec::new()),
        }
    }

    /// Namespaces with at least one registered module, sorted
    pub fn namespaces(&self) -> Result<Vec<String>> {
        let _read = self.access.read();
        Ok(self.store.namespaces()?.into_iter().collect())
    }

    pub fn has_contribution(&self, module: BundleId) -> Result<bool> {
        let _read = self.access.read();
        self.store.has_contribution(module)
    }

    // ----- maintenance -----

    /// Release every reclaimable cached object
    pub fn trim(&self) {
        self.store.trim();
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Deliver pending events and write the cache if anything changed
    ///
    /// Cache write failures are logged; the next start rebuilds instead.
    /// Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.dispatcher.stop();

        let _write = self.access.write();
        if !self.config.cache_enabled || !self.store.is_dirty() {
            debug!("Registry cache is up to date");
            return;
        }
        let Some(files) = &self.files else {
            return;
        };
        if files.is_read_only() {
            debug!("Cache location is read-only; skipping cache write");
            return;
        }

        let stamp = Self::compute_stamp(&self.config, self.modules.as_ref());
        match TableWriter::new(&self.store).write(files.as_ref(), &self.env, stamp) {
            Ok(()) => info!("Registry cache written"),
            Err(e) => warn!("Failed to write registry cache: {}", e),
        }
    }
}

impl Drop for ExtensionRegistry {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("from_cache", &self.from_cache)
            .field("stats", &self.store.stats())
            .finish_non_exhaustive()
    }
}
