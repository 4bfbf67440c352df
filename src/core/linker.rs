//! Linking of extensions to extension points
//!
//! An extension is linked while a point with its target identifier exists
//! and waits in the orphan index otherwise:
//!
//! ```text
//! orphan --(point added)--> linked --(point removed)--> orphan
//!    \                         |
//!     +---(module removed)-----+--> purged after dispatch
//! ```
//!
//! A [`Linker`] lives for one write batch. It mutates the store and records
//! deltas and purge targets into the batch's [`PendingChanges`].

use crate::core::error::Result;
use crate::core::handle::{ExtensionHandle, ExtensionPointHandle};
use crate::core::model::{
    BundleId, ConfigurationElement, Contribution, ContributionDecl, ElementDecl, Extension,
    ExtensionDecl, ExtensionExtra, ExtensionPoint, ExtensionPointDecl, ExtensionPointExtra, Extra,
    ObjectId, ObjectKind, RegistryObject,
};
use crate::core::notify::{DeltaKind, ExtensionDelta, PendingChanges, PurgeTarget};
use crate::core::store::ObjectStore;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct Linker<'a> {
    store: &'a Arc<ObjectStore>,
    changes: &'a mut PendingChanges,
    record_additions: bool,
}

impl<'a> Linker<'a> {
    /// `record_additions` is false when nobody listens; removals are always
    /// recorded so their objects get purged.
    pub fn new(store: &'a Arc<ObjectStore>, changes: &'a mut PendingChanges, record_additions: bool) -> Self {
        store.set_hold(true);
        Linker {
            store,
            changes,
            record_additions,
        }
    }

    /// Register a module's declarations and link them
    ///
    /// Returns `false` when the module has no namespace or is already
    /// registered.
    pub fn add_contribution(&mut self, decl: &ContributionDecl) -> Result<bool> {
        let namespace = decl.module.namespace();
        if namespace.is_empty() {
            warn!("Ignoring module {} without a namespace", decl.module.id);
            return Ok(false);
        }
        if self.store.has_contribution(decl.module.id)? {
            debug!("Module {} is already registered", decl.module.id);
            return Ok(false);
        }

        let mut points = Vec::with_capacity(decl.extension_points.len());
        for point in &decl.extension_points {
            if let Some(id) = self.create_extension_point(point, decl.module.id, namespace) {
                points.push(id);
            }
        }

        let mut extensions = Vec::with_capacity(decl.extensions.len());
        for extension in &decl.extensions {
            extensions.push(self.create_extension(extension, decl.module.id, namespace));
        }

        self.store.add_contribution(
            Contribution::new(decl.module.id, &points, &extensions).with_namespace(namespace),
        );

        for id in &points {
            self.add_extension_point(*id)?;
        }
        for id in &extensions {
            self.add_extension(*id)?;
        }

        debug!(
            "Added module {} ({}): {} extension points, {} extensions",
            decl.module.id,
            namespace,
            points.len(),
            extensions.len()
        );
        Ok(true)
    }

    /// Unlink and forget everything a module contributed
    ///
    /// Returns `false` for unknown modules, without touching the store.
    pub fn remove_contribution(&mut self, module: BundleId) -> Result<bool> {
        let Some(contribution) = self.store.contribution(module)? else {
            return Ok(false);
        };

        for id in contribution.extensions() {
            self.remove_extension(id)?;
        }
        for id in contribution.extension_points() {
            self.remove_extension_point(id)?;
        }
        self.store.remove_contribution(module)?;

        debug!("Removed module {}", module);
        Ok(true)
    }

    fn create_extension_point(&self, decl: &ExtensionPointDecl, contributor: BundleId, namespace: &str) -> Option<ObjectId> {
        let unique_identifier = format!("{}.{}", namespace, decl.simple_id);
        if self.store.extension_point_id(&unique_identifier).is_some() {
            warn!(
                "Extension point {} declared again by module {}; ignoring the new declaration",
                unique_identifier, contributor
            );
            return None;
        }

        let id = self.store.allocate_id();
        let point = ExtensionPoint::new(
            id,
            Vec::new(),
            Extra::inline(ExtensionPointExtra {
                label: decl.label.clone(),
                schema: decl.schema.clone(),
                unique_identifier: unique_identifier.clone(),
                namespace: namespace.to_string(),
                contributor,
            }),
        );
        self.store
            .add(RegistryObject::ExtensionPoint(Arc::new(point)), true);
        self.store.add_extension_point_name(&unique_identifier, id);
        Some(id)
    }

    fn create_extension(&self, decl: &ExtensionDecl, contributor: BundleId, namespace: &str) -> ObjectId {
        let id = self.store.allocate_id();
        let children = decl
            .elements
            .iter()
            .map(|element| self.create_element(element, contributor, (id, ObjectKind::Extension), 1))
            .collect();

        let extension = Extension::new(
            id,
            decl.simple_id.clone(),
            Some(namespace.to_string()),
            children,
            Extra::inline(ExtensionExtra {
                label: decl.label.clone(),
                extension_point_identifier: decl.qualified_point(namespace),
            }),
        );
        self.store
            .add(RegistryObject::Extension(Arc::new(extension)), true);
        id
    }

    fn create_element(
        &self,
        decl: &ElementDecl,
        contributor: BundleId,
        parent: (ObjectId, ObjectKind),
        depth: usize,
    ) -> ObjectId {
        let id = self.store.allocate_id();
        let own_kind = ObjectKind::element_kind_at(depth);
        let children = decl
            .children
            .iter()
            .map(|child| self.create_element(child, contributor, (id, own_kind), depth + 1))
            .collect();

        let element = ConfigurationElement::new(
            id,
            contributor,
            decl.name.clone(),
            decl.attributes.clone(),
            decl.value.clone(),
            parent,
            children,
            ObjectKind::element_kind_at(depth + 1),
            0,
        );
        self.store
            .add(RegistryObject::ConfigurationElement(Arc::new(element)), true);
        id
    }

    /// Adopt the orphans waiting for a newly added point
    fn add_extension_point(&mut self, id: ObjectId) -> Result<()> {
        let point = self.store.extension_point(id)?;
        let extra = self.store.extension_point_extra(&point)?;
        let orphans = self.store.remove_orphans(&extra.unique_identifier)?;
        if orphans.is_empty() {
            return Ok(());
        }

        let existing = point.children();
        if !existing.is_empty() {
            debug_assert!(existing.is_empty(), "new extension point already has extensions");
            error!(
                "Extension point {} already has {} extensions while adopting orphans",
                extra.unique_identifier,
                existing.len()
            );
        }

        let mut children = existing.to_vec();
        children.extend(orphans.iter().filter(|o| !existing.contains(*o)));
        self.store.set_extension_point_children(id, children.into())?;

        for orphan in orphans {
            self.record(DeltaKind::Added, id, &extra, orphan)?;
        }
        Ok(())
    }

    fn add_extension(&mut self, id: ObjectId) -> Result<()> {
        let extension = self.store.extension(id)?;
        let target = self
            .store
            .extension_extra(&extension)?
            .extension_point_identifier
            .clone();

        let Some(point_id) = self.store.extension_point_id(&target) else {
            self.store.add_orphan(&target, id)?;
            return Ok(());
        };

        let point = self.store.extension_point(point_id)?;
        let existing = point.children();
        if existing.contains(&id) {
            return Ok(());
        }
        let mut children = existing.to_vec();
        children.push(id);
        self.store
            .set_extension_point_children(point_id, children.into())?;

        let extra = self.store.extension_point_extra(&point)?;
        self.record(DeltaKind::Added, point_id, &extra, id)
    }

    fn remove_extension(&mut self, id: ObjectId) -> Result<()> {
        let extension = self.store.extension(id)?;
        let target = self
            .store
            .extension_extra(&extension)?
            .extension_point_identifier
            .clone();
        self.changes.purge(PurgeTarget::Extension(id));

        let Some(point_id) = self.store.extension_point_id(&target) else {
            self.store.remove_orphan(&target, id)?;
            return Ok(());
        };

        let point = self.store.extension_point(point_id)?;
        let existing = point.children();
        if !existing.contains(&id) {
            return Ok(());
        }
        let children: Vec<ObjectId> = existing.iter().copied().filter(|c| *c != id).collect();
        self.store
            .set_extension_point_children(point_id, children.into())?;

        let extra = self.store.extension_point_extra(&point)?;
        self.record(DeltaKind::Removed, point_id, &extra, id)
    }

    /// Drop a point from the name index and turn its extensions into orphans
    fn remove_extension_point(&mut self, id: ObjectId) -> Result<()> {
        let point = self.store.extension_point(id)?;
        let extra = self.store.extension_point_extra(&point)?;

        self.changes
            .delta_mut(&extra.namespace)
            .record_removed_point(extra.unique_identifier.clone());
        self.store.remove_extension_point_name(&extra.unique_identifier);
        self.changes.purge(PurgeTarget::ExtensionPoint(id));

        let existing = point.children();
        if existing.is_empty() {
            return Ok(());
        }

        self.store.add_orphans(&extra.unique_identifier, &existing)?;
        self.store
            .set_extension_point_children(id, Vec::new().into())?;
        for extension in existing.iter() {
            self.record(DeltaKind::Removed, id, &extra, *extension)?;
        }
        Ok(())
    }

    fn record(
        &mut self,
        kind: DeltaKind,
        point: ObjectId,
        point_extra: &ExtensionPointExtra,
        extension: ObjectId,
    ) -> Result<()> {
        if kind == DeltaKind::Added && !self.record_additions {
            return Ok(());
        }
        let unique_id = self.store.extension(extension)?.unique_identifier();
        let delta = ExtensionDelta::new(
            kind,
            ExtensionHandle::new(Arc::clone(self.store), extension),
            ExtensionPointHandle::new(Arc::clone(self.store), point),
            unique_id,
            point_extra.unique_identifier.clone(),
        );
        self.changes
            .delta_mut(&point_extra.namespace)
            .record_extension(delta);
        Ok(())
    }
}

impl Drop for Linker<'_> {
    fn drop(&mut self) {
        self.store.set_hold(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RegistryConfig;
    use crate::core::model::{ExtensionDecl, ExtensionPointDecl, ModuleDescriptor};

    fn provider() -> ContributionDecl {
        ContributionDecl::new(ModuleDescriptor::new(1, "p"))
            .extension_point(ExtensionPointDecl::new("point"))
    }

    fn consumer() -> ContributionDecl {
        ContributionDecl::new(ModuleDescriptor::new(2, "b")).extension(
            ExtensionDecl::new("p.point")
                .id("ext1")
                .element(ElementDecl::new("view").attr("id", "v1")),
        )
    }

    fn linked(store: &Arc<ObjectStore>, point: &str) -> Vec<ObjectId> {
        let id = store.extension_point_id(point).unwrap();
        store.extension_point(id).unwrap().children().to_vec()
    }

    #[test]
    fn test_extension_links_to_existing_point() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, true);

        assert!(linker.add_contribution(&provider()).unwrap());
        assert!(linker.add_contribution(&consumer()).unwrap());
        drop(linker);

        assert_eq!(linked(&store, "p.point").len(), 1);
        assert!(store.orphans_of("p.point").unwrap().is_empty());
        let (deltas, purge) = changes.take();
        assert_eq!(deltas["p"].extension_deltas().len(), 1);
        assert!(purge.is_empty());
    }

    #[test]
    fn test_orphan_adopted_when_point_arrives() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, true);

        linker.add_contribution(&consumer()).unwrap();
        assert_eq!(store.orphans_of("p.point").unwrap().len(), 1);
        linker.add_contribution(&provider()).unwrap();
        drop(linker);

        assert_eq!(linked(&store, "p.point").len(), 1);
        assert!(store.orphans_of("p.point").unwrap().is_empty());
        let (deltas, _) = changes.take();
        let added = deltas["p"].extension_deltas();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].kind(), DeltaKind::Added);
        assert_eq!(added[0].extension_unique_identifier(), Some("b.ext1"));
    }

    #[test]
    fn test_removing_point_orphans_extensions() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, false);

        linker.add_contribution(&provider()).unwrap();
        linker.add_contribution(&consumer()).unwrap();
        assert!(linker.remove_contribution(1).unwrap());
        drop(linker);

        assert!(store.extension_point_id("p.point").is_none());
        assert_eq!(store.orphans_of("p.point").unwrap().len(), 1);
        let (deltas, purge) = changes.take();
        assert_eq!(deltas["p"].removed_extension_points().collect::<Vec<_>>(), vec!["p.point"]);
        assert_eq!(deltas["p"].extension_deltas()[0].kind(), DeltaKind::Removed);
        // The orphaned extension survives; only the point is purged
        assert_eq!(purge.len(), 1);
        assert!(matches!(purge[0], PurgeTarget::ExtensionPoint(_)));
    }

    #[test]
    fn test_remove_unknown_module() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, true);
        assert!(!linker.remove_contribution(42).unwrap());
        drop(linker);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_duplicate_point_ignored() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, true);

        linker.add_contribution(&provider()).unwrap();
        let twin = ContributionDecl::new(ModuleDescriptor::new(3, "p").fragment_of("p"))
            .extension_point(ExtensionPointDecl::new("point"));
        linker.add_contribution(&twin).unwrap();
        drop(linker);

        let contribution = store.contribution(3).unwrap().unwrap();
        assert_eq!(contribution.extension_points().count(), 0);
        let first = store.contribution(1).unwrap().unwrap();
        assert_eq!(
            first.extension_points().next(),
            store.extension_point_id("p.point")
        );
    }

    #[test]
    fn test_element_depths_and_kinds() {
        let store = Arc::new(ObjectStore::new(&RegistryConfig::in_memory()));
        let mut changes = PendingChanges::default();
        let mut linker = Linker::new(&store, &mut changes, false);
        let decl = ContributionDecl::new(ModuleDescriptor::new(5, "deep")).extension(
            ExtensionDecl::new("x").element(
                ElementDecl::new("a").child(ElementDecl::new("b").child(ElementDecl::new("c"))),
            ),
        );
        linker.add_contribution(&decl).unwrap();
        drop(linker);

        let ext = store.contribution(5).unwrap().unwrap().extensions().next().unwrap();
        let extension = store.extension(ext).unwrap();
        let a = store
            .configuration_element(extension.children()[0], ObjectKind::ConfigurationElement)
            .unwrap();
        assert_eq!(a.parent_kind(), ObjectKind::Extension);
        let b = store
            .configuration_element(a.children()[0], a.children_kind())
            .unwrap();
        assert_eq!(b.children_kind(), ObjectKind::ThirdLevelConfigurationElement);
        let c = store
            .configuration_element(b.children()[0], b.children_kind())
            .unwrap();
        assert_eq!(c.name(), "c");
        assert_eq!(c.parent_kind(), ObjectKind::ConfigurationElement);
        // Relative target resolved against the contributing namespace
        assert_eq!(store.orphans_of("deep.x").unwrap(), vec![ext]);
    }
}
