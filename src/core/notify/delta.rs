use crate::core::handle::{ExtensionHandle, ExtensionPointHandle};
use crate::core::model::ObjectId;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKind {
    Added,
    Removed,
}

/// One extension linked to or unlinked from an extension point
#[derive(Debug, Clone)]
pub struct ExtensionDelta {
    kind: DeltaKind,
    extension: ExtensionHandle,
    extension_point: ExtensionPointHandle,
    extension_unique_id: Option<String>,
    extension_point_unique_id: String,
}

impl ExtensionDelta {
    pub(crate) fn new(
        kind: DeltaKind,
        extension: ExtensionHandle,
        extension_point: ExtensionPointHandle,
        extension_unique_id: Option<String>,
        extension_point_unique_id: String,
    ) -> Self {
        ExtensionDelta {
            kind,
            extension,
            extension_point,
            extension_unique_id,
            extension_point_unique_id,
        }
    }

    pub fn kind(&self) -> DeltaKind {
        self.kind
    }

    /// Handles stay resolvable until every listener of the dispatch has run
    pub fn extension(&self) -> &ExtensionHandle {
        &self.extension
    }

    pub fn extension_point(&self) -> &ExtensionPointHandle {
        &self.extension_point
    }

    pub fn extension_unique_identifier(&self) -> Option<&str> {
        self.extension_unique_id.as_deref()
    }

    pub fn extension_point_unique_identifier(&self) -> &str {
        &self.extension_point_unique_id
    }
}

/// Changes of one namespace within one write batch
#[derive(Debug, Clone, Default)]
pub struct RegistryDelta {
    extension_deltas: Vec<ExtensionDelta>,
    removed_extension_points: Vec<String>,
}

impl RegistryDelta {
    pub(crate) fn record_extension(&mut self, delta: ExtensionDelta) {
        self.extension_deltas.push(delta);
    }

    pub(crate) fn record_removed_point(&mut self, unique_id: String) {
        self.removed_extension_points.push(unique_id);
    }

    pub fn extension_deltas(&self) -> &[ExtensionDelta] {
        &self.extension_deltas
    }

    pub fn removed_extension_points(&self) -> impl Iterator<Item = &str> {
        self.removed_extension_points.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.extension_deltas.is_empty() && self.removed_extension_points.is_empty()
    }
}

/// Deltas of one write batch, keyed by namespace
pub type DeltaMap = BTreeMap<String, RegistryDelta>;

/// What a listener receives
///
/// Queries take the namespace of the extension point (not of the
/// extension) since that is how deltas are grouped.
#[derive(Debug, Clone)]
pub struct RegistryChangeEvent {
    deltas: Arc<DeltaMap>,
}

impl RegistryChangeEvent {
    pub(crate) fn new(deltas: Arc<DeltaMap>) -> Self {
        RegistryChangeEvent { deltas }
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.deltas.keys().map(String::as_str)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.deltas.contains_key(namespace)
    }

    /// Every extension delta of every namespace
    pub fn all_extension_deltas(&self) -> impl Iterator<Item = &ExtensionDelta> {
        self.deltas.values().flat_map(|d| d.extension_deltas().iter())
    }

    pub fn extension_deltas(&self, namespace: &str) -> &[ExtensionDelta] {
        self.deltas
            .get(namespace)
            .map(RegistryDelta::extension_deltas)
            .unwrap_or(&[])
    }

    /// Deltas of the point `namespace.point`
    pub fn extension_deltas_for(&self, namespace: &str, point: &str) -> Vec<&ExtensionDelta> {
        let unique = format!("{}.{}", namespace, point);
        self.extension_deltas(namespace)
            .iter()
            .filter(|d| d.extension_point_unique_identifier() == unique)
            .collect()
    }

    /// Delta of the extension with unique id `extension` on `namespace.point`
    pub fn extension_delta(&self, namespace: &str, point: &str, extension: &str) -> Option<&ExtensionDelta> {
        self.extension_deltas_for(namespace, point)
            .into_iter()
            .find(|d| d.extension_unique_identifier() == Some(extension))
    }

    pub fn removed_extension_points(&self, namespace: &str) -> Vec<&str> {
        self.deltas
            .get(namespace)
            .map(|d| d.removed_extension_points().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.values().all(RegistryDelta::is_empty)
    }
}

/// Object to drop once the listeners of a dispatch unit have run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeTarget {
    /// The extension and every element below it
    Extension(ObjectId),
    ExtensionPoint(ObjectId),
}

/// Changes recorded by the write batch in progress
#[derive(Debug, Default)]
pub struct PendingChanges {
    deltas: DeltaMap,
    purge: Vec<PurgeTarget>,
}

impl PendingChanges {
    /// Delta of `namespace`, created on first touch
    pub fn delta_mut(&mut self, namespace: &str) -> &mut RegistryDelta {
        self.deltas.entry(namespace.to_string()).or_default()
    }

    pub fn purge(&mut self, target: PurgeTarget) {
        self.purge.push(target);
    }

    pub fn is_empty(&self) -> bool {
        self.purge.is_empty() && self.deltas.values().all(RegistryDelta::is_empty)
    }

    pub fn has_removals(&self) -> bool {
        !self.purge.is_empty()
            || self.deltas.values().any(|d| {
                !d.removed_extension_points.is_empty()
                    || d.extension_deltas.iter().any(|e| e.kind == DeltaKind::Removed)
            })
    }

    /// Move the recorded changes out, leaving this batch empty
    pub fn take(&mut self) -> (DeltaMap, Vec<PurgeTarget>) {
        (std::mem::take(&mut self.deltas), std::mem::take(&mut self.purge))
    }
}
