//! Handles returned by registry queries
//!
//! A handle is an object id plus the store to resolve it in. It never caches
//! data: every accessor goes back through the store, so a handle whose
//! object was removed reports [`RegistryError::StaleHandle`] instead of
//! serving old data.

use crate::core::error::Result;
use crate::core::model::{split_identifier, BundleId, ObjectId, ObjectKind};
use crate::core::store::ObjectStore;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

macro_rules! handle_identity {
    ($name:ident) => {
        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.id == other.id
            }
        }

        impl Eq for $name {}

        impl Hash for $name {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.id).finish()
            }
        }
    };
}

#[derive(Clone)]
pub struct ExtensionPointHandle {
    store: Arc<ObjectStore>,
    id: ObjectId,
}

handle_identity!(ExtensionPointHandle);

impl ExtensionPointHandle {
    pub(crate) fn new(store: Arc<ObjectStore>, id: ObjectId) -> Self {
        ExtensionPointHandle { store, id }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn unique_identifier(&self) -> Result<String> {
        let point = self.store.extension_point(self.id)?;
        Ok(self.store.extension_point_extra(&point)?.unique_identifier.clone())
    }

    pub fn simple_identifier(&self) -> Result<String> {
        let unique = self.unique_identifier()?;
        Ok(match split_identifier(&unique) {
            Some((_, simple)) => simple.to_string(),
            None => unique,
        })
    }

    pub fn namespace(&self) -> Result<String> {
        let point = self.store.extension_point(self.id)?;
        Ok(self.store.extension_point_extra(&point)?.namespace.clone())
    }

    pub fn label(&self) -> Result<Option<String>> {
        let point = self.store.extension_point(self.id)?;
        Ok(self.store.extension_point_extra(&point)?.label.clone())
    }

    pub fn schema_reference(&self) -> Result<Option<String>> {
        let point = self.store.extension_point(self.id)?;
        Ok(self.store.extension_point_extra(&point)?.schema.clone())
    }

    /// Module that declared this point
    pub fn contributor(&self) -> Result<BundleId> {
        let point = self.store.extension_point(self.id)?;
        Ok(self.store.extension_point_extra(&point)?.contributor)
    }

    /// Linked extensions, in link order
    pub fn extensions(&self) -> Result<Vec<ExtensionHandle>> {
        let point = self.store.extension_point(self.id)?;
        Ok(point
            .children()
            .iter()
            .map(|id| ExtensionHandle::new(Arc::clone(&self.store), *id))
            .collect())
    }

    /// Linked extension with the given unique identifier
    pub fn extension(&self, unique_id: &str) -> Result<Option<ExtensionHandle>> {
        for extension in self.extensions()? {
            if extension.unique_identifier()?.as_deref() == Some(unique_id) {
                return Ok(Some(extension));
            }
        }
        Ok(None)
    }

    /// First level elements of every linked extension
    pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElementHandle>> {
        let mut elements = Vec::new();
        for extension in self.extensions()? {
            elements.extend(extension.configuration_elements()?);
        }
        Ok(elements)
    }

    pub fn is_valid(&self) -> bool {
        self.store.extension_point(self.id).is_ok()
    }
}

#[derive(Clone)]
pub struct ExtensionHandle {
    store: Arc<ObjectStore>,
    id: ObjectId,
}

handle_identity!(ExtensionHandle);

impl ExtensionHandle {
    pub(crate) fn new(store: Arc<ObjectStore>, id: ObjectId) -> Self {
        ExtensionHandle { store, id }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn simple_identifier(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .extension(self.id)?
            .simple_identifier()
            .map(str::to_string))
    }

    pub fn unique_identifier(&self) -> Result<Option<String>> {
        Ok(self.store.extension(self.id)?.unique_identifier())
    }

    pub fn namespace(&self) -> Result<Option<String>> {
        Ok(self.store.extension(self.id)?.namespace().map(str::to_string))
    }

    pub fn label(&self) -> Result<Option<String>> {
        let extension = self.store.extension(self.id)?;
        Ok(self.store.extension_extra(&extension)?.label.clone())
    }

    pub fn extension_point_unique_identifier(&self) -> Result<String> {
        let extension = self.store.extension(self.id)?;
        Ok(self
            .store
            .extension_extra(&extension)?
            .extension_point_identifier
            .clone())
    }

    pub fn configuration_elements(&self) -> Result<Vec<ConfigurationElementHandle>> {
        let extension = self.store.extension(self.id)?;
        Ok(extension
            .children()
            .iter()
            .map(|id| {
                ConfigurationElementHandle::new(
                    Arc::clone(&self.store),
                    *id,
                    ObjectKind::ConfigurationElement,
                )
            })
            .collect())
    }

    pub fn is_valid(&self) -> bool {
        self.store.extension(self.id).is_ok()
    }
}

/// Parent of a configuration element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementParent {
    Extension(ExtensionHandle),
    Element(ConfigurationElementHandle),
}

#[derive(Clone)]
pub struct ConfigurationElementHandle {
    store: Arc<ObjectStore>,
    id: ObjectId,
    kind: ObjectKind,
}

handle_identity!(ConfigurationElementHandle);

impl ConfigurationElementHandle {
    pub(crate) fn new(store: Arc<ObjectStore>, id: ObjectId, kind: ObjectKind) -> Self {
        ConfigurationElementHandle { store, id, kind }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn name(&self) -> Result<String> {
        Ok(self
            .store
            .configuration_element(self.id, self.kind)?
            .name()
            .to_string())
    }

    pub fn attribute(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .store
            .configuration_element(self.id, self.kind)?
            .attribute(name)
            .map(str::to_string))
    }

    pub fn attribute_names(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .configuration_element(self.id, self.kind)?
            .attributes()
            .iter()
            .map(|(name, _)| name.clone())
            .collect())
    }

    pub fn value(&self) -> Result<Option<String>> {
        Ok(self
            .store
            .configuration_element(self.id, self.kind)?
            .value()
            .map(str::to_string))
    }

    pub fn contributor(&self) -> Result<BundleId> {
        Ok(self
            .store
            .configuration_element(self.id, self.kind)?
            .contributor())
    }

    pub fn children(&self) -> Result<Vec<ConfigurationElementHandle>> {
        let element = self.store.configuration_element(self.id, self.kind)?;
        let kind = element.children_kind();
        Ok(element
            .children()
            .iter()
            .map(|id| ConfigurationElementHandle::new(Arc::clone(&self.store), *id, kind))
            .collect())
    }

    pub fn children_named(&self, name: &str) -> Result<Vec<ConfigurationElementHandle>> {
        let mut matching = Vec::new();
        for child in self.children()? {
            if child.name()? == name {
                matching.push(child);
            }
        }
        Ok(matching)
    }

    pub fn parent(&self) -> Result<ElementParent> {
        let element = self.store.configuration_element(self.id, self.kind)?;
        let store = Arc::clone(&self.store);
        Ok(match element.parent_kind() {
            ObjectKind::Extension => {
                ElementParent::Extension(ExtensionHandle::new(store, element.parent_id()))
            }
            kind => ElementParent::Element(ConfigurationElementHandle::new(
                store,
                element.parent_id(),
                kind,
            )),
        })
    }

    /// Extension this element belongs to, however deeply nested
    pub fn declaring_extension(&self) -> Result<ExtensionHandle> {
        let mut current = self.clone();
        loop {
            match current.parent()? {
                ElementParent::Extension(extension) => return Ok(extension),
                ElementParent::Element(parent) => current = parent,
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.store.configuration_element(self.id, self.kind).is_ok()
    }
}
