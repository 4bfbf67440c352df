//! Registry model objects
//!
//! Each object keeps its navigation data (ids of children and parent, names)
//! in memory. The larger, rarely read fields are split into an "extra" part
//! that is either held inline (objects created this session) or left on disk
//! at a known offset of the extra stream (objects loaded from the cache).

use super::{BundleId, ObjectId, ObjectKind};
use parking_lot::RwLock;
use std::sync::Arc;

/// Extra data of an object: inline, or still on disk
#[derive(Debug, Clone)]
pub enum Extra<T> {
    /// Created this session; the data lives with the object
    Inline(Arc<T>),
    /// Loaded from the cache; the data sits at this offset of the extra stream
    Cached(u32),
}

impl<T> Extra<T> {
    pub fn inline(value: T) -> Self {
        Extra::Inline(Arc::new(value))
    }

    pub fn offset(&self) -> Option<u32> {
        match self {
            Extra::Inline(_) => None,
            Extra::Cached(offset) => Some(*offset),
        }
    }
}

/// Lazily loaded part of an extension point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPointExtra {
    pub label: Option<String>,
    pub schema: Option<String>,
    /// Fully qualified identifier (`namespace.simpleId`)
    pub unique_identifier: String,
    pub namespace: String,
    /// Module that declared the point
    pub contributor: BundleId,
}

/// Lazily loaded part of an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionExtra {
    pub label: Option<String>,
    /// Fully qualified identifier of the point this extension plugs into
    pub extension_point_identifier: String,
}

/// A named contribution slot
///
/// The children array is the only mutable part. It is replaced wholesale on
/// every link/unlink so a reader holding the previous `Arc` keeps a complete,
/// consistent view.
#[derive(Debug)]
pub struct ExtensionPoint {
    id: ObjectId,
    children: RwLock<Arc<[ObjectId]>>,
    extra: Extra<ExtensionPointExtra>,
}

impl ExtensionPoint {
    pub fn new(id: ObjectId, children: Vec<ObjectId>, extra: Extra<ExtensionPointExtra>) -> Self {
        ExtensionPoint {
            id,
            children: RwLock::new(children.into()),
            extra,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Snapshot of the linked extension ids
    pub fn children(&self) -> Arc<[ObjectId]> {
        Arc::clone(&self.children.read())
    }

    /// Swap in a complete new children array
    pub(crate) fn set_children(&self, children: Arc<[ObjectId]>) {
        *self.children.write() = children;
    }

    pub fn extra(&self) -> &Extra<ExtensionPointExtra> {
        &self.extra
    }
}

/// A contribution plugged into a named extension point
#[derive(Debug)]
pub struct Extension {
    id: ObjectId,
    simple_id: Option<String>,
    namespace: Option<String>,
    children: Vec<ObjectId>,
    extra: Extra<ExtensionExtra>,
}

impl Extension {
    pub fn new(
        id: ObjectId,
        simple_id: Option<String>,
        namespace: Option<String>,
        children: Vec<ObjectId>,
        extra: Extra<ExtensionExtra>,
    ) -> Self {
        Extension {
            id,
            simple_id,
            namespace,
            children,
            extra,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn simple_identifier(&self) -> Option<&str> {
        self.simple_id.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// `namespace.simpleId`, or `None` for anonymous extensions
    pub fn unique_identifier(&self) -> Option<String> {
        let simple = self.simple_id.as_deref()?;
        Some(format!("{}.{}", self.namespace.as_deref().unwrap_or_default(), simple))
    }

    /// Ids of the first level configuration elements
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    pub fn extra(&self) -> &Extra<ExtensionExtra> {
        &self.extra
    }
}

/// A node of the structured data carried by an extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationElement {
    id: ObjectId,
    contributor: BundleId,
    name: String,
    attributes: Vec<(String, String)>,
    value: Option<String>,
    parent_id: ObjectId,
    parent_kind: ObjectKind,
    children: Vec<ObjectId>,
    children_kind: ObjectKind,
    /// Extra stream offset of the children of a second level element, 0 otherwise
    misc: u32,
}

impl ConfigurationElement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ObjectId,
        contributor: BundleId,
        name: String,
        attributes: Vec<(String, String)>,
        value: Option<String>,
        parent: (ObjectId, ObjectKind),
        children: Vec<ObjectId>,
        children_kind: ObjectKind,
        misc: u32,
    ) -> Self {
        ConfigurationElement {
            id,
            contributor,
            name,
            attributes,
            value,
            parent_id: parent.0,
            parent_kind: parent.1,
            children,
            children_kind,
            misc,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn contributor(&self) -> BundleId {
        self.contributor
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn parent_id(&self) -> ObjectId {
        self.parent_id
    }

    pub fn parent_kind(&self) -> ObjectKind {
        self.parent_kind
    }

    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Kind to resolve the children with
    pub fn children_kind(&self) -> ObjectKind {
        self.children_kind
    }

    pub fn misc(&self) -> u32 {
        self.misc
    }

    /// Flattened `[name, value, name, value, ..., text?]` layout used on disk
    pub fn properties_and_value(&self) -> Vec<&str> {
        let mut flat = Vec::with_capacity(self.attributes.len() * 2 + 1);
        for (key, value) in &self.attributes {
            flat.push(key.as_str());
            flat.push(value.as_str());
        }
        if let Some(value) = &self.value {
            flat.push(value.as_str());
        }
        flat
    }

    /// Rebuild attributes and value from the on-disk flattened layout
    pub fn split_properties(mut flat: Vec<String>) -> (Vec<(String, String)>, Option<String>) {
        let value = if flat.len() % 2 == 1 { flat.pop() } else { None };
        let mut attributes = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            attributes.push((key, value));
        }
        (attributes, value)
    }
}

/// Any object held by the store
#[derive(Debug, Clone)]
pub enum RegistryObject {
    ExtensionPoint(Arc<ExtensionPoint>),
    Extension(Arc<Extension>),
    ConfigurationElement(Arc<ConfigurationElement>),
}

impl RegistryObject {
    pub fn id(&self) -> ObjectId {
        match self {
            RegistryObject::ExtensionPoint(xpt) => xpt.id(),
            RegistryObject::Extension(ext) => ext.id(),
            RegistryObject::ConfigurationElement(ce) => ce.id(),
        }
    }

    /// Whether this object may be served for a request of `kind`
    pub fn matches(&self, kind: ObjectKind) -> bool {
        match self {
            RegistryObject::ExtensionPoint(_) => kind == ObjectKind::ExtensionPoint,
            RegistryObject::Extension(_) => kind == ObjectKind::Extension,
            RegistryObject::ConfigurationElement(_) => kind.is_configuration_element(),
        }
    }

    /// Whether the object can be rebuilt from the cache files after eviction
    pub fn is_reconstructible(&self) -> bool {
        match self {
            RegistryObject::ExtensionPoint(xpt) => xpt.extra().offset().is_some(),
            RegistryObject::Extension(ext) => ext.extra().offset().is_some(),
            // Elements carry no extra part; the store tracks their origin by offset
            RegistryObject::ConfigurationElement(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(attributes: Vec<(&str, &str)>, value: Option<&str>) -> ConfigurationElement {
        ConfigurationElement::new(
            ObjectId(5),
            1,
            "view".to_string(),
            attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            value.map(str::to_string),
            (ObjectId(4), ObjectKind::Extension),
            Vec::new(),
            ObjectKind::ConfigurationElement,
            0,
        )
    }

    #[test]
    fn test_properties_flatten_with_value() {
        let ce = element(vec![("id", "a"), ("class", "B")], Some("text"));
        assert_eq!(ce.properties_and_value(), vec!["id", "a", "class", "B", "text"]);

        let flat = ce
            .properties_and_value()
            .into_iter()
            .map(str::to_string)
            .collect();
        let (attributes, value) = ConfigurationElement::split_properties(flat);
        assert_eq!(attributes.len(), 2);
        assert_eq!(value.as_deref(), Some("text"));
    }

    #[test]
    fn test_properties_without_value() {
        let ce = element(vec![("id", "a")], None);
        let flat = ce
            .properties_and_value()
            .into_iter()
            .map(str::to_string)
            .collect();
        let (attributes, value) = ConfigurationElement::split_properties(flat);
        assert_eq!(attributes, vec![("id".to_string(), "a".to_string())]);
        assert!(value.is_none());
        assert_eq!(ce.attribute("id"), Some("a"));
        assert_eq!(ce.attribute("missing"), None);
    }

    #[test]
    fn test_extension_unique_identifier() {
        let ext = Extension::new(
            ObjectId(1),
            Some("ext1".into()),
            Some("org.b".into()),
            vec![],
            Extra::inline(ExtensionExtra {
                label: None,
                extension_point_identifier: "org.p.point".into(),
            }),
        );
        assert_eq!(ext.unique_identifier().as_deref(), Some("org.b.ext1"));

        let anonymous = Extension::new(ObjectId(2), None, Some("org.b".into()), vec![], Extra::Cached(0));
        assert!(anonymous.unique_identifier().is_none());
    }

    #[test]
    fn test_children_swap_keeps_old_snapshot() {
        let xpt = ExtensionPoint::new(ObjectId(1), vec![ObjectId(2)], Extra::Cached(0));
        let before = xpt.children();
        xpt.set_children(vec![ObjectId(2), ObjectId(3)].into());
        assert_eq!(&*before, &[ObjectId(2)]);
        assert_eq!(&*xpt.children(), &[ObjectId(2), ObjectId(3)]);
    }

    #[test]
    fn test_object_kind_matching() {
        let obj = RegistryObject::ConfigurationElement(Arc::new(element(vec![], None)));
        assert!(obj.matches(ObjectKind::ConfigurationElement));
        assert!(obj.matches(ObjectKind::ThirdLevelConfigurationElement));
        assert!(!obj.matches(ObjectKind::Extension));
    }
}
