use super::{BundleId, ObjectId};
use std::sync::OnceLock;

const EXTENSION_POINT_COUNT: usize = 0;
const EXTENSION_COUNT: usize = 1;
const HEADER_LEN: usize = 2;

/// Everything one module added to the registry
///
/// Children use a run-length layout that is also the persisted layout:
/// `[#points, #extensions, point ids..., extension ids...]`.
#[derive(Debug)]
pub struct Contribution {
    contributor: BundleId,
    children: Vec<u32>,
    namespace: OnceLock<String>,
}

impl Contribution {
    pub fn new(contributor: BundleId, points: &[ObjectId], extensions: &[ObjectId]) -> Self {
        let mut children = Vec::with_capacity(HEADER_LEN + points.len() + extensions.len());
        children.push(points.len() as u32);
        children.push(extensions.len() as u32);
        children.extend(points.iter().map(|id| id.get()));
        children.extend(extensions.iter().map(|id| id.get()));
        Contribution {
            contributor,
            children,
            namespace: OnceLock::new(),
        }
    }

    /// Rebuild from the persisted run-length array
    ///
    /// Returns `None` when the counts do not match the array length.
    pub fn from_raw(contributor: BundleId, children: Vec<u32>) -> Option<Self> {
        if children.len() < HEADER_LEN {
            return None;
        }
        let expected = HEADER_LEN
            + children[EXTENSION_POINT_COUNT] as usize
            + children[EXTENSION_COUNT] as usize;
        if expected != children.len() {
            return None;
        }
        Some(Contribution {
            contributor,
            children,
            namespace: OnceLock::new(),
        })
    }

    pub fn with_namespace(self, namespace: impl Into<String>) -> Self {
        let _ = self.namespace.set(namespace.into());
        self
    }

    pub fn contributor(&self) -> BundleId {
        self.contributor
    }

    pub fn raw_children(&self) -> &[u32] {
        &self.children
    }

    pub fn extension_points(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let count = self.children[EXTENSION_POINT_COUNT] as usize;
        self.children[HEADER_LEN..HEADER_LEN + count]
            .iter()
            .map(|id| ObjectId(*id))
    }

    pub fn extensions(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let start = HEADER_LEN + self.children[EXTENSION_POINT_COUNT] as usize;
        self.children[start..].iter().map(|id| ObjectId(*id))
    }

    /// First child in run-length order, used to recover the namespace of
    /// contributions loaded from the cache
    pub fn first_child(&self) -> Option<(ObjectId, bool)> {
        if self.children[EXTENSION_POINT_COUNT] > 0 {
            Some((ObjectId(self.children[HEADER_LEN]), true))
        } else if self.children[EXTENSION_COUNT] > 0 {
            Some((ObjectId(self.children[HEADER_LEN]), false))
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.len() == HEADER_LEN
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.get().map(String::as_str)
    }

    /// Namespace, computing and memoising it on first use
    pub fn namespace_or_init(&self, init: impl FnOnce() -> Option<String>) -> Option<&str> {
        if let Some(ns) = self.namespace.get() {
            return Some(ns);
        }
        let computed = init()?;
        Some(self.namespace.get_or_init(|| computed))
    }
}
