//! Registry object model
//!
//! Every persisted entity is addressed by an [`ObjectId`] and tagged with an
//! [`ObjectKind`]. Objects never reference each other directly: children and
//! parents are ids, resolved through the object store on demand.

pub mod contribution;
pub mod decl;
pub mod objects;

pub use contribution::Contribution;
pub use decl::{ContributionDecl, ElementDecl, ExtensionDecl, ExtensionPointDecl, ModuleDescriptor};
pub use objects::{
    ConfigurationElement, Extension, ExtensionExtra, ExtensionPoint, ExtensionPointExtra, Extra,
    RegistryObject,
};

use crate::core::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a module (bundle) as supplied by the module lifecycle system
pub type BundleId = u64;

/// Process-unique identifier of a registry object
///
/// Ids are assigned monotonically by the object store and are never reused
/// while the process runs. On disk they are stored as 32-bit integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl ObjectId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(value: u32) -> Self {
        ObjectId(value)
    }
}

/// Kind tag used when resolving an id through the store
///
/// The numeric values are part of the cache format (the `parentKind` byte of
/// configuration element records).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// First or second level configuration element (stored in the main stream)
    ConfigurationElement = 1,
    Extension = 2,
    ExtensionPoint = 3,
    /// Configuration element nested three or more levels deep (stored in the extra stream)
    ThirdLevelConfigurationElement = 4,
}

impl ObjectKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ObjectKind::ConfigurationElement),
            2 => Ok(ObjectKind::Extension),
            3 => Ok(ObjectKind::ExtensionPoint),
            4 => Ok(ObjectKind::ThirdLevelConfigurationElement),
            _ => Err(RegistryError::InvalidObjectKind(value)),
        }
    }

    pub fn is_configuration_element(self) -> bool {
        matches!(
            self,
            ObjectKind::ConfigurationElement | ObjectKind::ThirdLevelConfigurationElement
        )
    }

    /// Kind of an element found at `depth`
    ///
    /// Depth 1 is an element directly under an extension. Elements below
    /// the second level live in the extra stream.
    pub fn element_kind_at(depth: usize) -> Self {
        if depth > 2 {
            ObjectKind::ThirdLevelConfigurationElement
        } else {
            ObjectKind::ConfigurationElement
        }
    }
}

/// Split a fully qualified identifier at its last dot
///
/// Returns `(namespace, simple_id)` or `None` when the identifier has no dot.
pub fn split_identifier(unique_id: &str) -> Option<(&str, &str)> {
    unique_id
        .rfind('.')
        .map(|dot| (&unique_id[..dot], &unique_id[dot + 1..]))
}
