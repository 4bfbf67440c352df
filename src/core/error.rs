use crate::core::model::{ObjectId, ObjectKind};
use thiserror::Error;

/// Registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Handle to an object that was purged after its module went away
    #[error("Stale handle: {kind:?} object {id} no longer exists (its module may have been uninstalled)")]
    StaleHandle { id: ObjectId, kind: ObjectKind },

    /// Cache exists but was written for another environment or version
    #[error("Registry cache rejected: {0}")]
    CacheInvalid(String),

    /// Cache file content does not decode
    #[error("Corrupt registry cache: {0}")]
    CorruptCache(String),

    /// Unknown object kind tag in a cache record
    #[error("Invalid object kind tag: {0}")]
    InvalidObjectKind(u8),

    /// String too long for the cache string encoding
    #[error("String of {0} bytes exceeds the cache string limit of 65535 bytes")]
    StringTooLong(usize),

    /// Configuration value out of range or unparsable
    #[error("Invalid registry configuration: {0}")]
    Config(String),

    /// Contribution declaration file does not deserialize
    #[error("Invalid contribution declaration {path}: {message}")]
    Declaration { path: String, message: String },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RegistryError {
    /// True for failures that only mean the on-disk cache cannot be used.
    ///
    /// These are recovered by rebuilding from module manifests (on open) or by
    /// skipping the write (on stop); they never reach query callers.
    pub fn is_cache_failure(&self) -> bool {
        matches!(
            self,
            RegistryError::CacheInvalid(_)
                | RegistryError::CorruptCache(_)
                | RegistryError::StringTooLong(_)
                | RegistryError::InvalidObjectKind(_)
                | RegistryError::Io(_)
        )
    }
}

/// Registry result type
pub type Result<T> = std::result::Result<T, RegistryError>;
