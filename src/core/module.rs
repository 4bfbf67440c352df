//! Module lifecycle boundary
//!
//! The registry does not know how modules are installed. A [`ModuleSource`]
//! lists the contributions of every installed module, used to rebuild the
//! registry when no valid cache exists, and lifecycle changes arrive later
//! as [`ModuleEvent`]s.

use crate::core::error::{RegistryError, Result};
use crate::core::model::{BundleId, ContributionDecl};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Supplier of installed module contributions
pub trait ModuleSource: Send + Sync {
    /// Contributions of every installed module
    fn installed(&self) -> Vec<ContributionDecl>;

    /// Stamp of the installed manifests, compared against the cache header
    /// when configuration checking is enabled
    fn registry_stamp(&self) -> i64 {
        0
    }
}

/// Lifecycle change of one module
#[derive(Debug, Clone)]
pub enum ModuleEvent {
    Resolved(ContributionDecl),
    Unresolved(BundleId),
    Uninstalled(BundleId),
}

/// Manifest of one installed module, as seen by the stamp computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestStamp {
    pub module: BundleId,
    pub modified: SystemTime,
}

/// Combine manifest modification times into a registry stamp
///
/// Each manifest contributes its modification time in milliseconds plus its
/// module id; contributions are xor-ed so the order does not matter.
pub fn compute_registry_stamp<I>(manifests: I) -> i64
where
    I: IntoIterator<Item = ManifestStamp>,
{
    manifests.into_iter().fold(0i64, |stamp, manifest| {
        let millis = manifest
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        stamp ^ millis.wrapping_add(manifest.module as i64)
    })
}

/// Fixed list of contributions
#[derive(Debug, Clone, Default)]
pub struct StaticModuleSource {
    modules: Vec<ContributionDecl>,
    manifests: Vec<ManifestStamp>,
}

impl StaticModuleSource {
    pub fn new(modules: Vec<ContributionDecl>) -> Self {
        StaticModuleSource {
            modules,
            manifests: Vec::new(),
        }
    }

    pub fn with_manifests(mut self, manifests: Vec<ManifestStamp>) -> Self {
        self.manifests = manifests;
        self
    }

    pub fn push(&mut self, module: ContributionDecl) {
        self.modules.push(module);
    }

    /// Load one contribution per `*.json` file of `dir`, in file name order
    ///
    /// The modification time of each file becomes the manifest stamp of its
    /// module.
    pub fn from_json_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir.as_ref())? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut source = StaticModuleSource::default();
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let decl: ContributionDecl =
                serde_json::from_str(&content).map_err(|e| RegistryError::Declaration {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            let modified = std::fs::metadata(&path)?.modified()?;
            debug!("Loaded declaration of module {} from {:?}", decl.module.id, path);
            source.manifests.push(ManifestStamp {
                module: decl.module.id,
                modified,
            });
            source.modules.push(decl);
        }
        Ok(source)
    }
}

impl ModuleSource for StaticModuleSource {
    fn installed(&self) -> Vec<ContributionDecl> {
        self.modules.clone()
    }

    fn registry_stamp(&self) -> i64 {
        compute_registry_stamp(self.manifests.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::ModuleDescriptor;
    use std::time::Duration;

    fn manifest(module: BundleId, millis: u64) -> ManifestStamp {
        ManifestStamp {
            module,
            modified: UNIX_EPOCH + Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_stamp_is_order_independent() {
        let a = compute_registry_stamp(vec![manifest(1, 1000), manifest(2, 5000)]);
        let b = compute_registry_stamp(vec![manifest(2, 5000), manifest(1, 1000)]);
        assert_eq!(a, b);
        assert_eq!(a, 1001 ^ 5002);
    }

    #[test]
    fn test_stamp_changes_with_mtime() {
        let before = compute_registry_stamp(vec![manifest(1, 1000)]);
        let after = compute_registry_stamp(vec![manifest(1, 2000)]);
        assert_ne!(before, after);
        assert_eq!(compute_registry_stamp(Vec::new()), 0);
    }

    #[test]
    fn test_static_source() {
        let mut source = StaticModuleSource::default();
        source.push(ContributionDecl::new(ModuleDescriptor::new(7, "org.a")));
        assert_eq!(source.installed().len(), 1);
        assert_eq!(source.registry_stamp(), 0);

        let source = source.with_manifests(vec![manifest(7, 10)]);
        assert_eq!(source.registry_stamp(), 17);
    }

    #[test]
    fn test_json_dir_source() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{ "module": { "id": 2, "symbolic_name": "org.b" } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{ "module": { "id": 1, "symbolic_name": "org.a" } }"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let source = StaticModuleSource::from_json_dir(dir.path()).unwrap();
        let ids: Vec<_> = source.installed().iter().map(|d| d.module.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_ne!(source.registry_stamp(), 0);
    }

    #[test]
    fn test_json_dir_reports_bad_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        let err = StaticModuleSource::from_json_dir(dir.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Declaration { .. }));
        assert!(!err.is_cache_failure());
    }
}
