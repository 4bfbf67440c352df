//! # Extension Registry
//!
//! `extension-registry` is the catalog of a modular runtime: modules declare
//! extension points (named slots with a schema) and extensions (structured
//! configuration plugging into a point, possibly of another module). The
//! registry links the two by name, keeps extensions whose point is missing
//! as orphans until it appears, and notifies listeners when modules come and go.
//!
//! - **Lazy binary cache**: the resolved graph persists in five coupled files
//!   and is loaded object by object on the next start
//! - **Handles**: queries return lightweight handles that resolve through the
//!   store on every access and report stale ids explicitly
//! - **Ordered notification**: each write batch becomes one change event,
//!   delivered on a dedicated thread in scheduling order
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use extension_registry::{
//!     ContributionDecl, ElementDecl, ExtensionDecl, ExtensionPointDecl, ModuleDescriptor,
//!     RegistryBuilder, Result,
//! };
//!
//! # fn main() -> Result<()> {
//! let registry = RegistryBuilder::new().cache_dir("/tmp/registry-cache").build()?;
//!
//! registry.add(
//!     &ContributionDecl::new(ModuleDescriptor::new(1, "org.example.ui"))
//!         .extension_point(ExtensionPointDecl::new("views")),
//! )?;
//! registry.add(
//!     &ContributionDecl::new(ModuleDescriptor::new(2, "org.example.editor")).extension(
//!         ExtensionDecl::new("org.example.ui.views")
//!             .id("outline")
//!             .element(ElementDecl::new("view").attr("class", "OutlineView")),
//!     ),
//! )?;
//!
//! for element in registry.configuration_elements_for("org.example.ui.views")? {
//!     println!("{:?}", element.attribute("class")?);
//! }
//!
//! // Writes the cache for the next start
//! registry.stop();
//! # Ok(())
//! # }
//! ```

pub mod core;

pub use crate::core::{
    config::{CacheEnvironment, RegistryConfig},
    error::{RegistryError, Result},
    files::{DirectoryFileManager, FileManager},
    handle::{ConfigurationElementHandle, ElementParent, ExtensionHandle, ExtensionPointHandle},
    model::{
        BundleId, ContributionDecl, ElementDecl, ExtensionDecl, ExtensionPointDecl,
        ModuleDescriptor, ObjectId, ObjectKind,
    },
    module::{compute_registry_stamp, ManifestStamp, ModuleEvent, ModuleSource, StaticModuleSource},
    notify::{
        DeltaKind, DispatchReport, ExtensionDelta, ListenerFailure, RegistryChangeEvent,
        RegistryChangeListener,
    },
    registry::ExtensionRegistry,
    store::StoreStats,
};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Builder for [`ExtensionRegistry`]
///
/// # Examples
///
/// ```rust,no_run
/// use extension_registry::{CacheEnvironment, RegistryBuilder, RegistryConfig, StaticModuleSource};
///
/// # fn main() -> extension_registry::Result<()> {
/// let registry = RegistryBuilder::new()
///     .config(RegistryConfig::from_toml_file("registry.toml")?)
///     .environment(CacheEnvironment::default().with_locale("de_DE"))
///     .cache_dir("/var/cache/my-app/registry")
///     .module_source(StaticModuleSource::new(Vec::new()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RegistryBuilder {
    config: RegistryConfig,
    environment: CacheEnvironment,
    files: Option<Arc<dyn FileManager>>,
    cache_dir: Option<PathBuf>,
    modules: Option<Arc<dyn ModuleSource>>,
}

impl RegistryBuilder {
    /// Create a builder with default settings and no cache location
    pub fn new() -> Self {
        RegistryBuilder {
            config: RegistryConfig::default(),
            environment: CacheEnvironment::default(),
            files: None,
            cache_dir: None,
            modules: None,
        }
    }

    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Platform values the cache must match
    pub fn environment(mut self, environment: CacheEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Keep the cache files in a directory
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Use a custom file manager; takes precedence over `cache_dir`
    pub fn file_manager(mut self, files: Arc<dyn FileManager>) -> Self {
        self.files = Some(files);
        self
    }

    /// Source of installed modules, consulted when the cache cannot be used
    pub fn module_source<S: ModuleSource + 'static>(mut self, modules: S) -> Self {
        self.modules = Some(Arc::new(modules));
        self
    }

    /// Open the registry
    pub fn build(self) -> Result<ExtensionRegistry> {
        let files = match (self.files, self.cache_dir) {
            (Some(files), _) => Some(files),
            (None, Some(dir)) => {
                std::fs::create_dir_all(&dir)?;
                info!("Registry cache directory: {}", dir.display());
                Some(Arc::new(DirectoryFileManager::new(dir)) as Arc<dyn FileManager>)
            }
            (None, None) => None,
        };
        let modules = self
            .modules
            .unwrap_or_else(|| Arc::new(StaticModuleSource::default()));

        ExtensionRegistry::open(self.config, self.environment, files, modules)
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
