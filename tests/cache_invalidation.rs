//! Rejected caches are rebuilt from the installed modules

use extension_registry::{
    CacheEnvironment, ContributionDecl, DirectoryFileManager, ExtensionDecl, ExtensionPointDecl,
    ExtensionRegistry, FileManager, ManifestStamp, ModuleDescriptor, RegistryConfig,
    StaticModuleSource,
};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

fn modules() -> Vec<ContributionDecl> {
    vec![
        ContributionDecl::new(ModuleDescriptor::new(1, "org.base"))
            .extension_point(ExtensionPointDecl::new("point")),
        ContributionDecl::new(ModuleDescriptor::new(2, "org.user"))
            .extension(ExtensionDecl::new("org.base.point").id("ext")),
    ]
}

fn open_with(
    dir: &TempDir,
    config: RegistryConfig,
    env: CacheEnvironment,
    source: StaticModuleSource,
) -> ExtensionRegistry {
    let files: Arc<dyn FileManager> = Arc::new(DirectoryFileManager::new(dir.path()));
    ExtensionRegistry::open(config, env, Some(files), Arc::new(source)).unwrap()
}

fn write_cache(dir: &TempDir) {
    open_with(
        dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        StaticModuleSource::new(modules()),
    )
    .stop();
}

/// A module set that differs from the cached one, so a rebuild is visible
fn replacement() -> StaticModuleSource {
    StaticModuleSource::new(vec![ContributionDecl::new(ModuleDescriptor::new(7, "org.other"))
        .extension_point(ExtensionPointDecl::new("fresh"))])
}

fn assert_rebuilt(registry: &ExtensionRegistry) {
    assert!(!registry.is_from_cache());
    assert!(registry.extension_point("org.base.point").is_none());
    assert!(registry.extension_point("org.other.fresh").is_some());
}

#[test]
fn test_locale_change_rebuilds() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default().with_locale("fr_FR"),
        replacement(),
    );
    assert_rebuilt(&registry);
}

#[test]
fn test_install_stamp_change_rebuilds() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);

    let env = CacheEnvironment {
        install_stamp: 42,
        ..CacheEnvironment::default()
    };
    let registry = open_with(&dir, RegistryConfig::default(), env, replacement());
    assert_rebuilt(&registry);
}

#[test]
fn test_same_environment_uses_cache() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        replacement(),
    );
    assert!(registry.is_from_cache());
    assert!(registry.extension("org.user.ext").unwrap().is_some());
    assert!(registry.extension_point("org.other.fresh").is_none());
}

#[test]
fn test_registry_stamp_checked_only_when_configured() {
    let dir = TempDir::new().unwrap();
    let checked = RegistryConfig {
        check_config: true,
        ..RegistryConfig::default()
    };
    let manifests = |millis: u64| {
        vec![ManifestStamp {
            module: 1,
            modified: UNIX_EPOCH + Duration::from_millis(millis),
        }]
    };

    open_with(
        &dir,
        checked.clone(),
        CacheEnvironment::default(),
        StaticModuleSource::new(modules()).with_manifests(manifests(1_000)),
    )
    .stop();

    // Same manifests: cache accepted
    let same = open_with(
        &dir,
        checked.clone(),
        CacheEnvironment::default(),
        replacement().with_manifests(manifests(1_000)),
    );
    assert!(same.is_from_cache());
    drop(same);

    // Stamp ignored without check_config
    let unchecked = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        replacement().with_manifests(manifests(9_000)),
    );
    assert!(unchecked.is_from_cache());
    drop(unchecked);

    // A touched manifest invalidates the cache
    let touched = open_with(
        &dir,
        checked,
        CacheEnvironment::default(),
        replacement().with_manifests(manifests(9_000)),
    );
    assert_rebuilt(&touched);
}

#[test]
fn test_missing_file_rebuilds() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);
    std::fs::remove_file(dir.path().join(".orphans")).unwrap();

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        replacement(),
    );
    assert_rebuilt(&registry);
}

#[test]
fn test_truncated_table_rebuilds() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);
    let table = dir.path().join(".table");
    let bytes = std::fs::read(&table).unwrap();
    std::fs::write(&table, &bytes[..bytes.len() / 2]).unwrap();

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        replacement(),
    );
    assert_rebuilt(&registry);
}

#[test]
fn test_version_mismatch_rebuilds() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);
    let table = dir.path().join(".table");
    let mut bytes = std::fs::read(&table).unwrap();
    bytes[3] = bytes[3].wrapping_add(1);
    std::fs::write(&table, &bytes).unwrap();

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        CacheEnvironment::default(),
        replacement(),
    );
    assert_rebuilt(&registry);
}

#[test]
fn test_rebuilt_cache_replaces_rejected_one() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);

    let german = CacheEnvironment::default().with_locale("de_DE");
    open_with(&dir, RegistryConfig::default(), german.clone(), replacement()).stop();

    let registry = open_with(
        &dir,
        RegistryConfig::default(),
        german,
        StaticModuleSource::default(),
    );
    assert!(registry.is_from_cache());
    assert!(registry.extension_point("org.other.fresh").is_some());
}

#[test]
fn test_disabled_cache_is_neither_read_nor_written() {
    let dir = TempDir::new().unwrap();
    write_cache(&dir);
    let written = std::fs::read(dir.path().join(".table")).unwrap();

    let config = RegistryConfig {
        cache_enabled: false,
        ..RegistryConfig::default()
    };
    let registry = open_with(&dir, config, CacheEnvironment::default(), replacement());
    assert_rebuilt(&registry);
    registry.stop();
    assert_eq!(std::fs::read(dir.path().join(".table")).unwrap(), written);
}

#[test]
fn test_read_only_location_is_not_written() {
    let dir = TempDir::new().unwrap();
    let files: Arc<dyn FileManager> = Arc::new(DirectoryFileManager::read_only(dir.path()));
    let registry = ExtensionRegistry::open(
        RegistryConfig::default(),
        CacheEnvironment::default(),
        Some(files),
        Arc::new(StaticModuleSource::new(modules())),
    )
    .unwrap();
    registry.stop();
    assert!(!dir.path().join(".table").exists());
}
