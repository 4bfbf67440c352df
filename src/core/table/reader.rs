//! Cache reader
//!
//! The main and extra streams are memory-mapped and decoded record by record
//! on demand. The small contribution and orphan files are read whole at open,
//! so every stream stays on the generation that was validated even after a
//! newer cache is published over it.

use super::{
    header::TableHeader, read_count, read_id, read_ids, read_raw, read_str, read_str_opt,
    truncated, CONTRIBUTIONS, EXTRA, MAIN, ORPHANS, TABLE,
};
use crate::core::config::CacheEnvironment;
use crate::core::error::{RegistryError, Result};
use crate::core::files::FileManager;
use crate::core::model::{
    ConfigurationElement, Contribution, Extension, ExtensionExtra, ExtensionPoint,
    ExtensionPointExtra, Extra, ObjectId, ObjectKind, RegistryObject,
};
use ahash::AHashMap;
use byteorder::{BigEndian, ReadBytesExt};
use memmap2::Mmap;
use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Index section of the `.table` file
#[derive(Debug, Clone, Default)]
pub struct TableIndex {
    pub next_id: u32,
    /// Object id -> offset in the main stream (extra stream for elements of depth >= 3)
    pub offsets: AHashMap<ObjectId, u32>,
    /// Extension point unique identifier -> object id, in file order
    pub extension_points: Vec<(String, ObjectId)>,
}

/// Which stream a configuration element record was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Main,
    Extra,
}

/// Read access to a validated cache file set
pub struct TableReader {
    header: TableHeader,
    main: Mmap,
    extra: Mmap,
    contributions: Vec<u8>,
    orphans: Vec<u8>,
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableReader")
            .field("header", &self.header)
            .field("main_len", &self.main.len())
            .field("extra_len", &self.extra.len())
            .finish()
    }
}

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: cache files are only ever replaced by rename, never written in place
    let map = unsafe { Mmap::map(&file)? };
    Ok(map)
}

fn require(files: &dyn FileManager, name: &str) -> Result<PathBuf> {
    files
        .lookup(name)?
        .ok_or_else(|| RegistryError::CacheInvalid(format!("missing cache file {}", name)))
}

impl TableReader {
    /// Open and validate the cache
    ///
    /// Returns `Ok(None)` when there is no cache at all (cold start) and
    /// `CacheInvalid` when a cache exists but must not be used.
    pub fn open(
        files: &dyn FileManager,
        env: &CacheEnvironment,
        expected_registry_stamp: i64,
    ) -> Result<Option<(TableReader, TableIndex)>> {
        let Some(table_path) = files.lookup(TABLE)? else {
            return Ok(None);
        };

        let table = std::fs::read(&table_path)?;
        let mut cursor = Cursor::new(table.as_slice());
        let header = TableHeader::read_from(&mut cursor)?;
        header.validate(env, expected_registry_stamp)?;
        let index = Self::read_index(&mut cursor)?;

        let reader = TableReader {
            header,
            main: map_file(&require(files, MAIN)?)?,
            extra: map_file(&require(files, EXTRA)?)?,
            contributions: std::fs::read(require(files, CONTRIBUTIONS)?)?,
            orphans: std::fs::read(require(files, ORPHANS)?)?,
        };

        debug!(
            "Opened registry cache: {} objects, {} extension points, next id {}",
            index.offsets.len(),
            index.extension_points.len(),
            index.next_id
        );
        Ok(Some((reader, index)))
    }

    fn read_index(cursor: &mut Cursor<&[u8]>) -> Result<TableIndex> {
        let next_id = cursor.read_i32::<BigEndian>().map_err(truncated)? as u32;

        let count = read_count(cursor)?;
        let mut offsets = AHashMap::with_capacity(count);
        for _ in 0..count {
            let id = read_id(cursor)?;
            let offset = cursor.read_i32::<BigEndian>().map_err(truncated)? as u32;
            offsets.insert(id, offset);
        }

        let count = read_count(cursor)?;
        let mut extension_points = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_str(cursor)?;
            extension_points.push((name, read_id(cursor)?));
        }

        Ok(TableIndex {
            next_id,
            offsets,
            extension_points,
        })
    }

    pub fn header(&self) -> &TableHeader {
        &self.header
    }

    fn cursor<'a>(&self, data: &'a [u8], offset: u32) -> Result<Cursor<&'a [u8]>> {
        if offset as usize > data.len() {
            return Err(RegistryError::CorruptCache(format!(
                "offset {} beyond stream of {} bytes",
                offset,
                data.len()
            )));
        }
        let mut cursor = Cursor::new(data);
        cursor.set_position(offset as u64);
        Ok(cursor)
    }

    fn read_point_record(cursor: &mut Cursor<&[u8]>) -> Result<ExtensionPoint> {
        let id = read_id(cursor)?;
        let children = read_ids(cursor)?;
        let extra = cursor.read_i32::<BigEndian>().map_err(truncated)? as u32;
        Ok(ExtensionPoint::new(id, children, Extra::Cached(extra)))
    }

    fn read_extension_record(cursor: &mut Cursor<&[u8]>) -> Result<Extension> {
        let id = read_id(cursor)?;
        let simple_id = read_str_opt(cursor)?;
        let namespace = read_str_opt(cursor)?;
        let children = read_ids(cursor)?;
        let extra = cursor.read_i32::<BigEndian>().map_err(truncated)? as u32;
        Ok(Extension::new(
            id,
            simple_id,
            namespace,
            children,
            Extra::Cached(extra),
        ))
    }

    fn read_element_record(cursor: &mut Cursor<&[u8]>, stream: Stream) -> Result<ConfigurationElement> {
        let id = read_id(cursor)?;
        let contributor = cursor.read_i64::<BigEndian>().map_err(truncated)? as u64;
        let name = read_str_opt(cursor)?.unwrap_or_default();
        let parent_id = read_id(cursor)?;
        let parent_kind = ObjectKind::from_u8(cursor.read_u8().map_err(truncated)?)?;
        let misc = cursor.read_i32::<BigEndian>().map_err(truncated)?.max(0) as u32;

        let count = read_count(cursor)?;
        let mut flat = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            flat.push(read_str_opt(cursor)?.unwrap_or_default());
        }
        let (attributes, value) = ConfigurationElement::split_properties(flat);
        let children = read_ids(cursor)?;

        // Main stream holds depth 1 (parent: extension) and depth 2 (parent: element)
        let children_kind = match (stream, parent_kind) {
            (Stream::Main, ObjectKind::Extension) => ObjectKind::ConfigurationElement,
            _ => ObjectKind::ThirdLevelConfigurationElement,
        };

        Ok(ConfigurationElement::new(
            id,
            contributor,
            name,
            attributes,
            value,
            (parent_id, parent_kind),
            children,
            children_kind,
            misc,
        ))
    }

    /// Read an element of the extra stream followed by its whole subtree
    fn read_extra_subtree(cursor: &mut Cursor<&[u8]>, out: &mut Vec<ConfigurationElement>) -> Result<()> {
        let element = Self::read_element_record(cursor, Stream::Extra)?;
        let child_count = element.children().len();
        out.push(element);
        for _ in 0..child_count {
            Self::read_extra_subtree(cursor, out)?;
        }
        Ok(())
    }

    /// Read a depth 1 element tree of the main stream
    ///
    /// With `deep`, the depth >= 3 descendants are read from the extra stream too.
    fn read_main_tree(
        &self,
        cursor: &mut Cursor<&[u8]>,
        deep: bool,
        out: &mut Vec<ConfigurationElement>,
    ) -> Result<()> {
        let first = Self::read_element_record(cursor, Stream::Main)?;
        let second_count = first.children().len();
        out.push(first);
        for _ in 0..second_count {
            let second = Self::read_element_record(cursor, Stream::Main)?;
            let third = if deep && !second.children().is_empty() {
                Some(self.load_third_level_children(&second)?)
            } else {
                None
            };
            out.push(second);
            out.extend(third.into_iter().flatten());
        }
        Ok(())
    }

    /// Load a point with its extensions and their elements of depth 1..2
    pub fn load_extension_point_tree(&self, offset: u32) -> Result<Vec<RegistryObject>> {
        let mut cursor = self.cursor(&self.main, offset)?;
        self.read_point_tree(&mut cursor, false)
    }

    fn read_point_tree(&self, cursor: &mut Cursor<&[u8]>, deep: bool) -> Result<Vec<RegistryObject>> {
        let point = Self::read_point_record(cursor)?;
        let child_count = point.children().len();
        let mut objects = Vec::with_capacity(1 + child_count * 4);
        objects.push(RegistryObject::ExtensionPoint(Arc::new(point)));

        for _ in 0..child_count {
            let extension = Self::read_extension_record(cursor)?;
            objects.push(RegistryObject::Extension(Arc::new(extension)));
        }

        let mut elements = Vec::new();
        for _ in 0..child_count {
            let trees = read_count(cursor)?;
            for _ in 0..trees {
                self.read_main_tree(cursor, deep, &mut elements)?;
            }
        }
        objects.extend(
            elements
                .into_iter()
                .map(|ce| RegistryObject::ConfigurationElement(Arc::new(ce))),
        );
        Ok(objects)
    }

    pub fn load_extension(&self, offset: u32) -> Result<Extension> {
        let mut cursor = self.cursor(&self.main, offset)?;
        Self::read_extension_record(&mut cursor)
    }

    /// Load a single element of depth 1 or 2
    pub fn load_configuration_element(&self, offset: u32) -> Result<ConfigurationElement> {
        let mut cursor = self.cursor(&self.main, offset)?;
        Self::read_element_record(&mut cursor, Stream::Main)
    }

    /// Load an element of depth >= 3 and every element below it
    pub fn load_third_level(&self, offset: u32) -> Result<Vec<ConfigurationElement>> {
        let mut cursor = self.cursor(&self.extra, offset)?;
        let mut out = Vec::new();
        Self::read_extra_subtree(&mut cursor, &mut out)?;
        Ok(out)
    }

    /// Load the subtrees below a second level element, starting at its `misc` offset
    pub fn load_third_level_children(&self, parent: &ConfigurationElement) -> Result<Vec<ConfigurationElement>> {
        let mut cursor = self.cursor(&self.extra, parent.misc())?;
        let mut out = Vec::new();
        for _ in 0..parent.children().len() {
            Self::read_extra_subtree(&mut cursor, &mut out)?;
        }
        Ok(out)
    }

    pub fn load_extension_point_extra(&self, offset: u32) -> Result<ExtensionPointExtra> {
        let mut cursor = self.cursor(&self.extra, offset)?;
        let label = read_str_opt(&mut cursor)?;
        let schema = read_str_opt(&mut cursor)?;
        let unique_identifier = read_str_opt(&mut cursor)?.ok_or_else(|| {
            RegistryError::CorruptCache(format!("extension point extra at {} has no identifier", offset))
        })?;
        let namespace = read_str_opt(&mut cursor)?.unwrap_or_default();
        let contributor = cursor.read_i64::<BigEndian>().map_err(truncated)? as u64;
        Ok(ExtensionPointExtra {
            label,
            schema,
            unique_identifier,
            namespace,
            contributor,
        })
    }

    pub fn load_extension_extra(&self, offset: u32) -> Result<ExtensionExtra> {
        let mut cursor = self.cursor(&self.extra, offset)?;
        let label = read_str_opt(&mut cursor)?;
        let extension_point_identifier = read_str_opt(&mut cursor)?.ok_or_else(|| {
            RegistryError::CorruptCache(format!("extension extra at {} has no target point", offset))
        })?;
        Ok(ExtensionExtra {
            label,
            extension_point_identifier,
        })
    }

    pub fn load_contributions(&self) -> Result<Vec<Contribution>> {
        let mut cursor = Cursor::new(self.contributions.as_slice());
        let count = read_count(&mut cursor)?;
        let mut contributions = Vec::with_capacity(count);
        for _ in 0..count {
            let contributor = cursor.read_i64::<BigEndian>().map_err(truncated)? as u64;
            let children = read_raw(&mut cursor)?;
            let contribution = Contribution::from_raw(contributor, children).ok_or_else(|| {
                RegistryError::CorruptCache(format!(
                    "contribution of module {} has an inconsistent layout",
                    contributor
                ))
            })?;
            contributions.push(contribution);
        }
        Ok(contributions)
    }

    pub fn load_orphans(&self) -> Result<Vec<(String, Vec<ObjectId>)>> {
        let mut cursor = Cursor::new(self.orphans.as_slice());
        let count = read_count(&mut cursor)?;
        let mut orphans = Vec::with_capacity(count);
        for _ in 0..count {
            let point = read_str(&mut cursor)?;
            orphans.push((point, read_ids(&mut cursor)?));
        }
        Ok(orphans)
    }

    /// Read every object of the cache
    ///
    /// `point_count` is the number of trees at the head of the main stream
    /// (the size of the name index). Extras are resolved and held inline.
    pub fn read_all(&self, point_count: usize) -> Result<Vec<RegistryObject>> {
        let mut cursor = self.cursor(&self.main, 0)?;
        let mut objects = Vec::new();

        for _ in 0..point_count {
            objects.extend(self.read_point_tree(&mut cursor, true)?);
        }

        // Orphan extensions fill the rest of the stream
        while (cursor.position() as usize) < self.main.len() {
            let extension = Self::read_extension_record(&mut cursor)?;
            let mut elements = Vec::new();
            for _ in 0..extension.children().len() {
                self.read_main_tree(&mut cursor, true, &mut elements)?;
            }
            objects.push(RegistryObject::Extension(Arc::new(extension)));
            objects.extend(
                elements
                    .into_iter()
                    .map(|ce| RegistryObject::ConfigurationElement(Arc::new(ce))),
            );
        }

        objects
            .into_iter()
            .map(|object| self.inline_extra(object))
            .collect()
    }

    fn inline_extra(&self, object: RegistryObject) -> Result<RegistryObject> {
        Ok(match object {
            RegistryObject::ExtensionPoint(point) => match point.extra().offset() {
                Some(offset) => {
                    let extra = self.load_extension_point_extra(offset)?;
                    RegistryObject::ExtensionPoint(Arc::new(ExtensionPoint::new(
                        point.id(),
                        point.children().to_vec(),
                        Extra::inline(extra),
                    )))
                }
                None => RegistryObject::ExtensionPoint(point),
            },
            RegistryObject::Extension(ext) => match ext.extra().offset() {
                Some(offset) => {
                    let extra = self.load_extension_extra(offset)?;
                    RegistryObject::Extension(Arc::new(Extension::new(
                        ext.id(),
                        ext.simple_identifier().map(str::to_string),
                        ext.namespace().map(str::to_string),
                        ext.children().to_vec(),
                        Extra::inline(extra),
                    )))
                }
                None => RegistryObject::Extension(ext),
            },
            other => other,
        })
    }
}
