//! Cache writer
//!
//! Walks the object store in the order the reader expects and publishes the
//! five files through the file manager. Objects are written in this order:
//! every indexed extension point tree, then every orphan extension.

use super::{
    header::TableHeader, write_ids, write_raw, write_str, write_str_opt, CONTRIBUTIONS, EXTRA,
    MAIN, ORPHANS, TABLE,
};
use crate::core::config::CacheEnvironment;
use crate::core::error::Result;
use crate::core::files::FileManager;
use crate::core::model::{Extension, ObjectId, ObjectKind};
use crate::core::store::ObjectStore;
use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub struct TableWriter<'a> {
    store: &'a ObjectStore,
    main: Vec<u8>,
    extra: Vec<u8>,
    offsets: Vec<(ObjectId, u32)>,
}

impl<'a> TableWriter<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        TableWriter {
            store,
            main: Vec::new(),
            extra: Vec::new(),
            offsets: Vec::new(),
        }
    }

    /// Encode the whole store and publish it
    pub fn write(
        mut self,
        files: &dyn FileManager,
        env: &CacheEnvironment,
        registry_stamp: i64,
    ) -> Result<()> {
        let mut points = self.store.extension_point_index();
        points.sort();

        for (_, id) in &points {
            self.save_point_tree(*id)?;
        }

        let orphans = self.store.orphans()?;
        for (_, extensions) in &orphans {
            for id in extensions {
                let extension = self.store.extension(*id)?;
                self.save_extension(&extension)?;
                for child in extension.children() {
                    self.save_element(*child, ObjectKind::ConfigurationElement, 1)?;
                }
            }
        }

        let mut contributions = Vec::new();
        let all = self.store.contributions()?;
        contributions.write_i32::<BigEndian>(all.len() as i32)?;
        for contribution in &all {
            contributions.write_i64::<BigEndian>(contribution.contributor() as i64)?;
            write_raw(&mut contributions, contribution.raw_children())?;
        }

        let mut orphan_data = Vec::new();
        orphan_data.write_i32::<BigEndian>(orphans.len() as i32)?;
        for (point, extensions) in &orphans {
            write_str(&mut orphan_data, point)?;
            write_ids(&mut orphan_data, extensions)?;
        }

        let mut table = Vec::new();
        TableHeader::new(env, registry_stamp).write_to(&mut table)?;
        table.write_i32::<BigEndian>(self.store.next_id() as i32)?;
        table.write_i32::<BigEndian>(self.offsets.len() as i32)?;
        for (id, offset) in &self.offsets {
            table.write_i32::<BigEndian>(id.get() as i32)?;
            table.write_i32::<BigEndian>(*offset as i32)?;
        }
        table.write_i32::<BigEndian>(points.len() as i32)?;
        for (name, id) in &points {
            write_str(&mut table, name)?;
            table.write_i32::<BigEndian>(id.get() as i32)?;
        }

        let written = vec![
            (TABLE, Self::spill(files, TABLE, &table)?),
            (MAIN, Self::spill(files, MAIN, &self.main)?),
            (EXTRA, Self::spill(files, EXTRA, &self.extra)?),
            (CONTRIBUTIONS, Self::spill(files, CONTRIBUTIONS, &contributions)?),
            (ORPHANS, Self::spill(files, ORPHANS, &orphan_data)?),
        ];
        files.publish(written)?;

        info!(
            "Wrote registry cache: {} objects, {} extension points, {} contributions",
            self.offsets.len(),
            points.len(),
            all.len()
        );
        Ok(())
    }

    fn spill(files: &dyn FileManager, name: &str, data: &[u8]) -> Result<NamedTempFile> {
        let mut temp = files.create_temp(name)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        debug!("Encoded {} ({} bytes)", name, data.len());
        Ok(temp)
    }

    fn save_point_tree(&mut self, id: ObjectId) -> Result<()> {
        let point = self.store.extension_point(id)?;
        let extra = self.store.extension_point_extra(&point)?;
        let children = point.children();

        self.offsets.push((id, self.main.len() as u32));
        self.main.write_i32::<BigEndian>(id.get() as i32)?;
        write_ids(&mut self.main, &children)?;
        self.main.write_i32::<BigEndian>(self.extra.len() as i32)?;

        write_str_opt(&mut self.extra, extra.label.as_deref())?;
        write_str_opt(&mut self.extra, extra.schema.as_deref())?;
        write_str_opt(&mut self.extra, Some(&extra.unique_identifier))?;
        write_str_opt(&mut self.extra, Some(&extra.namespace))?;
        self.extra.write_i64::<BigEndian>(extra.contributor as i64)?;

        let mut extensions = Vec::with_capacity(children.len());
        for child in children.iter() {
            let extension = self.store.extension(*child)?;
            self.save_extension(&extension)?;
            extensions.push(extension);
        }

        for extension in &extensions {
            self.main
                .write_i32::<BigEndian>(extension.children().len() as i32)?;
            for child in extension.children() {
                self.save_element(*child, ObjectKind::ConfigurationElement, 1)?;
            }
        }
        Ok(())
    }

    fn save_extension(&mut self, extension: &Extension) -> Result<()> {
        let extra = self.store.extension_extra(extension)?;

        self.offsets.push((extension.id(), self.main.len() as u32));
        self.main.write_i32::<BigEndian>(extension.id().get() as i32)?;
        write_str_opt(&mut self.main, extension.simple_identifier())?;
        write_str_opt(&mut self.main, extension.namespace())?;
        write_ids(&mut self.main, extension.children())?;
        self.main.write_i32::<BigEndian>(self.extra.len() as i32)?;

        write_str_opt(&mut self.extra, extra.label.as_deref())?;
        write_str_opt(&mut self.extra, Some(&extra.extension_point_identifier))?;
        Ok(())
    }

    fn save_element(&mut self, id: ObjectId, kind: ObjectKind, depth: usize) -> Result<()> {
        let element = self.store.configuration_element(id, kind)?;
        let misc = if depth == 2 { self.extra.len() as i32 } else { 0 };
        let out = if depth > 2 { &mut self.extra } else { &mut self.main };

        self.offsets.push((id, out.len() as u32));
        out.write_i32::<BigEndian>(id.get() as i32)?;
        out.write_i64::<BigEndian>(element.contributor() as i64)?;
        write_str_opt(out, Some(element.name()))?;
        out.write_i32::<BigEndian>(element.parent_id().get() as i32)?;
        out.write_u8(element.parent_kind() as u8)?;
        out.write_i32::<BigEndian>(misc)?;
        let properties = element.properties_and_value();
        out.write_i32::<BigEndian>(properties.len() as i32)?;
        for property in properties {
            write_str_opt(out, Some(property))?;
        }
        write_ids(out, element.children())?;

        let child_kind = ObjectKind::element_kind_at(depth + 1);
        for child in element.children() {
            self.save_element(*child, child_kind, depth + 1)?;
        }
        Ok(())
    }
}
