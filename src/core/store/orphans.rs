use crate::core::error::Result;
use crate::core::model::ObjectId;
use std::collections::BTreeMap;

type OrphanMap = BTreeMap<String, Vec<ObjectId>>;

/// Extensions waiting for their extension point, keyed by the point's
/// unique identifier
///
/// Loaded from `.orphans` on first use. Until the first mutation the index
/// is reclaimable; afterwards it is pinned so the change is not lost.
#[derive(Debug, Default)]
pub struct OrphanIndex {
    entries: Option<OrphanMap>,
    dirty: bool,
}

impl OrphanIndex {
    /// Empty index that never loads from disk
    pub fn fresh() -> Self {
        OrphanIndex {
            entries: Some(OrphanMap::new()),
            dirty: true,
        }
    }

    fn ensure<F>(&mut self, load: F) -> Result<&mut OrphanMap>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        if self.entries.is_none() {
            self.entries = Some(load()?.into_iter().collect());
        }
        Ok(self.entries.get_or_insert_with(OrphanMap::new))
    }

    fn ensure_dirty<F>(&mut self, load: F) -> Result<&mut OrphanMap>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        self.dirty = true;
        self.ensure(load)
    }

    pub fn orphans_of<F>(&mut self, point: &str, load: F) -> Result<Vec<ObjectId>>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        Ok(self.ensure(load)?.get(point).cloned().unwrap_or_default())
    }

    pub fn all<F>(&mut self, load: F) -> Result<Vec<(String, Vec<ObjectId>)>>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        Ok(self
            .ensure(load)?
            .iter()
            .map(|(point, ids)| (point.clone(), ids.clone()))
            .collect())
    }

    pub fn add_orphan<F>(&mut self, point: &str, extension: ObjectId, load: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        let waiting = self.ensure_dirty(load)?.entry(point.to_string()).or_default();
        if !waiting.contains(&extension) {
            waiting.push(extension);
        }
        Ok(())
    }

    pub fn add_orphans<F>(&mut self, point: &str, extensions: &[ObjectId], load: F) -> Result<()>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        if extensions.is_empty() {
            return Ok(());
        }
        let waiting = self.ensure_dirty(load)?.entry(point.to_string()).or_default();
        for extension in extensions {
            if !waiting.contains(extension) {
                waiting.push(*extension);
            }
        }
        Ok(())
    }

    /// Returns false when the extension was not waiting on `point`
    pub fn remove_orphan<F>(&mut self, point: &str, extension: ObjectId, load: F) -> Result<bool>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        let entries = self.ensure_dirty(load)?;
        let Some(waiting) = entries.get_mut(point) else {
            return Ok(false);
        };
        let before = waiting.len();
        waiting.retain(|id| *id != extension);
        let removed = waiting.len() != before;
        if waiting.is_empty() {
            entries.remove(point);
        }
        Ok(removed)
    }

    /// Take every extension waiting on `point`
    pub fn remove_orphans<F>(&mut self, point: &str, load: F) -> Result<Vec<ObjectId>>
    where
        F: FnOnce() -> Result<Vec<(String, Vec<ObjectId>)>>,
    {
        Ok(self.ensure_dirty(load)?.remove(point).unwrap_or_default())
    }

    /// Drop the loaded index unless it holds unsaved changes
    pub fn trim(&mut self) {
        if !self.dirty {
            self.entries = None;
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }
}
