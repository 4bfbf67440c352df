use crate::core::error::Result;
use crate::core::model::{BundleId, Contribution};
use ahash::AHashMap;
use std::sync::Arc;

type ContributionMap = AHashMap<BundleId, Arc<Contribution>>;

/// Contributions of this session plus those recorded in the cache
///
/// "Former" contributions are read from `.contributions` on demand and may
/// be dropped again until one of them is removed.
#[derive(Debug, Default)]
pub struct ContributionSet {
    new: ContributionMap,
    former: Option<ContributionMap>,
    former_dirty: bool,
}

impl ContributionSet {
    /// Set with no cache behind it
    pub fn fresh() -> Self {
        ContributionSet {
            new: ContributionMap::new(),
            former: Some(ContributionMap::new()),
            former_dirty: true,
        }
    }

    fn former<F>(&mut self, load: F) -> Result<&mut ContributionMap>
    where
        F: FnOnce() -> Result<Vec<Contribution>>,
    {
        if self.former.is_none() {
            let loaded = load()?
                .into_iter()
                .map(|c| (c.contributor(), Arc::new(c)))
                .collect();
            self.former = Some(loaded);
        }
        Ok(self.former.get_or_insert_with(ContributionMap::new))
    }

    pub fn add(&mut self, contribution: Contribution) -> Arc<Contribution> {
        let contribution = Arc::new(contribution);
        self.new
            .insert(contribution.contributor(), Arc::clone(&contribution));
        contribution
    }

    pub fn get<F>(&mut self, contributor: BundleId, load: F) -> Result<Option<Arc<Contribution>>>
    where
        F: FnOnce() -> Result<Vec<Contribution>>,
    {
        if let Some(found) = self.new.get(&contributor) {
            return Ok(Some(Arc::clone(found)));
        }
        Ok(self.former(load)?.get(&contributor).cloned())
    }

    pub fn remove<F>(&mut self, contributor: BundleId, load: F) -> Result<Option<Arc<Contribution>>>
    where
        F: FnOnce() -> Result<Vec<Contribution>>,
    {
        if let Some(removed) = self.new.remove(&contributor) {
            return Ok(Some(removed));
        }
        let removed = self.former(load)?.remove(&contributor);
        if removed.is_some() {
            self.former_dirty = true;
        }
        Ok(removed)
    }

    /// Every contribution, ordered by contributor
    pub fn all<F>(&mut self, load: F) -> Result<Vec<Arc<Contribution>>>
    where
        F: FnOnce() -> Result<Vec<Contribution>>,
    {
        let mut all: Vec<_> = self.former(load)?.values().cloned().collect();
        all.extend(self.new.values().cloned());
        all.sort_by_key(|c| c.contributor());
        Ok(all)
    }

    pub fn trim(&mut self) {
        if !self.former_dirty {
            self.former = None;
        }
    }

    pub fn is_former_loaded(&self) -> bool {
        self.former.is_some()
    }
}
