//! Change notification
//!
//! Write batches produce per-namespace deltas. Each batch that changed
//! something becomes one dispatch unit, run on a dedicated worker thread in
//! scheduling order, after which the removed objects are purged.

pub mod delta;
pub mod dispatcher;

pub use delta::{
    DeltaKind, DeltaMap, ExtensionDelta, PendingChanges, PurgeTarget, RegistryChangeEvent,
    RegistryDelta,
};
pub use dispatcher::{DispatchUnit, Dispatcher};

use std::fmt;
use std::sync::Arc;

/// Receives registry change events
///
/// Listeners run on the dispatch thread, outside the registry lock, so they
/// may query the registry freely.
pub trait RegistryChangeListener: Send + Sync {
    fn registry_changed(&self, event: &RegistryChangeEvent) -> anyhow::Result<()>;
}

impl<F> RegistryChangeListener for F
where
    F: Fn(&RegistryChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn registry_changed(&self, event: &RegistryChangeEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// A registered listener with its optional namespace filter
#[derive(Clone)]
pub struct ListenerEntry {
    pub listener: Arc<dyn RegistryChangeListener>,
    pub filter: Option<String>,
}

impl ListenerEntry {
    pub fn accepts(&self, event: &RegistryChangeEvent) -> bool {
        match &self.filter {
            Some(namespace) => event.has_namespace(namespace),
            None => true,
        }
    }
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Registered listeners, unique by identity
#[derive(Debug, Clone, Default)]
pub struct ListenerList {
    entries: Vec<ListenerEntry>,
}

impl ListenerList {
    /// Adding a listener that is already present replaces its filter
    pub fn add(&mut self, listener: Arc<dyn RegistryChangeListener>, filter: Option<String>) {
        match self
            .entries
            .iter_mut()
            .find(|e| Arc::ptr_eq(&e.listener, &listener))
        {
            Some(entry) => entry.filter = filter,
            None => self.entries.push(ListenerEntry { listener, filter }),
        }
    }

    pub fn remove(&mut self, listener: &Arc<dyn RegistryChangeListener>) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !Arc::ptr_eq(&e.listener, listener));
        before != self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn snapshot(&self) -> Vec<ListenerEntry> {
        self.entries.clone()
    }
}

/// One listener that returned an error or panicked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    pub filter: Option<String>,
    pub message: String,
}

/// Failures collected while running one dispatch unit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Position of the unit in scheduling order
    pub sequence: u64,
    pub listeners_run: usize,
    pub failures: Vec<ListenerFailure>,
}

impl DispatchReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "dispatch #{}: {} of {} listeners failed",
            self.sequence,
            self.failures.len(),
            self.listeners_run
        )?;
        for failure in &self.failures {
            write!(f, "; [{}] {}", failure.filter.as_deref().unwrap_or("*"), failure.message)?;
        }
        Ok(())
    }
}
