//! Ordered dispatch worker
//!
//! A single background thread drains a channel of dispatch units, so units
//! run strictly one at a time in the order they were scheduled.

use super::{DispatchReport, ListenerEntry, ListenerFailure, PurgeTarget, RegistryChangeEvent};
use crate::core::error::Result;
use crate::core::model::{ObjectId, ObjectKind};
use crate::core::store::ObjectStore;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

const REPORT_CAPACITY: usize = 64;

/// Listener snapshot and deltas of one write batch
pub struct DispatchUnit {
    pub listeners: Vec<ListenerEntry>,
    pub event: RegistryChangeEvent,
    pub purge: Vec<PurgeTarget>,
    pub store: Arc<ObjectStore>,
    pub debug_events: bool,
}

enum Job {
    Dispatch(DispatchUnit),
    Barrier(Sender<()>),
    Shutdown,
}

pub struct Dispatcher {
    jobs: Sender<Job>,
    reports: Receiver<DispatchReport>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    pub fn start() -> Result<Self> {
        let (jobs, queue) = channel::unbounded::<Job>();
        let (report_tx, reports) = channel::bounded(REPORT_CAPACITY);

        let worker = thread::Builder::new()
            .name("registry-dispatch".to_string())
            .spawn(move || {
                let mut sequence = 0u64;
                for job in queue {
                    match job {
                        Job::Dispatch(unit) => {
                            sequence += 1;
                            run_unit(unit, sequence, &report_tx);
                        }
                        Job::Barrier(done) => {
                            let _ = done.send(());
                        }
                        Job::Shutdown => break,
                    }
                }
                debug!("Dispatch worker stopped after {} units", sequence);
            })?;

        Ok(Dispatcher {
            jobs,
            reports,
            worker_id: worker.thread().id(),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn schedule(&self, unit: DispatchUnit) {
        if self.jobs.send(Job::Dispatch(unit)).is_err() {
            warn!("Dispatch worker is gone; change event dropped");
        }
    }

    /// Block until every unit scheduled so far has run
    ///
    /// Returns at once when called by a listener: the running unit is the
    /// one the barrier would wait for.
    pub fn wait_idle(&self) {
        if self.is_worker() {
            return;
        }
        let (done_tx, done_rx) = channel::bounded(1);
        if self.jobs.send(Job::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }

    /// Reports of units in which a listener failed
    pub fn reports(&self) -> Receiver<DispatchReport> {
        self.reports.clone()
    }

    /// Finish the queued units and stop the worker
    pub fn stop(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = self.jobs.send(Job::Shutdown);
            // A listener dropping the last reference stops from the worker itself
            if self.is_worker() {
                return;
            }
            if worker.join().is_err() {
                error!("Dispatch worker panicked");
            }
        }
    }
}

impl Dispatcher {
    fn is_worker(&self) -> bool {
        thread::current().id() == self.worker_id
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

fn run_unit(unit: DispatchUnit, sequence: u64, reports: &Sender<DispatchReport>) {
    let DispatchUnit {
        listeners,
        event,
        purge,
        store,
        debug_events,
    } = unit;

    if debug_events {
        for delta in event.all_extension_deltas() {
            debug!(
                "Registry change #{}: {:?} {} -> {}",
                sequence,
                delta.kind(),
                delta.extension_unique_identifier().unwrap_or("<anonymous>"),
                delta.extension_point_unique_identifier()
            );
        }
    }

    let mut report = DispatchReport {
        sequence,
        ..Default::default()
    };

    let listeners = if event.is_empty() { Vec::new() } else { listeners };
    for entry in listeners.iter().filter(|e| e.accepts(&event)) {
        report.listeners_run += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.listener.registry_changed(&event)));
        let message = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => format!("{:#}", err),
            Err(payload) => panic_message(payload),
        };
        report.failures.push(ListenerFailure {
            filter: entry.filter.clone(),
            message,
        });
    }

    purge_removed(&purge, &store);

    if !report.is_ok() {
        error!("Registry listeners failed: {}", report);
        if reports.try_send(report).is_err() {
            warn!("Dispatch report channel full; report #{} dropped", sequence);
        }
    }
}

/// Drop every object the batch removed, now that no listener can ask for it
fn purge_removed(targets: &[PurgeTarget], store: &ObjectStore) {
    let mut purged = 0usize;
    for target in targets {
        purged += match *target {
            PurgeTarget::Extension(id) => purge_extension(store, id),
            PurgeTarget::ExtensionPoint(id) => {
                store.remove(id, true);
                1
            }
        };
    }
    if purged > 0 {
        debug!("Purged {} removed objects", purged);
    }
}

fn purge_extension(store: &ObjectStore, id: ObjectId) -> usize {
    let mut purged = 0;
    if let Ok(extension) = store.extension(id) {
        for child in extension.children() {
            purged += purge_element(store, *child, ObjectKind::ConfigurationElement);
        }
    }
    store.remove(id, true);
    purged + 1
}

fn purge_element(store: &ObjectStore, id: ObjectId, kind: ObjectKind) -> usize {
    let mut purged = 0;
    if let Ok(element) = store.configuration_element(id, kind) {
        let child_kind = element.children_kind();
        for child in element.children() {
            purged += purge_element(store, *child, child_kind);
        }
    }
    store.remove(id, true);
    purged + 1
}
