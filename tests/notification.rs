//! Change events: deltas, filters, failure reports and purging

use anyhow::anyhow;
use extension_registry::{
    CacheEnvironment, ContributionDecl, DeltaKind, ElementDecl, ExtensionDecl, ExtensionPointDecl,
    ExtensionRegistry, ModuleDescriptor, RegistryChangeEvent, RegistryChangeListener,
    RegistryConfig, RegistryError, StaticModuleSource,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn registry() -> ExtensionRegistry {
    ExtensionRegistry::open(
        RegistryConfig::in_memory(),
        CacheEnvironment::default(),
        None,
        Arc::new(StaticModuleSource::default()),
    )
    .unwrap()
}

fn module_a() -> ContributionDecl {
    ContributionDecl::new(ModuleDescriptor::new(1, "p")).extension_point(ExtensionPointDecl::new("point"))
}

fn module_b() -> ContributionDecl {
    ContributionDecl::new(ModuleDescriptor::new(2, "b")).extension(
        ExtensionDecl::new("p.point")
            .id("ext1")
            .element(ElementDecl::new("run").attr("class", "b.Main")),
    )
}

/// Listener that keeps every event it receives
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<RegistryChangeEvent>>,
}

impl RegistryChangeListener for Recorder {
    fn registry_changed(&self, event: &RegistryChangeEvent) -> anyhow::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

impl Recorder {
    fn take(&self) -> Vec<RegistryChangeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[test]
fn test_point_and_extension_scenario() {
    let registry = registry();
    let recorder = Arc::new(Recorder::default());
    registry.add_listener(recorder.clone(), None);

    registry.add(&module_a()).unwrap();
    registry.wait_idle();
    assert!(recorder.take().is_empty(), "a point without extensions produces no delta");

    registry.add(&module_b()).unwrap();
    registry.wait_idle();
    let point = registry.extension_point("p.point").unwrap();
    let linked: Vec<_> = point
        .extensions()
        .unwrap()
        .iter()
        .map(|e| e.unique_identifier().unwrap())
        .collect();
    assert_eq!(linked, vec![Some("b.ext1".to_string())]);

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    let deltas = events[0].extension_deltas("p");
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].kind(), DeltaKind::Added);
    assert_eq!(deltas[0].extension_unique_identifier(), Some("b.ext1"));
    assert!(events[0].extension_delta("p", "point", "b.ext1").is_some());

    assert!(registry.remove(1).unwrap());
    registry.wait_idle();
    assert!(registry.extension_point("p.point").is_none());
    assert!(registry.configuration_elements_for("p.point").unwrap().is_empty());
    assert!(registry.extension("b.ext1").unwrap().is_none(), "orphans are not visible");
    assert!(registry.has_contribution(2).unwrap());

    let events = recorder.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].removed_extension_points("p"), vec!["p.point"]);
    let removed = events[0].extension_deltas_for("p", "point");
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].kind(), DeltaKind::Removed);
    assert_eq!(removed[0].extension_unique_identifier(), Some("b.ext1"));

    // The point is purged once the listeners ran; the orphan survives
    assert!(!point.is_valid());
    assert!(removed[0].extension().is_valid());

    // Re-adding the point adopts the orphan
    registry.add(&module_a()).unwrap();
    registry.wait_idle();
    assert!(registry.extension("b.ext1").unwrap().is_some());
    let events = recorder.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].extension_deltas("p")[0].kind(), DeltaKind::Added);
}

#[test]
fn test_orphan_first_produces_one_added_delta() {
    let registry = registry();
    let recorder = Arc::new(Recorder::default());
    registry.add_listener(recorder.clone(), None);

    registry.add(&module_b()).unwrap();
    registry.wait_idle();
    assert!(recorder.take().is_empty(), "an orphan produces no delta");

    registry.add(&module_a()).unwrap();
    registry.wait_idle();
    let events = recorder.take();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].all_extension_deltas().count(), 1);
    assert_eq!(
        events[0].extension_delta("p", "point", "b.ext1").map(|d| d.kind()),
        Some(DeltaKind::Added)
    );
}

#[test]
fn test_listener_sees_removed_objects_until_purge() {
    let registry = registry();
    registry.add_all(&[module_a(), module_b()]).unwrap();

    let checked = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&checked);
    registry.add_listener(
        Arc::new(move |event: &RegistryChangeEvent| -> anyhow::Result<()> {
            for delta in event.all_extension_deltas() {
                // Both handles resolve while the listener runs
                assert_eq!(delta.extension_point().unique_identifier()?, "p.point");
                let elements = delta.extension().configuration_elements()?;
                assert_eq!(elements[0].attribute("class")?.as_deref(), Some("b.Main"));
                seen.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }),
        None,
    );

    registry.remove(2).unwrap();
    registry.wait_idle();
    assert_eq!(checked.load(Ordering::SeqCst), 1);

    let reports = registry.reports();
    assert!(reports.try_recv().is_err(), "no listener failed");
}

#[test]
fn test_removed_module_objects_become_stale() {
    let registry = registry();
    registry.add_all(&[module_a(), module_b()]).unwrap();

    let extension = registry.extension("b.ext1").unwrap().unwrap();
    let element = extension.configuration_elements().unwrap().remove(0);

    registry.remove(2).unwrap();
    registry.wait_idle();

    assert!(!extension.is_valid());
    assert!(!element.is_valid());
    assert!(matches!(
        extension.label(),
        Err(RegistryError::StaleHandle { .. })
    ));
    assert!(matches!(element.name(), Err(RegistryError::StaleHandle { .. })));
}

#[test]
fn test_namespace_filter() {
    let registry = registry();
    let matching = Arc::new(Recorder::default());
    let other = Arc::new(Recorder::default());
    registry.add_listener(matching.clone(), Some("p"));
    registry.add_listener(other.clone(), Some("b"));

    registry.add_all(&[module_a(), module_b()]).unwrap();
    registry.wait_idle();

    // Deltas are keyed by the namespace of the point, not of the extension
    assert_eq!(matching.take().len(), 1);
    assert!(other.take().is_empty());
}

#[test]
fn test_failures_are_aggregated() {
    let registry = registry();
    let recorder = Arc::new(Recorder::default());

    registry.add_listener(
        Arc::new(|_: &RegistryChangeEvent| -> anyhow::Result<()> { Err(anyhow!("listener refused")) }),
        None,
    );
    registry.add_listener(
        Arc::new(|_: &RegistryChangeEvent| -> anyhow::Result<()> { panic!("listener exploded") }),
        Some("p"),
    );
    registry.add_listener(recorder.clone(), None);

    registry.add_all(&[module_a(), module_b()]).unwrap();
    registry.wait_idle();

    assert_eq!(recorder.take().len(), 1, "later listeners still run");

    let report = registry.reports().try_recv().unwrap();
    assert_eq!(report.listeners_run, 3);
    assert_eq!(report.failures.len(), 2);
    assert_eq!(report.failures[0].filter, None);
    assert!(report.failures[0].message.contains("listener refused"));
    assert_eq!(report.failures[1].filter.as_deref(), Some("p"));
    assert!(report.failures[1].message.contains("listener exploded"));
}

#[test]
fn test_batches_are_delivered_in_order() {
    let registry = registry();
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    registry.add_listener(
        Arc::new(move |event: &RegistryChangeEvent| -> anyhow::Result<()> {
            for delta in event.all_extension_deltas() {
                sink.lock().push(delta.kind());
            }
            Ok(())
        }),
        None,
    );

    registry.add(&module_a()).unwrap();
    for _ in 0..10 {
        registry.add(&module_b()).unwrap();
        registry.remove(2).unwrap();
    }
    registry.wait_idle();

    let order = order.lock();
    assert_eq!(order.len(), 20);
    for pair in order.chunks(2) {
        assert_eq!(pair, [DeltaKind::Added, DeltaKind::Removed]);
    }
}

#[test]
fn test_removed_listener_is_not_called() {
    let registry = registry();
    let recorder = Arc::new(Recorder::default());
    let listener: Arc<dyn RegistryChangeListener> = recorder.clone();
    registry.add_listener(Arc::clone(&listener), None);
    assert!(registry.remove_listener(&listener));
    assert!(!registry.remove_listener(&listener));

    registry.add_all(&[module_a(), module_b()]).unwrap();
    registry.wait_idle();
    assert!(recorder.take().is_empty());
}

#[test]
fn test_listener_may_query_registry() {
    let registry = Arc::new(registry());
    let answers = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&registry);
    let sink = Arc::clone(&answers);
    registry.add_listener(
        Arc::new(move |_: &RegistryChangeEvent| -> anyhow::Result<()> {
            if let Some(registry) = weak.upgrade() {
                sink.lock().push(registry.namespaces()?);
            }
            Ok(())
        }),
        None,
    );

    registry.add_all(&[module_a(), module_b()]).unwrap();
    registry.wait_idle();
    assert_eq!(
        *answers.lock(),
        vec![vec!["b".to_string(), "p".to_string()]]
    );
}

#[test]
fn test_listener_may_wait_idle() {
    let registry = Arc::new(registry());
    let calls = Arc::new(AtomicUsize::new(0));

    let weak = Arc::downgrade(&registry);
    let counter = Arc::clone(&calls);
    registry.add_listener(
        Arc::new(move |_: &RegistryChangeEvent| -> anyhow::Result<()> {
            if let Some(registry) = weak.upgrade() {
                registry.wait_idle();
            }
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
        None,
    );

    registry.add_all(&[module_a(), module_b()]).unwrap();
    registry.remove(2).unwrap();

    let (done_tx, done_rx) = crossbeam::channel::bounded(1);
    let waiter = {
        let registry = Arc::clone(&registry);
        std::thread::spawn(move || {
            registry.wait_idle();
            let _ = done_tx.send(());
        })
    };
    assert!(
        done_rx.recv_timeout(std::time::Duration::from_secs(5)).is_ok(),
        "dispatch worker stalled"
    );
    waiter.join().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
