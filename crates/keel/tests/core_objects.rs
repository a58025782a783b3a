//! Core object lifecycle tests: initialization, the sync pass and teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use keel::core_object::{CoreContext, CoreSyncData};
use keel::{
    CoreObject, CoreObjectCore, CoreObjectType, Engine, EngineConfig, KeelError, KeelResult,
};

struct Counter {
    core: CoreObject,
    value: AtomicU64,
}

impl Counter {
    fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
        self.core.mark_core_dirty();
    }
}

impl CoreObjectType for Counter {
    fn core_object(&self) -> &CoreObject {
        &self.core
    }

    fn create_core(&self) -> KeelResult<Box<dyn CoreObjectCore>> {
        Ok(Box::new(CounterCore {
            value: self.value.load(Ordering::Acquire),
            syncs: 0,
            initialized: false,
        }))
    }

    fn capture_sync_data(&self) -> Option<CoreSyncData> {
        Some(Box::new(self.value.load(Ordering::Acquire)))
    }
}

struct CounterCore {
    value: u64,
    syncs: usize,
    initialized: bool,
}

impl CoreObjectCore for CounterCore {
    fn initialize(&mut self, _ctx: &CoreContext<'_>) {
        self.initialized = true;
    }

    fn sync_to_core(&mut self, data: CoreSyncData) {
        if let Ok(value) = data.downcast::<u64>() {
            self.value = *value;
            self.syncs += 1;
        }
    }
}

fn new_counter(engine: &Engine, value: u64) -> Arc<Counter> {
    engine
        .runtime()
        .create_initialized(|core| Counter {
            core,
            value: AtomicU64::new(value),
        })
        .unwrap()
}

/// Read `(initialized, value, syncs)` from the counter's twin.
fn twin_state(engine: &Engine, counter: &Counter) -> Option<(bool, u64, usize)> {
    let token = counter.core.core();
    engine
        .core_thread()
        .execute_sync(move |arena| {
            arena
                .get_as::<CounterCore>(&token)
                .map(|twin| (twin.initialized, twin.value, twin.syncs))
        })
        .unwrap()
}

#[test]
fn test_twin_is_usable_after_synchronize() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 7);

    counter.core.synchronize();

    assert!(counter.core.is_initialized());
    assert!(counter.core.core().is_initialized());
    let (initialized, value, _) = twin_state(&engine, &counter).unwrap();
    assert!(initialized);
    assert_eq!(value, 7);
}

#[test]
fn test_synchronize_from_other_threads() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 1);

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let state = counter.core.state().clone();
            thread::spawn(move || {
                state.wait_initialized();
                state.is_initialized()
            })
        })
        .collect();

    for waiter in waiters {
        assert!(waiter.join().unwrap());
    }
}

#[test]
fn test_initialize_twice_is_rejected() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 0);

    assert!(matches!(
        counter.core.initialize(),
        Err(KeelError::AlreadyInitialized(id)) if id == counter.core.id()
    ));
}

#[test]
fn test_sync_pass_pushes_latest_value_once() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 1);

    counter.set(2);
    counter.set(42);
    let stats = engine.run_frame().unwrap();
    assert_eq!(stats.synced_objects, 1);

    let (_, value, syncs) = twin_state(&engine, &counter).unwrap();
    assert_eq!(value, 42);
    assert_eq!(syncs, 1);

    let stats = engine.run_frame().unwrap();
    assert_eq!(stats.synced_objects, 0);
    assert_eq!(twin_state(&engine, &counter).unwrap().2, 1);
}

#[test]
fn test_uninitialized_objects_are_not_synced() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = engine.runtime().create(|core| Counter {
        core,
        value: AtomicU64::new(3),
    });

    counter.set(4);
    assert_eq!(engine.run_frame().unwrap().synced_objects, 0);
    assert!(counter.core.is_core_dirty());

    counter.core.initialize().unwrap();
    assert_eq!(engine.run_frame().unwrap().synced_objects, 1);
    assert_eq!(twin_state(&engine, &counter).unwrap().1, 4);
}

#[test]
fn test_destroy_removes_twin() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 5);
    let id = counter.core.id();

    counter.core.destroy();
    counter.core.destroy();
    engine.core_thread().flush().unwrap();

    assert!(counter.core.is_destroyed());
    assert!(!engine.objects().contains(id));
    assert!(!engine.core_thread().execute_sync(move |arena| arena.contains(id)).unwrap());
    assert!(matches!(counter.core.initialize(), Err(KeelError::Destroyed(_))));
}

#[test]
fn test_dropping_object_destroys_it() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 5);
    let id = counter.core.id();
    counter.core.synchronize();

    drop(counter);
    engine.core_thread().flush().unwrap();

    assert_eq!(engine.objects().live_object_count(), 0);
    assert!(!engine.core_thread().execute_sync(move |arena| arena.contains(id)).unwrap());
}

#[test]
fn test_shutdown_reports_leaked_objects() {
    let engine = Engine::new(EngineConfig::default()).unwrap();
    let counter = new_counter(&engine, 0);

    match engine.shutdown() {
        Err(KeelError::LeakedCoreObjects { count, types }) => {
            assert_eq!(count, 1);
            assert_eq!(types, vec![std::any::type_name::<Counter>()]);
        }
        other => panic!("expected a leak report, got {other:?}"),
    }

    drop(counter);
    assert_eq!(engine.objects().live_object_count(), 0);
}
