//! Performance benchmarks for the bridge's hot paths:
//! - Handle churn: acquire/release cycles over the recycling proxy table
//! - Object lifecycle: registration through retirement, fast path vs the
//!   interceptor-confirmed path
//! - Property traffic: native storage vs host-routed interception
//! - Script execution on the embedded evaluator
//!
//! ## Profiling with Puffin
//!
//! Run with the `profile-with-puffin` feature to collect per-scope timings:
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;

use rivet::prelude::*;

#[cfg(feature = "profile-with-puffin")]
static FRAME_VIEW: std::sync::OnceLock<puffin::GlobalFrameView> = std::sync::OnceLock::new();

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
    FRAME_VIEW.get_or_init(puffin::GlobalFrameView::default);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

struct Inert;

impl HostObject for Inert {}

struct Echo;

impl DynamicProperties for Echo {
    fn get(&self, name: &str) -> Option<Snapshot> {
        Some(Snapshot::Str(name.to_string()))
    }

    fn set(&self, _name: &str, _value: Snapshot) -> bool {
        true
    }
}

struct Dynamic;

impl HostObject for Dynamic {
    fn dynamic(&self) -> Option<&dyn DynamicProperties> {
        static D: Echo = Echo;
        Some(&D)
    }
}

/// A quiesced engine: worker paused so iteration timings are not polluted
/// by background collection slices.
fn quiet_engine() -> Engine {
    let engine = Engine::new().unwrap();
    engine.pause_reclamation();
    engine
}

fn handle_benchmarks(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("bridge/handles");

    let engine = quiet_engine();
    group.bench_function("acquire_release_recycled", |b| {
        b.iter(|| {
            let handle = engine.create_integer(black_box(7)).unwrap();
            black_box(handle.id())
        });
    });

    group.bench_function("clone_release_durable", |b| {
        let kept: Handle = engine.create_string("bench").unwrap().keep();
        b.iter(|| {
            let copy = kept.clone();
            black_box(copy.ref_count())
        });
    });

    group.bench_function("forced_value_refresh", |b| {
        let kept: Handle = engine.create_number(3.5).unwrap().keep();
        b.iter(|| black_box(kept.value().unwrap()));
    });

    group.finish();
}

fn lifecycle_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge/lifecycle");

    // Fast path: no interceptors, retirement happens inline at the last
    // release.
    let engine = quiet_engine();
    group.bench_function("plain_create_drop", |b| {
        b.iter(|| {
            let object = engine.make_object(Arc::new(Inert), None).unwrap();
            black_box(object.id())
        });
    });

    // Confirmed path: queue, promote, engine collection.
    let intercepted = quiet_engine();
    let template = intercepted.create_object_template().unwrap();
    template.enable_interceptors().unwrap();
    group.bench_function("intercepted_create_drop_pump", |b| {
        b.iter(|| {
            let object = intercepted.make_object(Arc::new(Dynamic), Some(&template)).unwrap();
            drop(object);
            black_box(intercepted.pump_reclamation())
        });
    });

    group.finish();
}

fn property_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge/properties");

    let engine = quiet_engine();
    let plain = engine.make_object(Arc::new(Inert), None).unwrap();
    let value = engine.create_integer(1).unwrap();
    engine.set_property(plain.handle(), "p", &value).unwrap();
    group.bench_function("native_get", |b| {
        b.iter(|| black_box(engine.get_property(plain.handle(), "p").unwrap().id()));
    });

    let template = engine.create_object_template().unwrap();
    template.enable_interceptors().unwrap();
    let routed = engine.make_object(Arc::new(Dynamic), Some(&template)).unwrap();
    group.bench_function("intercepted_get", |b| {
        b.iter(|| black_box(engine.get_property(routed.handle(), "p").unwrap().id()));
    });

    group.finish();
}

fn execution_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge/execution");

    let engine = quiet_engine();
    let source = "total = 0; total = total + 17 * 3 - 4; 'n=' + total";
    group.throughput(Throughput::Bytes(source.len() as u64));
    group.bench_function("small_script", |b| {
        b.iter(|| {
            let result = engine.execute(black_box(source), "bench").unwrap();
            end_profiling_frame();
            black_box(result.id())
        });
    });

    let calls = {
        let template = engine.create_function_template("id").unwrap();

        struct Identity;
        impl HostObject for Identity {
            fn call(&self, args: &[Snapshot], _is_construct: bool) -> Option<Snapshot> {
                args.first().cloned()
            }
        }
        let object = engine.make_object(Arc::new(Identity), None).unwrap();
        template.bind(&object);
        let function = template.function().unwrap();
        let global = engine.global().unwrap();
        engine.set_property(&global, "id", &function).unwrap();
        object
    };
    group.bench_function("host_function_call", |b| {
        b.iter(|| black_box(engine.execute("id(42)", "call").unwrap().id()));
    });
    drop(calls);

    group.finish();
}

criterion_group!(
    benches,
    handle_benchmarks,
    lifecycle_benchmarks,
    property_benchmarks,
    execution_benchmarks
);

criterion_main!(benches);
