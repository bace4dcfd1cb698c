//! Script-facing coverage: execution and fault tagging, forced value
//! refresh, interceptor routing from running scripts, and function
//! template dispatch across bound host views.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rivet::prelude::*;

struct Inert;

impl HostObject for Inert {}

#[test]
fn division_by_zero_is_a_value_not_a_fault() {
    let engine = Engine::new().unwrap();
    let result = engine.execute("1/0", "div").unwrap();
    assert!(!result.is_error());
    assert_eq!(result.to_number().unwrap(), f64::INFINITY);
}

#[test]
fn syntax_errors_come_back_compiler_tagged() {
    let engine = Engine::new().unwrap();
    let result = engine.execute("syntax(((", "broken").unwrap();
    assert!(result.is_error());
    assert_eq!(result.value_type(), JsValueType::CompilerError);

    let message = result.to_text().unwrap();
    assert!(message.contains("Location: broken:"));
}

#[test]
fn runtime_errors_come_back_execution_tagged() {
    let engine = Engine::new().unwrap();
    let result = engine.execute("x = 1; x()", "calls").unwrap();
    assert_eq!(result.value_type(), JsValueType::ExecutionError);
    assert!(result.to_text().unwrap().contains("is not a function"));
}

#[test]
fn compile_faults_leave_no_side_effects() {
    let engine = Engine::new().unwrap();
    engine.execute("a = 1", "setup").unwrap();
    let fault = engine.execute("a = 2; nonsense((", "partial").unwrap();
    assert!(fault.is_error());
    assert_eq!(engine.execute("a", "read").unwrap().to_integer().unwrap(), 1);
}

#[test]
fn last_value_is_unset_until_forced() {
    let engine = Engine::new().unwrap();
    let handle = engine.execute("21 * 2", "answer").unwrap();
    assert_eq!(handle.last_value(), Snapshot::Unset);

    assert_eq!(handle.value().unwrap(), Snapshot::Integer(42));
    assert_eq!(handle.last_value(), Snapshot::Integer(42));
}

#[test]
fn forced_reads_observe_mutation_between_executions() {
    let engine = Engine::new().unwrap();
    engine.execute("box = [1, 2, 3]", "setup").unwrap();
    let held = engine.execute("box", "grab").unwrap();
    assert_eq!(held.value().unwrap(), Snapshot::Str("1,2,3".to_string()));
    let stale = held.last_value();

    engine.execute("box[1] = 9", "mutate").unwrap();
    // The cached snapshot is untouched until the next forced read.
    assert_eq!(held.last_value(), stale);
    assert_eq!(held.value().unwrap(), Snapshot::Str("1,9,3".to_string()));
}

struct Bag {
    hits: AtomicUsize,
}

impl Bag {
    fn new() -> Self {
        Self { hits: AtomicUsize::new(0) }
    }
}

struct BagDynamic;

impl DynamicProperties for BagDynamic {
    fn get(&self, name: &str) -> Option<Snapshot> {
        (name == "species").then(|| Snapshot::Str("cat".to_string()))
    }

    fn set(&self, name: &str, _value: Snapshot) -> bool {
        name == "species"
    }
}

impl HostObject for Bag {
    fn dynamic(&self) -> Option<&dyn DynamicProperties> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        static D: BagDynamic = BagDynamic;
        Some(&D)
    }
}

#[test]
fn scripts_read_dynamic_properties_through_interceptors() {
    let engine = Engine::new().unwrap();
    let template = engine.create_object_template().unwrap();
    template.enable_interceptors().unwrap();

    let bag = Arc::new(Bag::new());
    let object = engine.make_object(bag.clone(), Some(&template)).unwrap();
    let global = engine.global().unwrap();
    engine.set_property(&global, "bag", object.handle()).unwrap();

    let species = engine.execute("bag.species", "read").unwrap();
    assert_eq!(species.to_text().unwrap(), "cat");
    assert!(bag.hits.load(Ordering::SeqCst) > 0);

    // Unintercepted names fall through to native storage.
    engine.execute("bag.other = 7", "write").unwrap();
    assert_eq!(engine.execute("bag.other", "reread").unwrap().to_integer().unwrap(), 7);
}

#[test]
fn interceptors_go_neutral_once_the_object_is_gone() {
    let engine = Engine::new().unwrap();
    engine.pause_reclamation();
    let template = engine.create_object_template().unwrap();

    let object = engine.make_object(Arc::new(Bag::new()), Some(&template)).unwrap();
    let stamp = object.stamp();
    let global = engine.global().unwrap();
    engine.set_property(&global, "bag", object.handle()).unwrap();

    // Interceptors arrive after creation, so the record keeps the
    // immediate retirement path; the script still reaches the value.
    template.enable_interceptors().unwrap();
    drop(object);
    assert_eq!(engine.object_state(stamp), GcState::Retired);

    // Property access for the dead object ID must not fault; every
    // interceptor answers "not intercepted" and native storage wins.
    let species = engine.execute("bag.species", "after").unwrap();
    assert!(!species.is_error());
    assert_eq!(species.value_type(), JsValueType::Undefined);

    engine.execute("bag.species = 'dog'", "write").unwrap();
    assert_eq!(engine.execute("bag.species", "reread").unwrap().to_text().unwrap(), "dog");
}

#[test]
fn global_template_shapes_the_global_object() {
    let engine = Engine::new().unwrap();
    let template = engine.create_object_template().unwrap();
    let version = engine.create_integer(7).unwrap();
    template.set_property("version", &version, PropertyAttributes::NONE).unwrap();

    let installed = engine.set_global_template(&template).unwrap();
    assert!(installed.is_object_kind());

    // Scripts resolve bare names against the replaced global.
    assert_eq!(engine.execute("version", "read").unwrap().to_integer().unwrap(), 7);
    let global = engine.global().unwrap();
    assert_eq!(engine.get_property(&global, "version").unwrap().to_integer().unwrap(), 7);
}

#[test]
fn host_made_errors_carry_tag_and_message() {
    let engine = Engine::new().unwrap();
    let fault = engine.create_error("boom", FaultKind::Execution).unwrap();
    assert!(fault.is_error());
    assert_eq!(fault.value_type(), JsValueType::ExecutionError);
    assert_eq!(fault.to_text().unwrap(), "boom");
}

#[test]
fn array_factories_build_indexable_values() {
    let engine = Engine::new().unwrap();
    let one = engine.create_integer(1).unwrap();
    let two = engine.create_integer(2).unwrap();
    let array = engine.create_array(&[&one, &two]).unwrap();
    assert_eq!(array.value_type(), JsValueType::Array);
    assert_eq!(engine.get_element(&array, 1).unwrap().to_integer().unwrap(), 2);

    let names = engine.create_string_array(&["a", "b", "c"]).unwrap();
    assert_eq!(engine.enumerate_elements(&names).unwrap(), vec![0, 1, 2]);
    assert_eq!(engine.get_element(&names, 2).unwrap().to_text().unwrap(), "c");

    let when = engine.create_date(86_400_000.0).unwrap();
    assert_eq!(when.to_date().unwrap(), 86_400_000.0);
}

#[test]
fn template_defaults_are_stamped_onto_instances() {
    let engine = Engine::new().unwrap();
    let template = engine.create_object_template().unwrap();
    let version = engine.create_integer(3).unwrap();
    template.set_property("version", &version, PropertyAttributes::NONE).unwrap();

    let object = engine.make_object(Arc::new(Inert), Some(&template)).unwrap();
    let read = engine.get_property(object.handle(), "version").unwrap();
    assert_eq!(read.to_integer().unwrap(), 3);
}

#[test]
fn accessors_route_single_properties_to_host_closures() {
    let engine = Engine::new().unwrap();
    let template = engine.create_object_template().unwrap();
    let object = engine.make_object(Arc::new(Inert), Some(&template)).unwrap();

    let written: Arc<std::sync::Mutex<Option<Snapshot>>> = Arc::default();
    let sink = Arc::clone(&written);
    template
        .set_accessor(
            &object,
            "title",
            Some(Arc::new(|_name| Snapshot::Str("chief".to_string()))),
            Some(Arc::new(move |_name, value| {
                *sink.lock().unwrap() = Some(value);
            })),
            PropertyAttributes::NONE,
        )
        .unwrap();

    let global = engine.global().unwrap();
    engine.set_property(&global, "who", object.handle()).unwrap();
    assert_eq!(engine.execute("who.title", "get").unwrap().to_text().unwrap(), "chief");

    engine.execute("who.title = \"boss\"", "set").unwrap();
    assert_eq!(*written.lock().unwrap(), Some(Snapshot::Str("boss".to_string())));
}

struct Doubler;

impl HostObject for Doubler {
    fn call(&self, args: &[Snapshot], _is_construct: bool) -> Option<Snapshot> {
        match args.first() {
            Some(Snapshot::Integer(i)) => Some(Snapshot::Integer(i * 2)),
            _ => None,
        }
    }
}

struct Tripler {
    calls: AtomicUsize,
}

impl HostObject for Tripler {
    fn call(&self, args: &[Snapshot], _is_construct: bool) -> Option<Snapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match args.first() {
            Some(Snapshot::Integer(i)) => Some(Snapshot::Integer(i * 3)),
            _ => None,
        }
    }
}

#[test]
fn function_calls_reach_the_bound_host_object() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("double").unwrap();
    let object = engine.make_object(Arc::new(Doubler), None).unwrap();
    template.bind(&object);

    let function = template.function().unwrap();
    let global = engine.global().unwrap();
    engine.set_property(&global, "double", &function).unwrap();

    assert_eq!(engine.execute("double(21)", "call").unwrap().to_integer().unwrap(), 42);
}

#[test]
fn most_recent_binding_wins_dispatch() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("scale").unwrap();

    let doubler = engine.make_object(Arc::new(Doubler), None).unwrap();
    let tripler_behavior = Arc::new(Tripler { calls: AtomicUsize::new(0) });
    let tripler = engine.make_object(tripler_behavior.clone(), None).unwrap();

    template.bind(&doubler);
    template.bind(&tripler);
    assert_eq!(template.bound_views(), 2);

    let function = template.function().unwrap();
    let global = engine.global().unwrap();
    engine.set_property(&global, "scale", &function).unwrap();

    // One invocation consults the newest binding first; the older one is
    // never reached once the newer produced a result.
    assert_eq!(engine.execute("scale(5)", "call").unwrap().to_integer().unwrap(), 15);
    assert_eq!(tripler_behavior.calls.load(Ordering::SeqCst), 1);

    template.unbind_type::<Tripler>();
    assert_eq!(engine.execute("scale(5)", "again").unwrap().to_integer().unwrap(), 10);
}

#[test]
fn function_handles_need_no_open_scopes() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("bare").unwrap();

    // No with_* scope is active here; the template manages its own.
    let function = template.function().unwrap();
    assert_eq!(function.value_type(), JsValueType::Function);

    // Repeated requests observe the one shared native function object.
    let again = template.function().unwrap();
    assert_eq!(engine.call(&again, None, &[]).unwrap().value_type(), JsValueType::Undefined);
}

#[test]
fn receiverless_calls_recycle_their_scratch_handles() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("double").unwrap();
    let object = engine.make_object(Arc::new(Doubler), None).unwrap();
    template.bind(&object);
    let function = template.function().unwrap();
    let arg = engine.create_integer(2).unwrap();

    let first = engine.call(&function, None, &[&arg]).unwrap().id();
    for _ in 0..100 {
        engine.call(&function, None, &[&arg]).unwrap();
    }
    // Every call's result handle is released on drop and reused; the
    // table must not grow by one slot per call.
    let last = engine.call(&function, None, &[&arg]).unwrap();
    assert_eq!(last.id(), first);
    assert_eq!(last.to_integer().unwrap(), 4);
}

#[test]
fn unbound_function_calls_yield_undefined() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("noop").unwrap();
    let function = template.function().unwrap();
    let global = engine.global().unwrap();
    engine.set_property(&global, "noop", &function).unwrap();

    let result = engine.execute("noop(1)", "call").unwrap();
    assert_eq!(result.value_type(), JsValueType::Undefined);
}

#[test]
fn host_call_surface_matches_script_calls() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("double").unwrap();
    let object = engine.make_object(Arc::new(Doubler), None).unwrap();
    template.bind(&object);

    let function = template.function().unwrap();
    let arg = engine.create_integer(8).unwrap();
    let result = engine.call(&function, None, &[&arg]).unwrap();
    assert_eq!(result.to_integer().unwrap(), 16);
}

#[test]
fn instances_carry_their_behavior() {
    let engine = Engine::new().unwrap();
    let template = engine.create_function_template("Gadget").unwrap();
    let instance = engine
        .create_instance(&template, Arc::new(Inert), &[])
        .unwrap();
    assert!(instance.behavior_as::<Inert>().is_some());

    let found = engine.wrapper_for(instance.handle()).unwrap().unwrap();
    assert_eq!(found.stamp(), instance.stamp());
}
