//! Shared fixtures for in-crate tests.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use rivet_core::{EngineId, NativeEngine, TemplateId};

use crate::handle::{Handle, HandleCtx, InternalHandle};
use crate::index::ObjectIndex;
use crate::object::{HostObject, ObjectShared, ScriptObject};

/// Inert behavior for lifecycle tests.
pub(crate) struct Probe;

impl HostObject for Probe {}

/// A native engine plus index wired the way the `Engine` facade wires
/// them, without the facade itself.
pub(crate) struct Rig {
    pub(crate) native: Arc<Mutex<NativeEngine>>,
    pub(crate) index: Arc<ObjectIndex>,
}

impl Rig {
    pub(crate) fn new() -> Self {
        let mut engine = NativeEngine::new(EngineId::new(0));
        engine.enter_isolate_scope();
        engine.enter_context_scope().unwrap();
        let native = Arc::new(Mutex::new(engine));
        let index = Arc::new(ObjectIndex::new());
        let cb_index = Arc::clone(&index);
        native.lock().unwrap().register_gc_callback(Box::new(move |engine, handle| {
            cb_index.on_native_gc(engine, handle)
        }));
        Self { native, index }
    }

    pub(crate) fn ctx(&self) -> HandleCtx {
        HandleCtx {
            engine: EngineId::new(0),
            native: Arc::downgrade(&self.native),
            table: self.native.lock().unwrap().handle_table(),
            index: Arc::clone(&self.index),
        }
    }

    pub(crate) fn make_object(&self, needs_confirm: bool) -> ScriptObject {
        self.make_object_with(Arc::new(Probe), None, needs_confirm)
    }

    pub(crate) fn make_object_with(
        &self,
        behavior: Arc<dyn HostObject>,
        template: Option<TemplateId>,
        needs_confirm: bool,
    ) -> ScriptObject {
        let handle_id = {
            let mut native = self.native.lock().unwrap();
            match template {
                Some(t) => {
                    native.create_object_from_template(t, rivet_core::ObjectId::NONE).unwrap()
                }
                None => native.create_object(None).unwrap(),
            }
        };
        let handle: Handle = InternalHandle::bind(self.ctx(), handle_id).keep();
        let stamp =
            self.index.register(Arc::clone(&behavior), handle.clone(), template, needs_confirm);
        self.native.lock().unwrap().connect_object(handle_id, stamp.id, template).unwrap();
        let shared = Arc::new(ObjectShared {
            stamp,
            behavior,
            handle,
            index: Arc::downgrade(&self.index),
            suppressed: AtomicBool::new(false),
        });
        self.index.attach_wrapper(stamp, Arc::downgrade(&shared));
        ScriptObject::from_shared(shared)
    }
}
