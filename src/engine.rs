//! The engine facade: one script engine, its handle table, its object
//! index, and the background reclamation worker, behind a thread-safe
//! handle-based API.
//!
//! The native engine sits behind one mutex; scope counters live inside it
//! and survive across lock acquisitions, which is what lets the
//! `with_*_scope` methods enter a scope, release the lock while the
//! caller's closure runs, and exit afterwards. Handles and wrappers reach
//! the proxy table through their own shared reference, so reading a
//! handle never contends with script execution.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use rivet_core::{
    CollectionOutcome, EngineId, FaultKind, HandleId, HandleTable, JsValueType, NativeEngine,
    ObjectId, Snapshot,
};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleCtx, HandleLike, InternalHandle};
use crate::index::{GcState, ObjectIndex};
use crate::object::{HostObject, ObjectShared, ObjectStamp, ScriptObject};
use crate::template::{FunctionTemplate, ObjectTemplate};
use crate::worker::{ReclamationWorker, drain_promotion_queue};

/// Engine IDs are process-global and never recycled.
static NEXT_ENGINE_ID: AtomicI32 = AtomicI32::new(0);

struct EngineShared {
    id: EngineId,
    native: Arc<Mutex<NativeEngine>>,
    table: Arc<Mutex<HandleTable>>,
    index: Arc<ObjectIndex>,
    disposed: AtomicBool,
}

/// One script engine instance.
///
/// Dropping the engine stops the worker, disposes the native side, and
/// tears down the object index. Wrappers and handles that outlive the
/// engine stay safe to drop; their releases degrade to bookkeeping.
pub struct Engine {
    shared: Arc<EngineShared>,
    worker: Mutex<Option<ReclamationWorker>>,
}

impl Engine {
    /// Create an engine with its reclamation worker running.
    pub fn new() -> BridgeResult<Self> {
        let id = EngineId::new(NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed));
        let native_engine = NativeEngine::new(id);
        let table = native_engine.handle_table();
        let native = Arc::new(Mutex::new(native_engine));
        let index = Arc::new(ObjectIndex::new());

        let cb_index = Arc::clone(&index);
        native.lock().unwrap().register_gc_callback(Box::new(move |engine, handle| {
            cb_index.on_native_gc(engine, handle)
        }));

        let worker = ReclamationWorker::spawn(Arc::clone(&index), Arc::clone(&native))?;
        log::debug!("{id} created");
        Ok(Self {
            shared: Arc::new(EngineShared {
                id,
                native,
                table,
                index,
                disposed: AtomicBool::new(false),
            }),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn id(&self) -> EngineId {
        self.shared.id
    }

    fn ctx(&self) -> HandleCtx {
        HandleCtx {
            engine: self.shared.id,
            native: Arc::downgrade(&self.shared.native),
            table: Arc::clone(&self.shared.table),
            index: Arc::clone(&self.shared.index),
        }
    }

    fn bind(&self, id: HandleId) -> InternalHandle {
        InternalHandle::bind(self.ctx(), id)
    }

    fn check_engine<H: HandleLike + ?Sized>(&self, handle: &H) -> BridgeResult<()> {
        if handle.engine_id() != self.shared.id {
            return Err(BridgeError::ForeignHandle {
                expected: self.shared.id,
                found: handle.engine_id(),
            });
        }
        Ok(())
    }

    fn check_live(&self) -> BridgeResult<()> {
        if self.shared.disposed.load(Ordering::Acquire) {
            return Err(BridgeError::EngineGone(self.shared.id));
        }
        Ok(())
    }

    /// Run `f` inside isolate and context scopes under the engine lock.
    fn scoped<T>(
        &self,
        f: impl FnOnce(&mut NativeEngine) -> BridgeResult<T>,
    ) -> BridgeResult<T> {
        self.check_live()?;
        let mut native = self.shared.native.lock().unwrap();
        native.enter_isolate_scope();
        if let Err(e) = native.enter_context_scope() {
            native.exit_isolate_scope();
            return Err(e.into());
        }
        let result = f(&mut native);
        native.exit_context_scope();
        native.exit_isolate_scope();
        result
    }

    // ------------------------------------------------------------------
    // Scopes

    /// Hold an isolate scope open across `f`. The engine lock is not held
    /// while `f` runs; scope counters persist inside the native engine.
    pub fn with_isolate_scope<T>(&self, f: impl FnOnce(&Engine) -> T) -> BridgeResult<T> {
        self.check_live()?;
        self.shared.native.lock().unwrap().enter_isolate_scope();
        let result = f(self);
        self.shared.native.lock().unwrap().exit_isolate_scope();
        Ok(result)
    }

    /// Hold isolate plus context scopes open across `f`.
    pub fn with_context_scope<T>(&self, f: impl FnOnce(&Engine) -> T) -> BridgeResult<T> {
        self.check_live()?;
        {
            let mut native = self.shared.native.lock().unwrap();
            native.enter_isolate_scope();
            if let Err(e) = native.enter_context_scope() {
                native.exit_isolate_scope();
                return Err(e.into());
            }
        }
        let result = f(self);
        {
            let mut native = self.shared.native.lock().unwrap();
            native.exit_context_scope();
            native.exit_isolate_scope();
        }
        Ok(result)
    }

    /// Hold a bare handle scope open across `f`.
    pub fn with_handle_scope<T>(&self, f: impl FnOnce(&Engine) -> T) -> BridgeResult<T> {
        self.check_live()?;
        self.shared.native.lock().unwrap().enter_handle_scope();
        let result = f(self);
        self.shared.native.lock().unwrap().exit_handle_scope();
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Value factories

    pub fn create_boolean(&self, b: bool) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_boolean(b)?))?;
        Ok(self.bind(id))
    }

    pub fn create_integer(&self, i: i32) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_integer(i)?))?;
        Ok(self.bind(id))
    }

    pub fn create_number(&self, n: f64) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|e| Ok(e.create_number(n)?))?;
        Ok(self.bind(id))
    }

    pub fn create_string(&self, s: &str) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_string(s)?))?;
        Ok(self.bind(id))
    }

    /// Milliseconds since the Unix epoch.
    pub fn create_date(&self, ms: f64) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_date(ms)?))?;
        Ok(self.bind(id))
    }

    pub fn create_null(&self) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_null()?))?;
        Ok(self.bind(id))
    }

    pub fn create_undefined(&self) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_undefined()?))?;
        Ok(self.bind(id))
    }

    pub fn create_error(&self, message: &str, kind: FaultKind) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_error(message, kind.tag())?))?;
        Ok(self.bind(id))
    }

    pub fn create_array(&self, items: &[&dyn HandleLike]) -> BridgeResult<InternalHandle> {
        for item in items {
            self.check_engine(*item)?;
        }
        let ids: Vec<HandleId> = items.iter().map(|h| h.id()).collect();
        let id = self.scoped(|n| Ok(n.create_array(&ids)?))?;
        Ok(self.bind(id))
    }

    pub fn create_string_array(&self, items: &[&str]) -> BridgeResult<InternalHandle> {
        let id = self.scoped(|n| Ok(n.create_string_array(items)?))?;
        Ok(self.bind(id))
    }

    // ------------------------------------------------------------------
    // Templates

    pub fn create_object_template(&self) -> BridgeResult<ObjectTemplate> {
        self.check_live()?;
        let id = self.shared.native.lock().unwrap().create_object_template();
        Ok(ObjectTemplate::new(
            self.shared.id,
            Arc::downgrade(&self.shared.native),
            Arc::clone(&self.shared.table),
            Arc::clone(&self.shared.index),
            id,
        ))
    }

    pub fn create_function_template(&self, class_name: &str) -> BridgeResult<FunctionTemplate> {
        self.check_live()?;
        FunctionTemplate::new(
            self.shared.id,
            &self.shared.native,
            Arc::clone(&self.shared.table),
            Arc::clone(&self.shared.index),
            class_name,
        )
    }

    /// Install an object template as the shape of the global object,
    /// replacing any default global (and its properties) already created
    /// by a context entry.
    pub fn set_global_template(&self, template: &ObjectTemplate) -> BridgeResult<Handle> {
        self.check_live()?;
        let id = {
            let mut native = self.shared.native.lock().unwrap();
            native.enter_isolate_scope();
            let result = native.set_global_template(template.id());
            native.exit_isolate_scope();
            result?
        };
        Ok(self.bind(id).keep())
    }

    pub fn global(&self) -> BridgeResult<Handle> {
        let id = self.scoped(|n| Ok(n.global_handle()?))?;
        Ok(self.bind(id).keep())
    }

    // ------------------------------------------------------------------
    // Host objects

    /// Create a script object backed by `behavior`, optionally shaped by a
    /// template. Template-shaped objects take the confirm-required
    /// retirement path when the template routes property access through
    /// the host.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn make_object(
        &self,
        behavior: Arc<dyn HostObject>,
        template: Option<&ObjectTemplate>,
    ) -> BridgeResult<ScriptObject> {
        let template_id = template.map(|t| t.id());
        let needs_confirm = match template {
            Some(t) => t.has_interceptors()?,
            None => false,
        };
        let handle_id = self.scoped(|n| {
            Ok(match template_id {
                Some(t) => n.create_object_from_template(t, ObjectId::NONE)?,
                None => n.create_object(None)?,
            })
        })?;
        let handle = self.bind(handle_id).keep();
        self.associate(handle, behavior, template_id, needs_confirm)
    }

    /// Construct-call a function template and associate the instance with
    /// `behavior`.
    pub fn create_instance(
        &self,
        template: &FunctionTemplate,
        behavior: Arc<dyn HostObject>,
        args: &[&dyn HandleLike],
    ) -> BridgeResult<ScriptObject> {
        for arg in args {
            self.check_engine(*arg)?;
        }
        let instance = template.instance_template()?;
        let needs_confirm = instance.has_interceptors()?;
        let ids: Vec<HandleId> = args.iter().map(|h| h.id()).collect();
        let handle_id =
            self.scoped(|n| Ok(n.create_instance(template.id(), ObjectId::NONE, &ids)?))?;
        let handle = self.bind(handle_id).keep();
        self.associate(handle, behavior, Some(instance.id()), needs_confirm)
    }

    /// Associate a host object with an existing script value, typically
    /// one a script created from a template. Fails when the value already
    /// has an associated object.
    pub fn attach_object(
        &self,
        handle: &Handle,
        behavior: Arc<dyn HostObject>,
    ) -> BridgeResult<ScriptObject> {
        self.check_engine(handle)?;
        if !handle.is_object_kind() {
            return Err(rivet_core::NativeError::NotAnObject(handle.id()).into());
        }
        if handle.object_id()?.is_some() {
            return Err(BridgeError::AlreadyAssociated(handle.id()));
        }
        let template_id = {
            let native = self.shared.native.lock().unwrap();
            native.object_template_of(handle.id())?
        };
        let needs_confirm = match template_id {
            Some(t) => self.shared.native.lock().unwrap().template_has_interceptors(t)?,
            None => false,
        };
        self.associate(handle.clone(), behavior, template_id, needs_confirm)
    }

    /// Registration tail shared by every association path: index slot,
    /// native linkage, wrapper, one-shot initialize hook.
    fn associate(
        &self,
        handle: Handle,
        behavior: Arc<dyn HostObject>,
        template: Option<rivet_core::TemplateId>,
        needs_confirm: bool,
    ) -> BridgeResult<ScriptObject> {
        let handle_id = handle.id();
        let stamp = self.shared.index.register(
            Arc::clone(&behavior),
            handle.clone(),
            template,
            needs_confirm,
        );
        self.shared.native.lock().unwrap().connect_object(handle_id, stamp.id, template)?;

        let shared = Arc::new(ObjectShared {
            stamp,
            behavior: Arc::clone(&behavior),
            handle,
            index: Arc::downgrade(&self.shared.index),
            suppressed: AtomicBool::new(false),
        });
        let first = self.shared.index.attach_wrapper(stamp, Arc::downgrade(&shared));
        let object = ScriptObject::from_shared(shared);
        if first {
            behavior.initialize(&object);
        }
        log::trace!("{} associated with {handle_id}", stamp.id);
        Ok(object)
    }

    /// The wrapper for a handle's associated object, if it has one.
    pub fn wrapper_for(&self, handle: &impl HandleLike) -> BridgeResult<Option<ScriptObject>> {
        self.check_engine(handle)?;
        let object_id = handle.object_id()?;
        if !object_id.is_some() {
            return Ok(None);
        }
        Ok(self.shared.index.resolve_current(object_id))
    }

    /// Resolve a stamp back to its wrapper, re-strengthening the record if
    /// its previous wrapper was collected. Stale stamps fail with
    /// [`BridgeError::ObjectGone`].
    pub fn resolve(&self, stamp: ObjectStamp) -> BridgeResult<ScriptObject> {
        self.shared.index.resolve(stamp).ok_or(BridgeError::ObjectGone(stamp.id))
    }

    /// Lifecycle state a stamp currently observes.
    pub fn object_state(&self, stamp: ObjectStamp) -> GcState {
        self.shared.index.state_of(stamp)
    }

    /// The object's prototype as a durable handle, materialized on first
    /// request and cached on the index record afterwards.
    pub fn prototype_of(&self, object: &ScriptObject) -> BridgeResult<Handle> {
        if let Some(cached) = self.shared.index.cached_prototype(object.id()) {
            return Ok(cached);
        }
        let id = self.scoped(|n| Ok(n.get_prototype_of(object.handle().id())?))?;
        let handle = self.bind(id).keep();
        self.shared.index.cache_prototype(object.id(), handle.clone());
        Ok(handle)
    }

    // ------------------------------------------------------------------
    // Properties

    pub fn get_property(
        &self,
        target: &impl HandleLike,
        name: &str,
    ) -> BridgeResult<InternalHandle> {
        self.check_engine(target)?;
        let id = self.scoped(|n| Ok(n.get_property_of(target.id(), name)?))?;
        Ok(self.bind(id))
    }

    pub fn set_property(
        &self,
        target: &impl HandleLike,
        name: &str,
        value: &impl HandleLike,
    ) -> BridgeResult<()> {
        self.check_engine(target)?;
        self.check_engine(value)?;
        self.scoped(|n| Ok(n.set_property_of(target.id(), name, value.id())?))
    }

    pub fn delete_property(&self, target: &impl HandleLike, name: &str) -> BridgeResult<bool> {
        self.check_engine(target)?;
        self.scoped(|n| Ok(n.delete_property_of(target.id(), name)?))
    }

    pub fn enumerate_properties(&self, target: &impl HandleLike) -> BridgeResult<Vec<String>> {
        self.check_engine(target)?;
        self.scoped(|n| Ok(n.enumerate_properties_of(target.id())?))
    }

    pub fn get_element(&self, target: &impl HandleLike, index: u32) -> BridgeResult<InternalHandle> {
        self.check_engine(target)?;
        let id = self.scoped(|n| {
            let obj = n.value_of(target.id())?;
            Ok(match n.get_element(obj, index) {
                Some(v) => n.acquire_handle(v),
                None => n.create_undefined()?,
            })
        })?;
        Ok(self.bind(id))
    }

    pub fn set_element(
        &self,
        target: &impl HandleLike,
        index: u32,
        value: &impl HandleLike,
    ) -> BridgeResult<()> {
        self.check_engine(target)?;
        self.check_engine(value)?;
        self.scoped(|n| {
            let obj = n.value_of(target.id())?;
            let v = n.value_of(value.id())?;
            n.set_element(obj, index, v);
            Ok(())
        })
    }

    pub fn delete_element(&self, target: &impl HandleLike, index: u32) -> BridgeResult<bool> {
        self.check_engine(target)?;
        self.scoped(|n| {
            let obj = n.value_of(target.id())?;
            Ok(n.delete_element(obj, index))
        })
    }

    pub fn enumerate_elements(&self, target: &impl HandleLike) -> BridgeResult<Vec<u32>> {
        self.check_engine(target)?;
        self.scoped(|n| {
            let obj = n.value_of(target.id())?;
            Ok(n.enumerate_elements(obj))
        })
    }

    /// Invoke a function value. `this` defaults to the global object. A
    /// call nothing handles yields `undefined`.
    pub fn call(
        &self,
        function: &impl HandleLike,
        this: Option<&dyn HandleLike>,
        args: &[&dyn HandleLike],
    ) -> BridgeResult<InternalHandle> {
        self.check_engine(function)?;
        if let Some(this) = this {
            self.check_engine(this)?;
        }
        for arg in args {
            self.check_engine(*arg)?;
        }
        let arg_ids: Vec<HandleId> = args.iter().map(|h| h.id()).collect();
        let this_id = this.map(|h| h.id());
        let id = self.scoped(|n| {
            let f = n.value_of(function.id())?;
            let this_value = match this_id {
                Some(id) => n.value_of(id)?,
                None => n.global_value(),
            };
            let mut arg_values = Vec::with_capacity(arg_ids.len());
            for id in &arg_ids {
                arg_values.push(n.value_of(*id)?);
            }
            match n.call_function(f, this_value, &arg_values)? {
                Some(v) => Ok(n.acquire_handle(v)),
                None => Ok(n.create_undefined()?),
            }
        })?;
        Ok(self.bind(id))
    }

    // ------------------------------------------------------------------
    // Execution

    /// Compile and run a script. The result is a durable handle; script
    /// faults come back as error-tagged handles rather than `Err`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn execute(&self, source: &str, source_label: &str) -> BridgeResult<Handle> {
        let id = self.scoped(|n| Ok(n.execute(source, source_label)?))?;
        Ok(self.bind(id).keep())
    }

    /// Like [`Engine::execute`], but error-tagged results are translated
    /// into [`BridgeError::Script`].
    pub fn execute_checked(&self, source: &str, source_label: &str) -> BridgeResult<Handle> {
        let handle = self.execute(source, source_label)?;
        let tag = handle.value_type();
        let Some(kind) = fault_kind(tag) else {
            return Ok(handle);
        };
        // Error values carry their formatted message as a string.
        let message = match handle.value()? {
            Snapshot::Str(s) => s,
            _ => String::new(),
        };
        Err(BridgeError::Script { kind, message })
    }

    // ------------------------------------------------------------------
    // Reclamation

    /// Pause the background worker, returning once it has parked.
    pub fn pause_reclamation(&self) {
        if let Some(worker) = self.worker.lock().unwrap().as_ref() {
            worker.pause();
        }
    }

    pub fn resume_reclamation(&self) {
        if let Some(worker) = self.worker.lock().unwrap().as_ref() {
            worker.resume();
        }
    }

    /// Synchronously run one full reclamation pass: drain the promotion
    /// queue, then run an unbounded collection. Returns the number of
    /// records promoted. Deterministic alternative to the worker; pause
    /// the worker first when exact counts matter.
    pub fn pump_reclamation(&self) -> usize {
        let promoted = drain_promotion_queue(&self.shared.index);
        self.shared.native.lock().unwrap().run_collection(None);
        promoted
    }

    /// One bounded collection cycle on the native side.
    pub fn collect(&self, budget: Option<usize>) -> CollectionOutcome {
        self.shared.native.lock().unwrap().run_collection(budget)
    }

    // ------------------------------------------------------------------
    // Diagnostics

    /// Records whose handles are queued for weak promotion.
    pub fn pending_reclamations(&self) -> usize {
        self.shared.index.queued_count()
    }

    /// Live object-index records.
    pub fn live_objects(&self) -> usize {
        self.shared.index.live_count()
    }

    /// Handle proxies currently parked in the recycle cache.
    pub fn cached_handle_count(&self) -> usize {
        self.shared.table.lock().unwrap().cached_count()
    }

    /// Live values on the native heap.
    pub fn live_values(&self) -> usize {
        self.shared.native.lock().unwrap().live_values()
    }

    // ------------------------------------------------------------------
    // Teardown

    /// Tear the engine down: stop the worker, retire every index record,
    /// dispose the native side. Idempotent; outstanding handles and
    /// wrappers remain safe to drop afterwards.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        drop(self.worker.lock().unwrap().take());
        self.shared.index.clear();
        self.shared.native.lock().unwrap().dispose();
        log::debug!("{} disposed", self.shared.id);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn fault_kind(tag: JsValueType) -> Option<FaultKind> {
    match tag {
        JsValueType::CompilerError => Some(FaultKind::Compiler),
        JsValueType::ExecutionError => Some(FaultKind::Execution),
        JsValueType::InternalError => Some(FaultKind::Internal),
        _ => None,
    }
}
