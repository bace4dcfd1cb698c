//! The native engine: value heap, templates, scopes, and the collector.
//!
//! One `NativeEngine` owns everything on the engine side of the bridge. The
//! host side serializes access with a lock of its own; the handle table is
//! shared separately so that host wrapper drops never need to enter the
//! engine (see [`crate::proxy`]).

use std::sync::{Arc, Mutex};

use crate::error::{NativeError, NativeResult};
use crate::heap::{Heap, ValueRef};
use crate::ids::{EngineId, HandleId, ObjectId, TemplateId};
use crate::proxy::{HandleTable, classify};
use crate::script;
use crate::template::{
    Accessor, AccessorInfo, FunctionCall, FunctionCallback, FunctionTemplateRec,
    IndexedInterceptors, NamedInterceptors, ObjectTemplateRec,
};
use crate::value::{FunctionData, InternalFields, JsValue, ObjectData, Snapshot};
use crate::value_type::{JsValueType, PropertyAttributes};

/// Hidden property used to tag free-form (non-template) objects with their
/// host object ID.
pub const OBJECT_ID_HIDDEN_KEY: &str = "ManagedObjectID";

/// Called by the collector when a weak-marked value is about to be
/// reclaimed. Returning `true` approves reclamation; `false` keeps the
/// persistent handle alive for another cycle.
pub type GcRequestCallback = Box<dyn FnMut(&mut NativeEngine, HandleId) -> bool + Send>;

/// Result of one collection slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionOutcome {
    /// Weak handles for which a reclamation request was issued.
    pub requests: usize,
    /// Heap values freed.
    pub swept: usize,
    /// False when a budget cut the slice short.
    pub done: bool,
}

pub struct NativeEngine {
    id: EngineId,
    heap: Heap,
    handles: Arc<Mutex<HandleTable>>,
    object_templates: Vec<ObjectTemplateRec>,
    function_templates: Vec<FunctionTemplateRec>,
    global: Option<ValueRef>,
    gc_callback: Option<GcRequestCallback>,
    isolate_depth: u32,
    context_depth: u32,
    handle_scope_depth: u32,
    disposed: bool,
}

impl NativeEngine {
    pub fn new(id: EngineId) -> Self {
        Self {
            id,
            heap: Heap::new(),
            handles: Arc::new(Mutex::new(HandleTable::new(id))),
            object_templates: Vec::new(),
            function_templates: Vec::new(),
            global: None,
            gc_callback: None,
            isolate_depth: 0,
            context_depth: 0,
            handle_scope_depth: 0,
            disposed: false,
        }
    }

    #[inline]
    pub fn id(&self) -> EngineId {
        self.id
    }

    /// The handle table shared with host-side wrappers.
    pub fn handle_table(&self) -> Arc<Mutex<HandleTable>> {
        Arc::clone(&self.handles)
    }

    pub fn register_gc_callback(&mut self, callback: GcRequestCallback) {
        self.gc_callback = Some(callback);
    }

    // ------------------------------------------------------------------
    // Scopes

    pub fn enter_isolate_scope(&mut self) {
        self.isolate_depth += 1;
        self.handle_scope_depth += 1;
    }

    pub fn exit_isolate_scope(&mut self) {
        self.handle_scope_depth = self.handle_scope_depth.saturating_sub(1);
        self.isolate_depth = self.isolate_depth.saturating_sub(1);
    }

    /// Requires an isolate scope; creates a default global object on first
    /// entry when no global template was installed.
    pub fn enter_context_scope(&mut self) -> NativeResult<()> {
        if self.isolate_depth == 0 {
            return Err(NativeError::ScopeRequired { required: "isolate" });
        }
        if self.global.is_none() {
            let global = self.heap.alloc(JsValue::Object(ObjectData::default()));
            self.global = Some(global);
        }
        self.context_depth += 1;
        Ok(())
    }

    pub fn exit_context_scope(&mut self) {
        self.context_depth = self.context_depth.saturating_sub(1);
    }

    pub fn enter_handle_scope(&mut self) {
        self.handle_scope_depth += 1;
    }

    pub fn exit_handle_scope(&mut self) {
        self.handle_scope_depth = self.handle_scope_depth.saturating_sub(1);
    }

    fn require_value_scope(&self) -> NativeResult<()> {
        if self.disposed {
            return Err(NativeError::EngineDisposed(self.id));
        }
        if self.isolate_depth == 0 {
            return Err(NativeError::ScopeRequired { required: "isolate" });
        }
        if self.handle_scope_depth == 0 {
            return Err(NativeError::ScopeRequired { required: "handle" });
        }
        Ok(())
    }

    fn require_execution_scope(&self) -> NativeResult<()> {
        self.require_value_scope()?;
        if self.context_depth == 0 {
            return Err(NativeError::ScopeRequired { required: "context" });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Handles

    /// Wrap a heap value in a (new or recycled) handle proxy.
    pub fn acquire_handle(&mut self, value: ValueRef) -> HandleId {
        let tag = classify(&self.heap, value);
        self.handles.lock().unwrap().acquire(value, tag)
    }

    /// The live value behind a handle.
    pub fn value_of(&self, id: HandleId) -> NativeResult<ValueRef> {
        let table = self.handles.lock().unwrap();
        table
            .proxy(id)?
            .persistent()
            .ok_or(NativeError::EmptyHandle(id))
    }

    /// Recompute the proxy's snapshot from the live value and return it.
    pub fn update_value(&mut self, id: HandleId) -> NativeResult<Snapshot> {
        let persistent = {
            let table = self.handles.lock().unwrap();
            table.proxy(id)?.persistent()
        };
        let snapshot = match persistent {
            Some(v) => self.snapshot_of(v),
            None => Snapshot::Unset,
        };
        let mut table = self.handles.lock().unwrap();
        table.proxy_mut(id)?.set_snapshot(snapshot.clone());
        Ok(snapshot)
    }

    /// Primitive view of a live value. Arrays stringify element-wise (the
    /// script-level array-to-string convention), so element mutation is
    /// observable through a forced refresh.
    pub fn snapshot_of(&self, v: ValueRef) -> Snapshot {
        match self.heap.get(v) {
            Some(JsValue::Array(items)) => {
                let joined: Vec<String> = items
                    .iter()
                    .map(|i| match self.heap.get(*i) {
                        Some(value) => value.to_display_string(),
                        None => String::new(),
                    })
                    .collect();
                Snapshot::Str(joined.join(","))
            }
            Some(value) => Snapshot::capture(value),
            None => Snapshot::Unset,
        }
    }

    /// Recover the host object ID associated with a handle's value.
    ///
    /// Probes the internal fields of template-created objects, then the
    /// hidden tag of free-form objects. The result (including "absent") is
    /// cached on the proxy so the probe runs once.
    pub fn get_managed_object_id(&mut self, id: HandleId) -> NativeResult<ObjectId> {
        let (cached, persistent) = {
            let table = self.handles.lock().unwrap();
            let proxy = table.proxy(id)?;
            (proxy.object_id(), proxy.persistent())
        };
        if cached != ObjectId::NONE {
            return Ok(cached);
        }

        let mut found = ObjectId::ABSENT;
        if let Some(v) = persistent
            && let Some(data) = self.heap.get(v).and_then(|value| value.object_data())
        {
            if let Some(internal) = data.internal {
                if internal.object_id >= 0 {
                    found = ObjectId::new(internal.object_id);
                }
            } else if let Some(raw) = data.hidden.get(OBJECT_ID_HIDDEN_KEY)
                && *raw >= 0
            {
                found = ObjectId::new(*raw);
            }
        }

        let mut table = self.handles.lock().unwrap();
        table.proxy_mut(id)?.set_object_id(found);
        Ok(found)
    }

    /// Associate a handle's object value with a host object record.
    pub fn connect_object(
        &mut self,
        id: HandleId,
        object_id: ObjectId,
        template: Option<TemplateId>,
    ) -> NativeResult<()> {
        let value = self.value_of(id)?;
        let data = self
            .heap
            .get_mut(value)
            .and_then(|v| v.object_data_mut())
            .ok_or(NativeError::NotAnObject(id))?;
        match (template, &mut data.internal) {
            (_, Some(internal)) => internal.object_id = object_id.raw(),
            (Some(t), internal @ None) => {
                *internal = Some(InternalFields { template: t, object_id: object_id.raw() });
            }
            (None, None) => {
                data.hidden.insert(OBJECT_ID_HIDDEN_KEY.to_string(), object_id.raw());
            }
        }
        self.handles.lock().unwrap().proxy_mut(id)?.set_object_id(object_id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Value factories

    fn make_handle(&mut self, value: JsValue) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let v = self.heap.alloc(value);
        Ok(self.acquire_handle(v))
    }

    pub fn create_boolean(&mut self, b: bool) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Boolean(b))
    }

    pub fn create_integer(&mut self, i: i32) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Int32(i))
    }

    pub fn create_number(&mut self, n: f64) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Number(n))
    }

    pub fn create_string(&mut self, s: &str) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Str(s.to_string()))
    }

    pub fn create_date(&mut self, ms: f64) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Date(ms))
    }

    pub fn create_null(&mut self) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Null)
    }

    pub fn create_undefined(&mut self) -> NativeResult<HandleId> {
        self.make_handle(JsValue::Undefined)
    }

    /// Create an error value: a string payload with one of the negative
    /// type tags.
    pub fn create_error(&mut self, message: &str, kind: JsValueType) -> NativeResult<HandleId> {
        debug_assert!(kind.is_error());
        let id = self.make_handle(JsValue::Str(message.to_string()))?;
        self.handles.lock().unwrap().proxy_mut(id)?.set_value_type(kind);
        Ok(id)
    }

    pub fn create_array(&mut self, items: &[HandleId]) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let mut refs = Vec::with_capacity(items.len());
        for id in items {
            refs.push(self.value_of(*id)?);
        }
        self.make_handle(JsValue::Array(refs))
    }

    pub fn create_string_array(&mut self, items: &[&str]) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let refs: Vec<ValueRef> = items
            .iter()
            .map(|s| self.heap.alloc(JsValue::Str((*s).to_string())))
            .collect();
        self.make_handle(JsValue::Array(refs))
    }

    /// Create a free-form object, optionally tagged with a host object ID
    /// through the hidden-value mechanism.
    pub fn create_object(&mut self, object_id: Option<ObjectId>) -> NativeResult<HandleId> {
        let mut data = ObjectData::default();
        if let Some(oid) = object_id {
            data.hidden.insert(OBJECT_ID_HIDDEN_KEY.to_string(), oid.raw());
        }
        let id = self.make_handle(JsValue::Object(data))?;
        if let Some(oid) = object_id {
            self.handles.lock().unwrap().proxy_mut(id)?.set_object_id(oid);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Object templates

    pub fn create_object_template(&mut self) -> TemplateId {
        let id = TemplateId::new(self.object_templates.len() as i32);
        self.object_templates.push(ObjectTemplateRec::new());
        id
    }

    fn object_template(&self, id: TemplateId) -> NativeResult<&ObjectTemplateRec> {
        self.object_templates
            .get(id.index())
            .ok_or(NativeError::TemplateUninitialized(id))
    }

    fn object_template_mut(&mut self, id: TemplateId) -> NativeResult<&mut ObjectTemplateRec> {
        self.object_templates
            .get_mut(id.index())
            .ok_or(NativeError::TemplateUninitialized(id))
    }

    pub fn register_named_interceptors(
        &mut self,
        template: TemplateId,
        interceptors: Arc<dyn NamedInterceptors>,
    ) -> NativeResult<()> {
        self.object_template_mut(template)?.named = Some(interceptors);
        Ok(())
    }

    pub fn register_indexed_interceptors(
        &mut self,
        template: TemplateId,
        interceptors: Arc<dyn IndexedInterceptors>,
    ) -> NativeResult<()> {
        self.object_template_mut(template)?.indexed = Some(interceptors);
        Ok(())
    }

    pub fn unregister_named_interceptors(&mut self, template: TemplateId) -> NativeResult<()> {
        self.object_template_mut(template)?.named = None;
        Ok(())
    }

    pub fn unregister_indexed_interceptors(&mut self, template: TemplateId) -> NativeResult<()> {
        self.object_template_mut(template)?.indexed = None;
        Ok(())
    }

    pub fn template_has_interceptors(&self, template: TemplateId) -> NativeResult<bool> {
        Ok(self.object_template(template)?.has_interceptors())
    }

    /// Register a default property stamped onto every object the template
    /// creates.
    pub fn set_template_property(
        &mut self,
        template: TemplateId,
        name: &str,
        value: HandleId,
        attributes: PropertyAttributes,
    ) -> NativeResult<()> {
        let v = self.value_of(value)?;
        self.object_template_mut(template)?.defaults.push((name.to_string(), v, attributes));
        Ok(())
    }

    pub fn set_accessor(
        &mut self,
        template: TemplateId,
        object_id: ObjectId,
        name: &str,
        accessor: Accessor,
    ) -> NativeResult<()> {
        self.object_template_mut(template)?
            .accessors
            .insert((object_id.raw(), name.to_string()), accessor);
        Ok(())
    }

    pub fn clear_accessors(&mut self, template: TemplateId, object_id: ObjectId) -> NativeResult<()> {
        self.object_template_mut(template)?.clear_accessors(object_id);
        Ok(())
    }

    pub fn create_object_from_template(
        &mut self,
        template: TemplateId,
        object_id: ObjectId,
    ) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let defaults: Vec<(String, ValueRef)> = self
            .object_template(template)?
            .defaults
            .iter()
            .map(|(name, v, _)| (name.clone(), *v))
            .collect();
        let mut data = ObjectData::default();
        data.internal = Some(InternalFields { template, object_id: object_id.raw() });
        data.properties.extend(defaults);
        let id = self.make_handle(JsValue::Object(data))?;
        if object_id.is_some() {
            self.handles.lock().unwrap().proxy_mut(id)?.set_object_id(object_id);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Function templates

    /// Create a function template along with its instance and prototype
    /// object templates.
    pub fn create_function_template(&mut self, class_name: &str) -> TemplateId {
        let instance = self.create_object_template();
        let prototype = self.create_object_template();
        let id = TemplateId::new(self.function_templates.len() as i32);
        self.function_templates.push(FunctionTemplateRec::new(
            class_name.to_string(),
            instance,
            prototype,
        ));
        id
    }

    fn function_template(&self, id: TemplateId) -> NativeResult<&FunctionTemplateRec> {
        self.function_templates
            .get(id.index())
            .ok_or(NativeError::TemplateUninitialized(id))
    }

    pub fn set_function_callback(
        &mut self,
        template: TemplateId,
        callback: FunctionCallback,
    ) -> NativeResult<()> {
        self.function_templates
            .get_mut(template.index())
            .ok_or(NativeError::TemplateUninitialized(template))?
            .callback = Some(callback);
        Ok(())
    }

    pub fn instance_template_of(&self, template: TemplateId) -> NativeResult<TemplateId> {
        Ok(self.function_template(template)?.instance_template)
    }

    pub fn prototype_template_of(&self, template: TemplateId) -> NativeResult<TemplateId> {
        Ok(self.function_template(template)?.prototype_template)
    }

    /// The single native function object owned by the template, created on
    /// first request.
    pub fn get_function(&mut self, template: TemplateId) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        if let Some(f) = self.function_template(template)?.function {
            return Ok(self.acquire_handle(f));
        }
        let prototype_template = self.function_template(template)?.prototype_template;
        let name = self.function_template(template)?.class_name.clone();

        // Functions get their implicit prototype object up front.
        let mut proto_data = ObjectData::default();
        proto_data.internal =
            Some(InternalFields { template: prototype_template, object_id: ObjectId::NONE.raw() });
        let proto = self.heap.alloc(JsValue::Object(proto_data));

        let mut data = ObjectData::default();
        data.prototype = Some(proto);
        let f = self.heap.alloc(JsValue::Function(FunctionData { name, template, data }));
        self.function_templates[template.index()].function = Some(f);
        Ok(self.acquire_handle(f))
    }

    /// Construct-call the template: create an instance object and run the
    /// invocation thunk with `is_construct` set.
    pub fn create_instance(
        &mut self,
        template: TemplateId,
        object_id: ObjectId,
        args: &[HandleId],
    ) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let instance_template = self.function_template(template)?.instance_template;
        let callback = self.function_template(template)?.callback.clone();
        let id = self.create_object_from_template(instance_template, object_id)?;
        if let Some(cb) = callback {
            let this = self.value_of(id)?;
            let mut arg_refs = Vec::with_capacity(args.len());
            for a in args {
                arg_refs.push(self.value_of(*a)?);
            }
            cb(self, FunctionCall { this, is_construct: true, args: &arg_refs });
        }
        Ok(id)
    }

    /// Invoke a function value. `Ok(None)` means nothing handled the call
    /// (the script sees `undefined`).
    pub fn call_function(
        &mut self,
        function: ValueRef,
        this: ValueRef,
        args: &[ValueRef],
    ) -> NativeResult<Option<ValueRef>> {
        let template = match self.heap.get(function) {
            Some(JsValue::Function(f)) => f.template,
            _ => return Ok(None),
        };
        let Some(cb) = self.function_template(template)?.callback.clone() else {
            return Ok(None);
        };
        Ok(cb(self, FunctionCall { this, is_construct: false, args }))
    }

    // ------------------------------------------------------------------
    // Property pipeline

    fn interceptor_info(&self, obj: ValueRef) -> Option<(TemplateId, AccessorInfo)> {
        let data = self.heap.get(obj)?.object_data()?;
        let internal = data.internal?;
        let object_id = if internal.object_id >= 0 {
            ObjectId::new(internal.object_id)
        } else {
            ObjectId::NONE
        };
        Some((internal.template, AccessorInfo { this: obj, object_id, template: internal.template }))
    }

    fn find_accessor(&self, obj: ValueRef, name: &str) -> Option<(AccessorInfo, Accessor)> {
        let (template, info) = self.interceptor_info(obj)?;
        let rec = self.object_template(template).ok()?;
        rec.accessor(info.object_id, name).cloned().map(|a| (info, a))
    }

    fn named_interceptors_for(
        &self,
        obj: ValueRef,
    ) -> Option<(AccessorInfo, Arc<dyn NamedInterceptors>)> {
        let (template, info) = self.interceptor_info(obj)?;
        let rec = self.object_template(template).ok()?;
        rec.named.clone().map(|n| (info, n))
    }

    fn indexed_interceptors_for(
        &self,
        obj: ValueRef,
    ) -> Option<(AccessorInfo, Arc<dyn IndexedInterceptors>)> {
        let (template, info) = self.interceptor_info(obj)?;
        let rec = self.object_template(template).ok()?;
        rec.indexed.clone().map(|n| (info, n))
    }

    /// Resolve a named property: accessors first, then interceptors, then
    /// native storage, then the prototype chain.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn get_property(&mut self, obj: ValueRef, name: &str) -> Option<ValueRef> {
        if let Some((info, accessor)) = self.find_accessor(obj, name)
            && let Some(getter) = accessor.getter
        {
            let result = getter(self, &info, name);
            return result.or_else(|| Some(self.heap.alloc(JsValue::Undefined)));
        }
        if let Some((info, named)) = self.named_interceptors_for(obj)
            && let Some(v) = named.get(self, &info, name)
        {
            return Some(v);
        }
        let data = self.heap.get(obj)?.object_data()?;
        if let Some(v) = data.properties.get(name) {
            return Some(*v);
        }
        let proto = data.prototype?;
        self.get_property(proto, name)
    }

    pub fn set_property(&mut self, obj: ValueRef, name: &str, value: ValueRef) {
        if let Some((info, accessor)) = self.find_accessor(obj, name) {
            if let Some(setter) = accessor.setter {
                setter(self, &info, name, value);
            }
            return;
        }
        if let Some((info, named)) = self.named_interceptors_for(obj)
            && named.set(self, &info, name, value).is_some()
        {
            return;
        }
        if let Some(data) = self.heap.get_mut(obj).and_then(|v| v.object_data_mut()) {
            data.properties.insert(name.to_string(), value);
        }
    }

    pub fn delete_property(&mut self, obj: ValueRef, name: &str) -> bool {
        if let Some((info, named)) = self.named_interceptors_for(obj)
            && let Some(deleted) = named.delete(self, &info, name)
        {
            return deleted;
        }
        self.heap
            .get_mut(obj)
            .and_then(|v| v.object_data_mut())
            .is_some_and(|data| data.properties.remove(name).is_some())
    }

    /// Query a property's attributes; `None` when it does not exist.
    pub fn query_property(&mut self, obj: ValueRef, name: &str) -> Option<PropertyAttributes> {
        if let Some((info, named)) = self.named_interceptors_for(obj)
            && let Some(attrs) = named.query(self, &info, name)
        {
            return Some(attrs);
        }
        let data = self.heap.get(obj)?.object_data()?;
        data.properties.contains_key(name).then_some(PropertyAttributes::NONE)
    }

    pub fn enumerate_properties(&mut self, obj: ValueRef) -> Vec<String> {
        if let Some((info, named)) = self.named_interceptors_for(obj)
            && let Some(names) = named.enumerate(self, &info)
        {
            return names;
        }
        let mut names: Vec<String> = self
            .heap
            .get(obj)
            .and_then(|v| v.object_data())
            .map(|data| data.properties.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn get_element(&mut self, obj: ValueRef, index: u32) -> Option<ValueRef> {
        if let Some((info, indexed)) = self.indexed_interceptors_for(obj)
            && let Some(v) = indexed.get(self, &info, index)
        {
            return Some(v);
        }
        match self.heap.get(obj)? {
            JsValue::Array(items) => items.get(index as usize).copied(),
            other => other.object_data().and_then(|d| d.elements.get(&index).copied()),
        }
    }

    pub fn set_element(&mut self, obj: ValueRef, index: u32, value: ValueRef) {
        if let Some((info, indexed)) = self.indexed_interceptors_for(obj)
            && indexed.set(self, &info, index, value).is_some()
        {
            return;
        }
        let undefined = self.heap.alloc(JsValue::Undefined);
        match self.heap.get_mut(obj) {
            Some(JsValue::Array(items)) => {
                if items.len() <= index as usize {
                    items.resize(index as usize + 1, undefined);
                }
                items[index as usize] = value;
            }
            Some(other) => {
                if let Some(data) = other.object_data_mut() {
                    data.elements.insert(index, value);
                }
            }
            None => {}
        }
    }

    pub fn delete_element(&mut self, obj: ValueRef, index: u32) -> bool {
        if let Some((info, indexed)) = self.indexed_interceptors_for(obj)
            && let Some(deleted) = indexed.delete(self, &info, index)
        {
            return deleted;
        }
        self.heap
            .get_mut(obj)
            .and_then(|v| v.object_data_mut())
            .is_some_and(|data| data.elements.remove(&index).is_some())
    }

    pub fn query_element(&mut self, obj: ValueRef, index: u32) -> Option<PropertyAttributes> {
        if let Some((info, indexed)) = self.indexed_interceptors_for(obj)
            && let Some(attrs) = indexed.query(self, &info, index)
        {
            return Some(attrs);
        }
        match self.heap.get(obj)? {
            JsValue::Array(items) => {
                ((index as usize) < items.len()).then_some(PropertyAttributes::NONE)
            }
            other => other
                .object_data()
                .and_then(|d| d.elements.contains_key(&index).then_some(PropertyAttributes::NONE)),
        }
    }

    pub fn enumerate_elements(&mut self, obj: ValueRef) -> Vec<u32> {
        if let Some((info, indexed)) = self.indexed_interceptors_for(obj)
            && let Some(indices) = indexed.enumerate(self, &info)
        {
            return indices;
        }
        let mut indices: Vec<u32> = match self.heap.get(obj) {
            Some(JsValue::Array(items)) => (0..items.len() as u32).collect(),
            Some(other) => {
                other.object_data().map(|d| d.elements.keys().copied().collect()).unwrap_or_default()
            }
            None => Vec::new(),
        };
        indices.sort_unstable();
        indices
    }

    // ------------------------------------------------------------------
    // Handle-level property surface (for the host side)

    pub fn get_property_of(&mut self, obj: HandleId, name: &str) -> NativeResult<HandleId> {
        self.require_execution_scope()?;
        let this = self.value_of(obj)?;
        let v = match self.get_property(this, name) {
            Some(v) => v,
            None => self.heap.alloc(JsValue::Undefined),
        };
        Ok(self.acquire_handle(v))
    }

    pub fn set_property_of(&mut self, obj: HandleId, name: &str, value: HandleId) -> NativeResult<()> {
        self.require_execution_scope()?;
        let this = self.value_of(obj)?;
        let v = self.value_of(value)?;
        self.set_property(this, name, v);
        Ok(())
    }

    pub fn delete_property_of(&mut self, obj: HandleId, name: &str) -> NativeResult<bool> {
        self.require_execution_scope()?;
        let this = self.value_of(obj)?;
        Ok(self.delete_property(this, name))
    }

    pub fn enumerate_properties_of(&mut self, obj: HandleId) -> NativeResult<Vec<String>> {
        self.require_execution_scope()?;
        let this = self.value_of(obj)?;
        Ok(self.enumerate_properties(this))
    }

    /// The cached prototype of an object, materializing a plain object on
    /// first access for objects created without one.
    pub fn get_prototype_of(&mut self, obj: HandleId) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let this = self.value_of(obj)?;
        if self.heap.get(this).and_then(|v| v.object_data()).is_none() {
            return Err(NativeError::NotAnObject(obj));
        }
        let existing = self.heap.get(this).and_then(|v| v.object_data()).and_then(|d| d.prototype);
        let proto = match existing {
            Some(p) => p,
            None => {
                let p = self.heap.alloc(JsValue::Object(ObjectData::default()));
                if let Some(data) = self.heap.get_mut(this).and_then(|v| v.object_data_mut()) {
                    data.prototype = Some(p);
                }
                p
            }
        };
        Ok(self.acquire_handle(proto))
    }

    // ------------------------------------------------------------------
    // Global object

    /// Install a template-created global object, replacing any default one.
    pub fn set_global_template(&mut self, template: TemplateId) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let id = self.create_object_from_template(template, ObjectId::NONE)?;
        self.global = Some(self.value_of(id)?);
        Ok(id)
    }

    pub fn global_handle(&mut self) -> NativeResult<HandleId> {
        self.require_value_scope()?;
        let global = match self.global {
            Some(g) => g,
            None => {
                let g = self.heap.alloc(JsValue::Object(ObjectData::default()));
                self.global = Some(g);
                g
            }
        };
        Ok(self.acquire_handle(global))
    }

    /// The global object's value, materializing a plain global on first
    /// access. Unlike [`NativeEngine::global_handle`] this never acquires
    /// a proxy, so callers that only need the receiver stay
    /// handle-neutral.
    pub fn global_value(&mut self) -> ValueRef {
        match self.global {
            Some(g) => g,
            None => {
                let g = self.heap.alloc(JsValue::Object(ObjectData::default()));
                self.global = Some(g);
                g
            }
        }
    }

    pub(crate) fn heap(&self) -> &Heap {
        &self.heap
    }

    pub(crate) fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Allocate a raw heap value without wrapping it in a handle. For use
    /// by interceptor and callback bridges running inside the engine.
    pub fn alloc_value(&mut self, value: JsValue) -> ValueRef {
        self.heap.alloc(value)
    }

    /// The template that created the handle's value, if it has internal
    /// fields.
    pub fn object_template_of(&self, id: HandleId) -> NativeResult<Option<TemplateId>> {
        let value = self.value_of(id)?;
        Ok(self
            .heap
            .get(value)
            .and_then(|v| v.object_data())
            .and_then(|d| d.internal)
            .map(|i| i.template))
    }

    /// Live heap values; exposed for tests and diagnostics.
    pub fn live_values(&self) -> usize {
        self.heap.live_count()
    }

    // ------------------------------------------------------------------
    // Execution

    /// Compile and run a script. Faults are reported as a handle whose tag
    /// is one of the negative error kinds, not as an `Err`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn execute(&mut self, source: &str, source_label: &str) -> NativeResult<HandleId> {
        self.require_execution_scope()?;
        match script::evaluate(self, source) {
            Ok(v) => Ok(self.acquire_handle(v)),
            Err(fault) => {
                let message = fault.format(source_label);
                log::debug!("{}: script fault in '{}': {}", self.id, source_label, message);
                self.create_error(&message, fault.kind.tag())
            }
        }
    }

    // ------------------------------------------------------------------
    // Collection

    /// Give the collector an idle slice bounded to `budget` reclamation
    /// requests (unbounded when `None`).
    pub fn idle_notification(&mut self, budget: Option<usize>) -> CollectionOutcome {
        self.run_collection(budget)
    }

    fn collection_roots(&mut self) -> Vec<ValueRef> {
        let mut roots = self.handles.lock().unwrap().strong_roots();
        roots.push(self.global_value());
        for rec in &self.object_templates {
            roots.extend(rec.defaults.iter().map(|(_, v, _)| *v));
        }
        roots.extend(self.function_templates.iter().filter_map(|rec| rec.function));
        roots
    }

    /// One mark/request/sweep cycle.
    ///
    /// Weak handles whose value is unreachable get a reclamation request;
    /// approved requests clear the persistent reference. The heap is then
    /// re-marked and swept, so anything the request callbacks allocated
    /// survives.
    pub fn run_collection(&mut self, budget: Option<usize>) -> CollectionOutcome {
        let weak = self.handles.lock().unwrap().weak_candidates();
        let roots = self.collection_roots();
        let marked = self.heap.mark(roots);

        let mut outcome = CollectionOutcome { done: true, ..Default::default() };
        let mut callback = self.gc_callback.take();
        for (hid, v) in weak {
            if marked.get(v.raw() as usize).copied().unwrap_or(false) {
                continue;
            }
            if let Some(limit) = budget
                && outcome.requests >= limit
            {
                outcome.done = false;
                break;
            }
            outcome.requests += 1;

            let object_id = self
                .handles
                .lock()
                .unwrap()
                .proxy(hid)
                .map(|p| p.object_id())
                .unwrap_or(ObjectId::NONE);
            let approved = match (&mut callback, object_id.is_some()) {
                (Some(cb), true) => cb(self, hid),
                _ => true,
            };
            if approved {
                let mut table = self.handles.lock().unwrap();
                if let Ok(proxy) = table.proxy_mut(hid) {
                    proxy.clear_persistent();
                }
            }
        }
        self.gc_callback = callback;

        let roots = self.collection_roots();
        let marked = self.heap.mark(roots);
        outcome.swept = self.heap.sweep(&marked);
        log::trace!(
            "{}: collection swept {} values ({} requests)",
            self.id,
            outcome.swept,
            outcome.requests
        );
        outcome
    }

    // ------------------------------------------------------------------
    // Teardown

    /// Tear the engine down. Outstanding host wrappers stay valid to drop;
    /// their releases degrade to bookkeeping once this runs.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.gc_callback = None;
        self.handles.lock().unwrap().mark_engine_disposed();
        log::debug!("{} disposed", self.id);
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
