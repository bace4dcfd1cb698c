//! Host template surface and the interceptor bridges behind it.
//!
//! Templates are created through the [`crate::engine::Engine`] facade and
//! keep only weak links back to it, so holding a template never keeps an
//! engine alive. Interceptor registration is opt-in per object template:
//! it routes every script property access on created objects through the
//! index to the host object's dynamic-property capability, at the cost of
//! one host round-trip per access. When the index no longer resolves the
//! object (collected, retired, slot reused), every bridge answers "not
//! intercepted" so the engine falls back to native storage instead of
//! faulting mid-script.

use std::any::{Any, TypeId};
use std::sync::{Arc, Mutex, Weak};

use rivet_core::{
    Accessor, AccessorInfo, EngineId, HandleTable, IndexedInterceptors, JsValue, NamedInterceptors,
    NativeEngine, PropertyAttributes, Snapshot, TemplateId, ValueRef,
};

use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Handle, HandleCtx, HandleLike, InternalHandle};
use crate::index::ObjectIndex;
use crate::object::{ObjectStamp, ScriptObject};

/// Host-side accessor callbacks, working in snapshot currency.
pub type PropertyGetter = Arc<dyn Fn(&str) -> Snapshot + Send + Sync>;
pub type PropertySetter = Arc<dyn Fn(&str, Snapshot) + Send + Sync>;

pub(crate) fn value_from_snapshot(engine: &mut NativeEngine, snapshot: &Snapshot) -> ValueRef {
    let value = match snapshot {
        Snapshot::Unset => JsValue::Undefined,
        Snapshot::Boolean(b) => JsValue::Boolean(*b),
        Snapshot::Integer(i) => match i32::try_from(*i) {
            Ok(i) => JsValue::Int32(i),
            Err(_) => JsValue::Number(*i as f64),
        },
        Snapshot::Number(n) => JsValue::Number(*n),
        Snapshot::Str(s) => JsValue::Str(s.clone()),
        Snapshot::Date(ms) => JsValue::Date(*ms),
    };
    engine.alloc_value(value)
}

// ----------------------------------------------------------------------
// Interceptor bridges

pub(crate) struct NamedBridge {
    pub(crate) index: Arc<ObjectIndex>,
}

impl NamedBridge {
    fn dynamic_call<T>(
        &self,
        info: &AccessorInfo,
        f: impl FnOnce(&dyn crate::object::DynamicProperties) -> Option<T>,
    ) -> Option<T> {
        let behavior = self.index.behavior_of(info.object_id)?;
        let result = f(behavior.dynamic()?);
        result
    }
}

impl NamedInterceptors for NamedBridge {
    #[cfg_attr(feature = "profiling", profiling::function)]
    fn get(&self, engine: &mut NativeEngine, info: &AccessorInfo, name: &str) -> Option<ValueRef> {
        let snapshot = self.dynamic_call(info, |d| d.get(name))?;
        Some(value_from_snapshot(engine, &snapshot))
    }

    fn set(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        name: &str,
        value: ValueRef,
    ) -> Option<ValueRef> {
        let snapshot = engine.snapshot_of(value);
        let handled = self.dynamic_call(info, |d| d.set(name, snapshot).then_some(()));
        handled.map(|()| value)
    }

    fn query(
        &self,
        _engine: &mut NativeEngine,
        info: &AccessorInfo,
        name: &str,
    ) -> Option<PropertyAttributes> {
        self.dynamic_call(info, |d| d.query(name))
    }

    fn delete(&self, _engine: &mut NativeEngine, info: &AccessorInfo, name: &str) -> Option<bool> {
        self.dynamic_call(info, |d| d.delete(name))
    }

    fn enumerate(&self, _engine: &mut NativeEngine, info: &AccessorInfo) -> Option<Vec<String>> {
        self.dynamic_call(info, |d| d.names())
    }
}

pub(crate) struct IndexedBridge {
    pub(crate) index: Arc<ObjectIndex>,
}

impl IndexedBridge {
    fn dynamic_call<T>(
        &self,
        info: &AccessorInfo,
        f: impl FnOnce(&dyn crate::object::DynamicProperties) -> Option<T>,
    ) -> Option<T> {
        let behavior = self.index.behavior_of(info.object_id)?;
        let result = f(behavior.dynamic()?);
        result
    }
}

impl IndexedInterceptors for IndexedBridge {
    fn get(&self, engine: &mut NativeEngine, info: &AccessorInfo, index: u32) -> Option<ValueRef> {
        let snapshot = self.dynamic_call(info, |d| d.get_index(index))?;
        Some(value_from_snapshot(engine, &snapshot))
    }

    fn set(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        index: u32,
        value: ValueRef,
    ) -> Option<ValueRef> {
        let snapshot = engine.snapshot_of(value);
        let handled = self.dynamic_call(info, |d| d.set_index(index, snapshot).then_some(()));
        handled.map(|()| value)
    }

    fn query(
        &self,
        _engine: &mut NativeEngine,
        info: &AccessorInfo,
        index: u32,
    ) -> Option<PropertyAttributes> {
        self.dynamic_call(info, |d| {
            d.get_index(index).map(|_| PropertyAttributes::NONE)
        })
    }

    fn delete(&self, _engine: &mut NativeEngine, info: &AccessorInfo, index: u32) -> Option<bool> {
        self.dynamic_call(info, |d| d.delete_index(index))
    }

    fn enumerate(&self, _engine: &mut NativeEngine, info: &AccessorInfo) -> Option<Vec<u32>> {
        self.dynamic_call(info, |d| d.indices())
    }
}

// ----------------------------------------------------------------------
// Templates

struct TemplateLink {
    engine: EngineId,
    native: Weak<Mutex<NativeEngine>>,
    table: Arc<Mutex<HandleTable>>,
    index: Arc<ObjectIndex>,
}

impl TemplateLink {
    fn native(&self) -> BridgeResult<Arc<Mutex<NativeEngine>>> {
        self.native.upgrade().ok_or(BridgeError::EngineGone(self.engine))
    }

    fn handle_ctx(&self) -> HandleCtx {
        HandleCtx {
            engine: self.engine,
            native: self.native.clone(),
            table: Arc::clone(&self.table),
            index: Arc::clone(&self.index),
        }
    }
}

/// Factory for native objects sharing one interceptor/default-property
/// configuration.
#[derive(Clone)]
pub struct ObjectTemplate {
    link: Arc<TemplateLink>,
    id: TemplateId,
}

impl ObjectTemplate {
    pub(crate) fn new(
        engine: EngineId,
        native: Weak<Mutex<NativeEngine>>,
        table: Arc<Mutex<HandleTable>>,
        index: Arc<ObjectIndex>,
        id: TemplateId,
    ) -> Self {
        Self { link: Arc::new(TemplateLink { engine, native, table, index }), id }
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// Route property access on objects created from this template through
    /// their host object's dynamic-property capability.
    pub fn enable_interceptors(&self) -> BridgeResult<()> {
        let native = self.link.native()?;
        let mut native = native.lock().unwrap();
        native.register_named_interceptors(
            self.id,
            Arc::new(NamedBridge { index: Arc::clone(&self.link.index) }),
        )?;
        native.register_indexed_interceptors(
            self.id,
            Arc::new(IndexedBridge { index: Arc::clone(&self.link.index) }),
        )?;
        Ok(())
    }

    /// Back to the fast path: properties stored natively, no host
    /// involvement.
    pub fn disable_interceptors(&self) -> BridgeResult<()> {
        let native = self.link.native()?;
        let mut native = native.lock().unwrap();
        native.unregister_named_interceptors(self.id)?;
        native.unregister_indexed_interceptors(self.id)?;
        Ok(())
    }

    pub fn has_interceptors(&self) -> BridgeResult<bool> {
        let native = self.link.native()?;
        let has = native.lock().unwrap().template_has_interceptors(self.id)?;
        Ok(has)
    }

    /// Register a default property stamped onto every created object.
    pub fn set_property(
        &self,
        name: &str,
        value: &impl HandleLike,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let native = self.link.native()?;
        native.lock().unwrap().set_template_property(self.id, name, value.id(), attributes)?;
        Ok(())
    }

    /// Register a named accessor pair for one specific object created from
    /// this template. The object is upgraded to the confirm-required
    /// retirement path so the accessors are cleared before its slot is
    /// reused.
    pub fn set_accessor(
        &self,
        object: &ScriptObject,
        name: &str,
        getter: Option<PropertyGetter>,
        setter: Option<PropertySetter>,
        attributes: PropertyAttributes,
    ) -> BridgeResult<()> {
        let accessor = Accessor {
            getter: getter.map(|g| {
                let bridged: rivet_core::AccessorGetter =
                    Arc::new(move |engine: &mut NativeEngine, _info: &AccessorInfo, name: &str| {
                        Some(value_from_snapshot(engine, &g(name)))
                    });
                bridged
            }),
            setter: setter.map(|s| {
                let bridged: rivet_core::AccessorSetter = Arc::new(
                    move |engine: &mut NativeEngine,
                          _info: &AccessorInfo,
                          name: &str,
                          value: ValueRef| {
                        s(name, engine.snapshot_of(value));
                        None
                    },
                );
                bridged
            }),
            attributes,
        };
        let native = self.link.native()?;
        native.lock().unwrap().set_accessor(self.id, object.id(), name, accessor)?;
        self.link.index.mark_needs_confirm(object.id());
        Ok(())
    }
}

/// One script-visible function, projectable as multiple independent host
/// views.
///
/// At most one native function object ever exists per template. Host
/// objects bind as views keyed by their concrete behavior type; a call
/// walks the bindings newest first and the first view producing a result
/// wins.
#[derive(Clone)]
pub struct FunctionTemplate {
    link: Arc<TemplateLink>,
    id: TemplateId,
    bindings: Arc<Mutex<Vec<(TypeId, ObjectStamp)>>>,
}

impl FunctionTemplate {
    pub(crate) fn new(
        engine: EngineId,
        native_arc: &Arc<Mutex<NativeEngine>>,
        table: Arc<Mutex<HandleTable>>,
        index: Arc<ObjectIndex>,
        class_name: &str,
    ) -> BridgeResult<Self> {
        let bindings: Arc<Mutex<Vec<(TypeId, ObjectStamp)>>> = Arc::new(Mutex::new(Vec::new()));
        let id = {
            let mut native = native_arc.lock().unwrap();
            let id = native.create_function_template(class_name);
            let dispatch_bindings = Arc::clone(&bindings);
            let dispatch_index = Arc::clone(&index);
            native.set_function_callback(
                id,
                Arc::new(move |engine, call| {
                    let args: Vec<Snapshot> =
                        call.args.iter().map(|a| engine.snapshot_of(*a)).collect();
                    let bound: Vec<(TypeId, ObjectStamp)> =
                        dispatch_bindings.lock().unwrap().clone();
                    for (_, stamp) in bound.iter().rev() {
                        let Some(behavior) = dispatch_index.behavior_for(*stamp) else {
                            continue;
                        };
                        if let Some(result) = behavior.call(&args, call.is_construct) {
                            return Some(value_from_snapshot(engine, &result));
                        }
                    }
                    None
                }),
            )?;
            id
        };
        Ok(Self {
            link: Arc::new(TemplateLink {
                engine,
                native: Arc::downgrade(native_arc),
                table,
                index,
            }),
            id,
            bindings,
        })
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    /// The object template applied to instances this template constructs.
    pub fn instance_template(&self) -> BridgeResult<ObjectTemplate> {
        let native = self.link.native()?;
        let instance = native.lock().unwrap().instance_template_of(self.id)?;
        Ok(ObjectTemplate { link: Arc::clone(&self.link), id: instance })
    }

    /// A durable handle to the single shared native function object.
    /// Enters its own value scopes, so no scope needs to be open.
    pub fn function(&self) -> BridgeResult<Handle> {
        let native = self.link.native()?;
        let handle_id = {
            let mut native = native.lock().unwrap();
            native.enter_isolate_scope();
            if let Err(e) = native.enter_context_scope() {
                native.exit_isolate_scope();
                return Err(e.into());
            }
            let result = native.get_function(self.id);
            native.exit_context_scope();
            native.exit_isolate_scope();
            result?
        };
        Ok(InternalHandle::bind(self.link.handle_ctx(), handle_id).keep())
    }

    /// Bind a host object as a view of this function. Newer bindings are
    /// consulted first when the function is invoked.
    pub fn bind(&self, object: &ScriptObject) {
        let type_id = {
            let any: &dyn Any = &**object.behavior();
            any.type_id()
        };
        let mut bindings = self.bindings.lock().unwrap();
        // Stale views from retired objects are pruned opportunistically.
        bindings.retain(|(_, stamp)| self.link.index.behavior_for(*stamp).is_some());
        bindings.retain(|(t, _)| *t != type_id);
        bindings.push((type_id, object.stamp()));
    }

    pub fn unbind_type<T: 'static>(&self) {
        let type_id = TypeId::of::<T>();
        self.bindings.lock().unwrap().retain(|(t, _)| *t != type_id);
    }

    pub fn bound_views(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{DynamicProperties, HostObject};
    use crate::testutil::{Probe, Rig};
    use rivet_core::ObjectId;

    struct Dyn;
    impl DynamicProperties for Dyn {
        fn get(&self, name: &str) -> Option<Snapshot> {
            (name == "answer").then(|| Snapshot::Integer(42))
        }
        fn set(&self, name: &str, _value: Snapshot) -> bool {
            name == "answer"
        }
        fn names(&self) -> Option<Vec<String>> {
            Some(vec!["answer".to_string()])
        }
    }

    struct WithDyn(Dyn);
    impl HostObject for WithDyn {
        fn dynamic(&self) -> Option<&dyn DynamicProperties> {
            Some(&self.0)
        }
    }

    fn info_for(native: &mut NativeEngine, id: i32) -> AccessorInfo {
        AccessorInfo {
            this: native.alloc_value(JsValue::Undefined),
            object_id: ObjectId::new(id),
            template: TemplateId::new(0),
        }
    }

    #[test]
    fn named_bridge_is_neutral_for_missing_objects() {
        let rig = Rig::new();
        let bridge = NamedBridge { index: Arc::clone(&rig.index) };
        let mut native = rig.native.lock().unwrap();
        let info = info_for(&mut native, 99);
        assert!(bridge.get(&mut native, &info, "x").is_none());
        let v = native.alloc_value(JsValue::Int32(1));
        assert!(bridge.set(&mut native, &info, "x", v).is_none());
        assert!(bridge.query(&mut native, &info, "x").is_none());
        assert!(bridge.delete(&mut native, &info, "x").is_none());
        assert!(bridge.enumerate(&mut native, &info).is_none());
    }

    #[test]
    fn indexed_bridge_is_neutral_for_missing_objects() {
        let rig = Rig::new();
        let bridge = IndexedBridge { index: Arc::clone(&rig.index) };
        let mut native = rig.native.lock().unwrap();
        let info = info_for(&mut native, 99);
        assert!(bridge.get(&mut native, &info, 0).is_none());
        let v = native.alloc_value(JsValue::Int32(1));
        assert!(bridge.set(&mut native, &info, 0, v).is_none());
        assert!(bridge.query(&mut native, &info, 0).is_none());
        assert!(bridge.delete(&mut native, &info, 0).is_none());
        assert!(bridge.enumerate(&mut native, &info).is_none());
    }

    #[test]
    fn named_bridge_routes_to_dynamic_properties() {
        let rig = Rig::new();
        let object = rig.make_object_with(Arc::new(WithDyn(Dyn)), None, true);
        let bridge = NamedBridge { index: Arc::clone(&rig.index) };
        let mut native = rig.native.lock().unwrap();
        let info = AccessorInfo {
            this: native.alloc_value(JsValue::Undefined),
            object_id: object.id(),
            template: TemplateId::new(0),
        };
        let v = bridge.get(&mut native, &info, "answer").unwrap();
        assert_eq!(native.snapshot_of(v), Snapshot::Integer(42));
        assert!(bridge.get(&mut native, &info, "other").is_none());
        assert_eq!(bridge.enumerate(&mut native, &info), Some(vec!["answer".to_string()]));
    }

    #[test]
    fn objects_without_dynamic_capability_are_not_intercepted() {
        let rig = Rig::new();
        let object = rig.make_object_with(Arc::new(Probe), None, true);
        let bridge = NamedBridge { index: Arc::clone(&rig.index) };
        let mut native = rig.native.lock().unwrap();
        let info = AccessorInfo {
            this: native.alloc_value(JsValue::Undefined),
            object_id: object.id(),
            template: TemplateId::new(0),
        };
        assert!(bridge.get(&mut native, &info, "anything").is_none());
    }

    #[test]
    fn snapshot_conversion_covers_every_variant() {
        let rig = Rig::new();
        let mut native = rig.native.lock().unwrap();
        let cases = [
            Snapshot::Unset,
            Snapshot::Boolean(true),
            Snapshot::Integer(7),
            Snapshot::Integer(i64::MAX),
            Snapshot::Number(1.5),
            Snapshot::Str("s".to_string()),
            Snapshot::Date(12.0),
        ];
        for snapshot in cases {
            let v = value_from_snapshot(&mut native, &snapshot);
            match snapshot {
                Snapshot::Unset => assert_eq!(native.snapshot_of(v), Snapshot::Number(0.0)),
                Snapshot::Integer(i) if i32::try_from(i).is_err() => {
                    assert_eq!(native.snapshot_of(v), Snapshot::Number(i as f64));
                }
                other => assert_eq!(native.snapshot_of(v), other),
            }
        }
    }
}
