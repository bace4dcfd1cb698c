//! Native template records and the interceptor callback surface.
//!
//! Templates are native-object factories. Registering interceptors is
//! opt-in per template: it routes every property access on created objects
//! through the host, which costs a round-trip per access. Templates without
//! interceptors store properties natively with no host involvement.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::engine::NativeEngine;
use crate::heap::ValueRef;
use crate::ids::{ObjectId, TemplateId};
use crate::value_type::PropertyAttributes;

/// Context handed to every interceptor and accessor invocation.
#[derive(Debug, Clone, Copy)]
pub struct AccessorInfo {
    /// The receiver object.
    pub this: ValueRef,
    /// Host object ID recovered from the receiver's internal state.
    pub object_id: ObjectId,
    pub template: TemplateId,
}

/// Named-property interceptors.
///
/// Every method answers `None` for "not intercepted": the engine then falls
/// back to native property storage. Implementations must answer `None`
/// (never fail) when their backing host object no longer exists; these
/// races are expected under concurrent collection.
pub trait NamedInterceptors: Send + Sync {
    fn get(&self, engine: &mut NativeEngine, info: &AccessorInfo, name: &str) -> Option<ValueRef>;
    fn set(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        name: &str,
        value: ValueRef,
    ) -> Option<ValueRef>;
    fn query(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        name: &str,
    ) -> Option<PropertyAttributes>;
    fn delete(&self, engine: &mut NativeEngine, info: &AccessorInfo, name: &str) -> Option<bool>;
    fn enumerate(&self, engine: &mut NativeEngine, info: &AccessorInfo) -> Option<Vec<String>>;
}

/// Indexed-property interceptors; same neutrality contract as
/// [`NamedInterceptors`].
pub trait IndexedInterceptors: Send + Sync {
    fn get(&self, engine: &mut NativeEngine, info: &AccessorInfo, index: u32) -> Option<ValueRef>;
    fn set(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        index: u32,
        value: ValueRef,
    ) -> Option<ValueRef>;
    fn query(
        &self,
        engine: &mut NativeEngine,
        info: &AccessorInfo,
        index: u32,
    ) -> Option<PropertyAttributes>;
    fn delete(&self, engine: &mut NativeEngine, info: &AccessorInfo, index: u32) -> Option<bool>;
    fn enumerate(&self, engine: &mut NativeEngine, info: &AccessorInfo) -> Option<Vec<u32>>;
}

pub type AccessorGetter =
    Arc<dyn Fn(&mut NativeEngine, &AccessorInfo, &str) -> Option<ValueRef> + Send + Sync>;
pub type AccessorSetter =
    Arc<dyn Fn(&mut NativeEngine, &AccessorInfo, &str, ValueRef) -> Option<ValueRef> + Send + Sync>;

/// A named accessor pair registered for one specific object.
#[derive(Clone)]
pub struct Accessor {
    pub getter: Option<AccessorGetter>,
    pub setter: Option<AccessorSetter>,
    pub attributes: PropertyAttributes,
}

/// Arguments for one script-function invocation.
pub struct FunctionCall<'a> {
    pub this: ValueRef,
    pub is_construct: bool,
    pub args: &'a [ValueRef],
}

/// Invocation thunk for the single native function a function template
/// owns. `None` means no bound host view handled the call.
pub type FunctionCallback =
    Arc<dyn Fn(&mut NativeEngine, FunctionCall<'_>) -> Option<ValueRef> + Send + Sync>;

pub(crate) struct ObjectTemplateRec {
    pub(crate) named: Option<Arc<dyn NamedInterceptors>>,
    pub(crate) indexed: Option<Arc<dyn IndexedInterceptors>>,
    pub(crate) defaults: Vec<(String, ValueRef, PropertyAttributes)>,
    pub(crate) accessors: FxHashMap<(i32, String), Accessor>,
}

impl ObjectTemplateRec {
    pub(crate) fn new() -> Self {
        Self {
            named: None,
            indexed: None,
            defaults: Vec::new(),
            accessors: FxHashMap::default(),
        }
    }

    pub(crate) fn has_interceptors(&self) -> bool {
        self.named.is_some() || self.indexed.is_some()
    }

    pub(crate) fn clear_accessors(&mut self, object_id: ObjectId) {
        self.accessors.retain(|(raw, _), _| *raw != object_id.raw());
    }

    pub(crate) fn accessor(&self, object_id: ObjectId, name: &str) -> Option<&Accessor> {
        self.accessors.get(&(object_id.raw(), name.to_string()))
    }
}

pub(crate) struct FunctionTemplateRec {
    pub(crate) class_name: String,
    /// Object template applied to instances created through this template.
    pub(crate) instance_template: TemplateId,
    pub(crate) prototype_template: TemplateId,
    pub(crate) callback: Option<FunctionCallback>,
    /// The one native function object; at most one exists per template.
    pub(crate) function: Option<ValueRef>,
}

impl FunctionTemplateRec {
    pub(crate) fn new(
        class_name: String,
        instance_template: TemplateId,
        prototype_template: TemplateId,
    ) -> Self {
        Self {
            class_name,
            instance_template,
            prototype_template,
            callback: None,
            function: None,
        }
    }
}
