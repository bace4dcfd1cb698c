//! Native side of the rivet bridge.
//!
//! This crate is the script engine half of the system: a value heap with
//! mark/sweep collection, recycled handle proxies over persistent values,
//! object and function templates with host interceptors, and a small script
//! evaluator. The host half (the `rivet` crate) layers object identity,
//! wrapper lifetimes, and background reclamation on top of this surface.
//!
//! Nothing here knows about host objects beyond their integer IDs; the
//! boundary currency is [`ids::ObjectId`] and [`heap::ValueRef`].

pub mod engine;
pub mod error;
pub mod heap;
pub mod ids;
pub mod proxy;
pub mod script;
pub mod template;
pub mod value;
pub mod value_type;

pub use engine::{CollectionOutcome, GcRequestCallback, NativeEngine, OBJECT_ID_HIDDEN_KEY};
pub use error::{NativeError, NativeResult};
pub use heap::{Heap, ValueRef};
pub use ids::{EngineId, HandleId, ObjectId, TemplateId};
pub use proxy::{Disposal, HandleProxy, HandleTable, ReleaseAction, classify};
pub use script::{FaultKind, ScriptFault};
pub use template::{
    Accessor, AccessorGetter, AccessorInfo, AccessorSetter, FunctionCall, FunctionCallback,
    IndexedInterceptors, NamedInterceptors,
};
pub use value::{FunctionData, InternalFields, JsValue, ObjectData, Snapshot};
pub use value_type::{JsValueType, PropertyAttributes};
