//! Host side of the rivet bridge.
//!
//! This crate correlates two garbage collectors that know nothing about
//! each other: the host's (which collects [`ScriptObject`] wrappers) and
//! the script engine's (which collects the values those wrappers shadow).
//! An object is reclaimed only after both sides agree it is unreachable;
//! a background worker carries the hand-off between them.
//!
//! The native half lives in `rivet-core`. Entry point here is
//! [`Engine`]: create values as [`Handle`]s, project host state into
//! scripts with [`ObjectTemplate`]/[`FunctionTemplate`], and implement
//! [`HostObject`] to give a script object host-side behavior.

pub mod engine;
pub mod error;
pub mod handle;
pub mod index;
pub mod object;
pub mod template;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use engine::Engine;
pub use error::{BridgeError, BridgeResult};
pub use handle::{Handle, HandleLike, InternalHandle};
pub use index::{GcState, ObjectIndex};
pub use object::{DynamicProperties, HostObject, ObjectStamp, ScriptObject};
pub use template::{FunctionTemplate, ObjectTemplate, PropertyGetter, PropertySetter};
pub use worker::ReclamationWorker;

// Native-side vocabulary that crosses the boundary.
pub use rivet_core::{
    EngineId, FaultKind, HandleId, JsValueType, ObjectId, PropertyAttributes, ScriptFault,
    Snapshot, TemplateId,
};

pub mod prelude {
    pub use crate::engine::Engine;
    pub use crate::error::{BridgeError, BridgeResult};
    pub use crate::handle::{Handle, HandleLike, InternalHandle};
    pub use crate::index::GcState;
    pub use crate::object::{DynamicProperties, HostObject, ObjectStamp, ScriptObject};
    pub use crate::template::{FunctionTemplate, ObjectTemplate, PropertyGetter, PropertySetter};
    pub use rivet_core::{FaultKind, JsValueType, PropertyAttributes, Snapshot};
}
