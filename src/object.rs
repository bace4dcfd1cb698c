//! Host object wrappers and the behavior traits they carry.
//!
//! A [`ScriptObject`] is a strong, clonable view over one engine object.
//! When the last clone drops, a guard notifies the object index that the
//! wrapper side is unreachable; this is the host-collector half of the
//! two-collector retirement handshake. The notification can be suppressed
//! once explicit cleanup has already run.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use rivet_core::{ObjectId, PropertyAttributes, Snapshot};

use crate::handle::Handle;
use crate::index::ObjectIndex;

/// Generation-tagged object identity.
///
/// Index slots are recycled; the generation makes a stamp held across a
/// retirement detectably stale instead of silently resolving to whatever
/// object reused the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectStamp {
    pub id: ObjectId,
    pub generation: u64,
}

/// Dynamic-property capability for host objects that want script property
/// access routed to them through template interceptors.
///
/// Every method answers "not handled" (`None`, or `false` for `set`) to
/// fall back to native property storage. Implementations must not call
/// back into the engine; they run inside it.
pub trait DynamicProperties: Send + Sync {
    fn get(&self, name: &str) -> Option<Snapshot>;

    /// Returns true when the write was handled.
    fn set(&self, name: &str, value: Snapshot) -> bool;

    fn delete(&self, name: &str) -> Option<bool> {
        let _ = name;
        None
    }

    fn query(&self, name: &str) -> Option<PropertyAttributes> {
        self.get(name).map(|_| PropertyAttributes::NONE)
    }

    fn names(&self) -> Option<Vec<String>> {
        None
    }

    fn get_index(&self, index: u32) -> Option<Snapshot> {
        let _ = index;
        None
    }

    fn set_index(&self, index: u32, value: Snapshot) -> bool {
        let _ = (index, value);
        false
    }

    fn delete_index(&self, index: u32) -> Option<bool> {
        let _ = index;
        None
    }

    fn indices(&self) -> Option<Vec<u32>> {
        None
    }
}

/// Behavior attached to a script-visible host object.
///
/// The index keeps a strong reference to the behavior for the object's
/// whole native lifetime, so `dispose` runs exactly once at retirement even
/// if every wrapper was collected long before. Hooks run with engine or
/// index locks held and must not call back into the engine.
pub trait HostObject: Any + Send + Sync {
    /// Called once, right after the wrapper is first materialized.
    fn initialize(&self, object: &ScriptObject) {
        let _ = object;
    }

    /// User-overridable cleanup hook; invoked exactly once at retirement.
    fn dispose(&self) {}

    /// Opt into script property interception. Costs a host round-trip per
    /// property access on interceptor-enabled templates.
    fn dynamic(&self) -> Option<&dyn DynamicProperties> {
        None
    }

    /// Invocation hook for function-template bindings. `None` declines the
    /// call so later (older) bindings get a chance.
    fn call(&self, args: &[Snapshot], is_construct: bool) -> Option<Snapshot> {
        let _ = (args, is_construct);
        None
    }
}

/// Shared state behind every clone of one wrapper.
pub(crate) struct ObjectShared {
    pub(crate) stamp: ObjectStamp,
    pub(crate) behavior: Arc<dyn HostObject>,
    /// The wrapper's own proxy reference; dropped after the guard fires,
    /// which is what pushes an object-backed proxy down to the index's
    /// single remaining vote.
    pub(crate) handle: Handle,
    pub(crate) index: Weak<ObjectIndex>,
    pub(crate) suppressed: AtomicBool,
}

impl ObjectShared {
    pub(crate) fn suppress_notification(&self) {
        self.suppressed.store(true, Ordering::Release);
    }
}

impl Drop for ObjectShared {
    fn drop(&mut self) {
        if !self.suppressed.load(Ordering::Acquire)
            && let Some(index) = self.index.upgrade()
        {
            index.wrapper_collected(self.stamp);
        }
    }
}

/// Strong host-side view of one engine object.
#[derive(Clone)]
pub struct ScriptObject {
    shared: Arc<ObjectShared>,
}

impl ScriptObject {
    pub(crate) fn from_shared(shared: Arc<ObjectShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> ObjectId {
        self.shared.stamp.id
    }

    pub fn stamp(&self) -> ObjectStamp {
        self.shared.stamp
    }

    /// The wrapper's durable handle to the underlying engine object.
    pub fn handle(&self) -> &Handle {
        &self.shared.handle
    }

    pub fn behavior(&self) -> &Arc<dyn HostObject> {
        &self.shared.behavior
    }

    /// Downcast the behavior to its concrete type.
    pub fn behavior_as<T: HostObject>(&self) -> Option<&T> {
        let any: &dyn Any = &*self.shared.behavior;
        any.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptObject")
            .field("id", &self.shared.stamp.id)
            .field("generation", &self.shared.stamp.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;
    impl HostObject for Inert {}

    struct Pairs;
    impl DynamicProperties for Pairs {
        fn get(&self, name: &str) -> Option<Snapshot> {
            (name == "known").then(|| Snapshot::Integer(1))
        }
        fn set(&self, _: &str, _: Snapshot) -> bool {
            false
        }
    }

    #[test]
    fn behavior_defaults_are_neutral() {
        let inert = Inert;
        assert!(inert.dynamic().is_none());
        assert!(inert.call(&[], false).is_none());
    }

    #[test]
    fn query_defaults_to_get_presence() {
        let p = Pairs;
        assert_eq!(p.query("known"), Some(PropertyAttributes::NONE));
        assert_eq!(p.query("unknown"), None);
        assert_eq!(p.delete("known"), None);
    }

    #[test]
    fn stamps_compare_by_slot_and_generation() {
        let a = ObjectStamp { id: ObjectId::new(1), generation: 1 };
        let b = ObjectStamp { id: ObjectId::new(1), generation: 2 };
        assert_ne!(a, b);
        assert_eq!(a, ObjectStamp { id: ObjectId::new(1), generation: 1 });
    }
}
