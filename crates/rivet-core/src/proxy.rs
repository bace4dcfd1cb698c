//! Handle proxies and the per-engine handle table.
//!
//! A [`HandleProxy`] represents one engine value across calls. Proxies are
//! cached and recycled rather than destroyed: disposal only transitions the
//! proxy back into the table's recycle list. The persistent value reference
//! is deliberately kept alive while cached and is only replaced when the
//! slot is re-initialized, so disposal never needs to touch the heap and is
//! safe to run from threads that must not enter the engine.

use crate::error::{NativeError, NativeResult};
use crate::heap::{Heap, ValueRef};
use crate::ids::{EngineId, HandleId, ObjectId};
use crate::value::Snapshot;
use crate::value_type::JsValueType;

/// Disposal tri-state of a handle proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// In use by at least one host wrapper or about to be.
    Active,
    /// Host-side disposal in progress.
    Pending,
    /// Virtually disposed; parked in the recycle list for reuse.
    Cached,
}

/// Outcome of releasing one host reference, reported to the caller so it
/// can notify the object index *after* the table lock has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAction {
    /// References remain; nothing to do.
    None,
    /// Only the object index's own reference remains: the handle side of
    /// the identified object is now weak.
    NotifyObjectWeak(ObjectId),
    /// The last reference is gone and the proxy was returned to the cache.
    Cached,
}

/// Classify a heap value into its boundary type tag.
///
/// The predicate order matters: several predicates overlap (a function also
/// satisfies the generic object check), so the first match wins.
pub fn classify(heap: &Heap, value: ValueRef) -> JsValueType {
    let Some(v) = heap.get(value) else {
        return JsValueType::Undefined;
    };
    if v.is_boolean() {
        JsValueType::Boolean
    } else if v.is_boolean_object() {
        JsValueType::BooleanObject
    } else if v.is_int32() {
        JsValueType::Int32
    } else if v.is_number() {
        JsValueType::Number
    } else if v.is_number_object() {
        JsValueType::NumberObject
    } else if v.is_string() {
        JsValueType::String
    } else if v.is_string_object() {
        JsValueType::StringObject
    } else if v.is_date() {
        JsValueType::Date
    } else if v.is_array() {
        JsValueType::Array
    } else if v.is_regexp() {
        JsValueType::RegExp
    } else if v.is_null() {
        JsValueType::Null
    } else if v.is_function() {
        JsValueType::Function
    } else if v.is_undefined() {
        JsValueType::Undefined
    } else if v.is_object() {
        // Keep this after every specific object check.
        JsValueType::Object
    } else {
        JsValueType::Undefined
    }
}

#[derive(Debug)]
pub struct HandleProxy {
    id: HandleId,
    engine: EngineId,
    value_type: JsValueType,
    object_id: ObjectId,
    managed_refs: u32,
    disposal: Disposal,
    persistent: Option<ValueRef>,
    weak: bool,
    snapshot: Snapshot,
}

impl HandleProxy {
    fn new(id: HandleId, engine: EngineId, value: ValueRef, value_type: JsValueType) -> Self {
        Self {
            id,
            engine,
            value_type,
            object_id: ObjectId::NONE,
            managed_refs: 0,
            disposal: Disposal::Active,
            persistent: Some(value),
            weak: false,
            snapshot: Snapshot::Unset,
        }
    }

    /// Rebind a recycled proxy to a fresh value. The previous persistent
    /// reference is dropped here and nowhere else.
    fn initialize(&mut self, value: ValueRef, value_type: JsValueType) {
        self.value_type = value_type;
        self.object_id = ObjectId::NONE;
        self.managed_refs = 0;
        self.disposal = Disposal::Active;
        self.persistent = Some(value);
        self.weak = false;
        self.snapshot = Snapshot::Unset;
    }

    #[inline]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[inline]
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    #[inline]
    pub fn value_type(&self) -> JsValueType {
        self.value_type
    }

    /// Error results reuse the value machinery with a negative tag, so the
    /// tag can be overridden after acquisition.
    pub(crate) fn set_value_type(&mut self, value_type: JsValueType) {
        self.value_type = value_type;
    }

    #[inline]
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub(crate) fn set_object_id(&mut self, id: ObjectId) {
        self.object_id = id;
    }

    #[inline]
    pub fn managed_refs(&self) -> u32 {
        self.managed_refs
    }

    #[inline]
    pub fn disposal(&self) -> Disposal {
        self.disposal
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.value_type.is_error()
    }

    /// The persisted value reference, if the engine collector has not
    /// reclaimed it.
    #[inline]
    pub fn persistent(&self) -> Option<ValueRef> {
        self.persistent
    }

    #[inline]
    pub fn is_weak(&self) -> bool {
        self.weak
    }

    /// Allow the engine collector to reclaim the underlying value. Invoked
    /// only from the reclamation worker.
    pub fn make_weak(&mut self) {
        self.weak = true;
    }

    pub fn make_strong(&mut self) {
        self.weak = false;
    }

    pub(crate) fn clear_persistent(&mut self) {
        self.persistent = None;
        self.weak = false;
    }

    /// Last captured snapshot; [`Snapshot::Unset`] before any forced read.
    #[inline]
    pub fn last_value(&self) -> &Snapshot {
        &self.snapshot
    }

    pub(crate) fn set_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = snapshot;
    }
}

/// Dense table of all handle proxies for one engine, plus the recycle list.
///
/// Shared between the engine (which allocates) and host wrapper drops
/// (which release); the owner is expected to serialize access with a lock
/// and to perform no engine operation while holding it.
pub struct HandleTable {
    engine: EngineId,
    proxies: Vec<HandleProxy>,
    recycled: Vec<i32>,
    engine_disposed: bool,
}

impl HandleTable {
    pub fn new(engine: EngineId) -> Self {
        Self {
            engine,
            proxies: Vec::new(),
            recycled: Vec::new(),
            engine_disposed: false,
        }
    }

    #[inline]
    pub fn engine(&self) -> EngineId {
        self.engine
    }

    /// Total proxies ever allocated (recycled slots included).
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn cached_count(&self) -> usize {
        self.recycled.len()
    }

    /// Get an available proxy, or create a new one, for the given value.
    pub fn acquire(&mut self, value: ValueRef, value_type: JsValueType) -> HandleId {
        if let Some(raw) = self.recycled.pop() {
            let proxy = &mut self.proxies[raw as usize];
            proxy.initialize(value, value_type);
            proxy.id
        } else {
            let id = HandleId::new(self.proxies.len() as i32);
            self.proxies.push(HandleProxy::new(id, self.engine, value, value_type));
            log::trace!("{}: allocated {}", self.engine, id);
            id
        }
    }

    pub fn proxy(&self, id: HandleId) -> NativeResult<&HandleProxy> {
        self.proxies
            .get(id.index())
            .ok_or(NativeError::InvalidHandle(id))
    }

    pub fn proxy_mut(&mut self, id: HandleId) -> NativeResult<&mut HandleProxy> {
        self.proxies
            .get_mut(id.index())
            .ok_or(NativeError::InvalidHandle(id))
    }

    /// Bind one more host reference to the proxy.
    pub fn add_ref(&mut self, id: HandleId) -> NativeResult<u32> {
        let proxy = self.proxy_mut(id)?;
        proxy.managed_refs += 1;
        if proxy.disposal == Disposal::Pending {
            proxy.disposal = Disposal::Active;
        }
        Ok(proxy.managed_refs)
    }

    /// Release one host reference.
    ///
    /// The returned action tells the caller whether the object index must be
    /// notified; that notification must happen after this table's lock has
    /// been released.
    pub fn release(&mut self, id: HandleId) -> NativeResult<ReleaseAction> {
        let engine_disposed = self.engine_disposed;
        let proxy = self.proxy_mut(id)?;
        debug_assert!(proxy.managed_refs > 0, "reference count underflow on {id}");
        proxy.managed_refs = proxy.managed_refs.saturating_sub(1);

        if engine_disposed {
            // The engine is gone; degrade to pure bookkeeping.
            return Ok(ReleaseAction::None);
        }

        if proxy.managed_refs == 0 {
            self.dispose(id);
            return Ok(ReleaseAction::Cached);
        }
        let proxy = self.proxy(id)?;
        if proxy.managed_refs == 1 && proxy.object_id.is_some() {
            return Ok(ReleaseAction::NotifyObjectWeak(proxy.object_id));
        }
        Ok(ReleaseAction::None)
    }

    /// Return the proxy to the recycle cache. Idempotent; refuses while
    /// host references remain (a referenced proxy must never be cached).
    pub fn dispose(&mut self, id: HandleId) {
        let Ok(proxy) = self.proxy_mut(id) else { return };
        if proxy.managed_refs > 0 || proxy.disposal == Disposal::Cached {
            return;
        }
        proxy.disposal = Disposal::Cached;
        proxy.object_id = ObjectId::NONE;
        proxy.snapshot = Snapshot::Unset;
        proxy.weak = false;
        // The persistent reference stays put until the slot is reused.
        self.recycled.push(id.raw());
    }

    pub fn mark_engine_disposed(&mut self) {
        self.engine_disposed = true;
    }

    #[inline]
    pub fn is_engine_disposed(&self) -> bool {
        self.engine_disposed
    }

    /// Persistent references the collector must treat as roots: everything
    /// not explicitly marked weak (cached proxies root their stale value
    /// until the slot is reused).
    pub fn strong_roots(&self) -> Vec<ValueRef> {
        self.proxies
            .iter()
            .filter(|p| !p.weak)
            .filter_map(|p| p.persistent)
            .collect()
    }

    /// Weak persistents that are candidates for reclamation this cycle.
    pub fn weak_candidates(&self) -> Vec<(HandleId, ValueRef)> {
        self.proxies
            .iter()
            .filter(|p| p.weak)
            .filter_map(|p| p.persistent.map(|v| (p.id, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::JsValue;

    fn table_with_value() -> (Heap, HandleTable, HandleId) {
        let mut heap = Heap::new();
        let mut table = HandleTable::new(EngineId::new(0));
        let v = heap.alloc(JsValue::Int32(42));
        let id = table.acquire(v, classify(&heap, v));
        (heap, table, id)
    }

    #[test]
    fn classification_priority_order() {
        let mut heap = Heap::new();
        let f = heap.alloc(JsValue::Function(crate::value::FunctionData {
            name: "f".to_string(),
            template: crate::ids::TemplateId::new(0),
            data: crate::value::ObjectData::default(),
        }));
        // A function satisfies the generic object predicate too; the
        // specific check must win.
        assert_eq!(classify(&heap, f), JsValueType::Function);

        let n = heap.alloc(JsValue::Null);
        assert_eq!(classify(&heap, n), JsValueType::Null);

        let i = heap.alloc(JsValue::Int32(1));
        assert_eq!(classify(&heap, i), JsValueType::Int32);
    }

    #[test]
    fn release_to_zero_caches_proxy() {
        let (_heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        assert_eq!(table.release(id).unwrap(), ReleaseAction::Cached);
        assert_eq!(table.proxy(id).unwrap().disposal(), Disposal::Cached);
        assert_eq!(table.cached_count(), 1);
    }

    #[test]
    fn release_to_one_notifies_for_object_backed() {
        let (_heap, mut table, id) = table_with_value();
        table.proxy_mut(id).unwrap().set_object_id(ObjectId::new(5));
        table.add_ref(id).unwrap();
        table.add_ref(id).unwrap();
        assert_eq!(
            table.release(id).unwrap(),
            ReleaseAction::NotifyObjectWeak(ObjectId::new(5))
        );
        assert_eq!(table.proxy(id).unwrap().managed_refs(), 1);
    }

    #[test]
    fn referenced_proxy_is_never_cached() {
        let (_heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        table.dispose(id);
        assert_eq!(table.proxy(id).unwrap().disposal(), Disposal::Active);
        assert_eq!(table.cached_count(), 0);
    }

    #[test]
    fn recycled_slot_is_reused_lifo() {
        let (mut heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        table.release(id).unwrap();

        let v2 = heap.alloc(JsValue::Boolean(true));
        let id2 = table.acquire(v2, classify(&heap, v2));
        assert_eq!(id, id2);
        assert_eq!(table.proxy(id2).unwrap().value_type(), JsValueType::Boolean);
        assert_eq!(*table.proxy(id2).unwrap().last_value(), Snapshot::Unset);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn cached_proxy_still_roots_its_value() {
        let (_heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        table.release(id).unwrap();
        assert_eq!(table.strong_roots().len(), 1);
    }

    #[test]
    fn weak_proxies_are_candidates_not_roots() {
        let (_heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        table.proxy_mut(id).unwrap().make_weak();
        assert!(table.strong_roots().is_empty());
        assert_eq!(table.weak_candidates().len(), 1);
        table.proxy_mut(id).unwrap().make_strong();
        assert_eq!(table.strong_roots().len(), 1);
    }

    #[test]
    fn release_after_engine_disposal_degrades() {
        let (_heap, mut table, id) = table_with_value();
        table.add_ref(id).unwrap();
        table.mark_engine_disposed();
        assert_eq!(table.release(id).unwrap(), ReleaseAction::None);
        assert_eq!(table.cached_count(), 0);
    }
}
