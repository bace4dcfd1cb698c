//! The object identity index: the single source of truth correlating a
//! host wrapper, its native handle, and its owning template.
//!
//! Slots are dense and recycled through a free list; every slot carries a
//! generation counter so a stamp held across a retirement turns stale
//! instead of resolving to the slot's next tenant. Slot state and the
//! weak-promotion queue live under one lock because the reclamation worker
//! and arbitrary wrapper-drop threads touch both concurrently.
//!
//! Lock discipline: no engine operation is ever performed while the index
//! lock is held. Where nesting is unavoidable the global order is
//! engine, then index, then handle table. Retired records are finalized
//! (dispose hook, handle release) after the index lock has been dropped.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rivet_core::{HandleId, NativeEngine, ObjectId, TemplateId};

use crate::handle::{Handle, HandleLike, Sealed};
use crate::object::{HostObject, ObjectShared, ObjectStamp, ScriptObject};

/// Lifecycle of one object-info record.
///
/// Retirement requires two independent unreachability signals (host
/// wrapper collected, handle down to the index's own vote) and, for
/// interceptor-bearing objects, confirmation from the engine's collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// Wrapper reachable (or re-strengthened).
    Created,
    /// The host wrapper was collected; handles may still be held.
    WrapperWeak,
    /// Both signals hold; queued for the worker to promote the native
    /// handle to weak.
    Queued,
    /// Promoted weak; waiting for the engine collector's confirmation.
    AwaitingEngineGc,
    /// Slot freed; the stamp that observed this is permanently stale.
    Retired,
}

struct ObjectInfo {
    behavior: Arc<dyn HostObject>,
    wrapper: Weak<ObjectShared>,
    /// The index's own vote on the proxy; released at retirement.
    handle: Option<Handle>,
    template: Option<TemplateId>,
    /// Whether retirement must wait for the engine collector. True for
    /// objects whose template routes property access through the host.
    needs_native_confirm: bool,
    state: GcState,
    initialized: bool,
    /// Cached prototype wrapper, materialized on first request.
    prototype: Option<Handle>,
}

struct Slot {
    generation: u64,
    info: Option<ObjectInfo>,
}

#[derive(Default)]
struct IndexState {
    slots: Vec<Slot>,
    free: Vec<usize>,
    /// Weak-promotion queue, drained LIFO by the worker.
    queue: Vec<ObjectId>,
}

pub struct ObjectIndex {
    state: Mutex<IndexState>,
}

impl Default for ObjectIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self { state: Mutex::new(IndexState::default()) }
    }

    /// A panicking worker step poisons the mutex without leaving slot data
    /// half-written (transitions complete before any hook runs), so the
    /// poison marker is cleared instead of wedging later operations.
    fn lock(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate (or recycle) a slot for a new object.
    pub(crate) fn register(
        &self,
        behavior: Arc<dyn HostObject>,
        handle: Handle,
        template: Option<TemplateId>,
        needs_native_confirm: bool,
    ) -> ObjectStamp {
        let mut state = self.lock();
        let info = ObjectInfo {
            behavior,
            wrapper: Weak::new(),
            handle: Some(handle),
            template,
            needs_native_confirm,
            state: GcState::Created,
            initialized: false,
            prototype: None,
        };
        let slot_index = match state.free.pop() {
            Some(i) => {
                state.slots[i].info = Some(info);
                i
            }
            None => {
                state.slots.push(Slot { generation: 0, info: Some(info) });
                state.slots.len() - 1
            }
        };
        ObjectStamp {
            id: ObjectId::new(slot_index as i32),
            generation: state.slots[slot_index].generation,
        }
    }

    /// Attach the freshly built wrapper. Returns true the first time, so
    /// the caller runs the behavior's initialize hook exactly once.
    pub(crate) fn attach_wrapper(&self, stamp: ObjectStamp, wrapper: Weak<ObjectShared>) -> bool {
        let mut state = self.lock();
        let Some(info) = live_info(&mut state, stamp.id, Some(stamp.generation)) else {
            return false;
        };
        info.wrapper = wrapper;
        let first = !info.initialized;
        info.initialized = true;
        first
    }

    /// Host-collector signal: the last strong wrapper reference is gone.
    pub(crate) fn wrapper_collected(&self, stamp: ObjectStamp) {
        let mut state = self.lock();
        if let Some(info) = live_info(&mut state, stamp.id, Some(stamp.generation))
            && info.state == GcState::Created
        {
            info.state = GcState::WrapperWeak;
        }
    }

    /// Handle-side signal: only the index's own proxy reference remains.
    /// Interceptor-bearing objects queue for the worker; plain objects
    /// retire immediately since no third collector needs consulting.
    pub(crate) fn handle_weak(&self, id: ObjectId) {
        let finalize = {
            let mut state = self.lock();
            let Some(info) = live_info(&mut state, id, None) else {
                return;
            };
            if info.state != GcState::WrapperWeak {
                return;
            }
            if info.needs_native_confirm {
                info.state = GcState::Queued;
                state.queue.push(id);
                log::trace!("{id} queued for weak promotion");
                None
            } else {
                retire_slot(&mut state, id)
            }
        };
        if let Some(info) = finalize {
            finalize_retired(info, None, id);
        }
    }

    /// Pop the next queued record (LIFO), mark it awaiting the engine
    /// collector, and promote its native handle to weak. Entries whose
    /// record was re-strengthened in the meantime are skipped.
    pub(crate) fn promote_next(&self) -> Option<ObjectId> {
        let (id, handle_id, table) = {
            let mut state = self.lock();
            loop {
                let id = state.queue.pop()?;
                let Some(info) = live_info(&mut state, id, None) else {
                    continue;
                };
                if info.state != GcState::Queued {
                    continue;
                }
                info.state = GcState::AwaitingEngineGc;
                let handle = info.handle.as_ref().map(|h| (h.id(), h.ctx_of().table.clone()));
                if let Some((handle_id, table)) = handle {
                    break (id, handle_id, table);
                }
            }
        };
        if let Ok(proxy) = table.lock().unwrap().proxy_mut(handle_id) {
            proxy.make_weak();
        }
        log::trace!("{id} promoted weak ({handle_id})");
        Some(id)
    }

    /// Terminal step, invoked from the engine collector's request callback
    /// (engine lock already held by the caller). Approves reclamation and
    /// retires the record, or rejects it when the record was
    /// re-strengthened since promotion.
    pub(crate) fn on_native_gc(&self, engine: &mut NativeEngine, handle: HandleId) -> bool {
        let table = engine.handle_table();
        let object_id = match table.lock().unwrap().proxy(handle) {
            Ok(proxy) => proxy.object_id(),
            Err(_) => return true,
        };
        if !object_id.is_some() {
            return true;
        }

        let verdict = {
            let mut state = self.lock();
            let current = live_info(&mut state, object_id, None).map(|info| info.state);
            match current {
                None => Some(None),
                Some(GcState::Queued) | Some(GcState::AwaitingEngineGc) => {
                    Some(retire_slot(&mut state, object_id))
                }
                Some(_) => None,
            }
        };

        match verdict {
            Some(retired) => {
                if let Some(info) = retired {
                    finalize_retired(info, Some(engine), object_id);
                }
                true
            }
            None => {
                // Re-strengthened between promotion and the collector's
                // callback; the value must stay alive.
                if let Ok(proxy) = table.lock().unwrap().proxy_mut(handle) {
                    proxy.make_strong();
                }
                false
            }
        }
    }

    /// Resolve a stamp to a wrapper, materializing a fresh one (and
    /// re-strengthening the record) when the previous wrapper was already
    /// collected. `None` means the stamp is stale.
    pub(crate) fn resolve(self: &Arc<Self>, stamp: ObjectStamp) -> Option<ScriptObject> {
        let mut state = self.lock();
        let info = live_info(&mut state, stamp.id, Some(stamp.generation))?;
        if let Some(shared) = info.wrapper.upgrade() {
            return Some(ScriptObject::from_shared(shared));
        }

        let handle = info.handle.as_ref()?.clone();
        if let Ok(proxy) = handle.ctx_of().table.lock().unwrap().proxy_mut(handle.id()) {
            proxy.make_strong();
        }
        let shared = Arc::new(ObjectShared {
            stamp,
            behavior: Arc::clone(&info.behavior),
            handle,
            index: Arc::downgrade(self),
            suppressed: AtomicBool::new(false),
        });
        info.wrapper = Arc::downgrade(&shared);
        info.state = GcState::Created;
        log::debug!("{} re-strengthened", stamp.id);
        Some(ScriptObject::from_shared(shared))
    }

    /// Resolve by raw ID at the slot's current generation.
    pub(crate) fn resolve_current(self: &Arc<Self>, id: ObjectId) -> Option<ScriptObject> {
        let generation = {
            let state = self.lock();
            state.slots.get(id.raw() as usize)?.generation
        };
        self.resolve(ObjectStamp { id, generation })
    }

    /// The behavior attached to a live record; `None` once retired. This
    /// is the lookup every interceptor bridge goes through.
    pub(crate) fn behavior_of(&self, id: ObjectId) -> Option<Arc<dyn HostObject>> {
        let mut state = self.lock();
        live_info(&mut state, id, None).map(|info| Arc::clone(&info.behavior))
    }

    /// Like [`ObjectIndex::behavior_of`] but stale stamps answer `None`
    /// even when the slot has been reused.
    pub(crate) fn behavior_for(&self, stamp: ObjectStamp) -> Option<Arc<dyn HostObject>> {
        let mut state = self.lock();
        live_info(&mut state, stamp.id, Some(stamp.generation))
            .map(|info| Arc::clone(&info.behavior))
    }

    /// Upgrade a record to the confirm-required retirement path, used when
    /// accessors are registered on an object after creation.
    pub(crate) fn mark_needs_confirm(&self, id: ObjectId) {
        let mut state = self.lock();
        if let Some(info) = live_info(&mut state, id, None) {
            info.needs_native_confirm = true;
        }
    }

    pub(crate) fn cached_prototype(&self, id: ObjectId) -> Option<Handle> {
        let mut state = self.lock();
        live_info(&mut state, id, None).and_then(|info| info.prototype.clone())
    }

    pub(crate) fn cache_prototype(&self, id: ObjectId, prototype: Handle) {
        let mut state = self.lock();
        if let Some(info) = live_info(&mut state, id, None) {
            info.prototype = Some(prototype);
        }
    }

    /// Observed lifecycle state; stale stamps answer [`GcState::Retired`].
    pub fn state_of(&self, stamp: ObjectStamp) -> GcState {
        let mut state = self.lock();
        match live_info(&mut state, stamp.id, Some(stamp.generation)) {
            Some(info) => info.state,
            None => GcState::Retired,
        }
    }

    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn live_count(&self) -> usize {
        let state = self.lock();
        state.slots.iter().filter(|s| s.info.is_some()).count()
    }

    /// Tear down every record. Wrapper notifications are suppressed (their
    /// records are gone), dispose hooks still run once.
    pub(crate) fn clear(&self) {
        let retired: Vec<(ObjectId, ObjectInfo)> = {
            let mut state = self.lock();
            state.queue.clear();
            let mut out = Vec::new();
            for (i, slot) in state.slots.iter_mut().enumerate() {
                if let Some(info) = slot.info.take() {
                    slot.generation += 1;
                    out.push((ObjectId::new(i as i32), info));
                }
            }
            state.free = (0..state.slots.len()).rev().collect();
            out
        };
        for (id, info) in retired {
            if let Some(wrapper) = info.wrapper.upgrade() {
                wrapper.suppress_notification();
            }
            finalize_retired(info, None, id);
        }
    }
}

/// The live record for `id`, with an optional generation check.
fn live_info<'a>(
    state: &'a mut IndexState,
    id: ObjectId,
    generation: Option<u64>,
) -> Option<&'a mut ObjectInfo> {
    if !id.is_some() {
        return None;
    }
    let slot = state.slots.get_mut(id.raw() as usize)?;
    if let Some(generation) = generation
        && slot.generation != generation
    {
        return None;
    }
    slot.info.as_mut()
}

/// Free the slot and bump its generation; the record is handed back for
/// finalization outside the lock.
fn retire_slot(state: &mut IndexState, id: ObjectId) -> Option<ObjectInfo> {
    let slot = state.slots.get_mut(id.raw() as usize)?;
    let mut info = slot.info.take()?;
    info.state = GcState::Retired;
    slot.generation += 1;
    state.free.push(id.raw() as usize);
    Some(info)
}

/// Run the retirement side effects: accessor cleanup (when the engine is
/// on hand), the one-shot dispose hook, and the release of the index's
/// handle vote. Must be called without the index lock held.
fn finalize_retired(info: ObjectInfo, engine: Option<&mut NativeEngine>, id: ObjectId) {
    if let (Some(engine), Some(template)) = (engine, info.template)
        && let Err(e) = engine.clear_accessors(template, id)
    {
        log::warn!("accessor cleanup for {id} failed: {e}");
    }
    if let Some(wrapper) = info.wrapper.upgrade() {
        wrapper.suppress_notification();
    }
    info.behavior.dispose();
    log::debug!("{id} retired");
    drop(info.prototype);
    drop(info.handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Rig;
    use rivet_core::JsValueType;

    #[test]
    fn plain_objects_retire_without_queueing() {
        let rig = Rig::new();
        let object = rig.make_object(false);
        let stamp = object.stamp();
        drop(object);
        assert_eq!(rig.index.queued_count(), 0);
        assert_eq!(rig.index.state_of(stamp), GcState::Retired);
    }

    #[test]
    fn confirm_required_objects_queue_instead_of_retiring() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        let stamp = object.stamp();
        drop(object);
        assert_eq!(rig.index.queued_count(), 1);
        assert_eq!(rig.index.state_of(stamp), GcState::Queued);
    }

    #[test]
    fn outstanding_handles_defer_the_handle_weak_signal() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        let stamp = object.stamp();
        let extra = object.handle().clone();
        drop(object);
        // Wrapper gone, but a durable handle still holds a reference.
        assert_eq!(rig.index.state_of(stamp), GcState::WrapperWeak);
        assert_eq!(rig.index.queued_count(), 0);
        drop(extra);
        assert_eq!(rig.index.state_of(stamp), GcState::Queued);
    }

    #[test]
    fn full_promotion_pipeline_retires_through_engine_gc() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        let stamp = object.stamp();
        drop(object);

        let promoted = rig.index.promote_next().unwrap();
        assert_eq!(promoted, stamp.id);
        assert_eq!(rig.index.state_of(stamp), GcState::AwaitingEngineGc);

        let outcome = rig.native.lock().unwrap().run_collection(None);
        assert_eq!(outcome.requests, 1);
        assert_eq!(rig.index.state_of(stamp), GcState::Retired);
    }

    #[test]
    fn resolve_materializes_a_fresh_wrapper_and_restrengthens() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        let stamp = object.stamp();
        drop(object);
        assert_eq!(rig.index.state_of(stamp), GcState::Queued);

        let revived = rig.index.resolve(stamp).unwrap();
        assert_eq!(rig.index.state_of(stamp), GcState::Created);
        assert_eq!(revived.stamp(), stamp);

        // The stale queue entry must be skipped, not promoted.
        assert!(rig.index.promote_next().is_none());
        drop(revived);
        assert_eq!(rig.index.state_of(stamp), GcState::Queued);
    }

    #[test]
    fn stale_stamps_never_resolve_to_the_slot_reuser() {
        let rig = Rig::new();
        let first = rig.make_object(false);
        let old_stamp = first.stamp();
        drop(first);

        let second = rig.make_object(false);
        assert_eq!(second.id(), old_stamp.id);
        assert_ne!(second.stamp().generation, old_stamp.generation);
        assert!(rig.index.resolve(old_stamp).is_none());
        assert_eq!(rig.index.state_of(old_stamp), GcState::Retired);
    }

    #[test]
    fn clear_suppresses_wrapper_notifications() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        rig.index.clear();
        assert_eq!(rig.index.live_count(), 0);
        // The wrapper drop after teardown must not resurrect a record.
        drop(object);
        assert_eq!(rig.index.queued_count(), 0);
    }

    #[test]
    fn a_poisoned_lock_does_not_wedge_the_index() {
        let rig = Rig::new();
        let object = rig.make_object(true);
        let stamp = object.stamp();

        let index = Arc::clone(&rig.index);
        let _ = std::thread::spawn(move || {
            let _guard = index.state.lock().unwrap();
            panic!("promotion step");
        })
        .join();

        // Lifecycle operations keep working after the panic.
        assert_eq!(rig.index.state_of(stamp), GcState::Created);
        drop(object);
        assert_eq!(rig.index.state_of(stamp), GcState::Queued);
        assert!(rig.index.promote_next().is_some());
    }

    #[test]
    fn handle_type_tag_survives_registration() {
        let rig = Rig::new();
        let object = rig.make_object(false);
        assert_eq!(object.handle().value_type(), JsValueType::Object);
        assert!(object.handle().is_object_kind());
    }
}
