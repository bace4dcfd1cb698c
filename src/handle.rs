//! Host-side handle wrappers over native handle proxies.
//!
//! Two flavors share the same read surface. [`InternalHandle`] is the
//! ephemeral form every native call returns: move-only, and its drop
//! releases the one reference it carries, so chaining calls never inflates
//! the proxy's count. [`Handle`] is the durable form for storage in fields
//! and collections: `Clone` takes a reference, `Drop` releases one.
//! Converting an `InternalHandle` into a `Handle` transfers the existing
//! reference without touching the count.
//!
//! Equality compares proxy identity only, never underlying script values.

use std::sync::{Arc, Mutex, Weak};

use rivet_core::{
    HandleId, HandleTable, JsValueType, NativeEngine, ObjectId, ReleaseAction, Snapshot,
};

use crate::error::{BridgeError, BridgeResult};
use crate::index::ObjectIndex;

/// Everything a wrapper needs to read its proxy and to release it, without
/// keeping the engine alive.
#[derive(Clone)]
pub(crate) struct HandleCtx {
    pub(crate) engine: rivet_core::EngineId,
    pub(crate) native: Weak<Mutex<NativeEngine>>,
    pub(crate) table: Arc<Mutex<HandleTable>>,
    pub(crate) index: Arc<ObjectIndex>,
}

impl HandleCtx {
    /// Release one proxy reference. The object index is notified after the
    /// table lock has been dropped; taking the index lock while holding
    /// the table lock would invert the global lock order.
    fn release(&self, id: HandleId) {
        let action = match self.table.lock().unwrap().release(id) {
            Ok(action) => action,
            Err(e) => {
                log::warn!("release of {id} failed: {e}");
                return;
            }
        };
        if let ReleaseAction::NotifyObjectWeak(object_id) = action {
            self.index.handle_weak(object_id);
        }
    }

    fn add_ref(&self, id: HandleId) {
        if let Err(e) = self.table.lock().unwrap().add_ref(id) {
            log::warn!("add_ref of {id} failed: {e}");
        }
    }

    fn forced_value(&self, id: HandleId) -> BridgeResult<Snapshot> {
        let native = self.native.upgrade().ok_or(BridgeError::EngineGone(self.engine))?;
        let mut native = native.lock().unwrap();
        Ok(native.update_value(id)?)
    }

    fn probe_object_id(&self, id: HandleId) -> BridgeResult<ObjectId> {
        let native = self.native.upgrade().ok_or(BridgeError::EngineGone(self.engine))?;
        let mut native = native.lock().unwrap();
        Ok(native.get_managed_object_id(id)?)
    }
}

mod private {
    use super::HandleCtx;
    use rivet_core::HandleId;

    pub trait Sealed {
        fn id_of(&self) -> HandleId;
        fn ctx_of(&self) -> &HandleCtx;
    }
}

pub(crate) use private::Sealed;

/// Read surface shared by both wrapper flavors.
pub trait HandleLike: private::Sealed {
    fn id(&self) -> HandleId {
        self.id_of()
    }

    fn engine_id(&self) -> rivet_core::EngineId {
        self.ctx_of().engine
    }

    /// The type tag captured when the proxy was bound.
    fn value_type(&self) -> JsValueType {
        read_proxy(self, JsValueType::Undefined, |p| p.value_type())
    }

    fn is_error(&self) -> bool {
        self.value_type().is_error()
    }

    fn is_object_kind(&self) -> bool {
        self.value_type().is_object_kind()
    }

    /// True once the engine collector has reclaimed the underlying value.
    fn is_empty(&self) -> bool {
        read_proxy(self, true, |p| p.persistent().is_none())
    }

    /// Current host reference count on the proxy.
    fn ref_count(&self) -> u32 {
        read_proxy(self, 0, |p| p.managed_refs())
    }

    /// Object ID as last probed, without running the probe.
    fn cached_object_id(&self) -> ObjectId {
        read_proxy(self, ObjectId::NONE, |p| p.object_id())
    }

    /// Recover the associated host object ID, probing the engine object on
    /// first call and caching the outcome (including confirmed absence).
    fn object_id(&self) -> BridgeResult<ObjectId> {
        self.ctx_of().probe_object_id(self.id_of())
    }

    /// Force a snapshot refresh from the live value. The underlying script
    /// value can change between executions; this is the read that sees it.
    fn value(&self) -> BridgeResult<Snapshot> {
        self.ctx_of().forced_value(self.id_of())
    }

    /// The snapshot from the most recent refresh; [`Snapshot::Unset`]
    /// before any forced read.
    fn last_value(&self) -> Snapshot {
        read_proxy(self, Snapshot::Unset, |p| p.last_value().clone())
    }

    fn to_boolean(&self) -> BridgeResult<bool> {
        match self.value()? {
            Snapshot::Boolean(b) => Ok(b),
            _ => Err(self.mismatch("boolean")),
        }
    }

    fn to_integer(&self) -> BridgeResult<i32> {
        match self.value()? {
            Snapshot::Integer(i) => i32::try_from(i).map_err(|_| self.mismatch("int32")),
            _ => Err(self.mismatch("int32")),
        }
    }

    fn to_number(&self) -> BridgeResult<f64> {
        match self.value()? {
            Snapshot::Integer(i) => Ok(i as f64),
            Snapshot::Number(n) => Ok(n),
            _ => Err(self.mismatch("number")),
        }
    }

    fn to_text(&self) -> BridgeResult<String> {
        match self.value()? {
            Snapshot::Str(s) => Ok(s),
            _ => Err(self.mismatch("string")),
        }
    }

    /// Milliseconds since the Unix epoch.
    fn to_date(&self) -> BridgeResult<f64> {
        match self.value()? {
            Snapshot::Date(ms) => Ok(ms),
            _ => Err(self.mismatch("date")),
        }
    }

    #[doc(hidden)]
    fn mismatch(&self, expected: &'static str) -> BridgeError {
        BridgeError::TypeMismatch { expected, found: self.value_type() }
    }
}

fn read_proxy<H, T>(
    handle: &H,
    fallback: T,
    f: impl FnOnce(&rivet_core::HandleProxy) -> T,
) -> T
where
    H: private::Sealed + ?Sized,
{
    let table = handle.ctx_of().table.lock().unwrap();
    match table.proxy(handle.id_of()) {
        Ok(proxy) => f(proxy),
        Err(_) => fallback,
    }
}

/// Ephemeral wrapper: the result form of every native call.
///
/// Move-only by design. Either convert it into a [`Handle`] to keep the
/// value, or let it drop to release the reference it carries. Storing one
/// in a field defeats its purpose; that is what [`Handle`] is for.
pub struct InternalHandle {
    id: HandleId,
    ctx: HandleCtx,
    /// Cleared when ownership of the reference moves into a `Handle`.
    armed: bool,
}

impl InternalHandle {
    /// Bind a fresh reference to the proxy. Factories hand the proxy over
    /// at count zero; the wrapper's reference is taken here.
    pub(crate) fn bind(ctx: HandleCtx, id: HandleId) -> Self {
        ctx.add_ref(id);
        Self { id, ctx, armed: true }
    }

    /// Promote to the durable form, transferring this wrapper's reference
    /// instead of taking another one.
    pub fn keep(mut self) -> Handle {
        self.armed = false;
        Handle { id: self.id, ctx: self.ctx.clone() }
    }
}

impl private::Sealed for InternalHandle {
    fn id_of(&self) -> HandleId {
        self.id
    }

    fn ctx_of(&self) -> &HandleCtx {
        &self.ctx
    }
}

impl HandleLike for InternalHandle {}

impl Drop for InternalHandle {
    fn drop(&mut self) {
        if self.armed {
            self.ctx.release(self.id);
        }
    }
}

impl std::fmt::Debug for InternalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalHandle")
            .field("id", &self.id)
            .field("type", &self.value_type())
            .finish()
    }
}

/// Durable wrapper: safe to store anywhere. `Clone` takes an additional
/// proxy reference; `Drop` releases one.
pub struct Handle {
    id: HandleId,
    ctx: HandleCtx,
}

impl private::Sealed for Handle {
    fn id_of(&self) -> HandleId {
        self.id
    }

    fn ctx_of(&self) -> &HandleCtx {
        &self.ctx
    }
}

impl HandleLike for Handle {}

impl From<InternalHandle> for Handle {
    fn from(internal: InternalHandle) -> Self {
        internal.keep()
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        self.ctx.add_ref(self.id);
        Self { id: self.id, ctx: self.ctx.clone() }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.ctx.release(self.id);
    }
}

impl PartialEq for Handle {
    /// Proxy identity, never script value equality.
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.ctx.table, &other.ctx.table)
    }
}

impl Eq for Handle {}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("type", &self.value_type())
            .field("refs", &self.ref_count())
            .finish()
    }
}
