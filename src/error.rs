//! Host-side error types.

use thiserror::Error;

use rivet_core::{EngineId, FaultKind, HandleId, JsValueType, NativeError, ObjectId};

/// Host-level invalid operations.
///
/// Script faults are not raised through this type by default: `execute`
/// reports them as error-tagged handles, and only the checked execution
/// variant translates them into [`BridgeError::Script`]. Lifecycle races
/// (an interceptor firing for an already-collected object) are answered
/// with neutral results and never surface here.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Native(#[from] NativeError),

    #[error("expected a {expected} value, found {found:?}")]
    TypeMismatch { expected: &'static str, found: JsValueType },

    #[error("script fault ({kind:?}): {message}")]
    Script { kind: FaultKind, message: String },

    #[error("{0} no longer identifies a live host object")]
    ObjectGone(ObjectId),

    #[error("engine {0} has been disposed")]
    EngineGone(EngineId),

    #[error("{0} is already associated with a host object")]
    AlreadyAssociated(HandleId),

    #[error("handle belongs to {found}, expected {expected}")]
    ForeignHandle { expected: EngineId, found: EngineId },

    #[error("failed to start the reclamation worker: {0}")]
    Worker(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
