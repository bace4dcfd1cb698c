//! Native-side error types.

use thiserror::Error;

use crate::ids::{EngineId, HandleId, TemplateId};

/// Faults raised at the native engine boundary.
///
/// These are usage errors raised synchronously at the call site; lifecycle
/// races (a lookup for an already-recycled ID and the like) are answered
/// with neutral results instead, never through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("engine {0} has been disposed")]
    EngineDisposed(EngineId),

    #[error("operation requires an active {required} scope")]
    ScopeRequired { required: &'static str },

    #[error("invalid or recycled handle {0}")]
    InvalidHandle(HandleId),

    #[error("handle belongs to {found}, expected {expected}")]
    WrongEngine { expected: EngineId, found: EngineId },

    #[error("{0} is not initialized")]
    TemplateUninitialized(TemplateId),

    #[error("{0} does not reference an object value")]
    NotAnObject(HandleId),

    #[error("{0} no longer references a live value")]
    EmptyHandle(HandleId),
}

pub type NativeResult<T> = Result<T, NativeError>;
