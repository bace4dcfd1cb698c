//! The value-type tag shared across the native boundary.
//!
//! The numeric values are part of the bridge ABI: negative values are
//! reserved for the three error kinds, and the non-negative values follow
//! the fixed script-type ordering. Do not reorder.

use num_enum::{IntoPrimitive, TryFromPrimitive};

bitflags::bitflags! {
    /// Script-visible property attributes, as reported by query interceptors.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyAttributes: u32 {
        const READ_ONLY   = 1;
        const DONT_ENUM   = 2;
        const DONT_DELETE = 4;
    }
}

impl PropertyAttributes {
    /// No restrictions (the default for plain assignments).
    pub const NONE: PropertyAttributes = PropertyAttributes::empty();
}

/// Type tag carried by every handle proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum JsValueType {
    /// An error occurred while running the compiled script.
    ExecutionError = -3,
    /// The script failed to compile (usually a syntax error).
    CompilerError = -2,
    /// An internal fault before or after script execution.
    InternalError = -1,
    Undefined = 0,
    Null = 1,
    Boolean = 2,
    BooleanObject = 3,
    Int32 = 4,
    Number = 5,
    NumberObject = 6,
    String = 7,
    StringObject = 8,
    Object = 9,
    Function = 10,
    Date = 11,
    Array = 12,
    RegExp = 13,
}

impl JsValueType {
    /// True for the three negative error kinds.
    #[inline]
    pub const fn is_error(self) -> bool {
        (self as i32) < 0
    }

    /// True for tags that represent a script object reference rather than a
    /// plain value. Object-backed proxies may carry an associated object ID.
    #[inline]
    pub const fn is_object_kind(self) -> bool {
        matches!(
            self,
            JsValueType::BooleanObject
                | JsValueType::NumberObject
                | JsValueType::StringObject
                | JsValueType::Object
                | JsValueType::Function
                | JsValueType::Date
                | JsValueType::Array
                | JsValueType::RegExp
        )
    }
}
