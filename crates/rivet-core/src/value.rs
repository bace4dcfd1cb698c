//! Heap value representation and the lazily refreshed snapshot view.

use rustc_hash::FxHashMap;

use crate::heap::ValueRef;
use crate::ids::TemplateId;

/// Internal state carried by template-created objects: the owning template
/// and the associated object-info slot on the host side.
#[derive(Debug, Clone, Copy)]
pub struct InternalFields {
    pub template: TemplateId,
    /// Raw object ID; `-1` when the object has no host-side record.
    pub object_id: i32,
}

/// Property storage shared by objects and functions.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub properties: FxHashMap<String, ValueRef>,
    pub elements: FxHashMap<u32, ValueRef>,
    /// Hidden values invisible to scripts; used to tag free-form objects
    /// with their host object ID.
    pub hidden: FxHashMap<String, i32>,
    pub internal: Option<InternalFields>,
    pub prototype: Option<ValueRef>,
}

#[derive(Debug)]
pub struct FunctionData {
    pub name: String,
    pub template: TemplateId,
    pub data: ObjectData,
}

/// One value in the engine heap.
#[derive(Debug)]
pub enum JsValue {
    Undefined,
    Null,
    Boolean(bool),
    BooleanObject(bool),
    Int32(i32),
    Number(f64),
    NumberObject(f64),
    Str(String),
    StringObject(String),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    RegExp(String),
    Array(Vec<ValueRef>),
    Object(ObjectData),
    Function(FunctionData),
}

impl JsValue {
    // Type predicates, in the priority order handle classification relies
    // on. Several overlap (a function also satisfies `is_object`), so the
    // classifier must probe them in this order.

    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, JsValue::Boolean(_))
    }

    #[inline]
    pub fn is_boolean_object(&self) -> bool {
        matches!(self, JsValue::BooleanObject(_))
    }

    #[inline]
    pub fn is_int32(&self) -> bool {
        matches!(self, JsValue::Int32(_))
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, JsValue::Int32(_) | JsValue::Number(_))
    }

    #[inline]
    pub fn is_number_object(&self) -> bool {
        matches!(self, JsValue::NumberObject(_))
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, JsValue::Str(_))
    }

    #[inline]
    pub fn is_string_object(&self) -> bool {
        matches!(self, JsValue::StringObject(_))
    }

    #[inline]
    pub fn is_date(&self) -> bool {
        matches!(self, JsValue::Date(_))
    }

    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, JsValue::Array(_))
    }

    #[inline]
    pub fn is_regexp(&self) -> bool {
        matches!(self, JsValue::RegExp(_))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, JsValue::Null)
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self, JsValue::Function(_))
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, JsValue::Undefined)
    }

    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, JsValue::Object(_) | JsValue::Function(_) | JsValue::Array(_))
    }

    /// Property storage of this value, when it has any.
    pub fn object_data(&self) -> Option<&ObjectData> {
        match self {
            JsValue::Object(data) => Some(data),
            JsValue::Function(f) => Some(&f.data),
            _ => None,
        }
    }

    pub fn object_data_mut(&mut self) -> Option<&mut ObjectData> {
        match self {
            JsValue::Object(data) => Some(data),
            JsValue::Function(f) => Some(&mut f.data),
            _ => None,
        }
    }

    /// Script-facing stringification, used by the snapshot default branch.
    pub fn to_display_string(&self) -> String {
        match self {
            JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Boolean(b) | JsValue::BooleanObject(b) => b.to_string(),
            JsValue::Int32(i) => i.to_string(),
            JsValue::Number(n) | JsValue::NumberObject(n) => format_number(*n),
            JsValue::Str(s) | JsValue::StringObject(s) => s.clone(),
            JsValue::Date(ms) => format!("[date {}ms]", format_number(*ms)),
            JsValue::RegExp(p) => format!("/{}/", p),
            JsValue::Array(_) => "[object Array]".to_string(),
            JsValue::Object(_) => "[object Object]".to_string(),
            JsValue::Function(f) => format!("function {}() {{ [native code] }}", f.name),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Lazily computed primitive view of the value behind a handle proxy.
///
/// The underlying script value can change between executions, so the
/// snapshot is only valid after an explicit refresh; [`Snapshot::Unset`] is
/// what callers observe before the first forced read.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Snapshot {
    #[default]
    Unset,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Date(f64),
}

impl Snapshot {
    /// Capture the current primitive view of `value`.
    ///
    /// Object kinds fall back to their display string, mirroring dynamic
    /// string coercion.
    pub fn capture(value: &JsValue) -> Snapshot {
        match value {
            JsValue::Boolean(b) | JsValue::BooleanObject(b) => Snapshot::Boolean(*b),
            JsValue::Int32(i) => Snapshot::Integer(*i as i64),
            JsValue::Number(n) | JsValue::NumberObject(n) => Snapshot::Number(*n),
            JsValue::Str(s) | JsValue::StringObject(s) => Snapshot::Str(s.clone()),
            JsValue::Date(ms) => Snapshot::Date(*ms),
            JsValue::Undefined => Snapshot::Number(0.0),
            other => Snapshot::Str(other.to_display_string()),
        }
    }
}
