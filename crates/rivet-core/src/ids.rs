//! Identifier types shared between the native and host sides of the bridge.
//!
//! Every identifier crossing the native boundary is a 32-bit signed integer
//! with `-1` reserved for "none". Object IDs additionally use `-2` to record
//! that a probe for an associated object already ran and found nothing, so
//! the probe is not repeated.

use std::fmt;

/// Identifies one engine instance for the lifetime of the process.
///
/// Engine IDs are never recycled; a disposed engine keeps its ID so that
/// late handle releases can recognize the engine is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EngineId(i32);

impl EngineId {
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine_{}", self.0)
    }
}

/// Identifies one handle proxy within an engine's handle table.
///
/// Handle IDs are dense indices and are recycled through a free list once
/// the proxy is returned to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(i32);

impl HandleId {
    /// The "no handle" sentinel.
    pub const NONE: HandleId = HandleId(-1);

    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(self.0 >= 0);
        self.0 as usize
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle_{}", self.0)
    }
}

/// Identifies one object-info slot in the host's object identity index.
///
/// This is a separate numbering space from [`HandleId`]. Slots are dense and
/// reusable; `-1` means "no associated object" and `-2` means "probed,
/// confirmed absent".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(i32);

impl ObjectId {
    /// No associated object (also: not probed yet on a handle proxy).
    pub const NONE: ObjectId = ObjectId(-1);
    /// A probe ran and confirmed there is no associated object.
    pub const ABSENT: ObjectId = ObjectId(-2);

    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 >= 0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(self.0 >= 0);
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object_{}", self.0)
    }
}

/// Identifies a template (object- or function-flavored) within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateId(i32);

impl TemplateId {
    #[inline]
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        debug_assert!(self.0 >= 0);
        self.0 as usize
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template_{}", self.0)
    }
}
