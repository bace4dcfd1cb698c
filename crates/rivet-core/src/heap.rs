//! Slab-backed value heap with mark/sweep collection.
//!
//! The heap itself only knows how to allocate, trace, and free values; the
//! engine decides what the roots are (strong persistent handles, the global
//! object, template-held values) and when weak handles may be reclaimed.

use crate::value::JsValue;

/// Index of one live value in the heap slab.
///
/// A `ValueRef` is only meaningful while something roots the value; the
/// persistent handles held by handle proxies are the usual root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueRef(u32);

impl ValueRef {
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Default)]
pub struct Heap {
    slots: Vec<Option<JsValue>>,
    free: Vec<u32>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, value: JsValue) -> ValueRef {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(value);
                ValueRef(i)
            }
            None => {
                self.slots.push(Some(value));
                ValueRef((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, r: ValueRef) -> Option<&JsValue> {
        self.slots.get(r.index()).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, r: ValueRef) -> Option<&mut JsValue> {
        self.slots.get_mut(r.index()).and_then(|s| s.as_mut())
    }

    pub fn contains(&self, r: ValueRef) -> bool {
        self.get(r).is_some()
    }

    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Trace reachability from `roots`. Returns one mark bit per slot.
    pub fn mark(&self, roots: impl IntoIterator<Item = ValueRef>) -> Vec<bool> {
        let mut marked = vec![false; self.slots.len()];
        let mut pending: Vec<ValueRef> = roots.into_iter().collect();

        while let Some(r) = pending.pop() {
            let i = r.index();
            if i >= marked.len() || marked[i] {
                continue;
            }
            let Some(value) = self.get(r) else { continue };
            marked[i] = true;
            trace_children(value, &mut pending);
        }

        marked
    }

    /// Free every live slot left unmarked by [`Heap::mark`]. Returns the
    /// number of values reclaimed.
    pub fn sweep(&mut self, marked: &[bool]) -> usize {
        let mut freed = 0;
        for i in 0..self.slots.len() {
            if self.slots[i].is_some() && !marked.get(i).copied().unwrap_or(false) {
                self.slots[i] = None;
                self.free.push(i as u32);
                freed += 1;
            }
        }
        freed
    }
}

fn trace_children(value: &JsValue, out: &mut Vec<ValueRef>) {
    match value {
        JsValue::Array(items) => out.extend(items.iter().copied()),
        JsValue::Object(data) => trace_object(data, out),
        JsValue::Function(f) => trace_object(&f.data, out),
        _ => {}
    }
}

fn trace_object(data: &crate::value::ObjectData, out: &mut Vec<ValueRef>) {
    out.extend(data.properties.values().copied());
    out.extend(data.elements.values().copied());
    out.extend(data.prototype);
}
