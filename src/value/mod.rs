//! The Scratch dynamic value model.
//!
//! `Value` is a tagged union. Heap-backed variants (`Str`, `List`) carry
//! an `Rc` to the referent plus a *static* flag marking strings that
//! live in the bytecode's read-only data rather than on the heap.
//! Because the referent's lifetime is already tracked by the `Rc`, `retain`/`release`
//! here are thin, explicit wrappers over `Clone`/assignment-to-`None`
//! rather than a hand-rolled counter — see `DESIGN.md` for why duplicating
//! `Rc`'s bookkeeping would only add an unsound fast path for the static
//! case without any real benefit in safe Rust.

pub mod arith;
pub mod coerce;
pub mod heap;

use std::rc::Rc;

use heap::{HeapList, HeapString};

/// A Scratch runtime value.
#[derive(Clone)]
pub enum Value {
    /// The default, "no value" state.
    None,
    Integer(i64),
    Real(f64),
    Bool(bool),
    /// `static` is true for strings embedded in the bytecode's `.rdata`
    /// segment; see the module doc for why this carries no special
    /// retain/release behavior in this implementation.
    Str(Rc<HeapString>, bool),
    List(Rc<HeapList>, bool),
    /// Internal-only payload used by the stack for saved base pointers
    /// and return addresses. Must never be produced by user
    /// code and never participates in coercion.
    IntPtr(u64),
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Integer(i) => write!(f, "Integer({i})"),
            Value::Real(r) => write!(f, "Real({r})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Str(s, is_static) => write!(f, "Str({:?}, static={is_static})", s.as_str()),
            Value::List(l, is_static) => write!(f, "List(len={}, static={is_static})", l.len()),
            Value::IntPtr(p) => write!(f, "IntPtr({p:#x})"),
        }
    }
}

impl Value {
    pub fn none() -> Self {
        Value::None
    }

    pub fn set_empty(&mut self) {
        *self = Value::None;
    }

    pub fn set_integer(&mut self, v: i64) {
        *self = Value::Integer(v);
    }

    pub fn set_real(&mut self, v: f64) {
        *self = Value::Real(v);
    }

    pub fn set_bool(&mut self, v: bool) {
        *self = Value::Bool(v);
    }

    pub fn set_char(&mut self, c: char) {
        *self = Value::Str(HeapString::new(c.to_string().into_bytes()), false);
    }

    pub fn set_intptr(&mut self, v: u64) {
        *self = Value::IntPtr(v);
    }

    pub fn set_string(&mut self, s: impl Into<String>) {
        *self = Value::Str(HeapString::new(s.into().into_bytes()), false);
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Value::Str(HeapString::new(s.into().into_bytes()), false)
    }

    pub fn from_static_string(rc: Rc<HeapString>) -> Self {
        Value::Str(rc, true)
    }

    /// Allocates a fresh heap string. Never fails in this implementation
    /// (host allocation failure is modeled at the `VmPanic` tier, not
    /// here); kept as a named constructor mirroring the reference
    /// engine's `alloc_string` entry point.
    pub fn alloc_string(bytes: Vec<u8>) -> Self {
        Value::Str(HeapString::new(bytes), false)
    }

    /// Allocates a fresh heap list of the given length, each slot `None`.
    pub fn alloc_list(len: usize) -> Self {
        Value::List(HeapList::new(len), false)
    }

    pub fn is_static(&self) -> bool {
        match self {
            Value::Str(_, s) | Value::List(_, s) => *s,
            _ => false,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str_ref(&self) -> Option<&HeapString> {
        match self {
            Value::Str(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_list_ref(&self) -> Option<&HeapList> {
        match self {
            Value::List(l, _) => Some(l),
            _ => None,
        }
    }
}

/// Explicit retain, mirroring the reference engine's heap vocabulary:
/// produces a new owning `Value` referring to the same heap object (a
/// no-op for non-heap variants).
pub fn retain(v: &Value) -> Value {
    v.clone()
}

/// Explicit release: drops `v`'s heap reference (if any) and leaves it
/// `None`. A second `release` on an already-`None` value is a no-op.
pub fn release(v: &mut Value) {
    *v = Value::None;
}

/// `Assign(dst, src)`: release `dst`'s prior contents, then retain `src`.
/// `assign(a, a)` is a correctness-preserving no-op.
pub fn assign(dst: &mut Value, src: &Value) {
    *dst = src.clone();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_leaves_none_and_is_idempotent() {
        let mut v = Value::from_string("hi");
        release(&mut v);
        assert!(v.is_none());
        release(&mut v);
        assert!(v.is_none());
    }

    #[test]
    fn retain_then_release_restores_refcount() {
        let v = Value::from_string("hi");
        let rc = match &v {
            Value::Str(s, _) => s.clone(),
            _ => unreachable!(),
        };
        let before = Rc::strong_count(&rc);
        let mut retained = retain(&v);
        assert_eq!(Rc::strong_count(&rc), before + 1);
        release(&mut retained);
        assert_eq!(Rc::strong_count(&rc), before);
    }

    #[test]
    fn assign_self_is_noop() {
        let mut v = Value::from_string("hi");
        let copy = v.clone();
        assign(&mut v, &copy);
        assert!(matches!(v, Value::Str(..)));
    }
}
