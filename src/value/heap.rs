//! Refcounted heap objects: strings and lists.

use std::cell::RefCell;
use std::rc::Rc;

use super::Value;

/// Polynomial hash seed used for every `String` heap object.
pub const STRING_HASH_SEED: u32 = 1_315_423_911;

/// Computes the Scratch string hash: `h ^= (h<<5) + c + (h>>2)` per byte.
pub fn scratch_string_hash(bytes: &[u8]) -> u32 {
    let mut h = STRING_HASH_SEED;
    for &c in bytes {
        h ^= h.wrapping_shl(5).wrapping_add(c as u32).wrapping_add(h >> 2);
    }
    h
}

/// An immutable, refcounted string heap object.
///
/// Immutable after construction; the hash is computed once here rather
/// than on every comparison.
pub struct HeapString {
    bytes: Vec<u8>,
    hash: u32,
}

impl HeapString {
    pub fn new(bytes: Vec<u8>) -> Rc<Self> {
        let hash = scratch_string_hash(&bytes);
        Rc::new(Self { bytes, hash })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }
}

/// A mutable, refcounted list of `Value`s.
///
/// Grows geometrically (x2) to amortize append; initial capacity is 8
/// or the requested length, whichever is larger. Lists must never
/// contain themselves — an implementation invariant enforced by callers
/// (`listadd`/`listinsert`/`listreplace`) rather than checked here.
pub struct HeapList {
    values: RefCell<Vec<Value>>,
}

impl HeapList {
    pub fn new(initial_len: usize) -> Rc<Self> {
        let capacity = initial_len.max(8);
        let mut values = Vec::with_capacity(capacity);
        values.resize_with(initial_len, Value::none);
        Rc::new(Self { values: RefCell::new(values) })
    }

    pub fn from_values(values: Vec<Value>) -> Rc<Self> {
        Rc::new(Self { values: RefCell::new(values) })
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.values.borrow().get(index).cloned()
    }

    pub fn with_values<R>(&self, f: impl FnOnce(&Vec<Value>) -> R) -> R {
        f(&self.values.borrow())
    }

    pub fn with_values_mut<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        f(&mut self.values.borrow_mut())
    }

    pub fn push(&self, v: Value) {
        self.values.borrow_mut().push(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_seeded_and_deterministic() {
        let a = scratch_string_hash(b"hello");
        let b = scratch_string_hash(b"hello");
        assert_eq!(a, b);
        assert_ne!(a, STRING_HASH_SEED);
    }

    #[test]
    fn list_grows_geometrically_from_floor_of_eight() {
        let list = HeapList::new(2);
        assert!(list.values.borrow().capacity() >= 8);
    }
}
