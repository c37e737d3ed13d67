//! Concrete heap object bodies.
//!
//! Every struct here begins with an [`ObjHeader`] so that a raw `*mut T`
//! can always be reinterpreted as `*mut ObjHeader` (and back, once the
//! collector has checked `kind()`). Objects are never moved once
//! allocated -- they live behind `Box::into_raw` for their whole life on
//! the heap, which is what lets an [`Upvalue`] point at another object's
//! field and stay valid.

use crate::chunk::Chunk;
use crate::table::Table;
use lox_core::{ObjHeader, ObjKind, ObjRef, Value};

/// FNV-1a, the hash spec calls for on interned string bytes.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[repr(C)]
pub struct LoxString {
    pub header: ObjHeader,
    pub hash: u32,
    bytes: Box<str>,
}

impl LoxString {
    /// Build a string object without installing it on the heap's sweep
    /// list or interning it. Only the allocator in `heap.rs` (which does
    /// both) should construct a `LoxString` that the VM will ever see;
    /// this constructor exists for unit tests on `Table` in isolation.
    pub fn new_unlinked(s: &str) -> LoxString {
        LoxString {
            header: ObjHeader::new(ObjKind::String),
            hash: fnv1a_hash(s.as_bytes()),
            bytes: s.into(),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A compiled function: arity, the upvalue slots its closures must fill,
/// and the chunk of bytecode for its body. Immutable once the compiler
/// finishes emitting it.
#[repr(C)]
pub struct LoxFunction {
    pub header: ObjHeader,
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    /// `None` for the implicit top-level `<script>` function.
    pub name: Option<*mut LoxString>,
}

impl LoxFunction {
    pub fn new_unlinked(name: Option<*mut LoxString>) -> LoxFunction {
        LoxFunction {
            header: ObjHeader::new(ObjKind::Function),
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

pub type NativeFn = fn(args: &[Value]) -> Value;

#[repr(C)]
pub struct Native {
    pub header: ObjHeader,
    pub arity: u8,
    pub function: NativeFn,
    pub name: *mut LoxString,
}

/// A quotation's worth of captured locals, paired with the function it
/// closes over. `upvalues.len()` always equals `function.upvalue_count`.
#[repr(C)]
pub struct Closure {
    pub header: ObjHeader,
    pub function: *mut LoxFunction,
    pub upvalues: Vec<*mut Upvalue>,
}

/// Indirection cell a closure uses to reach a captured local.
///
/// While `closed` is `None` the variable is still live on the VM's value
/// stack and `location` points directly into that stack slot; sibling
/// closures that captured the same local share one `Upvalue` (see
/// `capture_upvalue` in the VM), so a write through any of them is visible
/// to all. Once the frame that owns the slot returns, `close_upvalues`
/// copies the value into `closed` and redirects `location` here -- the
/// address is stable because the `Upvalue` itself never moves.
#[repr(C)]
pub struct Upvalue {
    pub header: ObjHeader,
    pub location: *mut Value,
    pub closed: Value,
    pub next_open: *mut Upvalue,
}

impl Upvalue {
    #[inline]
    pub fn get(&self) -> Value {
        unsafe { *self.location }
    }

    #[inline]
    pub fn set(&mut self, value: Value) {
        unsafe {
            *self.location = value;
        }
    }

    pub fn close(&mut self) {
        self.closed = self.get();
        self.location = &mut self.closed as *mut Value;
    }
}

#[repr(C)]
pub struct Class {
    pub header: ObjHeader,
    pub name: *mut LoxString,
    pub methods: Table,
}

#[repr(C)]
pub struct Instance {
    pub header: ObjHeader,
    pub class: *mut Class,
    pub fields: Table,
}

#[repr(C)]
pub struct BoundMethod {
    pub header: ObjHeader,
    pub receiver: Value,
    pub method: *mut Closure,
}

/// Downcasting helpers for a type-erased [`ObjRef`].
///
/// Each accessor asserts the header's kind matches before reinterpreting
/// the pointer; callers are expected to have already branched on `kind()`
/// (the VM's opcode dispatch and the collector's trace phase both do),
/// so the assert is a cross-check rather than the primary guard.
pub trait ObjRefExt {
    fn as_string(self) -> *mut LoxString;
    fn as_function(self) -> *mut LoxFunction;
    fn as_native(self) -> *mut Native;
    fn as_closure(self) -> *mut Closure;
    fn as_upvalue(self) -> *mut Upvalue;
    fn as_class(self) -> *mut Class;
    fn as_instance(self) -> *mut Instance;
    fn as_bound_method(self) -> *mut BoundMethod;
}

impl ObjRefExt for ObjRef {
    fn as_string(self) -> *mut LoxString {
        debug_assert_eq!(self.kind(), ObjKind::String);
        self.as_ptr()
    }
    fn as_function(self) -> *mut LoxFunction {
        debug_assert_eq!(self.kind(), ObjKind::Function);
        self.as_ptr()
    }
    fn as_native(self) -> *mut Native {
        debug_assert_eq!(self.kind(), ObjKind::Native);
        self.as_ptr()
    }
    fn as_closure(self) -> *mut Closure {
        debug_assert_eq!(self.kind(), ObjKind::Closure);
        self.as_ptr()
    }
    fn as_upvalue(self) -> *mut Upvalue {
        debug_assert_eq!(self.kind(), ObjKind::Upvalue);
        self.as_ptr()
    }
    fn as_class(self) -> *mut Class {
        debug_assert_eq!(self.kind(), ObjKind::Class);
        self.as_ptr()
    }
    fn as_instance(self) -> *mut Instance {
        debug_assert_eq!(self.kind(), ObjKind::Instance);
        self.as_ptr()
    }
    fn as_bound_method(self) -> *mut BoundMethod {
        debug_assert_eq!(self.kind(), ObjKind::BoundMethod);
        self.as_ptr()
    }
}

/// Build an [`ObjRef`] from a concrete, already-boxed object pointer.
pub fn obj_ref<T>(ptr: *mut T) -> ObjRef {
    ObjRef(ptr as *mut ObjHeader)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_is_stable_for_equal_bytes() {
        assert_eq!(fnv1a_hash(b"hello"), fnv1a_hash(b"hello"));
        assert_ne!(fnv1a_hash(b"hello"), fnv1a_hash(b"world"));
    }

    #[test]
    fn upvalue_close_copies_current_value_and_redirects() {
        let mut slot = Value::number(41.0);
        let mut up = Upvalue {
            header: ObjHeader::new(ObjKind::Upvalue),
            location: &mut slot as *mut Value,
            closed: Value::nil(),
            next_open: std::ptr::null_mut(),
        };
        unsafe {
            *up.location = Value::number(42.0);
        }
        up.close();
        assert_eq!(up.get(), Value::number(42.0));
        // Now independent of `slot`.
        slot = Value::number(0.0);
        assert_eq!(up.get(), Value::number(42.0));
        let _ = slot;
    }
}
