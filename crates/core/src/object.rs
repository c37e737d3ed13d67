//! Heap object header shared by every object kind.
//!
//! Every allocation on the Lox heap is prefixed by an [`ObjHeader`]: a type
//! tag, a mark bit for the tracing collector, and an intrusive `next`
//! pointer threading the object onto the process-wide sweep list. Concrete
//! object bodies (strings, functions, closures, ...) live in `lox-runtime`,
//! which is the crate that owns allocation and the collector; this crate
//! only knows the header layout, not what follows it.

use std::cell::Cell;
use std::fmt;

/// Discriminant for the kind of object a header is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

/// The common prefix of every heap object.
///
/// `next` links into the heap's intrusive singly-linked sweep list; it is a
/// `Cell` rather than a plain field because the collector rewrites it while
/// only ever holding a shared reference to the object graph.
#[repr(C)]
pub struct ObjHeader {
    pub kind: ObjKind,
    pub is_marked: Cell<bool>,
    pub next: Cell<*mut ObjHeader>,
}

impl ObjHeader {
    pub fn new(kind: ObjKind) -> Self {
        ObjHeader {
            kind,
            is_marked: Cell::new(false),
            next: Cell::new(std::ptr::null_mut()),
        }
    }
}

/// A type-erased, non-owning reference to a heap object.
///
/// Equality is pointer identity. That is correct for every Lox object kind:
/// strings are interned so content equality and pointer equality coincide,
/// and Lox has no operator overloading for anything else.
#[derive(Clone, Copy)]
pub struct ObjRef(pub *mut ObjHeader);

impl ObjRef {
    #[inline]
    pub fn kind(self) -> ObjKind {
        unsafe { (*self.0).kind }
    }

    #[inline]
    pub fn is_marked(self) -> bool {
        unsafe { (*self.0).is_marked.get() }
    }

    #[inline]
    pub fn set_marked(self, marked: bool) {
        unsafe { (*self.0).is_marked.set(marked) }
    }

    #[inline]
    pub fn next(self) -> *mut ObjHeader {
        unsafe { (*self.0).next.get() }
    }

    #[inline]
    pub fn set_next(self, next: *mut ObjHeader) {
        unsafe { (*self.0).next.set(next) }
    }

    #[inline]
    pub fn header(self) -> *mut ObjHeader {
        self.0
    }

    /// Reinterpret this reference as a pointer to the concrete struct that
    /// follows the header. Caller must know `kind()` matches `T`.
    #[inline]
    pub fn as_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for ObjRef {}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:?} @ {:?})", self.kind(), self.0)
    }
}
