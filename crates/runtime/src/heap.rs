//! Allocation, the intrusive sweep list, and tri-color mark-sweep
//! collection.
//!
//! `Heap` owns every object on the Lox heap and the string interner, but it
//! does not know what a "root" is -- the VM's value stack and the
//! compiler's in-progress function chain are different root sets at
//! different times, so `collect_garbage` takes root-marking as a closure
//! supplied by whichever of the two is live. This keeps the collector
//! usable both mid-compilation (interning identifiers and string literals
//! can itself allocate) and mid-execution.

use crate::objects::{
    BoundMethod, Class, Closure, Instance, LoxFunction, LoxString, Native, ObjRefExt, Upvalue,
    fnv1a_hash, obj_ref,
};
use crate::table::Table;
use lox_core::memory_stats::AllocStats;
use lox_core::{ObjHeader, ObjKind, ObjRef, Value};

pub struct Heap {
    objects: *mut ObjHeader,
    pub strings: Table,
    alloc_stats: AllocStats,
    grey_stack: Vec<ObjRef>,
    /// `STRESS_GC`: collect on every single allocation. Catches rooting
    /// bugs that would otherwise only surface under heap pressure.
    pub stress_gc: bool,
    /// `LOG_GC`: trace allocations and collections to `tracing`.
    pub log_gc: bool,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            objects: std::ptr::null_mut(),
            strings: Table::new(),
            alloc_stats: AllocStats::default(),
            grey_stack: Vec::new(),
            stress_gc: false,
            log_gc: false,
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.alloc_stats.bytes_allocated
    }

    #[inline]
    pub fn should_collect(&self) -> bool {
        self.alloc_stats.should_collect(self.stress_gc)
    }

    // -- Allocation -------------------------------------------------------

    fn link<T>(&mut self, value: T) -> *mut T {
        let ptr = Box::into_raw(Box::new(value));
        let header = ptr as *mut ObjHeader;
        unsafe {
            (*header).next.set(self.objects);
        }
        self.objects = header;
        self.alloc_stats.record_alloc(std::mem::size_of::<T>());
        if self.log_gc {
            tracing::trace!(bytes = std::mem::size_of::<T>(), kind = ?unsafe { (*header).kind }, "alloc");
        }
        ptr
    }

    /// Intern `s`, copying its bytes. Returns the existing canonical
    /// string if one with the same content is already interned.
    pub fn copy_string(&mut self, s: &str) -> *mut LoxString {
        let hash = fnv1a_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_string(s, hash) {
            return existing;
        }
        let ptr = self.link(LoxString::new_unlinked(s));
        self.strings.set(ptr, Value::nil());
        ptr
    }

    /// Intern an owned `String`, adopting its buffer when no equal string
    /// is already interned (avoids a copy for freshly-built strings, e.g.
    /// the result of `+` concatenation).
    pub fn take_string(&mut self, s: String) -> *mut LoxString {
        let hash = fnv1a_hash(s.as_bytes());
        if let Some(existing) = self.strings.find_string(&s, hash) {
            return existing;
        }
        let ptr = self.link(LoxString {
            header: ObjHeader::new(ObjKind::String),
            hash,
            bytes: s.into_boxed_str(),
        });
        self.strings.set(ptr, Value::nil());
        ptr
    }

    pub fn new_function(&mut self, name: Option<*mut LoxString>) -> *mut LoxFunction {
        self.link(LoxFunction::new_unlinked(name))
    }

    pub fn new_native(
        &mut self,
        name: *mut LoxString,
        arity: u8,
        function: crate::objects::NativeFn,
    ) -> *mut Native {
        self.link(Native {
            header: ObjHeader::new(ObjKind::Native),
            arity,
            function,
            name,
        })
    }

    pub fn new_closure(&mut self, function: *mut LoxFunction) -> *mut Closure {
        let upvalue_count = unsafe { (*function).upvalue_count };
        self.link(Closure {
            header: ObjHeader::new(ObjKind::Closure),
            function,
            upvalues: Vec::with_capacity(upvalue_count),
        })
    }

    pub fn new_upvalue(&mut self, location: *mut Value) -> *mut Upvalue {
        self.link(Upvalue {
            header: ObjHeader::new(ObjKind::Upvalue),
            location,
            closed: Value::nil(),
            next_open: std::ptr::null_mut(),
        })
    }

    pub fn new_class(&mut self, name: *mut LoxString) -> *mut Class {
        self.link(Class {
            header: ObjHeader::new(ObjKind::Class),
            name,
            methods: Table::new(),
        })
    }

    pub fn new_instance(&mut self, class: *mut Class) -> *mut Instance {
        self.link(Instance {
            header: ObjHeader::new(ObjKind::Instance),
            class,
            fields: Table::new(),
        })
    }

    pub fn new_bound_method(&mut self, receiver: Value, method: *mut Closure) -> *mut BoundMethod {
        self.link(BoundMethod {
            header: ObjHeader::new(ObjKind::BoundMethod),
            receiver,
            method,
        })
    }

    // -- Collection ---------------------------------------------------------

    /// Run one full mark-sweep cycle. `mark_roots` is called first and is
    /// expected to call [`Heap::mark_value`]/[`Heap::mark_object`] for
    /// every root value the caller (VM or compiler) currently holds live.
    pub fn collect_garbage(&mut self, mut mark_roots: impl FnMut(&mut Heap)) {
        if self.log_gc {
            tracing::debug!(before = self.alloc_stats.bytes_allocated, "gc begin");
        }
        mark_roots(self);
        self.trace_references();
        self.strings.remove_white(|s| !obj_ref(s).is_marked());
        self.sweep();
        self.alloc_stats.after_collect();
        if self.log_gc {
            tracing::debug!(
                after = self.alloc_stats.bytes_allocated,
                next_gc = self.alloc_stats.next_gc,
                "gc end"
            );
        }
    }

    pub fn mark_value(&mut self, value: Value) {
        if value.is_obj() {
            self.mark_object(value.as_obj());
        }
    }

    pub fn mark_object(&mut self, obj: ObjRef) {
        if obj.is_marked() {
            return;
        }
        obj.set_marked(true);
        self.grey_stack.push(obj);
    }

    fn trace_references(&mut self) {
        while let Some(obj) = self.grey_stack.pop() {
            self.blacken_object(obj);
        }
    }

    fn blacken_object(&mut self, obj: ObjRef) {
        match obj.kind() {
            ObjKind::Native | ObjKind::String => {}
            ObjKind::Upvalue => {
                let closed = unsafe { (*obj.as_upvalue()).closed };
                self.mark_value(closed);
            }
            ObjKind::Function => {
                let f = unsafe { &*obj.as_function() };
                if let Some(name) = f.name {
                    self.mark_object(obj_ref(name));
                }
                for constant in &f.chunk.constants {
                    self.mark_value(*constant);
                }
            }
            ObjKind::Closure => {
                let c = unsafe { &*obj.as_closure() };
                self.mark_object(obj_ref(c.function));
                for &upvalue in &c.upvalues {
                    self.mark_object(obj_ref(upvalue));
                }
            }
            ObjKind::Class => {
                let class = unsafe { &*obj.as_class() };
                self.mark_object(obj_ref(class.name));
                for (key, value) in class.methods.iter() {
                    self.mark_object(obj_ref(key));
                    self.mark_value(value);
                }
            }
            ObjKind::Instance => {
                let instance = unsafe { &*obj.as_instance() };
                self.mark_object(obj_ref(instance.class));
                for (key, value) in instance.fields.iter() {
                    self.mark_object(obj_ref(key));
                    self.mark_value(value);
                }
            }
            ObjKind::BoundMethod => {
                let bound = unsafe { &*obj.as_bound_method() };
                self.mark_value(bound.receiver);
                self.mark_object(obj_ref(bound.method));
            }
        }
    }

    fn sweep(&mut self) {
        let mut previous: *mut ObjHeader = std::ptr::null_mut();
        let mut current = self.objects;
        while !current.is_null() {
            let marked = unsafe { (*current).is_marked.get() };
            let next = unsafe { (*current).next.get() };
            if marked {
                unsafe { (*current).is_marked.set(false) };
                previous = current;
                current = next;
            } else {
                if previous.is_null() {
                    self.objects = next;
                } else {
                    unsafe { (*previous).next.set(next) };
                }
                self.free_object(current);
                current = next;
            }
        }
    }

    fn free_object(&mut self, header: *mut ObjHeader) {
        let kind = unsafe { (*header).kind };
        if self.log_gc {
            tracing::trace!(?kind, "free");
        }
        macro_rules! free_as {
            ($ty:ty) => {{
                let freed = std::mem::size_of::<$ty>();
                drop(unsafe { Box::from_raw(header as *mut $ty) });
                self.alloc_stats.record_free(freed);
            }};
        }
        match kind {
            ObjKind::String => free_as!(LoxString),
            ObjKind::Function => free_as!(LoxFunction),
            ObjKind::Native => free_as!(Native),
            ObjKind::Closure => free_as!(Closure),
            ObjKind::Upvalue => free_as!(Upvalue),
            ObjKind::Class => free_as!(Class),
            ObjKind::Instance => free_as!(Instance),
            ObjKind::BoundMethod => free_as!(BoundMethod),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.objects;
        while !current.is_null() {
            let next = unsafe { (*current).next.get() };
            self.free_object(current);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_string_interns() {
        let mut heap = Heap::new();
        let a = heap.copy_string("hello");
        let b = heap.copy_string("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn take_string_interns_against_copy_string() {
        let mut heap = Heap::new();
        let a = heap.copy_string("hi");
        let b = heap.take_string("hi".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new();
        let s = heap.copy_string("garbage");
        assert!(heap.bytes_allocated() > 0);
        // No roots marked: everything (except interned-table entries,
        // which are removed by remove_white) should be collected.
        heap.collect_garbage(|_| {});
        // The string is gone from the intern table too.
        let hash = fnv1a_hash(b"garbage");
        assert!(heap.strings.find_string("garbage", hash).is_none());
        let _ = s;
    }

    #[test]
    fn marked_roots_survive_collection() {
        let mut heap = Heap::new();
        let s = heap.copy_string("kept");
        heap.collect_garbage(|h| h.mark_object(obj_ref(s)));
        let hash = fnv1a_hash(b"kept");
        assert!(heap.strings.find_string("kept", hash).is_some());
    }

    #[test]
    fn closure_trace_reaches_its_function_and_upvalues() {
        let mut heap = Heap::new();
        let name = heap.copy_string("f");
        let func = heap.new_function(Some(name));
        unsafe {
            (*func).upvalue_count = 1;
        }
        let closure = heap.new_closure(func);
        let mut slot = Value::number(1.0);
        let up = heap.new_upvalue(&mut slot as *mut Value);
        unsafe {
            (*closure).upvalues.push(up);
        }
        heap.collect_garbage(|h| h.mark_object(obj_ref(closure)));
        // Survived: function, its name string, and the upvalue are all
        // still marked-and-unswept (we can't directly observe "alive" for
        // non-interned kinds other than by not crashing when we touch
        // them through the still-valid pointers).
        unsafe {
            assert_eq!((*func).name, Some(name));
            assert_eq!((*closure).upvalues[0], up);
        }
    }
}
