//! The stack-based bytecode interpreter.
//!
//! One [`VM`] executes one call tree to completion. The value stack and
//! call-frame stack are both fixed-capacity: slices never move once
//! allocated, which is what lets an open [`Upvalue`] hold a raw pointer
//! straight into a stack slot (see `objects.rs`) without the VM ever
//! needing to fix the pointer up on a `push`.

use crate::chunk::OpCode;
use crate::display::format_value;
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::native::clock;
use crate::objects::{Closure, LoxFunction, LoxString, ObjRefExt, obj_ref};
use crate::table::Table;
use lox_core::{ObjKind, Value};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: *mut Closure,
    ip: usize,
    /// Index into `VM::stack` of this frame's slot 0.
    slots_base: usize,
}

pub struct VM {
    frames: Vec<CallFrame>,
    stack: Box<[Value]>,
    stack_top: usize,
    globals: Table,
    heap: Heap,
    open_upvalues: *mut crate::objects::Upvalue,
    init_string: *mut LoxString,
    pub trace_execution: bool,
}

impl VM {
    pub fn new() -> VM {
        let mut heap = Heap::new();
        let init_string = heap.copy_string("init");
        let mut vm = VM {
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: vec![Value::nil(); STACK_MAX].into_boxed_slice(),
            stack_top: 0,
            globals: Table::new(),
            heap,
            open_upvalues: std::ptr::null_mut(),
            init_string,
            trace_execution: false,
        };
        vm.define_native("clock", 0, clock);
        vm
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Exposed for tests and embedders that want to inspect top-level
    /// `var` bindings left behind after a script runs.
    pub fn globals(&self) -> &Table {
        &self.globals
    }

    /// Run a freshly-compiled top-level function to completion.
    pub fn run(&mut self, function: *mut LoxFunction) -> Result<(), RuntimeError> {
        let closure = self.heap.new_closure(function);
        // Slot 0 of the outermost frame is reserved for the callee itself,
        // same as every other call -- see `call_value`.
        self.push(Value::obj(obj_ref(closure)));
        self.call(closure, 0)?;
        self.run_loop()
    }

    fn define_native(&mut self, name: &str, arity: u8, function: crate::objects::NativeFn) {
        let name_ptr = self.heap.copy_string(name);
        // Root the name and the native object on the stack across the two
        // allocations, per the allocation-safepoint discipline documented
        // on `Heap::collect_garbage`.
        self.push(Value::obj(obj_ref(name_ptr)));
        let native_ptr = self.heap.new_native(name_ptr, arity, function);
        self.push(Value::obj(obj_ref(native_ptr)));
        self.globals.set(name_ptr, self.stack[self.stack_top - 1]);
        self.pop();
        self.pop();
    }

    // -- Stack helpers --------------------------------------------------

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack[self.stack_top] = value;
        self.stack_top += 1;
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack_top -= 1;
        self.stack[self.stack_top]
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top - 1 - distance]
    }

    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let mut err = RuntimeError::new(message.into());
        for frame in self.frames.iter().rev() {
            let function = unsafe { (*frame.closure).function };
            let line = unsafe { (*function).chunk.line_at(frame.ip - 1) };
            let name = match unsafe { (*function).name } {
                Some(n) => unsafe { (*n).as_str().to_string() },
                None => "script".to_string(),
            };
            err.trace.push(format!("[line {line}] in {name}()"));
        }
        err
    }

    // -- Calling ----------------------------------------------------------

    fn call(&mut self, closure: *mut Closure, arg_count: u8) -> Result<(), RuntimeError> {
        let function = unsafe { (*closure).function };
        let arity = unsafe { (*function).arity };
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots_base: self.stack_top - arg_count as usize - 1,
        });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        if !callee.is_obj() {
            return Err(self.runtime_error("Can only call functions and classes."));
        }
        match callee.as_obj().kind() {
            ObjKind::Closure => self.call(callee.as_obj().as_closure(), arg_count),
            ObjKind::Native => {
                let native = unsafe { &*callee.as_obj().as_native() };
                let start = self.stack_top - arg_count as usize;
                let result = (native.function)(&self.stack[start..self.stack_top]);
                self.stack_top -= arg_count as usize + 1;
                self.push(result);
                Ok(())
            }
            ObjKind::Class => {
                let class = callee.as_obj().as_class();
                let instance = self.heap.new_instance(class);
                let slot = self.stack_top - arg_count as usize - 1;
                self.stack[slot] = Value::obj(obj_ref(instance));
                let init = unsafe { (*class).methods.get(self.init_string) };
                match init {
                    Some(initializer) => self.call(initializer.as_obj().as_closure(), arg_count),
                    None if arg_count != 0 => Err(self.runtime_error(format!(
                        "Expected 0 arguments but got {arg_count}."
                    ))),
                    None => Ok(()),
                }
            }
            ObjKind::BoundMethod => {
                let bound = unsafe { &*callee.as_obj().as_bound_method() };
                let (receiver, method) = (bound.receiver, bound.method);
                let slot = self.stack_top - arg_count as usize - 1;
                self.stack[slot] = receiver;
                self.call(method, arg_count)
            }
            _ => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn invoke_from_class(
        &mut self,
        class: *mut crate::objects::Class,
        name: *mut LoxString,
        arg_count: u8,
    ) -> Result<(), RuntimeError> {
        let method = unsafe { (*class).methods.get(name) }.ok_or_else(|| {
            self.runtime_error(format!("Undefined property '{}'.", unsafe {
                (*name).as_str()
            }))
        })?;
        self.call(method.as_obj().as_closure(), arg_count)
    }

    fn invoke(&mut self, name: *mut LoxString, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        if !receiver.is_obj() || receiver.as_obj().kind() != ObjKind::Instance {
            return Err(self.runtime_error("Only instances have properties."));
        }
        let instance = unsafe { &*receiver.as_obj().as_instance() };
        if let Some(field) = instance.fields.get(name) {
            let slot = self.stack_top - arg_count as usize - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }
        let class = instance.class;
        self.invoke_from_class(class, name, arg_count)
    }

    fn bind_method(
        &mut self,
        class: *mut crate::objects::Class,
        name: *mut LoxString,
    ) -> Result<(), RuntimeError> {
        let method = unsafe { (*class).methods.get(name) }.ok_or_else(|| {
            self.runtime_error(format!("Undefined property '{}'.", unsafe {
                (*name).as_str()
            }))
        })?;
        let bound = self
            .heap
            .new_bound_method(self.peek(0), method.as_obj().as_closure());
        self.pop();
        self.push(Value::obj(obj_ref(bound)));
        Ok(())
    }

    // -- Upvalues -----------------------------------------------------------

    fn capture_upvalue(&mut self, local_index: usize) -> *mut crate::objects::Upvalue {
        let mut prev: *mut crate::objects::Upvalue = std::ptr::null_mut();
        let mut current = self.open_upvalues;
        while !current.is_null() {
            let loc = unsafe { (*current).location };
            if loc as usize <= &self.stack[local_index] as *const Value as usize {
                break;
            }
            prev = current;
            current = unsafe { (*current).next_open };
        }
        if !current.is_null()
            && unsafe { (*current).location } == &mut self.stack[local_index] as *mut Value
        {
            return current;
        }
        let created = self
            .heap
            .new_upvalue(&mut self.stack[local_index] as *mut Value);
        unsafe {
            (*created).next_open = current;
        }
        if prev.is_null() {
            self.open_upvalues = created;
        } else {
            unsafe {
                (*prev).next_open = created;
            }
        }
        created
    }

    fn close_upvalues(&mut self, from_index: usize) {
        let boundary = &self.stack[from_index] as *const Value as usize;
        while !self.open_upvalues.is_null() {
            let loc = unsafe { (*self.open_upvalues).location } as usize;
            if loc < boundary {
                break;
            }
            let upvalue = self.open_upvalues;
            unsafe {
                (*upvalue).close();
                self.open_upvalues = (*upvalue).next_open;
            }
        }
    }

    // -- GC integration ---------------------------------------------------

    fn collect_if_needed(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let stack_top = self.stack_top;
        let stack = &self.stack;
        let frames = &self.frames;
        let globals = &self.globals;
        let open_upvalues = self.open_upvalues;
        let init_string = self.init_string;
        self.heap.collect_garbage(|h| {
            for value in &stack[..stack_top] {
                h.mark_value(*value);
            }
            for frame in frames {
                h.mark_object(obj_ref(frame.closure));
            }
            for (key, value) in globals.iter() {
                h.mark_object(obj_ref(key));
                h.mark_value(value);
            }
            let mut up = open_upvalues;
            while !up.is_null() {
                h.mark_object(obj_ref(up));
                up = unsafe { (*up).next_open };
            }
            h.mark_object(obj_ref(init_string));
        });
    }

    // -- The dispatch loop --------------------------------------------------

    fn current_function(&self) -> *mut LoxFunction {
        unsafe { (*self.frames.last().unwrap().closure).function }
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let byte = unsafe { (*(*frame.closure).function).chunk.read_byte(frame.ip) };
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let frame = self.frames.last_mut().unwrap();
        let short = unsafe { (*(*frame.closure).function).chunk.read_short(frame.ip) };
        frame.ip += 2;
        short
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte();
        unsafe { (*self.current_function()).chunk.constants[index as usize] }
    }

    fn read_string(&mut self) -> *mut LoxString {
        self.read_constant().as_obj().as_string()
    }

    fn run_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.trace_execution {
                let frame = self.frames.last().unwrap();
                let function = unsafe { (*frame.closure).function };
                crate::debug::disassemble_instruction(
                    unsafe { &(*function).chunk },
                    frame.ip,
                );
            }

            let instruction = OpCode::from_u8(self.read_byte());
            match instruction {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::nil()),
                OpCode::True => self.push(Value::bool(true)),
                OpCode::False => self.push(Value::bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slots_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                unsafe { (*name).as_str() }
                            )));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    self.globals.set(name, self.peek(0));
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    if self.globals.set(name, self.peek(0)) {
                        self.globals.delete(name);
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            unsafe { (*name).as_str() }
                        )));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = unsafe { (*closure).upvalues[slot] };
                    self.push(unsafe { (*upvalue).get() });
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = unsafe { (*closure).upvalues[slot] };
                    let value = self.peek(0);
                    unsafe { (*upvalue).set(value) };
                }
                OpCode::GetProperty => {
                    let receiver = self.peek(0);
                    if !receiver.is_obj() || receiver.as_obj().kind() != ObjKind::Instance {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let name = self.read_string();
                    let instance = unsafe { &*receiver.as_obj().as_instance() };
                    if let Some(value) = instance.fields.get(name) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = instance.class;
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let receiver = self.peek(1);
                    if !receiver.is_obj() || receiver.as_obj().kind() != ObjKind::Instance {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let name = self.read_string();
                    let instance = unsafe { &mut *receiver.as_obj().as_instance() };
                    let value = self.peek(0);
                    instance.fields.set(name, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = self.pop();
                    self.bind_method(superclass.as_obj().as_class(), name)?;
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::bool(values_equal(a, b)));
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_number(|a, b| a - b)?,
                OpCode::Multiply => self.binary_number(|a, b| a * b)?,
                OpCode::Divide => self.binary_number(|a, b| a / b)?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::bool(!is_truthy(value)));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let value = self.pop();
                    self.push(Value::number(-value.as_number()));
                }
                OpCode::Print => {
                    let value = self.pop();
                    println!("{}", format_value(value));
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if !is_truthy(self.peek(0)) {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                    self.collect_if_needed();
                }
                OpCode::Invoke => {
                    let method = self.read_string();
                    let arg_count = self.read_byte();
                    self.invoke(method, arg_count)?;
                    self.collect_if_needed();
                }
                OpCode::SuperInvoke => {
                    let method = self.read_string();
                    let arg_count = self.read_byte();
                    let superclass = self.pop();
                    self.invoke_from_class(superclass.as_obj().as_class(), method, arg_count)?;
                    self.collect_if_needed();
                }
                OpCode::Closure => {
                    let function = self.read_constant().as_obj().as_function();
                    let closure = self.heap.new_closure(function);
                    self.push(Value::obj(obj_ref(closure)));
                    self.collect_if_needed();
                    let upvalue_count = unsafe { (*function).upvalue_count };
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte();
                        let index = self.read_byte();
                        let upvalue = if is_local != 0 {
                            let base = self.frames.last().unwrap().slots_base;
                            self.capture_upvalue(base + index as usize)
                        } else {
                            let enclosing = self.frames.last().unwrap().closure;
                            unsafe { (*enclosing).upvalues[index as usize] }
                        };
                        unsafe {
                            (*closure).upvalues.push(upvalue);
                        }
                    }
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack_top - 1);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slots_base = self.frames.last().unwrap().slots_base;
                    self.close_upvalues(slots_base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack_top = slots_base;
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.heap.new_class(name);
                    self.push(Value::obj(obj_ref(class)));
                    self.collect_if_needed();
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    if !superclass.is_obj() || superclass.as_obj().kind() != ObjKind::Class {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let superclass_ptr = superclass.as_obj().as_class();
                    let subclass_ptr = self.peek(0).as_obj().as_class();
                    let methods: Vec<_> =
                        unsafe { (*superclass_ptr).methods.iter().collect() };
                    for (key, value) in methods {
                        unsafe { (*subclass_ptr).methods.set(key, value) };
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let class = self.peek(1).as_obj().as_class();
                    unsafe {
                        (*class).methods.set(name, method);
                    }
                    self.pop();
                }
            }
        }
    }

    fn binary_number(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(Value::number(op(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(Value::bool(op(a, b)));
        Ok(())
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        let (a, b) = (self.peek(1), self.peek(0));
        if a.is_number() && b.is_number() {
            let b = self.pop().as_number();
            let a = self.pop().as_number();
            self.push(Value::number(a + b));
            Ok(())
        } else if a.is_obj()
            && b.is_obj()
            && a.as_obj().kind() == ObjKind::String
            && b.as_obj().kind() == ObjKind::String
        {
            let b = self.pop();
            let a = self.pop();
            let mut joined = unsafe { (*a.as_obj().as_string()).as_str().to_string() };
            joined.push_str(unsafe { (*b.as_obj().as_string()).as_str() });
            let ptr = self.heap.take_string(joined);
            self.push(Value::obj(obj_ref(ptr)));
            self.collect_if_needed();
            Ok(())
        } else {
            Err(self.runtime_error("Operands must be two numbers or two strings."))
        }
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn is_truthy(value: Value) -> bool {
    !value.is_falsey()
}

fn values_equal(a: Value, b: Value) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_lox_semantics() {
        assert!(!is_truthy(Value::nil()));
        assert!(!is_truthy(Value::bool(false)));
        assert!(is_truthy(Value::bool(true)));
        assert!(is_truthy(Value::number(0.0)));
    }

    #[test]
    fn empty_vm_runs_a_return_only_script() {
        let mut vm = VM::new();
        let function = vm.heap_mut().new_function(None);
        unsafe {
            (*function)
                .chunk
                .write_op(crate::chunk::OpCode::Return, 1);
        }
        assert!(vm.run(function).is_ok());
    }
}
