//! Hand-assembled bytecode exercising the VM without going through the
//! compiler (that pairing is covered in `lox-compiler`'s integration
//! tests). These build a `Chunk` directly with `OpCode`s, the way
//! `vm.rs`'s own unit tests do for its simplest case.

use lox_core::Value;
use lox_runtime::chunk::OpCode;
use lox_runtime::VM;

fn script(build: impl FnOnce(&mut VM) -> *mut lox_runtime::objects::LoxFunction) -> VM {
    let mut vm = VM::new();
    let function = build(&mut vm);
    let result = vm.run(function);
    assert!(result.is_ok(), "script should run cleanly: {result:?}");
    vm
}

#[test]
fn arithmetic_with_operator_precedence() {
    // 1 + 2 * 3 == 7, stored into a global so the test can read it back
    // without capturing stdout.
    let vm = script(|vm| {
        let function = vm.heap_mut().new_function(None);
        let name = vm.heap_mut().copy_string("result");
        unsafe {
            let chunk = &mut (*function).chunk;
            let one = chunk.add_constant(Value::number(1.0)).unwrap();
            let two = chunk.add_constant(Value::number(2.0)).unwrap();
            let three = chunk.add_constant(Value::number(3.0)).unwrap();
            let name_const = chunk.add_constant(Value::obj(lox_runtime::objects::obj_ref(name))).unwrap();

            chunk.write_op(OpCode::Constant, 1);
            chunk.write(one, 1);
            chunk.write_op(OpCode::Constant, 1);
            chunk.write(two, 1);
            chunk.write_op(OpCode::Constant, 1);
            chunk.write(three, 1);
            chunk.write_op(OpCode::Multiply, 1);
            chunk.write_op(OpCode::Add, 1);
            chunk.write_op(OpCode::DefineGlobal, 1);
            chunk.write(name_const, 1);
            chunk.write_op(OpCode::Nil, 1);
            chunk.write_op(OpCode::Return, 1);
        }
        function
    });

    let mut vm = vm;
    let key = vm.heap_mut().copy_string("result");
    assert_eq!(vm.globals().get(key), Some(Value::number(7.0)));
}

#[test]
fn set_global_on_undefined_name_is_a_runtime_error_and_does_not_define_it() {
    let mut vm = VM::new();
    let function = vm.heap_mut().new_function(None);
    let name = vm.heap_mut().copy_string("nope");
    unsafe {
        let chunk = &mut (*function).chunk;
        let val = chunk.add_constant(Value::number(1.0)).unwrap();
        let name_const = chunk
            .add_constant(Value::obj(lox_runtime::objects::obj_ref(name)))
            .unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(val, 1);
        chunk.write_op(OpCode::SetGlobal, 1);
        chunk.write(name_const, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 1);
    }

    let result = vm.run(function);
    assert!(result.is_err());
    let key = vm.heap_mut().copy_string("nope");
    assert_eq!(vm.globals().get(key), None, "a failed SET_GLOBAL must not create the global");
}

#[test]
fn arithmetic_on_non_numbers_is_a_runtime_error() {
    let mut vm = VM::new();
    let function = vm.heap_mut().new_function(None);
    unsafe {
        let chunk = &mut (*function).chunk;
        let t = chunk.add_constant(Value::bool(true)).unwrap();
        let n = chunk.add_constant(Value::number(1.0)).unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(t, 1);
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(n, 1);
        chunk.write_op(OpCode::Add, 1);
        chunk.write_op(OpCode::Return, 1);
    }

    let err = vm.run(function).unwrap_err();
    assert!(err.message.contains("Operands must be numbers"));
}

#[test]
fn garbage_collection_during_a_run_keeps_the_live_stack_intact() {
    // Force a collection mid-script (STRESS_GC) and confirm the value the
    // script goes on to use afterward survives: the constant pool entry
    // (reachable through the in-flight call frame's closure) and the
    // freshly pushed value on the stack must both still be valid.
    let mut vm = VM::new();
    vm.heap_mut().stress_gc = true;

    let function = vm.heap_mut().new_function(None);
    let name = vm.heap_mut().copy_string("kept");
    unsafe {
        let chunk = &mut (*function).chunk;
        let s = chunk
            .add_constant(Value::obj(lox_runtime::objects::obj_ref(name)))
            .unwrap();
        let name_const = chunk
            .add_constant(Value::obj(lox_runtime::objects::obj_ref(name)))
            .unwrap();
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(s, 1);
        chunk.write_op(OpCode::DefineGlobal, 1);
        chunk.write(name_const, 1);
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Return, 1);
    }

    assert!(vm.run(function).is_ok());
    let key = vm.heap_mut().copy_string("kept");
    assert_eq!(vm.globals().get(key), Some(Value::obj(lox_runtime::objects::obj_ref(name))));
}
