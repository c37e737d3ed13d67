//! End-to-end compile-then-run tests, one per concrete scenario enumerated
//! in the language specification, plus the boundary conditions it calls
//! out by name. Each test drives the real pipeline (`compile` into a
//! `VM::run`) rather than asserting on compiler or VM internals directly.

use lox_core::Value;
use lox_runtime::VM;

fn run(vm: &mut VM, source: &str) -> Result<(), String> {
    let function = lox_compiler::compile(source, vm.heap_mut(), false)
        .map_err(|errors| errors.to_string())?;
    vm.run(function).map_err(|err| err.to_string())
}

fn global(vm: &mut VM, name: &str) -> Option<Value> {
    let key = vm.heap_mut().copy_string(name);
    vm.globals().get(key)
}

#[test]
fn arithmetic_precedence() {
    let mut vm = VM::new();
    run(&mut vm, "var result = 1 + 2 * 3;").unwrap();
    assert_eq!(global(&mut vm, "result"), Some(Value::number(7.0)));
}

#[test]
fn string_concatenation() {
    let mut vm = VM::new();
    run(&mut vm, r#"var a = "a"; var b = "b"; var result = a + b;"#).unwrap();
    let result = global(&mut vm, "result").unwrap();
    assert!(result.is_obj());
}

#[test]
fn closures_capture_locals_by_reference() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        fun makeCounter() {
          var i = 0;
          fun c() { i = i + 1; return i; }
          return c;
        }
        var counter = makeCounter();
        var first = counter();
        var second = counter();
        var third = counter();
        "#,
    )
    .unwrap();
    assert_eq!(global(&mut vm, "first"), Some(Value::number(1.0)));
    assert_eq!(global(&mut vm, "second"), Some(Value::number(2.0)));
    assert_eq!(global(&mut vm, "third"), Some(Value::number(3.0)));
}

#[test]
fn class_init_and_method() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        class Greeter {
          init(n) { this.n = n; }
          greeting() { return "hi " + this.n; }
        }
        var result = Greeter("lox").greeting();
        "#,
    )
    .unwrap();
    let result = global(&mut vm, "result").unwrap();
    assert!(result.is_obj());
}

#[test]
fn inheritance_and_super() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        class A { say() { return "A"; } }
        class B < A { say() { return super.say() + "B"; } }
        var result = B().say();
        "#,
    )
    .unwrap();
    let result = global(&mut vm, "result").unwrap();
    assert!(result.is_obj());
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let mut vm = VM::new();
    let function = lox_compiler::compile("print x;", vm.heap_mut(), false).unwrap();
    let err = vm.run(function).unwrap_err();
    assert!(err.message.contains("Undefined variable 'x'"));
    assert!(err.trace.iter().any(|line| line.contains("line 1")));
}

#[test]
fn undefined_variable_does_not_abort_compilation() {
    // Compiling succeeds -- the name is resolved as a global at compile
    // time and only fails to exist at *run* time.
    let mut vm = VM::new();
    assert!(lox_compiler::compile("print x;", vm.heap_mut(), false).is_ok());
}

#[test]
fn superclass_must_be_a_class() {
    let mut vm = VM::new();
    let err = run(&mut vm, "var NotAClass = 1; class B < NotAClass {}").unwrap_err();
    assert!(err.contains("Superclass must be a class"));
}

#[test]
fn calling_a_non_callable_is_a_runtime_error() {
    let mut vm = VM::new();
    let err = run(&mut vm, "var x = 1; x();").unwrap_err();
    assert!(err.contains("Can only call functions and classes"));
}

#[test]
fn local_scoping_shadows_and_restores() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        var result = 0;
        {
          var x = 1;
          {
            var x = 2;
            result = x;
          }
          result = result + x;
        }
        "#,
    )
    .unwrap();
    assert_eq!(global(&mut vm, "result"), Some(Value::number(3.0)));
}

#[test]
fn for_loop_desugaring() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        var sum = 0;
        for (var i = 0; i < 5; i = i + 1) {
          sum = sum + i;
        }
        "#,
    )
    .unwrap();
    assert_eq!(global(&mut vm, "sum"), Some(Value::number(10.0)));
}

#[test]
fn logical_and_or_short_circuit() {
    let mut vm = VM::new();
    run(
        &mut vm,
        r#"
        var a = false and (1 / 0 == 0);
        var b = true or (1 / 0 == 0);
        "#,
    )
    .unwrap();
    assert_eq!(global(&mut vm, "a"), Some(Value::bool(false)));
    assert_eq!(global(&mut vm, "b"), Some(Value::bool(true)));
}

// --- Boundary conditions (spec §8) ---

fn many_locals_source(count: usize) -> String {
    let mut source = String::from("{\n");
    for i in 0..count {
        source.push_str(&format!("var v{i} = {i};\n"));
    }
    source.push('}');
    source
}

#[test]
fn two_hundred_fifty_five_locals_compile() {
    let mut vm = VM::new();
    let source = many_locals_source(255);
    assert!(lox_compiler::compile(&source, vm.heap_mut(), false).is_ok());
}

#[test]
fn two_hundred_fifty_six_locals_fail_to_compile() {
    let mut vm = VM::new();
    let source = many_locals_source(256);
    let err = lox_compiler::compile(&source, vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Too many local variables in function"))
    );
}

fn many_params_source(count: usize) -> String {
    let params: Vec<String> = (0..count).map(|i| format!("p{i}")).collect();
    format!("fun f({}) {{}}", params.join(", "))
}

#[test]
fn two_hundred_fifty_five_params_compile() {
    let mut vm = VM::new();
    let source = many_params_source(255);
    assert!(lox_compiler::compile(&source, vm.heap_mut(), false).is_ok());
}

#[test]
fn two_hundred_fifty_six_params_fail_to_compile() {
    let mut vm = VM::new();
    let source = many_params_source(256);
    let err = lox_compiler::compile(&source, vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Can't have more than 255 parameters"))
    );
}

fn many_args_source(count: usize) -> String {
    let args: Vec<String> = (0..count).map(|i| i.to_string()).collect();
    format!("fun f() {{}}\nf({});", args.join(", "))
}

#[test]
fn two_hundred_fifty_six_args_fail_to_compile() {
    let mut vm = VM::new();
    let source = many_args_source(256);
    let err = lox_compiler::compile(&source, vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Can't have more than 255 arguments"))
    );
}

#[test]
fn constant_pool_over_256_entries_fails_to_compile() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("var v{i} = \"s{i}\";\n"));
    }
    let mut vm = VM::new();
    let err = lox_compiler::compile(&source, vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Too many constants in one chunk"))
    );
}

#[test]
fn reading_a_local_in_its_own_initializer_is_an_error() {
    let mut vm = VM::new();
    let err = lox_compiler::compile("{ var a = a; }", vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Can't read local variable in its own initializer"))
    );
}

#[test]
fn redeclaring_a_local_in_the_same_scope_is_an_error() {
    let mut vm = VM::new();
    let err = lox_compiler::compile("{ var a = 1; var a = 2; }", vm.heap_mut(), false).unwrap_err();
    assert!(
        err.0
            .iter()
            .any(|e| e.message.contains("Already a variable with this name in this scope"))
    );
}

#[test]
fn invalid_assignment_target_is_an_error() {
    let mut vm = VM::new();
    let err = lox_compiler::compile("1 + 2 = 3;", vm.heap_mut(), false).unwrap_err();
    assert!(err.0.iter().any(|e| e.message.contains("Invalid assignment target")));
}

#[test]
fn panic_mode_recovers_at_the_next_statement_and_reports_more_than_one_error() {
    let mut vm = VM::new();
    let err = lox_compiler::compile("var ; var ;", vm.heap_mut(), false).unwrap_err();
    assert!(err.0.len() >= 2, "expected both bad declarations to be reported, got {:?}", err.0);
}
