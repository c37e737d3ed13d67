//! Value-to-string conversion, used by `print`, string concatenation, and
//! the disassembler's constant dump.
//!
//! This can't live in `lox-core` because object kinds (functions, classes,
//! ...) are defined in this crate; `lox-core::Value` only knows about a
//! type-erased `ObjRef`.

use crate::objects::ObjRefExt;
use lox_core::{ObjKind, Value};

/// Render a value the way `print` and runtime error messages do.
pub fn format_value(value: Value) -> String {
    if value.is_nil() {
        "nil".to_string()
    } else if value.is_bool() {
        if value.as_bool() { "true" } else { "false" }.to_string()
    } else if value.is_number() {
        format_number(value.as_number())
    } else if value.is_obj() {
        format_object(value)
    } else {
        unreachable!("Value must be nil, bool, number, or obj")
    }
}

/// Lox numbers are IEEE doubles printed without a forced decimal point:
/// `3` not `3.0`, but `3.5` stays `3.5`.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        "0".to_string()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

fn format_object(value: Value) -> String {
    let obj = value.as_obj();
    match obj.kind() {
        ObjKind::String => unsafe { (*obj.as_string()).as_str().to_string() },
        ObjKind::Function => format_function_name(obj.as_function()),
        ObjKind::Native => "<native fn>".to_string(),
        ObjKind::Closure => format_function_name(unsafe { (*obj.as_closure()).function }),
        ObjKind::Upvalue => "upvalue".to_string(),
        ObjKind::Class => unsafe { (*(*obj.as_class()).name).as_str().to_string() },
        ObjKind::Instance => {
            let instance = unsafe { &*obj.as_instance() };
            let class_name = unsafe { (*(*instance.class).name).as_str() };
            format!("{class_name} instance")
        }
        ObjKind::BoundMethod => {
            let bound = unsafe { &*obj.as_bound_method() };
            let function = unsafe { (*bound.method).function };
            format_function_name(function)
        }
    }
}

fn format_function_name(function: *mut crate::objects::LoxFunction) -> String {
    match unsafe { (*function).name } {
        Some(name) => format!("<fn {}>", unsafe { (*name).as_str() }),
        None => "<script>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_print_without_trailing_zero() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn fractions_keep_their_digits() {
        assert_eq!(format_number(3.5), "3.5");
    }

    #[test]
    fn nil_and_bools() {
        assert_eq!(format_value(Value::nil()), "nil");
        assert_eq!(format_value(Value::bool(true)), "true");
        assert_eq!(format_value(Value::bool(false)), "false");
    }
}
