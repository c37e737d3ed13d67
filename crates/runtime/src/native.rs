//! Built-in native functions installed into the global namespace at VM
//! startup.

use lox_core::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// `clock()` -- seconds since the Unix epoch, as a float. The reference
/// implementation returns process-relative CPU time; wall-clock seconds
/// since epoch is equally useful for timing Lox scripts and avoids pulling
/// in a platform clock crate just for this one function.
pub fn clock(_args: &[Value]) -> Value {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Value::number(now.as_secs_f64())
}
