//! Compile-time error type.
//!
//! Mirrors the runtime crate's `RuntimeError`: a hand-rolled enum with a
//! manual `Display`/`Error` impl rather than a `thiserror` derive, so the
//! two halves of the interpreter report failures the same way.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub line: u32,
    pub message: String,
}

impl CompileError {
    pub fn new(line: u32, message: impl Into<String>) -> CompileError {
        CompileError {
            line,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error: {}", self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// A compilation pass can encounter more than one syntax error before it
/// gives up (panic-mode synchronization lets it keep scanning for more
/// instead of aborting at the first one); all of them are reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileErrors(pub Vec<CompileError>);

impl CompileErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for err in &self.0 {
            writeln!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}
