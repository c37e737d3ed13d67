//! Scanner, Pratt parsing table, and the single-pass compiler that turns
//! Lox source directly into a `lox_runtime::chunk::Chunk` tree, without
//! building an intermediate AST.

pub mod compiler;
pub mod error;
pub mod rules;
pub mod scanner;

pub use compiler::compile;
pub use error::{CompileError, CompileErrors};
pub use scanner::{Scanner, Token, TokenKind};
