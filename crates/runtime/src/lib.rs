//! Bytecode chunk, heap object model, garbage collector, and the stack VM.
//!
//! This crate owns everything that exists while a Lox program is running:
//! the [`chunk::Chunk`] the compiler emits into, the [`heap::Heap`] that
//! allocates and collects every heap object in `objects`, and the
//! [`vm::VM`] that drives execution. The compiler crate depends on this
//! one (for `Chunk`, `Heap`, and the concrete object constructors) rather
//! than the other way around.

pub mod chunk;
pub mod debug;
pub mod display;
pub mod error;
pub mod heap;
pub mod native;
pub mod objects;
pub mod table;
pub mod vm;

pub use chunk::{Chunk, OpCode};
pub use display::format_value;
pub use error::{InterpretError, InterpretResult, RuntimeError};
pub use heap::Heap;
pub use vm::VM;
