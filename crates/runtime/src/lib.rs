//! Merle runtime: the virtual machine that executes compiled Merle code.
//!
//! The [`runtime::Runtime`] owns the operand stack, the call-frame stack,
//! the class registry, the globals module and the heap. The interpreter
//! (`interp`) runs the bytecode produced by `merle-compiler`; generic
//! functions with multiple dispatch live in [`function`]; the native
//! standard library is registered at construction by `builtins`.

pub mod builtins;
pub mod disassemble;
pub mod function;
pub mod interp;
pub mod runtime;

pub use disassemble::disassemble;
pub use function::{
    Callable, Closure, Function, Local, NativeCallback, NativeRoutine, Routine, UpvalueSlot,
    MAX_PARAMS,
};
pub use interp::format_error;
pub use runtime::{AnyObject, Number, Runtime};
