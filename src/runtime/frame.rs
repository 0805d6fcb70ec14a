//! WebAssembly call frame
//!
//! Represents one active function call, containing its locals and the
//! position of its caller's state on the shared value and label stacks.

use super::control::CompiledFunction;
use super::RawValue;

/// Call frame for managing function calls
#[derive(Debug)]
pub struct Frame<'a> {
    /// Function index in the instance's function index space
    pub func_idx: u32,
    pub code: &'a CompiledFunction,
    /// Index of the next instruction to execute
    pub pc: usize,
    /// Local variables (parameters + declared locals)
    pub locals: Vec<RawValue>,
    /// Operand stack height once the arguments were popped
    pub stack_base: usize,
    /// Label stack height at entry
    pub label_base: usize,
    /// Number of values this function returns
    pub arity: usize,
}
