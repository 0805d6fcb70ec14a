//! Instruction semantics that are more than a one-line operator: trapping
//! arithmetic, float edge cases, truncation and memory access.

pub mod conversion;
pub mod memory;
pub mod numeric;

pub(crate) use crate::parser::instruction::MemArg;
pub(crate) use crate::runtime::memory::Memory;
pub(crate) use crate::runtime::stack::Stack;
pub(crate) use crate::runtime::{RawValue, Trap};
