//! WebAssembly runtime implementation
//!
//! This module provides the execution engine for validated modules: the
//! instance store (memories, tables, globals), host imports and the
//! stack-machine interpreter.

pub mod control;
pub mod executor;
pub mod frame;
pub mod global;
pub mod imports;
pub mod instance;
pub mod memory;
pub mod ops;
pub mod stack;
pub mod table;
pub mod value;

use thiserror::Error;

use crate::parser::ValidationError;

pub use imports::{Caller, Extern, HostFunc, Imports};
pub use instance::{instantiate, instantiate_with_config, invoke, Callee, Instance};
pub use memory::Memory;
pub use table::Table;
pub use value::{RawValue, Value};

/// A runtime fault. A trap aborts the current invocation; the instance's
/// memories, tables and globals keep whatever state they had at that point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Trap {
    #[error("unreachable executed")]
    Unreachable,

    #[error("out of bounds memory access")]
    MemoryOutOfBounds,

    #[error("out of bounds table access")]
    TableOutOfBounds,

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("integer overflow")]
    IntegerOverflow,

    #[error("invalid conversion to integer")]
    InvalidConversion,

    #[error("call stack exhausted")]
    CallStackExhausted,

    #[error("indirect call type mismatch")]
    IndirectCallTypeMismatch,

    #[error("uninitialized element")]
    UninitializedElement,

    #[error("fuel exhausted")]
    ResourceExhausted,

    #[error("host function failed: {0}")]
    Host(String),

    #[error("unknown export {0:?}")]
    UnknownExport(String),

    #[error("export {0:?} is not a function")]
    NotAFunction(String),

    #[error("unknown function {0}")]
    UnknownFunction(u32),

    #[error("global {0:?} is immutable")]
    ImmutableGlobal(String),

    #[error("argument mismatch: expected {expected}, got {actual}")]
    ArgumentMismatch { expected: String, actual: String },
}

/// Failure to create an instance from a module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("invalid module: {0}")]
    Invalid(#[from] ValidationError),

    #[error("unresolved import {module}.{name}")]
    UnresolvedImport { module: String, name: String },

    #[error("incompatible import type for {module}.{name}: expected {expected}")]
    SignatureMismatch { module: String, name: String, expected: String },

    #[error("cannot allocate {pages} pages of memory")]
    MemoryAllocation { pages: u32 },

    #[error("cannot allocate a table of {elements} elements")]
    TableAllocation { elements: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("instantiation trapped: {0}")]
    Trap(#[from] Trap),
}
