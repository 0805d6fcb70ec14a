//! Binary module decoding and validation.

pub mod encoding;
pub mod instruction;
pub mod limits;
pub mod module;
pub mod reader;
pub mod types;
pub mod validate;

use thiserror::Error;

pub use module::{decode, Module};
pub use validate::{validate, ValidationError, ValidationErrorKind};

/// Malformed binary input. Offsets are absolute byte positions in the module.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("magic header not detected or unknown binary version")]
    InvalidHeader,

    #[error("unexpected end at offset {offset:#x}")]
    UnexpectedEnd { offset: usize },

    #[error("integer representation too long or too large at offset {offset:#x}")]
    MalformedInteger { offset: usize },

    #[error("malformed UTF-8 encoding at offset {offset:#x}")]
    InvalidUtf8 { offset: usize },

    #[error("malformed section id {id} at offset {offset:#x}")]
    UnknownSection { id: u8, offset: usize },

    #[error("unexpected section {id} at offset {offset:#x}: out of order or duplicated")]
    SectionOrder { id: u8, offset: usize },

    #[error("section {id} size mismatch at offset {offset:#x}")]
    SectionSizeMismatch { id: u8, offset: usize },

    #[error("data count ({declared}) and data section ({actual}) have inconsistent lengths")]
    DataCountMismatch { declared: u32, actual: u32 },

    #[error("function ({functions}) and code section ({bodies}) have inconsistent lengths")]
    FunctionCodeMismatch { functions: u32, bodies: u32 },

    #[error("malformed limits flag {flag:#04x} at offset {offset:#x}")]
    MalformedLimits { flag: u8, offset: usize },

    #[error("malformed mutability {byte:#04x} at offset {offset:#x}")]
    MalformedMutability { byte: u8, offset: usize },

    #[error("too many locals at offset {offset:#x}")]
    TooManyLocals { offset: usize },

    #[error("too many {what}: {count} exceeds {limit}")]
    LimitExceeded { what: &'static str, count: u32, limit: u32 },

    #[error("malformed value type {byte:#04x} at offset {offset:#x}")]
    InvalidValueType { byte: u8, offset: usize },

    #[error("malformed reference type {byte:#04x} at offset {offset:#x}")]
    InvalidRefType { byte: u8, offset: usize },

    #[error("malformed function type form {byte:#04x} at offset {offset:#x}")]
    InvalidFunctionType { byte: u8, offset: usize },

    #[error("malformed block type at offset {offset:#x}")]
    InvalidBlockType { offset: usize },

    #[error("malformed import or export kind {byte:#04x} at offset {offset:#x}")]
    InvalidExternalKind { byte: u8, offset: usize },

    #[error("malformed segment flags {flags} at offset {offset:#x}")]
    InvalidSegmentFlags { flags: u32, offset: usize },

    #[error("illegal opcode {opcode:#04x} at offset {offset:#x}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("illegal opcode 0xfc {sub} at offset {offset:#x}")]
    UnknownMiscOpcode { sub: u32, offset: usize },

    #[error("zero byte expected at offset {offset:#x}")]
    ZeroByteExpected { offset: usize },
}

impl DecodeError {
    /// Byte offset the error points at, if it has one.
    pub fn offset(&self) -> Option<usize> {
        use DecodeError::*;
        match *self {
            UnexpectedEnd { offset }
            | MalformedInteger { offset }
            | InvalidUtf8 { offset }
            | UnknownSection { offset, .. }
            | SectionOrder { offset, .. }
            | SectionSizeMismatch { offset, .. }
            | MalformedLimits { offset, .. }
            | MalformedMutability { offset, .. }
            | TooManyLocals { offset }
            | InvalidValueType { offset, .. }
            | InvalidRefType { offset, .. }
            | InvalidFunctionType { offset, .. }
            | InvalidBlockType { offset }
            | InvalidExternalKind { offset, .. }
            | InvalidSegmentFlags { offset, .. }
            | UnknownOpcode { offset, .. }
            | UnknownMiscOpcode { offset, .. }
            | ZeroByteExpected { offset } => Some(offset),
            InvalidHeader | DataCountMismatch { .. } | FunctionCodeMismatch { .. } | LimitExceeded { .. } => None,
        }
    }
}
