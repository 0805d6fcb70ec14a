//! A WebAssembly binary decoder, validator and interpreter.
//!
//! wasmcore takes a module through three phases, each with its own error
//! type:
//!
//! - [`decode`] -- Reads `.wasm` bytes into a [`Module`], rejecting malformed
//!   input with a [`DecodeError`].
//! - [`validate`] -- Type-checks the module ([`ValidationError`]). The result
//!   is memoised, so sharing one module between many instances checks it once.
//! - [`instantiate`] and [`invoke`] -- Link the module against host
//!   [`Imports`] ([`LinkError`]) and run its functions on a stack-machine
//!   interpreter ([`Trap`]).
//!
//! # Example
//!
//! ```
//! use wasmcore::{decode, instantiate, invoke, Imports, Value};
//!
//! // (func (param i32) (result i32) local.get 0 i32.const 1 i32.add)
//! let bytes = [
//!     0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, 0x01, 0x06, 0x01, 0x60, 0x01, 0x7f, 0x01, 0x7f,
//!     0x03, 0x02, 0x01, 0x00, 0x0a, 0x09, 0x01, 0x07, 0x00, 0x20, 0x00, 0x41, 0x01, 0x6a, 0x0b,
//! ];
//!
//! let module = decode(&bytes).unwrap();
//! let mut instance = instantiate(module, &Imports::new()).unwrap();
//! assert_eq!(invoke(&mut instance, 0, &[Value::I32(41)]).unwrap(), vec![Value::I32(42)]);
//! ```
//!
//! # Specification
//!
//! Targets the [WebAssembly 2.0 specification](https://webassembly.github.io/spec/core/)
//! without SIMD, threads or exception handling: the MVP instruction set plus
//! sign extension, saturating truncation, bulk memory, reference types and
//! multi-value.

pub mod config;
pub mod parser;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use parser::{decode, validate, DecodeError, Module, ValidationError, ValidationErrorKind};
pub use runtime::{
    instantiate, instantiate_with_config, invoke, Callee, Caller, Extern, HostFunc, Imports, Instance, LinkError,
    Memory, Table, Trap, Value,
};
