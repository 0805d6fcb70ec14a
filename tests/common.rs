//! Common test utilities shared between integration tests

#![allow(dead_code)]

use wasmcore::parser::encoding::{write_vs64, write_vu64};
use wasmcore::{decode, instantiate, Imports, Instance, Module};

/// The add-one module: type `[i32] -> [i32]`, one function, no exports.
pub const ADD_ONE_HEX: &str = "0061736d0100000001060160017f017f030201000a09010700200041016a0b";

/// Route `tracing` output through the test harness so `--nocapture` shows it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn module(wat: &str) -> Module {
    let bytes = wat::parse_str(wat).unwrap();
    decode(&bytes).unwrap()
}

pub fn instance(wat: &str) -> Instance {
    instantiate(module(wat), &Imports::new()).unwrap()
}

/// Unsigned LEB128 encoding, minimal length.
pub fn uleb(value: u64) -> Vec<u8> {
    let mut out = Vec::new();
    write_vu64(&mut out, value);
    out
}

/// Signed LEB128 encoding, minimal length.
pub fn sleb(value: i64) -> Vec<u8> {
    let mut out = Vec::new();
    write_vs64(&mut out, value);
    out
}
