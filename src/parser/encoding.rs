//! Binary format constants and LEB128 writers.
//!
//! The constants are shared by the decoder and the validator; the writers are
//! the inverse of [`super::reader::Reader`]'s integer readers and are used to
//! assemble byte fixtures.

// ---------------------------------------------------------------------------
// Module preamble (§5.5.16)
// ---------------------------------------------------------------------------

pub const MAGIC: [u8; 4] = *b"\0asm";
pub const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

// Section IDs (§5.5.2)
pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;
pub const SECTION_DATA_COUNT: u8 = 12;

/// Position of each known section in the canonical order. DataCount is
/// numbered last but must precede the Code section.
pub fn section_rank(id: u8) -> Option<u8> {
    match id {
        SECTION_TYPE..=SECTION_ELEMENT => Some(id),
        SECTION_DATA_COUNT => Some(10),
        SECTION_CODE => Some(11),
        SECTION_DATA => Some(12),
        _ => None,
    }
}

// Type constructors (§5.3)
pub const TYPE_FUNC: u8 = 0x60;
pub const TYPE_I32: u8 = 0x7f;
pub const TYPE_I64: u8 = 0x7e;
pub const TYPE_F32: u8 = 0x7d;
pub const TYPE_F64: u8 = 0x7c;
pub const TYPE_FUNCREF: u8 = 0x70;
pub const TYPE_EXTERNREF: u8 = 0x6f;

// Limits flags (§5.3.7)
pub const LIMITS_MIN: u8 = 0x00;
pub const LIMITS_MIN_MAX: u8 = 0x01;

// Import/export descriptor kinds (§5.5.5, §5.5.10)
pub const DESC_FUNC: u8 = 0x00;
pub const DESC_TABLE: u8 = 0x01;
pub const DESC_MEMORY: u8 = 0x02;
pub const DESC_GLOBAL: u8 = 0x03;

// Element segment elemkind (§5.5.12)
pub const ELEMKIND_FUNCREF: u8 = 0x00;

// Element segment flags (§5.5.12)
// bit 0 = passive or declarative, bit 1 = explicit table / declarative, bit 2 = expressions
pub const ELEM_FLAG_NON_ACTIVE: u32 = 0b001;
pub const ELEM_FLAG_EXPLICIT: u32 = 0b010;
pub const ELEM_FLAG_EXPRESSIONS: u32 = 0b100;

// Data segment flags (§5.5.14)
pub const DATA_ACTIVE: u32 = 0;
pub const DATA_PASSIVE: u32 = 1;
pub const DATA_ACTIVE_EXPLICIT: u32 = 2;

// Expression terminator (§5.4.9)
pub const OP_END: u8 = 0x0b;

// Block type: empty (§5.4.1)
pub const BLOCK_TYPE_EMPTY: u8 = 0x40;

// Multi-byte opcode prefix for saturating truncation, bulk memory and table ops
pub const PREFIX_MISC: u8 = 0xfc;

// ---------------------------------------------------------------------------
// LEB128 writers
// ---------------------------------------------------------------------------

pub fn write_vu64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_vu32(buf: &mut Vec<u8>, value: u32) {
    write_vu64(buf, value as u64)
}

pub fn write_vs64(buf: &mut Vec<u8>, mut value: i64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = (value == 0 && byte & 0x40 == 0) || (value == -1 && byte & 0x40 != 0);
        if done {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_vs32(buf: &mut Vec<u8>, value: i32) {
    write_vs64(buf, value as i64)
}
