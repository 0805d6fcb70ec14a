//! Implementation limits for decoding.
//!
//! Aligned with the limits mainstream engines apply. They stop malformed input
//! from claiming absurd vector lengths before any allocation happens.

// =============================================================================
// Module-level limits
// =============================================================================

pub const MAX_TYPES: u32 = 1_000_000;
pub const MAX_FUNCTIONS: u32 = 1_000_000;
pub const MAX_IMPORTS: u32 = 1_000_000;
pub const MAX_EXPORTS: u32 = 1_000_000;
pub const MAX_GLOBALS: u32 = 1_000_000;
pub const MAX_DATA_SEGMENTS: u32 = 100_000;
pub const MAX_ELEMENT_SEGMENTS: u32 = 100_000;
pub const MAX_TABLES: u32 = 100_000;
pub const MAX_MEMORIES: u32 = 100_000;

// =============================================================================
// Function-level limits
// =============================================================================

pub const MAX_FUNCTION_SIZE: u32 = 7_654_321;
pub const MAX_FUNCTION_PARAMS: u32 = 1_000;
pub const MAX_FUNCTION_RETURNS: u32 = 1_000;
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

// =============================================================================
// Instruction-level limits
// =============================================================================

pub const MAX_BR_TABLE_LABELS: u32 = 65_536;
pub const MAX_SELECT_TYPED_VALUES: u32 = 1_000;

// =============================================================================
// Table and memory limits
// =============================================================================

pub const MAX_TABLE_INIT_ENTRIES: u32 = 10_000_000;

/// Maximum memory pages for 32-bit addressing (4 GiB)
pub const MAX_MEMORY_PAGES: u32 = 65_536;

/// Check a decoded vector length against its limit.
pub fn check(what: &'static str, count: u32, limit: u32) -> Result<u32, super::DecodeError> {
    if count > limit {
        return Err(super::DecodeError::LimitExceeded { what, count, limit });
    }
    Ok(count)
}
