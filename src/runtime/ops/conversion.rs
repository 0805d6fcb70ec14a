//! Float to integer truncation.
//!
//! The trapping forms reject NaN, infinities and anything whose truncation
//! falls outside the target range. The saturating forms (0xFC 0..7) clamp
//! instead and map NaN to zero, which is exactly what Rust's `as` does.

use crate::runtime::Trap;

// ============================================================================
// Trapping truncation
// ============================================================================

// Each condition accepts exactly the inputs whose truncation fits the target.
// NaN fails every comparison.

pub fn i32_trunc_f32_s(x: f32) -> Result<i32, Trap> {
    if x >= -2147483648.0 && x < 2147483648.0 {
        Ok(x as i32)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i32_trunc_f32_u(x: f32) -> Result<u32, Trap> {
    if x > -1.0 && x < 4294967296.0 {
        Ok(x as u32)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i32_trunc_f64_s(x: f64) -> Result<i32, Trap> {
    if x > -2147483649.0 && x < 2147483648.0 {
        Ok(x as i32)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i32_trunc_f64_u(x: f64) -> Result<u32, Trap> {
    if x > -1.0 && x < 4294967296.0 {
        Ok(x as u32)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i64_trunc_f32_s(x: f32) -> Result<i64, Trap> {
    if x >= -9223372036854775808.0 && x < 9223372036854775808.0 {
        Ok(x as i64)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i64_trunc_f32_u(x: f32) -> Result<u64, Trap> {
    if x > -1.0 && x < 18446744073709551616.0 {
        Ok(x as u64)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i64_trunc_f64_s(x: f64) -> Result<i64, Trap> {
    if x >= -9223372036854775808.0 && x < 9223372036854775808.0 {
        Ok(x as i64)
    } else {
        Err(Trap::InvalidConversion)
    }
}

pub fn i64_trunc_f64_u(x: f64) -> Result<u64, Trap> {
    if x > -1.0 && x < 18446744073709551616.0 {
        Ok(x as u64)
    } else {
        Err(Trap::InvalidConversion)
    }
}
