//! Memory load and store instructions.
//!
//! The effective address is the 32-bit base operand plus the static offset,
//! summed in 64 bits and bounds-checked by [`Memory`] before any byte moves.

use super::*;

#[inline]
pub fn effective_address(base: u32, memarg: MemArg) -> u64 {
    base as u64 + memarg.offset as u64
}

/// Pop a base address and push the `width`-byte value at it, widened by
/// `extend`.
#[inline]
pub fn load(
    stack: &mut Stack,
    memory: &Memory,
    memarg: MemArg,
    width: u32,
    extend: impl FnOnce(u64) -> RawValue,
) -> Result<(), Trap> {
    stack.try_unary(|base| {
        let addr = effective_address(base.as_u32(), memarg);
        let bits = match width {
            1 => memory.read_u8(addr)? as u64,
            2 => memory.read_u16(addr)? as u64,
            4 => memory.read_u32(addr)? as u64,
            _ => memory.read_u64(addr)?,
        };
        Ok(extend(bits))
    })
}

/// Pop a value and a base address and store the low `width` bytes of the
/// value.
#[inline]
pub fn store(stack: &mut Stack, memory: &mut Memory, memarg: MemArg, width: u32) -> Result<(), Trap> {
    let value = stack.pop().bits();
    let addr = effective_address(stack.pop_u32(), memarg);
    match width {
        1 => memory.write_u8(addr, value as u8),
        2 => memory.write_u16(addr, value as u16),
        4 => memory.write_u32(addr, value as u32),
        _ => memory.write_u64(addr, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::Limits;

    fn setup() -> (Stack, Memory) {
        (Stack::new(64), Memory::new(Limits { min: 1, max: None }, 1).unwrap())
    }

    #[test]
    fn test_store_then_sign_extending_load() {
        let (mut stack, mut memory) = setup();
        let memarg = MemArg { align: 0, offset: 4 };

        stack.push(RawValue::from_i32(0)).unwrap();
        stack.push(RawValue::from_i32(-2)).unwrap();
        store(&mut stack, &mut memory, memarg, 1).unwrap();
        assert_eq!(memory.read_u8(4).unwrap(), 0xfe);

        stack.push(RawValue::from_i32(0)).unwrap();
        load(&mut stack, &memory, memarg, 1, |b| RawValue::from_i32(b as i8 as i32)).unwrap();
        assert_eq!(stack.pop_i32(), -2);

        stack.push(RawValue::from_i32(0)).unwrap();
        load(&mut stack, &memory, memarg, 1, RawValue::from_u64).unwrap();
        assert_eq!(stack.pop_i32(), 0xfe);
    }

    #[test]
    fn test_offset_overflow_is_out_of_bounds() {
        let (mut stack, memory) = setup();
        let memarg = MemArg { align: 2, offset: u32::MAX };

        stack.push(RawValue::from_u32(u32::MAX)).unwrap();
        assert_eq!(
            load(&mut stack, &memory, memarg, 4, RawValue::from_u64),
            Err(Trap::MemoryOutOfBounds)
        );
        assert_eq!(effective_address(u32::MAX, memarg), 2 * u32::MAX as u64);
    }

    #[test]
    fn test_store_out_of_bounds_writes_nothing() {
        let (mut stack, mut memory) = setup();
        stack.push(RawValue::from_u32(65533)).unwrap();
        stack.push(RawValue::from_i64(-1)).unwrap();
        assert_eq!(
            store(&mut stack, &mut memory, MemArg { align: 0, offset: 0 }, 4),
            Err(Trap::MemoryOutOfBounds)
        );
        assert_eq!(memory.read_bytes(65533, 3).unwrap(), &[0, 0, 0]);
    }
}
