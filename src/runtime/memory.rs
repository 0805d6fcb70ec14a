//! WebAssembly linear memory implementation
//!
//! All access is bounds-checked before touching the underlying data.
//! Addresses arrive as 64-bit effective addresses (base plus static offset)
//! so the sum can never wrap before it is checked.
//!
//! Memory layout:
//! - Page size: 64KB (65,536 bytes)
//! - Address space: 32-bit (max 4GB)
//! - Out-of-bounds access: traps with [`Trap::MemoryOutOfBounds`]

use byteorder::{ByteOrder, LittleEndian};
use tracing::debug;

use super::{LinkError, Trap};
use crate::parser::limits::MAX_MEMORY_PAGES;
use crate::parser::types::Limits;

/// WebAssembly page size in bytes (64KB)
pub const PAGE_SIZE: usize = 65536;

/// Maximum number of pages (2^16 = 64K pages = 4GB total)
pub const MAX_PAGES: u32 = MAX_MEMORY_PAGES;

/// A WebAssembly linear memory instance
#[derive(Debug, Clone)]
pub struct Memory {
    data: Vec<u8>,
    current_pages: u32,
    /// Declared maximum, if any
    max_pages: Option<u32>,
    /// Implementation ceiling from the instance configuration
    ceiling: u32,
}

impl Memory {
    /// Create a zeroed memory of `limits.min` pages.
    ///
    /// `ceiling` bounds growth below the declared maximum; an initial size
    /// above it, or one the allocator refuses, is an error.
    pub fn new(limits: Limits, ceiling: u32) -> Result<Memory, LinkError> {
        let ceiling = ceiling.min(MAX_PAGES);
        if limits.min > ceiling {
            return Err(LinkError::MemoryAllocation { pages: limits.min });
        }

        let bytes = limits.min as usize * PAGE_SIZE;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| LinkError::MemoryAllocation { pages: limits.min })?;
        data.resize(bytes, 0);

        Ok(Memory { data, current_pages: limits.min, max_pages: limits.max, ceiling })
    }

    /// Lower the growth ceiling, as an importing instance's configuration does.
    pub(crate) fn limit_growth(&mut self, ceiling: u32) {
        self.ceiling = self.ceiling.min(ceiling);
    }

    /// Get the current memory size in pages
    pub fn size(&self) -> u32 {
        self.current_pages
    }

    /// Current size in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Limits as seen by an importing module: the current size is the minimum.
    pub fn limits(&self) -> Limits {
        Limits { min: self.current_pages, max: self.max_pages }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Grow memory by the specified number of pages
    ///
    /// Returns the previous size in pages, or -1 if growth fails. A failed
    /// grow leaves size and contents untouched.
    pub fn grow(&mut self, delta_pages: u32) -> i32 {
        let current = self.current_pages;

        let Some(new_pages) = current.checked_add(delta_pages) else {
            return -1;
        };

        let effective_max = self.max_pages.unwrap_or(MAX_PAGES).min(self.ceiling);
        if new_pages > effective_max {
            debug!(current, delta_pages, effective_max, "memory.grow refused");
            return -1;
        }

        let new_bytes = new_pages as usize * PAGE_SIZE;
        match self.data.try_reserve_exact(new_bytes - self.data.len()) {
            Ok(()) => {
                self.data.resize(new_bytes, 0);
                self.current_pages = new_pages;
                current as i32
            }
            Err(_) => {
                debug!(current, delta_pages, "memory.grow allocation failed");
                -1
            }
        }
    }

    /// Check that `[addr, addr + size)` lies inside memory and return the
    /// start as an index.
    #[inline]
    pub fn check_bounds(&self, addr: u64, size: u64) -> Result<usize, Trap> {
        let end = addr.checked_add(size).ok_or(Trap::MemoryOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        Ok(addr as usize)
    }

    #[inline]
    fn slice(&self, addr: u64, size: usize) -> Result<&[u8], Trap> {
        let start = self.check_bounds(addr, size as u64)?;
        Ok(&self.data[start..start + size])
    }

    #[inline]
    fn slice_mut(&mut self, addr: u64, size: usize) -> Result<&mut [u8], Trap> {
        let start = self.check_bounds(addr, size as u64)?;
        Ok(&mut self.data[start..start + size])
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, Trap> {
        Ok(self.slice(addr, 1)?[0])
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, Trap> {
        Ok(LittleEndian::read_u16(self.slice(addr, 2)?))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, Trap> {
        Ok(LittleEndian::read_u32(self.slice(addr, 4)?))
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, Trap> {
        Ok(LittleEndian::read_u64(self.slice(addr, 8)?))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), Trap> {
        self.slice_mut(addr, 1)?[0] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), Trap> {
        LittleEndian::write_u16(self.slice_mut(addr, 2)?, value);
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), Trap> {
        LittleEndian::write_u32(self.slice_mut(addr, 4)?, value);
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), Trap> {
        LittleEndian::write_u64(self.slice_mut(addr, 8)?, value);
        Ok(())
    }

    /// Read a slice of bytes from memory
    pub fn read_bytes(&self, addr: u64, len: usize) -> Result<&[u8], Trap> {
        self.slice(addr, len)
    }

    /// Write a slice of bytes to memory
    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        self.slice_mut(addr, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    /// memory.fill
    pub fn fill(&mut self, dst: u64, value: u8, len: u64) -> Result<(), Trap> {
        let start = self.check_bounds(dst, len)?;
        self.data[start..start + len as usize].fill(value);
        Ok(())
    }

    /// memory.copy; the ranges may overlap.
    pub fn copy_within(&mut self, dst: u64, src: u64, len: u64) -> Result<(), Trap> {
        let dst = self.check_bounds(dst, len)?;
        let src = self.check_bounds(src, len)?;
        self.data.copy_within(src..src + len as usize, dst);
        Ok(())
    }

    /// memory.init and active data segments: copy `len` bytes of `segment`
    /// starting at `src` into memory at `dst`.
    pub fn init(&mut self, dst: u64, segment: &[u8], src: u64, len: u64) -> Result<(), Trap> {
        let src_end = src.checked_add(len).ok_or(Trap::MemoryOutOfBounds)?;
        if src_end > segment.len() as u64 {
            return Err(Trap::MemoryOutOfBounds);
        }
        let bytes = &segment[src as usize..src_end as usize];
        self.slice_mut(dst, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn memory(min: u32, max: Option<u32>) -> Memory {
        Memory::new(Limits { min, max }, MAX_PAGES).unwrap()
    }

    #[test]
    fn test_memory_creation() {
        let mem = memory(1, None);
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.byte_len(), PAGE_SIZE);

        let mem = memory(0, Some(10));
        assert_eq!(mem.size(), 0);
        assert_eq!(mem.max_pages(), Some(10));
        assert_eq!(mem.limits(), Limits { min: 0, max: Some(10) });
    }

    #[test]
    fn test_memory_creation_above_ceiling() {
        assert_eq!(
            Memory::new(Limits { min: 3, max: None }, 2).unwrap_err(),
            LinkError::MemoryAllocation { pages: 3 }
        );
    }

    #[test]
    fn test_memory_grow() {
        let mut mem = memory(1, Some(10));

        assert_eq!(mem.grow(2), 1);
        assert_eq!(mem.size(), 3);
        assert_eq!(mem.byte_len(), 3 * PAGE_SIZE);

        assert_eq!(mem.grow(7), 3);
        assert_eq!(mem.size(), 10);

        assert_eq!(mem.grow(1), -1);
        assert_eq!(mem.size(), 10);

        assert_eq!(mem.grow(0), 10);
    }

    #[test]
    fn test_memory_grow_beyond_address_space() {
        let mut mem = memory(1, None);
        mem.write_u32(0, 0xdeadbeef).unwrap();

        assert_eq!(mem.grow(0x10000), -1);
        assert_eq!(mem.grow(u32::MAX), -1);
        assert_eq!(mem.size(), 1);
        assert_eq!(mem.read_u32(0).unwrap(), 0xdeadbeef);
    }

    #[test]
    fn test_memory_grow_respects_ceiling() {
        let mut mem = Memory::new(Limits { min: 1, max: None }, 2).unwrap();
        assert_eq!(mem.grow(1), 1);
        assert_eq!(mem.grow(1), -1);
        assert_eq!(mem.size(), 2);
    }

    #[test]
    fn test_bounds_checking() {
        let mem = memory(1, None);
        let len = PAGE_SIZE as u64;

        assert!(mem.check_bounds(0, 1).is_ok());
        assert!(mem.check_bounds(len - 1, 1).is_ok());
        assert!(mem.check_bounds(0, len).is_ok());
        assert!(mem.check_bounds(len, 0).is_ok());

        assert_eq!(mem.check_bounds(len, 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.check_bounds(len - 1, 2), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.check_bounds(u32::MAX as u64, 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.check_bounds(u64::MAX, 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.check_bounds(u64::MAX, u64::MAX), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn test_bounds_check_is_total() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..2000 {
            let pages = rng.gen_range(0..3u32);
            let mem = memory(pages, None);
            let size = mem.byte_len() as u64;
            let width = [1u64, 2, 4, 8][rng.gen_range(0..4)];
            let addr = match rng.gen_range(0..4) {
                0 => u32::MAX as u64,
                1 => size.saturating_sub(rng.gen_range(0..16)),
                2 => rng.gen::<u32>() as u64 + rng.gen::<u32>() as u64,
                _ => rng.gen_range(0..=size + 8),
            };
            let fits = addr + width <= size;
            assert_eq!(mem.check_bounds(addr, width).is_ok(), fits, "addr {addr} width {width} size {size}");
            assert_eq!(mem.read_bytes(addr, width as usize).is_ok(), fits);
        }
    }

    #[test]
    fn test_read_write_little_endian() {
        let mut mem = memory(1, None);

        mem.write_u32(100, 0x12345678).unwrap();
        assert_eq!(mem.read_u32(100).unwrap(), 0x12345678);
        assert_eq!(mem.read_bytes(100, 4).unwrap(), &[0x78, 0x56, 0x34, 0x12]);

        mem.write_u64(3, 0x123456789abcdef0).unwrap();
        assert_eq!(mem.read_u64(3).unwrap(), 0x123456789abcdef0);

        mem.write_u16(PAGE_SIZE as u64 - 2, 0xbeef).unwrap();
        assert_eq!(mem.read_u16(PAGE_SIZE as u64 - 2).unwrap(), 0xbeef);

        assert_eq!(mem.write_u32(PAGE_SIZE as u64 - 3, 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.read_u64(PAGE_SIZE as u64 - 7), Err(Trap::MemoryOutOfBounds));
    }

    #[test]
    fn test_bulk_operations() {
        let mut mem = memory(1, None);
        mem.write_bytes(10, &[1, 2, 3, 4, 5]).unwrap();

        mem.copy_within(12, 10, 5).unwrap();
        assert_eq!(mem.read_bytes(10, 7).unwrap(), &[1, 2, 1, 2, 3, 4, 5]);

        mem.fill(0, 0xaa, 3).unwrap();
        assert_eq!(mem.read_bytes(0, 4).unwrap(), &[0xaa, 0xaa, 0xaa, 0]);

        mem.init(100, b"hello", 1, 3).unwrap();
        assert_eq!(mem.read_bytes(100, 3).unwrap(), b"ell");

        assert_eq!(mem.init(0, b"hello", 3, 3), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.fill(PAGE_SIZE as u64, 0, 1), Err(Trap::MemoryOutOfBounds));
        assert_eq!(mem.copy_within(0, PAGE_SIZE as u64 - 1, 2), Err(Trap::MemoryOutOfBounds));

        // zero-length operations at the very end are fine
        mem.fill(PAGE_SIZE as u64, 0, 0).unwrap();
        mem.init(PAGE_SIZE as u64, b"", 0, 0).unwrap();
    }

    #[test]
    fn test_grow_zero_initialisation() {
        let mut mem = memory(1, None);
        mem.write_u32(0, 0xdeadbeef).unwrap();

        mem.grow(1);

        assert_eq!(mem.read_u32(0).unwrap(), 0xdeadbeef);
        assert_eq!(mem.read_u32(PAGE_SIZE as u64).unwrap(), 0);
        assert_eq!(mem.read_u32(PAGE_SIZE as u64 + 100).unwrap(), 0);
        assert_eq!(mem.data().len(), mem.byte_len());
    }

    #[test]
    fn test_raw_data_access() {
        let mut mem = memory(1, None);
        mem.data_mut()[8..12].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        assert_eq!(mem.read_u32(8).unwrap(), 0x1234_5678);
        assert_eq!(mem.data()[8], 0x78);
    }
}
