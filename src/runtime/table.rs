//! WebAssembly table implementation
//!
//! Tables are typed vectors of references that enable indirect function
//! calls. A funcref slot holds a function index in the owning instance; an
//! externref slot holds an opaque host handle. Empty slots are null.
//!
//! Every access is bounds-checked and traps with
//! [`Trap::TableOutOfBounds`] rather than touching memory it should not.

use tracing::debug;

use super::{LinkError, Trap};
use crate::parser::limits::MAX_TABLE_INIT_ENTRIES;
use crate::parser::types::{Limits, RefType, TableType};

/// Upper bound on table size, whatever the declared maximum
pub const MAX_TABLE_SIZE: u32 = MAX_TABLE_INIT_ENTRIES;

#[derive(Debug, Clone)]
pub struct Table {
    element: RefType,
    elements: Vec<Option<u32>>,
    max: Option<u32>,
}

impl Table {
    /// Create a table of `ty.limits.min` null references.
    pub fn new(ty: TableType) -> Result<Table, LinkError> {
        let initial = ty.limits.min;
        if initial > MAX_TABLE_SIZE {
            return Err(LinkError::TableAllocation { elements: initial });
        }
        let mut elements = Vec::new();
        elements
            .try_reserve_exact(initial as usize)
            .map_err(|_| LinkError::TableAllocation { elements: initial })?;
        elements.resize(initial as usize, None);
        Ok(Table { element: ty.element, elements, max: ty.limits.max })
    }

    pub fn element_type(&self) -> RefType {
        self.element
    }

    /// The table type an importing module sees: the current size is the minimum.
    pub fn ty(&self) -> TableType {
        TableType { element: self.element, limits: Limits { min: self.size(), max: self.max } }
    }

    /// Get the current table size (number of elements)
    pub fn size(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn get(&self, index: u32) -> Result<Option<u32>, Trap> {
        self.elements.get(index as usize).copied().ok_or(Trap::TableOutOfBounds)
    }

    pub fn set(&mut self, index: u32, value: Option<u32>) -> Result<(), Trap> {
        let slot = self.elements.get_mut(index as usize).ok_or(Trap::TableOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Grow the table by delta elements, initialising new slots with `init`
    ///
    /// Returns the old size, or u32::MAX (-1 as i32) if growth fails.
    pub fn grow(&mut self, delta: u32, init: Option<u32>) -> u32 {
        let old_size = self.size();

        let Some(new_size) = old_size.checked_add(delta) else {
            return u32::MAX;
        };
        if new_size > self.max.unwrap_or(u32::MAX).min(MAX_TABLE_SIZE) {
            debug!(old_size, delta, "table.grow refused");
            return u32::MAX;
        }
        if self.elements.try_reserve_exact(delta as usize).is_err() {
            return u32::MAX;
        }

        self.elements.resize(new_size as usize, init);
        old_size
    }

    fn range(&self, start: u32, len: u32) -> Result<std::ops::Range<usize>, Trap> {
        let end = (start as u64) + (len as u64);
        if end > self.elements.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        Ok(start as usize..end as usize)
    }

    /// table.fill
    pub fn fill(&mut self, dst: u32, value: Option<u32>, len: u32) -> Result<(), Trap> {
        let range = self.range(dst, len)?;
        self.elements[range].fill(value);
        Ok(())
    }

    /// table.copy within one table; the ranges may overlap.
    pub fn copy_within(&mut self, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let dst = self.range(dst, len)?;
        let src = self.range(src, len)?;
        self.elements.copy_within(src, dst.start);
        Ok(())
    }

    /// table.copy from another table.
    pub fn copy_from(&mut self, dst: u32, src_table: &Table, src: u32, len: u32) -> Result<(), Trap> {
        let dst = self.range(dst, len)?;
        let src = src_table.range(src, len)?;
        self.elements[dst].copy_from_slice(&src_table.elements[src]);
        Ok(())
    }

    /// table.init and active element segments.
    pub fn init(&mut self, dst: u32, segment: &[Option<u32>], src: u32, len: u32) -> Result<(), Trap> {
        let src_end = (src as u64) + (len as u64);
        if src_end > segment.len() as u64 {
            return Err(Trap::TableOutOfBounds);
        }
        let dst = self.range(dst, len)?;
        self.elements[dst].copy_from_slice(&segment[src as usize..src_end as usize]);
        Ok(())
    }
}
