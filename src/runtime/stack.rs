//! WebAssembly value stack implementation
//!
//! Operands are untyped [`RawValue`]s; validation guarantees every pop has a
//! matching push, so pops are infallible. Pushes are checked against the
//! configured capacity and fail with [`Trap::CallStackExhausted`].

use super::{RawValue, Trap};

#[derive(Debug)]
pub struct Stack {
    values: Vec<RawValue>,
    limit: usize,
}

impl Stack {
    /// Create a new empty stack holding at most `limit` values
    pub fn new(limit: usize) -> Self {
        Stack { values: Vec::new(), limit }
    }

    /// Push a value onto the stack
    #[inline]
    pub fn push(&mut self, value: RawValue) -> Result<(), Trap> {
        if self.values.len() >= self.limit {
            return Err(Trap::CallStackExhausted);
        }
        self.values.push(value);
        Ok(())
    }

    /// Push multiple values onto the stack
    pub fn push_all(&mut self, values: &[RawValue]) -> Result<(), Trap> {
        if self.values.len() + values.len() > self.limit {
            return Err(Trap::CallStackExhausted);
        }
        self.values.extend_from_slice(values);
        Ok(())
    }

    /// Pop a value from the stack
    #[inline]
    pub fn pop(&mut self) -> RawValue {
        debug_assert!(!self.values.is_empty(), "operand stack underflow");
        self.values.pop().unwrap_or_default()
    }

    pub fn pop_i32(&mut self) -> i32 {
        self.pop().as_i32()
    }

    pub fn pop_u32(&mut self) -> u32 {
        self.pop().as_u32()
    }

    pub fn pop_i64(&mut self) -> i64 {
        self.pop().as_i64()
    }

    /// Pop the top `n` values, preserving their order
    pub fn pop_n(&mut self, n: usize) -> Vec<RawValue> {
        let at = self.values.len().saturating_sub(n);
        self.values.split_off(at)
    }

    /// Get the current stack depth
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop everything above `height`
    pub fn truncate(&mut self, height: usize) {
        self.values.truncate(height);
    }

    /// Keep the top `arity` values and discard the `height..len - arity`
    /// range below them. This is the stack effect of a branch.
    pub fn unwind(&mut self, height: usize, arity: usize) {
        let keep_from = self.values.len().saturating_sub(arity);
        if keep_from > height {
            self.values.drain(height..keep_from);
        }
    }

    /// Peek at the top value without popping
    pub fn peek(&self) -> Option<&RawValue> {
        self.values.last()
    }

    /// Replace the top value with `f(top)`
    #[inline]
    pub fn unary(&mut self, f: impl FnOnce(RawValue) -> RawValue) {
        if let Some(top) = self.values.last_mut() {
            *top = f(*top);
        }
    }

    /// Pop `b`, then replace `a` with `f(a, b)`
    #[inline]
    pub fn binary(&mut self, f: impl FnOnce(RawValue, RawValue) -> RawValue) {
        let b = self.pop();
        self.unary(|a| f(a, b));
    }

    #[inline]
    pub fn try_unary(&mut self, f: impl FnOnce(RawValue) -> Result<RawValue, Trap>) -> Result<(), Trap> {
        if let Some(top) = self.values.last_mut() {
            *top = f(*top)?;
        }
        Ok(())
    }

    #[inline]
    pub fn try_binary(&mut self, f: impl FnOnce(RawValue, RawValue) -> Result<RawValue, Trap>) -> Result<(), Trap> {
        let b = self.pop();
        self.try_unary(|a| f(a, b))
    }
}
