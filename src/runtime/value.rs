//! Value representation.
//!
//! Inside the interpreter every operand is a [`RawValue`]: 64 untyped bits
//! whose meaning is chosen by the instruction consuming them. [`Value`] is
//! the typed form used at the host boundary.

use fhex::ToHex;
use std::fmt;

use crate::parser::types::{RefType, ValueType};

/// An untyped operand stack slot.
///
/// Integers are stored zero-extended, floats as their bit patterns, and
/// references as a 32-bit index with the all-ones pattern reserved for null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawValue(u64);

impl RawValue {
    pub const NULL_REF: RawValue = RawValue(u64::MAX);

    pub fn from_bits(bits: u64) -> RawValue {
        RawValue(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_i32(v: i32) -> RawValue {
        RawValue(v as u32 as u64)
    }

    pub fn from_u32(v: u32) -> RawValue {
        RawValue(v as u64)
    }

    pub fn from_i64(v: i64) -> RawValue {
        RawValue(v as u64)
    }

    pub fn from_u64(v: u64) -> RawValue {
        RawValue(v)
    }

    pub fn from_f32(v: f32) -> RawValue {
        RawValue(v.to_bits() as u64)
    }

    pub fn from_f64(v: f64) -> RawValue {
        RawValue(v.to_bits())
    }

    pub fn from_bool(v: bool) -> RawValue {
        RawValue(v as u64)
    }

    pub fn from_ref(r: Option<u32>) -> RawValue {
        match r {
            Some(idx) => RawValue(idx as u64),
            None => RawValue::NULL_REF,
        }
    }

    pub fn as_i32(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn as_u32(self) -> u32 {
        self.0 as u32
    }

    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn to_ref(self) -> Option<u32> {
        if self.is_null() {
            None
        } else {
            Some(self.0 as u32)
        }
    }

    pub fn is_null(self) -> bool {
        self == RawValue::NULL_REF
    }
}

/// A typed WebAssembly value as seen by the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// A function index in the owning instance, or null
    FuncRef(Option<u32>),
    /// An opaque host handle, or null
    ExternRef(Option<u32>),
}

impl Value {
    /// Get the WebAssembly type of this value
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
            Value::FuncRef(_) => ValueType::FuncRef,
            Value::ExternRef(_) => ValueType::ExternRef,
        }
    }

    /// The zero value of a type: numeric zero or a null reference
    pub fn default_for(ty: ValueType) -> Value {
        match ty {
            ValueType::I32 => Value::I32(0),
            ValueType::I64 => Value::I64(0),
            ValueType::F32 => Value::F32(0.0),
            ValueType::F64 => Value::F64(0.0),
            ValueType::FuncRef => Value::FuncRef(None),
            ValueType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn null(ty: RefType) -> Value {
        match ty {
            RefType::FuncRef => Value::FuncRef(None),
            RefType::ExternRef => Value::ExternRef(None),
        }
    }

    pub fn from_raw(raw: RawValue, ty: ValueType) -> Value {
        match ty {
            ValueType::I32 => Value::I32(raw.as_i32()),
            ValueType::I64 => Value::I64(raw.as_i64()),
            ValueType::F32 => Value::F32(raw.as_f32()),
            ValueType::F64 => Value::F64(raw.as_f64()),
            ValueType::FuncRef => Value::FuncRef(raw.to_ref()),
            ValueType::ExternRef => Value::ExternRef(raw.to_ref()),
        }
    }

    pub fn to_raw(&self) -> RawValue {
        match *self {
            Value::I32(v) => RawValue::from_i32(v),
            Value::I64(v) => RawValue::from_i64(v),
            Value::F32(v) => RawValue::from_f32(v),
            Value::F64(v) => RawValue::from_f64(v),
            Value::FuncRef(r) | Value::ExternRef(r) => RawValue::from_ref(r),
        }
    }

    /// Convert to i32, returning None if wrong type
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to i64, returning None if wrong type
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f32, returning None if wrong type
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Convert to f64, returning None if wrong type
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Bitwise equality, so NaNs with the same payload compare equal.
    pub fn bit_eq(&self, other: &Value) -> bool {
        self.ty() == other.ty() && self.to_raw() == other.to_raw()
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "i32:{v}"),
            Value::I64(v) => write!(f, "i64:{v}"),
            Value::F32(v) => write!(f, "f32:{}", v.to_hex()),
            Value::F64(v) => write!(f, "f64:{}", v.to_hex()),
            Value::FuncRef(Some(idx)) => write!(f, "funcref:{idx}"),
            Value::ExternRef(Some(handle)) => write!(f, "externref:{handle}"),
            Value::FuncRef(None) => write!(f, "funcref:null"),
            Value::ExternRef(None) => write!(f, "externref:null"),
        }
    }
}
