//! Global variable instances.

use super::{RawValue, Value};
use crate::parser::types::GlobalType;

#[derive(Debug, Clone, Copy)]
pub struct Global {
    ty: GlobalType,
    value: RawValue,
}

impl Global {
    pub fn new(ty: GlobalType, value: RawValue) -> Global {
        Global { ty, value }
    }

    pub fn ty(&self) -> GlobalType {
        self.ty
    }

    pub fn get(&self) -> Value {
        Value::from_raw(self.value, self.ty.value)
    }

    pub fn raw(&self) -> RawValue {
        self.value
    }

    /// Overwrite the value. Mutability is enforced by the validator for
    /// code and by the instance for host writes.
    pub fn set_raw(&mut self, value: RawValue) {
        self.value = value;
    }
}
