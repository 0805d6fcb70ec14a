//! Import resolution for WebAssembly modules
//!
//! The host supplies an [`Imports`] table keyed by (module name, field name).
//! Functions are host closures; memories, tables and globals are values that
//! get copied into each instance that imports them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::global::Global;
use super::instance::Store;
use super::{Memory, Table, Trap, Value};
use crate::parser::types::{FunctionType, GlobalType};
use crate::parser::Module;

type HostFn = dyn Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, Trap> + Send + Sync;

/// A function implemented by the host.
#[derive(Clone)]
pub struct HostFunc {
    ty: FunctionType,
    func: Arc<HostFn>,
}

impl HostFunc {
    pub fn new<F>(ty: FunctionType, func: F) -> HostFunc
    where
        F: Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, Trap> + Send + Sync + 'static,
    {
        HostFunc { ty, func: Arc::new(func) }
    }

    pub fn ty(&self) -> &FunctionType {
        &self.ty
    }

    /// Call the host function, checking that its results match its type.
    pub(crate) fn call(&self, caller: &mut Caller<'_>, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let results = (self.func)(caller, args)?;
        let well_typed = results.len() == self.ty.results.len()
            && results.iter().zip(&self.ty.results).all(|(value, ty)| value.ty() == *ty);
        if !well_typed {
            return Err(Trap::Host(format!(
                "host function of type {} returned [{}]",
                self.ty,
                results.iter().map(|v| v.ty().to_string()).collect::<Vec<_>>().join(" ")
            )));
        }
        let num_functions = caller.module.num_functions();
        if let Some(idx) = results.iter().find_map(|v| match v {
            Value::FuncRef(Some(idx)) if *idx >= num_functions => Some(*idx),
            _ => None,
        }) {
            return Err(Trap::Host(format!("host function returned reference to unknown function {idx}")));
        }
        Ok(results)
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc").field("ty", &self.ty).finish_non_exhaustive()
    }
}

/// Anything a module can import.
#[derive(Debug, Clone)]
pub enum Extern {
    Func(HostFunc),
    Memory(Memory),
    Table(Table),
    Global(Global),
}

impl From<HostFunc> for Extern {
    fn from(func: HostFunc) -> Self {
        Extern::Func(func)
    }
}

impl From<Memory> for Extern {
    fn from(memory: Memory) -> Self {
        Extern::Memory(memory)
    }
}

impl From<Table> for Extern {
    fn from(table: Table) -> Self {
        Extern::Table(table)
    }
}

impl From<Global> for Extern {
    fn from(global: Global) -> Self {
        Extern::Global(global)
    }
}

/// Container for the values a module can import
#[derive(Debug, Clone, Default)]
pub struct Imports {
    entries: HashMap<(String, String), Extern>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) an import.
    pub fn define(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Extern>,
    ) -> &mut Self {
        self.entries.insert((module.into(), name.into()), value.into());
        self
    }

    /// Define a host function import.
    pub fn func<F>(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        ty: FunctionType,
        func: F,
    ) -> &mut Self
    where
        F: Fn(&mut Caller<'_>, &[Value]) -> Result<Vec<Value>, Trap> + Send + Sync + 'static,
    {
        self.define(module, name, HostFunc::new(ty, func))
    }

    /// Define a global import holding `value`.
    pub fn global(
        &mut self,
        module: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        mutable: bool,
    ) -> &mut Self {
        let ty = GlobalType { value: value.ty(), mutable };
        self.define(module, name, Global::new(ty, value.to_raw()))
    }

    pub fn get(&self, module: &str, name: &str) -> Option<&Extern> {
        self.entries.get(&(module.to_string(), name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The view of the calling instance given to a host function.
pub struct Caller<'a> {
    store: &'a mut Store,
    module: &'a Module,
}

impl<'a> Caller<'a> {
    pub(crate) fn new(store: &'a mut Store, module: &'a Module) -> Caller<'a> {
        Caller { store, module }
    }

    /// The instance's memory, if it has one
    pub fn memory(&self) -> Option<&Memory> {
        self.store.memories.first()
    }

    pub fn memory_mut(&mut self) -> Option<&mut Memory> {
        self.store.memories.first_mut()
    }

    /// Value of an exported global
    pub fn global(&self, name: &str) -> Option<Value> {
        self.store.exported_global(self.module, name).ok()
    }

    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), Trap> {
        self.store.set_exported_global(self.module, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::ValueType;

    #[test]
    fn test_define_and_lookup() {
        let mut imports = Imports::new();
        imports
            .func("env", "add", FunctionType::new(&[ValueType::I32, ValueType::I32], &[ValueType::I32]), |_, args| {
                let sum = args[0].as_i32().unwrap_or(0) + args[1].as_i32().unwrap_or(0);
                Ok(vec![Value::I32(sum)])
            })
            .global("env", "g", Value::I64(7), false);

        assert_eq!(imports.len(), 2);
        assert!(matches!(imports.get("env", "add"), Some(Extern::Func(f)) if f.ty().params.len() == 2));
        match imports.get("env", "g") {
            Some(Extern::Global(g)) => {
                assert_eq!(g.get(), Value::I64(7));
                assert!(!g.ty().mutable);
            }
            other => panic!("unexpected import {other:?}"),
        }
        assert!(imports.get("env", "missing").is_none());
        assert!(imports.get("other", "add").is_none());
    }

    #[test]
    fn test_host_result_type_checked() {
        let mut store = Store::default();
        let module = Module::default();
        let mut caller = Caller::new(&mut store, &module);

        let good = HostFunc::new(FunctionType::new(&[], &[ValueType::I32]), |_, _| Ok(vec![Value::I32(1)]));
        assert_eq!(good.call(&mut caller, &[]), Ok(vec![Value::I32(1)]));

        let bad = HostFunc::new(FunctionType::new(&[], &[ValueType::I32]), |_, _| Ok(vec![Value::F32(1.0)]));
        assert!(matches!(bad.call(&mut caller, &[]), Err(Trap::Host(_))));

        let failing = HostFunc::new(FunctionType::default(), |_, _| Err(Trap::Host("boom".into())));
        assert_eq!(failing.call(&mut caller, &[]), Err(Trap::Host("boom".into())));
        assert!(caller.memory().is_none());
    }

    #[test]
    fn test_host_funcref_result_must_exist() {
        let mut store = Store::default();
        let module = Module::default();
        let mut caller = Caller::new(&mut store, &module);

        let null = HostFunc::new(FunctionType::new(&[], &[ValueType::FuncRef]), |_, _| Ok(vec![Value::FuncRef(None)]));
        assert_eq!(null.call(&mut caller, &[]), Ok(vec![Value::FuncRef(None)]));

        let dangling =
            HostFunc::new(FunctionType::new(&[], &[ValueType::FuncRef]), |_, _| Ok(vec![Value::FuncRef(Some(0))]));
        assert!(matches!(dangling.call(&mut caller, &[]), Err(Trap::Host(_))));
    }
}
