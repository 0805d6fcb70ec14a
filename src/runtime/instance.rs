//! WebAssembly module instance
//!
//! Instantiation validates the module, resolves its imports, allocates its
//! memories, tables and globals, applies active element and data segments in
//! module order and finally runs the start function.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument};

use super::control::CompiledFunction;
use super::executor::Executor;
use super::global::Global;
use super::imports::{Extern, HostFunc, Imports};
use super::{LinkError, Memory, RawValue, Table, Trap, Value};
use crate::config::Config;
use crate::parser::instruction::{ConstExpr, Instruction};
use crate::parser::module::{DataMode, ElementMode, ImportDesc};
use crate::parser::types::{ExternalKind, FunctionType, Limits, ValueType};
use crate::parser::{validate, Module, ValidationError, ValidationErrorKind};

/// Runtime state owned by one instance.
#[derive(Debug, Default)]
pub(crate) struct Store {
    pub memories: Vec<Memory>,
    pub tables: Vec<Table>,
    pub globals: Vec<Global>,
    /// Element segments as references; emptied by `elem.drop`
    pub elements: Vec<Vec<Option<u32>>>,
    pub dropped_data: Vec<bool>,
}

impl Store {
    fn export_index(module: &Module, name: &str, kind: ExternalKind) -> Option<usize> {
        module
            .export(name)
            .filter(|export| export.kind == kind)
            .map(|export| export.index as usize)
    }

    pub(crate) fn exported_global(&self, module: &Module, name: &str) -> Result<Value, Trap> {
        Self::export_index(module, name, ExternalKind::Global)
            .and_then(|idx| self.globals.get(idx))
            .map(Global::get)
            .ok_or_else(|| Trap::UnknownExport(name.to_string()))
    }

    pub(crate) fn set_exported_global(&mut self, module: &Module, name: &str, value: Value) -> Result<(), Trap> {
        let global = Self::export_index(module, name, ExternalKind::Global)
            .and_then(|idx| self.globals.get_mut(idx))
            .ok_or_else(|| Trap::UnknownExport(name.to_string()))?;
        let ty = global.ty();
        if !ty.mutable {
            return Err(Trap::ImmutableGlobal(name.to_string()));
        }
        let dangling = matches!(value, Value::FuncRef(Some(idx)) if idx >= module.num_functions());
        if value.ty() != ty.value || dangling {
            return Err(Trap::ArgumentMismatch { expected: ty.value.to_string(), actual: value.to_string() });
        }
        global.set_raw(value.to_raw());
        Ok(())
    }
}

/// An entry in the instance's function index space.
#[derive(Debug)]
pub(crate) enum Function {
    Host(HostFunc),
    Wasm(CompiledFunction),
}

/// How to pick the function to invoke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    /// An exported function
    Name(String),
    /// An index into the function index space, imports first
    Index(u32),
}

impl From<&str> for Callee {
    fn from(name: &str) -> Self {
        Callee::Name(name.to_string())
    }
}

impl From<String> for Callee {
    fn from(name: String) -> Self {
        Callee::Name(name)
    }
}

impl From<u32> for Callee {
    fn from(idx: u32) -> Self {
        Callee::Index(idx)
    }
}

impl fmt::Display for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callee::Name(name) => write!(f, "{name:?}"),
            Callee::Index(idx) => write!(f, "function {idx}"),
        }
    }
}

/// A WebAssembly module instance
///
/// Instances own all of their mutable state, so separate instances of one
/// shared [`Module`] can run on separate threads.
#[derive(Debug)]
pub struct Instance {
    module: Arc<Module>,
    store: Store,
    functions: Vec<Function>,
    config: Config,
    fuel: Option<u64>,
}

/// Instantiate a module with the default [`Config`].
pub fn instantiate(module: impl Into<Arc<Module>>, imports: &Imports) -> Result<Instance, LinkError> {
    Instance::new(module.into(), imports, Config::default())
}

pub fn instantiate_with_config(
    module: impl Into<Arc<Module>>,
    imports: &Imports,
    config: Config,
) -> Result<Instance, LinkError> {
    Instance::new(module.into(), imports, config)
}

/// Invoke a function of `instance` with typed arguments.
pub fn invoke(instance: &mut Instance, callee: impl Into<Callee>, args: &[Value]) -> Result<Vec<Value>, Trap> {
    instance.invoke(callee, args)
}

impl Instance {
    #[instrument(level = "debug", skip_all, fields(imports = module.imports.len()))]
    fn new(module: Arc<Module>, imports: &Imports, config: Config) -> Result<Instance, LinkError> {
        config.check().map_err(LinkError::InvalidConfig)?;
        validate(&module)?;

        let mut store = Store::default();
        let mut functions = Vec::with_capacity(module.num_functions() as usize);
        link_imports(&module, imports, &config, &mut store, &mut functions)?;

        for global in &module.globals {
            let value = eval_const(&global.init, &store.globals);
            store.globals.push(Global::new(global.ty, value));
        }
        for ty in &module.tables {
            store.tables.push(Table::new(*ty)?);
        }
        for ty in &module.memories {
            store.memories.push(Memory::new(ty.limits, config.max_memory_pages)?);
        }
        for (type_idx, body) in module.functions.iter().zip(&module.code) {
            let compiled = CompiledFunction::compile(*type_idx, body)
                .map_err(|err| ValidationError::new(ValidationErrorKind::Malformed(err)))?;
            functions.push(Function::Wasm(compiled));
        }

        store.elements = module
            .elements
            .iter()
            .map(|segment| {
                segment
                    .items
                    .iter()
                    .map(|item| eval_const(item, &store.globals).to_ref())
                    .collect()
            })
            .collect();
        store.dropped_data = vec![false; module.data.len()];

        for (idx, segment) in module.elements.iter().enumerate() {
            match &segment.mode {
                ElementMode::Passive => continue,
                ElementMode::Declarative => {}
                ElementMode::Active { table, offset } => {
                    let dst = eval_const(offset, &store.globals).as_u32();
                    let items = &store.elements[idx];
                    let table = store.tables.get_mut(*table as usize).ok_or(Trap::TableOutOfBounds)?;
                    table.init(dst, items, 0, items.len() as u32)?;
                }
            }
            store.elements[idx] = Vec::new();
        }

        for (idx, segment) in module.data.iter().enumerate() {
            if let DataMode::Active { memory, offset } = &segment.mode {
                let dst = eval_const(offset, &store.globals).as_u32();
                let memory = store.memories.get_mut(*memory as usize).ok_or(Trap::MemoryOutOfBounds)?;
                memory.init(dst as u64, &segment.init, 0, segment.init.len() as u64)?;
                store.dropped_data[idx] = true;
            }
        }

        debug!(
            functions = functions.len(),
            memories = store.memories.len(),
            tables = store.tables.len(),
            globals = store.globals.len(),
            "instantiated"
        );

        let fuel = config.fuel;
        let mut instance = Instance { module, store, functions, config, fuel };
        if let Some(start) = instance.module.start {
            instance.execute(start, &[])?;
        }
        Ok(instance)
    }

    /// Invoke a function with typed arguments.
    ///
    /// A trap aborts this call only; the instance stays usable and keeps any
    /// memory, table or global writes made before the trap.
    pub fn invoke(&mut self, callee: impl Into<Callee>, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let callee = callee.into();
        let func_idx = self.resolve(&callee)?;
        self.check_args(func_idx, args)?;
        self.execute(func_idx, args)
    }

    fn resolve(&self, callee: &Callee) -> Result<u32, Trap> {
        match callee {
            Callee::Name(name) => {
                let export = self.module.export(name).ok_or_else(|| Trap::UnknownExport(name.clone()))?;
                if export.kind != ExternalKind::Function {
                    return Err(Trap::NotAFunction(name.clone()));
                }
                Ok(export.index)
            }
            Callee::Index(idx) if *idx < self.module.num_functions() => Ok(*idx),
            Callee::Index(idx) => Err(Trap::UnknownFunction(*idx)),
        }
    }

    fn check_args(&self, func_idx: u32, args: &[Value]) -> Result<(), Trap> {
        let ty = self.module.func_type(func_idx).ok_or(Trap::UnknownFunction(func_idx))?;
        let num_functions = self.module.num_functions();
        let matches = args.len() == ty.params.len()
            && args.iter().zip(&ty.params).all(|(arg, param)| {
                arg.ty() == *param && !matches!(arg, Value::FuncRef(Some(idx)) if *idx >= num_functions)
            });
        if !matches {
            return Err(Trap::ArgumentMismatch {
                expected: type_list(&ty.params),
                actual: format!("[{}]", args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ")),
            });
        }
        Ok(())
    }

    #[instrument(level = "debug", skip(self, args))]
    fn execute(&mut self, func_idx: u32, args: &[Value]) -> Result<Vec<Value>, Trap> {
        let module = Arc::clone(&self.module);
        let ty = module.func_type(func_idx).ok_or(Trap::UnknownFunction(func_idx))?;
        let raw: Vec<RawValue> = args.iter().map(Value::to_raw).collect();

        let mut executor = Executor::new(&module, &self.functions, &mut self.store, &self.config, &mut self.fuel);
        let results = executor.run(func_idx, &raw).map_err(|trap| {
            debug!(%trap, "trapped");
            trap
        })?;

        Ok(results
            .into_iter()
            .zip(&ty.results)
            .map(|(raw, ty)| Value::from_raw(raw, *ty))
            .collect())
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Names and kinds of everything this instance exports.
    pub fn exports(&self) -> impl Iterator<Item = (&str, ExternalKind)> + '_ {
        self.module.exports.iter().map(|export| (export.name.as_str(), export.kind))
    }

    /// An exported memory
    pub fn memory(&self, name: &str) -> Option<&Memory> {
        Store::export_index(&self.module, name, ExternalKind::Memory).and_then(|idx| self.store.memories.get(idx))
    }

    pub fn memory_mut(&mut self, name: &str) -> Option<&mut Memory> {
        Store::export_index(&self.module, name, ExternalKind::Memory)
            .and_then(|idx| self.store.memories.get_mut(idx))
    }

    /// An exported table
    pub fn table(&self, name: &str) -> Option<&Table> {
        Store::export_index(&self.module, name, ExternalKind::Table).and_then(|idx| self.store.tables.get(idx))
    }

    /// Current value of an exported global
    pub fn global(&self, name: &str) -> Option<Value> {
        self.store.exported_global(&self.module, name).ok()
    }

    /// Write an exported mutable global.
    pub fn set_global(&mut self, name: &str, value: Value) -> Result<(), Trap> {
        self.store.set_exported_global(&self.module, name, value)
    }

    /// Fuel left, or `None` when execution is unmetered
    pub fn fuel(&self) -> Option<u64> {
        self.fuel
    }

    pub fn set_fuel(&mut self, fuel: Option<u64>) {
        self.fuel = fuel;
    }
}

fn link_imports(
    module: &Module,
    imports: &Imports,
    config: &Config,
    store: &mut Store,
    functions: &mut Vec<Function>,
) -> Result<(), LinkError> {
    let num_functions = module.num_functions();

    for import in &module.imports {
        let mismatch = || LinkError::SignatureMismatch {
            module: import.module.clone(),
            name: import.name.clone(),
            expected: describe(module, &import.desc),
        };
        let provided = imports.get(&import.module, &import.name).ok_or_else(|| LinkError::UnresolvedImport {
            module: import.module.clone(),
            name: import.name.clone(),
        })?;

        match (&import.desc, provided) {
            (ImportDesc::Function(type_idx), Extern::Func(func)) => {
                if module.types.get(*type_idx as usize) != Some(func.ty()) {
                    return Err(mismatch());
                }
                functions.push(Function::Host(func.clone()));
            }
            (ImportDesc::Table(declared), Extern::Table(table)) => {
                let ty = table.ty();
                if ty.element != declared.element || !ty.limits.matches(&declared.limits) {
                    return Err(mismatch());
                }
                // funcref slots index this instance's functions
                for idx in 0..table.size() {
                    if matches!(table.get(idx), Ok(Some(f)) if f >= num_functions) {
                        return Err(mismatch());
                    }
                }
                store.tables.push(table.clone());
            }
            (ImportDesc::Memory(declared), Extern::Memory(memory)) => {
                if !memory.limits().matches(&declared.limits) {
                    return Err(mismatch());
                }
                let mut memory = memory.clone();
                memory.limit_growth(config.max_memory_pages);
                store.memories.push(memory);
            }
            (ImportDesc::Global(declared), Extern::Global(global)) => {
                let dangling = matches!(global.get(), Value::FuncRef(Some(f)) if f >= num_functions);
                if global.ty() != *declared || dangling {
                    return Err(mismatch());
                }
                store.globals.push(*global);
            }
            _ => return Err(mismatch()),
        }
    }
    Ok(())
}

/// Evaluate a validated constant expression.
fn eval_const(expr: &ConstExpr, globals: &[Global]) -> RawValue {
    match expr.instructions.first() {
        Some(Instruction::I32Const { value }) => RawValue::from_i32(*value),
        Some(Instruction::I64Const { value }) => RawValue::from_i64(*value),
        Some(Instruction::F32Const { bits }) => RawValue::from_u32(*bits),
        Some(Instruction::F64Const { bits }) => RawValue::from_u64(*bits),
        Some(Instruction::RefFunc { func_idx }) => RawValue::from_u32(*func_idx),
        Some(Instruction::GlobalGet { global_idx }) => {
            globals.get(*global_idx as usize).map(Global::raw).unwrap_or_default()
        }
        _ => RawValue::NULL_REF,
    }
}

fn type_list(types: &[ValueType]) -> String {
    format!("[{}]", types.iter().map(ValueType::to_string).collect::<Vec<_>>().join(" "))
}

fn describe_limits(limits: &Limits) -> String {
    match limits.max {
        Some(max) => format!("{}..{max}", limits.min),
        None => format!("{}..", limits.min),
    }
}

fn describe(module: &Module, desc: &ImportDesc) -> String {
    match desc {
        ImportDesc::Function(type_idx) => module
            .types
            .get(*type_idx as usize)
            .map_or_else(|| format!("func type {type_idx}"), |ty: &FunctionType| format!("func {ty}")),
        ImportDesc::Table(ty) => format!("table {} {}", ty.element, describe_limits(&ty.limits)),
        ImportDesc::Memory(ty) => format!("memory {}", describe_limits(&ty.limits)),
        ImportDesc::Global(ty) if ty.mutable => format!("global mut {}", ty.value),
        ImportDesc::Global(ty) => format!("global {}", ty.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::decode;
    use crate::parser::types::GlobalType;

    fn module(wat: &str) -> Module {
        decode(&wat::parse_str(wat).unwrap()).unwrap()
    }

    #[test]
    fn test_globals_and_segments_initialised() {
        let mut instance = instantiate(
            module(
                r#"(module
                    (memory (export "mem") 1)
                    (table (export "tab") 4 funcref)
                    (global (export "g") (mut i64) (i64.const -5))
                    (func $f)
                    (elem (i32.const 1) $f $f)
                    (data (i32.const 8) "\01\02\03"))"#,
            ),
            &Imports::new(),
        )
        .unwrap();

        assert_eq!(instance.global("g"), Some(Value::I64(-5)));
        assert_eq!(instance.memory("mem").unwrap().read_bytes(8, 3).unwrap(), &[1, 2, 3]);
        let table = instance.table("tab").unwrap();
        assert_eq!(table.get(0), Ok(None));
        assert_eq!(table.get(1), Ok(Some(0)));
        assert_eq!(table.get(2), Ok(Some(0)));

        instance.set_global("g", Value::I64(9)).unwrap();
        assert_eq!(instance.global("g"), Some(Value::I64(9)));
        assert!(matches!(instance.set_global("g", Value::I32(9)), Err(Trap::ArgumentMismatch { .. })));
        assert_eq!(instance.set_global("nope", Value::I64(1)), Err(Trap::UnknownExport("nope".into())));

        let mut exports: Vec<_> = instance.exports().collect();
        exports.sort_by_key(|(name, _)| *name);
        assert_eq!(
            exports,
            vec![("g", ExternalKind::Global), ("mem", ExternalKind::Memory), ("tab", ExternalKind::Table)]
        );
    }

    #[test]
    fn test_import_mismatches() {
        let wasm = r#"(module
            (import "env" "f" (func (param i32)))
            (import "env" "m" (memory 2 4))
            (import "env" "g" (global i32)))"#;

        let mut imports = Imports::new();
        assert_eq!(
            instantiate(module(wasm), &imports).unwrap_err(),
            LinkError::UnresolvedImport { module: "env".into(), name: "f".into() }
        );

        imports.func("env", "f", FunctionType::new(&[ValueType::I64], &[]), |_, _| Ok(vec![]));
        assert!(matches!(
            instantiate(module(wasm), &imports),
            Err(LinkError::SignatureMismatch { ref name, ref expected, .. })
                if name == "f" && expected == "func [i32] -> []"
        ));

        imports.func("env", "f", FunctionType::new(&[ValueType::I32], &[]), |_, _| Ok(vec![]));
        imports.define("env", "m", Memory::new(Limits { min: 1, max: Some(4) }, 10).unwrap());
        assert!(matches!(
            instantiate(module(wasm), &imports),
            Err(LinkError::SignatureMismatch { ref name, .. }) if name == "m"
        ));

        imports.define("env", "m", Memory::new(Limits { min: 2, max: Some(3) }, 10).unwrap());
        let mutable_i32 = GlobalType { value: ValueType::I32, mutable: true };
        imports.define("env", "g", Global::new(mutable_i32, RawValue::default()));
        assert!(matches!(
            instantiate(module(wasm), &imports),
            Err(LinkError::SignatureMismatch { ref expected, .. }) if expected == "global i32"
        ));

        imports.global("env", "g", Value::I32(3), false);
        let instance = instantiate(module(wasm), &imports).unwrap();
        assert_eq!(instance.store.memories[0].size(), 2);
        assert_eq!(instance.store.globals[0].get(), Value::I32(3));
    }

    #[test]
    fn test_kind_mismatch() {
        let mut imports = Imports::new();
        imports.global("env", "m", Value::I32(0), false);
        let err = instantiate(module(r#"(module (import "env" "m" (memory 1)))"#), &imports).unwrap_err();
        assert_eq!(
            err,
            LinkError::SignatureMismatch { module: "env".into(), name: "m".into(), expected: "memory 1..".into() }
        );
    }

    #[test]
    fn test_segment_out_of_bounds_fails_instantiation() {
        let err = instantiate(module(r#"(module (memory 1) (data (i32.const 65535) "ab"))"#), &Imports::new())
            .unwrap_err();
        assert_eq!(err, LinkError::Trap(Trap::MemoryOutOfBounds));

        let wasm = module(r#"(module (table 1 funcref) (func $f) (elem (i32.const 1) $f))"#);
        let err = instantiate(wasm, &Imports::new()).unwrap_err();
        assert_eq!(err, LinkError::Trap(Trap::TableOutOfBounds));
    }

    #[test]
    fn test_memory_ceiling_from_config() {
        let config = Config { max_memory_pages: 1, ..Config::default() };
        let err = instantiate_with_config(module("(module (memory 2))"), &Imports::new(), config).unwrap_err();
        assert_eq!(err, LinkError::MemoryAllocation { pages: 2 });

        let config = Config { max_call_depth: 0, ..Config::default() };
        assert!(matches!(
            instantiate_with_config(module("(module)"), &Imports::new(), config),
            Err(LinkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_imported_memory_copied() {
        let mut memory = Memory::new(Limits { min: 1, max: None }, 4).unwrap();
        memory.write_u8(0, 7).unwrap();
        let mut imports = Imports::new();
        imports.define("env", "mem", memory);

        let wasm = module(r#"(module (import "env" "mem" (memory 1)) (data (i32.const 1) "\08"))"#);
        let instance = instantiate(wasm, &imports).unwrap();
        assert_eq!(instance.store.memories[0].read_bytes(0, 2).unwrap(), &[7, 8]);
        match imports.get("env", "mem") {
            Some(Extern::Memory(original)) => assert_eq!(original.read_u8(1), Ok(0)),
            other => panic!("unexpected import {other:?}"),
        }
    }
}
