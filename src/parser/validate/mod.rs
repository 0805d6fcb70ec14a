//! Static validation of a decoded module.
//!
//! Module-level rules are checked here; function bodies are handed to
//! [`code::CodeValidator`], which type-checks one instruction at a time
//! against an abstract operand stack.

mod code;

use std::collections::HashSet;

use thiserror::Error;
use tracing::{debug, trace};

use super::instruction::{ConstExpr, Instruction};
use super::limits;
use super::module::{DataMode, ElementMode, FunctionBody, ImportDesc, Module};
use super::reader::Reader;
use super::types::{ExternalKind, Limits, ValueType};
use super::DecodeError;

use code::CodeValidator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationErrorKind {
    #[error("type mismatch")]
    TypeMismatch,

    #[error("type mismatch: values remaining on the stack at end of block")]
    UnusedValues,

    #[error("unknown {space} {index}")]
    InvalidIndex { space: &'static str, index: u32 },

    #[error("unknown memory {0}")]
    MissingMemory(u32),

    #[error("unknown table {0}")]
    MissingTable(u32),

    #[error("multiple memories")]
    MultipleMemories,

    #[error("size minimum must not be greater than maximum")]
    InvalidLimits,

    #[error("memory size must be at most 65536 pages (4GiB)")]
    MemoryTooLarge,

    #[error("constant expression required")]
    ConstantExpressionRequired,

    #[error("duplicate export name {0:?}")]
    DuplicateExport(String),

    #[error("start function must exist and have type [] -> []")]
    InvalidStartFunction,

    #[error("data count section required")]
    DataCountRequired,

    #[error("undeclared function reference {0}")]
    UndeclaredFunctionReference(u32),

    #[error("alignment must not be larger than natural")]
    InvalidAlignment,

    #[error("global {0} is immutable")]
    ImmutableGlobal(u32),

    #[error("unbalanced control structure")]
    UnbalancedControl,

    #[error("operators remaining after end of function")]
    TrailingBytes,

    #[error("{0}")]
    Malformed(DecodeError),
}

/// A validation failure, located at a function and byte offset when it arose
/// inside a function body or a constant expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{}", .kind, location(.func_idx, .offset))]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub func_idx: Option<u32>,
    pub offset: Option<usize>,
}

fn location(func_idx: &Option<u32>, offset: &Option<usize>) -> String {
    match (func_idx, offset) {
        (Some(f), Some(o)) => format!(" in function {f} at offset {o:#x}"),
        (Some(f), None) => format!(" in function {f}"),
        (None, Some(o)) => format!(" at offset {o:#x}"),
        (None, None) => String::new(),
    }
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind) -> ValidationError {
        ValidationError { kind, func_idx: None, offset: None }
    }

    fn at(kind: ValidationErrorKind, offset: usize) -> ValidationError {
        ValidationError { kind, func_idx: None, offset: Some(offset) }
    }
}

impl From<ValidationErrorKind> for ValidationError {
    fn from(kind: ValidationErrorKind) -> ValidationError {
        ValidationError::new(kind)
    }
}

/// Validate a module. The result is memoised inside the module, so a module
/// shared between many instances is only ever checked once.
pub fn validate(module: &Module) -> Result<(), ValidationError> {
    module.validated.get_or_init(|| validate_module(module)).clone()
}

fn validate_module(module: &Module) -> Result<(), ValidationError> {
    use ValidationErrorKind::*;

    let check_type_idx = |idx: u32| -> Result<(), ValidationError> {
        if idx as usize >= module.types.len() {
            return Err(InvalidIndex { space: "type", index: idx }.into());
        }
        Ok(())
    };

    for import in &module.imports {
        match &import.desc {
            ImportDesc::Function(ty) => check_type_idx(*ty)?,
            ImportDesc::Table(ty) => check_limits(&ty.limits, u32::MAX)?,
            ImportDesc::Memory(ty) => check_limits(&ty.limits, limits::MAX_MEMORY_PAGES)?,
            ImportDesc::Global(_) => {}
        }
    }
    for ty in &module.functions {
        check_type_idx(*ty)?;
    }
    for table in &module.tables {
        check_limits(&table.limits, u32::MAX)?;
    }
    if module.num_memories() > 1 {
        return Err(MultipleMemories.into());
    }
    for memory in &module.memories {
        check_limits(&memory.limits, limits::MAX_MEMORY_PAGES)?;
    }

    for global in &module.globals {
        validate_const_expr(module, &global.init, global.ty.value)?;
    }

    let mut names = HashSet::new();
    for export in &module.exports {
        if !names.insert(export.name.as_str()) {
            return Err(DuplicateExport(export.name.clone()).into());
        }
        let (space, count) = match export.kind {
            ExternalKind::Function => ("function", module.num_functions()),
            ExternalKind::Table => ("table", module.num_tables()),
            ExternalKind::Memory => ("memory", module.num_memories()),
            ExternalKind::Global => ("global", module.num_globals()),
        };
        if export.index >= count {
            return Err(InvalidIndex { space, index: export.index }.into());
        }
    }

    if let Some(start) = module.start {
        match module.func_type(start) {
            Some(ty) if ty.params.is_empty() && ty.results.is_empty() => {}
            _ => return Err(InvalidStartFunction.into()),
        }
    }

    for segment in &module.elements {
        if let ElementMode::Active { table, offset } = &segment.mode {
            let table_type = module.table_type(*table).ok_or(MissingTable(*table))?;
            if table_type.element != segment.ty {
                return Err(ValidationError::at(TypeMismatch, offset.offset));
            }
            validate_const_expr(module, offset, ValueType::I32)?;
        }
        for item in &segment.items {
            validate_const_expr(module, item, segment.ty.into())?;
        }
    }

    for segment in &module.data {
        if let DataMode::Active { memory, offset } = &segment.mode {
            if module.memory_type(*memory).is_none() {
                return Err(ValidationError::at(MissingMemory(*memory), offset.offset));
            }
            validate_const_expr(module, offset, ValueType::I32)?;
        }
    }

    let declared = declared_function_refs(module);
    for (i, body) in module.code.iter().enumerate() {
        let func_idx = module.num_imported_functions() + i as u32;
        validate_function(module, &declared, func_idx, body)?;
        trace!(func_idx, locals = body.locals.len(), len = body.code.len(), "validated function");
    }

    debug!(functions = module.code.len(), "module validated");
    Ok(())
}

fn check_limits(limits: &Limits, max_allowed: u32) -> Result<(), ValidationError> {
    if let Some(max) = limits.max {
        if limits.min > max {
            return Err(ValidationErrorKind::InvalidLimits.into());
        }
        if max > max_allowed {
            return Err(ValidationErrorKind::MemoryTooLarge.into());
        }
    }
    if limits.min > max_allowed {
        return Err(ValidationErrorKind::MemoryTooLarge.into());
    }
    Ok(())
}

/// Functions that may be named by `ref.func` inside function bodies: those
/// referenced from element segments, exports or global initialisers.
fn declared_function_refs(module: &Module) -> HashSet<u32> {
    let mut declared = HashSet::new();
    let exprs = module
        .elements
        .iter()
        .flat_map(|segment| segment.items.iter())
        .chain(module.globals.iter().map(|global| &global.init));
    for expr in exprs {
        for inst in &expr.instructions {
            if let Instruction::RefFunc { func_idx } = inst {
                declared.insert(*func_idx);
            }
        }
    }
    for export in &module.exports {
        if export.kind == ExternalKind::Function {
            declared.insert(export.index);
        }
    }
    declared
}

/// Check that `expr` is a constant expression producing exactly one value of
/// type `expected`.
fn validate_const_expr(module: &Module, expr: &ConstExpr, expected: ValueType) -> Result<(), ValidationError> {
    use ValidationErrorKind::*;
    let fail = |kind| ValidationError::at(kind, expr.offset);

    let mut stack = Vec::new();
    for inst in &expr.instructions {
        if !inst.is_constant() {
            return Err(fail(ConstantExpressionRequired));
        }
        let ty = match *inst {
            Instruction::I32Const { .. } => ValueType::I32,
            Instruction::I64Const { .. } => ValueType::I64,
            Instruction::F32Const { .. } => ValueType::F32,
            Instruction::F64Const { .. } => ValueType::F64,
            Instruction::RefNull { ref_type } => ref_type.into(),
            Instruction::RefFunc { func_idx } => {
                if func_idx >= module.num_functions() {
                    return Err(fail(InvalidIndex { space: "function", index: func_idx }));
                }
                ValueType::FuncRef
            }
            Instruction::GlobalGet { global_idx } => {
                let global = module
                    .global_type(global_idx)
                    .ok_or(fail(InvalidIndex { space: "global", index: global_idx }))?;
                // only immutable imported globals are initialised by then
                if global_idx >= module.num_imported_globals() || global.mutable {
                    return Err(fail(ConstantExpressionRequired));
                }
                global.value
            }
            _ => break, // end
        };
        stack.push(ty);
    }

    if stack != [expected] {
        return Err(fail(TypeMismatch));
    }
    Ok(())
}

fn validate_function(
    module: &Module,
    declared: &HashSet<u32>,
    func_idx: u32,
    body: &FunctionBody,
) -> Result<(), ValidationError> {
    let in_function = |kind, offset| ValidationError { kind, func_idx: Some(func_idx), offset: Some(offset) };

    let ty = module
        .func_type(func_idx)
        .ok_or(ValidationErrorKind::InvalidIndex { space: "function", index: func_idx })?;

    let mut validator = CodeValidator::new(module, declared, ty, &body.locals);
    let mut reader = Reader::with_base(&body.code, body.offset);

    while !reader.at_end() {
        let offset = reader.offset();
        if validator.finished() {
            return Err(in_function(ValidationErrorKind::TrailingBytes, offset));
        }
        let inst =
            Instruction::decode(&mut reader).map_err(|e| in_function(ValidationErrorKind::Malformed(e), offset))?;
        validator.validate(&inst).map_err(|kind| in_function(kind, offset))?;
    }

    if !validator.finished() {
        return Err(in_function(ValidationErrorKind::UnbalancedControl, reader.offset()));
    }
    Ok(())
}
