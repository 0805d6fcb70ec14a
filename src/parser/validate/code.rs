//! Function body type checking.
//!
//! Follows the algorithm from the validation appendix of the core
//! specification: an operand stack of possibly-unknown value types and a stack
//! of control frames. After `unreachable`, `br`, `br_table` or `return` the
//! current frame becomes polymorphic and pops below its height yield
//! [`MaybeValue::Unknown`] instead of failing.

use std::collections::HashSet;

use super::ValidationErrorKind as Error;
use crate::parser::instruction::Instruction;
use crate::parser::module::Module;
use crate::parser::types::{BlockType, FunctionType, RefType, ValueType};

use MaybeValue::*;
use ValueType::*;

type Result<T> = std::result::Result<T, Error>;

#[derive(PartialEq, Debug, Clone, Copy)]
enum MaybeValue {
    Val(ValueType),
    Unknown,
}

impl MaybeValue {
    fn is_num(&self) -> bool {
        match self {
            Val(v) => !v.is_ref(),
            Unknown => true,
        }
    }

    fn is_ref(&self) -> bool {
        match self {
            Val(v) => v.is_ref(),
            Unknown => true,
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
enum FrameKind {
    Function,
    Block,
    Loop,
    If,
    Else,
}

#[derive(Clone)]
struct CtrlFrame {
    kind: FrameKind,
    start_types: Vec<ValueType>,
    end_types: Vec<ValueType>,
    height: usize,
    unreachable: bool,
}

impl CtrlFrame {
    /// Types a branch to this frame must carry.
    fn label_types(&self) -> &[ValueType] {
        if self.kind == FrameKind::Loop {
            &self.start_types
        } else {
            &self.end_types
        }
    }
}

pub(super) struct CodeValidator<'a> {
    module: &'a Module,
    declared_refs: &'a HashSet<u32>,
    locals: Vec<ValueType>,
    vals: Vec<MaybeValue>,
    ctrls: Vec<CtrlFrame>,
}

impl<'a> CodeValidator<'a> {
    pub fn new(
        module: &'a Module,
        declared_refs: &'a HashSet<u32>,
        ty: &FunctionType,
        locals: &[ValueType],
    ) -> CodeValidator<'a> {
        let mut all_locals = ty.params.clone();
        all_locals.extend_from_slice(locals);

        let mut v = CodeValidator { module, declared_refs, locals: all_locals, vals: vec![], ctrls: vec![] };
        // parameters live in locals, not on the operand stack
        v.push_ctrl(FrameKind::Function, vec![], ty.results.clone());
        v
    }

    /// Whether the function's final `end` has been seen.
    pub fn finished(&self) -> bool {
        self.ctrls.is_empty()
    }

    fn push_val(&mut self, val: MaybeValue) {
        self.vals.push(val);
    }

    fn push_vals(&mut self, types: &[ValueType]) {
        self.vals.extend(types.iter().map(|t| Val(*t)));
    }

    fn pop_val(&mut self) -> Result<MaybeValue> {
        let frame = self.ctrls.last().ok_or(Error::UnbalancedControl)?;
        if self.vals.len() == frame.height {
            if frame.unreachable {
                return Ok(Unknown);
            }
            return Err(Error::TypeMismatch);
        }
        self.vals.pop().ok_or(Error::TypeMismatch)
    }

    fn pop_expected(&mut self, expected: MaybeValue) -> Result<MaybeValue> {
        let popped = self.pop_val()?;
        if popped != expected && popped != Unknown && expected != Unknown {
            return Err(Error::TypeMismatch);
        }
        Ok(popped)
    }

    fn pop_expecteds(&mut self, types: &[ValueType]) -> Result<Vec<MaybeValue>> {
        let mut popped = Vec::with_capacity(types.len());
        for ty in types.iter().rev() {
            popped.push(self.pop_expected(Val(*ty))?);
        }
        popped.reverse();
        Ok(popped)
    }

    fn push_ctrl(&mut self, kind: FrameKind, start_types: Vec<ValueType>, end_types: Vec<ValueType>) {
        let height = self.vals.len();
        self.push_vals(&start_types);
        self.ctrls.push(CtrlFrame { kind, start_types, end_types, height, unreachable: false });
    }

    fn pop_ctrl(&mut self) -> Result<CtrlFrame> {
        let end_types = self.ctrls.last().ok_or(Error::UnbalancedControl)?.end_types.clone();
        self.pop_expecteds(&end_types)?;
        let frame = self.ctrls.pop().ok_or(Error::UnbalancedControl)?;
        if self.vals.len() != frame.height {
            return Err(Error::UnusedValues);
        }
        Ok(frame)
    }

    fn unreachable(&mut self) -> Result<()> {
        let frame = self.ctrls.last_mut().ok_or(Error::UnbalancedControl)?;
        self.vals.truncate(frame.height);
        frame.unreachable = true;
        Ok(())
    }

    fn label(&self, depth: u32) -> Result<&CtrlFrame> {
        let depth = depth as usize;
        if depth >= self.ctrls.len() {
            return Err(Error::InvalidIndex { space: "label", index: depth as u32 });
        }
        Ok(&self.ctrls[self.ctrls.len() - 1 - depth])
    }

    fn label_types(&self, depth: u32) -> Result<Vec<ValueType>> {
        Ok(self.label(depth)?.label_types().to_vec())
    }

    fn sig_unary(&mut self, input: ValueType, output: ValueType) -> Result<()> {
        self.pop_expected(Val(input))?;
        self.push_val(Val(output));
        Ok(())
    }

    fn sig_binary(&mut self, input: ValueType, output: ValueType) -> Result<()> {
        self.pop_expected(Val(input))?;
        self.pop_expected(Val(input))?;
        self.push_val(Val(output));
        Ok(())
    }

    fn local(&self, idx: u32) -> Result<ValueType> {
        self.locals.get(idx as usize).copied().ok_or(Error::InvalidIndex { space: "local", index: idx })
    }

    fn function_type(&self, idx: u32) -> Result<&'a FunctionType> {
        self.module.func_type(idx).ok_or(Error::InvalidIndex { space: "function", index: idx })
    }

    fn type_at(&self, idx: u32) -> Result<&'a FunctionType> {
        self.module.types.get(idx as usize).ok_or(Error::InvalidIndex { space: "type", index: idx })
    }

    fn table_elem(&self, idx: u32) -> Result<ValueType> {
        let table = self.module.table_type(idx).ok_or(Error::MissingTable(idx))?;
        Ok(table.element.into())
    }

    fn elem_segment(&self, idx: u32) -> Result<ValueType> {
        let segment = self
            .module
            .elements
            .get(idx as usize)
            .ok_or(Error::InvalidIndex { space: "elem segment", index: idx })?;
        Ok(segment.ty.into())
    }

    fn check_memory(&self) -> Result<()> {
        if self.module.num_memories() == 0 {
            return Err(Error::MissingMemory(0));
        }
        Ok(())
    }

    fn check_data(&self, idx: u32) -> Result<()> {
        let count = self.module.data_count.ok_or(Error::DataCountRequired)?;
        if idx >= count {
            return Err(Error::InvalidIndex { space: "data segment", index: idx });
        }
        Ok(())
    }

    fn block_signature(&self, block_type: BlockType) -> Result<(Vec<ValueType>, Vec<ValueType>)> {
        match block_type {
            BlockType::Empty => Ok((vec![], vec![])),
            BlockType::Value(ty) => Ok((vec![], vec![ty])),
            BlockType::FuncType(idx) => {
                let ty = self.type_at(idx)?;
                Ok((ty.params.clone(), ty.results.clone()))
            }
        }
    }

    fn call(&mut self, ty: &FunctionType) -> Result<()> {
        self.pop_expecteds(&ty.params)?;
        self.push_vals(&ty.results);
        Ok(())
    }

    fn load(&mut self, inst: &Instruction, output: ValueType) -> Result<()> {
        self.check_memory()?;
        self.check_alignment(inst)?;
        self.pop_expected(Val(I32))?;
        self.push_val(Val(output));
        Ok(())
    }

    fn store(&mut self, inst: &Instruction, input: ValueType) -> Result<()> {
        self.check_memory()?;
        self.check_alignment(inst)?;
        self.pop_expected(Val(input))?;
        self.pop_expected(Val(I32))?;
        Ok(())
    }

    fn check_alignment(&self, inst: &Instruction) -> Result<()> {
        if let Some((memarg, width)) = inst.memory_access() {
            if memarg.align >= 32 || (1u32 << memarg.align) > width {
                return Err(Error::InvalidAlignment);
            }
        }
        Ok(())
    }

    pub fn validate(&mut self, inst: &Instruction) -> Result<()> {
        use Instruction as I;

        match inst {
            I::I32Const { .. } => self.push_val(Val(I32)),
            I::I64Const { .. } => self.push_val(Val(I64)),
            I::F32Const { .. } => self.push_val(Val(F32)),
            I::F64Const { .. } => self.push_val(Val(F64)),

            // iunop (i32):i32
            I::I32Clz | I::I32Ctz | I::I32Popcnt | I::I32Extend8S | I::I32Extend16S => self.sig_unary(I32, I32)?,

            // ibinop (i32,i32):i32 and irelop (i32,i32):i32
            I::I32Add | I::I32Sub | I::I32Mul | I::I32DivS | I::I32DivU | I::I32RemS | I::I32RemU | I::I32And
            | I::I32Or | I::I32Xor | I::I32Shl | I::I32ShrS | I::I32ShrU | I::I32Rotl | I::I32Rotr | I::I32Eq
            | I::I32Ne | I::I32LtS | I::I32LtU | I::I32GtS | I::I32GtU | I::I32LeS | I::I32LeU | I::I32GeS
            | I::I32GeU => self.sig_binary(I32, I32)?,

            // itestop (i32):i32
            I::I32Eqz => self.sig_unary(I32, I32)?,

            // iunop (i64):i64
            I::I64Clz | I::I64Ctz | I::I64Popcnt | I::I64Extend8S | I::I64Extend16S | I::I64Extend32S => {
                self.sig_unary(I64, I64)?
            }

            // ibinop (i64,i64):i64
            I::I64Add | I::I64Sub | I::I64Mul | I::I64DivS | I::I64DivU | I::I64RemS | I::I64RemU | I::I64And
            | I::I64Or | I::I64Xor | I::I64Shl | I::I64ShrS | I::I64ShrU | I::I64Rotl | I::I64Rotr => {
                self.sig_binary(I64, I64)?
            }

            // itestop (i64):i32
            I::I64Eqz => self.sig_unary(I64, I32)?,

            // irelop (i64,i64):i32
            I::I64Eq | I::I64Ne | I::I64LtS | I::I64LtU | I::I64GtS | I::I64GtU | I::I64LeS | I::I64LeU
            | I::I64GeS | I::I64GeU => self.sig_binary(I64, I32)?,

            // funop (f32):f32
            I::F32Abs | I::F32Neg | I::F32Ceil | I::F32Floor | I::F32Trunc | I::F32Nearest | I::F32Sqrt => {
                self.sig_unary(F32, F32)?
            }

            // fbinop (f32,f32):f32
            I::F32Add | I::F32Sub | I::F32Mul | I::F32Div | I::F32Min | I::F32Max | I::F32Copysign => {
                self.sig_binary(F32, F32)?
            }

            // frelop (f32,f32):i32
            I::F32Eq | I::F32Ne | I::F32Lt | I::F32Gt | I::F32Le | I::F32Ge => self.sig_binary(F32, I32)?,

            // funop (f64):f64
            I::F64Abs | I::F64Neg | I::F64Ceil | I::F64Floor | I::F64Trunc | I::F64Nearest | I::F64Sqrt => {
                self.sig_unary(F64, F64)?
            }

            // fbinop (f64,f64):f64
            I::F64Add | I::F64Sub | I::F64Mul | I::F64Div | I::F64Min | I::F64Max | I::F64Copysign => {
                self.sig_binary(F64, F64)?
            }

            // frelop (f64,f64):i32
            I::F64Eq | I::F64Ne | I::F64Lt | I::F64Gt | I::F64Le | I::F64Ge => self.sig_binary(F64, I32)?,

            // cvtop (i64):i32
            I::I32WrapI64 => self.sig_unary(I64, I32)?,

            // cvtop (f32):i32
            I::I32TruncF32S | I::I32TruncF32U | I::I32TruncSatF32S | I::I32TruncSatF32U | I::I32ReinterpretF32 => {
                self.sig_unary(F32, I32)?
            }

            // cvtop (f64):i32
            I::I32TruncF64S | I::I32TruncF64U | I::I32TruncSatF64S | I::I32TruncSatF64U => self.sig_unary(F64, I32)?,

            // cvtop (i32):i64
            I::I64ExtendI32S | I::I64ExtendI32U => self.sig_unary(I32, I64)?,

            // cvtop (f32):i64
            I::I64TruncF32S | I::I64TruncF32U | I::I64TruncSatF32S | I::I64TruncSatF32U => self.sig_unary(F32, I64)?,

            // cvtop (f64):i64
            I::I64TruncF64S | I::I64TruncF64U | I::I64TruncSatF64S | I::I64TruncSatF64U | I::I64ReinterpretF64 => {
                self.sig_unary(F64, I64)?
            }

            // cvtop (i32):f32
            I::F32ConvertI32S | I::F32ConvertI32U | I::F32ReinterpretI32 => self.sig_unary(I32, F32)?,

            // cvtop (i64):f32
            I::F32ConvertI64S | I::F32ConvertI64U => self.sig_unary(I64, F32)?,

            // cvtop (f64):f32
            I::F32DemoteF64 => self.sig_unary(F64, F32)?,

            // cvtop (i32):f64
            I::F64ConvertI32S | I::F64ConvertI32U => self.sig_unary(I32, F64)?,

            // cvtop (i64):f64
            I::F64ConvertI64S | I::F64ConvertI64U | I::F64ReinterpretI64 => self.sig_unary(I64, F64)?,

            // cvtop (f32):f64
            I::F64PromoteF32 => self.sig_unary(F32, F64)?,

            I::LocalGet { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.push_val(Val(ty));
            }

            I::LocalSet { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.pop_expected(Val(ty))?;
            }

            I::LocalTee { local_idx } => {
                let ty = self.local(*local_idx)?;
                self.pop_expected(Val(ty))?;
                self.push_val(Val(ty));
            }

            I::GlobalGet { global_idx } => {
                let global = self
                    .module
                    .global_type(*global_idx)
                    .ok_or(Error::InvalidIndex { space: "global", index: *global_idx })?;
                self.push_val(Val(global.value));
            }

            I::GlobalSet { global_idx } => {
                let global = *self
                    .module
                    .global_type(*global_idx)
                    .ok_or(Error::InvalidIndex { space: "global", index: *global_idx })?;
                if !global.mutable {
                    return Err(Error::ImmutableGlobal(*global_idx));
                }
                self.pop_expected(Val(global.value))?;
            }

            I::I32Load { .. }
            | I::I32Load8S { .. }
            | I::I32Load8U { .. }
            | I::I32Load16S { .. }
            | I::I32Load16U { .. } => self.load(inst, I32)?,

            I::I64Load { .. }
            | I::I64Load8S { .. }
            | I::I64Load8U { .. }
            | I::I64Load16S { .. }
            | I::I64Load16U { .. }
            | I::I64Load32S { .. }
            | I::I64Load32U { .. } => self.load(inst, I64)?,

            I::F32Load { .. } => self.load(inst, F32)?,
            I::F64Load { .. } => self.load(inst, F64)?,

            I::I32Store { .. } | I::I32Store8 { .. } | I::I32Store16 { .. } => self.store(inst, I32)?,
            I::I64Store { .. } | I::I64Store8 { .. } | I::I64Store16 { .. } | I::I64Store32 { .. } => {
                self.store(inst, I64)?
            }
            I::F32Store { .. } => self.store(inst, F32)?,
            I::F64Store { .. } => self.store(inst, F64)?,

            I::MemorySize => {
                self.check_memory()?;
                self.push_val(Val(I32));
            }

            I::MemoryGrow => {
                self.check_memory()?;
                self.sig_unary(I32, I32)?;
            }

            I::MemoryFill | I::MemoryCopy => {
                self.check_memory()?;
                self.pop_expecteds(&[I32, I32, I32])?;
            }

            I::MemoryInit { data_idx } => {
                self.check_memory()?;
                self.check_data(*data_idx)?;
                self.pop_expecteds(&[I32, I32, I32])?;
            }

            I::DataDrop { data_idx } => self.check_data(*data_idx)?,

            I::TableGet { table_idx } => {
                let elem = self.table_elem(*table_idx)?;
                self.sig_unary(I32, elem)?;
            }

            I::TableSet { table_idx } => {
                let elem = self.table_elem(*table_idx)?;
                self.pop_expecteds(&[I32, elem])?;
            }

            I::TableSize { table_idx } => {
                self.table_elem(*table_idx)?;
                self.push_val(Val(I32));
            }

            I::TableGrow { table_idx } => {
                let elem = self.table_elem(*table_idx)?;
                self.pop_expecteds(&[elem, I32])?;
                self.push_val(Val(I32));
            }

            I::TableFill { table_idx } => {
                let elem = self.table_elem(*table_idx)?;
                self.pop_expecteds(&[I32, elem, I32])?;
            }

            I::TableCopy { dst_table, src_table } => {
                let dst = self.table_elem(*dst_table)?;
                let src = self.table_elem(*src_table)?;
                if dst != src {
                    return Err(Error::TypeMismatch);
                }
                self.pop_expecteds(&[I32, I32, I32])?;
            }

            I::TableInit { elem_idx, table_idx } => {
                let dst = self.table_elem(*table_idx)?;
                let src = self.elem_segment(*elem_idx)?;
                if dst != src {
                    return Err(Error::TypeMismatch);
                }
                self.pop_expecteds(&[I32, I32, I32])?;
            }

            I::ElemDrop { elem_idx } => {
                self.elem_segment(*elem_idx)?;
            }

            I::Block { block_type } | I::Loop { block_type } | I::If { block_type } => {
                let (params, results) = self.block_signature(*block_type)?;
                let kind = match inst {
                    I::Block { .. } => FrameKind::Block,
                    I::Loop { .. } => FrameKind::Loop,
                    _ => {
                        self.pop_expected(Val(I32))?;
                        FrameKind::If
                    }
                };
                self.pop_expecteds(&params)?;
                self.push_ctrl(kind, params, results);
            }

            I::Else => {
                let frame = self.pop_ctrl()?;
                if frame.kind != FrameKind::If {
                    return Err(Error::UnbalancedControl);
                }
                self.push_ctrl(FrameKind::Else, frame.start_types, frame.end_types);
            }

            I::End => {
                let frame = self.pop_ctrl()?;
                // an `if` without `else` must leave its parameters as results
                if frame.kind == FrameKind::If && frame.start_types != frame.end_types {
                    return Err(Error::TypeMismatch);
                }
                if frame.kind != FrameKind::Function {
                    self.push_vals(&frame.end_types);
                }
            }

            I::Br { label_idx } => {
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.unreachable()?;
            }

            I::BrIf { label_idx } => {
                self.pop_expected(Val(I32))?;
                let types = self.label_types(*label_idx)?;
                self.pop_expecteds(&types)?;
                self.push_vals(&types);
            }

            I::BrTable { labels, default } => {
                self.pop_expected(Val(I32))?;
                let default_types = self.label_types(*default)?;
                let arity = default_types.len();
                for label in labels {
                    let types = self.label_types(*label)?;
                    if types.len() != arity {
                        return Err(Error::TypeMismatch);
                    }
                    let popped = self.pop_expecteds(&types)?;
                    self.vals.extend(popped);
                }
                self.pop_expecteds(&default_types)?;
                self.unreachable()?;
            }

            I::Return => {
                let types = self.ctrls.first().ok_or(Error::UnbalancedControl)?.end_types.clone();
                self.pop_expecteds(&types)?;
                self.unreachable()?;
            }

            I::Unreachable => self.unreachable()?,
            I::Nop => {}

            I::Call { func_idx } => {
                let ty = self.function_type(*func_idx)?;
                self.call(ty)?;
            }

            I::CallIndirect { type_idx, table_idx } => {
                if self.table_elem(*table_idx)? != FuncRef {
                    return Err(Error::TypeMismatch);
                }
                let ty = self.type_at(*type_idx)?;
                self.pop_expected(Val(I32))?;
                self.call(ty)?;
            }

            I::Drop => {
                self.pop_val()?;
            }

            I::Select => {
                self.pop_expected(Val(I32))?;
                let t1 = self.pop_val()?;
                let t2 = self.pop_val()?;
                if !(t1.is_num() && t2.is_num()) {
                    return Err(Error::TypeMismatch);
                }
                if t1 != t2 && t1 != Unknown && t2 != Unknown {
                    return Err(Error::TypeMismatch);
                }
                self.push_val(if t1 == Unknown { t2 } else { t1 });
            }

            I::SelectTyped { val_types } => {
                let [ty] = val_types.as_slice() else {
                    return Err(Error::TypeMismatch);
                };
                self.pop_expected(Val(I32))?;
                self.pop_expected(Val(*ty))?;
                self.pop_expected(Val(*ty))?;
                self.push_val(Val(*ty));
            }

            I::RefNull { ref_type } => self.push_val(Val(ValueType::from(*ref_type))),

            I::RefIsNull => {
                let val = self.pop_val()?;
                if !val.is_ref() {
                    return Err(Error::TypeMismatch);
                }
                self.push_val(Val(I32));
            }

            I::RefFunc { func_idx } => {
                self.function_type(*func_idx)?;
                if !self.declared_refs.contains(func_idx) {
                    return Err(Error::UndeclaredFunctionReference(*func_idx));
                }
                self.push_val(Val(ValueType::from(RefType::FuncRef)));
            }
        }
        Ok(())
    }
}
