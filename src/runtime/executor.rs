//! WebAssembly instruction executor
//!
//! A single loop drives every active frame. Calls push a [`Frame`] instead of
//! recursing on the host stack, so deep wasm recursion is bounded by the
//! configured call depth and never by the native stack.

use tracing::trace;

use super::control::{block_arity, CompiledFunction, Label};
use super::frame::Frame;
use super::global::Global;
use super::imports::{Caller, HostFunc};
use super::instance::{Function, Store};
use super::ops::{self, conversion, numeric};
use super::stack::Stack;
use super::{Memory, RawValue, Table, Trap, Value};
use crate::config::Config;
use crate::parser::instruction::{Instruction, MemArg};
use crate::parser::Module;

/// Executes WebAssembly instructions
pub(crate) struct Executor<'a> {
    module: &'a Module,
    functions: &'a [Function],
    store: &'a mut Store,
    fuel: &'a mut Option<u64>,
    max_call_depth: usize,
    stack: Stack,
    labels: Vec<Label>,
    frames: Vec<Frame<'a>>,
}

impl<'a> Executor<'a> {
    pub fn new(
        module: &'a Module,
        functions: &'a [Function],
        store: &'a mut Store,
        config: &Config,
        fuel: &'a mut Option<u64>,
    ) -> Self {
        Executor {
            module,
            functions,
            store,
            fuel,
            max_call_depth: config.max_call_depth,
            stack: Stack::new(config.max_value_stack),
            labels: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Call `func_idx` with already type-checked arguments and return its
    /// results.
    pub fn run(&mut self, func_idx: u32, args: &[RawValue]) -> Result<Vec<RawValue>, Trap> {
        let arity = self.module.func_type(func_idx).map_or(0, |ty| ty.results.len());
        self.stack.push_all(args)?;
        self.call(func_idx)?;
        self.execute()?;
        debug_assert_eq!(self.stack.len(), arity, "operand stack unbalanced on return");
        Ok(self.stack.pop_n(arity))
    }

    fn execute(&mut self) -> Result<(), Trap> {
        while let Some(frame) = self.frames.last_mut() {
            let code = frame.code;
            let pc = frame.pc;
            frame.pc += 1;
            match code.code.get(pc) {
                Some(inst) => {
                    self.consume_fuel()?;
                    self.step(code, pc, inst)?;
                }
                None => self.return_from_frame(),
            }
        }
        Ok(())
    }

    fn consume_fuel(&mut self) -> Result<(), Trap> {
        if let Some(fuel) = self.fuel.as_mut() {
            if *fuel == 0 {
                return Err(Trap::ResourceExhausted);
            }
            *fuel -= 1;
        }
        Ok(())
    }

    fn call(&mut self, func_idx: u32) -> Result<(), Trap> {
        let functions = self.functions;
        match functions.get(func_idx as usize) {
            Some(Function::Wasm(code)) => self.enter(func_idx, code),
            Some(Function::Host(func)) => self.call_host(func),
            None => Err(Trap::UnknownFunction(func_idx)),
        }
    }

    fn enter(&mut self, func_idx: u32, code: &'a CompiledFunction) -> Result<(), Trap> {
        if self.frames.len() >= self.max_call_depth {
            return Err(Trap::CallStackExhausted);
        }
        let (params, arity) = self
            .module
            .types
            .get(code.type_idx as usize)
            .map_or((0, 0), |ty| (ty.params.len(), ty.results.len()));

        let mut locals = self.stack.pop_n(params);
        locals.extend_from_slice(&code.locals);

        trace!(func_idx, depth = self.frames.len(), "call");
        self.frames.push(Frame {
            func_idx,
            code,
            pc: 0,
            locals,
            stack_base: self.stack.len(),
            label_base: self.labels.len(),
            arity,
        });
        Ok(())
    }

    fn call_host(&mut self, func: &HostFunc) -> Result<(), Trap> {
        let params = &func.ty().params;
        let args: Vec<Value> = self
            .stack
            .pop_n(params.len())
            .into_iter()
            .zip(params)
            .map(|(raw, ty)| Value::from_raw(raw, *ty))
            .collect();

        let mut caller = Caller::new(&mut *self.store, self.module);
        let results = func.call(&mut caller, &args)?;
        for result in results {
            self.stack.push(result.to_raw())?;
        }
        Ok(())
    }

    fn call_indirect(&mut self, type_idx: u32, table_idx: u32) -> Result<(), Trap> {
        let elem_idx = self.stack.pop_u32();
        let func_idx = self.table(table_idx)?.get(elem_idx)?.ok_or(Trap::UninitializedElement)?;

        let expected = self.module.canonical_type(type_idx);
        let actual = self.module.func_type_idx(func_idx).and_then(|ty| self.module.canonical_type(ty));
        if actual.is_none() || actual != expected {
            return Err(Trap::IndirectCallTypeMismatch);
        }
        self.call(func_idx)
    }

    fn return_from_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            self.stack.unwind(frame.stack_base, frame.arity);
            self.labels.truncate(frame.label_base);
            trace!(func_idx = frame.func_idx, depth = self.frames.len(), "return");
        }
    }

    fn jump(&mut self, pc: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = pc;
        }
    }

    fn label_base(&self) -> usize {
        self.frames.last().map_or(0, |frame| frame.label_base)
    }

    fn push_label(&mut self, params: usize, arity: usize, continuation: usize) {
        let height = self.stack.len().saturating_sub(params);
        self.labels.push(Label { arity, height, continuation });
    }

    /// Branch to the label `depth` levels out. The outermost depth is the
    /// function body itself and acts as a return.
    fn branch(&mut self, depth: u32) {
        let depth = depth as usize;
        let active = self.labels.len() - self.label_base();
        if depth >= active {
            self.return_from_frame();
            return;
        }
        let idx = self.labels.len() - 1 - depth;
        let label = self.labels[idx];
        self.stack.unwind(label.height, label.arity);
        self.labels.truncate(idx);
        self.jump(label.continuation);
    }

    fn local(&self, idx: u32) -> RawValue {
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(idx as usize))
            .copied()
            .unwrap_or_default()
    }

    fn set_local(&mut self, idx: u32, value: RawValue) {
        if let Some(slot) = self.frames.last_mut().and_then(|frame| frame.locals.get_mut(idx as usize)) {
            *slot = value;
        }
    }

    fn table(&mut self, idx: u32) -> Result<&mut Table, Trap> {
        self.store.tables.get_mut(idx as usize).ok_or(Trap::TableOutOfBounds)
    }

    fn memory(&mut self) -> Result<&mut Memory, Trap> {
        self.store.memories.first_mut().ok_or(Trap::MemoryOutOfBounds)
    }

    fn load(&mut self, memarg: MemArg, width: u32, extend: impl FnOnce(u64) -> RawValue) -> Result<(), Trap> {
        let memory = self.store.memories.first().ok_or(Trap::MemoryOutOfBounds)?;
        ops::memory::load(&mut self.stack, memory, memarg, width, extend)
    }

    fn write(&mut self, memarg: MemArg, width: u32) -> Result<(), Trap> {
        let memory = self.store.memories.first_mut().ok_or(Trap::MemoryOutOfBounds)?;
        ops::memory::store(&mut self.stack, memory, memarg, width)
    }

    fn copy_tables(&mut self, dst_table: u32, src_table: u32, dst: u32, src: u32, len: u32) -> Result<(), Trap> {
        let (d, s) = (dst_table as usize, src_table as usize);
        let tables = &mut self.store.tables;
        if d.max(s) >= tables.len() {
            return Err(Trap::TableOutOfBounds);
        }
        if d == s {
            return tables[d].copy_within(dst, src, len);
        }
        if d < s {
            let (lo, hi) = tables.split_at_mut(s);
            lo[d].copy_from(dst, &hi[0], src, len)
        } else {
            let (lo, hi) = tables.split_at_mut(d);
            hi[0].copy_from(dst, &lo[s], src, len)
        }
    }

    fn step(&mut self, code: &'a CompiledFunction, pc: usize, inst: &Instruction) -> Result<(), Trap> {
        use Instruction::*;

        macro_rules! unop {
            ($as:ident => $from:ident, |$a:ident| $body:expr) => {
                self.stack.unary(|x| {
                    let $a = x.$as();
                    RawValue::$from($body)
                })
            };
        }
        macro_rules! binop {
            ($as:ident => $from:ident, |$a:ident, $b:ident| $body:expr) => {
                self.stack.binary(|x, y| {
                    let $a = x.$as();
                    let $b = y.$as();
                    RawValue::$from($body)
                })
            };
        }
        macro_rules! try_unop {
            ($as:ident => $from:ident, $f:path) => {
                self.stack.try_unary(|x| Ok(RawValue::$from($f(x.$as())?)))?
            };
        }
        macro_rules! try_binop {
            ($as:ident => $from:ident, $f:path) => {
                self.stack.try_binary(|x, y| Ok(RawValue::$from($f(x.$as(), y.$as())?)))?
            };
        }

        match inst {
            // ----------------------------------------------------------------
            // Control instructions
            Unreachable => return Err(Trap::Unreachable),
            Nop => {}
            Block { block_type } => {
                let (params, results) = block_arity(self.module, *block_type);
                self.push_label(params, results, code.targets[pc].end as usize + 1);
            }
            Loop { block_type } => {
                let (params, _) = block_arity(self.module, *block_type);
                self.push_label(params, params, pc);
            }
            If { block_type } => {
                let cond = self.stack.pop_i32();
                let (params, results) = block_arity(self.module, *block_type);
                let target = code.targets[pc];
                self.push_label(params, results, target.end as usize + 1);
                if cond == 0 {
                    self.jump(target.alt as usize);
                }
            }
            Else => self.jump(code.targets[pc].end as usize),
            End => {
                if self.labels.len() > self.label_base() {
                    self.labels.pop();
                } else {
                    self.return_from_frame();
                }
            }
            Br { label_idx } => self.branch(*label_idx),
            BrIf { label_idx } => {
                if self.stack.pop_i32() != 0 {
                    self.branch(*label_idx);
                }
            }
            BrTable { labels, default } => {
                let idx = self.stack.pop_u32() as usize;
                self.branch(labels.get(idx).copied().unwrap_or(*default));
            }
            Return => self.return_from_frame(),
            Call { func_idx } => self.call(*func_idx)?,
            CallIndirect { type_idx, table_idx } => self.call_indirect(*type_idx, *table_idx)?,

            // ----------------------------------------------------------------
            // Reference instructions
            RefNull { .. } => self.stack.push(RawValue::NULL_REF)?,
            RefIsNull => unop!(to_ref => from_bool, |r| r.is_none()),
            RefFunc { func_idx } => self.stack.push(RawValue::from_u32(*func_idx))?,

            // ----------------------------------------------------------------
            // Parametric instructions
            Drop => {
                self.stack.pop();
            }
            Select | SelectTyped { .. } => {
                let cond = self.stack.pop_i32();
                self.stack.binary(|a, b| if cond != 0 { a } else { b });
            }

            // ----------------------------------------------------------------
            // Variable instructions
            LocalGet { local_idx } => {
                let value = self.local(*local_idx);
                self.stack.push(value)?;
            }
            LocalSet { local_idx } => {
                let value = self.stack.pop();
                self.set_local(*local_idx, value);
            }
            LocalTee { local_idx } => {
                let value = self.stack.peek().copied().unwrap_or_default();
                self.set_local(*local_idx, value);
            }
            GlobalGet { global_idx } => {
                let value = self.store.globals.get(*global_idx as usize).map(Global::raw).unwrap_or_default();
                self.stack.push(value)?;
            }
            GlobalSet { global_idx } => {
                let value = self.stack.pop();
                if let Some(global) = self.store.globals.get_mut(*global_idx as usize) {
                    global.set_raw(value);
                }
            }

            // ----------------------------------------------------------------
            // Table instructions
            TableGet { table_idx } => {
                let idx = self.stack.pop_u32();
                let value = self.table(*table_idx)?.get(idx)?;
                self.stack.push(RawValue::from_ref(value))?;
            }
            TableSet { table_idx } => {
                let value = self.stack.pop().to_ref();
                let idx = self.stack.pop_u32();
                self.table(*table_idx)?.set(idx, value)?;
            }
            TableSize { table_idx } => {
                let size = self.table(*table_idx)?.size();
                self.stack.push(RawValue::from_u32(size))?;
            }
            TableGrow { table_idx } => {
                let delta = self.stack.pop_u32();
                let init = self.stack.pop().to_ref();
                let previous = self.table(*table_idx)?.grow(delta, init);
                self.stack.push(RawValue::from_u32(previous))?;
            }
            TableFill { table_idx } => {
                let len = self.stack.pop_u32();
                let value = self.stack.pop().to_ref();
                let dst = self.stack.pop_u32();
                self.table(*table_idx)?.fill(dst, value, len)?;
            }
            TableCopy { dst_table, src_table } => {
                let len = self.stack.pop_u32();
                let src = self.stack.pop_u32();
                let dst = self.stack.pop_u32();
                self.copy_tables(*dst_table, *src_table, dst, src, len)?;
            }
            TableInit { elem_idx, table_idx } => {
                let len = self.stack.pop_u32();
                let src = self.stack.pop_u32();
                let dst = self.stack.pop_u32();
                let store = &mut *self.store;
                let segment = store.elements.get(*elem_idx as usize).map_or(&[][..], Vec::as_slice);
                let table = store.tables.get_mut(*table_idx as usize).ok_or(Trap::TableOutOfBounds)?;
                table.init(dst, segment, src, len)?;
            }
            ElemDrop { elem_idx } => {
                if let Some(segment) = self.store.elements.get_mut(*elem_idx as usize) {
                    *segment = Vec::new();
                }
            }

            // ----------------------------------------------------------------
            // Memory instructions
            I32Load { memarg } => self.load(*memarg, 4, |b| RawValue::from_u32(b as u32))?,
            I64Load { memarg } => self.load(*memarg, 8, RawValue::from_u64)?,
            F32Load { memarg } => self.load(*memarg, 4, |b| RawValue::from_u32(b as u32))?,
            F64Load { memarg } => self.load(*memarg, 8, RawValue::from_u64)?,
            I32Load8S { memarg } => self.load(*memarg, 1, |b| RawValue::from_i32(b as i8 as i32))?,
            I32Load8U { memarg } => self.load(*memarg, 1, RawValue::from_u64)?,
            I32Load16S { memarg } => self.load(*memarg, 2, |b| RawValue::from_i32(b as i16 as i32))?,
            I32Load16U { memarg } => self.load(*memarg, 2, RawValue::from_u64)?,
            I64Load8S { memarg } => self.load(*memarg, 1, |b| RawValue::from_i64(b as i8 as i64))?,
            I64Load8U { memarg } => self.load(*memarg, 1, RawValue::from_u64)?,
            I64Load16S { memarg } => self.load(*memarg, 2, |b| RawValue::from_i64(b as i16 as i64))?,
            I64Load16U { memarg } => self.load(*memarg, 2, RawValue::from_u64)?,
            I64Load32S { memarg } => self.load(*memarg, 4, |b| RawValue::from_i64(b as i32 as i64))?,
            I64Load32U { memarg } => self.load(*memarg, 4, RawValue::from_u64)?,
            I32Store8 { memarg } | I64Store8 { memarg } => self.write(*memarg, 1)?,
            I32Store16 { memarg } | I64Store16 { memarg } => self.write(*memarg, 2)?,
            I32Store { memarg } | F32Store { memarg } | I64Store32 { memarg } => self.write(*memarg, 4)?,
            I64Store { memarg } | F64Store { memarg } => self.write(*memarg, 8)?,
            MemorySize => {
                let pages = self.memory()?.size();
                self.stack.push(RawValue::from_u32(pages))?;
            }
            MemoryGrow => {
                let delta = self.stack.pop_u32();
                let previous = self.memory()?.grow(delta);
                self.stack.push(RawValue::from_i32(previous))?;
            }
            MemoryInit { data_idx } => {
                let len = self.stack.pop_u32() as u64;
                let src = self.stack.pop_u32() as u64;
                let dst = self.stack.pop_u32() as u64;
                let module = self.module;
                let dropped = self.store.dropped_data.get(*data_idx as usize).copied().unwrap_or(true);
                let segment = match module.data.get(*data_idx as usize) {
                    Some(segment) if !dropped => segment.init.as_slice(),
                    _ => &[],
                };
                self.memory()?.init(dst, segment, src, len)?;
            }
            DataDrop { data_idx } => {
                if let Some(dropped) = self.store.dropped_data.get_mut(*data_idx as usize) {
                    *dropped = true;
                }
            }
            MemoryCopy => {
                let len = self.stack.pop_u32() as u64;
                let src = self.stack.pop_u32() as u64;
                let dst = self.stack.pop_u32() as u64;
                self.memory()?.copy_within(dst, src, len)?;
            }
            MemoryFill => {
                let len = self.stack.pop_u32() as u64;
                let value = self.stack.pop_u32() as u8;
                let dst = self.stack.pop_u32() as u64;
                self.memory()?.fill(dst, value, len)?;
            }

            // ----------------------------------------------------------------
            // Numeric instructions - Constants
            I32Const { value } => self.stack.push(RawValue::from_i32(*value))?,
            I64Const { value } => self.stack.push(RawValue::from_i64(*value))?,
            F32Const { bits } => self.stack.push(RawValue::from_u32(*bits))?,
            F64Const { bits } => self.stack.push(RawValue::from_u64(*bits))?,

            // i32 comparisons
            I32Eqz => unop!(as_i32 => from_bool, |a| a == 0),
            I32Eq => binop!(as_i32 => from_bool, |a, b| a == b),
            I32Ne => binop!(as_i32 => from_bool, |a, b| a != b),
            I32LtS => binop!(as_i32 => from_bool, |a, b| a < b),
            I32LtU => binop!(as_u32 => from_bool, |a, b| a < b),
            I32GtS => binop!(as_i32 => from_bool, |a, b| a > b),
            I32GtU => binop!(as_u32 => from_bool, |a, b| a > b),
            I32LeS => binop!(as_i32 => from_bool, |a, b| a <= b),
            I32LeU => binop!(as_u32 => from_bool, |a, b| a <= b),
            I32GeS => binop!(as_i32 => from_bool, |a, b| a >= b),
            I32GeU => binop!(as_u32 => from_bool, |a, b| a >= b),

            // i64 comparisons
            I64Eqz => unop!(as_i64 => from_bool, |a| a == 0),
            I64Eq => binop!(as_i64 => from_bool, |a, b| a == b),
            I64Ne => binop!(as_i64 => from_bool, |a, b| a != b),
            I64LtS => binop!(as_i64 => from_bool, |a, b| a < b),
            I64LtU => binop!(as_u64 => from_bool, |a, b| a < b),
            I64GtS => binop!(as_i64 => from_bool, |a, b| a > b),
            I64GtU => binop!(as_u64 => from_bool, |a, b| a > b),
            I64LeS => binop!(as_i64 => from_bool, |a, b| a <= b),
            I64LeU => binop!(as_u64 => from_bool, |a, b| a <= b),
            I64GeS => binop!(as_i64 => from_bool, |a, b| a >= b),
            I64GeU => binop!(as_u64 => from_bool, |a, b| a >= b),

            // float comparisons
            F32Eq => binop!(as_f32 => from_bool, |a, b| a == b),
            F32Ne => binop!(as_f32 => from_bool, |a, b| a != b),
            F32Lt => binop!(as_f32 => from_bool, |a, b| a < b),
            F32Gt => binop!(as_f32 => from_bool, |a, b| a > b),
            F32Le => binop!(as_f32 => from_bool, |a, b| a <= b),
            F32Ge => binop!(as_f32 => from_bool, |a, b| a >= b),
            F64Eq => binop!(as_f64 => from_bool, |a, b| a == b),
            F64Ne => binop!(as_f64 => from_bool, |a, b| a != b),
            F64Lt => binop!(as_f64 => from_bool, |a, b| a < b),
            F64Gt => binop!(as_f64 => from_bool, |a, b| a > b),
            F64Le => binop!(as_f64 => from_bool, |a, b| a <= b),
            F64Ge => binop!(as_f64 => from_bool, |a, b| a >= b),

            // i32 arithmetic
            I32Clz => unop!(as_u32 => from_u32, |a| a.leading_zeros()),
            I32Ctz => unop!(as_u32 => from_u32, |a| a.trailing_zeros()),
            I32Popcnt => unop!(as_u32 => from_u32, |a| a.count_ones()),
            I32Add => binop!(as_i32 => from_i32, |a, b| a.wrapping_add(b)),
            I32Sub => binop!(as_i32 => from_i32, |a, b| a.wrapping_sub(b)),
            I32Mul => binop!(as_i32 => from_i32, |a, b| a.wrapping_mul(b)),
            I32DivS => try_binop!(as_i32 => from_i32, numeric::i32_div_s),
            I32DivU => try_binop!(as_u32 => from_u32, numeric::i32_div_u),
            I32RemS => try_binop!(as_i32 => from_i32, numeric::i32_rem_s),
            I32RemU => try_binop!(as_u32 => from_u32, numeric::i32_rem_u),
            I32And => binop!(as_u32 => from_u32, |a, b| a & b),
            I32Or => binop!(as_u32 => from_u32, |a, b| a | b),
            I32Xor => binop!(as_u32 => from_u32, |a, b| a ^ b),
            I32Shl => binop!(as_i32 => from_i32, |a, b| numeric::i32_shl(a, b)),
            I32ShrS => binop!(as_i32 => from_i32, |a, b| numeric::i32_shr_s(a, b)),
            I32ShrU => binop!(as_u32 => from_u32, |a, b| numeric::i32_shr_u(a, b)),
            I32Rotl => binop!(as_u32 => from_u32, |a, b| a.rotate_left(b % 32)),
            I32Rotr => binop!(as_u32 => from_u32, |a, b| a.rotate_right(b % 32)),

            // i64 arithmetic
            I64Clz => unop!(as_u64 => from_u64, |a| a.leading_zeros() as u64),
            I64Ctz => unop!(as_u64 => from_u64, |a| a.trailing_zeros() as u64),
            I64Popcnt => unop!(as_u64 => from_u64, |a| a.count_ones() as u64),
            I64Add => binop!(as_i64 => from_i64, |a, b| a.wrapping_add(b)),
            I64Sub => binop!(as_i64 => from_i64, |a, b| a.wrapping_sub(b)),
            I64Mul => binop!(as_i64 => from_i64, |a, b| a.wrapping_mul(b)),
            I64DivS => try_binop!(as_i64 => from_i64, numeric::i64_div_s),
            I64DivU => try_binop!(as_u64 => from_u64, numeric::i64_div_u),
            I64RemS => try_binop!(as_i64 => from_i64, numeric::i64_rem_s),
            I64RemU => try_binop!(as_u64 => from_u64, numeric::i64_rem_u),
            I64And => binop!(as_u64 => from_u64, |a, b| a & b),
            I64Or => binop!(as_u64 => from_u64, |a, b| a | b),
            I64Xor => binop!(as_u64 => from_u64, |a, b| a ^ b),
            I64Shl => binop!(as_i64 => from_i64, |a, b| numeric::i64_shl(a, b)),
            I64ShrS => binop!(as_i64 => from_i64, |a, b| numeric::i64_shr_s(a, b)),
            I64ShrU => binop!(as_u64 => from_u64, |a, b| numeric::i64_shr_u(a, b)),
            I64Rotl => binop!(as_u64 => from_u64, |a, b| a.rotate_left((b % 64) as u32)),
            I64Rotr => binop!(as_u64 => from_u64, |a, b| a.rotate_right((b % 64) as u32)),

            // f32 arithmetic
            F32Abs => unop!(as_f32 => from_f32, |a| a.abs()),
            F32Neg => unop!(as_f32 => from_f32, |a| -a),
            F32Ceil => unop!(as_f32 => from_f32, |a| a.ceil()),
            F32Floor => unop!(as_f32 => from_f32, |a| a.floor()),
            F32Trunc => unop!(as_f32 => from_f32, |a| a.trunc()),
            F32Nearest => unop!(as_f32 => from_f32, |a| a.round_ties_even()),
            F32Sqrt => unop!(as_f32 => from_f32, |a| a.sqrt()),
            F32Add => binop!(as_f32 => from_f32, |a, b| a + b),
            F32Sub => binop!(as_f32 => from_f32, |a, b| a - b),
            F32Mul => binop!(as_f32 => from_f32, |a, b| a * b),
            F32Div => binop!(as_f32 => from_f32, |a, b| a / b),
            F32Min => binop!(as_f32 => from_f32, |a, b| numeric::f32_min(a, b)),
            F32Max => binop!(as_f32 => from_f32, |a, b| numeric::f32_max(a, b)),
            F32Copysign => binop!(as_f32 => from_f32, |a, b| a.copysign(b)),

            // f64 arithmetic
            F64Abs => unop!(as_f64 => from_f64, |a| a.abs()),
            F64Neg => unop!(as_f64 => from_f64, |a| -a),
            F64Ceil => unop!(as_f64 => from_f64, |a| a.ceil()),
            F64Floor => unop!(as_f64 => from_f64, |a| a.floor()),
            F64Trunc => unop!(as_f64 => from_f64, |a| a.trunc()),
            F64Nearest => unop!(as_f64 => from_f64, |a| a.round_ties_even()),
            F64Sqrt => unop!(as_f64 => from_f64, |a| a.sqrt()),
            F64Add => binop!(as_f64 => from_f64, |a, b| a + b),
            F64Sub => binop!(as_f64 => from_f64, |a, b| a - b),
            F64Mul => binop!(as_f64 => from_f64, |a, b| a * b),
            F64Div => binop!(as_f64 => from_f64, |a, b| a / b),
            F64Min => binop!(as_f64 => from_f64, |a, b| numeric::f64_min(a, b)),
            F64Max => binop!(as_f64 => from_f64, |a, b| numeric::f64_max(a, b)),
            F64Copysign => binop!(as_f64 => from_f64, |a, b| a.copysign(b)),

            // ----------------------------------------------------------------
            // Conversions
            I32WrapI64 => unop!(as_i64 => from_i32, |a| a as i32),
            I32TruncF32S => try_unop!(as_f32 => from_i32, conversion::i32_trunc_f32_s),
            I32TruncF32U => try_unop!(as_f32 => from_u32, conversion::i32_trunc_f32_u),
            I32TruncF64S => try_unop!(as_f64 => from_i32, conversion::i32_trunc_f64_s),
            I32TruncF64U => try_unop!(as_f64 => from_u32, conversion::i32_trunc_f64_u),
            I64ExtendI32S => unop!(as_i32 => from_i64, |a| a as i64),
            I64ExtendI32U => unop!(as_u32 => from_u64, |a| a as u64),
            I64TruncF32S => try_unop!(as_f32 => from_i64, conversion::i64_trunc_f32_s),
            I64TruncF32U => try_unop!(as_f32 => from_u64, conversion::i64_trunc_f32_u),
            I64TruncF64S => try_unop!(as_f64 => from_i64, conversion::i64_trunc_f64_s),
            I64TruncF64U => try_unop!(as_f64 => from_u64, conversion::i64_trunc_f64_u),
            F32ConvertI32S => unop!(as_i32 => from_f32, |a| a as f32),
            F32ConvertI32U => unop!(as_u32 => from_f32, |a| a as f32),
            F32ConvertI64S => unop!(as_i64 => from_f32, |a| a as f32),
            F32ConvertI64U => unop!(as_u64 => from_f32, |a| a as f32),
            F32DemoteF64 => unop!(as_f64 => from_f32, |a| a as f32),
            F64ConvertI32S => unop!(as_i32 => from_f64, |a| a as f64),
            F64ConvertI32U => unop!(as_u32 => from_f64, |a| a as f64),
            F64ConvertI64S => unop!(as_i64 => from_f64, |a| a as f64),
            F64ConvertI64U => unop!(as_u64 => from_f64, |a| a as f64),
            F64PromoteF32 => unop!(as_f32 => from_f64, |a| a as f64),
            I32ReinterpretF32 => unop!(as_f32 => from_u32, |a| a.to_bits()),
            I64ReinterpretF64 => unop!(as_f64 => from_u64, |a| a.to_bits()),
            F32ReinterpretI32 => unop!(as_u32 => from_f32, |a| f32::from_bits(a)),
            F64ReinterpretI64 => unop!(as_u64 => from_f64, |a| f64::from_bits(a)),

            // Sign extension
            I32Extend8S => unop!(as_i32 => from_i32, |a| a as i8 as i32),
            I32Extend16S => unop!(as_i32 => from_i32, |a| a as i16 as i32),
            I64Extend8S => unop!(as_i64 => from_i64, |a| a as i8 as i64),
            I64Extend16S => unop!(as_i64 => from_i64, |a| a as i16 as i64),
            I64Extend32S => unop!(as_i64 => from_i64, |a| a as i32 as i64),

            // Saturating truncation: `as` clamps out-of-range values and maps NaN to 0
            I32TruncSatF32S => unop!(as_f32 => from_i32, |a| a as i32),
            I32TruncSatF32U => unop!(as_f32 => from_u32, |a| a as u32),
            I32TruncSatF64S => unop!(as_f64 => from_i32, |a| a as i32),
            I32TruncSatF64U => unop!(as_f64 => from_u32, |a| a as u32),
            I64TruncSatF32S => unop!(as_f32 => from_i64, |a| a as i64),
            I64TruncSatF32U => unop!(as_f32 => from_u64, |a| a as u64),
            I64TruncSatF64S => unop!(as_f64 => from_i64, |a| a as i64),
            I64TruncSatF64U => unop!(as_f64 => from_u64, |a| a as u64),
        }
        Ok(())
    }
}
