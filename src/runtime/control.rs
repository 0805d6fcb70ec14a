//! Structured control flow, flattened.
//!
//! Each function body is decoded once per instantiation into a flat
//! instruction vector plus a side table of jump targets, so `br`, `if` and
//! `else` transfer control by index instead of rescanning the byte stream.
//!
//! At run time the interpreter keeps a stack of [`Label`]s. Branching to a
//! label keeps its arity's worth of values, drops the stack back to the
//! label's entry height and continues at the label's continuation.

use crate::parser::instruction::Instruction;
use crate::parser::module::FunctionBody;
use crate::parser::reader::Reader;
use crate::parser::types::BlockType;
use crate::parser::{DecodeError, Module};

use super::{RawValue, Value};

/// Jump targets of a structured instruction, indexed like the code itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Target {
    /// Index of the matching `end` (for `block`, `loop`, `if` and `else`)
    pub end: u32,
    /// Where a false `if` condition continues: just past the `else`, or the `end`
    pub alt: u32,
}

/// A function body ready for execution.
#[derive(Debug)]
pub struct CompiledFunction {
    pub type_idx: u32,
    pub code: Vec<Instruction>,
    pub targets: Vec<Target>,
    /// Initial values of the declared (non-parameter) locals
    pub locals: Vec<RawValue>,
}

impl CompiledFunction {
    /// Decode and flatten a validated function body.
    pub fn compile(type_idx: u32, body: &FunctionBody) -> Result<CompiledFunction, DecodeError> {
        let mut reader = Reader::with_base(&body.code, body.offset);
        let mut code = Vec::new();
        let mut targets = Vec::new();
        let mut open: Vec<usize> = Vec::new();

        while !reader.at_end() {
            let inst = Instruction::decode(&mut reader)?;
            let idx = code.len();
            match inst {
                Instruction::Block { .. } | Instruction::Loop { .. } | Instruction::If { .. } => open.push(idx),
                Instruction::Else => {
                    if let Some(&if_idx) = open.last() {
                        targets_at(&mut targets, if_idx).alt = idx as u32 + 1;
                    }
                    // the else itself jumps to the end once the then-arm finishes
                    open.push(idx);
                }
                Instruction::End => {
                    while let Some(start) = open.pop() {
                        let target = targets_at(&mut targets, start);
                        target.end = idx as u32;
                        if target.alt == 0 {
                            target.alt = idx as u32;
                        }
                        if !matches!(code[start], Instruction::Else) {
                            break;
                        }
                    }
                }
                _ => {}
            }
            code.push(inst);
        }
        targets.resize(code.len(), Target::default());

        let locals = body.locals.iter().map(|ty| Value::default_for(*ty).to_raw()).collect();

        Ok(CompiledFunction { type_idx, code, targets, locals })
    }
}

fn targets_at(targets: &mut Vec<Target>, idx: usize) -> &mut Target {
    if targets.len() <= idx {
        targets.resize(idx + 1, Target::default());
    }
    &mut targets[idx]
}

/// Number of parameters and results of a block.
pub fn block_arity(module: &Module, block_type: BlockType) -> (usize, usize) {
    match block_type {
        BlockType::Empty => (0, 0),
        BlockType::Value(_) => (0, 1),
        BlockType::FuncType(idx) => module
            .types
            .get(idx as usize)
            .map_or((0, 0), |ty| (ty.params.len(), ty.results.len())),
    }
}

/// An active block, loop or if.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    /// Values carried by a branch to this label: results for blocks, params for loops
    pub arity: usize,
    /// Operand stack height below the block's parameters
    pub height: usize,
    /// Instruction index a branch continues at
    pub continuation: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::decode;
    use crate::parser::types::ValueType;

    fn compile(wat: &str) -> CompiledFunction {
        let module = decode(&wat::parse_str(wat).unwrap()).unwrap();
        CompiledFunction::compile(module.functions[0], &module.code[0]).unwrap()
    }

    #[test]
    fn test_block_targets() {
        // 0 block, 1 local.get, 2 br_if, 3 end, 4 end
        let f = compile(
            r#"(module (func (param i32)
                (block (local.get 0) (br_if 0))))"#,
        );
        assert!(matches!(f.code[0], Instruction::Block { .. }));
        assert_eq!(f.targets[0].end, 3);
        assert_eq!(f.code.len(), 5);
        assert_eq!(f.targets.len(), 5);
    }

    #[test]
    fn test_if_else_targets() {
        // 0 local.get, 1 if, 2 i32.const, 3 else, 4 i32.const, 5 end, 6 end
        let f = compile(
            r#"(module (func (param i32) (result i32)
                (if (result i32) (local.get 0) (then (i32.const 1)) (else (i32.const 2)))))"#,
        );
        assert!(matches!(f.code[1], Instruction::If { .. }));
        assert_eq!(f.targets[1], Target { end: 5, alt: 4 });
        assert!(matches!(f.code[3], Instruction::Else));
        assert_eq!(f.targets[3].end, 5);
    }

    #[test]
    fn test_if_without_else_and_nesting() {
        // 0 local.get, 1 if, 2 loop, 3 br, 4 end, 5 end, 6 end
        let f = compile(
            r#"(module (func (param i32)
                (if (local.get 0) (then (loop (br 0))))))"#,
        );
        assert_eq!(f.targets[1], Target { end: 5, alt: 5 });
        assert_eq!(f.targets[2].end, 4);
    }

    #[test]
    fn test_block_arity() {
        let bytes = wat::parse_str(r#"(module (type (func (param i32 i64) (result f32))))"#).unwrap();
        let module = decode(&bytes).unwrap();
        assert_eq!(block_arity(&module, BlockType::Empty), (0, 0));
        assert_eq!(block_arity(&module, BlockType::Value(ValueType::I64)), (0, 1));
        assert_eq!(block_arity(&module, BlockType::FuncType(0)), (2, 1));
    }

    #[test]
    fn test_local_defaults() {
        let f = compile(r#"(module (func (local i64 externref f32)))"#);
        assert_eq!(f.locals, vec![RawValue::default(), RawValue::NULL_REF, RawValue::default()]);
    }
}
