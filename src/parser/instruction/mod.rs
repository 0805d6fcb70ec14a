//! Instruction representation.
//!
//! Function bodies stay as raw bytes inside the [`Module`](super::Module);
//! they are decoded into [`Instruction`]s one at a time by the validator, and
//! once more when an instance lowers them for execution.

mod decode;

pub use decode::decode_const_expr;

use super::types::{BlockType, RefType, ValueType};

/// Memory argument for load and store instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemArg {
    /// Alignment exponent (as power of 2)
    pub align: u32,
    pub offset: u32,
}

/// Every instruction this interpreter understands.
///
/// Float constants carry their raw bit patterns so NaN payloads survive
/// decoding untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Control instructions
    Unreachable,
    Nop,
    Block { block_type: BlockType },
    Loop { block_type: BlockType },
    If { block_type: BlockType },
    Else,
    End,
    Br { label_idx: u32 },
    BrIf { label_idx: u32 },
    BrTable { labels: Vec<u32>, default: u32 },
    Return,
    Call { func_idx: u32 },
    CallIndirect { type_idx: u32, table_idx: u32 },

    // Reference instructions
    RefNull { ref_type: RefType },
    RefIsNull,
    RefFunc { func_idx: u32 },

    // Parametric instructions
    Drop,
    Select,
    SelectTyped { val_types: Vec<ValueType> },

    // Variable instructions
    LocalGet { local_idx: u32 },
    LocalSet { local_idx: u32 },
    LocalTee { local_idx: u32 },
    GlobalGet { global_idx: u32 },
    GlobalSet { global_idx: u32 },

    // Table instructions
    TableGet { table_idx: u32 },
    TableSet { table_idx: u32 },
    TableInit { elem_idx: u32, table_idx: u32 },
    ElemDrop { elem_idx: u32 },
    TableCopy { dst_table: u32, src_table: u32 },
    TableGrow { table_idx: u32 },
    TableSize { table_idx: u32 },
    TableFill { table_idx: u32 },

    // Memory instructions
    I32Load { memarg: MemArg },
    I64Load { memarg: MemArg },
    F32Load { memarg: MemArg },
    F64Load { memarg: MemArg },
    I32Load8S { memarg: MemArg },
    I32Load8U { memarg: MemArg },
    I32Load16S { memarg: MemArg },
    I32Load16U { memarg: MemArg },
    I64Load8S { memarg: MemArg },
    I64Load8U { memarg: MemArg },
    I64Load16S { memarg: MemArg },
    I64Load16U { memarg: MemArg },
    I64Load32S { memarg: MemArg },
    I64Load32U { memarg: MemArg },
    I32Store { memarg: MemArg },
    I64Store { memarg: MemArg },
    F32Store { memarg: MemArg },
    F64Store { memarg: MemArg },
    I32Store8 { memarg: MemArg },
    I32Store16 { memarg: MemArg },
    I64Store8 { memarg: MemArg },
    I64Store16 { memarg: MemArg },
    I64Store32 { memarg: MemArg },
    MemorySize,
    MemoryGrow,
    MemoryInit { data_idx: u32 },
    DataDrop { data_idx: u32 },
    MemoryCopy,
    MemoryFill,

    // Numeric instructions - Constants
    I32Const { value: i32 },
    I64Const { value: i64 },
    F32Const { bits: u32 },
    F64Const { bits: u64 },

    // Numeric instructions - i32 operations
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,

    // Numeric instructions - i64 comparisons
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,

    // Numeric instructions - float comparisons
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,

    // Numeric instructions - i32 arithmetic
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,

    // Numeric instructions - i64 arithmetic
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,

    // Numeric instructions - f32 arithmetic
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,

    // Numeric instructions - f64 arithmetic
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,

    // Conversions
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,

    // Sign extension
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,

    // Saturating truncation
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
}

impl Instruction {
    /// The memory argument of a load or store, with the access width in bytes.
    pub fn memory_access(&self) -> Option<(MemArg, u32)> {
        use Instruction::*;
        match *self {
            I32Load8S { memarg } | I32Load8U { memarg } | I64Load8S { memarg } | I64Load8U { memarg } => {
                Some((memarg, 1))
            }
            I32Store8 { memarg } | I64Store8 { memarg } => Some((memarg, 1)),
            I32Load16S { memarg } | I32Load16U { memarg } | I64Load16S { memarg } | I64Load16U { memarg } => {
                Some((memarg, 2))
            }
            I32Store16 { memarg } | I64Store16 { memarg } => Some((memarg, 2)),
            I32Load { memarg } | F32Load { memarg } | I64Load32S { memarg } | I64Load32U { memarg } => {
                Some((memarg, 4))
            }
            I32Store { memarg } | F32Store { memarg } | I64Store32 { memarg } => Some((memarg, 4)),
            I64Load { memarg } | F64Load { memarg } | I64Store { memarg } | F64Store { memarg } => Some((memarg, 8)),
            _ => None,
        }
    }

    /// Whether the instruction may appear in a constant expression.
    pub fn is_constant(&self) -> bool {
        matches!(
            self,
            Instruction::I32Const { .. }
                | Instruction::I64Const { .. }
                | Instruction::F32Const { .. }
                | Instruction::F64Const { .. }
                | Instruction::RefNull { .. }
                | Instruction::RefFunc { .. }
                | Instruction::GlobalGet { .. }
                | Instruction::End
        )
    }
}

/// A decoded constant expression (global initialiser, segment offset or
/// element item), including its terminating `end`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstExpr {
    pub instructions: Vec<Instruction>,
    pub offset: usize,
}

impl ConstExpr {
    /// The function index if this expression is exactly `ref.func x`.
    pub fn ref_func(&self) -> Option<u32> {
        match self.instructions.as_slice() {
            [Instruction::RefFunc { func_idx }, Instruction::End] => Some(*func_idx),
            _ => None,
        }
    }
}
