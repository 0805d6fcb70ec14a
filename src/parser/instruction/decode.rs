//! Instruction decoding from binary format

use super::{ConstExpr, Instruction, MemArg};
use crate::parser::encoding;
use crate::parser::limits;
use crate::parser::reader::Reader;
use crate::parser::types::{BlockType, RefType, ValueType};
use crate::parser::DecodeError;

impl MemArg {
    pub fn decode(reader: &mut Reader) -> Result<MemArg, DecodeError> {
        let align = reader.read_vu32()?;
        let offset = reader.read_vu32()?;
        Ok(MemArg { align, offset })
    }
}

/// Read the single reserved byte that follows `memory.size`, `memory.grow`
/// and the bulk memory instructions.
fn read_zero_byte(reader: &mut Reader) -> Result<(), DecodeError> {
    let offset = reader.offset();
    match reader.read_u8()? {
        0 => Ok(()),
        _ => Err(DecodeError::ZeroByteExpected { offset }),
    }
}

impl Instruction {
    pub fn decode(reader: &mut Reader) -> Result<Instruction, DecodeError> {
        let offset = reader.offset();
        let opcode = reader.read_u8()?;

        use Instruction::*;
        let inst = match opcode {
            // Control instructions (0x00-0x11)
            0x00 => Unreachable,
            0x01 => Nop,
            0x02 => Block { block_type: BlockType::decode(reader)? },
            0x03 => Loop { block_type: BlockType::decode(reader)? },
            0x04 => If { block_type: BlockType::decode(reader)? },
            0x05 => Else,
            0x0B => End,
            0x0C => Br { label_idx: reader.read_vu32()? },
            0x0D => BrIf { label_idx: reader.read_vu32()? },
            0x0E => {
                let count = limits::check("br_table labels", reader.read_vu32()?, limits::MAX_BR_TABLE_LABELS)?;
                let labels = (0..count).map(|_| reader.read_vu32()).collect::<Result<Vec<_>, _>>()?;
                let default = reader.read_vu32()?;
                BrTable { labels, default }
            }
            0x0F => Return,
            0x10 => Call { func_idx: reader.read_vu32()? },
            0x11 => CallIndirect {
                type_idx: reader.read_vu32()?,
                table_idx: reader.read_vu32()?,
            },

            // Reference instructions (0xD0-0xD2)
            0xD0 => RefNull { ref_type: RefType::decode(reader)? },
            0xD1 => RefIsNull,
            0xD2 => RefFunc { func_idx: reader.read_vu32()? },

            // Parametric instructions (0x1A-0x1C)
            0x1A => Drop,
            0x1B => Select,
            0x1C => {
                let count = limits::check("select types", reader.read_vu32()?, limits::MAX_SELECT_TYPED_VALUES)?;
                let val_types = (0..count).map(|_| ValueType::decode(reader)).collect::<Result<Vec<_>, _>>()?;
                SelectTyped { val_types }
            }

            // Variable instructions (0x20-0x24)
            0x20 => LocalGet { local_idx: reader.read_vu32()? },
            0x21 => LocalSet { local_idx: reader.read_vu32()? },
            0x22 => LocalTee { local_idx: reader.read_vu32()? },
            0x23 => GlobalGet { global_idx: reader.read_vu32()? },
            0x24 => GlobalSet { global_idx: reader.read_vu32()? },

            // Table instructions (0x25-0x26)
            0x25 => TableGet { table_idx: reader.read_vu32()? },
            0x26 => TableSet { table_idx: reader.read_vu32()? },

            // Memory instructions (0x28-0x40)
            0x28 => I32Load { memarg: MemArg::decode(reader)? },
            0x29 => I64Load { memarg: MemArg::decode(reader)? },
            0x2A => F32Load { memarg: MemArg::decode(reader)? },
            0x2B => F64Load { memarg: MemArg::decode(reader)? },
            0x2C => I32Load8S { memarg: MemArg::decode(reader)? },
            0x2D => I32Load8U { memarg: MemArg::decode(reader)? },
            0x2E => I32Load16S { memarg: MemArg::decode(reader)? },
            0x2F => I32Load16U { memarg: MemArg::decode(reader)? },
            0x30 => I64Load8S { memarg: MemArg::decode(reader)? },
            0x31 => I64Load8U { memarg: MemArg::decode(reader)? },
            0x32 => I64Load16S { memarg: MemArg::decode(reader)? },
            0x33 => I64Load16U { memarg: MemArg::decode(reader)? },
            0x34 => I64Load32S { memarg: MemArg::decode(reader)? },
            0x35 => I64Load32U { memarg: MemArg::decode(reader)? },
            0x36 => I32Store { memarg: MemArg::decode(reader)? },
            0x37 => I64Store { memarg: MemArg::decode(reader)? },
            0x38 => F32Store { memarg: MemArg::decode(reader)? },
            0x39 => F64Store { memarg: MemArg::decode(reader)? },
            0x3A => I32Store8 { memarg: MemArg::decode(reader)? },
            0x3B => I32Store16 { memarg: MemArg::decode(reader)? },
            0x3C => I64Store8 { memarg: MemArg::decode(reader)? },
            0x3D => I64Store16 { memarg: MemArg::decode(reader)? },
            0x3E => I64Store32 { memarg: MemArg::decode(reader)? },
            0x3F => {
                read_zero_byte(reader)?;
                MemorySize
            }
            0x40 => {
                read_zero_byte(reader)?;
                MemoryGrow
            }

            // Numeric instructions (0x41-0xC4)
            0x41 => I32Const { value: reader.read_vs32()? },
            0x42 => I64Const { value: reader.read_vs64()? },
            0x43 => F32Const { bits: reader.read_u32_le()? },
            0x44 => F64Const { bits: reader.read_u64_le()? },

            0x45 => I32Eqz,
            0x46 => I32Eq,
            0x47 => I32Ne,
            0x48 => I32LtS,
            0x49 => I32LtU,
            0x4A => I32GtS,
            0x4B => I32GtU,
            0x4C => I32LeS,
            0x4D => I32LeU,
            0x4E => I32GeS,
            0x4F => I32GeU,

            0x50 => I64Eqz,
            0x51 => I64Eq,
            0x52 => I64Ne,
            0x53 => I64LtS,
            0x54 => I64LtU,
            0x55 => I64GtS,
            0x56 => I64GtU,
            0x57 => I64LeS,
            0x58 => I64LeU,
            0x59 => I64GeS,
            0x5A => I64GeU,

            0x5B => F32Eq,
            0x5C => F32Ne,
            0x5D => F32Lt,
            0x5E => F32Gt,
            0x5F => F32Le,
            0x60 => F32Ge,

            0x61 => F64Eq,
            0x62 => F64Ne,
            0x63 => F64Lt,
            0x64 => F64Gt,
            0x65 => F64Le,
            0x66 => F64Ge,

            0x67 => I32Clz,
            0x68 => I32Ctz,
            0x69 => I32Popcnt,
            0x6A => I32Add,
            0x6B => I32Sub,
            0x6C => I32Mul,
            0x6D => I32DivS,
            0x6E => I32DivU,
            0x6F => I32RemS,
            0x70 => I32RemU,
            0x71 => I32And,
            0x72 => I32Or,
            0x73 => I32Xor,
            0x74 => I32Shl,
            0x75 => I32ShrS,
            0x76 => I32ShrU,
            0x77 => I32Rotl,
            0x78 => I32Rotr,

            0x79 => I64Clz,
            0x7A => I64Ctz,
            0x7B => I64Popcnt,
            0x7C => I64Add,
            0x7D => I64Sub,
            0x7E => I64Mul,
            0x7F => I64DivS,
            0x80 => I64DivU,
            0x81 => I64RemS,
            0x82 => I64RemU,
            0x83 => I64And,
            0x84 => I64Or,
            0x85 => I64Xor,
            0x86 => I64Shl,
            0x87 => I64ShrS,
            0x88 => I64ShrU,
            0x89 => I64Rotl,
            0x8A => I64Rotr,

            0x8B => F32Abs,
            0x8C => F32Neg,
            0x8D => F32Ceil,
            0x8E => F32Floor,
            0x8F => F32Trunc,
            0x90 => F32Nearest,
            0x91 => F32Sqrt,
            0x92 => F32Add,
            0x93 => F32Sub,
            0x94 => F32Mul,
            0x95 => F32Div,
            0x96 => F32Min,
            0x97 => F32Max,
            0x98 => F32Copysign,

            0x99 => F64Abs,
            0x9A => F64Neg,
            0x9B => F64Ceil,
            0x9C => F64Floor,
            0x9D => F64Trunc,
            0x9E => F64Nearest,
            0x9F => F64Sqrt,
            0xA0 => F64Add,
            0xA1 => F64Sub,
            0xA2 => F64Mul,
            0xA3 => F64Div,
            0xA4 => F64Min,
            0xA5 => F64Max,
            0xA6 => F64Copysign,

            0xA7 => I32WrapI64,
            0xA8 => I32TruncF32S,
            0xA9 => I32TruncF32U,
            0xAA => I32TruncF64S,
            0xAB => I32TruncF64U,
            0xAC => I64ExtendI32S,
            0xAD => I64ExtendI32U,
            0xAE => I64TruncF32S,
            0xAF => I64TruncF32U,
            0xB0 => I64TruncF64S,
            0xB1 => I64TruncF64U,
            0xB2 => F32ConvertI32S,
            0xB3 => F32ConvertI32U,
            0xB4 => F32ConvertI64S,
            0xB5 => F32ConvertI64U,
            0xB6 => F32DemoteF64,
            0xB7 => F64ConvertI32S,
            0xB8 => F64ConvertI32U,
            0xB9 => F64ConvertI64S,
            0xBA => F64ConvertI64U,
            0xBB => F64PromoteF32,
            0xBC => I32ReinterpretF32,
            0xBD => I64ReinterpretF64,
            0xBE => F32ReinterpretI32,
            0xBF => F64ReinterpretI64,

            0xC0 => I32Extend8S,
            0xC1 => I32Extend16S,
            0xC2 => I64Extend8S,
            0xC3 => I64Extend16S,
            0xC4 => I64Extend32S,

            encoding::PREFIX_MISC => decode_misc(reader)?,

            _ => return Err(DecodeError::UnknownOpcode { opcode, offset }),
        };
        Ok(inst)
    }
}

/// Decode 0xFC prefix instructions
fn decode_misc(reader: &mut Reader) -> Result<Instruction, DecodeError> {
    let offset = reader.offset();
    let sub = reader.read_vu32()?;

    use Instruction::*;
    let inst = match sub {
        // Saturating truncation instructions
        0x00 => I32TruncSatF32S,
        0x01 => I32TruncSatF32U,
        0x02 => I32TruncSatF64S,
        0x03 => I32TruncSatF64U,
        0x04 => I64TruncSatF32S,
        0x05 => I64TruncSatF32U,
        0x06 => I64TruncSatF64S,
        0x07 => I64TruncSatF64U,

        // Bulk memory
        0x08 => {
            let data_idx = reader.read_vu32()?;
            read_zero_byte(reader)?;
            MemoryInit { data_idx }
        }
        0x09 => DataDrop { data_idx: reader.read_vu32()? },
        0x0A => {
            read_zero_byte(reader)?;
            read_zero_byte(reader)?;
            MemoryCopy
        }
        0x0B => {
            read_zero_byte(reader)?;
            MemoryFill
        }

        // Table operations
        0x0C => TableInit {
            elem_idx: reader.read_vu32()?,
            table_idx: reader.read_vu32()?,
        },
        0x0D => ElemDrop { elem_idx: reader.read_vu32()? },
        0x0E => TableCopy {
            dst_table: reader.read_vu32()?,
            src_table: reader.read_vu32()?,
        },
        0x0F => TableGrow { table_idx: reader.read_vu32()? },
        0x10 => TableSize { table_idx: reader.read_vu32()? },
        0x11 => TableFill { table_idx: reader.read_vu32()? },

        _ => return Err(DecodeError::UnknownMiscOpcode { sub, offset }),
    };
    Ok(inst)
}

/// Decode a constant expression up to and including its `end`.
///
/// Any instruction is accepted here; whether the expression is actually
/// constant is a validation concern.
pub fn decode_const_expr(reader: &mut Reader) -> Result<ConstExpr, DecodeError> {
    let offset = reader.offset();
    let mut instructions = Vec::new();
    loop {
        let inst = Instruction::decode(reader)?;
        let done = inst == Instruction::End;
        instructions.push(inst);
        if done {
            return Ok(ConstExpr { instructions, offset });
        }
    }
}
