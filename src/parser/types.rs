//! The type model shared by the decoder, validator and runtime.

use std::fmt;

use super::encoding;
use super::reader::Reader;
use super::DecodeError;

#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum ValueType {
    // Number types
    I32,
    I64,
    F32,
    F64,
    // Reference types
    FuncRef,
    ExternRef,
}

impl ValueType {
    pub fn from_byte(byte: u8) -> Option<ValueType> {
        match byte {
            encoding::TYPE_I32 => Some(ValueType::I32),
            encoding::TYPE_I64 => Some(ValueType::I64),
            encoding::TYPE_F32 => Some(ValueType::F32),
            encoding::TYPE_F64 => Some(ValueType::F64),
            encoding::TYPE_FUNCREF => Some(ValueType::FuncRef),
            encoding::TYPE_EXTERNREF => Some(ValueType::ExternRef),
            _ => None,
        }
    }

    pub fn decode(reader: &mut Reader) -> Result<ValueType, DecodeError> {
        let offset = reader.offset();
        let byte = reader.read_u8()?;
        ValueType::from_byte(byte).ok_or(DecodeError::InvalidValueType { byte, offset })
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, ValueType::FuncRef | ValueType::ExternRef)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::FuncRef => "funcref",
            ValueType::ExternRef => "externref",
        })
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Hash)]
pub enum RefType {
    FuncRef,
    ExternRef,
}

impl RefType {
    pub fn decode(reader: &mut Reader) -> Result<RefType, DecodeError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            encoding::TYPE_FUNCREF => Ok(RefType::FuncRef),
            encoding::TYPE_EXTERNREF => Ok(RefType::ExternRef),
            byte => Err(DecodeError::InvalidRefType { byte, offset }),
        }
    }
}

impl From<RefType> for ValueType {
    fn from(ty: RefType) -> ValueType {
        match ty {
            RefType::FuncRef => ValueType::FuncRef,
            RefType::ExternRef => ValueType::ExternRef,
        }
    }
}

impl fmt::Display for RefType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        ValueType::from(*self).fmt(f)
    }
}

#[derive(PartialEq, Eq, Clone, Debug, Default, Hash)]
pub struct FunctionType {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl FunctionType {
    pub fn new(params: &[ValueType], results: &[ValueType]) -> FunctionType {
        FunctionType { params: params.to_vec(), results: results.to_vec() }
    }

    pub fn decode(reader: &mut Reader) -> Result<FunctionType, DecodeError> {
        let offset = reader.offset();
        let form = reader.read_u8()?;
        if form != encoding::TYPE_FUNC {
            return Err(DecodeError::InvalidFunctionType { byte: form, offset });
        }
        let params = decode_result_type(reader, super::limits::MAX_FUNCTION_PARAMS)?;
        let results = decode_result_type(reader, super::limits::MAX_FUNCTION_RETURNS)?;
        Ok(FunctionType { params, results })
    }
}

fn decode_result_type(reader: &mut Reader, limit: u32) -> Result<Vec<ValueType>, DecodeError> {
    let count = super::limits::check("result types", reader.read_vu32()?, limit)?;
    (0..count).map(|_| ValueType::decode(reader)).collect()
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, ty) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, "] -> [")?;
        for (i, ty) in self.results.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{ty}")?;
        }
        write!(f, "]")
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct Limits {
    pub min: u32,
    pub max: Option<u32>,
}

impl Limits {
    pub fn decode(reader: &mut Reader) -> Result<Limits, DecodeError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            encoding::LIMITS_MIN => Ok(Limits { min: reader.read_vu32()?, max: None }),
            encoding::LIMITS_MIN_MAX => {
                let min = reader.read_vu32()?;
                let max = reader.read_vu32()?;
                Ok(Limits { min, max: Some(max) })
            }
            flag => Err(DecodeError::MalformedLimits { flag, offset }),
        }
    }

    /// Import subtyping: `self` (the provided limits) may stand in for
    /// `declared` if it is at least as large and at least as tightly bounded.
    pub fn matches(&self, declared: &Limits) -> bool {
        if self.min < declared.min {
            return false;
        }
        match (declared.max, self.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(declared_max), Some(max)) => max <= declared_max,
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct TableType {
    pub element: RefType,
    pub limits: Limits,
}

impl TableType {
    pub fn decode(reader: &mut Reader) -> Result<TableType, DecodeError> {
        let element = RefType::decode(reader)?;
        let limits = Limits::decode(reader)?;
        Ok(TableType { element, limits })
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct MemoryType {
    pub limits: Limits,
}

impl MemoryType {
    pub fn decode(reader: &mut Reader) -> Result<MemoryType, DecodeError> {
        Ok(MemoryType { limits: Limits::decode(reader)? })
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub struct GlobalType {
    pub value: ValueType,
    pub mutable: bool,
}

impl GlobalType {
    pub fn decode(reader: &mut Reader) -> Result<GlobalType, DecodeError> {
        let value = ValueType::decode(reader)?;
        let offset = reader.offset();
        let mutable = match reader.read_u8()? {
            0x00 => false,
            0x01 => true,
            byte => return Err(DecodeError::MalformedMutability { byte, offset }),
        };
        Ok(GlobalType { value, mutable })
    }
}

/// The kind of an import or export.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub fn decode(reader: &mut Reader) -> Result<ExternalKind, DecodeError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            encoding::DESC_FUNC => Ok(ExternalKind::Function),
            encoding::DESC_TABLE => Ok(ExternalKind::Table),
            encoding::DESC_MEMORY => Ok(ExternalKind::Memory),
            encoding::DESC_GLOBAL => Ok(ExternalKind::Global),
            byte => Err(DecodeError::InvalidExternalKind { byte, offset }),
        }
    }
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ExternalKind::Function => "func",
            ExternalKind::Table => "table",
            ExternalKind::Memory => "memory",
            ExternalKind::Global => "global",
        })
    }
}

/// Block signature of a structured control instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Empty,
    Value(ValueType),
    FuncType(u32),
}

impl BlockType {
    pub fn decode(reader: &mut Reader) -> Result<BlockType, DecodeError> {
        let offset = reader.offset();
        match reader.rest().first() {
            Some(&encoding::BLOCK_TYPE_EMPTY) => {
                reader.read_u8()?;
                Ok(BlockType::Empty)
            }
            Some(&byte) if ValueType::from_byte(byte).is_some() => Ok(BlockType::Value(ValueType::decode(reader)?)),
            _ => {
                let idx = reader.read_vs33()?;
                if idx < 0 {
                    return Err(DecodeError::InvalidBlockType { offset });
                }
                Ok(BlockType::FuncType(idx as u32))
            }
        }
    }
}
