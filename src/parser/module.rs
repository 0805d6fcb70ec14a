//! The decoded module and the section decoders that build it.

use std::collections::HashMap;

use once_cell::sync::OnceCell;
use tracing::{debug, instrument, trace};

use super::encoding::{self, section_rank};
use super::instruction::{decode_const_expr, ConstExpr, Instruction};
use super::limits;
use super::reader::Reader;
use super::types::{ExternalKind, FunctionType, GlobalType, MemoryType, RefType, TableType, ValueType};
use super::validate::ValidationError;
use super::DecodeError;

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub desc: ImportDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    /// Type index of the imported function
    Function(u32),
    Table(TableType),
    Memory(MemoryType),
    Global(GlobalType),
}

impl ImportDesc {
    pub fn kind(&self) -> ExternalKind {
        match self {
            ImportDesc::Function(_) => ExternalKind::Function,
            ImportDesc::Table(_) => ExternalKind::Table,
            ImportDesc::Memory(_) => ExternalKind::Memory,
            ImportDesc::Global(_) => ExternalKind::Global,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub ty: GlobalType,
    pub init: ConstExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElementMode {
    Passive,
    Declarative,
    Active { table: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElementSegment {
    pub ty: RefType,
    /// One constant expression per element; function index lists are
    /// normalised to `ref.func` expressions.
    pub items: Vec<ConstExpr>,
    pub mode: ElementMode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataMode {
    Passive,
    Active { memory: u32, offset: ConstExpr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSegment {
    pub init: Vec<u8>,
    pub mode: DataMode,
}

/// A function body, split into its declared locals and its still-encoded
/// instruction bytes (terminated by `end`).
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    pub locals: Vec<ValueType>,
    pub code: Vec<u8>,
    /// Absolute offset of the first instruction byte
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomSection {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct Module {
    pub types: Vec<FunctionType>,
    pub imports: Vec<Import>,
    /// Type indices of the functions defined by this module
    pub functions: Vec<u32>,
    pub tables: Vec<TableType>,
    pub memories: Vec<MemoryType>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<u32>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub data_count: Option<u32>,
    pub code: Vec<FunctionBody>,
    pub custom: Vec<CustomSection>,

    // first type index structurally equal to each type
    canonical_types: Vec<u32>,
    // index spaces: imports first, then definitions
    func_space: Vec<u32>,
    table_space: Vec<TableType>,
    memory_space: Vec<MemoryType>,
    global_space: Vec<GlobalType>,
    imported_funcs: u32,
    imported_globals: u32,

    pub(crate) validated: OnceCell<Result<(), ValidationError>>,
}

impl Module {
    pub fn num_functions(&self) -> u32 {
        self.func_space.len() as u32
    }

    pub fn num_imported_functions(&self) -> u32 {
        self.imported_funcs
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.imported_globals
    }

    pub fn num_tables(&self) -> u32 {
        self.table_space.len() as u32
    }

    pub fn num_memories(&self) -> u32 {
        self.memory_space.len() as u32
    }

    pub fn num_globals(&self) -> u32 {
        self.global_space.len() as u32
    }

    /// Type index of a function in the function index space.
    pub fn func_type_idx(&self, func_idx: u32) -> Option<u32> {
        self.func_space.get(func_idx as usize).copied()
    }

    pub fn func_type(&self, func_idx: u32) -> Option<&FunctionType> {
        self.func_type_idx(func_idx).and_then(|ty| self.types.get(ty as usize))
    }

    /// Canonical id of a type index: structurally equal types share one id.
    pub fn canonical_type(&self, type_idx: u32) -> Option<u32> {
        self.canonical_types.get(type_idx as usize).copied()
    }

    pub fn table_type(&self, table_idx: u32) -> Option<&TableType> {
        self.table_space.get(table_idx as usize)
    }

    pub fn memory_type(&self, memory_idx: u32) -> Option<&MemoryType> {
        self.memory_space.get(memory_idx as usize)
    }

    pub fn global_type(&self, global_idx: u32) -> Option<&GlobalType> {
        self.global_space.get(global_idx as usize)
    }

    pub fn export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|export| export.name == name)
    }

    pub fn is_validated(&self) -> bool {
        matches!(self.validated.get(), Some(Ok(())))
    }

    fn build_index_spaces(&mut self) {
        for import in &self.imports {
            match &import.desc {
                ImportDesc::Function(ty) => self.func_space.push(*ty),
                ImportDesc::Table(ty) => self.table_space.push(*ty),
                ImportDesc::Memory(ty) => self.memory_space.push(*ty),
                ImportDesc::Global(ty) => self.global_space.push(*ty),
            }
        }
        self.imported_funcs = self.func_space.len() as u32;
        self.imported_globals = self.global_space.len() as u32;
        self.func_space.extend_from_slice(&self.functions);
        self.table_space.extend_from_slice(&self.tables);
        self.memory_space.extend_from_slice(&self.memories);
        self.global_space.extend(self.globals.iter().map(|global| global.ty));

        let mut seen: HashMap<&FunctionType, u32> = HashMap::new();
        self.canonical_types = self
            .types
            .iter()
            .enumerate()
            .map(|(idx, ty)| *seen.entry(ty).or_insert(idx as u32))
            .collect();
    }
}

/// Decode a binary module.
///
/// Decoding checks the structure of the binary only; call
/// [`validate`](super::validate) before trusting the result.
#[instrument(level = "debug", skip_all, fields(len = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    if bytes.len() < 8 || bytes[0..4] != encoding::MAGIC || bytes[4..8] != encoding::VERSION {
        return Err(DecodeError::InvalidHeader);
    }

    let mut reader = Reader::new(bytes);
    reader.read_bytes(8)?;

    let mut module = Module::default();
    let mut last_rank = 0;

    while !reader.at_end() {
        let offset = reader.offset();
        let id = reader.read_u8()?;
        if id != encoding::SECTION_CUSTOM {
            let rank = section_rank(id).ok_or(DecodeError::UnknownSection { id, offset })?;
            if rank <= last_rank {
                return Err(DecodeError::SectionOrder { id, offset });
            }
            last_rank = rank;
        }

        let size = reader.read_vu32()? as usize;
        let mut section = reader.sub_reader(size)?;
        debug!(id, size, offset, "section");

        decode_section(id, &mut section, &mut module).map_err(|e| match e {
            // running out of payload means the declared size was too small
            DecodeError::UnexpectedEnd { .. } => DecodeError::SectionSizeMismatch { id, offset },
            e => e,
        })?;
        if !section.at_end() {
            return Err(DecodeError::SectionSizeMismatch { id, offset });
        }
    }

    if module.functions.len() != module.code.len() {
        return Err(DecodeError::FunctionCodeMismatch {
            functions: module.functions.len() as u32,
            bodies: module.code.len() as u32,
        });
    }
    if let Some(declared) = module.data_count {
        if declared as usize != module.data.len() {
            return Err(DecodeError::DataCountMismatch { declared, actual: module.data.len() as u32 });
        }
    }

    module.build_index_spaces();
    debug!(
        types = module.types.len(),
        imports = module.imports.len(),
        functions = module.functions.len(),
        exports = module.exports.len(),
        "decoded module"
    );
    Ok(module)
}

fn decode_section(id: u8, reader: &mut Reader, module: &mut Module) -> Result<(), DecodeError> {
    match id {
        encoding::SECTION_CUSTOM => {
            let name = reader.read_name()?;
            let data = reader.read_bytes(reader.remaining())?.to_vec();
            trace!(%name, len = data.len(), "custom section");
            module.custom.push(CustomSection { name, data });
        }
        encoding::SECTION_TYPE => {
            module.types = decode_vec(reader, "types", limits::MAX_TYPES, FunctionType::decode)?;
        }
        encoding::SECTION_IMPORT => {
            module.imports = decode_vec(reader, "imports", limits::MAX_IMPORTS, decode_import)?;
        }
        encoding::SECTION_FUNCTION => {
            module.functions = decode_vec(reader, "functions", limits::MAX_FUNCTIONS, |r| r.read_vu32())?;
        }
        encoding::SECTION_TABLE => {
            module.tables = decode_vec(reader, "tables", limits::MAX_TABLES, TableType::decode)?;
        }
        encoding::SECTION_MEMORY => {
            module.memories = decode_vec(reader, "memories", limits::MAX_MEMORIES, MemoryType::decode)?;
        }
        encoding::SECTION_GLOBAL => {
            module.globals = decode_vec(reader, "globals", limits::MAX_GLOBALS, |r| {
                let ty = GlobalType::decode(r)?;
                let init = decode_const_expr(r)?;
                Ok(Global { ty, init })
            })?;
        }
        encoding::SECTION_EXPORT => {
            module.exports = decode_vec(reader, "exports", limits::MAX_EXPORTS, |r| {
                let name = r.read_name()?;
                let kind = ExternalKind::decode(r)?;
                let index = r.read_vu32()?;
                Ok(Export { name, kind, index })
            })?;
        }
        encoding::SECTION_START => {
            module.start = Some(reader.read_vu32()?);
        }
        encoding::SECTION_ELEMENT => {
            module.elements = decode_vec(reader, "element segments", limits::MAX_ELEMENT_SEGMENTS, decode_element)?;
        }
        encoding::SECTION_DATA_COUNT => {
            module.data_count = Some(reader.read_vu32()?);
        }
        encoding::SECTION_CODE => {
            module.code = decode_vec(reader, "function bodies", limits::MAX_FUNCTIONS, decode_body)?;
        }
        encoding::SECTION_DATA => {
            module.data = decode_vec(reader, "data segments", limits::MAX_DATA_SEGMENTS, decode_data)?;
        }
        _ => return Err(DecodeError::UnknownSection { id, offset: reader.offset() }),
    }
    Ok(())
}

fn decode_vec<'a, T>(
    reader: &mut Reader<'a>,
    what: &'static str,
    limit: u32,
    mut item: impl FnMut(&mut Reader<'a>) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let count = limits::check(what, reader.read_vu32()?, limit)?;
    // never trust the count for preallocation beyond what the input could hold
    let mut items = Vec::with_capacity((count as usize).min(reader.remaining()));
    for _ in 0..count {
        items.push(item(reader)?);
    }
    Ok(items)
}

fn decode_import(reader: &mut Reader) -> Result<Import, DecodeError> {
    let module = reader.read_name()?;
    let name = reader.read_name()?;
    let desc = match ExternalKind::decode(reader)? {
        ExternalKind::Function => ImportDesc::Function(reader.read_vu32()?),
        ExternalKind::Table => ImportDesc::Table(TableType::decode(reader)?),
        ExternalKind::Memory => ImportDesc::Memory(MemoryType::decode(reader)?),
        ExternalKind::Global => ImportDesc::Global(GlobalType::decode(reader)?),
    };
    Ok(Import { module, name, desc })
}

fn decode_func_indices(reader: &mut Reader) -> Result<Vec<ConstExpr>, DecodeError> {
    decode_vec(reader, "element items", limits::MAX_TABLE_INIT_ENTRIES, |r| {
        let offset = r.offset();
        let func_idx = r.read_vu32()?;
        Ok(ConstExpr { instructions: vec![Instruction::RefFunc { func_idx }, Instruction::End], offset })
    })
}

fn decode_item_exprs(reader: &mut Reader) -> Result<Vec<ConstExpr>, DecodeError> {
    decode_vec(reader, "element items", limits::MAX_TABLE_INIT_ENTRIES, decode_const_expr)
}

fn decode_elemkind(reader: &mut Reader) -> Result<RefType, DecodeError> {
    let offset = reader.offset();
    match reader.read_u8()? {
        encoding::ELEMKIND_FUNCREF => Ok(RefType::FuncRef),
        byte => Err(DecodeError::InvalidRefType { byte, offset }),
    }
}

fn decode_element(reader: &mut Reader) -> Result<ElementSegment, DecodeError> {
    let offset = reader.offset();
    let flags = reader.read_vu32()?;
    if flags > 7 {
        return Err(DecodeError::InvalidSegmentFlags { flags, offset });
    }

    let non_active = flags & encoding::ELEM_FLAG_NON_ACTIVE != 0;
    let explicit = flags & encoding::ELEM_FLAG_EXPLICIT != 0;
    let expressions = flags & encoding::ELEM_FLAG_EXPRESSIONS != 0;

    let mode = if non_active {
        if explicit {
            ElementMode::Declarative
        } else {
            ElementMode::Passive
        }
    } else {
        let table = if explicit { reader.read_vu32()? } else { 0 };
        let offset = decode_const_expr(reader)?;
        ElementMode::Active { table, offset }
    };

    // flags 0 and 4 have an implicit funcref type
    let has_type = non_active || explicit;
    let (ty, items) = if expressions {
        let ty = if has_type { RefType::decode(reader)? } else { RefType::FuncRef };
        (ty, decode_item_exprs(reader)?)
    } else {
        let ty = if has_type { decode_elemkind(reader)? } else { RefType::FuncRef };
        (ty, decode_func_indices(reader)?)
    };

    Ok(ElementSegment { ty, items, mode })
}

fn decode_data(reader: &mut Reader) -> Result<DataSegment, DecodeError> {
    let offset = reader.offset();
    let mode = match reader.read_vu32()? {
        encoding::DATA_ACTIVE => DataMode::Active { memory: 0, offset: decode_const_expr(reader)? },
        encoding::DATA_PASSIVE => DataMode::Passive,
        encoding::DATA_ACTIVE_EXPLICIT => {
            let memory = reader.read_vu32()?;
            DataMode::Active { memory, offset: decode_const_expr(reader)? }
        }
        flags => return Err(DecodeError::InvalidSegmentFlags { flags, offset }),
    };
    let len = reader.read_vu32()? as usize;
    let init = reader.read_bytes(len)?.to_vec();
    Ok(DataSegment { init, mode })
}

fn decode_body(reader: &mut Reader) -> Result<FunctionBody, DecodeError> {
    let size = limits::check("function body bytes", reader.read_vu32()?, limits::MAX_FUNCTION_SIZE)?;
    let mut body = reader.sub_reader(size as usize)?;

    let groups = body.read_vu32()?;
    let mut locals = Vec::new();
    let mut total: u64 = 0;
    for _ in 0..groups {
        let offset = body.offset();
        let count = body.read_vu32()?;
        total += count as u64;
        if total > limits::MAX_FUNCTION_LOCALS as u64 {
            return Err(DecodeError::TooManyLocals { offset });
        }
        let ty = ValueType::decode(&mut body)?;
        locals.extend(std::iter::repeat(ty).take(count as usize));
    }

    let offset = body.offset();
    let code = body.read_bytes(body.remaining())?.to_vec();
    Ok(FunctionBody { locals, code, offset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::types::Limits;

    fn module_bytes(sections: &[(u8, &[u8])]) -> Vec<u8> {
        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        for (id, payload) in sections {
            bytes.push(*id);
            encoding::write_vu32(&mut bytes, payload.len() as u32);
            bytes.extend_from_slice(payload);
        }
        bytes
    }

    #[test]
    fn test_decode_empty_module() {
        let module = decode(b"\0asm\x01\0\0\0").unwrap();
        assert!(module.types.is_empty());
        assert_eq!(module.num_functions(), 0);
        assert_eq!(module.start, None);
    }

    #[test]
    fn test_decode_add_one() {
        let bytes = hex::decode("0061736d0100000001060160017f017f030201000a09010700200041016a0b").unwrap();
        let module = decode(&bytes).unwrap();
        assert_eq!(module.types, vec![FunctionType::new(&[ValueType::I32], &[ValueType::I32])]);
        assert_eq!(module.functions, vec![0]);
        assert_eq!(module.code.len(), 1);
        assert_eq!(module.code[0].locals, vec![]);
        assert_eq!(module.code[0].code, vec![0x20, 0x00, 0x41, 0x01, 0x6a, 0x0b]);
        assert_eq!(module.code[0].offset, 25);
    }

    #[test]
    fn test_decode_imports_and_index_spaces() {
        let imports: &[u8] = &[
            0x03, // three imports
            0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x00, // func type 0
            0x03, b'e', b'n', b'v', 0x01, b'm', 0x02, 0x01, 0x01, 0x02, // memory 1..2
            0x03, b'e', b'n', b'v', 0x01, b'g', 0x03, 0x7e, 0x00, // immutable i64
        ];
        let bytes = module_bytes(&[
            (1, &[0x01, 0x60, 0x00, 0x00]),
            (2, imports),
            (3, &[0x01, 0x00]),
            (10, &[0x01, 0x02, 0x00, 0x0b]),
        ]);
        let module = decode(&bytes).unwrap();
        assert_eq!(module.num_imported_functions(), 1);
        assert_eq!(module.num_functions(), 2);
        assert_eq!(module.num_memories(), 1);
        assert_eq!(module.memory_type(0), Some(&MemoryType { limits: Limits { min: 1, max: Some(2) } }));
        assert_eq!(module.num_imported_globals(), 1);
        assert_eq!(module.global_type(0), Some(&GlobalType { value: ValueType::I64, mutable: false }));
        assert_eq!(module.imports[2].desc.kind(), ExternalKind::Global);
    }

    #[test]
    fn test_canonical_types() {
        let types: &[u8] = &[0x03, 0x60, 0x01, 0x7f, 0x00, 0x60, 0x00, 0x00, 0x60, 0x01, 0x7f, 0x00];
        let module = decode(&module_bytes(&[(1, types)])).unwrap();
        assert_eq!(module.canonical_type(0), Some(0));
        assert_eq!(module.canonical_type(1), Some(1));
        assert_eq!(module.canonical_type(2), Some(0));
        assert_eq!(module.canonical_type(3), None);
    }

    #[test]
    fn test_section_order() {
        // function section before type section
        let bytes = module_bytes(&[(3, &[0x00]), (1, &[0x00])]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::SectionOrder { id: 1, offset: 11 });

        // duplicate section
        let bytes = module_bytes(&[(1, &[0x00]), (1, &[0x00])]);
        assert!(matches!(decode(&bytes), Err(DecodeError::SectionOrder { id: 1, .. })));

        // data count goes between element and code
        let bytes = module_bytes(&[(12, &[0x00]), (10, &[0x00])]);
        assert!(decode(&bytes).is_ok());
        let bytes = module_bytes(&[(10, &[0x00]), (12, &[0x00])]);
        assert!(matches!(decode(&bytes), Err(DecodeError::SectionOrder { id: 12, .. })));

        // custom sections may appear anywhere
        let bytes = module_bytes(&[(0, &[0x01, b'a']), (1, &[0x00]), (0, &[0x01, b'b', 0xff])]);
        let module = decode(&bytes).unwrap();
        assert_eq!(module.custom.len(), 2);
        assert_eq!(module.custom[1], CustomSection { name: "b".into(), data: vec![0xff] });
    }

    #[test]
    fn test_unknown_section() {
        let bytes = module_bytes(&[(13, &[])]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::UnknownSection { id: 13, offset: 8 });
    }

    #[test]
    fn test_section_size_mismatch() {
        // one type declared, payload too short for it
        let bytes = module_bytes(&[(1, &[0x01, 0x60, 0x00])]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::SectionSizeMismatch { id: 1, offset: 8 });

        // trailing bytes inside the section
        let bytes = module_bytes(&[(3, &[0x00, 0x00])]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::SectionSizeMismatch { id: 3, offset: 8 });
    }

    #[test]
    fn test_data_count_mismatch() {
        let data: &[u8] = &[0x01, 0x01, 0x01, 0x00];
        let bytes = module_bytes(&[(12, &[0x02]), (11, data)]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::DataCountMismatch { declared: 2, actual: 1 });

        let bytes = module_bytes(&[(12, &[0x01]), (11, data)]);
        let module = decode(&bytes).unwrap();
        assert_eq!(module.data[0], DataSegment { init: vec![0x00], mode: DataMode::Passive });
    }

    #[test]
    fn test_function_code_mismatch() {
        let bytes = module_bytes(&[(1, &[0x01, 0x60, 0x00, 0x00]), (3, &[0x01, 0x00])]);
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::FunctionCodeMismatch { functions: 1, bodies: 0 });
    }

    #[test]
    fn test_too_many_locals() {
        // two groups of 30000 i32 locals
        let body: &[u8] = &[0x0a, 0x02, 0xb0, 0xea, 0x01, 0x7f, 0xb0, 0xea, 0x01, 0x7f, 0x0b];
        let mut code = vec![0x01];
        code.extend_from_slice(body);
        let bytes = module_bytes(&[(1, &[0x01, 0x60, 0x00, 0x00]), (3, &[0x01, 0x00]), (10, &code)]);
        assert!(matches!(decode(&bytes), Err(DecodeError::TooManyLocals { .. })));
    }

    #[test]
    fn test_decode_element_segments() {
        let elements: &[u8] = &[
            0x04, // four segments
            0x00, 0x41, 0x00, 0x0b, 0x02, 0x00, 0x01, // active, table 0, funcs [0, 1]
            0x01, 0x00, 0x01, 0x01, // passive, elemkind, funcs [1]
            0x03, 0x00, 0x01, 0x00, // declarative, elemkind, funcs [0]
            0x05, 0x70, 0x01, 0xd0, 0x70, 0x0b, // passive, funcref exprs [ref.null func]
        ];
        let bytes = module_bytes(&[(9, elements)]);
        let module = decode(&bytes).unwrap();
        assert_eq!(module.elements.len(), 4);
        assert!(matches!(module.elements[0].mode, ElementMode::Active { table: 0, .. }));
        let refs: Vec<_> = module.elements[0].items.iter().map(ConstExpr::ref_func).collect();
        assert_eq!(refs, vec![Some(0), Some(1)]);
        assert_eq!(module.elements[1].mode, ElementMode::Passive);
        assert_eq!(module.elements[2].mode, ElementMode::Declarative);
        assert_eq!(
            module.elements[3].items[0].instructions,
            vec![Instruction::RefNull { ref_type: RefType::FuncRef }, Instruction::End]
        );

        let bytes = module_bytes(&[(9, &[0x01, 0x08])]);
        assert!(matches!(decode(&bytes), Err(DecodeError::InvalidSegmentFlags { flags: 8, .. })));
    }

    #[test]
    fn test_decode_globals_and_exports() {
        let globals: &[u8] = &[0x01, 0x7f, 0x01, 0x41, 0x2a, 0x0b];
        let exports: &[u8] = &[0x01, 0x01, b'g', 0x03, 0x00];
        let module = decode(&module_bytes(&[(6, globals), (7, exports)])).unwrap();
        assert_eq!(module.globals[0].ty, GlobalType { value: ValueType::I32, mutable: true });
        assert_eq!(module.globals[0].init.instructions, vec![Instruction::I32Const { value: 42 }, Instruction::End]);
        assert_eq!(module.export("g"), Some(&Export { name: "g".into(), kind: ExternalKind::Global, index: 0 }));
        assert_eq!(module.export("h"), None);
    }
}
