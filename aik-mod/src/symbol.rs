use std::collections::{BTreeMap, HashMap};

use crate::format::{self, SYMBOL_RECORD_SIZE};

/// Serialized in place of a type the table does not know.
pub const UNKNOWN_SYMBOL_TYPE: u32 = 0xFFFF_FFFF;

/// ELF symbol types (`st_type`) understood by the loader.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SymbolType {
    NoType,
    Object,
    Func,
    Section,
    File,
    Common,
    Tls,
    Relc,
    Srelc,
    GnuIfunc,
    HiOs,
    LoProc,
    HiProc,
    Unknown(u8),
}
impl SymbolType {
    pub fn from_raw(st_type: u8) -> Self {
        match st_type {
            0 => SymbolType::NoType,
            1 => SymbolType::Object,
            2 => SymbolType::Func,
            3 => SymbolType::Section,
            4 => SymbolType::File,
            5 => SymbolType::Common,
            6 => SymbolType::Tls,
            8 => SymbolType::Relc,
            9 => SymbolType::Srelc,
            10 => SymbolType::GnuIfunc,
            12 => SymbolType::HiOs,
            13 => SymbolType::LoProc,
            15 => SymbolType::HiProc,
            other => SymbolType::Unknown(other),
        }
    }

    /// Value written to the symbol record.
    pub fn code(&self) -> u32 {
        match *self {
            SymbolType::NoType => 0,
            SymbolType::Object => 1,
            SymbolType::Func => 2,
            SymbolType::Section => 3,
            SymbolType::File => 4,
            SymbolType::Common => 5,
            SymbolType::Tls => 6,
            SymbolType::Relc => 8,
            SymbolType::Srelc => 9,
            SymbolType::GnuIfunc => 10,
            SymbolType::HiOs => 12,
            SymbolType::LoProc => 13,
            SymbolType::HiProc => 15,
            SymbolType::Unknown(_) => UNKNOWN_SYMBOL_TYPE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            SymbolType::NoType => "STT_NOTYPE",
            SymbolType::Object => "STT_OBJECT",
            SymbolType::Func => "STT_FUNC",
            SymbolType::Section => "STT_SECTION",
            SymbolType::File => "STT_FILE",
            SymbolType::Common => "STT_COMMON",
            SymbolType::Tls => "STT_TLS",
            SymbolType::Relc => "STT_RELC",
            SymbolType::Srelc => "STT_SRELC",
            SymbolType::GnuIfunc => "STT_GNU_IFUNC",
            SymbolType::HiOs => "STT_HIOS",
            SymbolType::LoProc => "STT_LOPROC",
            SymbolType::HiProc => "STT_HIPROC",
            SymbolType::Unknown(_) => "unknown",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Symbol {
    pub value: u32,
    pub size: u32,
    /// Only used for diagnostics, never serialized.
    pub name: String,
    pub raw_type: SymbolType,
    pub section_index: u32,
    pub ref_count: u32,
}
impl Symbol {
    /// The entry at index 0 of every ELF symbol table.
    pub fn null() -> Self {
        Symbol {
            value: 0,
            size: 0,
            name: String::new(),
            raw_type: SymbolType::NoType,
            section_index: 0,
            ref_count: 0,
        }
    }

    pub fn record(&self) -> SymbolRecord {
        SymbolRecord {
            value: self.value,
            section_index: self.section_index,
            raw_type: self.raw_type.code(),
        }
    }
}

/// Symbols of an object, keyed by their index in the original symbol table.
pub type SymbolMap = BTreeMap<u32, Symbol>;

/// One 16-byte entry of the module symbol table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SymbolRecord {
    pub value: u32,
    pub section_index: u32,
    pub raw_type: u32,
}
impl SymbolRecord {
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.value.to_le_bytes());
        buffer.extend_from_slice(&self.section_index.to_le_bytes());
        buffer.extend_from_slice(&self.raw_type.to_le_bytes());
        buffer.extend_from_slice(&0u32.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(SymbolRecord {
            value: format::read_u32(bytes, 0)?,
            section_index: format::read_u32(bytes, 4)?,
            raw_type: format::read_u32(bytes, 8)?,
        })
    }
}

/// The compacted symbol table: referenced symbols only, in original order, each identified by
/// its position from then on.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    positions: HashMap<u32, u32>,
    pruned: usize,
}
impl SymbolTable {
    /// Drops every symbol nobody refers to and assigns positions `0..K` to the survivors.
    pub fn compact(symbols: &SymbolMap) -> Self {
        let mut table = SymbolTable::default();
        for (&index, symbol) in symbols.iter() {
            if symbol.ref_count == 0 {
                log::debug!("  symbol `{}` (index {}) has no references, pruned", symbol.name, index);
                table.pruned += 1;
                continue;
            }
            let position = table.symbols.len() as u32;
            log::debug!("  symbol `{}` (index {}) -> position {} [{}, value {:#010x}, section {}, {} reference(s)]",
                        symbol.name, index, position, symbol.raw_type.as_str(), symbol.value,
                        symbol.section_index, symbol.ref_count);
            table.positions.insert(index, position);
            table.symbols.push(symbol.clone());
        }
        table
    }

    /// Position of the symbol that had `index` in the original table, unless it was pruned.
    pub fn position_of(&self, index: u32) -> Option<u32> {
        self.positions.get(&index).copied()
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols[..]
    }

    /// Number of symbols dropped by the compaction.
    pub fn pruned(&self) -> usize {
        self.pruned
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn byte_len(&self) -> u32 {
        SYMBOL_RECORD_SIZE * self.symbols.len() as u32
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len() as usize);
        for symbol in self.symbols.iter() {
            symbol.record().encode_into(&mut bytes);
        }
        bytes
    }
}
