use crate::format::{self, RELOCATION_RECORD_SIZE};
use crate::result::prelude::*;
use crate::symbol::SymbolTable;

/// The kind of memory area a relocation offset is relative to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TargetRegion {
    None = 0,
    Text = 1,
    Data = 2,
    ReadOnlyData = 3,
    Bss = 4,
}
impl TargetRegion {
    /// Classifies a section by its first name component: `.text.main` and `.text` are both
    /// [`TargetRegion::Text`], `.ARM.exidx` is [`TargetRegion::None`].
    pub fn from_section_name(name: &str) -> Self {
        match name.split('.').find(|part| !part.is_empty()) {
            Some("text") => TargetRegion::Text,
            Some("data") => TargetRegion::Data,
            Some("rodata") => TargetRegion::ReadOnlyData,
            Some("bss") => TargetRegion::Bss,
            _ => TargetRegion::None,
        }
    }

    pub fn from_code(code: u32) -> Self {
        match code {
            1 => TargetRegion::Text,
            2 => TargetRegion::Data,
            3 => TargetRegion::ReadOnlyData,
            4 => TargetRegion::Bss,
            _ => TargetRegion::None,
        }
    }

    pub fn code(&self) -> u32 {
        *self as u32
    }

    pub fn is_exported(&self) -> bool {
        *self != TargetRegion::None
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            TargetRegion::None => "none",
            TargetRegion::Text => "text",
            TargetRegion::Data => "data",
            TargetRegion::ReadOnlyData => "rodata",
            TargetRegion::Bss => "bss",
        }
    }
}

const ARM_RELOCATION_NAMES: [(u32, &str); 17] = [
    (0, "R_ARM_NONE"),
    (1, "R_ARM_PC24"),
    (2, "R_ARM_ABS32"),
    (3, "R_ARM_REL32"),
    (10, "R_ARM_THM_CALL"),
    (28, "R_ARM_CALL"),
    (29, "R_ARM_JUMP24"),
    (30, "R_ARM_THM_JUMP24"),
    (38, "R_ARM_TARGET1"),
    (40, "R_ARM_V4BX"),
    (42, "R_ARM_PREL31"),
    (43, "R_ARM_MOVW_ABS_NC"),
    (44, "R_ARM_MOVT_ABS"),
    (47, "R_ARM_THM_MOVW_ABS_NC"),
    (48, "R_ARM_THM_MOVT_ABS"),
    (51, "R_ARM_THM_JUMP19"),
    (102, "R_ARM_THM_JUMP11"),
];

/// Name of an ARM relocation type, for diagnostics only.
pub fn arm_relocation_name(r_type: u32) -> &'static str {
    ARM_RELOCATION_NAMES.iter()
        .find(|(code, _)| *code == r_type)
        .map(|(_, name)| *name)
        .unwrap_or("NONE")
}

/// A relocation as found in the object, still pointing at an original symbol index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelocationCandidate {
    /// Section the relocation applies to.
    pub section: String,
    pub region: TargetRegion,
    pub offset: u32,
    pub raw_type: u32,
    pub symbol_index: u32,
}

/// One 16-byte entry of the module relocation table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Relocation {
    pub offset: u32,
    /// Architecture specific, passed through untouched.
    pub raw_type: u32,
    pub target_region: TargetRegion,
    pub symbol_position: u32,
}
impl Relocation {
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.offset.to_le_bytes());
        buffer.extend_from_slice(&self.raw_type.to_le_bytes());
        buffer.extend_from_slice(&self.target_region.code().to_le_bytes());
        buffer.extend_from_slice(&self.symbol_position.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Relocation {
            offset: format::read_u32(bytes, 0)?,
            raw_type: format::read_u32(bytes, 4)?,
            target_region: TargetRegion::from_code(format::read_u32(bytes, 8)?),
            symbol_position: format::read_u32(bytes, 12)?,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct RelocationTable {
    relocations: Vec<Relocation>,
}
impl RelocationTable {
    /// Rewrites every candidate against the compacted symbol table, in input order. Candidates
    /// whose symbol did not survive compaction are dropped and reported to `log`.
    pub fn encode(candidates: &[RelocationCandidate], symbols: &SymbolTable, log: &mut BuildLog) -> Self {
        let mut relocations = Vec::with_capacity(candidates.len());
        for candidate in candidates.iter() {
            let symbol_position = match symbols.position_of(candidate.symbol_index) {
                Some(position) => position,
                None => {
                    log.warn(Diagnostic::dangling_relocation_symbol(&candidate.section, candidate.offset, candidate.symbol_index));
                    continue;
                }
            };
            log::debug!("  {}+{:#010x} {} ({}) -> symbol position {}",
                        candidate.section, candidate.offset, arm_relocation_name(candidate.raw_type),
                        candidate.raw_type, symbol_position);
            relocations.push(Relocation {
                offset: candidate.offset,
                raw_type: candidate.raw_type,
                target_region: candidate.region,
                symbol_position,
            });
        }
        RelocationTable { relocations }
    }

    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations[..]
    }

    pub fn len(&self) -> usize {
        self.relocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }

    pub fn byte_len(&self) -> u32 {
        RELOCATION_RECORD_SIZE * self.relocations.len() as u32
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.byte_len() as usize);
        for relocation in self.relocations.iter() {
            relocation.encode_into(&mut bytes);
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{Symbol, SymbolMap, SymbolType};

    const R_ARM_ABS32: u32 = 2;
    const R_ARM_THM_CALL: u32 = 10;

    fn candidate(section: &str, offset: u32, symbol_index: u32) -> RelocationCandidate {
        RelocationCandidate {
            section: section.to_owned(),
            region: TargetRegion::from_section_name(section),
            offset,
            raw_type: R_ARM_ABS32,
            symbol_index,
        }
    }

    fn symbols(referenced: &[u32]) -> SymbolTable {
        let mut map = SymbolMap::new();
        for index in 0..8 {
            map.insert(index, Symbol {
                value: index * 4,
                size: 4,
                name: format!("sym{}", index),
                raw_type: SymbolType::Object,
                section_index: 2,
                ref_count: if referenced.contains(&index) { 1 } else { 0 },
            });
        }
        SymbolTable::compact(&map)
    }

    #[test]
    fn test_region_classification() {
        assert_eq!(TargetRegion::from_section_name(".text"), TargetRegion::Text);
        assert_eq!(TargetRegion::from_section_name(".text.main"), TargetRegion::Text);
        assert_eq!(TargetRegion::from_section_name(".data"), TargetRegion::Data);
        assert_eq!(TargetRegion::from_section_name(".rodata.str1.1"), TargetRegion::ReadOnlyData);
        assert_eq!(TargetRegion::from_section_name(".bss"), TargetRegion::Bss);
        assert_eq!(TargetRegion::from_section_name(".ARM.exidx"), TargetRegion::None);
        assert_eq!(TargetRegion::from_section_name(".debug_info"), TargetRegion::None);
        assert_eq!(TargetRegion::from_section_name(""), TargetRegion::None);
        assert_eq!(TargetRegion::ReadOnlyData.code(), 3);
        assert_eq!(TargetRegion::from_code(4), TargetRegion::Bss);
        assert_eq!(TargetRegion::from_code(99), TargetRegion::None);
    }

    #[test]
    fn test_encoding_preserves_input_order() {
        let table = symbols(&[2, 4, 6]);
        let candidates = vec![
            candidate(".text", 0x20, 6),
            candidate(".data", 0x04, 2),
            candidate(".text", 0x08, 4),
            candidate(".rodata", 0x00, 6),
        ];
        let mut log = BuildLog::new();

        let relocations = RelocationTable::encode(&candidates, &table, &mut log);

        assert!(log.is_empty());
        let positions: Vec<_> = relocations.relocations().iter().map(|r| r.symbol_position).collect();
        assert_eq!(positions, vec![2, 0, 1, 2]);
        let offsets: Vec<_> = relocations.relocations().iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0x20, 0x04, 0x08, 0x00]);
        assert_eq!(relocations.relocations()[3].target_region, TargetRegion::ReadOnlyData);
    }

    #[test]
    fn test_dangling_symbol_is_dropped() {
        let table = symbols(&[1]);
        let candidates = vec![
            candidate(".text", 0x00, 1),
            candidate(".text", 0x04, 42),
            candidate(".data", 0x08, 1),
        ];
        let mut log = BuildLog::new();

        let relocations = RelocationTable::encode(&candidates, &table, &mut log);

        assert_eq!(relocations.len(), 2);
        assert_eq!(log.count(DiagnosticKind::DanglingRelocationSymbol), 1);
        assert!(relocations.relocations().iter().all(|r| (r.symbol_position as usize) < table.len()));
    }

    #[test]
    fn test_relocation_records() {
        let table = symbols(&[3]);
        let mut log = BuildLog::new();
        let mut rel = candidate(".text.startup", 0x1C, 3);
        rel.raw_type = R_ARM_THM_CALL;

        let relocations = RelocationTable::encode(&[rel], &table, &mut log);
        let bytes = relocations.to_bytes();

        assert_eq!(bytes.len(), 16);
        assert_eq!(relocations.byte_len(), 16);
        assert_eq!(&bytes[0..4], &0x1Cu32.to_le_bytes());
        assert_eq!(&bytes[4..8], &R_ARM_THM_CALL.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &0u32.to_le_bytes());
        assert_eq!(Relocation::decode(&bytes), Some(relocations.relocations()[0]));
        assert_eq!(arm_relocation_name(R_ARM_THM_CALL), "R_ARM_THM_CALL");
        assert_eq!(arm_relocation_name(0xEE), "NONE");
    }
}
