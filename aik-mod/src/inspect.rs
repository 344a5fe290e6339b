//! Extraction of entry point, BSS, symbols and relocations from a relocatable object.
//!
//! Structural parsing is left to an [`ObjectSource`]; [`ElfObject`] provides it for ELF files
//! through the `object` crate. [`inspect`] turns what the source enumerates into the inputs of the
//! symbol compaction: a symbol map with reference counts and the list of exported relocations.

use std::collections::BTreeMap;
use std::path::Path;

use object::elf::{FileHeader32, FileHeader64, SHN_ABS, SHN_COMMON, SHN_UNDEF, SHT_SYMTAB};
use object::read::elf::{FileHeader, Sym};
use object::{BinaryFormat, Endianness, Object, ObjectSection, ObjectSymbol, RelocationFlags, RelocationTarget, SymbolFlags, SymbolSection};

use crate::relocation::{RelocationCandidate, TargetRegion};
use crate::result::error::narrow;
use crate::result::prelude::*;
use crate::symbol::{Symbol, SymbolMap, SymbolType};

/// A symbol table entry as the object stores it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawSymbol {
    pub index: u32,
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub st_type: u8,
    pub section_index: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawRelocation {
    pub offset: u64,
    pub r_type: u32,
    pub symbol_index: u32,
}

/// A section together with the relocations that apply to it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelocatedSection {
    pub name: String,
    pub relocations: Vec<RawRelocation>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SectionInfo {
    pub index: usize,
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// What the inspector needs from a structural object parser.
pub trait ObjectSource {
    fn entry(&self) -> u64;
    fn sections(&self) -> BuildResult<Vec<SectionInfo>>;
    /// The whole symbol table in index order, `None` if the object has none.
    fn symbols(&self) -> BuildResult<Option<Vec<RawSymbol>>>;
    /// Every section carrying relocations, in section order.
    fn relocated_sections(&self) -> BuildResult<Vec<RelocatedSection>>;
}

pub struct ElfObject<'data> {
    data: &'data [u8],
    file: object::File<'data>,
}
impl<'data> ElfObject<'data> {
    pub fn parse(data: &'data [u8]) -> BuildResult<Self> {
        Ok(ElfObject { data, file: object::File::parse(data)? })
    }

    /// Raw `st_shndx` of every ELF symbol, by symbol index.
    fn raw_section_indices(&self) -> BuildResult<Vec<u16>> {
        if self.file.format() != BinaryFormat::Elf {
            return Ok(Vec::new());
        }
        if self.file.is_64() {
            raw_section_indices::<FileHeader64<Endianness>>(self.data)
        } else {
            raw_section_indices::<FileHeader32<Endianness>>(self.data)
        }
    }
}

fn raw_section_indices<Elf: FileHeader<Endian = Endianness>>(data: &[u8]) -> BuildResult<Vec<u16>> {
    let header = Elf::parse(data)?;
    let endian = header.endian()?;
    let symbols = header.sections(endian, data)?.symbols(endian, data, SHT_SYMTAB)?;
    Ok(symbols.iter().map(|symbol| symbol.st_shndx(endian)).collect())
}

/// Section index as stored in the symbol record. Reserved indices the parser does not name keep
/// their raw value.
pub fn section_index_of(section: SymbolSection, raw: Option<u16>) -> u32 {
    match section {
        SymbolSection::Undefined => SHN_UNDEF as u32,
        SymbolSection::Absolute | SymbolSection::None => SHN_ABS as u32,
        SymbolSection::Common => SHN_COMMON as u32,
        SymbolSection::Section(index) => index.0 as u32,
        _ => raw.map(u32::from).unwrap_or(SHN_UNDEF as u32),
    }
}
impl<'data> ObjectSource for ElfObject<'data> {
    fn entry(&self) -> u64 {
        self.file.entry()
    }

    fn sections(&self) -> BuildResult<Vec<SectionInfo>> {
        let mut sections = Vec::new();
        for section in self.file.sections() {
            sections.push(SectionInfo {
                index: section.index().0,
                name: section.name()?.to_owned(),
                address: section.address(),
                size: section.size(),
            });
        }
        Ok(sections)
    }

    fn symbols(&self) -> BuildResult<Option<Vec<RawSymbol>>> {
        if self.file.symbol_table().is_none() {
            return Ok(None);
        }
        let raw_indices = self.raw_section_indices()?;
        let mut symbols = Vec::new();
        for symbol in self.file.symbols() {
            let st_type = match symbol.flags() {
                SymbolFlags::Elf { st_info, .. } => st_info & 0x0F,
                _ => 0,
            };
            let raw = raw_indices.get(symbol.index().0).copied();
            let section_index = section_index_of(symbol.section(), raw);
            symbols.push(RawSymbol {
                index: symbol.index().0 as u32,
                name: symbol.name().unwrap_or("").to_owned(),
                value: symbol.address(),
                size: symbol.size(),
                st_type,
                section_index,
            });
        }
        Ok(Some(symbols))
    }

    fn relocated_sections(&self) -> BuildResult<Vec<RelocatedSection>> {
        let mut sections = Vec::new();
        for section in self.file.sections() {
            let relocations: Vec<RawRelocation> = section.relocations()
                .map(|(offset, relocation)| {
                    let symbol_index = match relocation.target() {
                        RelocationTarget::Symbol(index) => index.0 as u32,
                        _ => 0,
                    };
                    let r_type = match relocation.flags() {
                        RelocationFlags::Elf { r_type } => r_type,
                        _ => 0,
                    };
                    RawRelocation { offset, r_type, symbol_index }
                })
                .collect();
            if relocations.is_empty() {
                continue;
            }
            sections.push(RelocatedSection { name: section.name()?.to_owned(), relocations });
        }
        Ok(sections)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BssRegion {
    pub start: u32,
    pub length: u32,
}

/// Everything the module builder needs from the object.
#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub entry_point: u32,
    pub bss: BssRegion,
    /// Every symbol, with the number of exported relocations referring to it.
    pub symbols: SymbolMap,
    pub relocations: Vec<RelocationCandidate>,
}

/// Number of relocations referring to each original symbol index.
pub fn count_references(relocations: &[RelocationCandidate]) -> BTreeMap<u32, u32> {
    relocations.iter().fold(BTreeMap::new(), |mut counts, relocation| {
        *counts.entry(relocation.symbol_index).or_insert(0) += 1;
        counts
    })
}

pub fn inspect<S: ObjectSource>(source: &S) -> BuildResult<ObjectInfo> {
    let entry_point = narrow("entry point", source.entry())?;
    log::debug!("entry point: {:#010x}", entry_point);

    let sections = source.sections()?;
    log::debug!("sections:");
    for section in sections.iter() {
        log::debug!("  [{}] {} (address: {:#x}, size: {})", section.index, section.name, section.address, section.size);
    }

    let bss = match sections.iter().find(|s| s.name == ".bss") {
        Some(section) => {
            log::debug!("bss section found (start: {:#x}, size: {})", section.address, section.size);
            BssRegion {
                start: narrow("bss start", section.address)?,
                length: narrow("bss length", section.size)?,
            }
        },
        None => {
            log::debug!("no bss section found");
            BssRegion::default()
        }
    };

    let raw_symbols = source.symbols()?.ok_or(BuildError::MissingSymbolTable)?;

    let mut relocations = Vec::new();
    for section in source.relocated_sections()? {
        let region = TargetRegion::from_section_name(&section.name);
        if !region.is_exported() {
            log::debug!("relocations in `{}` ignored", section.name);
            continue;
        }
        log::debug!("{} relocation(s) in `{}` ({})", section.relocations.len(), section.name, region.as_str());
        for relocation in section.relocations.iter() {
            relocations.push(RelocationCandidate {
                section: section.name.clone(),
                region,
                offset: narrow("relocation offset", relocation.offset)?,
                raw_type: relocation.r_type,
                symbol_index: relocation.symbol_index,
            });
        }
    }

    let counts = count_references(&relocations);
    let mut symbols = SymbolMap::new();
    for raw in raw_symbols {
        let symbol = Symbol {
            value: narrow("symbol value", raw.value)?,
            size: narrow("symbol size", raw.size)?,
            name: raw.name,
            raw_type: SymbolType::from_raw(raw.st_type),
            section_index: raw.section_index,
            ref_count: counts.get(&raw.index).copied().unwrap_or(0),
        };
        symbols.insert(raw.index, symbol);
    }
    if !symbols.contains_key(&0) {
        symbols.insert(0, Symbol { ref_count: counts.get(&0).copied().unwrap_or(0), ..Symbol::null() });
    }

    Ok(ObjectInfo { entry_point, bss, symbols, relocations })
}

/// Reads and inspects an object file from disk.
pub fn inspect_file<P: AsRef<Path>>(path: P) -> BuildResult<ObjectInfo> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| BuildError::file(path, e))?;
    let object = ElfObject::parse(&data)?;
    inspect(&object)
}
