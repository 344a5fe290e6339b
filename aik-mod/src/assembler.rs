//! Layout and serialization of a module file.
//!
//! ```text
//! [64-byte header][description][payload][relocation table][symbol table]
//! ```
//!
//! Every region starts on an 8-byte boundary. The file is written in two passes: the first one
//! streams everything with the total size and the CRC held at zero, the second one patches the
//! total size, hashes the whole file (CRC field still zero) and patches the CRC last.

use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::format::{self, field, ModuleHeader, ALIGNMENT, DESCRIPTION_LIMIT};
use crate::inspect::BssRegion;
use crate::relocation::RelocationTable;
use crate::result::error::narrow;
use crate::result::prelude::*;
use crate::symbol::SymbolTable;

/// NUL-terminated description stored right after the header.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Description {
    bytes: Vec<u8>,
}
impl Description {
    /// Truncates descriptions longer than [`DESCRIPTION_LIMIT`] bytes to one byte less, so that
    /// they fit 32 bytes with their terminator. An empty description takes no space at all.
    pub fn new<S: AsRef<str>>(text: S, log: &mut BuildLog) -> Self {
        let mut bytes = text.as_ref().as_bytes().to_vec();
        if bytes.len() > DESCRIPTION_LIMIT {
            let kept = DESCRIPTION_LIMIT - 1;
            log.warn(Diagnostic::description_too_long(bytes.len(), DESCRIPTION_LIMIT, kept));
            bytes.truncate(kept);
        }
        if !bytes.is_empty() {
            bytes.push(0);
        }
        Description { bytes }
    }

    /// Stored bytes, terminator included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn padded_len(&self) -> u32 {
        format::align_up(self.len(), ALIGNMENT)
    }
}

/// Offsets and lengths of every region of a module file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModuleLayout {
    pub description_length: u32,
    pub padded_description_length: u32,
    pub payload_length: u32,
    pub padded_payload_length: u32,
    pub entry_offset: u32,
    pub relocation_offset: u32,
    pub relocation_count: u32,
    pub symbol_offset: u32,
    pub symbol_count: u32,
    pub total_size: u32,
}
impl ModuleLayout {
    pub fn compute(description: &Description, payload_length: usize, relocation_count: usize, symbol_count: usize) -> BuildResult<Self> {
        let payload_length = narrow("payload length", payload_length as u64)?;
        let relocation_count = narrow("relocation count", relocation_count as u64)?;
        let symbol_count = narrow("symbol count", symbol_count as u64)?;

        let padded_description_length = description.padded_len();
        let padded_payload_length = narrow("padded payload length", format::align_up_u64(payload_length as u64, ALIGNMENT as u64))?;
        let entry_offset = ModuleHeader::SIZE + padded_description_length;

        let relocation_offset = entry_offset as u64 + padded_payload_length as u64;
        let symbol_offset = relocation_offset + format::RELOCATION_RECORD_SIZE as u64 * relocation_count as u64;
        let total_size = symbol_offset + format::SYMBOL_RECORD_SIZE as u64 * symbol_count as u64;

        Ok(ModuleLayout {
            description_length: description.len(),
            padded_description_length,
            payload_length,
            padded_payload_length,
            entry_offset,
            relocation_offset: narrow("relocation table offset", relocation_offset)?,
            relocation_count,
            symbol_offset: narrow("symbol table offset", symbol_offset)?,
            symbol_count,
            total_size: narrow("module size", total_size)?,
        })
    }
}

/// Header values gathered once the whole build is known, plus where it was written.
#[derive(Clone, Debug)]
pub struct ModuleSummary {
    pub path: PathBuf,
    pub header: ModuleHeader,
    pub layout: ModuleLayout,
}

pub struct ModuleAssembler<'a> {
    description: &'a Description,
    payload: &'a [u8],
    relocations: &'a RelocationTable,
    symbols: &'a SymbolTable,
    bss: BssRegion,
    padded_bss_length: u32,
    entry_point: u32,
    layout: ModuleLayout,
}
impl<'a> ModuleAssembler<'a> {
    pub fn new(description: &'a Description,
               payload: &'a [u8],
               relocations: &'a RelocationTable,
               symbols: &'a SymbolTable,
               bss: BssRegion,
               entry_point: u32) -> BuildResult<Self> {
        let layout = ModuleLayout::compute(description, payload.len(), relocations.len(), symbols.len())?;
        let padded_bss_length = narrow("padded bss length", format::align_up_u64(bss.length as u64, ALIGNMENT as u64))?;
        Ok(ModuleAssembler { description, payload, relocations, symbols, bss, padded_bss_length, entry_point, layout })
    }

    pub fn layout(&self) -> &ModuleLayout {
        &self.layout
    }

    /// The header as written by the first pass: CRC and total size are still zero.
    pub fn header(&self) -> ModuleHeader {
        ModuleHeader {
            entry_offset: self.layout.entry_offset,
            payload_length: self.layout.padded_payload_length,
            relocation_offset: self.layout.relocation_offset,
            relocation_count: self.layout.relocation_count,
            symbol_offset: self.layout.symbol_offset,
            symbol_count: self.layout.symbol_count,
            bss_start: self.bss.start,
            bss_length: self.padded_bss_length,
            crc32: 0,
            total_size: 0,
            entry_point: self.entry_point,
        }
    }

    /// First pass. The writer must be positioned at the start of the module.
    pub fn write_sections<W: Write + Seek>(&self, writer: &mut W) -> BuildResult<u64> {
        let header = self.header();
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("header:");
            for (index, word) in header.to_bytes().chunks(4).enumerate() {
                log::debug!("  [{:2}] {:02x}{:02x}{:02x}{:02x}", index, word[0], word[1], word[2], word[3]);
            }
        }

        header.write_to(writer)?;
        let position = writer.stream_position()?;
        if position != ModuleHeader::SIZE as u64 {
            return Err(BuildError::HeaderSizeMismatch { expected: ModuleHeader::SIZE as u64, found: position });
        }

        let layout = &self.layout;
        writer.write_all(self.description.as_bytes())?;
        write_padding(writer, layout.padded_description_length - layout.description_length)?;
        writer.write_all(self.payload)?;
        write_padding(writer, layout.padded_payload_length - layout.payload_length)?;
        writer.write_all(&self.relocations.to_bytes())?;
        writer.write_all(&self.symbols.to_bytes())?;
        writer.flush()?;

        Ok(writer.stream_position()?)
    }

    /// Second pass: patches the total size, then the CRC computed over the complete file.
    pub fn finalize<F: Read + Write + Seek>(file: &mut F, total_size: u32) -> BuildResult<u32> {
        file.seek(SeekFrom::Start(field::TOTAL_SIZE as u64))?;
        file.write_all(&total_size.to_le_bytes())?;
        file.flush()?;

        file.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::with_capacity(total_size as usize);
        file.read_to_end(&mut contents)?;
        let crc32 = format::module_checksum(&contents);
        log::debug!("calculated CRC32: {:#010x} over {} bytes", crc32, contents.len());

        file.seek(SeekFrom::Start(field::CRC32 as u64))?;
        file.write_all(&crc32.to_le_bytes())?;
        file.flush()?;
        Ok(crc32)
    }

    /// Writes the module to `path`. The file only appears there once both passes succeeded.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> BuildResult<ModuleSummary> {
        let path = path.as_ref();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".aikm-")
            .suffix(".tmp")
            .tempfile_in(directory)
            .map_err(|e| BuildError::file(directory, e))?;

        let written = {
            let file = staging.reopen().map_err(|e| BuildError::file(staging.path(), e))?;
            self.write_sections(&mut BufWriter::new(file))?
        };
        let total_size = narrow("module size", written)?;

        let crc32 = {
            let mut file = staging.reopen().map_err(|e| BuildError::file(staging.path(), e))?;
            let total = Self::finalize(&mut file, total_size)?;
            file.sync_all()?;
            total
        };

        staging.persist(path).map_err(|e| BuildError::file(path, e.error))?;

        let header = ModuleHeader { crc32, total_size, ..self.header() };
        Ok(ModuleSummary { path: path.to_path_buf(), header, layout: self.layout })
    }
}

fn write_padding<W: Write>(writer: &mut W, length: u32) -> BuildResult<()> {
    writer.write_all(&vec![0; length as usize])?;
    Ok(())
}

/// Convenience for callers that want the module in memory rather than on disk.
pub fn assemble_in_memory(assembler: &ModuleAssembler<'_>) -> BuildResult<Vec<u8>> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let written = assembler.write_sections(&mut cursor)?;
    ModuleAssembler::finalize(&mut cursor, narrow("module size", written)?)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::format::{module_checksum, read_u32};
    use crate::relocation::{RelocationCandidate, TargetRegion};
    use crate::symbol::{Symbol, SymbolMap, SymbolType};

    fn tables(referenced: u32) -> (RelocationTable, SymbolTable) {
        let mut map = SymbolMap::new();
        let mut candidates = Vec::new();
        for index in 1..=referenced {
            map.insert(index, Symbol {
                value: index * 8,
                size: 8,
                name: format!("sym{}", index),
                raw_type: SymbolType::Object,
                section_index: 3,
                ref_count: 1,
            });
            candidates.push(RelocationCandidate {
                section: String::from(".text"),
                region: TargetRegion::Text,
                offset: index * 4,
                raw_type: 2,
                symbol_index: index,
            });
        }
        let symbols = SymbolTable::compact(&map);
        let relocations = RelocationTable::encode(&candidates, &symbols, &mut BuildLog::new());
        (relocations, symbols)
    }

    #[test]
    fn test_description_padding() {
        let mut log = BuildLog::new();
        let description = Description::new("hello", &mut log);
        assert_eq!(description.as_bytes(), b"hello\0");
        assert_eq!(description.padded_len(), 8);
        assert!(log.is_empty());

        let layout = ModuleLayout::compute(&description, 0, 0, 0).unwrap();
        assert_eq!(layout.entry_offset, 72);
    }

    #[test]
    fn test_description_truncation() {
        let mut log = BuildLog::new();
        let description = Description::new("a".repeat(40), &mut log);

        assert_eq!(description.len(), 32);
        assert_eq!(description.padded_len(), 32);
        assert_eq!(description.as_bytes()[31], 0);
        assert_eq!(log.count(DiagnosticKind::DescriptionTooLong), 1);
    }

    #[test]
    fn test_description_limits() {
        let mut log = BuildLog::new();

        let empty = Description::new("", &mut log);
        assert!(empty.is_empty());
        assert_eq!(empty.padded_len(), 0);

        let exact = Description::new("b".repeat(32), &mut log);
        assert_eq!(exact.len(), 33);
        assert_eq!(exact.padded_len(), 40);
        assert!(log.is_empty());
    }

    #[test]
    fn test_empty_tables_layout() {
        let description = Description::new("mod", &mut BuildLog::new());
        let layout = ModuleLayout::compute(&description, 13, 0, 0).unwrap();

        assert_eq!(layout.padded_payload_length, 16);
        assert_eq!(layout.relocation_offset, layout.entry_offset + 16);
        assert_eq!(layout.symbol_offset, layout.relocation_offset);
        assert_eq!(layout.total_size, layout.symbol_offset);
    }

    #[test]
    fn test_assembled_module() {
        let mut log = BuildLog::new();
        let description = Description::new("blink", &mut log);
        let payload = [0xAAu8; 21];
        let (relocations, symbols) = tables(3);
        let bss = BssRegion { start: 0x2000_0000, length: 13 };
        let assembler = ModuleAssembler::new(&description, &payload, &relocations, &symbols, bss, 0x0800_0041).unwrap();

        let bytes = assemble_in_memory(&assembler).unwrap();

        assert_eq!(bytes.len(), 64 + 8 + 24 + 16 * 3 + 16 * 3);
        let header = ModuleHeader::parse(&bytes).unwrap();
        assert_eq!(header.entry_offset, 72);
        assert_eq!(header.payload_length, 24);
        assert_eq!(header.relocation_offset, 96);
        assert_eq!(header.relocation_count, 3);
        assert_eq!(header.symbol_offset, 144);
        assert_eq!(header.symbol_count, 3);
        assert_eq!(header.bss_start, 0x2000_0000);
        assert_eq!(header.bss_length, 16);
        assert_eq!(header.total_size as usize, bytes.len());
        assert_eq!(header.entry_point, 0x0800_0041);
        assert!(header.check_alignment().is_ok());

        assert_eq!(&bytes[64..70], b"blink\0");
        assert_eq!(&bytes[70..72], &[0, 0]);
        assert!(bytes[72..93].iter().all(|b| *b == 0xAA));
        assert!(bytes[93..96].iter().all(|b| *b == 0));
        assert_eq!(&bytes[96..144], &relocations.to_bytes()[..]);
        assert_eq!(&bytes[144..], &symbols.to_bytes()[..]);

        assert_eq!(module_checksum(&bytes), header.crc32);
        assert_eq!(read_u32(&bytes, field::CRC32), Some(header.crc32));
    }

    #[test]
    fn test_oversized_bss() {
        let description = Description::default();
        let (relocations, symbols) = tables(0);

        let bss = BssRegion { start: 0x2000_0000, length: u32::MAX - 3 };
        match ModuleAssembler::new(&description, &[0; 8], &relocations, &symbols, bss, 0) {
            Err(BuildError::ValueOutOfRange { what, value }) => {
                assert_eq!(what, "padded bss length");
                assert_eq!(value, 0x1_0000_0000);
            },
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("oversized bss accepted"),
        }

        let bss = BssRegion { start: 0, length: u32::MAX - 7 };
        let assembler = ModuleAssembler::new(&description, &[0; 8], &relocations, &symbols, bss, 0).unwrap();
        assert_eq!(assembler.header().bss_length, u32::MAX - 7);
    }

    #[test]
    fn test_header_size_mismatch() {
        let description = Description::default();
        let (relocations, symbols) = tables(1);
        let assembler = ModuleAssembler::new(&description, &[1, 2, 3], &relocations, &symbols, BssRegion::default(), 0).unwrap();

        let mut cursor = Cursor::new(Vec::new());
        cursor.set_position(8);
        match assembler.write_sections(&mut cursor) {
            Err(BuildError::HeaderSizeMismatch { expected, found }) => {
                assert_eq!(expected, 64);
                assert_eq!(found, 72);
            },
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(cursor.get_ref().len(), 72);
    }

    #[test]
    fn test_write_to_path() {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("blink.bin");
        let description = Description::new("blink", &mut BuildLog::new());
        let (relocations, symbols) = tables(2);
        let assembler = ModuleAssembler::new(&description, &[0x55; 32], &relocations, &symbols, BssRegion::default(), 0).unwrap();

        let summary = assembler.write_to_path(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, assemble_in_memory(&assembler).unwrap());
        assert_eq!(summary.header.total_size as usize, bytes.len());
        assert_eq!(summary.header.crc32, module_checksum(&bytes));
        let leftovers = std::fs::read_dir(directory.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
