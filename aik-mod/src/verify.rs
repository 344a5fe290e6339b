//! Read-back validation of module images.

use std::ffi::CStr;

use crate::format::{self, field, FormatError, ModuleHeader, RELOCATION_RECORD_SIZE, SYMBOL_RECORD_SIZE};
use crate::relocation::Relocation;
use crate::symbol::SymbolRecord;

/// A module image that passed every structural check.
#[derive(Clone, Debug)]
pub struct ModuleImage<'a> {
    bytes: &'a [u8],
    header: ModuleHeader,
}
impl<'a> ModuleImage<'a> {
    /// Checks, in order: magic and version, alignment of the header fields, declared size against
    /// the image length, table bounds, reserved words, relocation symbol positions and finally the
    /// checksum.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, FormatError> {
        let header = ModuleHeader::parse(bytes)?;
        header.check_alignment()?;

        if header.total_size as usize != bytes.len() {
            return Err(FormatError::SizeMismatch { declared: header.total_size, actual: bytes.len() });
        }
        if header.entry_offset < ModuleHeader::SIZE {
            return Err(FormatError::TableOutOfBounds("description"));
        }
        check_bounds(bytes, header.entry_offset, header.payload_length as u64, "payload")?;
        check_bounds(bytes, header.relocation_offset, RELOCATION_RECORD_SIZE as u64 * header.relocation_count as u64, "relocation table")?;
        check_bounds(bytes, header.symbol_offset, SYMBOL_RECORD_SIZE as u64 * header.symbol_count as u64, "symbol table")?;
        for &offset in field::RESERVED.iter() {
            let value = format::read_u32(bytes, offset).unwrap_or(0);
            if value != 0 {
                return Err(FormatError::ReservedNotZero { offset, value });
            }
        }

        let image = ModuleImage { bytes, header };
        for (index, relocation) in image.relocations().iter().enumerate() {
            if relocation.symbol_position >= header.symbol_count {
                return Err(FormatError::DanglingSymbolPosition {
                    index,
                    position: relocation.symbol_position,
                    count: header.symbol_count,
                });
            }
        }

        let computed = format::module_checksum(bytes);
        if computed != header.crc32 {
            return Err(FormatError::ChecksumMismatch { stored: header.crc32, computed });
        }

        Ok(image)
    }

    pub fn header(&self) -> &ModuleHeader {
        &self.header
    }

    /// Description text up to its terminator; empty when the module has none.
    pub fn description(&self) -> String {
        let area = &self.bytes[ModuleHeader::SIZE as usize..self.header.entry_offset as usize];
        match CStr::from_bytes_until_nul(area) {
            Ok(text) => text.to_string_lossy().into_owned(),
            Err(_) => String::from_utf8_lossy(area).into_owned(),
        }
    }

    /// Payload bytes, alignment padding included.
    pub fn payload(&self) -> &'a [u8] {
        let start = self.header.entry_offset as usize;
        &self.bytes[start..start + self.header.payload_length as usize]
    }

    pub fn relocations(&self) -> Vec<Relocation> {
        let start = self.header.relocation_offset as usize;
        let end = start + (RELOCATION_RECORD_SIZE * self.header.relocation_count) as usize;
        self.bytes[start..end]
            .chunks(RELOCATION_RECORD_SIZE as usize)
            .filter_map(Relocation::decode)
            .collect()
    }

    pub fn symbols(&self) -> Vec<SymbolRecord> {
        let start = self.header.symbol_offset as usize;
        let end = start + (SYMBOL_RECORD_SIZE * self.header.symbol_count) as usize;
        self.bytes[start..end]
            .chunks(SYMBOL_RECORD_SIZE as usize)
            .filter_map(SymbolRecord::decode)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn check_bounds(bytes: &[u8], offset: u32, length: u64, what: &'static str) -> Result<(), FormatError> {
    if offset as u64 + length > bytes.len() as u64 {
        Err(FormatError::TableOutOfBounds(what))
    } else {
        Ok(())
    }
}
