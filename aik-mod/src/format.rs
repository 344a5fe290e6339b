//! Binary layout of AIKM modules and AIKB bundles.
//!
//! Every magic number, header size and field offset of both file kinds lives here. Two format
//! generations exist:
//!
//! * `Basic`: 32-byte module header, no symbol table, CRC over payload and relocations only,
//!   16-byte bundle header without magic. Only recognized, never written.
//! * `ExtendedWithTables`: 64-byte module header, relocation and symbol tables, CRC over the
//!   whole file, 32-byte bundle header. This is the format produced by the tools.
//!
//! All multi-byte fields are little-endian `u32` words.

use std::io::{self, Write};

use thiserror::Error;

/// `AIKM` read as a little-endian word.
pub const MODULE_MAGIC: u32 = u32::from_le_bytes(*b"AIKM");
/// `AIKB` read as a little-endian word.
pub const BUNDLE_MAGIC: u32 = u32::from_le_bytes(*b"AIKB");

/// Alignment of every region inside modules and bundles.
pub const ALIGNMENT: u32 = 8;
pub const RELOCATION_RECORD_SIZE: u32 = 16;
pub const SYMBOL_RECORD_SIZE: u32 = 16;
/// Longest description, in bytes, stored without truncation.
pub const DESCRIPTION_LIMIT: usize = 32;
/// Size of one entry of the bundle offset table.
pub const BUNDLE_OFFSET_SIZE: u32 = 4;

/// Byte offsets of the extended module header fields.
pub mod field {
    pub const MAGIC: usize = 0;
    pub const VERSION: usize = 4;
    pub const ENTRY_OFFSET: usize = 8;
    pub const PAYLOAD_LENGTH: usize = 12;
    pub const RELOCATION_OFFSET: usize = 16;
    pub const RELOCATION_COUNT: usize = 20;
    pub const SYMBOL_OFFSET: usize = 24;
    pub const SYMBOL_COUNT: usize = 28;
    pub const BSS_START: usize = 32;
    pub const BSS_LENGTH: usize = 36;
    pub const CRC32: usize = 40;
    pub const TOTAL_SIZE: usize = 44;
    pub const ENTRY_POINT: usize = 48;
    pub const RESERVED: [usize; 3] = [52, 56, 60];
}

pub fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Same as [`align_up`], but for sizes that may not fit a header word yet.
pub fn align_up_u64(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FormatVersion {
    Basic,
    ExtendedWithTables,
}
impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::ExtendedWithTables;

    pub fn header_size(self) -> u32 {
        match self {
            FormatVersion::Basic => 32,
            FormatVersion::ExtendedWithTables => 64,
        }
    }

    /// The word stored at offset 4 of the header: major version in the high half, header size in
    /// the low half. The basic format stores the payload size there instead.
    pub fn version_word(self) -> Option<u32> {
        match self {
            FormatVersion::Basic => None,
            FormatVersion::ExtendedWithTables => Some((1 << 16) | (self.header_size() & 0xFFFF)),
        }
    }

    pub fn bundle_header_size(self) -> u32 {
        match self {
            FormatVersion::Basic => 16,
            FormatVersion::ExtendedWithTables => 32,
        }
    }

    pub fn is_deprecated(self) -> bool {
        self != FormatVersion::CURRENT
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FormatVersion::Basic => "basic",
            FormatVersion::ExtendedWithTables => "extended",
        }
    }

    /// Tells which generation produced a module image, if any.
    pub fn detect(bytes: &[u8]) -> Option<FormatVersion> {
        if read_u32(bytes, field::MAGIC)? != MODULE_MAGIC {
            return None;
        }
        let word = read_u32(bytes, field::VERSION)?;
        if Some(word) == FormatVersion::ExtendedWithTables.version_word() {
            Some(FormatVersion::ExtendedWithTables)
        } else if bytes.len() >= FormatVersion::Basic.header_size() as usize {
            Some(FormatVersion::Basic)
        } else {
            None
        }
    }
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FormatError {
    #[error("image truncated: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("invalid magic number {0:#010x}")]
    InvalidMagic(u32),

    #[error("{} format modules are deprecated and not supported", .0.as_str())]
    LegacyFormat(FormatVersion),

    #[error("unsupported version word {0:#010x}")]
    UnsupportedVersion(u32),

    #[error("header field `{field}` is not a multiple of 8 ({value:#x})")]
    Misaligned { field: &'static str, value: u32 },

    #[error("header declares {declared} bytes but the image is {actual} bytes long")]
    SizeMismatch { declared: u32, actual: usize },

    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[error("{0} lies outside of the image")]
    TableOutOfBounds(&'static str),

    #[error("reserved header word at offset {offset} is {value:#010x}, must be zero")]
    ReservedNotZero { offset: usize, value: u32 },

    #[error("relocation {index} refers to symbol position {position}, table has {count} symbols")]
    DanglingSymbolPosition { index: usize, position: u32, count: u32 },
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
}

/// CRC32 of a module image with the CRC word taken as zero, whatever it currently holds.
pub fn module_checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    if bytes.len() < field::CRC32 + 4 {
        hasher.update(bytes);
    } else {
        hasher.update(&bytes[..field::CRC32]);
        hasher.update(&[0; 4]);
        hasher.update(&bytes[field::CRC32 + 4..]);
    }
    hasher.finalize()
}

/// Fixed 64-byte header of an extended module.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ModuleHeader {
    pub entry_offset: u32,
    pub payload_length: u32,
    pub relocation_offset: u32,
    pub relocation_count: u32,
    pub symbol_offset: u32,
    pub symbol_count: u32,
    pub bss_start: u32,
    pub bss_length: u32,
    pub crc32: u32,
    pub total_size: u32,
    pub entry_point: u32,
}
impl ModuleHeader {
    pub const SIZE: u32 = 64;

    fn words(&self) -> [u32; 16] {
        let version = FormatVersion::CURRENT;
        [
            MODULE_MAGIC,
            version.version_word().unwrap_or(0),
            self.entry_offset,
            self.payload_length,
            self.relocation_offset,
            self.relocation_count,
            self.symbol_offset,
            self.symbol_count,
            self.bss_start,
            self.bss_length,
            self.crc32,
            self.total_size,
            self.entry_point,
            0,
            0,
            0,
        ]
    }

    /// Writes the header word by word.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for word in self.words().iter() {
            writer.write_all(&word.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::SIZE as usize);
        for word in self.words().iter() {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let size = Self::SIZE as usize;
        let magic = read_u32(bytes, field::MAGIC).ok_or(FormatError::Truncated { expected: size, found: bytes.len() })?;
        if magic != MODULE_MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }
        match FormatVersion::detect(bytes) {
            Some(FormatVersion::ExtendedWithTables) => {},
            Some(legacy) => return Err(FormatError::LegacyFormat(legacy)),
            None => {
                return match read_u32(bytes, field::VERSION) {
                    Some(word) => Err(FormatError::UnsupportedVersion(word)),
                    None => Err(FormatError::Truncated { expected: size, found: bytes.len() }),
                };
            }
        }
        if bytes.len() < size {
            return Err(FormatError::Truncated { expected: size, found: bytes.len() });
        }

        let word = |offset| read_u32(bytes, offset).unwrap_or(0);
        Ok(ModuleHeader {
            entry_offset: word(field::ENTRY_OFFSET),
            payload_length: word(field::PAYLOAD_LENGTH),
            relocation_offset: word(field::RELOCATION_OFFSET),
            relocation_count: word(field::RELOCATION_COUNT),
            symbol_offset: word(field::SYMBOL_OFFSET),
            symbol_count: word(field::SYMBOL_COUNT),
            bss_start: word(field::BSS_START),
            bss_length: word(field::BSS_LENGTH),
            crc32: word(field::CRC32),
            total_size: word(field::TOTAL_SIZE),
            entry_point: word(field::ENTRY_POINT),
        })
    }

    /// Offset and length fields, by name, that must respect [`ALIGNMENT`].
    pub fn aligned_fields(&self) -> [(&'static str, u32); 6] {
        [
            ("entry_offset", self.entry_offset),
            ("payload_length", self.payload_length),
            ("relocation_offset", self.relocation_offset),
            ("symbol_offset", self.symbol_offset),
            ("bss_length", self.bss_length),
            ("total_size", self.total_size),
        ]
    }

    pub fn check_alignment(&self) -> Result<(), FormatError> {
        for &(name, value) in self.aligned_fields().iter() {
            if value % ALIGNMENT != 0 {
                return Err(FormatError::Misaligned { field: name, value });
            }
        }
        Ok(())
    }
}

/// Fixed 32-byte header of a bundle. The offset table follows it directly.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BundleHeader {
    pub module_count: u32,
}
impl BundleHeader {
    pub const SIZE: u32 = 32;

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&BUNDLE_MAGIC.to_le_bytes())?;
        writer.write_all(&self.module_count.to_le_bytes())?;
        for _ in 0..6 {
            writer.write_all(&0u32.to_le_bytes())?;
        }
        Ok(())
    }

    /// Offset of the first module for a bundle of `module_count` modules.
    pub fn first_module_offset(module_count: u32) -> u64 {
        Self::SIZE as u64 + BUNDLE_OFFSET_SIZE as u64 * module_count as u64
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        let size = Self::SIZE as usize;
        if bytes.len() < size {
            return Err(FormatError::Truncated { expected: size, found: bytes.len() });
        }
        let magic = read_u32(bytes, 0).unwrap_or(0);
        if magic != BUNDLE_MAGIC {
            return Err(FormatError::InvalidMagic(magic));
        }
        Ok(BundleHeader { module_count: read_u32(bytes, 4).unwrap_or(0) })
    }

    /// Reads the offset table that follows the header.
    pub fn offsets(&self, bytes: &[u8]) -> Result<Vec<u32>, FormatError> {
        (0..self.module_count as usize)
            .map(|i| {
                read_u32(bytes, Self::SIZE as usize + i * BUNDLE_OFFSET_SIZE as usize)
                    .ok_or(FormatError::TableOutOfBounds("bundle offset table"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(6, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(100, 8), 104);
        assert_eq!(align_up_u64(33, 8), 40);
    }

    #[test]
    fn test_magic_numbers() {
        assert_eq!(&MODULE_MAGIC.to_le_bytes(), b"AIKM");
        assert_eq!(&BUNDLE_MAGIC.to_le_bytes(), b"AIKB");
        assert_eq!(FormatVersion::CURRENT.version_word(), Some(0x0001_0040));
        assert!(FormatVersion::Basic.is_deprecated());
        assert!(!FormatVersion::ExtendedWithTables.is_deprecated());
    }

    #[test]
    fn test_header_field_positions() {
        let header = ModuleHeader {
            entry_offset: 72,
            payload_length: 16,
            relocation_offset: 88,
            relocation_count: 2,
            symbol_offset: 120,
            symbol_count: 1,
            bss_start: 0x2000_0000,
            bss_length: 24,
            crc32: 0xDEAD_BEEF,
            total_size: 136,
            entry_point: 0x0800_0101,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), ModuleHeader::SIZE as usize);

        let mut written = Vec::new();
        header.write_to(&mut written).unwrap();
        assert_eq!(written, bytes);

        assert_eq!(read_u32(&bytes, field::MAGIC), Some(MODULE_MAGIC));
        assert_eq!(read_u32(&bytes, field::ENTRY_OFFSET), Some(72));
        assert_eq!(read_u32(&bytes, field::SYMBOL_COUNT), Some(1));
        assert_eq!(read_u32(&bytes, field::CRC32), Some(0xDEAD_BEEF));
        assert_eq!(read_u32(&bytes, field::TOTAL_SIZE), Some(136));
        assert_eq!(read_u32(&bytes, field::ENTRY_POINT), Some(0x0800_0101));
        for offset in field::RESERVED.iter() {
            assert_eq!(read_u32(&bytes, *offset), Some(0));
        }

        assert_eq!(ModuleHeader::parse(&bytes), Ok(header));
        assert!(header.check_alignment().is_ok());
    }

    #[test]
    fn test_detect_legacy_module() {
        let mut legacy = Vec::new();
        for word in [MODULE_MAGIC, 16, 0x30, 0, 0, 0, 0, 64].iter() {
            legacy.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(FormatVersion::detect(&legacy), Some(FormatVersion::Basic));
        assert_eq!(ModuleHeader::parse(&legacy), Err(FormatError::LegacyFormat(FormatVersion::Basic)));

        legacy[0] = b'X';
        assert_eq!(FormatVersion::detect(&legacy), None);
    }

    #[test]
    fn test_misaligned_header() {
        let header = ModuleHeader { entry_offset: 70, ..Default::default() };
        assert_eq!(header.check_alignment(), Err(FormatError::Misaligned { field: "entry_offset", value: 70 }));
    }

    #[test]
    fn test_checksum_ignores_crc_field() {
        let mut bytes = ModuleHeader::default().to_bytes();
        bytes.extend_from_slice(b"payload!");
        let zeroed = crc32fast::hash(&bytes);

        assert_eq!(module_checksum(&bytes), zeroed);
        bytes[field::CRC32..field::CRC32 + 4].copy_from_slice(&zeroed.to_le_bytes());
        assert_eq!(module_checksum(&bytes), zeroed);
    }

    #[test]
    fn test_bundle_header() {
        let header = BundleHeader { module_count: 2 };
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), BundleHeader::SIZE as usize);
        assert_eq!(&bytes[0..4], b"AIKB");
        assert!(bytes[8..].iter().all(|b| *b == 0));
        assert_eq!(BundleHeader::first_module_offset(2), 40);

        bytes.extend_from_slice(&40u32.to_le_bytes());
        bytes.extend_from_slice(&144u32.to_le_bytes());
        let parsed = BundleHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.offsets(&bytes), Ok(vec![40, 144]));
    }
}
