//! Concatenation of module files into a bundle.
//!
//! ```text
//! [32-byte header][offset table: 4 bytes per module][module 0, padded to 8][module 1, padded]...
//! ```
//!
//! The header and the offset table are first written as zeros, then patched once every module
//! has been streamed and its offset is known.

use std::fs;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use aik_mod::format::{self, BundleHeader, ALIGNMENT};
use aik_mod::verify::ModuleImage;

use crate::error::{BundleError, BundleResult};

/// Where one module ended up inside the bundle.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackedModule {
    pub path: PathBuf,
    pub offset: u32,
    pub length: u64,
    pub padded_length: u64,
}

#[derive(Clone, Debug)]
pub struct BundleSummary {
    pub path: PathBuf,
    pub modules: Vec<PackedModule>,
    pub total_size: u64,
}
impl BundleSummary {
    pub fn offsets(&self) -> Vec<u32> {
        self.modules.iter().map(|m| m.offset).collect()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BundlePacker {
    verify: bool,
}
impl BundlePacker {
    pub fn new() -> Self {
        BundlePacker { verify: false }
    }

    /// Rejects inputs that are not valid extended-format modules.
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn pack<P: AsRef<Path>>(&self, modules: &[PathBuf], output: P) -> BundleResult<BundleSummary> {
        self.pack_with(modules, output, |_, _| {})
    }

    /// Same as [`BundlePacker::pack`], calling `progress(done, total)` after each module.
    pub fn pack_with<P, F>(&self, modules: &[PathBuf], output: P, mut progress: F) -> BundleResult<BundleSummary> where
        P: AsRef<Path>,
        F: FnMut(usize, usize) {
        if modules.is_empty() {
            return Err(BundleError::NoModules);
        }
        if let Some(missing) = modules.iter().find(|path| !path.is_file()) {
            return Err(BundleError::MissingModuleFile(missing.clone()));
        }

        let output = output.as_ref();
        let directory = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let staging = tempfile::Builder::new()
            .prefix(".aikb-")
            .suffix(".tmp")
            .tempfile_in(directory)
            .map_err(|e| BundleError::file(directory, e))?;

        let module_count = modules.len() as u32;
        let table_end = BundleHeader::first_module_offset(module_count);
        let mut writer = BufWriter::new(staging.reopen().map_err(|e| BundleError::file(staging.path(), e))?);
        writer.write_all(&vec![0; table_end as usize])?;
        log::debug!("reserved {} bytes for header and offset table", table_end);

        let mut packed = Vec::with_capacity(modules.len());
        let mut position = table_end;
        for (index, path) in modules.iter().enumerate() {
            let bytes = fs::read(path).map_err(|e| BundleError::file(path, e))?;
            if self.verify {
                ModuleImage::parse(&bytes).map_err(|source| BundleError::InvalidModule { path: path.clone(), source })?;
            }
            if position > u32::MAX as u64 {
                return Err(BundleError::BundleTooLarge { size: position });
            }

            let length = bytes.len() as u64;
            let padded_length = format::align_up_u64(length, ALIGNMENT as u64);
            writer.write_all(&bytes)?;
            writer.write_all(&vec![0; (padded_length - length) as usize])?;
            log::debug!("module {} `{}` at {:#010x} ({} bytes, {} padded)", index, path.display(), position, length, padded_length);

            packed.push(PackedModule { path: path.clone(), offset: position as u32, length, padded_length });
            position += padded_length;
            progress(index + 1, modules.len());
        }

        writer.seek(SeekFrom::Start(0))?;
        BundleHeader { module_count }.write_to(&mut writer)?;
        for module in packed.iter() {
            writer.write_all(&module.offset.to_le_bytes())?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);

        staging.persist(output).map_err(|e| BundleError::file(output, e.error))?;
        log::info!("wrote {} module(s), {} bytes to `{}`", packed.len(), position, output.display());

        Ok(BundleSummary { path: output.to_path_buf(), modules: packed, total_size: position })
    }
}
