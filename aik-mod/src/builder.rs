//! The full conversion: object file and raw payload in, module file out.

use std::path::{Path, PathBuf};

use crate::assembler::{Description, ModuleAssembler, ModuleSummary};
use crate::inspect;
use crate::relocation::RelocationTable;
use crate::result::prelude::*;
use crate::symbol::SymbolTable;

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Relocatable object the tables are extracted from.
    pub object: PathBuf,
    /// Raw payload image, copied verbatim after the description.
    pub payload: PathBuf,
    pub output: PathBuf,
    pub description: String,
}

/// Outcome of a successful build.
#[derive(Clone, Debug)]
pub struct BuildReport {
    pub summary: ModuleSummary,
    /// Symbols discarded because no exported relocation refers to them.
    pub pruned_symbols: usize,
    pub log: BuildLog,
}

/// Builds one module. Warnings end up in the returned report, errors leave no output behind.
pub fn build_module(options: &BuildOptions) -> BuildResult<BuildReport> {
    let mut log = BuildLog::new();
    let description = Description::new(&options.description, &mut log);

    let payload = read_file(&options.payload)?;
    log::info!("payload: {} bytes from `{}`", payload.len(), options.payload.display());

    let object = inspect::inspect_file(&options.object)?;
    log::info!("object: {} symbol(s), {} exported relocation(s)", object.symbols.len(), object.relocations.len());

    log::debug!("compacting symbol table:");
    let symbols = SymbolTable::compact(&object.symbols);
    log::debug!("encoding relocations:");
    let relocations = RelocationTable::encode(&object.relocations, &symbols, &mut log);
    log::info!("kept {} symbol(s), pruned {}", symbols.len(), symbols.pruned());

    let assembler = ModuleAssembler::new(&description, &payload, &relocations, &symbols, object.bss, object.entry_point)?;
    let summary = assembler.write_to_path(&options.output)?;
    log::info!("wrote {} bytes to `{}` (CRC32 {:#010x})",
               summary.header.total_size, summary.path.display(), summary.header.crc32);

    Ok(BuildReport { summary, pruned_symbols: symbols.pruned(), log })
}

fn read_file(path: &Path) -> BuildResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| BuildError::file(path, e))
}
