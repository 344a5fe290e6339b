use std::io;
use std::path::PathBuf;

use thiserror::Error;

use aik_mod::format::FormatError;

pub type BundleResult<T> = std::result::Result<T, BundleError>;

/// Conditions that abort packing. No bundle file survives any of them.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("no modules to pack")]
    NoModules,

    #[error("module file `{}` does not exist", .0.display())]
    MissingModuleFile(PathBuf),

    #[error("`{}` is not a valid module: {source}", .path.display())]
    InvalidModule { path: PathBuf, source: FormatError },

    #[error("bundle exceeds the 4 GiB addressable by its offset table ({size} bytes)")]
    BundleTooLarge { size: u64 },

    #[error("`{}`: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}
impl BundleError {
    pub fn file<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        BundleError::File { path: path.into(), source }
    }
}
