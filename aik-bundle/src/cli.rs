pub mod utils;

pub use clap::Parser;
use std::path::PathBuf;

pub struct Mode {
    pub modules: Vec<PathBuf>,
    pub output: PathBuf,
    pub verify: bool,
}

/// Packs AIKM modules into a single AIKB bundle image.
#[derive(Parser, Debug)]
#[clap(name = "aik-bundle", version)]
pub struct Options {
    /// Module file to add to the bundle. Repeat the flag to add more; order is preserved.
    #[clap(short, long = "module", value_name = "MODULE", required = true)]
    modules: Vec<PathBuf>,
    /// Destination of the bundle.
    ///
    /// NOTE: when omitted, a random `bundle_xxxx.bin` name is picked in the current directory.
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Rejects input files that are not valid modules.
    #[clap(long)]
    verify: bool,
    /// Prints where every module is placed.
    #[clap(long)]
    pub verbose: bool,
}

impl Options {
    pub fn from_command_line() -> Self {
        Self::parse()
    }

    pub fn into_mode(self) -> Mode {
        let output = self.output.unwrap_or_else(|| PathBuf::from(utils::random_bundle_name(&mut rand::thread_rng())));
        Mode { modules: self.modules, output, verify: self.verify }
    }
}
