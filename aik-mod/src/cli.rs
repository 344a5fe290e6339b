pub use clap::Parser;
use std::path::PathBuf;

use crate::builder::BuildOptions;

pub enum Mode {
    Build {
        options: BuildOptions,
        verify: bool,
    },
    Check {
        module: PathBuf,
    },
}

/// Converts a relocatable ELF object and its raw image into a loadable AIKM module.
#[derive(Parser, Debug)]
#[clap(name = "aik-mod", version)]
pub struct Options {
    /// Relocatable object file the relocations and symbols are read from.
    #[clap(short, long, value_name = "OBJECT", required_unless_present = "check")]
    elf: Option<PathBuf>,
    /// Raw binary image of the module code and data.
    #[clap(short, long, value_name = "PAYLOAD", required_unless_present = "check")]
    input_bin: Option<PathBuf>,
    /// Destination of the module.
    #[clap(short, long, value_name = "MODULE", required_unless_present = "check")]
    output_bin: Option<PathBuf>,
    /// Free text stored in the module header area.
    ///
    /// NOTE: descriptions longer than 32 bytes are truncated to 31 bytes.
    #[clap(short, long, default_value = "")]
    description: String,
    /// Prints sections, symbols, relocations and the header while building.
    #[clap(long)]
    pub verbose: bool,
    /// Reads the module back once written and checks its layout and checksum.
    #[clap(long)]
    verify: bool,
    /// Checks an existing module instead of building one, and prints its header.
    ///
    /// Build flags are ignored in this mode.
    #[clap(long, value_name = "MODULE")]
    check: Option<PathBuf>,
}

impl Options {
    pub fn from_command_line() -> Self {
        Self::parse()
    }

    pub fn into_mode(self) -> Mode {
        match (self.check, self.elf, self.input_bin, self.output_bin) {
            (Some(module), _, _, _) => Mode::Check { module },
            (None, Some(object), Some(payload), Some(output)) => Mode::Build {
                options: BuildOptions { object, payload, output, description: self.description },
                verify: self.verify,
            },
            // Unreachable once clap enforced `required_unless_present`.
            (None, object, payload, output) => Mode::Build {
                options: BuildOptions {
                    object: object.unwrap_or_default(),
                    payload: payload.unwrap_or_default(),
                    output: output.unwrap_or_default(),
                    description: self.description,
                },
                verify: self.verify,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mode() {
        let options = Options::try_parse_from(&["aik-mod", "-e", "app.o", "-i", "app.bin", "-o", "app.aikm", "-d", "demo", "--verify"]).unwrap();
        assert!(!options.verbose);
        match options.into_mode() {
            Mode::Build { options, verify } => {
                assert_eq!(options.object, PathBuf::from("app.o"));
                assert_eq!(options.payload, PathBuf::from("app.bin"));
                assert_eq!(options.output, PathBuf::from("app.aikm"));
                assert_eq!(options.description, "demo");
                assert!(verify);
            },
            Mode::Check { .. } => panic!("expected build mode"),
        }
    }

    #[test]
    fn test_long_flags_and_default_description() {
        let options = Options::try_parse_from(&["aik-mod", "--elf", "a.o", "--input-bin", "a.bin", "--output-bin", "a.out", "--verbose"]).unwrap();
        assert!(options.verbose);
        match options.into_mode() {
            Mode::Build { options, verify } => {
                assert_eq!(options.description, "");
                assert!(!verify);
            },
            Mode::Check { .. } => panic!("expected build mode"),
        }
    }

    #[test]
    fn test_check_mode() {
        let options = Options::try_parse_from(&["aik-mod", "--check", "app.aikm"]).unwrap();
        match options.into_mode() {
            Mode::Check { module } => assert_eq!(module, PathBuf::from("app.aikm")),
            Mode::Build { .. } => panic!("expected check mode"),
        }
    }

    #[test]
    fn test_missing_arguments() {
        assert!(Options::try_parse_from(&["aik-mod", "-e", "app.o"]).is_err());
        assert!(Options::try_parse_from(&["aik-mod"]).is_err());
    }
}
