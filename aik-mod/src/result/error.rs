use std::fmt::{Display, Formatter};
use std::io;
use std::path::PathBuf;

use console::Style;
use thiserror::Error;

pub type BuildResult<T> = std::result::Result<T, BuildError>;

/// Defines a bright cyan text, used for styling help messages.
pub fn help_style() -> Style {
    Style::new()
        .cyan()
        .bright()
}

/// Defines a bright yellow text, used for styling warning messages.
pub fn warning_style() -> Style {
    Style::new()
        .yellow()
        .bright()
}

/// Defines a bright green text, used for styling success messages.
pub fn success_style() -> Style {
    Style::new()
        .green()
        .bright()
}

/// Defines a bright red text, used for styling error messages.
pub fn error_style() -> Style {
    Style::new()
        .red()
        .bright()
}

/// Defines a bright white text, used for styling important parts of messages.
pub fn white_style() -> Style {
    Style::new()
        .white()
        .bright()
}

/// Conditions that abort a module build. No output file survives any of them.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("object file carries no symbol table")]
    MissingSymbolTable,

    #[error("header size mismatch: expected {expected} bytes, stream is at {found}")]
    HeaderSizeMismatch { expected: u64, found: u64 },

    #[error("{what} ({value:#x}) does not fit in a 32-bit header field")]
    ValueOutOfRange { what: &'static str, value: u64 },

    #[error("cannot parse object file: {0}")]
    Object(#[from] object::read::Error),

    #[error("`{}`: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}
impl BuildError {
    pub fn file<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        BuildError::File { path: path.into(), source }
    }
}

/// Narrows an address or size coming from the object file to a header word.
pub fn narrow(what: &'static str, value: u64) -> BuildResult<u32> {
    if value > u32::MAX as u64 {
        Err(BuildError::ValueOutOfRange { what, value })
    } else {
        Ok(value as u32)
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum DiagnosticKind {
    DanglingRelocationSymbol,
    DescriptionTooLong,
}
impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match *self {
            DiagnosticKind::DanglingRelocationSymbol => "dangling relocation symbol",
            DiagnosticKind::DescriptionTooLong => "description too long",
        }
    }
}

/// A recoverable condition: the build goes on, the offending data is left out of the module.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    kind: DiagnosticKind,
    description: String,
    notes: Vec<String>,
}
impl Diagnostic {
    pub fn dangling_relocation_symbol<S>(section: S, offset: u32, symbol_index: u32) -> Self where
        S: AsRef<str> {
        let kind = DiagnosticKind::DanglingRelocationSymbol;
        let description = format!("relocation at `{}`+{:#x} refers to symbol {} which is not in the symbol table",
                                  section.as_ref(), offset, symbol_index);
        let notes = vec![String::from("the relocation has been dropped")];

        Diagnostic { kind, description, notes }
    }

    pub fn description_too_long(length: usize, limit: usize, kept: usize) -> Self {
        let kind = DiagnosticKind::DescriptionTooLong;
        let description = format!("description is {} bytes long, must be {} bytes or less", length, limit);
        let notes = vec![format!("only the first {} bytes have been kept", kept)];

        Diagnostic { kind, description, notes }
    }

    pub fn kind(&self) -> DiagnosticKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn notes(&self) -> &[String] {
        &self.notes[..]
    }
}
impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if f.alternate() {
            writeln!(f, "{}: {}", warning_style().apply_to("warning"), white_style().apply_to(&self.description))?;
            for note in self.notes.iter() {
                writeln!(f, "  {} {}", help_style().apply_to("= note:"), note)?;
            }
            Ok(())
        } else {
            writeln!(f, "warning: {}", self.description)
        }
    }
}

/// Warnings collected while building one module.
#[derive(Clone, Debug, Default)]
pub struct BuildLog {
    warnings: Vec<Diagnostic>,
}
impl BuildLog {
    pub fn new() -> Self {
        BuildLog { warnings: Vec::new() }
    }

    /// Records a warning. Callers print the log once the build is over, so the `log` facade only
    /// gets it as a trace.
    pub fn warn(&mut self, warning: Diagnostic) {
        log::debug!("recorded warning: {}", warning.description());
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings[..]
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.warnings.iter().filter(|w| w.kind() == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}
impl Display for BuildLog {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for warning in self.warnings.iter() {
            Display::fmt(warning, f)?;
        }
        if f.alternate() {
            match self.warnings.len() {
                0 => {},
                1 => writeln!(f, "{}: {}", warning_style().apply_to("warning"), white_style().apply_to("1 warning emitted"))?,
                n => writeln!(f, "{}: {} {}", warning_style().apply_to("warning"), white_style().apply_to(n), white_style().apply_to("warnings emitted"))?,
            }
        }
        Ok(())
    }
}
