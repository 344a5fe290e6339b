pub mod error;

pub mod prelude {
    pub use super::error::BuildError;
    pub use super::error::BuildLog;
    pub use super::error::BuildResult;
    pub use super::error::Diagnostic;
    pub use super::error::DiagnosticKind;
}
