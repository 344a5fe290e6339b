pub mod assembler;
pub mod builder;
pub mod cli;
pub mod format;
pub mod inspect;
pub mod logger;
pub mod relocation;
pub mod result;
pub mod symbol;
pub mod verify;
