//! Error type shared by the position and existence tables.

use thiserror::Error;

#[derive(Debug, Error)]
/// Errors returned by table construction, lookup and persistence.
pub enum IndexError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid or unsupported file contents.
    #[error("Invalid table file: {0}")]
    Format(String),
    /// Bytemuck cast failed (misaligned or truncated mapping).
    #[error("Cast error: {0}")]
    Cast(String),
    /// Parameters that cannot describe a valid table or query.
    #[error("Configuration error: {0}")]
    Config(String),
    /// A structural invariant of a built table does not hold.
    #[error("Corrupt table: {0}")]
    Corrupt(String),
    /// A requested mode exists in the format but has no implementation.
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),
    /// Growing a caller-owned scratch buffer failed.
    #[error("Cannot grow position buffer to {0} entries")]
    ScratchExhausted(usize),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
