//! Assembler error types.

use std::io;
use thiserror::Error;

/// Fatal failures that abort an assembly run.
///
/// Per-statement problems are not errors in this sense: they are printed
/// as diagnostics and recorded in the assembler's `good` flag so parsing
/// can continue and surface more of them.
#[derive(Debug, Error)]
pub enum AsmError {
    /// Input or output file could not be accessed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The coloring stage ran out of physical registers.
    #[error("Too many registers is needed")]
    TooManyRegisters,
    /// Attempt to use the assembler output after a failed run.
    #[error("Assembly failed; no output was produced")]
    NotGood,
}

/// Result alias for driver-level operations.
pub type AsmResult<T> = Result<T, AsmError>;

/// Outcome of an expression evaluation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryStatus {
    /// Evaluation produced a value.
    Success,
    /// Evaluation failed; diagnostics were printed.
    Failed,
    /// Evaluation needs section differences resolved first.
    TryLater,
}
