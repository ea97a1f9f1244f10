//! FILENAME: engine/src/error.rs
//! PURPOSE: The error type surfaced by fallible Sheet operations.
//! CONTEXT: Three categories, one thiserror variant each — an invalid
//! address, a formula that failed to parse, and a formula that would close
//! a reference cycle. All three leave the sheet's state exactly as it was
//! before the call.

use position::Position;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid cell position: {0:?}")]
    InvalidPosition(Position),

    #[error("formula error: {0}")]
    Formula(#[from] parser::ParseError),

    #[error("circular dependency detected at {0:?}")]
    CircularDependency(Position),
}
