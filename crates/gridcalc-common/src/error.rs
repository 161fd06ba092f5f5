//! Spreadsheet error values.
//!
//! Errors produced by formulas are *values*: they are stored in caches and
//! flow through dependents exactly like numbers or text. `ErrorKind` carries
//! the canonical code, `CellError` adds an optional human explanation.

use std::{error::Error, fmt};

use crate::CellValue;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Recognised error codes.
///
/// Names are CamelCase while `Display` renders them the way a spreadsheet
/// shows them (`#DIV/0!`, ...).
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    Null,
    Div,
    Value,
    Ref,
    Name,
    Num,
    Na,
    Circ,
    Timeout,
    Error,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl ErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Null => "#NULL!",
            Self::Div => "#DIV/0!",
            Self::Value => "#VALUE!",
            Self::Ref => "#REF!",
            Self::Name => "#NAME?",
            Self::Num => "#NUM!",
            Self::Na => "#N/A",
            Self::Circ => "#CIRC!",
            Self::Timeout => "#TIMEOUT!",
            Self::Error => "#ERROR!",
        }
    }

    /// Parse an error literal such as `#N/A`. Unknown codes yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let kind = match s.trim().to_ascii_uppercase().as_str() {
            "#NULL!" => Self::Null,
            "#DIV/0!" => Self::Div,
            "#VALUE!" => Self::Value,
            "#REF!" => Self::Ref,
            "#NAME?" => Self::Name,
            "#NUM!" => Self::Num,
            "#N/A" => Self::Na,
            "#CIRC!" => Self::Circ,
            "#TIMEOUT!" => Self::Timeout,
            "#ERROR!" => Self::Error,
            _ => return None,
        };
        Some(kind)
    }
}

/// An error value with an optional explanation.
///
/// Equality and hashing consider only the kind: two `#VALUE!` results are the
/// same cell value regardless of how they were explained.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct CellError {
    pub kind: ErrorKind,
    pub message: Option<String>,
}

impl PartialEq for CellError {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for CellError {}

impl std::hash::Hash for CellError {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
    }
}

impl From<ErrorKind> for CellError {
    fn from(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }
}

impl CellError {
    pub fn new(kind: ErrorKind) -> Self {
        kind.into()
    }

    pub fn with_message<S: Into<String>>(mut self, msg: S) -> Self {
        self.message = Some(msg.into());
        self
    }

    pub fn new_value() -> Self {
        Self::new(ErrorKind::Value)
    }

    pub fn new_div() -> Self {
        Self::new(ErrorKind::Div)
    }

    pub fn new_na() -> Self {
        Self::new(ErrorKind::Na)
    }

    pub fn new_ref() -> Self {
        Self::new(ErrorKind::Ref)
    }

    pub fn new_name() -> Self {
        Self::new(ErrorKind::Name)
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ref msg) = self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl Error for CellError {}

impl From<CellError> for CellValue {
    fn from(error: CellError) -> Self {
        CellValue::Error(error)
    }
}

impl From<ErrorKind> for CellValue {
    fn from(kind: ErrorKind) -> Self {
        CellValue::Error(kind.into())
    }
}
