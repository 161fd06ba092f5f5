//! Interfaces to the collaborators that surround the recalculation core:
//! where formulas and stored values come from, how a single formula is
//! evaluated, and where computed values go.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::{CellAddr, CellError, CellValue, EmptyTextPolicy, ErrorKind, RangeArea};

/// A formula cell as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaCell {
    pub addr: CellAddr,
    /// Formula text; a leading `=` is optional.
    pub formula: String,
}

impl FormulaCell {
    pub fn new(addr: CellAddr, formula: impl Into<String>) -> Self {
        Self {
            addr,
            formula: formula.into(),
        }
    }
}

/// One input change in an update batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CellUpdate {
    pub sheet: String,
    pub addr: CellAddr,
    pub value: CellValue,
}

impl CellUpdate {
    pub fn new(sheet: impl Into<String>, addr: CellAddr, value: impl Into<CellValue>) -> Self {
        Self {
            sheet: sheet.into(),
            addr,
            value: value.into(),
        }
    }
}

/// Failure reported by a [`WorkbookSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError(pub String);

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for SourceError {}

/// Read access to the host workbook.
pub trait WorkbookSource: Send + Sync {
    fn sheet_names(&self) -> Vec<String>;

    /// Every formula cell of `sheet`.
    fn formula_cells(&self, sheet: &str) -> Result<Vec<FormulaCell>, SourceError>;

    /// Current stored value of a cell; `Empty` when nothing is stored.
    fn raw_value(&self, sheet: &str, addr: CellAddr) -> CellValue;

    /// Every resident (non-empty) stored value of `sheet`.
    fn cells(&self, sheet: &str) -> Result<Vec<(CellAddr, CellValue)>, SourceError>;
}

/// Where computed values and applied inputs are persisted.
pub trait ValueSink: Send + Sync {
    fn store_computed_value(&self, sheet: &str, addr: CellAddr, value: &CellValue);

    fn store_input_value(&self, sheet: &str, addr: CellAddr, value: &CellValue);
}

/// A materialized rectangle of values, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeData {
    area: RangeArea,
    rows: u32,
    cols: u32,
    values: Vec<CellValue>,
}

static EMPTY: CellValue = CellValue::Empty;

impl RangeData {
    /// `values.len()` must equal `rows * cols`.
    pub fn new(area: RangeArea, rows: u32, cols: u32, values: Vec<CellValue>) -> Self {
        debug_assert_eq!(values.len(), rows as usize * cols as usize);
        Self {
            area,
            rows,
            cols,
            values,
        }
    }

    /// No materialized cells, e.g. a whole column on an empty sheet.
    pub fn empty(area: RangeArea) -> Self {
        Self::new(area, 0, area.width(), Vec::new())
    }

    /// Area as requested (before clipping to the used extent).
    pub fn area(&self) -> RangeArea {
        self.area
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Zero-based cell; positions past the materialized extent are empty.
    pub fn get(&self, row: u32, col: u32) -> &CellValue {
        if row >= self.rows || col >= self.cols {
            return &EMPTY;
        }
        &self.values[row as usize * self.cols as usize + col as usize]
    }

    /// Zero-based row-major position; past the end is empty.
    pub fn get_flat(&self, index: usize) -> &CellValue {
        self.values.get(index).unwrap_or(&EMPTY)
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }
}

/// Read access handed to a formula evaluator.
pub trait CellReader: Send + Sync {
    /// Current value of a cell. Unknown sheets yield `#REF!`.
    fn cell(&self, sheet: &str, addr: CellAddr) -> Result<CellValue, CellError>;

    /// Materialized values of an area. Unknown sheets yield `#REF!`.
    fn range(&self, sheet: &str, area: RangeArea) -> Result<Arc<RangeData>, CellError>;
}

/// Everything an evaluator needs to compute one formula cell.
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub sheet: Arc<str>,
    pub addr: CellAddr,
    pub formula: Arc<str>,
    pub empty_text_policy: EmptyTextPolicy,
}

/// A formula evaluation that did not produce a value.
///
/// Spreadsheet errors such as `#DIV/0!` are ordinary results and should be
/// returned as `Ok(CellValue::Error(..))`; this type covers evaluator faults.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalFailure {
    /// The formula could not be parsed or uses an unsupported construct.
    Unsupported(String),
    /// Evaluation failed with a specific error code.
    Error(CellError),
    /// The evaluator panicked.
    Panicked(String),
}

impl EvalFailure {
    /// The value stored for a failed cell so dependents observe the failure.
    pub fn to_value(&self) -> CellValue {
        match self {
            EvalFailure::Error(e) => CellValue::Error(e.clone()),
            EvalFailure::Unsupported(msg) => {
                CellValue::Error(CellError::new(ErrorKind::Name).with_message(msg.clone()))
            }
            EvalFailure::Panicked(msg) => {
                CellValue::Error(CellError::new(ErrorKind::Error).with_message(msg.clone()))
            }
        }
    }
}

impl fmt::Display for EvalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalFailure::Unsupported(msg) => write!(f, "unsupported formula: {msg}"),
            EvalFailure::Error(e) => write!(f, "evaluation failed: {e}"),
            EvalFailure::Panicked(msg) => write!(f, "evaluator panicked: {msg}"),
        }
    }
}

impl Error for EvalFailure {}

impl From<CellError> for EvalFailure {
    fn from(e: CellError) -> Self {
        EvalFailure::Error(e)
    }
}

/// Computes the value of a single formula cell.
pub trait FormulaEvaluator: Send + Sync {
    fn evaluate(
        &self,
        request: &EvalRequest,
        reader: &dyn CellReader,
    ) -> Result<CellValue, EvalFailure>;
}

impl<F> FormulaEvaluator for F
where
    F: Fn(&EvalRequest, &dyn CellReader) -> Result<CellValue, EvalFailure> + Send + Sync,
{
    fn evaluate(
        &self,
        request: &EvalRequest,
        reader: &dyn CellReader,
    ) -> Result<CellValue, EvalFailure> {
        self(request, reader)
    }
}
