//! Meta crate that re-exports the gridcalc building blocks. Hosts depend on
//! this crate and pick layers through feature flags, keeping access to the
//! underlying crates when deeper integration is required.

#[cfg(feature = "common")]
pub use gridcalc_common as common;

#[cfg(feature = "parse")]
pub use gridcalc_parse as parse;

#[cfg(feature = "eval")]
pub use gridcalc_eval as eval;

#[cfg(feature = "common")]
pub use gridcalc_common::{
    CellAddr, CellError, CellUpdate, CellValue, ErrorKind, FormulaEvaluator, OutputMode,
    QualifiedCell, ValueSink, WorkbookSource,
};

#[cfg(feature = "eval")]
pub use gridcalc_eval::{Engine, EvalConfig, PassReport, RecalcError, new_engine};
