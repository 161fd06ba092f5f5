use gridcalc_common::{AddressError, SourceError};

/// Errors returned by [`crate::engine::Engine`] operations.
///
/// A recalculation pass never fails because of a single formula; formula
/// problems are reported as values and in the pass statistics. These errors
/// cover invalid caller input and host failures.
#[derive(Debug, thiserror::Error)]
pub enum RecalcError {
    #[error("update batch is empty")]
    EmptyUpdateBatch,

    #[error("column set is empty")]
    EmptyColumnSet,

    #[error("unknown sheet '{0}'")]
    UnknownSheet(String),

    #[error("invalid address on sheet '{sheet}': {source}")]
    InvalidAddress {
        sheet: String,
        #[source]
        source: AddressError,
    },

    #[error("workbook source failed: {0}")]
    Source(#[from] SourceError),
}
