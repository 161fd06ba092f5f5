//! Fixtures shared by the gridcalc test suites and benches: an in-memory
//! host workbook, a reference formula evaluator and tracing setup.

mod evaluator;
mod workbook;

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

pub use evaluator::MiniEvaluator;
pub use workbook::TestWorkbook;

static TRACING: OnceCell<()> = OnceCell::new();

/// Install a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
