use std::sync::Arc;

use gridcalc_common::{CellAddr, CellValue, QualifiedCell};
use gridcalc_testkit::{MiniEvaluator, TestWorkbook, init_tracing};

use crate::engine::{Engine, EvalConfig};

pub fn engine(wb: &Arc<TestWorkbook>, config: EvalConfig) -> Engine {
    init_tracing();
    Engine::new(wb.clone(), MiniEvaluator::shared(), wb.clone(), config)
}

/// Sequential, no timeout, no batching; the plainest possible engine.
pub fn plain_config() -> EvalConfig {
    let mut config = EvalConfig::default()
        .with_parallel(false)
        .with_eval_timeout(None);
    config.pattern.enabled = false;
    config
}

pub fn addr(a1: &str) -> CellAddr {
    CellAddr::parse(a1).unwrap()
}

pub fn qc(sheet: &str, a1: &str) -> QualifiedCell {
    QualifiedCell::new(sheet, addr(a1))
}

pub fn num(n: f64) -> CellValue {
    CellValue::Number(n)
}
