//! Tests for evaluator faults, error values and slow-formula reporting.
use std::sync::Arc;
use std::time::Duration;

use gridcalc_common::{CellError, CellValue, EmptyTextPolicy, ErrorKind};
use gridcalc_testkit::TestWorkbook;

use super::common::{engine, num, plain_config, qc};

fn error_kind(v: &CellValue) -> Option<ErrorKind> {
    v.as_error().map(|e| e.kind)
}

#[test]
fn panicking_formula_is_contained() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_formula("Sheet1", "A1", "=PANIC()")
            .with_formula("Sheet1", "A2", "=A1+1")
            .with_formula("Sheet1", "B1", "=2*21"),
    );
    for timeout in [None, Some(Duration::from_secs(5))] {
        let mut engine = engine(&wb, plain_config().with_eval_timeout(timeout));
        let report = engine.recalculate_all().unwrap();

        assert_eq!(error_kind(&wb.value("Sheet1", "A1")), Some(ErrorKind::Error));
        assert_eq!(error_kind(&wb.value("Sheet1", "A2")), Some(ErrorKind::Error));
        assert_eq!(wb.value("Sheet1", "B1"), num(42.0));
        assert_eq!(report.stats.errors, 2);
        assert_eq!(report.stats.succeeded, 1);
    }
}

#[test]
fn error_values_flow_through_dependents() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 0.0)
            .with_formula("Sheet1", "B1", "=10/A1")
            .with_formula("Sheet1", "C1", "=B1*2")
            .with_formula("Sheet1", "D1", "=IFERROR(C1, -1)"),
    );
    let mut engine = engine(&wb, plain_config());
    let report = engine.recalculate_all().unwrap();

    assert_eq!(wb.value("Sheet1", "C1"), CellValue::Error(CellError::new_div()));
    assert_eq!(wb.value("Sheet1", "D1"), num(-1.0));
    assert_eq!(report.stats.errors, 2);
    assert_eq!(report.stats.succeeded, 1);
    assert!(!report.stats.is_clean());
}

#[test]
fn unsupported_formulas_become_name_errors() {
    let wb = Arc::new(TestWorkbook::new().with_formula("Sheet1", "A1", "=NOSUCHFN(1)"));
    let mut engine = engine(&wb, plain_config());
    let report = engine.recalculate_all().unwrap();
    assert_eq!(error_kind(&wb.value("Sheet1", "A1")), Some(ErrorKind::Name));
    assert_eq!(report.stats.errors, 1);
}

#[test]
fn slow_formulas_are_reported_slowest_first() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_formula("Sheet1", "A1", "=SLEEP(40)")
            .with_formula("Sheet1", "A2", "=SLEEP(80)")
            .with_formula("Sheet1", "A3", "=1"),
    );
    let config = plain_config().with_slow_formula_threshold(Duration::from_millis(20));
    let mut engine = engine(&wb, config);
    let report = engine.recalculate_all().unwrap();

    let slow: Vec<_> = report.stats.slow_formulas.iter().map(|s| s.cell.clone()).collect();
    assert_eq!(slow, vec![qc("Sheet1", "A2"), qc("Sheet1", "A1")]);
    assert!(report.stats.slow_formulas[0].elapsed >= Duration::from_millis(80));
}

#[test]
fn empty_text_policy_reaches_the_evaluator() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", "")
            .with_formula("Sheet1", "B1", "=A1+1"),
    );
    let mut strict = engine(&wb, plain_config());
    strict.recalculate_all().unwrap();
    assert_eq!(error_kind(&wb.value("Sheet1", "B1")), Some(ErrorKind::Value));

    let config = plain_config().with_empty_text_policy(EmptyTextPolicy::Zero);
    let mut lenient = engine(&wb, config);
    lenient.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "B1"), num(1.0));
}
