//! Tests for update batches and dirty-subgraph passes.
use std::sync::Arc;

use gridcalc_common::{CellUpdate, CellValue, OutputMode};
use gridcalc_testkit::TestWorkbook;

use super::common::{addr, engine, num, plain_config, qc};
use crate::engine::EvalConfig;

fn chain() -> Arc<TestWorkbook> {
    Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 10.0)
            .with_value("Sheet1", "A2", 1.0)
            .with_value("Sheet1", "A3", 5.0)
            .with_formula("Sheet1", "B1", "=A1*2")
            .with_formula("Sheet1", "B2", "=B1+A2")
            .with_formula("Sheet1", "C1", "=A3+1"),
    )
}

fn subgraph_config() -> EvalConfig {
    plain_config().with_incremental_full_threshold(1.0)
}

#[test]
fn only_dependents_are_recomputed() {
    let wb = chain();
    let mut engine = engine(&wb, subgraph_config());
    engine.recalculate_all().unwrap();
    wb.reset_counters();

    let report = engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("A1"), 20.0)])
        .unwrap();

    assert_eq!(report.stats.total, 2);
    assert_eq!(report.changed.len(), 2);
    assert_eq!(report.changed[&qc("Sheet1", "B1")], num(40.0));
    assert_eq!(report.changed[&qc("Sheet1", "B2")], num(41.0));
    assert_eq!(wb.computed_writes(), 2);
    assert_eq!(wb.input_writes(), 1);
    assert_eq!(wb.value("Sheet1", "C1"), num(6.0));
}

#[test]
fn unchanged_results_are_not_reported() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 3.0)
            .with_formula("Sheet1", "B1", "=A1*0")
            .with_formula("Sheet1", "C1", "=B1+A1"),
    );
    let mut engine = engine(&wb, subgraph_config());
    engine.recalculate_all().unwrap();

    let report = engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("A1"), 4.0)])
        .unwrap();
    assert!(!report.changed.contains_key(&qc("Sheet1", "B1")));
    assert_eq!(report.changed[&qc("Sheet1", "C1")], num(4.0));
}

#[test]
fn large_affected_share_runs_a_full_pass() {
    let wb = chain();
    let config = plain_config().with_incremental_full_threshold(0.0);
    let mut engine = engine(&wb, config);
    engine.recalculate_all().unwrap();

    let report = engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("A3"), 9.0)])
        .unwrap();
    assert_eq!(report.stats.total, 3);
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed[&qc("Sheet1", "C1")], num(10.0));
}

#[test]
fn updates_before_the_first_pass_run_a_full_pass() {
    let wb = chain();
    let mut engine = engine(&wb, subgraph_config());
    let report = engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("A2"), 100.0)])
        .unwrap();
    assert_eq!(report.stats.total, 3);
    assert_eq!(wb.value("Sheet1", "B2"), num(120.0));
}

#[test]
fn overwriting_a_formula_rebuilds_the_graph() {
    let wb = chain();
    let mut engine = engine(&wb, subgraph_config());
    engine.recalculate_all().unwrap();
    assert_eq!(engine.graph().unwrap().formula_count(), 3);

    let report = engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("B1"), 7.0)])
        .unwrap();
    assert_eq!(engine.graph().unwrap().formula_count(), 2);
    assert_eq!(report.changed[&qc("Sheet1", "B2")], num(8.0));
    assert_eq!(wb.value("Sheet1", "B1"), num(7.0));
}

#[test]
fn cross_sheet_updates_propagate() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Inputs", "A1", 2.0)
            .with_formula("Calc", "A1", "=Inputs!A1*3")
            .with_formula("Calc", "A2", "=SUM(Calc!A1, Inputs!A1)"),
    );
    let mut engine = engine(&wb, subgraph_config());
    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Calc", "A2"), num(8.0));

    let report = engine
        .apply_updates(&[CellUpdate::new("Inputs", addr("A1"), 10.0)])
        .unwrap();
    assert_eq!(report.changed[&qc("Calc", "A1")], num(30.0));
    assert_eq!(report.changed[&qc("Calc", "A2")], num(40.0));
}

#[test]
fn range_readers_see_updated_inputs() {
    let wb = Arc::new(TestWorkbook::new().with_formula("Sheet1", "C1", "=SUM(A1:A100)"));
    for row in 1..=100 {
        wb.set_value("Sheet1", &format!("A{row}"), 1.0);
    }
    let mut engine = engine(&wb, subgraph_config());
    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "C1"), num(100.0));

    let report = engine
        .apply_updates(&[
            CellUpdate::new("Sheet1", addr("A50"), 11.0),
            CellUpdate::new("Sheet1", addr("A101"), 5.0),
        ])
        .unwrap();
    // A101 lies outside the summed range.
    assert_eq!(report.changed[&qc("Sheet1", "C1")], num(110.0));
}

#[test]
fn cached_values_in_both_output_modes() {
    let wb = chain();
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();

    assert_eq!(
        engine.cached_value("Sheet1", addr("B2"), OutputMode::Raw),
        Some(num(21.0))
    );
    assert_eq!(
        engine.cached_value("Sheet1", addr("B2"), OutputMode::Display),
        Some(CellValue::Text("21".into()))
    );
    assert_eq!(engine.cached_value("Sheet1", addr("A1"), OutputMode::Raw), None);
    assert_eq!(engine.cached_value("Nope", addr("B2"), OutputMode::Raw), None);
}

#[test]
fn invalidated_sheet_is_reloaded_from_the_host() {
    let wb = chain();
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();

    wb.set_value("Sheet1", "A1", 1.0);
    wb.set_formula("Sheet1", "D1", "=B1+100");
    engine.invalidate_sheet("Sheet1").unwrap();
    assert!(engine.graph().is_none());

    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "B1"), num(2.0));
    assert_eq!(wb.value("Sheet1", "D1"), num(102.0));
}
