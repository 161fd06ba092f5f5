//! Tests for circular reference containment.
use std::collections::BTreeSet;
use std::sync::Arc;

use gridcalc_common::CellValue;
use gridcalc_testkit::TestWorkbook;

use super::common::{engine, num, plain_config, qc};

#[test]
fn two_cell_cycle_and_its_dependents_are_blanked() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_formula("Sheet1", "A1", "=A2+1")
            .with_formula("Sheet1", "A2", "=A1+1")
            .with_formula("Sheet1", "B1", "=A1+1")
            .with_formula("Sheet1", "C1", "=5"),
    );
    let mut engine = engine(&wb, plain_config());
    let report = engine.recalculate_all().unwrap();

    let circular: BTreeSet<_> = report.circular.iter().cloned().collect();
    let expected: BTreeSet<_> = [qc("Sheet1", "A1"), qc("Sheet1", "A2"), qc("Sheet1", "B1")]
        .into_iter()
        .collect();
    assert_eq!(circular, expected);
    assert_eq!(report.cycles.len(), 1);
    assert_eq!(report.cycles[0], vec![qc("Sheet1", "A1"), qc("Sheet1", "A2")]);

    assert_eq!(report.stats.circular, 3);
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(wb.value("Sheet1", "C1"), num(5.0));
    for cell in ["A1", "A2", "B1"] {
        assert_eq!(wb.value("Sheet1", cell), CellValue::Empty, "{cell} not blanked");
    }
}

#[test]
fn introducing_a_cycle_clears_stale_values() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_formula("Sheet1", "A1", "=7")
            .with_formula("Sheet1", "A2", "=A1+1"),
    );
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "A2"), num(8.0));

    wb.set_formula("Sheet1", "A1", "=A2*2");
    engine.rebuild_graph().unwrap();
    let report = engine.recalculate_all().unwrap();

    assert_eq!(wb.value("Sheet1", "A1"), CellValue::Empty);
    assert_eq!(wb.value("Sheet1", "A2"), CellValue::Empty);
    assert_eq!(report.changed.get(&qc("Sheet1", "A2")), Some(&CellValue::Empty));
}

#[test]
fn range_covering_its_own_cell_is_circular() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 1.0)
            .with_value("Sheet1", "A2", 2.0)
            .with_formula("Sheet1", "A3", "=SUM(A1:A5)")
            .with_formula("Sheet1", "B3", "=A3+1")
            .with_formula("Sheet1", "C1", "=SUM(A1:A2)"),
    );
    let mut engine = engine(&wb, plain_config());
    let report = engine.recalculate_all().unwrap();

    assert!(report.circular.contains(&qc("Sheet1", "A3")));
    assert!(report.circular.contains(&qc("Sheet1", "B3")));
    assert!(report.cycles.is_empty());
    assert_eq!(wb.value("Sheet1", "C1"), num(3.0));
}

#[test]
fn parallel_pass_contains_cycles_too() {
    let wb = Arc::new(TestWorkbook::new());
    for row in 1..=50 {
        wb.set_formula("Sheet1", &format!("A{row}"), &format!("=B{row}+1"));
        wb.set_formula("Sheet1", &format!("B{row}"), &format!("=A{row}+1"));
        wb.set_formula("Sheet1", &format!("C{row}"), &format!("={row}*2"));
    }
    let config = plain_config().with_parallel(true).with_max_threads(4);
    let mut engine = engine(&wb, config);
    let report = engine.recalculate_all().unwrap();

    assert_eq!(report.stats.circular, 100);
    assert_eq!(report.cycles.len(), 50);
    assert_eq!(report.stats.succeeded, 50);
    assert_eq!(wb.value("Sheet1", "C50"), num(100.0));
}
