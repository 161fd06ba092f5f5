//! Tests for formulas with unresolvable references.
use std::sync::Arc;

use gridcalc_common::{CellUpdate, ErrorKind};
use gridcalc_testkit::TestWorkbook;

use super::common::{addr, engine, num, plain_config};
use crate::error::RecalcError;

#[test]
fn unresolved_references_store_ref_errors() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 3.0)
            .with_formula("Sheet1", "B1", "=Missing!A1+1")
            .with_formula("Sheet1", "B2", "=TaxRate*A1")
            .with_formula("Sheet1", "B3", "=[Book2.xlsx]Sheet1!A1")
            .with_formula("Sheet1", "C1", "=B1+1")
            .with_formula("Sheet1", "D1", "=A1*2"),
    );
    let mut engine = engine(&wb, plain_config());
    let report = engine.recalculate_all().unwrap();

    for cell in ["B1", "B2", "B3", "C1"] {
        let value = wb.value("Sheet1", cell);
        assert_eq!(
            value.as_error().map(|e| e.kind),
            Some(ErrorKind::Ref),
            "{cell} = {value:?}"
        );
    }
    assert_eq!(report.stats.unresolved, 3);
    assert_eq!(report.stats.errors, 1);
    assert_eq!(wb.value("Sheet1", "D1"), num(6.0));
}

#[test]
fn adding_the_missing_sheet_resolves_after_rebuild() {
    let wb = Arc::new(TestWorkbook::new().with_formula("Sheet1", "A1", "=Other!A1*2"));
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();
    assert!(wb.value("Sheet1", "A1").is_error());

    wb.set_value("Other", "A1", 21.0);
    engine.rebuild_graph().unwrap();
    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "A1"), num(42.0));

    let report = engine
        .apply_updates(&[CellUpdate::new("Other", addr("A1"), 1.0)])
        .unwrap();
    assert_eq!(report.stats.unresolved, 0);
    assert_eq!(wb.value("Sheet1", "A1"), num(2.0));
}

fn is_ref_error(value: &gridcalc_common::CellValue) -> bool {
    value.as_error().map(|e| e.kind) == Some(ErrorKind::Ref)
}

#[test]
fn removed_sheet_poisons_its_readers() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_value("Sheet1", "A1", 1.0)
            .with_formula("Sheet1", "C1", "=Other!A1+1")
            .with_formula("Sheet1", "D1", "=A1*10")
            .with_value("Other", "A1", 5.0),
    );
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();
    assert_eq!(wb.value("Sheet1", "C1"), num(6.0));

    wb.remove_sheet("Other");
    engine.rebuild_graph().unwrap();
    let report = engine.recalculate_all().unwrap();
    assert!(is_ref_error(&wb.value("Sheet1", "C1")));
    assert_eq!(report.stats.unresolved, 1);
    assert_eq!(wb.value("Sheet1", "D1"), num(10.0));

    engine
        .apply_updates(&[CellUpdate::new("Sheet1", addr("A1"), 2.0)])
        .unwrap();
    assert_eq!(wb.value("Sheet1", "D1"), num(20.0));
    assert!(matches!(
        engine.apply_updates(&[CellUpdate::new("Other", addr("A1"), 1.0)]),
        Err(RecalcError::UnknownSheet(_))
    ));
}

#[test]
fn renamed_sheet_is_picked_up_without_explicit_rebuild() {
    let wb = Arc::new(
        TestWorkbook::new()
            .with_formula("Sheet1", "C1", "=Other!A1+1")
            .with_value("Other", "A1", 5.0),
    );
    let mut engine = engine(&wb, plain_config());
    engine.recalculate_all().unwrap();

    wb.remove_sheet("Other");
    wb.set_value("Renamed", "A1", 5.0);
    wb.set_formula("Sheet1", "E1", "=Renamed!A1*2");
    let report = engine.recalculate_all().unwrap();

    assert!(is_ref_error(&wb.value("Sheet1", "C1")));
    assert_eq!(wb.value("Sheet1", "E1"), num(10.0));
    assert_eq!(report.stats.unresolved, 1);
    assert_eq!(engine.registry().len(), 2);
}
