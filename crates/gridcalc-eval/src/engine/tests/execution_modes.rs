//! Tests that every execution strategy computes the same values.
use std::sync::Arc;

use gridcalc_common::CellValue;
use gridcalc_testkit::TestWorkbook;

use super::common::{engine, plain_config};
use crate::engine::{EvalConfig, ExecutionMode, PassReport};

const ROWS: usize = 30;

fn workbook() -> Arc<TestWorkbook> {
    let wb = Arc::new(TestWorkbook::new());
    for row in 1..=200 {
        wb.set_value("Data", &format!("A{row}"), format!("k{}", row % 7));
        wb.set_value("Data", &format!("B{row}"), (row % 11) as f64);
    }
    for row in 1..=ROWS {
        wb.set_value("Calc", &format!("A{row}"), format!("k{}", row % 9));
        wb.set_formula(
            "Calc",
            &format!("C{row}"),
            &format!("=SUMIFS(Data!$B$1:$B$200, Data!$A$1:$A$200, A{row})"),
        );
        wb.set_formula("Calc", &format!("D{row}"), &format!("=C{row}*2"));
        wb.set_formula(
            "Calc",
            &format!("E{row}"),
            &format!("=COUNTIFS($D$1:$D$30, D{row})"),
        );
        wb.set_formula("Calc", &format!("F{row}"), &format!("=E{row}+D{row}"));
    }
    wb
}

fn run(config: EvalConfig) -> (Vec<CellValue>, PassReport) {
    let wb = workbook();
    let mut engine = engine(&wb, config);
    let report = engine.recalculate_all().unwrap();
    let mut values = Vec::new();
    for col in ["C", "D", "E", "F"] {
        for row in 1..=ROWS {
            values.push(wb.value("Calc", &format!("{col}{row}")));
        }
    }
    (values, report)
}

fn batched(config: EvalConfig) -> EvalConfig {
    let mut config = config;
    config.pattern.enabled = true;
    config.pattern.min_group_size = 10;
    config
}

#[test]
fn all_strategies_agree() {
    let (expected, baseline) = run(plain_config());
    assert_eq!(baseline.stats.pattern_resolved, 0);
    assert!(baseline.stats.is_clean());
    assert!(expected.iter().all(|v| matches!(v, CellValue::Number(_))));

    let configs = [
        batched(plain_config()),
        batched(plain_config()).with_merge_levels(false),
        batched(plain_config()).with_execution_mode(ExecutionMode::WholeGraph),
        batched(plain_config().with_parallel(true).with_max_threads(4)),
        batched(plain_config().with_parallel(true).with_max_threads(4))
            .with_execution_mode(ExecutionMode::WholeGraph),
        plain_config().with_parallel(true).with_max_threads(3),
    ];
    for config in configs {
        let label = format!("{:?}", (config.execution_mode, config.merge_levels, config.enable_parallel));
        let (values, report) = run(config);
        assert_eq!(values, expected, "{label}");
        assert!(report.stats.is_clean(), "{label}");
    }
}

#[test]
fn leveled_mode_batches_later_levels() {
    let (_, leveled) = run(batched(plain_config()));
    // C and D share a batch; E reads D so the optimizer needs a new one.
    assert_eq!(leveled.stats.batches, 2);
    assert_eq!(leveled.stats.pattern_groups, 2);
    assert_eq!(leveled.stats.pattern_resolved, 2 * ROWS);

    let (_, whole) = run(batched(plain_config()).with_execution_mode(ExecutionMode::WholeGraph));
    assert_eq!(whole.stats.pattern_groups, 1);
    assert_eq!(whole.stats.pattern_resolved, ROWS);
    assert_eq!(whole.stats.batches, 1);
}

#[test]
fn merging_reduces_scheduler_runs() {
    let wb = Arc::new(TestWorkbook::new());
    for row in 1..=20 {
        wb.set_value("Sheet1", &format!("A{row}"), row as f64);
        wb.set_formula("Sheet1", &format!("B{row}"), &format!("=A{row}+1"));
    }
    wb.set_formula("Sheet1", "C1", "=B1*2");
    wb.set_formula("Sheet1", "D1", "=C1*2");

    let mut merged = engine(&wb, plain_config());
    let report = merged.recalculate_all().unwrap();
    assert_eq!(report.stats.levels, 3);
    assert_eq!(report.stats.batches, 1);
    assert_eq!(wb.number("Sheet1", "D1"), 8.0);

    let mut unmerged = engine(&wb, plain_config().with_merge_levels(false));
    let report = unmerged.recalculate_all().unwrap();
    assert_eq!(report.stats.batches, 3);
    assert_eq!(wb.number("Sheet1", "D1"), 8.0);
}
