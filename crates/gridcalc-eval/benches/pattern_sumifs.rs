use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gridcalc_common::{CellAddr, CellUpdate};
use gridcalc_eval::{Engine, EvalConfig, PatternConfig};
use gridcalc_testkit::{MiniEvaluator, TestWorkbook};

const DATA_ROWS: u32 = 20_000;

fn workbook(formulas: u32) -> Arc<TestWorkbook> {
    let wb = TestWorkbook::new();
    for r in 1..=DATA_ROWS {
        wb.set_value("Data", &format!("A{r}"), format!("R{}", r % 50));
        wb.set_value("Data", &format!("B{r}"), f64::from(r % 13));
        wb.set_value("Data", &format!("C{r}"), f64::from(r % 7));
    }
    for r in 1..=formulas {
        wb.set_value("Calc", &format!("B{r}"), format!("R{}", r % 50));
        wb.set_value("Calc", &format!("C{r}"), f64::from(r % 7));
        wb.set_formula(
            "Calc",
            &format!("A{r}"),
            &format!("=SUMIFS(Data!$B:$B,Data!$A:$A,B{r},Data!$C:$C,C{r})"),
        );
    }
    Arc::new(wb)
}

fn engine(wb: &Arc<TestWorkbook>, pattern: bool) -> Engine {
    let config = EvalConfig::default()
        .with_eval_timeout(None)
        .with_pattern(PatternConfig {
            enabled: pattern,
            ..PatternConfig::default()
        });
    Engine::new(wb.clone(), MiniEvaluator::shared(), wb.clone(), config)
}

fn bench_full_pass(c: &mut Criterion) {
    gridcalc_eval::telemetry::init_from_env();
    let mut group = c.benchmark_group("SUMIFS full pass");
    group.sample_size(10);

    for formulas in [100u32, 1_000] {
        let wb = workbook(formulas);
        for (label, pattern) in [("batched", true), ("per-cell", false)] {
            let mut engine = engine(&wb, pattern);
            group.bench_with_input(BenchmarkId::new(label, formulas), &formulas, |b, _| {
                b.iter(|| black_box(engine.recalculate_all().unwrap().stats.succeeded))
            });
        }
    }
    group.finish();
}

fn bench_data_edit(c: &mut Criterion) {
    let wb = workbook(1_000);
    let mut engine = engine(&wb, true);
    engine.recalculate_all().unwrap();

    let mut value = 0.0;
    c.bench_function("SUMIFS data edit", |b| {
        b.iter(|| {
            value += 1.0;
            let update = CellUpdate::new("Data", CellAddr::new(7, 2), value);
            black_box(engine.apply_updates(&[update]).unwrap().changed.len())
        })
    });
}

criterion_group!(benches, bench_full_pass, bench_data_edit);
criterion_main!(benches);
