use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;

use gridcalc_common::{
    CellAddr, CellValue, FormulaCell, SourceError, ValueSink, WorkbookSource,
};

#[derive(Debug, Default, Clone)]
struct Sheet {
    values: BTreeMap<CellAddr, CellValue>,
    formulas: BTreeMap<CellAddr, String>,
    computed: BTreeMap<CellAddr, CellValue>,
}

/// In-memory host workbook: a [`WorkbookSource`] and [`ValueSink`] over
/// plain maps, with counters for asserting how the engine used it.
#[derive(Debug, Default)]
pub struct TestWorkbook {
    sheets: RwLock<Vec<(String, Sheet)>>,
    computed_writes: AtomicUsize,
    input_writes: AtomicUsize,
    raw_reads: AtomicUsize,
    unavailable: AtomicBool,
}

fn addr(a1: &str) -> CellAddr {
    CellAddr::parse(a1).unwrap_or_else(|e| panic!("bad test address {a1}: {e}"))
}

impl TestWorkbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sheet(self, name: &str) -> Self {
        self.add_sheet(name);
        self
    }

    pub fn with_value(self, sheet: &str, a1: &str, value: impl Into<CellValue>) -> Self {
        self.set_value(sheet, a1, value);
        self
    }

    pub fn with_formula(self, sheet: &str, a1: &str, formula: &str) -> Self {
        self.set_formula(sheet, a1, formula);
        self
    }

    pub fn add_sheet(&self, name: &str) {
        let mut sheets = self.sheets.write();
        if !sheets.iter().any(|(n, _)| n == name) {
            sheets.push((name.to_string(), Sheet::default()));
        }
    }

    fn with_sheet_mut<R>(&self, name: &str, f: impl FnOnce(&mut Sheet) -> R) -> R {
        let mut sheets = self.sheets.write();
        let pos = match sheets.iter().position(|(n, _)| n == name) {
            Some(pos) => pos,
            None => {
                sheets.push((name.to_string(), Sheet::default()));
                sheets.len() - 1
            }
        };
        f(&mut sheets[pos].1)
    }

    fn read_sheet<R>(&self, name: &str, f: impl FnOnce(&Sheet) -> R) -> Option<R> {
        let sheets = self.sheets.read();
        sheets.iter().find(|(n, _)| n == name).map(|(_, s)| f(s))
    }

    /// Store a value directly, bypassing the engine (a host-side edit).
    pub fn set_value(&self, sheet: &str, a1: &str, value: impl Into<CellValue>) {
        self.set_value_at(sheet, addr(a1), value.into());
    }

    pub fn set_value_at(&self, sheet: &str, at: CellAddr, value: CellValue) {
        self.with_sheet_mut(sheet, |s| {
            s.formulas.remove(&at);
            s.computed.remove(&at);
            if value.is_empty() {
                s.values.remove(&at);
            } else {
                s.values.insert(at, value);
            }
        });
    }

    pub fn set_formula(&self, sheet: &str, a1: &str, formula: &str) {
        let at = addr(a1);
        self.with_sheet_mut(sheet, |s| {
            s.values.remove(&at);
            s.formulas.insert(at, formula.to_string());
        });
    }

    pub fn remove_sheet(&self, name: &str) {
        self.sheets.write().retain(|(n, _)| n != name);
    }

    /// Last value the engine wrote for a formula cell, else the stored
    /// value, else `Empty`.
    pub fn value(&self, sheet: &str, a1: &str) -> CellValue {
        let at = addr(a1);
        self.read_sheet(sheet, |s| {
            s.computed
                .get(&at)
                .or_else(|| s.values.get(&at))
                .cloned()
        })
        .flatten()
        .unwrap_or(CellValue::Empty)
    }

    pub fn number(&self, sheet: &str, a1: &str) -> f64 {
        match self.value(sheet, a1) {
            CellValue::Number(n) => n,
            other => panic!("{sheet}!{a1} is not a number: {other:?}"),
        }
    }

    pub fn computed_writes(&self) -> usize {
        self.computed_writes.load(Ordering::Relaxed)
    }

    pub fn input_writes(&self) -> usize {
        self.input_writes.load(Ordering::Relaxed)
    }

    /// Single-cell reads that went all the way to the host.
    pub fn raw_reads(&self) -> usize {
        self.raw_reads.load(Ordering::Relaxed)
    }

    /// While set, bulk reads (`formula_cells`, `cells`) fail as if the
    /// host's storage were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), SourceError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(SourceError("workbook storage unavailable".into()));
        }
        Ok(())
    }

    pub fn reset_counters(&self) {
        self.computed_writes.store(0, Ordering::Relaxed);
        self.input_writes.store(0, Ordering::Relaxed);
        self.raw_reads.store(0, Ordering::Relaxed);
    }
}

impl WorkbookSource for TestWorkbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn formula_cells(&self, sheet: &str) -> Result<Vec<FormulaCell>, SourceError> {
        self.check_available()?;
        self.read_sheet(sheet, |s| {
            s.formulas
                .iter()
                .map(|(at, f)| FormulaCell::new(*at, f.as_str()))
                .collect()
        })
        .ok_or_else(|| SourceError(format!("no sheet named '{sheet}'")))
    }

    fn raw_value(&self, sheet: &str, at: CellAddr) -> CellValue {
        self.raw_reads.fetch_add(1, Ordering::Relaxed);
        self.read_sheet(sheet, |s| {
            s.values.get(&at).or_else(|| s.computed.get(&at)).cloned()
        })
        .flatten()
        .unwrap_or(CellValue::Empty)
    }

    fn cells(&self, sheet: &str) -> Result<Vec<(CellAddr, CellValue)>, SourceError> {
        self.check_available()?;
        self.read_sheet(sheet, |s| {
            s.values
                .iter()
                .chain(s.computed.iter())
                .map(|(at, v)| (*at, v.clone()))
                .collect()
        })
        .ok_or_else(|| SourceError(format!("no sheet named '{sheet}'")))
    }
}

impl ValueSink for TestWorkbook {
    fn store_computed_value(&self, sheet: &str, at: CellAddr, value: &CellValue) {
        self.computed_writes.fetch_add(1, Ordering::Relaxed);
        self.with_sheet_mut(sheet, |s| {
            s.computed.insert(at, value.clone());
        });
    }

    fn store_input_value(&self, sheet: &str, at: CellAddr, value: &CellValue) {
        self.input_writes.fetch_add(1, Ordering::Relaxed);
        self.set_value_at(sheet, at, value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_replace_formulas() {
        let wb = TestWorkbook::new()
            .with_value("Sheet1", "A1", 1.0)
            .with_formula("Sheet1", "B1", "=A1+1");
        assert_eq!(wb.formula_cells("Sheet1").unwrap().len(), 1);

        wb.store_computed_value("Sheet1", addr("B1"), &CellValue::Number(2.0));
        assert_eq!(wb.value("Sheet1", "B1"), CellValue::Number(2.0));

        wb.store_input_value("Sheet1", addr("B1"), &CellValue::Number(7.0));
        assert!(wb.formula_cells("Sheet1").unwrap().is_empty());
        assert_eq!(wb.value("Sheet1", "B1"), CellValue::Number(7.0));
        assert_eq!(wb.input_writes(), 1);
        assert_eq!(wb.computed_writes(), 1);
    }

    #[test]
    fn unknown_sheets_are_errors() {
        let wb = TestWorkbook::new().with_sheet("Sheet1");
        assert!(wb.cells("Nope").is_err());
        assert_eq!(wb.raw_value("Nope", addr("A1")), CellValue::Empty);
        assert_eq!(wb.sheet_names(), vec!["Sheet1".to_string()]);
    }
}
