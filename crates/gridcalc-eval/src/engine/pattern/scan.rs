//! One pass over a group's target columns, bucketed by criteria key.

use rayon::ThreadPool;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use gridcalc_common::{CellError, CellValue, CriteriaKey, RangeData};

use super::template::AggregateKind;

pub(crate) type KeyTuple = SmallVec<[CriteriaKey; 2]>;

/// Everything a member formula may ask about the rows sharing one key.
#[derive(Debug, Clone, Default)]
pub(crate) struct Acc {
    pub sum: f64,
    /// Numeric cells seen in the values column.
    pub numeric: usize,
    pub rows: usize,
    /// Lowest matching row, relative to the range start.
    pub first_row: Option<u32>,
    /// Error in the values column at the lowest matching row that had one.
    pub error: Option<(u32, CellError)>,
}

impl Acc {
    fn merge(&mut self, other: Acc) {
        self.sum += other.sum;
        self.numeric += other.numeric;
        self.rows += other.rows;
        self.first_row = match (self.first_row, other.first_row) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some((row, err)) = other.error
            && self.error.as_ref().is_none_or(|(mine, _)| row < *mine)
        {
            self.error = Some((row, err));
        }
    }
}

pub(crate) type ScanTable = FxHashMap<KeyTuple, Acc>;

pub(crate) struct ScanColumns<'a> {
    pub kind: AggregateKind,
    pub keys: &'a [&'a RangeData],
    pub values: Option<&'a RangeData>,
}

impl ScanColumns<'_> {
    fn rows(&self) -> u32 {
        self.keys.iter().map(|k| k.rows()).max().unwrap_or(0)
    }

    fn accumulate(&self, table: &mut ScanTable, row: u32) {
        let key_of: fn(&CellValue) -> Option<CriteriaKey> = if self.kind.uses_equality() {
            CriteriaKey::for_equality
        } else {
            CriteriaKey::from_cell
        };
        let mut key = KeyTuple::new();
        for col in self.keys {
            match key_of(col.get(row, 0)) {
                Some(k) => key.push(k),
                None => return,
            }
        }
        let acc = table.entry(key).or_default();
        acc.rows += 1;
        if acc.first_row.is_none_or(|r| row < r) {
            acc.first_row = Some(row);
        }
        if !matches!(self.kind, AggregateKind::Sum | AggregateKind::Average) {
            return;
        }
        if let Some(values) = self.values {
            match values.get(row, 0) {
                CellValue::Number(n) => {
                    acc.sum += n;
                    acc.numeric += 1;
                }
                CellValue::Error(e) => {
                    if acc.error.as_ref().is_none_or(|(r, _)| row < *r) {
                        acc.error = Some((row, e.clone()));
                    }
                }
                _ => {}
            }
        }
    }
}

fn merge_tables(a: ScanTable, b: ScanTable) -> ScanTable {
    let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    for (key, acc) in small {
        big.entry(key).or_default().merge(acc);
    }
    big
}

/// Bucket every row of the key columns. Large scans are partitioned across
/// the pool and the partial tables merged.
pub(crate) fn scan(
    columns: &ScanColumns<'_>,
    pool: Option<&ThreadPool>,
    parallel_min_rows: usize,
) -> ScanTable {
    let rows = columns.rows();
    match pool {
        Some(pool) if rows as usize >= parallel_min_rows && pool.current_num_threads() > 1 => {
            pool.install(|| {
                (0..rows)
                    .into_par_iter()
                    .fold(ScanTable::default, |mut table, row| {
                        columns.accumulate(&mut table, row);
                        table
                    })
                    .reduce(ScanTable::default, merge_tables)
            })
        }
        _ => {
            let mut table = ScanTable::default();
            for row in 0..rows {
                columns.accumulate(&mut table, row);
            }
            table
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::RangeArea;
    use rayon::ThreadPoolBuilder;

    fn column(values: Vec<CellValue>) -> RangeData {
        let n = values.len() as u32;
        RangeData::new(RangeArea::new(1, 1, n, 1), n, 1, values)
    }

    fn key(s: &str) -> KeyTuple {
        SmallVec::from_elem(CriteriaKey::from_cell(&CellValue::from(s)).unwrap(), 1)
    }

    #[test]
    fn buckets_sums_and_first_rows() {
        let keys = column(vec![
            "a".into(),
            "b".into(),
            CellValue::Empty,
            "A".into(),
            "b".into(),
        ]);
        let values = column(vec![
            1.0.into(),
            2.0.into(),
            100.0.into(),
            "text".into(),
            CellValue::Error(CellError::new_div()),
        ]);
        let cols = [&keys];
        let table = scan(
            &ScanColumns {
                kind: AggregateKind::Sum,
                keys: &cols,
                values: Some(&values),
            },
            None,
            usize::MAX,
        );
        assert_eq!(table.len(), 2);
        let a = &table[&key("a")];
        assert_eq!((a.sum, a.numeric, a.rows, a.first_row), (1.0, 1, 2, Some(0)));
        let b = &table[&key("b")];
        assert_eq!(b.first_row, Some(1));
        assert_eq!(b.error.as_ref().map(|e| e.0), Some(4));
    }

    #[test]
    fn equality_scan_keeps_numeric_text_apart() {
        let ids = column(vec!["7".into(), 7.0.into(), 0.0.into(), "x".into()]);
        let tags = column(vec!["a".into(), "A".into(), "a".into(), CellValue::Error(CellError::new_na())]);
        let cols = [&ids, &tags];
        let table = scan(
            &ScanColumns {
                kind: AggregateKind::MatchAll,
                keys: &cols,
                values: None,
            },
            None,
            usize::MAX,
        );
        assert_eq!(table.len(), 2);
        let number: KeyTuple = SmallVec::from_vec(vec![
            CriteriaKey::number(7.0),
            CriteriaKey::Text("a".into()),
        ]);
        assert_eq!(table[&number].first_row, Some(1));
        let text: KeyTuple = SmallVec::from_vec(vec![
            CriteriaKey::Text("7".into()),
            CriteriaKey::Text("a".into()),
        ]);
        assert_eq!(table[&text].first_row, Some(0));
    }

    #[test]
    fn parallel_scan_matches_sequential() {
        let n = 20_000u32;
        let keys = column((0..n).map(|i| CellValue::Number((i % 37) as f64)).collect());
        let values = column((0..n).map(|i| CellValue::Number(i as f64)).collect());
        let cols = [&keys];
        let columns = ScanColumns {
            kind: AggregateKind::Average,
            keys: &cols,
            values: Some(&values),
        };
        let pool = ThreadPoolBuilder::new().num_threads(4).build().unwrap();
        let seq = scan(&columns, None, usize::MAX);
        let par = scan(&columns, Some(&pool), 1024);
        assert_eq!(seq.len(), par.len());
        for (k, a) in &seq {
            let b = &par[k];
            assert_eq!(
                (a.sum, a.numeric, a.rows, a.first_row),
                (b.sum, b.numeric, b.rows, b.first_row)
            );
        }
    }
}
