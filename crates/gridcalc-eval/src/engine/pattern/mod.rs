//! Batched evaluation of structurally repeated aggregate formulas.
//!
//! Thousands of `SUMIFS($C:$C, $A:$A, A2)`-style formulas that differ only
//! in their criteria cell are answered from one scan of the target columns
//! plus a hash lookup per formula. Anything the hash path cannot answer
//! exactly falls back to per-cell evaluation by the scheduler.

mod scan;
mod template;

use std::sync::Arc;

use rayon::ThreadPool;
use rustc_hash::FxHashMap;

use gridcalc_common::{
    CellError, CellValue, CriteriaKey, Criterion, HashLookup, RangeData, has_wildcard,
};

use super::cache::CacheView;
use super::graph::DependencyGraph;
use super::node::NodeId;
use scan::{Acc, KeyTuple, ScanColumns, ScanTable, scan};

pub use template::{
    AggregateKind, GroupKey, Operand, PatternTemplate, TargetRange, detect_template,
};

#[derive(Debug, Clone, PartialEq)]
pub struct PatternConfig {
    pub enabled: bool,
    /// Groups smaller than this are left to per-cell evaluation.
    pub min_group_size: usize,
    /// Scans with at least this many rows are partitioned across the pool.
    pub parallel_scan_min_rows: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_group_size: 10,
            parallel_scan_min_rows: 8192,
        }
    }
}

#[derive(Debug, Default)]
pub struct PatternOutcome {
    pub resolved: Vec<(NodeId, CellValue)>,
    pub groups_run: usize,
    /// Members of executed groups that still need per-cell evaluation.
    pub fallbacks: usize,
}

pub struct PatternOptimizer<'a> {
    graph: &'a DependencyGraph,
    config: &'a PatternConfig,
    pool: Option<&'a ThreadPool>,
}

impl<'a> PatternOptimizer<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        config: &'a PatternConfig,
        pool: Option<&'a ThreadPool>,
    ) -> Self {
        Self {
            graph,
            config,
            pool,
        }
    }

    /// Resolve every candidate in `nodes` that belongs to a large enough
    /// group. `eligible` filters out nodes that must not be evaluated at all
    /// (circular, timed-out or poisoned inputs).
    pub fn resolve(
        &self,
        nodes: &[NodeId],
        view: &CacheView,
        eligible: impl Fn(NodeId) -> bool,
    ) -> PatternOutcome {
        let mut outcome = PatternOutcome::default();
        if !self.config.enabled {
            return outcome;
        }

        let mut groups: FxHashMap<GroupKey, Vec<(NodeId, Arc<PatternTemplate>)>> =
            FxHashMap::default();
        for &id in nodes {
            let Some(formula) = self.graph.node(id).as_formula() else {
                continue;
            };
            if let Some(template) = &formula.template
                && eligible(id)
            {
                groups
                    .entry(template.group_key())
                    .or_default()
                    .push((id, template.clone()));
            }
        }
        groups.retain(|_, members| members.len() >= self.config.min_group_size.max(1));
        if groups.is_empty() {
            return outcome;
        }

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("pattern_optimize", groups = groups.len()).entered();

        for (key, members) in groups {
            let keys: Vec<Arc<RangeData>> = key
                .keys
                .iter()
                .map(|t| view.range_values(t.sheet, t.area))
                .collect();
            let values = key.values.map(|t| view.range_values(t.sheet, t.area));
            let key_refs: Vec<&RangeData> = keys.iter().map(|k| k.as_ref()).collect();
            let table = scan(
                &ScanColumns {
                    kind: key.kind,
                    keys: &key_refs,
                    values: values.as_deref(),
                },
                self.pool,
                self.config.parallel_scan_min_rows,
            );

            for (id, template) in &members {
                match answer(template, &table, values.as_deref(), view) {
                    Some(v) => outcome.resolved.push((*id, v)),
                    None => outcome.fallbacks += 1,
                }
            }
            outcome.groups_run += 1;

            #[cfg(feature = "tracing")]
            tracing::debug!(
                kind = ?key.kind,
                members = members.len(),
                distinct_keys = table.len(),
                fallbacks = outcome.fallbacks,
                "pattern group scanned"
            );
        }
        outcome
    }
}

fn operand_value(op: &Operand, view: &CacheView) -> CellValue {
    match op {
        Operand::Cell(cell) => view.cell_value(*cell),
        Operand::Literal(v) => v.clone(),
    }
}

/// The member's value, or `None` when equality hashing cannot answer it.
fn answer(
    template: &PatternTemplate,
    table: &ScanTable,
    values: Option<&RangeData>,
    view: &CacheView,
) -> Option<CellValue> {
    let raw = match template.kind {
        AggregateKind::Match | AggregateKind::Index => lookup(template, table, values, view)?,
        AggregateKind::MatchAll | AggregateKind::IndexAll => {
            lookup_all(template, table, values, view)?
        }
        kind => {
            let mut key = KeyTuple::new();
            let mut no_match = false;
            for op in &template.operands {
                let criterion = Criterion::parse(&operand_value(op, view));
                match criterion.hash_lookup() {
                    HashLookup::Key(k) => key.push(k.clone()),
                    HashLookup::NoMatch => no_match = true,
                    HashLookup::Unsupported => return None,
                }
            }
            let empty = Acc::default();
            let acc = if no_match {
                &empty
            } else {
                table.get(&key).unwrap_or(&empty)
            };
            finish(kind, acc)
        }
    };
    Some(match (&raw, &template.fallback) {
        (CellValue::Error(_), Some(fallback)) => fallback.clone(),
        _ => raw,
    })
}

fn lookup(
    template: &PatternTemplate,
    table: &ScanTable,
    values: Option<&RangeData>,
    view: &CacheView,
) -> Option<CellValue> {
    let needle = operand_value(template.operands.first()?, view);
    if let CellValue::Error(e) = &needle {
        return Some(CellValue::Error(e.clone()));
    }
    if let CellValue::Text(s) = &needle
        && has_wildcard(s)
    {
        return None;
    }
    let Some(key) = CriteriaKey::from_cell(&needle) else {
        return Some(CellError::new_na().into());
    };
    let key: KeyTuple = KeyTuple::from_elem(key, 1);
    Some(found(template.kind, table, &key, values))
}

/// `MATCH(1, (a=x)*(b=y), 0)`: an error lookup value turns every factor
/// into an error, so nothing matches.
fn lookup_all(
    template: &PatternTemplate,
    table: &ScanTable,
    values: Option<&RangeData>,
    view: &CacheView,
) -> Option<CellValue> {
    let mut key = KeyTuple::new();
    let mut no_match = false;
    for op in &template.operands {
        match operand_value(op, view) {
            CellValue::Error(_) => no_match = true,
            v => key.push(CriteriaKey::for_equality(&v)?),
        }
    }
    if no_match {
        return Some(CellError::new_na().into());
    }
    Some(found(template.kind, table, &key, values))
}

fn found(
    kind: AggregateKind,
    table: &ScanTable,
    key: &KeyTuple,
    values: Option<&RangeData>,
) -> CellValue {
    let Some(row) = table.get(key).and_then(|acc| acc.first_row) else {
        return CellError::new_na().into();
    };
    match kind {
        AggregateKind::Index | AggregateKind::IndexAll => match values.map(|v| v.get(row, 0)) {
            Some(CellValue::Empty) | None => CellValue::Number(0.0),
            Some(v) => v.clone(),
        },
        _ => CellValue::Number(f64::from(row) + 1.0),
    }
}

fn finish(kind: AggregateKind, acc: &Acc) -> CellValue {
    if let Some((_, err)) = &acc.error {
        return CellValue::Error(err.clone());
    }
    match kind {
        AggregateKind::Sum => CellValue::Number(acc.sum),
        AggregateKind::Average => {
            if acc.numeric == 0 {
                CellError::new_div().into()
            } else {
                CellValue::Number(acc.sum / acc.numeric as f64)
            }
        }
        AggregateKind::Count => CellValue::Number(acc.rows as f64),
        AggregateKind::Match
        | AggregateKind::Index
        | AggregateKind::MatchAll
        | AggregateKind::IndexAll => CellError::new_na().into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_handles_empty_groups() {
        let empty = Acc::default();
        assert_eq!(finish(AggregateKind::Sum, &empty), CellValue::Number(0.0));
        assert_eq!(finish(AggregateKind::Count, &empty), CellValue::Number(0.0));
        assert!(finish(AggregateKind::Average, &empty).is_error());
    }

    #[test]
    fn finish_propagates_values_column_errors() {
        let acc = Acc {
            sum: 3.0,
            numeric: 2,
            rows: 3,
            first_row: Some(0),
            error: Some((1, CellError::new_value())),
        };
        assert_eq!(
            finish(AggregateKind::Sum, &acc),
            CellValue::Error(CellError::new_value())
        );
        let clean = Acc { error: None, ..acc };
        assert_eq!(finish(AggregateKind::Average, &clean), CellValue::Number(1.5));
    }
}
