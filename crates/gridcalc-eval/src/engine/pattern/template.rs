//! Recognition of aggregate formulas the optimizer can batch.

use smallvec::SmallVec;

use gridcalc_common::{CellValue, RangeArea, SheetId};
use gridcalc_parse::{call_shape, CallArg, CallShape, ParsedReference};

use crate::engine::node::CellId;
use crate::engine::sheet_registry::SheetRegistry;

/// What a batched scan accumulates per criteria key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Sum,
    Average,
    Count,
    /// Position of the first exact match.
    Match,
    /// Value at the first exact match.
    Index,
    /// Position of the first row where every `range=value` equality holds.
    MatchAll,
    /// Value at that row.
    IndexAll,
}

impl AggregateKind {
    /// Keys compare under the `=` operator instead of criteria matching.
    pub fn uses_equality(self) -> bool {
        matches!(self, AggregateKind::MatchAll | AggregateKind::IndexAll)
    }
}

/// A single-column range on a resolved sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetRange {
    pub sheet: SheetId,
    pub area: RangeArea,
}

/// A per-formula criteria or lookup argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Cell(CellId),
    Literal(CellValue),
}

/// Group identity: formulas with equal keys share one scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub kind: AggregateKind,
    pub values: Option<TargetRange>,
    pub keys: SmallVec<[TargetRange; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternTemplate {
    pub kind: AggregateKind,
    /// Summed, averaged or returned column.
    pub values: Option<TargetRange>,
    /// Criteria or lookup columns, paired with `operands`.
    pub keys: SmallVec<[TargetRange; 2]>,
    pub operands: SmallVec<[Operand; 2]>,
    /// Literal from an `IFERROR(.., fallback)` wrapper.
    pub fallback: Option<CellValue>,
}

impl PatternTemplate {
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            kind: self.kind,
            values: self.values,
            keys: self.keys.clone(),
        }
    }

    /// First and last row shared by every target column.
    pub fn rows(&self) -> (u32, u32) {
        let area = self.keys[0].area;
        (area.start_row, area.end_row)
    }
}

type KeyedOperands = (SmallVec<[TargetRange; 2]>, SmallVec<[Operand; 2]>);

struct Resolver<'a> {
    sheet: SheetId,
    registry: &'a SheetRegistry,
}

impl Resolver<'_> {
    fn sheet_of(&self, r: &ParsedReference) -> Option<SheetId> {
        match &r.sheet {
            None => Some(self.sheet),
            Some(name) => self.registry.get_id(name),
        }
    }

    fn target(&self, arg: &CallArg) -> Option<TargetRange> {
        self.target_of(arg.as_reference()?)
    }

    fn target_of(&self, r: &ParsedReference) -> Option<TargetRange> {
        if !r.is_absolute() {
            return None;
        }
        let area = r.area();
        if area.width() != 1 {
            return None;
        }
        Some(TargetRange {
            sheet: self.sheet_of(r)?,
            area,
        })
    }

    fn operand(&self, arg: &CallArg) -> Option<Operand> {
        match arg {
            CallArg::Literal(v) => Some(Operand::Literal(v.clone())),
            CallArg::Reference(r) => {
                let addr = r.cell()?;
                Some(Operand::Cell(CellId::new(self.sheet_of(r)?, addr)))
            }
            _ => None,
        }
    }

    /// `args` read as one or two `(range, criterion)` pairs.
    fn criteria_pairs(&self, args: &[CallArg]) -> Option<KeyedOperands> {
        if args.is_empty() || args.len() % 2 != 0 || args.len() > 4 {
            return None;
        }
        let mut keys = SmallVec::new();
        let mut operands = SmallVec::new();
        for pair in args.chunks(2) {
            keys.push(self.target(&pair[0])?);
            operands.push(self.operand(&pair[1])?);
        }
        Some((keys, operands))
    }

    fn conditions(&self, conditions: &[(ParsedReference, CallArg)]) -> Option<KeyedOperands> {
        let mut keys = SmallVec::new();
        let mut operands = SmallVec::new();
        for (range, value) in conditions {
            keys.push(self.target_of(range)?);
            operands.push(self.operand(value)?);
        }
        Some((keys, operands))
    }
}

/// Template of `formula` on `sheet`, or `None` when it is not batchable.
///
/// Every target range must be an absolute single-column reference and all
/// of them must span the same rows.
pub fn detect_template(
    formula: &str,
    sheet: SheetId,
    registry: &SheetRegistry,
) -> Option<PatternTemplate> {
    let shape = call_shape(formula)?;
    let (inner, fallback) = match shape.name.as_str() {
        "IFERROR" if shape.args.len() == 2 => match &shape.args[1] {
            CallArg::Literal(v) => (shape.args[0].as_call()?, Some(v.clone())),
            _ => return None,
        },
        _ => (&shape, None),
    };
    let resolver = Resolver { sheet, registry };
    let mut template = match_shape(inner, &resolver)?;
    template.fallback = fallback;

    let (start, end) = template.rows();
    let aligned = template
        .keys
        .iter()
        .chain(template.values.iter())
        .all(|t| t.area.start_row == start && t.area.end_row == end);
    aligned.then_some(template)
}

fn match_shape(call: &CallShape, r: &Resolver<'_>) -> Option<PatternTemplate> {
    let args = call.args.as_slice();
    let build = |kind: AggregateKind,
                 values: Option<TargetRange>,
                 (keys, operands): KeyedOperands| {
        Some(PatternTemplate {
            kind,
            values,
            keys,
            operands,
            fallback: None,
        })
    };
    match call.name.as_str() {
        "SUMIFS" | "AVERAGEIFS" => {
            let kind = if call.name == "SUMIFS" {
                AggregateKind::Sum
            } else {
                AggregateKind::Average
            };
            let (first, rest) = args.split_first()?;
            build(kind, Some(r.target(first)?), r.criteria_pairs(rest)?)
        }
        "COUNTIFS" => build(AggregateKind::Count, None, r.criteria_pairs(args)?),
        "SUMIF" | "AVERAGEIF" => {
            let kind = if call.name == "SUMIF" {
                AggregateKind::Sum
            } else {
                AggregateKind::Average
            };
            if !(2..=3).contains(&args.len()) {
                return None;
            }
            let pairs = r.criteria_pairs(&args[..2])?;
            let values = match args.get(2) {
                Some(v) => r.target(v)?,
                None => pairs.0[0],
            };
            build(kind, Some(values), pairs)
        }
        "COUNTIF" if args.len() == 2 => build(AggregateKind::Count, None, r.criteria_pairs(args)?),
        "MATCH" => {
            if let Some(conditions) = every_match_args(args) {
                return build(AggregateKind::MatchAll, None, r.conditions(conditions)?);
            }
            let (lookup, range) = exact_match_args(args)?;
            build(
                AggregateKind::Match,
                None,
                (
                    SmallVec::from_elem(r.target(range)?, 1),
                    SmallVec::from_elem(r.operand(lookup)?, 1),
                ),
            )
        }
        "INDEX" if args.len() == 2 => {
            let inner = args[1].as_call()?;
            if inner.name != "MATCH" {
                return None;
            }
            if let Some(conditions) = every_match_args(&inner.args) {
                return build(
                    AggregateKind::IndexAll,
                    Some(r.target(&args[0])?),
                    r.conditions(conditions)?,
                );
            }
            let (lookup, range) = exact_match_args(&inner.args)?;
            build(
                AggregateKind::Index,
                Some(r.target(&args[0])?),
                (
                    SmallVec::from_elem(r.target(range)?, 1),
                    SmallVec::from_elem(r.operand(lookup)?, 1),
                ),
            )
        }
        _ => None,
    }
}

/// Conditions of `MATCH(1, (range=value)*(range=value), 0)`.
fn every_match_args(args: &[CallArg]) -> Option<&[(ParsedReference, CallArg)]> {
    match args {
        [
            CallArg::Literal(CellValue::Number(one)),
            conditions,
            CallArg::Literal(CellValue::Number(zero)),
        ] if *one == 1.0 && *zero == 0.0 => conditions.as_conditions(),
        _ => None,
    }
}

/// `(lookup, range)` of `MATCH(lookup, range, 0)`.
fn exact_match_args(args: &[CallArg]) -> Option<(&CallArg, &CallArg)> {
    match args {
        [lookup, range, CallArg::Literal(CellValue::Number(n))] if *n == 0.0 => Some((lookup, range)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::CellAddr;

    fn registry() -> SheetRegistry {
        let mut reg = SheetRegistry::new();
        reg.id_for("Sheet1");
        reg.id_for("Data");
        reg
    }

    #[test]
    fn detects_sumifs_with_two_criteria() {
        let reg = registry();
        let t = detect_template("=SUMIFS(Data!$C:$C, Data!$A:$A, A2, Data!$B:$B, \"x\")", 0, &reg)
            .unwrap();
        assert_eq!(t.kind, AggregateKind::Sum);
        assert_eq!(t.values.unwrap().sheet, 1);
        assert_eq!(t.keys.len(), 2);
        assert_eq!(t.operands[0], Operand::Cell(CellId::new(0, CellAddr::new(2, 1))));
        assert_eq!(t.operands[1], Operand::Literal(CellValue::Text("x".into())));
        assert!(t.fallback.is_none());
    }

    #[test]
    fn sumif_without_sum_range_sums_the_criteria_column() {
        let reg = registry();
        let t = detect_template("=SUMIF($A$1:$A$50, D1)", 0, &reg).unwrap();
        assert_eq!(t.values, Some(t.keys[0]));
    }

    #[test]
    fn detects_wrapped_index_match() {
        let reg = registry();
        let t = detect_template("=IFERROR(INDEX($C:$C, MATCH(E2, $A:$A, 0)), \"none\")", 0, &reg)
            .unwrap();
        assert_eq!(t.kind, AggregateKind::Index);
        assert_eq!(t.fallback, Some(CellValue::Text("none".into())));
        assert_eq!(t.values.unwrap().area, RangeArea::whole_columns(3, 3));
    }

    #[test]
    fn detects_multi_condition_lookups() {
        let reg = registry();
        let t = detect_template(
            "=IFERROR(INDEX(Data!$C:$C, MATCH(1, (Data!$A:$A=A2)*(Data!$B:$B=\"x\"), 0)), \"\")",
            0,
            &reg,
        )
        .unwrap();
        assert_eq!(t.kind, AggregateKind::IndexAll);
        assert_eq!(t.keys.len(), 2);
        assert_eq!(t.keys[1].area, RangeArea::whole_columns(2, 2));
        assert_eq!(t.operands[0], Operand::Cell(CellId::new(0, CellAddr::new(2, 1))));
        assert_eq!(t.fallback, Some(CellValue::Text(String::new())));

        let m = detect_template("=MATCH(1, ($A$1:$A$9=D1)*($B$1:$B$9=E1), 0)", 0, &reg).unwrap();
        assert_eq!(m.kind, AggregateKind::MatchAll);
        assert!(m.values.is_none());
        assert!(m.kind.uses_equality());

        assert!(detect_template("=MATCH(1, ($A$1:$A$9=D1)*($B$2:$B$10=E1), 0)", 0, &reg).is_none());
        assert!(detect_template("=MATCH(2, ($A:$A=D1)*($B:$B=E1), 0)", 0, &reg).is_none());
        assert!(detect_template("=MATCH(1, (A:A=D1)*($B:$B=E1), 0)", 0, &reg).is_none());
    }

    #[test]
    fn rejects_relative_misaligned_and_approximate_shapes() {
        let reg = registry();
        assert!(detect_template("=SUMIFS(C:C, A:A, E2)", 0, &reg).is_none());
        assert!(detect_template("=SUMIFS($C$1:$C$9, $A$2:$A$10, E2)", 0, &reg).is_none());
        assert!(detect_template("=MATCH(E2, $A:$A, 1)", 0, &reg).is_none());
        assert!(detect_template("=SUMIFS($C:$D, $A:$A, E2)", 0, &reg).is_none());
        assert!(detect_template("=SUMIFS($C:$C, $A:$A, E2:E3)", 0, &reg).is_none());
        assert!(detect_template("=SUMIFS($C:$C, Nope!$A:$A, E2)", 0, &reg).is_none());
        assert!(detect_template("=SUMIFS($C:$C, $A:$A, E2)+1", 0, &reg).is_none());
    }
}
