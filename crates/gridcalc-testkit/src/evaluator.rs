//! A small reference evaluator for tests and benches.
//!
//! Supports arithmetic, comparison and concatenation operators, cell and
//! range references (including other sheets) and a handful of functions:
//! `SUM`, `COUNT`, `IF`, `IFERROR`, the conditional aggregates
//! (`SUMIF(S)`, `AVERAGEIF(S)`, `COUNTIF(S)`), exact `MATCH` (also over an
//! element-wise array such as `(A:A=x)*(B:B=y)`), `INDEX`,
//! plus `SLEEP(ms)` and `PANIC()` for exercising failure handling.
//!
//! Criteria matching goes through [`Criterion`], the same definition the
//! batched aggregate path uses.

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use gridcalc_common::{
    CellError, CellReader, CellValue, CriteriaKey, Criterion, EmptyTextPolicy, EvalFailure,
    EvalRequest, ErrorKind, FormulaEvaluator, RangeData, has_wildcard, wildcard_match,
};
use gridcalc_parse::{
    Associativity, ParsedReference, Token, TokenSubType, TokenType, Tokenizer, parse_reference,
};

#[derive(Debug, Clone)]
enum Expr {
    Value(CellValue),
    Ref(ParsedReference),
    Prefix(String, Box<Expr>),
    Percent(Box<Expr>),
    Infix(String, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/* ─────────────── parsing ─────────────── */

struct Parser<'t> {
    tokens: Vec<&'t Token>,
    pos: usize,
}

fn unsupported(msg: impl Into<String>) -> EvalFailure {
    EvalFailure::Unsupported(msg.into())
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<&'t Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr, EvalFailure> {
        let mut lhs = self.primary()?;
        while let Some(t) = self.peek() {
            if !t.is_operator() {
                break;
            }
            let Some((bp, assoc)) = t.precedence() else {
                return Err(unsupported(format!("operator {}", t.value)));
            };
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            if t.token_type == TokenType::OpPostfix {
                lhs = Expr::Percent(Box::new(lhs));
                continue;
            }
            let next_bp = match assoc {
                Associativity::Left => bp + 1,
                Associativity::Right => bp,
            };
            let rhs = self.expr(next_bp)?;
            lhs = Expr::Infix(t.value.clone(), Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn primary(&mut self) -> Result<Expr, EvalFailure> {
        let t = self.next().ok_or_else(|| unsupported("unexpected end of formula"))?;
        match t.token_type {
            TokenType::OpPrefix => {
                let operand = self.expr(7)?;
                Ok(Expr::Prefix(t.value.clone(), Box::new(operand)))
            }
            TokenType::Operand => operand(t),
            TokenType::Func if t.is_open() => {
                let name = t.func_name().unwrap_or_default();
                let args = self.args()?;
                Ok(Expr::Call(name, args))
            }
            TokenType::Paren if t.is_open() => {
                let inner = self.expr(0)?;
                match self.next() {
                    Some(close) if close.is_close() => Ok(inner),
                    _ => Err(unsupported("unbalanced parenthesis")),
                }
            }
            _ => Err(unsupported(format!("unexpected token {}", t.value))),
        }
    }

    fn args(&mut self) -> Result<Vec<Expr>, EvalFailure> {
        let mut args = Vec::new();
        if self.peek().is_some_and(|t| t.is_close()) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            let arg = match self.peek() {
                Some(t) if is_arg_sep(t) || t.is_close() => Expr::Value(CellValue::Empty),
                _ => self.expr(0)?,
            };
            args.push(arg);
            match self.next() {
                Some(t) if is_arg_sep(t) => continue,
                Some(t) if t.is_close() => return Ok(args),
                _ => return Err(unsupported("unterminated argument list")),
            }
        }
    }
}

fn is_arg_sep(t: &Token) -> bool {
    t.token_type == TokenType::Sep && t.subtype == TokenSubType::Arg
}

fn operand(t: &Token) -> Result<Expr, EvalFailure> {
    let value = match t.subtype {
        TokenSubType::Number => CellValue::Number(
            t.value
                .parse()
                .map_err(|_| unsupported(format!("number {}", t.value)))?,
        ),
        TokenSubType::Text => {
            let inner = &t.value[1..t.value.len() - 1];
            CellValue::Text(inner.replace("\"\"", "\""))
        }
        TokenSubType::Logical => CellValue::Boolean(t.value.eq_ignore_ascii_case("TRUE")),
        TokenSubType::Error => {
            CellValue::Error(ErrorKind::parse(&t.value).unwrap_or(ErrorKind::Ref).into())
        }
        _ => {
            return parse_reference(&t.value)
                .map(Expr::Ref)
                .map_err(|e| unsupported(e.to_string()));
        }
    };
    Ok(Expr::Value(value))
}

fn parse(formula: &str) -> Result<Expr, EvalFailure> {
    let tokenizer = Tokenizer::new(formula).map_err(|e| unsupported(e.to_string()))?;
    let mut parser = Parser {
        tokens: tokenizer.significant().collect(),
        pos: 0,
    };
    let expr = parser.expr(0)?;
    if parser.pos != parser.tokens.len() {
        return Err(unsupported("trailing tokens"));
    }
    Ok(expr)
}

/* ─────────────── evaluation ─────────────── */

enum Val {
    Scalar(CellValue),
    Range(Arc<RangeData>),
}

struct Ctx<'a> {
    request: &'a EvalRequest,
    reader: &'a dyn CellReader,
}

type EvalResult<T> = Result<T, EvalFailure>;

impl Ctx<'_> {
    fn policy(&self) -> EmptyTextPolicy {
        self.request.empty_text_policy
    }

    fn sheet<'r>(&'r self, r: &'r ParsedReference) -> &'r str {
        r.sheet_or(&self.request.sheet)
    }

    fn eval(&self, expr: &Expr) -> EvalResult<Val> {
        Ok(match expr {
            Expr::Value(v) => Val::Scalar(v.clone()),
            Expr::Ref(r) => match r.cell() {
                Some(addr) => Val::Scalar(self.reader.cell(self.sheet(r), addr)?),
                None => Val::Range(self.reader.range(self.sheet(r), r.area())?),
            },
            Expr::Prefix(op, inner) => {
                let n = match self.number(inner)? {
                    Ok(n) => n,
                    Err(e) => return Ok(Val::Scalar(e.into())),
                };
                Val::Scalar(CellValue::Number(if op == "-" { -n } else { n }))
            }
            Expr::Percent(inner) => Val::Scalar(match self.number(inner)? {
                Ok(n) => CellValue::Number(n / 100.0),
                Err(e) => e.into(),
            }),
            Expr::Infix(op, lhs, rhs) => Val::Scalar(self.infix(op, lhs, rhs)?),
            Expr::Call(name, args) => Val::Scalar(self.call(name, args)?),
        })
    }

    /// A single value; ranges are not valid here.
    fn scalar(&self, expr: &Expr) -> EvalResult<CellValue> {
        match self.eval(expr)? {
            Val::Scalar(v) => Ok(v),
            Val::Range(_) => Ok(CellError::new_value()
                .with_message("range used where a single value is required")
                .into()),
        }
    }

    /// A scalar coerced to a number. The inner error is a spreadsheet error
    /// value, the outer one an evaluator fault.
    fn number(&self, expr: &Expr) -> EvalResult<Result<f64, CellError>> {
        Ok(self.scalar(expr)?.coerce_number(self.policy()))
    }

    /// A range argument; single cells are read as one-cell ranges.
    fn range(&self, expr: &Expr) -> EvalResult<Arc<RangeData>> {
        match expr {
            Expr::Ref(r) => Ok(self.reader.range(self.sheet(r), r.area())?),
            _ => Err(unsupported("expected a range reference")),
        }
    }

    /// Element-wise value of an array expression such as `(A1:A9=B1)*C1:C9`.
    /// A single value broadcasts; elements past the end of the shorter
    /// operand are `#N/A`.
    fn array(&self, expr: &Expr) -> EvalResult<Vec<CellValue>> {
        match expr {
            Expr::Ref(r) if r.cell().is_none() => Ok(self.range(expr)?.values().to_vec()),
            Expr::Infix(op, lhs, rhs) => {
                let a = self.array(lhs)?;
                let b = self.array(rhs)?;
                let len = a.len().max(b.len());
                let element = |items: &[CellValue], i: usize| match items {
                    [single] => single.clone(),
                    _ => items
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| CellError::new_na().into()),
                };
                (0..len)
                    .map(|i| self.binary(op, element(&a, i), element(&b, i)))
                    .collect()
            }
            other => Ok(vec![self.scalar(other)?]),
        }
    }

    fn infix(&self, op: &str, lhs: &Expr, rhs: &Expr) -> EvalResult<CellValue> {
        let a = self.scalar(lhs)?;
        let b = self.scalar(rhs)?;
        self.binary(op, a, b)
    }

    fn binary(&self, op: &str, a: CellValue, b: CellValue) -> EvalResult<CellValue> {
        if let CellValue::Error(e) = &a {
            return Ok(CellValue::Error(e.clone()));
        }
        if let CellValue::Error(e) = &b {
            return Ok(CellValue::Error(e.clone()));
        }
        if op == "&" {
            return Ok(CellValue::Text(format!("{}{}", text_of(&a), text_of(&b))));
        }
        if let Some(holds) = compare_op(op, compare(&a, &b)) {
            return Ok(CellValue::Boolean(holds));
        }
        let (x, y) = match (a.coerce_number(self.policy()), b.coerce_number(self.policy())) {
            (Ok(x), Ok(y)) => (x, y),
            (Err(e), _) | (_, Err(e)) => return Ok(e.into()),
        };
        Ok(match op {
            "+" => CellValue::Number(x + y),
            "-" => CellValue::Number(x - y),
            "*" => CellValue::Number(x * y),
            "/" if y == 0.0 => CellError::new_div().into(),
            "/" => CellValue::Number(x / y),
            "^" => CellValue::Number(x.powf(y)),
            other => return Err(unsupported(format!("operator {other}"))),
        })
    }

    fn call(&self, name: &str, args: &[Expr]) -> EvalResult<CellValue> {
        match name {
            "SUM" => self.sum(args),
            "COUNT" => self.count(args),
            "IF" => {
                let [cond, rest @ ..] = args else {
                    return Err(unsupported("IF needs a condition"));
                };
                let cond = self.scalar(cond)?;
                if let CellValue::Error(e) = cond {
                    return Ok(e.into());
                }
                let branch = if cond.is_truthy() {
                    rest.first()
                } else {
                    rest.get(1)
                };
                match branch {
                    Some(b) => self.top(b),
                    None => Ok(CellValue::Boolean(false)),
                }
            }
            "IFERROR" => {
                let [value, fallback] = args else {
                    return Err(unsupported("IFERROR takes two arguments"));
                };
                match self.top(value)? {
                    CellValue::Error(_) => self.top(fallback),
                    v => Ok(v),
                }
            }
            "SUMIFS" | "AVERAGEIFS" => {
                let (values, pairs) = args
                    .split_first()
                    .ok_or_else(|| unsupported(format!("{name} needs arguments")))?;
                let kind = if name == "SUMIFS" { Agg::Sum } else { Agg::Average };
                self.conditional(kind, Some(self.range(values)?), pairs)
            }
            "COUNTIFS" => self.conditional(Agg::Count, None, args),
            "SUMIF" | "AVERAGEIF" => {
                if !(2..=3).contains(&args.len()) {
                    return Err(unsupported(format!("{name} takes two or three arguments")));
                }
                let values = self.range(args.get(2).unwrap_or(&args[0]))?;
                let kind = if name == "SUMIF" { Agg::Sum } else { Agg::Average };
                self.conditional(kind, Some(values), &args[..2])
            }
            "COUNTIF" if args.len() == 2 => self.conditional(Agg::Count, None, args),
            "MATCH" => self.exact_match(args),
            "INDEX" => self.index(args),
            "SLEEP" => {
                let ms = match self.number(args.first().unwrap_or(&Expr::Value(0.0.into())))? {
                    Ok(ms) => ms,
                    Err(e) => return Ok(e.into()),
                };
                thread::sleep(Duration::from_millis(ms.max(0.0) as u64));
                Ok(CellValue::Number(ms))
            }
            "PANIC" => panic!("PANIC() called in {}", self.request.addr),
            other => Err(unsupported(format!("unknown function {other}"))),
        }
    }

    /// Top-level value of an expression: a reference to an empty cell reads
    /// as zero.
    fn top(&self, expr: &Expr) -> EvalResult<CellValue> {
        Ok(match self.scalar(expr)? {
            CellValue::Empty => CellValue::Number(0.0),
            v => v,
        })
    }

    fn sum(&self, args: &[Expr]) -> EvalResult<CellValue> {
        let mut total = 0.0;
        for arg in args {
            match self.eval(arg)? {
                Val::Scalar(v) => match v.coerce_number(self.policy()) {
                    Ok(n) => total += n,
                    Err(e) => return Ok(e.into()),
                },
                Val::Range(data) => {
                    for v in data.values() {
                        match v {
                            CellValue::Number(n) => total += n,
                            CellValue::Error(e) => return Ok(e.clone().into()),
                            _ => {}
                        }
                    }
                }
            }
        }
        Ok(CellValue::Number(total))
    }

    fn count(&self, args: &[Expr]) -> EvalResult<CellValue> {
        let mut n = 0usize;
        for arg in args {
            match self.eval(arg)? {
                Val::Scalar(v) => n += usize::from(matches!(v, CellValue::Number(_))),
                Val::Range(data) => {
                    n += data
                        .values()
                        .iter()
                        .filter(|v| matches!(v, CellValue::Number(_)))
                        .count()
                }
            }
        }
        Ok(CellValue::Number(n as f64))
    }

    fn conditional(
        &self,
        kind: Agg,
        values: Option<Arc<RangeData>>,
        pairs: &[Expr],
    ) -> EvalResult<CellValue> {
        if pairs.is_empty() || pairs.len() % 2 != 0 {
            return Err(unsupported("criteria must come in range/criterion pairs"));
        }
        let mut criteria = Vec::with_capacity(pairs.len() / 2);
        for pair in pairs.chunks(2) {
            let range = self.range(&pair[0])?;
            let criterion = Criterion::parse(&self.scalar(&pair[1])?);
            criteria.push((range, criterion));
        }
        let rows = criteria.iter().map(|(r, _)| r.rows()).max().unwrap_or(0);

        let (mut sum, mut numeric, mut matched) = (0.0, 0usize, 0usize);
        for row in 0..rows {
            if !criteria.iter().all(|(r, c)| c.matches(r.get(row, 0))) {
                continue;
            }
            matched += 1;
            if kind == Agg::Count {
                continue;
            }
            match values.as_deref().map(|v| v.get(row, 0)) {
                Some(CellValue::Number(n)) => {
                    sum += n;
                    numeric += 1;
                }
                Some(CellValue::Error(e)) => return Ok(e.clone().into()),
                _ => {}
            }
        }
        Ok(match kind {
            Agg::Sum => CellValue::Number(sum),
            Agg::Count => CellValue::Number(matched as f64),
            Agg::Average if numeric == 0 => CellError::new_div().into(),
            Agg::Average => CellValue::Number(sum / numeric as f64),
        })
    }

    /// `MATCH(needle, range, 0)`; one-based position of the first match.
    fn exact_match(&self, args: &[Expr]) -> EvalResult<CellValue> {
        let [needle, range, mode] = args else {
            return Err(unsupported("MATCH takes three arguments"));
        };
        if !matches!(self.scalar(mode)?, CellValue::Number(n) if n == 0.0) {
            return Err(unsupported("only exact MATCH is supported"));
        }
        let needle = self.scalar(needle)?;
        if let CellValue::Error(e) = &needle {
            return Ok(e.clone().into());
        }
        let hit = match range {
            Expr::Ref(_) => {
                let data = self.range(range)?;
                find_exact(&needle, (0..data.rows()).map(|row| data.get(row, 0)))
            }
            other => find_exact(&needle, self.array(other)?.iter()),
        };
        Ok(match hit {
            Some(pos) => CellValue::Number(pos as f64 + 1.0),
            None => CellError::new_na().into(),
        })
    }

    /// `INDEX(range, row[, col])`; an empty target reads as zero.
    fn index(&self, args: &[Expr]) -> EvalResult<CellValue> {
        let (range, row, col) = match args {
            [range, row] => (range, row, None),
            [range, row, col] => (range, row, Some(col)),
            _ => return Err(unsupported("INDEX takes two or three arguments")),
        };
        let data = self.range(range)?;
        let row = match self.number(row)? {
            Ok(n) => n,
            Err(e) => return Ok(e.into()),
        };
        let col = match col {
            Some(c) => match self.number(c)? {
                Ok(n) => n,
                Err(e) => return Ok(e.into()),
            },
            None => 1.0,
        };
        let area = data.area();
        if row < 1.0 || col < 1.0 || row > f64::from(area.height()) || col > f64::from(area.width())
        {
            return Ok(CellError::new_ref().into());
        }
        Ok(match data.get(row as u32 - 1, col as u32 - 1) {
            CellValue::Empty => CellValue::Number(0.0),
            v => v.clone(),
        })
    }
}

/// Position of the first item equal to `needle`, with wildcards for text.
fn find_exact<'v>(
    needle: &CellValue,
    mut items: impl Iterator<Item = &'v CellValue>,
) -> Option<usize> {
    match needle {
        CellValue::Text(s) if has_wildcard(s) => {
            let pattern = s.to_lowercase();
            items.position(|v| match v {
                CellValue::Text(t) => wildcard_match(&pattern, &t.to_lowercase()),
                _ => false,
            })
        }
        other => {
            let key = CriteriaKey::from_cell(other)?;
            items.position(|v| CriteriaKey::from_cell(v).as_ref() == Some(&key))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Agg {
    Sum,
    Average,
    Count,
}

fn text_of(v: &CellValue) -> String {
    match v {
        CellValue::Empty => String::new(),
        other => other.to_string(),
    }
}

fn compare_op(op: &str, ord: Ordering) -> Option<bool> {
    Some(match op {
        "=" => ord.is_eq(),
        "<>" => ord.is_ne(),
        "<" => ord.is_lt(),
        "<=" => ord.is_le(),
        ">" => ord.is_gt(),
        ">=" => ord.is_ge(),
        _ => return None,
    })
}

/// Numbers sort before text, text before booleans; empty compares as the
/// other side's zero value.
fn compare(a: &CellValue, b: &CellValue) -> Ordering {
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) | CellValue::Empty => 0,
            CellValue::Text(_) => 1,
            _ => 2,
        }
    }
    match (a, b) {
        (CellValue::Text(x), CellValue::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (CellValue::Text(x), CellValue::Empty) => x.as_str().cmp(""),
        (CellValue::Empty, CellValue::Text(y)) => "".cmp(y.as_str()),
        (CellValue::Boolean(x), CellValue::Boolean(y)) => x.cmp(y),
        _ if rank(a) == 0 && rank(b) == 0 => {
            let x = a.as_number().unwrap_or(0.0);
            let y = b.as_number().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Reference [`FormulaEvaluator`] used by the test suites and benches.
#[derive(Debug, Default, Clone, Copy)]
pub struct MiniEvaluator;

impl MiniEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<dyn FormulaEvaluator> {
        Arc::new(Self)
    }
}

impl FormulaEvaluator for MiniEvaluator {
    fn evaluate(
        &self,
        request: &EvalRequest,
        reader: &dyn CellReader,
    ) -> Result<CellValue, EvalFailure> {
        let expr = parse(&request.formula)?;
        Ctx { request, reader }.top(&expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestWorkbook;
    use gridcalc_common::{CellAddr, RangeArea, WorkbookSource};

    /// Reads straight from a [`TestWorkbook`], clipping ranges to the
    /// populated rows.
    struct Direct<'a>(&'a TestWorkbook);

    impl CellReader for Direct<'_> {
        fn cell(&self, sheet: &str, addr: CellAddr) -> Result<CellValue, CellError> {
            Ok(self.0.raw_value(sheet, addr))
        }

        fn range(&self, sheet: &str, area: RangeArea) -> Result<Arc<RangeData>, CellError> {
            let max_row = self
                .0
                .cells(sheet)
                .map_err(|_| CellError::new_ref())?
                .iter()
                .map(|(a, _)| a.row)
                .max()
                .unwrap_or(0);
            let Some(clipped) = area.clip_rows(max_row) else {
                return Ok(Arc::new(RangeData::empty(area)));
            };
            let values = clipped.cells().map(|a| self.0.raw_value(sheet, a)).collect();
            Ok(Arc::new(RangeData::new(
                area,
                clipped.height(),
                clipped.width(),
                values,
            )))
        }
    }

    fn eval(wb: &TestWorkbook, formula: &str) -> Result<CellValue, EvalFailure> {
        let request = EvalRequest {
            sheet: Arc::from("Sheet1"),
            addr: CellAddr::new(100, 100),
            formula: Arc::from(formula),
            empty_text_policy: EmptyTextPolicy::default(),
        };
        MiniEvaluator.evaluate(&request, &Direct(wb))
    }

    fn sample() -> TestWorkbook {
        TestWorkbook::new()
            .with_value("Sheet1", "A1", "east")
            .with_value("Sheet1", "A2", "west")
            .with_value("Sheet1", "A3", "East")
            .with_value("Sheet1", "B1", 10.0)
            .with_value("Sheet1", "B2", 20.0)
            .with_value("Sheet1", "B3", 5.0)
            .with_value("Data", "A1", 2.0)
    }

    #[test]
    fn arithmetic_and_precedence() {
        let wb = sample();
        assert_eq!(eval(&wb, "=1+2*3").unwrap(), CellValue::Number(7.0));
        assert_eq!(eval(&wb, "=(1+2)*3").unwrap(), CellValue::Number(9.0));
        assert_eq!(eval(&wb, "=-B1+Data!A1^2").unwrap(), CellValue::Number(-6.0));
        assert_eq!(eval(&wb, "=50%").unwrap(), CellValue::Number(0.5));
        assert!(eval(&wb, "=B1/0").unwrap().is_error());
        assert_eq!(eval(&wb, "=A1&\"!\"").unwrap(), CellValue::Text("east!".into()));
        assert_eq!(eval(&wb, "=B2>B1").unwrap(), CellValue::Boolean(true));
    }

    #[test]
    fn empty_reference_reads_as_zero() {
        let wb = sample();
        assert_eq!(eval(&wb, "=Z99").unwrap(), CellValue::Number(0.0));
    }

    #[test]
    fn conditional_aggregates() {
        let wb = sample();
        assert_eq!(
            eval(&wb, "=SUMIFS($B:$B, $A:$A, \"east\")").unwrap(),
            CellValue::Number(15.0)
        );
        assert_eq!(
            eval(&wb, "=AVERAGEIF($A:$A, \"west\", $B:$B)").unwrap(),
            CellValue::Number(20.0)
        );
        assert_eq!(
            eval(&wb, "=COUNTIFS($B:$B, \">=10\")").unwrap(),
            CellValue::Number(2.0)
        );
        assert!(eval(&wb, "=AVERAGEIFS($B:$B, $A:$A, \"north\")").unwrap().is_error());
    }

    #[test]
    fn lookups() {
        let wb = sample();
        assert_eq!(
            eval(&wb, "=MATCH(\"WEST\", $A:$A, 0)").unwrap(),
            CellValue::Number(2.0)
        );
        assert_eq!(
            eval(&wb, "=INDEX($B:$B, MATCH(\"w*\", $A:$A, 0))").unwrap(),
            CellValue::Number(20.0)
        );
        assert_eq!(
            eval(&wb, "=IFERROR(MATCH(\"none\", $A:$A, 0), -1)").unwrap(),
            CellValue::Number(-1.0)
        );
    }

    #[test]
    fn match_over_condition_arrays() {
        let wb = sample();
        assert_eq!(
            eval(&wb, "=MATCH(1, ($A:$A=\"EAST\")*($B:$B=5), 0)").unwrap(),
            CellValue::Number(3.0)
        );
        assert_eq!(
            eval(&wb, "=INDEX($B:$B, MATCH(1, ($A:$A=\"east\")*($B:$B>6), 0))").unwrap(),
            CellValue::Number(10.0)
        );
        assert!(eval(&wb, "=MATCH(1, ($A:$A=\"west\")*($B:$B=5), 0)").unwrap().is_error());
        assert!(eval(&wb, "=MATCH(1, ($A:$A=#N/A)*($B:$B=5), 0)").unwrap().is_error());
    }

    #[test]
    fn faults_are_failures_not_values() {
        let wb = sample();
        assert!(matches!(eval(&wb, "=NOPE(1)"), Err(EvalFailure::Unsupported(_))));
        assert!(matches!(eval(&wb, "=SUM(1"), Err(EvalFailure::Unsupported(_))));
    }
}
