//! Shape extraction for formulas that are a single function call.
//!
//! `=SUMIFS($C:$C, $A:$A, F2)` becomes a [`CallShape`] named `SUMIFS` with
//! three classified arguments. Anything outside the call (`=1+SUM(A1)`) means
//! the formula has no call shape. Nested calls are classified recursively so
//! `IFERROR(INDEX(..., MATCH(...)), 0)` can be recognised.

use smallvec::SmallVec;

use gridcalc_common::{CellValue, ErrorKind};

use crate::reference::{parse_reference, ParsedReference};
use crate::tokenizer::{Token, TokenSubType, TokenType, Tokenizer};

#[derive(Debug, Clone, PartialEq)]
pub enum CallArg {
    Reference(ParsedReference),
    Literal(CellValue),
    Call(Box<CallShape>),
    /// A product of parenthesized equalities, `(A:A=x)*(B:B=y)`, as
    /// `(range, value)` pairs.
    Conditions(Vec<(ParsedReference, CallArg)>),
    /// Any other expression, kept as source text.
    Expr(String),
}

impl CallArg {
    pub fn as_reference(&self) -> Option<&ParsedReference> {
        match self {
            CallArg::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_conditions(&self) -> Option<&[(ParsedReference, CallArg)]> {
        match self {
            CallArg::Conditions(c) => Some(c.as_slice()),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallShape> {
        match self {
            CallArg::Call(c) => Some(&**c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallShape {
    /// Upper-cased function name without the `(`.
    pub name: String,
    pub args: SmallVec<[CallArg; 6]>,
}

/// Shape of `formula` when the whole formula is one function call.
pub fn call_shape(formula: &str) -> Option<CallShape> {
    let tokenizer = Tokenizer::new(formula).ok()?;
    let tokens: Vec<&Token> = tokenizer.significant().collect();
    let (shape, used) = shape_at(&tokens, 0)?;
    (used == tokens.len()).then_some(shape)
}

/// Parse the call opening at `tokens[at]`; returns the shape and the index
/// just past its closer.
fn shape_at(tokens: &[&Token], at: usize) -> Option<(CallShape, usize)> {
    let name = tokens.get(at)?.func_name()?;
    let mut args = SmallVec::new();
    let mut i = at + 1;
    let mut arg_start = i;
    let mut depth = 0usize;

    while i < tokens.len() {
        let t = tokens[i];
        if t.is_open() {
            depth += 1;
        } else if t.is_close() {
            if depth == 0 {
                if i > arg_start || !args.is_empty() {
                    args.push(classify(&tokens[arg_start..i]));
                }
                return Some((CallShape { name, args }, i + 1));
            }
            depth -= 1;
        } else if depth == 0 && t.token_type == TokenType::Sep && t.subtype == TokenSubType::Arg {
            args.push(classify(&tokens[arg_start..i]));
            arg_start = i + 1;
        }
        i += 1;
    }
    None
}

fn classify(tokens: &[&Token]) -> CallArg {
    match tokens {
        [] => CallArg::Literal(CellValue::Empty),
        [t] if t.token_type == TokenType::Operand => operand_arg(t),
        [sign, t]
            if sign.token_type == TokenType::OpPrefix
                && t.subtype == TokenSubType::Number =>
        {
            let n: f64 = t.value.parse().unwrap_or(0.0);
            let n = if sign.value == "-" { -n } else { n };
            CallArg::Literal(CellValue::Number(n))
        }
        [first, ..] if first.token_type == TokenType::Func => match shape_at(tokens, 0) {
            Some((shape, used)) if used == tokens.len() => CallArg::Call(Box::new(shape)),
            _ => CallArg::Expr(join(tokens)),
        },
        _ => match equality_product(tokens) {
            Some(conditions) => CallArg::Conditions(conditions),
            None => CallArg::Expr(join(tokens)),
        },
    }
}

/// `(range=value)*(range=value)...` with at least two factors, where each
/// `value` is a single operand.
fn equality_product(tokens: &[&Token]) -> Option<Vec<(ParsedReference, CallArg)>> {
    let mut factors = Vec::new();
    let mut rest = tokens;
    loop {
        let [open, range, eq, value, close, tail @ ..] = rest else {
            return None;
        };
        let factor = open.token_type == TokenType::Paren
            && open.is_open()
            && range.token_type == TokenType::Operand
            && eq.token_type == TokenType::OpInfix
            && eq.value == "="
            && value.token_type == TokenType::Operand
            && close.token_type == TokenType::Paren
            && close.is_close();
        if !factor {
            return None;
        }
        factors.push((parse_reference(&range.value).ok()?, operand_arg(value)));
        match tail {
            [] => break,
            [times, more @ ..] if times.token_type == TokenType::OpInfix && times.value == "*" => {
                rest = more;
            }
            _ => return None,
        }
    }
    (factors.len() >= 2).then_some(factors)
}

fn operand_arg(t: &Token) -> CallArg {
    match t.subtype {
        TokenSubType::Number => match t.value.parse::<f64>() {
            Ok(n) => CallArg::Literal(CellValue::Number(n)),
            Err(_) => CallArg::Expr(t.value.clone()),
        },
        TokenSubType::Text => {
            let inner = &t.value[1..t.value.len() - 1];
            CallArg::Literal(CellValue::Text(inner.replace("\"\"", "\"")))
        }
        TokenSubType::Logical => {
            CallArg::Literal(CellValue::Boolean(t.value.eq_ignore_ascii_case("TRUE")))
        }
        TokenSubType::Error => {
            let kind = ErrorKind::parse(&t.value).unwrap_or(ErrorKind::Ref);
            CallArg::Literal(CellValue::Error(kind.into()))
        }
        _ => match parse_reference(&t.value) {
            Ok(r) => CallArg::Reference(r),
            Err(_) => CallArg::Expr(t.value.clone()),
        },
    }
}

fn join(tokens: &[&Token]) -> String {
    tokens.iter().map(|t| t.value.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridcalc_common::RangeArea;

    #[test]
    fn whole_formula_call() {
        let shape = call_shape("=sumifs($C:$C, $A:$A, F2, Data!$B$1:$B$9, \"x\")").unwrap();
        assert_eq!(shape.name, "SUMIFS");
        assert_eq!(shape.args.len(), 5);
        assert!(shape.args[0].as_reference().unwrap().area().is_whole_column());
        assert!(matches!(shape.args[2], CallArg::Reference(_)));
        assert_eq!(
            shape.args[3].as_reference().unwrap().area(),
            RangeArea::new(1, 2, 9, 2)
        );
        assert_eq!(shape.args[4], CallArg::Literal(CellValue::Text("x".into())));
    }

    #[test]
    fn nested_calls_and_literals() {
        let shape = call_shape("=IFERROR(INDEX($B:$B, MATCH(A2, $A:$A, 0)), -1)").unwrap();
        assert_eq!(shape.name, "IFERROR");
        let index = shape.args[0].as_call().unwrap();
        assert_eq!(index.name, "INDEX");
        assert_eq!(index.args[1].as_call().unwrap().name, "MATCH");
        assert_eq!(shape.args[1], CallArg::Literal(CellValue::Number(-1.0)));
    }

    #[test]
    fn non_call_formulas_have_no_shape() {
        assert!(call_shape("=1+SUM(A1:A3)").is_none());
        assert!(call_shape("=SUM(A1:A3)*2").is_none());
        assert!(call_shape("=A1").is_none());
        let shape = call_shape("=SUM(A1+1, B2)").unwrap();
        assert_eq!(shape.args[0], CallArg::Expr("A1+1".into()));
    }

    #[test]
    fn condition_products() {
        let shape =
            call_shape("=INDEX($C:$C, MATCH(1, ($A:$A=E2)*(Data!$B$1:$B$9=\"x\"), 0))").unwrap();
        let m = shape.args[1].as_call().unwrap();
        assert_eq!(m.args[0], CallArg::Literal(CellValue::Number(1.0)));
        let conditions = m.args[1].as_conditions().unwrap();
        assert_eq!(conditions.len(), 2);
        assert!(conditions[0].0.area().is_whole_column());
        assert!(matches!(conditions[0].1, CallArg::Reference(_)));
        assert_eq!(conditions[1].0.sheet.as_deref(), Some("Data"));
        assert_eq!(conditions[1].1, CallArg::Literal(CellValue::Text("x".into())));

        let single = call_shape("=MATCH(1, ($A:$A=E2), 0)").unwrap();
        assert!(matches!(single.args[1], CallArg::Expr(_)));
        let compared = call_shape("=MATCH(1, ($A:$A>E2)*($B:$B=F2), 0)").unwrap();
        assert!(matches!(compared.args[1], CallArg::Expr(_)));
    }

    #[test]
    fn zero_argument_call() {
        let shape = call_shape("=NOW()").unwrap();
        assert!(shape.args.is_empty());
    }
}
