use std::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

use crate::{CellError, ErrorKind};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The typed content of a cell.
///
/// This is the only place where host text is turned into a typed value (see
/// [`CellValue::infer`]); everything downstream matches on the variant. The
/// number `0` and the text `"0"` are different values.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(CellError),
    #[default]
    Empty,
}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::Number(n) => n.to_bits().hash(state),
            CellValue::Text(s) => s.hash(state),
            CellValue::Boolean(b) => b.hash(state),
            CellValue::Error(e) => e.hash(state),
            CellValue::Empty => {}
        }
    }
}

impl Eq for CellValue {}

impl Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Boolean(true) => f.write_str("TRUE"),
            CellValue::Boolean(false) => f.write_str("FALSE"),
            CellValue::Error(e) => write!(f, "{}", e.kind),
            CellValue::Empty => Ok(()),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n as f64)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Boolean(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

/// Type information a host may attach to an untyped cell string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeHint {
    /// No hint; infer from the text.
    #[default]
    Auto,
    Number,
    Text,
    Boolean,
    Error,
}

/// How an empty text value behaves when a number is required.
///
/// An empty *cell* is always zero in arithmetic. Empty *text* (for example
/// the result of `=""`) is a product decision, so evaluators receive it
/// through configuration instead of hardcoding either rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyTextPolicy {
    /// `"" + 1` evaluates to `#VALUE!`.
    #[default]
    ValueError,
    /// `"" + 1` evaluates to `1`.
    Zero,
}

/// Which rendering of a computed result a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputMode {
    /// The typed value as computed.
    Raw,
    /// The value rendered as display text.
    Display,
}

impl CellValue {
    /// Build a typed value from host text.
    ///
    /// With [`TypeHint::Auto`] the text is classified as empty, boolean
    /// (`TRUE`/`FALSE`), error literal, number, or text, in that order.
    pub fn infer(raw: &str, hint: TypeHint) -> CellValue {
        match hint {
            TypeHint::Text => CellValue::Text(raw.to_string()),
            TypeHint::Boolean => match raw.trim() {
                "1" => CellValue::Boolean(true),
                "0" => CellValue::Boolean(false),
                other => match parse_bool(other) {
                    Some(b) => CellValue::Boolean(b),
                    None => CellValue::Text(raw.to_string()),
                },
            },
            TypeHint::Error => match ErrorKind::parse(raw) {
                Some(kind) => CellValue::Error(kind.into()),
                None => CellValue::Error(CellError::new(ErrorKind::Error).with_message(raw)),
            },
            TypeHint::Number => match parse_number(raw) {
                Some(n) => CellValue::Number(n),
                None if raw.is_empty() => CellValue::Empty,
                None => CellValue::Text(raw.to_string()),
            },
            TypeHint::Auto => {
                if raw.is_empty() {
                    return CellValue::Empty;
                }
                if let Some(b) = parse_bool(raw) {
                    return CellValue::Boolean(b);
                }
                if raw.starts_with('#') {
                    if let Some(kind) = ErrorKind::parse(raw) {
                        return CellValue::Error(kind.into());
                    }
                }
                match parse_number(raw) {
                    Some(n) => CellValue::Number(n),
                    None => CellValue::Text(raw.to_string()),
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn as_error(&self) -> Option<&CellError> {
        match self {
            CellValue::Error(e) => Some(e),
            _ => None,
        }
    }

    /// The value if this is a number, without any coercion.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Coerce to a number for arithmetic.
    ///
    /// Empty cells are zero, booleans are 0/1, numeric text is parsed, and
    /// empty text follows `policy`. Errors pass through unchanged.
    pub fn coerce_number(&self, policy: EmptyTextPolicy) -> Result<f64, CellError> {
        match self {
            CellValue::Number(n) => Ok(*n),
            CellValue::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => Ok(0.0),
            CellValue::Error(e) => Err(e.clone()),
            CellValue::Text(s) if s.is_empty() => match policy {
                EmptyTextPolicy::Zero => Ok(0.0),
                EmptyTextPolicy::ValueError => Err(CellError::new_value()
                    .with_message("empty text used where a number is required")),
            },
            CellValue::Text(s) => parse_number(s).ok_or_else(|| {
                CellError::new_value().with_message(format!("cannot convert '{s}' to a number"))
            }),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            CellValue::Boolean(b) => *b,
            CellValue::Number(n) => *n != 0.0,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Error(_) | CellValue::Empty => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "text",
            CellValue::Boolean(_) => "boolean",
            CellValue::Error(_) => "error",
            CellValue::Empty => "empty",
        }
    }

    /// Render for the requested output mode.
    pub fn render(&self, mode: OutputMode) -> CellValue {
        match mode {
            OutputMode::Raw => self.clone(),
            OutputMode::Display => match self {
                CellValue::Empty => CellValue::Empty,
                other => CellValue::Text(other.to_string()),
            },
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("TRUE") {
        Some(true)
    } else if s.eq_ignore_ascii_case("FALSE") {
        Some(false)
    } else {
        None
    }
}

/// Parse numeric text. Surrounding whitespace is ignored; `inf`/`nan`
/// spellings are rejected.
pub fn parse_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    let first = t.as_bytes()[0];
    if !(first.is_ascii_digit() || matches!(first, b'-' | b'+' | b'.')) {
        return None;
    }
    match t.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => None,
    }
}

/// General-style number text: integral values print without a fraction,
/// everything else is rounded to 15 significant digits.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{n:.0}");
    }
    let rounded: f64 = format!("{n:.14e}").parse().unwrap_or(n);
    format!("{rounded}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_number_and_zero_text_are_distinct() {
        let n = CellValue::infer("0", TypeHint::Auto);
        let t = CellValue::infer("0", TypeHint::Text);
        assert_eq!(n, CellValue::Number(0.0));
        assert_eq!(t, CellValue::Text("0".into()));
        assert_ne!(n, t);
    }

    #[test]
    fn infer_classifies_host_text() {
        assert_eq!(CellValue::infer("", TypeHint::Auto), CellValue::Empty);
        assert_eq!(CellValue::infer("TRUE", TypeHint::Auto), CellValue::Boolean(true));
        assert_eq!(CellValue::infer("1", TypeHint::Boolean), CellValue::Boolean(true));
        assert_eq!(CellValue::infer("#N/A", TypeHint::Auto), ErrorKind::Na.into());
        assert_eq!(CellValue::infer(" 2.5 ", TypeHint::Auto), CellValue::Number(2.5));
        assert_eq!(CellValue::infer("abc", TypeHint::Number), CellValue::Text("abc".into()));
        assert_eq!(CellValue::infer("inf", TypeHint::Auto), CellValue::Text("inf".into()));
    }

    #[test]
    fn empty_text_coercion_follows_policy() {
        let v = CellValue::Text(String::new());
        assert_eq!(v.coerce_number(EmptyTextPolicy::Zero), Ok(0.0));
        let err = v.coerce_number(EmptyTextPolicy::ValueError).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert_eq!(CellValue::Empty.coerce_number(EmptyTextPolicy::ValueError), Ok(0.0));
    }

    #[test]
    fn numbers_render_like_a_spreadsheet() {
        assert_eq!(format_number(200.0), "200");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-2.5), "-2.5");
        assert_eq!(CellValue::Boolean(false).to_string(), "FALSE");
        assert_eq!(
            CellValue::Number(42.0).render(OutputMode::Display),
            CellValue::Text("42".into())
        );
    }
}
