//! Criteria matching for conditional aggregates and exact lookups.
//!
//! Equality is defined through [`CriteriaKey`]: numbers and numeric text
//! compare numerically, other text compares case-insensitively, booleans
//! compare as booleans, and empty or error cells never produce a key. Both
//! the per-formula evaluator and the batched hash-lookup path rely on this
//! one definition, so a hash hit is exactly an equality match.

use crate::value::parse_number;
use crate::CellValue;

/// Hashable normalized form of a cell value for equality matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CriteriaKey {
    /// Bit pattern of the number, with `-0.0` folded into `0.0`.
    Number(u64),
    /// Lower-cased text.
    Text(String),
    Boolean(bool),
}

impl CriteriaKey {
    pub fn number(n: f64) -> Self {
        let n = if n == 0.0 { 0.0 } else { n };
        CriteriaKey::Number(n.to_bits())
    }

    /// Key of a cell's content; `None` for empty cells, empty text and errors.
    pub fn from_cell(v: &CellValue) -> Option<Self> {
        match v {
            CellValue::Number(n) => Some(Self::number(*n)),
            CellValue::Boolean(b) => Some(CriteriaKey::Boolean(*b)),
            CellValue::Text(s) if s.is_empty() => None,
            CellValue::Text(s) => Some(match parse_number(s) {
                Some(n) => Self::number(n),
                None => CriteriaKey::Text(s.to_lowercase()),
            }),
            CellValue::Empty | CellValue::Error(_) => None,
        }
    }

    /// Key under the `=` operator, where text is never read as a number.
    /// `None` for values that also equal an empty cell (`0`, `""`, empty)
    /// and for errors.
    pub fn for_equality(v: &CellValue) -> Option<Self> {
        match v {
            CellValue::Number(n) if *n == 0.0 => None,
            CellValue::Number(n) => Some(Self::number(*n)),
            CellValue::Boolean(b) => Some(CriteriaKey::Boolean(*b)),
            CellValue::Text(s) if s.is_empty() => None,
            CellValue::Text(s) => Some(CriteriaKey::Text(s.to_lowercase())),
            CellValue::Empty | CellValue::Error(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    fn holds<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
        }
    }
}

/// A parsed criterion such as `5`, `"apple"`, `">=10"`, `"a*"` or `"<>"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Criterion {
    Equals(CriteriaKey),
    NotEquals(CriteriaKey),
    Compare(CompareOp, f64),
    TextCompare(CompareOp, String),
    Wildcard { pattern: String, negate: bool },
    Blank,
    NotBlank,
    /// Matches nothing (empty criterion cell, error criterion).
    Never,
}

/// How a criterion can be answered from an equality hash map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashLookup<'a> {
    Key(&'a CriteriaKey),
    NoMatch,
    Unsupported,
}

impl Criterion {
    pub fn parse(value: &CellValue) -> Criterion {
        match value {
            CellValue::Number(n) => Criterion::Equals(CriteriaKey::number(*n)),
            CellValue::Boolean(b) => Criterion::Equals(CriteriaKey::Boolean(*b)),
            CellValue::Empty | CellValue::Error(_) => Criterion::Never,
            CellValue::Text(s) => Self::parse_text(s),
        }
    }

    fn parse_text(s: &str) -> Criterion {
        let (op, rest) = split_operator(s);
        match op {
            None => {
                if s.is_empty() {
                    Criterion::Blank
                } else if has_wildcard(s) {
                    Criterion::Wildcard {
                        pattern: s.to_lowercase(),
                        negate: false,
                    }
                } else {
                    Criterion::Equals(text_operand_key(s))
                }
            }
            Some("=") if rest.is_empty() => Criterion::Blank,
            Some("<>") if rest.is_empty() => Criterion::NotBlank,
            Some(eq @ ("=" | "<>")) => {
                let negate = eq == "<>";
                if has_wildcard(rest) {
                    Criterion::Wildcard {
                        pattern: rest.to_lowercase(),
                        negate,
                    }
                } else if negate {
                    Criterion::NotEquals(text_operand_key(rest))
                } else {
                    Criterion::Equals(text_operand_key(rest))
                }
            }
            Some(cmp) => {
                let op = match cmp {
                    ">" => CompareOp::Gt,
                    ">=" => CompareOp::Ge,
                    "<" => CompareOp::Lt,
                    _ => CompareOp::Le,
                };
                match parse_number(rest) {
                    Some(n) => Criterion::Compare(op, n),
                    None => Criterion::TextCompare(op, rest.to_lowercase()),
                }
            }
        }
    }

    pub fn matches(&self, cell: &CellValue) -> bool {
        match self {
            Criterion::Equals(key) => CriteriaKey::from_cell(cell).as_ref() == Some(key),
            Criterion::NotEquals(key) => CriteriaKey::from_cell(cell).as_ref() != Some(key),
            Criterion::Compare(op, rhs) => match cell {
                CellValue::Number(n) => op.holds(*n, *rhs),
                _ => false,
            },
            Criterion::TextCompare(op, rhs) => match cell {
                CellValue::Text(s) if parse_number(s).is_none() => {
                    op.holds(s.to_lowercase().as_str(), rhs.as_str())
                }
                _ => false,
            },
            Criterion::Wildcard { pattern, negate } => {
                let hit = match cell {
                    CellValue::Text(s) => wildcard_match(pattern, &s.to_lowercase()),
                    _ => false,
                };
                hit != *negate
            }
            Criterion::Blank => match cell {
                CellValue::Empty => true,
                CellValue::Text(s) => s.is_empty(),
                _ => false,
            },
            Criterion::NotBlank => !Criterion::Blank.matches(cell),
            Criterion::Never => false,
        }
    }

    pub fn hash_lookup(&self) -> HashLookup<'_> {
        match self {
            Criterion::Equals(key) => HashLookup::Key(key),
            Criterion::Never => HashLookup::NoMatch,
            _ => HashLookup::Unsupported,
        }
    }
}

fn split_operator(s: &str) -> (Option<&str>, &str) {
    for op in [">=", "<=", "<>", ">", "<", "="] {
        if let Some(rest) = s.strip_prefix(op) {
            return (Some(op), rest);
        }
    }
    (None, s)
}

fn text_operand_key(s: &str) -> CriteriaKey {
    if s.eq_ignore_ascii_case("TRUE") {
        return CriteriaKey::Boolean(true);
    }
    if s.eq_ignore_ascii_case("FALSE") {
        return CriteriaKey::Boolean(false);
    }
    match parse_number(s) {
        Some(n) => CriteriaKey::number(n),
        None => CriteriaKey::Text(s.to_lowercase()),
    }
}

/// Text containing `*`, `?` or the `~` escape.
pub fn has_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '~'])
}

/// `*` matches any run, `?` one character, `~` escapes the next character.
/// Case-sensitive; callers lower-case both sides.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy)]
    enum Tok {
        Lit(char),
        One,
        Any,
    }
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '~' => Tok::Lit(chars.next().unwrap_or('~')),
            '*' => Tok::Any,
            '?' => Tok::One,
            other => Tok::Lit(other),
        });
    }
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match toks.get(p) {
            Some(Tok::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(Tok::One) => {
                p += 1;
                t += 1;
            }
            Some(Tok::Lit(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((bp, bt)) => {
                    p = bp + 1;
                    t = bt + 1;
                    backtrack = Some((bp, bt + 1));
                }
                None => return false,
            },
        }
    }
    toks[p..].iter().all(|tok| matches!(tok, Tok::Any))
}
