//! A1-style reference parsing.
//!
//! Handles `A1`, `$A$1`, `A1:B9`, whole columns (`C:C`, `$A:$D`), whole
//! rows (`3:5`) and any of those qualified by a sheet (`Data!A1`,
//! `'My Sheet'!$B:$B`). External workbooks (`[1]Sheet!A1`) and defined names
//! are not references in this sense and produce [`ReferenceError`].

use std::error::Error;
use std::fmt;

use gridcalc_common::{column_index, quote_sheet_name, CellAddr, RangeArea, MAX_COLS, MAX_ROWS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    /// Text is not shaped like a reference (defined names land here).
    NotAReference(String),
    /// References into another workbook.
    External(String),
    /// Row or column past the grid limits.
    OutOfBounds(String),
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::NotAReference(s) => write!(f, "'{s}' is not a cell or range reference"),
            ReferenceError::External(s) => write!(f, "'{s}' refers to an external workbook"),
            ReferenceError::OutOfBounds(s) => write!(f, "'{s}' is outside the grid"),
        }
    }
}

impl Error for ReferenceError {}

/// One end of a reference. Whole-column ends have no row and whole-row ends
/// have no column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RefPoint {
    pub row: Option<u32>,
    pub col: Option<u32>,
    pub row_abs: bool,
    pub col_abs: bool,
}

impl RefPoint {
    fn is_anchored(&self) -> bool {
        (self.row.is_none() || self.row_abs) && (self.col.is_none() || self.col_abs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParsedReference {
    /// Sheet named in the reference; `None` means the formula's own sheet.
    pub sheet: Option<String>,
    pub start: RefPoint,
    pub end: Option<RefPoint>,
}

impl ParsedReference {
    /// The covered area. Open ends span the whole grid.
    pub fn area(&self) -> RangeArea {
        let end = self.end.unwrap_or(self.start);
        let start_row = self.start.row.unwrap_or(1);
        let start_col = self.start.col.unwrap_or(1);
        let end_row = end.row.unwrap_or(MAX_ROWS);
        let end_col = end.col.unwrap_or(MAX_COLS);
        RangeArea::new(start_row, start_col, end_row, end_col)
    }

    pub fn is_single_cell(&self) -> bool {
        let area = self.area();
        area.start_row == area.end_row && area.start_col == area.end_col
    }

    pub fn cell(&self) -> Option<CellAddr> {
        self.is_single_cell().then(|| {
            let a = self.area();
            CellAddr::new(a.start_row, a.start_col)
        })
    }

    /// Every row and column component carries a `$` anchor.
    pub fn is_absolute(&self) -> bool {
        self.start.is_anchored() && self.end.is_none_or(|e| e.is_anchored())
    }

    pub fn sheet_or<'a>(&'a self, current: &'a str) -> &'a str {
        self.sheet.as_deref().unwrap_or(current)
    }
}

impl fmt::Display for ParsedReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            write!(f, "{}!", quote_sheet_name(sheet))?;
        }
        write!(f, "{}", self.area())
    }
}

/// Parse a reference token such as `'Q1 Sales'!$B$2:$B$90`.
pub fn parse_reference(text: &str) -> Result<ParsedReference, ReferenceError> {
    let t = text.trim();
    if t.starts_with('[') {
        return Err(ReferenceError::External(text.to_string()));
    }
    let (sheet, body) = split_sheet(t).ok_or_else(|| ReferenceError::NotAReference(text.to_string()))?;
    if body.is_empty() {
        return Err(ReferenceError::NotAReference(text.to_string()));
    }

    let not_ref = || ReferenceError::NotAReference(text.to_string());
    let (start, end) = match body.split_once(':') {
        None => {
            let p = parse_point(body).ok_or_else(not_ref)?;
            if p.row.is_none() || p.col.is_none() {
                return Err(not_ref());
            }
            (p, None)
        }
        Some((a, b)) => {
            let a = parse_point(a).ok_or_else(not_ref)?;
            let b = parse_point(b).ok_or_else(not_ref)?;
            let same_shape = a.row.is_some() == b.row.is_some() && a.col.is_some() == b.col.is_some();
            if !same_shape {
                return Err(not_ref());
            }
            (a, Some(b))
        }
    };

    for p in std::iter::once(&start).chain(end.iter()) {
        let row_bad = p.row.is_some_and(|r| r == 0 || r > MAX_ROWS);
        let col_bad = p.col.is_some_and(|c| c == 0 || c > MAX_COLS);
        if row_bad || col_bad {
            return Err(ReferenceError::OutOfBounds(text.to_string()));
        }
    }

    Ok(ParsedReference { sheet, start, end })
}

fn split_sheet(t: &str) -> Option<(Option<String>, &str)> {
    if let Some(rest) = t.strip_prefix('\'') {
        // Quoted names escape quotes by doubling them.
        let bytes = rest.as_bytes();
        let mut i = 0;
        let mut name = String::new();
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    name.push('\'');
                    i += 2;
                    continue;
                }
                let after = &rest[i + 1..];
                let body = after.strip_prefix('!')?;
                return Some((Some(name), body));
            }
            let ch = rest[i..].chars().next()?;
            name.push(ch);
            i += ch.len_utf8();
        }
        return None;
    }
    match t.rsplit_once('!') {
        Some((sheet, body)) if !sheet.is_empty() => Some((Some(sheet.to_string()), body)),
        Some(_) => None,
        None => Some((None, t)),
    }
}

/// `$A$1`, `A`, `$A`, `12`, `$12`.
fn parse_point(s: &str) -> Option<RefPoint> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let col_abs = bytes.first() == Some(&b'$');
    if col_abs {
        i += 1;
    }
    let letters_start = i;
    while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
        i += 1;
    }
    let letters = &s[letters_start..i];

    let mut row_abs = false;
    if bytes.get(i) == Some(&b'$') {
        row_abs = true;
        i += 1;
    }
    let digits = &s[i..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    match (letters.is_empty(), digits.is_empty()) {
        (false, false) => Some(RefPoint {
            row: Some(digits.parse().ok()?),
            col: Some(column_index(letters)?),
            row_abs,
            col_abs,
        }),
        (false, true) if !row_abs => Some(RefPoint {
            row: None,
            col: Some(column_index(letters)?),
            row_abs: false,
            col_abs,
        }),
        // A leading `$` on a bare row number anchors the row.
        (true, false) => Some(RefPoint {
            row: Some(digits.parse().ok()?),
            col: None,
            row_abs: col_abs || row_abs,
            col_abs: false,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cells_and_areas() {
        let r = parse_reference("B7").unwrap();
        assert_eq!(r.sheet, None);
        assert_eq!(r.cell(), Some(CellAddr::new(7, 2)));
        assert!(!r.is_absolute());

        let r = parse_reference("Data!$A$1:$C$10").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Data"));
        assert_eq!(r.area(), RangeArea::new(1, 1, 10, 3));
        assert!(r.is_absolute());
    }

    #[test]
    fn parses_whole_columns_and_rows() {
        let r = parse_reference("'My Sheet'!$C:$C").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("My Sheet"));
        assert!(r.area().is_whole_column());
        assert!(r.is_absolute());

        let r = parse_reference("C:D").unwrap();
        assert!(!r.is_absolute());

        let r = parse_reference("$3:$5").unwrap();
        assert_eq!(r.area(), RangeArea::whole_rows(3, 5));
        assert!(r.is_absolute());
    }

    #[test]
    fn quoted_sheet_with_escaped_quote() {
        let r = parse_reference("'Bob''s'!A1").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Bob's"));
        assert_eq!(r.to_string(), "'Bob''s'!A1");
    }

    #[test]
    fn rejects_non_references() {
        assert!(matches!(parse_reference("Total"), Err(ReferenceError::NotAReference(_))));
        assert!(matches!(parse_reference("A1:B"), Err(ReferenceError::NotAReference(_))));
        assert!(matches!(parse_reference("A"), Err(ReferenceError::NotAReference(_))));
        assert!(matches!(parse_reference("[1]Sheet1!A1"), Err(ReferenceError::External(_))));
        assert!(matches!(parse_reference("A0"), Err(ReferenceError::OutOfBounds(_))));
        assert!(matches!(parse_reference("!A1"), Err(ReferenceError::NotAReference(_))));
    }
}
