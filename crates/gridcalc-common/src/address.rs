//! Sheet coordinates: cells, rectangular areas and sheet-qualified cells.
//!
//! Rows and columns are 1-based throughout, matching A1 notation.

use std::error::Error;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Stable sheet identifier used across the workspace.
pub type SheetId = u16;

pub const MAX_ROWS: u32 = 1_048_576;
pub const MAX_COLS: u32 = 16_384;

/// Errors produced while parsing or constructing addresses.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AddressError {
    /// Text is not an A1-style cell address.
    Malformed(String),
    /// Row or column is zero or past the grid limits.
    OutOfBounds { row: u32, col: u32 },
    /// Sheet-qualified text without a sheet part.
    MissingSheet(String),
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::Malformed(s) => write!(f, "'{s}' is not a valid cell address"),
            AddressError::OutOfBounds { row, col } => {
                write!(f, "row {row}, col {col} is outside the grid")
            }
            AddressError::MissingSheet(s) => write!(f, "'{s}' does not name a sheet"),
        }
    }
}

impl Error for AddressError {}

/// Convert a 1-based column index to letters (`1 -> A`, `27 -> AA`).
pub fn column_letters(col: u32) -> String {
    let mut n = col;
    let mut buf = Vec::with_capacity(3);
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        buf.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// Convert column letters (case-insensitive) to a 1-based index.
pub fn column_index(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut col: u32 = 0;
    for ch in letters.bytes() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + u32::from(ch.to_ascii_uppercase() - b'A' + 1);
    }
    (col <= MAX_COLS).then_some(col)
}

/// A cell position.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellAddr {
    pub row: u32,
    pub col: u32,
}

impl CellAddr {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    pub fn try_new(row: u32, col: u32) -> Result<Self, AddressError> {
        if row == 0 || col == 0 || row > MAX_ROWS || col > MAX_COLS {
            return Err(AddressError::OutOfBounds { row, col });
        }
        Ok(Self { row, col })
    }

    /// Parse `B12` or `$B$12`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let malformed = || AddressError::Malformed(s.to_string());
        let t = s.trim();
        let bytes = t.as_bytes();
        let mut i = 0;
        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let letters_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let col = column_index(&t[letters_start..i]).ok_or_else(malformed)?;
        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let digits = &t[i..];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let row: u32 = digits.parse().map_err(|_| malformed())?;
        Self::try_new(row, col)
    }

    pub fn column_letters(&self) -> String {
        column_letters(self.col)
    }
}

impl fmt::Display for CellAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_letters(self.col), self.row)
    }
}

/// An inclusive rectangle of cells, always normalized so start <= end.
///
/// Whole-column references span every row and whole-row references span
/// every column; [`RangeArea::clip_rows`] trims them to a sheet's used
/// extent before materialization.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeArea {
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeArea {
    pub fn new(start_row: u32, start_col: u32, end_row: u32, end_col: u32) -> Self {
        Self {
            start_row: start_row.min(end_row),
            start_col: start_col.min(end_col),
            end_row: start_row.max(end_row),
            end_col: start_col.max(end_col),
        }
    }

    pub fn from_corners(a: CellAddr, b: CellAddr) -> Self {
        Self::new(a.row, a.col, b.row, b.col)
    }

    pub fn single(addr: CellAddr) -> Self {
        Self::new(addr.row, addr.col, addr.row, addr.col)
    }

    pub fn whole_columns(first: u32, last: u32) -> Self {
        Self::new(1, first, MAX_ROWS, last)
    }

    pub fn whole_rows(first: u32, last: u32) -> Self {
        Self::new(first, 1, last, MAX_COLS)
    }

    pub fn height(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn width(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.height()) * u64::from(self.width())
    }

    pub fn is_whole_column(&self) -> bool {
        self.start_row == 1 && self.end_row == MAX_ROWS
    }

    pub fn is_whole_row(&self) -> bool {
        self.start_col == 1 && self.end_col == MAX_COLS
    }

    pub fn contains(&self, addr: CellAddr) -> bool {
        addr.row >= self.start_row
            && addr.row <= self.end_row
            && addr.col >= self.start_col
            && addr.col <= self.end_col
    }

    pub fn overlaps(&self, other: &RangeArea) -> bool {
        self.start_row <= other.end_row
            && other.start_row <= self.end_row
            && self.start_col <= other.end_col
            && other.start_col <= self.end_col
    }

    /// Limit the area to rows `..= max_row`. `None` when nothing remains.
    pub fn clip_rows(&self, max_row: u32) -> Option<RangeArea> {
        if self.start_row > max_row {
            return None;
        }
        Some(RangeArea {
            end_row: self.end_row.min(max_row),
            ..*self
        })
    }

    /// Limit the area to columns `..= max_col`. `None` when nothing remains.
    pub fn clip_cols(&self, max_col: u32) -> Option<RangeArea> {
        if self.start_col > max_col {
            return None;
        }
        Some(RangeArea {
            end_col: self.end_col.min(max_col),
            ..*self
        })
    }

    /// Row-major iterator over every cell address in the area.
    pub fn cells(&self) -> impl Iterator<Item = CellAddr> + '_ {
        (self.start_row..=self.end_row)
            .flat_map(move |r| (self.start_col..=self.end_col).map(move |c| CellAddr::new(r, c)))
    }
}

impl fmt::Display for RangeArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole_column() {
            return write!(
                f,
                "{}:{}",
                column_letters(self.start_col),
                column_letters(self.end_col)
            );
        }
        if self.is_whole_row() {
            return write!(f, "{}:{}", self.start_row, self.end_row);
        }
        let start = CellAddr::new(self.start_row, self.start_col);
        if self.start_row == self.end_row && self.start_col == self.end_col {
            return write!(f, "{start}");
        }
        write!(f, "{start}:{}", CellAddr::new(self.end_row, self.end_col))
    }
}

/// Quote a sheet name for use in a reference when it needs quoting.
pub fn quote_sheet_name(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        && !name.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// A cell identified by sheet name, used at the public API boundary.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedCell {
    pub sheet: String,
    pub addr: CellAddr,
}

impl QualifiedCell {
    pub fn new(sheet: impl Into<String>, addr: CellAddr) -> Self {
        Self {
            sheet: sheet.into(),
            addr,
        }
    }

    /// Parse `Sheet1!B2` or `'My Sheet'!$B$2`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let (sheet, cell) = s
            .rsplit_once('!')
            .ok_or_else(|| AddressError::MissingSheet(s.to_string()))?;
        let sheet = match sheet.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
            Some(quoted) => quoted.replace("''", "'"),
            None => sheet.to_string(),
        };
        if sheet.is_empty() {
            return Err(AddressError::MissingSheet(s.to_string()));
        }
        Ok(Self {
            sheet,
            addr: CellAddr::parse(cell)?,
        })
    }
}

impl fmt::Display for QualifiedCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", quote_sheet_name(&self.sheet), self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_letter_roundtrip() {
        for (col, letters) in [(1, "A"), (26, "Z"), (27, "AA"), (52, "AZ"), (703, "AAA")] {
            assert_eq!(column_letters(col), letters);
            assert_eq!(column_index(letters), Some(col));
        }
        assert_eq!(column_index("xfd"), Some(MAX_COLS));
        assert_eq!(column_index("XFE"), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn cell_parse_accepts_anchors() {
        assert_eq!(CellAddr::parse("$B$12").unwrap(), CellAddr::new(12, 2));
        assert_eq!(CellAddr::parse("c3").unwrap(), CellAddr::new(3, 3));
        assert!(CellAddr::parse("A0").is_err());
        assert!(CellAddr::parse("12").is_err());
        assert!(CellAddr::parse("A1B").is_err());
    }

    #[test]
    fn area_geometry() {
        let a = RangeArea::new(5, 3, 1, 1);
        assert_eq!((a.start_row, a.start_col, a.end_row, a.end_col), (1, 1, 5, 3));
        assert_eq!(a.cell_count(), 15);
        assert!(a.contains(CellAddr::new(5, 3)));
        assert!(!a.contains(CellAddr::new(6, 3)));
        assert!(a.overlaps(&RangeArea::new(5, 3, 9, 9)));
        assert!(!a.overlaps(&RangeArea::new(6, 1, 9, 9)));

        let col = RangeArea::whole_columns(2, 2);
        assert_eq!(col.to_string(), "B:B");
        assert_eq!(col.clip_rows(10).unwrap().to_string(), "B1:B10");
        assert_eq!(RangeArea::whole_rows(3, 4).to_string(), "3:4");
    }

    #[test]
    fn qualified_cell_roundtrip() {
        let q = QualifiedCell::parse("'My Sheet'!$A$2").unwrap();
        assert_eq!(q.sheet, "My Sheet");
        assert_eq!(q.addr, CellAddr::new(2, 1));
        assert_eq!(q.to_string(), "'My Sheet'!A2");
        assert!(QualifiedCell::parse("A1").is_err());
    }
}
