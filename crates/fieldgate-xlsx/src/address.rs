//! A1-style address parsing.
//!
//! Columns and rows are **1-based** throughout this module: column `A` is `1`, column `XFD` is
//! [`MAX_COLUMNS`].

use core::fmt;

use thiserror::Error;

/// Number of columns in an Excel 2007+ worksheet (`XFD`).
pub const MAX_COLUMNS: u32 = 16_384;

/// Number of rows in an Excel 2007+ worksheet.
pub const MAX_ROWS: u32 = 1_048_576;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("empty reference")]
    Empty,
    #[error("invalid column {0:?}")]
    InvalidColumn(String),
    #[error("column index {0} is outside 1..={MAX_COLUMNS}")]
    ColumnOutOfRange(u32),
    #[error("invalid row in {0:?}")]
    InvalidRow(String),
    #[error("invalid reference {0:?}")]
    InvalidReference(String),
    #[error("mismatched range endpoints in {0:?}")]
    MismatchedEndpoints(String),
}

/// Convert column letters (`A`, `aa`, `XFD`) to a 1-based column index.
pub fn column_index(letters: &str) -> Result<u32, AddressError> {
    let trimmed = letters.trim();
    if trimmed.is_empty() || trimmed.len() > 3 {
        return Err(AddressError::InvalidColumn(letters.to_string()));
    }

    let mut col: u32 = 0;
    for b in trimmed.bytes() {
        if !b.is_ascii_alphabetic() {
            return Err(AddressError::InvalidColumn(letters.to_string()));
        }
        col = col * 26 + u32::from(b.to_ascii_uppercase() - b'A') + 1;
    }
    if col > MAX_COLUMNS {
        return Err(AddressError::InvalidColumn(letters.to_string()));
    }
    Ok(col)
}

/// Convert a 1-based column index to its letters. Inverse of [`column_index`].
pub fn column_letters(index: u32) -> Result<String, AddressError> {
    if index == 0 || index > MAX_COLUMNS {
        return Err(AddressError::ColumnOutOfRange(index));
    }
    let mut out = String::with_capacity(3);
    push_column_letters(index, &mut out);
    Ok(out)
}

fn push_column_letters(index: u32, out: &mut String) {
    let mut n = index;
    let mut buf = [0u8; 8];
    let mut len = 0;
    while n > 0 {
        let rem = (n - 1) % 26;
        buf[len] = b'A' + rem as u8;
        len += 1;
        n = (n - 1) / 26;
    }
    for &b in buf[..len].iter().rev() {
        out.push(char::from(b));
    }
}

/// An inclusive, normalized span of 1-based column indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnSpan {
    pub first: u32,
    pub last: u32,
}

impl ColumnSpan {
    /// Every column of a sheet; what a whole-row reference covers.
    pub const ALL: ColumnSpan = ColumnSpan {
        first: 1,
        last: MAX_COLUMNS,
    };

    pub fn new(a: u32, b: u32) -> Self {
        Self {
            first: a.min(b),
            last: a.max(b),
        }
    }

    pub fn contains(&self, col: u32) -> bool {
        self.first <= col && col <= self.last
    }

    pub fn overlaps(&self, other: &ColumnSpan) -> bool {
        self.first <= other.last && other.first <= self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Cell { row: u32, col: u32 },
    Row(u32),
    Col(u32),
}

/// Parse one side of a range: `$A$1`, `A`, `$3`.
pub fn parse_endpoint(s: &str) -> Result<Endpoint, AddressError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(AddressError::Empty);
    }
    let bytes = s.as_bytes();
    let mut idx = 0usize;
    if bytes.get(idx) == Some(&b'$') {
        idx += 1;
    }
    let col_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_alphabetic() {
        idx += 1;
    }
    let col_end = idx;
    if col_end > col_start && bytes.get(idx) == Some(&b'$') {
        idx += 1;
    }
    let row_start = idx;
    while idx < bytes.len() && bytes[idx].is_ascii_digit() {
        idx += 1;
    }
    if idx != bytes.len() {
        return Err(AddressError::InvalidReference(s.to_string()));
    }

    let col = if col_end > col_start {
        Some(column_index(&s[col_start..col_end])?)
    } else {
        None
    };
    let row = if idx > row_start {
        let row: u32 = s[row_start..idx]
            .parse()
            .map_err(|_| AddressError::InvalidRow(s.to_string()))?;
        if row == 0 || row > MAX_ROWS {
            return Err(AddressError::InvalidRow(s.to_string()));
        }
        Some(row)
    } else {
        None
    };

    match (col, row) {
        (Some(col), Some(row)) => Ok(Endpoint::Cell { row, col }),
        (Some(col), None) => Ok(Endpoint::Col(col)),
        (None, Some(row)) => Ok(Endpoint::Row(row)),
        (None, None) => Err(AddressError::InvalidReference(s.to_string())),
    }
}

/// A rectangular area of a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    Cells {
        start_row: u32,
        start_col: u32,
        end_row: u32,
        end_col: u32,
    },
    /// Whole rows (`1:3`).
    Rows { start: u32, end: u32 },
    /// Whole columns (`A:C`).
    Cols { start: u32, end: u32 },
}

impl Area {
    /// Parse `A1`, `A1:B2`, `3:5` or `C:D`.
    pub fn parse(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let (a, b) = s.split_once(':').unwrap_or((s, s));
        match (parse_endpoint(a)?, parse_endpoint(b)?) {
            (Endpoint::Cell { row: r1, col: c1 }, Endpoint::Cell { row: r2, col: c2 }) => {
                Ok(Area::Cells {
                    start_row: r1.min(r2),
                    start_col: c1.min(c2),
                    end_row: r1.max(r2),
                    end_col: c1.max(c2),
                })
            }
            (Endpoint::Row(a), Endpoint::Row(b)) => Ok(Area::Rows {
                start: a.min(b),
                end: a.max(b),
            }),
            (Endpoint::Col(a), Endpoint::Col(b)) => Ok(Area::Cols {
                start: a.min(b),
                end: a.max(b),
            }),
            _ => Err(AddressError::MismatchedEndpoints(s.to_string())),
        }
    }

    /// Columns touched by the area. Whole-row areas span every column.
    pub fn columns(&self) -> ColumnSpan {
        match *self {
            Area::Cells {
                start_col, end_col, ..
            } => ColumnSpan::new(start_col, end_col),
            Area::Rows { .. } => ColumnSpan::ALL,
            Area::Cols { start, end } => ColumnSpan::new(start, end),
        }
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        match *self {
            Area::Cells {
                start_row,
                start_col,
                end_row,
                end_col,
            } => {
                push_column_letters(start_col, &mut out);
                out.push_str(&start_row.to_string());
                if (start_row, start_col) != (end_row, end_col) {
                    out.push(':');
                    push_column_letters(end_col, &mut out);
                    out.push_str(&end_row.to_string());
                }
            }
            Area::Rows { start, end } => out.push_str(&format!("{start}:{end}")),
            Area::Cols { start, end } => {
                push_column_letters(start, &mut out);
                out.push(':');
                push_column_letters(end, &mut out);
            }
        }
        f.write_str(&out)
    }
}

/// An area with the sheet it was qualified with, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaRef {
    pub sheet: Option<String>,
    pub area: Area,
}

impl AreaRef {
    /// Whether this reference points at `sheet`. Unqualified references resolve to `home_sheet`;
    /// references into other workbooks never match.
    pub fn targets(&self, sheet: &str, home_sheet: Option<&str>) -> bool {
        match (self.sheet.as_deref(), home_sheet) {
            (Some(own), _) if is_external_sheet(own) => false,
            (Some(own), _) => sheet_names_match(own, sheet),
            (None, Some(home)) => sheet_names_match(home, sheet),
            (None, None) => false,
        }
    }
}

/// `[1]Prices` or `C:\lists\[Book.xlsx]Prices`. Local sheet names cannot contain brackets.
pub fn is_external_sheet(name: &str) -> bool {
    name.contains('[') || name.contains(']')
}

/// Excel compares sheet names case-insensitively.
pub fn sheet_names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

/// Split a comma-separated union (`Sheet1!$A:$A,Sheet1!$1:$1`), respecting quoted sheet names.
pub fn split_areas(formula: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;
    let bytes = formula.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                if in_quotes {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 1;
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            b',' if !in_quotes => {
                let part = formula[start..i].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    let part = formula[start..].trim();
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// Split an optional sheet prefix off a reference. `''` inside a quoted name is an escaped quote.
pub fn split_sheet_name(input: &str) -> Result<(Option<String>, &str), AddressError> {
    let bytes = input.as_bytes();
    if bytes.is_empty() {
        return Err(AddressError::Empty);
    }

    if bytes[0] == b'\'' {
        let mut sheet = String::new();
        let mut i = 1usize;
        while i < bytes.len() {
            if bytes[i] == b'\'' {
                if bytes.get(i + 1) == Some(&b'\'') {
                    sheet.push('\'');
                    i += 2;
                    continue;
                }
                if bytes.get(i + 1) != Some(&b'!') {
                    return Err(AddressError::InvalidReference(input.to_string()));
                }
                return Ok((Some(sheet), &input[i + 2..]));
            }
            let ch = input[i..]
                .chars()
                .next()
                .ok_or_else(|| AddressError::InvalidReference(input.to_string()))?;
            sheet.push(ch);
            i += ch.len_utf8();
        }
        return Err(AddressError::InvalidReference(input.to_string()));
    }

    match input.rfind('!') {
        Some(idx) => Ok((Some(input[..idx].to_string()), &input[idx + 1..])),
        None => Ok((None, input)),
    }
}

pub fn parse_area_ref(input: &str) -> Result<AreaRef, AddressError> {
    let (sheet, rest) = split_sheet_name(input.trim())?;
    Ok(AreaRef {
        sheet,
        area: Area::parse(rest)?,
    })
}

/// Parse a space-separated `sqref` list (`A1:A10 C1:C10`).
pub fn parse_sqref(sqref: &str) -> Result<Vec<Area>, AddressError> {
    let areas = sqref
        .split_whitespace()
        .map(Area::parse)
        .collect::<Result<Vec<_>, _>>()?;
    if areas.is_empty() {
        return Err(AddressError::Empty);
    }
    Ok(areas)
}

/// Extract the cell, row and column references appearing in a formula.
///
/// String literals, function names and defined names are skipped. A bare word only counts as a
/// reference when it is a cell (`B2`); whole rows and columns need both endpoints (`1:1`, `A:A`).
pub fn formula_references(formula: &str) -> Vec<AreaRef> {
    let formula = formula.trim();
    let formula = formula.strip_prefix('=').unwrap_or(formula);
    let bytes = formula.as_bytes();
    let mut refs = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        match bytes[i] {
            b'"' => i = skip_string_literal(bytes, i),
            // `[1]Sheet!A1` points into another workbook.
            b'[' => {
                let close = formula[i..].find(']').map_or(bytes.len(), |idx| i + idx + 1);
                i = close + word_len(&bytes[close..]);
            }
            b'\'' => match split_sheet_name(&formula[i..]) {
                Ok((sheet, rest)) => {
                    let start = formula.len() - rest.len();
                    let end = start + word_len(&bytes[start..]);
                    if let Some(area) = formula_area(&formula[start..end]) {
                        refs.push(AreaRef { sheet, area });
                    }
                    i = end.max(i + 1);
                }
                Err(_) => i += 1,
            },
            b if is_word_byte(b) => {
                let start = i;
                let end = start + word_len(&bytes[start..]);
                i = end;
                if bytes.get(end) == Some(&b'(') {
                    continue;
                }
                let word = &formula[start..end];
                let (sheet, range) = match word.rfind('!') {
                    Some(idx) => (Some(word[..idx].to_string()), &word[idx + 1..]),
                    None => (None, word),
                };
                if let Some(area) = formula_area(range) {
                    refs.push(AreaRef { sheet, area });
                }
            }
            _ => i += 1,
        }
    }
    refs
}

fn formula_area(range: &str) -> Option<Area> {
    let area = Area::parse(range).ok()?;
    if !range.contains(':') && !matches!(area, Area::Cells { .. }) {
        return None;
    }
    Some(area)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'$' | b':' | b'!') || b >= 0x80
}

fn word_len(bytes: &[u8]) -> usize {
    bytes.iter().take_while(|&&b| is_word_byte(b)).count()
}

fn skip_string_literal(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'"' {
            if bytes.get(i + 1) == Some(&b'"') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn column_letters_roundtrip_known_values() {
        for (letters, index) in [("A", 1), ("Z", 26), ("AA", 27), ("AB", 28), ("BC", 55), ("XFD", 16_384)] {
            assert_eq!(column_index(letters).unwrap(), index);
            assert_eq!(column_letters(index).unwrap(), letters);
        }
        assert_eq!(column_index("ab").unwrap(), 28);
    }

    #[test]
    fn column_bounds_are_excel_compatible() {
        assert!(column_index("XFE").is_err());
        assert!(column_index("AAAA").is_err());
        assert!(column_index("A1").is_err());
        assert!(column_index("").is_err());
        assert_eq!(column_letters(0), Err(AddressError::ColumnOutOfRange(0)));
        assert!(column_letters(MAX_COLUMNS + 1).is_err());
    }

    #[test]
    fn areas_parse_with_row_and_column_endpoints() {
        assert_eq!(
            Area::parse("$B$2:$A$1").unwrap(),
            Area::Cells {
                start_row: 1,
                start_col: 1,
                end_row: 2,
                end_col: 2
            }
        );
        assert_eq!(Area::parse("$1:$3").unwrap(), Area::Rows { start: 1, end: 3 });
        assert_eq!(Area::parse("Z:AB").unwrap(), Area::Cols { start: 26, end: 28 });
        assert_eq!(Area::parse("1:1").unwrap().columns(), ColumnSpan::ALL);
        assert!(matches!(
            Area::parse("A1:3"),
            Err(AddressError::MismatchedEndpoints(_))
        ));
        assert_eq!(Area::parse("Z1:AB10").unwrap().to_string(), "Z1:AB10");
    }

    #[test]
    fn sheet_prefixes_handle_quotes() {
        let r = parse_area_ref("'Bob''s Sheet'!$AA$1:$AA$5").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Bob's Sheet"));
        assert_eq!(r.area.columns(), ColumnSpan::new(27, 27));

        let r = parse_area_ref("Data!$A:$B").unwrap();
        assert_eq!(r.sheet.as_deref(), Some("Data"));
        assert!(parse_area_ref("'Unterminated!A1").is_err());
    }

    #[test]
    fn split_areas_ignores_commas_in_quoted_names() {
        assert_eq!(
            split_areas("'a,b'!$A:$A, Sheet1!$1:$1"),
            vec!["'a,b'!$A:$A", "Sheet1!$1:$1"]
        );
    }

    #[test]
    fn formula_references_skip_literals_and_functions() {
        let refs = formula_references(r#"=IF(COUNTIF($AA$2:$AA$100,"AB1")>0,Lists!B2,'My List'!$C:$C)"#);
        let rendered: Vec<(Option<&str>, String)> = refs
            .iter()
            .map(|r| (r.sheet.as_deref(), r.area.to_string()))
            .collect();
        assert_eq!(
            rendered,
            vec![
                (None, "AA2:AA100".to_string()),
                (Some("Lists"), "B2".to_string()),
                (Some("My List"), "C:C".to_string()),
            ]
        );
    }

    #[test]
    fn formula_references_ignore_names_and_numbers() {
        assert!(formula_references("=Suppliers").is_empty());
        assert!(formula_references("=5").is_empty());
        assert!(formula_references("=LOG10(3)").is_empty());
        assert_eq!(formula_references("=$5:$5").len(), 1);
    }

    #[test]
    fn external_workbook_references_never_target_local_sheets() {
        let refs = formula_references("=[1]Data!$AA$1+'[2]Data'!AA2+Data!AA3");
        assert_eq!(refs.len(), 2);
        let local: Vec<String> = refs
            .iter()
            .filter(|r| r.targets("Data", Some("Data")))
            .map(|r| r.area.to_string())
            .collect();
        assert_eq!(local, vec!["AA3".to_string()]);
        assert!(!parse_area_ref("'C:\\lists\\[Book.xlsx]Data'!$AA:$AA")
            .unwrap()
            .targets("Data", None));
    }

    #[test]
    fn sqref_is_space_separated() {
        let areas = parse_sqref("A1:A10 AA1:AB3").unwrap();
        assert_eq!(areas.len(), 2);
        assert_eq!(areas[1].columns(), ColumnSpan::new(27, 28));
        assert!(parse_sqref("   ").is_err());
    }

    #[test]
    fn unqualified_references_resolve_to_home_sheet() {
        let r = parse_area_ref("A1").unwrap();
        assert!(r.targets("data", Some("Data")));
        assert!(!r.targets("Data", None));
        assert!(!parse_area_ref("Other!A1").unwrap().targets("Data", Some("Data")));
    }
}
