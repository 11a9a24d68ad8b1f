//! Column hiding.
//!
//! A column can be hidden in several independent ways. Each requested encoding is applied as its
//! own pass per column: a pass that fails is recorded in the report and the remaining passes still
//! run. Hiding says nothing about whether the column overlaps a table, filter or validation; use
//! [`crate::audit`] for that.

use std::collections::BTreeSet;
use std::fmt;
use std::io::Cursor;

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::address::{column_index, column_letters, parse_endpoint, Area, ColumnSpan, Endpoint};
use crate::cols::{write_cols_to_worksheet_xml, Cols};
use crate::package::{XlsxError, XlsxPackage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HideEncoding {
    /// `hidden="1"`
    HiddenFlag,
    /// `width="0" customWidth="1"`
    ZeroWidth,
    /// `outlineLevel>=1 collapsed="1"`, with the sheet's `outlineLevelCol` raised to match.
    OutlineCollapse,
    /// Remove values and formulas of every cell in the column, keeping the cells and their style.
    ClearContent,
}

impl HideEncoding {
    pub const STRUCTURAL: [HideEncoding; 3] = [
        HideEncoding::HiddenFlag,
        HideEncoding::ZeroWidth,
        HideEncoding::OutlineCollapse,
    ];
}

impl fmt::Display for HideEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HideEncoding::HiddenFlag => "hidden_flag",
            HideEncoding::ZeroWidth => "zero_width",
            HideEncoding::OutlineCollapse => "outline_collapse",
            HideEncoding::ClearContent => "clear_content",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HideOptions {
    pub encodings: Vec<HideEncoding>,
    /// Shorthand for listing [`HideEncoding::ClearContent`] in `encodings`.
    pub clear_content: bool,
    /// Compute the report without touching the package.
    pub dry_run: bool,
}

impl Default for HideOptions {
    fn default() -> Self {
        Self {
            encodings: HideEncoding::STRUCTURAL.to_vec(),
            clear_content: false,
            dry_run: false,
        }
    }
}

impl HideOptions {
    pub fn wants(&self, encoding: HideEncoding) -> bool {
        self.encodings.contains(&encoding)
            || (encoding == HideEncoding::ClearContent && self.clear_content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EncodingOutcome {
    Applied,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingResult {
    pub encoding: HideEncoding,
    pub outcome: EncodingOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnHideReport {
    /// The column as requested, upper-cased.
    pub column: String,
    pub index: Option<u32>,
    pub results: Vec<EncodingResult>,
    /// Cells whose content was removed by [`HideEncoding::ClearContent`].
    pub cleared_cells: usize,
    /// Set when the column could not be addressed at all.
    pub error: Option<String>,
}

impl ColumnHideReport {
    fn new(column: String, index: Option<u32>) -> Self {
        Self {
            column,
            index,
            results: Vec::new(),
            cleared_cells: 0,
            error: None,
        }
    }

    /// Every requested encoding was applied.
    pub fn fully_applied(&self) -> bool {
        self.error.is_none()
            && self
                .results
                .iter()
                .all(|r| r.outcome == EncodingOutcome::Applied)
    }

    pub fn outcome(&self, encoding: HideEncoding) -> Option<&EncodingOutcome> {
        self.results
            .iter()
            .find(|r| r.encoding == encoding)
            .map(|r| &r.outcome)
    }

    fn record(&mut self, encoding: HideEncoding, result: Result<(), XlsxError>) {
        let outcome = match result {
            Ok(()) => EncodingOutcome::Applied,
            Err(err) => {
                log::warn!("{encoding} failed for column {}: {err}", self.column);
                EncodingOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };
        self.results.push(EncodingResult { encoding, outcome });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HideReport {
    pub sheet: String,
    pub part: String,
    pub dry_run: bool,
    pub columns: Vec<ColumnHideReport>,
}

impl HideReport {
    pub fn fully_applied(&self) -> bool {
        self.columns.iter().all(ColumnHideReport::fully_applied)
    }

    pub fn column(&self, column: &str) -> Option<&ColumnHideReport> {
        self.columns
            .iter()
            .find(|c| c.column.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HidingEnforcer {
    options: HideOptions,
}

impl HidingEnforcer {
    pub fn new(options: HideOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HideOptions {
        &self.options
    }

    /// Hide `columns` on `sheet`.
    ///
    /// Errors only when the sheet cannot be located, read or written back. Per-column and
    /// per-encoding problems are reported in the returned [`HideReport`].
    pub fn enforce<S: AsRef<str>>(
        &self,
        package: &mut XlsxPackage,
        sheet: &str,
        columns: &[S],
    ) -> Result<HideReport, XlsxError> {
        let info = package.sheet(sheet)?;
        let original = package.part_str(&info.part)?.to_string();
        let mut cols = Cols::from_worksheet_xml(&original)?;

        let mut reports = Vec::with_capacity(columns.len());
        let mut seen = BTreeSet::new();
        for column in columns {
            let label = column.as_ref().trim().to_ascii_uppercase();
            match column_index(&label) {
                Ok(index) => {
                    if seen.insert(index) {
                        reports.push(ColumnHideReport::new(label, Some(index)));
                    }
                }
                Err(err) => {
                    log::warn!("cannot hide column {label:?}: {err}");
                    let mut report = ColumnHideReport::new(label, None);
                    report.error = Some(err.to_string());
                    reports.push(report);
                }
            }
        }

        let mut collapsed_any = false;
        for encoding in HideEncoding::STRUCTURAL {
            if !self.options.wants(encoding) {
                continue;
            }
            for report in reports.iter_mut() {
                let Some(index) = report.index else { continue };
                let result = apply_structural(&mut cols, index, encoding);
                collapsed_any |= encoding == HideEncoding::OutlineCollapse && result.is_ok();
                report.record(encoding, result);
            }
        }

        let outline_level_col = collapsed_any.then(|| cols.max_outline_level());
        let mut xml = write_cols_to_worksheet_xml(&original, &cols, outline_level_col)?;

        if self.options.wants(HideEncoding::ClearContent) {
            for report in reports.iter_mut() {
                let Some(index) = report.index else { continue };
                let result = clear_column_content(&xml, index).map(|(cleared, count)| {
                    xml = cleared;
                    report.cleared_cells = count;
                });
                report.record(HideEncoding::ClearContent, result);
            }
        }

        if !self.options.dry_run && xml != original {
            package.set_part(info.part.clone(), xml.into_bytes());
        }

        let report = HideReport {
            sheet: info.name,
            part: info.part,
            dry_run: self.options.dry_run,
            columns: reports,
        };
        log::debug!(
            "hid {} of {} columns on {:?}{}",
            report.columns.iter().filter(|c| c.fully_applied()).count(),
            report.columns.len(),
            report.sheet,
            if report.dry_run { " (dry run)" } else { "" }
        );
        Ok(report)
    }
}

fn apply_structural(cols: &mut Cols, index: u32, encoding: HideEncoding) -> Result<(), XlsxError> {
    match encoding {
        HideEncoding::HiddenFlag => {
            cols.isolate(index).set_attr("hidden", "1");
        }
        HideEncoding::ZeroWidth => {
            let def = cols.isolate(index);
            def.set_attr("width", "0");
            def.set_attr("customWidth", "1");
        }
        HideEncoding::OutlineCollapse => {
            // Validate before isolating so a failure leaves the model untouched.
            let level = match cols.get(index) {
                Some(def) => def.outline_level()?,
                None => 0,
            };
            let def = cols.isolate(index);
            def.set_attr("outlineLevel", level.max(1).to_string());
            def.set_attr("collapsed", "1");
        }
        HideEncoding::ClearContent => {
            return Err(XlsxError::Invalid(
                "clear_content is not a <col> encoding".to_string(),
            ))
        }
    }
    Ok(())
}

/// Strip values, formulas and inline strings from every cell in column `col`.
///
/// Cells stay in place with their `s` attribute so formatting survives. Refuses to clear a cell
/// that anchors a shared formula reaching into other columns, since those cells would lose their
/// formula.
pub fn clear_column_content(xml: &str, col: u32) -> Result<(String, usize), XlsxError> {
    let target = ColumnSpan::new(col, col);
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::with_capacity(xml.len())));

    let mut buf = Vec::new();
    let mut in_sheet_data = false;
    let mut next_col = 1u32;
    let mut skipping_cell_depth: Option<usize> = None;
    let mut current_cell = String::new();
    let mut cleared = 0usize;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(e) => {
                if let Some(depth) = skipping_cell_depth {
                    check_shared_formula(&e, target, &current_cell)?;
                    skipping_cell_depth = Some(depth + 1);
                } else {
                    let mut clear = false;
                    match e.local_name().as_ref() {
                        b"sheetData" => in_sheet_data = true,
                        b"row" => next_col = 1,
                        b"c" if in_sheet_data => clear = cell_column(&e, &mut next_col)? == col,
                        _ => {}
                    }
                    if clear {
                        current_cell = cell_label(&e)?;
                        writer.write_event(Event::Empty(strip_value_attrs(&e)?))?;
                        skipping_cell_depth = Some(1);
                        cleared += 1;
                    } else {
                        writer.write_event(Event::Start(e))?;
                    }
                }
            }
            Event::Empty(e) => {
                if skipping_cell_depth.is_some() {
                    check_shared_formula(&e, target, &current_cell)?;
                } else {
                    let mut clear = false;
                    match e.local_name().as_ref() {
                        b"row" => next_col = 1,
                        b"c" if in_sheet_data => clear = cell_column(&e, &mut next_col)? == col,
                        _ => {}
                    }
                    if clear {
                        writer.write_event(Event::Empty(strip_value_attrs(&e)?))?;
                    } else {
                        writer.write_event(Event::Empty(e))?;
                    }
                }
            }
            Event::End(e) => match skipping_cell_depth {
                Some(1) => skipping_cell_depth = None,
                Some(depth) => skipping_cell_depth = Some(depth - 1),
                None => {
                    if e.local_name().as_ref() == b"sheetData" {
                        in_sheet_data = false;
                    }
                    writer.write_event(Event::End(e))?;
                }
            },
            other => {
                if skipping_cell_depth.is_none() {
                    writer.write_event(other)?;
                }
            }
        }
        buf.clear();
    }

    Ok((String::from_utf8(writer.into_inner().into_inner())?, cleared))
}

/// Column of a `<c>`; cells without `r` follow the previous cell of the row.
fn cell_column(e: &BytesStart<'_>, next_col: &mut u32) -> Result<u32, XlsxError> {
    let mut col = *next_col;
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            let r = attr.unescape_value()?;
            col = match parse_endpoint(&r) {
                Ok(Endpoint::Cell { col, .. }) => col,
                _ => return Err(XlsxError::Invalid(format!("invalid cell reference {r:?}"))),
            };
        }
    }
    *next_col = col.saturating_add(1);
    Ok(col)
}

fn cell_label(e: &BytesStart<'_>) -> Result<String, XlsxError> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"r" {
            return Ok(attr.unescape_value()?.into_owned());
        }
    }
    Ok(String::new())
}

fn strip_value_attrs(e: &BytesStart<'_>) -> Result<BytesStart<'static>, XlsxError> {
    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut out = BytesStart::new(tag);
    for attr in e.attributes() {
        let attr = attr?;
        // Type and value metadata describe the removed value.
        if matches!(attr.key.as_ref(), b"t" | b"cm" | b"vm") {
            continue;
        }
        out.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    Ok(out)
}

fn check_shared_formula(
    e: &BytesStart<'_>,
    target: ColumnSpan,
    cell: &str,
) -> Result<(), XlsxError> {
    if e.local_name().as_ref() != b"f" {
        return Ok(());
    }
    let mut shared = false;
    let mut reference = None;
    for attr in e.attributes() {
        let attr = attr?;
        match attr.key.as_ref() {
            b"t" => shared = attr.value.as_ref() == b"shared",
            b"ref" => reference = Some(attr.unescape_value()?.into_owned()),
            _ => {}
        }
    }
    let (true, Some(reference)) = (shared, reference) else {
        return Ok(());
    };
    let spans_other_columns = Area::parse(&reference)
        .map(|area| area.columns() != target)
        .unwrap_or(true);
    if spans_other_columns {
        let column = column_letters(target.first).unwrap_or_default();
        return Err(XlsxError::Invalid(format!(
            "cell {cell} anchors shared formula {reference} beyond column {column}"
        )));
    }
    Ok(())
}
