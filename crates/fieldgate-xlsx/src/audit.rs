//! Read-only detection of workbook structures that overlap columns meant to be hidden.
//!
//! Conflicts are reported, never repaired. A malformed reference inside an otherwise readable
//! part is logged and skipped; unreadable XML is an error.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::address::{
    column_index, column_letters, formula_references, parse_area_ref, parse_sqref, split_areas,
    Area, ColumnSpan,
};
use crate::cols::Cols;
use crate::package::{XlsxError, XlsxPackage};
use crate::structures::WorksheetStructures;
use crate::workbook::{DefinedName, SheetInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    StructuredTable,
    AutoFilter,
    MergedCells,
    DataValidation,
    NamedRange,
    ConditionalFormatting,
    PrintArea,
    PrintTitles,
    /// A `<col>` range over a target column that still takes up space.
    ColumnDefinition,
}

impl ConflictKind {
    /// Worst severity of the kind. A hidden column definition that keeps its width is reported
    /// as [`Severity::Medium`].
    pub fn severity(self) -> Severity {
        match self {
            ConflictKind::StructuredTable
            | ConflictKind::AutoFilter
            | ConflictKind::MergedCells
            | ConflictKind::ColumnDefinition => Severity::High,
            ConflictKind::DataValidation | ConflictKind::NamedRange => Severity::Medium,
            ConflictKind::ConditionalFormatting
            | ConflictKind::PrintArea
            | ConflictKind::PrintTitles => Severity::Low,
        }
    }

    /// Manual remediation hint.
    pub fn recommendation(self) -> &'static str {
        match self {
            ConflictKind::StructuredTable => {
                "Move the table away from the hidden columns or shrink its range to exclude them"
            }
            ConflictKind::AutoFilter => "Narrow the autofilter range so it ends before the hidden columns",
            ConflictKind::MergedCells => "Unmerge cells that span hidden columns",
            ConflictKind::DataValidation => {
                "Move validation source data to a separate lookup sheet"
            }
            ConflictKind::NamedRange => "Redefine named ranges so they exclude the hidden columns",
            ConflictKind::ConditionalFormatting => {
                "Remove conditional formatting from the hidden columns"
            }
            ConflictKind::PrintArea => "Adjust the print area to exclude the hidden columns",
            ConflictKind::PrintTitles => "Pick print title columns outside the hidden columns",
            ConflictKind::ColumnDefinition => {
                "Mark the column definition hidden=\"1\" with width=\"0\""
            }
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConflictKind::StructuredTable => "structured table",
            ConflictKind::AutoFilter => "autofilter",
            ConflictKind::MergedCells => "merged cells",
            ConflictKind::DataValidation => "data validation",
            ConflictKind::NamedRange => "named range",
            ConflictKind::ConditionalFormatting => "conditional formatting",
            ConflictKind::PrintArea => "print area",
            ConflictKind::PrintTitles => "print titles",
            ConflictKind::ColumnDefinition => "column definition",
        })
    }
}

/// Where a conflicting structure is declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictLocation {
    pub sheet: String,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnConflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    pub location: ConflictLocation,
    pub detail: String,
    /// Audited columns the structure overlaps, as letters.
    pub columns: Vec<String>,
    pub recommendation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub sheet: String,
    pub columns: Vec<String>,
    /// Requested columns that are not valid column letters.
    pub invalid_columns: Vec<String>,
    pub conflicts: Vec<ColumnConflict>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn has_high(&self) -> bool {
        self.conflicts.iter().any(|c| c.severity == Severity::High)
    }

    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::from([
            (Severity::High, 0),
            (Severity::Medium, 0),
            (Severity::Low, 0),
        ]);
        for conflict in &self.conflicts {
            *counts.entry(conflict.severity).or_default() += 1;
        }
        counts
    }

    pub fn kind_counts(&self) -> BTreeMap<ConflictKind, usize> {
        let mut counts = BTreeMap::new();
        for conflict in &self.conflicts {
            *counts.entry(conflict.kind).or_default() += 1;
        }
        counts
    }

    /// One hint per conflicting kind, most severe first.
    pub fn recommendations(&self) -> Vec<&'static str> {
        let mut kinds: Vec<ConflictKind> = self.kind_counts().into_keys().collect();
        kinds.sort_by_key(|kind| std::cmp::Reverse(kind.severity()));
        kinds.into_iter().map(ConflictKind::recommendation).collect()
    }

    pub fn conflicts_for(&self, column: &str) -> impl Iterator<Item = &ColumnConflict> + '_ {
        let column = column.trim().to_ascii_uppercase();
        self.conflicts
            .iter()
            .filter(move |c| c.columns.iter().any(|col| *col == column))
    }
}

/// Target columns resolved to indices, in request order.
struct Targets {
    indices: Vec<u32>,
}

impl Targets {
    fn overlapping<'a>(&self, areas: impl IntoIterator<Item = &'a Area>) -> Vec<u32> {
        let spans: Vec<ColumnSpan> = areas.into_iter().map(Area::columns).collect();
        self.indices
            .iter()
            .copied()
            .filter(|col| spans.iter().any(|span| span.contains(*col)))
            .collect()
    }
}

pub struct ConflictAuditor<'a> {
    package: &'a XlsxPackage,
}

impl<'a> ConflictAuditor<'a> {
    pub fn new(package: &'a XlsxPackage) -> Self {
        Self { package }
    }

    /// Audit `columns` of `sheet` against every structure in the workbook that can reach them.
    pub fn audit_sheet<S: AsRef<str>>(
        &self,
        sheet: &str,
        columns: &[S],
    ) -> Result<AuditReport, XlsxError> {
        let sheets = self.package.sheets()?;
        let target = sheets
            .iter()
            .find(|s| crate::address::sheet_names_match(&s.name, sheet))
            .ok_or_else(|| XlsxError::MissingSheet(sheet.to_string()))?;
        let names = self.package.defined_names()?;
        let structures = sheets
            .iter()
            .map(|s| Ok((s, self.package.worksheet_structures(s)?)))
            .collect::<Result<Vec<_>, XlsxError>>()?;
        self.audit_with(&sheets, target, &structures, &names, columns)
    }

    /// Audit the same columns on every worksheet, in tab order.
    pub fn audit_workbook<S: AsRef<str>>(&self, columns: &[S]) -> Result<Vec<AuditReport>, XlsxError> {
        let sheets = self.package.sheets()?;
        let names = self.package.defined_names()?;
        let structures = sheets
            .iter()
            .map(|s| Ok((s, self.package.worksheet_structures(s)?)))
            .collect::<Result<Vec<_>, XlsxError>>()?;
        sheets
            .iter()
            .map(|target| self.audit_with(&sheets, target, &structures, &names, columns))
            .collect()
    }

    fn audit_with<S: AsRef<str>>(
        &self,
        sheets: &[SheetInfo],
        target: &SheetInfo,
        structures: &[(&SheetInfo, WorksheetStructures)],
        names: &[DefinedName],
        columns: &[S],
    ) -> Result<AuditReport, XlsxError> {
        let mut report = AuditReport {
            sheet: target.name.clone(),
            columns: Vec::new(),
            invalid_columns: Vec::new(),
            conflicts: Vec::new(),
        };
        let mut targets = Targets {
            indices: Vec::new(),
        };
        for column in columns {
            let label = column.as_ref().trim().to_ascii_uppercase();
            match column_index(&label) {
                Ok(index) if !targets.indices.contains(&index) => {
                    targets.indices.push(index);
                    report.columns.push(label);
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("skipping audit of column {label:?}: {err}");
                    report.invalid_columns.push(label);
                }
            }
        }

        let mut collector = Collector {
            targets: &targets,
            conflicts: &mut report.conflicts,
        };

        for (sheet, found) in structures {
            let own = sheet.part == target.part;
            if own {
                for table in self.package.sheet_tables(sheet, found)? {
                    collector.areas(
                        ConflictKind::StructuredTable,
                        &sheet.name,
                        &table.reference,
                        format!("table {:?} ({})", table.name, table.reference),
                    );
                }
                if let Some(reference) = &found.auto_filter {
                    collector.areas(
                        ConflictKind::AutoFilter,
                        &sheet.name,
                        reference,
                        format!("autofilter {reference}"),
                    );
                }
                for merged in &found.merge_cells {
                    collector.areas(
                        ConflictKind::MergedCells,
                        &sheet.name,
                        merged,
                        format!("merged cells {merged}"),
                    );
                }
                let cols = Cols::from_worksheet_xml(self.package.part_str(&sheet.part)?)?;
                for def in cols.defs() {
                    let hidden = def.is_hidden();
                    if hidden && def.width().is_some_and(|width| width == 0.0) {
                        continue;
                    }
                    let area = Area::Cols {
                        start: def.min,
                        end: def.max,
                    };
                    let width = def.attr("width").unwrap_or("default");
                    collector.push_with(
                        ConflictKind::ColumnDefinition,
                        if hidden { Severity::Medium } else { Severity::High },
                        &sheet.name,
                        &area.to_string(),
                        if hidden {
                            format!("hidden column definition {area} keeps width {width}")
                        } else {
                            format!("column definition {area} is not hidden (width {width})")
                        },
                        &[area],
                    );
                }
                for sqref in &found.conditional_formats {
                    collector.areas(
                        ConflictKind::ConditionalFormatting,
                        &sheet.name,
                        sqref,
                        format!("conditional formatting on {sqref}"),
                    );
                }
            }

            for validation in &found.data_validations {
                if own {
                    collector.areas(
                        ConflictKind::DataValidation,
                        &sheet.name,
                        &validation.sqref,
                        format!("data validation applied to {}", validation.sqref),
                    );
                }
                for formula in &validation.formulas {
                    let areas: Vec<Area> = formula_references(formula)
                        .into_iter()
                        .filter(|r| r.targets(&target.name, Some(&sheet.name)))
                        .map(|r| r.area)
                        .collect();
                    collector.push(
                        ConflictKind::DataValidation,
                        &sheet.name,
                        &validation.sqref,
                        format!(
                            "data validation on {} reads {}",
                            validation.sqref,
                            formula.trim()
                        ),
                        &areas,
                    );
                }
            }
        }

        for name in names {
            let kind = if name.is_print_area() {
                ConflictKind::PrintArea
            } else if name.is_print_titles() {
                ConflictKind::PrintTitles
            } else {
                ConflictKind::NamedRange
            };
            let home = name
                .local_sheet_id
                .and_then(|id| sheets.iter().find(|s| s.position == id as usize))
                .map(|s| s.name.as_str());

            let mut areas = Vec::new();
            for piece in split_areas(&name.formula) {
                match parse_area_ref(piece) {
                    Ok(area_ref) => {
                        if area_ref.targets(&target.name, home) {
                            areas.push(area_ref.area);
                        }
                    }
                    // Constants and formulas are not ranges; references inside them still count.
                    Err(_) => areas.extend(
                        formula_references(piece)
                            .into_iter()
                            .filter(|r| r.targets(&target.name, home))
                            .map(|r| r.area),
                    ),
                }
            }
            collector.push(
                kind,
                home.unwrap_or(&target.name),
                &name.formula,
                format!("defined name {}", name.name),
                &areas,
            );
        }

        for conflict in report.conflicts.iter().filter(|c| c.severity == Severity::High) {
            log::warn!(
                "{} on {}!{} overlaps hidden columns {}",
                conflict.kind,
                conflict.location.sheet,
                conflict.location.reference,
                conflict.columns.join(",")
            );
        }
        log::debug!(
            "audited {} columns on {:?}: {} conflicts",
            report.columns.len(),
            report.sheet,
            report.conflicts.len()
        );
        Ok(report)
    }
}

struct Collector<'r> {
    targets: &'r Targets,
    conflicts: &'r mut Vec<ColumnConflict>,
}

impl Collector<'_> {
    /// Record a conflict for a space-separated list of areas written on `sheet`.
    fn areas(&mut self, kind: ConflictKind, sheet: &str, reference: &str, detail: String) {
        match parse_sqref(reference) {
            Ok(areas) => self.push(kind, sheet, reference, detail, &areas),
            Err(err) => log::warn!("skipping {kind} with reference {reference:?} on {sheet:?}: {err}"),
        }
    }

    fn push(
        &mut self,
        kind: ConflictKind,
        sheet: &str,
        reference: &str,
        detail: String,
        areas: &[Area],
    ) {
        self.push_with(kind, kind.severity(), sheet, reference, detail, areas);
    }

    fn push_with(
        &mut self,
        kind: ConflictKind,
        severity: Severity,
        sheet: &str,
        reference: &str,
        detail: String,
        areas: &[Area],
    ) {
        let overlapping = self.targets.overlapping(areas);
        if overlapping.is_empty() {
            return;
        }
        self.conflicts.push(ColumnConflict {
            kind,
            severity,
            location: ConflictLocation {
                sheet: sheet.to_string(),
                reference: reference.to_string(),
            },
            detail,
            columns: overlapping
                .into_iter()
                .filter_map(|col| column_letters(col).ok())
                .collect(),
            recommendation: kind.recommendation(),
        });
    }
}
