//! XLSX side of fieldgate.
//!
//! - [`XlsxPackage`]: an in-memory Open Packaging Convention (OPC) ZIP (part name -> bytes).
//!   Untouched parts are written back byte-for-byte; saving is atomic.
//! - [`HidingEnforcer`]: hides worksheet columns with one or more independent encodings and
//!   reports what was applied per column.
//! - [`ConflictAuditor`]: read-only scan for tables, filters, merges, validations, names,
//!   conditional formats and print settings that overlap the columns being hidden.
//!
//! Column letters and indices are **1-based** (`A` = 1, `XFD` = 16384).

pub mod address;
pub mod audit;
pub mod cols;
pub mod hide;
pub mod openxml;
pub mod package;
pub mod structures;
pub mod workbook;
mod zip_util;

pub use address::{
    column_index, column_letters, AddressError, Area, AreaRef, ColumnSpan, MAX_COLUMNS, MAX_ROWS,
};
pub use audit::{
    AuditReport, ColumnConflict, ConflictAuditor, ConflictKind, ConflictLocation, Severity,
};
pub use cols::{ColDef, Cols};
pub use hide::{
    ColumnHideReport, EncodingOutcome, EncodingResult, HideEncoding, HideOptions, HideReport,
    HidingEnforcer,
};
pub use package::{PackageLimits, XlsxError, XlsxPackage, MAX_PACKAGE_PART_BYTES, MAX_PACKAGE_TOTAL_BYTES};
pub use structures::{DataValidationRef, TableInfo, WorksheetStructures};
pub use workbook::{DefinedName, SheetInfo};
