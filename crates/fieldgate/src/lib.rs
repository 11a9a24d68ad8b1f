//! Context-driven column gating for spreadsheet templates.
//!
//! Answers to the template questionnaire ([`Context`]) are resolved against a shared
//! [`FieldCatalog`] into per-column decisions. A [`Pipeline`] writes those decisions into an XLSX
//! template, forces the configured columns hidden and audits the workbook for structures that
//! would bring them back.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fieldgate::{Context, FieldCatalog, Pipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(FieldCatalog::from_path("field_mapping.json")?);
//! let pipeline = Pipeline::new(catalog, PipelineConfig::default());
//! let context = Context::from_json_str(&std::fs::read_to_string("context.json")?)?;
//! let outcome = pipeline.run("template_staffel.xlsx", "out.xlsx", &context)?;
//! assert!(!outcome.has_high_conflicts());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use thiserror::Error;

pub mod config;
pub mod output;
pub mod pipeline;

pub use config::{PipelineConfig, DEFAULT_FORCE_HIDDEN_COLUMNS};
pub use fieldgate_rules::{
    CatalogError, Context, ContextError, DecisionResolver, FieldCatalog, FieldDecision,
    Provenance, Resolution, RowValues,
};
pub use fieldgate_xlsx::{
    AuditReport, ConflictAuditor, HideOptions, HideReport, HidingEnforcer, PackageLimits,
    XlsxError, XlsxPackage,
};
pub use output::{OutputStore, Ticket};
pub use pipeline::{apply_decisions, AppliedDecisions, Pipeline, PipelineOutcome};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Xlsx(#[from] XlsxError),
    #[error("invalid pipeline config: {0}")]
    Config(#[source] serde_json::Error),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unknown output ticket {0}")]
    UnknownTicket(Ticket),
}
