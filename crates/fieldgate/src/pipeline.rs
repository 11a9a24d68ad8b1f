use std::path::Path;
use std::sync::Arc;

use fieldgate_rules::{
    Context, DecisionResolver, FieldCatalog, FieldDecision, Provenance, Resolution, RowValues,
};
use fieldgate_xlsx::{
    column_index, AuditReport, Cols, ConflictAuditor, HideReport, HidingEnforcer, XlsxError,
    XlsxPackage,
};

use crate::config::PipelineConfig;
use crate::output::{OutputStore, Ticket};
use crate::PipelineError;

/// What [`apply_decisions`] changed on a sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedDecisions {
    pub sheet: String,
    /// Columns now carrying `hidden="1"`.
    pub hidden: Vec<String>,
    /// Columns that were hidden in the template and are visible again.
    pub shown: Vec<String>,
    /// Decision columns that are not valid column letters.
    pub skipped: Vec<String>,
}

/// Set `hidden = !visible` for every decision column of `sheet`.
///
/// Mandatory styling and notes are left to the caller; only visibility is written here.
pub fn apply_decisions(
    package: &mut XlsxPackage,
    sheet: &str,
    decisions: &[FieldDecision],
) -> Result<AppliedDecisions, XlsxError> {
    let info = package.sheet(sheet)?;
    let original = package.part_str(&info.part)?.to_string();
    let mut cols = Cols::from_worksheet_xml(&original)?;

    let mut applied = AppliedDecisions {
        sheet: info.name.clone(),
        ..AppliedDecisions::default()
    };
    for decision in decisions {
        let column = decision.column_reference();
        let index = match column_index(column) {
            Ok(index) => index,
            Err(err) => {
                log::warn!(
                    "field {:?} has unusable column {column:?}: {err}",
                    decision.field_name()
                );
                applied.skipped.push(column.to_string());
                continue;
            }
        };

        if !decision.visible() {
            cols.isolate(index).set_attr("hidden", "1");
            applied.hidden.push(column.to_string());
        } else if cols.get(index).is_some_and(|def| def.is_hidden()) {
            cols.isolate(index).remove_attr("hidden");
            applied.shown.push(column.to_string());
        }
    }

    if !applied.hidden.is_empty() || !applied.shown.is_empty() {
        let xml = fieldgate_xlsx::cols::write_cols_to_worksheet_xml(&original, &cols, None)?;
        package.set_part(info.part, xml.into_bytes());
    }
    log::debug!(
        "applied decisions on {:?}: {} hidden, {} shown",
        applied.sheet,
        applied.hidden.len(),
        applied.shown.len()
    );
    Ok(applied)
}

/// Everything one processing run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub sheet: String,
    pub preset_code: String,
    pub template_basename: &'static str,
    pub provenance: Provenance,
    pub resolution: Resolution,
    pub applied: AppliedDecisions,
    pub hide: HideReport,
    pub audits: Vec<AuditReport>,
}

impl PipelineOutcome {
    pub fn has_high_conflicts(&self) -> bool {
        self.audits.iter().any(AuditReport::has_high)
    }

    /// Suggested file name for the generated template.
    pub fn download_name(&self) -> String {
        format!("{}_{}.xlsx", self.template_basename, self.preset_code)
    }
}

/// One processing unit: resolve decisions, apply them, force-hide columns and audit.
///
/// The catalog is shared; a pipeline can be cloned cheaply and used from several threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    catalog: Arc<FieldCatalog>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(catalog: Arc<FieldCatalog>, config: PipelineConfig) -> Self {
        Self { catalog, config }
    }

    pub fn from_catalog_path(
        path: impl AsRef<Path>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self::new(Arc::new(FieldCatalog::from_path(path)?), config))
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process(
        &self,
        package: &mut XlsxPackage,
        context: &Context,
    ) -> Result<PipelineOutcome, PipelineError> {
        self.process_row(package, context, &RowValues::new())
    }

    /// Like [`Pipeline::process`], evaluating field dependencies against `row`.
    pub fn process_row(
        &self,
        package: &mut XlsxPackage,
        context: &Context,
        row: &RowValues,
    ) -> Result<PipelineOutcome, PipelineError> {
        let resolution = DecisionResolver::new(&self.catalog).resolve_row(context, row)?;

        let sheet = match &self.config.sheet {
            Some(name) => package.sheet(name)?,
            None => package
                .sheets()?
                .into_iter()
                .next()
                .ok_or_else(|| XlsxError::Invalid("workbook has no sheets".to_string()))?,
        };

        let applied = apply_decisions(package, &sheet.name, &resolution.decisions)?;
        let hide = HidingEnforcer::new(self.config.hide.clone()).enforce(
            package,
            &sheet.name,
            &self.config.force_hidden_columns,
        )?;

        let auditor = ConflictAuditor::new(package);
        let audits = if self.config.audit_all_sheets {
            auditor.audit_workbook(&self.config.force_hidden_columns)?
        } else {
            vec![auditor.audit_sheet(&sheet.name, &self.config.force_hidden_columns)?]
        };

        let outcome = PipelineOutcome {
            sheet: sheet.name,
            preset_code: context.preset_code(),
            template_basename: context.template_basename(),
            provenance: Provenance::for_context(context),
            resolution,
            applied,
            hide,
            audits,
        };
        if outcome.has_high_conflicts() {
            log::warn!(
                "{} still has high severity conflicts on hidden columns",
                outcome.download_name()
            );
        }
        Ok(outcome)
    }

    /// Open `input`, process it and save the result atomically to `output`.
    pub fn run(
        &self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        context: &Context,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut package = XlsxPackage::open(input, self.config.limits)?;
        let outcome = self.process(&mut package, context)?;
        package.save(output)?;
        Ok(outcome)
    }

    /// Open `input`, process it and hand the result to `store`.
    pub fn generate(
        &self,
        input: impl AsRef<Path>,
        context: &Context,
        store: &mut OutputStore,
    ) -> Result<(Ticket, PipelineOutcome), PipelineError> {
        let mut package = XlsxPackage::open(input, self.config.limits)?;
        let outcome = self.process(&mut package, context)?;
        let ticket = store.create(&package, outcome.download_name())?;
        Ok((ticket, outcome))
    }
}
