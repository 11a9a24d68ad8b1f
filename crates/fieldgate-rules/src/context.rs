use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generator version recorded in a fresh [`Context`] and in provenance blocks.
pub const DEFAULT_CONTEXT_VERSION: &str = "v1.0.0";

/// Institutions accepted in [`Context::institutions`].
///
/// Institution names double as labels, so an unknown (typoed) name would silently never match any
/// `visible_only` rule. Validation rejects them instead.
pub const KNOWN_INSTITUTIONS: &[&str] = &[
    "UMCU",
    "LUMC",
    "AMC",
    "VUmc",
    "Erasmus MC",
    "MUMC",
    "UMC Groningen",
    "Radboudumc",
    "Isala",
    "MST",
    "Catharina",
    "Elisabeth-TweeSteden",
    "Franciscus",
    "HagaZiekenhuis",
    "HMC",
    "Jeroen Bosch",
    "Maasstad",
    "Medisch Spectrum Twente",
    "OLVG",
    "Reinier de Graaf",
    "Rijnstate",
    "Sint Antonius",
    "Sint Franciscus",
    "Spaarne Gasthuis",
    "Tergooi",
    "Zuyderland",
    "ZGT",
    "Ziekenhuis Gelderse Vallei",
    "Zorggroep Twente",
    "Admiraal De Ruyter",
    "Albert Schweitzer",
    "Alrijne",
    "Amphia",
];

/// Label emitted for GS1 contexts (`gs1` and `gs1_only`).
pub const LABEL_GS1: &str = "gs1";
/// Additional label emitted for `gs1_only` contexts.
pub const LABEL_GS1_ONLY: &str = "gs1_only";
/// Label emitted for non-GS1 contexts.
pub const LABEL_NO_GS1: &str = "none";
pub const LABEL_STAFFEL: &str = "staffel";
pub const LABEL_ORDERABLE_TRUE: &str = "orderable_true";
pub const LABEL_ORDERABLE_FALSE: &str = "orderable_false";
pub const LABEL_CHEMICALS: &str = "chemicals";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateChoice {
    Standard,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gs1Mode {
    None,
    Gs1,
    Gs1Only,
}

impl Gs1Mode {
    pub fn is_gs1(self) -> bool {
        matches!(self, Gs1Mode::Gs1 | Gs1Mode::Gs1Only)
    }

    fn preset_code(self) -> &'static str {
        match self {
            Gs1Mode::Gs1Only => "GS1ONLY",
            Gs1Mode::Gs1 => "GS1",
            Gs1Mode::None => "COMM",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Medisch,
    Lab,
    Facilitair,
    Mixed,
}

impl ProductType {
    /// The label (and serialized form) of this product type.
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Medisch => "medisch",
            ProductType::Lab => "lab",
            ProductType::Facilitair => "facilitair",
            ProductType::Mixed => "mixed",
        }
    }

    fn preset_code(self) -> &'static str {
        match self {
            ProductType::Medisch => "MED",
            ProductType::Lab => "LAB",
            ProductType::Facilitair => "FAC",
            ProductType::Mixed => "MIX",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unordered, membership-only set of labels.
///
/// Labels are stored sorted so traces and serialized forms are stable; callers must not attach
/// meaning to the order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>) -> bool {
        self.0.insert(label.into())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// Labels of `candidates` that are members of this set, in `candidates` order.
    pub fn matching<'a>(&self, candidates: &'a [String]) -> Vec<&'a str> {
        candidates
            .iter()
            .filter(|label| self.contains(label))
            .map(String::as_str)
            .collect()
    }

    pub fn intersects(&self, candidates: &[String]) -> bool {
        candidates.iter().any(|label| self.contains(label))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Answers to the template questionnaire.
///
/// A `Context` is built per request, validated, projected to a [`LabelSet`] and discarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub template_choice: TemplateChoice,
    pub gs1_mode: Gs1Mode,
    pub all_orderable: bool,
    pub product_type: ProductType,
    pub has_chemicals: bool,
    pub is_staffel_file: bool,
    #[serde(default)]
    pub institutions: Vec<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    DEFAULT_CONTEXT_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid context: {}", .messages.join("; "))]
pub struct ContextError {
    pub messages: Vec<String>,
}

impl Context {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Project the context onto the labels used by catalog rules.
    pub fn labels(&self) -> LabelSet {
        let mut labels = LabelSet::new();
        labels.insert(self.product_type.as_str());

        if self.gs1_mode.is_gs1() {
            labels.insert(LABEL_GS1);
        } else {
            labels.insert(LABEL_NO_GS1);
        }
        if self.gs1_mode == Gs1Mode::Gs1Only {
            labels.insert(LABEL_GS1_ONLY);
        }

        if self.is_staffel_file {
            labels.insert(LABEL_STAFFEL);
        }

        labels.insert(if self.all_orderable {
            LABEL_ORDERABLE_TRUE
        } else {
            LABEL_ORDERABLE_FALSE
        });

        if self.has_chemicals {
            labels.insert(LABEL_CHEMICALS);
        }

        for institution in &self.institutions {
            labels.insert(institution.as_str());
        }

        labels
    }

    /// Check the answers for unknown institutions and contradictory combinations.
    ///
    /// Every problem is reported, not just the first one.
    pub fn validate(&self) -> Result<(), ContextError> {
        let mut messages = Vec::new();

        let unknown: Vec<&str> = self
            .institutions
            .iter()
            .map(String::as_str)
            .filter(|name| !KNOWN_INSTITUTIONS.contains(name))
            .collect();
        if !unknown.is_empty() {
            messages.push(format!("unknown institutions: {}", unknown.join(", ")));
        }

        if self.gs1_mode == Gs1Mode::Gs1Only && !self.all_orderable {
            messages.push("gs1_only mode requires orderable terminology".to_string());
        }

        if self.is_staffel_file && self.gs1_mode == Gs1Mode::Gs1Only {
            messages.push("staffel templates are not compatible with gs1_only mode".to_string());
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(ContextError { messages })
        }
    }

    /// Compact code summarizing the context, e.g. `MED-GS1-ORDER` or `LAB-COMM-PACK-STAFF-CHEM`.
    pub fn preset_code(&self) -> String {
        let mut parts = vec![
            self.product_type.preset_code(),
            self.gs1_mode.preset_code(),
            if self.all_orderable { "ORDER" } else { "PACK" },
        ];
        if self.is_staffel_file {
            parts.push("STAFF");
        }
        if self.has_chemicals {
            parts.push("CHEM");
        }
        parts.join("-")
    }

    /// Base name (without extension) of the template file this context starts from.
    pub fn template_basename(&self) -> &'static str {
        if self.is_staffel_file {
            "template_staffel"
        } else if self.all_orderable {
            "template_besteleenheid"
        } else {
            "template_verpakkingseenheid"
        }
    }
}

/// Generator identity recorded in a [`Provenance`] block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorInfo {
    pub name: String,
    pub version: String,
}

impl Default for GeneratorInfo {
    fn default() -> Self {
        Self {
            name: "fieldgate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Serializable record of how a document was generated.
///
/// Embedding it into a workbook is up to the document layer; this type only round-trips through
/// JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub context: Context,
    pub preset_code: String,
    pub labels: LabelSet,
    #[serde(default)]
    pub generator: GeneratorInfo,
}

impl Provenance {
    pub fn for_context(context: &Context) -> Self {
        Self {
            context: context.clone(),
            preset_code: context.preset_code(),
            labels: context.labels(),
            generator: GeneratorInfo::default(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn context() -> Context {
        Context {
            template_choice: TemplateChoice::Custom,
            gs1_mode: Gs1Mode::Gs1,
            all_orderable: true,
            product_type: ProductType::Medisch,
            has_chemicals: false,
            is_staffel_file: false,
            institutions: vec!["UMCU".to_string()],
            version: DEFAULT_CONTEXT_VERSION.to_string(),
        }
    }

    #[test]
    fn labels_for_gs1_medical_context() {
        let binding = context().labels();
        let labels: Vec<&str> = binding.iter().collect();
        assert_eq!(labels, vec!["UMCU", "gs1", "medisch", "orderable_true"]);
    }

    #[test]
    fn gs1_only_adds_both_gs1_labels() {
        let mut ctx = context();
        ctx.gs1_mode = Gs1Mode::Gs1Only;
        let labels = ctx.labels();
        assert!(labels.contains("gs1"));
        assert!(labels.contains("gs1_only"));
        assert!(!labels.contains("none"));
    }

    #[test]
    fn non_gs1_context_gets_none_label() {
        let mut ctx = context();
        ctx.gs1_mode = Gs1Mode::None;
        ctx.all_orderable = false;
        ctx.has_chemicals = true;
        ctx.is_staffel_file = true;
        let labels = ctx.labels();
        for label in ["none", "orderable_false", "chemicals", "staffel"] {
            assert!(labels.contains(label), "missing {label}");
        }
        assert!(!labels.contains("gs1"));
    }

    #[test]
    fn validate_reports_every_problem() {
        let mut ctx = context();
        ctx.gs1_mode = Gs1Mode::Gs1Only;
        ctx.all_orderable = false;
        ctx.is_staffel_file = true;
        ctx.institutions.push("Nowhere General".to_string());

        let err = ctx.validate().unwrap_err();
        assert_eq!(err.messages.len(), 3);
        assert!(err.messages[0].contains("Nowhere General"));
    }

    #[test]
    fn preset_codes() {
        assert_eq!(context().preset_code(), "MED-GS1-ORDER");

        let mut ctx = context();
        ctx.product_type = ProductType::Lab;
        ctx.gs1_mode = Gs1Mode::None;
        ctx.all_orderable = false;
        ctx.is_staffel_file = true;
        ctx.has_chemicals = true;
        assert_eq!(ctx.preset_code(), "LAB-COMM-PACK-STAFF-CHEM");
    }

    #[test]
    fn template_basename_prefers_staffel() {
        let mut ctx = context();
        assert_eq!(ctx.template_basename(), "template_besteleenheid");
        ctx.all_orderable = false;
        assert_eq!(ctx.template_basename(), "template_verpakkingseenheid");
        ctx.is_staffel_file = true;
        assert_eq!(ctx.template_basename(), "template_staffel");
    }

    #[test]
    fn context_json_uses_snake_case_tags_and_default_version() {
        let ctx = Context::from_json_str(
            r#"{"template_choice":"standard","gs1_mode":"gs1_only","all_orderable":true,
                "product_type":"facilitair","has_chemicals":false,"is_staffel_file":false}"#,
        )
        .unwrap();
        assert_eq!(ctx.gs1_mode, Gs1Mode::Gs1Only);
        assert_eq!(ctx.version, DEFAULT_CONTEXT_VERSION);
        assert!(ctx.institutions.is_empty());
    }

    #[test]
    fn provenance_round_trips() {
        let provenance = Provenance::for_context(&context());
        let json = provenance.to_json().unwrap();
        assert!(json.contains("\"preset_code\": \"MED-GS1-ORDER\""));
        assert_eq!(Provenance::from_json(&json).unwrap(), provenance);
    }
}
