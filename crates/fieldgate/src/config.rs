use std::path::Path;

use fieldgate_xlsx::{HideOptions, PackageLimits};
use serde::{Deserialize, Serialize};

use crate::PipelineError;

/// Columns forced hidden on every generated template (the staffel price columns).
pub const DEFAULT_FORCE_HIDDEN_COLUMNS: [&str; 2] = ["AA", "AB"];

/// Settings for one [`crate::Pipeline`]. Every field has a default, so `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worksheet to process; the first sheet when unset.
    pub sheet: Option<String>,
    pub force_hidden_columns: Vec<String>,
    pub hide: HideOptions,
    /// Audit the forced columns on every sheet instead of only the processed one.
    pub audit_all_sheets: bool,
    pub limits: PackageLimits,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sheet: None,
            force_hidden_columns: DEFAULT_FORCE_HIDDEN_COLUMNS
                .iter()
                .map(|c| c.to_string())
                .collect(),
            hide: HideOptions::default(),
            audit_all_sheets: false,
            limits: PackageLimits::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(json).map_err(PipelineError::Config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use fieldgate_xlsx::HideEncoding;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(PipelineConfig::from_json_str("{}").unwrap(), PipelineConfig::default());
        assert_eq!(
            PipelineConfig::default().force_hidden_columns,
            vec!["AA".to_string(), "AB".to_string()]
        );
    }

    #[test]
    fn nested_sections_keep_their_own_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"sheet": "Template", "hide": {"dry_run": true}, "limits": {"max_part_bytes": 1024}}"#,
        )
        .unwrap();
        assert_eq!(config.sheet.as_deref(), Some("Template"));
        assert!(config.hide.dry_run);
        assert_eq!(config.hide.encodings, HideEncoding::STRUCTURAL.to_vec());
        assert_eq!(config.limits.max_part_bytes, 1024);
        assert_eq!(
            config.limits.max_total_bytes,
            PackageLimits::default().max_total_bytes
        );
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"hide": {"encodings": ["shrink"]}}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
