use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Literal fallback of an axis rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Always,
    Never,
}

impl Literal {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "always" => Some(Literal::Always),
            "never" => Some(Literal::Never),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Literal::Always => "always",
            Literal::Never => "never",
        }
    }
}

/// The two decision axes of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Visibility,
    Mandatory,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Axis::Visibility => "visible",
            Axis::Mandatory => "mandatory",
        })
    }
}

/// The branch of an [`AxisRule`] that decides the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule<'a> {
    Always,
    Never,
    OnlyIf(&'a [String]),
    ExceptIf(&'a [String]),
}

/// Rule for one axis of a field.
///
/// A catalog entry may carry a literal *and* label lists (the literal documents the default).
/// Precedence is `only_if` > `except_if` > literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisRule {
    pub literal: Literal,
    pub only_if: Option<Vec<String>>,
    pub except_if: Option<Vec<String>>,
}

impl AxisRule {
    pub fn literal(literal: Literal) -> Self {
        Self {
            literal,
            only_if: None,
            except_if: None,
        }
    }

    pub fn only_if<S: Into<String>>(literal: Literal, labels: impl IntoIterator<Item = S>) -> Self {
        Self {
            only_if: Some(labels.into_iter().map(Into::into).collect()),
            ..Self::literal(literal)
        }
    }

    pub fn except_if<S: Into<String>>(
        literal: Literal,
        labels: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            except_if: Some(labels.into_iter().map(Into::into).collect()),
            ..Self::literal(literal)
        }
    }

    pub fn rule(&self) -> Rule<'_> {
        if let Some(labels) = &self.only_if {
            return Rule::OnlyIf(labels);
        }
        if let Some(labels) = &self.except_if {
            return Rule::ExceptIf(labels);
        }
        match self.literal {
            Literal::Always => Rule::Always,
            Literal::Never => Rule::Never,
        }
    }
}

/// A single check a dependency performs on a row value.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    NotEmpty,
    Equals(Value),
    IsTrue,
    InSet(Vec<Value>),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::NotEmpty => f.write_str("not_empty"),
            Predicate::Equals(value) => write!(f, "equals={value}"),
            Predicate::IsTrue => f.write_str("is_true"),
            Predicate::InSet(values) => {
                f.write_str("in=[")?;
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// One AND-condition of a field's dependency list.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub field: String,
    pub predicates: Vec<Predicate>,
}

impl Dependency {
    pub fn new(field: impl Into<String>, predicates: Vec<Predicate>) -> Self {
        Self {
            field: field.into(),
            predicates,
        }
    }
}

/// Configuration of one logical field and the column it lives in.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub field_name: String,
    pub column_reference: String,
    pub visibility: AxisRule,
    pub mandatory: AxisRule,
    pub dependencies: Vec<Dependency>,
    pub triggers: Vec<String>,
    pub annotation: String,
    defects: Vec<String>,
}

impl FieldDescriptor {
    /// A descriptor that is always visible, never mandatory and has no dependencies.
    pub fn new(field_name: impl Into<String>, column_reference: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            column_reference: column_reference.into(),
            visibility: AxisRule::literal(Literal::Always),
            mandatory: AxisRule::literal(Literal::Never),
            dependencies: Vec::new(),
            triggers: Vec::new(),
            annotation: String::new(),
            defects: Vec::new(),
        }
    }

    pub fn with_visibility(mut self, rule: AxisRule) -> Self {
        self.visibility = rule;
        self
    }

    pub fn with_mandatory(mut self, rule: AxisRule) -> Self {
        self.mandatory = rule;
        self
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_trigger(mut self, field: impl Into<String>) -> Self {
        self.triggers.push(field.into());
        self
    }

    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotation = annotation.into();
        self
    }

    /// Shape problems found while parsing this entry. A field with defects cannot be resolved.
    pub fn defects(&self) -> &[String] {
        &self.defects
    }
}

/// Catalog entry as it appears in the JSON mapping file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDescriptor {
    #[serde(default)]
    pub col: String,
    pub visible: Option<String>,
    pub visible_only: Option<Value>,
    pub visible_except: Option<Value>,
    pub mandatory: Option<String>,
    pub mandatory_only: Option<Value>,
    pub mandatory_except: Option<Value>,
    #[serde(default)]
    pub depends_on: Vec<RawDependency>,
    #[serde(default)]
    pub depends_trigger_for: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawDependency {
    pub field: Option<String>,
    /// Predicate keys in the order they are written.
    #[serde(flatten)]
    pub predicates: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogViolation {
    #[error("field '{field}': column reference is empty")]
    EmptyColumn { field: String },
    #[error("column '{column}' is used by both '{first}' and '{second}'")]
    DuplicateColumn {
        column: String,
        first: String,
        second: String,
    },
    #[error("field '{field}' is defined more than once")]
    DuplicateField { field: String },
    #[error("field '{field}': '{axis}' must be 'always' or 'never', got '{value}'")]
    InvalidLiteral {
        field: String,
        axis: Axis,
        value: String,
    },
    #[error("field '{field}': dependency #{index} has no 'field'")]
    MissingDependencyField { field: String, index: usize },
    #[error("field '{field}' depends on unknown field '{dependency}'")]
    UnknownDependency { field: String, dependency: String },
    #[error("field '{field}' triggers unknown field '{trigger}'")]
    UnknownTrigger { field: String, trigger: String },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog has {} violation(s): {}", .0.len(), join_violations(.0))]
    Invalid(Vec<CatalogViolation>),
}

fn join_violations(violations: &[CatalogViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Validated, immutable set of field descriptors.
///
/// Descriptors are kept in spreadsheet column order. The catalog has no interior mutability and
/// can be shared across threads for concurrent resolution.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<String, usize>,
}

impl FieldCatalog {
    /// Validate `descriptors` as a whole and build the catalog.
    pub fn new(descriptors: Vec<FieldDescriptor>) -> Result<Self, CatalogError> {
        Self::build(descriptors, Vec::new())
    }

    pub fn from_raw(raw: BTreeMap<String, RawDescriptor>) -> Result<Self, CatalogError> {
        let mut violations = Vec::new();
        let descriptors = raw
            .into_iter()
            .map(|(name, entry)| convert_raw(name, entry, &mut violations))
            .collect();
        Self::build(descriptors, violations)
    }

    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, RawDescriptor> = serde_json::from_str(json)?;
        Self::from_raw(raw)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, RawDescriptor> = serde_json::from_reader(reader)?;
        Self::from_raw(raw)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_json_reader(std::io::BufReader::new(file))?;
        log::debug!("loaded {} catalog fields from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    fn build(
        mut descriptors: Vec<FieldDescriptor>,
        mut violations: Vec<CatalogViolation>,
    ) -> Result<Self, CatalogError> {
        // `aa` and `AA` address the same column.
        for descriptor in &mut descriptors {
            descriptor.column_reference = descriptor.column_reference.trim().to_ascii_uppercase();
        }

        let mut by_name: HashMap<String, usize> = HashMap::with_capacity(descriptors.len());
        let mut by_column: HashMap<&str, &str> = HashMap::with_capacity(descriptors.len());

        for (idx, descriptor) in descriptors.iter().enumerate() {
            if by_name.insert(descriptor.field_name.clone(), idx).is_some() {
                violations.push(CatalogViolation::DuplicateField {
                    field: descriptor.field_name.clone(),
                });
            }

            let column = descriptor.column_reference.as_str();
            if column.is_empty() {
                violations.push(CatalogViolation::EmptyColumn {
                    field: descriptor.field_name.clone(),
                });
                continue;
            }
            if let Some(first) = by_column.insert(column, &descriptor.field_name) {
                violations.push(CatalogViolation::DuplicateColumn {
                    column: column.to_string(),
                    first: first.to_string(),
                    second: descriptor.field_name.clone(),
                });
            }
        }

        for descriptor in &descriptors {
            for dependency in &descriptor.dependencies {
                // Entries without a field were already reported during conversion.
                if dependency.field.is_empty() {
                    continue;
                }
                if !by_name.contains_key(&dependency.field) {
                    violations.push(CatalogViolation::UnknownDependency {
                        field: descriptor.field_name.clone(),
                        dependency: dependency.field.clone(),
                    });
                }
            }
            for trigger in &descriptor.triggers {
                if !by_name.contains_key(trigger) {
                    violations.push(CatalogViolation::UnknownTrigger {
                        field: descriptor.field_name.clone(),
                        trigger: trigger.clone(),
                    });
                }
            }
        }

        if !violations.is_empty() {
            log::debug!("rejecting catalog with {} violation(s)", violations.len());
            return Err(CatalogError::Invalid(violations));
        }

        descriptors.sort_by(|a, b| {
            column_sort_key(&a.column_reference)
                .cmp(&column_sort_key(&b.column_reference))
                .then_with(|| a.field_name.cmp(&b.field_name))
        });
        let by_name = descriptors
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.field_name.clone(), idx))
            .collect();

        Ok(Self {
            fields: descriptors,
            by_name,
        })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn get(&self, field_name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(field_name).map(|&idx| &self.fields[idx])
    }

    pub fn field_by_column(&self, column_reference: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|d| d.column_reference.eq_ignore_ascii_case(column_reference.trim()))
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|d| d.column_reference.as_str())
    }
}

/// Orders column letters the way a spreadsheet does (`Z` < `AA`).
fn column_sort_key(column: &str) -> (usize, String) {
    let column = column.trim().to_ascii_uppercase();
    (column.len(), column)
}

fn convert_raw(
    field_name: String,
    raw: RawDescriptor,
    violations: &mut Vec<CatalogViolation>,
) -> FieldDescriptor {
    let mut defects = Vec::new();

    let visibility = convert_axis(
        &field_name,
        Axis::Visibility,
        raw.visible.as_deref(),
        Literal::Always,
        raw.visible_only.as_ref(),
        raw.visible_except.as_ref(),
        violations,
        &mut defects,
    );
    let mandatory = convert_axis(
        &field_name,
        Axis::Mandatory,
        raw.mandatory.as_deref(),
        Literal::Never,
        raw.mandatory_only.as_ref(),
        raw.mandatory_except.as_ref(),
        violations,
        &mut defects,
    );

    let mut dependencies = Vec::with_capacity(raw.depends_on.len());
    for (index, dep) in raw.depends_on.into_iter().enumerate() {
        let Some(field) = dep.field.filter(|f| !f.is_empty()) else {
            violations.push(CatalogViolation::MissingDependencyField {
                field: field_name.clone(),
                index,
            });
            continue;
        };
        let predicates = convert_predicates(&field, &dep.predicates, &mut defects);
        dependencies.push(Dependency { field, predicates });
    }

    FieldDescriptor {
        field_name,
        column_reference: raw.col,
        visibility,
        mandatory,
        dependencies,
        triggers: raw.depends_trigger_for,
        annotation: raw.notes,
        defects,
    }
}

#[allow(clippy::too_many_arguments)]
fn convert_axis(
    field_name: &str,
    axis: Axis,
    literal: Option<&str>,
    default: Literal,
    only_if: Option<&Value>,
    except_if: Option<&Value>,
    violations: &mut Vec<CatalogViolation>,
    defects: &mut Vec<String>,
) -> AxisRule {
    let literal = match literal {
        None => default,
        Some(value) => Literal::parse(value).unwrap_or_else(|| {
            violations.push(CatalogViolation::InvalidLiteral {
                field: field_name.to_string(),
                axis,
                value: value.to_string(),
            });
            default
        }),
    };

    let mut labels = |key: &str, value: Option<&Value>| -> Option<Vec<String>> {
        let value = value?;
        match label_list(value) {
            Some(labels) => Some(labels),
            None => {
                defects.push(format!("'{axis}_{key}' must be a label or a list of labels"));
                None
            }
        }
    };

    AxisRule {
        literal,
        only_if: labels("only", only_if),
        except_if: labels("except", except_if),
    }
}

fn label_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(label) => Some(vec![label.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => None,
    }
}

fn convert_predicates(
    dependency: &str,
    raw: &Map<String, Value>,
    defects: &mut Vec<String>,
) -> Vec<Predicate> {
    if raw.is_empty() {
        defects.push(format!("dependency on '{dependency}' has no predicate"));
        return Vec::new();
    }

    let mut predicates = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        match (key.as_str(), value) {
            ("not_empty", Value::Bool(true)) => predicates.push(Predicate::NotEmpty),
            ("is_true", Value::Bool(true)) => predicates.push(Predicate::IsTrue),
            ("not_empty" | "is_true", Value::Bool(false)) => {}
            ("equals", value) => predicates.push(Predicate::Equals(value.clone())),
            ("in", Value::Array(values)) => predicates.push(Predicate::InSet(values.clone())),
            ("not_empty" | "is_true" | "in", _) => defects.push(format!(
                "dependency on '{dependency}': invalid value for '{key}': {value}"
            )),
            (other, _) => defects.push(format!(
                "dependency on '{dependency}': unknown predicate '{other}'"
            )),
        }
    }
    predicates
}
