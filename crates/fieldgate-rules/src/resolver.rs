use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::catalog::{AxisRule, Dependency, FieldCatalog, FieldDescriptor, Predicate, Rule};
use crate::context::{Context, ContextError, LabelSet};

pub const NOTE_HIDDEN: &str = "HIDDEN in current context";
pub const NOTE_MANDATORY: &str = "MANDATORY in current context";
pub const NOTE_DEPENDENCY_UNSATISFIED: &str = "Dependency NOT satisfied";

/// Runtime values of one data row, keyed by field name.
pub type RowValues = BTreeMap<String, Value>;

/// How one axis reached its outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "branch", rename_all = "snake_case")]
pub enum BranchTrace {
    Always,
    Never,
    OnlyIf {
        labels: Vec<String>,
        matched: Vec<String>,
    },
    ExceptIf {
        labels: Vec<String>,
        forbidden: Vec<String>,
    },
}

impl BranchTrace {
    fn evaluate(rule: &AxisRule, labels: &LabelSet) -> (bool, Self) {
        match rule.rule() {
            Rule::Always => (true, BranchTrace::Always),
            Rule::Never => (false, BranchTrace::Never),
            Rule::OnlyIf(candidates) => {
                let matched = owned(labels.matching(candidates));
                (
                    !matched.is_empty(),
                    BranchTrace::OnlyIf {
                        labels: candidates.to_vec(),
                        matched,
                    },
                )
            }
            Rule::ExceptIf(candidates) => {
                let forbidden = owned(labels.matching(candidates));
                (
                    forbidden.is_empty(),
                    BranchTrace::ExceptIf {
                        labels: candidates.to_vec(),
                        forbidden,
                    },
                )
            }
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, axis: &str) -> fmt::Result {
        match self {
            BranchTrace::Always => write!(f, "{axis}:always"),
            BranchTrace::Never => write!(f, "{axis}:never"),
            BranchTrace::OnlyIf { labels, matched } => write!(
                f,
                "{axis}_ONLY:{}->matched:{}",
                labels.join(","),
                matched.join(",")
            ),
            BranchTrace::ExceptIf { labels, forbidden } => write!(
                f,
                "{axis}_EXCEPT:{}->forbidden:{}",
                labels.join(","),
                forbidden.join(",")
            ),
        }
    }
}

fn owned(labels: Vec<&str>) -> Vec<String> {
    labels.into_iter().map(str::to_string).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyCheck {
    pub field: String,
    pub predicates: Vec<String>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyTrace {
    pub checks: Vec<DependencyCheck>,
    pub satisfied: bool,
}

/// Structured explanation of a [`FieldDecision`].
///
/// The `Display` form is stable, e.g. `VISIBLE_ONLY:chemicals->matched:chemicals | MANDATORY:never`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionTrace {
    pub visibility: BranchTrace,
    /// `None` when the field is hidden and the mandatory axis was not evaluated.
    pub mandatory: Option<BranchTrace>,
    /// `None` when the field has no dependencies.
    pub dependencies: Option<DependencyTrace>,
}

impl fmt::Display for DecisionTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.visibility.write(f, "VISIBLE")?;
        if let Some(mandatory) = &self.mandatory {
            f.write_str(" | ")?;
            mandatory.write(f, "MANDATORY")?;
        }
        if let Some(deps) = &self.dependencies {
            f.write_str(" | DEPS:")?;
            for (idx, check) in deps.checks.iter().enumerate() {
                if idx > 0 {
                    f.write_str("|")?;
                }
                write!(f, "{}:{}", check.field, check.predicates.join(","))?;
            }
            write!(f, "->satisfied:{}", deps.satisfied)?;
        }
        Ok(())
    }
}

/// Outcome for one field in one context. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDecision {
    field_name: String,
    column_reference: String,
    visible: bool,
    mandatory: bool,
    dependency_satisfied: bool,
    human_note: String,
    trace: DecisionTrace,
}

impl FieldDecision {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn column_reference(&self) -> &str {
        &self.column_reference
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn mandatory(&self) -> bool {
        self.mandatory
    }

    pub fn dependency_satisfied(&self) -> bool {
        self.dependency_satisfied
    }

    pub fn human_note(&self) -> &str {
        &self.human_note
    }

    pub fn trace(&self) -> &DecisionTrace {
        &self.trace
    }

    pub fn machine_trace(&self) -> String {
        self.trace.to_string()
    }
}

/// A field that could not be resolved. Other fields are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field '{field_name}' ({column_reference}) cannot be resolved: {}", .reasons.join("; "))]
pub struct FieldFailure {
    pub field_name: String,
    pub column_reference: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub decisions: Vec<FieldDecision>,
    pub failures: Vec<FieldFailure>,
}

impl Resolution {
    pub fn by_column(&self) -> HashMap<&str, &FieldDecision> {
        self.decisions
            .iter()
            .map(|d| (d.column_reference(), d))
            .collect()
    }

    pub fn decision(&self, field_name: &str) -> Option<&FieldDecision> {
        self.decisions.iter().find(|d| d.field_name == field_name)
    }

    pub fn visible_columns(&self) -> Vec<&str> {
        self.columns_where(|d| d.visible)
    }

    pub fn hidden_columns(&self) -> Vec<&str> {
        self.columns_where(|d| !d.visible)
    }

    pub fn mandatory_columns(&self) -> Vec<&str> {
        self.columns_where(|d| d.mandatory)
    }

    fn columns_where(&self, keep: impl Fn(&FieldDecision) -> bool) -> Vec<&str> {
        self.decisions
            .iter()
            .filter(|d| keep(d))
            .map(|d| d.column_reference.as_str())
            .collect()
    }
}

/// Maps a context onto per-field decisions for a shared catalog.
#[derive(Debug, Clone, Copy)]
pub struct DecisionResolver<'a> {
    catalog: &'a FieldCatalog,
}

impl<'a> DecisionResolver<'a> {
    pub fn new(catalog: &'a FieldCatalog) -> Self {
        Self { catalog }
    }

    /// Resolve every field with an empty row.
    pub fn resolve(&self, context: &Context) -> Result<Resolution, ContextError> {
        self.resolve_row(context, &RowValues::new())
    }

    /// Resolve every field, evaluating dependencies against `row`.
    ///
    /// An invalid context is refused outright. A malformed descriptor only fails its own field.
    pub fn resolve_row(&self, context: &Context, row: &RowValues) -> Result<Resolution, ContextError> {
        context.validate()?;
        let labels = context.labels();

        let mut resolution = Resolution::default();
        for descriptor in self.catalog.fields() {
            match resolve_field(descriptor, &labels, row) {
                Ok(decision) => resolution.decisions.push(decision),
                Err(failure) => {
                    log::warn!("{failure}");
                    resolution.failures.push(failure);
                }
            }
        }

        log::debug!(
            "resolved {} fields for {} ({} hidden, {} mandatory, {} failed)",
            resolution.decisions.len(),
            context.preset_code(),
            resolution.hidden_columns().len(),
            resolution.mandatory_columns().len(),
            resolution.failures.len()
        );
        Ok(resolution)
    }
}

/// Decide a single field against an already projected label set.
pub fn resolve_field(
    descriptor: &FieldDescriptor,
    labels: &LabelSet,
    row: &RowValues,
) -> Result<FieldDecision, FieldFailure> {
    if !descriptor.defects().is_empty() {
        return Err(FieldFailure {
            field_name: descriptor.field_name.clone(),
            column_reference: descriptor.column_reference.clone(),
            reasons: descriptor.defects().to_vec(),
        });
    }

    let (visible, visibility) = BranchTrace::evaluate(&descriptor.visibility, labels);
    let (mandatory, mandatory_trace) = if visible {
        let (mandatory, trace) = BranchTrace::evaluate(&descriptor.mandatory, labels);
        (mandatory, Some(trace))
    } else {
        (false, None)
    };

    let dependencies = (!descriptor.dependencies.is_empty()).then(|| {
        let checks: Vec<DependencyCheck> = descriptor
            .dependencies
            .iter()
            .map(|dependency| DependencyCheck {
                field: dependency.field.clone(),
                predicates: dependency.predicates.iter().map(ToString::to_string).collect(),
                passed: dependency_holds(dependency, row),
            })
            .collect();
        DependencyTrace {
            satisfied: checks.iter().all(|check| check.passed),
            checks,
        }
    });
    let dependency_satisfied = dependencies.as_ref().map_or(true, |deps| deps.satisfied);

    let mut tags = Vec::new();
    if !visible {
        tags.push(NOTE_HIDDEN);
    } else if mandatory {
        tags.push(NOTE_MANDATORY);
    }
    if !dependency_satisfied {
        tags.push(NOTE_DEPENDENCY_UNSATISFIED);
    }
    let human_note = human_note(&descriptor.annotation, &tags);

    Ok(FieldDecision {
        field_name: descriptor.field_name.clone(),
        column_reference: descriptor.column_reference.clone(),
        visible,
        mandatory,
        dependency_satisfied,
        human_note,
        trace: DecisionTrace {
            visibility,
            mandatory: mandatory_trace,
            dependencies,
        },
    })
}

fn human_note(annotation: &str, tags: &[&str]) -> String {
    let mut note = annotation.to_string();
    for tag in tags {
        if !note.is_empty() {
            note.push_str(" | ");
        }
        note.push_str(tag);
    }
    note
}

fn dependency_holds(dependency: &Dependency, row: &RowValues) -> bool {
    let value = row.get(&dependency.field).unwrap_or(&Value::Null);
    dependency
        .predicates
        .iter()
        .all(|predicate| predicate_holds(predicate, value))
}

fn predicate_holds(predicate: &Predicate, value: &Value) -> bool {
    match predicate {
        Predicate::NotEmpty => match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        },
        Predicate::Equals(expected) => value == expected,
        Predicate::IsTrue => is_truthy(value),
        Predicate::InSet(values) => values.contains(value),
    }
}

/// Null, false, zero, and empty strings or collections are falsy.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::catalog::Literal;

    fn labels(items: &[&str]) -> LabelSet {
        items.iter().copied().collect()
    }

    #[test]
    fn hidden_field_is_never_mandatory() {
        let descriptor = FieldDescriptor::new("Staffel Vanaf", "AA")
            .with_visibility(AxisRule::only_if(Literal::Never, ["staffel"]))
            .with_mandatory(AxisRule::literal(Literal::Always));
        let decision = resolve_field(&descriptor, &labels(&["lab"]), &RowValues::new()).unwrap();

        assert!(!decision.visible());
        assert!(!decision.mandatory());
        assert_eq!(decision.trace().mandatory, None);
        assert_eq!(decision.human_note(), NOTE_HIDDEN);
        assert_eq!(decision.machine_trace(), "VISIBLE_ONLY:staffel->matched:");
    }

    #[test]
    fn notes_join_annotation_and_tags() {
        let descriptor = FieldDescriptor::new("Verpakking", "F")
            .with_mandatory(AxisRule::literal(Literal::Always))
            .with_dependency(Dependency::new("Artikelomschrijving", vec![Predicate::NotEmpty]))
            .with_annotation("Verplicht bij bestelbare artikelen");
        let decision = resolve_field(&descriptor, &labels(&[]), &RowValues::new()).unwrap();

        assert_eq!(
            decision.human_note(),
            "Verplicht bij bestelbare artikelen | MANDATORY in current context | Dependency NOT satisfied"
        );
        assert_eq!(
            decision.machine_trace(),
            "VISIBLE:always | MANDATORY:always | DEPS:Artikelomschrijving:not_empty->satisfied:false"
        );
    }

    #[test]
    fn except_if_trace_lists_forbidden_labels() {
        let descriptor = FieldDescriptor::new("Prijs per eenheid", "K")
            .with_visibility(AxisRule::except_if(Literal::Always, ["gs1_only", "staffel"]));
        let decision =
            resolve_field(&descriptor, &labels(&["gs1", "gs1_only"]), &RowValues::new()).unwrap();

        assert!(!decision.visible());
        assert_eq!(
            decision.machine_trace(),
            "VISIBLE_EXCEPT:gs1_only,staffel->forbidden:gs1_only"
        );
    }

    #[test]
    fn predicates_follow_value_semantics() {
        assert!(!predicate_holds(&Predicate::NotEmpty, &Value::Null));
        assert!(!predicate_holds(&Predicate::NotEmpty, &json!("   ")));
        assert!(predicate_holds(&Predicate::NotEmpty, &json!(0)));

        assert!(predicate_holds(&Predicate::Equals(json!("ja")), &json!("ja")));
        assert!(!predicate_holds(&Predicate::Equals(json!("ja")), &json!("nee")));

        for falsy in [json!(null), json!(false), json!(0), json!(""), json!([]), json!({})] {
            assert!(!predicate_holds(&Predicate::IsTrue, &falsy), "{falsy}");
        }
        assert!(predicate_holds(&Predicate::IsTrue, &json!("nee")));

        let set = Predicate::InSet(vec![json!("A"), json!(2)]);
        assert!(predicate_holds(&set, &json!(2)));
        assert!(!predicate_holds(&set, &json!("B")));
    }

    #[test]
    fn dependency_conditions_are_and_combined() {
        let descriptor = FieldDescriptor::new("Houdbaarheid", "M")
            .with_dependency(Dependency::new("Steriel", vec![Predicate::IsTrue]))
            .with_dependency(Dependency::new(
                "Eenheid",
                vec![Predicate::InSet(vec![json!("stuk"), json!("doos")])],
            ));

        let mut row = RowValues::new();
        row.insert("Steriel".to_string(), json!(true));
        row.insert("Eenheid".to_string(), json!("doos"));
        let decision = resolve_field(&descriptor, &labels(&[]), &row).unwrap();
        assert!(decision.dependency_satisfied());

        row.insert("Eenheid".to_string(), json!("pallet"));
        let decision = resolve_field(&descriptor, &labels(&[]), &row).unwrap();
        assert!(!decision.dependency_satisfied());
        let checks = &decision.trace().dependencies.as_ref().unwrap().checks;
        assert_eq!(
            checks.iter().map(|c| c.passed).collect::<Vec<_>>(),
            vec![true, false]
        );
    }
}
