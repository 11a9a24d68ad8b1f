//! Context labels, field catalog and decision resolution.
//!
//! A [`Context`] is projected onto a [`LabelSet`]; the [`DecisionResolver`] evaluates every
//! descriptor of a shared [`FieldCatalog`] against those labels and produces one
//! [`FieldDecision`] per field.

pub mod catalog;
pub mod context;
pub mod resolver;

pub use catalog::{
    Axis, AxisRule, CatalogError, CatalogViolation, Dependency, FieldCatalog, FieldDescriptor,
    Literal, Predicate, RawDependency, RawDescriptor, Rule,
};
pub use context::{
    Context, ContextError, GeneratorInfo, Gs1Mode, LabelSet, ProductType, Provenance,
    TemplateChoice,
};
pub use resolver::{
    resolve_field, BranchTrace, DecisionResolver, DecisionTrace, DependencyCheck, DependencyTrace,
    FieldDecision, FieldFailure, Resolution, RowValues,
};
