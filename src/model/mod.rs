//! Validated semantic-model types.
//!
//! A [`Model`] is a named business entity holding ordered, name-unique
//! collections of dimensions, measures, metrics, filters, and entity
//! relationships. Instances are produced by [`loader`] from raw definitions
//! and are immutable for the lifetime of a schema version.

pub mod loader;
pub mod types;

pub use loader::{load_models, RawModel, SchemaError, SchemaErrors};
pub use types::{Cardinality, JoinType, SemanticType};

use serde::Serialize;

/// A named business model (e.g. "orders").
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub name: String,
    pub description: Option<String>,
    pub dimensions: Vec<Dimension>,
    pub measures: Vec<Measure>,
    pub metrics: Vec<Metric>,
    pub filters: Vec<Filter>,
    pub entities: Vec<Entity>,
}

impl Model {
    /// Look up a dimension by name.
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Look up a measure by name.
    pub fn measure(&self, name: &str) -> Option<&Measure> {
        self.measures.iter().find(|m| m.name == name)
    }

    /// Look up a metric by name.
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Look up a filter by name.
    pub fn filter(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Look up an entity by its effective name.
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.effective_name() == name)
    }

    /// Does this model declare a physical column (dimension or measure)
    /// with the given name?
    pub fn has_column(&self, name: &str) -> bool {
        self.column_type(name).is_some()
    }

    /// Resolved semantic type of a physical column, if declared.
    pub fn column_type(&self, name: &str) -> Option<SemanticType> {
        if let Some(d) = self.dimension(name) {
            return Some(d.ty.unwrap_or(SemanticType::Unknown));
        }
        if let Some(m) = self.measure(name) {
            return Some(m.ty.unwrap_or(SemanticType::Unknown));
        }
        None
    }
}

/// A model attribute used for grouping and filtering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dimension {
    pub name: String,
    /// Declared or catalog-inferred type; `None` until resolution runs.
    pub ty: Option<SemanticType>,
    /// Whether the dimension's values may be searched by callers.
    pub searchable: bool,
    /// Enumerated value options, when the dimension is categorical.
    pub options: Option<Vec<String>>,
    pub description: Option<String>,
}

/// A raw aggregatable column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measure {
    pub name: String,
    pub ty: Option<SemanticType>,
    pub description: Option<String>,
}

/// A named, typed computation over `model.column` references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub expr: String,
    /// Declared result type; inferred from the expression when omitted.
    pub ty: Option<SemanticType>,
    pub args: Vec<Argument>,
    pub description: Option<String>,
}

/// A named boolean predicate; structurally identical to [`Metric`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Filter {
    pub name: String,
    pub expr: String,
    pub args: Vec<Argument>,
    pub description: Option<String>,
}

/// A declared argument of a metric or filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    pub name: String,
    pub ty: SemanticType,
    pub description: Option<String>,
}

/// A directed relationship from the owning model to a target model.
///
/// `primary_key` names a column on the owning model, `foreign_key` a column
/// on the target model; the join condition is
/// `owner.primary_key = target.foreign_key`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    /// Relationship role name; defaults to the target model name.
    pub name: Option<String>,
    pub target: String,
    pub primary_key: String,
    pub foreign_key: String,
    /// Declared join type; `None` defers the default to the planner.
    pub join_type: Option<JoinType>,
    /// Declared cardinality; `None` means undeclared.
    pub cardinality: Option<Cardinality>,
    pub description: Option<String>,
}

impl Entity {
    /// The name this edge is addressed by in join hints and errors.
    pub fn effective_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.target)
    }
}
