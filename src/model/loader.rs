//! Schema loader and validator.
//!
//! Turns raw, serde-deserialized model definitions into validated [`Model`]
//! values. Validation is collect-all: every problem in the batch is
//! reported, so a single bad metric does not hide other errors.
//!
//! Enum-valued fields (`type`, `cardinality`) arrive as free-form strings.
//! A malformed value is a [`SchemaError::InvalidEnum`]; a fully absent value
//! stays `None` and the join planner picks the default later.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use super::types::{Cardinality, JoinType, SemanticType};
use super::{Argument, Dimension, Entity, Filter, Measure, Metric, Model};

/// Pattern for argument placeholders inside an `expr` (e.g. `{min_amount}`).
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// Kind of named item inside a model, used in error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Dimension,
    Measure,
    Metric,
    Filter,
    Entity,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Dimension => "dimension",
            ItemKind::Measure => "measure",
            ItemKind::Metric => "metric",
            ItemKind::Filter => "filter",
            ItemKind::Entity => "entity",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structural problem in a raw model definition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("model at position {index} is missing a name")]
    MissingModelName { index: usize },

    #[error("duplicate model name '{name}'")]
    DuplicateModel { name: String },

    #[error("{kind} at position {index} in model '{model}' is missing a name")]
    MissingName {
        model: String,
        kind: ItemKind,
        index: usize,
    },

    #[error("duplicate {kind} name '{name}' in model '{model}'")]
    DuplicateName {
        model: String,
        kind: ItemKind,
        name: String,
    },

    #[error("{kind} '{name}' in model '{model}' requires a non-empty expr")]
    MissingExpr {
        model: String,
        kind: ItemKind,
        name: String,
    },

    #[error(
        "{kind} '{name}' in model '{model}': argument mismatch \
         (undeclared: [{}], unused: [{}])",
        undeclared.join(", "),
        unused.join(", ")
    )]
    ArgumentMismatch {
        model: String,
        kind: ItemKind,
        name: String,
        /// Placeholders used in `expr` without a declared argument.
        undeclared: Vec<String>,
        /// Declared arguments never referenced in `expr`.
        unused: Vec<String>,
    },

    #[error("invalid {field} '{value}' in {context} of model '{model}'")]
    InvalidEnum {
        model: String,
        context: String,
        field: &'static str,
        value: String,
    },

    #[error("argument '{argument}' of {kind} '{name}' in model '{model}' is missing a type")]
    MissingArgumentType {
        model: String,
        kind: ItemKind,
        name: String,
        argument: String,
    },

    #[error("entity at position {index} in model '{model}' is missing a target model")]
    MissingTarget { model: String, index: usize },

    #[error("entity '{entity}' in model '{model}' is missing {field}")]
    MissingKey {
        model: String,
        entity: String,
        field: &'static str,
    },
}

/// All problems found while validating a schema batch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("schema validation failed with {} error(s)", .0.len())]
pub struct SchemaErrors(pub Vec<SchemaError>);

pub type LoadResult<T> = Result<T, SchemaErrors>;

// ============================================================================
// Raw (pre-validation) definition shapes
// ============================================================================

/// A raw model definition as supplied by the schema source.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawModel {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<RawDimension>,
    #[serde(default)]
    pub measures: Vec<RawMeasure>,
    #[serde(default)]
    pub metrics: Vec<RawMetric>,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
    #[serde(default)]
    pub entities: Vec<RawEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDimension {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub searchable: bool,
    pub options: Option<Vec<String>>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMeasure {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMetric {
    pub name: Option<String>,
    pub expr: Option<String>,
    #[serde(rename = "type")]
    pub ty: Option<String>,
    #[serde(default)]
    pub args: Vec<RawArgument>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFilter {
    pub name: Option<String>,
    pub expr: Option<String>,
    #[serde(default)]
    pub args: Vec<RawArgument>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawArgument {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub ty: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntity {
    pub name: Option<String>,
    pub target: Option<String>,
    pub primary_key: Option<String>,
    pub foreign_key: Option<String>,
    #[serde(rename = "type")]
    pub join_type: Option<String>,
    pub cardinality: Option<String>,
    pub description: Option<String>,
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a batch of raw definitions into [`Model`] values.
///
/// Errors are collected across the whole batch; the result is `Err` if any
/// definition is structurally invalid.
pub fn load_models(raw: Vec<RawModel>) -> LoadResult<Vec<Model>> {
    let mut errors = Vec::new();
    let mut models = Vec::with_capacity(raw.len());
    let mut model_names: HashSet<String> = HashSet::new();

    for (index, raw_model) in raw.into_iter().enumerate() {
        let Some(name) = non_empty(raw_model.name.as_deref()).map(String::from) else {
            errors.push(SchemaError::MissingModelName { index });
            continue;
        };
        if !model_names.insert(name.clone()) {
            errors.push(SchemaError::DuplicateModel { name });
            continue;
        }
        models.push(validate_model(&name, raw_model, &mut errors));
    }

    if errors.is_empty() {
        Ok(models)
    } else {
        Err(SchemaErrors(errors))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn validate_model(name: &str, raw: RawModel, errors: &mut Vec<SchemaError>) -> Model {
    // Dimensions, measures, and metrics share one reference namespace:
    // `model.x` must resolve to exactly one of them.
    let mut ref_names: HashSet<String> = HashSet::new();
    let mut filter_names: HashSet<String> = HashSet::new();

    let mut dimensions = Vec::new();
    for (index, raw_dim) in raw.dimensions.into_iter().enumerate() {
        let Some(dim_name) = non_empty(raw_dim.name.as_deref()) else {
            errors.push(SchemaError::MissingName {
                model: name.into(),
                kind: ItemKind::Dimension,
                index,
            });
            continue;
        };
        if !ref_names.insert(dim_name.to_string()) {
            errors.push(SchemaError::DuplicateName {
                model: name.into(),
                kind: ItemKind::Dimension,
                name: dim_name.into(),
            });
            continue;
        }
        let ty = parse_type(
            raw_dim.ty.as_deref(),
            name,
            format!("dimension '{}'", dim_name),
            errors,
        );
        dimensions.push(Dimension {
            name: dim_name.into(),
            ty,
            searchable: raw_dim.searchable,
            options: raw_dim.options,
            description: raw_dim.description,
        });
    }

    let mut measures = Vec::new();
    for (index, raw_measure) in raw.measures.into_iter().enumerate() {
        let Some(measure_name) = non_empty(raw_measure.name.as_deref()) else {
            errors.push(SchemaError::MissingName {
                model: name.into(),
                kind: ItemKind::Measure,
                index,
            });
            continue;
        };
        if !ref_names.insert(measure_name.to_string()) {
            errors.push(SchemaError::DuplicateName {
                model: name.into(),
                kind: ItemKind::Measure,
                name: measure_name.into(),
            });
            continue;
        }
        let ty = parse_type(
            raw_measure.ty.as_deref(),
            name,
            format!("measure '{}'", measure_name),
            errors,
        );
        measures.push(Measure {
            name: measure_name.into(),
            ty,
            description: raw_measure.description,
        });
    }

    let mut metrics = Vec::new();
    for (index, raw_metric) in raw.metrics.into_iter().enumerate() {
        let Some(metric_name) = non_empty(raw_metric.name.as_deref()) else {
            errors.push(SchemaError::MissingName {
                model: name.into(),
                kind: ItemKind::Metric,
                index,
            });
            continue;
        };
        if !ref_names.insert(metric_name.to_string()) {
            errors.push(SchemaError::DuplicateName {
                model: name.into(),
                kind: ItemKind::Metric,
                name: metric_name.into(),
            });
            continue;
        }
        let Some(expr) = non_empty(raw_metric.expr.as_deref()) else {
            errors.push(SchemaError::MissingExpr {
                model: name.into(),
                kind: ItemKind::Metric,
                name: metric_name.into(),
            });
            continue;
        };
        let ty = parse_type(
            raw_metric.ty.as_deref(),
            name,
            format!("metric '{}'", metric_name),
            errors,
        );
        let args = validate_args(
            raw_metric.args,
            name,
            ItemKind::Metric,
            metric_name,
            errors,
        );
        check_placeholders(expr, &args, name, ItemKind::Metric, metric_name, errors);
        metrics.push(Metric {
            name: metric_name.into(),
            expr: expr.into(),
            ty,
            args,
            description: raw_metric.description,
        });
    }

    let mut filters = Vec::new();
    for (index, raw_filter) in raw.filters.into_iter().enumerate() {
        let Some(filter_name) = non_empty(raw_filter.name.as_deref()) else {
            errors.push(SchemaError::MissingName {
                model: name.into(),
                kind: ItemKind::Filter,
                index,
            });
            continue;
        };
        if !filter_names.insert(filter_name.to_string()) {
            errors.push(SchemaError::DuplicateName {
                model: name.into(),
                kind: ItemKind::Filter,
                name: filter_name.into(),
            });
            continue;
        }
        let Some(expr) = non_empty(raw_filter.expr.as_deref()) else {
            errors.push(SchemaError::MissingExpr {
                model: name.into(),
                kind: ItemKind::Filter,
                name: filter_name.into(),
            });
            continue;
        };
        let args = validate_args(
            raw_filter.args,
            name,
            ItemKind::Filter,
            filter_name,
            errors,
        );
        check_placeholders(expr, &args, name, ItemKind::Filter, filter_name, errors);
        filters.push(Filter {
            name: filter_name.into(),
            expr: expr.into(),
            args,
            description: raw_filter.description,
        });
    }

    let mut entities = Vec::new();
    let mut entity_names: HashSet<String> = HashSet::new();
    for (index, raw_entity) in raw.entities.into_iter().enumerate() {
        let Some(target) = non_empty(raw_entity.target.as_deref()) else {
            errors.push(SchemaError::MissingTarget {
                model: name.into(),
                index,
            });
            continue;
        };
        let entity_name = non_empty(raw_entity.name.as_deref()).map(String::from);
        let effective = entity_name.clone().unwrap_or_else(|| target.to_string());
        if !entity_names.insert(effective.clone()) {
            errors.push(SchemaError::DuplicateName {
                model: name.into(),
                kind: ItemKind::Entity,
                name: effective.clone(),
            });
            continue;
        }
        let Some(primary_key) = non_empty(raw_entity.primary_key.as_deref()) else {
            errors.push(SchemaError::MissingKey {
                model: name.into(),
                entity: effective,
                field: "primary_key",
            });
            continue;
        };
        let Some(foreign_key) = non_empty(raw_entity.foreign_key.as_deref()) else {
            errors.push(SchemaError::MissingKey {
                model: name.into(),
                entity: effective,
                field: "foreign_key",
            });
            continue;
        };

        let join_type = match raw_entity.join_type.as_deref() {
            None => None,
            Some(value) => match JoinType::parse(value) {
                Some(jt) => Some(jt),
                None => {
                    errors.push(SchemaError::InvalidEnum {
                        model: name.into(),
                        context: format!("entity '{}'", effective),
                        field: "type",
                        value: value.into(),
                    });
                    continue;
                }
            },
        };
        let cardinality = match raw_entity.cardinality.as_deref() {
            None => None,
            Some(value) => match Cardinality::parse(value) {
                Some(c) => Some(c),
                None => {
                    errors.push(SchemaError::InvalidEnum {
                        model: name.into(),
                        context: format!("entity '{}'", effective),
                        field: "cardinality",
                        value: value.into(),
                    });
                    continue;
                }
            },
        };

        entities.push(Entity {
            name: entity_name,
            target: target.into(),
            primary_key: primary_key.into(),
            foreign_key: foreign_key.into(),
            join_type,
            cardinality,
            description: raw_entity.description,
        });
    }

    Model {
        name: name.into(),
        description: raw.description,
        dimensions,
        measures,
        metrics,
        filters,
        entities,
    }
}

fn parse_type(
    raw: Option<&str>,
    model: &str,
    context: String,
    errors: &mut Vec<SchemaError>,
) -> Option<SemanticType> {
    let value = non_empty(raw)?;
    match SemanticType::parse(value) {
        Some(ty) => Some(ty),
        None => {
            errors.push(SchemaError::InvalidEnum {
                model: model.into(),
                context,
                field: "type",
                value: value.into(),
            });
            None
        }
    }
}

fn validate_args(
    raw: Vec<RawArgument>,
    model: &str,
    kind: ItemKind,
    item: &str,
    errors: &mut Vec<SchemaError>,
) -> Vec<Argument> {
    let mut args = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for (index, raw_arg) in raw.into_iter().enumerate() {
        let Some(arg_name) = non_empty(raw_arg.name.as_deref()) else {
            errors.push(SchemaError::MissingName {
                model: model.into(),
                kind,
                index,
            });
            continue;
        };
        if !seen.insert(arg_name.to_string()) {
            errors.push(SchemaError::DuplicateName {
                model: model.into(),
                kind,
                name: arg_name.into(),
            });
            continue;
        }
        let Some(ty_str) = non_empty(raw_arg.ty.as_deref()) else {
            errors.push(SchemaError::MissingArgumentType {
                model: model.into(),
                kind,
                name: item.into(),
                argument: arg_name.into(),
            });
            continue;
        };
        let Some(ty) = SemanticType::parse(ty_str) else {
            errors.push(SchemaError::InvalidEnum {
                model: model.into(),
                context: format!("argument '{}' of {} '{}'", arg_name, kind, item),
                field: "type",
                value: ty_str.into(),
            });
            continue;
        };
        args.push(Argument {
            name: arg_name.into(),
            ty,
            description: raw_arg.description,
        });
    }
    args
}

/// Extract argument placeholder names from an `expr` string, in order of
/// first occurrence.
pub fn placeholders(expr: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for cap in PLACEHOLDER_PATTERN.captures_iter(expr) {
        let name = cap[1].to_string();
        if seen.insert(name.clone()) {
            names.push(name);
        }
    }
    names
}

/// Cross-check placeholders against declared arguments in both directions.
fn check_placeholders(
    expr: &str,
    args: &[Argument],
    model: &str,
    kind: ItemKind,
    item: &str,
    errors: &mut Vec<SchemaError>,
) {
    let used = placeholders(expr);
    let declared: HashSet<&str> = args.iter().map(|a| a.name.as_str()).collect();
    let used_set: HashSet<&str> = used.iter().map(String::as_str).collect();

    let undeclared: Vec<String> = used
        .iter()
        .filter(|name| !declared.contains(name.as_str()))
        .cloned()
        .collect();
    let mut unused: Vec<String> = args
        .iter()
        .filter(|a| !used_set.contains(a.name.as_str()))
        .map(|a| a.name.clone())
        .collect();
    unused.sort();

    if !undeclared.is_empty() || !unused.is_empty() {
        errors.push(SchemaError::ArgumentMismatch {
            model: model.into(),
            kind,
            name: item.into(),
            undeclared,
            unused,
        });
    }
}
