//! Request compilation: metrics + dimensions + filters -> CompiledQueryPlan.
//!
//! Compilation is a pure, synchronous computation over one immutable
//! schema snapshot. Errors are fail-fast and single-cause; every variant
//! carries the names needed to render an actionable message.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::fingerprint::request_fingerprint;
use super::{CompiledQueryPlan, Predicate, PredicateClause, SelectItem, SelectKind};
use crate::expr::{Expr, ExpressionError, Literal};
use crate::model::types::SemanticType;
use crate::model::{Argument, Dimension};
use crate::semantic::graph::{ItemFault, ResolvedFilter, ResolvedMetric, SemanticGraph};
use crate::semantic::path::{plan_joins, PlanError};
use crate::semantic::typecheck::TypeError;

/// A structured compilation request.
///
/// Metric, dimension, and filter names may be bare (`total_sales`) or
/// qualified (`orders.total_sales`) when a bare name is ambiguous.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterRequest>,
    /// Argument values per requested metric.
    #[serde(default)]
    pub metric_args: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
    /// Explicit join path (ordered entity names); skips path search.
    #[serde(default)]
    pub join_hint: Option<Vec<String>>,
}

/// A requested filter with its argument values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterRequest {
    pub name: String,
    #[serde(default)]
    pub args: BTreeMap<String, serde_json::Value>,
}

/// Argument binding errors, raised at request time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("missing required argument '{argument}' for '{item}'")]
    MissingArgument { item: String, argument: String },

    #[error(
        "argument '{argument}' for '{item}' expects {expected}, got {value}"
    )]
    TypeMismatch {
        item: String,
        argument: String,
        expected: SemanticType,
        value: String,
    },

    #[error("'{item}' declares no argument named '{argument}'")]
    UnknownArgument { item: String, argument: String },
}

/// Umbrella error for request compilation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("unknown metric '{name}'")]
    UnknownMetric { name: String },

    #[error("unknown dimension '{name}'")]
    UnknownDimension { name: String },

    #[error("unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error(
        "name '{name}' exists on several models ({}); qualify it as model.{name}",
        models.join(", ")
    )]
    AmbiguousName { name: String, models: Vec<String> },

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("failed to fingerprint request: {0}")]
    Fingerprint(String),
}

impl From<ItemFault> for CompileError {
    fn from(fault: ItemFault) -> Self {
        match fault {
            ItemFault::Expression(e) => CompileError::Expression(e),
            ItemFault::Type(e) => CompileError::Type(e),
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Compiles requests against one schema snapshot.
///
/// The compiler never mutates the graph and produces a fresh plan per
/// call; compiling the same request twice yields byte-identical plans.
pub struct QueryCompiler<'a> {
    graph: &'a SemanticGraph,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(graph: &'a SemanticGraph) -> Self {
        Self { graph }
    }

    /// Compile a request into an executable plan.
    pub fn compile(&self, request: &QueryRequest) -> CompileResult<CompiledQueryPlan> {
        let fingerprint = request_fingerprint(self.graph.version(), request)
            .map_err(|e| CompileError::Fingerprint(e.to_string()))?;

        // Resolve every referenced item first: expression and type faults
        // must surface before any join planning happens.
        let metrics: Vec<&ResolvedMetric> = request
            .metrics
            .iter()
            .map(|name| self.resolve_metric(name))
            .collect::<CompileResult<_>>()?;
        let dimensions: Vec<(String, &Dimension)> = request
            .dimensions
            .iter()
            .map(|name| self.resolve_dimension(name))
            .collect::<CompileResult<_>>()?;
        let filters: Vec<&ResolvedFilter> = request
            .filters
            .iter()
            .map(|f| self.resolve_filter(&f.name))
            .collect::<CompileResult<_>>()?;

        if metrics.is_empty() && dimensions.is_empty() {
            return Err(PlanError::NoModels.into());
        }

        // Models referenced transitively by the request.
        let anchor = metrics
            .first()
            .map(|m| m.model.clone())
            .unwrap_or_else(|| dimensions[0].0.clone());
        let mut requested_models: BTreeSet<String> = BTreeSet::new();
        requested_models.insert(anchor.clone());
        for metric in &metrics {
            metric.expr.referenced_models(&mut requested_models);
        }
        for (model, _) in &dimensions {
            requested_models.insert(model.clone());
        }
        for filter in &filters {
            filter.expr.referenced_models(&mut requested_models);
        }

        let join_plan = plan_joins(
            self.graph,
            &anchor,
            &requested_models,
            request.join_hint.as_deref(),
        )?;

        // Bind argument values.
        let mut bound_args: BTreeMap<String, Literal> = BTreeMap::new();
        let mut select: Vec<SelectItem> = Vec::new();

        for (model, dimension) in &dimensions {
            let ty = dimension.ty.unwrap_or(SemanticType::Unknown);
            select.push(SelectItem {
                kind: SelectKind::Dimension,
                name: dimension.name.clone(),
                model: model.clone(),
                expr: Expr::Column {
                    model: model.clone(),
                    column: dimension.name.clone(),
                    ty,
                },
                ty,
            });
        }
        let group_by: Vec<Expr> = select.iter().map(|item| item.expr.clone()).collect();

        for (requested_name, metric) in request.metrics.iter().zip(&metrics) {
            let provided = request
                .metric_args
                .get(requested_name)
                .or_else(|| request.metric_args.get(&metric.name))
                .cloned()
                .unwrap_or_default();
            let item_label = format!("{}.{}", metric.model, metric.name);
            let values = bind_args(&item_label, &metric.args, &provided)?;
            for (arg, value) in &values {
                bound_args.insert(format!("{}.{}", item_label, arg), value.clone());
            }
            select.push(SelectItem {
                kind: SelectKind::Metric,
                name: metric.name.clone(),
                model: metric.model.clone(),
                expr: metric.expr.bind(&values),
                ty: metric.ty,
            });
        }

        let mut predicates: Vec<Predicate> = Vec::new();
        for (filter_request, filter) in request.filters.iter().zip(&filters) {
            let item_label = format!("{}.{}", filter.model, filter.name);
            let values = bind_args(&item_label, &filter.args, &filter_request.args)?;
            for (arg, value) in &values {
                bound_args.insert(format!("{}.{}", item_label, arg), value.clone());
            }
            let expr = filter.expr.bind(&values);
            let clause = if expr.contains_aggregate() {
                PredicateClause::Having
            } else {
                PredicateClause::Where
            };
            predicates.push(Predicate {
                filter: filter.name.clone(),
                clause,
                expr,
            });
        }

        debug!(
            %fingerprint,
            anchor = %join_plan.anchor,
            joins = join_plan.joins.len(),
            selects = select.len(),
            "request compiled"
        );

        Ok(CompiledQueryPlan {
            schema_version: self.graph.version().to_string(),
            fingerprint,
            anchor: join_plan.anchor,
            select,
            joins: join_plan.joins,
            group_by,
            predicates,
            bound_args,
        })
    }

    fn resolve_metric(&self, name: &str) -> CompileResult<&'a ResolvedMetric> {
        let (model, item) = match split_qualified(name) {
            (Some(model), item) => (model.to_string(), item),
            (None, item) => {
                let owners = self.graph.metric_owners(item);
                match owners.len() {
                    0 => {
                        return Err(CompileError::UnknownMetric { name: name.into() })
                    }
                    1 => (owners[0].to_string(), item),
                    _ => {
                        return Err(CompileError::AmbiguousName {
                            name: item.into(),
                            models: owners.into_iter().map(String::from).collect(),
                        })
                    }
                }
            }
        };
        match self.graph.metric_state(&model, item) {
            None => Err(CompileError::UnknownMetric { name: name.into() }),
            Some(Ok(metric)) => Ok(metric),
            Some(Err(fault)) => Err(fault.clone().into()),
        }
    }

    fn resolve_dimension(&self, name: &str) -> CompileResult<(String, &'a Dimension)> {
        let (model, item) = match split_qualified(name) {
            (Some(model), item) => (model.to_string(), item),
            (None, item) => {
                let owners = self.graph.dimension_owners(item);
                match owners.len() {
                    0 => {
                        return Err(CompileError::UnknownDimension { name: name.into() })
                    }
                    1 => (owners[0].to_string(), item),
                    _ => {
                        return Err(CompileError::AmbiguousName {
                            name: item.into(),
                            models: owners.into_iter().map(String::from).collect(),
                        })
                    }
                }
            }
        };
        self.graph
            .model(&model)
            .and_then(|m| m.dimension(item))
            .map(|d| (model, d))
            .ok_or_else(|| CompileError::UnknownDimension { name: name.into() })
    }

    fn resolve_filter(&self, name: &str) -> CompileResult<&'a ResolvedFilter> {
        let (model, item) = match split_qualified(name) {
            (Some(model), item) => (model.to_string(), item),
            (None, item) => {
                let owners = self.graph.filter_owners(item);
                match owners.len() {
                    0 => return Err(CompileError::UnknownFilter { name: name.into() }),
                    1 => (owners[0].to_string(), item),
                    _ => {
                        return Err(CompileError::AmbiguousName {
                            name: item.into(),
                            models: owners.into_iter().map(String::from).collect(),
                        })
                    }
                }
            }
        };
        match self.graph.filter_state(&model, item) {
            None => Err(CompileError::UnknownFilter { name: name.into() }),
            Some(Ok(filter)) => Ok(filter),
            Some(Err(fault)) => Err(fault.clone().into()),
        }
    }
}

/// Split an optionally qualified `model.name` reference.
fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.split_once('.') {
        Some((model, item)) => (Some(model), item),
        None => (None, name),
    }
}

/// Validate and convert caller-supplied argument values into typed
/// literals.
fn bind_args(
    item: &str,
    declared: &[Argument],
    provided: &BTreeMap<String, serde_json::Value>,
) -> Result<BTreeMap<String, Literal>, BindError> {
    for name in provided.keys() {
        if !declared.iter().any(|a| &a.name == name) {
            return Err(BindError::UnknownArgument {
                item: item.into(),
                argument: name.clone(),
            });
        }
    }

    let mut values = BTreeMap::new();
    for arg in declared {
        let value = provided
            .get(&arg.name)
            .ok_or_else(|| BindError::MissingArgument {
                item: item.into(),
                argument: arg.name.clone(),
            })?;
        let literal = convert_value(arg.ty, value).ok_or_else(|| BindError::TypeMismatch {
            item: item.into(),
            argument: arg.name.clone(),
            expected: arg.ty,
            value: value.to_string(),
        })?;
        values.insert(arg.name.clone(), literal);
    }
    Ok(values)
}

/// Convert a JSON value to a literal of the expected semantic type.
fn convert_value(expected: SemanticType, value: &serde_json::Value) -> Option<Literal> {
    use serde_json::Value;
    match (expected, value) {
        (SemanticType::Number, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Some(Literal::Int(i))
            } else {
                n.as_f64().map(Literal::Float)
            }
        }
        (SemanticType::String, Value::String(s)) => Some(Literal::String(s.clone())),
        (SemanticType::Boolean, Value::Bool(b)) => Some(Literal::Bool(*b)),
        // Date and timestamp values travel as strings; format validation
        // belongs to the warehouse.
        (SemanticType::Date | SemanticType::Timestamp, Value::String(s)) => {
            Some(Literal::String(s.clone()))
        }
        (SemanticType::Unknown, Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Some(Literal::Int(i))
            } else {
                n.as_f64().map(Literal::Float)
            }
        }
        (SemanticType::Unknown, Value::String(s)) => Some(Literal::String(s.clone())),
        (SemanticType::Unknown, Value::Bool(b)) => Some(Literal::Bool(*b)),
        (_, Value::Null) => Some(Literal::Null),
        _ => None,
    }
}
