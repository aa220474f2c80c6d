//! SemanticGraph - all models of one schema version plus their entity edges.
//!
//! Models are nodes; entities are directed, typed edges carrying join
//! semantics. The graph also owns the parsed and type-checked expression
//! state of every metric and filter, so request compilation never touches
//! raw expression strings.
//!
//! A graph is immutable once built. Schema reload builds a brand-new graph
//! off to the side and publishes it through [`SchemaRegistry`] with a single
//! pointer swap, so in-flight compilations always see one consistent
//! snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::hash::compute_hash;
use crate::expr::{parse_expr, Expr, ExprContext, ExpressionError};
use crate::model::types::{Cardinality, JoinType, SemanticType};
use crate::model::{Argument, Model};
use crate::semantic::typecheck::{
    check_filter_type, metric_result_type, resolve_model_types, Catalog, TypeError,
};

/// Relationship problems found while assembling the graph.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("entity '{entity}' on model '{model}' targets unknown model '{target}'")]
    UnknownModel {
        model: String,
        entity: String,
        target: String,
    },

    #[error("entity '{entity}' references unknown column '{column}' on model '{model}'")]
    UnknownColumn {
        model: String,
        entity: String,
        column: String,
    },

    #[error(
        "ambiguous entity '{entity}' between '{model}' and '{target}': \
         give each relationship a distinct name"
    )]
    AmbiguousEdge {
        model: String,
        entity: String,
        target: String,
    },
}

/// Why a metric or filter cannot be used, recorded at schema load.
///
/// A broken item does not abort the schema; it fails only the requests
/// that reference it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemFault {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A metric whose expression parsed and type-checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetric {
    pub model: String,
    pub name: String,
    pub expr: Expr,
    pub ty: SemanticType,
    pub args: Vec<Argument>,
}

/// A filter whose expression parsed and produced a boolean.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub model: String,
    pub name: String,
    pub expr: Expr,
    pub args: Vec<Argument>,
}

/// A node in the entity graph.
#[derive(Debug, Clone)]
pub struct ModelNode {
    pub name: String,
}

/// Edge data for one traversal direction of an entity relationship.
#[derive(Debug, Clone)]
pub struct EdgeData {
    /// Effective entity name (role name or target model name).
    pub entity: String,
    /// Join column on the traversal source.
    pub from_column: String,
    /// Join column on the traversal target.
    pub to_column: String,
    /// Declared join type; `None` defers to the planner default.
    pub join_type: Option<JoinType>,
    /// Cardinality in traversal direction; `None` if undeclared.
    pub cardinality: Option<Cardinality>,
    /// True for the synthesized reverse direction of a declared entity.
    pub reversed: bool,
}

/// The semantic graph of one schema version.
#[derive(Debug)]
pub struct SemanticGraph {
    models: BTreeMap<String, Model>,
    graph: DiGraph<ModelNode, EdgeData>,
    node_indices: HashMap<String, NodeIndex>,
    metrics: HashMap<String, HashMap<String, Result<ResolvedMetric, ItemFault>>>,
    filters: HashMap<String, HashMap<String, Result<ResolvedFilter, ItemFault>>>,
    version: String,
}

impl SemanticGraph {
    /// Build a graph from validated models.
    ///
    /// Missing column types are resolved through `catalog` first; entity
    /// edges are validated strictly (any [`GraphError`] fails the whole
    /// schema version); metric/filter expressions are parsed and typed with
    /// per-item fault attribution.
    pub fn build(mut models: Vec<Model>, catalog: &dyn Catalog) -> Result<Self, GraphError> {
        resolve_model_types(&mut models, catalog);

        let models: BTreeMap<String, Model> =
            models.into_iter().map(|m| (m.name.clone(), m)).collect();
        let version = content_version(&models);

        let mut graph = DiGraph::new();
        let mut node_indices = HashMap::new();
        for name in models.keys() {
            let idx = graph.add_node(ModelNode { name: name.clone() });
            node_indices.insert(name.clone(), idx);
        }

        // Entities become one forward and one reverse edge; edges between
        // the same model pair must carry distinguishable names.
        let mut seen_edges: HashMap<(String, String), Vec<String>> = HashMap::new();
        for model in models.values() {
            let from_idx = node_indices[&model.name];
            for entity in &model.entities {
                let entity_name = entity.effective_name().to_string();

                let Some(&to_idx) = node_indices.get(&entity.target) else {
                    return Err(GraphError::UnknownModel {
                        model: model.name.clone(),
                        entity: entity_name,
                        target: entity.target.clone(),
                    });
                };
                if !model.has_column(&entity.primary_key) {
                    return Err(GraphError::UnknownColumn {
                        model: model.name.clone(),
                        entity: entity_name,
                        column: entity.primary_key.clone(),
                    });
                }
                let target = &models[&entity.target];
                if !target.has_column(&entity.foreign_key) {
                    return Err(GraphError::UnknownColumn {
                        model: target.name.clone(),
                        entity: entity_name,
                        column: entity.foreign_key.clone(),
                    });
                }

                let pair = pair_key(&model.name, &entity.target);
                let names = seen_edges.entry(pair).or_default();
                if names.contains(&entity_name) {
                    return Err(GraphError::AmbiguousEdge {
                        model: model.name.clone(),
                        entity: entity_name,
                        target: entity.target.clone(),
                    });
                }
                names.push(entity_name.clone());

                graph.add_edge(
                    from_idx,
                    to_idx,
                    EdgeData {
                        entity: entity_name.clone(),
                        from_column: entity.primary_key.clone(),
                        to_column: entity.foreign_key.clone(),
                        join_type: entity.join_type,
                        cardinality: entity.cardinality,
                        reversed: false,
                    },
                );
                if model.name != entity.target {
                    graph.add_edge(
                        to_idx,
                        from_idx,
                        EdgeData {
                            entity: entity_name,
                            from_column: entity.foreign_key.clone(),
                            to_column: entity.primary_key.clone(),
                            join_type: entity.join_type,
                            cardinality: entity.cardinality.map(Cardinality::reverse),
                            reversed: true,
                        },
                    );
                }
            }
        }

        // Parse and type every metric/filter once; faults are attributed
        // per item and poison only requests that reference them.
        let mut metrics: HashMap<String, HashMap<String, Result<ResolvedMetric, ItemFault>>> =
            HashMap::new();
        let mut filters: HashMap<String, HashMap<String, Result<ResolvedFilter, ItemFault>>> =
            HashMap::new();
        for model in models.values() {
            let metric_states = metrics.entry(model.name.clone()).or_default();
            for metric in &model.metrics {
                let cx = ExprContext {
                    models: &models,
                    owner: &model.name,
                    args: &metric.args,
                };
                let state = parse_expr(&metric.expr, &cx)
                    .map_err(ItemFault::from)
                    .and_then(|expr| {
                        let ty = metric_result_type(&model.name, &metric.name, metric.ty, &expr)?;
                        Ok(ResolvedMetric {
                            model: model.name.clone(),
                            name: metric.name.clone(),
                            expr,
                            ty,
                            args: metric.args.clone(),
                        })
                    });
                if let Err(fault) = &state {
                    debug!(
                        model = %model.name,
                        metric = %metric.name,
                        %fault,
                        "metric failed to resolve"
                    );
                }
                metric_states.insert(metric.name.clone(), state);
            }

            let filter_states = filters.entry(model.name.clone()).or_default();
            for filter in &model.filters {
                let cx = ExprContext {
                    models: &models,
                    owner: &model.name,
                    args: &filter.args,
                };
                let state = parse_expr(&filter.expr, &cx)
                    .map_err(ItemFault::from)
                    .and_then(|expr| {
                        check_filter_type(&model.name, &filter.name, &expr)?;
                        Ok(ResolvedFilter {
                            model: model.name.clone(),
                            name: filter.name.clone(),
                            expr,
                            args: filter.args.clone(),
                        })
                    });
                if let Err(fault) = &state {
                    debug!(
                        model = %model.name,
                        filter = %filter.name,
                        %fault,
                        "filter failed to resolve"
                    );
                }
                filter_states.insert(filter.name.clone(), state);
            }
        }

        debug!(
            models = models.len(),
            edges = graph.edge_count(),
            version = %version,
            "semantic graph built"
        );

        Ok(Self {
            models,
            graph,
            node_indices,
            metrics,
            filters,
            version,
        })
    }

    /// Content-hash version of this schema.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All models, keyed by name.
    pub fn models(&self) -> &BTreeMap<String, Model> {
        &self.models
    }

    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&Model> {
        self.models.get(name)
    }

    /// Number of models.
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Number of declared entity relationships.
    pub fn entity_count(&self) -> usize {
        self.models.values().map(|m| m.entities.len()).sum()
    }

    /// The parse/type state of a metric on a specific model.
    pub fn metric_state(
        &self,
        model: &str,
        name: &str,
    ) -> Option<&Result<ResolvedMetric, ItemFault>> {
        self.metrics.get(model).and_then(|m| m.get(name))
    }

    /// The parse/type state of a filter on a specific model.
    pub fn filter_state(
        &self,
        model: &str,
        name: &str,
    ) -> Option<&Result<ResolvedFilter, ItemFault>> {
        self.filters.get(model).and_then(|m| m.get(name))
    }

    /// Models declaring a metric with this bare name, sorted.
    pub fn metric_owners(&self, name: &str) -> Vec<&str> {
        let mut owners: Vec<&str> = self
            .models
            .values()
            .filter(|m| m.metric(name).is_some())
            .map(|m| m.name.as_str())
            .collect();
        owners.sort_unstable();
        owners
    }

    /// Models declaring a filter with this bare name, sorted.
    pub fn filter_owners(&self, name: &str) -> Vec<&str> {
        let mut owners: Vec<&str> = self
            .models
            .values()
            .filter(|m| m.filter(name).is_some())
            .map(|m| m.name.as_str())
            .collect();
        owners.sort_unstable();
        owners
    }

    /// Models declaring a dimension with this bare name, sorted.
    pub fn dimension_owners(&self, name: &str) -> Vec<&str> {
        let mut owners: Vec<&str> = self
            .models
            .values()
            .filter(|m| m.dimension(name).is_some())
            .map(|m| m.name.as_str())
            .collect();
        owners.sort_unstable();
        owners
    }

    pub(crate) fn entity_graph(&self) -> &DiGraph<ModelNode, EdgeData> {
        &self.graph
    }

    pub(crate) fn node_index(&self, model: &str) -> Option<NodeIndex> {
        self.node_indices.get(model).copied()
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Canonical content hash of a model set.
///
/// Collections are sorted by name before hashing so equivalent definitions
/// with permuted order produce the same version.
fn content_version(models: &BTreeMap<String, Model>) -> String {
    let canonical: Vec<Model> = models
        .values()
        .map(|model| {
            let mut model = model.clone();
            model.dimensions.sort_by(|a, b| a.name.cmp(&b.name));
            model.measures.sort_by(|a, b| a.name.cmp(&b.name));
            model.metrics.sort_by(|a, b| a.name.cmp(&b.name));
            model.filters.sort_by(|a, b| a.name.cmp(&b.name));
            model
                .entities
                .sort_by(|a, b| a.effective_name().cmp(b.effective_name()));
            model
        })
        .collect();
    // Serialization of plain model structs cannot fail.
    compute_hash(&canonical).expect("model serialization is infallible")
}

/// Process-wide holder of the current schema version.
///
/// Readers capture an immutable snapshot once per request; reload is the
/// single writer and publishes a fully-built graph with one pointer swap,
/// so no request is ever torn between two schema versions.
#[derive(Debug)]
pub struct SchemaRegistry {
    current: RwLock<Arc<SemanticGraph>>,
}

impl SchemaRegistry {
    pub fn new(graph: SemanticGraph) -> Self {
        Self {
            current: RwLock::new(Arc::new(graph)),
        }
    }

    /// Capture the current schema snapshot.
    pub fn snapshot(&self) -> Arc<SemanticGraph> {
        self.current
            .read()
            .expect("schema registry lock poisoned")
            .clone()
    }

    /// Atomically publish a new schema version.
    pub fn publish(&self, graph: SemanticGraph) -> Arc<SemanticGraph> {
        let graph = Arc::new(graph);
        let mut slot = self.current.write().expect("schema registry lock poisoned");
        info!(
            old_version = %slot.version(),
            new_version = %graph.version(),
            "publishing schema version"
        );
        *slot = graph.clone();
        graph
    }
}
