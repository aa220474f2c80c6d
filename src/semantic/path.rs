//! Join path planning over the semantic graph.
//!
//! Given the set of models a request references, the planner finds the
//! minimal cardinality-safe set of joins connecting them: breadth-first
//! shortest paths from the anchor model to every other requested model,
//! merged into one acyclic join tree. Ties between equally short paths are
//! broken by cardinality quality; surviving ambiguity is an error the
//! caller resolves with an explicit hint, never a silent guess.
//!
//! Every many-to-many edge in the final plan is marked de-duplicating so
//! the query compiler inserts a distinct step before the join. That no
//! metric is silently double-counted across a many-to-many join is this
//! module's central contract.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use thiserror::Error;

use serde::Serialize;
use tracing::debug;

use crate::model::types::{Cardinality, JoinType};
use crate::semantic::graph::{EdgeData, SemanticGraph};

/// Join planning errors, always carrying enough context for the caller to
/// correct the request (typically by supplying a `join_hint`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("request references no models")]
    NoModels,

    #[error("requested model '{model}' does not exist in this schema")]
    UnknownModel { model: String },

    #[error("no relationship path from '{from}' to '{to}'")]
    NoPath { from: String, to: String },

    #[error(
        "ambiguous join path from '{from}' to '{to}': candidates are [{}]; \
         supply a join hint naming one path's entities",
        candidates
            .iter()
            .map(|path| path.join(" -> "))
            .collect::<Vec<_>>()
            .join("] [")
    )]
    AmbiguousJoinPath {
        from: String,
        to: String,
        /// Each candidate as an ordered list of entity names, usable
        /// verbatim as a `join_hint`.
        candidates: Vec<Vec<String>>,
    },

    #[error("join path would revisit models: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("join hint names unknown entity '{name}'")]
    UnknownHintEntity { name: String },
}

pub type PlanResult<T> = Result<T, PlanError>;

/// One join step in a compiled plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinEdge {
    /// Entity (relationship) name this join traverses.
    pub entity: String,
    pub from_model: String,
    pub to_model: String,
    pub from_column: String,
    pub to_column: String,
    /// Resolved join type (declared, or the planner default of inner).
    pub join_type: JoinType,
    /// Cardinality in traversal direction, when declared.
    pub cardinality: Option<Cardinality>,
    /// The joined side must be de-duplicated before aggregation.
    pub dedup: bool,
}

/// An ordered, acyclic join plan connecting the requested models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinPlan {
    pub anchor: String,
    pub joins: Vec<JoinEdge>,
}

impl JoinPlan {
    /// All models in the plan, anchor included.
    pub fn models(&self) -> BTreeSet<&str> {
        let mut models: BTreeSet<&str> = BTreeSet::new();
        models.insert(self.anchor.as_str());
        for join in &self.joins {
            models.insert(join.from_model.as_str());
            models.insert(join.to_model.as_str());
        }
        models
    }

    /// Does any join in this plan require de-duplication?
    pub fn requires_dedup(&self) -> bool {
        self.joins.iter().any(|j| j.dedup)
    }
}

/// Plan the joins connecting `requested` models, anchored at `anchor`.
///
/// When `hint` is given it is used verbatim and search is skipped entirely.
pub fn plan_joins(
    graph: &SemanticGraph,
    anchor: &str,
    requested: &BTreeSet<String>,
    hint: Option<&[String]>,
) -> PlanResult<JoinPlan> {
    if requested.is_empty() {
        return Err(PlanError::NoModels);
    }
    for model in requested {
        if graph.node_index(model).is_none() {
            return Err(PlanError::UnknownModel {
                model: model.clone(),
            });
        }
    }

    if let Some(hint) = hint {
        return plan_with_hint(graph, anchor, requested, hint);
    }

    let mut joins: Vec<JoinEdge> = Vec::new();
    let mut joined: HashSet<String> = HashSet::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    joined.insert(anchor.to_string());

    for target in requested {
        if target == anchor {
            continue;
        }
        let path = best_path(graph, anchor, target)?;
        for edge in path {
            let key = (
                edge.from_model.clone(),
                edge.to_model.clone(),
                edge.entity.clone(),
            );
            if !seen.insert(key) {
                continue;
            }
            if joined.contains(&edge.to_model) {
                // A second route into an already-joined model is not a
                // tree; the caller must disambiguate with a hint.
                let mut cycle: Vec<String> =
                    joins.iter().map(|j| j.to_model.clone()).collect();
                cycle.insert(0, anchor.to_string());
                cycle.push(edge.to_model.clone());
                return Err(PlanError::CycleDetected { path: cycle });
            }
            joined.insert(edge.to_model.clone());
            joins.push(edge);
        }
    }

    debug!(anchor, joins = joins.len(), "join plan computed");
    Ok(JoinPlan {
        anchor: anchor.to_string(),
        joins,
    })
}

/// Find the unique best shortest path between two models.
///
/// All shortest paths are enumerated, then scored by cardinality quality:
/// fewer undeclared-cardinality edges first, then fewer many-to-many
/// edges. A tie between distinct best paths is an ambiguity error listing
/// the candidates.
fn best_path(graph: &SemanticGraph, from: &str, to: &str) -> PlanResult<Vec<JoinEdge>> {
    let from_idx = graph.node_index(from).expect("checked by caller");
    let to_idx = graph.node_index(to).expect("checked by caller");

    let shortest_len = bfs_distance(graph, from_idx, to_idx).ok_or_else(|| PlanError::NoPath {
        from: from.to_string(),
        to: to.to_string(),
    })?;

    let candidates = enumerate_paths(graph, from_idx, to_idx, shortest_len);
    debug_assert!(!candidates.is_empty());

    let score = |path: &[JoinEdge]| -> (usize, usize) {
        let undeclared = path.iter().filter(|e| e.cardinality.is_none()).count();
        let many_to_many = path
            .iter()
            .filter(|e| e.cardinality == Some(Cardinality::ManyToMany))
            .count();
        (undeclared, many_to_many)
    };

    let best_score = candidates.iter().map(|p| score(p)).min().unwrap();
    let mut best: Vec<&Vec<JoinEdge>> = candidates
        .iter()
        .filter(|p| score(p) == best_score)
        .collect();

    if best.len() > 1 {
        let names: Vec<Vec<String>> = best
            .iter()
            .map(|path| path.iter().map(|e| e.entity.clone()).collect())
            .collect();
        return Err(PlanError::AmbiguousJoinPath {
            from: from.to_string(),
            to: to.to_string(),
            candidates: names,
        });
    }

    Ok(best.remove(0).clone())
}

/// BFS hop count between two nodes, if connected.
fn bfs_distance(graph: &SemanticGraph, from: NodeIndex, to: NodeIndex) -> Option<usize> {
    if from == to {
        return Some(0);
    }
    let entity_graph = graph.entity_graph();
    let mut dist: HashMap<NodeIndex, usize> = HashMap::new();
    let mut queue: VecDeque<NodeIndex> = VecDeque::new();
    dist.insert(from, 0);
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        let next_dist = dist[&current] + 1;
        for edge_ref in entity_graph.edges(current) {
            let neighbor = edge_ref.target();
            if dist.contains_key(&neighbor) {
                continue;
            }
            if neighbor == to {
                return Some(next_dist);
            }
            dist.insert(neighbor, next_dist);
            queue.push_back(neighbor);
        }
    }
    None
}

/// Enumerate every simple path of exactly `len` hops between two nodes.
fn enumerate_paths(
    graph: &SemanticGraph,
    from: NodeIndex,
    to: NodeIndex,
    len: usize,
) -> Vec<Vec<JoinEdge>> {
    let entity_graph = graph.entity_graph();
    let mut results: Vec<Vec<JoinEdge>> = Vec::new();
    let mut stack: Vec<(NodeIndex, Vec<JoinEdge>, HashSet<NodeIndex>)> = Vec::new();

    let mut initial_visited = HashSet::new();
    initial_visited.insert(from);
    stack.push((from, Vec::new(), initial_visited));

    while let Some((current, path, visited)) = stack.pop() {
        if path.len() >= len {
            continue;
        }
        for edge_ref in entity_graph.edges(current) {
            let neighbor = edge_ref.target();
            if visited.contains(&neighbor) {
                continue;
            }
            let edge = to_join_edge(
                &entity_graph[current].name,
                &entity_graph[neighbor].name,
                edge_ref.weight(),
            );
            let mut new_path = path.clone();
            new_path.push(edge);

            if neighbor == to {
                if new_path.len() == len {
                    results.push(new_path);
                }
            } else {
                let mut new_visited = visited.clone();
                new_visited.insert(neighbor);
                stack.push((neighbor, new_path, new_visited));
            }
        }
    }

    // Stack order is exploration-dependent; normalize for determinism.
    results.sort_by(|a, b| {
        let names = |p: &[JoinEdge]| {
            p.iter()
                .map(|e| e.entity.clone())
                .collect::<Vec<_>>()
                .join("/")
        };
        names(a).cmp(&names(b))
    });
    results
}

fn to_join_edge(from_model: &str, to_model: &str, data: &EdgeData) -> JoinEdge {
    JoinEdge {
        entity: data.entity.clone(),
        from_model: from_model.to_string(),
        to_model: to_model.to_string(),
        from_column: data.from_column.clone(),
        to_column: data.to_column.clone(),
        join_type: data.join_type.unwrap_or(JoinType::Inner),
        cardinality: data.cardinality,
        dedup: data.cardinality == Some(Cardinality::ManyToMany),
    }
}

/// Build a plan from an explicit, ordered entity-name hint.
///
/// The hint is used verbatim: each name must match an entity edge whose
/// source is already joined. Self-referencing edges are permitted (each at
/// most once, bounding traversal depth by hint length); reusing an entity
/// or re-entering a joined model is a cycle.
fn plan_with_hint(
    graph: &SemanticGraph,
    anchor: &str,
    requested: &BTreeSet<String>,
    hint: &[String],
) -> PlanResult<JoinPlan> {
    let entity_graph = graph.entity_graph();
    let mut joined: HashSet<String> = HashSet::new();
    let mut used: HashSet<String> = HashSet::new();
    let mut joins: Vec<JoinEdge> = Vec::new();
    joined.insert(anchor.to_string());

    for name in hint {
        if !used.insert(name.clone()) {
            let mut path: Vec<String> = joins.iter().map(|j| j.to_model.clone()).collect();
            path.insert(0, anchor.to_string());
            return Err(PlanError::CycleDetected { path });
        }

        let mut matched: Option<JoinEdge> = None;
        let mut name_exists = false;
        for edge_ref in entity_graph.edge_references() {
            let data = edge_ref.weight();
            if data.entity != *name {
                continue;
            }
            name_exists = true;
            let source = &entity_graph[edge_ref.source()].name;
            let target = &entity_graph[edge_ref.target()].name;
            let self_edge = source == target;
            if !joined.contains(source) {
                continue;
            }
            if joined.contains(target) && !self_edge {
                let mut path: Vec<String> =
                    joins.iter().map(|j| j.to_model.clone()).collect();
                path.insert(0, anchor.to_string());
                path.push(target.clone());
                return Err(PlanError::CycleDetected { path });
            }
            matched = Some(to_join_edge(source, target, data));
            break;
        }

        match matched {
            Some(edge) => {
                joined.insert(edge.to_model.clone());
                joins.push(edge);
            }
            None if !name_exists => {
                return Err(PlanError::UnknownHintEntity { name: name.clone() })
            }
            None => {
                // The entity exists but neither endpoint is reachable from
                // what the hint has joined so far.
                return Err(PlanError::NoPath {
                    from: anchor.to_string(),
                    to: name.clone(),
                });
            }
        }
    }

    for model in requested {
        if !joined.contains(model) {
            return Err(PlanError::NoPath {
                from: anchor.to_string(),
                to: model.clone(),
            });
        }
    }

    debug!(anchor, joins = joins.len(), "join plan built from hint");
    Ok(JoinPlan {
        anchor: anchor.to_string(),
        joins,
    })
}
