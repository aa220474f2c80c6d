//! Compiled query plans and the request compiler.
//!
//! A [`CompiledQueryPlan`] is the compiler's output: ordered select
//! expressions, join clauses, group-by keys, bound predicates, and the
//! argument values that produced them. Plans are immutable, serializable,
//! and safe to inspect, log, and hash; execution belongs to an external
//! collaborator.

pub mod compiler;
pub mod fingerprint;

pub use compiler::{BindError, CompileError, FilterRequest, QueryCompiler, QueryRequest};
pub use fingerprint::request_fingerprint;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::expr::{Expr, Literal};
use crate::model::types::SemanticType;
use crate::semantic::path::JoinEdge;

/// What a select-list entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SelectKind {
    /// A grouping key (requested dimension).
    Dimension,
    /// An aggregate expression (requested metric).
    Metric,
}

/// One entry in the plan's select list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectItem {
    pub kind: SelectKind,
    /// Output alias (the requested dimension/metric name).
    pub name: String,
    /// Model owning the item.
    pub model: String,
    /// Fully bound expression.
    pub expr: Expr,
    pub ty: SemanticType,
}

/// Which predicate list a filter lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PredicateClause {
    /// Plain row predicate.
    Where,
    /// Aggregate-bearing predicate, applied after grouping.
    Having,
}

/// A bound filter predicate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Predicate {
    /// The filter name this predicate came from.
    pub filter: String,
    pub clause: PredicateClause,
    /// Fully bound boolean expression.
    pub expr: Expr,
}

/// The compiler's output: a complete, immutable, dialect-agnostic query
/// plan for one request against one schema version.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQueryPlan {
    /// Schema version the plan was compiled against.
    pub schema_version: String,
    /// Canonical request fingerprint.
    pub fingerprint: String,
    /// The model anchoring the join tree.
    pub anchor: String,
    /// Ordered select list: dimensions first, then metrics.
    pub select: Vec<SelectItem>,
    /// Ordered, acyclic join clauses.
    pub joins: Vec<JoinEdge>,
    /// Group-by keys; always equal to the dimension select expressions.
    pub group_by: Vec<Expr>,
    /// Bound predicates, WHERE and HAVING.
    pub predicates: Vec<Predicate>,
    /// Argument values bound into the plan, keyed `item.argument`.
    pub bound_args: BTreeMap<String, Literal>,
}

impl CompiledQueryPlan {
    /// Select items of one kind, in plan order.
    pub fn select_of(&self, kind: SelectKind) -> impl Iterator<Item = &SelectItem> {
        self.select.iter().filter(move |item| item.kind == kind)
    }

    /// Does any join require a de-duplication step?
    pub fn requires_dedup(&self) -> bool {
        self.joins.iter().any(|j| j.dedup)
    }
}
