//! # Prism
//!
//! A semantic model compiler and query planner: declarative business
//! models in, dialect-agnostic query plans out.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │           Raw Model Definitions (serde shapes)           │
//! │  (dimensions, measures, metrics, filters, entities)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [model::loader]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Validated Models                         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic::graph + expr + typecheck]
//! ┌─────────────────────────────────────────────────────────┐
//! │        SemanticGraph (models, edges, typed ASTs)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [semantic::path + plan::compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │                 CompiledQueryPlan                        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql] (rendering only)
//! ┌─────────────────────────────────────────────────────────┐
//! │                     SQL Text                             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The graph for one schema version is immutable and shared read-only
//! across concurrent compilations; reload builds a new graph off to the
//! side and publishes it atomically through [`semantic::SchemaRegistry`].
//! Query execution, credentials, and row streaming belong to external
//! collaborators.

pub mod cache;
pub mod expr;
pub mod model;
pub mod plan;
pub mod semantic;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::PlanCache;
    pub use crate::expr::{Expr, Literal};
    pub use crate::model::loader::{load_models, RawModel, SchemaError, SchemaErrors};
    pub use crate::model::types::{Cardinality, JoinType, SemanticType};
    pub use crate::model::Model;
    pub use crate::plan::{
        BindError, CompileError, CompiledQueryPlan, FilterRequest, QueryCompiler, QueryRequest,
    };
    pub use crate::semantic::{
        Catalog, GraphError, NullCatalog, PlanError, SchemaRegistry, SemanticGraph, TypeError,
    };
    pub use crate::sql::{render, Dialect};
}

pub use cache::PlanCache;
pub use model::loader::load_models;
pub use plan::{CompiledQueryPlan, QueryCompiler, QueryRequest};
pub use semantic::{SchemaRegistry, SemanticGraph};
pub use sql::{render, Dialect};
