//! The semantic layer: graph construction, type resolution, join planning.
//!
//! - `graph`: builds the [`SemanticGraph`] from validated models and owns
//!   the per-schema-version snapshot registry
//! - `typecheck`: semantic type resolution and expression type inference
//! - `path`: join path planning over the entity graph

pub mod graph;
pub mod path;
pub mod typecheck;

pub use graph::{GraphError, ItemFault, SchemaRegistry, SemanticGraph};
pub use path::{JoinEdge, JoinPlan, PlanError};
pub use typecheck::{Catalog, NullCatalog, TypeError};
