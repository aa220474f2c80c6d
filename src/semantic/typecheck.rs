//! Semantic type resolution and expression type inference.
//!
//! Dimension and measure types come from their declarations or, when
//! omitted, from the physical catalog collaborator. Metric and filter
//! result types are derived from their expression trees by promotion
//! rules. All type errors surface at schema load or request compile time,
//! never at execution.

use thiserror::Error;

use crate::expr::{AggregateFunc, Expr, UnaryOp};
use crate::model::types::SemanticType;
use crate::model::Model;

/// Supplies physical column type metadata when a dimension or measure
/// omits an explicit type.
pub trait Catalog {
    /// Type of `(model, column)`, or `None` if unavailable.
    fn column_type(&self, model: &str, column: &str) -> Option<SemanticType>;
}

/// A catalog with no metadata; every lookup is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCatalog;

impl Catalog for NullCatalog {
    fn column_type(&self, _model: &str, _column: &str) -> Option<SemanticType> {
        None
    }
}

/// Type resolution and inference errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error(
        "{kind} '{name}' in model '{model}' has no resolvable type; \
         declare a type on it or on the columns it references"
    )]
    UnresolvedType {
        model: String,
        kind: &'static str,
        name: String,
    },

    #[error("type mismatch in {context}: {left} is incompatible with {right}")]
    Mismatch {
        context: String,
        left: SemanticType,
        right: SemanticType,
    },
}

pub type TypeResult<T> = Result<T, TypeError>;

/// Fill in missing dimension/measure types from the catalog.
///
/// Declared types always win; a column the catalog cannot describe is left
/// `Unknown` rather than failing (a metric over it must then declare its
/// own result type).
pub fn resolve_model_types(models: &mut [Model], catalog: &dyn Catalog) {
    for model in models.iter_mut() {
        let model_name = model.name.clone();
        for dim in &mut model.dimensions {
            if dim.ty.is_none() {
                dim.ty = Some(
                    catalog
                        .column_type(&model_name, &dim.name)
                        .unwrap_or(SemanticType::Unknown),
                );
            }
        }
        for measure in &mut model.measures {
            if measure.ty.is_none() {
                measure.ty = Some(
                    catalog
                        .column_type(&model_name, &measure.name)
                        .unwrap_or(SemanticType::Unknown),
                );
            }
        }
    }
}

/// Infer the result type of an expression tree.
pub fn infer_type(expr: &Expr, context: &str) -> TypeResult<SemanticType> {
    match expr {
        Expr::Column { ty, .. } => Ok(*ty),
        Expr::Literal(lit) => Ok(lit.ty()),
        Expr::Argument { ty, .. } => Ok(*ty),

        Expr::Unary { op, expr: inner } => {
            let inner_ty = infer_type(inner, context)?;
            match op {
                UnaryOp::Not => {
                    if !inner_ty.boolean_compatible() {
                        return Err(TypeError::Mismatch {
                            context: context.into(),
                            left: inner_ty,
                            right: SemanticType::Boolean,
                        });
                    }
                    Ok(SemanticType::Boolean)
                }
                UnaryOp::Neg => {
                    if !inner_ty.numeric_compatible() {
                        return Err(TypeError::Mismatch {
                            context: context.into(),
                            left: inner_ty,
                            right: SemanticType::Number,
                        });
                    }
                    Ok(SemanticType::Number)
                }
                UnaryOp::IsNull | UnaryOp::IsNotNull => Ok(SemanticType::Boolean),
            }
        }

        Expr::Binary { left, op, right } => {
            let left_ty = infer_type(left, context)?;
            let right_ty = infer_type(right, context)?;
            if op.is_arithmetic() {
                if !left_ty.numeric_compatible() || !right_ty.numeric_compatible() {
                    return Err(TypeError::Mismatch {
                        context: context.into(),
                        left: left_ty,
                        right: right_ty,
                    });
                }
                Ok(SemanticType::Number)
            } else if op.is_comparison() {
                if !left_ty.comparable_with(&right_ty) {
                    return Err(TypeError::Mismatch {
                        context: context.into(),
                        left: left_ty,
                        right: right_ty,
                    });
                }
                Ok(SemanticType::Boolean)
            } else {
                debug_assert!(op.is_logical());
                if !left_ty.boolean_compatible() || !right_ty.boolean_compatible() {
                    return Err(TypeError::Mismatch {
                        context: context.into(),
                        left: left_ty,
                        right: right_ty,
                    });
                }
                Ok(SemanticType::Boolean)
            }
        }

        Expr::Aggregate { func, arg, .. } => match func {
            AggregateFunc::Count => Ok(SemanticType::Number),
            AggregateFunc::Sum | AggregateFunc::Avg => {
                let arg_ty = arg
                    .as_ref()
                    .map(|a| infer_type(a, context))
                    .transpose()?
                    .unwrap_or(SemanticType::Unknown);
                if !arg_ty.numeric_compatible() {
                    return Err(TypeError::Mismatch {
                        context: context.into(),
                        left: arg_ty,
                        right: SemanticType::Number,
                    });
                }
                Ok(SemanticType::Number)
            }
            AggregateFunc::Min | AggregateFunc::Max => arg
                .as_ref()
                .map(|a| infer_type(a, context))
                .transpose()
                .map(|ty| ty.unwrap_or(SemanticType::Unknown)),
        },

        // Scalar functions pass through untyped; callers needing a known
        // result type must declare it on the metric.
        Expr::Function { args, .. } => {
            for arg in args {
                infer_type(arg, context)?;
            }
            Ok(SemanticType::Unknown)
        }
    }
}

/// Resolve a metric's result type: declared wins, otherwise inferred; an
/// unknown inference with no declaration is an error.
pub fn metric_result_type(
    model: &str,
    name: &str,
    declared: Option<SemanticType>,
    expr: &Expr,
) -> TypeResult<SemanticType> {
    let context = format!("metric '{}.{}'", model, name);
    let inferred = infer_type(expr, &context)?;
    match declared {
        Some(ty) if ty.is_known() => Ok(ty),
        _ => {
            if inferred.is_known() {
                Ok(inferred)
            } else {
                Err(TypeError::UnresolvedType {
                    model: model.into(),
                    kind: "metric",
                    name: name.into(),
                })
            }
        }
    }
}

/// Check that a filter expression produces a boolean predicate.
pub fn check_filter_type(model: &str, name: &str, expr: &Expr) -> TypeResult<()> {
    let context = format!("filter '{}.{}'", model, name);
    let ty = infer_type(expr, &context)?;
    if ty.boolean_compatible() {
        Ok(())
    } else {
        Err(TypeError::Mismatch {
            context,
            left: ty,
            right: SemanticType::Boolean,
        })
    }
}
