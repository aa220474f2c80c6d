//! Expression parser built on sqlparser-rs.
//!
//! An `expr` string is wrapped in `SELECT ...` and parsed with the generic
//! dialect, then the sqlparser AST is converted into the crate's [`Expr`]
//! while resolving every `model.column` reference against the loaded model
//! set. Argument placeholders (`{name}`) are substituted with a reserved
//! marker identifier before parsing so they survive as ordinary
//! identifiers, mirroring how raw column markers are smuggled through
//! sqlparser elsewhere in this codebase's lineage.
//!
//! Parsing is total and deterministic: the same input always yields the
//! same AST, and malformed syntax fails the whole parse.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use sqlparser::ast as sql;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use thiserror::Error;

use super::{AggregateFunc, BinaryOp, Expr, Literal, UnaryOp};
use crate::model::{Argument, Model};

/// Pattern for `{argument}` placeholders.
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}").unwrap());

/// Marker prefix used to smuggle placeholders through sqlparser.
const ARG_MARKER: &str = "__prism_arg__";

/// Errors raised while parsing or resolving an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("syntax error in expression: {message}")]
    Syntax { message: String },

    #[error("expression references unknown model '{model}'")]
    UnknownModel { model: String },

    #[error("unresolved reference '{model}.{name}': no such dimension, measure, or metric")]
    UnknownReference { model: String, name: String },

    #[error("placeholder '{{{name}}}' does not match any declared argument")]
    UndeclaredArgument { name: String },

    #[error("circular metric reference: {}", chain.join(" -> "))]
    CircularReference { chain: Vec<String> },

    #[error("unsupported expression syntax: {feature}")]
    Unsupported { feature: String },
}

pub type ExprResult<T> = Result<T, ExpressionError>;

/// Resolution context for a single `expr` string.
pub struct ExprContext<'a> {
    /// All models in the schema, keyed by name.
    pub models: &'a BTreeMap<String, Model>,
    /// The model owning the metric/filter being parsed; unqualified
    /// column references resolve against it.
    pub owner: &'a str,
    /// Arguments declared by the owning metric/filter.
    pub args: &'a [Argument],
}

/// Parse an `expr` string into a resolved [`Expr`].
pub fn parse_expr(raw: &str, cx: &ExprContext<'_>) -> ExprResult<Expr> {
    let mut stack = Vec::new();
    parse_with_stack(raw, cx, &mut stack)
}

fn parse_with_stack(
    raw: &str,
    cx: &ExprContext<'_>,
    stack: &mut Vec<String>,
) -> ExprResult<Expr> {
    let substituted = PLACEHOLDER_PATTERN.replace_all(raw, format!("{ARG_MARKER}${{1}}"));
    let sql_text = format!("SELECT {}", substituted);

    let statements = Parser::parse_sql(&GenericDialect {}, &sql_text).map_err(|e| {
        ExpressionError::Syntax {
            message: e.to_string(),
        }
    })?;

    let projection = single_projection(statements)?;
    convert(&projection, cx, stack)
}

/// Unwrap `SELECT <expr>` down to the single projected expression.
fn single_projection(statements: Vec<sql::Statement>) -> ExprResult<sql::Expr> {
    let mut statements = statements;
    if statements.len() != 1 {
        return Err(ExpressionError::Syntax {
            message: format!("expected a single expression, found {} statements", statements.len()),
        });
    }
    let query = match statements.remove(0) {
        sql::Statement::Query(query) => query,
        other => {
            return Err(ExpressionError::Syntax {
                message: format!("expected an expression, found: {}", other),
            })
        }
    };
    let select = match *query.body {
        sql::SetExpr::Select(select) => select,
        other => {
            return Err(ExpressionError::Syntax {
                message: format!("expected an expression, found: {}", other),
            })
        }
    };
    if select.projection.len() != 1 {
        return Err(ExpressionError::Syntax {
            message: "expected a single expression".into(),
        });
    }
    match select.projection.into_iter().next().unwrap() {
        sql::SelectItem::UnnamedExpr(expr) => Ok(expr),
        sql::SelectItem::ExprWithAlias { .. } => Err(ExpressionError::Unsupported {
            feature: "alias inside an expression".into(),
        }),
        _ => Err(ExpressionError::Unsupported {
            feature: "wildcard projection".into(),
        }),
    }
}

fn convert(expr: &sql::Expr, cx: &ExprContext<'_>, stack: &mut Vec<String>) -> ExprResult<Expr> {
    match expr {
        sql::Expr::Identifier(ident) => resolve_identifier(&ident.value, cx, stack),

        sql::Expr::CompoundIdentifier(parts) => {
            if parts.len() != 2 {
                return Err(ExpressionError::Unsupported {
                    feature: format!(
                        "reference with {} parts (only model.column is supported)",
                        parts.len()
                    ),
                });
            }
            resolve_reference(&parts[0].value, &parts[1].value, cx, stack)
        }

        sql::Expr::Value(value) => convert_value(value),

        sql::Expr::Nested(inner) => convert(inner, cx, stack),

        sql::Expr::BinaryOp { left, op, right } => {
            let op = convert_binary_op(op)?;
            Ok(Expr::Binary {
                left: Box::new(convert(left, cx, stack)?),
                op,
                right: Box::new(convert(right, cx, stack)?),
            })
        }

        sql::Expr::UnaryOp { op, expr: inner } => match op {
            sql::UnaryOperator::Not => Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(convert(inner, cx, stack)?),
            }),
            sql::UnaryOperator::Minus => Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(convert(inner, cx, stack)?),
            }),
            sql::UnaryOperator::Plus => convert(inner, cx, stack),
            other => Err(ExpressionError::Unsupported {
                feature: format!("unary operator {:?}", other),
            }),
        },

        sql::Expr::IsNull(inner) => Ok(Expr::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(convert(inner, cx, stack)?),
        }),

        sql::Expr::IsNotNull(inner) => Ok(Expr::Unary {
            op: UnaryOp::IsNotNull,
            expr: Box::new(convert(inner, cx, stack)?),
        }),

        sql::Expr::Function(func) => convert_function(func, cx, stack),

        other => Err(ExpressionError::Unsupported {
            feature: format!("{}", other),
        }),
    }
}

/// Resolve a bare identifier: an argument marker or a column on the owner.
fn resolve_identifier(
    name: &str,
    cx: &ExprContext<'_>,
    stack: &mut Vec<String>,
) -> ExprResult<Expr> {
    if let Some(arg_name) = name.strip_prefix(ARG_MARKER) {
        let arg = cx
            .args
            .iter()
            .find(|a| a.name == arg_name)
            .ok_or_else(|| ExpressionError::UndeclaredArgument {
                name: arg_name.into(),
            })?;
        return Ok(Expr::Argument {
            name: arg.name.clone(),
            ty: arg.ty,
        });
    }
    resolve_reference(cx.owner, name, cx, stack)
}

/// Resolve `model.name` to a column reference or an inlined metric.
fn resolve_reference(
    model_name: &str,
    name: &str,
    cx: &ExprContext<'_>,
    stack: &mut Vec<String>,
) -> ExprResult<Expr> {
    let model = cx
        .models
        .get(model_name)
        .ok_or_else(|| ExpressionError::UnknownModel {
            model: model_name.into(),
        })?;

    if let Some(ty) = model.column_type(name) {
        return Ok(Expr::Column {
            model: model_name.into(),
            column: name.into(),
            ty,
        });
    }

    // Metric composition: a reference to another metric inlines its tree.
    if let Some(metric) = model.metric(name) {
        let key = format!("{}.{}", model_name, name);
        if stack.contains(&key) {
            let mut chain = stack.clone();
            chain.push(key);
            return Err(ExpressionError::CircularReference { chain });
        }
        if !metric.args.is_empty() {
            return Err(ExpressionError::Unsupported {
                feature: format!("composing parameterized metric '{}'", key),
            });
        }
        stack.push(key);
        let inner_cx = ExprContext {
            models: cx.models,
            owner: model_name,
            args: &metric.args,
        };
        let inlined = parse_with_stack(&metric.expr, &inner_cx, stack);
        stack.pop();
        return inlined;
    }

    Err(ExpressionError::UnknownReference {
        model: model_name.into(),
        name: name.into(),
    })
}

fn convert_value(value: &sql::Value) -> ExprResult<Expr> {
    match value {
        sql::Value::Number(text, _) => {
            if let Ok(i) = text.parse::<i64>() {
                Ok(Expr::Literal(Literal::Int(i)))
            } else {
                text.parse::<f64>()
                    .map(|f| Expr::Literal(Literal::Float(f)))
                    .map_err(|_| ExpressionError::Syntax {
                        message: format!("invalid numeric literal '{}'", text),
                    })
            }
        }
        sql::Value::SingleQuotedString(s) | sql::Value::DoubleQuotedString(s) => {
            Ok(Expr::Literal(Literal::String(s.clone())))
        }
        sql::Value::Boolean(b) => Ok(Expr::Literal(Literal::Bool(*b))),
        sql::Value::Null => Ok(Expr::Literal(Literal::Null)),
        other => Err(ExpressionError::Unsupported {
            feature: format!("literal {}", other),
        }),
    }
}

fn convert_binary_op(op: &sql::BinaryOperator) -> ExprResult<BinaryOp> {
    match op {
        sql::BinaryOperator::Plus => Ok(BinaryOp::Add),
        sql::BinaryOperator::Minus => Ok(BinaryOp::Sub),
        sql::BinaryOperator::Multiply => Ok(BinaryOp::Mul),
        sql::BinaryOperator::Divide => Ok(BinaryOp::Div),
        sql::BinaryOperator::Eq => Ok(BinaryOp::Eq),
        sql::BinaryOperator::NotEq => Ok(BinaryOp::Ne),
        sql::BinaryOperator::Lt => Ok(BinaryOp::Lt),
        sql::BinaryOperator::LtEq => Ok(BinaryOp::Lte),
        sql::BinaryOperator::Gt => Ok(BinaryOp::Gt),
        sql::BinaryOperator::GtEq => Ok(BinaryOp::Gte),
        sql::BinaryOperator::And => Ok(BinaryOp::And),
        sql::BinaryOperator::Or => Ok(BinaryOp::Or),
        other => Err(ExpressionError::Unsupported {
            feature: format!("binary operator {}", other),
        }),
    }
}

fn convert_function(
    func: &sql::Function,
    cx: &ExprContext<'_>,
    stack: &mut Vec<String>,
) -> ExprResult<Expr> {
    let name = func.name.to_string().to_lowercase();

    let (distinct, raw_args) = match &func.args {
        sql::FunctionArguments::None => (false, Vec::new()),
        sql::FunctionArguments::List(list) => {
            let distinct = matches!(
                list.duplicate_treatment,
                Some(sql::DuplicateTreatment::Distinct)
            );
            (distinct, list.args.iter().collect::<Vec<_>>())
        }
        sql::FunctionArguments::Subquery(_) => {
            return Err(ExpressionError::Unsupported {
                feature: format!("subquery argument to {}()", name),
            })
        }
    };

    let aggregate = match name.as_str() {
        "sum" => Some(AggregateFunc::Sum),
        "avg" => Some(AggregateFunc::Avg),
        "min" => Some(AggregateFunc::Min),
        "max" => Some(AggregateFunc::Max),
        "count" => Some(AggregateFunc::Count),
        _ => None,
    };

    if let Some(agg) = aggregate {
        if raw_args.len() != 1 {
            return Err(ExpressionError::Syntax {
                message: format!("{}() takes exactly one argument", name),
            });
        }
        let arg = match raw_args[0] {
            sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(e)) => {
                Some(Box::new(convert(e, cx, stack)?))
            }
            sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Wildcard) => {
                if agg != AggregateFunc::Count {
                    return Err(ExpressionError::Syntax {
                        message: format!("{}(*) is not valid", name),
                    });
                }
                None
            }
            _ => {
                return Err(ExpressionError::Unsupported {
                    feature: format!("argument form in {}()", name),
                })
            }
        };
        return Ok(Expr::Aggregate {
            func: agg,
            arg,
            distinct,
        });
    }

    let mut args = Vec::with_capacity(raw_args.len());
    for raw_arg in raw_args {
        match raw_arg {
            sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(e)) => {
                args.push(convert(e, cx, stack)?)
            }
            _ => {
                return Err(ExpressionError::Unsupported {
                    feature: format!("argument form in {}()", name),
                })
            }
        }
    }
    Ok(Expr::Function { name, args })
}
