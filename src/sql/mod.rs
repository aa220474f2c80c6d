//! SQL text rendering for compiled plans.
//!
//! Pure functions from [`CompiledQueryPlan`] to SQL text for a target
//! dialect. Rendering executes nothing; the execution collaborator owns
//! connections, row limits, and result streaming.
//!
//! De-duplicating joins (many-to-many edges) render the joined side as a
//! `SELECT DISTINCT` subquery over exactly the columns the plan touches,
//! so downstream aggregates never double-count fanned-out rows.

pub mod dialect;

pub use dialect::{Dialect, SqlDialect};

use std::collections::BTreeSet;

use crate::expr::{Expr, Literal, UnaryOp};
use crate::plan::{CompiledQueryPlan, PredicateClause, SelectKind};
use crate::semantic::path::JoinEdge;

/// Render a compiled plan as one SELECT statement.
pub fn render(plan: &CompiledQueryPlan, dialect: Dialect) -> String {
    let rules = dialect.rules();
    let mut sql = String::from("SELECT ");

    let select_list: Vec<String> = plan
        .select
        .iter()
        .map(|item| {
            format!(
                "{} AS {}",
                render_expr(&item.expr, rules),
                rules.quote_identifier(&item.name)
            )
        })
        .collect();
    sql.push_str(&select_list.join(", "));

    sql.push_str("\nFROM ");
    sql.push_str(&rules.quote_identifier(&plan.anchor));

    for join in &plan.joins {
        sql.push('\n');
        sql.push_str(&render_join(plan, join, rules));
    }

    let where_preds: Vec<String> = plan
        .predicates
        .iter()
        .filter(|p| p.clause == PredicateClause::Where)
        .map(|p| render_expr(&p.expr, rules))
        .collect();
    if !where_preds.is_empty() {
        sql.push_str("\nWHERE ");
        sql.push_str(&where_preds.join(" AND "));
    }

    if plan.select_of(SelectKind::Dimension).next().is_some() {
        let group_list: Vec<String> = plan
            .group_by
            .iter()
            .map(|expr| render_expr(expr, rules))
            .collect();
        sql.push_str("\nGROUP BY ");
        sql.push_str(&group_list.join(", "));
    }

    let having_preds: Vec<String> = plan
        .predicates
        .iter()
        .filter(|p| p.clause == PredicateClause::Having)
        .map(|p| render_expr(&p.expr, rules))
        .collect();
    if !having_preds.is_empty() {
        sql.push_str("\nHAVING ");
        sql.push_str(&having_preds.join(" AND "));
    }

    sql
}

fn render_join(plan: &CompiledQueryPlan, join: &JoinEdge, rules: &dyn SqlDialect) -> String {
    let keyword = match join.join_type {
        crate::model::types::JoinType::Inner => "INNER JOIN",
        crate::model::types::JoinType::Left => "LEFT JOIN",
    };

    let target = if join.dedup {
        // Restrict the distinct projection to the columns the plan
        // actually touches on the joined side.
        let columns = referenced_columns(plan, &join.to_model);
        let column_list: Vec<String> = columns
            .iter()
            .map(|c| rules.quote_identifier(c))
            .collect();
        format!(
            "(SELECT DISTINCT {} FROM {}) AS {}",
            column_list.join(", "),
            rules.quote_identifier(&join.to_model),
            rules.quote_identifier(&join.to_model)
        )
    } else {
        rules.quote_identifier(&join.to_model)
    };

    format!(
        "{} {} ON {}.{} = {}.{}",
        keyword,
        target,
        rules.quote_identifier(&join.from_model),
        rules.quote_identifier(&join.from_column),
        rules.quote_identifier(&join.to_model),
        rules.quote_identifier(&join.to_column),
    )
}

/// Every column of `model` the plan touches: select expressions,
/// predicates, and join keys.
fn referenced_columns(plan: &CompiledQueryPlan, model: &str) -> BTreeSet<String> {
    let mut columns = BTreeSet::new();
    for item in &plan.select {
        item.expr.referenced_columns(model, &mut columns);
    }
    for predicate in &plan.predicates {
        predicate.expr.referenced_columns(model, &mut columns);
    }
    for join in &plan.joins {
        if join.from_model == model {
            columns.insert(join.from_column.clone());
        }
        if join.to_model == model {
            columns.insert(join.to_column.clone());
        }
    }
    columns
}

fn render_expr(expr: &Expr, rules: &dyn SqlDialect) -> String {
    match expr {
        Expr::Column { model, column, .. } => format!(
            "{}.{}",
            rules.quote_identifier(model),
            rules.quote_identifier(column)
        ),

        Expr::Literal(lit) => render_literal(lit, rules),

        // Unbound placeholders never survive compilation; render the
        // placeholder form for debuggability if one slips through.
        Expr::Argument { name, .. } => format!("{{{}}}", name),

        Expr::Unary { op, expr: inner } => match op {
            UnaryOp::Not => format!("NOT {}", render_operand(inner, rules)),
            UnaryOp::Neg => format!("-{}", render_operand(inner, rules)),
            UnaryOp::IsNull => format!("{} IS NULL", render_operand(inner, rules)),
            UnaryOp::IsNotNull => format!("{} IS NOT NULL", render_operand(inner, rules)),
        },

        Expr::Binary { left, op, right } => format!(
            "{} {} {}",
            render_operand(left, rules),
            op.as_str(),
            render_operand(right, rules)
        ),

        Expr::Aggregate {
            func,
            arg,
            distinct,
        } => {
            let inner = match arg {
                Some(arg) => render_expr(arg, rules),
                None => "*".to_string(),
            };
            if *distinct {
                format!("{}(DISTINCT {})", func.as_str(), inner)
            } else {
                format!("{}({})", func.as_str(), inner)
            }
        }

        Expr::Function { name, args } => {
            let rendered: Vec<String> = args.iter().map(|a| render_expr(a, rules)).collect();
            format!("{}({})", name.to_uppercase(), rendered.join(", "))
        }
    }
}

/// Parenthesize nested operations so precedence survives rendering.
fn render_operand(expr: &Expr, rules: &dyn SqlDialect) -> String {
    match expr {
        Expr::Binary { .. } | Expr::Unary { .. } => format!("({})", render_expr(expr, rules)),
        _ => render_expr(expr, rules),
    }
}

fn render_literal(lit: &Literal, rules: &dyn SqlDialect) -> String {
    match lit {
        Literal::Int(i) => i.to_string(),
        Literal::Float(f) => {
            let mut buffer = ryu::Buffer::new();
            buffer.format(*f).to_string()
        }
        Literal::String(s) => rules.quote_string(s),
        Literal::Bool(b) => rules.format_bool(*b).to_string(),
        Literal::Null => "NULL".to_string(),
    }
}
