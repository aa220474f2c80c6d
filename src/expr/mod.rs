//! Typed expression AST for metric and filter expressions.
//!
//! Expressions are parsed once at schema load by [`parser`] and never
//! re-interpreted from strings afterwards. The AST is dialect-agnostic;
//! rendering to SQL text is the `sql` module's concern.

pub mod parser;

pub use parser::{parse_expr, ExprContext, ExpressionError};

use serde::Serialize;

use crate::model::types::SemanticType;

/// A parsed, reference-resolved expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Reference to a dimension or measure: `model.column`.
    Column {
        model: String,
        column: String,
        ty: SemanticType,
    },

    /// Literal value.
    Literal(Literal),

    /// Named argument placeholder carrying its declared type.
    ///
    /// Replaced by a [`Literal`] when the compiler binds caller-supplied
    /// values.
    Argument { name: String, ty: SemanticType },

    /// Unary operation.
    Unary { op: UnaryOp, expr: Box<Expr> },

    /// Binary operation.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },

    /// Aggregate function call. `arg` is `None` for `count(*)`.
    Aggregate {
        func: AggregateFunc,
        arg: Option<Box<Expr>>,
        distinct: bool,
    },

    /// Scalar function call, passed through by name.
    Function { name: String, args: Vec<Expr> },
}

/// Literal values appearing in expressions and bound arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

impl Literal {
    /// Semantic type of the literal. `Null` is `Unknown`.
    pub fn ty(&self) -> SemanticType {
        match self {
            Literal::Int(_) | Literal::Float(_) => SemanticType::Number,
            Literal::String(_) => SemanticType::String,
            Literal::Bool(_) => SemanticType::Boolean,
            Literal::Null => SemanticType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
}

impl BinaryOp {
    /// Is this an arithmetic operator?
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }

    /// Is this a comparison operator (boolean result)?
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte
        )
    }

    /// Is this a logical connective?
    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregateFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Count => "COUNT",
        }
    }
}

impl Expr {
    /// Visit every node in the tree, depth-first.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match self {
            Expr::Unary { expr, .. } => expr.walk(visit),
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Aggregate { arg: Some(arg), .. } => arg.walk(visit),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            _ => {}
        }
    }

    /// Does this tree contain an aggregate call?
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, Expr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Collect the names of all models referenced by this tree.
    pub fn referenced_models(&self, out: &mut std::collections::BTreeSet<String>) {
        self.walk(&mut |e| {
            if let Expr::Column { model, .. } = e {
                out.insert(model.clone());
            }
        });
    }

    /// Collect the columns referenced on one model.
    pub fn referenced_columns(&self, model: &str, out: &mut std::collections::BTreeSet<String>) {
        self.walk(&mut |e| {
            if let Expr::Column {
                model: m, column, ..
            } = e
            {
                if m == model {
                    out.insert(column.clone());
                }
            }
        });
    }

    /// Collect the names of argument placeholders still present in the tree.
    pub fn argument_names(&self, out: &mut std::collections::BTreeSet<String>) {
        self.walk(&mut |e| {
            if let Expr::Argument { name, .. } = e {
                out.insert(name.clone());
            }
        });
    }

    /// Replace argument placeholders with literal values.
    ///
    /// Placeholders without an entry in `values` are left in place; the
    /// compiler validates completeness before calling this.
    pub fn bind(&self, values: &std::collections::BTreeMap<String, Literal>) -> Expr {
        match self {
            Expr::Argument { name, ty } => match values.get(name) {
                Some(lit) => Expr::Literal(lit.clone()),
                None => Expr::Argument {
                    name: name.clone(),
                    ty: *ty,
                },
            },
            Expr::Unary { op, expr } => Expr::Unary {
                op: *op,
                expr: Box::new(expr.bind(values)),
            },
            Expr::Binary { left, op, right } => Expr::Binary {
                left: Box::new(left.bind(values)),
                op: *op,
                right: Box::new(right.bind(values)),
            },
            Expr::Aggregate {
                func,
                arg,
                distinct,
            } => Expr::Aggregate {
                func: *func,
                arg: arg.as_ref().map(|a| Box::new(a.bind(values))),
                distinct: *distinct,
            },
            Expr::Function { name, args } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.bind(values)).collect(),
            },
            other => other.clone(),
        }
    }
}
