//! Expression AST for dependency bodies.
//!
//! The parser lives outside this crate; it hands over a [`DependencyDef`]
//! carrying the defined name, the body, the optional itemwise indexer, the
//! raw source text, and the variable-usage table. Definitions can also be
//! loaded from JSON.

use serde::{Deserialize, Serialize};

use super::analysis::VariableUsage;
use crate::error::Result;
use crate::value::Value;

/// Monadic (single argument) primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonadicOp {
    Negate,
}

/// Dyadic (two argument) scalar primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DyadicOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Constant {
        value: Value,
    },
    /// A plain (`x`) or qualified (`ctx.x`) variable reference.
    Variable {
        name: String,
    },
    /// A vector literal.
    Vector {
        items: Vec<Expr>,
    },
    /// `target[index]`
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Monadic {
        op: MonadicOp,
        arg: Box<Expr>,
    },
    Dyadic {
        op: DyadicOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `name := value`. Plain names assign locally inside a definition body;
    /// qualified names always assign globally.
    Assign {
        name: String,
        value: Box<Expr>,
    },
    /// Statements evaluated in order; the last one is the result.
    Sequence {
        body: Vec<Expr>,
    },
}

impl Expr {
    pub fn constant(value: Value) -> Self {
        Expr::Constant { value }
    }

    pub fn int(value: i64) -> Self {
        Self::constant(Value::Int(value))
    }

    pub fn var(name: &str) -> Self {
        Expr::Variable {
            name: name.to_string(),
        }
    }

    pub fn vector(items: Vec<Expr>) -> Self {
        Expr::Vector { items }
    }

    pub fn index(target: Expr, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn negate(arg: Expr) -> Self {
        Expr::Monadic {
            op: MonadicOp::Negate,
            arg: Box::new(arg),
        }
    }

    pub fn dyadic(op: DyadicOp, left: Expr, right: Expr) -> Self {
        Expr::Dyadic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(left: Expr, right: Expr) -> Self {
        Self::dyadic(DyadicOp::Add, left, right)
    }

    pub fn subtract(left: Expr, right: Expr) -> Self {
        Self::dyadic(DyadicOp::Subtract, left, right)
    }

    pub fn multiply(left: Expr, right: Expr) -> Self {
        Self::dyadic(DyadicOp::Multiply, left, right)
    }

    pub fn divide(left: Expr, right: Expr) -> Self {
        Self::dyadic(DyadicOp::Divide, left, right)
    }

    pub fn assign(name: &str, value: Expr) -> Self {
        Expr::Assign {
            name: name.to_string(),
            value: Box::new(value),
        }
    }

    pub fn sequence(body: Vec<Expr>) -> Self {
        Expr::Sequence { body }
    }
}

/// A dependency definition node: `x: body` or, itemwise, `x[i]: body`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyDef {
    /// The defined variable as written in source.
    pub variable: String,

    /// Index binder of an itemwise definition.
    #[serde(default)]
    pub indexer: Option<String>,

    pub body: Expr,

    /// Raw source text, kept for diagnostics.
    #[serde(default)]
    pub source: String,

    /// Which names the body reads and assigns.
    #[serde(default)]
    pub variables: VariableUsage,
}

impl DependencyDef {
    /// A scalar definition. The usage table is derived from `body`.
    pub fn new(variable: &str, body: Expr) -> Self {
        let variables = VariableUsage::analyze(&body);
        Self {
            variable: variable.to_string(),
            indexer: None,
            body,
            source: String::new(),
            variables,
        }
    }

    /// An itemwise definition binding `indexer` in the body.
    pub fn itemwise(variable: &str, indexer: &str, body: Expr) -> Self {
        Self {
            indexer: Some(indexer.to_string()),
            ..Self::new(variable, body)
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn is_itemwise(&self) -> bool {
        self.indexer.is_some()
    }

    /// Load a definition from JSON, deriving the usage table when absent.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut def: DependencyDef = serde_json::from_str(json)?;
        if def.variables.is_empty() {
            def.variables = VariableUsage::analyze(&def.body);
        }
        Ok(def)
    }
}
