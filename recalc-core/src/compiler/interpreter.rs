//! Tree-walking evaluator for definition bodies.
//!
//! Each recompute call builds a fresh [`Interpreter`] with an empty local
//! frame, seeded with the slot index for itemwise definitions. Global reads
//! go through the environment, so reading another dependency evaluates it on
//! the same call stack.
//!
//! Dyadic arguments are evaluated right to left, matching the language's
//! evaluation order.

use std::collections::HashMap;

use super::ast::{DyadicOp, Expr, MonadicOp};
use super::bridge::{Binding, Resolution};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::name::qualify;
use crate::value::Value;

pub struct Interpreter<'a> {
    env: &'a Environment,
    resolution: &'a Resolution,
    locals: HashMap<String, Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(env: &'a Environment, resolution: &'a Resolution) -> Self {
        Self {
            env,
            resolution,
            locals: HashMap::new(),
        }
    }

    /// Evaluate `body`, binding the indexer to `index` when both are present.
    pub fn run(mut self, body: &Expr, index: Option<i64>) -> Result<Value> {
        if let (Some(indexer), Some(index)) = (self.resolution.indexer(), index) {
            self.locals.insert(indexer.to_string(), Value::Int(index));
        }
        self.eval(body)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Constant { value } => Ok(value.clone()),
            Expr::Variable { name } => self.read(name),
            Expr::Vector { items } => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Index { target, index } => {
                let index = self.eval(index)?.as_index()?;
                if let Expr::Variable { name } = target.as_ref() {
                    if let Binding::Global(qualified) = self.resolution.resolve(name) {
                        return self.env.read_item_qualified(&qualified, index);
                    }
                }
                self.eval(target)?.select(index)
            }
            Expr::Monadic { op, arg } => {
                let arg = self.eval(arg)?;
                match op {
                    MonadicOp::Negate => arg.negate(),
                }
            }
            Expr::Dyadic { op, left, right } => {
                let right = self.eval(right)?;
                let left = self.eval(left)?;
                match op {
                    DyadicOp::Add => left.add(&right),
                    DyadicOp::Subtract => left.subtract(&right),
                    DyadicOp::Multiply => left.multiply(&right),
                    DyadicOp::Divide => left.divide(&right),
                }
            }
            Expr::Assign { name, value } => {
                let value = self.eval(value)?;
                self.assign(name, value.clone());
                Ok(value)
            }
            Expr::Sequence { body } => {
                let mut last = Value::Array(Vec::new());
                for statement in body {
                    last = self.eval(statement)?;
                }
                Ok(last)
            }
        }
    }

    fn read(&self, name: &str) -> Result<Value> {
        match self.resolution.resolve(name) {
            Binding::Indexer | Binding::Local => self
                .locals
                .get(name)
                .cloned()
                .ok_or_else(|| Error::UndefinedVariable(qualify(self.resolution.context(), name))),
            Binding::Global(qualified) => self.env.read_qualified(&qualified),
        }
    }

    fn assign(&mut self, name: &str, value: Value) {
        match self.resolution.resolve(name) {
            Binding::Indexer | Binding::Local => {
                self.locals.insert(name.to_string(), value);
            }
            // A definition writing its own variable is not an outside change.
            Binding::Global(qualified) if self.resolution.owner() == Some(&qualified) => {
                self.env.store(qualified, value);
            }
            Binding::Global(qualified) => {
                self.env.assign_qualified(&qualified, value);
            }
        }
    }
}
