//! Variable Usage Analysis
//!
//! A single walk over a definition body that records, per name as written,
//! how often it is read, assigned locally, and assigned globally. The bridge
//! turns this table into the dependency's read set and its scoping rules.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::ast::Expr;

/// Read and assignment counts per name, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VariableUsage {
    pub accessing: IndexMap<String, usize>,
    pub local_assignment: IndexMap<String, usize>,
    pub global_assignment: IndexMap<String, usize>,
}

impl VariableUsage {
    pub fn analyze(body: &Expr) -> Self {
        let mut usage = Self::default();
        usage.visit(body);
        usage
    }

    pub fn is_empty(&self) -> bool {
        self.accessing.is_empty()
            && self.local_assignment.is_empty()
            && self.global_assignment.is_empty()
    }

    fn visit(&mut self, expr: &Expr) {
        match expr {
            Expr::Constant { .. } => {}
            Expr::Variable { name } => {
                *self.accessing.entry(name.clone()).or_default() += 1;
            }
            Expr::Vector { items } | Expr::Sequence { body: items } => {
                for item in items {
                    self.visit(item);
                }
            }
            Expr::Index { target, index } => {
                self.visit(target);
                self.visit(index);
            }
            Expr::Monadic { arg, .. } => self.visit(arg),
            Expr::Dyadic { left, right, .. } => {
                self.visit(left);
                self.visit(right);
            }
            Expr::Assign { name, value } => {
                self.visit(value);
                let table = if name.contains('.') {
                    &mut self.global_assignment
                } else {
                    &mut self.local_assignment
                };
                *table.entry(name.clone()).or_default() += 1;
            }
        }
    }
}
