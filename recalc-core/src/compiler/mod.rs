//! Definition Compiler
//!
//! Everything between a parsed dependency definition and a registered item.
//!
//! # Pipeline
//!
//! ```text
//! DependencyDef ──> VariableUsage ──> compile() ──> CompiledDependency ──> Registry
//!     (AST)          (analysis)       (bridge)      (closure + reads)
//! ```
//!
//! The parser is not part of this crate. It hands over a [`DependencyDef`];
//! definitions built in Rust run the usage analysis themselves.
//!
//! Recompute procedures are closures over an immutable snapshot of the body
//! and its [`Resolution`], run by the tree-walking [`Interpreter`].

mod analysis;
mod ast;
mod bridge;
mod interpreter;

pub use analysis::VariableUsage;
pub use ast::{DependencyDef, DyadicOp, Expr, MonadicOp};
pub use bridge::{compile, Binding, CompiledDependency, Resolution};
pub use interpreter::Interpreter;
