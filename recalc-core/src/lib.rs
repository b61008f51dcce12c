//! Recalc Core
//!
//! This crate provides the dependency-recomputation engine of an
//! array-language runtime. A variable can be declared as a function of other
//! variables; reading it always yields a value consistent with everything it
//! transitively reads, and nothing is recomputed more often than necessary.
//!
//! It implements:
//!
//! - Lazy, memoized dependency items with reentrancy-based cycle detection
//! - Itemwise dependencies cached per array index
//! - A registry that cascades invalidation from assigned variables to readers
//! - A compiler bridge from definition ASTs to recompute procedures
//!
//! # Architecture
//!
//! - `name`: qualified variable names and naming contexts
//! - `dependency`: items, the registry, and the evaluation stack
//! - `compiler`: definition AST, usage analysis, bridge, and interpreter
//! - `environment`: the execution context threaded through every evaluation
//!
//! # Example
//!
//! ```rust
//! use recalc_core::{DependencyDef, Environment, Expr, Value};
//!
//! let env = Environment::new();
//! env.assign("y", Value::Int(10));
//!
//! // x: y + 1
//! env.define(&DependencyDef::new("x", Expr::add(Expr::var("y"), Expr::int(1))))
//!     .unwrap();
//! assert_eq!(env.read("x").unwrap(), Value::Int(11));
//!
//! // Assigning y invalidates x; the next read recomputes.
//! env.assign("y", Value::Int(20));
//! assert_eq!(env.read("x").unwrap(), Value::Int(21));
//! ```

pub mod compiler;
pub mod config;
pub mod dependency;
pub mod environment;
pub mod error;
pub mod name;
pub mod value;

pub use compiler::{DependencyDef, Expr};
pub use config::{RedefinitionPolicy, RegistryConfig};
pub use dependency::{DependencyState, Registry};
pub use environment::Environment;
pub use error::{Error, Result};
pub use name::{qualify, ContextPath, QualifiedName};
pub use value::Value;
