//! Dependency Definitions
//!
//! A dependency definition declares a variable as a function of other
//! variables. Reading the variable always yields a value consistent with
//! everything it transitively reads, and nothing is recomputed more often than
//! necessary.
//!
//! # Concepts
//!
//! ## Items
//!
//! Every definition becomes a [`DependencyItem`] (or an
//! [`ItemwiseDependencyItem`] for definitions parameterized by an index). An
//! item holds the recompute procedure, the cached value, and a lifecycle
//! [`DependencyState`].
//!
//! ## Lazy evaluation
//!
//! Items recompute on read, never on write. A valid item returns its cache.
//!
//! ## Invalidation
//!
//! Writing a variable invalidates every dependency that reads it, directly or
//! transitively. See [`Registry::notify_assigned`].
//!
//! ## Cycles
//!
//! Evaluation is purely recursive on the caller's stack. An item that is read
//! while its own recompute is still running is part of a cycle, and the read
//! fails with `CircularDependency` instead of recursing forever.

mod frame;
mod item;
mod itemwise;
mod registry;
mod state;

use std::sync::Arc;

use indexmap::IndexSet;

pub use item::DependencyItem;
pub use itemwise::ItemwiseDependencyItem;
pub use registry::Registry;
pub use state::DependencyState;

use crate::environment::Environment;
use crate::error::Result;
use crate::name::QualifiedName;
use crate::value::Value;

/// Recompute procedure of a scalar dependency.
pub type Recompute = Arc<dyn Fn(&Environment) -> Result<Value> + Send + Sync>;

/// Recompute procedure of an itemwise dependency, called with the slot index.
pub type ItemwiseRecompute = Arc<dyn Fn(&Environment, i64) -> Result<Value> + Send + Sync>;

/// A registered dependency of either shape.
#[derive(Debug)]
pub enum Dependency {
    Scalar(DependencyItem),
    Itemwise(ItemwiseDependencyItem),
}

impl Dependency {
    pub fn name(&self) -> &QualifiedName {
        match self {
            Dependency::Scalar(item) => item.name(),
            Dependency::Itemwise(item) => item.name(),
        }
    }

    /// Names the definition reads.
    pub fn reads(&self) -> &IndexSet<QualifiedName> {
        match self {
            Dependency::Scalar(item) => item.reads(),
            Dependency::Itemwise(item) => item.reads(),
        }
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        match self {
            Dependency::Scalar(item) => item.source(),
            Dependency::Itemwise(item) => item.source(),
        }
    }

    pub fn is_itemwise(&self) -> bool {
        matches!(self, Dependency::Itemwise(_))
    }

    pub fn recompute_count(&self) -> u64 {
        match self {
            Dependency::Scalar(item) => item.recompute_count(),
            Dependency::Itemwise(item) => item.recompute_count(),
        }
    }

    fn invalidate(&self) {
        match self {
            Dependency::Scalar(item) => {
                item.invalidate();
            }
            Dependency::Itemwise(item) => {
                item.invalidate();
            }
        }
    }
}

impl From<DependencyItem> for Dependency {
    fn from(item: DependencyItem) -> Self {
        Dependency::Scalar(item)
    }
}

impl From<ItemwiseDependencyItem> for Dependency {
    fn from(item: ItemwiseDependencyItem) -> Self {
        Dependency::Itemwise(item)
    }
}
