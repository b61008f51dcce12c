//! Dependency Registry
//!
//! The registry is the one shared mutable structure of the dependency engine.
//! It owns every dependency item, indexed by qualified name, and the reverse
//! edges used to push invalidation from a changed variable to its readers.
//!
//! # How It Works
//!
//! 1. Registration stores a fresh `Uninitialized` item and records, for each
//!    name the definition reads, that this item is one of its readers.
//!
//! 2. A read goes through `evaluate`/`evaluate_item`, which recompute lazily
//!    and cache.
//!
//! 3. An assignment calls `notify_assigned`. The registry walks the reader
//!    index breadth-first from the assigned name and invalidates every item it
//!    reaches. Nothing recomputes here; recomputation waits for the next read.
//!
//! The reader index is keyed by name, not by item, so plain variables that
//! have no item of their own still fan out to the dependencies reading them.
//!
//! # Locking
//!
//! The name table and reader index sit behind `RwLock`s; each item guards its
//! own state. No lock is held while a recompute procedure runs.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use super::frame::EvaluationStack;
use super::item::DependencyItem;
use super::itemwise::ItemwiseDependencyItem;
use super::state::DependencyState;
use super::Dependency;
use crate::config::{RedefinitionPolicy, RegistryConfig};
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::name::QualifiedName;
use crate::value::Value;

/// Process-wide table of dependency definitions for one runtime session.
#[derive(Debug, Default)]
pub struct Registry {
    config: RegistryConfig,

    items: RwLock<IndexMap<QualifiedName, Arc<Dependency>>>,

    /// name -> dependencies whose definitions read `name`.
    readers: RwLock<IndexMap<QualifiedName, IndexSet<QualifiedName>>>,

    stack: EvaluationStack,
}

impl Registry {
    /// Create an empty registry with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a scalar dependency.
    pub fn register<I, F>(&self, name: QualifiedName, reads: I, recompute: F) -> Result<()>
    where
        I: IntoIterator<Item = QualifiedName>,
        F: Fn(&Environment) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(Dependency::Scalar(DependencyItem::new(name, reads, recompute)))
    }

    /// Register an itemwise dependency with an empty slot map.
    pub fn register_itemwise<I, F>(&self, name: QualifiedName, reads: I, recompute: F) -> Result<()>
    where
        I: IntoIterator<Item = QualifiedName>,
        F: Fn(&Environment, i64) -> Result<Value> + Send + Sync + 'static,
    {
        self.insert(Dependency::Itemwise(ItemwiseDependencyItem::new(
            name, reads, recompute,
        )))
    }

    /// Register a prepared item.
    ///
    /// Under [`RedefinitionPolicy::Reject`] an existing name is a
    /// `RedefinitionConflict`. Under `Replace` the old item is dropped, its
    /// read edges are swapped for the new ones, and everything reading the
    /// name is invalidated.
    pub fn insert(&self, dependency: Dependency) -> Result<()> {
        let name = dependency.name().clone();
        let dependency = Arc::new(dependency);

        let previous = {
            let mut items = self.items.write();
            if items.contains_key(&name) && self.config.redefinition == RedefinitionPolicy::Reject {
                return Err(Error::RedefinitionConflict(name));
            }
            items.insert(name.clone(), Arc::clone(&dependency))
        };

        {
            let mut readers = self.readers.write();
            if let Some(old) = &previous {
                for read in old.reads() {
                    if let Some(set) = readers.get_mut(read) {
                        set.shift_remove(&name);
                    }
                }
            }
            for read in dependency.reads() {
                readers.entry(read.clone()).or_default().insert(name.clone());
            }
        }

        if previous.is_some() {
            tracing::warn!(name = %name, "dependency definition replaced");
            self.notify_assigned(&name);
        } else {
            tracing::debug!(
                name = %name,
                itemwise = dependency.is_itemwise(),
                reads = dependency.reads().len(),
                "dependency registered"
            );
        }

        Ok(())
    }

    /// Look up a registered dependency.
    pub fn get_dependency(&self, name: &QualifiedName) -> Result<Arc<Dependency>> {
        self.lookup(name)
            .ok_or_else(|| Error::UnknownDependency(name.clone()))
    }

    pub(crate) fn lookup(&self, name: &QualifiedName) -> Option<Arc<Dependency>> {
        self.items.read().get(name).cloned()
    }

    /// Read a scalar dependency, recomputing it if stale.
    pub fn evaluate(&self, name: &QualifiedName, env: &Environment) -> Result<Value> {
        match &*self.get_dependency(name)? {
            Dependency::Scalar(item) => item.evaluate(&self.stack, env),
            Dependency::Itemwise(_) => Err(Error::IndexRequired(name.clone())),
        }
    }

    /// Read one index of a dependency.
    ///
    /// Itemwise dependencies evaluate just that slot. Scalar dependencies are
    /// evaluated whole and indexed.
    pub fn evaluate_item(&self, name: &QualifiedName, index: i64, env: &Environment) -> Result<Value> {
        match &*self.get_dependency(name)? {
            Dependency::Itemwise(item) => item.evaluate(&self.stack, env, index),
            Dependency::Scalar(item) => item.evaluate(&self.stack, env)?.select(index),
        }
    }

    /// Invalidate a registered dependency and everything that reads it.
    pub fn invalidate(&self, name: &QualifiedName) -> Result<Vec<QualifiedName>> {
        self.get_dependency(name)?;
        Ok(self.notify_assigned(name))
    }

    /// Called by the assignment path whenever a tracked name is written.
    ///
    /// Invalidates the name's own item (if any) and cascades along the reader
    /// index. Each name is visited at most once per cascade, so cycles in the
    /// read graph terminate. Returns the invalidated dependencies in visit
    /// order.
    pub fn notify_assigned(&self, name: &QualifiedName) -> Vec<QualifiedName> {
        let mut invalidated = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([name.clone()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }

            if let Some(dependency) = self.lookup(&current) {
                dependency.invalidate();
                invalidated.push(current.clone());
            }

            if let Some(readers) = self.readers.read().get(&current) {
                queue.extend(readers.iter().cloned());
            }
        }

        tracing::debug!(origin = %name, invalidated = invalidated.len(), "invalidation cascade");
        invalidated
    }

    /// State of a scalar dependency. `None` for unknown or itemwise names.
    pub fn state(&self, name: &QualifiedName) -> Option<DependencyState> {
        match &*self.lookup(name)? {
            Dependency::Scalar(item) => Some(item.state()),
            Dependency::Itemwise(_) => None,
        }
    }

    /// State of one slot of an itemwise dependency.
    pub fn slot_state(&self, name: &QualifiedName, index: i64) -> Option<DependencyState> {
        match &*self.lookup(name)? {
            Dependency::Itemwise(item) => Some(item.slot_state(index)),
            Dependency::Scalar(_) => None,
        }
    }

    /// Dependencies whose definitions read `name`.
    pub fn dependents(&self, name: &QualifiedName) -> Vec<QualifiedName> {
        self.readers
            .read()
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Source text the dependency was defined with.
    pub fn definition_text(&self, name: &QualifiedName) -> Option<Arc<str>> {
        self.lookup(name)?.source().cloned()
    }

    pub fn recompute_count(&self, name: &QualifiedName) -> Option<u64> {
        self.lookup(name).map(|dependency| dependency.recompute_count())
    }

    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.items.read().contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<QualifiedName> {
        self.items.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
