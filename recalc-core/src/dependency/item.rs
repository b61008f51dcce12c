//! Dependency Item
//!
//! One node per scalar dependency definition. The item owns its recompute
//! procedure and its cache; nothing outside the registry gets mutable access
//! to either.
//!
//! # Evaluation
//!
//! 1. `Valid`: return the cached value. No recompute, no side effects.
//!
//! 2. `Evaluating` on this thread: the recompute procedure re-entered this
//!    item before finishing. That is a cycle, reported as
//!    `CircularDependency`. `Evaluating` on another thread: block until that
//!    thread finishes, then look again.
//!
//! 3. `Uninitialized`: mark `Evaluating`, run the recompute procedure with no
//!    lock held, then cache the result and mark `Valid`. A failed recompute
//!    drops back to `Uninitialized` so the next read retries from scratch.
//!
//! # Invalidation during evaluation
//!
//! Invalidating an item whose recompute is still running keeps it
//! `Evaluating` and bumps its generation. When the recompute finishes under a
//! stale generation its result is returned but not cached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex};

use super::frame::EvaluationStack;
use super::state::DependencyState;
use super::Recompute;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::name::QualifiedName;
use crate::value::Value;

#[derive(Debug, Default)]
struct Cell {
    state: DependencyState,
    cached: Option<Value>,
    generation: u64,
    /// Thread running the recompute while `Evaluating`.
    owner: Option<ThreadId>,
}

/// A scalar tracked variable: one formula, one cache line.
pub struct DependencyItem {
    name: QualifiedName,

    /// Names the recompute procedure reads, as found by static analysis.
    reads: IndexSet<QualifiedName>,

    recompute: Recompute,

    /// Source text of the definition, kept for diagnostics.
    source: Option<Arc<str>>,

    cell: Mutex<Cell>,

    /// Signalled whenever a recompute finishes.
    ready: Condvar,

    /// Number of times the recompute procedure has been invoked.
    recompute_count: AtomicU64,
}

impl DependencyItem {
    /// Create an uninitialized item.
    pub fn new<I, F>(name: QualifiedName, reads: I, recompute: F) -> Self
    where
        I: IntoIterator<Item = QualifiedName>,
        F: Fn(&Environment) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_parts(name, reads.into_iter().collect(), Arc::new(recompute))
    }

    pub(crate) fn from_parts(
        name: QualifiedName,
        reads: IndexSet<QualifiedName>,
        recompute: Recompute,
    ) -> Self {
        Self {
            name,
            reads,
            recompute,
            source: None,
            cell: Mutex::new(Cell::default()),
            ready: Condvar::new(),
            recompute_count: AtomicU64::new(0),
        }
    }

    /// Attach the definition's source text.
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn name(&self) -> &QualifiedName {
        &self.name
    }

    pub fn reads(&self) -> &IndexSet<QualifiedName> {
        &self.reads
    }

    pub fn source(&self) -> Option<&Arc<str>> {
        self.source.as_ref()
    }

    pub fn state(&self) -> DependencyState {
        self.cell.lock().state
    }

    /// A copy of the cached value, if the item is valid.
    pub fn cached(&self) -> Option<Value> {
        self.cell.lock().cached.clone()
    }

    pub fn recompute_count(&self) -> u64 {
        self.recompute_count.load(Ordering::SeqCst)
    }

    pub(crate) fn evaluate(&self, stack: &EvaluationStack, env: &Environment) -> Result<Value> {
        let me = thread::current().id();
        let generation = {
            let mut cell = self.cell.lock();
            loop {
                match (cell.state, cell.owner) {
                    (DependencyState::Valid, _) => {
                        if let Some(value) = &cell.cached {
                            tracing::trace!(name = %self.name, "dependency cache hit");
                            return Ok(value.clone());
                        }
                        break;
                    }
                    (DependencyState::Evaluating, Some(owner)) if owner != me => {
                        let Some(_wait) = stack.begin_wait(owner, &self.name, None) else {
                            drop(cell);
                            return Err(self.circular(stack));
                        };
                        tracing::trace!(name = %self.name, "waiting for dependency on another thread");
                        self.ready.wait(&mut cell);
                    }
                    (DependencyState::Evaluating, _) => {
                        drop(cell);
                        return Err(self.circular(stack));
                    }
                    (DependencyState::Uninitialized, _) => break,
                }
            }
            cell.state = DependencyState::Evaluating;
            cell.owner = Some(me);
            cell.generation
        };

        tracing::trace!(name = %self.name, "recomputing dependency");
        self.recompute_count.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _frame = stack.enter(&self.name, None);
            (self.recompute)(env)
        };

        let mut cell = self.cell.lock();
        cell.owner = None;
        let result = match result {
            Ok(value) => {
                if cell.generation == generation {
                    cell.cached = Some(value.clone());
                    cell.state = DependencyState::Valid;
                } else {
                    tracing::debug!(name = %self.name, "dependency invalidated while evaluating");
                    cell.cached = None;
                    cell.state = DependencyState::Uninitialized;
                }
                Ok(value)
            }
            Err(err) => {
                cell.cached = None;
                cell.state = DependencyState::Uninitialized;
                Err(err)
            }
        };
        drop(cell);

        stack.release(&self.name, None);
        self.ready.notify_all();
        result
    }

    fn circular(&self, stack: &EvaluationStack) -> Error {
        let chain = stack.cycle_chain(&self.name, None);
        tracing::warn!(name = %self.name, depth = chain.len(), "circular dependency");
        Error::CircularDependency {
            name: self.name.clone(),
            chain,
        }
    }

    /// Drop the cached value.
    ///
    /// Returns true if a valid value was discarded.
    pub(crate) fn invalidate(&self) -> bool {
        let mut cell = self.cell.lock();
        cell.generation = cell.generation.wrapping_add(1);
        cell.cached = None;
        let state = cell.state;
        match state {
            DependencyState::Valid => {
                cell.state = DependencyState::Uninitialized;
                true
            }
            // An in-flight recompute keeps its guard armed.
            DependencyState::Evaluating | DependencyState::Uninitialized => false,
        }
    }
}

impl std::fmt::Debug for DependencyItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyItem")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("reads", &self.reads)
            .field("recompute_count", &self.recompute_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::name::ContextPath;

    fn name(local: &str) -> QualifiedName {
        QualifiedName::new(ContextPath::root(), local)
    }

    #[test]
    fn item_starts_uninitialized() {
        let item = DependencyItem::new(name("x"), [name("y")], |_| Ok(Value::Int(1)));

        assert_eq!(item.state(), DependencyState::Uninitialized);
        assert!(item.cached().is_none());
        assert_eq!(item.recompute_count(), 0);
        assert!(item.reads().contains(&name("y")));
    }

    #[test]
    fn item_caches_after_first_evaluation() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = DependencyItem::new(name("x"), [], |_| Ok(Value::Int(42)));

        assert_eq!(item.evaluate(&stack, &env).unwrap(), Value::Int(42));
        assert_eq!(item.state(), DependencyState::Valid);
        assert_eq!(item.cached(), Some(Value::Int(42)));

        assert_eq!(item.evaluate(&stack, &env).unwrap(), Value::Int(42));
        assert_eq!(item.recompute_count(), 1);
    }

    #[test]
    fn invalidate_clears_cache() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = DependencyItem::new(name("x"), [], |_| Ok(Value::Int(7)));

        item.evaluate(&stack, &env).unwrap();
        assert!(item.invalidate());
        assert_eq!(item.state(), DependencyState::Uninitialized);
        assert!(item.cached().is_none());

        // Invalidating again discards nothing.
        assert!(!item.invalidate());

        item.evaluate(&stack, &env).unwrap();
        assert_eq!(item.recompute_count(), 2);
    }

    #[test]
    fn failed_recompute_leaves_item_uninitialized() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = DependencyItem::new(name("x"), [], |_| Err(Error::Domain("divide")));

        assert!(matches!(item.evaluate(&stack, &env), Err(Error::Domain("divide"))));
        assert_eq!(item.state(), DependencyState::Uninitialized);
        assert!(item.cached().is_none());
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn source_text_is_kept() {
        let item = DependencyItem::new(name("x"), [], |_| Ok(Value::Int(0))).with_source("x: y+1");
        assert_eq!(item.source().map(|s| &**s), Some("x: y+1"));
    }

    #[test]
    fn second_thread_waits_for_running_recompute() {
        let env = Arc::new(Environment::new());
        let stack = Arc::new(EvaluationStack::default());
        let count = Arc::new(AtomicU64::new(0));

        let counter = count.clone();
        let item = Arc::new(DependencyItem::new(name("x"), [], move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(200));
            Ok(Value::Int(1))
        }));

        let handles: Vec<_> = (0..2)
            .map(|i| {
                let (env, stack, item) = (env.clone(), stack.clone(), item.clone());
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50 * i));
                    item.evaluate(&stack, &env)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), Value::Int(1));
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(item.state(), DependencyState::Valid);
    }

    #[test]
    fn distinct_items_on_two_threads_keep_frames_apart() {
        let env = Arc::new(Environment::new());
        let stack = Arc::new(EvaluationStack::default());

        let slow = |local: &str, millis: u64, result: i64| {
            Arc::new(DependencyItem::new(name(local), [], move |_| {
                thread::sleep(Duration::from_millis(millis));
                Ok(Value::Int(result))
            }))
        };
        let a = slow("a", 50, 1);
        let b = slow("b", 300, 2);

        let first = {
            let (env, stack) = (env.clone(), stack.clone());
            thread::spawn(move || a.evaluate(&stack, &env))
        };
        let second = {
            let (env, stack) = (env.clone(), stack.clone());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                b.evaluate(&stack, &env)
            })
        };

        assert_eq!(first.join().unwrap().unwrap(), Value::Int(1));
        assert_eq!(second.join().unwrap().unwrap(), Value::Int(2));
        assert_eq!(stack.depth(), 0);
    }
}
