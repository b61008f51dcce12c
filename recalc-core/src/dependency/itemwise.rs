//! Itemwise Dependency Item
//!
//! An itemwise definition binds one index per recompute, so every index is an
//! independent cache line sharing one formula. Reading `v[3]` computes and
//! caches slot 3 only; slot 5 stays untouched until someone reads it.
//!
//! Slots are created lazily. A missing slot means `Uninitialized` for that
//! index. Invalidating the variable clears every slot at once; there is no
//! per-index invalidation.
//!
//! A slot being recomputed records its thread. Re-entering it on that thread
//! is a cycle; any other thread blocks until the slot settles.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::{Condvar, Mutex};

use super::frame::EvaluationStack;
use super::state::DependencyState;
use super::ItemwiseRecompute;
use crate::environment::Environment;
use crate::error::{Error, Result};
use crate::name::QualifiedName;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
struct Slot {
    state: DependencyState,
    cached: Option<Value>,
    owner: Option<ThreadId>,
}

/// An array-indexed tracked variable with per-index caching.
pub struct ItemwiseDependencyItem {
    name: QualifiedName,
    reads: IndexSet<QualifiedName>,
    recompute: ItemwiseRecompute,
    source: Option<Arc<str>>,

    slots: DashMap<i64, Slot>,

    /// Bumped on every invalidation. A recompute that started under an older
    /// epoch does not cache its result.
    epoch: AtomicU64,

    recompute_count: AtomicU64,

    /// Threads waiting on a slot another thread is recomputing park here.
    gate: Mutex<()>,
    ready: Condvar,
}

impl ItemwiseDependencyItem {
    /// Create an item with an empty slot map.
    pub fn new<I, F>(name: QualifiedName, reads: I, recompute: F) -> Self
    where
        I: IntoIterator<Item = QualifiedName>,
        F: Fn(&Environment, i64) -> Result<Value> + Send + Sync + 'static,
    {
        Self::from_parts(name, reads.into_iter().collect(), Arc::new(recompute))
    }

    pub(crate) fn from_parts(
        name: QualifiedName,
        reads: IndexSet<QualifiedName>,
        recompute: ItemwiseRecompute,
    ) -> Self {
        Self {
            name,
            reads,
            recompute,
            source: None,
            slots: DashMap::new(),
            epoch: AtomicU64::new(0),
            recompute_count: AtomicU64::new(0),
            gate: Mutex::new(()),
            ready: Condvar::new(),
        }
    }

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

    /// State of one index. Indices never read are `Uninitialized`.
    pub fn slot_state(&self, index: i64) -> DependencyState {
        self.slots
            .get(&index)
            .map(|slot| slot.state)
            .unwrap_or_default()
    }

    pub fn cached(&self, index: i64) -> Option<Value> {
        self.slots.get(&index).and_then(|slot| slot.cached.clone())
    }

    /// Indices that currently hold a valid value, ascending.
    pub fn cached_indices(&self) -> Vec<i64> {
        let mut indices: Vec<i64> = self
            .slots
            .iter()
            .filter(|entry| entry.state.is_valid())
            .map(|entry| *entry.key())
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn recompute_count(&self) -> u64 {
        self.recompute_count.load(Ordering::SeqCst)
    }

    pub(crate) fn evaluate(
        &self,
        stack: &EvaluationStack,
        env: &Environment,
        index: i64,
    ) -> Result<Value> {
        let me = thread::current().id();
        let epoch = loop {
            let mut slot = self.slots.entry(index).or_default();
            match (slot.state, slot.owner) {
                (DependencyState::Valid, _) => {
                    if let Some(value) = &slot.cached {
                        tracing::trace!(name = %self.name, index, "itemwise cache hit");
                        return Ok(value.clone());
                    }
                }
                (DependencyState::Evaluating, Some(owner)) if owner != me => {
                    drop(slot);
                    self.wait_for_slot(stack, index, owner)?;
                    continue;
                }
                (DependencyState::Evaluating, _) => {
                    drop(slot);
                    return Err(self.circular(stack, index));
                }
                (DependencyState::Uninitialized, _) => {}
            }
            slot.state = DependencyState::Evaluating;
            slot.owner = Some(me);
            break self.epoch.load(Ordering::SeqCst);
        };

        tracing::trace!(name = %self.name, index, "recomputing itemwise slot");
        self.recompute_count.fetch_add(1, Ordering::SeqCst);
        let result = {
            let _frame = stack.enter(&self.name, Some(index));
            (self.recompute)(env, index)
        };

        // The epoch is checked under the slot's lock; an invalidation racing
        // with this store either bumps the epoch first or clears the slot after.
        let mut slot = self.slots.entry(index).or_default();
        let cached = match &result {
            Ok(value) if self.epoch.load(Ordering::SeqCst) == epoch => {
                *slot = Slot {
                    state: DependencyState::Valid,
                    cached: Some(value.clone()),
                    owner: None,
                };
                true
            }
            _ => false,
        };
        drop(slot);
        if !cached {
            if result.is_ok() {
                tracing::debug!(name = %self.name, index, "itemwise slot invalidated while evaluating");
            }
            self.slots.remove(&index);
        }

        stack.release(&self.name, Some(index));
        let _gate = self.gate.lock();
        self.ready.notify_all();
        result
    }

    /// Block until `owner` is done with slot `index`.
    fn wait_for_slot(&self, stack: &EvaluationStack, index: i64, owner: ThreadId) -> Result<()> {
        let mut gate = self.gate.lock();

        // The owner may have finished between the caller's check and the gate.
        let running = self.slots.get(&index).is_some_and(|slot| {
            slot.state == DependencyState::Evaluating && slot.owner == Some(owner)
        });
        if !running {
            return Ok(());
        }

        let Some(_wait) = stack.begin_wait(owner, &self.name, Some(index)) else {
            drop(gate);
            return Err(self.circular(stack, index));
        };
        tracing::trace!(name = %self.name, index, "waiting for itemwise slot on another thread");
        self.ready.wait(&mut gate);
        Ok(())
    }

    fn circular(&self, stack: &EvaluationStack, index: i64) -> Error {
        let chain = stack.cycle_chain(&self.name, Some(index));
        tracing::warn!(name = %self.name, index, "circular itemwise dependency");
        Error::CircularDependency {
            name: self.name.clone(),
            chain,
        }
    }

    /// Clear every slot. Returns the number of cached values discarded.
    pub(crate) fn invalidate(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let before = self.slots.len();
        // In-flight slots keep their reentrancy guard.
        self.slots
            .retain(|_, slot| slot.state == DependencyState::Evaluating);
        before - self.slots.len()
    }
}

impl std::fmt::Debug for ItemwiseDependencyItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemwiseDependencyItem")
            .field("name", &self.name)
            .field("cached_indices", &self.cached_indices())
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

    fn doubling() -> ItemwiseDependencyItem {
        ItemwiseDependencyItem::new(
            QualifiedName::new(ContextPath::root(), "v"),
            [],
            |_, i| Value::Int(i).multiply(&Value::Int(2)),
        )
    }

    #[test]
    fn slots_are_independent() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = doubling();

        assert_eq!(item.evaluate(&stack, &env, 0).unwrap(), Value::Int(0));
        assert_eq!(item.slot_state(0), DependencyState::Valid);
        assert_eq!(item.slot_state(1), DependencyState::Uninitialized);
        assert_eq!(item.recompute_count(), 1);

        // Cached slot does not recompute.
        item.evaluate(&stack, &env, 0).unwrap();
        assert_eq!(item.recompute_count(), 1);

        assert_eq!(item.evaluate(&stack, &env, 1).unwrap(), Value::Int(2));
        assert_eq!(item.recompute_count(), 2);
        assert_eq!(item.cached_indices(), vec![0, 1]);
    }

    #[test]
    fn invalidate_clears_every_slot() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = doubling();

        item.evaluate(&stack, &env, 3).unwrap();
        item.evaluate(&stack, &env, 5).unwrap();

        assert_eq!(item.invalidate(), 2);
        assert_eq!(item.slot_state(3), DependencyState::Uninitialized);
        assert_eq!(item.slot_state(5), DependencyState::Uninitialized);
        assert!(item.cached_indices().is_empty());
    }

    #[test]
    fn failed_slot_is_removed() {
        let env = Environment::new();
        let stack = EvaluationStack::default();
        let item = ItemwiseDependencyItem::new(
            QualifiedName::new(ContextPath::root(), "w"),
            [],
            |_, i| Value::Int(1).divide(&Value::Int(i)),
        );

        assert!(matches!(item.evaluate(&stack, &env, 0), Err(Error::Domain("divide"))));
        assert_eq!(item.slot_state(0), DependencyState::Uninitialized);
        assert_eq!(item.evaluate(&stack, &env, 2).unwrap(), Value::Float(0.5));
    }

    #[test]
    fn threads_share_one_slot_recompute() {
        let env = Arc::new(Environment::new());
        let stack = Arc::new(EvaluationStack::default());
        let item = Arc::new(ItemwiseDependencyItem::new(
            QualifiedName::new(ContextPath::root(), "v"),
            [],
            |_, i| {
                thread::sleep(Duration::from_millis(100));
                Value::Int(i).multiply(&Value::Int(2))
            },
        ));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (env, stack, item) = (env.clone(), stack.clone(), item.clone());
                thread::spawn(move || item.evaluate(&stack, &env, 7))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().unwrap(), Value::Int(14));
        }
        assert_eq!(item.recompute_count(), 1);
        assert_eq!(item.cached_indices(), vec![7]);
    }

    #[test]
    fn invalidation_keeps_in_flight_slot_armed() {
        let env = Arc::new(Environment::new());
        let stack = Arc::new(EvaluationStack::default());
        let item = Arc::new(ItemwiseDependencyItem::new(
            QualifiedName::new(ContextPath::root(), "v"),
            [],
            |_, i| {
                thread::sleep(Duration::from_millis(200));
                Ok(Value::Int(i))
            },
        ));

        let running = {
            let (env, stack, item) = (env.clone(), stack.clone(), item.clone());
            thread::spawn(move || item.evaluate(&stack, &env, 1))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(item.slot_state(1), DependencyState::Evaluating);
        assert_eq!(item.invalidate(), 0);
        assert_eq!(item.slot_state(1), DependencyState::Evaluating);

        // The result still reaches the reader but is not cached.
        assert_eq!(running.join().unwrap().unwrap(), Value::Int(1));
        assert_eq!(item.slot_state(1), DependencyState::Uninitialized);
        assert!(item.cached(1).is_none());
    }
}
