//! Evaluation Frames
//!
//! Each thread keeps a stack of the dependencies whose recompute procedures it
//! is currently running. A frame is pushed when a recompute starts and popped
//! when its guard drops, so the stack stays balanced even when a recompute
//! fails or panics.
//!
//! Cycle detection itself is driven by each item's `Evaluating` state and the
//! thread that set it; the stack only supplies the chain reported in a
//! `CircularDependency` error.
//!
//! # Waiting on other threads
//!
//! A thread that reads an item another thread is recomputing blocks until the
//! owner finishes. The stack keeps a wait-for table (`waiter -> owner, item`)
//! so a read that would close a loop of blocked threads fails as a cycle
//! instead of deadlocking.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::name::QualifiedName;

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// One running recompute: the dependency and, for itemwise ones, the slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    /// Registry the frame belongs to.
    stack: u64,
    pub name: QualifiedName,
    pub index: Option<i64>,
}

/// The evaluation stack of one registry.
///
/// Frames live in thread-local storage, tagged with the registry's id, so
/// nested evaluations on one thread never see frames from another thread.
#[derive(Debug)]
pub(crate) struct EvaluationStack {
    id: u64,
    waits: Mutex<HashMap<ThreadId, (ThreadId, Frame)>>,
}

impl Default for EvaluationStack {
    fn default() -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            waits: Mutex::new(HashMap::new()),
        }
    }
}

impl EvaluationStack {
    fn frame(&self, name: &QualifiedName, index: Option<i64>) -> Frame {
        Frame {
            stack: self.id,
            name: name.clone(),
            index,
        }
    }

    /// Push a frame for the current thread. It is popped when the returned
    /// guard is dropped.
    pub fn enter(&self, name: &QualifiedName, index: Option<i64>) -> FrameGuard {
        let frame = self.frame(name, index);
        FRAMES.with(|frames| frames.borrow_mut().push(frame.clone()));
        FrameGuard { frame }
    }

    /// The chain of names from the current thread's innermost frame matching
    /// `name`/`index` up to the top of its stack, closed with `name` again.
    pub fn cycle_chain(&self, name: &QualifiedName, index: Option<i64>) -> Vec<QualifiedName> {
        FRAMES.with(|frames| {
            let frames = frames.borrow();
            let own: Vec<&Frame> = frames.iter().filter(|f| f.stack == self.id).collect();
            let start = own
                .iter()
                .rposition(|f| &f.name == name && f.index == index)
                .unwrap_or(own.len());

            own[start..]
                .iter()
                .map(|f| f.name.clone())
                .chain(std::iter::once(name.clone()))
                .collect()
        })
    }

    /// Record that the current thread is about to block on `owner`, which is
    /// recomputing `name`/`index`.
    ///
    /// Returns `None` when `owner` is already waiting, directly or through
    /// other threads, on the current thread. Blocking then would never end.
    pub fn begin_wait(
        &self,
        owner: ThreadId,
        name: &QualifiedName,
        index: Option<i64>,
    ) -> Option<WaitGuard<'_>> {
        let me = thread::current().id();
        let mut waits = self.waits.lock();

        let mut current = owner;
        loop {
            if current == me {
                return None;
            }
            match waits.get(&current) {
                Some((next, _)) => current = *next,
                None => break,
            }
        }

        waits.insert(me, (owner, self.frame(name, index)));
        Some(WaitGuard { stack: self, waiter: me })
    }

    /// Called by the owner once `name`/`index` is no longer being recomputed.
    /// Drops every wait edge pointing at it.
    pub fn release(&self, name: &QualifiedName, index: Option<i64>) {
        let me = thread::current().id();
        let frame = self.frame(name, index);
        self.waits
            .lock()
            .retain(|_, (owner, waited)| !(*owner == me && *waited == frame));
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        FRAMES.with(|frames| frames.borrow().iter().filter(|f| f.stack == self.id).count())
    }
}

/// Pops its frame from the current thread's stack when dropped.
pub(crate) struct FrameGuard {
    frame: Frame,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let popped = FRAMES.with(|frames| frames.borrow_mut().pop());

        if let Some(frame) = popped {
            debug_assert_eq!(
                frame, self.frame,
                "evaluation frame mismatch: expected {:?}, got {:?}",
                self.frame, frame
            );
        }
    }
}

/// Removes the current thread's wait edge when dropped.
pub(crate) struct WaitGuard<'a> {
    stack: &'a EvaluationStack,
    waiter: ThreadId,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.stack.waits.lock().remove(&self.waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::name::ContextPath;

    fn name(local: &str) -> QualifiedName {
        QualifiedName::new(ContextPath::root(), local)
    }

    #[test]
    fn guard_pops_frame() {
        let stack = EvaluationStack::default();
        assert_eq!(stack.depth(), 0);

        {
            let _outer = stack.enter(&name("a"), None);
            {
                let _inner = stack.enter(&name("b"), None);
                assert_eq!(stack.depth(), 2);
            }
            assert_eq!(stack.depth(), 1);
        }

        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn cycle_chain_starts_at_reentered_frame() {
        let stack = EvaluationStack::default();
        let _a = stack.enter(&name("a"), None);
        let _b = stack.enter(&name("b"), None);
        let _c = stack.enter(&name("c"), None);

        assert_eq!(stack.cycle_chain(&name("b"), None), vec![name("b"), name("c"), name("b")]);
    }

    #[test]
    fn cycle_chain_distinguishes_slots() {
        let stack = EvaluationStack::default();
        let _v0 = stack.enter(&name("v"), Some(0));
        let _w = stack.enter(&name("w"), None);
        let _v1 = stack.enter(&name("v"), Some(1));

        assert_eq!(
            stack.cycle_chain(&name("v"), Some(0)),
            vec![name("v"), name("w"), name("v"), name("v")]
        );
    }

    #[test]
    fn stacks_of_different_registries_are_separate() {
        let first = EvaluationStack::default();
        let second = EvaluationStack::default();

        let _a = first.enter(&name("a"), None);
        let _b = second.enter(&name("b"), None);

        assert_eq!(first.depth(), 1);
        assert_eq!(second.depth(), 1);
        assert_eq!(first.cycle_chain(&name("a"), None), vec![name("a"), name("a")]);
    }

    #[test]
    fn frames_are_per_thread() {
        let stack = Arc::new(EvaluationStack::default());
        let _a = stack.enter(&name("a"), None);

        let remote = stack.clone();
        let depth = thread::spawn(move || {
            let _b = remote.enter(&name("b"), None);
            remote.depth()
        })
        .join()
        .unwrap();

        assert_eq!(depth, 1);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn waiting_on_a_waiter_is_refused() {
        let stack = Arc::new(EvaluationStack::default());
        let me = thread::current().id();

        // Another thread blocks on this one.
        let remote = stack.clone();
        let other = thread::spawn(move || {
            let guard = remote.begin_wait(me, &name("a"), None);
            assert!(guard.is_some());
            std::mem::forget(guard);
            thread::current().id()
        })
        .join()
        .unwrap();

        // Blocking on it in turn would close the loop.
        assert!(stack.begin_wait(other, &name("b"), None).is_none());

        // Once this thread is done with `a`, the edge is gone.
        stack.release(&name("a"), None);
        assert!(stack.begin_wait(other, &name("b"), None).is_some());
    }
}
