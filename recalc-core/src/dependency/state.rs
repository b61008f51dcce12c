//! Lifecycle state of a dependency (or of one itemwise slot).

/// Where a dependency is in its evaluate/invalidate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DependencyState {
    /// No cached value. The next read runs the recompute procedure.
    #[default]
    Uninitialized,

    /// The recompute procedure is active on the current evaluation stack.
    /// Reading the dependency in this state is a cycle.
    Evaluating,

    /// The cached value is consistent with everything it reads.
    Valid,
}

impl DependencyState {
    pub fn is_valid(self) -> bool {
        self == DependencyState::Valid
    }
}
