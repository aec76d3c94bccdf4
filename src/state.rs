//! The state a graph threads through its nodes must know how to merge itself
//! with a sibling produced by a concurrent branch.

/// Implemented by any state type run through [`crate::graph::StateGraph`].
/// `merge` is called to fold a parallel branch's (or a dynamic fan-out
/// branch's) resulting state back into the primary state after all branches
/// complete — it must be associative and should treat "empty" fields on
/// `other` as nothing to contribute, matching the accumulator semantics used
/// throughout the orchestrator (`programs` appends, scalars take the more
/// "complete" of the two values).
pub trait MergeableState: Clone + Send + 'static {
    fn merge(&mut self, other: &Self);
}
