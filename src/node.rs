//! A graph node is an async function from state to a (possibly failed) new state.

use crate::state::MergeableState;
use std::future::Future;
use std::pin::Pin;

pub type NodeResult<S> = crate::Result<S>;
pub type NodeFuture<S> = Pin<Box<dyn Future<Output = NodeResult<S>> + Send>>;

/// A boxed node function, matching the `|mut state| Box::pin(async move { ... })`
/// shape every node in this crate is written in.
pub type NodeFn<S> = Box<dyn Fn(S) -> NodeFuture<S> + Send + Sync>;

pub(crate) fn boxed<S, F, Fut>(f: F) -> NodeFn<S>
where
    S: MergeableState,
    F: Fn(S) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = NodeResult<S>> + Send + 'static,
{
    Box::new(move |s| Box::pin(f(s)))
}
