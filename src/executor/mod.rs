//! Executor: orchestration of virtual users over time
//!
//! The `Executor` trait is the runtime that executes a `Scenario`. Different
//! executors provide different scheduling strategies: a fixed number of users,
//! a load shape, or distribution across nodes.
//!
//! Karga provides a built-in [`ShapeExecutor`] which grows and shrinks the set
//! of active virtual users following a [`crate::shape::LoadShape`].
pub mod shape;
pub use shape::ShapeExecutor;

use crate::{aggregate::Aggregate, metric::Sample, scenario::Scenario, transport::Transport};
use std::future::Future;

/// The runtime hook that executes a `Scenario`.
///
/// `Executor` defines how many virtual users run, when they start and when they
/// are told to stop. Each user records into its own aggregate; the executor merges
/// them into the one it returns.
pub trait Executor<T, A>
where
    Self: Send + Sync + Sized,
    T: Transport,
    A: Aggregate<Metric = Sample>,
{
    type Error;
    /// Execute the scenario and return the final aggregate.
    ///
    /// This function is responsible for implementing the scheduling strategy,
    /// such as spawning users, retiring them, and collecting their results.
    fn exec(&self, scenario: &Scenario<T>) -> impl Future<Output = Result<A, Self::Error>> + Send;
}
