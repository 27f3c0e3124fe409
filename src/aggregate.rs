use crate::Metric;
use std::fmt::Debug;

/// The `Aggregate` trait defines how raw [`Metric`] values are collected and combined
/// into an intermediate, mergeable representation.
///
/// Every virtual user owns a private aggregate while it runs, so recording a step
/// never contends with other users. The host merges these session-local aggregates
/// when it joins the session tasks.
///
/// **Important:** aggregates should not compute final statistics such as averages or
/// ratios. Those belong in a [`crate::Report`], which is converted from an `Aggregate`.
///
/// # Example
/// ```rust
/// use karga_script::{Aggregate, metric::Sample};
///
/// #[derive(Debug, Clone, Default)]
/// struct Requests(u64);
///
/// impl Aggregate for Requests {
///     type Metric = Sample;
///
///     fn new() -> Self {
///         Self::default()
///     }
///
///     fn consume(&mut self, metric: &Self::Metric) {
///         if let Sample::Step(_) = metric {
///             self.0 += 1;
///         }
///     }
///
///     fn merge(&mut self, other: Self) {
///         self.0 += other.0;
///     }
/// }
/// ```
///
/// # Implementor notes
/// - `merge` must be **associative** and **commutative**: sessions finish, and are
///   merged, in arbitrary order.
pub trait Aggregate
where
    Self: Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate summarizes.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics into the current instance.
    ///
    /// This default implementation calls [`Aggregate::consume`] for each metric.
    fn aggregate(&mut self, metrics: &[Self::Metric]) {
        metrics.iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: &Self::Metric);

    /// Combine two different aggregates into one.
    fn merge(&mut self, other: Self);
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::{collections::BTreeMap, time::Duration};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::{metric::Sample, session::SessionState};

    /// Raw counters for one transaction.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransactionStats {
        pub count: usize,
        pub failures: usize,
        pub total_latency: Duration,
        pub total_bytes: usize,
        /// How often each distinct failure reason was recorded.
        pub reasons: BTreeMap<String, usize>,
    }

    impl TransactionStats {
        fn merge(&mut self, other: Self) {
            self.count += other.count;
            self.failures += other.failures;
            self.total_latency += other.total_latency;
            self.total_bytes += other.total_bytes;
            for (reason, n) in other.reasons {
                *self.reasons.entry(reason).or_default() += n;
            }
        }
    }

    /// The default built-in implementation of [`Aggregate`].
    ///
    /// Tracks per-transaction pass/fail counts with their failure reasons, and how
    /// sessions ended. Enabled via the `builtins` feature.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ScriptAggregate {
        pub transactions: BTreeMap<String, TransactionStats>,
        pub completed: usize,
        pub exhausted: usize,
        pub terminated: usize,
        pub iterations: u64,
    }

    impl Aggregate for ScriptAggregate {
        type Metric = Sample;

        fn new() -> Self {
            ScriptAggregate::default()
        }

        fn consume(&mut self, metric: &Self::Metric) {
            match metric {
                Sample::Step(step) => {
                    let stats = self
                        .transactions
                        .entry(step.transaction.clone())
                        .or_default();
                    stats.count += 1;
                    stats.total_latency += step.latency;
                    stats.total_bytes += step.bytes;
                    if !step.success() {
                        stats.failures += 1;
                    }
                    // A step that failed two checks shows both reasons.
                    for reason in &step.failures {
                        *stats.reasons.entry(reason.clone()).or_default() += 1;
                    }
                }
                Sample::SessionEnd {
                    state, iterations, ..
                } => {
                    self.iterations += iterations;
                    match state {
                        SessionState::Completed => self.completed += 1,
                        SessionState::Exhausted => self.exhausted += 1,
                        SessionState::Terminated => self.terminated += 1,
                        SessionState::Idle | SessionState::Running => {}
                    }
                }
            }
        }

        fn merge(&mut self, other: Self) {
            for (name, stats) in other.transactions {
                self.transactions.entry(name).or_default().merge(stats);
            }
            self.completed += other.completed;
            self.exhausted += other.exhausted;
            self.terminated += other.terminated;
            self.iterations += other.iterations;
        }
    }

}
