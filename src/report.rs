use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::future::Future;

use crate::Aggregate;

/// A [`Report`] represents the processed form of an [`Aggregate`].
///
/// Reports derive the final numbers (ratios, averages) from the raw counters an
/// aggregate keeps. They are pure data: no I/O happens here.
///
/// Implementors define how to construct the report from an [`Aggregate`] through a
/// [`From<A>`] implementation. Once created, a report can be serialized or handed to a
/// [`Reporter`].
pub trait Report<A>
where
    Self: Send + Sync + Debug + From<A> + Serialize + DeserializeOwned,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and performs side effects: displaying it,
/// sending it to a service, or persisting it somewhere.
///
/// # Example
/// ```rust
/// use karga_script::{Aggregate, Report, Reporter};
/// struct MyReporter;
/// impl<A: Aggregate, R: Report<A>> Reporter<A, R> for MyReporter {
///     async fn report(&self, report: &R) -> Result<(), Box<dyn std::error::Error>> {
///         println!("{:?}", report);
///         Ok(())
///     }
/// }
/// ```
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), Box<dyn std::error::Error>>>;
}

#[cfg(feature = "builtins")]
pub use builtins::*;

#[cfg(feature = "builtins")]
mod builtins {
    use std::{collections::BTreeMap, time::Duration};

    use serde::Deserialize;

    use super::*;
    use crate::aggregate::{ScriptAggregate, TransactionStats};

    /// Per-transaction summary.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct TransactionReport {
        pub requests: usize,
        pub failures: usize,
        /// Failed requests in percent.
        pub failure_ratio: f64,
        pub average_latency: Duration,
        pub total_bytes: usize,
        pub reasons: BTreeMap<String, usize>,
    }

    impl From<TransactionStats> for TransactionReport {
        fn from(stats: TransactionStats) -> Self {
            let (failure_ratio, average_latency) = if stats.count == 0 {
                (0.0, Duration::ZERO)
            } else {
                (
                    stats.failures as f64 / stats.count as f64 * 100.0,
                    stats.total_latency.div_f64(stats.count as f64),
                )
            };
            Self {
                requests: stats.count,
                failures: stats.failures,
                failure_ratio,
                average_latency,
                total_bytes: stats.total_bytes,
                reasons: stats.reasons,
            }
        }
    }

    /// Pass/fail counts per transaction plus how the sessions ended.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct ScriptReport {
        pub transactions: BTreeMap<String, TransactionReport>,
        pub sessions_completed: usize,
        /// Sessions that ran out of `unique` values.
        pub sessions_exhausted: usize,
        pub sessions_terminated: usize,
        pub iterations: u64,
    }

    impl From<ScriptAggregate> for ScriptReport {
        fn from(value: ScriptAggregate) -> Self {
            Self {
                transactions: value
                    .transactions
                    .into_iter()
                    .map(|(name, stats)| (name, stats.into()))
                    .collect(),
                sessions_completed: value.completed,
                sessions_exhausted: value.exhausted,
                sessions_terminated: value.terminated,
                iterations: value.iterations,
            }
        }
    }

    impl Report<ScriptAggregate> for ScriptReport {}

    /// Prints the report as pretty JSON.
    pub struct StdoutReporter;

    impl Reporter<ScriptAggregate, ScriptReport> for StdoutReporter {
        async fn report(&self, report: &ScriptReport) -> Result<(), Box<dyn std::error::Error>> {
            println!("{}", serde_json::to_string_pretty(report)?);
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn derives_ratios_and_averages() {
            let mut agg = ScriptAggregate::default();
            agg.transactions.insert(
                "Home".into(),
                TransactionStats {
                    count: 4,
                    failures: 1,
                    total_latency: Duration::from_millis(400),
                    total_bytes: 10,
                    reasons: BTreeMap::from([("Expected status 200, got 500".into(), 1)]),
                },
            );
            agg.exhausted = 2;

            let report = ScriptReport::from(agg);
            let home = &report.transactions["Home"];
            assert_eq!(home.failure_ratio, 25.0);
            assert_eq!(home.average_latency, Duration::from_millis(100));
            assert_eq!(report.sessions_exhausted, 2);
        }

        #[test]
        fn empty_transactions_do_not_divide_by_zero() {
            let report = TransactionReport::from(TransactionStats::default());
            assert_eq!(report.failure_ratio, 0.0);
            assert_eq!(report.average_latency, Duration::ZERO);
        }
    }
}
