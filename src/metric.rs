use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::SessionState;

/// A `Metric` is a single observation produced while a script runs.
///
/// Metrics are the most granular level of data. A virtual user emits one per
/// executed step and one when it ends. They are consumed by an
/// [`crate::Aggregate`], which is later turned into a [`crate::Report`] and handed to a
/// [`crate::Reporter`].
///
/// ## Design principles
/// - **Simple and composable:** metrics are plain data and may embed other metrics.
/// - **Comparable:** metrics must support [`PartialEq`] and [`PartialOrd`].
/// - **Thread-safe and clonable:** metrics must be `Send`, `Sync`, and `Clone`.
///
/// ## Example
/// ```rust
/// use karga_script::Metric;
/// use std::time::Duration;
///
/// #[derive(Clone, PartialOrd, PartialEq)]
/// struct Latency(Duration);
/// impl Metric for Latency {}
/// ```
pub trait Metric
where
    Self: PartialOrd + PartialEq + Send + Sync + Clone,
{
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct StepMetric {
    pub user: usize,
    pub iteration: u64,
    pub transaction: String,
    /// `0` when the transport could not complete the exchange.
    pub status: u16,
    pub latency: Duration,
    pub bytes: usize,
    /// Every failed check (and the transport error, if any), in order.
    pub failures: Vec<String>,
}

impl StepMetric {
    pub fn success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl Metric for StepMetric {}

/// Everything a virtual user reports.
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub enum Sample {
    Step(StepMetric),
    /// The user left `Running` for good.
    SessionEnd {
        user: usize,
        state: SessionState,
        iterations: u64,
    },
}

impl Metric for Sample {}
