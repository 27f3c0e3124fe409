//! Karga Script: scripted virtual-user load testing built on karga's building blocks.
//!
//! A load test is described by a [`Script`]: an ordered list of HTTP steps, pools of
//! test data, and a load shape. Many virtual users replay the script concurrently,
//! each with its own data allocation and captured variables, while a host scheduler
//! grows and shrinks the number of active users over time.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Script`]: the parsed and validated test definition (steps, variables, pacing,
//!   stages).
//! - [`VirtualUser`]: one simulated end-user. Resolves `${name}` placeholders,
//!   sends each step through a [`Transport`], validates the response, captures
//!   correlations, and honors think time and pacing.
//! - [`Scenario`]: glues a script to the transport all users share.
//! - [`Executor`]: responsible for actually running the scenario. We provide a
//!   [`ShapeExecutor`] that follows the script's load shape, but executors are
//!   replaceable.
//! - [`Metric`]: the smallest unit produced by a user: one per executed step and
//!   one when the user ends.
//! - [`Aggregate`]: a lightweight, mergeable collector of `Metric`s. Every user
//!   owns one; the executor merges them.
//! - [`Report`]: transforms an `Aggregate` into human- or machine-friendly output.
//! - [`Reporter`]: consumes `Report`s and sends them somewhere (stdout, file, database).
//!
//! # Failure model
//!
//! - Failed checks and transport errors are recorded against the transaction; the
//!   user carries on.
//! - A correlation that finds nothing leaves the variable as it was.
//! - A `unique` variable pool running dry ends that one user as `Exhausted`.
//!
//! # Feature flags
//! - `builtins` (default): the [`aggregate::ScriptAggregate`], [`report::ScriptReport`]
//!   and [`report::StdoutReporter`] implementations
//! - `reqwest` (default): [`transport::ReqwestTransport`]
//! - `internals`: enable access to internal (and unstable) executor functions
//!
//! # Where to start
//!
//! - Read the docs for [`Script`], [`Scenario`], [`Executor`], and [`Reporter`].

/// Metric aggregators
pub mod aggregate;
/// Response checks
pub mod check;
/// Capturing values from exchanges into session variables
pub mod correlation;
pub mod error;
/// Orchestrators that define how users are scheduled
pub mod executor;
/// Single metrics
pub mod metric;
pub mod pacing;
/// Reports and Reporters
pub mod report;
/// Glues a script to its transport
pub mod scenario;
/// Script loading and validation
pub mod script;
/// The virtual user state machine
pub mod session;
pub mod shape;
/// Scripted requests
pub mod step;
/// `${name}` placeholder substitution
pub mod template;
pub mod transport;
/// Variable pools and per-user allocation
pub mod variable;

#[cfg(test)]
mod test_utils;

pub use aggregate::Aggregate;
pub use error::{ExecutorError, PoolExhausted, ScriptError};
pub use executor::{Executor, ShapeExecutor};
pub use metric::Metric;
pub use report::{Report, Reporter};
pub use scenario::Scenario;
pub use script::Script;
pub use session::{SessionState, VirtualUser};
pub use shape::{LoadShape, LoadStage};
pub use transport::{HttpRequest, HttpResponse, Transport};
