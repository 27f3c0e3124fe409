//! The `ShapeExecutor` and its components, providing a load-shape driven
//! virtual-user scheduler.
//!
//! A [`LoadShape`] says, for any point of the run, how many virtual users should
//! be active and how many per second may be started or retired to get there.
//! The executor polls it on a fixed `tick` and reconciles the set of running
//! sessions toward that target.
//!
//! # High-level flow
//! 1. On every tick, sessions that already ended (completed or exhausted) are
//!    reaped and their aggregates merged. Their slots are free again.
//! 2. The shape is evaluated for the elapsed run time.
//! 3. The spawn allowance for this tick is computed from the stage rate.
//! 4. Below target, new sessions are spawned (each a tokio task with fresh
//!    state). Above target, the most recently spawned sessions are signalled to
//!    stop; they finish their in-flight step and exit as `Terminated`.
//! 5. When the shape is over, or the external stop future resolves, every
//!    session is signalled and joined, and all aggregates are merged.
//!
//! # Spawn allowance
//! The allowance spreads a per-second rate over ticks, carrying the fractional
//! part so the long-term average matches the rate:
//!
//! ```text
//! add_f = rate * tick_seconds
//! allowance = floor(add_f + fractional)
//! fractional = (add_f + fractional) - allowance
//! ```
use std::{future::Future, time::Duration};

use futures::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use typed_builder::TypedBuilder;

use super::Executor;
use crate::{
    aggregate::Aggregate,
    error::ExecutorError,
    metric::Sample,
    scenario::Scenario,
    shape::{LoadShape, ShapeTick},
    transport::Transport,
};
use internals::*;

/// Executor that follows a [`LoadShape`], spawning one task per virtual user.
///
/// # Tuning Knobs
///
/// - `shape`: the load shape to follow. Defaults to the `stages` of the script.
/// - `tick`: how often the shape is evaluated and the user count reconciled.
///   Smaller ticks spread spawns more evenly at the cost of more wakeups.
#[derive(TypedBuilder)]
pub struct ShapeExecutor {
    /// Overrides the stages of the script.
    #[builder(default, setter(strip_option))]
    pub shape: Option<LoadShape>,
    /// The polling interval of the scheduler.
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,
}

impl<T, A> Executor<T, A> for ShapeExecutor
where
    Self: Send + Sync + Sized,
    T: Transport,
    A: Aggregate<Metric = Sample> + 'static,
{
    type Error = ExecutorError;
    async fn exec(&self, scenario: &Scenario<T>) -> Result<A, Self::Error> {
        self.exec_until(scenario, std::future::pending()).await
    }
}

impl ShapeExecutor {
    /// Like [`Executor::exec`], but shuts the run down early once `stop`
    /// resolves (for example on Ctrl-C).
    pub async fn exec_until<T, A, S>(
        &self,
        scenario: &Scenario<T>,
        stop: S,
    ) -> Result<A, ExecutorError>
    where
        T: Transport,
        A: Aggregate<Metric = Sample> + 'static,
        S: Future<Output = ()>,
    {
        if self.tick.is_zero() {
            return Err(ExecutorError::ZeroTick);
        }
        let shape = self
            .shape
            .clone()
            .or_else(|| scenario.script.shape())
            .filter(|shape| !shape.stages().is_empty())
            .ok_or(ExecutorError::EmptyShape)?;

        let mut sessions = SessionPool::<A>::new();
        let mut final_agg = A::new();
        let mut fractional = 0.0;
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(stop);

        tracing::info!(
            "Running scenario: {} for {:?}!",
            scenario.name,
            shape.total_duration()
        );
        let started = Instant::now();
        loop {
            tokio::select! {
                _ = &mut stop => {
                    tracing::info!("Stop requested, shutting down...");
                    break;
                }
                _ = interval.tick() => {}
            }

            sessions.reap(&mut final_agg).await;

            let (users, rate) = match shape.tick(started.elapsed()) {
                ShapeTick::Stop => {
                    tracing::info!("Load shape finished, shutting down...");
                    break;
                }
                ShapeTick::Target {
                    users,
                    requests_per_second,
                } => (users, requests_per_second),
            };

            if sessions.active() == users {
                fractional = 0.0;
                continue;
            }
            let (allowance, f) = spawn_allowance(f64::from(rate), self.tick, fractional);
            fractional = f;
            sessions.reconcile(scenario, users, allowance);
        }

        tracing::info!("Retrieving data from {} sessions...", sessions.len());
        final_agg.merge(sessions.shutdown().await);

        tracing::info!("Done running scenario: {}!", scenario.name);
        Ok(final_agg)
    }
}

#[cfg(feature = "internals")]
pub use internals::*;

/// Internal components for the `ShapeExecutor`.
/// Encapsulated in a module to allow conditional exposure via `#[cfg(feature = "internals")]`.
mod internals {
    use tokio::{
        sync::watch::{Sender, channel},
        task::{JoinError, JoinHandle},
    };

    use super::*;

    /// A spawned virtual user and the sender that stops it.
    pub struct SessionHandle<A> {
        pub id: usize,
        pub stop: Sender<bool>,
        pub task: JoinHandle<A>,
    }

    /// Every session the executor started and has not merged yet.
    pub struct SessionPool<A> {
        /// Oldest first.
        active: Vec<SessionHandle<A>>,
        /// Signalled to stop, possibly still finishing a step.
        retiring: Vec<JoinHandle<A>>,
        next_id: usize,
    }

    impl<A> Default for SessionPool<A> {
        fn default() -> Self {
            Self {
                active: Vec::new(),
                retiring: Vec::new(),
                next_id: 0,
            }
        }
    }

    impl<A> SessionPool<A>
    where
        A: Aggregate<Metric = Sample> + 'static,
    {
        pub fn new() -> Self {
            Self::default()
        }

        /// Sessions counting toward the target.
        pub fn active(&self) -> usize {
            self.active.len()
        }

        /// Sessions not merged yet, retiring ones included.
        pub fn len(&self) -> usize {
            self.active.len() + self.retiring.len()
        }

        /// Merges every session that already ended into `agg`.
        pub async fn reap(&mut self, agg: &mut A) {
            let (done, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.active)
                .into_iter()
                .partition(|session| session.task.is_finished());
            self.active = running;
            for session in done {
                tracing::debug!("Session {} ended, freeing its slot", session.id);
                agg.merge(joined(session.task.await));
            }

            let (done, retiring): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
                .into_iter()
                .partition(JoinHandle::is_finished);
            self.retiring = retiring;
            for task in done {
                agg.merge(joined(task.await));
            }
        }

        /// Moves the active count toward `target` by at most `allowance`.
        pub fn reconcile<T: Transport>(
            &mut self,
            scenario: &Scenario<T>,
            target: usize,
            allowance: usize,
        ) {
            let active = self.active.len();
            if active < target {
                let n = (target - active).min(allowance);
                tracing::debug!("Spawning {n} sessions ({active} active, target {target})");
                (0..n).for_each(|_| self.spawn(scenario));
            } else {
                let n = (active - target).min(allowance);
                tracing::debug!("Retiring {n} sessions ({active} active, target {target})");
                (0..n).for_each(|_| self.retire());
            }
        }

        fn spawn<T: Transport>(&mut self, scenario: &Scenario<T>) {
            let id = self.next_id;
            self.next_id += 1;
            let (stop, rx) = channel(false);
            let mut user = scenario.virtual_user(id);
            let task = tokio::spawn(async move { user.run::<A>(rx).await });
            self.active.push(SessionHandle { id, stop, task });
        }

        /// Signals the most recently spawned session.
        fn retire(&mut self) {
            if let Some(session) = self.active.pop() {
                // The session may already have ended on its own.
                let _ = session.stop.send(true);
                self.retiring.push(session.task);
            }
        }

        /// Signals every session and merges all of them.
        pub async fn shutdown(self) -> A {
            let mut tasks = self.retiring;
            for session in self.active {
                let _ = session.stop.send(true);
                tasks.push(session.task);
            }

            let mut agg = A::new();
            for res in join_all(tasks).await {
                agg.merge(joined(res));
            }
            agg
        }
    }

    /// Unwraps a joined session, replacing a panicked one with an empty aggregate.
    pub fn joined<A: Aggregate>(res: Result<A, JoinError>) -> A {
        match res {
            Ok(agg) => agg,
            Err(e) => {
                tracing::error!("Session panicked with error: {e}");
                // instead of failing the run, lose only this session's data
                A::new()
            }
        }
    }

    /// Pure function responsible for calculating how many sessions may be
    /// started or retired this tick, returning the total and the fractional
    pub fn spawn_allowance(rate: f64, tick: Duration, fractional: f64) -> (usize, f64) {
        let add_f = rate.max(0.0) * tick.as_secs_f64() + fractional;
        let allowance = add_f.floor();
        (allowance as usize, add_f - allowance)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        aggregate::ScriptAggregate,
        script::Script,
        shape::LoadStage,
        test_utils::MockTransport,
        transport::{HttpRequest, HttpResponse},
    };

    fn scenario<F>(script: &str, transport: MockTransport<F>) -> Scenario<MockTransport<F>>
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        Scenario::builder()
            .name("test")
            .script(Script::from_json_str(script).unwrap())
            .transport(transport)
            .build()
    }

    fn ok() -> MockTransport<impl Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static> {
        MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "ok"))
    }

    mod allowance {
        use super::*;

        #[test]
        fn carries_the_fractional_part() {
            let mut f = 0.0;
            let mut got = Vec::new();
            for _ in 0..4 {
                let (n, rest) = spawn_allowance(2.5, Duration::from_secs(1), f);
                f = rest;
                got.push(n);
            }
            assert_eq!(got, [2, 3, 2, 3]);
            assert_eq!(f, 0.0);
        }

        #[test]
        fn slow_rates_spread_over_ticks() {
            let tick = Duration::from_millis(250);
            let mut f = 0.0;
            let total: usize = (0..8)
                .map(|_| {
                    let (n, rest) = spawn_allowance(1.0, tick, f);
                    f = rest;
                    n
                })
                .sum();
            assert_eq!(total, 2);
        }

        #[test]
        fn negative_value_returns_0() {
            assert_eq!(spawn_allowance(-100., Duration::from_secs(1), 0.), (0, 0.));
        }

        #[test]
        fn extreme_rate_saturates() {
            let (n, f) = spawn_allowance(f64::MAX, Duration::from_secs(1), 0.);
            assert_eq!(n, usize::MAX);
            assert_eq!(f, 0.);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ramps_up_and_stops_when_the_shape_ends() {
        let scenario = scenario(
            r#"{
                "host": "api.test",
                "steps": [ { "transaction_name": "Home", "path": "/", "think_time": 1 } ],
                "stages": [ { "duration": 5, "users": 3 } ]
            }"#,
            ok(),
        );
        let executor = ShapeExecutor::builder().build();

        let started = Instant::now();
        let agg: ScriptAggregate = executor.exec(&scenario).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(agg.terminated, 3);
        assert_eq!(agg.completed + agg.exhausted, 0);
        assert!(agg.transactions["Home"].count >= 3);
        assert_eq!(Arc::strong_count(&scenario.script), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_sessions_are_replaced_with_fresh_state() {
        let transport = ok();
        let scenario = scenario(
            r#"{
                "host": "api.test",
                "variables": { "Seat": { "type": "unique", "values": ["A1"] } },
                "steps": [ { "path": "/book/${Seat}" } ],
                "stages": [ { "duration": 3, "users": 1 } ]
            }"#,
            transport,
        );
        let executor = ShapeExecutor::builder().build();

        let agg: ScriptAggregate = executor.exec(&scenario).await.unwrap();

        // One session per tick, each books the seat once and then runs dry.
        assert_eq!(agg.exhausted, 3);
        let sent = scenario.transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|r| r.url == "https://api.test/book/A1"));
    }

    #[tokio::test(start_paused = true)]
    async fn retires_newest_sessions_when_the_target_drops() {
        let scenario = scenario(
            r#"{
                "host": "api.test",
                "iterations": 100,
                "steps": [ { "path": "/", "think_time": 0.5 } ]
            }"#,
            ok(),
        );
        let executor = ShapeExecutor::builder()
            .shape(LoadShape::new(vec![
                LoadStage::new(Duration::from_secs(2), 3).with_rate(3),
                LoadStage::new(Duration::from_secs(4), 1).with_rate(3),
            ]))
            .build();

        let agg: ScriptAggregate = executor.exec(&scenario).await.unwrap();

        assert_eq!(agg.terminated, 3);
        // Two users ran for ~2s, the survivor for ~4s.
        assert!((13..=16).contains(&agg.iterations), "{}", agg.iterations);
    }

    #[tokio::test(start_paused = true)]
    async fn external_stop_ends_the_run_early() {
        let scenario = scenario(
            r#"{
                "host": "api.test",
                "steps": [ { "path": "/", "think_time": 1 } ],
                "stages": [ { "duration": 60, "users": 10 } ]
            }"#,
            ok(),
        );
        let executor = ShapeExecutor::builder().build();

        let started = Instant::now();
        let agg: ScriptAggregate = executor
            .exec_until(&scenario, tokio::time::sleep(Duration::from_millis(2500)))
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(agg.terminated, 3);
    }

    #[tokio::test]
    async fn a_zero_tick_is_rejected() {
        let scenario = scenario(
            r#"{ "host": "api.test", "steps": [ { "path": "/" } ], "stages": [ { "duration": 5, "users": 1 } ] }"#,
            ok(),
        );
        let executor = ShapeExecutor::builder().tick(Duration::ZERO).build();
        let res: Result<ScriptAggregate, _> = executor.exec(&scenario).await;
        assert!(matches!(res, Err(ExecutorError::ZeroTick)));
        assert!(scenario.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn a_script_without_stages_is_rejected() {
        let scenario = scenario(r#"{ "host": "api.test", "steps": [ { "path": "/" } ] }"#, ok());
        let res: Result<ScriptAggregate, _> = ShapeExecutor::builder().build().exec(&scenario).await;
        assert!(matches!(res, Err(ExecutorError::EmptyShape)));
    }
}
