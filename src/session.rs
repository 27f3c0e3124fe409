//! The virtual user: one simulated end-user replaying a script.
use std::{ops::ControlFlow, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{sync::watch, time::Instant};

use crate::{
    aggregate::Aggregate,
    check::validate_all,
    correlation::correlate,
    metric::{Sample, StepMetric},
    pacing::{Pacer, Pause, pause, stop_requested},
    script::Script,
    transport::Transport,
    variable::{SessionVariables, UserState},
};

/// Lifecycle of a [`VirtualUser`].
///
/// `Idle -> Running -> {Completed, Exhausted, Terminated}`. The last three are
/// final.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum SessionState {
    Idle,
    Running,
    /// Ran the configured number of iterations.
    Completed,
    /// A `unique` pool had nothing left to hand out.
    Exhausted,
    /// Stopped from the outside.
    Terminated,
}

impl SessionState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Exhausted | SessionState::Terminated
        )
    }
}

/// One virtual user.
///
/// Owns its allocation state and captured variables for its whole life; only
/// the script and the transport are shared with other users.
pub struct VirtualUser<T: Transport> {
    id: usize,
    script: Arc<Script>,
    transport: Arc<T>,
    state: SessionState,
    user: UserState,
    iterations: u64,
}

impl<T: Transport> VirtualUser<T> {
    pub fn new(id: usize, script: Arc<Script>, transport: Arc<T>) -> Self {
        let user = UserState::new(&script.variables);
        Self {
            id,
            script,
            transport,
            state: SessionState::Idle,
            user,
            iterations: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Values captured by correlations so far.
    pub fn variables(&self) -> &SessionVariables {
        &self.user.variables
    }

    /// Fully executed iterations.
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Replays the script until it is stopped, runs dry, or reaches the
    /// configured iteration count.
    ///
    /// `stop` is observed between steps and during think time and pacing. An
    /// in-flight request is always awaited. Every executed step and the end of
    /// the session are recorded into a fresh aggregate, which is returned.
    pub async fn run<A>(&mut self, mut stop: watch::Receiver<bool>) -> A
    where
        A: Aggregate<Metric = Sample>,
    {
        let mut agg = A::new();
        if self.state.is_finished() {
            return agg;
        }

        self.state = SessionState::Running;
        tracing::debug!("User {} started", self.id);

        let script = Arc::clone(&self.script);
        let pacer = Pacer::new(script.pacing);
        let limit = script.iterations;

        self.state = loop {
            if limit.is_some_and(|max| self.iterations >= max) {
                break SessionState::Completed;
            }

            let started = pacer.start();
            if let ControlFlow::Break(state) = self.iteration(&script, &mut stop, &mut agg).await {
                break state;
            }
            self.iterations += 1;

            if limit.is_some_and(|max| self.iterations >= max) {
                break SessionState::Completed;
            }
            if pacer.wait(started, &mut stop).await == Pause::Stopped {
                break SessionState::Terminated;
            }
        };

        tracing::debug!(
            "User {} finished as {:?} after {} iterations",
            self.id,
            self.state,
            self.iterations
        );
        agg.consume(&Sample::SessionEnd {
            user: self.id,
            state: self.state,
            iterations: self.iterations,
        });
        agg
    }

    /// One pass over every step, in order.
    async fn iteration<A>(
        &mut self,
        script: &Script,
        stop: &mut watch::Receiver<bool>,
        agg: &mut A,
    ) -> ControlFlow<SessionState>
    where
        A: Aggregate<Metric = Sample>,
    {
        for step in &script.steps {
            if stop_requested(stop) {
                return ControlFlow::Break(SessionState::Terminated);
            }

            let request = match step.build_request(
                &script.scheme,
                script.host_for(step),
                &mut self.user.resolver(&script.variables),
            ) {
                Ok(request) => request,
                Err(exhausted) => {
                    tracing::warn!("User {}: {exhausted}, stopping", self.id);
                    return ControlFlow::Break(SessionState::Exhausted);
                }
            };

            let sent_at = Instant::now();
            let response = self.transport.send(&request).await;
            let latency = sent_at.elapsed();

            let failures = validate_all(&response, &step.checks);
            if !failures.is_empty() {
                tracing::debug!(
                    "User {}: {} failed: {}",
                    self.id,
                    request.transaction,
                    failures.join("; ")
                );
            }
            correlate(
                &step.correlations,
                &request,
                &response,
                &mut self.user.variables,
            );

            agg.consume(&Sample::Step(StepMetric {
                user: self.id,
                iteration: self.iterations,
                transaction: request.transaction,
                status: response.status,
                latency,
                bytes: response.body.len(),
                failures,
            }));

            if let Some(think_time) = step.think_time
                && pause(think_time, stop).await == Pause::Stopped
            {
                return ControlFlow::Break(SessionState::Terminated);
            }
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        aggregate::ScriptAggregate,
        test_utils::MockTransport,
        transport::{HttpRequest, HttpResponse},
    };

    fn user<F>(
        script: &str,
        transport: MockTransport<F>,
    ) -> (VirtualUser<MockTransport<F>>, Arc<MockTransport<F>>)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        let script = Arc::new(Script::from_json_str(script).unwrap());
        let transport = Arc::new(transport);
        (VirtualUser::new(7, script, transport.clone()), transport)
    }

    #[tokio::test]
    async fn correlated_values_feed_later_steps() {
        let script = r#"{
            "host": "api.test",
            "iterations": 1,
            "steps": [
                {
                    "transaction_name": "Login",
                    "method": "POST",
                    "path": "/login",
                    "correlations": {
                        "token": { "from": "response", "type": "body", "extract": { "type": "json", "path": "token" } }
                    }
                },
                {
                    "transaction_name": "Orders",
                    "path": "/orders",
                    "headers": { "Authorization": "Bearer ${token}" }
                }
            ]
        }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, r#"{"token":"abc"}"#)),
        );
        let (_tx, rx) = watch::channel(false);

        let agg: ScriptAggregate = vu.run(rx).await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url, "https://api.test/login");
        assert_eq!(sent[1].header("authorization"), Some("Bearer abc"));
        assert_eq!(vu.variables().get("token"), Some("abc"));
        assert_eq!(vu.state(), SessionState::Completed);
        assert_eq!(agg.completed, 1);
        assert_eq!(agg.transactions["Orders"].count, 1);
    }

    #[tokio::test]
    async fn exhaustion_stops_before_sending() {
        let script = r#"{
            "host": "shop.test",
            "variables": { "ProductId": { "type": "unique", "values": ["p1", "p2"] } },
            "steps": [
                { "transaction_name": "Home", "path": "/" },
                { "transaction_name": "Product", "path": "/product/${ProductId}" }
            ]
        }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "ok")),
        );
        let (_tx, rx) = watch::channel(false);

        let agg: ScriptAggregate = vu.run(rx).await;

        let urls: Vec<_> = transport.sent().into_iter().map(|r| r.url).collect();
        assert_eq!(
            urls,
            [
                "https://shop.test/",
                "https://shop.test/product/p1",
                "https://shop.test/",
                "https://shop.test/product/p2",
                "https://shop.test/",
            ]
        );
        assert_eq!(vu.state(), SessionState::Exhausted);
        assert_eq!(vu.iterations(), 2);
        assert_eq!(agg.exhausted, 1);
        assert_eq!(agg.transactions["Product"].count, 2);
    }

    #[tokio::test]
    async fn failed_checks_do_not_abort_the_iteration() {
        let script = r#"{
            "host": "api.test",
            "iterations": 1,
            "steps": [
                { "transaction_name": "Broken", "path": "/broken", "checks": { "status": 200, "content": "ok" } },
                { "transaction_name": "Fine", "path": "/fine", "checks": 200 }
            ]
        }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|req: &HttpRequest| {
                if req.url.ends_with("/broken") {
                    HttpResponse::new(404, "ok")
                } else {
                    HttpResponse::new(200, "fine")
                }
            }),
        );
        let (_tx, rx) = watch::channel(false);

        let agg: ScriptAggregate = vu.run(rx).await;

        assert_eq!(transport.sent().len(), 2);
        let broken = &agg.transactions["Broken"];
        assert_eq!(broken.failures, 1);
        assert_eq!(broken.reasons["Expected status 200, got 404"], 1);
        assert_eq!(agg.transactions["Fine"].failures, 0);
        assert_eq!(vu.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn transport_failures_are_recorded_not_raised() {
        let script = r#"{
            "host": "down.test",
            "iterations": 2,
            "steps": [ { "transaction_name": "Ping", "path": "/ping" } ]
        }"#;
        let (mut vu, _) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::failed("connection refused")),
        );
        let (_tx, rx) = watch::channel(false);

        let agg: ScriptAggregate = vu.run(rx).await;

        let ping = &agg.transactions["Ping"];
        assert_eq!((ping.count, ping.failures), (2, 2));
        assert_eq!(ping.reasons["Request failed: connection refused"], 2);
        assert_eq!(vu.state(), SessionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn think_time_and_pacing_shape_the_iteration() {
        let script = r#"{
            "host": "api.test",
            "pacing": 10,
            "iterations": 2,
            "steps": [
                { "path": "/a", "think_time": 3 },
                { "path": "/b" }
            ]
        }"#;
        let (mut vu, _) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "")),
        );
        let (_tx, rx) = watch::channel(false);
        let started = Instant::now();

        let _: ScriptAggregate = vu.run(rx).await;

        // The first iteration is padded to 10s; the last one is not paced.
        let took = started.elapsed();
        assert!(took >= Duration::from_secs(13) && took < Duration::from_millis(13_100));
        assert_eq!(vu.iterations(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_observed_during_think_time() {
        let script = r#"{
            "host": "api.test",
            "steps": [
                { "path": "/a", "think_time": 60 },
                { "path": "/b" }
            ]
        }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "")),
        );
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            tx.send(true).unwrap();
        });
        let agg: ScriptAggregate = vu.run(rx).await;
        stopper.await.unwrap();

        assert_eq!(transport.sent().len(), 1);
        assert_eq!(vu.state(), SessionState::Terminated);
        assert_eq!(vu.iterations(), 0);
        assert_eq!(agg.terminated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_never_abandons_an_in_flight_request() {
        let script = r#"{
            "host": "api.test",
            "steps": [
                { "transaction_name": "Slow", "path": "/slow" },
                { "transaction_name": "Next", "path": "/next" }
            ]
        }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "done"))
                .with_latency(Duration::from_secs(2)),
        );
        let (tx, rx) = watch::channel(false);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(true).unwrap();
        });
        let started = Instant::now();
        let agg: ScriptAggregate = vu.run(rx).await;
        stopper.await.unwrap();

        // The response arrived after the stop and was still recorded.
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(transport.sent().len(), 1);
        let slow = &agg.transactions["Slow"];
        assert_eq!((slow.count, slow.failures), (1, 0));
        assert!(!agg.transactions.contains_key("Next"));
        assert_eq!(vu.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn already_stopped_users_send_nothing() {
        let script = r#"{ "host": "api.test", "steps": [ { "path": "/" } ] }"#;
        let (mut vu, transport) = user(
            script,
            MockTransport::new(|_: &HttpRequest| HttpResponse::new(200, "")),
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let _: ScriptAggregate = vu.run(rx).await;

        assert!(transport.sent().is_empty());
        assert_eq!(vu.state(), SessionState::Terminated);
    }
}
