use std::{sync::Mutex, time::Duration};

use crate::transport::{HttpRequest, HttpResponse, Transport};

/// In-memory transport answering every request through `responder`.
pub struct MockTransport<F> {
    responder: F,
    latency: Duration,
    sent: Mutex<Vec<HttpRequest>>,
}

impl<F> MockTransport<F>
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            latency: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every request received so far, in order.
    pub fn sent(&self) -> Vec<HttpRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl<F> Transport for MockTransport<F>
where
    F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
{
    async fn send(&self, request: &HttpRequest) -> HttpResponse {
        self.sent.lock().unwrap().push(request.clone());
        if self.latency.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(request)
    }
}
