//! The HTTP collaborator.
//!
//! The engine never talks to the network itself. It builds an [`HttpRequest`],
//! hands it to a [`Transport`] and interprets whatever [`HttpResponse`] comes
//! back. Transports are infallible by contract: a connection error or timeout
//! is reported as a response with status `0` and an [`HttpResponse::error`]
//! reason, which the checks then record as a failure for the transaction.
use std::future::Future;

use http::Method;

/// A fully resolved request, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub follow_redirects: bool,
    /// Reporting label of the step that issued this request.
    pub transaction: String,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// What came back for a request, or why nothing did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Set when the transport could not complete the exchange.
    pub error: Option<String>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            ..Default::default()
        }
    }

    /// A response standing in for a transport failure.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Sends requests on behalf of virtual users.
///
/// One transport instance is shared by every virtual user of a run, so it is
/// the natural owner of connection pools. Implementations must not panic on
/// network errors; return [`HttpResponse::failed`] instead.
///
/// # Example
/// ```rust
/// use karga_script::transport::{HttpRequest, HttpResponse, Transport};
///
/// struct AlwaysOk;
///
/// impl Transport for AlwaysOk {
///     async fn send(&self, _request: &HttpRequest) -> HttpResponse {
///         HttpResponse::new(200, "ok")
///     }
/// }
/// ```
pub trait Transport
where
    Self: Send + Sync + 'static,
{
    fn send(&self, request: &HttpRequest) -> impl Future<Output = HttpResponse> + Send;
}

#[cfg(feature = "reqwest")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use std::time::Duration;

    use reqwest::{Client, redirect};

    use super::*;

    /// [`Transport`] backed by `reqwest`.
    ///
    /// Redirect handling is a client-level setting in `reqwest`, so two clients
    /// are kept: one following redirects and one that never does. Both share
    /// the same timeout.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        follow: Client,
        no_follow: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, reqwest::Error> {
            Self::build(None)
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
            Self::build(Some(timeout))
        }

        fn build(timeout: Option<Duration>) -> Result<Self, reqwest::Error> {
            let base = || {
                let builder = Client::builder();
                match timeout {
                    Some(t) => builder.timeout(t),
                    None => builder,
                }
            };
            Ok(Self {
                follow: base().build()?,
                no_follow: base().redirect(redirect::Policy::none()).build()?,
            })
        }
    }

    impl Transport for ReqwestTransport {
        async fn send(&self, request: &HttpRequest) -> HttpResponse {
            let client = if request.follow_redirects {
                &self.follow
            } else {
                &self.no_follow
            };

            let mut builder = client.request(request.method.clone(), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let response = match builder.send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("{} failed: {e}", request.transaction);
                    return HttpResponse::failed(e.to_string());
                }
            };

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_owned(), v.to_owned()))
                })
                .collect();

            match response.text().await {
                Ok(body) => HttpResponse {
                    status,
                    headers,
                    body,
                    error: None,
                },
                Err(e) => {
                    tracing::warn!("{} body could not be read: {e}", request.transaction);
                    HttpResponse {
                        status,
                        headers,
                        body: String::new(),
                        error: Some(e.to_string()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse::new(200, "").with_header("X-Session-Id", "abc");
        assert_eq!(response.header("x-session-id"), Some("abc"));
        assert_eq!(response.header("x-other"), None);
    }

    #[test]
    fn failed_response_carries_the_reason() {
        let response = HttpResponse::failed("connection refused");
        assert_eq!(response.status, 0);
        assert_eq!(response.error.as_deref(), Some("connection refused"));
        assert!(response.json().is_err());
    }
}
