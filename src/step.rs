//! Scripted steps and request building.
use std::{borrow::Cow, collections::BTreeMap, time::Duration};

use http::Method;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::{
    check::{self, CheckSpec},
    correlation::CorrelationRule,
    error::PoolExhausted,
    script::seconds,
    template::{substitute, substitute_fields},
    transport::HttpRequest,
    variable::Resolver,
};

/// A request body as written in a script.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Sent verbatim.
    Raw(String),
    /// Serialized as JSON. Top-level string fields of an object are templates.
    Json(Value),
}

/// One scripted request with its checks and correlations.
#[derive(Debug, Clone, Deserialize)]
pub struct StepSpec {
    #[serde(default = "default_method", deserialize_with = "method")]
    pub method: Method,
    pub path: String,
    /// Overrides the script host for this step.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub body: Option<Body>,
    #[serde(default, alias = "contentType")]
    pub content_type: Option<String>,
    /// Extra headers. Values may contain placeholders.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "check::one_or_many")]
    pub checks: Vec<CheckSpec>,
    #[serde(default)]
    pub correlations: BTreeMap<String, CorrelationRule>,
    #[serde(default = "default_true", alias = "allowRedirects")]
    pub allow_redirects: bool,
    #[serde(default, alias = "transactionName", alias = "name")]
    pub transaction_name: Option<String>,
    #[serde(default, alias = "thinkTime", deserialize_with = "seconds::optional")]
    pub think_time: Option<Duration>,
}

fn default_method() -> Method {
    Method::GET
}

fn default_true() -> bool {
    true
}

fn method<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Method, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Method::from_bytes(raw.to_ascii_uppercase().as_bytes()).map_err(serde::de::Error::custom)
}

impl StepSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            host: None,
            body: None,
            content_type: None,
            headers: BTreeMap::new(),
            checks: Vec::new(),
            correlations: BTreeMap::new(),
            allow_redirects: true,
            transaction_name: None,
            think_time: None,
        }
    }

    /// The reporting label: the explicit name, else `"METHOD /path/template"`.
    pub fn transaction(&self) -> Cow<'_, str> {
        match &self.transaction_name {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(format!("{} {}", self.method, self.path)),
        }
    }

    /// Resolves every template of this step and builds the request.
    ///
    /// `host` is the step's host or the script default, with or without a
    /// scheme. Placeholders are resolved in a fixed order: path, headers,
    /// body. If a `unique` pool runs dry the request is not built at all.
    pub fn build_request(
        &self,
        scheme: &str,
        host: &str,
        resolver: &mut Resolver<'_>,
    ) -> Result<HttpRequest, PoolExhausted> {
        let path = substitute(&self.path, resolver)?;
        let url = join_url(scheme, host, &path);

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        for (name, value) in &self.headers {
            headers.push((name.clone(), substitute(value, resolver)?));
        }

        let body = match &self.body {
            None => None,
            Some(Body::Raw(raw)) => Some(substitute(raw, resolver)?),
            Some(Body::Json(Value::Object(fields))) => {
                Some(Value::Object(substitute_fields(fields, resolver)?).to_string())
            }
            Some(Body::Json(other)) => Some(other.to_string()),
        };

        if body.is_some() && !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
            let content_type = match (&self.content_type, &self.body) {
                (Some(ct), _) => Some(ct.clone()),
                (None, Some(Body::Json(_))) => Some("application/json".to_owned()),
                _ => None,
            };
            if let Some(ct) = content_type {
                headers.push(("Content-Type".to_owned(), ct));
            }
        }

        Ok(HttpRequest {
            method: self.method.clone(),
            url,
            headers,
            body,
            follow_redirects: self.allow_redirects,
            transaction: self.transaction().into_owned(),
        })
    }
}

/// Joins a host (optionally carrying its own scheme) and a resolved path.
pub fn join_url(scheme: &str, host: &str, path: &str) -> String {
    let host = if path.starts_with('/') {
        host.trim_end_matches('/')
    } else {
        host
    };
    if host.contains("://") {
        format!("{host}{path}")
    } else {
        format!("{scheme}://{host}{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::{Policy, UserState, VariableDefinition, VariablePool};

    fn pool() -> VariablePool {
        VariablePool::new()
            .with(VariableDefinition::new("OrderId", Policy::Sequential, ["123", "124"]))
            .with(VariableDefinition::new("UserId", Policy::Random, ["u1"]))
            .with(VariableDefinition::new("Ticket", Policy::Unique, ["t1"]))
    }

    fn step(raw: &str) -> StepSpec {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn defaults_from_a_minimal_step() {
        let step = step(r#"{"path": "/search"}"#);
        assert_eq!(step.method, Method::GET);
        assert!(step.allow_redirects);
        assert!(step.checks.is_empty());
        assert!(step.correlations.is_empty());
        assert_eq!(step.think_time, None);
        assert_eq!(step.transaction(), "GET /search");
    }

    #[test]
    fn method_is_case_insensitive() {
        let step = step(r#"{"method": "post", "path": "/x", "think_time": 1.5}"#);
        assert_eq!(step.method, Method::POST);
        assert_eq!(step.think_time, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn builds_a_get_request() {
        let pool = pool();
        let mut state = UserState::new(&pool);
        let step = step(
            r#"{"transaction_name": "Home Page", "path": "/home/${OrderId}",
                "allow_redirects": false}"#,
        );

        let request = step
            .build_request("https", "www.example.com", &mut state.resolver(&pool))
            .unwrap();
        assert_eq!(request.url, "https://www.example.com/home/123");
        assert_eq!(request.transaction, "Home Page");
        assert!(!request.follow_redirects);
        assert!(request.body.is_none());
        assert!(request.headers.is_empty());
    }

    #[test]
    fn structured_bodies_are_substituted_and_sent_as_json() {
        let pool = pool();
        let mut state = UserState::new(&pool);
        let step = step(
            r#"{"method": "POST", "path": "/post",
                "body": {"key": "value", "user": "${UserId}"}}"#,
        );

        let request = step
            .build_request("https", "h", &mut state.resolver(&pool))
            .unwrap();
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, serde_json::json!({"key": "value", "user": "u1"}));
        assert_eq!(request.header("content-type"), Some("application/json"));
    }

    #[test]
    fn raw_bodies_use_the_declared_content_type() {
        let pool = pool();
        let mut state = UserState::new(&pool);
        let step = step(
            r#"{"method": "PUT", "path": "/form", "body": "id=${OrderId}",
                "content_type": "application/x-www-form-urlencoded",
                "headers": {"X-Trace": "${OrderId}"}}"#,
        );

        let request = step
            .build_request("http", "localhost:3000", &mut state.resolver(&pool))
            .unwrap();
        assert_eq!(request.url, "http://localhost:3000/form");
        // path, then headers, then body
        assert_eq!(request.header("x-trace"), Some("123"));
        assert_eq!(request.body.as_deref(), Some("id=124"));
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn raw_body_without_content_type_sends_no_header() {
        let pool = pool();
        let mut state = UserState::new(&pool);
        let step = step(r#"{"method": "POST", "path": "/raw", "body": "hello"}"#);

        let request = step
            .build_request("https", "h", &mut state.resolver(&pool))
            .unwrap();
        assert_eq!(request.header("content-type"), None);
    }

    #[test]
    fn exhaustion_prevents_the_request() {
        let pool = pool();
        let mut state = UserState::new(&pool);
        let step = step(r#"{"path": "/claim/${Ticket}"}"#);

        assert!(step.build_request("https", "h", &mut state.resolver(&pool)).is_ok());
        let err = step
            .build_request("https", "h", &mut state.resolver(&pool))
            .unwrap_err();
        assert_eq!(err.variable, "Ticket");
    }

    #[test]
    fn url_joining() {
        assert_eq!(join_url("https", "example.com", "/a"), "https://example.com/a");
        assert_eq!(join_url("https", "example.com/", "/a"), "https://example.com/a");
        assert_eq!(
            join_url("https", "http://localhost:8080", "/a"),
            "http://localhost:8080/a"
        );
    }

    #[test]
    fn checks_and_correlations_parse_inside_a_step() {
        let step = step(
            r#"{"path": "/json", "checks": [200, {"content": "slideshow"}],
                "correlations": {"token": {"from": "response", "type": "body",
                    "extract": {"type": "regex", "pattern": "\"title\":\\s*\"([^\"]+)\"", "occurrence": 1}}}}"#,
        );
        assert_eq!(step.checks.len(), 2);
        assert!(step.correlations.contains_key("token"));
    }
}
