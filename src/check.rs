//! Response validation.
//!
//! Checks never abort anything. Each mismatch becomes a reason string that is
//! recorded against the step's transaction, and the script moves on.
use serde::{Deserialize, Deserializer};

use crate::transport::HttpResponse;

/// A single check as written in a script.
///
/// ```json
/// 200
/// "200"
/// "Welcome"
/// {"status": 200, "content": "Welcome"}
/// ```
///
/// A string made only of digits is a status check, any other string is a
/// content check.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawCheck")]
pub enum CheckSpec {
    /// Exact status-code match.
    Status(u16),
    /// Case-sensitive substring of the body.
    Content(String),
    /// Either, both or none of the above. Absent fields are not checked.
    Structured {
        status: Option<u16>,
        content: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCheck {
    Status(u16),
    Text(String),
    Structured {
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        content: Option<String>,
    },
}

impl From<RawCheck> for CheckSpec {
    fn from(raw: RawCheck) -> Self {
        match raw {
            RawCheck::Status(status) => Self::Status(status),
            RawCheck::Text(text) => match text.parse() {
                Ok(status) if text.bytes().all(|b| b.is_ascii_digit()) => Self::Status(status),
                _ => Self::Content(text),
            },
            RawCheck::Structured { status, content } => Self::Structured { status, content },
        }
    }
}

/// The result of evaluating one [`CheckSpec`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// One entry per failed condition, in evaluation order.
    pub failures: Vec<String>,
}

impl CheckOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.failures.first().map(String::as_str)
    }
}

/// Evaluates `check` against `response`.
pub fn validate(response: &HttpResponse, check: &CheckSpec) -> CheckOutcome {
    let (status, content) = match check {
        CheckSpec::Status(s) => (Some(*s), None),
        CheckSpec::Content(c) => (None, Some(c.as_str())),
        CheckSpec::Structured { status, content } => (*status, content.as_deref()),
    };

    let mut outcome = CheckOutcome::default();
    if let Some(expected) = status
        && response.status != expected
    {
        outcome.failures.push(format!(
            "Expected status {expected}, got {}",
            response.status
        ));
    }
    if let Some(needle) = content
        && !response.body.contains(needle)
    {
        outcome
            .failures
            .push(format!("'{needle}' not found in response"));
    }
    outcome
}

/// Evaluates every check of a step and collects all failure reasons.
///
/// A transport failure is reported first, so a step that never got a real
/// response is always visible as failed even when it carries no checks.
pub fn validate_all(response: &HttpResponse, checks: &[CheckSpec]) -> Vec<String> {
    let mut failures: Vec<String> = response
        .error
        .iter()
        .map(|e| format!("Request failed: {e}"))
        .collect();
    for check in checks {
        failures.extend(validate(response, check).failures);
    }
    failures
}

/// Accepts either a single check or a list of checks.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<CheckSpec>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(CheckSpec),
        Many(Vec<CheckSpec>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(check) => vec![check],
        OneOrMany::Many(checks) => checks,
    })
}
