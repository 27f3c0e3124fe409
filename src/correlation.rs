//! Correlation: capturing values from an exchange into session variables.
//!
//! Every rule is evaluated after the response is in. A rule that produces a
//! value overwrites the session variable of the same name; a rule that
//! produces nothing (missing header, unparsable JSON, no regex match) leaves
//! the variable exactly as it was. Misses are not errors.
use std::{collections::BTreeMap, num::NonZeroUsize};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    transport::{HttpRequest, HttpResponse},
    variable::SessionVariables,
};

/// Which side of the exchange a rule reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Request,
    Response,
}

/// Which part of that side a rule reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Header,
    Body,
    Url,
}

/// Which regex match to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    /// The n-th match, 1-based.
    Nth(NonZeroUsize),
    /// Every match, joined with a single space.
    All,
}

impl Default for Occurrence {
    fn default() -> Self {
        Self::Nth(NonZeroUsize::MIN)
    }
}

/// How a body is turned into a value.
#[derive(Debug, Clone)]
pub enum Extraction {
    /// The whole body.
    Direct,
    /// A value inside a JSON body, addressed by a dotted/bracket path.
    Json { path: String },
    /// A regex match inside the raw body.
    Regex {
        pattern: Regex,
        occurrence: Occurrence,
    },
}

impl Extraction {
    pub fn json(path: impl Into<String>) -> Self {
        Self::Json { path: path.into() }
    }

    pub fn regex(pattern: &str, occurrence: Occurrence) -> Result<Self, regex::Error> {
        Ok(Self::Regex {
            pattern: Regex::new(pattern)?,
            occurrence,
        })
    }
}

/// One correlation of a step.
///
/// In a script:
///
/// ```json
/// {"from": "response", "type": "body", "key": "id",
///  "extract": {"type": "regex", "pattern": "id=(\\d+)", "occurrence": "all"}}
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawRule")]
pub struct CorrelationRule {
    pub source: Source,
    pub kind: Kind,
    pub key: Option<String>,
    pub extraction: Extraction,
}

impl CorrelationRule {
    pub fn new(source: Source, kind: Kind) -> Self {
        Self {
            source,
            kind,
            key: None,
            extraction: Extraction::Direct,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_extraction(mut self, extraction: Extraction) -> Self {
        self.extraction = extraction;
        self
    }

    /// Computes this rule's value for a finished exchange.
    ///
    /// `None` means "no value": the caller must not touch the target variable.
    pub fn extract(&self, request: &HttpRequest, response: &HttpResponse) -> Option<String> {
        match (self.source, self.kind) {
            (_, Kind::Url) => Some(request.url.clone()),
            (Source::Request, Kind::Header) => {
                request.header(self.key.as_deref()?).map(str::to_owned)
            }
            (Source::Request, Kind::Body) => request.body.clone(),
            (Source::Response, Kind::Header) => {
                response.header(self.key.as_deref()?).map(str::to_owned)
            }
            (Source::Response, Kind::Body) => extract_body(&self.extraction, response),
        }
    }
}

fn extract_body(extraction: &Extraction, response: &HttpResponse) -> Option<String> {
    match extraction {
        Extraction::Direct => Some(response.body.clone()),
        Extraction::Json { path } => {
            let document = response.json().ok()?;
            json_path(&document, path).and_then(json_text)
        }
        Extraction::Regex {
            pattern,
            occurrence,
        } => regex_match(pattern, *occurrence, &response.body),
    }
}

fn regex_match(pattern: &Regex, occurrence: Occurrence, text: &str) -> Option<String> {
    let grouped = pattern.captures_len() > 1;
    match occurrence {
        Occurrence::All => {
            let found: Vec<&str> = pattern
                .captures_iter(text)
                .map(|caps| {
                    let m = if grouped { caps.get(1) } else { caps.get(0) };
                    m.map_or("", |m| m.as_str())
                })
                .collect();
            (!found.is_empty()).then(|| found.join(" "))
        }
        Occurrence::Nth(n) => {
            let caps = pattern.captures_iter(text).nth(n.get() - 1)?;
            let m = if grouped { caps.get(1) } else { caps.get(0) };
            m.map(|m| m.as_str().to_owned())
        }
    }
}

/// A step in a JSON path.
#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Key(&'a str),
    Index(usize),
}

/// Splits `a.b[0].c` (also `$.a.b`, `a.0.c` and `a["b"]`) into segments.
fn segments(path: &str) -> Option<Vec<Segment<'_>>> {
    let path = path.strip_prefix('$').unwrap_or(path);
    let path = path.strip_prefix('.').unwrap_or(path);
    let mut out = Vec::new();

    for part in path.split('.').filter(|p| !p.is_empty()) {
        let (head, mut rest) = part.split_at(part.find('[').unwrap_or(part.len()));
        if !head.is_empty() {
            out.push(Segment::Key(head));
        }
        while let Some(open) = rest.strip_prefix('[') {
            let close = open.find(']')?;
            let inner = &open[..close];
            let quoted = inner
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| inner.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
            out.push(match quoted {
                Some(key) => Segment::Key(key),
                None => Segment::Index(inner.trim().parse().ok()?),
            });
            rest = &open[close + 1..];
        }
        if !rest.is_empty() {
            return None;
        }
    }
    Some(out)
}

/// Walks `path` through nested objects and arrays.
fn json_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    segments(path)?
        .into_iter()
        .try_fold(root, |node, segment| match (segment, node) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?),
            (Segment::Index(i), Value::Array(items)) => items.get(i),
            _ => None,
        })
}

/// Strings keep their raw text, `null` is no value, anything else is
/// rendered as compact JSON.
fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Runs every rule of a step and stores the values it produced.
pub fn correlate(
    rules: &BTreeMap<String, CorrelationRule>,
    request: &HttpRequest,
    response: &HttpResponse,
    variables: &mut SessionVariables,
) {
    for (name, rule) in rules {
        match rule.extract(request, response) {
            Some(value) => {
                tracing::trace!("Captured {name} from {}", request.transaction);
                variables.set(name.as_str(), value);
            }
            None => tracing::trace!("No value for {name} in {}", request.transaction),
        }
    }
}

/// Extraction mode as written in a script.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    #[default]
    Direct,
    Json,
    Regex,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOccurrence {
    Index(usize),
    Keyword(String),
}

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default, rename = "type", alias = "mode")]
    mode: Mode,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    pattern: Option<String>,
    #[serde(default)]
    occurrence: Option<RawOccurrence>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(rename = "from", alias = "source")]
    source: Source,
    #[serde(rename = "type", alias = "kind")]
    kind: Kind,
    #[serde(default)]
    key: Option<String>,
    #[serde(default, rename = "extract", alias = "extraction")]
    extraction: RawExtraction,
}

impl TryFrom<RawOccurrence> for Occurrence {
    type Error = String;

    fn try_from(raw: RawOccurrence) -> Result<Self, Self::Error> {
        match raw {
            RawOccurrence::Index(n) => NonZeroUsize::new(n)
                .map(Occurrence::Nth)
                .ok_or_else(|| "occurrence is 1-based, got 0".to_owned()),
            RawOccurrence::Keyword(k) if k.eq_ignore_ascii_case("all") => Ok(Occurrence::All),
            RawOccurrence::Keyword(k) => Err(format!(
                "occurrence must be a positive number or \"all\", got \"{k}\""
            )),
        }
    }
}

impl TryFrom<RawRule> for CorrelationRule {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        if raw.kind == Kind::Header && raw.key.is_none() {
            return Err("header correlation needs a key".to_owned());
        }

        let extraction = match raw.extraction.mode {
            Mode::Direct => Extraction::Direct,
            Mode::Json => {
                let path = raw
                    .extraction
                    .path
                    .or_else(|| raw.key.clone())
                    .ok_or("json extraction needs a path or a key")?;
                Extraction::Json { path }
            }
            Mode::Regex => {
                let pattern = raw
                    .extraction
                    .pattern
                    .ok_or("regex extraction needs a pattern")?;
                let occurrence = raw
                    .extraction
                    .occurrence
                    .map(Occurrence::try_from)
                    .transpose()?
                    .unwrap_or_default();
                Extraction::Regex {
                    pattern: Regex::new(&pattern).map_err(|e| e.to_string())?,
                    occurrence,
                }
            }
        };

        Ok(Self {
            source: raw.source,
            kind: raw.kind,
            key: raw.key,
            extraction,
        })
    }
}
