//! Script documents: loading and load-time validation.
//!
//! A script bundles everything that stays fixed for a whole run: the default
//! target, the variable pools, the ordered steps, the pacing and the load
//! shape. Scripts are JSON documents:
//!
//! ```json
//! {
//!   "host": "www.example.com",
//!   "pacing": 10,
//!   "variables": {
//!     "OrderId": {"type": "sequential", "values": ["123", "124", "125"]}
//!   },
//!   "requests": [
//!     {"transaction_name": "Home Page", "path": "/home/${OrderId}",
//!      "checks": {"status": 200}, "think_time": 2.0}
//!   ],
//!   "stages": [
//!     {"duration": 60, "users": 5},
//!     {"duration": 120, "users": 10, "request_per_sec": 2}
//!   ]
//! }
//! ```
use std::{collections::HashSet, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::ScriptError,
    shape::{LoadShape, LoadStage},
    step::StepSpec,
    variable::{Policy, VariablePool},
};

/// A validated load-test script.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Default host of every step, optionally with a scheme.
    #[serde(default)]
    pub host: Option<String>,
    /// Scheme used for hosts given without one.
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Target wall-clock duration of one iteration.
    #[serde(default, deserialize_with = "seconds::optional")]
    pub pacing: Option<Duration>,
    /// Iterations per virtual user; unbounded when absent.
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub variables: VariablePool,
    #[serde(alias = "requests")]
    pub steps: Vec<StepSpec>,
    #[serde(default)]
    pub stages: Vec<LoadStage>,
}

fn default_scheme() -> String {
    "https".to_owned()
}

impl Script {
    /// A script with the given steps and nothing else configured.
    pub fn new(host: impl Into<String>, steps: Vec<StepSpec>) -> Self {
        Self {
            host: Some(host.into()),
            scheme: default_scheme(),
            pacing: None,
            iterations: None,
            variables: VariablePool::default(),
            steps,
            stages: Vec::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ScriptError> {
        let script: Script = serde_json::from_str(raw)?;
        script.validate()?;
        Ok(script)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ScriptError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks everything that can be checked before a user starts.
    pub fn validate(&self) -> Result<(), ScriptError> {
        if self.steps.is_empty() {
            return Err(ScriptError::NoSteps);
        }

        for definition in self.variables.iter() {
            let invalid = |reason: &str| ScriptError::InvalidVariable {
                name: definition.name.clone(),
                reason: reason.to_owned(),
            };
            if !is_identifier(&definition.name) {
                return Err(invalid("name is not a valid identifier"));
            }
            if definition.values.is_empty() {
                return Err(invalid("pool has no values"));
            }
            if definition.policy == Policy::Unique {
                let mut seen = HashSet::new();
                if let Some(dup) = definition.values.iter().find(|v| !seen.insert(v.as_str())) {
                    return Err(invalid(&format!("unique pool lists '{dup}' more than once")));
                }
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if step.host.is_none() && self.host.is_none() {
                return Err(ScriptError::InvalidStep {
                    index,
                    transaction: step.transaction().into_owned(),
                    reason: "no host on the step and no default host".to_owned(),
                });
            }
        }

        let mut previous = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 && stage.duration <= previous {
                return Err(ScriptError::InvalidStages(format!(
                    "stage {index} ends at {:?}, not after the previous stage ({previous:?})",
                    stage.duration
                )));
            }
            previous = stage.duration;
        }

        Ok(())
    }

    /// Host a step is sent to.
    pub fn host_for<'a>(&'a self, step: &'a StepSpec) -> &'a str {
        step.host
            .as_deref()
            .or(self.host.as_deref())
            .unwrap_or_default()
    }

    /// The load shape described by `stages`, if there is one.
    pub fn shape(&self) -> Option<LoadShape> {
        (!self.stages.is_empty()).then(|| LoadShape::new(self.stages.clone()))
    }
}

/// Letters, digits and `_`, not starting with a digit.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Durations written as (fractional) seconds.
pub(crate) mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de::Error};

    pub fn required<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {secs} seconds")))
    }

    pub fn optional<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(deserializer)?
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|_| D::Error::custom(format!("invalid duration: {secs} seconds")))
            })
            .transpose()
    }
}
