//! Variable pools and the per-user resolver.
//!
//! A [`VariablePool`] is the immutable set of [`VariableDefinition`]s a script
//! ships with. It is shared read-only by every virtual user. Everything that
//! changes while a user runs lives in a [`UserState`]: the allocation cursor or
//! consumed set of every pool ([`AllocationState`]) and the values captured by
//! correlations ([`SessionVariables`]). A `UserState` belongs to exactly one
//! virtual user and is never shared.
//!
//! Placeholders are resolved through a short-lived [`Resolver`] that borrows
//! both the pool and the user's state.
use std::collections::{BTreeMap, HashMap, HashSet};

use rand::seq::IndexedRandom;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::PoolExhausted;

/// How values are handed out from a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Round-robin, starting at the first value, independently per user.
    Sequential,
    /// A uniformly chosen value on every lookup.
    Random,
    /// Each value at most once per user. Running out ends the user.
    Unique,
}

/// A named list of values and the policy used to allocate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDefinition {
    pub name: String,
    pub policy: Policy,
    pub values: Vec<String>,
}

impl VariableDefinition {
    pub fn new<I, S>(name: impl Into<String>, policy: Policy, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            policy,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Shape of a pool entry in a script document, keyed by variable name.
#[derive(Debug, Deserialize)]
struct VariableSpec {
    #[serde(rename = "type", alias = "policy")]
    policy: Policy,
    values: Vec<String>,
}

/// Every variable definition of a script, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariablePool {
    definitions: BTreeMap<String, VariableDefinition>,
}

impl<'de> Deserialize<'de> for VariablePool {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let specs = BTreeMap::<String, VariableSpec>::deserialize(deserializer)?;
        let definitions = specs
            .into_iter()
            .map(|(name, spec)| {
                let definition = VariableDefinition {
                    name: name.clone(),
                    policy: spec.policy,
                    values: spec.values,
                };
                (name, definition)
            })
            .collect();
        Ok(Self { definitions })
    }
}

impl VariablePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a definition.
    pub fn with(mut self, definition: VariableDefinition) -> Self {
        self.definitions.insert(definition.name.clone(), definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableDefinition> {
        self.definitions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VariableDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// Allocation bookkeeping for a single pool, owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Allocation {
    Sequential { cursor: usize },
    Random,
    Unique { consumed: HashSet<String> },
}

impl Allocation {
    fn fresh(policy: Policy) -> Self {
        match policy {
            Policy::Sequential => Self::Sequential { cursor: 0 },
            Policy::Random => Self::Random,
            Policy::Unique => Self::Unique {
                consumed: HashSet::new(),
            },
        }
    }
}

/// Per-user allocation state for every pool of a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationState {
    slots: HashMap<String, Allocation>,
}

impl AllocationState {
    /// Fresh state for every definition: cursors at 0, nothing consumed.
    pub fn new(pool: &VariablePool) -> Self {
        let slots = pool
            .iter()
            .map(|def| (def.name.clone(), Allocation::fresh(def.policy)))
            .collect();
        Self { slots }
    }

    fn allocate(&mut self, definition: &VariableDefinition) -> Result<String, PoolExhausted> {
        let values = &definition.values;
        let slot = self
            .slots
            .entry(definition.name.clone())
            .or_insert_with(|| Allocation::fresh(definition.policy));

        match slot {
            Allocation::Sequential { cursor } => {
                if values.is_empty() {
                    return Ok(String::new());
                }
                let value = values[*cursor % values.len()].clone();
                *cursor = (*cursor + 1) % values.len();
                Ok(value)
            }
            Allocation::Random => Ok(values
                .choose(&mut rand::rng())
                .cloned()
                .unwrap_or_default()),
            Allocation::Unique { consumed } => {
                let value = values
                    .iter()
                    .find(|v| !consumed.contains(*v))
                    .cloned()
                    .ok_or_else(|| PoolExhausted {
                        variable: definition.name.clone(),
                    })?;
                consumed.insert(value.clone());
                Ok(value)
            }
        }
    }
}

/// Values captured by correlations, private to one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionVariables {
    values: HashMap<String, String>,
}

impl SessionVariables {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Everything a virtual user mutates while it replays a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    pub allocation: AllocationState,
    pub variables: SessionVariables,
}

impl UserState {
    pub fn new(pool: &VariablePool) -> Self {
        Self {
            allocation: AllocationState::new(pool),
            variables: SessionVariables::default(),
        }
    }

    /// Borrows this state as a resolver over `pool`.
    pub fn resolver<'a>(&'a mut self, pool: &'a VariablePool) -> Resolver<'a> {
        Resolver {
            pool,
            allocation: &mut self.allocation,
            variables: &self.variables,
        }
    }
}

/// Resolves placeholder names for one user.
///
/// Names defined in the pool are allocated according to their policy. Any
/// other name is looked up in the session variables, and an unknown name
/// resolves to the empty string.
pub struct Resolver<'a> {
    pool: &'a VariablePool,
    allocation: &'a mut AllocationState,
    variables: &'a SessionVariables,
}

impl Resolver<'_> {
    pub fn resolve(&mut self, name: &str) -> Result<String, PoolExhausted> {
        match self.pool.get(name) {
            Some(definition) => self.allocation.allocate(definition),
            None => Ok(self.variables.get(name).unwrap_or_default().to_owned()),
        }
    }
}
