//! Conversation session: current state, variable store and turn signal

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Identifier of a node in the state graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StateId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for StateId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for StateId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Control signal for a single turn.
///
/// Not part of a [`Snapshot`]. `Idle` is the neutral value a session carries between
/// turns and after a restore; `Busy` is held only while a hook body runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSignal {
    #[default]
    Idle,
    Busy,
    /// Resolve the next edge within the same turn
    Continue,
    /// Suspend until the human replies
    AwaitInput,
    /// Suspend until a dispatched collaborator request returns
    AwaitCallback,
}

impl TurnSignal {
    /// Whether this signal ends the turn
    pub fn is_suspend(self) -> bool {
        matches!(self, Self::AwaitInput | Self::AwaitCallback)
    }

    /// Whether a hook is allowed to return this value
    pub fn is_hook_result(self) -> bool {
        matches!(self, Self::Continue | Self::AwaitInput | Self::AwaitCallback)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Continue => "continue",
            Self::AwaitInput => "await_input",
            Self::AwaitCallback => "await_callback",
        }
    }
}

impl fmt::Display for TurnSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by guards and hooks reading the variable store
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("variable `{name}` was never set")]
    MissingVariable { name: String },
    #[error("variable `{name}` is not a valid {expected}: {source}")]
    VariableType {
        name: String,
        expected: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Hook(String),
}

impl FlowError {
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

/// Per-conversation variable store.
///
/// Written only by hooks, read by guards and hooks. Reads of a name that was
/// never written fail with [`FlowError::MissingVariable`] instead of
/// defaulting.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, Value>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Serialize any value into the store
    pub fn set_json<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<(), FlowError> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|source| FlowError::VariableType {
            name: name.clone(),
            expected: std::any::type_name::<T>(),
            source,
        })?;
        self.0.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Read a variable that an earlier hook must have written
    pub fn require(&self, name: &str) -> Result<&Value, FlowError> {
        self.0.get(name).ok_or_else(|| FlowError::MissingVariable {
            name: name.to_string(),
        })
    }

    /// Read and deserialize a required variable
    pub fn require_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, FlowError> {
        let value = self.require(name)?;
        serde_json::from_value(value.clone()).map_err(|source| FlowError::VariableType {
            name: name.to_string(),
            expected: std::any::type_name::<T>(),
            source,
        })
    }

    pub fn require_bool(&self, name: &str) -> Result<bool, FlowError> {
        self.require_as(name)
    }

    pub fn require_str(&self, name: &str) -> Result<&str, FlowError> {
        match self.require(name)? {
            Value::String(s) => Ok(s),
            other => Err(FlowError::VariableType {
                name: name.to_string(),
                expected: "string",
                source: <serde_json::Error as serde::de::Error>::custom(format!(
                    "found {other}"
                )),
            }),
        }
    }

    /// Read an optional variable, failing only on a shape mismatch
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, FlowError> {
        if self.contains(name) {
            self.require_as(name).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// The externally persisted part of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: StateId,
    pub variables: Variables,
}

/// One conversation: current state, variable store and per-turn fields
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub state: StateId,
    pub variables: Variables,
    /// Input of the turn in progress; hooks may overwrite it to re-route
    /// guard evaluation for the next resolution
    pub input: Option<String>,
    pub signal: TurnSignal,
}

impl Session {
    /// Fresh session positioned at the graph's initial state
    pub fn new(initial: StateId) -> Self {
        Self {
            state: initial,
            variables: Variables::new(),
            input: None,
            signal: TurnSignal::Idle,
        }
    }

    pub fn save(&self) -> Snapshot {
        Snapshot {
            state: self.state.clone(),
            variables: self.variables.clone(),
        }
    }

    /// Rebuild a session from a snapshot. The signal is reset to neutral
    /// and the input cleared, since both are scoped to one turn.
    pub fn restore(snapshot: Snapshot) -> Self {
        Self {
            state: snapshot.state,
            variables: snapshot.variables,
            input: None,
            signal: TurnSignal::Idle,
        }
    }
}
