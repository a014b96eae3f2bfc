//! Hook argument/value types and the catalog of known hooks.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::hooks::patch::PatchDescriptor;
use crate::symbols::{HookId, SymbolPool};

/// Tagged value passed to and returned from hook handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HookValue {
    /// Absent / no opinion.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Structured data.
    Json(serde_json::Value),
    /// Opaque reference to a host-owned object.
    Handle(u64),
}

impl HookValue {
    /// Returns whether this value is the neutral "no result" value.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the float payload, widening integers.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the handle payload, if any.
    pub fn as_handle(&self) -> Option<u64> {
        match self {
            Self::Handle(h) => Some(*h),
            _ => None,
        }
    }
}

impl fmt::Display for HookValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Handle(h) => write!(f, "#{h}"),
        }
    }
}

impl From<bool> for HookValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for HookValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for HookValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for HookValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for HookValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HookValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<serde_json::Value> for HookValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<toml::Value> for HookValue {
    fn from(value: toml::Value) -> Self {
        match value {
            toml::Value::Boolean(b) => Self::Bool(b),
            toml::Value::Integer(i) => Self::Int(i),
            toml::Value::Float(x) => Self::Float(x),
            toml::Value::String(s) => Self::Str(s),
            other => serde_json::to_value(other)
                .map(Self::Json)
                .unwrap_or(Self::Null),
        }
    }
}

/// Direction marker for a hook parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgMode {
    /// Read-only input.
    In,
    /// By-ref parameter: handlers may overwrite it and the caller reads it back.
    InOut,
}

/// Arguments for one hook occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookArgs {
    values: Vec<HookValue>,
    modes: Vec<ArgMode>,
}

impl HookArgs {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an input argument.
    pub fn with(mut self, value: impl Into<HookValue>) -> Self {
        self.push(value.into(), ArgMode::In);
        self
    }

    /// Appends a by-ref argument.
    pub fn with_ref(mut self, value: impl Into<HookValue>) -> Self {
        self.push(value.into(), ArgMode::InOut);
        self
    }

    /// Appends an argument with an explicit mode.
    pub fn push(&mut self, value: HookValue, mode: ArgMode) {
        self.values.push(value);
        self.modes.push(mode);
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns whether there are no arguments.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns an argument by position.
    pub fn get(&self, index: usize) -> Option<&HookValue> {
        self.values.get(index)
    }

    /// Returns the mode of an argument by position.
    pub fn mode(&self, index: usize) -> Option<ArgMode> {
        self.modes.get(index).copied()
    }

    /// All argument values in order.
    pub fn values(&self) -> &[HookValue] {
        &self.values
    }

    /// Returns whether any parameter is by-ref.
    pub fn has_refs(&self) -> bool {
        self.modes.contains(&ArgMode::InOut)
    }

    /// Copies the by-ref slots of `buffer` back into this argument list.
    pub(crate) fn write_back(&mut self, buffer: &[HookValue]) {
        for (index, mode) in self.modes.iter().enumerate() {
            if *mode == ArgMode::InOut {
                if let Some(value) = buffer.get(index) {
                    self.values[index] = value.clone();
                }
            }
        }
    }
}

/// How a dispatch combines handler results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// The first non-null value wins and stops further handlers.
    #[default]
    FirstNonNull,
    /// Every handler runs; the last non-null value wins.
    Aggregate,
}

/// A hook the host knows how to raise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    /// Hook name as exported by units.
    pub name: String,
    /// Result combination policy.
    #[serde(default)]
    pub policy: ResultPolicy,
    /// Host entry points that must be patched while the hook has subscribers.
    #[serde(default)]
    pub patches: Vec<PatchDescriptor>,
}

impl HookDefinition {
    /// Creates a short-circuiting definition with no patch points.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: ResultPolicy::FirstNonNull,
            patches: Vec::new(),
        }
    }

    /// Sets the result policy.
    pub fn with_policy(mut self, policy: ResultPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Adds a patch point.
    pub fn with_patch(mut self, descriptor: PatchDescriptor) -> Self {
        self.patches.push(descriptor);
        self
    }
}

/// Catalog of known hooks: the universe hook discovery matches against.
#[derive(Debug, Default)]
pub struct HookCatalog {
    definitions: RwLock<HashMap<HookId, HookDefinition>>,
}

impl HookCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a definition and returns its id.
    pub fn define(&self, symbols: &SymbolPool, definition: HookDefinition) -> HookId {
        let id = symbols.intern(&definition.name);
        self.definitions.write().insert(id, definition);
        id
    }

    /// Returns whether `id` names a known hook.
    pub fn contains(&self, id: HookId) -> bool {
        self.definitions.read().contains_key(&id)
    }

    /// Result policy of a hook; unknown hooks short-circuit.
    pub fn policy(&self, id: HookId) -> ResultPolicy {
        self.definitions
            .read()
            .get(&id)
            .map(|d| d.policy)
            .unwrap_or_default()
    }

    /// Returns a copy of a definition.
    pub fn get(&self, id: HookId) -> Option<HookDefinition> {
        self.definitions.read().get(&id).cloned()
    }

    /// Number of known hooks.
    pub fn len(&self) -> usize {
        self.definitions.read().len()
    }

    /// Returns whether no hooks are defined.
    pub fn is_empty(&self) -> bool {
        self.definitions.read().is_empty()
    }

    /// Names of all known hooks, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .definitions
            .read()
            .values()
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }
}
