//! The unit contract: what a compiled plugin or module exposes to the
//! runtime, and what the runtime hands back to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use hookhost_core::result::AppResult;

use crate::hookable::Hookable;
use crate::hooks::definitions::{HookArgs, HookValue};
use crate::hooks::registry::SubscriptionRegistry;
use crate::symbols::SymbolPool;

/// Identity of a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitInfo {
    /// Unique unit name.
    pub name: String,
    /// Unit version.
    pub version: Version,
    /// Author or maintainer.
    pub author: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Core units ship with the host.
    #[serde(default)]
    pub is_core: bool,
    /// Opt out of automatic hook discovery; the unit subscribes itself.
    #[serde(default)]
    pub manual_subscriptions: bool,
}

impl UnitInfo {
    /// Creates an info record with empty author/description.
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            author: String::new(),
            description: String::new(),
            is_core: false,
            manual_subscriptions: false,
        }
    }
}

/// A declared dependency on another unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReference {
    /// Name of the referenced unit.
    pub name: String,
    /// Required references block activation until present.
    #[serde(default)]
    pub required: bool,
    /// Lowest acceptable version of the referenced unit.
    #[serde(default)]
    pub min_version: Option<Version>,
}

impl UnitReference {
    /// A required reference without a version constraint.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            min_version: None,
        }
    }

    /// An optional reference without a version constraint.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            min_version: None,
        }
    }

    /// Adds a minimum version.
    pub fn at_least(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }
}

/// Failure raised by a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HookFault {
    /// The handler reported an error.
    #[error("{0}")]
    Failed(String),
    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HookFault {
    /// Convenience constructor for handler errors.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Result of one handler invocation.
pub type HookReturn = Result<HookValue, HookFault>;

/// A callable exported by a unit.
pub trait HookHandler: Send + Sync {
    /// Invokes the handler with read-only arguments.
    fn call(&self, args: &[HookValue]) -> HookReturn;

    /// Invokes a by-ref variant; writes to `args` are copied back into the
    /// caller's by-ref parameters.
    fn call_by_ref(&self, args: &mut [HookValue]) -> HookReturn {
        self.call(args)
    }
}

/// One exported variant of a hook or method.
#[derive(Clone)]
pub struct HookExport {
    /// Hook or method name.
    pub name: String,
    /// The callable.
    pub handler: Arc<dyn HookHandler>,
    /// Receives by-ref parameters.
    pub by_ref: bool,
    /// Runs detached from the dispatching thread.
    pub is_async: bool,
    /// Only invoked when the argument count matches.
    pub arity: Option<usize>,
}

impl fmt::Debug for HookExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookExport")
            .field("name", &self.name)
            .field("by_ref", &self.by_ref)
            .field("is_async", &self.is_async)
            .field("arity", &self.arity)
            .finish()
    }
}

impl HookExport {
    /// A plain synchronous export.
    pub fn new(name: impl Into<String>, handler: Arc<dyn HookHandler>) -> Self {
        Self {
            name: name.into(),
            handler,
            by_ref: false,
            is_async: false,
            arity: None,
        }
    }

    /// Marks the export as a by-ref variant.
    pub fn by_ref(mut self) -> Self {
        self.by_ref = true;
        self
    }

    /// Marks the export as asynchronous.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Restricts the export to calls with exactly `arity` arguments.
    pub fn with_arity(mut self, arity: usize) -> Self {
        self.arity = Some(arity);
        self
    }

    /// Returns whether this variant accepts `count` arguments.
    pub fn accepts(&self, count: usize) -> bool {
        self.arity.is_none_or(|arity| arity == count)
    }
}

/// A compiled plugin or module.
pub trait Unit: Send + Sync {
    /// Identity of the unit.
    fn info(&self) -> UnitInfo;

    /// References to other units.
    fn references(&self) -> Vec<UnitReference> {
        Vec::new()
    }

    /// Declaration map of everything the unit exports, hooks and plain
    /// methods alike. Read once at load time.
    fn exports(&self) -> Vec<HookExport>;

    /// Hook names the unit never wants to be called for.
    fn ignored_hooks(&self) -> Vec<String> {
        Vec::new()
    }

    /// Called once after references are bound, before hooks are subscribed.
    fn on_init(&self, _ctx: &UnitContext) -> Result<(), String> {
        Ok(())
    }

    /// Teardown hook, called when the unit is unloaded.
    fn on_unload(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Weak handle to another loaded unit.
#[derive(Clone)]
pub struct UnitRef {
    name: String,
    target: Weak<Hookable>,
}

impl fmt::Debug for UnitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitRef")
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl UnitRef {
    pub(crate) fn new(target: &Arc<Hookable>) -> Self {
        Self {
            name: target.name().to_string(),
            target: Arc::downgrade(target),
        }
    }

    /// Referenced unit name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns whether the referenced unit is still loaded.
    pub fn is_alive(&self) -> bool {
        self.target.upgrade().is_some_and(|h| h.is_loaded())
    }

    /// Version of the referenced unit, while it is alive.
    pub fn version(&self) -> Option<Version> {
        self.target
            .upgrade()
            .filter(|h| h.is_loaded())
            .map(|h| h.info().version.clone())
    }

    /// Calls an exported method of the referenced unit.
    ///
    /// Returns `None` when the unit is gone, has no such export, or the
    /// call faulted.
    pub fn call(&self, method: &str, args: &mut HookArgs) -> Option<HookValue> {
        let target = self.target.upgrade().filter(|h| h.is_loaded())?;
        target.call_export(method, args)
    }
}

/// Runtime services handed to a unit during `on_init`.
#[derive(Clone)]
pub struct UnitContext {
    unit: String,
    subscriptions: Arc<SubscriptionRegistry>,
    symbols: Arc<SymbolPool>,
    references: HashMap<String, Option<UnitRef>>,
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit", &self.unit)
            .field("references", &self.references)
            .finish()
    }
}

impl UnitContext {
    pub(crate) fn new(
        unit: impl Into<String>,
        subscriptions: Arc<SubscriptionRegistry>,
        symbols: Arc<SymbolPool>,
        references: HashMap<String, Option<UnitRef>>,
    ) -> Self {
        Self {
            unit: unit.into(),
            subscriptions,
            symbols,
            references,
        }
    }

    /// Name of the unit this context belongs to.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// A bound reference. `None` when the reference was not declared or
    /// an optional reference was absent at activation.
    pub fn reference(&self, name: &str) -> Option<&UnitRef> {
        self.references.get(name).and_then(|r| r.as_ref())
    }

    /// Subscribes this unit to a hook by name.
    pub fn subscribe(&self, hook: &str) -> AppResult<()> {
        let id = self.symbols.intern(hook);
        self.subscriptions.subscribe(id, &self.unit)
    }

    /// Unsubscribes this unit from a hook by name.
    pub fn unsubscribe(&self, hook: &str) -> AppResult<()> {
        match self.symbols.lookup(hook) {
            Some(id) => self.subscriptions.unsubscribe(id, &self.unit),
            None => {
                warn!(unit = %self.unit, hook = %hook, "Unsubscribe from unknown hook");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl HookHandler for Noop {
        fn call(&self, _args: &[HookValue]) -> HookReturn {
            Ok(HookValue::Null)
        }
    }

    #[test]
    fn test_arity_filter() {
        let export = HookExport::new("OnChat", Arc::new(Noop)).with_arity(2);
        assert!(export.accepts(2));
        assert!(!export.accepts(1));
        assert!(HookExport::new("OnChat", Arc::new(Noop)).accepts(7));
    }

    #[test]
    fn test_default_by_ref_delegates_to_call() {
        let mut args = vec![HookValue::Int(1)];
        assert_eq!(Noop.call_by_ref(&mut args), Ok(HookValue::Null));
    }
}
