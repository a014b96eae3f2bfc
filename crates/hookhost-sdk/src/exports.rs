//! Builder for assembling a unit's export map incrementally.

use std::sync::Arc;

use semver::Version;

use hookhost_runtime::hooks::HookValue;
use hookhost_runtime::traits::{FnHandler, FnRefHandler};
use hookhost_runtime::unit::{
    HookExport, HookReturn, Unit, UnitContext, UnitInfo, UnitReference,
};

use crate::simple::SimpleUnit;

/// Builder for a [`SimpleUnit`].
#[derive(Debug)]
pub struct UnitExportBuilder {
    unit: SimpleUnit,
}

impl UnitExportBuilder {
    /// Starts a unit with the given identity.
    pub fn new(info: UnitInfo) -> Self {
        Self {
            unit: SimpleUnit {
                info,
                references: Vec::new(),
                exports: Vec::new(),
                ignored: Vec::new(),
                on_init: None,
                on_unload: None,
            },
        }
    }

    /// Declares a required reference.
    pub fn requires(mut self, name: &str) -> Self {
        self.unit.references.push(UnitReference::required(name));
        self
    }

    /// Declares a required reference with a minimum version.
    pub fn requires_at_least(mut self, name: &str, version: Version) -> Self {
        self.unit
            .references
            .push(UnitReference::required(name).at_least(version));
        self
    }

    /// Declares an optional reference.
    pub fn optional(mut self, name: &str) -> Self {
        self.unit.references.push(UnitReference::optional(name));
        self
    }

    /// Handles a hook (or exposes a method) with a closure.
    pub fn on<F>(self, hook: &str, handler: F) -> Self
    where
        F: Fn(&[HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        self.export(HookExport::new(hook, FnHandler::wrap(handler)))
    }

    /// Handles a hook with a closure that may rewrite by-ref arguments.
    pub fn on_ref<F>(self, hook: &str, handler: F) -> Self
    where
        F: Fn(&mut [HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        self.export(HookExport::new(hook, FnRefHandler::wrap(handler)).by_ref())
    }

    /// Handles a hook off the dispatching thread.
    pub fn on_async<F>(self, hook: &str, handler: F) -> Self
    where
        F: Fn(&[HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        self.export(HookExport::new(hook, FnHandler::wrap(handler)).asynchronous())
    }

    /// Adds a prepared export (overloads, arity restrictions).
    pub fn export(mut self, export: HookExport) -> Self {
        self.unit.exports.push(export);
        self
    }

    /// Opts out of a hook.
    pub fn ignore(mut self, hook: &str) -> Self {
        self.unit.ignored.push(hook.to_string());
        self
    }

    /// Runs `init` once references are bound.
    pub fn init<F>(mut self, init: F) -> Self
    where
        F: Fn(&UnitContext) -> Result<(), String> + Send + Sync + 'static,
    {
        self.unit.on_init = Some(Arc::new(init));
        self
    }

    /// Runs `unload` when the unit is torn down.
    pub fn unload<F>(mut self, unload: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.unit.on_unload = Some(Arc::new(unload));
        self
    }

    /// Builds the unit.
    pub fn build(self) -> SimpleUnit {
        self.unit
    }

    /// Builds the unit behind an `Arc<dyn Unit>`.
    pub fn build_arc(self) -> Arc<dyn Unit> {
        Arc::new(self.unit)
    }
}
