//! Hook runtime. Lifecycle management for every unit: load, resolve,
//! subscribe, unload, reload.
//!
//! `HookRuntime` is owned by the host's tick thread and every mutation
//! takes `&mut self`. Background threads reach it only through
//! [`HookRuntime::queue`].

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use hookhost_core::config::RuntimeConfig;
use hookhost_core::error::AppError;
use hookhost_core::result::AppResult;

use crate::hookable::{Hookable, HookableView, panic_message};
use crate::hooks::definitions::{HookArgs, HookCatalog, HookDefinition, HookValue};
use crate::hooks::dispatcher::HookDispatcher;
use crate::hooks::patch::{HotPatchHost, PatchDefinition, PatchFetcher, PatchSource};
use crate::hooks::registry::{SubscriptionRegistry, SubscriptionView};
use crate::loader::{
    Diagnostic, DependencyStall, FailedUnit, LoadResult, SourceUnit, StallReason, UnitCompiler,
    UnitLoader, discover_hooks,
};
use crate::packages::{PackageRegistry, PackageView};
use crate::resolver::{DependencyResolver, PendingRequiree, Resolution};
use crate::symbols::{HookId, SymbolPool};
use crate::tick::TickQueue;
use crate::unit::{Unit, UnitContext};
use crate::watcher::IgnoreList;

/// The hook-dispatch and unit-lifecycle runtime.
pub struct HookRuntime {
    config: RuntimeConfig,
    symbols: Arc<SymbolPool>,
    catalog: Arc<HookCatalog>,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: Arc<HookDispatcher>,
    loader: UnitLoader,
    resolver: DependencyResolver,
    packages: PackageRegistry,
    ignore: Arc<IgnoreList>,
    queue: Arc<TickQueue<HookRuntime>>,
}

impl std::fmt::Debug for HookRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRuntime")
            .field("packages", &self.packages.len())
            .field("hooks", &self.catalog.len())
            .field("queued", &self.queue.len())
            .finish()
    }
}

impl HookRuntime {
    /// Creates a runtime with an empty hook catalog.
    pub fn new(
        config: RuntimeConfig,
        host: Arc<dyn HotPatchHost>,
        compiler: Arc<dyn UnitCompiler>,
    ) -> Self {
        let symbols = Arc::new(SymbolPool::new());
        let catalog = Arc::new(HookCatalog::new());
        let subscriptions = Arc::new(SubscriptionRegistry::new(host, symbols.clone()));
        let dispatcher = Arc::new(HookDispatcher::new(
            symbols.clone(),
            subscriptions.clone(),
            catalog.clone(),
        ));
        dispatcher.set_profiling(config.profiling);
        let loader = UnitLoader::new(compiler, config.compile_timeout());

        info!(
            protocol = %config.protocol,
            compile_timeout_ms = config.compile_timeout_ms,
            profiling = config.profiling,
            "Hook runtime created"
        );

        Self {
            config,
            symbols,
            catalog,
            subscriptions,
            dispatcher,
            loader,
            resolver: DependencyResolver::new(),
            packages: PackageRegistry::new(),
            ignore: Arc::new(IgnoreList::new()),
            queue: Arc::new(TickQueue::new()),
        }
    }

    // ── Hooks ────────────────────────────────────────────────────────────

    /// Adds a hook to the catalog and subscribes live units that export it.
    pub fn define_hook(&mut self, definition: HookDefinition) -> AppResult<HookId> {
        let name = definition.name.clone();
        let patches = definition.patches.clone();
        let id = self.catalog.define(&self.symbols, definition);
        self.subscriptions.set_patches(id, patches)?;

        for hookable in self.packages.live_hookables() {
            let exports_hook = hookable.export_names().any(|export| export == name);
            if !exports_hook {
                continue;
            }
            hookable.declare(id);
            if !hookable.info().manual_subscriptions && !hookable.is_ignored(id) {
                if let Err(e) = self.subscriptions.subscribe(id, hookable.name()) {
                    error!(unit = %hookable.name(), hook = %name, error = %e, "Subscription failed");
                }
            }
        }

        debug!(hook = %name, hook_id = %id, "Hook defined");
        Ok(id)
    }

    /// Dispatches a hook by name.
    pub fn dispatch(&self, hook: &str, args: &mut HookArgs) -> Option<HookValue> {
        self.dispatcher.dispatch_named(hook, args)
    }

    /// Dispatches a hook by id.
    pub fn dispatch_id(&self, hook: HookId, args: &mut HookArgs) -> Option<HookValue> {
        self.dispatcher.dispatch(hook, args)
    }

    /// Dispatches a deprecated hook with a fallback to its replacement.
    pub fn dispatch_deprecated(
        &self,
        old: &str,
        new: &str,
        expiry: DateTime<Utc>,
        args: &mut HookArgs,
    ) -> Option<HookValue> {
        let old = self.symbols.intern(old);
        let new = self.symbols.intern(new);
        self.dispatcher.dispatch_deprecated(old, new, expiry, args)
    }

    /// Subscribes `subscriber` to `hook`.
    pub fn subscribe(&self, hook: &str, subscriber: &str) -> AppResult<()> {
        self.subscriptions
            .subscribe(self.symbols.intern(hook), subscriber)
    }

    /// Unsubscribes `subscriber` from `hook`.
    pub fn unsubscribe(&self, hook: &str, subscriber: &str) -> AppResult<()> {
        match self.symbols.lookup(hook) {
            Some(id) => self.subscriptions.unsubscribe(id, subscriber),
            None => Ok(()),
        }
    }

    /// Returns whether `hook` has any subscriber.
    pub fn is_subscribed(&self, hook: &str) -> bool {
        self.symbols
            .lookup(hook)
            .is_some_and(|id| self.subscriptions.is_subscribed(id))
    }

    /// Opts a unit out of a hook and drops its subscription.
    pub fn ignore_hook(&mut self, unit: &str, hook: &str) -> AppResult<()> {
        let hookable = self.require_unit(unit)?;
        let id = self.symbols.intern(hook);
        hookable.ignore(id);
        self.subscriptions.unsubscribe(id, unit)?;
        info!(unit = %unit, hook = %hook, "Hook ignored");
        Ok(())
    }

    /// Toggles profiling for every unit.
    pub fn set_profiling(&self, on: bool) {
        self.dispatcher.set_profiling(on);
    }

    /// Toggles profiling for one unit.
    pub fn set_unit_profiling(&self, unit: &str, on: bool) -> AppResult<()> {
        self.require_unit(unit)?.set_profiling(on);
        Ok(())
    }

    /// Toggles invocation logging for one hook of one unit.
    pub fn set_hook_debugging(&self, unit: &str, hook: &str, on: bool) -> AppResult<()> {
        let hookable = self.require_unit(unit)?;
        let id = self.symbols.intern(hook);
        if !hookable.set_debugging(id, on) {
            return Err(AppError::not_found(format!(
                "Unit '{unit}' does not handle hook '{hook}'"
            )));
        }
        Ok(())
    }

    /// Installs fetched hot-patch definitions, defining their hooks.
    pub fn apply_patch_catalog(&mut self, definitions: Vec<PatchDefinition>) {
        let mut by_hook: BTreeMap<String, Vec<_>> = BTreeMap::new();
        for definition in definitions {
            by_hook
                .entry(definition.hook)
                .or_default()
                .push(definition.descriptor);
        }

        for (hook, descriptors) in by_hook {
            let id = self.symbols.intern(&hook);
            let mut definition = self
                .catalog
                .get(id)
                .unwrap_or_else(|| HookDefinition::new(hook.clone()));
            definition.patches = descriptors;
            if let Err(e) = self.define_hook(definition) {
                error!(hook = %hook, error = %e, "Failed to apply hot-patch definitions");
            }
        }
    }

    /// A fetcher that delivers `source`'s catalog through the tick queue.
    pub fn patch_fetcher(&self, source: Arc<dyn PatchSource>) -> PatchFetcher {
        PatchFetcher::new(source, self.config.protocol.clone(), self.queue.clone())
    }

    // ── Units ────────────────────────────────────────────────────────────

    /// Loads (or reloads) every unit in `path`, clearing any ignore on it.
    pub fn load_unit(&mut self, path: impl AsRef<Path>) -> Vec<LoadResult> {
        let path = path.as_ref();
        self.ignore.clear(path);
        self.load_source(path)
    }

    /// Loads (or reloads) every unit in `path`.
    pub fn load_source(&mut self, path: &Path) -> Vec<LoadResult> {
        let results = self.load_path(path, None);
        self.publish();
        results
    }

    /// Unloads a unit and its dependents and ignores its source until it
    /// is loaded again. Unloading an absent unit is a no-op.
    pub fn unload_unit(&mut self, name: &str) -> Vec<String> {
        let Some(origin) = self.packages.find_unit(name).map(|h| h.origin().to_path_buf()) else {
            self.resolver.forget_waiter(name);
            return Vec::new();
        };

        self.ignore.add(&origin);
        let unloaded = self.unload_cascade(name, None);
        self.publish();
        unloaded
    }

    /// Recompiles the source of a loaded or waiting unit.
    pub fn reload_unit(&mut self, name: &str) -> AppResult<Vec<LoadResult>> {
        let origin = self
            .packages
            .find_unit(name)
            .map(|h| h.origin().to_path_buf())
            .or_else(|| {
                self.resolver
                    .pending()
                    .into_iter()
                    .find(|e| e.waiter == name)
                    .map(|e| e.origin)
            })
            .ok_or_else(|| AppError::not_found(format!("Unit '{name}' is not loaded")))?;

        Ok(self.load_source(&origin))
    }

    /// Unloads every unit of a source that no longer exists and forgets it.
    pub fn unload_source(&mut self, path: &Path) -> Vec<String> {
        let unloaded = self.drop_package(path);
        self.resolver.forget_origin(path);
        self.packages.clear_failure(path);
        self.publish();
        unloaded
    }

    /// Removes a package, unloading anything it still holds.
    pub fn remove_package(&mut self, path: &Path) -> AppResult<Vec<String>> {
        if !self.packages.contains(path) {
            return Err(AppError::not_found(format!(
                "Package '{}' is not registered",
                path.display()
            )));
        }
        let unloaded = self.drop_package(path);
        self.resolver.forget_origin(path);
        self.packages.clear_failure(path);
        self.publish();
        Ok(unloaded)
    }

    /// Stops file events for `path` from loading it.
    pub fn ignore(&self, path: &Path) {
        self.ignore.add(path);
    }

    /// Reverses [`HookRuntime::ignore`].
    pub fn clear_ignore(&self, path: &Path) {
        self.ignore.clear(path);
    }

    /// Returns whether `path` is ignored.
    pub fn is_ignored(&self, path: &Path) -> bool {
        self.ignore.contains(path)
    }

    /// Runs everything background threads queued since the last tick.
    pub fn tick(&mut self) -> usize {
        let queue = self.queue.clone();
        queue.drain(self)
    }

    /// Unloads every unit, dependents first.
    pub fn shutdown(&mut self) {
        let names: Vec<String> = self
            .packages
            .live_hookables()
            .iter()
            .rev()
            .map(|h| h.name().to_string())
            .collect();
        for name in names {
            self.unload_cascade(&name, None);
        }
        self.resolver = DependencyResolver::new();
        self.publish();
        info!("All units unloaded");
    }

    // ── Views ────────────────────────────────────────────────────────────

    /// Loaded packages with their units.
    pub fn packages(&self) -> Vec<PackageView> {
        self.packages.views()
    }

    /// Failed sources with diagnostics.
    pub fn failed_units(&self) -> Vec<FailedUnit> {
        self.packages.failures()
    }

    /// Units waiting for dependencies.
    pub fn pending_requirees(&self) -> Vec<PendingRequiree> {
        self.resolver.pending()
    }

    /// Counters of one live unit.
    pub fn unit(&self, name: &str) -> Option<HookableView> {
        self.packages.find_unit(name).map(|h| h.view())
    }

    /// Subscription table.
    pub fn subscriptions(&self) -> Vec<SubscriptionView> {
        self.subscriptions.snapshot()
    }

    /// Names of the known hooks, sorted.
    pub fn hooks(&self) -> Vec<String> {
        self.catalog.names()
    }

    // ── Shared handles ───────────────────────────────────────────────────

    /// Dispatcher handle usable from any thread.
    pub fn dispatcher(&self) -> Arc<HookDispatcher> {
        self.dispatcher.clone()
    }

    /// Queue for handing work to the tick thread.
    pub fn queue(&self) -> Arc<TickQueue<HookRuntime>> {
        self.queue.clone()
    }

    /// Ignore set shared with the change processor.
    pub fn ignore_list(&self) -> Arc<IgnoreList> {
        self.ignore.clone()
    }

    /// Symbol pool.
    pub fn symbols(&self) -> Arc<SymbolPool> {
        self.symbols.clone()
    }

    /// Whether the configured compiler handles `path`.
    pub fn accepts(&self, path: &Path) -> bool {
        self.loader.accepts(path)
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn require_unit(&self, name: &str) -> AppResult<Arc<Hookable>> {
        self.packages
            .find_unit(name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Unit '{name}' is not loaded")))
    }

    fn publish(&self) {
        self.dispatcher.publish(self.packages.live_hookables());
    }

    /// Compiles `path` and activates its units. With `only`, activates just
    /// those names and leaves the rest of the package alone.
    fn load_path(&mut self, path: &Path, only: Option<&BTreeSet<String>>) -> Vec<LoadResult> {
        let source = SourceUnit::new(path);
        let compiled = match self.loader.compile(&source) {
            Ok(compiled) => compiled,
            Err(failed) => {
                for diagnostic in &failed.errors {
                    warn!(origin = %path.display(), diagnostic = %diagnostic, "Compile error");
                }
                self.packages.set_valid(path, false);
                self.packages.record_failure(failed.clone());
                return vec![LoadResult::Failed(failed)];
            }
        };

        self.packages.clear_failure(path);

        let units: Vec<Arc<dyn Unit>> = compiled
            .units
            .into_iter()
            .filter(|u| only.is_none_or(|names| names.contains(&u.info().name)))
            .collect();

        if only.is_none() {
            self.resolver.forget_origin(path);
            for name in self.packages.unit_names(path) {
                self.unload_cascade(&name, None);
            }
        }

        self.packages.ensure(path, &compiled.package).valid = true;

        let mut results = Vec::new();
        let mut ready = Vec::new();
        for unit in units {
            let result = self.activate(unit, path, &compiled.package);
            if let LoadResult::Ready(view) = &result {
                ready.push(view.info.name.clone());
            }
            results.push(result);
        }

        for name in ready {
            results.extend(self.retry_waiters(&name));
        }

        results
    }

    fn activate(&mut self, unit: Arc<dyn Unit>, origin: &Path, package: &str) -> LoadResult {
        let info = unit.info();
        let name = info.name.clone();

        if let Some(existing) = self.packages.find_unit(&name) {
            if existing.origin() == origin {
                return LoadResult::Ready(existing.view());
            }
            let failed = FailedUnit::new(
                origin,
                vec![Diagnostic::error(
                    "duplicate-unit",
                    format!(
                        "Unit '{name}' is already loaded from '{}'",
                        existing.origin().display()
                    ),
                )],
            );
            warn!(unit = %name, origin = %origin.display(), "Unit name already in use");
            self.packages.record_failure(failed.clone());
            return LoadResult::Failed(failed);
        }

        let packages = &self.packages;
        let resolution = self.resolver.resolve(&name, origin, &unit.references(), |dep| {
            packages.find_unit(dep).cloned()
        });

        let references = match resolution {
            Resolution::Bound(references) => references,
            Resolution::Stalled(reason) => {
                info!(unit = %name, reason = %reason, "Unit activation deferred");
                return LoadResult::Unresolved(DependencyStall {
                    unit: name,
                    origin: origin.to_path_buf(),
                    reason,
                });
            }
            Resolution::Cycle { members, dropped } => {
                let reason = StallReason::Cycle { members };
                let diagnostic = Diagnostic::error("dependency-cycle", reason.to_string());
                let mut origins: BTreeSet<PathBuf> = dropped.into_iter().map(|e| e.origin).collect();
                origins.insert(origin.to_path_buf());
                for failed_origin in origins {
                    self.packages
                        .record_failure(FailedUnit::new(failed_origin, vec![diagnostic.clone()]));
                }
                return LoadResult::Unresolved(DependencyStall {
                    unit: name,
                    origin: origin.to_path_buf(),
                    reason,
                });
            }
        };

        let declared = discover_hooks(unit.as_ref(), &self.catalog, &self.symbols);
        let hookable = Arc::new(Hookable::new(
            unit.clone(),
            package,
            origin,
            declared.clone(),
            self.symbols.clone(),
        ));

        let context = UnitContext::new(
            name.clone(),
            self.subscriptions.clone(),
            self.symbols.clone(),
            references,
        );
        let init = catch_unwind(AssertUnwindSafe(|| unit.on_init(&context)))
            .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(payload.as_ref()))));
        if let Err(e) = init {
            error!(unit = %name, error = %e, "Unit initialisation failed");
            self.subscriptions.unsubscribe_all(&name);
            self.resolver.unlink(&name);
            hookable.dispose();
            let failed = FailedUnit::new(
                origin,
                vec![Diagnostic::error("init-failed", format!("{name}: {e}"))],
            );
            self.packages.record_failure(failed.clone());
            return LoadResult::Failed(failed);
        }
        hookable.mark_initialized();

        for hook in declared.iter().filter(|id| !hookable.is_ignored(**id)) {
            if let Err(e) = self.subscriptions.subscribe(*hook, &name) {
                error!(
                    unit = %name,
                    hook = %self.symbols.display_name(*hook),
                    hook_id = %hook,
                    error = %e,
                    "Subscription failed"
                );
            }
        }

        hookable.mark_loaded();
        self.packages.insert(origin, package, hookable.clone());

        info!(
            unit = %name,
            version = %info.version,
            package = %package,
            hooks = declared.len(),
            "Unit loaded"
        );

        LoadResult::Ready(hookable.view())
    }

    fn retry_waiters(&mut self, dependency: &str) -> Vec<LoadResult> {
        let mut by_origin: BTreeMap<PathBuf, BTreeSet<String>> = BTreeMap::new();
        for edge in self.resolver.take_waiters(dependency) {
            by_origin.entry(edge.origin).or_default().insert(edge.waiter);
        }

        let mut results = Vec::new();
        for (origin, names) in by_origin {
            info!(dependency = %dependency, origin = %origin.display(), units = ?names, "Retrying waiting units");
            results.extend(self.load_path(&origin, Some(&names)));
        }
        results
    }

    /// Unloads `name` and, first, everything that requires it. Dependents
    /// are parked on `name` so they return with it.
    fn unload_cascade(&mut self, name: &str, cause: Option<&str>) -> Vec<String> {
        let Some(hookable) = self.packages.take_unit(name) else {
            return Vec::new();
        };

        let dependents = self.resolver.dependents_of(name);
        self.resolver.unlink(name);

        let mut unloaded = Vec::new();
        for dependent in dependents {
            unloaded.extend(self.unload_cascade(&dependent, Some(name)));
        }

        if let Some(dependency) = cause {
            self.resolver
                .push_pending(dependency, name, hookable.origin());
        }

        self.teardown(&hookable);
        unloaded.push(name.to_string());
        unloaded
    }

    fn teardown(&self, hookable: &Hookable) {
        let name = hookable.name();
        let unload = catch_unwind(AssertUnwindSafe(|| hookable.unit().on_unload()))
            .unwrap_or_else(|payload| Err(format!("panicked: {}", panic_message(payload.as_ref()))));
        if let Err(e) = unload {
            warn!(unit = %name, error = %e, "Unit teardown returned error");
        }

        let hooks = self.subscriptions.unsubscribe_all(name);
        hookable.dispose();
        info!(unit = %name, hooks = hooks.len(), "Unit unloaded");
    }

    fn drop_package(&mut self, path: &Path) -> Vec<String> {
        let mut unloaded = Vec::new();
        for name in self.packages.unit_names(path) {
            unloaded.extend(self.unload_cascade(&name, None));
        }
        self.packages.remove(path);
        unloaded
    }
}
