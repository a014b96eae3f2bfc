//! Dispatch engine.
//!
//! Dispatch reads an immutable snapshot of the live hookables, so a
//! hook call never takes a registry-wide lock and a concurrent reload
//! only becomes visible to the next call.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::definitions::{HookArgs, HookCatalog, HookValue, ResultPolicy};
use super::pool::ArgPool;
use super::registry::SubscriptionRegistry;
use crate::hookable::{CachedHook, Hookable, invoke};
use crate::memory;
use crate::symbols::{HookId, SymbolPool};

/// Calls every interested hookable for one hook occurrence.
pub struct HookDispatcher {
    symbols: Arc<SymbolPool>,
    subscriptions: Arc<SubscriptionRegistry>,
    catalog: Arc<HookCatalog>,
    live: ArcSwap<Vec<Arc<Hookable>>>,
    pool: ArgPool,
    profiling: AtomicBool,
    deprecation_warnings: Mutex<HashSet<(HookId, DateTime<Utc>)>>,
}

impl std::fmt::Debug for HookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDispatcher")
            .field("live", &self.live.load().len())
            .field("profiling", &self.is_profiling())
            .finish()
    }
}

impl HookDispatcher {
    /// Creates a dispatcher with no live hookables.
    pub fn new(
        symbols: Arc<SymbolPool>,
        subscriptions: Arc<SubscriptionRegistry>,
        catalog: Arc<HookCatalog>,
    ) -> Self {
        Self {
            symbols,
            subscriptions,
            catalog,
            live: ArcSwap::from_pointee(Vec::new()),
            pool: ArgPool::default(),
            profiling: AtomicBool::new(true),
            deprecation_warnings: Mutex::new(HashSet::new()),
        }
    }

    /// Replaces the dispatch snapshot. Order is dispatch order.
    pub fn publish(&self, hookables: Vec<Arc<Hookable>>) {
        self.live.store(Arc::new(hookables));
    }

    /// The current dispatch snapshot.
    pub fn live(&self) -> Arc<Vec<Arc<Hookable>>> {
        self.live.load_full()
    }

    /// Toggles profiling for every unit.
    pub fn set_profiling(&self, on: bool) {
        self.profiling.store(on, Ordering::Relaxed);
    }

    /// Whether profiling is globally enabled.
    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Dispatches `hook` to every subscribed hookable.
    ///
    /// Returns the combined result according to the hook's policy, or
    /// `None` when no handler produced a value.
    pub fn dispatch(&self, hook: HookId, args: &mut HookArgs) -> Option<HookValue> {
        let subscribers = self.subscriptions.subscribers(hook)?;
        let policy = self.catalog.policy(hook);
        let snapshot = self.live.load();
        let mut result = None;

        for hookable in snapshot.iter() {
            if !subscribers.contains(hookable.name()) || !hookable.is_loaded() {
                continue;
            }
            let Some(variants) = hookable.cached_hooks(hook) else {
                continue;
            };

            for cached in variants.iter() {
                if !cached.export.accepts(args.len()) {
                    continue;
                }

                if cached.export.is_async {
                    self.spawn_async(hookable, hook, cached, args);
                    continue;
                }

                if let Some(value) = self.call_one(hookable, hook, cached, args) {
                    match policy {
                        ResultPolicy::FirstNonNull => return Some(value),
                        ResultPolicy::Aggregate => result = Some(value),
                    }
                }
            }
        }

        result
    }

    /// Dispatches by name. Unknown names dispatch to nobody.
    pub fn dispatch_named(&self, hook: &str, args: &mut HookArgs) -> Option<HookValue> {
        let id = self.symbols.lookup(hook)?;
        self.dispatch(id, args)
    }

    /// Dispatches a deprecated hook, then its replacement if the old hook
    /// produced nothing.
    ///
    /// Units still subscribed to `old` trigger a warning. Before `expiry`
    /// the warning is logged once per (hook, expiry); afterwards every call
    /// warns.
    pub fn dispatch_deprecated(
        &self,
        old: HookId,
        new: HookId,
        expiry: DateTime<Utc>,
        args: &mut HookArgs,
    ) -> Option<HookValue> {
        if let Some(subscribers) = self.subscriptions.subscribers(old) {
            let first = self.deprecation_warnings.lock().insert((old, expiry));
            if first || Utc::now() > expiry {
                warn!(
                    hook = %self.symbols.display_name(old),
                    hook_id = %old,
                    replacement = %self.symbols.display_name(new),
                    expiry = %expiry.format("%Y-%m-%d"),
                    units = ?subscribers,
                    "Deprecated hook is still in use"
                );
            }
            if let Some(value) = self.dispatch(old, args) {
                return Some(value);
            }
        }
        self.dispatch(new, args)
    }

    fn call_one(
        &self,
        hookable: &Hookable,
        hook: HookId,
        cached: &CachedHook,
        args: &mut HookArgs,
    ) -> Option<HookValue> {
        let profiling = self.is_profiling() && hookable.is_profiling();
        let started = profiling.then(|| (Instant::now(), memory::thread_allocated()));

        let outcome = invoke(&cached.export, args, Some(&self.pool));

        if let Some((at, allocated)) = started {
            let elapsed = at.elapsed();
            let delta = memory::thread_allocated().saturating_sub(allocated);
            cached.stats.record(elapsed, delta);
            hookable.totals().record(elapsed, delta);
        }

        match outcome {
            Ok(value) => {
                if cached.stats.is_debugging() {
                    debug!(
                        unit = %hookable.name(),
                        hook = %self.symbols.display_name(hook),
                        hook_id = %hook,
                        args = ?args.values(),
                        result = %value,
                        "Hook invoked"
                    );
                }
                (!value.is_null()).then_some(value)
            }
            Err(fault) => {
                cached.stats.record_fault();
                hookable.totals().record_fault();
                warn!(
                    unit = %hookable.name(),
                    hook = %self.symbols.display_name(hook),
                    hook_id = %hook,
                    error = %fault,
                    "Hook handler failed"
                );
                None
            }
        }
    }

    fn spawn_async(&self, hookable: &Hookable, hook: HookId, cached: &CachedHook, args: &HookArgs) {
        let export = cached.export.clone();
        let stats = cached.stats.clone();
        let totals = hookable.totals().clone();
        let profiling = self.is_profiling() && hookable.is_profiling();
        let mut args = args.clone();
        let unit = hookable.name().to_string();
        let hook_name = self.symbols.display_name(hook);

        let mut task = move || {
            let started = profiling.then(|| (Instant::now(), memory::thread_allocated()));
            let outcome = invoke(&export, &mut args, None);

            if let Some((at, allocated)) = started {
                let elapsed = at.elapsed();
                let delta = memory::thread_allocated().saturating_sub(allocated);
                stats.record(elapsed, delta);
                totals.record(elapsed, delta);
            }

            if let Err(fault) = outcome {
                stats.record_fault();
                totals.record_fault();
                warn!(unit = %unit, hook = %hook_name, hook_id = %hook, error = %fault, "Async hook handler failed");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => task(),
        }
    }
}
