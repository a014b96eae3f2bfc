//! Hookable: one loaded unit plus its lazily built hook cache and counters.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::hooks::definitions::{HookArgs, HookValue};
use crate::hooks::pool::ArgPool;
use crate::symbols::{HookId, SymbolPool};
use crate::unit::{HookExport, HookFault, HookReturn, Unit, UnitInfo};

/// Live counters for one hook (or one unit in aggregate).
#[derive(Debug, Default)]
pub struct HookStats {
    fires: AtomicU64,
    nanos: AtomicU64,
    memory: AtomicU64,
    faults: AtomicU64,
    debugging: AtomicBool,
}

impl HookStats {
    /// Records one profiled invocation.
    pub fn record(&self, elapsed: Duration, memory: u64) {
        self.fires.fetch_add(1, Ordering::Relaxed);
        self.nanos
            .fetch_add(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::Relaxed);
        self.memory.fetch_add(memory, Ordering::Relaxed);
    }

    /// Records one fault.
    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Times fired.
    pub fn fires(&self) -> u64 {
        self.fires.load(Ordering::Relaxed)
    }

    /// Cumulative time.
    pub fn total_time(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    /// Cumulative bytes allocated.
    pub fn total_memory(&self) -> u64 {
        self.memory.load(Ordering::Relaxed)
    }

    /// Faults raised.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Whether invocations are logged.
    pub fn is_debugging(&self) -> bool {
        self.debugging.load(Ordering::Relaxed)
    }

    /// Toggles invocation logging.
    pub fn set_debugging(&self, on: bool) {
        self.debugging.store(on, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.fires.store(0, Ordering::Relaxed);
        self.nanos.store(0, Ordering::Relaxed);
        self.memory.store(0, Ordering::Relaxed);
        self.faults.store(0, Ordering::Relaxed);
    }
}

/// One cached handler variant for a hook.
#[derive(Debug, Clone)]
pub struct CachedHook {
    /// The exported variant.
    pub export: HookExport,
    /// Counters attributed to this variant.
    pub stats: Arc<HookStats>,
}

/// Read-only counters for one hook of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookStatsView {
    /// Hook name.
    pub hook: String,
    /// Hook id.
    pub hook_id: HookId,
    /// Number of cached variants.
    pub variants: usize,
    /// Times fired.
    pub fires: u64,
    /// Cumulative time.
    pub total_time: Duration,
    /// Cumulative bytes allocated.
    pub total_memory: u64,
    /// Faults raised.
    pub faults: u64,
    /// Whether invocations are being logged.
    pub debugging: bool,
}

/// Read-only snapshot of a Hookable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookableView {
    /// Unit identity.
    pub info: UnitInfo,
    /// Owning package.
    pub package: String,
    /// Source the unit was compiled from.
    pub origin: PathBuf,
    /// Whether the unit is live.
    pub is_loaded: bool,
    /// Whether `on_init` completed.
    pub initialized: bool,
    /// Time since activation.
    pub uptime: Duration,
    /// Hooks discovered at load time, sorted.
    pub declared_hooks: Vec<String>,
    /// Hooks the unit opted out of, sorted.
    pub ignored_hooks: Vec<String>,
    /// Unit totals.
    pub fires: u64,
    /// Unit totals.
    pub total_time: Duration,
    /// Unit totals.
    pub total_memory: u64,
    /// Unit totals.
    pub faults: u64,
    /// Per-hook counters, sorted by hook name.
    pub hooks: Vec<HookStatsView>,
}

/// A loaded plugin or module.
pub struct Hookable {
    info: UnitInfo,
    package: String,
    origin: PathBuf,
    unit: Arc<dyn Unit>,
    exports: HashMap<String, Vec<HookExport>>,
    declared: RwLock<BTreeSet<HookId>>,
    cache: RwLock<HashMap<HookId, Arc<[CachedHook]>>>,
    ignored: RwLock<HashSet<HookId>>,
    initialized: AtomicBool,
    loaded: AtomicBool,
    disposed: AtomicBool,
    profiling: AtomicBool,
    activated_at: Mutex<Option<Instant>>,
    totals: Arc<HookStats>,
    symbols: Arc<SymbolPool>,
}

impl std::fmt::Debug for Hookable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hookable")
            .field("name", &self.info.name)
            .field("version", &self.info.version.to_string())
            .field("package", &self.package)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Hookable {
    /// Wraps a compiled unit. `declared` is the discovered hook set.
    pub fn new(
        unit: Arc<dyn Unit>,
        package: impl Into<String>,
        origin: impl Into<PathBuf>,
        declared: BTreeSet<HookId>,
        symbols: Arc<SymbolPool>,
    ) -> Self {
        let mut exports: HashMap<String, Vec<HookExport>> = HashMap::new();
        for export in unit.exports() {
            exports.entry(export.name.clone()).or_default().push(export);
        }

        let ignored = unit
            .ignored_hooks()
            .iter()
            .map(|name| symbols.intern(name))
            .collect();

        Self {
            info: unit.info(),
            package: package.into(),
            origin: origin.into(),
            unit,
            exports,
            declared: RwLock::new(declared),
            cache: RwLock::new(HashMap::new()),
            ignored: RwLock::new(ignored),
            initialized: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            profiling: AtomicBool::new(true),
            activated_at: Mutex::new(None),
            totals: Arc::new(HookStats::default()),
            symbols,
        }
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Unit identity.
    pub fn info(&self) -> &UnitInfo {
        &self.info
    }

    /// Owning package name.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Source path.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// The compiled unit.
    pub fn unit(&self) -> &Arc<dyn Unit> {
        &self.unit
    }

    /// Hooks discovered at load time, plus hooks defined since that the
    /// unit exports.
    pub fn declared_hooks(&self) -> BTreeSet<HookId> {
        self.declared.read().clone()
    }

    /// Marks `hook` as declared. Returns `false` if it already was.
    pub fn declare(&self, hook: HookId) -> bool {
        self.declared.write().insert(hook)
    }

    /// Names of everything the unit exports.
    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// Cached variants for `hook`, building the entry on first use.
    ///
    /// Returns `None` for ignored hooks and for hooks the unit does not export.
    pub fn cached_hooks(&self, hook: HookId) -> Option<Arc<[CachedHook]>> {
        if let Some(entry) = self.cache.read().get(&hook) {
            return (!entry.is_empty()).then(|| entry.clone());
        }
        if self.ignored.read().contains(&hook) || self.disposed.load(Ordering::Acquire) {
            return None;
        }

        let name = self.symbols.resolve(hook)?;
        let variants: Arc<[CachedHook]> = self
            .exports
            .get(&*name)
            .map(|exports| {
                exports
                    .iter()
                    .map(|export| CachedHook {
                        export: export.clone(),
                        stats: Arc::new(HookStats::default()),
                    })
                    .collect()
            })
            .unwrap_or_else(|| Arc::from(Vec::new()));

        let entry = self
            .cache
            .write()
            .entry(hook)
            .or_insert(variants)
            .clone();
        (!entry.is_empty()).then_some(entry)
    }

    /// Opts the unit out of `hook`, dropping any cached handlers.
    pub fn ignore(&self, hook: HookId) {
        self.ignored.write().insert(hook);
        self.cache.write().remove(&hook);
    }

    /// Reverses [`Hookable::ignore`].
    pub fn unignore(&self, hook: HookId) {
        self.ignored.write().remove(&hook);
    }

    /// Returns whether the unit opted out of `hook`.
    pub fn is_ignored(&self, hook: HookId) -> bool {
        self.ignored.read().contains(&hook)
    }

    /// Toggles invocation logging for every cached variant of `hook`.
    pub fn set_debugging(&self, hook: HookId, on: bool) -> bool {
        match self.cached_hooks(hook) {
            Some(variants) => {
                for cached in variants.iter() {
                    cached.stats.set_debugging(on);
                }
                true
            }
            None => false,
        }
    }

    /// Toggles profiling for this unit.
    pub fn set_profiling(&self, on: bool) {
        self.profiling.store(on, Ordering::Relaxed);
    }

    /// Whether this unit's invocations are profiled.
    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Unit-wide counters.
    pub fn totals(&self) -> &Arc<HookStats> {
        &self.totals
    }

    /// Whether `on_init` completed.
    pub fn has_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether the unit is live.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Whether the unit has been torn down.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Time since activation.
    pub fn uptime(&self) -> Duration {
        self.activated_at
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn mark_loaded(&self) {
        *self.activated_at.lock() = Some(Instant::now());
        self.loaded.store(true, Ordering::Release);
    }

    /// Clears the cache and counters and marks the unit disposed.
    pub(crate) fn dispose(&self) {
        self.loaded.store(false, Ordering::Release);
        self.disposed.store(true, Ordering::Release);
        self.cache.write().clear();
        self.totals.reset();
        *self.activated_at.lock() = None;
    }

    /// Calls an exported method directly, isolating faults.
    pub fn call_export(&self, method: &str, args: &mut HookArgs) -> Option<HookValue> {
        let export = self
            .exports
            .get(method)?
            .iter()
            .find(|e| e.accepts(args.len()))?
            .clone();

        match invoke(&export, args, None) {
            Ok(value) if !value.is_null() => Some(value),
            Ok(_) => None,
            Err(fault) => {
                self.totals.record_fault();
                warn!(unit = %self.info.name, method = %method, error = %fault, "Unit method call failed");
                None
            }
        }
    }

    /// Read-only snapshot for operator views.
    pub fn view(&self) -> HookableView {
        let mut hooks: Vec<HookStatsView> = self
            .cache
            .read()
            .iter()
            .filter(|(_, variants)| !variants.is_empty())
            .map(|(id, variants)| HookStatsView {
                hook: self.symbols.display_name(*id),
                hook_id: *id,
                variants: variants.len(),
                fires: variants.iter().map(|c| c.stats.fires()).sum(),
                total_time: variants.iter().map(|c| c.stats.total_time()).sum(),
                total_memory: variants.iter().map(|c| c.stats.total_memory()).sum(),
                faults: variants.iter().map(|c| c.stats.faults()).sum(),
                debugging: variants.iter().any(|c| c.stats.is_debugging()),
            })
            .collect();
        hooks.sort_by(|a, b| a.hook.cmp(&b.hook));

        let names = |ids: &mut dyn Iterator<Item = HookId>| {
            let mut names: Vec<String> = ids.map(|id| self.symbols.display_name(id)).collect();
            names.sort();
            names
        };

        HookableView {
            info: self.info.clone(),
            package: self.package.clone(),
            origin: self.origin.clone(),
            is_loaded: self.is_loaded(),
            initialized: self.has_initialized(),
            uptime: self.uptime(),
            declared_hooks: names(&mut self.declared.read().iter().copied()),
            ignored_hooks: names(&mut self.ignored.read().iter().copied()),
            fires: self.totals.fires(),
            total_time: self.totals.total_time(),
            total_memory: self.totals.total_memory(),
            faults: self.totals.faults(),
            hooks,
        }
    }
}

/// Invokes one handler variant, converting panics into faults.
///
/// By-ref variants run against a rented copy of the arguments; by-ref
/// slots are copied back into `args` afterwards.
pub(crate) fn invoke(export: &HookExport, args: &mut HookArgs, pool: Option<&ArgPool>) -> HookReturn {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        if export.by_ref {
            match pool {
                Some(pool) => {
                    let mut buffer = pool.rent(args.values());
                    let result = export.handler.call_by_ref(&mut buffer);
                    args.write_back(&buffer);
                    result
                }
                None => {
                    let mut buffer = args.values().to_vec();
                    let result = export.handler.call_by_ref(&mut buffer);
                    args.write_back(&buffer);
                    result
                }
            }
        } else {
            export.handler.call(args.values())
        }
    }));

    outcome.unwrap_or_else(|payload| Err(HookFault::Panicked(panic_message(payload.as_ref()))))
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
