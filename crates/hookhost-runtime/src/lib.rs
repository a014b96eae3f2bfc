//! # hookhost-runtime
//!
//! Hook dispatch and unit lifecycle runtime. Provides:
//!
//! - A symbol pool interning hook names to stable ids
//! - A dispatch engine with per-unit fault isolation and profiling
//! - A subscription registry driving hot-patch install/uninstall
//! - A compile pipeline for TOML manifests (and shared libraries with
//!   the `dynamic` feature)
//! - Dependency resolution with deferred activation and cascade unload
//! - A debouncing change processor feeding a single-writer tick queue

pub mod compiler;
pub mod hookable;
pub mod hooks;
pub mod loader;
pub mod macros;
pub mod manager;
pub mod memory;
pub mod packages;
pub mod prelude;
pub mod resolver;
pub mod symbols;
pub mod tick;
pub mod traits;
pub mod unit;
pub mod watcher;

pub use hookable::{Hookable, HookableView, HookStatsView};
pub use hooks::{HookDispatcher, SubscriptionRegistry};
pub use loader::{Diagnostic, FailedUnit, LoadResult, SourceUnit, UnitCompiler, UnitLoader};
pub use manager::HookRuntime;
pub use memory::TrackingAllocator;
pub use packages::{PackageRegistry, PackageView};
pub use resolver::{DependencyResolver, PendingRequiree};
pub use symbols::{HookId, SymbolPool};
pub use tick::TickQueue;
pub use watcher::{ChangeProcessor, IgnoreList, WatchGuard, WatchState};

#[doc(hidden)]
pub mod __private {
    pub use semver;
}
