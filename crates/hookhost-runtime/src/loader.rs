//! Unit loader: compiles one source unit in isolation and reports
//! either compiled units or a structured failure.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hookable::HookableView;
use crate::hooks::definitions::HookCatalog;
use crate::symbols::{HookId, SymbolPool};
use crate::unit::Unit;

/// A source unit on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceUnit {
    /// Path of the source file.
    pub path: PathBuf,
}

impl SourceUnit {
    /// Wraps a path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File stem, used as the default package name.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Diagnostic severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks loading.
    Error,
    /// Informational.
    Warning,
}

/// One compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// 1-based line, when known.
    pub line: Option<usize>,
    /// 1-based column, when known.
    pub column: Option<usize>,
    /// Stable machine-readable code.
    pub code: String,
}

impl Diagnostic {
    /// An error without a position.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
            line: None,
            column: None,
            code: code.into(),
        }
    }

    /// Attaches a position.
    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => {
                write!(f, "{line}:{column}: [{}] {}", self.code, self.message)
            }
            _ => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// A source unit that could not be loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedUnit {
    /// Source path.
    pub origin: PathBuf,
    /// Diagnostics in compiler order.
    pub errors: Vec<Diagnostic>,
    /// When the failure was recorded.
    pub failed_at: DateTime<Utc>,
}

impl FailedUnit {
    /// Creates a failure record stamped now.
    pub fn new(origin: impl Into<PathBuf>, errors: Vec<Diagnostic>) -> Self {
        Self {
            origin: origin.into(),
            errors,
            failed_at: Utc::now(),
        }
    }
}

/// Why a unit's activation is blocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StallReason {
    /// A required reference is not loaded.
    Missing {
        /// Missing unit name.
        dependency: String,
    },
    /// The referenced unit is loaded at a version that is too old.
    VersionMismatch {
        /// Referenced unit name.
        dependency: String,
        /// Lowest acceptable version.
        required: Version,
        /// Loaded version.
        found: Version,
    },
    /// Waiting would close a dependency cycle.
    Cycle {
        /// Units in the cycle, starting with the stalled unit.
        members: Vec<String>,
    },
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { dependency } => write!(f, "required unit '{dependency}' is not loaded"),
            Self::VersionMismatch {
                dependency,
                required,
                found,
            } => write!(f, "'{dependency}' {found} is loaded but >= {required} is required"),
            Self::Cycle { members } => write!(f, "dependency cycle {}", members.join(" -> ")),
        }
    }
}

/// A unit left unloaded because a dependency is unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyStall {
    /// Stalled unit.
    pub unit: String,
    /// Its source.
    pub origin: PathBuf,
    /// Why.
    pub reason: StallReason,
}

/// Outcome of loading one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadResult {
    /// The unit is live.
    Ready(HookableView),
    /// The source failed to compile or activate.
    Failed(FailedUnit),
    /// A dependency is missing; the unit will be retried.
    Unresolved(DependencyStall),
}

impl LoadResult {
    /// Returns whether the unit is live.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Name of the unit, when the result concerns a single unit.
    pub fn unit_name(&self) -> Option<&str> {
        match self {
            Self::Ready(view) => Some(&view.info.name),
            Self::Unresolved(stall) => Some(&stall.unit),
            Self::Failed(_) => None,
        }
    }
}

/// Successful compiler output: one package of one or more units.
pub struct CompiledSource {
    /// Package name.
    pub package: String,
    /// Units in declaration order.
    pub units: Vec<Arc<dyn Unit>>,
}

impl fmt::Debug for CompiledSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSource")
            .field("package", &self.package)
            .field(
                "units",
                &self.units.iter().map(|u| u.info().name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Turns one source unit into executable units or diagnostics.
pub trait UnitCompiler: Send + Sync {
    /// Compiles `source`. Never returns a partial result.
    fn compile(&self, source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>>;

    /// Whether this compiler handles files at `path`.
    fn accepts(&self, path: &Path) -> bool;
}

/// Runs a compiler with a wall-clock budget.
#[derive(Clone)]
pub struct UnitLoader {
    compiler: Arc<dyn UnitCompiler>,
    timeout: Duration,
}

impl fmt::Debug for UnitLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitLoader")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UnitLoader {
    /// Creates a loader.
    pub fn new(compiler: Arc<dyn UnitCompiler>, timeout: Duration) -> Self {
        Self { compiler, timeout }
    }

    /// Whether the compiler handles `path`.
    pub fn accepts(&self, path: &Path) -> bool {
        self.compiler.accepts(path)
    }

    /// Compiles `source` on a worker thread, giving up after the timeout.
    ///
    /// A compiler that overruns is left to finish on its own; its output
    /// is discarded.
    pub fn compile(&self, source: &SourceUnit) -> Result<CompiledSource, FailedUnit> {
        let (tx, rx) = mpsc::channel();
        let compiler = self.compiler.clone();
        let job = source.clone();

        let spawned = std::thread::Builder::new()
            .name("unit-compile".to_string())
            .spawn(move || {
                let _ = tx.send(compiler.compile(&job));
            });

        if let Err(e) = spawned {
            return Err(FailedUnit::new(
                &source.path,
                vec![Diagnostic::error("compiler-unavailable", format!("Failed to start compiler: {e}"))],
            ));
        }

        match rx.recv_timeout(self.timeout) {
            Ok(Ok(compiled)) => {
                debug!(origin = %source.path.display(), units = compiled.units.len(), "Compiled");
                Ok(compiled)
            }
            Ok(Err(errors)) => Err(FailedUnit::new(&source.path, errors)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(origin = %source.path.display(), timeout_ms = self.timeout.as_millis() as u64, "Compile timed out");
                Err(FailedUnit::new(
                    &source.path,
                    vec![Diagnostic::error(
                        "compile-timeout",
                        format!("Compilation exceeded {} ms", self.timeout.as_millis()),
                    )],
                ))
            }
            Err(RecvTimeoutError::Disconnected) => Err(FailedUnit::new(
                &source.path,
                vec![Diagnostic::error("compiler-panic", "Compiler terminated without a result")],
            )),
        }
    }
}

/// Hooks a unit implements: its exports that name a known hook.
///
/// Units with manual subscriptions declare nothing and subscribe themselves.
pub fn discover_hooks(unit: &dyn Unit, catalog: &HookCatalog, symbols: &SymbolPool) -> BTreeSet<HookId> {
    if unit.info().manual_subscriptions {
        return BTreeSet::new();
    }
    unit.exports()
        .iter()
        .filter_map(|export| symbols.lookup(&export.name))
        .filter(|id| catalog.contains(*id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::definitions::{HookDefinition, HookValue};
    use crate::unit::{HookExport, HookHandler, HookReturn, UnitInfo};

    struct Noop;

    impl HookHandler for Noop {
        fn call(&self, _args: &[HookValue]) -> HookReturn {
            Ok(HookValue::Null)
        }
    }

    struct Exports {
        manual: bool,
    }

    impl Unit for Exports {
        fn info(&self) -> UnitInfo {
            let mut info = UnitInfo::new("Exports", Version::new(1, 0, 0));
            info.manual_subscriptions = self.manual;
            info
        }

        fn exports(&self) -> Vec<HookExport> {
            vec![
                HookExport::new("OnTick", Arc::new(Noop)),
                HookExport::new("Helper", Arc::new(Noop)),
            ]
        }
    }

    struct Slow;

    impl UnitCompiler for Slow {
        fn compile(&self, _source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>> {
            std::thread::sleep(Duration::from_millis(500));
            Err(Vec::new())
        }

        fn accepts(&self, _path: &Path) -> bool {
            true
        }
    }

    struct Broken;

    impl UnitCompiler for Broken {
        fn compile(&self, _source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>> {
            Err(vec![Diagnostic::error("syntax", "unexpected token").at(3, 7)])
        }

        fn accepts(&self, _path: &Path) -> bool {
            true
        }
    }

    #[test]
    fn test_discovery_matches_catalog() {
        let symbols = SymbolPool::new();
        let catalog = HookCatalog::new();
        let tick = catalog.define(&symbols, HookDefinition::new("OnTick"));
        symbols.intern("Helper");

        let found = discover_hooks(&Exports { manual: false }, &catalog, &symbols);
        assert_eq!(found, BTreeSet::from([tick]));
        assert!(discover_hooks(&Exports { manual: true }, &catalog, &symbols).is_empty());
    }

    #[test]
    fn test_compile_timeout_becomes_diagnostic() {
        let loader = UnitLoader::new(Arc::new(Slow), Duration::from_millis(20));
        let failed = loader.compile(&SourceUnit::new("slow.toml")).expect_err("times out");
        assert_eq!(failed.errors.len(), 1);
        assert_eq!(failed.errors[0].code, "compile-timeout");
    }

    #[test]
    fn test_diagnostics_are_kept_in_order() {
        let loader = UnitLoader::new(Arc::new(Broken), Duration::from_secs(5));
        let failed = loader.compile(&SourceUnit::new("bad.toml")).expect_err("fails");
        assert_eq!(failed.origin, PathBuf::from("bad.toml"));
        assert_eq!(failed.errors[0].line, Some(3));
        assert_eq!(failed.errors[0].to_string(), "3:7: [syntax] unexpected token");
    }
}
