//! TOML unit manifests.
//!
//! A manifest holds either one `[unit]` or an archive of `[[units]]`.
//! A unit either names a native `entry` from the [`FactoryCatalog`] or
//! is declarative, listing `[[unit.hooks]]` with a fixed action.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use semver::Version;
use serde::Deserialize;
use toml::Spanned;

use super::declarative::{DeclarativeUnit, DeclaredHook, HookAction};
use crate::hooks::definitions::HookValue;
use crate::loader::{CompiledSource, Diagnostic, SourceUnit, UnitCompiler};
use crate::unit::{Unit, UnitInfo, UnitReference};

/// Builds a native unit.
pub type UnitFactory = Arc<dyn Fn() -> Arc<dyn Unit> + Send + Sync>;

/// Native units a manifest may name as `entry`.
#[derive(Default)]
pub struct FactoryCatalog {
    factories: RwLock<HashMap<String, UnitFactory>>,
}

impl fmt::Debug for FactoryCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryCatalog")
            .field("entries", &self.names())
            .finish()
    }
}

impl FactoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a factory under `entry`.
    pub fn register<F>(&self, entry: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Unit> + Send + Sync + 'static,
    {
        self.factories.write().insert(entry.into(), Arc::new(factory));
    }

    /// Looks up a factory.
    pub fn get(&self, entry: &str) -> Option<UnitFactory> {
        self.factories.read().get(entry).cloned()
    }

    /// Registered entry names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestFile {
    package: Option<PackageSection>,
    unit: Option<UnitSection>,
    #[serde(default)]
    units: Vec<UnitSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageSection {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitSection {
    name: Option<Spanned<String>>,
    version: Option<Spanned<String>>,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    core: bool,
    #[serde(default)]
    manual_subscriptions: bool,
    entry: Option<Spanned<String>>,
    #[serde(default)]
    ignored_hooks: Vec<String>,
    #[serde(default)]
    references: Vec<ReferenceSection>,
    #[serde(default)]
    hooks: Vec<HookSection>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferenceSection {
    name: String,
    #[serde(default)]
    required: bool,
    min_version: Option<Spanned<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HookSection {
    name: Spanned<String>,
    action: Spanned<String>,
    value: Option<toml::Value>,
    #[serde(default)]
    arg: usize,
    arity: Option<usize>,
    #[serde(default, rename = "async")]
    is_async: bool,
}

/// Compiles TOML manifests into units.
#[derive(Debug, Clone)]
pub struct ManifestCompiler {
    factories: Arc<FactoryCatalog>,
}

impl ManifestCompiler {
    /// Creates a compiler resolving `entry` names through `factories`.
    pub fn new(factories: Arc<FactoryCatalog>) -> Self {
        Self { factories }
    }

    /// Compiles manifest text. `source` is used for the default package name.
    pub fn compile_str(&self, source: &SourceUnit, text: &str) -> Result<CompiledSource, Vec<Diagnostic>> {
        let manifest: ManifestFile = toml::from_str(text).map_err(|e| {
            let mut diagnostic = Diagnostic::error("manifest-parse", e.message().trim().to_string());
            if let Some(span) = e.span() {
                let (line, column) = position(text, span.start);
                diagnostic = diagnostic.at(line, column);
            }
            vec![diagnostic]
        })?;

        let sections = match (manifest.unit, manifest.units.is_empty()) {
            (Some(_), false) => {
                return Err(vec![Diagnostic::error(
                    "ambiguous-manifest",
                    "A manifest declares either [unit] or [[units]], not both",
                )]);
            }
            (Some(unit), true) => vec![unit],
            (None, false) => manifest.units,
            (None, true) => {
                return Err(vec![Diagnostic::error(
                    "empty-manifest",
                    "The manifest declares no units",
                )]);
            }
        };

        let mut errors = Vec::new();
        let mut units: Vec<Arc<dyn Unit>> = Vec::new();
        let mut seen = HashSet::new();

        for section in sections {
            if let Some(unit) = self.build_unit(text, section, &mut errors) {
                let name = unit.info().name;
                if !seen.insert(name.clone()) {
                    errors.push(Diagnostic::error(
                        "duplicate-unit",
                        format!("Unit '{name}' is declared more than once"),
                    ));
                    continue;
                }
                units.push(unit);
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(CompiledSource {
            package: manifest
                .package
                .map(|p| p.name)
                .unwrap_or_else(|| source.stem()),
            units,
        })
    }

    fn build_unit(
        &self,
        text: &str,
        section: UnitSection,
        errors: &mut Vec<Diagnostic>,
    ) -> Option<Arc<dyn Unit>> {
        let before = errors.len();
        let version = section
            .version
            .as_ref()
            .and_then(|v| parse_version(text, v, "invalid-version", errors));

        if let Some(entry) = &section.entry {
            if let Some(first) = section.hooks.first() {
                errors.push(located(
                    text,
                    first.name.span(),
                    "entry-with-hooks",
                    "A native entry unit cannot declare hooks",
                ));
                return None;
            }
            let Some(factory) = self.factories.get(entry.get_ref()) else {
                errors.push(located(
                    text,
                    entry.span(),
                    "unknown-entry",
                    format!("No native unit is registered as '{}'", entry.get_ref()),
                ));
                return None;
            };
            let unit = factory();
            let info = unit.info();
            if let Some(name) = &section.name {
                if name.get_ref() != &info.name {
                    errors.push(located(
                        text,
                        name.span(),
                        "entry-mismatch",
                        format!("Entry '{}' builds unit '{}'", entry.get_ref(), info.name),
                    ));
                }
            }
            if let Some(version) = version {
                if version != info.version {
                    errors.push(Diagnostic::error(
                        "entry-mismatch",
                        format!("Entry '{}' builds version {}", entry.get_ref(), info.version),
                    ));
                }
            }
            return (errors.len() == before).then_some(unit);
        }

        let Some(name) = section.name.as_ref().map(|n| n.get_ref().trim().to_string()) else {
            errors.push(Diagnostic::error("missing-field", "Declarative unit is missing 'name'"));
            return None;
        };
        if name.is_empty() {
            errors.push(Diagnostic::error("missing-field", "Unit name is empty"));
        }
        if section.version.is_none() {
            errors.push(Diagnostic::error(
                "missing-field",
                format!("Unit '{name}' is missing 'version'"),
            ));
        }

        let mut references = Vec::new();
        for reference in section.references {
            let min_version = reference
                .min_version
                .as_ref()
                .and_then(|v| parse_version(text, v, "invalid-version", errors));
            references.push(UnitReference {
                name: reference.name,
                required: reference.required,
                min_version,
            });
        }

        let mut hooks = Vec::new();
        for hook in section.hooks {
            let Some(action) = HookAction::parse(hook.action.get_ref()) else {
                errors.push(located(
                    text,
                    hook.action.span(),
                    "invalid-action",
                    format!(
                        "Unknown action '{}' (expected return, log or set)",
                        hook.action.get_ref()
                    ),
                ));
                continue;
            };
            hooks.push(DeclaredHook {
                name: hook.name.into_inner(),
                action,
                value: hook.value.map(HookValue::from).unwrap_or_default(),
                arg: hook.arg,
                arity: hook.arity,
                is_async: hook.is_async,
            });
        }

        if errors.len() != before {
            return None;
        }

        let info = UnitInfo {
            name,
            version: version?,
            author: section.author,
            description: section.description,
            is_core: section.core,
            manual_subscriptions: section.manual_subscriptions,
        };
        Some(Arc::new(DeclarativeUnit::new(
            info,
            references,
            section.ignored_hooks,
            hooks,
        )))
    }
}

impl UnitCompiler for ManifestCompiler {
    fn compile(&self, source: &SourceUnit) -> Result<CompiledSource, Vec<Diagnostic>> {
        let text = std::fs::read_to_string(&source.path).map_err(|e| {
            vec![Diagnostic::error(
                "io",
                format!("Failed to read '{}': {e}", source.path.display()),
            )]
        })?;
        self.compile_str(source, &text)
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "toml")
    }
}

fn parse_version(
    text: &str,
    raw: &Spanned<String>,
    code: &str,
    errors: &mut Vec<Diagnostic>,
) -> Option<Version> {
    match Version::parse(raw.get_ref()) {
        Ok(version) => Some(version),
        Err(e) => {
            errors.push(located(
                text,
                raw.span(),
                code,
                format!("'{}' is not a semantic version: {e}", raw.get_ref()),
            ));
            None
        }
    }
}

fn located(text: &str, span: Range<usize>, code: &str, message: impl Into<String>) -> Diagnostic {
    let (line, column) = position(text, span.start);
    Diagnostic::error(code, message).at(line, column)
}

/// 1-based line and column of a byte offset.
fn position(text: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(text.len());
    let before = text.get(..offset).unwrap_or(text);
    let line = before.matches('\n').count() + 1;
    let column = before
        .rsplit('\n')
        .next()
        .map(|tail| tail.chars().count())
        .unwrap_or(0)
        + 1;
    (line, column)
}
