//! Package registry: loaded units grouped by origin, plus the table of
//! failed sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::hookable::{Hookable, HookableView};
use crate::loader::FailedUnit;

/// Units loaded from one source.
#[derive(Debug)]
pub struct Package {
    /// Human name.
    pub name: String,
    /// Source path.
    pub origin: PathBuf,
    /// False after the latest compile of the source failed.
    pub valid: bool,
    hookables: Vec<Arc<Hookable>>,
}

impl Package {
    fn new(name: String, origin: PathBuf) -> Self {
        Self {
            name,
            origin,
            valid: true,
            hookables: Vec::new(),
        }
    }

    /// Live units in load order.
    pub fn hookables(&self) -> &[Arc<Hookable>] {
        &self.hookables
    }
}

/// Read-only snapshot of a package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageView {
    /// Human name.
    pub name: String,
    /// Source path.
    pub origin: PathBuf,
    /// Whether the latest compile succeeded.
    pub valid: bool,
    /// Units in load order.
    pub units: Vec<HookableView>,
}

/// Registry of packages and failed sources, in registration order.
#[derive(Debug, Default)]
pub struct PackageRegistry {
    packages: IndexMap<PathBuf, Package>,
    failed: IndexMap<PathBuf, FailedUnit>,
}

impl PackageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the package for `origin`, registering it if needed.
    pub fn ensure(&mut self, origin: &Path, name: &str) -> &mut Package {
        let package = self
            .packages
            .entry(origin.to_path_buf())
            .or_insert_with(|| Package::new(name.to_string(), origin.to_path_buf()));
        if package.name != name {
            package.name = name.to_string();
        }
        package
    }

    /// Looks up a package.
    pub fn get(&self, origin: &Path) -> Option<&Package> {
        self.packages.get(origin)
    }

    /// Returns whether `origin` is registered.
    pub fn contains(&self, origin: &Path) -> bool {
        self.packages.contains_key(origin)
    }

    /// Adds a unit to its package.
    pub fn insert(&mut self, origin: &Path, package: &str, hookable: Arc<Hookable>) {
        self.ensure(origin, package).hookables.push(hookable);
    }

    /// Removes a unit by name, leaving its package registered.
    pub fn take_unit(&mut self, name: &str) -> Option<Arc<Hookable>> {
        self.packages.values_mut().find_map(|package| {
            let index = package.hookables.iter().position(|h| h.name() == name)?;
            Some(package.hookables.remove(index))
        })
    }

    /// Finds a live unit by name.
    pub fn find_unit(&self, name: &str) -> Option<&Arc<Hookable>> {
        self.packages
            .values()
            .flat_map(|p| p.hookables.iter())
            .find(|h| h.name() == name)
    }

    /// Names of the units currently loaded from `origin`.
    pub fn unit_names(&self, origin: &Path) -> Vec<String> {
        self.packages
            .get(origin)
            .map(|p| p.hookables.iter().map(|h| h.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Marks a package valid or invalid.
    pub fn set_valid(&mut self, origin: &Path, valid: bool) {
        if let Some(package) = self.packages.get_mut(origin) {
            package.valid = valid;
        }
    }

    /// Removes a package, returning it with any units it still holds.
    pub fn remove(&mut self, origin: &Path) -> Option<Package> {
        let removed = self.packages.shift_remove(origin);
        if let Some(package) = &removed {
            info!(package = %package.name, origin = %origin.display(), "Package removed");
        }
        removed
    }

    /// Every live unit: package registration order, then load order.
    pub fn live_hookables(&self) -> Vec<Arc<Hookable>> {
        self.packages
            .values()
            .flat_map(|p| p.hookables.iter())
            .filter(|h| h.is_loaded())
            .cloned()
            .collect()
    }

    /// Records a failure, replacing any earlier one for the same origin.
    pub fn record_failure(&mut self, failure: FailedUnit) {
        self.failed.shift_remove(&failure.origin);
        self.failed.insert(failure.origin.clone(), failure);
    }

    /// Clears the failure record of `origin`.
    pub fn clear_failure(&mut self, origin: &Path) -> Option<FailedUnit> {
        self.failed.shift_remove(origin)
    }

    /// The failure record of `origin`.
    pub fn failure(&self, origin: &Path) -> Option<&FailedUnit> {
        self.failed.get(origin)
    }

    /// Failure records, oldest first.
    pub fn failures(&self) -> Vec<FailedUnit> {
        self.failed.values().cloned().collect()
    }

    /// Snapshot of every package.
    pub fn views(&self) -> Vec<PackageView> {
        self.packages
            .values()
            .map(|p| PackageView {
                name: p.name.clone(),
                origin: p.origin.clone(),
                valid: p.valid,
                units: p.hookables.iter().map(|h| h.view()).collect(),
            })
            .collect()
    }

    /// Number of registered packages.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Returns whether no package is registered.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
