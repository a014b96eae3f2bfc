//! Dependency resolver: binds unit references, parks units whose
//! required references are missing, and remembers who depends on whom
//! for cascade unloads.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::hookable::Hookable;
use crate::loader::StallReason;
use crate::unit::{UnitRef, UnitReference};

/// A unit waiting for a dependency to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequiree {
    /// Unit being waited for.
    pub dependency: String,
    /// Waiting unit.
    pub waiter: String,
    /// Source of the waiting unit, reloaded on retry.
    pub origin: PathBuf,
    /// When the wait started.
    pub since: DateTime<Utc>,
}

/// Outcome of resolving one unit's references.
#[derive(Debug)]
pub enum Resolution {
    /// Every reference is bound; optional misses are `None`.
    Bound(HashMap<String, Option<UnitRef>>),
    /// Activation is blocked; a pending edge was recorded.
    Stalled(StallReason),
    /// Waiting would close a cycle. The cycle's pending edges were dropped
    /// and are returned so their waiters can be reported.
    Cycle {
        /// Units in the cycle, starting and ending with the stalled unit.
        members: Vec<String>,
        /// Pending edges removed to break the cycle.
        dropped: Vec<PendingRequiree>,
    },
}

/// Cross-unit reference bookkeeping. Owned by the tick thread.
#[derive(Debug, Default)]
pub struct DependencyResolver {
    /// Dependency → units that hold a required reference to it.
    dependents: HashMap<String, BTreeSet<String>>,
    pending: Vec<PendingRequiree>,
}

impl DependencyResolver {
    /// Creates empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the references of `unit` against currently loaded units.
    ///
    /// Any earlier pending edge of `unit` is replaced. Dependents are only
    /// recorded when every reference binds.
    pub fn resolve<F>(
        &mut self,
        unit: &str,
        origin: &Path,
        references: &[UnitReference],
        lookup: F,
    ) -> Resolution
    where
        F: Fn(&str) -> Option<Arc<Hookable>>,
    {
        self.forget_waiter(unit);

        let mut bound = HashMap::new();
        for reference in references {
            match lookup(&reference.name) {
                Some(target) => {
                    let found = &target.info().version;
                    if let Some(required) = reference.min_version.as_ref().filter(|min| found < *min) {
                        warn!(
                            unit = %unit,
                            dependency = %reference.name,
                            required = %required,
                            found = %found,
                            "Dependency version mismatch"
                        );
                        let reason = StallReason::VersionMismatch {
                            dependency: reference.name.clone(),
                            required: required.clone(),
                            found: found.clone(),
                        };
                        self.push_pending(&reference.name, unit, origin);
                        return Resolution::Stalled(reason);
                    }
                    bound.insert(reference.name.clone(), Some(UnitRef::new(&target)));
                }
                None if !reference.required => {
                    bound.insert(reference.name.clone(), None);
                }
                None => {
                    if let Some(path) = self.find_path(&reference.name, unit) {
                        let mut members = vec![unit.to_string()];
                        members.extend(path.iter().cloned());
                        let dropped = self.drop_path(&path);
                        warn!(unit = %unit, cycle = %members.join(" -> "), "Dependency cycle");
                        return Resolution::Cycle { members, dropped };
                    }
                    debug!(unit = %unit, dependency = %reference.name, "Waiting for dependency");
                    self.push_pending(&reference.name, unit, origin);
                    return Resolution::Stalled(StallReason::Missing {
                        dependency: reference.name.clone(),
                    });
                }
            }
        }

        for reference in references.iter().filter(|r| r.required) {
            self.dependents
                .entry(reference.name.clone())
                .or_default()
                .insert(unit.to_string());
        }

        Resolution::Bound(bound)
    }

    /// Units holding a required reference to `unit`, sorted.
    pub fn dependents_of(&self, unit: &str) -> Vec<String> {
        self.dependents
            .get(unit)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops `unit` from the dependents tables, both as a dependency and
    /// as a dependent.
    pub fn unlink(&mut self, unit: &str) {
        self.dependents.remove(unit);
        self.dependents.retain(|_, set| {
            set.remove(unit);
            !set.is_empty()
        });
    }

    /// Records that `waiter` waits for `dependency`. Duplicate edges are ignored.
    pub fn push_pending(&mut self, dependency: &str, waiter: &str, origin: &Path) {
        let exists = self
            .pending
            .iter()
            .any(|e| e.dependency == dependency && e.waiter == waiter);
        if !exists {
            self.pending.push(PendingRequiree {
                dependency: dependency.to_string(),
                waiter: waiter.to_string(),
                origin: origin.to_path_buf(),
                since: Utc::now(),
            });
        }
    }

    /// Removes and returns every edge waiting on `dependency`.
    pub fn take_waiters(&mut self, dependency: &str) -> Vec<PendingRequiree> {
        let (taken, kept) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| e.dependency == dependency);
        self.pending = kept;
        taken
    }

    /// Removes every edge where `waiter` is the waiting unit.
    pub fn forget_waiter(&mut self, waiter: &str) {
        self.pending.retain(|e| e.waiter != waiter);
    }

    /// Removes every edge whose waiter comes from `origin`.
    pub fn forget_origin(&mut self, origin: &Path) {
        self.pending.retain(|e| e.origin != origin);
    }

    /// Snapshot of the pending edges in creation order.
    pub fn pending(&self) -> Vec<PendingRequiree> {
        self.pending.clone()
    }

    /// Path along pending edges from `from` to `to`, both inclusive.
    fn find_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut stack = vec![vec![from.to_string()]];
        let mut seen = HashSet::new();

        while let Some(path) = stack.pop() {
            let node = path.last()?.clone();
            if node == to {
                return Some(path);
            }
            if !seen.insert(node.clone()) {
                continue;
            }
            for edge in self.pending.iter().filter(|e| e.waiter == node) {
                let mut next = path.clone();
                next.push(edge.dependency.clone());
                stack.push(next);
            }
        }
        None
    }

    fn drop_path(&mut self, path: &[String]) -> Vec<PendingRequiree> {
        let links: HashSet<(&str, &str)> = path
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect();
        let (dropped, kept) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|e| links.contains(&(e.waiter.as_str(), e.dependency.as_str())));
        self.pending = kept;
        dropped
    }
}
