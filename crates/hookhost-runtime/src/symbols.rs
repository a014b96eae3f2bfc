//! Symbol pool: interns hook names to stable small integers.
//!
//! The id of a name is the 32-bit FNV-1a hash of its UTF-8 bytes, so two
//! independently built units agree on ids without sharing an enumeration.
//! A genuine hash collision is resolved by linear probing; only then does
//! the id of the later name depend on registration order.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Interned identifier of a named extension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HookId(u32);

impl HookId {
    /// Returns the raw integer value.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(name: &str) -> u32 {
    name.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ byte as u32).wrapping_mul(FNV_PRIME))
}

/// Append-only, thread-safe name ↔ id mapping.
#[derive(Debug, Default)]
pub struct SymbolPool {
    /// Name → id.
    names: DashMap<Arc<str>, HookId>,
    /// Id → name.
    ids: DashMap<HookId, Arc<str>>,
}

impl SymbolPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, assigning one on first use.
    pub fn intern(&self, name: &str) -> HookId {
        if let Some(id) = self.names.get(name) {
            return *id;
        }

        match self.names.entry(Arc::from(name)) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let key = entry.key().clone();
                let id = self.claim(key);
                entry.insert(id);
                id
            }
        }
    }

    /// Finds a free id slot for `name`, starting at its hash.
    fn claim(&self, name: Arc<str>) -> HookId {
        let mut candidate = fnv1a(&name);
        loop {
            match self.ids.entry(HookId(candidate)) {
                Entry::Vacant(slot) => {
                    slot.insert(name);
                    return HookId(candidate);
                }
                Entry::Occupied(slot) if **slot.get() == *name => return HookId(candidate),
                Entry::Occupied(slot) => {
                    warn!(
                        hook = %name,
                        colliding_with = %slot.get(),
                        hook_id = %HookId(candidate),
                        "Hook name hash collision, probing next id"
                    );
                    candidate = candidate.wrapping_add(1);
                }
            }
        }
    }

    /// Returns the id for `name` without assigning one.
    pub fn lookup(&self, name: &str) -> Option<HookId> {
        self.names.get(name).map(|id| *id)
    }

    /// Returns the name an id was assigned to.
    pub fn resolve(&self, id: HookId) -> Option<Arc<str>> {
        self.ids.get(&id).map(|name| name.clone())
    }

    /// Resolves an id for log output, falling back to its numeric form.
    pub fn display_name(&self, id: HookId) -> String {
        self.resolve(id)
            .map(|name| name.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns whether nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
