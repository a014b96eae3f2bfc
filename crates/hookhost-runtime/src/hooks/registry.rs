//! Subscription registry: tracks which units care about each hook and
//! keeps the hook's hot-patch points installed exactly while somebody does.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use hookhost_core::error::AppError;
use hookhost_core::result::AppResult;

use super::patch::{HotPatchHost, PatchDescriptor, PatchHandle};
use crate::symbols::{HookId, SymbolPool};

/// Read-only view of one registry entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionView {
    /// Hook id.
    pub hook_id: HookId,
    /// Hook name.
    pub hook: String,
    /// Subscribed unit names, sorted.
    pub subscribers: Vec<String>,
    /// Entry points currently patched for this hook.
    pub installed_patches: Vec<PatchDescriptor>,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Hook → subscriber names. Entries are never left empty.
    subscribers: HashMap<HookId, Arc<BTreeSet<String>>>,
    /// Hook → entry points that must be patched while subscribed.
    patches: HashMap<HookId, Vec<PatchDescriptor>>,
    /// Hook → installed patches.
    installed: HashMap<HookId, Vec<(PatchDescriptor, PatchHandle)>>,
}

/// Registry of hook subscriptions, driving hot-patch install/uninstall.
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
    host: Arc<dyn HotPatchHost>,
    symbols: Arc<SymbolPool>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("hooks", &state.subscribers.len())
            .field("installed", &state.installed.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry backed by `host`.
    pub fn new(host: Arc<dyn HotPatchHost>, symbols: Arc<SymbolPool>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            host,
            symbols,
        }
    }

    /// Adds `subscriber` to `hook`.
    ///
    /// The first subscriber installs the hook's patch points before this
    /// returns; if that fails nothing is recorded and the error is returned.
    pub fn subscribe(&self, hook: HookId, subscriber: &str) -> AppResult<()> {
        let mut state = self.state.lock();

        let known = state
            .subscribers
            .get(&hook)
            .map(|set| set.contains(subscriber));
        match known {
            Some(true) => return Ok(()),
            Some(false) => {}
            None => self.install_locked(&mut state, hook)?,
        }

        Arc::make_mut(state.subscribers.entry(hook).or_default()).insert(subscriber.to_string());

        debug!(
            hook = %self.symbols.display_name(hook),
            hook_id = %hook,
            subscriber = %subscriber,
            "Subscribed"
        );
        Ok(())
    }

    /// Removes `subscriber` from `hook`.
    ///
    /// Removing the last subscriber uninstalls the patch points first; if
    /// that fails the subscriber stays registered and the error is returned.
    pub fn unsubscribe(&self, hook: HookId, subscriber: &str) -> AppResult<()> {
        let mut state = self.state.lock();
        self.unsubscribe_locked(&mut state, hook, subscriber)
    }

    /// Removes `subscriber` from every hook, returning the hooks it left.
    pub fn unsubscribe_all(&self, subscriber: &str) -> Vec<HookId> {
        let mut state = self.state.lock();
        let mut hooks: Vec<HookId> = state
            .subscribers
            .iter()
            .filter(|(_, set)| set.contains(subscriber))
            .map(|(hook, _)| *hook)
            .collect();
        hooks.sort();

        hooks.retain(|hook| match self.unsubscribe_locked(&mut state, *hook, subscriber) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    hook = %self.symbols.display_name(*hook),
                    subscriber = %subscriber,
                    error = %e,
                    "Failed to unsubscribe"
                );
                false
            }
        });
        hooks
    }

    fn unsubscribe_locked(
        &self,
        state: &mut RegistryState,
        hook: HookId,
        subscriber: &str,
    ) -> AppResult<()> {
        let last = match state.subscribers.get(&hook) {
            Some(set) if set.contains(subscriber) => set.len() == 1,
            _ => return Ok(()),
        };

        if last {
            self.uninstall_locked(state, hook)?;
            state.subscribers.remove(&hook);
        } else if let Some(set) = state.subscribers.get_mut(&hook) {
            Arc::make_mut(set).remove(subscriber);
        }

        debug!(
            hook = %self.symbols.display_name(hook),
            hook_id = %hook,
            subscriber = %subscriber,
            "Unsubscribed"
        );
        Ok(())
    }

    /// Returns whether `hook` has at least one subscriber.
    pub fn is_subscribed(&self, hook: HookId) -> bool {
        self.state.lock().subscribers.contains_key(&hook)
    }

    /// Returns whether `subscriber` is registered for `hook`.
    pub fn is_subscriber(&self, hook: HookId, subscriber: &str) -> bool {
        self.state
            .lock()
            .subscribers
            .get(&hook)
            .is_some_and(|set| set.contains(subscriber))
    }

    /// Cheap snapshot of the subscriber set of `hook`.
    pub fn subscribers(&self, hook: HookId) -> Option<Arc<BTreeSet<String>>> {
        self.state.lock().subscribers.get(&hook).cloned()
    }

    /// Entry points currently patched for `hook`.
    pub fn installed_patches(&self, hook: HookId) -> Vec<PatchDescriptor> {
        self.state
            .lock()
            .installed
            .get(&hook)
            .map(|list| list.iter().map(|(d, _)| d.clone()).collect())
            .unwrap_or_default()
    }

    /// Replaces the patch points of `hook`, reconciling installed patches
    /// when the hook currently has subscribers. On failure the previous
    /// patch set stays in force.
    pub fn set_patches(&self, hook: HookId, descriptors: Vec<PatchDescriptor>) -> AppResult<()> {
        let mut state = self.state.lock();

        if !state.subscribers.contains_key(&hook) {
            state.patches.insert(hook, descriptors);
            return Ok(());
        }

        let current = state.installed.remove(&hook).unwrap_or_default();
        let mut kept = Vec::new();
        let mut stale = Vec::new();
        for (descriptor, handle) in current {
            if descriptors.contains(&descriptor) {
                kept.push((descriptor, handle));
            } else {
                stale.push((descriptor, handle));
            }
        }

        let mut added = Vec::new();
        for descriptor in &descriptors {
            if kept.iter().any(|(d, _)| d == descriptor) {
                continue;
            }
            match self.host.install(descriptor) {
                Ok(handle) => added.push((descriptor.clone(), handle)),
                Err(e) => {
                    self.release(&added);
                    kept.extend(stale);
                    state.installed.insert(hook, kept);
                    return Err(AppError::patch_install(format!(
                        "Failed to patch '{}' for hook '{}': {e}",
                        descriptor,
                        self.symbols.display_name(hook)
                    )));
                }
            }
        }

        self.release(&stale);
        kept.extend(added);
        state.installed.insert(hook, kept);
        state.patches.insert(hook, descriptors);
        Ok(())
    }

    /// Read-only snapshot of all entries, sorted by hook name.
    pub fn snapshot(&self) -> Vec<SubscriptionView> {
        let state = self.state.lock();
        let mut views: Vec<SubscriptionView> = state
            .subscribers
            .iter()
            .map(|(hook, set)| SubscriptionView {
                hook_id: *hook,
                hook: self.symbols.display_name(*hook),
                subscribers: set.iter().cloned().collect(),
                installed_patches: state
                    .installed
                    .get(hook)
                    .map(|list| list.iter().map(|(d, _)| d.clone()).collect())
                    .unwrap_or_default(),
            })
            .collect();
        views.sort_by(|a, b| a.hook.cmp(&b.hook));
        views
    }

    fn install_locked(&self, state: &mut RegistryState, hook: HookId) -> AppResult<()> {
        let descriptors = state.patches.get(&hook).cloned().unwrap_or_default();
        if descriptors.is_empty() {
            return Ok(());
        }

        let mut installed = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            match self.host.install(&descriptor) {
                Ok(handle) => installed.push((descriptor, handle)),
                Err(e) => {
                    self.release(&installed);
                    error!(
                        hook = %self.symbols.display_name(hook),
                        target_point = %descriptor,
                        error = %e,
                        "Hot-patch install failed"
                    );
                    return Err(AppError::patch_install(format!(
                        "Failed to patch '{}' for hook '{}': {e}",
                        descriptor,
                        self.symbols.display_name(hook)
                    )));
                }
            }
        }

        info!(
            hook = %self.symbols.display_name(hook),
            patches = installed.len(),
            "Hot-patch points installed"
        );
        state.installed.insert(hook, installed);
        Ok(())
    }

    fn uninstall_locked(&self, state: &mut RegistryState, hook: HookId) -> AppResult<()> {
        let Some(installed) = state.installed.remove(&hook) else {
            return Ok(());
        };

        let mut removed: Vec<PatchDescriptor> = Vec::with_capacity(installed.len());
        for (index, (descriptor, handle)) in installed.iter().enumerate() {
            if let Err(e) = self.host.uninstall(*handle) {
                // Put back what was already removed so the hook stays fully patched.
                let mut restored = Vec::with_capacity(installed.len());
                for d in &removed {
                    match self.host.install(d) {
                        Ok(h) => restored.push((d.clone(), h)),
                        Err(re) => error!(
                            hook = %self.symbols.display_name(hook),
                            target_point = %d,
                            error = %re,
                            "Failed to restore hot-patch point during rollback"
                        ),
                    }
                }
                restored.extend(installed[index..].iter().cloned());
                state.installed.insert(hook, restored);

                return Err(AppError::patch_install(format!(
                    "Failed to unpatch '{}' for hook '{}': {e}",
                    descriptor,
                    self.symbols.display_name(hook)
                )));
            }
            removed.push(descriptor.clone());
        }

        info!(
            hook = %self.symbols.display_name(hook),
            patches = removed.len(),
            "Hot-patch points uninstalled"
        );
        Ok(())
    }

    /// Best-effort uninstall used on rollback paths.
    fn release(&self, patches: &[(PatchDescriptor, PatchHandle)]) {
        for (descriptor, handle) in patches {
            if let Err(e) = self.host.uninstall(*handle) {
                warn!(target_point = %descriptor, error = %e, "Rollback uninstall failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::patch::PatchError;
    use std::collections::HashSet;

    #[derive(Default)]
    struct FakeHost {
        next: Mutex<u64>,
        live: Mutex<HashSet<u64>>,
        refuse_install: Mutex<HashSet<String>>,
        refuse_uninstall: Mutex<bool>,
    }

    impl HotPatchHost for FakeHost {
        fn install(&self, d: &PatchDescriptor) -> Result<PatchHandle, PatchError> {
            if self.refuse_install.lock().contains(&d.method) {
                return Err(PatchError::TargetNotFound(d.to_string()));
            }
            let mut next = self.next.lock();
            *next += 1;
            self.live.lock().insert(*next);
            Ok(PatchHandle(*next))
        }

        fn uninstall(&self, handle: PatchHandle) -> Result<(), PatchError> {
            if *self.refuse_uninstall.lock() {
                return Err(PatchError::UnknownHandle(handle.0));
            }
            self.live.lock().remove(&handle.0);
            Ok(())
        }
    }

    fn setup() -> (Arc<FakeHost>, SubscriptionRegistry, HookId) {
        let host = Arc::new(FakeHost::default());
        let symbols = Arc::new(SymbolPool::new());
        let hook = symbols.intern("OnTick");
        let registry = SubscriptionRegistry::new(host.clone(), symbols);
        registry
            .set_patches(hook, vec![PatchDescriptor::new("Server", "Tick()")])
            .expect("patches");
        (host, registry, hook)
    }

    #[test]
    fn test_install_follows_subscriber_count() {
        let (host, registry, hook) = setup();
        assert!(host.live.lock().is_empty());

        registry.subscribe(hook, "alpha").expect("sub");
        registry.subscribe(hook, "beta").expect("sub");
        assert_eq!(host.live.lock().len(), 1);

        registry.unsubscribe(hook, "alpha").expect("unsub");
        assert_eq!(host.live.lock().len(), 1);
        registry.unsubscribe(hook, "beta").expect("unsub");
        assert!(host.live.lock().is_empty());
        assert!(!registry.is_subscribed(hook));
    }

    #[test]
    fn test_operations_are_idempotent() {
        let (host, registry, hook) = setup();
        registry.subscribe(hook, "alpha").expect("sub");
        registry.subscribe(hook, "alpha").expect("sub twice");
        assert_eq!(host.live.lock().len(), 1);
        registry.unsubscribe(hook, "ghost").expect("absent");
        registry.unsubscribe(hook, "alpha").expect("unsub");
        registry.unsubscribe(hook, "alpha").expect("unsub twice");
        assert!(host.live.lock().is_empty());
    }

    #[test]
    fn test_failed_install_leaves_registry_empty() {
        let (host, registry, hook) = setup();
        host.refuse_install.lock().insert("Tick()".to_string());
        let err = registry.subscribe(hook, "alpha").expect_err("install fails");
        assert_eq!(err.kind, hookhost_core::ErrorKind::PatchInstall);
        assert!(!registry.is_subscribed(hook));
        assert!(host.live.lock().is_empty());
    }

    #[test]
    fn test_partial_install_is_rolled_back() {
        let (host, registry, hook) = setup();
        registry
            .set_patches(
                hook,
                vec![
                    PatchDescriptor::new("Server", "Tick()"),
                    PatchDescriptor::new("Server", "LateTick()"),
                ],
            )
            .expect("patches");
        host.refuse_install.lock().insert("LateTick()".to_string());
        assert!(registry.subscribe(hook, "alpha").is_err());
        assert!(host.live.lock().is_empty());
    }

    #[test]
    fn test_failed_uninstall_keeps_subscriber() {
        let (host, registry, hook) = setup();
        registry.subscribe(hook, "alpha").expect("sub");
        *host.refuse_uninstall.lock() = true;
        assert!(registry.unsubscribe(hook, "alpha").is_err());
        assert!(registry.is_subscriber(hook, "alpha"));
        assert_eq!(registry.installed_patches(hook).len(), 1);
    }

    #[test]
    fn test_hook_without_patches_needs_no_install() {
        let host = Arc::new(FakeHost::default());
        let symbols = Arc::new(SymbolPool::new());
        let hook = symbols.intern("OnChat");
        let registry = SubscriptionRegistry::new(host.clone(), symbols);
        registry.subscribe(hook, "alpha").expect("sub");
        assert!(registry.is_subscribed(hook));
        assert!(host.live.lock().is_empty());
    }

    #[test]
    fn test_set_patches_reconciles_live_hook() {
        let (host, registry, hook) = setup();
        registry.subscribe(hook, "alpha").expect("sub");
        registry
            .set_patches(hook, vec![PatchDescriptor::new("Server", "FixedTick()")])
            .expect("swap");
        assert_eq!(
            registry.installed_patches(hook),
            vec![PatchDescriptor::new("Server", "FixedTick()")]
        );
        assert_eq!(host.live.lock().len(), 1);
    }

    #[test]
    fn test_set_patches_failure_keeps_previous_set() {
        let (host, registry, hook) = setup();
        registry.subscribe(hook, "alpha").expect("sub");
        host.refuse_install.lock().insert("Broken()".to_string());
        assert!(
            registry
                .set_patches(hook, vec![PatchDescriptor::new("Server", "Broken()")])
                .is_err()
        );
        assert_eq!(
            registry.installed_patches(hook),
            vec![PatchDescriptor::new("Server", "Tick()")]
        );
    }

    #[test]
    fn test_unsubscribe_all() {
        let (_host, registry, hook) = setup();
        let other = registry.symbols.intern("OnSave");
        registry.subscribe(hook, "alpha").expect("sub");
        registry.subscribe(other, "alpha").expect("sub");
        registry.subscribe(other, "beta").expect("sub");
        let left = registry.unsubscribe_all("alpha");
        assert_eq!(left.len(), 2);
        assert!(!registry.is_subscribed(hook));
        assert!(registry.is_subscriber(other, "beta"));
        assert_eq!(registry.snapshot().len(), 1);
    }
}
