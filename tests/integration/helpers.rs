//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tempfile::TempDir;

use hookhost_core::config::RuntimeConfig;
use hookhost_runtime::compiler::{FactoryCatalog, ManifestCompiler};
use hookhost_runtime::hooks::{HotPatchHost, PatchDescriptor, PatchError, PatchHandle};
use hookhost_sdk::prelude::*;

/// Patch host that records every install and uninstall.
#[derive(Debug, Default)]
pub struct RecordingPatchHost {
    next: AtomicU64,
    installed: Mutex<Vec<(PatchHandle, PatchDescriptor)>>,
    events: Mutex<Vec<String>>,
    refuse: Mutex<Option<String>>,
}

impl RecordingPatchHost {
    /// Patch points currently installed.
    pub fn installed(&self) -> Vec<PatchDescriptor> {
        self.installed.lock().iter().map(|(_, d)| d.clone()).collect()
    }

    /// `install X` / `uninstall X` lines, in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Makes installs of `method` fail.
    pub fn refuse(&self, method: &str) {
        *self.refuse.lock() = Some(method.to_string());
    }
}

impl HotPatchHost for RecordingPatchHost {
    fn install(&self, descriptor: &PatchDescriptor) -> Result<PatchHandle, PatchError> {
        if self.refuse.lock().as_deref() == Some(descriptor.method.as_str()) {
            return Err(PatchError::TargetNotFound(descriptor.to_string()));
        }
        let handle = PatchHandle(self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.installed.lock().push((handle, descriptor.clone()));
        self.events.lock().push(format!("install {descriptor}"));
        Ok(handle)
    }

    fn uninstall(&self, handle: PatchHandle) -> Result<(), PatchError> {
        let mut installed = self.installed.lock();
        let index = installed
            .iter()
            .position(|(h, _)| *h == handle)
            .ok_or(PatchError::UnknownHandle(handle.0))?;
        let (_, descriptor) = installed.remove(index);
        self.events.lock().push(format!("uninstall {descriptor}"));
        Ok(())
    }
}

/// A runtime over a scratch unit directory.
pub struct TestHost {
    /// The runtime under test
    pub runtime: HookRuntime,
    /// Patch host wired into the runtime
    pub patches: Arc<RecordingPatchHost>,
    /// Native units manifests can name with `entry`
    pub factories: Arc<FactoryCatalog>,
    /// Scratch directory holding the manifests
    pub dir: TempDir,
}

impl TestHost {
    /// Create a runtime with a recording patch host
    pub fn new() -> Self {
        let patches = Arc::new(RecordingPatchHost::default());
        let factories = Arc::new(FactoryCatalog::new());
        let runtime = HookRuntime::new(
            RuntimeConfig::default(),
            patches.clone(),
            Arc::new(ManifestCompiler::new(factories.clone())),
        );
        Self {
            runtime,
            patches,
            factories,
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    /// Write a manifest into the unit directory
    pub fn write(&self, file: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(file);
        std::fs::write(&path, body).expect("Failed to write manifest");
        path
    }

    /// Register a native unit and write the manifest pointing at it
    pub fn native(&self, entry: &str, unit: Arc<dyn Unit>) -> PathBuf {
        self.factories.register(entry, move || unit.clone());
        self.write(&format!("{entry}.toml"), &format!("[unit]\nentry = \"{entry}\"\n"))
    }

    /// Define `hook` with the given policy
    pub fn define(&mut self, hook: &str, policy: ResultPolicy) {
        self.runtime
            .define_hook(HookDefinition::new(hook).with_policy(policy))
            .expect("Failed to define hook");
    }
}

/// Declarative manifest for a unit with no hooks
pub fn plain_unit(name: &str, version: &str) -> String {
    format!("[unit]\nname = \"{name}\"\nversion = \"{version}\"\n")
}

/// Declarative manifest for a unit requiring `dependency`
pub fn requiring_unit(name: &str, dependency: &str) -> String {
    format!(
        "[unit]\nname = \"{name}\"\nversion = \"1.0.0\"\n\n[[unit.references]]\nname = \"{dependency}\"\nrequired = true\n"
    )
}

/// A native unit answering `hook` with `answer` and counting its calls
pub fn counting_unit(name: &str, hook: &str, answer: HookValue) -> (Arc<dyn Unit>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let unit = UnitExportBuilder::new(unit_info!(name: name, version: "1.0.0"))
        .on(hook, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(answer.clone())
        })
        .build_arc();
    (unit, calls)
}
