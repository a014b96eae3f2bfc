//! Hot-patch points: the host capability that splices dispatch into a
//! host entry point, and the catalog of definitions fetched for the
//! current host protocol.
//!
//! The runtime only decides *whether* a patch should be installed; the
//! host integration layer behind [`HotPatchHost`] decides *how*.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use hookhost_core::error::AppError;
use hookhost_core::result::AppResult;

use crate::manager::HookRuntime;
use crate::tick::TickQueue;

/// Opaque identification of a host entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchDescriptor {
    /// Fully qualified host type name.
    pub type_name: String,
    /// Method name plus signature.
    pub method: String,
}

impl PatchDescriptor {
    /// Creates a descriptor.
    pub fn new(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for PatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.method)
    }
}

/// Handle returned by a successful install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchHandle(pub u64);

/// Failure reported by the host patch primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatchError {
    /// The target entry point does not exist in this host build.
    #[error("patch target '{0}' not found")]
    TargetNotFound(String),
    /// The host refused or failed to apply the patch.
    #[error("patch of '{target}' failed: {reason}")]
    Failed {
        /// Entry point being patched.
        target: String,
        /// Host-provided reason.
        reason: String,
    },
    /// The handle is not (or no longer) known to the host.
    #[error("unknown patch handle {0}")]
    UnknownHandle(u64),
}

/// Host capability for installing and removing hot-patch points.
///
/// Both operations must be idempotent from the host's point of view.
pub trait HotPatchHost: Send + Sync {
    /// Installs the patch described by `descriptor`.
    fn install(&self, descriptor: &PatchDescriptor) -> Result<PatchHandle, PatchError>;

    /// Removes a previously installed patch.
    fn uninstall(&self, handle: PatchHandle) -> Result<(), PatchError>;
}

/// Patch host that only logs; used when the host raises every hook itself.
#[derive(Debug, Default)]
pub struct TracingPatchHost {
    next: AtomicU64,
}

impl TracingPatchHost {
    /// Creates a logging patch host.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HotPatchHost for TracingPatchHost {
    fn install(&self, descriptor: &PatchDescriptor) -> Result<PatchHandle, PatchError> {
        let handle = PatchHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        debug!(target_point = %descriptor, handle = handle.0, "Patch installed");
        Ok(handle)
    }

    fn uninstall(&self, handle: PatchHandle) -> Result<(), PatchError> {
        debug!(handle = handle.0, "Patch uninstalled");
        Ok(())
    }
}

/// A catalog entry: which entry point to patch for which hook, valid for
/// one host protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchDefinition {
    /// Hook raised by the patched entry point.
    pub hook: String,
    /// Entry point to patch.
    pub descriptor: PatchDescriptor,
    /// Host protocol the definition was generated for.
    pub protocol: String,
}

/// A definition the fetch refused, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedPatch {
    /// The definition as received.
    pub definition: PatchDefinition,
    /// Why it was refused.
    pub reason: String,
}

/// Outcome of one catalog fetch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchReport {
    /// Definitions matching the current protocol.
    pub accepted: Vec<PatchDefinition>,
    /// Definitions refused with a diagnostic.
    pub rejected: Vec<RejectedPatch>,
}

impl FetchReport {
    /// Splits `definitions` by whether they match `protocol`.
    pub fn validate(definitions: Vec<PatchDefinition>, protocol: &str) -> Self {
        let mut report = Self::default();
        for definition in definitions {
            if definition.hook.trim().is_empty() {
                report.rejected.push(RejectedPatch {
                    reason: "definition has an empty hook name".to_string(),
                    definition,
                });
            } else if definition.protocol != protocol {
                report.rejected.push(RejectedPatch {
                    reason: format!(
                        "protocol '{}' does not match host protocol '{}'",
                        definition.protocol, protocol
                    ),
                    definition,
                });
            } else {
                report.accepted.push(definition);
            }
        }
        report
    }
}

/// External source of hot-patch definitions.
#[async_trait]
pub trait PatchSource: Send + Sync {
    /// Fetches the full catalog.
    async fn fetch(&self) -> AppResult<Vec<PatchDefinition>>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Reads the catalog from a JSON file.
#[derive(Debug, Clone)]
pub struct FilePatchSource {
    path: PathBuf,
}

impl FilePatchSource {
    /// Creates a file source.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PatchSource for FilePatchSource {
    async fn fetch(&self) -> AppResult<Vec<PatchDefinition>> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            AppError::io(format!(
                "Failed to read patch catalog '{}': {e}",
                self.path.display()
            ))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Downloads the catalog from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpPatchSource {
    client: reqwest::Client,
    url: String,
}

impl HttpPatchSource {
    /// Creates an HTTP source.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl PatchSource for HttpPatchSource {
    async fn fetch(&self) -> AppResult<Vec<PatchDefinition>> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                AppError::external_service(format!("Patch catalog request failed: {e}"))
            })?;

        response.json().await.map_err(|e| {
            AppError::serialization(format!("Patch catalog response is not valid JSON: {e}"))
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Fetches a catalog off the tick thread and hands the accepted
/// definitions to the runtime through the tick queue.
pub struct PatchFetcher {
    source: Arc<dyn PatchSource>,
    protocol: String,
    queue: Arc<TickQueue<HookRuntime>>,
}

impl fmt::Debug for PatchFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchFetcher")
            .field("source", &self.source.describe())
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl PatchFetcher {
    /// Creates a fetcher.
    pub fn new(
        source: Arc<dyn PatchSource>,
        protocol: impl Into<String>,
        queue: Arc<TickQueue<HookRuntime>>,
    ) -> Self {
        Self {
            source,
            protocol: protocol.into(),
            queue,
        }
    }

    /// Fetches, validates and enqueues the catalog.
    pub async fn run(self) -> AppResult<FetchReport> {
        let origin = self.source.describe();
        let definitions = self.source.fetch().await?;
        let report = FetchReport::validate(definitions, &self.protocol);

        for rejected in &report.rejected {
            warn!(
                source = %origin,
                hook = %rejected.definition.hook,
                target_point = %rejected.definition.descriptor,
                reason = %rejected.reason,
                "Rejected hot-patch definition"
            );
        }

        info!(
            source = %origin,
            accepted = report.accepted.len(),
            rejected = report.rejected.len(),
            "Patch catalog fetched"
        );

        let accepted = report.accepted.clone();
        self.queue
            .enqueue(move |runtime: &mut HookRuntime| runtime.apply_patch_catalog(accepted));

        Ok(report)
    }
}
