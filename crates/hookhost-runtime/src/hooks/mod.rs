//! Hook values, the known-hook catalog, subscriptions, hot-patch points
//! and dispatch.

pub mod definitions;
pub mod dispatcher;
pub mod patch;
pub mod pool;
pub mod registry;

pub use definitions::{ArgMode, HookArgs, HookCatalog, HookDefinition, HookValue, ResultPolicy};
pub use dispatcher::HookDispatcher;
pub use patch::{
    FetchReport, FilePatchSource, HotPatchHost, HttpPatchSource, PatchDefinition, PatchDescriptor,
    PatchError, PatchFetcher, PatchHandle, PatchSource, RejectedPatch, TracingPatchHost,
};
pub use pool::ArgPool;
pub use registry::{SubscriptionRegistry, SubscriptionView};
