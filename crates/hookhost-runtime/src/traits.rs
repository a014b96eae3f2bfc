//! Closure-backed handlers for quick handler creation.

use std::sync::Arc;

use crate::hooks::definitions::HookValue;
use crate::unit::{HookHandler, HookReturn};

type CallFn = dyn Fn(&[HookValue]) -> HookReturn + Send + Sync;
type CallRefFn = dyn Fn(&mut [HookValue]) -> HookReturn + Send + Sync;

/// A handler wrapping a closure over read-only arguments.
#[derive(Clone)]
pub struct FnHandler {
    handler: Arc<CallFn>,
}

impl std::fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnHandler")
            .field("handler", &"<closure>")
            .finish()
    }
}

impl FnHandler {
    /// Wraps `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Wraps `handler` into an `Arc<dyn HookHandler>`.
    pub fn wrap<F>(handler: F) -> Arc<dyn HookHandler>
    where
        F: Fn(&[HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        Arc::new(Self::new(handler))
    }
}

impl HookHandler for FnHandler {
    fn call(&self, args: &[HookValue]) -> HookReturn {
        (self.handler)(args)
    }
}

/// A handler wrapping a closure that may rewrite by-ref arguments.
#[derive(Clone)]
pub struct FnRefHandler {
    handler: Arc<CallRefFn>,
}

impl std::fmt::Debug for FnRefHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnRefHandler")
            .field("handler", &"<closure>")
            .finish()
    }
}

impl FnRefHandler {
    /// Wraps `handler`.
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&mut [HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Wraps `handler` into an `Arc<dyn HookHandler>`.
    pub fn wrap<F>(handler: F) -> Arc<dyn HookHandler>
    where
        F: Fn(&mut [HookValue]) -> HookReturn + Send + Sync + 'static,
    {
        Arc::new(Self::new(handler))
    }
}

impl HookHandler for FnRefHandler {
    fn call(&self, args: &[HookValue]) -> HookReturn {
        let mut scratch = args.to_vec();
        (self.handler)(&mut scratch)
    }

    fn call_by_ref(&self, args: &mut [HookValue]) -> HookReturn {
        (self.handler)(args)
    }
}
