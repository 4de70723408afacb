//! Context pool - wrappers for execution contexts
//!
//! Contexts always accept a before-collect hook, so every wrapper monitors its
//! own collection from the moment it is built. Releasing the handle unhooks
//! the pointer first; the native side keys callbacks by object, not by delegate.

use super::runtime::expect_kind;
use super::{Flyweight, ReferencePool};
use crate::error::Result;
use crate::ffi::{HandleKind, NativePtr};
use crate::handle::SafeHandle;
use crate::registry::CollectRegistry;
use core::ops::Deref;
use std::sync::Arc;

/// Host wrapper for an engine execution context.
pub struct JsContext {
    handle: SafeHandle,
}

impl JsContext {
    /// Wrap `handle` and attach its before-collect hook.
    pub fn new(handle: SafeHandle, registry: &Arc<CollectRegistry>) -> Result<Self> {
        expect_kind(&handle, HandleKind::Context)?;
        handle.monitor_collection(registry)?;
        Ok(Self { handle })
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.handle.ptr()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Flyweight for JsContext {
    const POOL: &'static str = "context";

    fn handle(&self) -> &SafeHandle {
        &self.handle
    }
}

impl core::fmt::Debug for JsContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JsContext").field("handle", &self.handle).finish()
    }
}

/// Interning table for [`JsContext`] wrappers.
pub struct ContextPool {
    inner: Arc<ReferencePool<JsContext>>,
}

impl ContextPool {
    pub fn new(registry: Arc<CollectRegistry>, capacity: usize) -> Self {
        Self::with_options(registry, capacity, true)
    }

    pub fn with_options(registry: Arc<CollectRegistry>, capacity: usize, leak_warnings: bool) -> Self {
        let for_factory = Arc::clone(&registry);
        Self {
            inner: ReferencePool::with_options(registry, capacity, leak_warnings, move |handle| {
                JsContext::new(handle, &for_factory)
            }),
        }
    }
}

impl Deref for ContextPool {
    type Target = ReferencePool<JsContext>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
