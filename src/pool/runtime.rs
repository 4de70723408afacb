//! Runtime pool - wrappers for isolated engine instances

use super::{Flyweight, ReferencePool};
use crate::error::{RefError, Result};
use crate::ffi::{HandleKind, NativePtr};
use crate::handle::SafeHandle;
use crate::registry::CollectRegistry;
use core::ops::Deref;
use std::sync::Arc;

/// Host wrapper for an engine runtime.
#[derive(Debug)]
pub struct JsRuntime {
    handle: SafeHandle,
}

impl JsRuntime {
    pub fn new(handle: SafeHandle) -> Result<Self> {
        expect_kind(&handle, HandleKind::Runtime)?;
        Ok(Self { handle })
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.handle.ptr()
    }

    /// Dispose the runtime now instead of waiting for the last wrapper to drop.
    pub fn dispose(&self) -> bool {
        self.handle.release()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Flyweight for JsRuntime {
    const POOL: &'static str = "runtime";

    fn handle(&self) -> &SafeHandle {
        &self.handle
    }
}

/// Interning table for [`JsRuntime`] wrappers.
pub struct RuntimePool {
    inner: Arc<ReferencePool<JsRuntime>>,
}

impl RuntimePool {
    pub fn new(registry: Arc<CollectRegistry>, capacity: usize) -> Self {
        Self::with_options(registry, capacity, true)
    }

    pub fn with_options(registry: Arc<CollectRegistry>, capacity: usize, leak_warnings: bool) -> Self {
        Self {
            inner: ReferencePool::with_options(registry, capacity, leak_warnings, JsRuntime::new),
        }
    }
}

impl Deref for RuntimePool {
    type Target = ReferencePool<JsRuntime>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Refuse a handle of the wrong family before it is wrapped.
pub(super) fn expect_kind(handle: &SafeHandle, kind: HandleKind) -> Result<()> {
    if handle.kind() == kind {
        Ok(())
    } else {
        Err(RefError::Argument {
            ptr: handle.ptr(),
            reason: match kind {
                HandleKind::Runtime => "expected a runtime handle",
                HandleKind::Context => "expected a context handle",
                HandleKind::Value => "expected a value handle",
            },
        })
    }
}
