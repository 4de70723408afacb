//! Value pool - wrappers for script values
//!
//! The wrapper kind is read once from the engine's type tag. Numbers and the
//! primitive singletons are never collected by the engine (it refuses their
//! before-collect hook), so their wrappers are pooled without monitoring.

use super::runtime::expect_kind;
use super::{Flyweight, ReferencePool};
use crate::error::{RefError, Result};
use crate::ffi::{Engine, HandleKind, NativePtr, RawValueType};
use crate::handle::SafeHandle;
use crate::registry::CollectRegistry;
use core::ops::Deref;
use std::sync::Arc;

/// Dynamic kind of a script value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    Null,
    Number,
    String,
    Boolean,
    Object,
    Function,
    Error,
    Array,
    Symbol,
    ArrayBuffer,
    TypedArray,
    DataView,
}

impl ValueKind {
    /// Map the engine's raw type tag; `None` for tags this crate does not know.
    pub fn from_raw(tag: RawValueType) -> Option<Self> {
        Some(match tag {
            0 => Self::Undefined,
            1 => Self::Null,
            2 => Self::Number,
            3 => Self::String,
            4 => Self::Boolean,
            5 => Self::Object,
            6 => Self::Function,
            7 => Self::Error,
            8 => Self::Array,
            9 => Self::Symbol,
            10 => Self::ArrayBuffer,
            11 => Self::TypedArray,
            12 => Self::DataView,
            _ => return None,
        })
    }

    pub fn as_raw(self) -> RawValueType {
        match self {
            Self::Undefined => 0,
            Self::Null => 1,
            Self::Number => 2,
            Self::String => 3,
            Self::Boolean => 4,
            Self::Object => 5,
            Self::Function => 6,
            Self::Error => 7,
            Self::Array => 8,
            Self::Symbol => 9,
            Self::ArrayBuffer => 10,
            Self::TypedArray => 11,
            Self::DataView => 12,
        }
    }

    /// Whether the engine accepts a before-collect hook on values of this kind.
    pub fn supports_collect_hook(self) -> bool {
        !matches!(self, Self::Undefined | Self::Null | Self::Number | Self::Boolean)
    }

    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            Self::Undefined | Self::Null | Self::Number | Self::String | Self::Boolean | Self::Symbol
        )
    }
}

/// Host wrapper for a script value.
#[derive(Debug)]
pub struct JsValue {
    handle: SafeHandle,
    kind: ValueKind,
}

impl JsValue {
    /// Classify `handle` through the engine and wrap it.
    pub fn classify(handle: SafeHandle, engine: &dyn Engine) -> Result<Self> {
        expect_kind(&handle, HandleKind::Value)?;
        let ptr = handle.ptr();
        let tag = engine
            .value_type(ptr)
            .map_err(|code| RefError::engine("value_type", ptr, code))?;
        let kind = ValueKind::from_raw(tag).ok_or(RefError::UnsupportedType { ptr, type_tag: tag })?;
        Ok(Self { handle, kind })
    }

    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.handle.ptr()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl Flyweight for JsValue {
    const POOL: &'static str = "value";

    fn handle(&self) -> &SafeHandle {
        &self.handle
    }

    fn monitors_collection(&self) -> bool {
        self.kind.supports_collect_hook()
    }
}

impl PartialEq for JsValue {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for JsValue {}

/// Interning table for [`JsValue`] wrappers.
pub struct ValuePool {
    inner: Arc<ReferencePool<JsValue>>,
}

impl ValuePool {
    pub fn new(registry: Arc<CollectRegistry>, capacity: usize) -> Self {
        Self::with_options(registry, capacity, true)
    }

    pub fn with_options(registry: Arc<CollectRegistry>, capacity: usize, leak_warnings: bool) -> Self {
        let engine = Arc::clone(registry.engine());
        Self {
            inner: ReferencePool::with_options(registry, capacity, leak_warnings, move |handle| {
                JsValue::classify(handle, engine.as_ref())
            }),
        }
    }
}

impl Deref for ValuePool {
    type Target = ReferencePool<JsValue>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
