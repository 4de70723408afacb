//! Engine boundary - the narrow C ABI contract this crate needs
//!
//! Design: Everything the reference core asks of the embedded engine goes
//! through the [`Engine`] trait:
//! 1. Release of a native handle (runtime dispose / value refcount drop)
//! 2. Registration of a native "before collect" callback per object
//! 3. Dynamic type tag of a value (for wrapper selection)
//!
//! The engine owns its heap; the host only ever sees [`NativePtr`] addresses.

use core::ffi::c_void;
use core::fmt;

/// Opaque address of an object inside the engine heap.
///
/// Identity is the address value. Two handles obtained from different native
/// calls that carry the same address denote the same engine object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct NativePtr(usize);

impl NativePtr {
    pub const NULL: NativePtr = NativePtr(0);

    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<*mut c_void> for NativePtr {
    fn from(ptr: *mut c_void) -> Self {
        Self::from_raw(ptr)
    }
}

/// Result code returned by every engine entry point.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct JsErrorCode(pub u32);

impl JsErrorCode {
    pub const NO_ERROR: Self = Self(0);

    // Usage category
    pub const INVALID_ARGUMENT: Self = Self(0x10001);
    pub const NULL_ARGUMENT: Self = Self(0x10002);
    pub const NO_CURRENT_CONTEXT: Self = Self(0x10003);
    pub const IN_EXCEPTION_STATE: Self = Self(0x10004);
    pub const NOT_IMPLEMENTED: Self = Self(0x10005);
    pub const WRONG_THREAD: Self = Self(0x10006);
    pub const RUNTIME_IN_USE: Self = Self(0x10007);
    pub const HEAP_ENUM_IN_PROGRESS: Self = Self(0x1000C);
    pub const IN_DISABLED_STATE: Self = Self(0x1000D);
    pub const CANNOT_DISABLE_EXECUTION: Self = Self(0x1000E);
    pub const IN_OBJECT_BEFORE_COLLECT_CALLBACK: Self = Self(0x10010);

    // Engine category
    pub const OUT_OF_MEMORY: Self = Self(0x20001);

    // Fatal category
    pub const FATAL: Self = Self(0x40001);

    /// Code the engine answers with when asked to attach a before-collect
    /// callback to a value that can never be collected (tagged numbers,
    /// primitive singletons). Shares its value with `INVALID_ARGUMENT`, so the
    /// registry only treats it as a no-op for values.
    pub const HOOK_UNSUPPORTED: Self = Self::INVALID_ARGUMENT;

    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 == Self::NO_ERROR.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::NO_ERROR => "NoError",
            Self::INVALID_ARGUMENT => "InvalidArgument",
            Self::NULL_ARGUMENT => "NullArgument",
            Self::NO_CURRENT_CONTEXT => "NoCurrentContext",
            Self::IN_EXCEPTION_STATE => "InExceptionState",
            Self::NOT_IMPLEMENTED => "NotImplemented",
            Self::WRONG_THREAD => "WrongThread",
            Self::RUNTIME_IN_USE => "RuntimeInUse",
            Self::HEAP_ENUM_IN_PROGRESS => "HeapEnumInProgress",
            Self::IN_DISABLED_STATE => "InDisabledState",
            Self::CANNOT_DISABLE_EXECUTION => "CannotDisableExecution",
            Self::IN_OBJECT_BEFORE_COLLECT_CALLBACK => "InObjectBeforeCollectCallback",
            Self::OUT_OF_MEMORY => "OutOfMemory",
            Self::FATAL => "Fatal",
            _ => return None,
        })
    }
}

impl fmt::Debug for JsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}({:#x})", name, self.0),
            None => write!(f, "JsErrorCode({:#x})", self.0),
        }
    }
}

impl fmt::Display for JsErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which family of engine object a handle refers to.
///
/// Decides the native release entry point: runtimes are disposed, contexts
/// and values drop one engine-side reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Runtime,
    Context,
    Value,
}

impl HandleKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Context => "context",
            Self::Value => "value",
        }
    }
}

/// Raw dynamic type tag written by the engine's "get value type" entry point.
pub type RawValueType = i32;

/// Native before-collect callback: `(object_ref, callback_state)`.
pub type BeforeCollectCallback = unsafe extern "C" fn(object: *mut c_void, state: *mut c_void);

/// The engine entry points the reference core consumes.
///
/// Implementations forward to the engine's C ABI. All calls are synchronous
/// and may run a collection (and therefore a before-collect callback) before
/// returning.
pub trait Engine: Send + Sync {
    /// Release one acquisition of `ptr`. Called at most once per acquisition.
    fn release(&self, kind: HandleKind, ptr: NativePtr) -> JsErrorCode;

    /// Attach (or with `None`, clear) the before-collect callback of `ptr`.
    fn set_before_collect_callback(
        &self,
        ptr: NativePtr,
        state: *mut c_void,
        callback: Option<BeforeCollectCallback>,
    ) -> JsErrorCode;

    /// Dynamic type tag of a value handle.
    fn value_type(&self, ptr: NativePtr) -> Result<RawValueType, JsErrorCode>;
}
