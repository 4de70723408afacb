//! Error types for the reference core.

use crate::ffi::{HandleKind, JsErrorCode, NativePtr, RawValueType};
use thiserror::Error;

/// Error taxonomy kind, for callers that branch or log on the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    InvalidHandle,
    UnsupportedType,
    InvalidOperation,
    EngineUsage,
}

/// Main error type for handle, registry and pool operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefError {
    /// A null, default or already-closed handle was passed where a live one is required.
    #[error("invalid argument {ptr}: {reason}")]
    Argument { ptr: NativePtr, reason: &'static str },

    /// A native call produced a pointer the core refuses to wrap.
    #[error("engine returned an unusable {kind:?} handle {ptr}")]
    InvalidHandle { kind: HandleKind, ptr: NativePtr },

    /// The value's dynamic type tag has no wrapper kind.
    #[error("value {ptr} has unsupported type tag {type_tag}")]
    UnsupportedType { ptr: NativePtr, type_tag: RawValueType },

    /// An internal invariant broke (e.g. a pool slot vanished mid-construction).
    #[error("invalid operation on {ptr}: {reason}")]
    InvalidOperation { ptr: NativePtr, reason: &'static str },

    /// A native call failed with something other than a known benign code.
    #[error("engine call {call} failed for {ptr} with {code}")]
    EngineUsage {
        call: &'static str,
        ptr: NativePtr,
        code: JsErrorCode,
    },
}

impl RefError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Argument { .. } => ErrorKind::Argument,
            Self::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            Self::UnsupportedType { .. } => ErrorKind::UnsupportedType,
            Self::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            Self::EngineUsage { .. } => ErrorKind::EngineUsage,
        }
    }

    /// The native pointer the failure concerns.
    pub fn ptr(&self) -> NativePtr {
        match self {
            Self::Argument { ptr, .. }
            | Self::InvalidHandle { ptr, .. }
            | Self::UnsupportedType { ptr, .. }
            | Self::InvalidOperation { ptr, .. }
            | Self::EngineUsage { ptr, .. } => *ptr,
        }
    }

    pub(crate) fn engine(call: &'static str, ptr: NativePtr, code: JsErrorCode) -> Self {
        Self::EngineUsage { call, ptr, code }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RefError>;
