//! jsref - host-side lifetime management for embedded script engine objects
//!
//! Every runtime, context and value pointer the engine hands out is owned by
//! a [`SafeHandle`], interned in a [`ReferencePool`] so each live object has
//! exactly one host wrapper, and followed through the engine's before-collect
//! notification by a [`CollectRegistry`].

pub mod config;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod logging;
pub mod pool;
pub mod registry;
pub mod space;

#[cfg(test)]
mod testing;

// Re-export commonly used items
pub use config::RefConfig;
pub use error::{ErrorKind, RefError, Result};
pub use ffi::{Engine, HandleKind, JsErrorCode, NativePtr};
pub use handle::{HandleState, SafeHandle};
pub use pool::{
    ContextPool, Flyweight, JsContext, JsRuntime, JsValue, PoolStats, ReferencePool, Removal, RuntimePool,
    ValueKind, ValuePool,
};
pub use registry::{CollectFn, CollectRegistry, DispatchFailure, DispatchReport, RegistryStats};
pub use space::{RefSpace, SpaceStats};

/// Install the global logger from `JSREF_LOG_*` for hosts linking the static library.
#[no_mangle]
pub extern "C" fn jsref_init() {
    logging::init();
}
