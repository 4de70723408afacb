//! Safe handle - the only way to hold an engine pointer on the host side
//!
//! Design: one `SafeHandle` per acquisition, with:
//! 1. Exactly one native release, no matter how many times `release` runs
//! 2. Collection-driven invalidation that converges on the same terminal state
//! 3. Equality by pointer value, never by instance
//! 4. A slot for one before-collect delegate that lives as long as the handle
//! 5. Release hooks that run just before the native release, while the pointer
//!    is still held (owners use them to unhook and unpool). Collection drops
//!    them unrun.
//!
//! State machine: `Unbound -> Bound -> Closed`. `Closed` is terminal and both
//! transitions into it go through a single compare-exchange, so only the first
//! caller (release or collection) does any work.

use crate::error::{RefError, Result};
use crate::ffi::{Engine, HandleKind, NativePtr};
use crate::logging::{log_handle_acquired, log_handle_invalidated, log_handle_released, warn};
use crate::registry::{CollectFn, CollectRegistry};
use core::fmt;
use core::hash::{Hash, Hasher};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;


const UNBOUND: u8 = 0;
const BOUND: u8 = 1;
const CLOSED: u8 = 2;

/// Work run once, right before the native release.
pub(crate) type ReleaseFn = dyn FnOnce(NativePtr) + Send;

type ReleaseHooks = SmallVec<[Box<ReleaseFn>; 2]>;

/// Observable lifecycle state of a [`SafeHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Holds no pointer (null / "no value" result).
    Unbound,
    /// Holds a live pointer.
    Bound,
    /// Released or invalidated. Terminal.
    Closed,
}

struct HandleCore {
    ptr: NativePtr,
    kind: HandleKind,
    state: AtomicU8,
    engine: Option<Arc<dyn Engine>>,
    collect_hook: Mutex<Option<Arc<CollectFn>>>,
    release_hooks: Mutex<ReleaseHooks>,
}

impl HandleCore {
    fn new(ptr: NativePtr, kind: HandleKind, state: u8, engine: Option<Arc<dyn Engine>>) -> Self {
        Self {
            ptr,
            kind,
            state: AtomicU8::new(state),
            engine,
            collect_hook: Mutex::new(None),
            release_hooks: Mutex::new(SmallVec::new()),
        }
    }

    /// Bound -> Closed. Only the single caller that wins gets the release hooks.
    fn close(&self) -> Option<ReleaseHooks> {
        self.state
            .compare_exchange(BOUND, CLOSED, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // Drop the delegate so a later dispatch finds a dead subscriber.
        self.collect_hook.lock().take();
        Some(std::mem::take(&mut *self.release_hooks.lock()))
    }

    fn invalidate(&self) -> bool {
        // The engine already reclaimed the pointer: hooks are dropped unrun.
        let won = self.close().is_some();
        if won {
            log_handle_invalidated(self.kind, self.ptr);
        }
        won
    }
}

/// Owner of one acquisition of an engine pointer.
pub struct SafeHandle {
    core: Arc<HandleCore>,
}

impl SafeHandle {
    /// Wrap a pointer freshly returned by a native call.
    ///
    /// A null pointer is refused with [`RefError::InvalidHandle`].
    pub fn acquire(engine: &Arc<dyn Engine>, kind: HandleKind, ptr: NativePtr) -> Result<Self> {
        if ptr.is_null() {
            return Err(RefError::InvalidHandle { kind, ptr });
        }
        Ok(Self::bound(engine, kind, ptr))
    }

    /// Like [`acquire`](Self::acquire), for entry points where null is a
    /// legitimate "no value" answer (e.g. no current context).
    pub fn acquire_optional(engine: &Arc<dyn Engine>, kind: HandleKind, ptr: NativePtr) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(Self::bound(engine, kind, ptr))
        }
    }

    /// A handle that holds nothing. Never released, never valid.
    pub fn unbound(kind: HandleKind) -> Self {
        Self {
            core: Arc::new(HandleCore::new(NativePtr::NULL, kind, UNBOUND, None)),
        }
    }

    fn bound(engine: &Arc<dyn Engine>, kind: HandleKind, ptr: NativePtr) -> Self {
        log_handle_acquired(kind, ptr);
        Self {
            core: Arc::new(HandleCore::new(ptr, kind, BOUND, Some(Arc::clone(engine)))),
        }
    }

    #[inline]
    pub fn ptr(&self) -> NativePtr {
        self.core.ptr
    }

    #[inline]
    pub fn kind(&self) -> HandleKind {
        self.core.kind
    }

    pub fn state(&self) -> HandleState {
        match self.core.state.load(Ordering::Acquire) {
            UNBOUND => HandleState::Unbound,
            BOUND => HandleState::Bound,
            _ => HandleState::Closed,
        }
    }

    /// False for a null pointer or once closed.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.core.state.load(Ordering::Acquire) == BOUND
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.core.state.load(Ordering::Acquire) == CLOSED
    }

    /// Host-initiated close: calls the native release exactly once.
    ///
    /// Returns true if this call performed the release; later calls (and
    /// calls on an unbound or already-invalidated handle) are no-ops.
    pub fn release(&self) -> bool {
        let Some(hooks) = self.core.close() else {
            return false;
        };

        for hook in hooks {
            hook(self.core.ptr);
        }

        if let Some(engine) = &self.core.engine {
            let code = engine.release(self.core.kind, self.core.ptr);
            if !code.is_ok() {
                // Nothing to propagate to: the handle is closed either way.
                warn!(
                    target: "jsref::handle",
                    kind = self.core.kind.as_str(),
                    ptr = %self.core.ptr,
                    code = %code,
                    "native release failed"
                );
            }
        }
        log_handle_released(self.core.kind, self.core.ptr);
        true
    }

    /// Collection-initiated close: the engine is reclaiming the object, so
    /// no native release is issued.
    pub fn invalidate(&self) -> bool {
        self.core.invalidate()
    }

    /// Attach this handle's own before-collect delegate.
    ///
    /// The delegate invalidates the handle when the engine collects the
    /// object. It is kept alive by the handle and dropped when the handle
    /// closes, replacing any previously attached delegate. A host release
    /// forgets the pointer in `registry` before the native release.
    pub fn monitor_collection(&self, registry: &Arc<CollectRegistry>) -> Result<()> {
        if !self.is_valid() {
            return Err(RefError::Argument {
                ptr: self.ptr(),
                reason: "cannot monitor a closed or unbound handle",
            });
        }

        let core = Arc::downgrade(&self.core);
        let hook: Arc<CollectFn> = Arc::new(move |_ptr: NativePtr| -> Result<()> {
            if let Some(core) = core.upgrade() {
                core.invalidate();
            }
            Ok(())
        });

        *self.core.collect_hook.lock() = Some(Arc::clone(&hook));

        if let Err(err) = registry.monitor(self.kind(), self.ptr(), &hook) {
            self.core.collect_hook.lock().take();
            return Err(err);
        }

        let registry = Arc::downgrade(registry);
        self.on_release(move |ptr: NativePtr| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            if let Err(err) = registry.forget(ptr) {
                warn!(target: "jsref::handle", ptr = %ptr, error = %err, "failed to unhook before release");
            }
        });
        Ok(())
    }

    /// Queue `hook` to run right before the native release. Returns false,
    /// dropping the hook, if the handle is not bound.
    pub(crate) fn on_release(&self, hook: impl FnOnce(NativePtr) + Send + 'static) -> bool {
        // Checked under the lock so a racing close either sees the hook or
        // this call sees the closed state.
        let mut hooks = self.core.release_hooks.lock();
        if !self.is_valid() {
            return false;
        }
        hooks.push(Box::new(hook));
        true
    }

    pub fn has_collect_hook(&self) -> bool {
        self.core.collect_hook.lock().is_some()
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl PartialEq for SafeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.core.ptr == other.core.ptr
    }
}

impl Eq for SafeHandle {}

impl Hash for SafeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.core.ptr.hash(state);
    }
}

impl fmt::Debug for SafeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeHandle")
            .field("kind", &self.core.kind)
            .field("ptr", &self.core.ptr)
            .field("state", &self.state())
            .finish()
    }
}
