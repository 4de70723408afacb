//! Reference pools - one live host wrapper per live engine pointer
//!
//! Design: A concurrent interning table from `NativePtr` to a per-pointer slot
//! holding a `Weak` to the wrapper ("flyweight"):
//! 1. `get_or_add` is single-flight: the factory runs under the slot's own lock,
//!    never under a map shard lock, so a collection nested inside a native call
//!    cannot deadlock on the table
//! 2. A cache hit releases the caller's redundant handle
//! 3. A decayed weak reference is replaced in place under the slot lock
//! 4. The pool subscribes its removal handler to the before-collect registry
//!    once the slot is visible, and disposes the wrapper on collection
//! 5. A host release of the pooled wrapper evicts its slot and unhooks the
//!    pointer before the native release, so values the engine never collects
//!    do not pile up
//!
//! Concrete pools:
//! - `runtime.rs` - engine instances
//! - `context.rs` - execution contexts (self-monitoring handle)
//! - `value.rs`   - script values (kind chosen from the type tag)

mod context;
mod runtime;
mod value;


pub use context::{ContextPool, JsContext};
pub use runtime::{JsRuntime, RuntimePool};
pub use value::{JsValue, ValuePool, ValueKind};

use crate::error::{RefError, Result};
use crate::ffi::NativePtr;
use crate::handle::SafeHandle;
use crate::logging::{log_pool_evicted, log_pool_hit, log_pool_insert, log_pool_removed, log_pool_teardown, warn};
use crate::registry::{CollectFn, CollectRegistry};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Host wrapper interned by a [`ReferencePool`].
pub trait Flyweight: Send + Sync + Sized + 'static {
    /// Pool name used in log events.
    const POOL: &'static str;

    fn handle(&self) -> &SafeHandle;

    #[inline]
    fn ptr(&self) -> NativePtr {
        self.handle().ptr()
    }

    #[inline]
    fn is_disposed(&self) -> bool {
        self.handle().is_closed()
    }

    /// Whether the pool should follow this object's collection. Wrappers for
    /// values the engine never collects opt out.
    fn monitors_collection(&self) -> bool {
        true
    }

    /// Type-specific cleanup run just before the pool disposes the wrapper.
    fn release_js_reference(&self) -> Result<()> {
        Ok(())
    }
}

/// Why a wrapper leaves the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The engine is reclaiming the object; the handle is invalidated.
    Collected,
    /// The pool is being torn down; the pointer is unhooked, then released.
    Teardown,
}

type Factory<W> = Box<dyn Fn(SafeHandle) -> Result<W> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Open,
    /// Its wrapper was released by the host. Callers move on to a fresh slot.
    Evicted,
    /// Removed by collection or teardown; must never be filled again.
    Retired,
}

struct SlotState<W> {
    wrapper: Weak<W>,
    /// Wrappers constructed into this slot so far.
    generation: u64,
    status: SlotStatus,
}

struct Slot<W> {
    state: Mutex<SlotState<W>>,
}

impl<W> Slot<W> {
    fn empty() -> Self {
        Self {
            state: Mutex::new(SlotState {
                wrapper: Weak::new(),
                generation: 0,
                status: SlotStatus::Open,
            }),
        }
    }
}

#[derive(Default)]
struct PoolCounters {
    created: AtomicUsize,
    reused: AtomicUsize,
    replaced: AtomicUsize,
    removed: AtomicUsize,
    evicted: AtomicUsize,
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub entries: usize,
    pub created: usize,
    pub reused: usize,
    pub replaced: usize,
    pub removed: usize,
    /// Entries dropped because the host released their wrapper.
    pub evicted: usize,
}

pub struct ReferencePool<W: Flyweight> {
    slots: DashMap<NativePtr, Arc<Slot<W>>>,
    factory: Factory<W>,
    registry: Arc<CollectRegistry>,
    /// Strong owner of the removal subscriber; the registry only holds it weakly.
    remover: Arc<CollectFn>,
    me: Weak<Self>,
    counters: PoolCounters,
    leak_warnings: bool,
}

impl<W: Flyweight> ReferencePool<W> {
    pub fn new<F>(registry: Arc<CollectRegistry>, capacity: usize, factory: F) -> Arc<Self>
    where
        F: Fn(SafeHandle) -> Result<W> + Send + Sync + 'static,
    {
        Self::with_options(registry, capacity, true, factory)
    }

    pub fn with_options<F>(
        registry: Arc<CollectRegistry>,
        capacity: usize,
        leak_warnings: bool,
        factory: F,
    ) -> Arc<Self>
    where
        F: Fn(SafeHandle) -> Result<W> + Send + Sync + 'static,
    {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let pool = me.clone();
            let remover: Arc<CollectFn> = Arc::new(move |ptr: NativePtr| -> Result<()> {
                match pool.upgrade() {
                    Some(pool) => pool.remove_handle(ptr, Removal::Collected).map(|_| ()),
                    None => Ok(()),
                }
            });

            Self {
                slots: DashMap::with_capacity(capacity),
                factory: Box::new(factory),
                registry,
                remover,
                me: me.clone(),
                counters: PoolCounters::default(),
                leak_warnings,
            }
        })
    }

    pub fn registry(&self) -> &Arc<CollectRegistry> {
        &self.registry
    }

    fn slot(&self, ptr: NativePtr) -> Arc<Slot<W>> {
        Arc::clone(self.slots.entry(ptr).or_insert_with(|| Arc::new(Slot::empty())).value())
    }

    fn unlink(&self, ptr: NativePtr, slot: &Arc<Slot<W>>) {
        self.slots.remove_if(&ptr, |_, current| Arc::ptr_eq(current, slot));
    }

    /// Intern a wrapper built by a creation-style call.
    ///
    /// Returns `Ok(false)` without overwriting when a live wrapper is already
    /// pooled for the pointer. A decayed entry is filled with `wrapper`.
    pub fn try_add(&self, wrapper: &Arc<W>) -> Result<bool> {
        let handle = wrapper.handle();
        if !handle.is_valid() {
            return Err(RefError::Argument {
                ptr: handle.ptr(),
                reason: "cannot pool a closed or unbound handle",
            });
        }

        let ptr = handle.ptr();
        loop {
            let slot = self.slot(ptr);
            let mut state = slot.state.lock();
            match state.status {
                SlotStatus::Open => {}
                SlotStatus::Evicted => {
                    drop(state);
                    self.unlink(ptr, &slot);
                    continue;
                }
                SlotStatus::Retired => {
                    return Err(RefError::InvalidOperation {
                        ptr,
                        reason: "pool entry was removed while being filled",
                    })
                }
            }

            // A disposed wrapper holds a closed handle, so dropping it here
            // never re-enters the pool.
            let live = state.wrapper.upgrade().filter(|existing| !existing.is_disposed());
            if live.is_some() {
                drop(state);
                return Ok(false);
            }
            state.wrapper = Arc::downgrade(wrapper);
            state.generation += 1;
            let replaced = state.generation > 1;
            drop(state);

            self.record_insert(ptr, replaced);
            self.attach(ptr, wrapper, &slot)?;
            return Ok(true);
        }
    }

    /// Resolve the canonical wrapper for a freshly acquired handle.
    ///
    /// On a hit the supplied handle is redundant and is released here. On a
    /// miss (or a decayed entry) the factory builds the wrapper from it.
    pub fn get_or_add(&self, handle: SafeHandle) -> Result<Arc<W>> {
        if !handle.is_valid() {
            return Err(RefError::Argument {
                ptr: handle.ptr(),
                reason: "cannot resolve a closed or unbound handle",
            });
        }

        let ptr = handle.ptr();
        loop {
            let slot = self.slot(ptr);
            let state = slot.state.lock();
            match state.status {
                SlotStatus::Open => return self.resolve(ptr, &slot, state, handle),
                SlotStatus::Evicted => {
                    drop(state);
                    self.unlink(ptr, &slot);
                }
                SlotStatus::Retired => {
                    return Err(RefError::InvalidOperation {
                        ptr,
                        reason: "pool entry was removed while being resolved",
                    })
                }
            }
        }
    }

    fn resolve(
        &self,
        ptr: NativePtr,
        slot: &Arc<Slot<W>>,
        mut state: MutexGuard<'_, SlotState<W>>,
        handle: SafeHandle,
    ) -> Result<Arc<W>> {
        if let Some(existing) = state.wrapper.upgrade().filter(|existing| !existing.is_disposed()) {
            drop(state);
            handle.release();
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            log_pool_hit(W::POOL, ptr);
            return Ok(existing);
        }

        let wrapper = match (self.factory)(handle) {
            Ok(wrapper) => Arc::new(wrapper),
            Err(err) => {
                let untouched = state.generation == 0;
                drop(state);
                if untouched {
                    self.discard_empty(ptr, slot);
                }
                return Err(err);
            }
        };

        state.wrapper = Arc::downgrade(&wrapper);
        state.generation += 1;
        let replaced = state.generation > 1;
        drop(state);

        self.record_insert(ptr, replaced);
        self.attach(ptr, &wrapper, slot)?;
        Ok(wrapper)
    }

    /// Live wrapper for `ptr`, if one is pooled. Touches no engine state.
    pub fn get(&self, ptr: NativePtr) -> Option<Arc<W>> {
        let slot = self.slots.get(&ptr).map(|slot| Arc::clone(slot.value()))?;
        let wrapper = slot.state.lock().wrapper.upgrade();
        wrapper
    }

    pub fn contains(&self, ptr: NativePtr) -> bool {
        self.get(ptr).is_some()
    }

    /// Forget `ptr` and dispose its wrapper if it is still alive.
    ///
    /// Returns whether a live wrapper was disposed. Removing an unknown
    /// pointer is a no-op. On teardown the pointer is unhooked while the
    /// handle still holds it, then released.
    pub fn remove_handle(&self, ptr: NativePtr, reason: Removal) -> Result<bool> {
        let Some((_, slot)) = self.slots.remove(&ptr) else {
            return Ok(false);
        };

        let wrapper = {
            let mut state = slot.state.lock();
            state.status = SlotStatus::Retired;
            state.wrapper.upgrade()
        };
        self.counters.removed.fetch_add(1, Ordering::Relaxed);

        let Some(wrapper) = wrapper.filter(|wrapper| !wrapper.is_disposed()) else {
            log_pool_removed(W::POOL, ptr, false);
            return Ok(false);
        };

        let hook = wrapper.release_js_reference();
        let unhooked = match reason {
            Removal::Collected => {
                wrapper.handle().invalidate();
                Ok(())
            }
            Removal::Teardown => {
                let unhooked = if wrapper.monitors_collection() {
                    self.registry.forget(ptr)
                } else {
                    Ok(())
                };
                wrapper.handle().release();
                unhooked
            }
        };
        log_pool_removed(W::POOL, ptr, true);

        hook.and(unhooked).map(|_| true)
    }

    /// Remove every entry, disposing live wrappers. Keeps going past
    /// failures and returns the first one.
    pub fn dispose(&self) -> Result<()> {
        let ptrs: Vec<NativePtr> = self.slots.iter().map(|slot| *slot.key()).collect();
        let entries = ptrs.len();

        let mut first_error = None;
        for ptr in ptrs {
            if let Err(err) = self.remove_handle(ptr, Removal::Teardown) {
                warn!(target: "jsref::pool", pool = W::POOL, ptr = %ptr, error = %err, "teardown failed");
                first_error.get_or_insert(err);
            }
        }

        log_pool_teardown(W::POOL, entries);
        first_error.map_or(Ok(()), Err)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            entries: self.slots.len(),
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            replaced: self.counters.replaced.load(Ordering::Relaxed),
            removed: self.counters.removed.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    fn record_insert(&self, ptr: NativePtr, replaced: bool) {
        if replaced {
            self.counters.replaced.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.created.fetch_add(1, Ordering::Relaxed);
        }
        log_pool_insert(W::POOL, ptr, replaced);
    }

    /// Wire a freshly pooled wrapper up: subscribe the removal handler now
    /// that the slot is visible, then evict on host release. If subscribing
    /// fails the entry is rolled back so no unmonitored wrapper stays pooled.
    fn attach(&self, ptr: NativePtr, wrapper: &Arc<W>, slot: &Arc<Slot<W>>) -> Result<()> {
        let monitored = wrapper.monitors_collection();
        if monitored {
            if let Err(err) = self.registry.monitor(wrapper.handle().kind(), ptr, &self.remover) {
                slot.state.lock().status = SlotStatus::Retired;
                self.unlink(ptr, slot);
                return Err(err);
            }
        }

        let pool = self.me.clone();
        let owner = Arc::downgrade(slot);
        // Refused only if the handle closed meanwhile; collection then
        // removes the entry through the registry.
        wrapper.handle().on_release(move |ptr: NativePtr| {
            if let (Some(pool), Some(slot)) = (pool.upgrade(), owner.upgrade()) {
                pool.evict(ptr, &slot, monitored);
            }
        });
        Ok(())
    }

    /// Drop the slot of a wrapper the host is releasing. Runs before the
    /// native release, so the pointer is still held while it is unhooked.
    fn evict(&self, ptr: NativePtr, slot: &Arc<Slot<W>>, monitored: bool) {
        let (stale, current) = {
            let mut state = slot.state.lock();
            let current = state.wrapper.upgrade();
            let stale = state.status == SlotStatus::Open
                && current.as_ref().map_or(true, |wrapper| wrapper.is_disposed());
            if stale {
                state.status = SlotStatus::Evicted;
            }
            (stale, current)
        };
        // A newer live wrapper owns the slot; let go of it outside the lock.
        drop(current);
        if !stale {
            return;
        }

        self.unlink(ptr, slot);
        if monitored {
            if let Err(err) = self.registry.forget(ptr) {
                warn!(target: "jsref::pool", pool = W::POOL, ptr = %ptr, error = %err, "failed to unhook evicted entry");
            }
        }
        self.counters.evicted.fetch_add(1, Ordering::Relaxed);
        log_pool_evicted(W::POOL, ptr);
    }

    /// Drop a slot the factory failed to fill, unless another caller is
    /// already waiting on it.
    fn discard_empty(&self, ptr: NativePtr, slot: &Arc<Slot<W>>) {
        self.slots.remove_if(&ptr, |_, current| {
            Arc::ptr_eq(current, slot)
                // Map + this caller. Clones are only taken under the shard lock
                // that remove_if holds, so no waiter can appear meanwhile.
                && Arc::strong_count(current) == 2
                && current
                    .state
                    .try_lock()
                    .map_or(false, |state| state.generation == 0 && state.status == SlotStatus::Open)
        });
    }
}

impl<W: Flyweight> Drop for ReferencePool<W> {
    fn drop(&mut self) {
        if self.slots.is_empty() {
            return;
        }
        if self.leak_warnings {
            warn!(
                target: "jsref::pool",
                pool = W::POOL,
                entries = self.slots.len(),
                "pool dropped without dispose, tearing down remaining entries"
            );
        }
        let _ = self.dispose();
    }
}
