//! Before-collect registry - per-pointer switchboard for collection notices
//!
//! Design: The engine supports one native callback per object. The registry
//! installs a single C ABI trampoline ([`jsref_before_collect`]) per pointer and
//! fans the notification out to any number of host subscribers:
//! 1. Subscribers are held weakly; whoever registered one keeps it alive
//! 2. Native registration happens once per pointer
//! 3. Dispatch is terminal: the entry is retired and removed afterwards
//! 4. A failing or panicking subscriber never stops the others
//!
//! The registry's own address is the native callback state, so it lives in an
//! `Arc` and unhooks every pointer it still monitors when dropped.

use crate::error::{RefError, Result};
use crate::ffi::{Engine, HandleKind, JsErrorCode, NativePtr};
use crate::logging::{log_collect_dispatch, log_subscriber_failure, trace, warn};
use core::ffi::c_void;
use dashmap::DashMap;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};


/// Host-side before-collect subscriber.
pub type CollectFn = dyn Fn(NativePtr) -> Result<()> + Send + Sync;

/// C ABI entry point handed to the engine for every monitored pointer.
///
/// # Safety
/// `state` must be null or the address of a live [`CollectRegistry`]; the
/// registry guarantees this by clearing its hooks before it is freed.
#[no_mangle]
pub unsafe extern "C" fn jsref_before_collect(object: *mut c_void, state: *mut c_void) {
    if state.is_null() {
        return;
    }
    let registry = &*(state as *const CollectRegistry);
    registry.dispatch(NativePtr::from_raw(object));
}

#[derive(Default)]
struct Subscribers {
    retired: bool,
    list: SmallVec<[Weak<CollectFn>; 2]>,
}

struct Entry {
    kind: HandleKind,
    hooked: AtomicBool,
    subscribers: Mutex<Subscribers>,
}

impl Entry {
    fn new(kind: HandleKind) -> Self {
        Self {
            kind,
            hooked: AtomicBool::new(false),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }
}

/// How one subscriber failed during dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    Error(RefError),
    Panic(String),
}

/// Outcome of one [`CollectRegistry::dispatch`].
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    pub invoked: usize,
    /// Subscribers already dropped on the host side.
    pub skipped: usize,
    pub failures: Vec<DispatchFailure>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry statistics for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub monitored: usize,
    pub dispatched: usize,
    pub failures: usize,
}

pub struct CollectRegistry {
    engine: Arc<dyn Engine>,
    entries: DashMap<NativePtr, Arc<Entry>>,
    dispatched: AtomicUsize,
    failures: AtomicUsize,
    leak_warnings: bool,
}

impl CollectRegistry {
    pub fn new(engine: Arc<dyn Engine>) -> Arc<Self> {
        Self::with_capacity(engine, 0, true)
    }

    pub fn with_capacity(engine: Arc<dyn Engine>, capacity: usize, leak_warnings: bool) -> Arc<Self> {
        Arc::new(Self {
            engine,
            entries: DashMap::with_capacity(capacity),
            dispatched: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            leak_warnings,
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    fn state_ptr(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }

    /// Subscribe `subscriber` to the collection of `ptr`.
    ///
    /// The native hook is installed on the first subscription only. Values the
    /// engine refuses to hook (numbers, primitive singletons) are accepted
    /// silently and simply never dispatched. Runtimes and contexts always
    /// accept the hook, so the same code for them is an error.
    pub fn monitor(&self, kind: HandleKind, ptr: NativePtr, subscriber: &Arc<CollectFn>) -> Result<()> {
        if ptr.is_null() {
            return Err(RefError::Argument {
                ptr,
                reason: "cannot monitor a null pointer",
            });
        }

        let weak = Arc::downgrade(subscriber);
        let entry = loop {
            let entry = Arc::clone(self.entries.entry(ptr).or_insert_with(|| Arc::new(Entry::new(kind))).value());
            let mut subscribers = entry.subscribers.lock();
            if subscribers.retired {
                // Lost a race with dispatch/forget; that entry is gone from the map.
                continue;
            }
            subscribers.list.retain(|existing| existing.strong_count() > 0);
            if !subscribers.list.iter().any(|existing| existing.ptr_eq(&weak)) {
                subscribers.list.push(weak.clone());
            }
            drop(subscribers);
            break entry;
        };

        if entry.hooked.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let code = self
            .engine
            .set_before_collect_callback(ptr, self.state_ptr(), Some(jsref_before_collect));

        if code.is_ok() {
            trace!(target: "jsref::registry", ptr = %ptr, "native before-collect hook installed");
            return Ok(());
        }

        // Either way the native side will never call us for this pointer.
        self.retire(ptr, &entry);

        if is_benign(entry.kind, code) {
            trace!(target: "jsref::registry", ptr = %ptr, "value does not accept a before-collect hook");
            Ok(())
        } else {
            Err(RefError::engine("set_before_collect_callback", ptr, code))
        }
    }

    /// Run every live subscriber of `ptr` once and retire the entry.
    ///
    /// Called from the engine's collection path. Subscriber errors and panics
    /// are isolated, logged and returned in the report.
    pub fn dispatch(&self, ptr: NativePtr) -> DispatchReport {
        let mut report = DispatchReport::default();

        let Some((_, entry)) = self.entries.remove(&ptr) else {
            return report;
        };

        let subscribers = {
            let mut subscribers = entry.subscribers.lock();
            subscribers.retired = true;
            std::mem::take(&mut subscribers.list)
        };

        for weak in subscribers {
            let Some(subscriber) = weak.upgrade() else {
                report.skipped += 1;
                continue;
            };

            report.invoked += 1;
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| (*subscriber)(ptr))) {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => DispatchFailure::Error(err),
                Err(payload) => DispatchFailure::Panic(panic_message(payload.as_ref())),
            };

            match &failure {
                DispatchFailure::Error(err) => log_subscriber_failure(ptr, &err.to_string()),
                DispatchFailure::Panic(msg) => log_subscriber_failure(ptr, msg),
            }
            report.failures.push(failure);
        }

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(report.failures.len(), Ordering::Relaxed);
        log_collect_dispatch(ptr, report.invoked, report.failures.len());
        report
    }

    /// Stop monitoring `ptr` entirely: clears the native hook and drops every
    /// subscriber, without invoking them.
    ///
    /// Must run while the caller still holds its acquisition of `ptr`; owners
    /// call this before their native release.
    pub fn forget(&self, ptr: NativePtr) -> Result<()> {
        let Some((_, entry)) = self.entries.remove(&ptr) else {
            return Ok(());
        };
        self.retire(ptr, &entry);

        if !entry.hooked.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let code = self
            .engine
            .set_before_collect_callback(ptr, core::ptr::null_mut(), None);
        if code.is_ok() || is_benign(entry.kind, code) {
            Ok(())
        } else {
            Err(RefError::engine("set_before_collect_callback", ptr, code))
        }
    }

    fn retire(&self, ptr: NativePtr, entry: &Arc<Entry>) {
        {
            let mut subscribers = entry.subscribers.lock();
            subscribers.retired = true;
            subscribers.list.clear();
        }
        self.entries.remove_if(&ptr, |_, current| Arc::ptr_eq(current, entry));
    }

    pub fn is_monitored(&self, ptr: NativePtr) -> bool {
        self.entries.contains_key(&ptr)
    }

    /// Number of live subscribers currently attached to `ptr`.
    pub fn subscriber_count(&self, ptr: NativePtr) -> usize {
        let Some(entry) = self.entries.get(&ptr).map(|entry| Arc::clone(entry.value())) else {
            return 0;
        };
        let subscribers = entry.subscribers.lock();
        subscribers
            .list
            .iter()
            .filter(|subscriber| subscriber.strong_count() > 0)
            .count()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            monitored: self.entries.len(),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CollectRegistry {
    fn drop(&mut self) {
        // Owners forget their pointer before releasing it, so whatever is
        // left here is still held by a live handle. Snapshot first: clearing
        // a hook is a native call and must not run under a map shard lock.
        let remaining: Vec<(NativePtr, Arc<Entry>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        self.entries.clear();

        let mut unhooked = 0usize;
        for (ptr, entry) in remaining {
            if !entry.hooked.swap(false, Ordering::AcqRel) {
                continue;
            }
            let code = self
                .engine
                .set_before_collect_callback(ptr, core::ptr::null_mut(), None);
            if !code.is_ok() && !is_benign(entry.kind, code) {
                warn!(
                    target: "jsref::registry",
                    ptr = %ptr,
                    code = %code,
                    "failed to clear before-collect hook"
                );
            }
            unhooked += 1;
        }

        if unhooked > 0 && self.leak_warnings {
            warn!(
                target: "jsref::registry",
                unhooked,
                "registry dropped while still monitoring live objects"
            );
        }
    }
}

/// Only values may legitimately refuse a before-collect hook.
fn is_benign(kind: HandleKind, code: JsErrorCode) -> bool {
    kind == HandleKind::Value && code == JsErrorCode::HOOK_UNSUPPORTED
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "subscriber panicked".to_string()
    }
}
