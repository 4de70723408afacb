//! Simulated engine heap for unit tests
//!
//! Models just enough of the native side: allocation at chosen or fresh
//! addresses, per-object type tags, release bookkeeping, before-collect
//! registration (refused for primitive values) and `collect()`, which fires
//! the registered callback through the real C ABI trampoline.

use crate::ffi::{BeforeCollectCallback, Engine, HandleKind, JsErrorCode, NativePtr, RawValueType};
use crate::pool::ValueKind;
use core::ffi::c_void;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectClass {
    Runtime,
    Context,
    Value(RawValueType),
}

struct Hook {
    callback: BeforeCollectCallback,
    state: usize,
}

/// Native calls in the order the engine saw them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockCall {
    Release(NativePtr),
    HookSet(NativePtr),
    HookClear(NativePtr),
}

struct MockObject {
    class: ObjectClass,
    hook: Option<Hook>,
}

pub(crate) struct MockEngine {
    heap: Mutex<HashMap<NativePtr, MockObject>>,
    next_addr: AtomicUsize,
    releases: Mutex<Vec<(HandleKind, NativePtr)>>,
    hook_sets: AtomicUsize,
    hook_clears: AtomicUsize,
    type_queries: AtomicUsize,
    hook_failure: Mutex<Option<JsErrorCode>>,
    clear_failure: Mutex<Option<JsErrorCode>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            heap: Mutex::new(HashMap::new()),
            next_addr: AtomicUsize::new(0x10_0000),
            releases: Mutex::new(Vec::new()),
            hook_sets: AtomicUsize::new(0),
            hook_clears: AtomicUsize::new(0),
            type_queries: AtomicUsize::new(0),
            hook_failure: Mutex::new(None),
            clear_failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn as_engine(self: &Arc<Self>) -> Arc<dyn Engine> {
        Arc::clone(self) as Arc<dyn Engine>
    }

    fn fresh_addr(&self) -> NativePtr {
        NativePtr::new(self.next_addr.fetch_add(0x10, Ordering::Relaxed))
    }

    fn insert(&self, ptr: NativePtr, class: ObjectClass) -> NativePtr {
        self.heap.lock().insert(ptr, MockObject { class, hook: None });
        ptr
    }

    pub fn alloc_runtime(&self) -> NativePtr {
        let ptr = self.fresh_addr();
        self.insert(ptr, ObjectClass::Runtime)
    }

    pub fn alloc_context(&self) -> NativePtr {
        let ptr = self.fresh_addr();
        self.insert(ptr, ObjectClass::Context)
    }

    pub fn alloc_value(&self, kind: ValueKind) -> NativePtr {
        let ptr = self.fresh_addr();
        self.insert(ptr, ObjectClass::Value(kind.as_raw()))
    }

    /// Place a value at a fixed address (singletons, address reuse).
    pub fn alloc_value_at(&self, addr: usize, kind: ValueKind) -> NativePtr {
        self.insert(NativePtr::new(addr), ObjectClass::Value(kind.as_raw()))
    }

    pub fn alloc_raw_tag_at(&self, addr: usize, tag: RawValueType) -> NativePtr {
        self.insert(NativePtr::new(addr), ObjectClass::Value(tag))
    }

    /// Reclaim the object, firing its before-collect callback if one is set.
    pub fn collect(&self, ptr: NativePtr) -> bool {
        let object = self.heap.lock().remove(&ptr);
        match object {
            Some(MockObject { hook: Some(hook), .. }) => {
                // SAFETY: the callback and state were handed to us by the registry,
                // which unhooks every pointer before it is dropped.
                unsafe { (hook.callback)(ptr.as_raw(), hook.state as *mut c_void) };
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn fail_hooks_with(&self, code: Option<JsErrorCode>) {
        *self.hook_failure.lock() = code;
    }

    pub fn fail_clears_with(&self, code: Option<JsErrorCode>) {
        *self.clear_failure.lock() = code;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Hook calls for `ptr` made after its last native release.
    pub fn hook_calls_after_release(&self, ptr: NativePtr) -> usize {
        let calls = self.calls.lock();
        let Some(last) = calls.iter().rposition(|call| *call == MockCall::Release(ptr)) else {
            return 0;
        };
        calls[last..]
            .iter()
            .filter(|call| matches!(call, MockCall::HookSet(p) | MockCall::HookClear(p) if *p == ptr))
            .count()
    }

    pub fn has_hook(&self, ptr: NativePtr) -> bool {
        self.heap
            .lock()
            .get(&ptr)
            .map_or(false, |object| object.hook.is_some())
    }

    pub fn release_count(&self, ptr: NativePtr) -> usize {
        self.releases.lock().iter().filter(|(_, p)| *p == ptr).count()
    }

    pub fn release_log(&self) -> Vec<(HandleKind, NativePtr)> {
        self.releases.lock().clone()
    }

    pub fn total_releases(&self) -> usize {
        self.releases.lock().len()
    }

    pub fn hook_sets(&self) -> usize {
        self.hook_sets.load(Ordering::SeqCst)
    }

    pub fn hook_clears(&self) -> usize {
        self.hook_clears.load(Ordering::SeqCst)
    }

    pub fn type_queries(&self) -> usize {
        self.type_queries.load(Ordering::SeqCst)
    }
}

impl Engine for MockEngine {
    fn release(&self, kind: HandleKind, ptr: NativePtr) -> JsErrorCode {
        self.releases.lock().push((kind, ptr));
        self.calls.lock().push(MockCall::Release(ptr));
        JsErrorCode::NO_ERROR
    }

    fn set_before_collect_callback(
        &self,
        ptr: NativePtr,
        state: *mut c_void,
        callback: Option<BeforeCollectCallback>,
    ) -> JsErrorCode {
        self.calls.lock().push(match callback {
            Some(_) => MockCall::HookSet(ptr),
            None => MockCall::HookClear(ptr),
        });
        let mut heap = self.heap.lock();
        let Some(object) = heap.get_mut(&ptr) else {
            return JsErrorCode::INVALID_ARGUMENT;
        };

        if let ObjectClass::Value(tag) = object.class {
            let collectable = ValueKind::from_raw(tag).map_or(true, |kind| kind.supports_collect_hook());
            if !collectable {
                return JsErrorCode::HOOK_UNSUPPORTED;
            }
        }

        match callback {
            Some(callback) => {
                if let Some(code) = *self.hook_failure.lock() {
                    return code;
                }
                self.hook_sets.fetch_add(1, Ordering::SeqCst);
                object.hook = Some(Hook {
                    callback,
                    state: state as usize,
                });
            }
            None => {
                if let Some(code) = *self.clear_failure.lock() {
                    return code;
                }
                self.hook_clears.fetch_add(1, Ordering::SeqCst);
                object.hook = None;
            }
        }
        JsErrorCode::NO_ERROR
    }

    fn value_type(&self, ptr: NativePtr) -> Result<RawValueType, JsErrorCode> {
        self.type_queries.fetch_add(1, Ordering::SeqCst);
        match self.heap.lock().get(&ptr).map(|object| object.class) {
            Some(ObjectClass::Value(tag)) => Ok(tag),
            Some(_) | None => Err(JsErrorCode::INVALID_ARGUMENT),
        }
    }
}
