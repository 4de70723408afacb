//! Reference space - one registry and the three pools wired together
//!
//! Entry points that receive a pointer from the engine go through here so the
//! handle is acquired, interned and monitored in one step. Teardown runs
//! values first, then contexts, then runtimes: a value may point into a
//! context, a context into a runtime, never the other way round.

use crate::config::RefConfig;
use crate::error::Result;
use crate::ffi::{Engine, HandleKind, NativePtr};
use crate::handle::SafeHandle;
use crate::logging::debug;
use crate::pool::{ContextPool, JsContext, JsRuntime, JsValue, PoolStats, RuntimePool, ValuePool};
use crate::registry::{CollectRegistry, RegistryStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceStats {
    pub runtimes: PoolStats,
    pub contexts: PoolStats,
    pub values: PoolStats,
    pub registry: RegistryStats,
}

pub struct RefSpace {
    engine: Arc<dyn Engine>,
    registry: Arc<CollectRegistry>,
    runtimes: RuntimePool,
    contexts: ContextPool,
    values: ValuePool,
    disposed: AtomicBool,
}

impl RefSpace {
    pub fn new(engine: Arc<dyn Engine>, config: RefConfig) -> Self {
        let registry =
            CollectRegistry::with_capacity(Arc::clone(&engine), config.registry_capacity, config.leak_warnings);

        Self {
            runtimes: RuntimePool::with_options(
                Arc::clone(&registry),
                config.runtime_pool_capacity,
                config.leak_warnings,
            ),
            contexts: ContextPool::with_options(
                Arc::clone(&registry),
                config.context_pool_capacity,
                config.leak_warnings,
            ),
            values: ValuePool::with_options(Arc::clone(&registry), config.value_pool_capacity, config.leak_warnings),
            registry,
            engine,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn from_env(engine: Arc<dyn Engine>) -> Self {
        Self::new(engine, RefConfig::from_env())
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<CollectRegistry> {
        &self.registry
    }

    pub fn runtimes(&self) -> &RuntimePool {
        &self.runtimes
    }

    pub fn contexts(&self) -> &ContextPool {
        &self.contexts
    }

    pub fn values(&self) -> &ValuePool {
        &self.values
    }

    pub fn acquire_runtime(&self, ptr: NativePtr) -> Result<Arc<JsRuntime>> {
        let handle = SafeHandle::acquire(&self.engine, HandleKind::Runtime, ptr)?;
        self.runtimes.get_or_add(handle)
    }

    pub fn acquire_context(&self, ptr: NativePtr) -> Result<Arc<JsContext>> {
        let handle = SafeHandle::acquire(&self.engine, HandleKind::Context, ptr)?;
        self.contexts.get_or_add(handle)
    }

    /// Resolve a context pointer where null means "no current context".
    pub fn current_context(&self, ptr: NativePtr) -> Result<Option<Arc<JsContext>>> {
        match SafeHandle::acquire_optional(&self.engine, HandleKind::Context, ptr) {
            Some(handle) => self.contexts.get_or_add(handle).map(Some),
            None => Ok(None),
        }
    }

    pub fn acquire_value(&self, ptr: NativePtr) -> Result<Arc<JsValue>> {
        let handle = SafeHandle::acquire(&self.engine, HandleKind::Value, ptr)?;
        self.values.get_or_add(handle)
    }

    /// Tear down every pool. Only the first call does any work; all three
    /// pools are emptied even if one of them fails.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!(target: "jsref::space", "disposing reference space");
        let values = self.values.dispose();
        let contexts = self.contexts.dispose();
        let runtimes = self.runtimes.dispose();
        values.and(contexts).and(runtimes)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SpaceStats {
        SpaceStats {
            runtimes: self.runtimes.stats(),
            contexts: self.contexts.stats(),
            values: self.values.stats(),
            registry: self.registry.stats(),
        }
    }
}

impl Drop for RefSpace {
    fn drop(&mut self) {
        let _ = self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::pool::ValueKind;
    use crate::testing::MockEngine;

    fn space(engine: &Arc<MockEngine>) -> RefSpace {
        RefSpace::new(engine.as_engine(), RefConfig::default().with_leak_warnings(false))
    }

    #[test]
    fn test_acquire_interns_across_pools() {
        let engine = MockEngine::new();
        let space = space(&engine);

        let rt_ptr = engine.alloc_runtime();
        let cx_ptr = engine.alloc_context();
        let obj_ptr = engine.alloc_value(ValueKind::Object);

        let rt = space.acquire_runtime(rt_ptr).unwrap();
        let cx = space.acquire_context(cx_ptr).unwrap();
        let obj = space.acquire_value(obj_ptr).unwrap();

        assert!(Arc::ptr_eq(&rt, &space.acquire_runtime(rt_ptr).unwrap()));
        assert!(Arc::ptr_eq(&cx, &space.acquire_context(cx_ptr).unwrap()));
        assert!(Arc::ptr_eq(&obj, &space.acquire_value(obj_ptr).unwrap()));

        let stats = space.stats();
        assert_eq!(stats.runtimes.entries, 1);
        assert_eq!(stats.contexts.entries, 1);
        assert_eq!(stats.values.entries, 1);
        assert_eq!(stats.values.reused, 1);
    }

    #[test]
    fn test_current_context_null_is_none() {
        let engine = MockEngine::new();
        let space = space(&engine);

        assert!(space.current_context(NativePtr::NULL).unwrap().is_none());

        let cx_ptr = engine.alloc_context();
        let cx = space.current_context(cx_ptr).unwrap().unwrap();
        assert_eq!(cx.ptr(), cx_ptr);
    }

    #[test]
    fn test_acquire_null_is_invalid_handle() {
        let engine = MockEngine::new();
        let space = space(&engine);

        let err = space.acquire_value(NativePtr::NULL).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(engine.total_releases(), 0);
    }

    #[test]
    fn test_dispose_releases_everything_once() {
        let engine = MockEngine::new();
        let space = space(&engine);

        let rt = space.acquire_runtime(engine.alloc_runtime()).unwrap();
        let cx = space.acquire_context(engine.alloc_context()).unwrap();
        let num = space.acquire_value(engine.alloc_value(ValueKind::Number)).unwrap();

        space.dispose().unwrap();
        space.dispose().unwrap();

        assert!(rt.is_disposed());
        assert!(cx.is_disposed());
        assert!(num.is_disposed());
        assert_eq!(engine.total_releases(), 3);
        assert!(space.values().is_empty());
        assert!(space.contexts().is_empty());
        assert!(space.runtimes().is_empty());
        assert!(space.is_disposed());
    }

    #[test]
    fn test_teardown_order_values_first() {
        let engine = MockEngine::new();
        let rt_ptr = engine.alloc_runtime();
        let cx_ptr = engine.alloc_context();
        let val_ptr = engine.alloc_value(ValueKind::String);

        {
            let space = space(&engine);
            let _rt = space.acquire_runtime(rt_ptr).unwrap();
            let _cx = space.acquire_context(cx_ptr).unwrap();
            let _val = space.acquire_value(val_ptr).unwrap();
            space.dispose().unwrap();
        }

        let releases = engine.release_log();
        assert_eq!(
            releases,
            vec![
                (HandleKind::Value, val_ptr),
                (HandleKind::Context, cx_ptr),
                (HandleKind::Runtime, rt_ptr),
            ]
        );
    }

    #[test]
    fn test_drop_disposes_and_unhooks() {
        let engine = MockEngine::new();
        let cx_ptr = engine.alloc_context();
        let obj_ptr = engine.alloc_value(ValueKind::Object);

        let (cx, obj) = {
            let space = space(&engine);
            let cx = space.acquire_context(cx_ptr).unwrap();
            let obj = space.acquire_value(obj_ptr).unwrap();
            assert!(engine.has_hook(cx_ptr));
            assert!(engine.has_hook(obj_ptr));
            (cx, obj)
        };

        assert!(cx.is_disposed());
        assert!(obj.is_disposed());
        assert!(!engine.has_hook(cx_ptr));
        assert!(!engine.has_hook(obj_ptr));
        assert_eq!(engine.hook_clears(), 2);

        drop(cx);
        drop(obj);
        // Late collection after teardown reaches no host code.
        assert!(engine.collect(obj_ptr));
        assert!(engine.collect(cx_ptr));
    }

    #[test]
    fn test_no_native_hook_calls_after_release() {
        let engine = MockEngine::new();
        let rt_ptr = engine.alloc_runtime();
        let obj_ptr = engine.alloc_value(ValueKind::Object);

        {
            let space = space(&engine);
            let _rt = space.acquire_runtime(rt_ptr).unwrap();
            let _obj = space.acquire_value(obj_ptr).unwrap();
            space.dispose().unwrap();
            assert_eq!(engine.hook_clears(), 2);
        }

        // Dropping the space and its registry touched neither pointer again.
        assert_eq!(engine.hook_clears(), 2);
        assert_eq!(engine.hook_calls_after_release(rt_ptr), 0);
        assert_eq!(engine.hook_calls_after_release(obj_ptr), 0);
        assert_eq!(engine.total_releases(), 2);
    }

    #[test]
    fn test_dropped_numbers_leave_no_entries() {
        let engine = MockEngine::new();
        let space = space(&engine);

        for _ in 0..10_000 {
            let num = space.acquire_value(engine.alloc_value(ValueKind::Number)).unwrap();
            drop(num);
        }

        assert_eq!(space.values().len(), 0);
        assert_eq!(space.stats().values.evicted, 10_000);
        assert_eq!(space.stats().registry.monitored, 0);
    }
}
