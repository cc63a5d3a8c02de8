//! Reference-counted shared access to one pooled worker.
//!
//! Several logical owners (rendering surfaces, mostly) can share a single
//! worker through cheap handle clones. The worker goes back to the pool
//! exactly when the last handle drops; single release is enforced by the
//! `Arc`, not by caller discipline. A process-wide "current" handle lets
//! repeated short-lived operations reuse one context instead of thrashing
//! the pool.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crossbeam_channel::Receiver;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::context::WorkerContext;
use crate::error::RuntimeResult;
use crate::manager::{ThreadManager, WorkerLease};
use crate::task::TaskOutcome;
use crate::worker::WorkerState;

lazy_static! {
    /// The live "current" handle per context type, held weakly so the pool
    /// reclaims the worker once the last strong handle drops. Entries go
    /// stale rather than being removed; the map is bounded by the number of
    /// context types in the process.
    static ref CURRENT: Mutex<HashMap<TypeId, Weak<dyn Any + Send + Sync>>> =
        Mutex::new(HashMap::new());
}

type ReleaseHook<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

struct HandleInner<C: WorkerContext> {
    lease: WorkerLease<C>,
    on_release: Mutex<Option<ReleaseHook<C>>>,
}

impl<C: WorkerContext> Drop for HandleInner<C> {
    fn drop(&mut self) {
        // Last strong handle just went away; hand the worker back with this
        // handle's teardown hook (if any) queued behind remaining work.
        match self.on_release.lock().take() {
            Some(hook) => self.lease.release_boxed(hook),
            None => {} // the lease's own drop releases with no hook
        }
    }
}

/// A cloneable accessor for one checked-out [`Worker`](crate::Worker).
///
/// Cloning increments the share count; the underlying worker is released to
/// the pool exactly once, when the count reaches zero. A second release
/// cannot be expressed: `release` consumes the handle.
pub struct SharedWorkerHandle<C: WorkerContext> {
    inner: Arc<HandleInner<C>>,
}

impl<C: WorkerContext> Clone for SharedWorkerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: WorkerContext> SharedWorkerHandle<C> {
    /// The handle for the calling context.
    ///
    /// If a shared worker for `C` is already live anywhere in the process,
    /// this returns another handle to it (count +1). Otherwise a fresh
    /// worker is checked out of the pool with no-op hooks, since context
    /// bootstrap belongs to [`WorkerContext::create`], which already ran on
    /// the worker thread.
    pub fn current() -> RuntimeResult<Self> {
        let key = TypeId::of::<C>();
        let mut current = CURRENT.lock();

        if let Some(weak) = current.get(&key) {
            if let Some(live) = weak.upgrade() {
                if let Ok(inner) = live.downcast::<HandleInner<C>>() {
                    log::trace!(
                        "[SharedWorkerHandle] reusing current worker \"{}\"",
                        inner.lease.name()
                    );
                    return Ok(Self { inner });
                }
            }
        }

        let manager = ThreadManager::<C>::instance();
        let name = manager.config.current_worker_name.clone();
        let lease = manager.acquire(&name, |_| {})?;
        let inner = Arc::new(HandleInner {
            lease,
            on_release: Mutex::new(None),
        });
        let weak = Arc::downgrade(&inner) as Weak<dyn Any + Send + Sync>;
        current.insert(key, weak);
        Ok(Self { inner })
    }

    /// Check a worker out with explicit acquire/release hooks, bypassing
    /// the shared "current" registry. `on_acquire` runs on the worker
    /// thread before any task submitted through the handle; `on_release`
    /// runs there after the last clone drops, behind any remaining tasks.
    pub fn acquire<FA, FR>(name: &str, on_acquire: FA, on_release: FR) -> RuntimeResult<Self>
    where
        FA: FnOnce(&mut C) + Send + 'static,
        FR: FnOnce(&mut C) + Send + 'static,
    {
        let lease = ThreadManager::<C>::instance().acquire(name, on_acquire)?;
        Ok(Self {
            inner: Arc::new(HandleInner {
                lease,
                on_release: Mutex::new(Some(Box::new(on_release))),
            }),
        })
    }

    /// Submit work to the shared worker. Callable from any thread; never
    /// blocks. Tasks submitted through one handle execute in submission
    /// order.
    pub fn run(&self, task: impl FnOnce(&mut C) + Send + 'static) -> RuntimeResult<()> {
        self.inner.lease.run(task)
    }

    /// Submit work and get a receipt channel to block on (on the caller's
    /// thread) when confirmation is needed.
    pub fn run_with_receipt(
        &self,
        task: impl FnOnce(&mut C) + Send + 'static,
    ) -> RuntimeResult<Receiver<TaskOutcome>> {
        self.inner.lease.run_with_receipt(task)
    }

    /// Drop this handle. The worker is released to the pool iff this was
    /// the last live clone.
    pub fn release(self) {
        drop(self);
    }

    /// Live handles sharing this worker, this one included.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn worker_id(&self) -> u64 {
        self.inner.lease.id()
    }

    pub fn worker_name(&self) -> &str {
        self.inner.lease.name()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.inner.lease.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam_channel::unbounded;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn current_is_shared_within_one_context_type() {
        struct SharedContext;
        impl WorkerContext for SharedContext {
            fn create() -> Self {
                Self
            }
        }

        let first = SharedWorkerHandle::<SharedContext>::current().expect("first handle");
        let second = SharedWorkerHandle::<SharedContext>::current().expect("second handle");

        assert_eq!(first.worker_id(), second.worker_id());
        assert_eq!(first.ref_count(), 2);
        assert_eq!(second.ref_count(), 2);
    }

    #[test]
    fn last_drop_releases_the_worker_exactly_once() {
        struct CountedContext;
        impl WorkerContext for CountedContext {
            fn create() -> Self {
                Self
            }
        }

        let handle = SharedWorkerHandle::<CountedContext>::current().expect("handle");
        let clones: Vec<_> = (0..3).map(|_| handle.clone()).collect();
        assert_eq!(handle.ref_count(), 4);

        let manager = ThreadManager::<CountedContext>::instance();
        drop(clones);
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(manager.idle_workers(), 0);

        handle.release();
        assert_eq!(manager.idle_workers(), 1);
    }

    #[test]
    fn shared_current_reaches_the_pool_on_second_release_only() {
        struct PooledContext;
        impl WorkerContext for PooledContext {
            fn create() -> Self {
                Self
            }
        }

        let first = SharedWorkerHandle::<PooledContext>::current().expect("first handle");
        let second = SharedWorkerHandle::<PooledContext>::current().expect("second handle");
        assert_eq!(first.worker_id(), second.worker_id());
        assert_eq!(first.ref_count(), 2);

        let manager = ThreadManager::<PooledContext>::instance();
        first.release();
        assert_eq!(manager.idle_workers(), 0);
        second.release();
        assert_eq!(manager.idle_workers(), 1);
    }

    #[test]
    fn current_after_full_release_checks_out_again() {
        struct RevivedContext;
        impl WorkerContext for RevivedContext {
            fn create() -> Self {
                Self
            }
        }

        let first = SharedWorkerHandle::<RevivedContext>::current().expect("first life");
        let first_id = first.worker_id();
        first.release();

        let second = SharedWorkerHandle::<RevivedContext>::current().expect("second life");
        assert_eq!(second.ref_count(), 1);
        // LIFO pool: the same physical worker comes back.
        assert_eq!(second.worker_id(), first_id);
    }

    #[test]
    fn tasks_through_one_handle_keep_submission_order() {
        struct OrderedContext;
        impl WorkerContext for OrderedContext {
            fn create() -> Self {
                Self
            }
        }

        let handle = SharedWorkerHandle::<OrderedContext>::current().expect("handle");
        let (tx, rx) = unbounded();
        for i in 0..10u32 {
            let tx = tx.clone();
            handle
                .run(move |_| tx.send(i).expect("send"))
                .expect("submit");
        }

        for expected in 0..10u32 {
            assert_eq!(rx.recv_timeout(TIMEOUT).expect("task ran"), expected);
        }
    }

    #[test]
    fn explicit_hooks_run_once_at_the_boundaries() {
        struct HookedContext;
        impl WorkerContext for HookedContext {
            fn create() -> Self {
                Self
            }
        }

        let (tx, rx) = unbounded();
        let on_acquire = tx.clone();
        let on_release = tx.clone();
        let handle = SharedWorkerHandle::<HookedContext>::acquire(
            "surface-1",
            move |_| on_acquire.send("acquire").expect("send"),
            move |_| on_release.send("release").expect("send"),
        )
        .expect("handle");

        let clone = handle.clone();
        let on_task = tx.clone();
        clone
            .run(move |_| on_task.send("task").expect("send"))
            .expect("submit");

        drop(handle);
        // Still one live clone: release hook must not have fired.
        assert_eq!(rx.recv_timeout(TIMEOUT).expect("first"), "acquire");
        assert_eq!(rx.recv_timeout(TIMEOUT).expect("second"), "task");
        assert!(rx.try_recv().is_err());

        drop(clone);
        assert_eq!(rx.recv_timeout(TIMEOUT).expect("third"), "release");
    }

    #[test]
    fn failing_task_leaves_the_shared_worker_usable() {
        struct FaultyContext;
        impl WorkerContext for FaultyContext {
            fn create() -> Self {
                Self
            }
        }

        let handle = SharedWorkerHandle::<FaultyContext>::current().expect("handle");

        let receipt = handle
            .run_with_receipt(|_| panic!("draw call exploded"))
            .expect("submit failing task");
        assert_eq!(
            receipt.recv_timeout(TIMEOUT).expect("failure receipt"),
            TaskOutcome::Panicked("draw call exploded".to_string())
        );

        let receipt = handle.run_with_receipt(|_| {}).expect("submit follow-up");
        assert_eq!(
            receipt.recv_timeout(TIMEOUT).expect("follow-up receipt"),
            TaskOutcome::Completed
        );
    }
}
