//! Process-wide pool of render workers.
//!
//! One [`ThreadManager`] exists per context type for the process lifetime.
//! Workers are expensive (thread + GPU context), so the manager recycles
//! them: `acquire` pops the most recently released worker (warmest caches,
//! warmest context) and spawns a new one only when the pool is empty.
//! The pool lock is held only for pop/push/flag flips, never across task
//! execution.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::Deref;

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

use crate::affinity::Affinity;
use crate::config::{self, RuntimeConfig};
use crate::context::WorkerContext;
use crate::error::RuntimeResult;
use crate::worker::Worker;

lazy_static! {
    /// One leaked manager per context type. Managers are process-scoped and
    /// never torn down, like the engine-global registries elsewhere in the
    /// renderer stack.
    static ref MANAGERS: RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>> =
        RwLock::new(HashMap::new());
}

struct PoolState<C: WorkerContext> {
    /// LIFO stack of idle workers; most recently released on top.
    idle: Vec<Worker<C>>,
    next_affinity: Affinity,
    spawned: u64,
}

/// Singleton lender of [`Worker`]s for context type `C`.
pub struct ThreadManager<C: WorkerContext> {
    pool: Mutex<PoolState<C>>,
    pub(crate) config: RuntimeConfig,
}

impl<C: WorkerContext> ThreadManager<C> {
    /// The process-wide manager for `C`.
    ///
    /// Double-checked lookup: the common path takes only the registry read
    /// lock; a first-time caller re-checks under the write lock, so
    /// concurrent first access constructs exactly one instance.
    pub fn instance() -> &'static Self {
        let key = TypeId::of::<C>();

        {
            let registry = MANAGERS.read();
            if let Some(entry) = registry.get(&key) {
                if let Some(manager) = entry.downcast_ref::<Self>() {
                    return manager;
                }
            }
        }

        let mut registry = MANAGERS.write();
        if let Some(entry) = registry.get(&key) {
            if let Some(manager) = entry.downcast_ref::<Self>() {
                return manager;
            }
        }
        let manager: &'static Self = Box::leak(Box::new(Self::new()));
        registry.insert(key, manager);
        manager
    }

    fn new() -> Self {
        let config = config::freeze();
        log::info!(
            "[ThreadManager] created for {} (first affinity {:?})",
            std::any::type_name::<C>(),
            config.first_affinity
        );
        Self {
            pool: Mutex::new(PoolState {
                idle: Vec::new(),
                next_affinity: config.first_affinity,
                spawned: 0,
            }),
            config,
        }
    }

    /// Check a worker out of the pool, spawning one when the pool is empty.
    ///
    /// `name` names the thread if a spawn is needed (a recycled worker keeps
    /// the name of its first owner). `on_acquire` runs exactly once on the
    /// worker thread, before anything submitted through the returned lease.
    /// The worker is not handed to anyone else until released.
    pub fn acquire<F>(&'static self, name: &str, on_acquire: F) -> RuntimeResult<WorkerLease<C>>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let mut pool = self.pool.lock();
        let worker = match pool.idle.pop() {
            Some(worker) => {
                log::trace!(
                    "[ThreadManager] reusing worker \"{}\" for \"{}\"",
                    worker.name(),
                    name
                );
                worker
            }
            None => {
                let affinity = pool.next_affinity;
                pool.next_affinity = affinity.other();
                pool.spawned += 1;
                log::debug!(
                    "[ThreadManager] spawning worker \"{}\" ({:?})",
                    name,
                    affinity
                );
                Worker::spawn(name, affinity, self.config.pin_workers)?
            }
        };
        worker.set_working(true, Some(on_acquire));

        Ok(WorkerLease {
            worker: Some(worker),
            manager: self,
        })
    }

    /// Return a leased worker to the pool.
    ///
    /// Remaining queued tasks drain on the worker thread, then `on_release`
    /// runs there (leaving the context in a safe, non-current state), then
    /// the worker parks. The calling thread never blocks.
    pub fn release<F>(&'static self, mut lease: WorkerLease<C>, on_release: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let worker = lease
            .worker
            .take()
            .expect("worker lease released while empty");
        self.release_worker(worker, Some(on_release));
    }

    pub(crate) fn release_worker<F>(&self, worker: Worker<C>, on_release: Option<F>)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let mut pool = self.pool.lock();
        worker.set_working(false, None::<fn(&mut C)>);
        if let Some(hook) = on_release {
            worker.release_queue(hook);
        }
        log::trace!("[ThreadManager] worker \"{}\" back in pool", worker.name());
        pool.idle.push(worker);
    }

    /// Workers currently sitting in the pool.
    pub fn idle_workers(&self) -> usize {
        self.pool.lock().idle.len()
    }

    /// Workers spawned over the manager's lifetime (pooled or lent out).
    pub fn spawned_workers(&self) -> u64 {
        self.pool.lock().spawned
    }
}

/// Scoped checkout of a pooled worker.
///
/// Dereferences to the [`Worker`]. Dropping the lease returns the worker to
/// the pool with a no-op release hook, so a forgotten release leaks nothing;
/// call [`WorkerLease::release_with`] (or [`ThreadManager::release`]) when
/// teardown must run on the worker thread.
pub struct WorkerLease<C: WorkerContext> {
    worker: Option<Worker<C>>,
    manager: &'static ThreadManager<C>,
}

impl<C: WorkerContext> WorkerLease<C> {
    /// Release back to the pool with an explicit teardown hook.
    pub fn release_with<F>(self, on_release: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.manager.release(self, on_release);
    }

    /// Release with a boxed hook; used by the shared handle's drop path,
    /// which cannot consume `self`.
    pub(crate) fn release_boxed(&mut self, on_release: Box<dyn FnOnce(&mut C) + Send>) {
        if let Some(worker) = self.worker.take() {
            self.manager.release_worker(worker, Some(on_release));
        }
    }
}

impl<C: WorkerContext> Deref for WorkerLease<C> {
    type Target = Worker<C>;

    fn deref(&self) -> &Worker<C> {
        self.worker
            .as_ref()
            .expect("worker lease used after release")
    }
}

impl<C: WorkerContext> Drop for WorkerLease<C> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.manager.release_worker(worker, None::<fn(&mut C)>);
        }
    }
}
