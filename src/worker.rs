//! A pooled render worker: one OS thread, one GPU context, one task queue.
//!
//! The context is created on the worker's own thread and never leaves it,
//! which is the invariant that makes EGL/GL calls safe without per-call
//! locking. Workers are recycled by the [`ThreadManager`] rather than
//! destroyed; a worker thread normally lives until process shutdown.
//!
//! [`ThreadManager`]: crate::manager::ThreadManager

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;

use crate::affinity::Affinity;
use crate::context::WorkerContext;
use crate::error::{RuntimeError, RuntimeResult};
use crate::queue::TaskQueue;
use crate::task::{Task, TaskOutcome};

/// Where a worker currently is in its lending lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// In the pool, not lent out. The loop waits without consuming CPU.
    Idle,
    /// Lent out, loop draining the queue.
    Working,
    /// Lent out, queue empty, loop blocked until work arrives.
    Parked,
}

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// One dedicated OS thread with an exclusively owned context and a private
/// FIFO task queue.
pub struct Worker<C: WorkerContext> {
    id: u64,
    name: String,
    affinity: Affinity,
    queue: Arc<TaskQueue<C>>,
    join: Option<JoinHandle<()>>,
}

impl<C: WorkerContext> Worker<C> {
    /// Spawn a worker thread.
    ///
    /// On the new thread, in order: the affinity class is applied (if
    /// `pin`), the context is built via [`WorkerContext::create`], then the
    /// drain loop runs until [`Worker::shutdown`]. The context is dropped
    /// on that same thread when the loop exits.
    pub fn spawn(name: &str, affinity: Affinity, pin: bool) -> RuntimeResult<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(TaskQueue::new());

        let loop_queue = Arc::clone(&queue);
        let loop_name = name.to_string();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if pin {
                    affinity.apply();
                }
                let mut context = C::create();
                log::debug!("[Worker \"{}\"] context ready, entering loop", loop_name);
                while let Some(task) = loop_queue.next_task() {
                    task.execute(&loop_name, &mut context);
                }
                log::debug!("[Worker \"{}\"] loop exited", loop_name);
            })
            .map_err(|source| RuntimeError::SpawnFailed {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            id,
            name: name.to_string(),
            affinity,
            queue,
            join: Some(join),
        })
    }

    /// Process-unique worker id, stable across pool recycling.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scheduling class fixed at spawn time.
    pub fn affinity(&self) -> Affinity {
        self.affinity
    }

    pub fn state(&self) -> WorkerState {
        self.queue.state()
    }

    /// Tasks enqueued but not yet picked up by the loop.
    pub fn pending_tasks(&self) -> usize {
        self.queue.pending()
    }

    /// Submit work to this worker. Never blocks the caller.
    pub fn run(&self, task: impl FnOnce(&mut C) + Send + 'static) -> RuntimeResult<()> {
        if self.queue.push(Task::new(task)) {
            Ok(())
        } else {
            Err(RuntimeError::WorkerShutDown {
                name: self.name.clone(),
            })
        }
    }

    /// Submit work and get a receipt channel. The caller may block on the
    /// receiver (on its own thread) if it needs confirmation; the enqueue
    /// itself never blocks.
    pub fn run_with_receipt(
        &self,
        task: impl FnOnce(&mut C) + Send + 'static,
    ) -> RuntimeResult<Receiver<TaskOutcome>> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        if self.queue.push(Task::with_receipt(task, tx)) {
            Ok(rx)
        } else {
            Err(RuntimeError::WorkerShutDown {
                name: self.name.clone(),
            })
        }
    }

    /// Flip the lent-out flag. The transition hook, if any, runs exactly
    /// once on the worker thread, ordered after everything already queued.
    /// That is the natural place to make a surface's context current (acquire) or
    /// un-current (release).
    ///
    /// Panics if the worker is already in the requested lending state:
    /// a double acquire or double release is a lifetime bug in the caller
    /// and is fatal by contract.
    pub fn set_working<F>(&self, working: bool, on_transition: Option<F>)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let hook = on_transition.map(Task::new);
        let previous = self.queue.set_working(working, hook);
        if working {
            assert!(
                previous == WorkerState::Idle,
                "worker \"{}\" acquired while already lent out",
                self.name
            );
        } else {
            assert!(
                previous != WorkerState::Idle,
                "worker \"{}\" released while not lent out",
                self.name
            );
        }
    }

    /// Queue the outgoing owner's teardown. Pending tasks drain first, then
    /// `on_release` runs on the worker thread; the worker then parks until
    /// its next acquisition. The caller is never blocked; ordering against
    /// the next owner's setup is guaranteed by the single FIFO queue.
    pub fn release_queue<F>(&self, on_release: F)
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        if !self.queue.push(Task::new(on_release)) {
            log::warn!(
                "[Worker \"{}\"] release hook dropped: queue already shut down",
                self.name
            );
        }
    }

    /// Close the queue and join the thread. Queued tasks drain first; the
    /// context is dropped on the worker thread. Pooled workers are never
    /// shut down individually; this is for standalone workers and process
    /// teardown.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl<C: WorkerContext> Drop for Worker<C> {
    fn drop(&mut self) {
        self.queue.shut_down();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("[Worker \"{}\"] thread terminated abnormally", self.name);
            }
        }
    }
}
