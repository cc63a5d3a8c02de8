//! Render worker runtime.
//!
//! GPU contexts are not freely shareable across threads: once a surface's
//! EGL/GL state lives on a thread, every draw call for that surface must
//! stay there. This crate is the thread-lifecycle side of that problem: a
//! pool of dedicated, context-bearing worker threads that are lent out,
//! fed through per-worker FIFO task queues, shared via reference-counted
//! handles, and recycled instead of destroyed.
//!
//! The pieces, leaves first:
//!
//! - [`Worker`]: one OS thread owning one [`WorkerContext`] and one private
//!   task queue; drains tasks in arrival order, parks when empty.
//! - [`ThreadManager`]: process-wide singleton pool; `acquire` pops the
//!   most recently released worker (LIFO, warmest context) or spawns one
//!   with the next [`Affinity`] class in rotation.
//! - [`SharedWorkerHandle`]: cloneable accessor so several surfaces can
//!   share one worker; the worker returns to the pool exactly when the
//!   last handle drops, and [`SharedWorkerHandle::current`] reuses the live
//!   shared worker instead of checking out a new one.
//!
//! What this crate deliberately does not contain: animation state-machine
//! evaluation, draw-command generation, and host-language bridging all live
//! with the callers; they show up here only as task closures and as the
//! opaque [`WorkerContext`] type.

// Core pool
pub mod affinity;
pub mod context;
pub mod handle;
pub mod manager;
pub mod worker;

// Support
pub mod config;
pub mod error;

mod queue;
mod task;

pub use affinity::Affinity;
pub use config::RuntimeConfig;
pub use context::WorkerContext;
pub use error::{RuntimeError, RuntimeResult};
pub use handle::SharedWorkerHandle;
pub use manager::{ThreadManager, WorkerLease};
pub use task::TaskOutcome;
pub use worker::{Worker, WorkerState};
