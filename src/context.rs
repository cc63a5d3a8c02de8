//! The per-worker GPU context seam.

/// Per-thread state owned by exactly one worker: typically the EGL/GL
/// context plus whatever surface bookkeeping the renderer keeps beside it.
///
/// The value is created on the worker's own thread (after its scheduling
/// affinity is applied) and dropped on that same thread when the worker
/// shuts down. It never crosses a thread boundary, so implementations do
/// not need `Send`; raw EGL display and context handles are fine here.
/// That single-thread ownership is what lets tasks touch the context
/// without any locking.
pub trait WorkerContext: Sized + 'static {
    /// Build the thread's context. Runs once per worker thread, before the
    /// first task.
    fn create() -> Self;
}
