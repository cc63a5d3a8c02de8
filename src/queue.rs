//! Per-worker task queue.
//!
//! One queue per worker. Any thread may push; only the owning worker's loop
//! consumes, strictly in arrival order. The loop parks on a condvar while
//! the queue is empty; no spinning.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::task::Task;
use crate::worker::WorkerState;

struct QueueInner<C> {
    tasks: VecDeque<Task<C>>,
    state: WorkerState,
    shut_down: bool,
}

pub(crate) struct TaskQueue<C> {
    inner: Mutex<QueueInner<C>>,
    work_available: Condvar,
}

impl<C> TaskQueue<C> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                state: WorkerState::Idle,
                shut_down: false,
            }),
            work_available: Condvar::new(),
        }
    }

    /// Append a task and wake the worker loop if it is parked.
    ///
    /// Returns `false` if the queue has shut down; the task is dropped.
    /// Unbounded otherwise; submission rate is bounded by frame cadence,
    /// not by the queue.
    pub(crate) fn push(&self, task: Task<C>) -> bool {
        let mut inner = self.inner.lock();
        if inner.shut_down {
            return false;
        }
        inner.tasks.push_back(task);
        self.work_available.notify_one();
        true
    }

    /// Block until a task is available, returning `None` once the queue has
    /// shut down AND drained. Called only by the owning worker's loop.
    pub(crate) fn next_task(&self) -> Option<Task<C>> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(task) = inner.tasks.pop_front() {
                if inner.state == WorkerState::Parked {
                    inner.state = WorkerState::Working;
                }
                return Some(task);
            }
            if inner.shut_down {
                return None;
            }
            // Parked only ever means "lent out and out of work"; an idle
            // pooled worker just waits without a state change.
            if inner.state == WorkerState::Working {
                inner.state = WorkerState::Parked;
            }
            self.work_available.wait(&mut inner);
        }
    }

    /// Flip the lent-out flag, optionally enqueueing a transition hook so it
    /// runs exactly once on the worker thread, ordered after everything
    /// already queued. Returns the previous state so the caller can assert
    /// the transition was legal. Flag and hook move under one lock, so the
    /// hook cannot interleave with a concurrent push.
    pub(crate) fn set_working(&self, working: bool, hook: Option<Task<C>>) -> WorkerState {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = if working {
            WorkerState::Working
        } else {
            WorkerState::Idle
        };
        if let Some(task) = hook {
            if inner.shut_down {
                log::warn!("[TaskQueue] transition hook dropped: queue shut down");
            } else {
                inner.tasks.push_back(task);
                self.work_available.notify_one();
            }
        }
        previous
    }

    /// Stop accepting new work and wake the loop so it can exit once the
    /// backlog drains.
    pub(crate) fn shut_down(&self) {
        let mut inner = self.inner.lock();
        inner.shut_down = true;
        self.work_available.notify_one();
    }

    pub(crate) fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_in_fifo_order() {
        let queue: TaskQueue<Vec<u32>> = TaskQueue::new();
        for i in 0..3 {
            assert!(queue.push(Task::new(move |seen: &mut Vec<u32>| seen.push(i))));
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            let task = queue.next_task().expect("queued task");
            task.execute("test", &mut seen);
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn push_after_shutdown_is_refused() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        queue.shut_down();
        assert!(!queue.push(Task::new(|_| {})));
    }

    #[test]
    fn shutdown_drains_backlog_before_ending() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(queue.push(Task::new(|count| *count += 1)));
        queue.shut_down();

        let mut count = 0;
        let task = queue.next_task().expect("backlog survives shutdown");
        task.execute("test", &mut count);
        assert_eq!(count, 1);
        assert!(queue.next_task().is_none());
    }

    #[test]
    fn transition_hook_is_refused_after_shutdown() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        queue.set_working(true, None);
        queue.shut_down();
        queue.set_working(false, Some(Task::new(|count| *count += 1)));
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn lending_flag_round_trips() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert_eq!(queue.set_working(true, None), WorkerState::Idle);
        assert_eq!(queue.state(), WorkerState::Working);
        assert_eq!(queue.set_working(false, None), WorkerState::Working);
        assert_eq!(queue.state(), WorkerState::Idle);
    }

    #[test]
    fn transition_hook_lands_behind_queued_work() {
        let queue: TaskQueue<Vec<&'static str>> = TaskQueue::new();
        assert!(queue.push(Task::new(|seen: &mut Vec<&'static str>| seen.push("task"))));
        queue.set_working(false, Some(Task::new(|seen: &mut Vec<&'static str>| {
            seen.push("hook");
        })));

        let mut seen = Vec::new();
        for _ in 0..2 {
            queue.next_task().expect("task").execute("test", &mut seen);
        }
        assert_eq!(seen, vec!["task", "hook"]);
    }
}
