//! Units of GPU work submitted to a worker's queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::Sender;

/// What happened to one executed task, delivered on its receipt channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// The task panicked. The worker thread survived and moved on to the
    /// next task; the message is whatever the panic payload carried.
    Panicked(String),
}

type TaskFn<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

/// A unit of work bound to one worker's context. Immutable once enqueued.
pub(crate) struct Task<C> {
    run: TaskFn<C>,
    receipt: Option<Sender<TaskOutcome>>,
}

impl<C> Task<C> {
    pub(crate) fn new(run: impl FnOnce(&mut C) + Send + 'static) -> Self {
        Self {
            run: Box::new(run),
            receipt: None,
        }
    }

    pub(crate) fn with_receipt(
        run: impl FnOnce(&mut C) + Send + 'static,
        receipt: Sender<TaskOutcome>,
    ) -> Self {
        Self {
            run: Box::new(run),
            receipt: Some(receipt),
        }
    }

    /// Execute on the worker thread.
    ///
    /// Panics are caught here so a failing task cannot take the thread (or
    /// the queue behind it) down. The failure goes to the submitter's
    /// receipt if one exists, otherwise to the log.
    pub(crate) fn execute(self, worker_name: &str, context: &mut C) {
        let Self { run, receipt } = self;
        match panic::catch_unwind(AssertUnwindSafe(|| run(context))) {
            Ok(()) => {
                if let Some(tx) = receipt {
                    let _ = tx.send(TaskOutcome::Completed);
                }
            }
            Err(payload) => {
                let message = panic_message(payload);
                log::error!("[Worker \"{}\"] task panicked: {}", worker_name, message);
                if let Some(tx) = receipt {
                    let _ = tx.send(TaskOutcome::Panicked(message));
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}
