//! Cancellable scheduled tasks with explicit handles.
//!
//! Every timer and every background I/O operation in a session is a tokio
//! task that owns no session state. When it completes it delivers a single
//! event back into the session's queue through an [`Emitter`]; the session
//! then handles that event on its own loop. Dropping or cancelling the
//! returned [`TaskHandle`] aborts the task, so a timer that is replaced
//! never fires.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Sending half of a session event queue.
pub struct Emitter<E> {
    tx: mpsc::UnboundedSender<E>,
}

impl<E> Clone for Emitter<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<E> Emitter<E> {
    /// Deliver an event. Returns `false` if the session has gone away.
    pub fn emit(&self, event: impl Into<E>) -> bool {
        self.tx.send(event.into()).is_ok()
    }
}

/// Spawns timers and background tasks that report back as events of type `E`.
pub struct Scheduler<E> {
    emitter: Emitter<E>,
}

impl<E> Clone for Scheduler<E> {
    fn clone(&self) -> Self {
        Self {
            emitter: self.emitter.clone(),
        }
    }
}

impl<E: Send + 'static> Scheduler<E> {
    /// Create a scheduler and the receiver its events arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<E>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                emitter: Emitter { tx },
            },
            rx,
        )
    }

    /// Handle for emitting events from inside spawned tasks.
    #[must_use]
    pub fn emitter(&self) -> Emitter<E> {
        self.emitter.clone()
    }

    /// Arm a one-shot timer that emits `event` after `delay`.
    pub fn schedule(&self, delay: Duration, event: impl Into<E> + Send + 'static) -> TaskHandle {
        let emitter = self.emitter();
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            emitter.emit(event);
        })
    }

    /// Run `task` in the background.
    pub fn spawn<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            handle: Some(tokio::spawn(task)),
        }
    }

    /// Run `task` in the background and emit its output when it completes.
    pub fn spawn_reporting<F>(&self, task: F) -> TaskHandle
    where
        F: Future + Send + 'static,
        F::Output: Into<E> + Send,
    {
        let emitter = self.emitter();
        self.spawn(async move {
            emitter.emit(task.await);
        })
    }
}

/// Owning handle to a scheduled task. The task is aborted when the handle is
/// cancelled or dropped, unless it was detached.
#[derive(Debug)]
pub struct TaskHandle {
    handle: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Abort the task. A timer cancelled before its deadline never fires.
    pub fn cancel(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Let the task run to completion on its own.
    pub fn detach(mut self) {
        self.handle.take();
    }

    /// Whether the task has already run to completion or been aborted.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
