//! Startup command queue.
//!
//! Host code can push commands before the engine is ready. They are buffered and, once
//! [`CommandQueue::set_up_immediate_processing`] is called, executed exactly once in push
//! order. From then on every pushed command runs immediately on the caller's thread.
//!
//! ```rust
//! use onekey_sync::queue::CommandQueue;
//! use std::sync::{Arc, Mutex};
//!
//! let queue = CommandQueue::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let s = seen.clone();
//! queue.push(move || { s.lock().unwrap().push("early"); Ok(()) });
//! assert!(seen.lock().unwrap().is_empty());
//!
//! queue.set_up_immediate_processing();
//! let s = seen.clone();
//! queue.push(move || { s.lock().unwrap().push("late"); Ok(()) });
//! assert_eq!(*seen.lock().unwrap(), vec!["early", "late"]);
//! ```

use crate::errors::SyncError;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::oneshot;

/// An operation executed once the engine is ready.
pub type Command = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Commands are buffered
    Deferred,
    /// Buffered commands are being executed; new ones are appended behind them
    Draining,
    /// Commands run as soon as they are pushed
    Immediate,
}

struct QueueInner {
    mode: Mode,
    buffer: VecDeque<Command>,
}

pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    /// Set when the page is about to be unloaded by a redirect
    stopped: AtomicBool,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CommandQueue")
            .field("mode", &inner.mode)
            .field("buffered", &inner.buffer.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                mode: Mode::Deferred,
                buffer: VecDeque::new(),
            }),
            stopped: AtomicBool::new(false),
        }
    }

    /// Pushes a command: buffered before the queue is ready, executed at once after.
    pub fn push<F>(&self, op: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // Checked under the lock so a concurrent stop() cannot strand the command
        if self.is_stopped() {
            log::debug!("Queue stopped, dropping command");
            return;
        }
        match inner.mode {
            Mode::Deferred | Mode::Draining => inner.buffer.push_back(Box::new(op)),
            Mode::Immediate => {
                drop(inner);
                run(Box::new(op));
            }
        }
    }

    /// Executes every buffered command in order, then switches to immediate mode.
    ///
    /// Commands pushed while draining are executed after the ones already buffered.
    /// Returns the number of commands executed. Calling it again is a no-op.
    pub fn set_up_immediate_processing(&self) -> usize {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.mode != Mode::Deferred {
                return 0;
            }
            inner.mode = Mode::Draining;
        }

        let mut executed = 0;
        loop {
            if self.is_stopped() {
                log::info!("Queue stopped while draining");
                drop(self.discard_buffered());
                break;
            }

            let next = {
                let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                match inner.buffer.pop_front() {
                    Some(cmd) => cmd,
                    None => {
                        // Switch in the same critical section that observed the empty buffer
                        inner.mode = Mode::Immediate;
                        break;
                    }
                }
            };

            run(next);
            executed += 1;
        }

        executed
    }

    /// Marks the queue as stopped. Buffered and later commands are dropped, so pending
    /// [`when_ready`](Self::when_ready) calls fail with [`SyncError::QueueStopped`].
    pub fn stop(&self) {
        log::info!("Stop queue");
        let dropped = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            self.stopped.store(true, Ordering::SeqCst);
            std::mem::take(&mut inner.buffer)
        };
        if !dropped.is_empty() {
            log::debug!("Dropped {} buffered commands", dropped.len());
        }
    }

    /// Empties the buffer. Commands are returned so they drop outside the lock.
    fn discard_buffered(&self) -> VecDeque<Command> {
        std::mem::take(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner).buffer)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_immediate(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).mode == Mode::Immediate
    }

    /// Number of buffered commands.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once every command pushed before this call has been executed.
    pub fn when_ready(&self) -> impl Future<Output = Result<(), SyncError>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.push(move || {
            let _ = tx.send(());
            Ok(())
        });
        async move { rx.await.map_err(|_| SyncError::QueueStopped) }
    }
}

fn run(cmd: Command) {
    match catch_unwind(AssertUnwindSafe(cmd)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Error processing command: {:#}", e),
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Command panicked: {}", msg);
        }
    }
}
