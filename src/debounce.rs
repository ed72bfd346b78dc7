//! Keyed debounce timers.
//!
//! Each key has at most one armed timer. Scheduling again for the same key
//! disarms the old timer and starts the full delay over, so a burst of
//! requests runs the action once, after the burst has gone quiet.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::debug;

pub const DEBOUNCE_MS: u64 = 25;

pub fn default_delay() -> Duration {
    Duration::from_millis(DEBOUNCE_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Fired,
    Cancelled,
}

/// Completion handle for one scheduled action.
#[derive(Debug)]
pub struct FlushHandle {
    done: Receiver<FlushOutcome>,
}

impl FlushHandle {
    /// Blocks until the timer fired and its action returned, or was cancelled.
    pub fn wait(self) -> FlushOutcome {
        self.done.recv().unwrap_or(FlushOutcome::Cancelled)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<FlushOutcome> {
        match self.done.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(FlushOutcome::Cancelled),
        }
    }
}

struct Timer {
    generation: u64,
    cancel: Sender<()>,
    thread: JoinHandle<()>,
    // Threads of timers this one replaced; they may still be finishing.
    retired: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct Inner {
    timers: Mutex<HashMap<String, Timer>>,
    generation: AtomicU64,
}

#[derive(Clone, Default)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F>(&self, key: &str, delay: Duration, action: F) -> FlushHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded(1);
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        let mut timers = self.inner.timers.lock();
        let previous = timers.remove(key);

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let thread = thread::spawn(move || {
            let outcome = match cancel_rx.recv_timeout(delay) {
                // a re-arm can land between the timeout and this check; the
                // newer timer then owns the action
                Err(RecvTimeoutError::Timeout) if !is_current(&inner, &owned_key, generation) => {
                    debug!("debounce timer {owned_key} superseded");
                    FlushOutcome::Cancelled
                }
                Err(RecvTimeoutError::Timeout) => {
                    debug!("debounce timer {owned_key} fired");
                    action();
                    FlushOutcome::Fired
                }
                _ => FlushOutcome::Cancelled,
            };
            {
                let mut timers = inner.timers.lock();
                if timers.get(&owned_key).map(|timer| timer.generation) == Some(generation) {
                    timers.remove(&owned_key);
                }
            }
            let _ = done_tx.send(outcome);
        });

        let mut retired = Vec::new();
        if let Some(previous) = previous {
            let _ = previous.cancel.try_send(());
            retired.extend(previous.retired);
            retired.push(previous.thread);
        }
        retired.retain(|handle| !handle.is_finished());

        timers.insert(
            key.to_string(),
            Timer {
                generation,
                cancel: cancel_tx,
                thread,
                retired,
            },
        );

        FlushHandle { done: done_rx }
    }

    /// Disarms the timer for `key` and waits for its thread, including an
    /// action that already started. Returns whether a timer was pending.
    pub fn cancel(&self, key: &str) -> bool {
        let Some(timer) = self.inner.timers.lock().remove(key) else {
            return false;
        };
        let _ = timer.cancel.try_send(());
        let current = thread::current().id();
        for handle in timer.retired.into_iter().chain(std::iter::once(timer.thread)) {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        debug!("debounce timer {key} cancelled");
        true
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.timers.lock().contains_key(key)
    }
}

fn is_current(inner: &Inner, key: &str, generation: u64) -> bool {
    inner.timers.lock().get(key).map(|timer| timer.generation) == Some(generation)
}
