//! Shared one-shot hold timer
//!
//! A single `hold-timer` thread serves every key. Each armed timer is keyed
//! by `(KeyCode, generation)`; arming a key again replaces its generation so
//! at most one timer per key is ever live. Cancelled or superseded entries
//! stay in the heap and are discarded when they surface.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

use super::router::RouterError;
use crate::events::KeyCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    code: KeyCode,
    generation: u64,
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on deadline
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

#[derive(Default)]
struct State {
    queue: BinaryHeap<Entry>,
    /// Live generation per key; absent means nothing armed
    armed: HashMap<KeyCode, u64>,
    stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
}

/// Scheduler for the per-key hold threshold
pub struct HoldScheduler {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HoldScheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                wake: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the timer thread. `fire` runs on that thread with no scheduler
    /// lock held.
    pub fn spawn<F>(&self, fire: F) -> Result<(), RouterError>
    where
        F: Fn(KeyCode, u64) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);

        let handle = thread::Builder::new()
            .name("hold-timer".to_string())
            .spawn(move || {
                debug!("hold timer thread started");
                run_timer_loop(&shared, fire);
                debug!("hold timer thread stopped");
            })
            .map_err(|e| RouterError::TimerThread(e.to_string()))?;

        *self.worker.lock() = Some(handle);
        Ok(())
    }

    /// Arm (or re-arm) the timer for `code`, replacing any live generation
    pub fn arm(&self, code: KeyCode, generation: u64, delay: Duration) {
        let mut state = self.shared.state.lock();
        if state.stopped {
            return;
        }

        if let Some(stale) = state.armed.insert(code, generation) {
            trace!(%code, stale, generation, "replaced armed hold timer");
        }
        state.queue.push(Entry {
            deadline: Instant::now() + delay,
            code,
            generation,
        });
        self.shared.wake.notify_one();
    }

    /// Cancel the timer for `code` if `generation` is still the live one.
    ///
    /// Returns false when the timer already fired (or is firing) or was
    /// superseded.
    pub fn cancel(&self, code: KeyCode, generation: u64) -> bool {
        let mut state = self.shared.state.lock();
        if state.armed.get(&code) == Some(&generation) {
            state.armed.remove(&code);
            true
        } else {
            false
        }
    }

    /// Number of timers that are armed and not yet fired
    pub fn pending(&self) -> usize {
        self.shared.state.lock().armed.len()
    }

    /// Drop every armed timer and stop the thread. Idempotent.
    ///
    /// The thread is signalled, not joined: shutdown may be requested from
    /// inside a dispatch that the timer thread is waiting on.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.stopped = true;
        state.armed.clear();
        state.queue.clear();
        self.shared.wake.notify_all();
        drop(state);

        if self.worker.lock().take().is_some() {
            debug!("hold timer thread signalled to stop");
        }
    }
}

impl Default for HoldScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HoldScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer_loop<F>(shared: &Shared, fire: F)
where
    F: Fn(KeyCode, u64),
{
    let mut state = shared.state.lock();

    loop {
        if state.stopped {
            break;
        }

        let Some(next) = state.queue.peek().copied() else {
            shared.wake.wait(&mut state);
            continue;
        };

        if next.deadline > Instant::now() {
            shared.wake.wait_until(&mut state, next.deadline);
            continue;
        }

        state.queue.pop();
        if state.armed.get(&next.code) != Some(&next.generation) {
            continue;
        }
        state.armed.remove(&next.code);

        trace!(code = %next.code, generation = next.generation, "hold timer fired");
        MutexGuard::unlocked(&mut state, || fire(next.code, next.generation));
    }
}
