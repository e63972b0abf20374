//! Blocking FIFO for handing fragments between threads.
//!
//! [`BlockingQueue<T>`] is a mutex + condition variable queue with two
//! features a plain channel does not give us:
//!
//! - **Watermark wakeups**: a broadcast is only issued once the queue holds
//!   more than `wake_threshold` items, so a consumer that batches its work
//!   (drain everything with [`BlockingQueue::get_all`]) is not woken for
//!   every single insert.
//! - **Explicit wait/wake**: [`BlockingQueue::wait`] and
//!   [`BlockingQueue::wake`] let a consumer sleep until there is enough work
//!   *or* until someone else (for example a shutdown path) wants it awake.
//!
//! # Missed wakeups
//!
//! A consumer typically checks for data, finds none, then calls `wait()`.
//! A producer can insert and broadcast in the gap between those two steps,
//! and the broadcast is lost. Every internal wait is therefore bounded by
//! [`DEFAULT_WAIT`]; a blocked [`BlockingQueue::get`] re-checks the queue at
//! least that often.
//!
//! # Example
//!
//! ```
//! use evb_queue::BlockingQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let queue = Arc::new(BlockingQueue::new());
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..3 {
//!             queue.queue(i);
//!         }
//!     })
//! };
//!
//! assert_eq!(queue.get(), 0);
//! assert_eq!(queue.get(), 1);
//! assert_eq!(queue.get(), 2);
//! producer.join().unwrap();
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

/// Upper bound on any single internal condition variable wait.
pub const DEFAULT_WAIT: Duration = Duration::from_millis(500);

struct QueueState<T> {
    items: VecDeque<T>,
    wake_threshold: usize,
    /// Bumped by every broadcast; waiters compare against it.
    wake_generation: u64,
}

/// Thread-safe FIFO with threshold-based wakeups.
///
/// Ownership of an item moves into the queue on [`queue`](Self::queue) and
/// out to exactly one consumer on dequeue.
pub struct BlockingQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> BlockingQueue<T> {
    /// Create a queue that wakes waiters on every insert.
    pub fn new() -> Self {
        Self::with_wake_threshold(0)
    }

    /// Create a queue that wakes waiters once it holds more than
    /// `wake_threshold` items.
    pub fn with_wake_threshold(wake_threshold: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                wake_threshold,
                wake_generation: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Insert at the tail, broadcasting if the queue is now above the
    /// wake threshold.
    pub fn queue(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        if state.items.len() > state.wake_threshold {
            Self::broadcast(&mut state, &self.available);
        }
    }

    /// Remove the head, blocking until one is available.
    pub fn get(&self) -> T {
        loop {
            if let Some(item) = self.get_now() {
                return item;
            }
            self.wait(DEFAULT_WAIT);
        }
    }

    /// Remove the head if there is one.
    pub fn get_now(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Atomically drain the whole queue in FIFO order.
    pub fn get_all(&self) -> Vec<T> {
        let mut state = self.state.lock();
        state.items.drain(..).collect()
    }

    /// Block until [`wake`](Self::wake) is called (directly or by crossing the
    /// threshold) or `timeout` expires.
    ///
    /// Returns `true` if a wake was observed. Callers re-check the queue
    /// either way.
    ///
    /// A timeout too large to represent as a deadline waits until woken.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        let generation = state.wake_generation;

        while state.wake_generation == generation {
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        trace!(timeout_ms = timeout.as_millis() as u64, "Queue wait timed out");
                        return false;
                    }
                    (deadline - now).min(DEFAULT_WAIT)
                }
                None => DEFAULT_WAIT,
            };
            self.available.wait_for(&mut state, slice);
        }
        true
    }

    /// Wake every waiter unconditionally.
    pub fn wake(&self) {
        let mut state = self.state.lock();
        Self::broadcast(&mut state, &self.available);
    }

    /// Change the watermark; queued items are untouched.
    pub fn set_wake_threshold(&self, wake_threshold: usize) {
        self.state.lock().wake_threshold = wake_threshold;
    }

    /// Current watermark.
    pub fn wake_threshold(&self) -> usize {
        self.state.lock().wake_threshold
    }

    /// Number of broadcasts issued since creation.
    pub fn wake_count(&self) -> u64 {
        self.state.lock().wake_generation
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    fn broadcast(state: &mut QueueState<T>, available: &Condvar) {
        state.wake_generation = state.wake_generation.wrapping_add(1);
        available.notify_all();
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for BlockingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BlockingQueue")
            .field("len", &state.items.len())
            .field("wake_threshold", &state.wake_threshold)
            .field("wake_count", &state.wake_generation)
            .finish()
    }
}
