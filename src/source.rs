//! Fragment sources: one per data channel.
//!
//! A [`FragmentSource`] wraps a [`FragmentProvider`] (the channel-specific
//! readout) behind one mutex and one condition variable. Two styles of
//! driving are supported:
//!
//! - **Polling**: a dedicated thread calls [`FragmentSource::run`], which
//!   periodically locks the source and invokes the provider's
//!   [`poll`](FragmentProvider::poll) hook.
//! - **Completion**: an external event (interrupt handler, I/O callback)
//!   calls [`FragmentSource::complete`] to update the provider in place.
//!
//! Either way, consumers block in [`FragmentSource::handle_data`] until the
//! provider reports data and then run their handler under the same lock.
//!
//! Provider methods are only reachable through a [`SourceGuard`], so they
//! cannot be called without holding the lock. The lock is not reentrant: a
//! handler must use the guard it is given, never the source's self-locking
//! wrappers.

use evb_core::Fragment;
use evb_queue::DEFAULT_WAIT;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Channel-specific fragment readout.
///
/// Every method is invoked with the owning source's lock held.
pub trait FragmentProvider: Send {
    /// Barrier type of the next fragment, 0 for data. Meaningful only while
    /// [`data_present`](Self::data_present) is true.
    fn provide_type(&self) -> u32;

    /// Timestamp of the next fragment.
    fn provide_timestamp(&self) -> u64;

    fn data_present(&self) -> bool;

    /// Move the next fragment into `out`.
    fn add_next_fragment(&mut self, out: &mut Vec<Fragment>);

    /// Drop the next fragment without delivering it.
    fn discard_fragment(&mut self);

    /// Driver hook called by [`FragmentSource::run`]. Returns `false` when
    /// the channel is finished.
    fn poll(&mut self) -> bool;
}

struct SourceState<P> {
    provider: P,
    stopped: bool,
}

/// Lock on a [`FragmentSource`], giving access to its provider.
///
/// The lock is released when the guard is dropped.
pub struct SourceGuard<'a, P> {
    state: MutexGuard<'a, SourceState<P>>,
}

impl<P: FragmentProvider> SourceGuard<'_, P> {
    pub fn next_type(&self) -> u32 {
        self.state.provider.provide_type()
    }

    pub fn next_timestamp(&self) -> u64 {
        self.state.provider.provide_timestamp()
    }

    pub fn has_data(&self) -> bool {
        self.state.provider.data_present()
    }

    pub fn discard_next(&mut self) {
        self.state.provider.discard_fragment();
    }

    pub fn add_next(&mut self, out: &mut Vec<Fragment>) {
        self.state.provider.add_next_fragment(out);
    }

    /// Move every available fragment into `out`, returning how many moved.
    pub fn add_all(&mut self, out: &mut Vec<Fragment>) -> usize {
        let before = out.len();
        while self.state.provider.data_present() {
            self.state.provider.add_next_fragment(out);
        }
        out.len() - before
    }

    pub fn provider(&self) -> &P {
        &self.state.provider
    }

    pub fn provider_mut(&mut self) -> &mut P {
        &mut self.state.provider
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.stopped
    }
}

/// A data channel shared between its driver and its consumers.
pub struct FragmentSource<P> {
    name: String,
    state: Mutex<SourceState<P>>,
    data_ready: Condvar,
    poll_interval: Duration,
}

impl<P: FragmentProvider> FragmentSource<P> {
    pub fn new(name: impl Into<String>, provider: P, poll_interval: Duration) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SourceState {
                provider,
                stopped: false,
            }),
            data_ready: Condvar::new(),
            poll_interval,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Acquire the source lock.
    pub fn lock(&self) -> SourceGuard<'_, P> {
        SourceGuard {
            state: self.state.lock(),
        }
    }

    pub fn next_type(&self) -> u32 {
        self.lock().next_type()
    }

    pub fn next_timestamp(&self) -> u64 {
        self.lock().next_timestamp()
    }

    pub fn has_data(&self) -> bool {
        self.lock().has_data()
    }

    pub fn discard_next(&self) {
        self.lock().discard_next();
    }

    pub fn add_next(&self, out: &mut Vec<Fragment>) {
        self.lock().add_next(out);
    }

    /// Drive the provider until its hook returns `false` or the source is
    /// shut down.
    ///
    /// Each iteration sleeps for the poll interval, then calls
    /// [`FragmentProvider::poll`] under the lock and wakes consumers if
    /// data is present. A provider that finishes shuts the source down so
    /// consumers stop waiting once they have drained it.
    pub fn run(&self) {
        debug!(source = %self.name, "Source driver started");
        let mut polls: u64 = 0;

        loop {
            thread::sleep(self.poll_interval);

            let mut state = self.state.lock();
            if state.stopped {
                break;
            }
            let keep_going = state.provider.poll();
            polls += 1;
            if state.provider.data_present() {
                self.data_ready.notify_all();
            }
            if !keep_going {
                state.stopped = true;
                self.data_ready.notify_all();
                break;
            }
        }

        debug!(source = %self.name, polls, "Source driver stopped");
    }

    /// Run [`run`](Self::run) on a named thread.
    pub fn spawn(self: &Arc<Self>) -> io::Result<JoinHandle<()>>
    where
        P: 'static,
    {
        let source = Arc::clone(self);
        thread::Builder::new()
            .name(format!("source-{}", self.name))
            .spawn(move || source.run())
    }

    /// Update the provider from a completion callback.
    ///
    /// `update` runs under the lock; consumers are woken if it leaves data
    /// present.
    pub fn complete<R>(&self, update: impl FnOnce(&mut P) -> R) -> R {
        let mut state = self.state.lock();
        let result = update(&mut state.provider);
        if state.provider.data_present() {
            trace!(source = %self.name, "Completion produced data");
            self.data_ready.notify_all();
        }
        result
    }

    /// Block until data is present, then run `handler` under the lock.
    ///
    /// Returns `None` once the source is shut down with nothing left to
    /// hand out.
    pub fn handle_data<R>(&self, handler: impl FnOnce(&mut SourceGuard<'_, P>) -> R) -> Option<R> {
        self.wait_and_handle(None, handler)
    }

    /// Like [`handle_data`](Self::handle_data), giving up after `timeout`.
    ///
    /// A timeout too large to represent as a deadline never expires.
    pub fn handle_data_timeout<R>(
        &self,
        timeout: Duration,
        handler: impl FnOnce(&mut SourceGuard<'_, P>) -> R,
    ) -> Option<R> {
        self.wait_and_handle(Instant::now().checked_add(timeout), handler)
    }

    /// Stop the driver and release every blocked consumer.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if !state.stopped {
            debug!(source = %self.name, "Source shut down");
        }
        state.stopped = true;
        self.data_ready.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().stopped
    }

    fn wait_and_handle<R>(
        &self,
        deadline: Option<Instant>,
        handler: impl FnOnce(&mut SourceGuard<'_, P>) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        while !state.provider.data_present() {
            if state.stopped {
                return None;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    (deadline - now).min(DEFAULT_WAIT)
                }
                None => DEFAULT_WAIT,
            };
            self.data_ready.wait_for(&mut state, slice);
        }

        let mut guard = SourceGuard { state };
        Some(handler(&mut guard))
    }
}

impl<P> Drop for FragmentSource<P> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.stopped = true;
        self.data_ready.notify_all();
    }
}

impl<P> std::fmt::Debug for FragmentSource<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FragmentSource")
            .field("name", &self.name)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
