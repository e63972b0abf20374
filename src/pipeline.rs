//! Submission pipeline: sources → queue → orderer.
//!
//! Producers move fragments from their [`FragmentSource`]s onto a shared
//! [`BlockingQueue`] ([`pump`], [`forward`]). A [`Submitter`] thread drains
//! the queue in batches and sends each batch to the orderer as one
//! [`FragmentChain`].
//!
//! The submitter owns its [`OrdererClient`] for the lifetime of the thread,
//! so the one-request-in-flight rule holds without an external lock.

use evb_core::{Fragment, FragmentChain};
use evb_queue::BlockingQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{AppResult, EvbError};
use crate::network::discovery::{PortManagerDirectory, ServiceDirectory};
use crate::network::{OrdererClient, OrdererError};
use crate::source::{FragmentProvider, FragmentSource};

/// Longest the submitter sleeps on an idle queue before re-checking.
pub const BATCH_WAIT: Duration = Duration::from_millis(100);

/// Running totals for a submitter.
#[derive(Debug, Default)]
pub struct SubmitStats {
    batches: AtomicU64,
    fragments: AtomicU64,
    bytes: AtomicU64,
}

/// Point-in-time copy of [`SubmitStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitSnapshot {
    pub batches: u64,
    pub fragments: u64,
    pub bytes: u64,
}

impl SubmitStats {
    fn record(&self, fragments: usize, bytes: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.fragments.fetch_add(fragments as u64, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SubmitSnapshot {
        SubmitSnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            fragments: self.fragments.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

type WorkerResult<D> = (OrdererClient<D>, Result<(), OrdererError>);

/// Background thread feeding queued fragments to the orderer.
pub struct Submitter<D: ServiceDirectory = PortManagerDirectory> {
    name: String,
    queue: Arc<BlockingQueue<Fragment>>,
    running: Arc<AtomicBool>,
    stats: Arc<SubmitStats>,
    worker: Option<JoinHandle<WorkerResult<D>>>,
}

impl<D> Submitter<D>
where
    D: ServiceDirectory + Send + 'static,
{
    /// Start submitting from `queue` through an already connected client.
    pub fn spawn(
        name: impl Into<String>,
        client: OrdererClient<D>,
        queue: Arc<BlockingQueue<Fragment>>,
    ) -> AppResult<Self> {
        if !client.is_connected() {
            return Err(OrdererError::NotConnected.into());
        }

        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(SubmitStats::default());

        let worker = {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name(format!("submit-{}", name))
                .spawn(move || submit_loop(client, &queue, &running, &stats))?
        };

        info!(submitter = %name, "Submitter started");
        Ok(Self {
            name,
            queue,
            running,
            stats,
            worker: Some(worker),
        })
    }

    pub fn stats(&self) -> SubmitSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Submit whatever is still queued, disconnect and join the thread.
    pub fn stop(mut self) -> AppResult<SubmitSnapshot> {
        let (mut client, result) = self.join()?;
        result?;
        client.disconnect()?;

        let stats = self.stats.snapshot();
        info!(
            submitter = %self.name,
            batches = stats.batches,
            fragments = stats.fragments,
            bytes = stats.bytes,
            "Submitter stopped"
        );
        Ok(stats)
    }

    fn join(&mut self) -> AppResult<WorkerResult<D>> {
        self.running.store(false, Ordering::SeqCst);
        self.queue.wake();

        let worker = self
            .worker
            .take()
            .ok_or_else(|| EvbError::WorkerPanicked(self.name.clone()))?;
        worker
            .join()
            .map_err(|_| EvbError::WorkerPanicked(self.name.clone()))
    }
}

impl<D: ServiceDirectory> Drop for Submitter<D> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.running.store(false, Ordering::SeqCst);
            self.queue.wake();
            if worker.join().is_err() {
                error!(submitter = %self.name, "Submitter thread panicked");
            }
        }
    }
}

fn submit_loop<D: ServiceDirectory>(
    mut client: OrdererClient<D>,
    queue: &BlockingQueue<Fragment>,
    running: &AtomicBool,
    stats: &SubmitStats,
) -> WorkerResult<D> {
    loop {
        let stopping = !running.load(Ordering::SeqCst);
        let batch = queue.get_all();

        if !batch.is_empty() {
            if let Err(e) = submit_batch(&mut client, &batch, stats) {
                error!(error = %e, fragments = batch.len(), "Fragment submission failed");
                return (client, Err(e));
            }
        }
        if stopping {
            break;
        }
        if batch.is_empty() {
            queue.wait(BATCH_WAIT);
        }
    }
    (client, Ok(()))
}

fn submit_batch<D: ServiceDirectory>(
    client: &mut OrdererClient<D>,
    batch: &[Fragment],
    stats: &SubmitStats,
) -> Result<(), OrdererError> {
    let chain = FragmentChain::from(batch);
    client.submit_fragments(&chain)?;
    stats.record(chain.len(), chain.encoded_len());
    Ok(())
}

/// Move everything `source` currently holds onto `queue`.
///
/// Fragments are taken under a single lock and queued after it is
/// released.
pub fn pump<P: FragmentProvider>(source: &FragmentSource<P>, queue: &BlockingQueue<Fragment>) -> usize {
    let mut fragments = Vec::new();
    let moved = source.lock().add_all(&mut fragments);
    for fragment in fragments {
        queue.queue(fragment);
    }
    moved
}

/// Forward fragments from `source` to `queue` until the source shuts down
/// and is empty. Returns the number forwarded.
pub fn forward<P: FragmentProvider>(source: &FragmentSource<P>, queue: &BlockingQueue<Fragment>) -> u64 {
    let mut total = 0u64;
    let mut fragments = Vec::new();

    while source
        .handle_data(|guard| guard.add_all(&mut fragments))
        .is_some()
    {
        total += fragments.len() as u64;
        for fragment in fragments.drain(..) {
            queue.queue(fragment);
        }
    }

    debug!(source = source.name(), fragments = total, "Source forwarding finished");
    total
}
