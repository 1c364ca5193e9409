use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use uuid::Uuid;

use crate::domain::distribution::batch_report::{BatchReport, BatchState};
use crate::domain::distribution::cleanup_pattern::CleanupPattern;
use crate::domain::distribution::progress::{BatchEvent, ProgressEvent, TransferFailure, TransferOutcome};
use crate::domain::distribution::transfer_job::{DEFAULT_CHUNK_SIZE, TransferJob};
use crate::domain::machine::destination_registry::DestinationRegistry;
use crate::domain::machine::machine_id::MachineId;
use crate::domain::planning::assignment_planner::Assignment;
use crate::domain::staging_config::StagingConfig;
use crate::error::{Error, Result};

#[derive(Debug)]
struct QueuedTransfer {
    machine: MachineId,
    source: PathBuf,
    destination: PathBuf,
}

/// State shared by the worker threads of one batch.
struct BatchContext {
    queue: Mutex<VecDeque<QueuedTransfer>>,
    state: Mutex<BatchState>,
    cleanup: CleanupPattern,
    chunk_size: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl BatchContext {
    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next(&self) -> Option<QueuedTransfer> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front()
    }
}

/// Runs batches of transfers on a bounded pool of worker threads.
#[derive(Debug, Clone)]
pub struct DistributionEngine {
    registry: Arc<DestinationRegistry>,
    cleanup: CleanupPattern,
    chunk_size: usize,
}

impl DistributionEngine {
    pub fn new(registry: Arc<DestinationRegistry>, cleanup: CleanupPattern) -> Self {
        DistributionEngine { registry, cleanup, chunk_size: DEFAULT_CHUNK_SIZE }
    }

    pub fn from_config(config: &StagingConfig) -> Self {
        Self::new(Arc::new(config.registry.clone()), config.cleanup_pattern.clone()).with_chunk_size(config.chunk_size)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    /// Starts a batch and returns immediately.
    ///
    /// Every assignment is checked against the registry first; a machine without a destination
    /// fails with `no destination configured` before any I/O. Assignments without a file are
    /// recorded as such and not transferred. The rest run as one `TransferJob` each on at most
    /// `max_concurrency` threads. A failed transfer never stops its siblings.
    pub fn run(&self, assignments: &[Assignment], max_concurrency: usize) -> Result<Batch> {
        if max_concurrency == 0 {
            return Err(Error::InvalidConcurrency(max_concurrency));
        }

        let batch_id = Uuid::new_v4();
        let started = Instant::now();
        let (tx, rx) = mpsc::channel::<BatchEvent>();

        let mut state = BatchState::default();
        let mut queue = VecDeque::new();

        for assignment in assignments {
            let machine = assignment.machine;
            match (self.registry.resolve(machine), &assignment.file) {
                (None, _) => {
                    log::warn!("Machine {} has no destination configured.", machine);
                    state.set(machine, TransferOutcome::Failed(TransferFailure::NoDestination));
                    let _ = tx.send(BatchEvent::Transfer { machine, event: ProgressEvent::Failed(TransferFailure::NoDestination) });
                }
                (Some(_), None) => state.set(machine, TransferOutcome::NoFileAssigned),
                (Some(destination), Some(source)) => {
                    state.set(machine, TransferOutcome::Pending);
                    queue.push_back(QueuedTransfer { machine, source: source.clone(), destination: destination.to_path_buf() });
                }
            }
        }

        let transfers = queue.len();
        let workers = max_concurrency.min(transfers);
        log::info!("Batch {} started: {} assignment(s), {} transfer(s), {} worker(s).", batch_id, assignments.len(), transfers, workers);

        let context = Arc::new(BatchContext {
            queue: Mutex::new(queue),
            state: Mutex::new(state),
            cleanup: self.cleanup.clone(),
            chunk_size: self.chunk_size,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(workers);
        for n in 0..workers {
            let context = context.clone();
            let tx = tx.clone();
            let handle = thread::Builder::new()
                .name(format!("transfer-{}", n))
                .spawn(move || Self::run_worker(&context, &tx))
                .map_err(|e| Error::BatchAborted(format!("failed to spawn transfer worker: {}", e)))?;
            handles.push(handle);
        }

        let coordinator = thread::Builder::new()
            .name("transfer-batch".to_string())
            .spawn(move || Self::finish_batch(batch_id, started, context, handles, tx))
            .map_err(|e| Error::BatchAborted(format!("failed to spawn batch coordinator: {}", e)))?;

        Ok(Batch { id: batch_id, events: rx, coordinator })
    }

    fn run_worker(context: &BatchContext, tx: &mpsc::Sender<BatchEvent>) {
        while let Some(transfer) = context.next() {
            let machine = transfer.machine;
            let now_active = context.active.fetch_add(1, Ordering::SeqCst) + 1;
            context.peak.fetch_max(now_active, Ordering::SeqCst);

            context.state().set(machine, TransferOutcome::Copying(0.0));
            log::info!("Staging '{}' onto machine {}.", transfer.source.display(), machine);

            let job = TransferJob::new(&transfer.source, &transfer.destination, &context.cleanup).with_chunk_size(context.chunk_size);
            let outcome = job.execute(|event| {
                if let ProgressEvent::Progress(fraction) = &event {
                    context.state().set(machine, TransferOutcome::Copying(*fraction));
                }
                let _ = tx.send(BatchEvent::Transfer { machine, event });
            });

            context.state().set(machine, outcome);
            context.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn finish_batch(
        batch_id: Uuid,
        started: Instant,
        context: Arc<BatchContext>,
        handles: Vec<JoinHandle<()>>,
        tx: mpsc::Sender<BatchEvent>,
    ) -> BatchReport {
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A transfer worker of batch {} panicked.", batch_id);
            }
        }

        let mut state = std::mem::take(&mut *context.state());

        // Only reachable when a worker panicked mid-transfer.
        for machine in state.unfinished() {
            let failure = TransferFailure::Aborted("transfer worker stopped unexpectedly".to_string());
            let _ = tx.send(BatchEvent::Transfer { machine, event: ProgressEvent::Failed(failure.clone()) });
            state.set(machine, TransferOutcome::Failed(failure));
        }

        let report = state.into_report(batch_id, context.peak.load(Ordering::SeqCst), started.elapsed());
        log::info!(
            "Batch {} completed in {:.2?}: {} succeeded, {} failed.",
            batch_id,
            report.elapsed,
            report.succeeded().len(),
            report.failures.len()
        );

        let _ = tx.send(BatchEvent::Completed(report.clone()));
        report
    }
}

/// Handle of a running batch: its progress feed and its final report.
#[derive(Debug)]
pub struct Batch {
    id: Uuid,
    events: mpsc::Receiver<BatchEvent>,
    coordinator: JoinHandle<BatchReport>,
}

impl Batch {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Blocks for the next event. `None` once the feed is exhausted after `Completed`.
    pub fn recv(&self) -> Option<BatchEvent> {
        self.events.recv().ok()
    }

    /// Iterates the feed until the batch completed, `Completed` included.
    pub fn events(&self) -> impl Iterator<Item = BatchEvent> + '_ {
        self.events.iter()
    }

    /// Waits for every transfer to finish and returns the report. Unread events are discarded.
    pub fn wait(self) -> Result<BatchReport> {
        self.coordinator.join().map_err(|_| Error::BatchAborted(format!("coordinator of batch {} panicked", self.id)))
    }
}
