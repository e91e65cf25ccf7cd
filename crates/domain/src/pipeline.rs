use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::decode::CreatedRecord;
use crate::materialize::{GraphWrite, Materializer};
use crate::persist::{PersistOutcome, PersistService};
use crate::ports::BoxFuture;
use crate::telemetry;
use crate::throughput::{POSTS_LABEL, ThroughputMeter};

pub const DEFAULT_WORKER_POOL_SIZE: usize = 6;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// What happens to already-enqueued work on shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Close intake and let workers empty the queue before they exit.
    #[default]
    Drain,
    /// Cancel workers immediately; queued items are abandoned.
    Abort,
}

impl ShutdownPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drain => "drain",
            Self::Abort => "abort",
        }
    }
}

impl FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "drain" | "graceful" => Ok(Self::Drain),
            "abort" | "fast" => Ok(Self::Abort),
            other => Err(format!("unknown shutdown policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{kind} {cid} was not persisted")]
    Persist { kind: &'static str, cid: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("ingest pipeline is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub policy: ShutdownPolicy,
    /// Items accepted by `enqueue` that never finished processing.
    pub abandoned: usize,
}

/// Work performed by each worker for one dequeued record.
pub trait ProcessRecord: Send + Sync {
    fn process(
        &self,
        created: CreatedRecord,
    ) -> BoxFuture<'_, Result<PersistOutcome, ProcessError>>;
}

/// Materializes a record and hands it to the persistence layer.
#[derive(Clone)]
pub struct RecordProcessor {
    materializer: Materializer,
    persist: PersistService,
    meter: ThroughputMeter,
}

impl RecordProcessor {
    pub fn new(
        materializer: Materializer,
        persist: PersistService,
        meter: ThroughputMeter,
    ) -> Self {
        Self {
            materializer,
            persist,
            meter,
        }
    }
}

impl ProcessRecord for RecordProcessor {
    fn process(
        &self,
        created: CreatedRecord,
    ) -> BoxFuture<'_, Result<PersistOutcome, ProcessError>> {
        Box::pin(async move {
            let write = self.materializer.materialize(created).await;
            let outcome = self.persist.persist(&write).await;
            if matches!(write, GraphWrite::Post(_)) {
                self.meter.record_event(POSTS_LABEL);
            }
            match outcome {
                PersistOutcome::Failed => Err(ProcessError::Persist {
                    kind: write.kind(),
                    cid: write.cid().to_string(),
                }),
                outcome => Ok(outcome),
            }
        })
    }
}

/// Bounded hand-off queue drained by a fixed pool of worker tasks.
///
/// `enqueue` waits only while the queue is full. Records are processed
/// concurrently, so persistence order is not arrival order.
pub struct IngestPipeline {
    sender: Mutex<Option<mpsc::Sender<CreatedRecord>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
}

impl IngestPipeline {
    pub fn start(config: PipelineConfig, processor: Arc<dyn ProcessRecord>) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let pending = Arc::new(AtomicUsize::new(0));

        let workers = (0..config.worker_pool_size.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    receiver.clone(),
                    processor.clone(),
                    pending.clone(),
                ))
            })
            .collect();
        tracing::info!(
            workers = config.worker_pool_size,
            queue_capacity = config.queue_capacity,
            "ingest pipeline started"
        );

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            pending,
        }
    }

    pub async fn enqueue(&self, created: CreatedRecord) -> Result<(), PipelineError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(PipelineError::Closed)?;

        self.pending.fetch_add(1, Ordering::AcqRel);
        if sender.send(created).await.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(PipelineError::Closed);
        }
        Ok(())
    }

    /// Items enqueued and not yet finished, including those in flight.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes intake and stops the workers under `policy`.
    pub async fn shutdown(&self, policy: ShutdownPolicy) -> ShutdownReport {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        tracing::info!(
            policy = policy.as_str(),
            pending = self.pending(),
            "shutting down ingest pipeline"
        );

        if policy == ShutdownPolicy::Abort {
            for worker in &workers {
                worker.abort();
            }
        }
        for worker in workers {
            match worker.await {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {}
                Err(err) => tracing::error!(error = %err, "worker task failed"),
            }
        }

        let abandoned = self.pending();
        metrics::gauge!(telemetry::QUEUE_PENDING).set(abandoned as f64);
        if abandoned > 0 {
            tracing::warn!(abandoned, "queued records were not processed");
        }
        ShutdownReport { policy, abandoned }
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<CreatedRecord>>>,
    processor: Arc<dyn ProcessRecord>,
    pending: Arc<AtomicUsize>,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(created) = next else {
            break;
        };
        let uri = created.uri.to_string();
        let cid = created.cid.clone();

        match AssertUnwindSafe(processor.process(created)).catch_unwind().await {
            Ok(Ok(outcome)) => {
                tracing::trace!(worker, uri, cid, outcome = outcome.as_str(), "record processed");
            }
            Ok(Err(err)) => {
                metrics::counter!(telemetry::WORKER_ERRORS_TOTAL, "reason" => "persist")
                    .increment(1);
                tracing::error!(worker, uri, cid, error = %err, "record processing failed");
            }
            Err(panic) => {
                metrics::counter!(telemetry::WORKER_ERRORS_TOTAL, "reason" => "panic")
                    .increment(1);
                tracing::error!(
                    worker,
                    uri,
                    cid,
                    panic = panic_message(panic.as_ref()),
                    "record processing panicked"
                );
            }
        }

        let left = pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::gauge!(telemetry::QUEUE_PENDING).set(left as f64);
    }
    tracing::debug!(worker, "worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
