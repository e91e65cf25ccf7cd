use std::sync::Arc;

use crate::collections::InterestSet;
use crate::commit::Commit;
use crate::cursor::CursorCheckpoint;
use crate::decode::decode_commit;
use crate::pipeline::{IngestPipeline, PipelineError, ShutdownPolicy, ShutdownReport};
use crate::ports::source::{EventSource, EventSourceError};
use crate::throughput::{EVENTS_LABEL, ThroughputMeter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub enqueued: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub commits: u64,
    pub enqueued: u64,
    pub deleted: u64,
}

/// Single dispatch path: decodes commits in delivery order and feeds the pipeline.
pub struct Ingestor {
    source: Arc<dyn EventSource>,
    interest: InterestSet,
    checkpoint: Arc<CursorCheckpoint>,
    meter: ThroughputMeter,
    pipeline: Arc<IngestPipeline>,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn EventSource>,
        interest: InterestSet,
        checkpoint: Arc<CursorCheckpoint>,
        meter: ThroughputMeter,
        pipeline: Arc<IngestPipeline>,
    ) -> Self {
        Self {
            source,
            interest,
            checkpoint,
            meter,
            pipeline,
        }
    }

    pub fn checkpoint(&self) -> &CursorCheckpoint {
        &self.checkpoint
    }

    pub async fn handle_commit(&self, commit: &Commit) -> Result<CommitSummary, PipelineError> {
        self.meter.record_event(EVENTS_LABEL);
        if let Some(seq) = self.checkpoint.observe(commit.seq) {
            tracing::debug!(seq, "publishing resume position");
            self.source.update_resume_position(seq);
        }

        let mut summary = CommitSummary::default();
        for (collection, ops) in decode_commit(commit, &self.interest) {
            if !ops.deleted.is_empty() {
                // deletes carry only a path; posts are keyed by content address
                tracing::debug!(
                    seq = commit.seq,
                    collection = collection.nsid(),
                    count = ops.deleted.len(),
                    "ignoring deletes"
                );
                summary.deleted += ops.deleted.len();
            }
            for created in ops.created {
                self.pipeline.enqueue(created).await?;
                summary.enqueued += 1;
            }
        }
        Ok(summary)
    }

    /// Consumes the subscription until the source ends or the pipeline closes.
    pub async fn run(&self, start_cursor: Option<u64>) -> Result<IngestStats, EventSourceError> {
        let mut commits = self.source.subscribe(start_cursor).await?;
        tracing::info!(?start_cursor, "consuming event stream");

        let mut stats = IngestStats::default();
        while let Some(commit) = commits.recv().await {
            stats.commits += 1;
            match self.handle_commit(&commit).await {
                Ok(summary) => {
                    stats.enqueued += summary.enqueued as u64;
                    stats.deleted += summary.deleted as u64;
                }
                Err(err) => {
                    tracing::warn!(
                        seq = commit.seq,
                        error = %err,
                        "pipeline closed, leaving stream"
                    );
                    break;
                }
            }
        }

        tracing::info!(
            commits = stats.commits,
            enqueued = stats.enqueued,
            resume_position = ?self.checkpoint.position(),
            "event stream ended"
        );
        Ok(stats)
    }

    /// Stops the source and closes the pipeline under `policy`.
    ///
    /// Safe to await alongside `run`: once intake is closed a `run` parked on
    /// a full queue returns, and under `Abort` the workers are cancelled
    /// without waiting for it.
    pub async fn shutdown(&self, policy: ShutdownPolicy) -> ShutdownReport {
        self.source.stop();
        self.pipeline.shutdown(policy).await
    }
}
