use std::sync::atomic::{AtomicU64, Ordering};

use crate::telemetry;

pub const DEFAULT_CHECKPOINT_STRIDE: u64 = 20;

/// Best-effort resume heartbeat.
///
/// Every accepted commit bumps a counter; a sequence number divisible by the
/// stride is published as the new resume position. A crash between two
/// checkpoints re-delivers at most `stride` commits.
#[derive(Debug)]
pub struct CursorCheckpoint {
    stride: u64,
    accepted: AtomicU64,
    published: AtomicU64,
    position: AtomicU64,
}

impl CursorCheckpoint {
    /// `start` is the resume position the subscription was opened with.
    pub fn new(stride: u64, start: Option<u64>) -> Self {
        Self {
            stride: stride.max(1),
            accepted: AtomicU64::new(0),
            published: AtomicU64::new(0),
            position: AtomicU64::new(start.unwrap_or(0)),
        }
    }

    /// Returns the sequence number to publish, if this commit is a checkpoint.
    pub fn observe(&self, seq: u64) -> Option<u64> {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        if seq == 0 || seq % self.stride != 0 {
            return None;
        }
        // never move backwards on out-of-order redelivery
        let previous = self.position.fetch_max(seq, Ordering::AcqRel);
        if previous >= seq {
            return None;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(telemetry::CURSOR_POSITION).set(seq as f64);
        Some(seq)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Last published resume position, or the start position before the first checkpoint.
    pub fn position(&self) -> Option<u64> {
        match self.position.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }
}

impl Default for CursorCheckpoint {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKPOINT_STRIDE, None)
    }
}
