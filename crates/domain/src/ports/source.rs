use thiserror::Error;
use tokio::sync::mpsc;

use super::BoxFuture;
use crate::commit::Commit;

#[derive(Debug, Error)]
pub enum EventSourceError {
    #[error("event source connect failed: {0}")]
    Connect(String),
    #[error("event source closed")]
    Closed,
}

/// A resumable stream of commit notifications.
///
/// The receiver returned by `subscribe` yields commits in delivery order and
/// ends once `stop` has been called (or the source gives up).
pub trait EventSource: Send + Sync {
    fn subscribe(
        &self,
        start_cursor: Option<u64>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<Commit>, EventSourceError>>;
    fn update_resume_position(&self, seq: u64);
    fn stop(&self);
}
