use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::commit::Commit;
use crate::ports::BoxFuture;
use crate::ports::source::{EventSource, EventSourceError};

/// Replays a fixed list of commits, skipping those at or before the start cursor.
#[derive(Debug)]
pub struct ReplayEventSource {
    commits: Vec<Commit>,
    resume_positions: Mutex<Vec<u64>>,
    stopped: Arc<AtomicBool>,
}

impl ReplayEventSource {
    pub fn new(commits: Vec<Commit>) -> Self {
        Self {
            commits,
            resume_positions: Mutex::new(Vec::new()),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every position published through `update_resume_position`, in order.
    pub fn resume_positions(&self) -> Vec<u64> {
        self.resume_positions
            .lock()
            .expect("replay source lock")
            .clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl EventSource for ReplayEventSource {
    fn subscribe(
        &self,
        start_cursor: Option<u64>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<Commit>, EventSourceError>> {
        let commits: Vec<Commit> = self
            .commits
            .iter()
            .filter(|commit| start_cursor.is_none_or(|start| commit.seq > start))
            .cloned()
            .collect();
        let stopped = self.stopped.clone();
        Box::pin(async move {
            if stopped.load(Ordering::Acquire) {
                return Err(EventSourceError::Closed);
            }
            let (sender, receiver) = mpsc::channel(16);
            tokio::spawn(async move {
                for commit in commits {
                    if stopped.load(Ordering::Acquire) || sender.send(commit).await.is_err() {
                        break;
                    }
                }
            });
            Ok(receiver)
        })
    }

    fn update_resume_position(&self, seq: u64) {
        self.resume_positions
            .lock()
            .expect("replay source lock")
            .push(seq);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit(seq: u64) -> Commit {
        Commit {
            seq,
            repo: "did:plc:a".to_string(),
            ..Commit::default()
        }
    }

    #[tokio::test]
    async fn replays_after_start_cursor() {
        let source = ReplayEventSource::new((1..=5).map(commit).collect());
        let mut receiver = source.subscribe(Some(3)).await.unwrap();

        let mut seen = Vec::new();
        while let Some(commit) = receiver.recv().await {
            seen.push(commit.seq);
        }
        assert_eq!(seen, vec![4, 5]);
    }

    #[tokio::test]
    async fn stopped_source_refuses_subscription() {
        let source = ReplayEventSource::new(vec![commit(1)]);
        source.stop();
        assert!(matches!(
            source.subscribe(None).await,
            Err(EventSourceError::Closed)
        ));
    }
}
