use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use crate::materialize::{FollowEdge, GraphWrite, NormalizedPost, SubjectEdge};
use crate::ports::BoxFuture;
use crate::ports::graph::{EdgeLabel, GraphStore, GraphStoreError, RecordRef};
use crate::profiles::ProfileEnricher;
use crate::telemetry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteStrategy {
    /// Attempt the create and classify the store error.
    #[default]
    WriteThenClassify,
    /// Look the identity up first and skip the create when present.
    CheckThenWrite,
}

impl WriteStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WriteThenClassify => "write_then_classify",
            Self::CheckThenWrite => "check_then_write",
        }
    }
}

impl FromStr for WriteStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "write_then_classify" => Ok(Self::WriteThenClassify),
            "check_then_write" => Ok(Self::CheckThenWrite),
            other => Err(format!("unknown write strategy: {other}")),
        }
    }
}

/// Fixed-delay retry for contention errors. After `max_retries` retries the
/// contention error is returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(200),
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistConfig {
    pub strategy: WriteStrategy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Created,
    Duplicate,
    Failed,
}

impl PersistOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }

    fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs `op` until it stops reporting contention or the retry budget is spent.
pub async fn retry_on_contention<'a, T, F>(
    policy: &RetryPolicy,
    subject: &str,
    operation: &'static str,
    mut op: F,
) -> Result<T, GraphStoreError>
where
    F: FnMut() -> BoxFuture<'a, Result<T, GraphStoreError>>,
{
    let mut retries = 0;
    loop {
        match op().await {
            Err(err) if err.is_contention() && retries < policy.max_retries => {
                retries += 1;
                metrics::counter!(telemetry::CONTENTION_RETRIES_TOTAL).increment(1);
                tracing::warn!(
                    subject,
                    operation,
                    attempt = retries,
                    error = %err,
                    "graph store contention, retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            result => return result,
        }
    }
}

/// Idempotent writer for materialized records and their edges.
#[derive(Clone)]
pub struct PersistService {
    store: Arc<dyn GraphStore>,
    config: PersistConfig,
    profiles: Option<ProfileEnricher>,
}

impl PersistService {
    pub fn new(store: Arc<dyn GraphStore>, config: PersistConfig) -> Self {
        Self {
            store,
            config,
            profiles: None,
        }
    }

    /// Upserts fetched author profiles onto user nodes.
    pub fn with_profiles(mut self, profiles: ProfileEnricher) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub async fn persist(&self, write: &GraphWrite) -> PersistOutcome {
        let outcome = match write {
            GraphWrite::Post(post) => self.persist_post(post).await,
            GraphWrite::Like(like) => self.persist_subject(like, EdgeLabel::Liked).await,
            GraphWrite::Repost(repost) => {
                self.persist_subject(repost, EdgeLabel::Reposted).await
            }
            GraphWrite::Follow(follow) => self.persist_follow(follow).await,
        };
        metrics::counter!(
            telemetry::RECORDS_PERSISTED_TOTAL,
            "kind" => write.kind(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        outcome
    }

    /// Writes the post node, then its author and edges. A duplicate post still
    /// re-issues every edge so a re-delivered commit repairs missing ones.
    pub async fn persist_post(&self, post: &NormalizedPost) -> PersistOutcome {
        let record = RecordRef::post(&post.cid);
        let content = match serde_json::to_value(post) {
            Ok(content) => content,
            Err(err) => {
                tracing::error!(record = %record, error = %err, "post did not serialize");
                return PersistOutcome::Failed;
            }
        };

        let outcome = self.ensure_node(&record, content).await;
        match outcome {
            PersistOutcome::Failed => return outcome,
            PersistOutcome::Duplicate => {
                tracing::debug!(record = %record, uri = post.uri, "post already stored");
            }
            PersistOutcome::Created => {}
        }

        let author = RecordRef::user(&post.author);
        self.ensure_user(&author).await;
        self.relate(&author, EdgeLabel::Posted, &record).await;
        for quote in &post.quotes {
            self.relate(&record, EdgeLabel::Quoted, &RecordRef::post(&quote.cid))
                .await;
        }
        if let Some(reply) = &post.reply {
            self.relate(&record, EdgeLabel::Reply, &RecordRef::post(&reply.parent))
                .await;
            self.relate(&record, EdgeLabel::ReplyRoot, &RecordRef::post(&reply.root))
                .await;
        }

        outcome
    }

    async fn persist_subject(&self, write: &SubjectEdge, edge: EdgeLabel) -> PersistOutcome {
        let author = RecordRef::user(&write.author);
        let outcome = self.ensure_user(&author).await;
        if !self
            .relate(&author, edge, &RecordRef::post(&write.subject_cid))
            .await
        {
            return PersistOutcome::Failed;
        }
        outcome
    }

    async fn persist_follow(&self, follow: &FollowEdge) -> PersistOutcome {
        let author = RecordRef::user(&follow.author);
        let subject = RecordRef::user(&follow.subject);
        let outcome = self.ensure_user(&author).await;
        self.ensure_user(&subject).await;
        if !self.relate(&author, EdgeLabel::Follows, &subject).await {
            return PersistOutcome::Failed;
        }
        outcome
    }

    async fn ensure_user(&self, user: &RecordRef) -> PersistOutcome {
        let outcome = match self.fresh_profile(user).await {
            Some(profile) => self.merge_node(user, profile).await,
            None => {
                self.ensure_node(user, json!({ "did": user.key.as_str() }))
                    .await
            }
        };
        if outcome.is_failed() {
            tracing::warn!(record = %user, "user write failed, continuing with edges");
        }
        outcome
    }

    async fn fresh_profile(&self, user: &RecordRef) -> Option<Value> {
        let profile = self.profiles.as_ref()?.refresh(&user.key).await?;
        match serde_json::to_value(profile) {
            Ok(content) => Some(content),
            Err(err) => {
                tracing::warn!(record = %user, error = %err, "profile did not serialize");
                None
            }
        }
    }

    async fn merge_node(&self, record: &RecordRef, content: Value) -> PersistOutcome {
        let subject = record.to_string();
        let merged = retry_on_contention(&self.config.retry, &subject, "merge", || {
            self.store.merge(record, content.clone())
        })
        .await;
        match merged {
            Ok(()) => PersistOutcome::Created,
            Err(err) => {
                tracing::error!(
                    record = %record,
                    operation = "merge",
                    error = %err,
                    "graph store write failed"
                );
                PersistOutcome::Failed
            }
        }
    }

    async fn ensure_node(&self, record: &RecordRef, content: Value) -> PersistOutcome {
        let subject = record.to_string();
        let policy = self.config.retry;

        if self.config.strategy == WriteStrategy::CheckThenWrite {
            match retry_on_contention(&policy, &subject, "get", || self.store.get(record)).await {
                Ok(Some(_)) => return PersistOutcome::Duplicate,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(
                        record = %record,
                        operation = "get",
                        error = %err,
                        "graph store lookup failed"
                    );
                    return PersistOutcome::Failed;
                }
            }
        }

        let created = retry_on_contention(&policy, &subject, "create", || {
            self.store.create(record, content.clone())
        })
        .await;
        match created {
            Ok(()) => PersistOutcome::Created,
            Err(err) if err.is_duplicate() => PersistOutcome::Duplicate,
            Err(err) => {
                tracing::error!(
                    record = %record,
                    operation = "create",
                    error = %err,
                    "graph store write failed"
                );
                PersistOutcome::Failed
            }
        }
    }

    /// Returns false when the edge could not be written.
    async fn relate(&self, source: &RecordRef, edge: EdgeLabel, target: &RecordRef) -> bool {
        let subject = source.to_string();
        let result = retry_on_contention(&self.config.retry, &subject, "relate", || {
            self.store.relate(source, edge, target)
        })
        .await;
        match result {
            Ok(()) => true,
            Err(err) if err.is_duplicate() => true,
            Err(err) => {
                metrics::counter!(telemetry::EDGES_FAILED_TOTAL, "edge" => edge.as_str())
                    .increment(1);
                tracing::warn!(
                    source = %source,
                    edge = %edge,
                    target = %target,
                    error = %err,
                    "edge write failed"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_strategy_parses_config_values() {
        assert_eq!(
            "write_then_classify".parse::<WriteStrategy>(),
            Ok(WriteStrategy::WriteThenClassify)
        );
        assert_eq!(
            " Check_Then_Write ".parse::<WriteStrategy>(),
            Ok(WriteStrategy::CheckThenWrite)
        );
        assert!("upsert".parse::<WriteStrategy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn contention_budget_is_capped() {
        let policy = RetryPolicy {
            backoff: Duration::from_millis(200),
            max_retries: 3,
        };
        let mut calls = 0;
        let start = tokio::time::Instant::now();
        let result: Result<(), _> = retry_on_contention(&policy, "t:⟨k⟩", "create", || {
            calls += 1;
            Box::pin(async { Err(GraphStoreError::Contention("resource busy".into())) })
        })
        .await;

        assert!(result.is_err_and(|err| err.is_contention()));
        assert_eq!(calls, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> =
            retry_on_contention(&RetryPolicy::default(), "t:⟨k⟩", "create", || {
                calls += 1;
                Box::pin(async { Err(GraphStoreError::Operation("parse error".into())) })
            })
            .await;

        assert_eq!(result, Err(GraphStoreError::Operation("parse error".into())));
        assert_eq!(calls, 1);
    }
}
