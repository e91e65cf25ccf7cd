use std::fmt;

use serde_json::Value;
use thiserror::Error;

use super::BoxFuture;

pub const POSTS_TABLE: &str = "bsky_feed_post";
pub const USERS_TABLE: &str = "bsky_user";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphStoreError {
    #[error("record already exists: {0}")]
    Duplicate(String),
    #[error("transient contention: {0}")]
    Contention(String),
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph store operation failed: {0}")]
    Operation(String),
}

impl GraphStoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

/// Identity of a node in the graph, rendered as `table:⟨key⟩`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordRef {
    pub table: &'static str,
    pub key: String,
}

impl RecordRef {
    pub fn post(cid: impl Into<String>) -> Self {
        Self {
            table: POSTS_TABLE,
            key: cid.into(),
        }
    }

    pub fn user(did: impl Into<String>) -> Self {
        Self {
            table: USERS_TABLE,
            key: did.into(),
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:⟨{}⟩", self.table, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeLabel {
    Posted,
    Quoted,
    Reply,
    ReplyRoot,
    Liked,
    Reposted,
    Follows,
}

impl EdgeLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted => "posted",
            Self::Quoted => "quoted",
            Self::Reply => "reply",
            Self::ReplyRoot => "reply_root",
            Self::Liked => "liked",
            Self::Reposted => "reposted",
            Self::Follows => "follows",
        }
    }
}

impl fmt::Display for EdgeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal CRUD + relate surface of the persistent graph.
///
/// `create` must report an existing identity as [`GraphStoreError::Duplicate`].
/// `relate` must be safe to repeat for the same `(source, edge, target)`; it may
/// either succeed silently or report a duplicate. Targets are not required to
/// exist yet. `merge` upserts: it creates the record or overlays `content`
/// onto the stored fields.
pub trait GraphStore: Send + Sync {
    fn create(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>>;
    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>>;
    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>>;
    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>>;
}
