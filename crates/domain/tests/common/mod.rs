#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ipld_core::ipld::Ipld;
use serde_json::Value;
use skygraph_domain::collections::InterestSet;
use skygraph_domain::commit::{BlockSet, Commit, RepoOp};
use skygraph_domain::cursor::CursorCheckpoint;
use skygraph_domain::graph::InMemoryGraphStore;
use skygraph_domain::ingestor::Ingestor;
use skygraph_domain::materialize::Materializer;
use skygraph_domain::persist::{PersistConfig, PersistService};
use skygraph_domain::pipeline::{IngestPipeline, PipelineConfig, RecordProcessor};
use skygraph_domain::ports::BoxFuture;
use skygraph_domain::ports::blobs::{BlobFetchError, BlobFetcher};
use skygraph_domain::ports::graph::{EdgeLabel, GraphStore, GraphStoreError, RecordRef};
use skygraph_domain::ports::profiles::{ProfileFetchError, ProfileFetcher, UserProfile};
use skygraph_domain::ports::source::EventSource;
use skygraph_domain::throughput::ThroughputMeter;

pub const AUTHOR: &str = "did:plc:author";

pub fn map(entries: Vec<(&str, Ipld)>) -> Ipld {
    Ipld::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect::<BTreeMap<_, _>>(),
    )
}

pub fn string(value: &str) -> Ipld {
    Ipld::String(value.to_string())
}

pub fn strong_ref(cid: &str) -> Ipld {
    map(vec![
        ("uri", string(&format!("at://did:plc:other/app.bsky.feed.post/{cid}"))),
        ("cid", string(cid)),
    ])
}

pub fn post_ipld(text: &str, extra: Vec<(&str, Ipld)>) -> Ipld {
    let mut entries = vec![
        ("$type", string("app.bsky.feed.post")),
        ("text", string(text)),
        ("createdAt", string("2024-11-29T03:01:11Z")),
    ];
    entries.extend(extra);
    map(entries)
}

pub fn reply(parent: &str, root: &str) -> (&'static str, Ipld) {
    (
        "reply",
        map(vec![("parent", strong_ref(parent)), ("root", strong_ref(root))]),
    )
}

pub fn quote_with_image(quoted: &str, image_cid: &str) -> (&'static str, Ipld) {
    let image = map(vec![
        (
            "image",
            map(vec![
                ("$type", string("blob")),
                ("ref", map(vec![("$link", string(image_cid))])),
                ("mimeType", string("image/jpeg")),
                ("size", Ipld::Integer(1024)),
            ]),
        ),
        ("alt", string("a cat")),
    ]);
    (
        "embed",
        map(vec![
            ("$type", string("app.bsky.embed.recordWithMedia")),
            (
                "record",
                map(vec![
                    ("$type", string("app.bsky.embed.record")),
                    ("record", strong_ref(quoted)),
                ]),
            ),
            (
                "media",
                map(vec![
                    ("$type", string("app.bsky.embed.images")),
                    ("images", Ipld::List(vec![image])),
                ]),
            ),
        ]),
    )
}

pub fn encode(ipld: &Ipld) -> Vec<u8> {
    serde_ipld_dagcbor::to_vec(ipld).unwrap()
}

/// A commit creating one record per `(path, cid, block)` entry.
pub fn commit(seq: u64, creates: Vec<(&str, &str, Ipld)>) -> Commit {
    let mut blocks = BlockSet::new();
    let mut ops = Vec::new();
    for (path, cid, block) in creates {
        blocks.insert(cid, encode(&block));
        ops.push(RepoOp::create(path, cid));
    }
    Commit {
        seq,
        repo: AUTHOR.to_string(),
        blocks,
        ops,
    }
}

pub fn post_commit(seq: u64, cid: &str) -> Commit {
    let path = format!("app.bsky.feed.post/rkey{seq}");
    commit(seq, vec![(path.as_str(), cid, post_ipld("hello", vec![]))])
}

pub fn persist_service(store: Arc<dyn GraphStore>) -> PersistService {
    PersistService::new(store, PersistConfig::default())
}

pub fn pipeline(store: Arc<dyn GraphStore>, config: PipelineConfig) -> Arc<IngestPipeline> {
    let processor = RecordProcessor::new(
        Materializer::new(),
        persist_service(store),
        ThroughputMeter::new(),
    );
    Arc::new(IngestPipeline::start(config, Arc::new(processor)))
}

pub fn ingestor(
    source: Arc<dyn EventSource>,
    interest: InterestSet,
    pipeline: Arc<IngestPipeline>,
) -> Ingestor {
    Ingestor::new(
        source,
        interest,
        Arc::new(CursorCheckpoint::default()),
        ThroughputMeter::new(),
        pipeline,
    )
}

/// Fails the first `failures` creates with a contention error.
pub struct ContendedStore {
    pub inner: InMemoryGraphStore,
    failures: usize,
    pub create_attempts: Arc<AtomicUsize>,
}

impl ContendedStore {
    pub fn new(failures: usize) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            failures,
            create_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl GraphStore for ContendedStore {
    fn create(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let attempt = self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Box::pin(async {
                Err(GraphStoreError::Contention(
                    "Resource busy: transaction conflict".to_string(),
                ))
            });
        }
        self.inner.create(record, content)
    }

    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.inner.merge(record, content)
    }

    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>> {
        self.inner.get(record)
    }

    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.inner.relate(source, edge, target)
    }
}

/// Every create waits forever, as a store that stopped answering would.
#[derive(Default)]
pub struct StalledStore {
    pub inner: InMemoryGraphStore,
}

impl GraphStore for StalledStore {
    fn create(
        &self,
        _record: &RecordRef,
        _content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        Box::pin(std::future::pending::<Result<(), GraphStoreError>>())
    }

    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.inner.merge(record, content)
    }

    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>> {
        self.inner.get(record)
    }

    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.inner.relate(source, edge, target)
    }
}

/// Rejects creates or relates with a non-retryable operation error.
#[derive(Default)]
pub struct FailingStore {
    pub inner: InMemoryGraphStore,
    pub fail_create: bool,
    pub fail_relate: bool,
    pub create_attempts: AtomicUsize,
}

impl GraphStore for FailingStore {
    fn create(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_create {
            return Box::pin(async {
                Err(GraphStoreError::Operation("Parse error: unexpected token".to_string()))
            });
        }
        self.inner.create(record, content)
    }

    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        self.inner.merge(record, content)
    }

    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>> {
        self.inner.get(record)
    }

    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        if self.fail_relate {
            return Box::pin(async {
                Err(GraphStoreError::Operation("Specify some data to relate".to_string()))
            });
        }
        self.inner.relate(source, edge, target)
    }
}

/// Serves `bytes` for every blob, or a 404 when `None`.
pub struct StaticBlobFetcher {
    pub bytes: Option<Vec<u8>>,
    pub calls: AtomicUsize,
}

impl StaticBlobFetcher {
    pub fn serving(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            bytes: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl BlobFetcher for StaticBlobFetcher {
    fn fetch_blob(
        &self,
        _owner: &str,
        _cid: &str,
    ) -> BoxFuture<'_, Result<Vec<u8>, BlobFetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = self.bytes.clone();
        Box::pin(async move { bytes.ok_or(BlobFetchError::Status(404)) })
    }
}

/// Answers every lookup with `{did}.test` as the handle.
#[derive(Default)]
pub struct HandleProfileFetcher {
    pub calls: AtomicUsize,
}

impl ProfileFetcher for HandleProfileFetcher {
    fn fetch_profile(&self, did: &str) -> BoxFuture<'_, Result<UserProfile, ProfileFetchError>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let profile = UserProfile {
            did: did.to_string(),
            handle: format!("{did}.test"),
            followers: Some(7),
            ..UserProfile::default()
        };
        Box::pin(async move { Ok(profile) })
    }
}
