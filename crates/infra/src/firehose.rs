use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use ipld_core::ipld::Ipld;
use skygraph_domain::commit::{BlockSet, Commit, OpAction, RepoOp};
use skygraph_domain::ports::BoxFuture;
use skygraph_domain::ports::source::{EventSource, EventSourceError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

const SUBSCRIBE_REPOS: &str = "/xrpc/com.atproto.sync.subscribeRepos";
const COMMIT_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct FirehoseConfig {
    pub relay_host: String,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame header is not dag-cbor: {0}")]
    Header(String),
    #[error("frame has a header but no body")]
    MissingBody,
    #[error("unknown frame op {0}")]
    UnknownOp(i128),
    #[error("malformed commit body: {0}")]
    Commit(String),
    #[error("unreadable block archive: {0}")]
    Car(String),
}

/// One decoded event-stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `op: 1`; `kind` is the message type such as `#commit`.
    Message { kind: Option<String>, body: Vec<u8> },
    /// `op: -1`
    Error {
        error: Option<String>,
        message: Option<String>,
    },
}

/// Splits a binary frame into its header and body.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let mut cursor = Cursor::new(bytes);
    let header = match serde_ipld_dagcbor::from_reader::<Ipld, _>(&mut cursor) {
        Err(serde_ipld_dagcbor::DecodeError::TrailingData) => {
            let (header, _) = bytes.split_at(cursor.position() as usize);
            serde_ipld_dagcbor::from_slice::<Ipld>(header)
                .map_err(|err| FrameError::Header(err.to_string()))?
        }
        Ok(_) => return Err(FrameError::MissingBody),
        Err(err) => return Err(FrameError::Header(err.to_string())),
    };
    let body = &bytes[cursor.position() as usize..];

    let Ipld::Map(header) = header else {
        return Err(FrameError::Header("header is not a map".to_string()));
    };
    match header.get("op") {
        Some(Ipld::Integer(1)) => Ok(Frame::Message {
            kind: match header.get("t") {
                Some(Ipld::String(kind)) => Some(kind.clone()),
                _ => None,
            },
            body: body.to_vec(),
        }),
        Some(Ipld::Integer(-1)) => {
            let fields = match serde_ipld_dagcbor::from_slice::<Ipld>(body) {
                Ok(Ipld::Map(fields)) => fields,
                _ => Default::default(),
            };
            let text = |key: &str| match fields.get(key) {
                Some(Ipld::String(value)) => Some(value.clone()),
                _ => None,
            };
            Ok(Frame::Error {
                error: text("error"),
                message: text("message"),
            })
        }
        Some(Ipld::Integer(op)) => Err(FrameError::UnknownOp(*op)),
        _ => Err(FrameError::Header("header has no op".to_string())),
    }
}

/// Decodes a `#commit` body, including its block archive.
pub async fn decode_commit_body(body: &[u8]) -> Result<Commit, FrameError> {
    let (mut commit, car) = commit_envelope(body)?;
    commit.blocks = read_blocks(&car).await?;
    Ok(commit)
}

fn commit_envelope(body: &[u8]) -> Result<(Commit, Vec<u8>), FrameError> {
    let ipld = serde_ipld_dagcbor::from_slice::<Ipld>(body)
        .map_err(|err| FrameError::Commit(err.to_string()))?;
    let Ipld::Map(mut fields) = ipld else {
        return Err(FrameError::Commit("body is not a map".to_string()));
    };

    let seq = match fields.get("seq") {
        Some(Ipld::Integer(seq)) => u64::try_from(*seq)
            .map_err(|_| FrameError::Commit(format!("negative seq {seq}")))?,
        _ => return Err(FrameError::Commit("missing seq".to_string())),
    };
    let repo = match fields.remove("repo") {
        Some(Ipld::String(repo)) => repo,
        _ => return Err(FrameError::Commit("missing repo".to_string())),
    };
    let ops = match fields.remove("ops") {
        Some(Ipld::List(ops)) => ops.into_iter().filter_map(repo_op).collect(),
        _ => Vec::new(),
    };
    let car = match fields.remove("blocks") {
        Some(Ipld::Bytes(car)) => car,
        _ => Vec::new(),
    };

    Ok((
        Commit {
            seq,
            repo,
            blocks: BlockSet::new(),
            ops,
        },
        car,
    ))
}

fn repo_op(op: Ipld) -> Option<RepoOp> {
    let Ipld::Map(mut op) = op else {
        return None;
    };
    let action = match op.remove("action") {
        Some(Ipld::String(action)) => OpAction::from(action.as_str()),
        _ => return None,
    };
    let path = match op.remove("path") {
        Some(Ipld::String(path)) => path,
        _ => return None,
    };
    let cid = match op.remove("cid") {
        Some(Ipld::Link(cid)) => Some(cid.to_string()),
        Some(Ipld::String(cid)) => Some(cid),
        _ => None,
    };
    Some(RepoOp { action, path, cid })
}

async fn read_blocks(mut car: &[u8]) -> Result<BlockSet, FrameError> {
    if car.is_empty() {
        return Ok(BlockSet::new());
    }
    let (items, _header) = rs_car::car_read_all(&mut car, true)
        .await
        .map_err(|err| FrameError::Car(err.to_string()))?;
    Ok(items
        .into_iter()
        .map(|(cid, bytes)| (cid.to_string(), bytes))
        .collect())
}

/// Builds the subscription URL; a bare host defaults to `wss`.
pub fn subscribe_url(relay_host: &str, cursor: Option<u64>) -> Result<Url, url::ParseError> {
    let base = if relay_host.contains("://") {
        relay_host.trim_end_matches('/').to_string()
    } else {
        format!("wss://{}", relay_host.trim_end_matches('/'))
    };
    let mut url = Url::parse(&format!("{base}{SUBSCRIBE_REPOS}"))?;
    if let Some(cursor) = cursor {
        url.query_pairs_mut()
            .append_pair("cursor", &cursor.to_string());
    }
    Ok(url)
}

struct Shared {
    config: FirehoseConfig,
    /// 0 until a resume position is known.
    cursor: AtomicU64,
}

impl Shared {
    fn cursor(&self) -> Option<u64> {
        match self.cursor.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    async fn connect(&self) -> Result<WsStream, EventSourceError> {
        let url = subscribe_url(&self.config.relay_host, self.cursor())
            .map_err(|err| EventSourceError::Connect(err.to_string()))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| EventSourceError::Connect(format!("{url}: {err}")))?;
        tracing::info!(%url, "subscribed to firehose");
        Ok(stream)
    }
}

/// `com.atproto.sync.subscribeRepos` over a websocket, reconnecting on drop.
pub struct FirehoseSource {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl FirehoseSource {
    pub fn new(config: FirehoseConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                config,
                cursor: AtomicU64::new(0),
            }),
            shutdown,
        }
    }
}

impl EventSource for FirehoseSource {
    fn subscribe(
        &self,
        start_cursor: Option<u64>,
    ) -> BoxFuture<'_, Result<mpsc::Receiver<Commit>, EventSourceError>> {
        if let Some(start) = start_cursor {
            self.shared.cursor.store(start, Ordering::Release);
        }
        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        Box::pin(async move {
            if *shutdown.borrow() {
                return Err(EventSourceError::Closed);
            }
            let stream = shared.connect().await?;
            let (sender, receiver) = mpsc::channel(COMMIT_CHANNEL_CAPACITY);
            tokio::spawn(pump(shared, stream, sender, shutdown));
            Ok(receiver)
        })
    }

    fn update_resume_position(&self, seq: u64) {
        self.shared.cursor.fetch_max(seq, Ordering::AcqRel);
    }

    fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

async fn pump(
    shared: Arc<Shared>,
    mut stream: WsStream,
    sender: mpsc::Sender<Commit>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let disconnected = tokio::select! {
            _ = stopped(&mut shutdown) => {
                let _ = stream.close(None).await;
                tracing::info!(cursor = ?shared.cursor(), "firehose stopped");
                return;
            }
            reason = forward_frames(&mut stream, &sender) => reason,
        };
        match disconnected {
            Disconnect::ReceiverGone => return,
            Disconnect::Stream(reason) => {
                tracing::warn!(reason, cursor = ?shared.cursor(), "firehose disconnected");
            }
        }

        stream = loop {
            tokio::select! {
                _ = stopped(&mut shutdown) => return,
                _ = tokio::time::sleep(shared.config.reconnect_delay) => {}
            }
            match shared.connect().await {
                Ok(stream) => break stream,
                Err(err) => tracing::warn!(error = %err, "firehose reconnect failed"),
            }
        };
    }
}

/// Resolves once `stop` is called or the source is dropped.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopped| *stopped).await;
}

enum Disconnect {
    ReceiverGone,
    Stream(String),
}

async fn forward_frames(stream: &mut WsStream, sender: &mpsc::Sender<Commit>) -> Disconnect {
    while let Some(message) = stream.next().await {
        let bytes = match message {
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                return Disconnect::Stream(format!("closed by relay: {frame:?}"));
            }
            Ok(_) => continue,
            Err(err) => return Disconnect::Stream(err.to_string()),
        };

        let body = match decode_frame(&bytes) {
            Ok(Frame::Message { kind, body }) if kind.as_deref() == Some("#commit") => body,
            Ok(Frame::Message { .. }) => continue,
            Ok(Frame::Error { error, message }) => {
                tracing::warn!(?error, ?message, "firehose error frame");
                continue;
            }
            Err(err) => {
                tracing::debug!(error = %err, "skipping undecodable frame");
                continue;
            }
        };
        match decode_commit_body(&body).await {
            Ok(commit) => {
                if sender.send(commit).await.is_err() {
                    return Disconnect::ReceiverGone;
                }
            }
            Err(err) => tracing::debug!(error = %err, "skipping malformed commit"),
        }
    }
    Disconnect::Stream("stream ended".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map(entries: Vec<(&str, Ipld)>) -> Ipld {
        Ipld::Map(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn frame(header: Ipld, body: Ipld) -> Vec<u8> {
        let mut bytes = serde_ipld_dagcbor::to_vec(&header).unwrap();
        bytes.extend(serde_ipld_dagcbor::to_vec(&body).unwrap());
        bytes
    }

    #[test]
    fn message_frames_carry_type_and_body() {
        let body = map(vec![("seq", Ipld::Integer(42))]);
        let bytes = frame(
            map(vec![
                ("op", Ipld::Integer(1)),
                ("t", Ipld::String("#commit".into())),
            ]),
            body.clone(),
        );

        let Frame::Message { kind, body: raw } = decode_frame(&bytes).unwrap() else {
            panic!("expected a message frame");
        };
        assert_eq!(kind.as_deref(), Some("#commit"));
        assert_eq!(serde_ipld_dagcbor::from_slice::<Ipld>(&raw).unwrap(), body);
    }

    #[test]
    fn error_frames_expose_their_reason() {
        let bytes = frame(
            map(vec![("op", Ipld::Integer(-1))]),
            map(vec![
                ("error", Ipld::String("FutureCursor".into())),
                ("message", Ipld::String("cursor in the future".into())),
            ]),
        );
        assert_eq!(
            decode_frame(&bytes).unwrap(),
            Frame::Error {
                error: Some("FutureCursor".to_string()),
                message: Some("cursor in the future".to_string()),
            }
        );
    }

    #[test]
    fn header_without_body_is_rejected() {
        let header = serde_ipld_dagcbor::to_vec(&map(vec![("op", Ipld::Integer(1))])).unwrap();
        assert_eq!(decode_frame(&header), Err(FrameError::MissingBody));
        let bytes = frame(map(vec![("op", Ipld::Integer(7))]), Ipld::Null);
        assert_eq!(decode_frame(&bytes), Err(FrameError::UnknownOp(7)));
    }

    #[tokio::test]
    async fn commit_body_yields_ops_in_order() {
        let op = |action: &str, path: &str, cid: Ipld| {
            map(vec![
                ("action", Ipld::String(action.into())),
                ("path", Ipld::String(path.into())),
                ("cid", cid),
            ])
        };
        let body = map(vec![
            ("seq", Ipld::Integer(9_000)),
            ("repo", Ipld::String("did:plc:author".into())),
            (
                "ops",
                Ipld::List(vec![
                    op("create", "app.bsky.feed.post/a", Ipld::String("cid-a".into())),
                    op("delete", "app.bsky.feed.post/b", Ipld::Null),
                ]),
            ),
            ("blocks", Ipld::Bytes(Vec::new())),
        ]);

        let commit = decode_commit_body(&serde_ipld_dagcbor::to_vec(&body).unwrap())
            .await
            .unwrap();
        assert_eq!(commit.seq, 9_000);
        assert_eq!(commit.repo, "did:plc:author");
        assert_eq!(
            commit.ops,
            vec![
                RepoOp::create("app.bsky.feed.post/a", "cid-a"),
                RepoOp::delete("app.bsky.feed.post/b"),
            ]
        );
        assert!(commit.blocks.is_empty());
    }

    #[test]
    fn subscribe_url_appends_cursor() {
        assert_eq!(
            subscribe_url("bsky.network", Some(120)).unwrap().as_str(),
            "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos?cursor=120"
        );
        assert_eq!(
            subscribe_url("ws://127.0.0.1:2470/", None).unwrap().as_str(),
            "ws://127.0.0.1:2470/xrpc/com.atproto.sync.subscribeRepos"
        );
    }
}
