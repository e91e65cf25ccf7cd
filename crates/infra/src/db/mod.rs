use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;
use skygraph_domain::ports::BoxFuture;
use skygraph_domain::ports::graph::{EdgeLabel, GraphStore, GraphStoreError, RecordRef};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws, Wss};
use surrealdb::opt::auth::{Namespace, Root};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

const SCHEMA: &str = include_str!("schema.surql");

const DUPLICATE_MARKERS: [&str; 4] = [
    "already exists",
    "already contains",
    "unique",
    "duplicate",
];
const CONTENTION_MARKERS: [&str; 5] = [
    "resource busy",
    "transaction conflict",
    "write conflict",
    "can be retried",
    "read or write conflict",
];
const UNAVAILABLE_MARKERS: [&str; 5] = [
    "connection",
    "websocket",
    "not connected",
    "timed out",
    "broken pipe",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DbAuth {
    #[default]
    Root,
    Namespace,
    None,
}

impl FromStr for DbAuth {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "root" => Ok(Self::Root),
            "namespace" | "ns" => Ok(Self::Namespace),
            "none" => Ok(Self::None),
            other => Err(format!("unknown surreal auth mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub auth: DbAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Endpoint {
    secure: bool,
    address: String,
}

/// SurrealDB-backed graph store shared by every worker.
///
/// The websocket client multiplexes concurrent queries, so one connection
/// serves the whole pool.
#[derive(Clone)]
pub struct SurrealGraphStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealGraphStore {
    pub async fn connect(config: &DbConfig) -> anyhow::Result<Self> {
        let endpoint = parse_endpoint(&config.endpoint)?;
        check_reachable(&endpoint).await?;

        let db = Surreal::<Client>::init();
        let connected = if endpoint.secure {
            db.connect::<Wss>(endpoint.address.as_str()).await
        } else {
            db.connect::<Ws>(endpoint.address.as_str()).await
        };
        connected.with_context(|| format!("connecting to surreal at {}", config.endpoint))?;

        match config.auth {
            DbAuth::Root => {
                db.signin(Root {
                    username: config.username.clone(),
                    password: config.password.clone(),
                })
                .await
                .context("surreal root sign-in")?;
            }
            DbAuth::Namespace => {
                db.signin(Namespace {
                    namespace: config.namespace.clone(),
                    username: config.username.clone(),
                    password: config.password.clone(),
                })
                .await
                .context("surreal namespace sign-in")?;
            }
            DbAuth::None => {}
        }
        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .context("selecting surreal namespace and database")?;

        tracing::info!(
            endpoint = config.endpoint,
            namespace = config.namespace,
            database = config.database,
            "connected to surreal"
        );
        Ok(Self {
            client: Arc::new(db),
        })
    }

    /// Defines the node and edge tables if they are missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.client
            .query(SCHEMA)
            .await
            .context("applying graph schema")?
            .check()
            .context("applying graph schema")?;
        tracing::debug!("graph schema ensured");
        Ok(())
    }

    pub fn close(self) {
        let handles = Arc::strong_count(&self.client);
        drop(self);
        tracing::info!(handles, "graph store connection released");
    }

    fn map_surreal_error(err: surrealdb::Error) -> GraphStoreError {
        classify_error(&err.to_string())
    }
}

impl GraphStore for SurrealGraphStore {
    fn create(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let client = self.client.clone();
        let table = record.table.to_string();
        let key = record.key.clone();
        Box::pin(async move {
            client
                .query("CREATE type::record($table, $key) CONTENT $content RETURN NONE")
                .bind(("table", table))
                .bind(("key", key))
                .bind(("content", content))
                .await
                .map_err(Self::map_surreal_error)?
                .check()
                .map_err(Self::map_surreal_error)?;
            Ok(())
        })
    }

    fn merge(
        &self,
        record: &RecordRef,
        content: Value,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let client = self.client.clone();
        let table = record.table.to_string();
        let key = record.key.clone();
        Box::pin(async move {
            client
                .query("UPSERT type::record($table, $key) MERGE $content RETURN NONE")
                .bind(("table", table))
                .bind(("key", key))
                .bind(("content", content))
                .await
                .map_err(Self::map_surreal_error)?
                .check()
                .map_err(Self::map_surreal_error)?;
            Ok(())
        })
    }

    fn get(&self, record: &RecordRef) -> BoxFuture<'_, Result<Option<Value>, GraphStoreError>> {
        let client = self.client.clone();
        let table = record.table.to_string();
        let key = record.key.clone();
        Box::pin(async move {
            let mut response = client
                .query("SELECT * OMIT id FROM type::record($table, $key)")
                .bind(("table", table))
                .bind(("key", key))
                .await
                .map_err(Self::map_surreal_error)?
                .check()
                .map_err(Self::map_surreal_error)?;
            let rows: Vec<Value> = response
                .take(0)
                .map_err(|err| GraphStoreError::Operation(format!("invalid query result: {err}")))?;
            Ok(rows.into_iter().next())
        })
    }

    fn relate(
        &self,
        source: &RecordRef,
        edge: EdgeLabel,
        target: &RecordRef,
    ) -> BoxFuture<'_, Result<(), GraphStoreError>> {
        let client = self.client.clone();
        let source = source.clone();
        let target = target.clone();
        let statement = format!(
            "LET $from = type::record($from_table, $from_key);\n\
             LET $to = type::record($to_table, $to_key);\n\
             RELATE $from->{edge}->$to RETURN NONE;",
            edge = edge.as_str()
        );
        Box::pin(async move {
            client
                .query(statement)
                .bind(("from_table", source.table.to_string()))
                .bind(("from_key", source.key))
                .bind(("to_table", target.table.to_string()))
                .bind(("to_key", target.key))
                .await
                .map_err(Self::map_surreal_error)?
                .check()
                .map_err(Self::map_surreal_error)?;
            Ok(())
        })
    }
}

/// Maps a store error message onto the retry taxonomy.
pub fn classify_error(message: &str) -> GraphStoreError {
    let lowered = message.to_lowercase();
    let message = message.to_string();
    if DUPLICATE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        GraphStoreError::Duplicate(message)
    } else if CONTENTION_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        GraphStoreError::Contention(message)
    } else if UNAVAILABLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        GraphStoreError::Unavailable(message)
    } else {
        GraphStoreError::Operation(message)
    }
}

fn parse_endpoint(endpoint: &str) -> anyhow::Result<Endpoint> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized)
        .with_context(|| format!("invalid surreal endpoint '{endpoint}'"))?;

    let secure = matches!(parsed.scheme(), "wss" | "https");
    let host = parsed
        .host_str()
        .with_context(|| format!("missing surreal host in endpoint '{endpoint}'"))?;
    let port = parsed
        .port()
        .unwrap_or(if secure { 443 } else { 8000 });
    Ok(Endpoint {
        secure,
        address: format!("{host}:{port}"),
    })
}

async fn check_reachable(endpoint: &Endpoint) -> anyhow::Result<()> {
    let connect = timeout(Duration::from_secs(2), TcpStream::connect(&endpoint.address))
        .await
        .with_context(|| format!("surreal endpoint {} connect timed out", endpoint.address))?;
    connect.with_context(|| format!("surreal endpoint {} unreachable", endpoint.address))?;
    Ok(())
}
