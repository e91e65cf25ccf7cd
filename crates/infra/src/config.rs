use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use skygraph_domain::collections::InterestSet;
use skygraph_domain::persist::{PersistConfig, RetryPolicy, WriteStrategy};
use skygraph_domain::pipeline::{PipelineConfig, ShutdownPolicy};
use skygraph_domain::profiles::ProfileConfig;

use crate::blobs::BlobConfig;
use crate::db::{DbAuth, DbConfig};
use crate::firehose::FirehoseConfig;
use crate::profiles::ProfileEndpoint;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub surreal_auth: String,
    pub relay_host: String,
    pub reconnect_delay_ms: u64,
    pub start_cursor: Option<u64>,
    pub interest_collections: String,
    pub worker_pool_size: usize,
    pub queue_capacity: usize,
    pub checkpoint_stride: u64,
    pub write_strategy: String,
    pub contention_backoff_ms: u64,
    pub contention_max_retries: u32,
    pub shutdown_policy: String,
    pub eager_blob_download: bool,
    pub blob_endpoint: String,
    pub fetch_user_profiles: bool,
    pub profile_endpoint: String,
    pub profile_concurrency: usize,
    pub profile_cache_ttl_secs: u64,
    pub metrics_addr: Option<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_builder(config::Config::builder())
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let cfg = builder
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "bsky")?
            .set_default("surreal_db", "bsky")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("surreal_auth", "root")?
            .set_default("relay_host", "bsky.network")?
            .set_default("reconnect_delay_ms", 1000)?
            .set_default("interest_collections", "app.bsky.feed.post")?
            .set_default("worker_pool_size", 6)?
            .set_default("queue_capacity", 1024)?
            .set_default("checkpoint_stride", 20)?
            .set_default("write_strategy", "write_then_classify")?
            .set_default("contention_backoff_ms", 200)?
            .set_default("contention_max_retries", 10)?
            .set_default("shutdown_policy", "drain")?
            .set_default("eager_blob_download", false)?
            .set_default("blob_endpoint", "https://bsky.social")?
            .set_default("fetch_user_profiles", false)?
            .set_default("profile_endpoint", "https://public.api.bsky.app")?
            .set_default("profile_concurrency", 4)?
            .set_default("profile_cache_ttl_secs", 4 * 60 * 60)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn db_config(&self) -> Result<DbConfig> {
        let auth = self
            .surreal_auth
            .parse::<DbAuth>()
            .map_err(anyhow::Error::msg)
            .context("invalid SURREAL_AUTH")?;
        Ok(DbConfig {
            endpoint: self.surreal_endpoint.clone(),
            namespace: self.surreal_ns.clone(),
            database: self.surreal_db.clone(),
            username: self.surreal_user.clone(),
            password: self.surreal_pass.clone(),
            auth,
        })
    }

    pub fn firehose_config(&self) -> FirehoseConfig {
        FirehoseConfig {
            relay_host: self.relay_host.clone(),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    /// `None` unless eager blob download is switched on.
    pub fn blob_config(&self) -> Option<BlobConfig> {
        self.eager_blob_download.then(|| BlobConfig {
            endpoint: self.blob_endpoint.clone(),
        })
    }

    /// `None` unless profile enrichment is switched on.
    pub fn profile_config(&self) -> Option<(ProfileEndpoint, ProfileConfig)> {
        self.fetch_user_profiles.then(|| {
            (
                ProfileEndpoint {
                    endpoint: self.profile_endpoint.clone(),
                },
                ProfileConfig {
                    concurrency: self.profile_concurrency,
                    ttl: Duration::from_secs(self.profile_cache_ttl_secs),
                },
            )
        })
    }

    pub fn interest_set(&self) -> Result<InterestSet> {
        InterestSet::parse_list(&self.interest_collections)
            .map_err(anyhow::Error::msg)
            .context("invalid INTEREST_COLLECTIONS")
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let shutdown_policy = self
            .shutdown_policy
            .parse::<ShutdownPolicy>()
            .map_err(anyhow::Error::msg)
            .context("invalid SHUTDOWN_POLICY")?;
        Ok(PipelineConfig {
            worker_pool_size: self.worker_pool_size,
            queue_capacity: self.queue_capacity,
            shutdown_policy,
        })
    }

    pub fn persist_config(&self) -> Result<PersistConfig> {
        let strategy = self
            .write_strategy
            .parse::<WriteStrategy>()
            .map_err(anyhow::Error::msg)
            .context("invalid WRITE_STRATEGY")?;
        Ok(PersistConfig {
            strategy,
            retry: RetryPolicy {
                backoff: Duration::from_millis(self.contention_backoff_ms),
                max_retries: self.contention_max_retries,
            },
        })
    }
}
