mod observability;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use skygraph_domain::collections::InterestSet;
use skygraph_domain::cursor::CursorCheckpoint;
use skygraph_domain::ingestor::Ingestor;
use skygraph_domain::materialize::Materializer;
use skygraph_domain::persist::PersistService;
use skygraph_domain::pipeline::{IngestPipeline, RecordProcessor};
use skygraph_domain::profiles::ProfileEnricher;
use skygraph_domain::throughput::ThroughputMeter;
use skygraph_infra::blobs::XrpcBlobFetcher;
use skygraph_infra::db::SurrealGraphStore;
use skygraph_infra::firehose::FirehoseSource;
use skygraph_infra::profiles::XrpcProfileFetcher;
use skygraph_infra::{config::AppConfig, logging::init_tracing};
use tracing::info;

const METER_PERIOD: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config)?;
    observability::init_metrics(config.metrics_addr.as_deref())?;

    let interest = config.interest_set()?;
    let store = SurrealGraphStore::connect(&config.db_config()?).await?;
    let result = match store.ensure_schema().await {
        Ok(()) => ingest(&config, interest, store.clone()).await,
        Err(err) => Err(err),
    };
    store.close();
    result
}

async fn ingest(
    config: &AppConfig,
    interest: InterestSet,
    store: SurrealGraphStore,
) -> anyhow::Result<()> {
    let pipeline_config = config.pipeline_config()?;
    let mut persist = PersistService::new(Arc::new(store), config.persist_config()?);
    if let Some((endpoint, profiles)) = config.profile_config() {
        let fetcher = Arc::new(XrpcProfileFetcher::new(endpoint));
        persist = persist.with_profiles(ProfileEnricher::new(fetcher, profiles));
    }

    let meter = ThroughputMeter::new();
    let flusher = meter.spawn_flusher(METER_PERIOD);

    let materializer = match config.blob_config() {
        Some(blobs) => Materializer::with_blob_fetcher(Arc::new(XrpcBlobFetcher::new(blobs))),
        None => Materializer::new(),
    };
    let processor = RecordProcessor::new(materializer, persist, meter.clone());
    let pipeline = Arc::new(IngestPipeline::start(
        pipeline_config.clone(),
        Arc::new(processor),
    ));
    let queue_gauge = observability::spawn_queue_gauge(pipeline.clone(), METER_PERIOD);

    let source = Arc::new(FirehoseSource::new(config.firehose_config()));
    let checkpoint = Arc::new(CursorCheckpoint::new(
        config.checkpoint_stride,
        config.start_cursor,
    ));
    let ingestor = Ingestor::new(source, interest, checkpoint, meter, pipeline);

    info!(
        relay = config.relay_host,
        start_cursor = ?config.start_cursor,
        shutdown_policy = pipeline_config.shutdown_policy.as_str(),
        eager_blobs = config.eager_blob_download,
        user_profiles = config.fetch_user_profiles,
        "worker starting"
    );

    let policy = pipeline_config.shutdown_policy;
    let run = ingestor.run(config.start_cursor);
    tokio::pin!(run);
    let (stream, report) = tokio::select! {
        stats = &mut run => (stats, ingestor.shutdown(policy).await),
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopping event source");
            // closing intake releases a run parked on a full queue
            let (report, stats) = tokio::join!(ingestor.shutdown(policy), run.as_mut());
            (stats, report)
        }
    };

    flusher.abort();
    queue_gauge.abort();
    let _ = flusher.await;
    let _ = queue_gauge.await;
    info!(
        policy = report.policy.as_str(),
        abandoned = report.abandoned,
        resume_position = ?ingestor.checkpoint().position(),
        "worker shutdown"
    );

    let stats = stream.context("event source failed")?;
    info!(
        commits = stats.commits,
        enqueued = stats.enqueued,
        deleted = stats.deleted,
        "ingest finished"
    );
    Ok(())
}
