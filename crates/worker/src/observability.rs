use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use skygraph_domain::pipeline::IngestPipeline;
use skygraph_domain::telemetry::{
    CONTENTION_RETRIES_TOTAL, CURSOR_POSITION, EDGES_FAILED_TOTAL, QUEUE_PENDING,
    RECORDS_PERSISTED_TOTAL, THROUGHPUT_PER_SECOND, WORKER_ERRORS_TOTAL,
};
use tokio::task::JoinHandle;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder, serving `/metrics` on `addr` when given.
pub fn init_metrics(addr: Option<&str>) -> Result<()> {
    match addr {
        Some(addr) => {
            let addr: SocketAddr = addr
                .parse()
                .with_context(|| format!("invalid METRICS_ADDR '{addr}'"))?;
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("starting prometheus exporter")?;
            tracing::info!(%addr, "metrics exporter listening");
        }
        None => {
            let handle = PrometheusBuilder::new().install_recorder()?;
            let _ = METRICS_HANDLE.set(handle);
        }
    }
    describe();
    Ok(())
}

fn describe() {
    describe_counter!(RECORDS_PERSISTED_TOTAL, "Records written, by kind and outcome");
    describe_counter!(CONTENTION_RETRIES_TOTAL, "Graph store writes retried after contention");
    describe_counter!(EDGES_FAILED_TOTAL, "Edge writes abandoned, by edge label");
    describe_counter!(WORKER_ERRORS_TOTAL, "Records that failed at the worker boundary");
    describe_gauge!(THROUGHPUT_PER_SECOND, "Events per second over the last window");
    describe_gauge!(QUEUE_PENDING, "Records enqueued and not yet processed");
    describe_gauge!(CURSOR_POSITION, "Last published resume position");
}

pub fn spawn_queue_gauge(pipeline: Arc<IngestPipeline>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            gauge!(QUEUE_PENDING).set(pipeline.pending() as f64);
        }
    })
}
