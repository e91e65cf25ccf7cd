//! Metric names emitted by the pipeline. The worker installs the recorder.

pub const RECORDS_PERSISTED_TOTAL: &str = "skygraph_records_persisted_total";
pub const CONTENTION_RETRIES_TOTAL: &str = "skygraph_contention_retries_total";
pub const EDGES_FAILED_TOTAL: &str = "skygraph_edges_failed_total";
pub const WORKER_ERRORS_TOTAL: &str = "skygraph_worker_errors_total";
pub const THROUGHPUT_PER_SECOND: &str = "skygraph_throughput_per_second";
pub const QUEUE_PENDING: &str = "skygraph_queue_pending";
pub const CURSOR_POSITION: &str = "skygraph_cursor_position";
