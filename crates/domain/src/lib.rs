pub mod collections;
pub mod commit;
pub mod cursor;
pub mod decode;
pub mod graph;
pub mod ingestor;
pub mod materialize;
pub mod persist;
pub mod pipeline;
pub mod ports;
pub mod profiles;
pub mod records;
pub mod source;
pub mod telemetry;
pub mod throughput;
