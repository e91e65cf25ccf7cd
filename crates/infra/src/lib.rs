pub mod blobs;
pub mod config;
pub mod db;
pub mod firehose;
pub mod logging;
pub mod profiles;
