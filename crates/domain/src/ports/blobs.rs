use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum BlobFetchError {
    #[error("blob request failed: {0}")]
    Request(String),
    #[error("blob request returned status {0}")]
    Status(u16),
}

pub trait BlobFetcher: Send + Sync {
    fn fetch_blob(&self, owner: &str, cid: &str) -> BoxFuture<'_, Result<Vec<u8>, BlobFetchError>>;
}
