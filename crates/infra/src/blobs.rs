use std::time::Duration;

use skygraph_domain::ports::BoxFuture;
use skygraph_domain::ports::blobs::{BlobFetchError, BlobFetcher};
use url::Url;

const GET_BLOB: &str = "/xrpc/com.atproto.sync.getBlob";
const BLOB_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct BlobConfig {
    pub endpoint: String,
}

/// Downloads blobs with `com.atproto.sync.getBlob`.
#[derive(Debug, Clone)]
pub struct XrpcBlobFetcher {
    http: reqwest::Client,
    endpoint: String,
}

impl XrpcBlobFetcher {
    pub fn new(config: BlobConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(BLOB_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn blob_url(&self, owner: &str, cid: &str) -> Result<Url, BlobFetchError> {
        let mut url = Url::parse(&format!("{}{GET_BLOB}", self.endpoint))
            .map_err(|err| BlobFetchError::Request(format!("invalid blob endpoint: {err}")))?;
        url.query_pairs_mut()
            .append_pair("did", owner)
            .append_pair("cid", cid);
        Ok(url)
    }
}

impl BlobFetcher for XrpcBlobFetcher {
    fn fetch_blob(&self, owner: &str, cid: &str) -> BoxFuture<'_, Result<Vec<u8>, BlobFetchError>> {
        let url = self.blob_url(owner, cid);
        let http = self.http.clone();
        Box::pin(async move {
            let url = url?;
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|err| BlobFetchError::Request(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(BlobFetchError::Status(status.as_u16()));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|err| BlobFetchError::Request(err.to_string()))?;
            Ok(bytes.to_vec())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_url_carries_owner_and_cid() {
        let fetcher = XrpcBlobFetcher::new(BlobConfig {
            endpoint: "https://bsky.social/".to_string(),
        });
        let url = fetcher.blob_url("did:plc:abc", "bafkrei").unwrap();
        assert_eq!(
            url.as_str(),
            "https://bsky.social/xrpc/com.atproto.sync.getBlob?did=did%3Aplc%3Aabc&cid=bafkrei"
        );
    }
}
