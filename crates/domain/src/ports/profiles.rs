use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum ProfileFetchError {
    #[error("profile request failed: {0}")]
    Request(String),
    #[error("profile request returned status {0}")]
    Status(u16),
    #[error("profile response did not decode: {0}")]
    Decode(String),
}

/// Public profile fields stored on a user node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub labels: Vec<String>,
    pub created_at: Option<String>,
    pub indexed_at: Option<String>,
    pub followers: Option<u64>,
    pub following: Option<u64>,
    pub posts: Option<u64>,
}

pub trait ProfileFetcher: Send + Sync {
    fn fetch_profile(&self, did: &str) -> BoxFuture<'_, Result<UserProfile, ProfileFetchError>>;
}
