use std::time::Duration;

use serde::Deserialize;
use skygraph_domain::ports::BoxFuture;
use skygraph_domain::ports::profiles::{ProfileFetchError, ProfileFetcher, UserProfile};
use url::Url;

const GET_PROFILE: &str = "/xrpc/app.bsky.actor.getProfile";
const PROFILE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ProfileEndpoint {
    pub endpoint: String,
}

/// Looks authors up with `app.bsky.actor.getProfile` on the public AppView.
#[derive(Debug, Clone)]
pub struct XrpcProfileFetcher {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    did: String,
    handle: String,
    display_name: Option<String>,
    description: Option<String>,
    avatar: Option<String>,
    banner: Option<String>,
    #[serde(default)]
    labels: Vec<Label>,
    created_at: Option<String>,
    indexed_at: Option<String>,
    followers_count: Option<u64>,
    follows_count: Option<u64>,
    posts_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Label {
    val: String,
}

impl From<ProfileView> for UserProfile {
    fn from(view: ProfileView) -> Self {
        Self {
            did: view.did,
            handle: view.handle,
            display_name: view.display_name,
            description: view.description,
            avatar: view.avatar,
            banner: view.banner,
            labels: view.labels.into_iter().map(|label| label.val).collect(),
            created_at: view.created_at,
            indexed_at: view.indexed_at,
            followers: view.followers_count,
            following: view.follows_count,
            posts: view.posts_count,
        }
    }
}

impl XrpcProfileFetcher {
    pub fn new(config: ProfileEndpoint) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROFILE_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn profile_url(&self, did: &str) -> Result<Url, ProfileFetchError> {
        let mut url = Url::parse(&format!("{}{GET_PROFILE}", self.endpoint)).map_err(|err| {
            ProfileFetchError::Request(format!("invalid profile endpoint: {err}"))
        })?;
        url.query_pairs_mut().append_pair("actor", did);
        Ok(url)
    }
}

fn decode_profile(body: &[u8]) -> Result<UserProfile, ProfileFetchError> {
    serde_json::from_slice::<ProfileView>(body)
        .map(UserProfile::from)
        .map_err(|err| ProfileFetchError::Decode(err.to_string()))
}

impl ProfileFetcher for XrpcProfileFetcher {
    fn fetch_profile(&self, did: &str) -> BoxFuture<'_, Result<UserProfile, ProfileFetchError>> {
        let url = self.profile_url(did);
        let http = self.http.clone();
        Box::pin(async move {
            let url = url?;
            let response = http
                .get(url)
                .send()
                .await
                .map_err(|err| ProfileFetchError::Request(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProfileFetchError::Status(status.as_u16()));
            }
            let body = response
                .bytes()
                .await
                .map_err(|err| ProfileFetchError::Request(err.to_string()))?;
            decode_profile(&body)
        })
    }
}
