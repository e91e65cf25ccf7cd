use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, Semaphore};
use tokio::time::Instant;

use crate::ports::profiles::{ProfileFetcher, UserProfile};

pub const DEFAULT_PROFILE_TTL: Duration = Duration::from_secs(4 * 60 * 60);
pub const DEFAULT_PROFILE_CONCURRENCY: usize = 4;
const PRUNE_THRESHOLD: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileConfig {
    pub concurrency: usize,
    pub ttl: Duration,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_PROFILE_CONCURRENCY,
            ttl: DEFAULT_PROFILE_TTL,
        }
    }
}

/// Author profile lookups, at most one per DID per `ttl` and at most
/// `concurrency` in flight.
#[derive(Clone)]
pub struct ProfileEnricher {
    fetcher: Arc<dyn ProfileFetcher>,
    permits: Arc<Semaphore>,
    ttl: Duration,
    fetched: Arc<RwLock<HashMap<String, Instant>>>,
}

impl ProfileEnricher {
    pub fn new(fetcher: Arc<dyn ProfileFetcher>, config: ProfileConfig) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            ttl: config.ttl,
            fetched: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns a newly fetched profile for `did`.
    ///
    /// `None` when the DID was looked up within the ttl or the lookup failed.
    /// Failed lookups are not retried until the ttl has passed.
    pub async fn refresh(&self, did: &str) -> Option<UserProfile> {
        if self.is_fresh(did).await {
            return None;
        }
        let _permit = self.permits.acquire().await.ok()?;
        // another worker may have looked it up while this one waited
        if self.is_fresh(did).await {
            return None;
        }

        let result = self.fetcher.fetch_profile(did).await;
        self.remember(did).await;
        match result {
            Ok(profile) => {
                tracing::trace!(did, handle = profile.handle, "profile fetched");
                Some(profile)
            }
            Err(err) => {
                tracing::warn!(did, error = %err, "profile fetch failed");
                None
            }
        }
    }

    async fn is_fresh(&self, did: &str) -> bool {
        self.fetched
            .read()
            .await
            .get(did)
            .is_some_and(|at| at.elapsed() < self.ttl)
    }

    async fn remember(&self, did: &str) {
        let mut fetched = self.fetched.write().await;
        if fetched.len() >= PRUNE_THRESHOLD {
            let ttl = self.ttl;
            fetched.retain(|_, at| at.elapsed() < ttl);
        }
        fetched.insert(did.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::BoxFuture;
    use crate::ports::profiles::ProfileFetchError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: bool,
    }

    impl ProfileFetcher for CountingFetcher {
        fn fetch_profile(
            &self,
            did: &str,
        ) -> BoxFuture<'_, Result<UserProfile, ProfileFetchError>> {
            let did = did.to_string();
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                if self.fail {
                    return Err(ProfileFetchError::Status(404));
                }
                Ok(UserProfile {
                    handle: format!("{did}.test"),
                    did,
                    ..UserProfile::default()
                })
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn profile_is_fetched_once_per_ttl() {
        let fetcher = Arc::new(CountingFetcher::default());
        let enricher = ProfileEnricher::new(fetcher.clone(), ProfileConfig::default());

        let profile = enricher.refresh("did:plc:a").await.unwrap();
        assert_eq!(profile.handle, "did:plc:a.test");
        assert_eq!(enricher.refresh("did:plc:a").await, None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(DEFAULT_PROFILE_TTL).await;
        assert!(enricher.refresh("did:plc:a").await.is_some());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn lookups_are_bounded_by_concurrency() {
        let fetcher = Arc::new(CountingFetcher::default());
        let enricher = ProfileEnricher::new(
            fetcher.clone(),
            ProfileConfig {
                concurrency: 2,
                ..ProfileConfig::default()
            },
        );

        let dids: Vec<String> = (0..8).map(|n| format!("did:plc:{n}")).collect();
        let profiles =
            futures_util::future::join_all(dids.iter().map(|did| enricher.refresh(did))).await;

        assert!(profiles.iter().all(Option::is_some));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 8);
        assert_eq!(fetcher.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_waits_for_the_ttl() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::default()
        });
        let enricher = ProfileEnricher::new(fetcher.clone(), ProfileConfig::default());

        assert_eq!(enricher.refresh("did:plc:gone").await, None);
        assert_eq!(enricher.refresh("did:plc:gone").await, None);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }
}
