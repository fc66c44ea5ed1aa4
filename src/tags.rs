//! Process-wide cache of remote resource tags.
//!
//! Tag listings are rate limited per account, and several provisioners read
//! the same tags while fanning out across regions. Each target is fetched at
//! most once per process: concurrent callers share the in-flight fetch,
//! throttled fetches back off exponentially, and failures are not cached.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, warn};

use crate::cloud::{strip_reserved, TagApi, TagTarget, Tags};
use crate::config::{TAG_BACKOFF_BASE, TAG_FETCH_ATTEMPTS};
use crate::error::RemoteError;

/// Maximum number of cached targets.
const MAX_ENTRIES: u64 = 1_024;

/// Memoizing, retrying tag lookup.
#[derive(Clone)]
pub struct TagCache {
    api: Arc<dyn TagApi>,
    cache: Cache<TagTarget, Tags>,
    backoff_base: Duration,
    attempts: u32,
}

impl std::fmt::Debug for TagCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagCache")
            .field("entry_count", &self.cache.entry_count())
            .field("backoff_base", &self.backoff_base)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl TagCache {
    /// Creates a cache backed by the given tag listing capability.
    #[must_use]
    pub fn new(api: Arc<dyn TagApi>) -> Self {
        Self {
            api,
            cache: Cache::builder().max_capacity(MAX_ENTRIES).build(),
            backoff_base: TAG_BACKOFF_BASE,
            attempts: TAG_FETCH_ATTEMPTS,
        }
    }

    /// Overrides the base backoff delay.
    #[must_use]
    pub const fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Returns the tags of a target, without reserved tags.
    ///
    /// # Errors
    ///
    /// Returns the last remote error if the fetch fails with a non-throttling
    /// error or stays throttled for every attempt.
    pub async fn get(&self, target: &TagTarget) -> Result<Tags, RemoteError> {
        self.cache
            .try_get_with_by_ref(target, self.fetch(target))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch(&self, target: &TagTarget) -> Result<Tags, RemoteError> {
        let mut attempt = 0;
        loop {
            match self.api.list_tags(target).await {
                Ok(tags) => {
                    debug!("Fetched {} tags for {target}", tags.len());
                    return Ok(strip_reserved(tags));
                }
                Err(e) if e.has_code(target.throttling_code()) && attempt + 1 < self.attempts => {
                    let delay = self.backoff_base * 2_u32.pow(attempt);
                    warn!(
                        "Throttled fetching tags for {target}, retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Failed to fetch tags for {target}: {e}");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockTagApi;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn target() -> TagTarget {
        TagTarget::Function {
            region: String::from("us-west-2"),
            arn: String::from("arn:aws:lambda:us-west-2:123456789012:function:agent"),
        }
    }

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    /// Slow tag listing that counts calls.
    struct SlowTagApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TagApi for SlowTagApi {
        async fn list_tags(&self, _target: &TagTarget) -> Result<Tags, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(tags(&[("team", "platform")]))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_fetches_share_one_call() {
        let api = Arc::new(SlowTagApi {
            calls: AtomicU32::new(0),
        });
        let cache = TagCache::new(api.clone());
        let target = target();

        let (first, second) = tokio::join!(cache.get(&target), cache.get(&target));

        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        cache.get(&target).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_fetch_succeeds_on_last_attempt() {
        let mut api = MockTagApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_list_tags()
            .times(9)
            .in_sequence(&mut seq)
            .returning(|_| Err(RemoteError::new("TooManyRequestsException", "Rate exceeded")));
        api.expect_list_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(tags(&[("aws:cloudformation:stack-id", "x"), ("team", "a")])));

        let cache = TagCache::new(Arc::new(api));
        let result = cache.get(&target()).await.unwrap();

        assert_eq!(result, tags(&[("team", "a")]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttling_exhausts_attempts() {
        let mut api = MockTagApi::new();
        api.expect_list_tags()
            .times(10)
            .returning(|_| Err(RemoteError::new("TooManyRequestsException", "Rate exceeded")));

        let cache = TagCache::new(Arc::new(api));
        let err = cache.get(&target()).await.unwrap_err();

        assert!(err.is_throttling());
    }

    #[tokio::test]
    async fn test_other_errors_fail_immediately_and_are_not_cached() {
        let mut api = MockTagApi::new();
        let mut seq = mockall::Sequence::new();
        api.expect_list_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(RemoteError::new("AccessDeniedException", "denied")));
        api.expect_list_tags()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(tags(&[("team", "a")])));

        let cache = TagCache::new(Arc::new(api));

        let err = cache.get(&target()).await.unwrap_err();
        assert!(err.has_code("AccessDeniedException"));

        let retried = cache.get(&target()).await.unwrap();
        assert_eq!(retried, tags(&[("team", "a")]));
    }

    #[tokio::test]
    async fn test_throttling_code_is_per_service() {
        let mut api = MockTagApi::new();
        api.expect_list_tags()
            .times(1)
            .returning(|_| Err(RemoteError::new("TooManyRequestsException", "wrong family")));

        let cache = TagCache::new(Arc::new(api));
        let project = TagTarget::BuildProject {
            region: String::from("us-west-2"),
            name: String::from("AgentFactory"),
        };

        assert!(cache.get(&project).await.is_err());
    }
}
