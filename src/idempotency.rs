use crate::models::AnalyzeResponse;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

// Replay cache for the Idempotency-Key header. Redis-backed when REDIS_URL
// is set; otherwise an in-process map with the same TTL semantics. Any Redis
// hiccup degrades to "no cached response" rather than failing the request.

pub fn ttl_from_env() -> Duration {
    let secs = std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3600);
    Duration::from_secs(secs)
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<AnalyzeResponse> {
    let mut conn = client.get_multiplexed_async_connection().await.ok()?;
    let cached: Option<String> = conn.get(cache_key(key)).await.ok()?;
    cached.and_then(|value| serde_json::from_str(&value).ok())
}

pub async fn redis_set(
    client: &redis::Client,
    key: &str,
    value: &AnalyzeResponse,
    ttl_secs: u64,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(cache_key(key), json, ttl_secs).await;
    }
}

fn cache_key(key: &str) -> String {
    format!("snaplist:idem:{key}")
}

struct CachedResponse {
    stored_at: Instant,
    response: AnalyzeResponse,
}

/// In-process fallback cache. Entries expire lazily: stale hits are evicted
/// on read, and every insert sweeps out entries past the TTL so the map
/// stays bounded to recently-replayed keys.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CachedResponse>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str, ttl: Duration) -> Option<AnalyzeResponse> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < ttl => Some(entry.response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: String, response: AnalyzeResponse, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            key,
            CachedResponse {
                stored_at: Instant::now(),
                response,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalListing;
    use crate::normalize::normalize_listing;
    use crate::shipping::recommend_packaging;

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(cache_key("abc"), "snaplist:idem:abc");
    }

    fn sample_response() -> AnalyzeResponse {
        let draft = normalize_listing("{}", false).expect("defaults");
        let packaging = recommend_packaging(&draft.dimensions, &draft.weight, draft.fragility);
        AnalyzeResponse {
            listing: CanonicalListing::from_draft(draft, packaging, "gemini"),
            stages: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fresh_entries_replay_within_ttl() {
        let cache = MemoryCache::new();
        let ttl = Duration::from_secs(3600);
        cache.insert("req-1".to_string(), sample_response(), ttl).await;
        let hit = cache.get("req-1", ttl).await.expect("cached");
        assert_eq!(hit.listing.title, "Item for Sale");
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let cache = MemoryCache::new();
        cache
            .insert("req-1".to_string(), sample_response(), Duration::from_secs(3600))
            .await;
        assert!(cache.get("req-1", Duration::ZERO).await.is_none());
        // The stale entry was removed, not just hidden.
        assert!(cache.entries.lock().await.is_empty());
    }

    #[tokio::test]
    async fn inserts_sweep_entries_past_the_ttl() {
        let cache = MemoryCache::new();
        cache
            .insert("old".to_string(), sample_response(), Duration::from_secs(3600))
            .await;
        cache
            .insert("new".to_string(), sample_response(), Duration::ZERO)
            .await;
        let entries = cache.entries.lock().await;
        assert!(!entries.contains_key("old"));
        assert!(entries.contains_key("new"));
    }

    #[test]
    fn ttl_defaults_to_an_hour() {
        // Only meaningful when the env var is unset, which is the test default.
        if std::env::var("IDEMPOTENCY_TTL_SECS").is_err() {
            assert_eq!(ttl_from_env(), Duration::from_secs(3600));
        }
    }
}
