use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Shared auth state: the API key ring plus a per-org rate limiter.
#[derive(Clone)]
pub struct AuthState {
    keys: Arc<HashMap<String, KeyRecord>>,
    limiter: Arc<RateLimiter>,
}

/// Identity attached to authenticated requests.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub org_id: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct KeyRecord {
    org_id: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self {
            keys: Arc::new(load_key_ring()),
            limiter: Arc::new(RateLimiter::from_env()),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.keys.get(presented).map(|record| AuthContext {
            org_id: record.org_id.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Snaplist-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.org_id).await {
        Verdict::Allowed(snapshot) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            snapshot.write_headers(response.headers_mut());
            Ok(response)
        }
        Verdict::Throttled(snapshot) => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "Too many requests",
            );
            snapshot.write_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Snaplist-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        details: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

/// `SNAPLIST_API_KEYS` holds `org:key` pairs, comma separated. An empty or
/// malformed list falls back to demo credentials so local runs just work.
fn load_key_ring() -> HashMap<String, KeyRecord> {
    let raw = env::var("SNAPLIST_API_KEYS").unwrap_or_else(|_| "demo-org:demo-key".to_string());
    let mut ring = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let org = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        if let (Some(org), Some(key)) = (org, key) {
            ring.insert(
                key.to_string(),
                KeyRecord {
                    org_id: org.to_string(),
                    api_key_id: format!("key-{:02}", idx + 1),
                },
            );
        } else {
            warn!(
                target = "snaplist.api",
                "ignored malformed SNAPLIST_API_KEYS entry: {trimmed}"
            );
        }
    }

    if ring.is_empty() {
        warn!(
            target = "snaplist.api",
            "SNAPLIST_API_KEYS produced no keys; falling back to demo credentials"
        );
        ring.insert(
            "demo-key".to_string(),
            KeyRecord {
                org_id: "demo-org".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "snaplist.api",
            key_count = ring.len(),
            "loaded API keys from env"
        );
    }

    ring
}

/// Token-bucket limiter keyed by org id.
struct RateLimiter {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

enum Verdict {
    Allowed(LimitSnapshot),
    Throttled(LimitSnapshot),
}

struct LimitSnapshot {
    limit: u64,
    remaining: u64,
    reset_secs: u64,
    retry_after: Option<u64>,
}

impl RateLimiter {
    fn from_env() -> Self {
        let rate_per_sec = env_f64("RATE_LIMIT_PER_SEC", 5.0, |v| v > 0.0);
        let capacity = env_f64("RATE_LIMIT_CAPACITY", 10.0, |v| v >= 1.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    async fn consume(&self, key: &str) -> Verdict {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            refilled_at: now,
        });

        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            bucket.refilled_at = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Verdict::Allowed(self.snapshot(bucket.tokens, None))
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after = (deficit / self.rate_per_sec).ceil().max(0.0) as u64;
            Verdict::Throttled(self.snapshot(bucket.tokens, Some(retry_after)))
        }
    }

    fn snapshot(&self, tokens: f64, retry_after: Option<u64>) -> LimitSnapshot {
        let reset = ((self.capacity - tokens) / self.rate_per_sec).ceil().max(0.0) as u64;
        LimitSnapshot {
            limit: self.capacity as u64,
            remaining: tokens.max(0.0).floor() as u64,
            reset_secs: reset,
            retry_after,
        }
    }
}

impl LimitSnapshot {
    fn write_headers(&self, headers: &mut http::HeaderMap) {
        if let Some(retry) = self.retry_after {
            headers.insert(http::header::RETRY_AFTER, numeric_header(retry));
        }
        headers.insert("X-RateLimit-Limit", numeric_header(self.limit));
        headers.insert("X-RateLimit-Remaining", numeric_header(self.remaining));
        headers.insert("X-RateLimit-Reset", numeric_header(self.reset_secs));
    }
}

fn numeric_header(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

fn env_f64(var: &str, default: f64, valid: fn(f64) -> bool) -> f64 {
    env::var(var)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| valid(*value))
        .unwrap_or(default)
}
