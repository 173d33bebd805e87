//! Response cache with ETag revalidation and in-flight request coalescing.

use crate::error::{HttpClientError, Result};
use crate::response::HttpResponse;
use http::{HeaderMap, Method};
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Separator between fingerprint components. NUL cannot occur in a method,
/// URL, or serialized JSON, so components can never bleed into each other.
const FINGERPRINT_SEP: char = '\u{0}';

/// Bound on the auth-extraction memo.
const AUTH_MEMO_CAPACITY: usize = 100;

/// Minimum spacing between lazy sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch; individual requests can still opt out.
    pub enabled: bool,
    /// TTL applied when a `set` does not carry its own.
    pub default_ttl: Duration,
    /// Maximum number of cached responses.
    pub max_size: usize,
    /// Header names whose values isolate cache entries between principals.
    pub auth_headers: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_size: 100,
            auth_headers: vec![
                "authorization".to_string(),
                "x-api-key".to_string(),
                "cookie".to_string(),
            ],
        }
    }
}

/// Snapshot of cache occupancy for management endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cached responses.
    pub size: usize,
    /// Configured capacity.
    pub max_size: usize,
    /// Default TTL.
    pub default_ttl: Duration,
    /// Requests currently in flight through the coalescing registry.
    pub in_flight: usize,
    /// Known entity tags.
    pub etags: usize,
}

/// The settled result shared between coalesced callers.
pub(crate) type Outcome = Result<HttpResponse>;

#[derive(Debug, Clone)]
struct CacheEntry {
    response: HttpResponse,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct AuthMemo {
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

impl AuthMemo {
    fn insert(&mut self, shape: String, extracted: String) {
        if self.map.len() >= AUTH_MEMO_CAPACITY
            && let Some(oldest) = self.order.pop_front()
        {
            self.map.remove(&oldest);
        }
        self.order.push_back(shape.clone());
        self.map.insert(shape, extracted);
    }
}

/// Bounded LRU response cache with an ETag index and the in-flight
/// registry used for request coalescing.
///
/// Locks are held only across constant-time map operations, never across
/// awaits. Lock order where two are taken: entries before etags.
pub(crate) struct HttpCache {
    config: CacheConfig,
    entries: Mutex<LruCache<String, CacheEntry>>,
    etags: Mutex<HashMap<String, String>>,
    pending: Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>,
    auth_memo: Mutex<AuthMemo>,
    next_sweep_at: Mutex<Option<Instant>>,
}

impl HttpCache {
    pub(crate) fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size.max(1)).expect("capacity is non-zero");
        Self {
            config,
            entries: Mutex::new(LruCache::new(capacity)),
            etags: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            auth_memo: Mutex::new(AuthMemo::default()),
            next_sweep_at: Mutex::new(None),
        }
    }

    /// Deterministic fingerprint for a request.
    ///
    /// Query parameter order and header name casing do not affect the
    /// output; values of auth-relevant headers do, so two principals can
    /// never share an entry.
    pub(crate) fn fingerprint(
        &self,
        method: &Method,
        url: &str,
        params: &[(String, String)],
        headers: &HeaderMap,
    ) -> String {
        let params_json = if params.is_empty() {
            String::new()
        } else {
            let sorted: BTreeMap<&str, &str> = params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            serde_json::to_string(&sorted).unwrap_or_default()
        };
        let auth_json = self.auth_fingerprint(headers);

        format!(
            "{method}{FINGERPRINT_SEP}{url}{FINGERPRINT_SEP}{params_json}{FINGERPRINT_SEP}{auth_json}"
        )
    }

    /// Extract auth-relevant headers as canonical JSON, memoized per
    /// header shape (bounded FIFO).
    fn auth_fingerprint(&self, headers: &HeaderMap) -> String {
        let mut shape = String::new();
        for (name, value) in headers {
            shape.push_str(name.as_str());
            shape.push(':');
            shape.push_str(value.to_str().unwrap_or("\u{fffd}"));
            shape.push('\n');
        }

        if let Some(cached) = self.auth_memo.lock().map.get(&shape) {
            return cached.clone();
        }

        let auth: BTreeMap<&str, &str> = self
            .config
            .auth_headers
            .iter()
            .filter_map(|name| {
                headers
                    .get(name.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (name.as_str(), v))
            })
            .collect();
        let extracted = if auth.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&auth).unwrap_or_default()
        };

        self.auth_memo.lock().insert(shape, extracted.clone());
        extracted
    }

    /// Look up a fresh entry. The returned descriptor is marked
    /// `from_cache`; a hit is promoted to the MRU position.
    ///
    /// Expired entries are never returned. An expired entry whose
    /// fingerprint still has an ETag is retained (stale) so a later 304
    /// can refresh and serve it; without an ETag it is evicted here.
    pub(crate) fn get(&self, key: &str) -> Option<HttpResponse> {
        let mut entries = self.entries.lock();
        let expired = entries.peek(key)?.expires_at <= Instant::now();
        if expired {
            if !self.etags.lock().contains_key(key) {
                entries.pop(key);
            }
            return None;
        }
        let entry = entries.get(key)?;
        Some(entry.response.clone().mark_cached())
    }

    /// Store a response. At capacity the LRU entry (and its ETag) is
    /// evicted.
    pub(crate) fn set(
        &self,
        key: &str,
        response: HttpResponse,
        ttl: Option<Duration>,
        etag: Option<String>,
    ) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.config.default_ttl);
        let mut entries = self.entries.lock();
        let mut etags = self.etags.lock();

        let evicted = entries.push(
            key.to_string(),
            CacheEntry {
                response,
                expires_at,
            },
        );
        if let Some((evicted_key, _)) = evicted
            && evicted_key != key
        {
            debug!(key = %evicted_key, "Evicting LRU cache entry");
            etags.remove(&evicted_key);
        }

        match etag {
            Some(tag) => {
                etags.insert(key.to_string(), tag);
            }
            None => {
                etags.remove(key);
            }
        }

        self.maybe_sweep(&mut entries, &mut etags);
    }

    /// Extend an entry's expiry after a 304 and return the refreshed
    /// descriptor.
    pub(crate) fn refresh(&self, key: &str) -> Option<HttpResponse> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(key)?;
        entry.expires_at = Instant::now() + self.config.default_ttl;
        Some(entry.response.clone().mark_cached())
    }

    /// The ETag last received for a fingerprint.
    pub(crate) fn etag(&self, key: &str) -> Option<String> {
        self.etags.lock().get(key).cloned()
    }

    /// Remove all entries whose fingerprint matches `pattern` (a regex).
    /// Returns the number of entries removed; an invalid pattern removes
    /// nothing.
    pub(crate) fn invalidate(&self, pattern: &str) -> usize {
        let regex = match Regex::new(pattern) {
            Ok(regex) => regex,
            Err(error) => {
                warn!(%pattern, %error, "Invalid cache invalidation pattern");
                return 0;
            }
        };

        let mut entries = self.entries.lock();
        let mut etags = self.etags.lock();
        let matching: Vec<String> = entries
            .iter()
            .filter(|(key, _)| regex.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &matching {
            entries.pop(key);
            etags.remove(key);
        }
        matching.len()
    }

    /// Drop all entries, ETags, in-flight registrations, and the auth memo.
    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
        self.etags.lock().clear();
        self.pending.lock().clear();
        let mut memo = self.auth_memo.lock();
        memo.map.clear();
        memo.order.clear();
    }

    /// Current occupancy snapshot.
    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.lock().len(),
            max_size: self.config.max_size,
            default_ttl: self.config.default_ttl,
            in_flight: self.pending.lock().len(),
            etags: self.etags.lock().len(),
        }
    }

    /// Join the in-flight registry for a fingerprint.
    ///
    /// The first caller becomes the leader and must dispatch; its guard
    /// removes the registration on every exit path. Later callers become
    /// followers and await the leader's settled outcome.
    pub(crate) fn join_flight(self: &Arc<Self>, key: &str) -> Flight {
        let mut pending = self.pending.lock();
        if let Some(rx) = pending.get(key) {
            return Flight::Follower(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        pending.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            cache: Arc::clone(self),
            key: key.to_string(),
            tx,
        })
    }

    /// Await a leader's outcome. A leader dropped before settling (for
    /// example, cancelled) surfaces as a cancellation.
    pub(crate) async fn await_flight(
        mut rx: watch::Receiver<Option<Outcome>>,
        url: &str,
    ) -> Outcome {
        loop {
            let settled = rx.borrow().clone();
            if let Some(outcome) = settled {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return Err(HttpClientError::Cancelled {
                    url: url.to_string(),
                });
            }
        }
    }

    fn remove_pending(&self, key: &str) {
        self.pending.lock().remove(key);
    }

    /// Best-effort removal of expired, non-revalidatable entries. Runs at
    /// most once per [`SWEEP_INTERVAL`] and only when triggered by a set.
    fn maybe_sweep(
        &self,
        entries: &mut LruCache<String, CacheEntry>,
        etags: &mut HashMap<String, String>,
    ) {
        let now = Instant::now();
        let mut next = self.next_sweep_at.lock();
        match *next {
            None => {
                *next = Some(now + SWEEP_INTERVAL);
                return;
            }
            Some(at) if now < at => return,
            Some(_) => *next = Some(now + SWEEP_INTERVAL),
        }

        let stale: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| entry.expires_at <= now && !etags.contains_key(key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "Swept expired cache entries");
        }
    }

    #[cfg(test)]
    fn auth_memo_len(&self) -> usize {
        self.auth_memo.lock().map.len()
    }
}

/// Role assigned to a caller by [`HttpCache::join_flight`].
pub(crate) enum Flight {
    /// This caller dispatches; the guard settles and deregisters.
    Leader(FlightGuard),
    /// This caller awaits the leader's outcome.
    Follower(watch::Receiver<Option<Outcome>>),
}

/// Leader-side handle for an in-flight registration. Dropping the guard
/// removes the registration, so settlement happens on every path
/// including cancellation.
pub(crate) struct FlightGuard {
    cache: Arc<HttpCache>,
    key: String,
    tx: watch::Sender<Option<Outcome>>,
}

impl FlightGuard {
    /// Publish the outcome to all followers, then deregister.
    pub(crate) fn settle(self, outcome: &Outcome) {
        let _ = self.tx.send(Some(outcome.clone()));
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.cache.remove_pending(&self.key);
    }
}
