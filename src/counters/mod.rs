//! Behavioral counters.
//!
//! TTL-bounded request and failed-login counts per subject. The backing
//! [`CounterStore`] is picked once at startup; every read and write goes through
//! [`BehavioralCounters`], which bounds latency and turns store failures into a
//! zero count.

pub mod memory;
pub mod redis_store;

use crate::config::{CounterBackend, CounterConfig};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use memory::LocalCounterStore;
pub use redis_store::RedisCounterStore;

/// Error from a counter store.
#[derive(Debug)]
pub enum CounterError {
    /// Redis command failed.
    Redis(::redis::RedisError),
    /// Operation timed out.
    Timeout,
    /// Store cannot serve requests.
    Unavailable(String),
}

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CounterError::Redis(e) => write!(f, "Redis error: {}", e),
            CounterError::Timeout => write!(f, "Counter operation timed out"),
            CounterError::Unavailable(msg) => write!(f, "Counter store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CounterError {}

impl From<::redis::RedisError> for CounterError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_timeout() {
            CounterError::Timeout
        } else {
            CounterError::Redis(e)
        }
    }
}

/// Counter family.
///
/// Request keys are derived from caller-chosen paths, so in-process stores keep
/// each family in its own bounded map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterKind {
    Request,
    FailedLogin,
}

/// Atomic TTL counter store.
///
/// `increment` must be a single increment-and-fetch on the backing store and
/// must restart the key's TTL window.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `amount` to `key` and return the new count.
    async fn increment(
        &self,
        kind: CounterKind,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<u64, CounterError>;

    /// Current count for `key`, 0 if absent or expired.
    async fn get(&self, kind: CounterKind, key: &str) -> Result<u64, CounterError>;

    /// Store name for logging.
    fn name(&self) -> &str;

    /// Drop expired keys. Stores with native expiry do nothing.
    fn sweep(&self) {}
}

/// Request and failed-login counters over a resolved store.
pub struct BehavioralCounters {
    store: Arc<dyn CounterStore>,
    timeout: Duration,
    request_window: Duration,
    failed_login_window: Duration,
    key_prefix: String,
}

impl BehavioralCounters {
    /// Wrap an already resolved store.
    pub fn new(store: Arc<dyn CounterStore>, config: &CounterConfig) -> Self {
        Self {
            store,
            timeout: Duration::from_millis(config.timeout_ms),
            request_window: Duration::from_secs(config.request_window_seconds),
            failed_login_window: Duration::from_secs(config.failed_login_window_seconds),
            key_prefix: config.key_prefix.clone(),
        }
    }

    /// Resolve the configured backend.
    ///
    /// An unreachable Redis at startup falls back to the in-process store. Those
    /// counts are per instance and not shared between replicas.
    pub async fn from_config(config: &CounterConfig) -> Self {
        let local = || -> Arc<dyn CounterStore> {
            Arc::new(LocalCounterStore::new(config.max_entries))
        };

        let store = match config.backend {
            CounterBackend::Memory => local(),
            CounterBackend::Redis => {
                let url = config.redis_url.as_deref().unwrap_or_default();
                let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
                match RedisCounterStore::connect(url, connect_timeout).await {
                    Ok(store) => {
                        info!("Redis counter store connected");
                        Arc::new(store)
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            "Redis counter store unavailable, using per-instance counters"
                        );
                        local()
                    }
                }
            }
        };

        Self::new(store, config)
    }

    /// Name of the active store.
    pub fn backend(&self) -> &str {
        self.store.name()
    }

    pub fn sweep(&self) {
        self.store.sweep();
    }

    /// Count one request for (subject, endpoint) and return the new count.
    pub async fn record_request(&self, subject: &str, endpoint: &str) -> u64 {
        let key = self.request_key(subject, endpoint);
        self.increment(CounterKind::Request, &key, self.request_window)
            .await
    }

    /// Count one failed login for the subject and return the new count.
    pub async fn record_failed_login(&self, subject: &str) -> u64 {
        let key = self.failed_login_key(subject);
        self.increment(CounterKind::FailedLogin, &key, self.failed_login_window)
            .await
    }

    pub async fn failed_login_count(&self, subject: &str) -> u64 {
        let key = self.failed_login_key(subject);
        self.get(CounterKind::FailedLogin, &key).await
    }

    fn request_key(&self, subject: &str, endpoint: &str) -> String {
        format!("{}:req:{}:{}", self.key_prefix, subject, endpoint)
    }

    fn failed_login_key(&self, subject: &str) -> String {
        format!("{}:failed:{}", self.key_prefix, subject)
    }

    async fn increment(&self, kind: CounterKind, key: &str, ttl: Duration) -> u64 {
        let result =
            tokio::time::timeout(self.timeout, self.store.increment(kind, key, 1, ttl)).await;
        self.degrade(key, result)
    }

    async fn get(&self, kind: CounterKind, key: &str) -> u64 {
        let result = tokio::time::timeout(self.timeout, self.store.get(kind, key)).await;
        self.degrade(key, result)
    }

    fn degrade(
        &self,
        key: &str,
        result: Result<Result<u64, CounterError>, tokio::time::error::Elapsed>,
    ) -> u64 {
        match result {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                warn!(store = self.store.name(), key = %key, error = %e, "Counter unavailable, using 0");
                0
            }
            Err(_) => {
                warn!(store = self.store.name(), key = %key, "Counter timed out, using 0");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment(
            &self,
            _kind: CounterKind,
            _key: &str,
            _amount: u64,
            _ttl: Duration,
        ) -> Result<u64, CounterError> {
            Err(CounterError::Unavailable("connection refused".to_string()))
        }

        async fn get(&self, _kind: CounterKind, _key: &str) -> Result<u64, CounterError> {
            Err(CounterError::Unavailable("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowStore;

    #[async_trait]
    impl CounterStore for SlowStore {
        async fn increment(
            &self,
            _kind: CounterKind,
            _key: &str,
            _amount: u64,
            _ttl: Duration,
        ) -> Result<u64, CounterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(99)
        }

        async fn get(&self, _kind: CounterKind, _key: &str) -> Result<u64, CounterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(99)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn local_counters() -> BehavioralCounters {
        let config = CounterConfig::default();
        BehavioralCounters::new(Arc::new(LocalCounterStore::new(1000)), &config)
    }

    #[tokio::test]
    async fn test_request_counts_are_keyed_by_subject_and_endpoint() {
        let counters = local_counters();

        assert_eq!(counters.record_request("alice", "/users").await, 1);
        assert_eq!(counters.record_request("alice", "/users").await, 2);
        assert_eq!(counters.record_request("alice", "/admin").await, 1);
        assert_eq!(counters.record_request("bob", "/users").await, 1);
        assert_eq!(counters.record_request("alice", "/users").await, 3);
    }

    #[tokio::test]
    async fn test_failed_logins() {
        let counters = local_counters();

        for _ in 0..4 {
            counters.record_failed_login("alice").await;
        }

        assert_eq!(counters.failed_login_count("alice").await, 4);
        assert_eq!(counters.failed_login_count("bob").await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_degrades_to_zero() {
        let config = CounterConfig::default();
        let counters = BehavioralCounters::new(Arc::new(FailingStore), &config);

        assert_eq!(counters.record_request("alice", "/users").await, 0);
        assert_eq!(counters.record_failed_login("alice").await, 0);
        assert_eq!(counters.failed_login_count("alice").await, 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_to_zero() {
        let config = CounterConfig {
            timeout_ms: 10,
            ..Default::default()
        };
        let counters = BehavioralCounters::new(Arc::new(SlowStore), &config);

        let started = std::time::Instant::now();
        assert_eq!(counters.record_request("alice", "/users").await, 0);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_local() {
        let config = CounterConfig {
            backend: CounterBackend::Redis,
            redis_url: Some("redis://127.0.0.1:1/".to_string()),
            connect_timeout_ms: 200,
            ..Default::default()
        };

        let counters = BehavioralCounters::from_config(&config).await;
        assert_eq!(counters.backend(), "memory");
        assert_eq!(counters.record_request("alice", "/users").await, 1);
    }

    #[tokio::test]
    async fn test_memory_backend_selected() {
        let counters = BehavioralCounters::from_config(&CounterConfig::default()).await;
        assert_eq!(counters.backend(), "memory");
    }

    #[tokio::test]
    async fn test_request_flood_keeps_failed_logins() {
        let config = CounterConfig {
            max_entries: 8,
            ..Default::default()
        };
        let counters = BehavioralCounters::new(Arc::new(LocalCounterStore::new(8)), &config);

        for _ in 0..10 {
            counters.record_failed_login("alice").await;
        }
        for i in 0..20 {
            counters.record_request("anonymous", &format!("/junk{}", i)).await;
        }

        assert_eq!(counters.failed_login_count("alice").await, 10);
    }

    #[test]
    fn test_keys() {
        let counters = local_counters();
        assert_eq!(
            counters.request_key("alice", "/users"),
            "accessguard:req:alice:/users"
        );
        assert_eq!(counters.failed_login_key("alice"), "accessguard:failed:alice");
    }
}
