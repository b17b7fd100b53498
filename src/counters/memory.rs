//! In-process counter store.

use super::{CounterError, CounterKind, CounterStore};
use crate::cache::TtlCache;
use async_trait::async_trait;
use std::time::Duration;

/// Per-instance counters. Not shared across replicas.
///
/// Each counter kind gets its own map of `max_entries`, so a flood of new
/// request keys can never evict a live failed-login count.
pub struct LocalCounterStore {
    requests: TtlCache<String, u64>,
    failed_logins: TtlCache<String, u64>,
}

impl LocalCounterStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            requests: TtlCache::new(Duration::from_secs(3600), max_entries),
            failed_logins: TtlCache::new(Duration::from_secs(3600), max_entries),
        }
    }

    fn counts(&self, kind: CounterKind) -> &TtlCache<String, u64> {
        match kind {
            CounterKind::Request => &self.requests,
            CounterKind::FailedLogin => &self.failed_logins,
        }
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(
        &self,
        kind: CounterKind,
        key: &str,
        amount: u64,
        ttl: Duration,
    ) -> Result<u64, CounterError> {
        self.counts(kind)
            .upsert(key.to_string(), ttl, || 0, |count| {
                *count = count.saturating_add(amount);
                *count
            })
            .ok_or_else(|| CounterError::Unavailable("counter lock poisoned".to_string()))
    }

    async fn get(&self, kind: CounterKind, key: &str) -> Result<u64, CounterError> {
        Ok(self.counts(kind).get(&key.to_string()).unwrap_or(0))
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn sweep(&self) {
        self.requests.cleanup();
        self.failed_logins.cleanup();
    }
}
