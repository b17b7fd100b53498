//! Session continuity and token provenance trackers.
//!
//! Both live in process, bounded by [`TtlCache`].

use crate::cache::TtlCache;
use crate::config::{SessionConfig, Tier};
use std::collections::hash_map::RandomState;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::time::Duration;

/// Client fingerprint at the time of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownGoodLogin {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Change flags relative to the last known-good login.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Continuity {
    pub ip_changed: bool,
    pub user_agent_changed: bool,
}

/// Last known-good login per subject.
pub struct LoginHistory {
    logins: TtlCache<String, KnownGoodLogin>,
}

impl LoginHistory {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            logins: TtlCache::new(ttl, max_entries),
        }
    }

    /// Remember the fingerprint of a successful login.
    pub fn remember(&self, subject: &str, client_ip: Option<&str>, user_agent: Option<&str>) {
        self.logins.insert(
            subject.to_string(),
            KnownGoodLogin {
                client_ip: client_ip.map(str::to_string),
                user_agent: user_agent.map(str::to_string),
            },
        );
    }

    pub fn last_login(&self, subject: &str) -> Option<KnownGoodLogin> {
        self.logins.get(&subject.to_string())
    }

    /// Compare the current request against the last known-good login.
    ///
    /// A change is only reported when both sides are known.
    pub fn continuity(
        &self,
        subject: &str,
        client_ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Continuity {
        let Some(last) = self.last_login(subject) else {
            return Continuity::default();
        };

        Continuity {
            ip_changed: differs(last.client_ip.as_deref(), client_ip),
            user_agent_changed: differs(last.user_agent.as_deref(), user_agent),
        }
    }
}

fn differs(known: Option<&str>, current: Option<&str>) -> bool {
    matches!((known, current), (Some(a), Some(b)) if a != b)
}

/// Distinct client fingerprints seen per token id.
///
/// Fingerprints are stored as keyed hashes, and at most `max_fingerprints` are
/// kept per token. Past that the reuse count saturates.
pub struct TokenSightings {
    sightings: TtlCache<String, HashSet<u64>>,
    window: Duration,
    max_fingerprints: usize,
    hasher: RandomState,
}

impl TokenSightings {
    pub fn new(window: Duration, max_entries: usize, max_fingerprints: usize) -> Self {
        Self {
            sightings: TtlCache::new(window, max_entries),
            window,
            max_fingerprints: max_fingerprints.max(1),
            hasher: RandomState::new(),
        }
    }

    /// Record a use of `token_id` from a client fingerprint.
    ///
    /// Returns the reuse count: distinct fingerprints minus one.
    pub fn record(&self, token_id: &str, client_ip: Option<&str>, user_agent: Option<&str>) -> u64 {
        let fingerprint = self.hasher.hash_one((client_ip, user_agent));
        let max_fingerprints = self.max_fingerprints;
        self.sightings
            .upsert(token_id.to_string(), self.window, HashSet::new, |seen| {
                if seen.len() < max_fingerprints {
                    seen.insert(fingerprint);
                }
                seen.len().saturating_sub(1) as u64
            })
            .unwrap_or(0)
    }
}

/// Fingerprints worth keeping per token: one past the highest reuse tier.
pub fn fingerprint_cap(reuse_tiers: &[Tier]) -> usize {
    let highest = reuse_tiers.iter().map(|tier| tier.min).max().unwrap_or(0);
    usize::try_from(highest).unwrap_or(usize::MAX).saturating_add(1)
}

/// Both trackers, built from configuration.
pub struct SessionTracker {
    pub logins: LoginHistory,
    pub tokens: TokenSightings,
}

impl SessionTracker {
    /// `max_fingerprints` bounds the fingerprints kept per token id.
    pub fn new(config: &SessionConfig, max_fingerprints: usize) -> Self {
        Self {
            logins: LoginHistory::new(
                Duration::from_secs(config.login_ttl_seconds),
                config.max_entries,
            ),
            tokens: TokenSightings::new(
                Duration::from_secs(config.token_window_seconds),
                config.max_entries,
                max_fingerprints,
            ),
        }
    }

    /// Drop expired logins and sightings.
    pub fn cleanup(&self) {
        self.logins.logins.cleanup();
        self.tokens.sightings.cleanup();
    }
}
