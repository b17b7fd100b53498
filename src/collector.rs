//! Signal collection.
//!
//! Turns an inbound request into a [`RequestContext`]. Nothing here fails: a
//! signal that cannot be read falls back to its benign default.

use crate::config::{required_roles_for, Config, IdentityConfig, IpExtractionConfig, RoutePolicy, SignalHeaders};
use crate::context::{clamp_score, normalize_endpoint, Identity, RequestContext, RequestMetadata};
use crate::counters::BehavioralCounters;
use crate::session::SessionTracker;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// Source of verified identity claims.
pub trait IdentityVerifier: Send + Sync {
    /// Claims for the request, or `None` when absent or invalid.
    fn verify(&self, headers: &HashMap<String, String>) -> Option<Identity>;
}

/// Reads claims that the gateway's authentication agent already verified and
/// forwarded as headers.
pub struct HeaderIdentityVerifier {
    config: IdentityConfig,
}

impl HeaderIdentityVerifier {
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }
}

impl IdentityVerifier for HeaderIdentityVerifier {
    fn verify(&self, headers: &HashMap<String, String>) -> Option<Identity> {
        let subject = header(headers, &self.config.subject_header)?;

        let role = header(headers, &self.config.role_header)
            .unwrap_or(&self.config.anonymous_role)
            .to_string();

        let issued_at = header(headers, &self.config.issued_at_header)
            .and_then(|value| value.parse::<i64>().ok());

        let token_id = header(headers, &self.config.token_id_header).map(str::to_string);

        Some(Identity {
            subject_id: subject.to_string(),
            role,
            issued_at,
            token_id,
            anonymous: false,
        })
    }
}

/// Non-empty, trimmed header value.
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .get(&name.to_lowercase())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// Request facts known before any counter is consulted.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub identity: Identity,
    pub endpoint: String,
    pub required_roles: Vec<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    /// Lowercased, single-valued headers.
    pub headers: HashMap<String, String>,
}

/// Counts produced by recording the current request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// Requests by this subject to this endpoint in the window, this one included.
    pub request_count: u64,
    /// Distinct fingerprints for the presented token id, minus one.
    pub token_reuse_count: u64,
}

/// Builds request contexts from request metadata, counters and session state.
pub struct SignalCollector {
    verifier: Arc<dyn IdentityVerifier>,
    counters: Arc<BehavioralCounters>,
    sessions: Arc<SessionTracker>,
    ip_extraction: IpExtractionConfig,
    signals: SignalHeaders,
    routes: Vec<RoutePolicy>,
    anonymous_role: String,
}

impl SignalCollector {
    pub fn new(
        config: &Config,
        verifier: Arc<dyn IdentityVerifier>,
        counters: Arc<BehavioralCounters>,
        sessions: Arc<SessionTracker>,
    ) -> Self {
        Self {
            verifier,
            counters,
            sessions,
            ip_extraction: config.ip_extraction.clone(),
            signals: config.signals.clone(),
            routes: config.routes.clone(),
            anonymous_role: config.identity.anonymous_role.clone(),
        }
    }

    /// Parse identity, endpoint and client fingerprint.
    pub fn inspect(&self, request: &RequestMetadata) -> RequestFacts {
        let headers = flatten_headers(&request.headers);

        let identity = self.verifier.verify(&headers).unwrap_or_else(|| {
            debug!("No identity claims, treating caller as anonymous");
            Identity::anonymous(&self.anonymous_role)
        });

        let endpoint = normalize_endpoint(&request.path);

        let required_roles = if request.required_roles.is_empty() {
            required_roles_for(&self.routes, &endpoint)
        } else {
            request.required_roles.clone()
        };

        let client_ip = request
            .client_ip
            .as_deref()
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
            .or_else(|| extract_client_ip(&headers, &self.ip_extraction))
            .map(|ip| ip.to_string());

        let user_agent = header(&headers, &self.signals.user_agent).map(str::to_string);

        RequestFacts {
            identity,
            endpoint,
            required_roles,
            client_ip,
            user_agent,
            headers,
        }
    }

    /// Count the request and record its token sighting.
    ///
    /// Runs before [`collect`](Self::collect) so the current request is part of
    /// its own counts. Anonymous callers have no token to track.
    pub async fn observe(&self, facts: &RequestFacts) -> Observation {
        let identity = &facts.identity;
        let request_count = self
            .counters
            .record_request(&identity.subject_id, &facts.endpoint)
            .await;

        let token_reuse_count = match (identity.anonymous, identity.token_id.as_deref()) {
            (false, Some(jti)) => self.sessions.tokens.record(
                jti,
                facts.client_ip.as_deref(),
                facts.user_agent.as_deref(),
            ),
            _ => 0,
        };

        Observation {
            request_count,
            token_reuse_count,
        }
    }

    /// Build the full context. `now` is unix seconds.
    pub async fn collect(
        &self,
        facts: &RequestFacts,
        observed: Observation,
        now: i64,
    ) -> RequestContext {
        let identity = &facts.identity;

        let failed_login_count = self.counters.failed_login_count(&identity.subject_id).await;

        let continuity = self.sessions.logins.continuity(
            &identity.subject_id,
            facts.client_ip.as_deref(),
            facts.user_agent.as_deref(),
        );

        let headers = &facts.headers;
        let signal = |name: &str| parse_signal(header(headers, name));

        RequestContext::new(&identity.subject_id, &identity.role, &facts.endpoint)
            .with_required_roles(&facts.required_roles)
            .with_request_count(observed.request_count)
            .with_failed_login_count(failed_login_count)
            .with_token_age_seconds(identity.token_age_seconds(now))
            .with_token_reuse_count(observed.token_reuse_count)
            .with_ip_changed(continuity.ip_changed)
            .with_user_agent_changed(continuity.user_agent_changed)
            .with_suspicious(parse_flag(header(headers, &self.signals.suspicious)))
            .with_ip_reputation(signal(&self.signals.ip_reputation))
            .with_payload_anomaly(signal(&self.signals.payload_anomaly))
            .with_device_posture(signal(&self.signals.device_posture))
            .with_ml_anomaly(signal(&self.signals.ml_anomaly))
    }
}

/// Parse a header-asserted 0-100 score. Garbage reads as 0.
pub fn parse_signal(value: Option<&str>) -> i64 {
    let Some(value) = value else {
        return 0;
    };

    let raw = value
        .parse::<i64>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().map(|f| f as i64))
        .unwrap_or(0);

    i64::from(clamp_score(raw))
}

/// Parse a header-asserted boolean flag.
pub fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        let v = v.to_ascii_lowercase();
        v == "1" || v == "true" || v == "yes"
    })
}

/// Extract client IP from request headers.
pub fn extract_client_ip(
    headers: &HashMap<String, String>,
    config: &IpExtractionConfig,
) -> Option<IpAddr> {
    for header_name in &config.headers {
        let header_lower = header_name.to_lowercase();
        if let Some(value) = headers.get(&header_lower) {
            let ip_str = if config.use_first_ip {
                // X-Forwarded-For: client, proxy1, proxy2
                value.split(',').next()?.trim()
            } else {
                value.split(',').last()?.trim()
            };

            if let Ok(ip) = ip_str.parse() {
                return Some(ip);
            }
        }
    }
    None
}

/// Flatten multi-value headers to single values.
pub fn flatten_headers(headers: &HashMap<String, Vec<String>>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.first().cloned().unwrap_or_default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CounterConfig;
    use crate::counters::LocalCounterStore;

    fn collector_with(config: &Config) -> (SignalCollector, Arc<BehavioralCounters>, Arc<SessionTracker>) {
        let counters = Arc::new(BehavioralCounters::new(
            Arc::new(LocalCounterStore::new(1000)),
            &CounterConfig::default(),
        ));
        let sessions = Arc::new(SessionTracker::new(&config.sessions, 4));
        let verifier = Arc::new(HeaderIdentityVerifier::new(config.identity.clone()));
        let collector = SignalCollector::new(config, verifier, counters.clone(), sessions.clone());
        (collector, counters, sessions)
    }

    fn alice(path: &str) -> RequestMetadata {
        RequestMetadata::new("GET", path)
            .with_header("X-Auth-Subject", "alice")
            .with_header("X-Auth-Role", "user")
            .with_header("User-Agent", "Firefox")
            .with_client_ip("10.0.0.7")
    }

    #[test]
    fn test_header_identity() {
        let verifier = HeaderIdentityVerifier::new(IdentityConfig::default());
        let mut headers = HashMap::new();
        headers.insert("x-auth-subject".to_string(), "alice".to_string());
        headers.insert("x-auth-role".to_string(), "admin".to_string());
        headers.insert("x-auth-issued-at".to_string(), "1700000000".to_string());
        headers.insert("x-auth-token-id".to_string(), "jti-1".to_string());

        let identity = verifier.verify(&headers).unwrap();
        assert_eq!(identity.subject_id, "alice");
        assert_eq!(identity.role, "admin");
        assert_eq!(identity.issued_at, Some(1_700_000_000));
        assert_eq!(identity.token_id.as_deref(), Some("jti-1"));
        assert!(!identity.anonymous);
    }

    #[test]
    fn test_header_identity_absent_or_malformed() {
        let verifier = HeaderIdentityVerifier::new(IdentityConfig::default());

        assert!(verifier.verify(&HashMap::new()).is_none());

        let mut blank = HashMap::new();
        blank.insert("x-auth-subject".to_string(), "   ".to_string());
        assert!(verifier.verify(&blank).is_none());

        let mut bad_iat = HashMap::new();
        bad_iat.insert("x-auth-subject".to_string(), "alice".to_string());
        bad_iat.insert("x-auth-issued-at".to_string(), "yesterday".to_string());
        let identity = verifier.verify(&bad_iat).unwrap();
        assert_eq!(identity.issued_at, None);
        assert_eq!(identity.role, "anonymous");
    }

    #[test]
    fn test_inspect_anonymous() {
        let (collector, _, _) = collector_with(&Config::default());
        let facts = collector.inspect(&RequestMetadata::new("GET", "/users/"));

        assert!(facts.identity.anonymous);
        assert_eq!(facts.identity.subject_id, "anonymous");
        assert_eq!(facts.identity.role, "anonymous");
        assert_eq!(facts.endpoint, "/users");
        assert!(facts.client_ip.is_none());
    }

    #[test]
    fn test_inspect_required_roles() {
        let mut config = Config::default();
        config.routes = vec![RoutePolicy {
            prefix: "/admin".to_string(),
            roles: vec!["admin".to_string()],
        }];
        let (collector, _, _) = collector_with(&config);

        let facts = collector.inspect(&alice("/admin/logs"));
        assert_eq!(facts.required_roles, vec!["admin"]);

        let explicit = alice("/admin/logs").with_required_roles(&["auditor"]);
        assert_eq!(collector.inspect(&explicit).required_roles, vec!["auditor"]);

        assert!(collector.inspect(&alice("/users")).required_roles.is_empty());
    }

    #[test]
    fn test_inspect_normalizes_endpoint() {
        let mut config = Config::default();
        config.routes = vec![RoutePolicy {
            prefix: "/admin".to_string(),
            roles: vec!["admin".to_string()],
        }];
        let (collector, _, _) = collector_with(&config);

        for path in ["/login/../admin/users", "/admin//users", "/./admin/users/"] {
            let facts = collector.inspect(&alice(path));
            assert_eq!(facts.endpoint, "/admin/users", "{}", path);
            assert_eq!(facts.required_roles, vec!["admin"], "{}", path);
        }
    }

    #[test]
    fn test_inspect_client_ip_fallback() {
        let (collector, _, _) = collector_with(&Config::default());

        let request = RequestMetadata::new("GET", "/users")
            .with_header("X-Forwarded-For", "203.0.113.9, 10.0.0.1");
        assert_eq!(
            collector.inspect(&request).client_ip.as_deref(),
            Some("203.0.113.9")
        );

        let garbage_peer = request.clone().with_client_ip("not-an-ip");
        assert_eq!(
            collector.inspect(&garbage_peer).client_ip.as_deref(),
            Some("203.0.113.9")
        );
    }

    #[tokio::test]
    async fn test_collect_benign_defaults() {
        let (collector, _, _) = collector_with(&Config::default());
        let facts = collector.inspect(&alice("/users"));
        let ctx = collector.collect(&facts, Observation::default(), 0).await;

        assert_eq!(ctx, RequestContext::new("alice", "user", "/users"));
    }

    #[tokio::test]
    async fn test_observe_counts_request_and_token() {
        let (collector, _, _) = collector_with(&Config::default());
        let request = alice("/users").with_header("X-Auth-Token-Id", "jti-9");

        let first = collector.observe(&collector.inspect(&request)).await;
        assert_eq!(
            first,
            Observation {
                request_count: 1,
                token_reuse_count: 0,
            }
        );

        let moved = request.clone().with_client_ip("198.51.100.4");
        let second = collector.observe(&collector.inspect(&moved)).await;
        assert_eq!(second.request_count, 2);
        assert_eq!(second.token_reuse_count, 1);
    }

    #[tokio::test]
    async fn test_observe_ignores_anonymous_tokens() {
        let (collector, _, sessions) = collector_with(&Config::default());
        let request = RequestMetadata::new("GET", "/users").with_header("X-Auth-Token-Id", "jti-9");

        let observed = collector.observe(&collector.inspect(&request)).await;
        assert_eq!(observed.token_reuse_count, 0);
        assert_eq!(sessions.tokens.record("jti-9", None, None), 0);
    }

    #[tokio::test]
    async fn test_collect_reads_counters_and_sessions() {
        let (collector, counters, sessions) = collector_with(&Config::default());

        for _ in 0..6 {
            counters.record_failed_login("alice").await;
        }
        sessions.logins.remember("alice", Some("192.0.2.1"), Some("Firefox"));

        let request = alice("/users").with_header("X-Auth-Issued-At", "1000");
        let facts = collector.inspect(&request);
        let observed = Observation {
            request_count: 3,
            token_reuse_count: 1,
        };
        let ctx = collector.collect(&facts, observed, 4_600).await;

        assert_eq!(ctx.request_count(), 3);
        assert_eq!(ctx.failed_login_count(), 6);
        assert!(ctx.ip_changed());
        assert!(!ctx.user_agent_changed());
        assert_eq!(ctx.token_reuse_count(), 1);
        assert_eq!(ctx.token_age_seconds(), 3_600);
    }

    #[tokio::test]
    async fn test_collect_header_signals() {
        let (collector, _, _) = collector_with(&Config::default());
        let request = alice("/users")
            .with_header("X-Suspicious", "1")
            .with_header("X-Ip-Reputation", "250")
            .with_header("X-Payload-Anomaly", "-20")
            .with_header("X-Device-Posture", "37.9")
            .with_header("X-Ml-Anomaly", "lots");

        let facts = collector.inspect(&request);
        let ctx = collector.collect(&facts, Observation::default(), 0).await;

        assert!(ctx.suspicious());
        assert_eq!(ctx.ip_reputation(), 100);
        assert_eq!(ctx.payload_anomaly_score(), 0);
        assert_eq!(ctx.device_posture_score(), 37);
        assert_eq!(ctx.ml_anomaly_score(), 0);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("TRUE")));
        assert!(parse_flag(Some("yes")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(None));
    }

    #[test]
    fn test_extract_client_ip_xff() {
        let config = IpExtractionConfig {
            headers: vec!["x-forwarded-for".to_string()],
            use_first_ip: true,
        };

        let mut headers = HashMap::new();
        headers.insert(
            "x-forwarded-for".to_string(),
            "1.2.3.4, 5.6.7.8, 9.10.11.12".to_string(),
        );

        assert_eq!(
            extract_client_ip(&headers, &config),
            Some("1.2.3.4".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_client_ip_xff_last() {
        let config = IpExtractionConfig {
            headers: vec!["x-forwarded-for".to_string()],
            use_first_ip: false,
        };

        let mut headers = HashMap::new();
        headers.insert(
            "x-forwarded-for".to_string(),
            "1.2.3.4, 5.6.7.8, 9.10.11.12".to_string(),
        );

        assert_eq!(
            extract_client_ip(&headers, &config),
            Some("9.10.11.12".parse().unwrap())
        );
    }

    #[test]
    fn test_extract_client_ip_priority() {
        let config = IpExtractionConfig::default();

        let mut headers = HashMap::new();
        headers.insert("x-forwarded-for".to_string(), "1.2.3.4".to_string());
        headers.insert("x-real-ip".to_string(), "5.6.7.8".to_string());

        assert_eq!(
            extract_client_ip(&headers, &config),
            Some("1.2.3.4".parse().unwrap())
        );
        assert!(extract_client_ip(&HashMap::new(), &config).is_none());
    }

    #[test]
    fn test_flatten_headers() {
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            vec!["application/json".to_string()],
        );
        headers.insert(
            "X-Test".to_string(),
            vec!["value1".to_string(), "value2".to_string()],
        );

        let flat = flatten_headers(&headers);
        assert_eq!(flat.get("content-type"), Some(&"application/json".to_string()));
        assert_eq!(flat.get("x-test"), Some(&"value1".to_string()));
    }
}
