//! Request metadata in, request context out.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subject id used when no identity claims are present.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Inbound request as handed over by the gateway.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub method: String,

    /// Raw request path, may include a query string.
    pub path: String,

    /// Multi-value headers, any case.
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,

    /// Peer address as seen by the gateway.
    #[serde(default)]
    pub client_ip: Option<String>,

    /// Roles the route requires. Empty defers to the configured route table.
    #[serde(default)]
    pub required_roles: Vec<String>,
}

impl RequestMetadata {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Add a header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .entry(name.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    pub fn with_required_roles(mut self, roles: &[&str]) -> Self {
        self.required_roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }
}

/// Outcome of an authentication attempt, reported by the login endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginAttempt {
    pub subject_id: String,
    pub success: bool,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

/// Verified identity claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject_id: String,
    pub role: String,
    /// Unix seconds.
    pub issued_at: Option<i64>,
    /// Token identifier (jti).
    pub token_id: Option<String>,
    pub anonymous: bool,
}

impl Identity {
    /// Identity for callers without usable claims.
    pub fn anonymous(role: &str) -> Self {
        Self {
            subject_id: ANONYMOUS_SUBJECT.to_string(),
            role: role.to_string(),
            issued_at: None,
            token_id: None,
            anonymous: true,
        }
    }

    /// Token age relative to `now` (unix seconds). Future timestamps count as fresh.
    pub fn token_age_seconds(&self, now: i64) -> u64 {
        self.issued_at
            .map(|iat| now.saturating_sub(iat).max(0) as u64)
            .unwrap_or(0)
    }
}

/// Normalize a request path for exempt matching, sensitivity lookup and counter keys.
///
/// Drops query string and fragment, collapses repeated slashes and resolves
/// `.` and `..` segments (plain or percent-encoded). `..` never climbs above `/`.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split(&['?', '#'][..]).next().unwrap_or_default();

    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match dot_segment(segment) {
            Some(DotSegment::Current) => {}
            Some(DotSegment::Parent) => {
                segments.pop();
            }
            None if segment.is_empty() => {}
            None => segments.push(segment),
        }
    }

    format!("/{}", segments.join("/"))
}

enum DotSegment {
    Current,
    Parent,
}

fn dot_segment(segment: &str) -> Option<DotSegment> {
    match segment.to_ascii_lowercase().as_str() {
        "." | "%2e" => Some(DotSegment::Current),
        ".." | "%2e%2e" | ".%2e" | "%2e." => Some(DotSegment::Parent),
        _ => None,
    }
}

/// Clamp a raw signal to the 0-100 score domain.
pub fn clamp_score(raw: i64) -> u8 {
    raw.clamp(0, 100) as u8
}

/// Everything the scorer looks at for one request.
///
/// Fields are private so a context cannot change after the collector builds it.
/// Signals that are not set stay at their benign default (0 / false).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    subject_id: String,
    subject_role: String,
    required_roles: Vec<String>,
    endpoint: String,
    request_count: u64,
    failed_login_count: u64,
    token_age_seconds: u64,
    token_reuse_count: u64,
    ip_changed: bool,
    user_agent_changed: bool,
    suspicious_flag: bool,
    ip_reputation: u8,
    payload_anomaly_score: u8,
    device_posture_score: u8,
    ml_anomaly_score: u8,
}

impl RequestContext {
    /// Context with every behavioral and external signal at its benign default.
    pub fn new(subject_id: &str, subject_role: &str, endpoint: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            subject_role: subject_role.to_string(),
            required_roles: Vec::new(),
            endpoint: endpoint.to_string(),
            request_count: 0,
            failed_login_count: 0,
            token_age_seconds: 0,
            token_reuse_count: 0,
            ip_changed: false,
            user_agent_changed: false,
            suspicious_flag: false,
            ip_reputation: 0,
            payload_anomaly_score: 0,
            device_posture_score: 0,
            ml_anomaly_score: 0,
        }
    }

    pub fn with_required_roles<S: AsRef<str>>(mut self, roles: &[S]) -> Self {
        self.required_roles = roles.iter().map(|r| r.as_ref().to_string()).collect();
        self
    }

    pub fn with_request_count(mut self, count: u64) -> Self {
        self.request_count = count;
        self
    }

    pub fn with_failed_login_count(mut self, count: u64) -> Self {
        self.failed_login_count = count;
        self
    }

    pub fn with_token_age_seconds(mut self, seconds: u64) -> Self {
        self.token_age_seconds = seconds;
        self
    }

    pub fn with_token_reuse_count(mut self, count: u64) -> Self {
        self.token_reuse_count = count;
        self
    }

    pub fn with_ip_changed(mut self, changed: bool) -> Self {
        self.ip_changed = changed;
        self
    }

    pub fn with_user_agent_changed(mut self, changed: bool) -> Self {
        self.user_agent_changed = changed;
        self
    }

    pub fn with_suspicious(mut self, suspicious: bool) -> Self {
        self.suspicious_flag = suspicious;
        self
    }

    /// Raw values are clamped to 0-100.
    pub fn with_ip_reputation(mut self, raw: i64) -> Self {
        self.ip_reputation = clamp_score(raw);
        self
    }

    pub fn with_payload_anomaly(mut self, raw: i64) -> Self {
        self.payload_anomaly_score = clamp_score(raw);
        self
    }

    pub fn with_device_posture(mut self, raw: i64) -> Self {
        self.device_posture_score = clamp_score(raw);
        self
    }

    pub fn with_ml_anomaly(mut self, raw: i64) -> Self {
        self.ml_anomaly_score = clamp_score(raw);
        self
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn subject_role(&self) -> &str {
        &self.subject_role
    }

    pub fn required_roles(&self) -> &[String] {
        &self.required_roles
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    pub fn failed_login_count(&self) -> u64 {
        self.failed_login_count
    }

    pub fn token_age_seconds(&self) -> u64 {
        self.token_age_seconds
    }

    pub fn token_reuse_count(&self) -> u64 {
        self.token_reuse_count
    }

    pub fn ip_changed(&self) -> bool {
        self.ip_changed
    }

    pub fn user_agent_changed(&self) -> bool {
        self.user_agent_changed
    }

    pub fn suspicious(&self) -> bool {
        self.suspicious_flag
    }

    pub fn ip_reputation(&self) -> u8 {
        self.ip_reputation
    }

    pub fn payload_anomaly_score(&self) -> u8 {
        self.payload_anomaly_score
    }

    pub fn device_posture_score(&self) -> u8 {
        self.device_posture_score
    }

    pub fn ml_anomaly_score(&self) -> u8 {
        self.ml_anomaly_score
    }
}
