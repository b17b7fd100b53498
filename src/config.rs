//! Configuration types for the Access Guard agent.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for the Access Guard agent.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Client IP extraction.
    #[serde(default)]
    pub ip_extraction: IpExtractionConfig,

    /// Headers carrying verified identity claims.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Headers carrying externally computed signals.
    #[serde(default)]
    pub signals: SignalHeaders,

    /// Role requirements by path prefix.
    #[serde(default)]
    pub routes: Vec<RoutePolicy>,

    /// Risk weight table.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Decision tier thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Behavioral counter backend.
    #[serde(default)]
    pub counters: CounterConfig,

    /// Login history and token sighting trackers.
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Step-up authentication.
    #[serde(default)]
    pub step_up: StepUpConfig,

    /// Audit sink.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Decision metrics.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Master enable/disable switch.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reject anonymous callers outright instead of scoring them.
    #[serde(default)]
    pub require_authentication: bool,

    /// Log denied requests.
    #[serde(default = "default_true")]
    pub log_denied: bool,

    /// Log allowed requests.
    #[serde(default)]
    pub log_allowed: bool,

    /// Paths that bypass evaluation entirely.
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            require_authentication: false,
            log_denied: true,
            log_allowed: false,
            exempt_paths: default_exempt_paths(),
        }
    }
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/login".to_string(),
        "/metrics".to_string(),
    ]
}

/// IP extraction configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpExtractionConfig {
    /// Headers to check for client IP, in order of preference.
    #[serde(default = "default_ip_headers")]
    pub headers: Vec<String>,

    /// Use first IP from X-Forwarded-For (true) or last IP (false).
    #[serde(default = "default_true")]
    pub use_first_ip: bool,
}

impl Default for IpExtractionConfig {
    fn default() -> Self {
        Self {
            headers: default_ip_headers(),
            use_first_ip: true,
        }
    }
}

fn default_ip_headers() -> Vec<String> {
    vec![
        "x-forwarded-for".to_string(),
        "x-real-ip".to_string(),
        "cf-connecting-ip".to_string(),
    ]
}

/// Headers forwarded by the gateway's authentication agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    #[serde(default = "default_subject_header")]
    pub subject_header: String,

    #[serde(default = "default_role_header")]
    pub role_header: String,

    /// Token issue time, unix seconds.
    #[serde(default = "default_issued_at_header")]
    pub issued_at_header: String,

    /// Token identifier (jti).
    #[serde(default = "default_token_id_header")]
    pub token_id_header: String,

    /// Role assigned to callers without identity claims.
    #[serde(default = "default_anonymous_role")]
    pub anonymous_role: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            subject_header: default_subject_header(),
            role_header: default_role_header(),
            issued_at_header: default_issued_at_header(),
            token_id_header: default_token_id_header(),
            anonymous_role: default_anonymous_role(),
        }
    }
}

fn default_subject_header() -> String {
    "x-auth-subject".to_string()
}

fn default_role_header() -> String {
    "x-auth-role".to_string()
}

fn default_issued_at_header() -> String {
    "x-auth-issued-at".to_string()
}

fn default_token_id_header() -> String {
    "x-auth-token-id".to_string()
}

fn default_anonymous_role() -> String {
    "anonymous".to_string()
}

/// Headers carrying caller-asserted and externally computed signals.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalHeaders {
    #[serde(default = "default_suspicious_header")]
    pub suspicious: String,

    #[serde(default = "default_ip_reputation_header")]
    pub ip_reputation: String,

    #[serde(default = "default_payload_anomaly_header")]
    pub payload_anomaly: String,

    #[serde(default = "default_device_posture_header")]
    pub device_posture: String,

    #[serde(default = "default_ml_anomaly_header")]
    pub ml_anomaly: String,

    #[serde(default = "default_user_agent_header")]
    pub user_agent: String,
}

impl Default for SignalHeaders {
    fn default() -> Self {
        Self {
            suspicious: default_suspicious_header(),
            ip_reputation: default_ip_reputation_header(),
            payload_anomaly: default_payload_anomaly_header(),
            device_posture: default_device_posture_header(),
            ml_anomaly: default_ml_anomaly_header(),
            user_agent: default_user_agent_header(),
        }
    }
}

fn default_suspicious_header() -> String {
    "x-suspicious".to_string()
}

fn default_ip_reputation_header() -> String {
    "x-ip-reputation".to_string()
}

fn default_payload_anomaly_header() -> String {
    "x-payload-anomaly".to_string()
}

fn default_device_posture_header() -> String {
    "x-device-posture".to_string()
}

fn default_ml_anomaly_header() -> String {
    "x-ml-anomaly".to_string()
}

fn default_user_agent_header() -> String {
    "user-agent".to_string()
}

/// Roles accepted for every endpoint under a path prefix.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoutePolicy {
    pub prefix: String,
    pub roles: Vec<String>,
}

impl RoutePolicy {
    /// Check if the endpoint falls under this policy's prefix.
    pub fn matches(&self, endpoint: &str) -> bool {
        let prefix = self.prefix.trim_end_matches('/');
        if prefix.is_empty() {
            return true;
        }
        endpoint == prefix
            || endpoint
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// Resolve the required roles for an endpoint using the longest matching prefix.
pub fn required_roles_for(routes: &[RoutePolicy], endpoint: &str) -> Vec<String> {
    routes
        .iter()
        .filter(|route| route.matches(endpoint))
        .max_by_key(|route| route.prefix.trim_end_matches('/').len())
        .map(|route| route.roles.clone())
        .unwrap_or_default()
}

/// One step of a tiered penalty: applies when the value is >= `min`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Tier {
    pub min: u64,
    pub weight: u32,
}

impl Tier {
    pub const fn new(min: u64, weight: u32) -> Self {
        Self { min, weight }
    }
}

/// Proportional penalty for a 0-100 external score: `min(value / divisor, cap)`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct ScaledSignal {
    pub divisor: u32,
    pub cap: u32,
}

impl ScaledSignal {
    pub const fn new(divisor: u32, cap: u32) -> Self {
        Self { divisor, cap }
    }
}

/// Token age penalties.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenAgeWeights {
    #[serde(default = "default_aging_seconds")]
    pub aging_seconds: u64,

    #[serde(default = "default_aging_weight")]
    pub aging_weight: u32,

    #[serde(default = "default_stale_seconds")]
    pub stale_seconds: u64,

    #[serde(default = "default_stale_weight")]
    pub stale_weight: u32,
}

impl Default for TokenAgeWeights {
    fn default() -> Self {
        Self {
            aging_seconds: default_aging_seconds(),
            aging_weight: default_aging_weight(),
            stale_seconds: default_stale_seconds(),
            stale_weight: default_stale_weight(),
        }
    }
}

fn default_aging_seconds() -> u64 {
    86_400
}

fn default_aging_weight() -> u32 {
    5
}

fn default_stale_seconds() -> u64 {
    7 * 86_400
}

fn default_stale_weight() -> u32 {
    10
}

/// Weights for the pluggable external scores.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExternalWeights {
    #[serde(default = "default_ip_reputation_weight")]
    pub ip_reputation: ScaledSignal,

    #[serde(default = "default_payload_anomaly_weight")]
    pub payload_anomaly: ScaledSignal,

    #[serde(default = "default_device_posture_weight")]
    pub device_posture: ScaledSignal,

    #[serde(default = "default_ml_anomaly_weight")]
    pub ml_anomaly: ScaledSignal,
}

impl Default for ExternalWeights {
    fn default() -> Self {
        Self {
            ip_reputation: default_ip_reputation_weight(),
            payload_anomaly: default_payload_anomaly_weight(),
            device_posture: default_device_posture_weight(),
            ml_anomaly: default_ml_anomaly_weight(),
        }
    }
}

fn default_ip_reputation_weight() -> ScaledSignal {
    ScaledSignal::new(5, 20)
}

fn default_payload_anomaly_weight() -> ScaledSignal {
    ScaledSignal::new(3, 30)
}

fn default_device_posture_weight() -> ScaledSignal {
    ScaledSignal::new(5, 20)
}

fn default_ml_anomaly_weight() -> ScaledSignal {
    ScaledSignal::new(2, 40)
}

/// Risk weight table. Every engine variant is this table with different values.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    /// Score every request starts from.
    #[serde(default = "default_base")]
    pub base: u32,

    #[serde(default = "default_role_mismatch")]
    pub role_mismatch: u32,

    /// Sensitivity for endpoints missing from `sensitivity`.
    #[serde(default = "default_sensitivity")]
    pub default_sensitivity: u32,

    #[serde(default = "default_sensitivity_map")]
    pub sensitivity: BTreeMap<String, u32>,

    #[serde(default = "default_request_tiers")]
    pub request_tiers: Vec<Tier>,

    #[serde(default = "default_failed_login_tiers")]
    pub failed_login_tiers: Vec<Tier>,

    #[serde(default = "default_token_reuse_tiers")]
    pub token_reuse_tiers: Vec<Tier>,

    #[serde(default = "default_ip_change")]
    pub ip_change: u32,

    #[serde(default = "default_user_agent_change")]
    pub user_agent_change: u32,

    #[serde(default = "default_suspicious")]
    pub suspicious: u32,

    #[serde(default)]
    pub token_age: TokenAgeWeights,

    #[serde(default)]
    pub external: ExternalWeights,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: default_base(),
            role_mismatch: default_role_mismatch(),
            default_sensitivity: default_sensitivity(),
            sensitivity: default_sensitivity_map(),
            request_tiers: default_request_tiers(),
            failed_login_tiers: default_failed_login_tiers(),
            token_reuse_tiers: default_token_reuse_tiers(),
            ip_change: default_ip_change(),
            user_agent_change: default_user_agent_change(),
            suspicious: default_suspicious(),
            token_age: TokenAgeWeights::default(),
            external: ExternalWeights::default(),
        }
    }
}

fn default_base() -> u32 {
    5
}

fn default_role_mismatch() -> u32 {
    40
}

fn default_sensitivity() -> u32 {
    10
}

fn default_sensitivity_map() -> BTreeMap<String, u32> {
    BTreeMap::from([
        ("/admin/logs".to_string(), 30),
        ("/admin/users".to_string(), 30),
        ("/admin/reports".to_string(), 30),
        ("/user/settings".to_string(), 10),
    ])
}

fn default_request_tiers() -> Vec<Tier> {
    vec![Tier::new(6, 10), Tier::new(21, 20), Tier::new(51, 30)]
}

fn default_failed_login_tiers() -> Vec<Tier> {
    vec![Tier::new(5, 15), Tier::new(10, 30), Tier::new(20, 45)]
}

fn default_token_reuse_tiers() -> Vec<Tier> {
    vec![Tier::new(1, 25), Tier::new(2, 40), Tier::new(3, 60)]
}

fn default_ip_change() -> u32 {
    15
}

fn default_user_agent_change() -> u32 {
    10
}

fn default_suspicious() -> u32 {
    20
}

/// Decision tier thresholds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct Thresholds {
    /// Allow if score is <= this value.
    #[serde(default = "default_allow_max")]
    pub allow_max: u8,

    /// Allow with logging if score is <= this value, deny above it.
    #[serde(default = "default_log_max")]
    pub log_max: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            allow_max: default_allow_max(),
            log_max: default_log_max(),
        }
    }
}

fn default_allow_max() -> u8 {
    30
}

fn default_log_max() -> u8 {
    60
}

/// Counter backend selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    /// Per-instance in-process map.
    #[default]
    Memory,
    /// Shared Redis store.
    Redis,
}

/// Behavioral counter configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CounterConfig {
    #[serde(default)]
    pub backend: CounterBackend,

    /// Redis URL (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Per-operation timeout in milliseconds.
    #[serde(default = "default_counter_timeout")]
    pub timeout_ms: u64,

    /// Startup connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Window for per-endpoint request counts.
    #[serde(default = "default_request_window")]
    pub request_window_seconds: u64,

    /// Window for failed login counts.
    #[serde(default = "default_failed_login_window")]
    pub failed_login_window_seconds: u64,

    /// Capacity of the in-process store.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            backend: CounterBackend::default(),
            redis_url: None,
            timeout_ms: default_counter_timeout(),
            connect_timeout_ms: default_connect_timeout(),
            request_window_seconds: default_request_window(),
            failed_login_window_seconds: default_failed_login_window(),
            max_entries: default_max_entries(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_counter_timeout() -> u64 {
    50
}

fn default_connect_timeout() -> u64 {
    1000
}

fn default_request_window() -> u64 {
    3600
}

fn default_failed_login_window() -> u64 {
    300
}

fn default_max_entries() -> usize {
    100_000
}

fn default_key_prefix() -> String {
    "accessguard".to_string()
}

/// In-process session trackers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// How long a known-good login is remembered.
    #[serde(default = "default_login_ttl")]
    pub login_ttl_seconds: u64,

    /// How long token sightings are remembered.
    #[serde(default = "default_token_window")]
    pub token_window_seconds: u64,

    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_ttl_seconds: default_login_ttl(),
            token_window_seconds: default_token_window(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_login_ttl() -> u64 {
    7 * 86_400
}

fn default_token_window() -> u64 {
    86_400
}

/// MFA challenge provider.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepUpProvider {
    /// Fixed answer.
    #[default]
    Static,
    /// HTTP challenge service.
    Webhook,
}

/// Step-up authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StepUpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Challenge allow_log decisions scoring above this value.
    #[serde(default = "default_step_up_above")]
    pub above_score: u8,

    #[serde(default)]
    pub provider: StepUpProvider,

    /// Answer returned by the static provider.
    #[serde(default = "default_true")]
    pub approve: bool,

    /// Challenge endpoint for the webhook provider.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Challenge timeout in milliseconds.
    #[serde(default = "default_step_up_timeout")]
    pub timeout_ms: u64,
}

impl Default for StepUpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            above_score: default_step_up_above(),
            provider: StepUpProvider::default(),
            approve: true,
            webhook_url: None,
            timeout_ms: default_step_up_timeout(),
        }
    }
}

fn default_step_up_above() -> u8 {
    40
}

fn default_step_up_timeout() -> u64 {
    3000
}

/// Audit sink selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Structured tracing events.
    #[default]
    Log,
    /// JSON lines appended to a file.
    File,
    /// Most recent `buffer` records kept in memory.
    Memory,
    /// Discarded.
    None,
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub sink: AuditSinkKind,

    /// Output path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Records buffered before the file sink reports backpressure, and records
    /// retained by the memory sink.
    #[serde(default = "default_audit_buffer")]
    pub buffer: usize,

    /// Failed logins at which a record is marked suspicious. Any token reuse
    /// marks it too.
    #[serde(default = "default_suspicious_failed_logins")]
    pub suspicious_failed_logins: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            sink: AuditSinkKind::default(),
            path: None,
            buffer: default_audit_buffer(),
            suspicious_failed_logins: default_suspicious_failed_logins(),
        }
    }
}

fn default_audit_buffer() -> usize {
    1024
}

fn default_suspicious_failed_logins() -> u64 {
    10
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.thresholds.allow_max >= self.thresholds.log_max {
            anyhow::bail!(
                "allow_max ({}) must be < log_max ({})",
                self.thresholds.allow_max,
                self.thresholds.log_max
            );
        }
        if self.thresholds.log_max > 100 {
            anyhow::bail!("log_max ({}) must be <= 100", self.thresholds.log_max);
        }

        validate_tiers("request_tiers", &self.scoring.request_tiers)?;
        validate_tiers("failed_login_tiers", &self.scoring.failed_login_tiers)?;
        validate_tiers("token_reuse_tiers", &self.scoring.token_reuse_tiers)?;

        let age = &self.scoring.token_age;
        if age.aging_seconds > age.stale_seconds || age.aging_weight > age.stale_weight {
            anyhow::bail!("token_age aging threshold and weight must not exceed stale ones");
        }

        let external = &self.scoring.external;
        for (name, signal) in [
            ("ip_reputation", external.ip_reputation),
            ("payload_anomaly", external.payload_anomaly),
            ("device_posture", external.device_posture),
            ("ml_anomaly", external.ml_anomaly),
        ] {
            if signal.divisor == 0 {
                anyhow::bail!("external.{} divisor must be > 0", name);
            }
        }

        if self.counters.backend == CounterBackend::Redis
            && self.counters.redis_url.as_deref().map_or(true, str::is_empty)
        {
            anyhow::bail!("Redis counter backend selected but redis_url is empty");
        }

        if self.step_up.enabled
            && (self.step_up.above_score < self.thresholds.allow_max
                || self.step_up.above_score >= self.thresholds.log_max)
        {
            anyhow::bail!(
                "step_up.above_score ({}) must be within [allow_max ({}), log_max ({}))",
                self.step_up.above_score,
                self.thresholds.allow_max,
                self.thresholds.log_max
            );
        }

        if self.step_up.enabled
            && self.step_up.provider == StepUpProvider::Webhook
            && self.step_up.webhook_url.as_deref().map_or(true, str::is_empty)
        {
            anyhow::bail!("Webhook step-up provider selected but webhook_url is empty");
        }

        if self.audit.sink == AuditSinkKind::File && self.audit.path.is_none() {
            anyhow::bail!("File audit sink selected but path is not set");
        }

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                anyhow::bail!("Route prefix must start with '/': {}", route.prefix);
            }
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Access Guard Agent Configuration

settings:
  enabled: true
  require_authentication: false   # reject anonymous callers with 401
  log_denied: true
  log_allowed: false
  exempt_paths:
    - "/health"
    - "/login"
    - "/metrics"

# IP extraction from request headers
ip_extraction:
  headers:
    - "x-forwarded-for"
    - "x-real-ip"
    - "cf-connecting-ip"
  use_first_ip: true

# Identity claims forwarded by the authentication agent
identity:
  subject_header: "x-auth-subject"
  role_header: "x-auth-role"
  issued_at_header: "x-auth-issued-at"   # unix seconds
  token_id_header: "x-auth-token-id"     # jti
  anonymous_role: "anonymous"

# Externally computed signals (0-100)
signals:
  suspicious: "x-suspicious"
  ip_reputation: "x-ip-reputation"
  payload_anomaly: "x-payload-anomaly"
  device_posture: "x-device-posture"
  ml_anomaly: "x-ml-anomaly"
  user_agent: "user-agent"

# Required roles by path prefix (longest prefix wins)
routes:
  - prefix: "/admin"
    roles: ["admin"]
  - prefix: "/user"
    roles: ["user", "admin"]

# Risk weight table
scoring:
  base: 5
  role_mismatch: 40
  default_sensitivity: 10        # unlisted endpoints are never weight 0
  sensitivity:
    "/admin/logs": 30
    "/admin/users": 30
    "/admin/reports": 30
    "/user/settings": 10
  request_tiers:                 # applies when count >= min
    - { min: 6, weight: 10 }
    - { min: 21, weight: 20 }
    - { min: 51, weight: 30 }
  failed_login_tiers:
    - { min: 5, weight: 15 }
    - { min: 10, weight: 30 }
    - { min: 20, weight: 45 }
  token_reuse_tiers:
    - { min: 1, weight: 25 }
    - { min: 2, weight: 40 }
    - { min: 3, weight: 60 }
  ip_change: 15
  user_agent_change: 10
  suspicious: 20
  token_age:
    aging_seconds: 86400
    aging_weight: 5
    stale_seconds: 604800
    stale_weight: 10
  external:
    ip_reputation: { divisor: 5, cap: 20 }
    payload_anomaly: { divisor: 3, cap: 30 }
    device_posture: { divisor: 5, cap: 20 }
    ml_anomaly: { divisor: 2, cap: 40 }

# Decision tiers: score <= allow_max allows, <= log_max logs, above denies
thresholds:
  allow_max: 30
  log_max: 60

# Behavioral counters
counters:
  backend: memory                # memory or redis
  redis_url: "${ACCESS_GUARD_REDIS_URL}"
  timeout_ms: 50
  connect_timeout_ms: 1000
  request_window_seconds: 3600
  failed_login_window_seconds: 300
  max_entries: 100000
  key_prefix: "accessguard"

# Login history and token sightings (per instance)
sessions:
  login_ttl_seconds: 604800
  token_window_seconds: 86400
  max_entries: 100000

# Step-up authentication for medium-high risk
step_up:
  enabled: true
  above_score: 40
  provider: static               # static or webhook
  approve: true
  webhook_url: "https://mfa.internal/challenge"
  timeout_ms: 3000

# Audit records
audit:
  sink: log                      # log, file, memory or none
  path: "/var/log/zentinel/access-guard.jsonl"
  buffer: 1024
  suspicious_failed_logins: 10   # token reuse also marks a record suspicious

metrics:
  enabled: true
"#
        .to_string()
    }
}

fn validate_tiers(name: &str, tiers: &[Tier]) -> anyhow::Result<()> {
    for pair in tiers.windows(2) {
        if pair[1].min <= pair[0].min {
            anyhow::bail!("{} thresholds must be strictly ascending", name);
        }
        if pair[1].weight < pair[0].weight {
            anyhow::bail!("{} weights must not decrease", name);
        }
    }
    Ok(())
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> anyhow::Result<String> {
    let mut result = content.to_string();
    let re = Regex::new(r"\$\{([^}]+)\}")?;

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        let var_value = std::env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    Ok(result)
}
