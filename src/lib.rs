//! Access Guard Agent for Zentinel.
//!
//! Scores every request for risk from identity claims, behavioral counters and
//! externally computed signals, then allows it, allows it with audit
//! annotations, or denies it.
//!
//! # Features
//!
//! - **Additive Risk Scoring** - Configurable weight table, clamped to 0-100, with itemized reasons
//! - **Behavioral Counters** - Per-subject request and failed-login counts in Redis or in process
//! - **Session Continuity** - IP and user agent change since the last good login
//! - **Token Reuse Detection** - Same token id seen from several client fingerprints
//! - **Step-Up Authentication** - MFA challenge for medium-high risk, denial on failure
//! - **Audit Trail** - Every decision with score and reasons, never shown to the caller
//! - **Prometheus Metrics** - Decision counts and risk score distribution
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   enabled: true
//!   exempt_paths: ["/health", "/login", "/metrics"]
//!
//! routes:
//!   - prefix: "/admin"
//!     roles: ["admin"]
//!
//! thresholds:
//!   allow_max: 30
//!   log_max: 60
//!
//! counters:
//!   backend: redis
//!   redis_url: "${REDIS_URL}"
//!
//! step_up:
//!   provider: webhook
//!   webhook_url: "https://mfa.internal/challenge"
//! ```

pub mod agent;
pub mod audit;
pub mod cache;
pub mod collector;
pub mod config;
pub mod context;
pub mod counters;
pub mod decision;
pub mod metrics;
pub mod protocol;
pub mod scorer;
pub mod session;
pub mod step_up;

pub use agent::{AccessGuardAgent, AgentParts, ClientResponse, EnforcementOutcome, Outcome};
pub use config::Config;
pub use context::{LoginAttempt, RequestContext, RequestMetadata};
pub use decision::{decide, Decision, DecisionLabel};
pub use scorer::{RiskResult, RiskScorer};
