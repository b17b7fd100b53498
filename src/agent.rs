//! Access Guard agent implementation.

use crate::audit::{build_sink, AuditMetadata, AuditRecord, AuditSink, MemoryAuditSink};
use crate::collector::{HeaderIdentityVerifier, IdentityVerifier, RequestFacts, SignalCollector};
use crate::context::RequestContext;
use crate::config::Config;
use crate::context::{LoginAttempt, RequestMetadata};
use crate::counters::{BehavioralCounters, LocalCounterStore};
use crate::decision::{decide, DecisionLabel};
use crate::metrics::{MetricsSink, NoopMetrics, PrometheusMetrics};
use crate::scorer::{RiskResult, RiskScorer};
use crate::session::{fingerprint_cap, SessionTracker};
use crate::step_up::{MfaChallenger, StaticChallenger, StepUpGate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Header carrying the risk score on `allow_log` requests.
pub const RISK_HEADER: &str = "x-accessguard-risk";
/// Header carrying the decision tier on `allow_log` requests.
pub const DECISION_HEADER: &str = "x-accessguard-decision";
/// Body of every rejection.
pub const DENIED_BODY: &str = "Access denied";

/// Pipeline stage, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collecting,
    Scoring,
    Deciding,
    StepUp,
    Enforcing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Collecting => "collecting",
            Stage::Scoring => "scoring",
            Stage::Deciding => "deciding",
            Stage::StepUp => "step_up",
            Stage::Enforcing => "enforcing",
        })
    }
}

/// Terminal outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Deny,
}

/// What the gateway should do with a request.
///
/// Holds score and reasons for the gateway. Use [`client_response`](Self::client_response)
/// for what the caller may see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnforcementOutcome {
    pub outcome: Outcome,
    /// Rejection status, set on deny.
    pub status: Option<u16>,
    pub decision: DecisionLabel,
    pub risk_score: u8,
    pub reasons: Vec<String>,
    /// Annotations added to the allowed request and its response.
    pub headers: Vec<(String, String)>,
    pub tags: Vec<String>,
}

impl EnforcementOutcome {
    pub fn allow(decision: DecisionLabel, risk_score: u8) -> Self {
        Self {
            outcome: Outcome::Allow,
            status: None,
            decision,
            risk_score,
            reasons: Vec::new(),
            headers: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn deny(status: u16, decision: DecisionLabel, risk_score: u8) -> Self {
        Self {
            outcome: Outcome::Deny,
            status: Some(status),
            decision,
            risk_score,
            reasons: Vec::new(),
            headers: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    /// Caller-visible view. Rejections never carry score or reasons.
    pub fn client_response(&self) -> ClientResponse {
        match self.outcome {
            Outcome::Allow => ClientResponse::Proceed {
                headers: self.headers.clone(),
            },
            Outcome::Deny => ClientResponse::Reject {
                status: self.status.unwrap_or(403),
                body: DENIED_BODY.to_string(),
            },
        }
    }
}

/// Caller-visible result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientResponse {
    Proceed { headers: Vec<(String, String)> },
    Reject { status: u16, body: String },
}

/// Collaborators the agent is assembled from.
pub struct AgentParts {
    pub verifier: Arc<dyn IdentityVerifier>,
    pub counters: Arc<BehavioralCounters>,
    pub challenger: Arc<dyn MfaChallenger>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl AgentParts {
    /// In-process parts: header identities, local counters, static challenger,
    /// memory audit, no metrics.
    pub fn local(config: &Config) -> Self {
        Self {
            verifier: Arc::new(HeaderIdentityVerifier::new(config.identity.clone())),
            counters: Arc::new(BehavioralCounters::new(
                Arc::new(LocalCounterStore::new(config.counters.max_entries)),
                &config.counters,
            )),
            challenger: Arc::new(StaticChallenger::new(config.step_up.approve)),
            audit: Arc::new(MemoryAuditSink::new()),
            metrics: Arc::new(NoopMetrics),
        }
    }
}

/// Access Guard agent.
pub struct AccessGuardAgent {
    config: Arc<Config>,
    collector: SignalCollector,
    scorer: RiskScorer,
    step_up: StepUpGate,
    counters: Arc<BehavioralCounters>,
    sessions: Arc<SessionTracker>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
    prometheus: Option<Arc<PrometheusMetrics>>,
}

impl AccessGuardAgent {
    /// Create a new Access Guard agent from configuration.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let counters = Arc::new(BehavioralCounters::from_config(&config.counters).await);
        let step_up = StepUpGate::from_config(&config.step_up)?;
        let audit = build_sink(&config.audit)?;

        let prometheus = if config.metrics.enabled {
            Some(Arc::new(PrometheusMetrics::new()?))
        } else {
            None
        };
        let metrics: Arc<dyn MetricsSink> = match &prometheus {
            Some(p) => Arc::clone(p) as Arc<dyn MetricsSink>,
            None => Arc::new(NoopMetrics),
        };

        info!(
            counters = counters.backend(),
            step_up = step_up.provider(),
            audit = audit.name(),
            metrics = config.metrics.enabled,
            routes = config.routes.len(),
            "Access Guard agent initialized"
        );

        let verifier = Arc::new(HeaderIdentityVerifier::new(config.identity.clone()));
        let mut agent = Self::assemble(config, verifier, counters, step_up, audit, metrics);
        agent.prometheus = prometheus;
        Ok(agent)
    }

    /// Assemble an agent from explicit collaborators.
    pub fn with_parts(config: Config, parts: AgentParts) -> Self {
        let step_up = StepUpGate::new(parts.challenger, &config.step_up);
        Self::assemble(
            config,
            parts.verifier,
            parts.counters,
            step_up,
            parts.audit,
            parts.metrics,
        )
    }

    fn assemble(
        config: Config,
        verifier: Arc<dyn IdentityVerifier>,
        counters: Arc<BehavioralCounters>,
        step_up: StepUpGate,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let sessions = Arc::new(SessionTracker::new(
            &config.sessions,
            fingerprint_cap(&config.scoring.token_reuse_tiers),
        ));
        let collector = SignalCollector::new(&config, verifier, counters.clone(), sessions.clone());
        let scorer = RiskScorer::new(config.scoring.clone());

        Self {
            config: Arc::new(config),
            collector,
            scorer,
            step_up,
            counters,
            sessions,
            audit,
            metrics,
            prometheus: None,
        }
    }

    /// Prometheus text exposition, when metrics are enabled.
    pub fn metrics_text(&self) -> Option<String> {
        self.prometheus.as_ref().map(|p| p.gather())
    }

    /// Evaluate one request.
    pub async fn enforce(&self, request: &RequestMetadata) -> EnforcementOutcome {
        // Check global kill switch
        if !self.config.settings.enabled {
            debug!("Access Guard agent disabled globally");
            return EnforcementOutcome::allow(DecisionLabel::Allow, 0)
                .with_tag("access-guard:disabled");
        }

        let facts = self.collector.inspect(request);

        if self.is_exempt(&facts.endpoint) {
            debug!(endpoint = %facts.endpoint, "Path is exempt");
            return EnforcementOutcome::allow(DecisionLabel::Allow, 0)
                .with_tag("access-guard:exempt");
        }

        if self.config.settings.require_authentication && facts.identity.anonymous {
            let outcome = EnforcementOutcome::deny(401, DecisionLabel::DenyUnauthenticated, 0)
                .with_tag("access-guard:unauthenticated");
            self.finish(request, &facts, &RiskResult::default(), false, &outcome);
            return outcome;
        }

        debug!(stage = %Stage::Collecting, subject = %facts.identity.subject_id, endpoint = %facts.endpoint);
        let observed = self.collector.observe(&facts).await;
        let ctx = self
            .collector
            .collect(&facts, observed, Utc::now().timestamp())
            .await;

        debug!(stage = %Stage::Scoring, subject = %facts.identity.subject_id);
        let risk = self.scorer.score(&ctx);

        debug!(stage = %Stage::Deciding, score = risk.score);
        let decision = decide(risk.score, &self.config.thresholds);

        let label = if self.step_up.requires(decision, risk.score) {
            debug!(stage = %Stage::StepUp, score = risk.score, provider = self.step_up.provider());
            if self.step_up.challenge(&facts.identity.subject_id).await {
                DecisionLabel::AllowLog
            } else {
                DecisionLabel::DenyStepUpFailed
            }
        } else {
            DecisionLabel::from(decision)
        };

        debug!(stage = %Stage::Enforcing, decision = %label);
        let outcome = build_outcome(label, &risk);
        self.finish(request, &facts, &risk, self.is_suspicious(&ctx), &outcome);
        outcome
    }

    /// Record an authentication attempt from the login endpoint.
    pub async fn record_login(&self, attempt: &LoginAttempt) {
        if attempt.success {
            self.sessions.logins.remember(
                &attempt.subject_id,
                attempt.client_ip.as_deref(),
                attempt.user_agent.as_deref(),
            );
            debug!(subject = %attempt.subject_id, "Recorded successful login");
        } else {
            let failures = self.counters.record_failed_login(&attempt.subject_id).await;
            debug!(subject = %attempt.subject_id, failures, "Recorded failed login");
        }
    }

    /// Drop expired in-process state.
    pub fn sweep(&self) {
        self.counters.sweep();
        self.sessions.cleanup();
    }

    /// Flush the audit sink. Records handed over after this are rejected.
    pub async fn shutdown(&self) {
        info!(audit = self.audit.name(), "Flushing audit sink");
        self.audit.close().await;
    }

    fn is_exempt(&self, endpoint: &str) -> bool {
        self.config.settings.exempt_paths.iter().any(|path| {
            let path = path.trim_end_matches('/');
            endpoint == path
                || (endpoint.starts_with(path) && endpoint.as_bytes().get(path.len()) == Some(&b'/'))
        })
    }

    fn is_suspicious(&self, ctx: &RequestContext) -> bool {
        ctx.token_reuse_count() > 0
            || ctx.failed_login_count() >= self.config.audit.suspicious_failed_logins
    }

    /// Audit, metrics and logging. Sink failures never reach the caller.
    fn finish(
        &self,
        request: &RequestMetadata,
        facts: &RequestFacts,
        risk: &RiskResult,
        suspicious: bool,
        outcome: &EnforcementOutcome,
    ) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            subject: facts.identity.subject_id.clone(),
            role: facts.identity.role.clone(),
            endpoint: facts.endpoint.clone(),
            score: risk.score,
            decision: outcome.decision,
            reasons: risk.reasons.clone(),
            suspicious,
            metadata: AuditMetadata {
                method: request.method.clone(),
                client_ip: facts.client_ip.clone(),
                user_agent: facts.user_agent.clone(),
                token_id: facts.identity.token_id.clone(),
            },
        };

        if let Err(e) = self.audit.record(record) {
            warn!(sink = self.audit.name(), error = %e, "Failed to record audit entry");
        }

        self.metrics.observe(outcome.decision, risk.score);

        if outcome.decision.is_deny() {
            if self.config.settings.log_denied {
                info!(
                    subject = %facts.identity.subject_id,
                    endpoint = %facts.endpoint,
                    score = risk.score,
                    decision = %outcome.decision,
                    reasons = ?risk.reasons,
                    "Denying request"
                );
            }
        } else if self.config.settings.log_allowed {
            debug!(
                subject = %facts.identity.subject_id,
                endpoint = %facts.endpoint,
                score = risk.score,
                decision = %outcome.decision,
                "Allowing request"
            );
        }
    }
}

fn build_outcome(label: DecisionLabel, risk: &RiskResult) -> EnforcementOutcome {
    let reasons = risk.reasons.clone();
    match label {
        DecisionLabel::Allow => EnforcementOutcome::allow(label, risk.score)
            .with_reasons(reasons)
            .with_tag("access-guard:allowed"),
        DecisionLabel::AllowLog => EnforcementOutcome::allow(label, risk.score)
            .with_reasons(reasons)
            .add_header(RISK_HEADER, &risk.score.to_string())
            .add_header(DECISION_HEADER, label.as_str())
            .with_tag("access-guard:logged"),
        DecisionLabel::DenyStepUpFailed => EnforcementOutcome::deny(403, label, risk.score)
            .with_reasons(reasons)
            .with_tag("access-guard:step-up-failed"),
        DecisionLabel::DenyUnauthenticated => EnforcementOutcome::deny(401, label, risk.score)
            .with_reasons(reasons)
            .with_tag("access-guard:unauthenticated"),
        DecisionLabel::Deny => EnforcementOutcome::deny(403, label, risk.score)
            .with_reasons(reasons)
            .with_tag("access-guard:denied"),
    }
}
