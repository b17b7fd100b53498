//! Additive risk scoring.
//!
//! The scorer is a pure function of the [`RequestContext`] and the weight table.
//! Steps run in a fixed order; that order is the order of `reasons`.

use crate::config::{ScaledSignal, ScoringConfig, Tier};
use crate::context::RequestContext;
use serde::{Deserialize, Serialize};

/// Upper bound of the score domain.
pub const MAX_SCORE: u8 = 100;

/// Score plus the itemized factors that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RiskResult {
    /// 0-100.
    pub score: u8,
    /// One entry per contributing factor, in evaluation order.
    pub reasons: Vec<String>,
}

/// Risk scorer over a configurable weight table.
#[derive(Debug, Clone, Default)]
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a request context.
    pub fn score(&self, ctx: &RequestContext) -> RiskResult {
        let cfg = &self.config;
        let mut tally = Tally::default();

        tally.add(cfg.base, format!("base risk (+{})", cfg.base));

        if !ctx.required_roles().is_empty() {
            let role = ctx.subject_role();
            if ctx.required_roles().iter().any(|r| r == role) {
                tally.add(0, format!("role '{}' satisfies requirement (+0)", role));
            } else {
                tally.add(
                    cfg.role_mismatch,
                    format!(
                        "role mismatch: '{}' not in [{}] (+{})",
                        role,
                        ctx.required_roles().join(", "),
                        cfg.role_mismatch
                    ),
                );
            }
        }

        let sensitivity = self.sensitivity(ctx.endpoint());
        tally.add(
            sensitivity,
            format!("endpoint sensitivity {} (+{})", ctx.endpoint(), sensitivity),
        );

        let weight = tier_weight(&cfg.request_tiers, ctx.request_count());
        tally.add_nonzero(weight, || {
            format!("request frequency {} (+{})", ctx.request_count(), weight)
        });

        let weight = tier_weight(&cfg.failed_login_tiers, ctx.failed_login_count());
        tally.add_nonzero(weight, || {
            format!("failed logins {} (+{})", ctx.failed_login_count(), weight)
        });

        let weight = tier_weight(&cfg.token_reuse_tiers, ctx.token_reuse_count());
        tally.add_nonzero(weight, || {
            format!("token reuse {} (+{})", ctx.token_reuse_count(), weight)
        });

        if ctx.ip_changed() {
            tally.add_nonzero(cfg.ip_change, || {
                format!("ip changed since last login (+{})", cfg.ip_change)
            });
        }

        if ctx.user_agent_changed() {
            tally.add_nonzero(cfg.user_agent_change, || {
                format!("user agent changed since last login (+{})", cfg.user_agent_change)
            });
        }

        if ctx.suspicious() {
            tally.add_nonzero(cfg.suspicious, || {
                format!("flagged suspicious (+{})", cfg.suspicious)
            });
        }

        let weight = self.token_age_weight(ctx.token_age_seconds());
        tally.add_nonzero(weight, || {
            format!("token age {}s (+{})", ctx.token_age_seconds(), weight)
        });

        let external = &cfg.external;
        for (name, value, signal) in [
            ("ip reputation", ctx.ip_reputation(), external.ip_reputation),
            ("payload anomaly", ctx.payload_anomaly_score(), external.payload_anomaly),
            ("device posture", ctx.device_posture_score(), external.device_posture),
            ("ml anomaly", ctx.ml_anomaly_score(), external.ml_anomaly),
        ] {
            let weight = scaled_weight(signal, value);
            tally.add_nonzero(weight, || format!("{} {} (+{})", name, value, weight));
        }

        RiskResult {
            score: tally.total.min(u64::from(MAX_SCORE)) as u8,
            reasons: tally.reasons,
        }
    }

    /// Sensitivity weight for an endpoint, falling back to the default.
    pub fn sensitivity(&self, endpoint: &str) -> u32 {
        self.config
            .sensitivity
            .get(endpoint)
            .copied()
            .unwrap_or(self.config.default_sensitivity)
    }

    fn token_age_weight(&self, age_seconds: u64) -> u32 {
        let age = &self.config.token_age;
        if age_seconds > age.stale_seconds {
            age.stale_weight
        } else if age_seconds > age.aging_seconds {
            age.aging_weight
        } else {
            0
        }
    }
}

/// Weight of the highest tier whose minimum the value reaches.
pub fn tier_weight(tiers: &[Tier], value: u64) -> u32 {
    tiers
        .iter()
        .filter(|tier| value >= tier.min)
        .map(|tier| tier.weight)
        .max()
        .unwrap_or(0)
}

/// `min(value / divisor, cap)`, zero for a zero divisor.
pub fn scaled_weight(signal: ScaledSignal, value: u8) -> u32 {
    if signal.divisor == 0 {
        return 0;
    }
    (u32::from(value) / signal.divisor).min(signal.cap)
}

#[derive(Default)]
struct Tally {
    total: u64,
    reasons: Vec<String>,
}

impl Tally {
    fn add(&mut self, weight: u32, reason: String) {
        self.total = self.total.saturating_add(u64::from(weight));
        self.reasons.push(reason);
    }

    fn add_nonzero(&mut self, weight: u32, reason: impl FnOnce() -> String) {
        if weight > 0 {
            self.add(weight, reason());
        }
    }
}
