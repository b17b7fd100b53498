//! Property tests for scoring and decision mapping.
//!
//! Invariants tested:
//! - Scores stay within 0-100 for any input, including out-of-range raw signals
//! - Raising a single signal never lowers the score
//! - Scoring and deciding are deterministic
//! - Reason suffixes add up to the unclamped total, one per nonzero factor
//! - Tier boundaries map exactly onto allow / allow_log / deny

use proptest::prelude::*;
use zentinel_agent_access_guard::config::{ScoringConfig, Thresholds};
use zentinel_agent_access_guard::scorer::{scaled_weight, tier_weight};
use zentinel_agent_access_guard::{decide, Decision, RequestContext, RiskScorer};

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Signals {
    role_matches: bool,
    endpoint: &'static str,
    request_count: u64,
    failed_login_count: u64,
    token_reuse_count: u64,
    token_age_seconds: u64,
    ip_changed: bool,
    user_agent_changed: bool,
    suspicious: bool,
    external: [i64; 4],
}

impl Signals {
    fn context(&self) -> RequestContext {
        let role = if self.role_matches { "admin" } else { "user" };
        RequestContext::new("alice", role, self.endpoint)
            .with_required_roles(&["admin"])
            .with_request_count(self.request_count)
            .with_failed_login_count(self.failed_login_count)
            .with_token_reuse_count(self.token_reuse_count)
            .with_token_age_seconds(self.token_age_seconds)
            .with_ip_changed(self.ip_changed)
            .with_user_agent_changed(self.user_agent_changed)
            .with_suspicious(self.suspicious)
            .with_ip_reputation(self.external[0])
            .with_payload_anomaly(self.external[1])
            .with_device_posture(self.external[2])
            .with_ml_anomaly(self.external[3])
    }
}

fn endpoint() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("/users"),
        Just("/admin/logs"),
        Just("/user/settings"),
        Just("/"),
    ]
}

prop_compose! {
    fn signals()(
        role_matches in any::<bool>(),
        endpoint in endpoint(),
        request_count in 0u64..200,
        failed_login_count in 0u64..40,
        token_reuse_count in 0u64..6,
        token_age_seconds in 0u64..2_000_000,
        flags in any::<(bool, bool, bool)>(),
        external in any::<[i64; 4]>(),
    ) -> Signals {
        Signals {
            role_matches,
            endpoint,
            request_count,
            failed_login_count,
            token_reuse_count,
            token_age_seconds,
            ip_changed: flags.0,
            user_agent_changed: flags.1,
            suspicious: flags.2,
            external,
        }
    }
}

fn score(signals: &Signals) -> u8 {
    RiskScorer::new(ScoringConfig::default())
        .score(&signals.context())
        .score
}

/// Every factor's weight, computed from the weight table without the scorer.
fn expected_factors(s: &Signals, cfg: &ScoringConfig) -> Vec<u64> {
    let scorer = RiskScorer::new(cfg.clone());
    let flag = |on: bool, weight: u32| if on { weight } else { 0 };
    let age = if s.token_age_seconds > cfg.token_age.stale_seconds {
        cfg.token_age.stale_weight
    } else if s.token_age_seconds > cfg.token_age.aging_seconds {
        cfg.token_age.aging_weight
    } else {
        0
    };
    let external = |index: usize| s.external[index].clamp(0, 100) as u8;

    [
        cfg.base,
        flag(!s.role_matches, cfg.role_mismatch),
        scorer.sensitivity(s.endpoint),
        tier_weight(&cfg.request_tiers, s.request_count),
        tier_weight(&cfg.failed_login_tiers, s.failed_login_count),
        tier_weight(&cfg.token_reuse_tiers, s.token_reuse_count),
        flag(s.ip_changed, cfg.ip_change),
        flag(s.user_agent_changed, cfg.user_agent_change),
        flag(s.suspicious, cfg.suspicious),
        age,
        scaled_weight(cfg.external.ip_reputation, external(0)),
        scaled_weight(cfg.external.payload_anomaly, external(1)),
        scaled_weight(cfg.external.device_posture, external(2)),
        scaled_weight(cfg.external.ml_anomaly, external(3)),
    ]
    .into_iter()
    .map(u64::from)
    .collect()
}

/// The `(+N)` weight at the end of a reason.
fn reason_weight(reason: &str) -> Option<u64> {
    let (_, tail) = reason.rsplit_once("(+")?;
    tail.strip_suffix(')')?.parse().ok()
}

fn rank(decision: Decision) -> u8 {
    match decision {
        Decision::Allow => 0,
        Decision::AllowLog => 1,
        Decision::Deny => 2,
    }
}

// ── proptest! blocks ──────────────────────────────────────────────────────────

proptest! {
    /// Any combination of signals, however extreme, scores within 0-100.
    #[test]
    fn prop_score_is_clamped(
        s in signals(),
        huge_counts in any::<(u64, u64, u64, u64)>(),
    ) {
        prop_assert!(score(&s) <= 100);

        let extreme = Signals {
            request_count: huge_counts.0,
            failed_login_count: huge_counts.1,
            token_reuse_count: huge_counts.2,
            token_age_seconds: huge_counts.3,
            ..s
        };
        prop_assert!(score(&extreme) <= 100);
    }

    /// Raw external signals are clamped before they reach the scorer.
    #[test]
    fn prop_external_signals_clamped(raw in any::<i64>()) {
        let ctx = RequestContext::new("alice", "user", "/users")
            .with_ip_reputation(raw)
            .with_payload_anomaly(raw)
            .with_device_posture(raw)
            .with_ml_anomaly(raw);

        prop_assert!(ctx.ip_reputation() <= 100);
        prop_assert!(ctx.ml_anomaly_score() <= 100);
        if raw <= 0 {
            prop_assert_eq!(ctx.payload_anomaly_score(), 0);
        }
        if raw >= 100 {
            prop_assert_eq!(ctx.device_posture_score(), 100);
        }
    }

    /// Increasing any single counter never lowers the score.
    #[test]
    fn prop_counters_are_monotonic(s in signals(), bump in 1u64..100) {
        let before = score(&s);

        let more_requests = Signals { request_count: s.request_count + bump, ..s.clone() };
        prop_assert!(score(&more_requests) >= before);

        let more_failures = Signals { failed_login_count: s.failed_login_count + bump, ..s.clone() };
        prop_assert!(score(&more_failures) >= before);

        let more_reuse = Signals { token_reuse_count: s.token_reuse_count + bump, ..s.clone() };
        prop_assert!(score(&more_reuse) >= before);

        let older_token = Signals { token_age_seconds: s.token_age_seconds + bump * 10_000, ..s.clone() };
        prop_assert!(score(&older_token) >= before);
    }

    /// Increasing any single 0-100 sub-score never lowers the score.
    #[test]
    fn prop_external_signals_are_monotonic(s in signals(), index in 0usize..4, bump in 1i64..100) {
        let before = score(&s);

        let mut external = s.external;
        external[index] = external[index].clamp(0, 100).saturating_add(bump);
        let mut base = s.external;
        base[index] = base[index].clamp(0, 100);

        let lower = Signals { external: base, ..s.clone() };
        let higher = Signals { external, ..s.clone() };
        prop_assert!(score(&higher) >= score(&lower));
        prop_assert_eq!(score(&lower), before);
    }

    /// Turning on a boolean signal never lowers the score.
    #[test]
    fn prop_flags_are_monotonic(s in signals()) {
        let off = Signals { ip_changed: false, user_agent_changed: false, suspicious: false, ..s.clone() };
        let before = score(&off);

        let moved = Signals { ip_changed: true, ..off.clone() };
        let new_agent = Signals { user_agent_changed: true, ..off.clone() };
        let flagged = Signals { suspicious: true, ..off.clone() };

        prop_assert!(score(&moved) >= before);
        prop_assert!(score(&new_agent) >= before);
        prop_assert!(score(&flagged) >= before);
    }

    /// Same context, same result: score, reasons and decision.
    #[test]
    fn prop_scoring_is_deterministic(s in signals()) {
        let scorer = RiskScorer::new(ScoringConfig::default());
        let ctx = s.context();

        let first = scorer.score(&ctx);
        let second = scorer.score(&ctx);
        prop_assert_eq!(&first, &second);

        let thresholds = Thresholds::default();
        prop_assert_eq!(decide(first.score, &thresholds), decide(second.score, &thresholds));
    }

    /// Base and sensitivity always leave a reason, and reasons never outnumber factors.
    #[test]
    fn prop_reason_count_bounded(s in signals()) {
        let result = RiskScorer::new(ScoringConfig::default()).score(&s.context());

        // base + role + sensitivity + 3 tiers + 3 flags + token age + 4 external
        prop_assert!(result.reasons.len() >= 3);
        prop_assert!(result.reasons.len() <= 14);
        prop_assert!(result.reasons[0].starts_with("base risk"));
    }

    /// Decisions follow the tier ordering for any score.
    #[test]
    fn prop_decide_is_ordered(a in 0u8..=100, b in 0u8..=100) {
        let thresholds = Thresholds::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let low_decision = decide(low, &thresholds);
        let high_decision = decide(high, &thresholds);
        prop_assert!(rank(low_decision) <= rank(high_decision));
    }

    /// Reason weights add up to the unclamped total, with one reason per nonzero factor.
    #[test]
    fn prop_reasons_account_for_score(s in signals()) {
        let cfg = ScoringConfig::default();
        let result = RiskScorer::new(cfg.clone()).score(&s.context());

        let weights: Vec<u64> = result
            .reasons
            .iter()
            .map(|reason| reason_weight(reason))
            .collect::<Option<_>>()
            .ok_or_else(|| TestCaseError::fail(format!("unparsed reason in {:?}", result.reasons)))?;
        let factors = expected_factors(&s, &cfg);

        let total: u64 = weights.iter().sum();
        prop_assert_eq!(total, factors.iter().sum::<u64>());
        prop_assert_eq!(
            weights.iter().filter(|w| **w > 0).count(),
            factors.iter().filter(|w| **w > 0).count()
        );
        prop_assert_eq!(u64::from(result.score), total.min(100));
    }
}

#[test]
fn test_threshold_boundaries() {
    let thresholds = Thresholds::default();

    assert_eq!(decide(0, &thresholds), Decision::Allow);
    assert_eq!(decide(30, &thresholds), Decision::Allow);
    assert_eq!(decide(31, &thresholds), Decision::AllowLog);
    assert_eq!(decide(60, &thresholds), Decision::AllowLog);
    assert_eq!(decide(61, &thresholds), Decision::Deny);
    assert_eq!(decide(100, &thresholds), Decision::Deny);
}
