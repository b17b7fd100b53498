//! Decision metrics.

use crate::decision::DecisionLabel;
use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use tracing::debug;

/// Best-effort metrics destination. Never fails the caller.
pub trait MetricsSink: Send + Sync {
    fn observe(&self, decision: DecisionLabel, score: u8);
}

/// Prometheus counters and histogram in a private registry.
pub struct PrometheusMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    risk: Histogram,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new(
                "accessguard_decisions_total",
                "Access decisions by final label",
            ),
            &["decision"],
        )?;
        registry.register(Box::new(decisions.clone()))?;

        let risk = Histogram::with_opts(
            HistogramOpts::new("accessguard_request_risk", "Risk score per evaluated request")
                .buckets(prometheus::linear_buckets(10.0, 10.0, 10)?),
        )?;
        registry.register(Box::new(risk.clone()))?;

        Ok(Self {
            registry,
            decisions,
            risk,
        })
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        let _ = encoder.encode(&mf, &mut buf);
        String::from_utf8_lossy(&buf).to_string()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn observe(&self, decision: DecisionLabel, score: u8) {
        match self.decisions.get_metric_with_label_values(&[decision.as_str()]) {
            Ok(counter) => counter.inc(),
            Err(e) => debug!(error = %e, "Failed to record decision metric"),
        }
        self.risk.observe(f64::from(score));
    }
}

/// Discards observations.
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn observe(&self, _decision: DecisionLabel, _score: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_counts_decisions() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.observe(DecisionLabel::Allow, 15);
        metrics.observe(DecisionLabel::Allow, 20);
        metrics.observe(DecisionLabel::DenyStepUpFailed, 55);

        assert_eq!(metrics.decisions.with_label_values(&["allow"]).get(), 2);
        assert_eq!(
            metrics
                .decisions
                .with_label_values(&["deny_step_up_failed"])
                .get(),
            1
        );
        assert_eq!(metrics.risk.get_sample_count(), 3);
        assert_eq!(metrics.risk.get_sample_sum(), 90.0);
    }

    #[test]
    fn test_gather_exposes_metric_names() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.observe(DecisionLabel::Deny, 80);

        let text = metrics.gather();
        assert!(text.contains("accessguard_decisions_total{decision=\"deny\"} 1"));
        assert!(text.contains("accessguard_request_risk_count 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = PrometheusMetrics::new().unwrap();
        let b = PrometheusMetrics::new().unwrap();
        a.observe(DecisionLabel::Allow, 5);

        assert_eq!(b.risk.get_sample_count(), 0);
        assert!(!b.gather().contains("accessguard_request_risk_count 1"));
    }
}
