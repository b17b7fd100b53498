//! Score to decision tier mapping.

use crate::config::Thresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decision tier derived from a risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Let the request through.
    Allow,
    /// Let the request through and annotate it for downstream logging.
    AllowLog,
    /// Reject the request.
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::AllowLog => "allow_log",
            Decision::Deny => "deny",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a score to its tier. `score <= allow_max` allows, `score <= log_max` logs,
/// anything above denies.
pub fn decide(score: u8, thresholds: &Thresholds) -> Decision {
    if score <= thresholds.allow_max {
        Decision::Allow
    } else if score <= thresholds.log_max {
        Decision::AllowLog
    } else {
        Decision::Deny
    }
}

/// Final label recorded for a request, distinguishing why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionLabel {
    Allow,
    AllowLog,
    Deny,
    /// Score fell in the step-up band and the MFA challenge failed.
    DenyStepUpFailed,
    /// Anonymous caller while authentication is required.
    DenyUnauthenticated,
}

impl DecisionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionLabel::Allow => "allow",
            DecisionLabel::AllowLog => "allow_log",
            DecisionLabel::Deny => "deny",
            DecisionLabel::DenyStepUpFailed => "deny_step_up_failed",
            DecisionLabel::DenyUnauthenticated => "deny_unauthenticated",
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(
            self,
            DecisionLabel::Deny | DecisionLabel::DenyStepUpFailed | DecisionLabel::DenyUnauthenticated
        )
    }
}

impl From<Decision> for DecisionLabel {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allow => DecisionLabel::Allow,
            Decision::AllowLog => DecisionLabel::AllowLog,
            Decision::Deny => DecisionLabel::Deny,
        }
    }
}

impl fmt::Display for DecisionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
