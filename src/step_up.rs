//! Step-up authentication for medium-high risk requests.

use crate::config::{StepUpConfig, StepUpProvider};
use crate::decision::Decision;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error from an MFA challenge provider.
#[derive(Debug)]
pub enum ChallengeError {
    /// HTTP request failed.
    Http(reqwest::Error),
    /// Challenge timed out.
    Timeout,
    /// Provider answered with something unusable.
    InvalidResponse(String),
}

impl std::fmt::Display for ChallengeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeError::Http(e) => write!(f, "HTTP error: {}", e),
            ChallengeError::Timeout => write!(f, "Challenge timed out"),
            ChallengeError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for ChallengeError {}

impl From<reqwest::Error> for ChallengeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChallengeError::Timeout
        } else {
            ChallengeError::Http(e)
        }
    }
}

/// Issues a second-factor challenge to a subject.
#[async_trait]
pub trait MfaChallenger: Send + Sync {
    /// Whether the subject passed the challenge.
    async fn challenge(&self, subject_id: &str) -> Result<bool, ChallengeError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Fixed answer.
pub struct StaticChallenger {
    approve: bool,
}

impl StaticChallenger {
    pub fn new(approve: bool) -> Self {
        Self { approve }
    }
}

#[async_trait]
impl MfaChallenger for StaticChallenger {
    async fn challenge(&self, _subject_id: &str) -> Result<bool, ChallengeError> {
        Ok(self.approve)
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[derive(Debug, Serialize)]
struct ChallengeRequest<'a> {
    subject_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    verified: bool,
}

/// Delegates the challenge to an HTTP service.
///
/// POSTs `{"subject_id": ...}` and expects `{"verified": bool}` back.
pub struct WebhookChallenger {
    url: String,
    client: Client,
}

impl WebhookChallenger {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ChallengeError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

#[async_trait]
impl MfaChallenger for WebhookChallenger {
    async fn challenge(&self, subject_id: &str) -> Result<bool, ChallengeError> {
        debug!(subject = %subject_id, "Sending step-up challenge");

        let response = self
            .client
            .post(&self.url)
            .json(&ChallengeRequest { subject_id })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChallengeError::InvalidResponse(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let body: ChallengeResponse = response.json().await.map_err(|e| {
            ChallengeError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        Ok(body.verified)
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Decides when to challenge and turns challenger failures into a failed challenge.
pub struct StepUpGate {
    challenger: Arc<dyn MfaChallenger>,
    enabled: bool,
    above_score: u8,
    timeout: Duration,
}

impl StepUpGate {
    pub fn new(challenger: Arc<dyn MfaChallenger>, config: &StepUpConfig) -> Self {
        Self {
            challenger,
            enabled: config.enabled,
            above_score: config.above_score,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// Build the configured provider.
    pub fn from_config(config: &StepUpConfig) -> anyhow::Result<Self> {
        let challenger: Arc<dyn MfaChallenger> = match config.provider {
            StepUpProvider::Static => Arc::new(StaticChallenger::new(config.approve)),
            StepUpProvider::Webhook => {
                let url = config
                    .webhook_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("step_up.webhook_url is required"))?;
                Arc::new(WebhookChallenger::new(
                    url,
                    Duration::from_millis(config.timeout_ms),
                )?)
            }
        };

        Ok(Self::new(challenger, config))
    }

    pub fn provider(&self) -> &str {
        self.challenger.name()
    }

    /// Only `allow_log` decisions strictly above the step-up score are challenged.
    pub fn requires(&self, decision: Decision, score: u8) -> bool {
        self.enabled && decision == Decision::AllowLog && score > self.above_score
    }

    /// Run the challenge. Errors and timeouts count as failure.
    pub async fn challenge(&self, subject_id: &str) -> bool {
        let result = tokio::time::timeout(self.timeout, self.challenger.challenge(subject_id)).await;

        match result {
            Ok(Ok(verified)) => verified,
            Ok(Err(e)) => {
                warn!(
                    provider = self.challenger.name(),
                    subject = %subject_id,
                    error = %e,
                    "Step-up challenge failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    provider = self.challenger.name(),
                    subject = %subject_id,
                    "Step-up challenge timed out"
                );
                false
            }
        }
    }
}
