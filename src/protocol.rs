//! Newline-delimited JSON protocol between the gateway and the agent.
//!
//! Every input line is an [`Envelope`]; every answered line is a [`Reply`]
//! carrying the same `id`. Messages are processed concurrently, so replies may
//! come back out of order.

use crate::agent::{AccessGuardAgent, ClientResponse, EnforcementOutcome};
use crate::context::{LoginAttempt, RequestMetadata};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One input line.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// Correlation id chosen by the gateway, echoed on the reply.
    #[serde(default)]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub message: AgentMessage,
}

/// Message body, tagged by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AgentMessage {
    Request(RequestMetadata),
    Login(LoginAttempt),
    Metrics,
}

/// One output line.
#[derive(Debug, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,

    #[serde(flatten)]
    pub body: ReplyBody,
}

/// Reply body, tagged by `type`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyBody {
    /// `response` is what the gateway sends to the caller. `audit` is for the
    /// gateway's own records and must not be forwarded.
    Decision {
        response: ClientResponse,
        audit: EnforcementOutcome,
    },
    Login {
        recorded: bool,
    },
    Metrics {
        metrics: String,
    },
}

/// Serve loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct ServeOptions {
    /// Messages processed at once.
    pub max_in_flight: usize,
    /// Period of the in-process state sweep.
    pub sweep_interval: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Answer one message.
pub async fn handle(agent: &AccessGuardAgent, envelope: Envelope) -> Reply {
    let body = match envelope.message {
        AgentMessage::Request(request) => {
            let outcome = agent.enforce(&request).await;
            ReplyBody::Decision {
                response: outcome.client_response(),
                audit: outcome,
            }
        }
        AgentMessage::Login(attempt) => {
            agent.record_login(&attempt).await;
            ReplyBody::Login { recorded: true }
        }
        AgentMessage::Metrics => ReplyBody::Metrics {
            metrics: agent.metrics_text().unwrap_or_default(),
        },
    };

    Reply {
        id: envelope.id,
        body,
    }
}

/// Read messages from `input` until it closes, writing replies to `output`.
///
/// At most `max_in_flight` messages are processed at once; a slow step-up
/// challenge or counter round trip only holds up its own message. Once input
/// closes, in-flight messages finish, replies are flushed and the agent's audit
/// sink is drained.
pub async fn serve<R, W>(
    agent: Arc<AccessGuardAgent>,
    input: R,
    output: W,
    options: ServeOptions,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max_in_flight = options.max_in_flight.max(1);
    let (replies, outbox) = mpsc::channel::<String>(max_in_flight);
    let writer = tokio::spawn(write_replies(output, outbox));

    let limit = Arc::new(Semaphore::new(max_in_flight));
    let mut tasks = JoinSet::new();
    let mut lines = input.lines();
    let mut sweep = tokio::time::interval_at(
        tokio::time::Instant::now() + options.sweep_interval,
        options.sweep_interval,
    );

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(envelope) = parse_line(&line) else {
                    continue;
                };

                let permit = limit.clone().acquire_owned().await?;
                let agent = agent.clone();
                let replies = replies.clone();
                tasks.spawn(async move {
                    let reply = handle(&agent, envelope).await;
                    match serde_json::to_string(&reply) {
                        Ok(line) => {
                            if replies.send(line).await.is_err() {
                                warn!("Reply writer stopped, dropping reply");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode reply"),
                    }
                    drop(permit);
                });
            }
            _ = sweep.tick() => {
                debug!("Sweeping expired state");
                agent.sweep();
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "Message task failed");
                }
            }
        }
    }

    info!(in_flight = tasks.len(), "Input closed, finishing in-flight messages");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Message task failed");
        }
    }

    drop(replies);
    writer.await??;
    agent.shutdown().await;
    Ok(())
}

fn parse_line(line: &str) -> Option<Envelope> {
    if line.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(line) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            warn!(error = %e, "Skipping malformed message");
            None
        }
    }
}

async fn write_replies<W>(mut output: W, mut outbox: mpsc::Receiver<String>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = outbox.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.shutdown().await
}
