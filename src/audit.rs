//! Audit trail of access decisions.
//!
//! Sinks are fire-and-forget: [`AuditSink::record`] never waits on I/O, and the
//! agent logs a failed record instead of failing the request.

use crate::config::{AuditConfig, AuditSinkKind};
use crate::decision::DecisionLabel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Request details kept alongside a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditMetadata {
    pub method: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub token_id: Option<String>,
}

/// One audited decision. Holds the score and reasons the caller never sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub role: String,
    pub endpoint: String,
    pub score: u8,
    pub decision: DecisionLabel,
    pub reasons: Vec<String>,
    /// Token reuse seen, or failed logins at the configured threshold.
    pub suspicious: bool,
    pub metadata: AuditMetadata,
}

/// Error from an audit sink.
#[derive(Debug)]
pub enum AuditError {
    /// File could not be opened or written.
    Io(std::io::Error),
    /// Record could not be encoded.
    Serialize(serde_json::Error),
    /// Writer queue is full.
    Backpressure,
    /// Writer has stopped.
    Closed,
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::Io(e) => write!(f, "IO error: {}", e),
            AuditError::Serialize(e) => write!(f, "Serialization error: {}", e),
            AuditError::Backpressure => write!(f, "Audit queue full"),
            AuditError::Closed => write!(f, "Audit sink closed"),
        }
    }
}

impl std::error::Error for AuditError {}

impl From<std::io::Error> for AuditError {
    fn from(e: std::io::Error) -> Self {
        AuditError::Io(e)
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Serialize(e)
    }
}

/// Destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Hand a record to the sink without blocking.
    fn record(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Sink name for logging.
    fn name(&self) -> &str;

    /// Stop accepting records and finish writing queued ones.
    async fn close(&self) {}
}

/// Emits each record as a structured tracing event.
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        info!(
            target: "accessguard::audit",
            subject = %record.subject,
            role = %record.role,
            endpoint = %record.endpoint,
            score = record.score,
            decision = %record.decision,
            reasons = ?record.reasons,
            suspicious = record.suspicious,
            method = %record.metadata.method,
            client_ip = ?record.metadata.client_ip,
            "Access decision"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Appends records as JSON lines from a background writer task.
pub struct JsonFileAuditSink {
    sender: Mutex<Option<mpsc::Sender<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JsonFileAuditSink {
    /// Open `path` for appending and start the writer. Needs a tokio runtime.
    pub fn open(path: &Path, buffer: usize) -> Result<Self, AuditError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let worker = tokio::spawn(run_writer(
            tokio::fs::File::from_std(file),
            path.to_path_buf(),
            receiver,
        ));

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }
}

#[async_trait]
impl AuditSink for JsonFileAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let guard = self.sender.lock().map_err(|_| AuditError::Closed)?;
        let sender = guard.as_ref().ok_or(AuditError::Closed)?;
        sender.try_send(line).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AuditError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => AuditError::Closed,
        })
    }

    fn name(&self) -> &str {
        "file"
    }

    async fn close(&self) {
        // Dropping the sender ends the writer loop once the queue is drained.
        drop(self.sender.lock().ok().and_then(|mut sender| sender.take()));

        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Audit writer task failed");
            }
        }
    }
}

async fn run_writer(mut file: tokio::fs::File, path: PathBuf, mut receiver: mpsc::Receiver<String>) {
    while let Some(line) = receiver.recv().await {
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(path = %path.display(), error = %e, "Failed to write audit record");
        }
    }

    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "Failed to flush audit file");
    }
}

/// Records kept when no capacity is given.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1024;

/// Keeps the most recent records in memory.
pub struct MemoryAuditSink {
    records: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `capacity` records, dropping the oldest first.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_MEMORY_CAPACITY))),
            capacity,
        }
    }

    /// Snapshot of the retained records, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.lock().map_err(|_| AuditError::Closed)?;
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Discards records.
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    fn record(&self, _record: AuditRecord) -> Result<(), AuditError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "none"
    }
}

/// Build the configured sink.
pub fn build_sink(config: &AuditConfig) -> Result<Arc<dyn AuditSink>, AuditError> {
    let sink: Arc<dyn AuditSink> = match config.sink {
        AuditSinkKind::Log => Arc::new(LogAuditSink),
        AuditSinkKind::File => {
            let path = config.path.as_deref().ok_or_else(|| {
                AuditError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "audit.path is required for the file sink",
                ))
            })?;
            Arc::new(JsonFileAuditSink::open(path, config.buffer)?)
        }
        AuditSinkKind::Memory => Arc::new(MemoryAuditSink::with_capacity(config.buffer)),
        AuditSinkKind::None => Arc::new(NoopAuditSink),
    };

    Ok(sink)
}
