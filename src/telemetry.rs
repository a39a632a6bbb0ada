//! Structured dispatch events and counters.
//!
//! Core components report through an [`EventSink`]: every record is mirrored
//! to `tracing` and, when a writer is attached, pushed onto a bounded channel
//! with `try_send`. A full channel drops the record instead of blocking the
//! caller. [`EventWriter`] drains the channel into a log file and can mirror
//! each record as a JSON line to a TCP observer.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    IncidentStatus,
    Queue,
    Scheduler,
    Unit,
    Ingest,
}

impl Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::IncidentStatus => write!(f, "INCIDENT_STATUS"),
            EventCategory::Queue => write!(f, "QUEUE"),
            EventCategory::Scheduler => write!(f, "SCHEDULER"),
            EventCategory::Unit => write!(f, "UNIT"),
            EventCategory::Ingest => write!(f, "INGEST"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub id: String,
    pub category: EventCategory,
    pub message: String,
}

impl DispatchEvent {
    /// `[unix_ts] [id] [CATEGORY] message`
    pub fn log_line(&self) -> String {
        format!(
            "[{}] [{}] [{}] {}",
            self.timestamp.timestamp(),
            self.id,
            self.category,
            self.message
        )
    }
}

/// Fire-and-forget handle for emitting dispatch events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<DispatchEvent>>,
    dropped: Arc<AtomicU64>,
}

impl EventSink {
    /// A sink that only logs through `tracing`.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// A sink backed by a bounded channel of `capacity` records.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    pub fn info(&self, id: impl Display, category: EventCategory, message: impl Into<String>) {
        self.emit(Severity::Info, id, category, message.into());
    }

    pub fn warn(&self, id: impl Display, category: EventCategory, message: impl Into<String>) {
        self.emit(Severity::Warn, id, category, message.into());
    }

    pub fn error(&self, id: impl Display, category: EventCategory, message: impl Into<String>) {
        self.emit(Severity::Error, id, category, message.into());
    }

    /// Records discarded because the writer could not keep up.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn emit(&self, severity: Severity, id: impl Display, category: EventCategory, message: String) {
        let event = DispatchEvent {
            timestamp: Utc::now(),
            severity,
            id: id.to_string(),
            category,
            message,
        };

        match severity {
            Severity::Info => {
                tracing::info!(id = %event.id, category = %event.category, "{}", event.message)
            }
            Severity::Warn => {
                tracing::warn!(id = %event.id, category = %event.category, "{}", event.message)
            }
            Severity::Error => {
                tracing::error!(id = %event.id, category = %event.category, "{}", event.message)
            }
        }

        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            // Writer gone (shutdown); tracing already has the record.
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Drains dispatch events into a log file and an optional TCP mirror.
#[derive(Debug, Clone, Default)]
pub struct EventWriter {
    log_path: Option<PathBuf>,
    mirror_addr: Option<String>,
}

impl EventWriter {
    pub fn new(log_path: Option<PathBuf>, mirror_addr: Option<String>) -> Self {
        Self {
            log_path,
            mirror_addr,
        }
    }

    /// Run until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<DispatchEvent>) {
        let mut file = match &self.log_path {
            Some(path) => match OpenOptions::new().create(true).append(true).open(path).await {
                Ok(f) => Some(BufWriter::new(f)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to open event log");
                    None
                }
            },
            None => None,
        };

        let mut mirror = match &self.mirror_addr {
            Some(addr) => match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tracing::info!(addr = %addr, "Mirroring dispatch events");
                    Some(stream)
                }
                Err(e) => {
                    tracing::warn!(addr = %addr, error = %e, "Event mirror unavailable");
                    None
                }
            },
            None => None,
        };

        while let Some(event) = rx.recv().await {
            if let Some(writer) = file.as_mut() {
                if let Err(e) = write_log_line(writer, &event).await {
                    tracing::warn!(error = %e, "Event log write failed, disabling file output");
                    file = None;
                }
            }

            if let Some(stream) = mirror.as_mut() {
                if let Err(e) = write_json_line(stream, &event).await {
                    tracing::warn!(error = %e, "Event mirror write failed, disabling mirror");
                    mirror = None;
                }
            }
        }

        if let Some(mut writer) = file {
            let _ = writer.flush().await;
        }
    }
}

async fn write_log_line(writer: &mut BufWriter<File>, event: &DispatchEvent) -> std::io::Result<()> {
    let mut line = event.log_line();
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

async fn write_json_line(stream: &mut TcpStream, event: &DispatchEvent) -> std::io::Result<()> {
    let mut line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    line.push('\n');
    stream.write_all(line.as_bytes()).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Received,
    Rejected,
    Dropped,
    Assigned,
    Completed,
    TimedOut,
    Canceled,
}

/// Process-wide dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    assigned: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    canceled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub assigned: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub canceled: u64,
}

impl DispatchStats {
    pub fn record(&self, counter: Counter) {
        let slot = match counter {
            Counter::Received => &self.received,
            Counter::Rejected => &self.rejected,
            Counter::Dropped => &self.dropped,
            Counter::Assigned => &self.assigned,
            Counter::Completed => &self.completed,
            Counter::TimedOut => &self.timed_out,
            Counter::Canceled => &self.canceled,
        };
        slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
        }
    }
}
