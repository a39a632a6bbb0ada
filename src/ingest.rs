//! Incident intake.
//!
//! [`Ingestor`] turns raw requests into Waiting incidents and queues them.
//! [`run_listener`] exposes it over TCP as newline-delimited JSON: one
//! [`IncidentRequest`] per line in, one [`SubmitAck`] per line out.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::error::{DispatchError, Result};
use crate::geo::Position;
use crate::scheduler::incident::{Incident, IncidentId};
use crate::scheduler::queue::IncidentQueue;
use crate::telemetry::{Counter, DispatchStats, EventCategory, EventSink};

/// Longest accepted request line, in bytes.
pub const MAX_LINE_LENGTH: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRequest {
    /// Incident kind name, as listed in the catalog.
    pub name: String,
    pub x: i32,
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl IncidentRequest {
    pub fn new(name: impl Into<String>, x: i32, y: i32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<IncidentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitAck {
    pub(crate) fn from_result(result: &Result<IncidentId>) -> Self {
        match result {
            Ok(id) => Self {
                accepted: true,
                incident_id: Some(*id),
                error: None,
            },
            Err(e) => Self {
                accepted: false,
                incident_id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct Ingestor {
    catalog: Arc<Catalog>,
    queue: Arc<IncidentQueue>,
    next_id: AtomicU64,
    events: EventSink,
    stats: Arc<DispatchStats>,
}

impl Ingestor {
    pub fn new(
        catalog: Arc<Catalog>,
        queue: Arc<IncidentQueue>,
        events: EventSink,
        stats: Arc<DispatchStats>,
    ) -> Self {
        Self {
            catalog,
            queue,
            next_id: AtomicU64::new(1),
            events,
            stats,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Validate a request and build the Waiting incident for it.
    ///
    /// Ids are only consumed by requests that pass validation.
    pub fn admit(&self, request: &IncidentRequest) -> Result<Incident> {
        let bounds = self.catalog.env.bounds;
        let location = Position::new(request.x, request.y);
        if !bounds.contains(location) {
            return Err(DispatchError::OutOfBounds {
                x: request.x,
                y: request.y,
                width: bounds.width,
                height: bounds.height,
            });
        }

        let kind = self
            .catalog
            .kind(&request.name)
            .ok_or_else(|| DispatchError::UnknownIncidentKind(request.name.clone()))?
            .clone();

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = request.timestamp.unwrap_or_else(Utc::now);
        Ok(Incident::with_created_at(id, kind, location, created_at))
    }

    /// Admit and enqueue. Rejections are reported as ingest events.
    pub async fn submit(&self, request: &IncidentRequest) -> Result<IncidentId> {
        self.stats.record(Counter::Received);

        let incident = match self.admit(request) {
            Ok(incident) => Arc::new(incident),
            Err(e) => {
                self.stats.record(Counter::Rejected);
                self.events.warn(
                    "-",
                    EventCategory::Ingest,
                    format!(
                        "Rejected {} request at ({}, {}): {}",
                        request.name, request.x, request.y, e
                    ),
                );
                return Err(e);
            }
        };

        let id = incident.id;
        self.events.info(
            id,
            EventCategory::Ingest,
            format!(
                "Received {} incident at {}",
                incident.kind.name, incident.location
            ),
        );
        self.queue.put(incident).await?;
        Ok(id)
    }

    /// Parse and submit one JSON line.
    pub async fn handle_line(&self, line: &str) -> Result<IncidentId> {
        let request: IncidentRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                self.stats.record(Counter::Received);
                self.stats.record(Counter::Rejected);
                self.events.warn(
                    "-",
                    EventCategory::Ingest,
                    format!("Malformed request dropped: {}", e),
                );
                return Err(e.into());
            }
        };
        self.submit(&request).await
    }
}

/// Accept ingestion connections until `shutdown` is cancelled.
pub async fn run_listener(
    listener: TcpListener,
    ingestor: Arc<Ingestor>,
    shutdown: CancellationToken,
) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "Ingestion listener started"),
        Err(e) => tracing::warn!(error = %e, "Ingestion listener has no local address"),
    }

    let mut connections = JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept ingestion connection");
                    continue;
                }
            },
        };

        tracing::debug!(peer = %peer, "Ingestion client connected");
        let ingestor = ingestor.clone();
        let shutdown = shutdown.clone();
        connections.spawn(async move {
            serve_connection(stream, ingestor, shutdown).await;
            tracing::debug!(peer = %peer, "Ingestion client disconnected");
        });
        // Reap finished connections.
        while connections.try_join_next().is_some() {}
    }

    // Requests already being handled may still reach the queue.
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Ingestion connection task failed");
        }
    }
    tracing::info!("Ingestion listener stopped");
}

async fn serve_connection(stream: TcpStream, ingestor: Arc<Ingestor>, shutdown: CancellationToken) {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    loop {
        let line = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = framed.next() => match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Dropping ingestion connection");
                    break;
                }
                None => break,
            },
        };

        if line.trim().is_empty() {
            continue;
        }

        let ack = SubmitAck::from_result(&ingestor.handle_line(&line).await);
        let encoded = match serde_json::to_string(&ack) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode ingestion ack");
                break;
            }
        };
        if let Err(e) = framed.send(encoded).await {
            tracing::warn!(error = %e, "Failed to write ingestion ack");
            break;
        }
    }
}

/// One scripted submission: wait `delay`, then send `request`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRequest {
    pub delay: Duration,
    pub request: IncidentRequest,
}

/// Parse a submission script of `name x y delay_seconds` lines.
/// Blank lines and `#` comments are skipped.
pub fn parse_script(source: &str) -> Result<Vec<ScheduledRequest>> {
    let mut out = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        let malformed = || {
            DispatchError::Internal(format!(
                "script line {}: expected 'name x y delay', got '{}'",
                index + 1,
                line
            ))
        };
        let [name, x, y, delay] = fields.as_slice() else {
            return Err(malformed());
        };

        out.push(ScheduledRequest {
            delay: Duration::from_secs(delay.parse().map_err(|_| malformed())?),
            request: IncidentRequest::new(
                *name,
                x.parse().map_err(|_| malformed())?,
                y.parse().map_err(|_| malformed())?,
            ),
        });
    }
    Ok(out)
}

/// Client side of the ingestion protocol.
pub struct SubmitClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl SubmitClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        })
    }

    /// Send one request and wait for its acknowledgement.
    pub async fn send(&mut self, request: &IncidentRequest) -> Result<SubmitAck> {
        let line = serde_json::to_string(request)?;
        self.framed.send(line).await.map_err(codec_error)?;

        match self.framed.next().await {
            Some(Ok(reply)) => Ok(serde_json::from_str(&reply)?),
            Some(Err(e)) => Err(codec_error(e)),
            None => Err(DispatchError::Internal(
                "ingestion server closed the connection".to_string(),
            )),
        }
    }

    /// Play a parsed script, waiting each entry's delay before sending it.
    pub async fn send_script(&mut self, script: &[ScheduledRequest]) -> Result<Vec<SubmitAck>> {
        let mut acks = Vec::with_capacity(script.len());
        for entry in script {
            tokio::time::sleep(entry.delay).await;
            acks.push(self.send(&entry.request).await?);
        }
        Ok(acks)
    }
}

/// Read and parse a submission script from disk.
pub async fn load_script(path: &Path) -> Result<Vec<ScheduledRequest>> {
    let source = tokio::fs::read_to_string(path).await?;
    parse_script(&source)
}

fn codec_error(e: tokio_util::codec::LinesCodecError) -> DispatchError {
    match e {
        tokio_util::codec::LinesCodecError::Io(e) => DispatchError::Io(e),
        other => DispatchError::Internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_script_lines() {
        let script = parse_script("# drill\nFire 10 0 0\n\nFlood 3 4 2\n").unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[0].request, IncidentRequest::new("Fire", 10, 0));
        assert_eq!(script[0].delay, Duration::ZERO);
        assert_eq!(script[1].delay, Duration::from_secs(2));
    }

    #[test]
    fn parse_script_rejects_short_line() {
        let err = parse_script("Fire 10 0\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn request_timestamp_is_optional() {
        let request: IncidentRequest =
            serde_json::from_str(r#"{"name":"Fire","x":1,"y":2}"#).unwrap();
        assert_eq!(request.timestamp, None);
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"name":"Fire","x":1,"y":2}"#
        );
    }

    #[test]
    fn ack_omits_empty_fields() {
        let ack = SubmitAck::from_result(&Ok(3));
        assert_eq!(
            serde_json::to_string(&ack).unwrap(),
            r#"{"accepted":true,"incident_id":3}"#
        );
    }
}
