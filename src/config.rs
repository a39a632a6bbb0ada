use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::queue::DEFAULT_QUEUE_CAPACITY;
use crate::telemetry::DEFAULT_EVENT_CAPACITY;

/// Where dispatch events go besides `tracing`.
#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Append `[ts] [id] [CATEGORY] message` lines to this file.
    pub path: Option<PathBuf>,
    /// Mirror every record as a JSON line to this TCP observer (host:port).
    pub mirror_addr: Option<String>,
    /// Records buffered between components and the writer before dropping.
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            mirror_addr: None,
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EventLogConfig {
    /// True if a writer task is needed at all.
    pub fn is_enabled(&self) -> bool {
        self.path.is_some() || self.mirror_addr.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Incident ingestion (JSON lines over TCP). `None` disables the listener.
    pub listen_addr: Option<SocketAddr>,
    pub dashboard_addr: Option<SocketAddr>,
    pub queue_capacity: usize,
    /// Wall-clock length of one simulated time unit.
    pub time_unit: Duration,
    /// How long shutdown waits for busy units before interrupting them.
    pub drain_timeout: Duration,
    pub event_log: EventLogConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            listen_addr: Some(SocketAddr::from(([127, 0, 0, 1], 7400))),
            dashboard_addr: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            time_unit: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            event_log: EventLogConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn with_listen_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_dashboard_addr(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn with_event_log(mut self, event_log: EventLogConfig) -> Self {
        self.event_log = event_log;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_config_default() {
        let cfg = EventLogConfig::default();
        assert!(cfg.path.is_none());
        assert!(cfg.mirror_addr.is_none());
        assert_eq!(cfg.capacity, DEFAULT_EVENT_CAPACITY);
        assert!(!cfg.is_enabled());
    }

    #[test]
    fn event_log_config_enabled_by_either_output() {
        let cfg = EventLogConfig {
            path: Some(PathBuf::from("/tmp/dispatch.log")),
            ..Default::default()
        };
        assert!(cfg.is_enabled());

        let cfg = EventLogConfig {
            mirror_addr: Some("127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        assert!(cfg.is_enabled());
    }

    #[test]
    fn dispatch_config_default() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.listen_addr.unwrap().to_string(), "127.0.0.1:7400");
        assert!(cfg.dashboard_addr.is_none());
        assert_eq!(cfg.queue_capacity, 100);
        assert_eq!(cfg.time_unit, Duration::from_secs(1));
        assert_eq!(cfg.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn dispatch_config_builders() {
        let dashboard: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        let cfg = DispatchConfig::default()
            .with_listen_addr(None)
            .with_dashboard_addr(dashboard)
            .with_queue_capacity(3)
            .with_time_unit(Duration::from_millis(10))
            .with_drain_timeout(Duration::ZERO);
        assert!(cfg.listen_addr.is_none());
        assert_eq!(cfg.dashboard_addr, Some(dashboard));
        assert_eq!(cfg.queue_capacity, 3);
        assert_eq!(cfg.time_unit, Duration::from_millis(10));
        assert_eq!(cfg.drain_timeout, Duration::ZERO);
    }
}
