//! Connection counters and uptime.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Point-in-time view of the connection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub errors: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Time spent with an open socket, including the current session.
    pub total_uptime: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionMetrics {
    counters: MetricsSnapshot,
    open_since: Option<DateTime<Utc>>,
}

impl ConnectionMetrics {
    pub(crate) fn record_attempt(&mut self) {
        self.counters.connection_attempts += 1;
    }

    pub(crate) fn record_open(&mut self, now: DateTime<Utc>) {
        self.counters.successful_connections += 1;
        self.counters.last_connected_at = Some(now);
        self.open_since = Some(now);
    }

    pub(crate) fn record_error(&mut self) {
        self.counters.errors += 1;
    }

    /// Close out the open session, if any.
    pub(crate) fn record_close(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.open_since.take() {
            self.counters.total_uptime += elapsed(since, now);
            self.counters.last_disconnected_at = Some(now);
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    pub(crate) fn snapshot(&self, now: DateTime<Utc>) -> MetricsSnapshot {
        let mut snapshot = self.counters.clone();
        if let Some(since) = self.open_since {
            snapshot.total_uptime += elapsed(since, now);
        }
        snapshot
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}
