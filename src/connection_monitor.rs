//! Bounded reconnection-event history and point-in-time pool status (§4.10).

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::host::HostRegistry;

const MAX_HISTORY: usize = 1000;

/// One recorded reconnection attempt, successful or not.
#[derive(Debug, Clone)]
pub struct ReconnectionEvent {
    pub host: std::net::IpAddr,
    pub succeeded: bool,
    pub at: Instant,
}

/// Point-in-time view of the connection pool, derived from
/// [`HostRegistry`] state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionPoolStatus {
    pub total_connections: usize,
    pub active_connections: usize,
    pub failed_hosts: usize,
    pub reconnecting_hosts: usize,
}

/// FIFO-bounded history of reconnection events, exposed to the embedding
/// application for logging/metrics dashboards.
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    history: Mutex<VecDeque<ReconnectionEvent>>,
}

impl ConnectionMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    /// Record a reconnection attempt, evicting the oldest entry if the
    /// history is at capacity.
    pub fn record(&self, host: std::net::IpAddr, succeeded: bool) {
        let mut history = self.history.lock();
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(ReconnectionEvent {
            host,
            succeeded,
            at: Instant::now(),
        });
    }

    /// A snapshot of the current history, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<ReconnectionEvent> {
        self.history.lock().iter().cloned().collect()
    }

    /// Derive the current pool status from `hosts`. A host counts as
    /// "reconnecting" when it is down but has at least one recorded
    /// consecutive failure below the configured threshold (i.e. it is
    /// still being probed, not yet tripped).
    #[must_use]
    pub fn pool_status(&self, hosts: &HostRegistry, connections_per_host: usize) -> ConnectionPoolStatus {
        let snapshot = hosts.snapshot();
        let failed_hosts = snapshot.iter().filter(|(_, state)| !state.is_up).count();
        let reconnecting_hosts = snapshot
            .iter()
            .filter(|(_, state)| !state.is_up && state.consecutive_failures > 0)
            .count();
        let active_connections = snapshot.iter().filter(|(_, state)| state.is_up).count() * connections_per_host;
        ConnectionPoolStatus {
            total_connections: snapshot.len() * connections_per_host,
            active_connections,
            failed_hosts,
            reconnecting_hosts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerOptions;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn history_evicts_oldest_beyond_capacity() {
        let monitor = ConnectionMonitor::new();
        for i in 0..(MAX_HISTORY + 10) {
            monitor.record(ip((i % 255) as u8), true);
        }
        assert_eq!(monitor.history().len(), MAX_HISTORY);
    }

    #[test]
    fn pool_status_counts_failed_and_active_hosts() {
        let hosts = HostRegistry::new();
        let opts = CircuitBreakerOptions::default();
        hosts.insert(ip(1), true, "dc1", &opts);
        hosts.insert(ip(2), false, "dc1", &opts);
        hosts.record_health_check_result(&ip(2), false, std::time::Duration::from_millis(10));

        let monitor = ConnectionMonitor::new();
        let status = monitor.pool_status(&hosts, 2);
        assert_eq!(status.total_connections, 4);
        assert_eq!(status.active_connections, 2);
        assert_eq!(status.failed_hosts, 1);
        assert_eq!(status.reconnecting_hosts, 1);
    }
}
