//! Counters, gauges, and the snapshot type exposed to the embedding
//! application (C9).

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::breaker::CircuitState;
use crate::host::HostRegistry;
use crate::mode::OperationMode;

/// Atomically-updated counters and gauges, owned by
/// [`crate::client::ResilientClient`] and shared with every component.
#[derive(Debug)]
pub struct MetricsRegistry {
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    state_transitions: AtomicU64,
    started_at: Instant,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            state_transitions: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn incr_total_queries(&self) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_failed_queries(&self) {
        self.failed_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_state_transitions(&self) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed_queries(&self) -> u64 {
        self.failed_queries.load(Ordering::Relaxed)
    }

    /// `(total - failed) / total` when `total > 0`, else `1.0` by
    /// convention (spec.md §8, invariant 7).
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_queries();
        if total == 0 {
            return 1.0;
        }
        let failed = self.failed_queries();
        (total - failed) as f64 / total as f64
    }

    /// Build a full, immutable [`MetricsSnapshot`] from the live counters
    /// plus the current host registry and mode. Recreation counts are owned
    /// by [`crate::supervisor::SessionSupervisor`], the component that
    /// actually performs recreations, so the caller passes them in rather
    /// than this registry tracking a second, perpetually-stale copy.
    #[must_use]
    pub fn snapshot(
        &self,
        hosts: &HostRegistry,
        breaker_states: &HashMap<IpAddr, CircuitState>,
        current_mode: OperationMode,
        local_datacenter: &str,
        recreations: RecreationCounts,
    ) -> MetricsSnapshot {
        let host_states = hosts.snapshot();
        let total_hosts = host_states.len();
        let up_hosts = host_states.iter().filter(|(_, s)| s.is_up).count();

        let mut per_dc: HashMap<String, DcMetrics> = HashMap::new();
        let mut per_host: HashMap<IpAddr, HostMetrics> = HashMap::new();

        for (addr, state) in &host_states {
            let entry = per_dc.entry(state.datacenter.clone()).or_insert(DcMetrics {
                total_hosts: 0,
                up_hosts: 0,
                average_failures: 0.0,
            });
            entry.total_hosts += 1;
            if state.is_up {
                entry.up_hosts += 1;
            }

            per_host.insert(
                *addr,
                HostMetrics {
                    is_up: state.is_up,
                    consecutive_failures: state.consecutive_failures,
                    last_state_change_secs_ago: state.last_state_change.elapsed().as_secs_f64(),
                    last_health_check_secs_ago: state
                        .last_health_check
                        .map(|t| t.elapsed().as_secs_f64()),
                    last_health_check_duration: state.last_health_check_duration,
                    circuit_breaker_state: breaker_states.get(addr).copied(),
                },
            );
        }

        // Average consecutive failures per DC, computed after the loop so
        // totals above are final.
        for (dc, metrics) in per_dc.iter_mut() {
            let failures: Vec<u32> = host_states
                .iter()
                .filter(|(_, s)| &s.datacenter == dc)
                .map(|(_, s)| s.consecutive_failures)
                .collect();
            if !failures.is_empty() {
                metrics.average_failures =
                    failures.iter().copied().sum::<u32>() as f64 / failures.len() as f64;
            }
        }

        MetricsSnapshot {
            total_queries: self.total_queries(),
            failed_queries: self.failed_queries(),
            success_rate: self.success_rate(),
            state_transitions: self.state_transitions.load(Ordering::Relaxed),
            up_hosts,
            total_hosts,
            uptime: self.started_at.elapsed(),
            session_recreations: recreations.session_recreations,
            cluster_recreations: recreations.cluster_recreations,
            last_session_recreation_secs_ago: recreations
                .last_session_recreation
                .map(|t| t.elapsed().as_secs_f64()),
            current_operation_mode: current_mode,
            local_datacenter: local_datacenter.to_string(),
            per_dc,
            per_host,
        }
    }
}

/// Recreation counters as last observed on [`crate::supervisor::SessionSupervisor`],
/// passed into [`MetricsRegistry::snapshot`] at snapshot time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecreationCounts {
    pub session_recreations: u64,
    pub cluster_recreations: u64,
    pub last_session_recreation: Option<Instant>,
}

/// Per-datacenter aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcMetrics {
    pub total_hosts: usize,
    pub up_hosts: usize,
    pub average_failures: f64,
}

/// Per-host detail, mirroring the fields the embedding application cares
/// about for dashboards/alerting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostMetrics {
    pub is_up: bool,
    pub consecutive_failures: u32,
    pub last_state_change_secs_ago: f64,
    pub last_health_check_secs_ago: Option<f64>,
    pub last_health_check_duration: Option<Duration>,
    pub circuit_breaker_state: Option<CircuitState>,
}

/// Immutable point-in-time metrics snapshot, produced on demand by
/// [`crate::client::ResilientClient::get_metrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub failed_queries: u64,
    pub success_rate: f64,
    pub state_transitions: u64,
    pub up_hosts: usize,
    pub total_hosts: usize,
    pub uptime: Duration,
    pub session_recreations: u64,
    pub cluster_recreations: u64,
    pub last_session_recreation_secs_ago: Option<f64>,
    pub current_operation_mode: OperationMode,
    pub local_datacenter: String,
    pub per_dc: HashMap<String, DcMetrics>,
    pub per_host: HashMap<IpAddr, HostMetrics>,
}
