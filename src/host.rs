//! Per-host state tracking (C1) and the registry that keeps the state map
//! and breaker map in lockstep (invariant: a host is tracked in one map iff
//! it is tracked in the other).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::breaker::CircuitBreaker;
use crate::config::CircuitBreakerOptions;

/// Per-host mutable record.
///
/// Invariant: `last_state_change <= last_seen` at all times.
#[derive(Debug, Clone)]
pub struct HostStateInfo {
    pub is_up: bool,
    pub last_seen: Instant,
    pub last_state_change: Instant,
    pub consecutive_failures: u32,
    pub last_health_check: Option<Instant>,
    pub last_health_check_duration: Option<Duration>,
    pub datacenter: String,
}

impl HostStateInfo {
    /// Create a fresh record for a host just discovered with the given
    /// up/down status.
    #[must_use]
    pub fn new(is_up: bool, datacenter: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            is_up,
            last_seen: now,
            last_state_change: now,
            consecutive_failures: 0,
            last_health_check: None,
            last_health_check_duration: None,
            datacenter: datacenter.into(),
        }
    }

    /// Record that the host was observed up or down at `now`, updating
    /// `last_seen` and, on a change, `last_state_change`. Returns whether
    /// this call represents a state transition, and `last_state_change` as
    /// it stood immediately before this call (the timestamp the caller
    /// needs to compute how long the host was in its previous state, since
    /// `last_state_change` itself is overwritten by this same call).
    pub fn observe(&mut self, is_up: bool) -> (bool, Instant) {
        let now = Instant::now();
        let previous_state_change = self.last_state_change;
        self.last_seen = now;
        if self.is_up != is_up {
            self.is_up = is_up;
            self.last_state_change = now;
            (true, previous_state_change)
        } else {
            (false, previous_state_change)
        }
    }

    pub fn record_health_check(&mut self, duration: Duration) {
        self.last_health_check = Some(Instant::now());
        self.last_health_check_duration = Some(duration);
    }
}

/// Owns the per-host state map and per-host breaker map together, so the two
/// collections can never drift out of sync (`spec.md` invariant 2).
#[derive(Debug, Default)]
pub struct HostRegistry {
    states: DashMap<IpAddr, HostStateInfo>,
    breakers: DashMap<IpAddr, Arc<CircuitBreaker>>,
}

impl HostRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Number of hosts currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Insert a newly discovered host with a fresh breaker. No-op (besides
    /// the `observe` bookkeeping) if the host is already tracked.
    pub fn insert(&self, host: IpAddr, is_up: bool, datacenter: &str, breaker_opts: &CircuitBreakerOptions) {
        self.states
            .entry(host)
            .or_insert_with(|| HostStateInfo::new(is_up, datacenter));
        self.breakers
            .entry(host)
            .or_insert_with(|| Arc::new(CircuitBreaker::new(breaker_opts)));
    }

    /// Remove a host from both maps, returning whether it was present.
    pub fn remove(&self, host: &IpAddr) -> bool {
        let had_state = self.states.remove(host).is_some();
        self.breakers.remove(host);
        had_state
    }

    /// Whether a host is currently tracked.
    #[must_use]
    pub fn contains(&self, host: &IpAddr) -> bool {
        self.states.contains_key(host)
    }

    /// Observe a liveness reading for a tracked host, returning whether
    /// this call represents a state transition plus the host's
    /// `last_state_change` immediately before this call (`None` if the
    /// host is not tracked). See [`HostStateInfo::observe`].
    pub fn observe(&self, host: &IpAddr, is_up: bool) -> Option<(bool, Instant)> {
        self.states.get_mut(host).map(|mut entry| entry.observe(is_up))
    }

    /// Get the breaker for a tracked host.
    #[must_use]
    pub fn breaker(&self, host: &IpAddr) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(host).map(|entry| entry.clone())
    }

    /// Reset a tracked host's breaker to Closed.
    pub fn reset_breaker(&self, host: &IpAddr) {
        if let Some(breaker) = self.breaker(host) {
            breaker.reset();
        }
    }

    /// Record a health-check result against a tracked host's state and
    /// breaker together.
    pub fn record_health_check_result(&self, host: &IpAddr, success: bool, duration: Duration) {
        if let Some(mut state) = self.states.get_mut(host) {
            state.record_health_check(duration);
            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures += 1;
            }
        }
        if let Some(breaker) = self.breaker(host) {
            if success {
                breaker.record_success();
            } else {
                breaker.record_failure();
            }
        }
    }

    /// Snapshot of every tracked host's current address + state, for
    /// metrics and diffing against a freshly observed driver host list.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(IpAddr, HostStateInfo)> {
        self.states
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Hosts that are currently up.
    #[must_use]
    pub fn up_count(&self) -> usize {
        self.states.iter().filter(|entry| entry.value().is_up).count()
    }

    /// Clear every tracked host and breaker. Used when rebuilding from a
    /// freshly recreated cluster handle (§4.6 `recreateCluster` step 4).
    pub fn clear(&self) {
        self.states.clear();
        self.breakers.clear();
    }

    /// A single tracked host's state, cloned out.
    #[must_use]
    pub fn get(&self, host: &IpAddr) -> Option<HostStateInfo> {
        self.states.get(host).map(|entry| entry.value().clone())
    }
}
