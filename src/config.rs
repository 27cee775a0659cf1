//! Immutable client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Circuit breaker tuning parameters, embedded in [`ResilientClientOptions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Time the breaker stays open before probing half-open.
    #[serde(with = "humantime_serde")]
    pub open_duration: Duration,
    /// Consecutive successes in half-open before the breaker closes.
    pub success_threshold_in_half_open: u32,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold_in_half_open: 2,
        }
    }
}

/// Immutable configuration accepted by [`crate::client::ResilientClient`].
///
/// YAML/JSON/env/flag layering is the embedding application's concern; this
/// type is only the landing shape. It implements [`Deserialize`] so an
/// application's config loader can populate it directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilientClientOptions {
    /// Contact points, each `host` or `host:port`.
    pub contact_points: Vec<String>,
    /// Default port used for contact points without an explicit port.
    pub default_port: u16,
    /// Optional username/password credentials.
    pub credentials: Option<Credentials>,
    /// Optional TLS configuration.
    pub tls: Option<TlsOptions>,

    /// Datacenter this client monitors and routes to preferentially.
    /// Required, non-empty (case-insensitive comparisons downstream).
    pub local_datacenter: String,

    /// How often [`crate::monitor::HostMonitor`] polls the driver's host list.
    #[serde(with = "humantime_serde")]
    pub host_monitoring_interval: Duration,
    /// How often [`crate::refresher::ConnectionRefresher`] runs.
    #[serde(with = "humantime_serde")]
    pub connection_refresh_interval: Duration,
    /// How often [`crate::supervisor::SessionSupervisor`] checks session health.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,

    /// Driver connect timeout, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Driver read timeout, in milliseconds.
    pub read_timeout_ms: u64,
    /// Delay between reconnection attempts, in milliseconds.
    pub reconnect_delay_ms: u64,

    /// Maximum number of retry attempts in [`crate::executor::QueryExecutor`].
    pub max_retry_attempts: u32,
    /// Base delay for exponential retry backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Cap on retry backoff, in milliseconds.
    pub retry_max_delay_ms: u64,

    /// Whether speculative execution is enabled on the built cluster.
    pub enable_speculative_execution: bool,
    /// Delay before a speculative execution is launched, in milliseconds.
    pub speculative_delay_ms: u64,
    /// Maximum number of speculative executions in flight.
    pub max_speculative_executions: u32,

    /// Connections to open per host (used by Aggressive Connection Refresh).
    pub connections_per_host: u32,
    /// Threshold above which a completed query is logged as slow.
    pub slow_query_threshold_ms: u64,

    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerOptions,
}

/// Username/password credentials for the underlying driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// TLS configuration for the underlying driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsOptions {
    /// Path to a CA bundle used to verify the server certificate.
    pub ca_cert_path: Option<String>,
    /// Optional client certificate for mutual TLS.
    pub client_cert_path: Option<String>,
    /// Optional client private key for mutual TLS.
    pub client_key_path: Option<String>,
}

impl Default for ResilientClientOptions {
    fn default() -> Self {
        Self {
            contact_points: Vec::new(),
            default_port: 9042,
            credentials: None,
            tls: None,
            local_datacenter: String::new(),
            host_monitoring_interval: Duration::from_secs(5),
            connection_refresh_interval: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(30),
            connect_timeout_ms: 3_000,
            read_timeout_ms: 5_000,
            reconnect_delay_ms: 1_000,
            max_retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 1_000,
            enable_speculative_execution: true,
            speculative_delay_ms: 200,
            max_speculative_executions: 2,
            connections_per_host: 2,
            slow_query_threshold_ms: 1_000,
            circuit_breaker: CircuitBreakerOptions::default(),
        }
    }
}

impl ResilientClientOptions {
    /// Start building options for the given, required local datacenter.
    #[must_use]
    pub fn new(local_datacenter: impl Into<String>) -> Self {
        Self {
            local_datacenter: local_datacenter.into(),
            ..Self::default()
        }
    }

    /// Validate the options, returning [`Error::ArgumentError`] when
    /// `local_datacenter` is empty or blank.
    pub fn validate(&self) -> Result<()> {
        if self.local_datacenter.trim().is_empty() {
            return Err(Error::ArgumentError(
                "localDatacenter must be a non-empty string".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonicalized (lower-cased) local datacenter, used for
    /// case-insensitive comparisons throughout the crate.
    #[must_use]
    pub fn local_datacenter_lower(&self) -> String {
        self.local_datacenter.to_ascii_lowercase()
    }
}
