//! A client-side fault-tolerance layer over the `scylla` native-protocol
//! driver: per-host circuit breakers, background host/topology monitoring,
//! guarded session and cluster-handle recreation, and a mode-gated query
//! executor with bounded-exponential retry.
//!
//! The [`ResilientClient`] facade is the crate's single entrypoint; its
//! constituent components (`breaker`, `host`, `mode`, `supervisor`,
//! `monitor`, `refresher`, `topology`, `executor`, `metrics`,
//! `connection_monitor`) are public so an application that needs finer
//! control can assemble them directly.

pub mod breaker;
pub mod client;
pub mod config;
pub mod connection_monitor;
pub mod driver;
pub mod error;
pub mod executor;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod mode;
pub mod monitor;
pub mod refresher;
pub mod scylla_driver;
pub mod supervisor;
pub mod topology;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::ResilientClient;
pub use config::{CircuitBreakerOptions, Credentials, ResilientClientOptions, TlsOptions};
pub use connection_monitor::{ConnectionMonitor, ConnectionPoolStatus, ReconnectionEvent};
pub use driver::{ClusterBuilder, CqlCluster, CqlRows, CqlSession, CqlStatement, CqlValue, DriverHostInfo, TopologyEvent};
pub use error::{Error, Result};
pub use metrics::{DcMetrics, HostMetrics, MetricsRegistry, MetricsSnapshot};
pub use mode::OperationMode;
