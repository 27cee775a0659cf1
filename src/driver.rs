//! Driver abstraction.
//!
//! The rest of this crate never names `scylla` types directly; it speaks to
//! these traits instead. This keeps the resilience logic testable against a
//! fake driver and keeps the blast radius of a future driver swap to
//! [`crate::scylla_driver`].

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ResilientClientOptions;
use crate::error::Result;

/// A query or prepared-statement invocation, abstracted over row binding.
#[derive(Debug, Clone)]
pub struct CqlStatement {
    /// Raw CQL text, or the name under which a statement was prepared.
    pub text: String,
    /// Bound values, already serialized to the driver's wire representation.
    pub bound_values: Vec<CqlValue>,
    /// Whether this statement is safe to retry/speculatively re-execute.
    pub idempotent: bool,
}

impl CqlStatement {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            bound_values: Vec::new(),
            idempotent: false,
        }
    }

    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    #[must_use]
    pub fn bind(mut self, value: CqlValue) -> Self {
        self.bound_values.push(value);
        self
    }
}

/// A narrow value type covering what the resilience layer needs to pin
/// health-check queries and route by key; the concrete driver adapter is
/// responsible for the full CQL type system.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Text(String),
    Int(i64),
    Bool(bool),
}

/// Opaque query result. The resilience layer only needs to know whether rows
/// came back, not their shape.
#[derive(Debug, Clone, Default)]
pub struct CqlRows {
    pub row_count: usize,
}

/// Host metadata as reported by the driver's topology/metadata API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverHostInfo {
    pub address: IpAddr,
    pub datacenter: String,
    pub is_up: bool,
}

/// A topology change pushed by the driver, consumed by
/// [`crate::topology::TopologyListener`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    HostAdded(DriverHostInfo),
    HostRemoved(IpAddr),
}

/// A live connection to the cluster, obtained from a [`CqlCluster`].
///
/// A handle bound to one underlying connection pool, queried directly or
/// pinned to a single host.
#[async_trait]
pub trait CqlSession: Send + Sync + fmt::Debug {
    /// Execute a statement against the session's normal load-balancing
    /// policy.
    async fn execute(&self, statement: &CqlStatement) -> Result<CqlRows>;

    /// Execute a statement pinned to a specific host, bypassing load
    /// balancing. Used for host-specific health checks and Aggressive
    /// Connection Refresh (§4.5).
    async fn execute_on_host(&self, host: IpAddr, statement: &CqlStatement) -> Result<CqlRows>;

    /// Whether the session reports itself connected to at least one host.
    async fn is_connected(&self) -> bool;

    /// Release any resources held by this session. Called exactly once per
    /// session instance, during supervisor-driven recreation or client
    /// disposal.
    async fn close(&self);
}

/// A cluster handle: the factory for sessions and the source of topology
/// metadata and events.
///
/// A long-lived handle that produces the short-lived [`CqlSession`]s the
/// rest of the crate actually talks to.
#[async_trait]
pub trait CqlCluster: Send + Sync + fmt::Debug {
    /// Open a new session against this cluster handle.
    async fn connect(&self) -> Result<Box<dyn CqlSession>>;

    /// Current known hosts in the local datacenter, as reported by driver
    /// metadata, polled by [`crate::monitor::HostMonitor`].
    async fn local_hosts(&self) -> Result<Vec<DriverHostInfo>>;

    /// Subscribe to driver-pushed topology events. Returns `None` if the
    /// underlying driver build does not support push notifications, in
    /// which case callers fall back to polling only.
    fn subscribe_topology_events(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<TopologyEvent>>;

    /// Release cluster-level resources. Called during cluster recreation or
    /// client disposal, after every session it produced has been closed.
    async fn shutdown(&self);
}

/// Builds a [`CqlCluster`] handle from client options. Implemented
/// concretely by [`crate::scylla_driver::ScyllaClusterBuilder`]; kept as a
/// trait so tests can substitute a fake builder.
#[async_trait]
pub trait ClusterBuilder: Send + Sync {
    async fn build(&self, options: &ResilientClientOptions) -> Result<Box<dyn CqlCluster>>;
}

/// Canonical health-check statement issued by [`crate::refresher::ConnectionRefresher`]
/// and by host-pinned checks, per §4.5.
#[must_use]
pub fn health_check_statement() -> CqlStatement {
    CqlStatement::new("SELECT now() FROM system.local").idempotent()
}

/// Default timeout applied to a single health-check execution, independent
/// of the configured read timeout, so a wedged host cannot stall the
/// refresher indefinitely.
#[must_use]
pub fn health_check_timeout() -> Duration {
    Duration::from_secs(2)
}
