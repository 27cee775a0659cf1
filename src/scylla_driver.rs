//! Concrete [`crate::driver`] implementation backed by the `scylla` crate
//! (C3 ClusterBuilder).
//!
//! Grounded on the cpp-rust-driver's own `cluster.rs`, which builds a
//! `scylla::SessionBuilder` from a `LoadBalancingConfig` the same shape as
//! [`ScyllaClusterBuilder`] below: token-aware routing, DC-aware preference
//! with failover permitted, and optional latency awareness layered on top of
//! `DefaultPolicyBuilder`.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use scylla::execution_profile::ExecutionProfileBuilder;
use scylla::load_balancing::{DefaultPolicyBuilder, LatencyAwarenessBuilder};
use scylla::retry_policy::FallthroughRetryPolicy;
use scylla::speculative_execution::SimpleSpeculativeExecutionPolicy;
use scylla::statement::Consistency;
use scylla::{Session, SessionBuilder};
use tokio::sync::mpsc;

use crate::config::ResilientClientOptions;
use crate::driver::{
    ClusterBuilder, CqlCluster, CqlRows, CqlSession, CqlStatement, DriverHostInfo, TopologyEvent,
};
use crate::error::{Error, Result};

const DEFAULT_CONSISTENCY: Consistency = Consistency::LocalOne;

fn io_err(err: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::Driver(Box::new(err))
}

/// Builds a [`CqlCluster`] handle from [`ResilientClientOptions`] using the
/// real `scylla` driver.
#[derive(Debug, Default)]
pub struct ScyllaClusterBuilder;

#[async_trait]
impl ClusterBuilder for ScyllaClusterBuilder {
    async fn build(&self, options: &ResilientClientOptions) -> Result<Box<dyn CqlCluster>> {
        options.validate()?;

        let known_nodes: Vec<String> = options
            .contact_points
            .iter()
            .map(|cp| {
                if cp.contains(':') {
                    cp.clone()
                } else {
                    format!("{cp}:{}", options.default_port)
                }
            })
            .collect();

        let load_balancing = DefaultPolicyBuilder::new()
            .token_aware(true)
            .prefer_datacenter(options.local_datacenter.clone())
            .permit_dc_failover(true)
            .latency_awareness(LatencyAwarenessBuilder::new())
            .build();

        let speculative_execution = if options.enable_speculative_execution {
            Some(Arc::new(SimpleSpeculativeExecutionPolicy {
                max_retry_count: options.max_speculative_executions as usize,
                retry_interval: Duration::from_millis(options.speculative_delay_ms),
            }) as Arc<_>)
        } else {
            None
        };

        let mut profile_builder = ExecutionProfileBuilder::default()
            .consistency(DEFAULT_CONSISTENCY)
            .request_timeout(Some(Duration::from_millis(options.read_timeout_ms)))
            .load_balancing_policy(load_balancing)
            .retry_policy(Arc::new(FallthroughRetryPolicy));
        if let Some(spec) = speculative_execution {
            profile_builder = profile_builder.speculative_execution_policy(Some(spec));
        }

        let mut builder = SessionBuilder::new()
            .known_nodes(known_nodes)
            .connection_timeout(Duration::from_millis(options.connect_timeout_ms))
            .default_execution_profile_handle(profile_builder.build().into_handle());

        if let Some(credentials) = &options.credentials {
            builder = builder.user(&credentials.username, &credentials.password);
        }

        Ok(Box::new(ScyllaCluster {
            builder,
            local_datacenter: options.local_datacenter.clone(),
            default_port: options.default_port,
        }))
    }
}

#[derive(Debug)]
struct ScyllaCluster {
    builder: SessionBuilder,
    local_datacenter: String,
    default_port: u16,
}

#[async_trait]
impl CqlCluster for ScyllaCluster {
    async fn connect(&self) -> Result<Box<dyn CqlSession>> {
        let session = self.builder.clone().build().await.map_err(io_err)?;
        Ok(Box::new(ScyllaSession {
            session,
            builder: self.builder.clone(),
            default_port: self.default_port,
            pinned_sessions: DashMap::new(),
        }))
    }

    async fn local_hosts(&self) -> Result<Vec<DriverHostInfo>> {
        // A fresh, lightweight session is used purely to read cluster
        // metadata; building it here (instead of threading the live session
        // through this trait) keeps `local_hosts` independent of the
        // session lifecycle the supervisor manages.
        let session = self.builder.clone().build().await.map_err(io_err)?;
        let cluster_data = session.get_cluster_data();
        let local_dc = self.local_datacenter.to_ascii_lowercase();
        let hosts = cluster_data
            .get_nodes_info()
            .iter()
            .filter(|node| {
                node.datacenter
                    .as_deref()
                    .map(|dc| dc.eq_ignore_ascii_case(&local_dc))
                    .unwrap_or(false)
            })
            .map(|node| DriverHostInfo {
                address: node.address.ip(),
                datacenter: node.datacenter.clone().unwrap_or_default(),
                is_up: node.is_enabled(),
            })
            .collect();
        Ok(hosts)
    }

    fn subscribe_topology_events(&self) -> Option<mpsc::UnboundedReceiver<TopologyEvent>> {
        // The `scylla` crate does not currently expose a push-based topology
        // event stream through the public API; the resilience layer falls
        // back to `HostMonitor` polling (spec.md §4.4 note).
        None
    }

    async fn shutdown(&self) {}
}

#[derive(Debug)]
struct ScyllaSession {
    session: Session,
    /// Template used to open a single-node session restricted to exactly
    /// one host, for [`Self::execute_on_host`] below.
    builder: SessionBuilder,
    default_port: u16,
    /// Lazily-opened single-node sessions, one per host this session has
    /// been asked to pin a statement to. Kept for the lifetime of this
    /// `ScyllaSession` so repeated pinned calls (health checks, Aggressive
    /// Connection Refresh probes) reuse their connection instead of
    /// reconnecting every time.
    pinned_sessions: DashMap<IpAddr, Arc<Session>>,
}

#[async_trait]
impl CqlSession for ScyllaSession {
    async fn execute(&self, statement: &CqlStatement) -> Result<CqlRows> {
        let result = self
            .session
            .query_unpaged(statement.text.clone(), ())
            .await
            .map_err(io_err)?;
        let row_count = result.rows_num().unwrap_or(0);
        Ok(CqlRows { row_count })
    }

    async fn execute_on_host(&self, host: IpAddr, statement: &CqlStatement) -> Result<CqlRows> {
        let pinned = self.pinned_session(host).await?;
        let result = pinned
            .query_unpaged(statement.text.clone(), ())
            .await
            .map_err(io_err)?;
        let row_count = result.rows_num().unwrap_or(0);
        Ok(CqlRows { row_count })
    }

    async fn is_connected(&self) -> bool {
        !self.session.get_cluster_data().get_nodes_info().is_empty()
    }

    async fn close(&self) {}
}

impl ScyllaSession {
    /// Returns the cached single-node session for `host`, opening one
    /// restricted to that address alone if this is the first pinned call
    /// to it. Restricting `known_nodes` to the one address is what
    /// actually pins the statement, rather than merely preferring it
    /// through load-balancing.
    async fn pinned_session(&self, host: IpAddr) -> Result<Arc<Session>> {
        if let Some(existing) = self.pinned_sessions.get(&host) {
            return Ok(existing.clone());
        }
        let session = self
            .builder
            .clone()
            .known_nodes(vec![format!("{host}:{}", self.default_port)])
            .build()
            .await
            .map_err(io_err)?;
        let session = Arc::new(session);
        self.pinned_sessions.insert(host, session.clone());
        Ok(session)
    }
}
