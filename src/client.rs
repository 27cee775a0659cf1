//! Top-level facade wiring every component together (C1-C10).

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::ResilientClientOptions;
use crate::connection_monitor::{ConnectionMonitor, ConnectionPoolStatus};
use crate::driver::{ClusterBuilder, CqlRows, CqlStatement};
use crate::error::Result;
use crate::executor::{PinnedStatement, QueryExecutor};
use crate::host::HostRegistry;
use crate::metrics::{MetricsRegistry, MetricsSnapshot, RecreationCounts};
use crate::mode::{ModeInputs, OperationMode, OperationModeController};
use crate::monitor::HostMonitor;
use crate::refresher::ConnectionRefresher;
use crate::scylla_driver::ScyllaClusterBuilder;
use crate::supervisor::SessionSupervisor;
use uuid::Uuid;

/// The resilient Cassandra client: a fault-tolerance layer wrapping a raw
/// `scylla` session, presenting one entrypoint (`execute`) and a handful of
/// observability accessors to the embedding application.
pub struct ResilientClient {
    supervisor: Arc<SessionSupervisor>,
    hosts: Arc<HostRegistry>,
    mode_controller: Arc<OperationModeController>,
    metrics: Arc<MetricsRegistry>,
    executor: QueryExecutor,
    connection_monitor: ConnectionMonitor,
    host_monitor: parking_lot::Mutex<Option<HostMonitor>>,
    refresher: Arc<ConnectionRefresher>,
    options: ResilientClientOptions,
    disposed: AtomicBool,
    /// Per-instance identifier, included in log lines so a deployment
    /// running several clients can tell them apart.
    client_id: Uuid,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("client_id", &self.client_id)
            .field("local_datacenter", &self.options.local_datacenter)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl ResilientClient {
    /// Construct and connect a client: builds the cluster handle, opens the
    /// initial session, seeds the host registry from the cluster's local-DC
    /// hosts, and starts the three background workers.
    pub async fn connect(options: ResilientClientOptions) -> Result<Self> {
        Self::connect_with_builder(Arc::new(ScyllaClusterBuilder), options).await
    }

    /// As [`Self::connect`], but against a caller-supplied [`ClusterBuilder`]
    /// instead of the real `scylla` driver. Applications normally have no
    /// reason to call this directly; it exists so a test harness (or an
    /// embedder driving a non-ScyllaDB CQL backend) can exercise the full
    /// facade against its own [`ClusterBuilder`] implementation.
    pub async fn connect_with_builder(builder: Arc<dyn ClusterBuilder>, options: ResilientClientOptions) -> Result<Self> {
        options.validate()?;
        let client_id = Uuid::new_v4();
        info!(%client_id, "{} connecting to cluster", crate::logging::RESILIENT_CLIENT);

        let hosts = Arc::new(HostRegistry::new());
        let supervisor = Arc::new(SessionSupervisor::connect(builder, options.clone(), hosts.clone()).await?);

        let local_dc = options.local_datacenter_lower();
        let local_hosts = supervisor
            .with_cluster(|cluster| async move { cluster.local_hosts().await })
            .await
            .unwrap_or_default();
        for host in local_hosts.into_iter().filter(|h| h.datacenter.eq_ignore_ascii_case(&local_dc)) {
            hosts.insert(host.address, host.is_up, &host.datacenter, &options.circuit_breaker);
        }

        let mode_controller = Arc::new(OperationModeController::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let executor = QueryExecutor::new(&options);
        let connection_monitor = ConnectionMonitor::new();

        mode_controller.recompute(ModeInputs {
            up_hosts: hosts.up_count(),
            total_hosts: hosts.len(),
            success_rate: metrics.success_rate(),
        });

        let refresher = ConnectionRefresher::new(supervisor.clone(), hosts.clone(), &options);
        refresher.spawn_periodic(options.connection_refresh_interval);
        supervisor.attach_topology_support(refresher.clone()).await;

        let host_monitor = HostMonitor::spawn(
            supervisor.clone(),
            hosts.clone(),
            mode_controller.clone(),
            metrics.clone(),
            refresher.clone(),
            Arc::new(options.clone()),
        );

        info!(%client_id, "{} client connected and background workers started", crate::logging::RESILIENT_CLIENT);

        Ok(Self {
            supervisor,
            hosts,
            mode_controller,
            metrics,
            executor,
            connection_monitor,
            host_monitor: parking_lot::Mutex::new(Some(host_monitor)),
            refresher,
            options,
            disposed: AtomicBool::new(false),
            client_id,
        })
    }

    /// Execute a statement. See spec.md §4.9 for the full mode-gate / retry /
    /// breaker pseudoalgorithm.
    pub async fn execute(&self, statement: CqlStatement) -> Result<CqlRows> {
        self.execute_pinned(PinnedStatement::new(statement)).await
    }

    /// Execute a statement pinned to a specific host.
    pub async fn execute_on_host(&self, host: IpAddr, statement: CqlStatement) -> Result<CqlRows> {
        self.execute_pinned(PinnedStatement::pinned_to(statement, host)).await
    }

    async fn execute_pinned(&self, statement: PinnedStatement) -> Result<CqlRows> {
        self.executor
            .execute(statement, &self.supervisor, &self.hosts, &self.mode_controller, &self.metrics)
            .await
    }

    /// Convenience entrypoint marking the statement idempotent before
    /// executing it.
    pub async fn execute_idempotent(&self, cql: impl Into<String>) -> Result<CqlRows> {
        self.executor
            .execute_idempotent(cql, &self.supervisor, &self.hosts, &self.mode_controller, &self.metrics)
            .await
    }

    /// `isHealthyAsync()`: whether the client currently has a usable
    /// session and is not in Emergency mode.
    pub async fn is_healthy_async(&self) -> bool {
        self.supervisor.is_healthy(&self.mode_controller, &self.hosts).await
    }

    /// Current operation mode.
    #[must_use]
    pub fn current_mode(&self) -> OperationMode {
        self.mode_controller.current()
    }

    /// A full metrics snapshot.
    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let breaker_states = self
            .hosts
            .snapshot()
            .into_iter()
            .filter_map(|(addr, _)| self.hosts.breaker(&addr).map(|b| (addr, b.check_state())))
            .collect();
        let recreations = RecreationCounts {
            session_recreations: self.supervisor.session_recreations(),
            cluster_recreations: self.supervisor.cluster_recreations(),
            last_session_recreation: self.supervisor.last_session_recreation(),
        };
        self.metrics.snapshot(
            &self.hosts,
            &breaker_states,
            self.current_mode(),
            &self.options.local_datacenter,
            recreations,
        )
    }

    /// Point-in-time connection pool status.
    #[must_use]
    pub fn connection_pool_status(&self) -> ConnectionPoolStatus {
        self.connection_monitor
            .pool_status(&self.hosts, self.options.connections_per_host as usize)
    }

    /// Dispose the client: stop background workers, then release session
    /// and cluster handles, in that order. Idempotent — a second call is a
    /// no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut monitor) = self.host_monitor.lock().take() {
            monitor.stop();
        }
        self.refresher.stop();
        self.supervisor.dispose().await;
        info!(client_id = %self.client_id, "{} client disposed", crate::logging::RESILIENT_CLIENT);
    }

    /// This client's identifier, generated at [`Self::connect`] time.
    #[must_use]
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}
