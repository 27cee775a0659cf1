//! Session and cluster-handle lifecycle management (C6).
//!
//! All mutation of the cluster/session handles is serialized through one
//! lock, while readers fetch a session fresh on every call rather than
//! holding a long-lived reference across an await point.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::config::ResilientClientOptions;
use crate::driver::{health_check_statement, health_check_timeout, ClusterBuilder, CqlCluster, CqlSession};
use crate::error::Result;
use crate::host::HostRegistry;
use crate::mode::{OperationMode, OperationModeController};
use crate::refresher::ConnectionRefresher;
use crate::topology::TopologyListener;

/// Handles currently in use, swapped only while the recreation lock is held.
struct Handles {
    cluster: Box<dyn CqlCluster>,
    session: Box<dyn CqlSession>,
    /// Re-spawned every time `cluster` is swapped, so handlers are always
    /// attached to the live handle (spec.md §4.7: "Handlers must be
    /// re-attached whenever the cluster handle is recreated").
    topology_listener: Option<TopologyListener>,
}

/// Owns the live cluster/session handles and serializes their replacement.
pub struct SessionSupervisor {
    builder: Arc<dyn ClusterBuilder>,
    options: ResilientClientOptions,
    handles: AsyncMutex<Handles>,
    hosts: Arc<HostRegistry>,
    /// Set once, after construction, by [`Self::attach_topology_support`];
    /// needed to re-subscribe and re-spawn the topology listener on cluster
    /// recreation without a circular constructor dependency (the refresher
    /// itself is built from a reference to this supervisor).
    refresher: parking_lot::Mutex<Option<Arc<ConnectionRefresher>>>,
    session_recreations: AtomicU64,
    cluster_recreations: AtomicU64,
    last_session_recreation: parking_lot::Mutex<Option<Instant>>,
}

impl std::fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("session_recreations", &self.session_recreations.load(Ordering::Relaxed))
            .field("cluster_recreations", &self.cluster_recreations.load(Ordering::Relaxed))
            .finish()
    }
}

impl SessionSupervisor {
    /// Build the initial cluster handle and session, failing if either
    /// cannot be established (construction-time connect per spec.md §3
    /// lifecycle note). `hosts` is the same registry the client seeds from
    /// this cluster's host list, shared so later recreations can rebuild it
    /// in place.
    pub async fn connect(builder: Arc<dyn ClusterBuilder>, options: ResilientClientOptions, hosts: Arc<HostRegistry>) -> Result<Self> {
        let cluster = builder.build(&options).await?;
        let session = cluster.connect().await?;
        Ok(Self {
            builder,
            options,
            handles: AsyncMutex::new(Handles {
                cluster,
                session,
                topology_listener: None,
            }),
            hosts,
            refresher: parking_lot::Mutex::new(None),
            session_recreations: AtomicU64::new(0),
            cluster_recreations: AtomicU64::new(0),
            last_session_recreation: parking_lot::Mutex::new(None),
        })
    }

    /// Record the [`ConnectionRefresher`] this supervisor's topology
    /// listener should feed host-added notifications to, and attach a
    /// listener to the current cluster handle if it supports push topology
    /// events. Called once, after the refresher is constructed (it needs a
    /// reference to this supervisor, so it cannot exist before `connect`
    /// returns).
    pub async fn attach_topology_support(&self, refresher: Arc<ConnectionRefresher>) {
        *self.refresher.lock() = Some(refresher);
        let mut handles = self.handles.lock().await;
        self.spawn_topology_listener(&mut handles);
    }

    /// Re-subscribe and spawn a [`TopologyListener`] against the cluster
    /// handle currently in `handles`, replacing any previous one. No-op if
    /// no refresher has been attached yet or the driver build exposes no
    /// push-event channel (the current `scylla` adapter does not).
    fn spawn_topology_listener(&self, handles: &mut Handles) {
        let Some(refresher) = self.refresher.lock().clone() else {
            return;
        };
        handles.topology_listener = handles.cluster.subscribe_topology_events().map(|events| {
            TopologyListener::spawn(
                events,
                self.hosts.clone(),
                refresher,
                self.options.circuit_breaker.clone(),
                self.options.local_datacenter_lower(),
            )
        });
    }

    pub fn session_recreations(&self) -> u64 {
        self.session_recreations.load(Ordering::Relaxed)
    }

    pub fn cluster_recreations(&self) -> u64 {
        self.cluster_recreations.load(Ordering::Relaxed)
    }

    pub fn last_session_recreation(&self) -> Option<Instant> {
        *self.last_session_recreation.lock()
    }

    /// Whether the current session answers the canonical health-check
    /// query, without taking the recreation lock.
    async fn probe_current_session(&self) -> bool {
        let handles = self.handles.lock().await;
        probe(&*handles.session).await
    }

    /// `getHealthySession()`: returns a usable session, recreating as
    /// needed. Takes a closure so the caller gets exclusive access to the
    /// session for exactly the duration of one statement, matching the "no
    /// long-lived reference across callers" guarantee in spec.md §5.
    pub async fn with_healthy_session<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn CqlSession) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if self.probe_current_session().await {
            let handles = self.handles.lock().await;
            return f(&*handles.session).await;
        }
        self.recreate_session().await?;
        let handles = self.handles.lock().await;
        f(&*handles.session).await
    }

    /// `isHealthyAsync()`.
    pub async fn is_healthy(&self, mode_controller: &OperationModeController, host_registry: &HostRegistry) -> bool {
        if host_registry.up_count() == 0 {
            return false;
        }
        if mode_controller.current() == OperationMode::Emergency {
            return false;
        }
        self.probe_current_session().await
    }

    /// Supervisor tick: recreate the session if unhealthy.
    pub async fn tick(&self, mode_controller: &OperationModeController, host_registry: &HostRegistry) {
        if !self.is_healthy(mode_controller, host_registry).await {
            if let Err(error) = self.recreate_session().await {
                warn!(%error, "session recreation failed during supervisor tick");
            }
        }
    }

    /// `recreateSession()`.
    pub async fn recreate_session(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        // Double-checked: another caller may have already fixed things
        // while we were waiting for the lock.
        if probe(&*handles.session).await {
            return Ok(());
        }

        match handles.cluster.connect().await {
            Ok(new_session) => {
                let old_session = std::mem::replace(&mut handles.session, new_session);
                old_session.close().await;
                self.session_recreations.fetch_add(1, Ordering::Relaxed);
                *self.last_session_recreation.lock() = Some(Instant::now());
                info!(
                    attempt = self.session_recreations.load(Ordering::Relaxed),
                    "Session successfully recreated (attempt #{})",
                    self.session_recreations.load(Ordering::Relaxed)
                );
                Ok(())
            }
            Err(error) => {
                warn!(%error, "session recreation failed on existing cluster handle, rebuilding cluster");
                drop(handles);
                self.recreate_cluster_locked().await
            }
        }
    }

    /// `recreateCluster()`. Public so [`crate::topology::TopologyListener`]
    /// re-attachment callers and tests can drive it directly; internally,
    /// `recreate_session` falls through to this on cluster-level failure.
    pub async fn recreate_cluster(&self) -> Result<()> {
        self.recreate_cluster_locked().await
    }

    async fn recreate_cluster_locked(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;

        let new_cluster = self.builder.build(&self.options).await?;
        let new_session = match new_cluster.connect().await {
            Ok(session) => session,
            Err(error) => {
                // Retain old handles unchanged on failure (§4.6 step 6).
                new_cluster.shutdown().await;
                return Err(error);
            }
        };

        // §4.6 step 4: re-initialize the per-host state and breaker maps
        // from the new handle's local-DC hosts before the old handle is
        // disposed, so no caller ever observes a registry built from a
        // cluster handle that no longer exists.
        let local_dc = self.options.local_datacenter_lower();
        let local_hosts: Vec<_> = new_cluster
            .local_hosts()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|h| h.datacenter.eq_ignore_ascii_case(&local_dc))
            .collect();
        self.hosts.clear();
        for host in &local_hosts {
            self.hosts
                .insert(host.address, host.is_up, &host.datacenter, &self.options.circuit_breaker);
        }

        // §4.6 step 2 / §4.7: detach the old listener before the cluster it
        // was reading from is disposed, then attach a fresh one to the new
        // handle.
        let old_listener = handles.topology_listener.take();
        let old_cluster = std::mem::replace(&mut handles.cluster, new_cluster);
        let old_session = std::mem::replace(&mut handles.session, new_session);
        self.spawn_topology_listener(&mut handles);
        drop(old_listener);

        old_session.close().await;
        old_cluster.shutdown().await;

        self.cluster_recreations.fetch_add(1, Ordering::Relaxed);
        self.session_recreations.fetch_add(1, Ordering::Relaxed);
        *self.last_session_recreation.lock() = Some(Instant::now());
        info!("{} cluster handle successfully recreated", crate::logging::TOPOLOGY_REFRESH);
        Ok(())
    }

    /// Access the live cluster handle, for callers (host monitor,
    /// topology listener) that need cluster-level metadata rather than a
    /// session. Held only for the duration of the closure.
    pub async fn with_cluster<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(&dyn CqlCluster) -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let handles = self.handles.lock().await;
        f(&*handles.cluster).await
    }

    /// Dispose both handles. Idempotent at the call-site via
    /// [`crate::client::ResilientClient`]'s disposal guard; calling this
    /// twice would double-close, so callers must not. Detaches the topology
    /// listener before shutting down the cluster it reads from (§9
    /// disposal ordering).
    pub async fn dispose(&self) {
        let mut handles = self.handles.lock().await;
        if let Some(mut listener) = handles.topology_listener.take() {
            listener.detach();
        }
        handles.session.close().await;
        handles.cluster.shutdown().await;
    }
}

async fn probe(session: &dyn CqlSession) -> bool {
    let statement = health_check_statement();
    match tokio::time::timeout(health_check_timeout(), session.execute(&statement)).await {
        Ok(Ok(_)) => true,
        Ok(Err(_)) | Err(_) => false,
    }
}
