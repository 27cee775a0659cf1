//! Periodic driver-metadata refresh and Aggressive Connection Refresh (C5).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ResilientClientOptions;
use crate::driver::{CqlStatement, CqlValue};
use crate::host::HostRegistry;
use crate::supervisor::SessionSupervisor;

const CANONICAL_METADATA_QUERY: &str = "SELECT key FROM system.local";

/// Runs the connection-refresh timer loop and, on host recovery, the
/// Aggressive Connection Refresh burst.
pub struct ConnectionRefresher {
    supervisor: Option<Arc<SessionSupervisor>>,
    hosts: Option<Arc<HostRegistry>>,
    connections_per_host: u32,
    tick_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRefresher")
            .field("connections_per_host", &self.connections_per_host)
            .finish()
    }
}

impl ConnectionRefresher {
    #[must_use]
    pub fn new(supervisor: Arc<SessionSupervisor>, hosts: Arc<HostRegistry>, options: &ResilientClientOptions) -> Arc<Self> {
        Arc::new(Self {
            supervisor: Some(supervisor),
            hosts: Some(hosts),
            connections_per_host: options.connections_per_host,
            tick_handle: parking_lot::Mutex::new(None),
        })
    }

    /// A refresher with no backing supervisor/registry, usable only to
    /// exercise [`HostMonitor`](crate::monitor::HostMonitor)'s scheduling
    /// call in isolation.
    #[cfg(test)]
    #[must_use]
    pub fn new_for_test() -> Arc<Self> {
        Arc::new(Self {
            supervisor: None,
            hosts: None,
            connections_per_host: 2,
            tick_handle: parking_lot::Mutex::new(None),
        })
    }

    /// Spawn the periodic refresh loop on `self`. `self` must already be
    /// held behind an `Arc` so the spawned task can share ownership.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                this.run_tick().await;
            }
        });
        *self.tick_handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.tick_handle.lock().take() {
            handle.abort();
        }
    }

    async fn run_tick(&self) {
        let (Some(supervisor), Some(hosts)) = (&self.supervisor, &self.hosts) else {
            return;
        };

        let metadata_refresh = supervisor
            .with_healthy_session(|session| async move {
                session.execute(&CqlStatement::new(CANONICAL_METADATA_QUERY).idempotent()).await
            })
            .await;

        if metadata_refresh.is_err() {
            debug!("connection refresh tick aborted: no healthy session");
            return;
        }

        let tracked: Vec<IpAddr> = hosts.snapshot().into_iter().map(|(addr, _)| addr).collect();
        for host in tracked {
            self.run_pinned_health_check(supervisor, hosts, host).await;
        }
    }

    async fn run_pinned_health_check(&self, supervisor: &SessionSupervisor, hosts: &HostRegistry, host: IpAddr) {
        let started = tokio::time::Instant::now();
        let statement = pinned_health_check_statement();
        let result = supervisor
            .with_healthy_session(|session| {
                let statement = statement.clone();
                async move { session.execute_on_host(host, &statement).await }
            })
            .await;
        let duration = started.elapsed();
        hosts.record_health_check_result(&host, result.is_ok(), duration);
    }

    /// Schedule an Aggressive Connection Refresh for `host` after `delay`.
    pub fn schedule_aggressive_refresh(self: &Arc<Self>, host: IpAddr, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.aggressive_refresh(host).await;
        });
    }

    async fn aggressive_refresh(&self, host: IpAddr) {
        let (Some(supervisor), Some(hosts)) = (&self.supervisor, &self.hosts) else {
            return;
        };

        let statement = pinned_health_check_statement();
        let attempts = (0..self.connections_per_host).map(|_| {
            let statement = statement.clone();
            supervisor.with_healthy_session(|session| {
                let statement = statement.clone();
                async move { session.execute_on_host(host, &statement).await }
            })
        });

        let results = futures::future::join_all(attempts).await;
        for result in &results {
            if let Err(error) = result {
                debug!(%host, %error, "aggressive connection refresh attempt failed");
            }
        }

        // Individual attempt failures are expected and already logged above;
        // completion itself is treated as recovery confirmation, zeroing
        // consecutiveFailures via the registry's success path.
        hosts.record_health_check_result(&host, true, Duration::from_secs(0));
        info!(
            %host,
            attempts = results.len(),
            "{} aggressive connection refresh complete",
            crate::logging::CONNECTION_REFRESH
        );
    }
}

impl Drop for ConnectionRefresher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pinned_health_check_statement() -> CqlStatement {
    CqlStatement::new("SELECT now() FROM system.local")
        .idempotent()
        .bind(CqlValue::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilientClientOptions;
    use crate::driver::{ClusterBuilder, DriverHostInfo};
    use crate::testing::FakeClusterBuilder;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[tokio::test]
    async fn pinned_health_checks_update_host_registry() {
        let fake = FakeClusterBuilder::new();
        fake.set_hosts(vec![DriverHostInfo {
            address: ip(1),
            datacenter: "dc1".into(),
            is_up: true,
        }]);
        let builder: Arc<dyn ClusterBuilder> = Arc::new(fake);
        let options = ResilientClientOptions::new("dc1");
        let hosts = Arc::new(HostRegistry::new());
        let supervisor = Arc::new(SessionSupervisor::connect(builder, options.clone(), hosts.clone()).await.unwrap());
        hosts.insert(ip(1), true, "dc1", &options.circuit_breaker);

        let refresher = ConnectionRefresher::new(supervisor, hosts.clone(), &options);
        refresher.run_tick().await;

        let state = hosts.get(&ip(1)).unwrap();
        assert!(state.last_health_check.is_some());
    }
}
