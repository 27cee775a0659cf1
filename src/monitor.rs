//! Periodic driver host-list polling (C4).
//!
//! Structured as a single background `tokio::time::interval` loop: one task,
//! one timer, no overlap between ticks.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ResilientClientOptions;
use crate::driver::DriverHostInfo;
use crate::host::HostRegistry;
use crate::metrics::MetricsRegistry;
use crate::mode::{ModeInputs, OperationModeController};
use crate::refresher::ConnectionRefresher;
use crate::supervisor::SessionSupervisor;

/// Owns the host-monitoring background task.
#[derive(Debug)]
pub struct HostMonitor {
    handle: Option<JoinHandle<()>>,
}

impl HostMonitor {
    /// Spawn the polling loop. Returns immediately; the loop runs until
    /// [`Self::stop`] is called or the returned value is dropped.
    pub fn spawn(
        supervisor: Arc<SessionSupervisor>,
        hosts: Arc<HostRegistry>,
        mode_controller: Arc<OperationModeController>,
        metrics: Arc<MetricsRegistry>,
        refresher: Arc<ConnectionRefresher>,
        options: Arc<ResilientClientOptions>,
    ) -> Self {
        let interval = options.host_monitoring_interval;
        let local_dc = options.local_datacenter_lower();
        let breaker_options = options.circuit_breaker.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                run_tick(&supervisor, &hosts, &mode_controller, &metrics, &refresher, &local_dc, &breaker_options).await;
            }
        });

        Self { handle: Some(handle) }
    }

    /// Stop the background loop. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for HostMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_tick(
    supervisor: &SessionSupervisor,
    hosts: &HostRegistry,
    mode_controller: &OperationModeController,
    metrics: &MetricsRegistry,
    refresher: &ConnectionRefresher,
    local_dc: &str,
    breaker_options: &crate::config::CircuitBreakerOptions,
) {
    let driver_hosts = supervisor
        .with_cluster(|cluster| async move { cluster.local_hosts().await })
        .await;

    let driver_hosts = match driver_hosts {
        Ok(hosts) => hosts,
        Err(error) => {
            warn!(%error, "host monitor tick failed to fetch driver host list");
            return;
        }
    };

    let local_hosts: Vec<DriverHostInfo> = driver_hosts
        .into_iter()
        .filter(|h| h.datacenter.eq_ignore_ascii_case(local_dc))
        .collect();

    let seen: HashSet<IpAddr> = local_hosts.iter().map(|h| h.address).collect();

    for reported in &local_hosts {
        if !hosts.contains(&reported.address) {
            hosts.insert(reported.address, reported.is_up, &reported.datacenter, breaker_options);
            continue;
        }

        if let Some((changed, previous_state_change)) = hosts.observe(&reported.address, reported.is_up) {
            if changed {
                metrics.incr_state_transitions();
                if reported.is_up {
                    handle_up_transition(hosts, refresher, reported.address, previous_state_change);
                } else {
                    handle_down_transition(hosts, reported.address);
                }
            }
        }
    }

    let tracked: Vec<IpAddr> = hosts.snapshot().into_iter().map(|(addr, _)| addr).collect();
    for addr in tracked {
        if !seen.contains(&addr) {
            hosts.remove(&addr);
            info!(host = %addr, "host dropped from driver topology, removed from tracking");
        }
    }

    let up = hosts.up_count();
    let total = hosts.len();
    let success_rate = metrics.success_rate();
    let (new_mode, changed) = mode_controller.recompute(ModeInputs {
        up_hosts: up,
        total_hosts: total,
        success_rate,
    });
    if changed {
        warn!(mode = %new_mode, "operation mode transition");
    }
}

fn handle_down_transition(hosts: &HostRegistry, host: IpAddr) {
    warn!(%host, "{} host transitioned down", crate::logging::HOST_FAILURE);
    if hosts.up_count() == 0 {
        error!("{} local datacenter has no remaining healthy hosts", crate::logging::HOST_FAILURE);
    }
}

fn handle_up_transition(hosts: &HostRegistry, refresher: &ConnectionRefresher, host: IpAddr, down_since: std::time::Instant) {
    let outage = down_since.elapsed();
    info!(%host, outage_secs = outage.as_secs_f64(), "{} host transitioned up", crate::logging::HOST_RECOVERY);
    hosts.reset_breaker(&host);
    refresher.schedule_aggressive_refresh(host, Duration::from_secs(2));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResilientClientOptions;
    use crate::driver::ClusterBuilder;
    use crate::metrics::MetricsRegistry;
    use crate::testing::FakeClusterBuilder;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[tokio::test]
    async fn tick_tracks_new_local_hosts_and_drops_remote() {
        let fake = FakeClusterBuilder::new();
        fake.set_hosts(vec![
            DriverHostInfo {
                address: ip(1),
                datacenter: "dc1".into(),
                is_up: true,
            },
            DriverHostInfo {
                address: ip(2),
                datacenter: "dc2".into(),
                is_up: true,
            },
        ]);
        let builder: Arc<dyn ClusterBuilder> = Arc::new(fake);
        let options = ResilientClientOptions::new("dc1");
        let supervisor = SessionSupervisor::connect(builder, options.clone(), Arc::new(HostRegistry::new()))
            .await
            .unwrap();
        let hosts = HostRegistry::new();
        let mode_controller = OperationModeController::new();
        let metrics = MetricsRegistry::new();
        let refresher = ConnectionRefresher::new_for_test();

        run_tick(
            &supervisor,
            &hosts,
            &mode_controller,
            &metrics,
            &refresher,
            "dc1",
            &options.circuit_breaker,
        )
        .await;

        assert!(hosts.contains(&ip(1)));
        assert!(!hosts.contains(&ip(2)));
    }
}
