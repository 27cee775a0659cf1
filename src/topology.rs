//! Driver-pushed topology event handling (C10).
//!
//! Consumes [`TopologyEvent`]s filtered by local datacenter. When the
//! underlying driver build exposes no push channel (the current `scylla`
//! adapter does not, see [`crate::scylla_driver`]), [`TopologyListener::spawn`]
//! is simply never called and [`crate::monitor::HostMonitor`] polling is the
//! sole topology source — this mirrors spec.md §4.7's note that push
//! notifications are a driver extension, not a hard requirement.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::CircuitBreakerOptions;
use crate::driver::TopologyEvent;
use crate::host::HostRegistry;
use crate::refresher::ConnectionRefresher;

/// Owns the background task consuming driver topology events.
#[derive(Debug)]
pub struct TopologyListener {
    handle: Option<JoinHandle<()>>,
}

impl TopologyListener {
    /// Attach to a driver event channel. The channel is consumed until it
    /// closes (the cluster handle being recreated closes the old channel;
    /// the caller must call this again against the new handle per §4.7's
    /// re-attachment requirement).
    pub fn spawn(
        mut events: UnboundedReceiver<TopologyEvent>,
        hosts: Arc<HostRegistry>,
        refresher: Arc<ConnectionRefresher>,
        breaker_options: CircuitBreakerOptions,
        local_dc: String,
    ) -> Self {
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                handle_event(event, &hosts, &refresher, &breaker_options, &local_dc);
            }
        });
        Self { handle: Some(handle) }
    }

    /// Detach from the event stream. Must be called before the cluster
    /// handle producing it is disposed (§4.7).
    pub fn detach(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for TopologyListener {
    fn drop(&mut self) {
        self.detach();
    }
}

fn handle_event(
    event: TopologyEvent,
    hosts: &HostRegistry,
    refresher: &Arc<ConnectionRefresher>,
    breaker_options: &CircuitBreakerOptions,
    local_dc: &str,
) {
    let tag = crate::logging::TOPOLOGY_CHANGE;
    match event {
        TopologyEvent::HostAdded(info) => {
            if !info.datacenter.eq_ignore_ascii_case(local_dc) {
                debug!(host = %info.address, dc = %info.datacenter, "{tag} ignoring host-added in remote datacenter");
                return;
            }
            info!(host = %info.address, "{tag} host added");
            hosts.insert(info.address, info.is_up, &info.datacenter, breaker_options);
            refresher.schedule_aggressive_refresh(info.address, Duration::from_secs(0));
        }
        TopologyEvent::HostRemoved(addr) => {
            if hosts.remove(&addr) {
                info!(host = %addr, "{tag} host removed");
            } else {
                debug!(host = %addr, "{tag} host-removed for untracked or remote-datacenter host");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverHostInfo;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, n))
    }

    #[test]
    fn remote_dc_host_added_is_ignored() {
        let hosts = HostRegistry::new();
        let refresher = ConnectionRefresher::new_for_test();
        handle_event(
            TopologyEvent::HostAdded(DriverHostInfo {
                address: ip(1),
                datacenter: "dc2".into(),
                is_up: true,
            }),
            &hosts,
            &refresher,
            &CircuitBreakerOptions::default(),
            "dc1",
        );
        assert!(!hosts.contains(&ip(1)));
    }

    #[test]
    fn local_dc_host_added_is_tracked() {
        let hosts = HostRegistry::new();
        let refresher = ConnectionRefresher::new_for_test();
        handle_event(
            TopologyEvent::HostAdded(DriverHostInfo {
                address: ip(1),
                datacenter: "DC1".into(),
                is_up: true,
            }),
            &hosts,
            &refresher,
            &CircuitBreakerOptions::default(),
            "dc1",
        );
        assert!(hosts.contains(&ip(1)));
    }

    #[test]
    fn host_removed_drops_tracked_host() {
        let hosts = HostRegistry::new();
        hosts.insert(ip(1), true, "dc1", &CircuitBreakerOptions::default());
        let refresher = ConnectionRefresher::new_for_test();
        handle_event(
            TopologyEvent::HostRemoved(ip(1)),
            &hosts,
            &refresher,
            &CircuitBreakerOptions::default(),
            "dc1",
        );
        assert!(!hosts.contains(&ip(1)));
    }
}
