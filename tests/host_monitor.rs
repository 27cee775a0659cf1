//! End-to-end coverage of host state tracking and down/up transitions
//! (spec.md §4.2, §8 scenario S1) through the public crate API.

mod support;

use std::sync::Arc;
use std::time::Duration;

use resilient_cassandra_client::driver::{ClusterBuilder, DriverHostInfo};
use resilient_cassandra_client::testing::FakeClusterBuilder;
use resilient_cassandra_client::{OperationMode, ResilientClient, ResilientClientOptions};

fn ip(n: u8) -> std::net::IpAddr {
    std::net::IpAddr::V4(std::net::Ipv4Addr::new(10, 0, 0, n))
}

#[tokio::test(start_paused = true)]
async fn single_node_down_transition_flips_mode_to_degraded() {
    support::init_tracing();
    let fake = FakeClusterBuilder::new();
    fake.set_hosts(vec![
        DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(2), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(3), datacenter: "dc1".into(), is_up: true },
    ]);
    let builder: Arc<dyn ClusterBuilder> = Arc::new(fake.clone());
    let options = ResilientClientOptions::new("dc1");
    let interval = options.host_monitoring_interval;
    let client = ResilientClient::connect_with_builder(builder, options).await.unwrap();
    assert_eq!(client.current_mode(), OperationMode::Normal);

    fake.set_hosts(vec![
        DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(2), datacenter: "dc1".into(), is_up: false },
        DriverHostInfo { address: ip(3), datacenter: "dc1".into(), is_up: true },
    ]);

    tokio::time::advance(interval + Duration::from_millis(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(client.current_mode(), OperationMode::Degraded);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn recovered_host_is_reflected_after_the_next_tick() {
    support::init_tracing();
    let fake = FakeClusterBuilder::new();
    fake.set_hosts(vec![
        DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(2), datacenter: "dc1".into(), is_up: false },
    ]);
    let builder: Arc<dyn ClusterBuilder> = Arc::new(fake.clone());
    let options = ResilientClientOptions::new("dc1");
    let interval = options.host_monitoring_interval;
    let client = ResilientClient::connect_with_builder(builder, options).await.unwrap();
    assert_eq!(client.current_mode(), OperationMode::Degraded);

    fake.set_hosts(vec![
        DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(2), datacenter: "dc1".into(), is_up: true },
    ]);

    tokio::time::advance(interval + Duration::from_millis(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(client.current_mode(), OperationMode::Normal);
    client.dispose().await;
}

#[tokio::test(start_paused = true)]
async fn host_dropped_from_driver_topology_is_untracked_and_pool_status_shrinks() {
    support::init_tracing();
    let fake = FakeClusterBuilder::new();
    fake.set_hosts(vec![
        DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true },
        DriverHostInfo { address: ip(2), datacenter: "dc1".into(), is_up: true },
    ]);
    let builder: Arc<dyn ClusterBuilder> = Arc::new(fake.clone());
    let options = ResilientClientOptions::new("dc1");
    let interval = options.host_monitoring_interval;
    let client = ResilientClient::connect_with_builder(builder, options).await.unwrap();
    assert_eq!(client.connection_pool_status().total_connections, 4);

    fake.set_hosts(vec![DriverHostInfo { address: ip(1), datacenter: "dc1".into(), is_up: true }]);

    tokio::time::advance(interval + Duration::from_millis(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(client.connection_pool_status().total_connections, 2);
    client.dispose().await;
}
