//! Fake driver used by this crate's own unit tests and, behind the
//! `test-util` feature, by integration tests in `tests/`.
//!
//! A hand-rolled stand-in for the real backend, driven entirely by flags the
//! test sets before invoking the code under test, with no network or timing
//! dependency. Gated behind a feature rather than `#[cfg(test)]` alone, since
//! `tests/*.rs` files compile as a separate crate and need to reach it too.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::ResilientClientOptions;
use crate::driver::{
    ClusterBuilder, CqlCluster, CqlRows, CqlSession, CqlStatement, DriverHostInfo, TopologyEvent,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    None,
    FailHealthCheck,
    FailConnect,
}

impl FailMode {
    fn to_u8(self) -> u8 {
        match self {
            FailMode::None => 0,
            FailMode::FailHealthCheck => 1,
            FailMode::FailConnect => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => FailMode::FailHealthCheck,
            2 => FailMode::FailConnect,
            _ => FailMode::None,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    session_fail_mode: AtomicU8,
    connect_fail_mode: AtomicU8,
    hosts: Mutex<Vec<DriverHostInfo>>,
    /// Every host `execute_on_host` was actually called with, in order, so
    /// tests can assert a statement really was routed to (or away from) a
    /// specific host instead of the fake silently ignoring the pin.
    pinned_calls: Mutex<Vec<IpAddr>>,
}

/// A [`ClusterBuilder`] that hands out [`FakeCluster`]s sharing one set of
/// failure-injection flags, so a test can flip behavior after construction.
#[derive(Debug, Clone)]
pub struct FakeClusterBuilder {
    shared: Arc<Shared>,
}

impl FakeClusterBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn set_session_fail_mode(&self, mode: FailMode) {
        self.shared.session_fail_mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn set_connect_fail_mode(&self, mode: FailMode) {
        self.shared.connect_fail_mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    pub fn set_hosts(&self, hosts: Vec<DriverHostInfo>) {
        *self.shared.hosts.lock().unwrap() = hosts;
    }

    /// Hosts `execute_on_host` was actually invoked with, across every
    /// session this builder has ever handed out, in call order.
    pub fn pinned_calls(&self) -> Vec<IpAddr> {
        self.shared.pinned_calls.lock().unwrap().clone()
    }
}

impl Default for FakeClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterBuilder for FakeClusterBuilder {
    async fn build(&self, options: &ResilientClientOptions) -> Result<Box<dyn CqlCluster>> {
        options.validate()?;
        Ok(Box::new(FakeCluster {
            shared: self.shared.clone(),
        }))
    }
}

#[derive(Debug)]
struct FakeCluster {
    shared: Arc<Shared>,
}

#[async_trait]
impl CqlCluster for FakeCluster {
    async fn connect(&self) -> Result<Box<dyn CqlSession>> {
        let mode = FailMode::from_u8(self.shared.connect_fail_mode.load(Ordering::SeqCst));
        if mode == FailMode::FailConnect {
            return Err(Error::ConnectionFailure("fake connect failure".into()));
        }
        Ok(Box::new(FakeSession {
            shared: self.shared.clone(),
        }))
    }

    async fn local_hosts(&self) -> Result<Vec<DriverHostInfo>> {
        Ok(self.shared.hosts.lock().unwrap().clone())
    }

    fn subscribe_topology_events(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<TopologyEvent>> {
        None
    }

    async fn shutdown(&self) {}
}

#[derive(Debug)]
struct FakeSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl CqlSession for FakeSession {
    async fn execute(&self, _statement: &CqlStatement) -> Result<CqlRows> {
        let mode = FailMode::from_u8(self.shared.session_fail_mode.load(Ordering::SeqCst));
        if mode == FailMode::FailHealthCheck {
            return Err(Error::QueryExecution("fake query failure".into()));
        }
        Ok(CqlRows { row_count: 1 })
    }

    async fn execute_on_host(&self, host: IpAddr, statement: &CqlStatement) -> Result<CqlRows> {
        self.shared.pinned_calls.lock().unwrap().push(host);
        self.execute(statement).await
    }

    async fn is_connected(&self) -> bool {
        FailMode::from_u8(self.shared.connect_fail_mode.load(Ordering::SeqCst)) != FailMode::FailConnect
    }

    async fn close(&self) {}
}
