//! Operation mode derivation (C7).

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

/// The client's current operating posture, derived from live cluster health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationMode {
    /// Everything healthy; no restrictions.
    Normal,
    /// Some hosts down or success rate degraded; queries proceed as-is.
    Degraded,
    /// Fewer than half the local-DC hosts are up; only reads are allowed.
    ReadOnly,
    /// No local-DC hosts are up; every call is rejected immediately.
    Emergency,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationMode::Normal => "Normal",
            OperationMode::Degraded => "Degraded",
            OperationMode::ReadOnly => "ReadOnly",
            OperationMode::Emergency => "Emergency",
        };
        f.write_str(label)
    }
}

/// Inputs the controller needs to derive a mode; a narrow view over
/// [`crate::metrics::MetricsRegistry`] so this module stays a pure function
/// of its inputs and is trivial to unit test.
#[derive(Debug, Clone, Copy)]
pub struct ModeInputs {
    pub up_hosts: usize,
    pub total_hosts: usize,
    pub success_rate: f64,
}

/// Pure function of the current metrics snapshot (§4.8).
#[must_use]
pub fn derive_mode(inputs: ModeInputs) -> OperationMode {
    if inputs.up_hosts == 0 {
        return OperationMode::Emergency;
    }
    // Cross-multiplied form of `up_hosts < total_hosts / 2` that avoids
    // floor division silently rounding the threshold down for odd host
    // counts (e.g. 1 of 3 up is fewer than half and must read ReadOnly).
    if 2 * inputs.up_hosts < inputs.total_hosts {
        return OperationMode::ReadOnly;
    }
    if inputs.success_rate < 0.9 || inputs.up_hosts < inputs.total_hosts {
        return OperationMode::Degraded;
    }
    OperationMode::Normal
}

/// Holds the published current mode in a lock-free, atomically-swappable
/// cell so the executor's hot path never blocks on the controller's writes.
#[derive(Debug)]
pub struct OperationModeController {
    current: ArcSwap<OperationMode>,
}

impl Default for OperationModeController {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationModeController {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: ArcSwap::new(Arc::new(OperationMode::Normal)),
        }
    }

    /// Current mode, as last published by [`Self::recompute`].
    #[must_use]
    pub fn current(&self) -> OperationMode {
        **self.current.load()
    }

    /// Recompute the mode from `inputs` and publish it, returning the new
    /// mode and whether it differs from the previous one (callers log a
    /// warning on transitions per §4.8).
    pub fn recompute(&self, inputs: ModeInputs) -> (OperationMode, bool) {
        let new_mode = derive_mode(inputs);
        let previous = self.current();
        if new_mode != previous {
            self.current.store(Arc::new(new_mode));
        }
        (new_mode, new_mode != previous)
    }
}
