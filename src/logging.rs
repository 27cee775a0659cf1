//! Log message tag prefixes, kept in one place so every component uses the
//! exact wording spec.md §7's scenario assertions grep for.

pub const RESILIENT_CLIENT: &str = "[RESILIENT CLIENT]";
pub const HOST_FAILURE: &str = "[HOST FAILURE]";
pub const HOST_RECOVERY: &str = "[HOST RECOVERY]";
pub const TOPOLOGY_CHANGE: &str = "[TOPOLOGY CHANGE]";
pub const TOPOLOGY_REFRESH: &str = "[TOPOLOGY REFRESH]";
pub const CONNECTION_REFRESH: &str = "[CONNECTION REFRESH]";
