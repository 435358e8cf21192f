//! Per-machine cluster bootstrap

pub mod controller;
pub mod proxy;

pub use controller::{ClusterAgentController, Redirection, Timings, MANAGEMENT_SPACE_MEMORY_MB};
pub use proxy::{ProxyDiscovery, RewriteRule};
