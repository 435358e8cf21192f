//! Well-known ports of a role instance

use serde::{Deserialize, Serialize};

/// Ports bound by the processes of a role instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortMap {
    /// Lookup service discovery port
    pub lookup: u16,
    /// Lowest port of the internal transport range
    pub transport_min: u16,
    /// Highest port of the internal transport range
    pub transport_max: u16,
    /// HTTP class server port
    pub class_server: u16,
    /// RMI registry port
    pub registry: u16,
    /// Web UI HTTP port
    pub web_ui: u16,
    /// REST admin HTTP port
    pub rest_admin: u16,
}

impl Default for PortMap {
    fn default() -> Self {
        Self {
            lookup: 4174,
            transport_min: 7010,
            transport_max: 7110,
            class_server: 9813,
            registry: 10098,
            web_ui: 8099,
            rest_admin: 8100,
        }
    }
}
