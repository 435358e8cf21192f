//! Endpoint resolution for role instances
//!
//! Peer role instances become visible over time as the cluster comes up.
//! An empty lookup result is a normal, retryable condition; only a missing
//! local binding is an error.

pub mod directory;

pub use directory::StaticEndpointDirectory;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};

/// A role instance and the internal endpoints it has bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInstance {
    /// Instance identifier
    pub id: String,
    /// Role name the instance belongs to
    #[serde(default)]
    pub role: String,
    /// Bound internal endpoints
    #[serde(default)]
    pub endpoints: Vec<SocketAddr>,
}

impl RoleInstance {
    pub fn new(id: &str, role: &str, endpoints: Vec<SocketAddr>) -> Self {
        Self {
            id: id.to_string(),
            role: role.to_string(),
            endpoints,
        }
    }

    /// Endpoint bound to exactly this port
    pub fn endpoint_on(&self, port: u16) -> Option<SocketAddr> {
        self.endpoints.iter().find(|e| e.port() == port).copied()
    }

    /// First endpoint bound inside an inclusive port range
    pub fn endpoint_in(&self, low: u16, high: u16) -> Option<SocketAddr> {
        self.endpoints
            .iter()
            .find(|e| (low..=high).contains(&e.port()))
            .copied()
    }
}

/// Resolves network endpoints of role instances
pub trait EndpointDirectory: Send + Sync {
    /// Endpoints of every currently-known instance that has bound `port`
    fn resolve_internal_endpoints(&self, port: u16) -> Vec<SocketAddr>;

    /// This instance's own address for a port within `[low, high]`
    fn resolve_local_endpoint(&self, low: u16, high: u16) -> Result<IpAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_instance_lookup() {
        let instance = RoleInstance::new(
            "mgmt_0",
            "management",
            vec![
                "10.0.0.4:4174".parse().unwrap(),
                "10.0.0.4:7012".parse().unwrap(),
            ],
        );

        assert_eq!(
            instance.endpoint_on(4174),
            Some("10.0.0.4:4174".parse().unwrap())
        );
        assert_eq!(instance.endpoint_on(8100), None);
        assert_eq!(
            instance.endpoint_in(7010, 7110),
            Some("10.0.0.4:7012".parse().unwrap())
        );
        assert_eq!(instance.endpoint_in(8000, 8010), None);
    }
}
