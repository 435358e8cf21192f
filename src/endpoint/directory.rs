//! Endpoint directory backed by a configured instance list

use super::{EndpointDirectory, RoleInstance};
use crate::error::{Result, WardenError};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};

/// Endpoint directory holding the local instance and a replaceable peer list
pub struct StaticEndpointDirectory {
    /// The instance this process runs as
    local: RoleInstance,
    /// Peer instances known so far
    peers: Arc<RwLock<Vec<RoleInstance>>>,
}

impl StaticEndpointDirectory {
    /// Create a new directory
    pub fn new(local: RoleInstance, peers: Vec<RoleInstance>) -> Self {
        Self {
            local,
            peers: Arc::new(RwLock::new(peers)),
        }
    }

    /// Add a peer that just became visible
    pub fn add_peer(&self, peer: RoleInstance) -> Result<()> {
        let mut current = self
            .peers
            .write()
            .map_err(|_| WardenError::Lock("Failed to acquire write lock".to_string()))?;
        current.retain(|p| p.id != peer.id);
        current.push(peer);
        Ok(())
    }
}

impl EndpointDirectory for StaticEndpointDirectory {
    fn resolve_internal_endpoints(&self, port: u16) -> Vec<SocketAddr> {
        let peers = match self.peers.read() {
            Ok(peers) => peers,
            Err(poisoned) => poisoned.into_inner(),
        };

        let found: BTreeSet<SocketAddr> = std::iter::once(&self.local)
            .chain(peers.iter())
            .filter_map(|instance| instance.endpoint_on(port))
            .collect();

        found.into_iter().collect()
    }

    fn resolve_local_endpoint(&self, low: u16, high: u16) -> Result<IpAddr> {
        self.local
            .endpoint_in(low, high)
            .map(|endpoint| endpoint.ip())
            .ok_or_else(|| {
                WardenError::EndpointNotFound(format!(
                    "instance {} has no endpoint in port range {}-{}",
                    self.local.id, low, high
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> RoleInstance {
        RoleInstance::new(
            "mgmt_0",
            "management",
            vec![
                "10.0.0.4:7010".parse().unwrap(),
                "10.0.0.4:4174".parse().unwrap(),
            ],
        )
    }

    #[test]
    fn test_resolve_local_endpoint() {
        let directory = StaticEndpointDirectory::new(local(), Vec::new());
        let address = directory.resolve_local_endpoint(7010, 7110).unwrap();
        assert_eq!(address, "10.0.0.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_missing_local_endpoint_is_an_error() {
        let directory = StaticEndpointDirectory::new(local(), Vec::new());
        let err = directory.resolve_local_endpoint(9000, 9010).unwrap_err();
        assert!(matches!(err, WardenError::EndpointNotFound(_)));
    }

    #[test]
    fn test_peers_become_visible() {
        let directory = StaticEndpointDirectory::new(local(), Vec::new());
        assert_eq!(directory.resolve_internal_endpoints(4174).len(), 1);
        assert!(directory.resolve_internal_endpoints(8100).is_empty());

        directory
            .add_peer(RoleInstance::new(
                "mgmt_1",
                "management",
                vec!["10.0.0.5:4174".parse().unwrap()],
            ))
            .unwrap();

        let lookups = directory.resolve_internal_endpoints(4174);
        assert_eq!(lookups.len(), 2);
        assert!(lookups.contains(&"10.0.0.5:4174".parse().unwrap()));
    }

    #[test]
    fn test_add_peer_replaces_same_id() {
        let directory = StaticEndpointDirectory::new(local(), Vec::new());
        let peer = |addr: &str| {
            RoleInstance::new("mgmt_1", "management", vec![addr.parse().unwrap()])
        };

        directory.add_peer(peer("10.0.0.5:4174")).unwrap();
        directory.add_peer(peer("10.0.0.6:4174")).unwrap();

        let lookups = directory.resolve_internal_endpoints(4174);
        assert_eq!(lookups.len(), 2);
        assert!(!lookups.contains(&"10.0.0.5:4174".parse().unwrap()));
    }
}
