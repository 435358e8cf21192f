//! Hosting layer
//!
//! Turns a host configuration file into a ready controller: discovers the
//! installation, waits for lookup services when several management
//! instances are expected, and wires the endpoint directory and process
//! launcher in.

pub mod config;
pub mod install;

pub use config::{EndpointSettings, HostConfig, InstallSettings, TimingSettings};

use crate::agent::{proxy, ClusterAgentController, RewriteRule};
use crate::endpoint::{EndpointDirectory, StaticEndpointDirectory};
use crate::error::Result;
use crate::process::Spawner;
use crate::topology::agent_arguments;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Block until at least `expected` lookup services are visible when more
/// than one is expected, then return them as `host:port` locators
pub fn wait_for_lookup_locators(
    directory: &dyn EndpointDirectory,
    lookup_port: u16,
    expected: u32,
    poll: Duration,
) -> Vec<String> {
    loop {
        let found = directory.resolve_internal_endpoints(lookup_port);
        if expected <= 1 || found.len() >= expected as usize {
            let locators: Vec<String> = found.iter().map(|e| e.to_string()).collect();
            info!(locators = %locators.join(","), "Resolved lookup locators");
            return locators;
        }
        info!(
            visible = found.len(),
            expected,
            "Waiting for lookup services"
        );
        thread::sleep(poll);
    }
}

/// What `run` would do on this machine
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub instance_id: String,
    pub zone: String,
    pub generated_at: DateTime<Utc>,
    pub local_address: IpAddr,
    pub starts_manager: bool,
    pub starts_web_ui: bool,
    pub starts_rest_admin: bool,
    pub starts_proxy: bool,
    pub waits_for_quorum: bool,
    pub agent_arguments: Vec<String>,
    pub reserved_memory_mb: u64,
    pub rewrite_rules: Vec<RewriteRule>,
}

/// A configured role instance
pub struct Host {
    config: HostConfig,
    directory: Arc<StaticEndpointDirectory>,
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        let directory = Arc::new(StaticEndpointDirectory::new(
            config.endpoints.local.clone(),
            config.endpoints.peers.clone(),
        ));
        Self { config, directory }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Configured locators, or the lookup services visible to this instance
    pub fn lookup_locators(&self) -> Vec<String> {
        if !self.config.lookup_locators.is_empty() {
            return self.config.lookup_locators.clone();
        }
        wait_for_lookup_locators(
            self.directory.as_ref(),
            self.config.ports.lookup,
            self.config.expected_managers,
            self.config.timings.lookup_poll(),
        )
    }

    /// Build the controller; blocks while waiting for lookup services
    pub fn controller(&self, spawner: Arc<dyn Spawner>) -> Result<ClusterAgentController> {
        let layout = self.config.layout()?;
        let topology = self.config.topology(self.lookup_locators());
        info!(
            instance = %self.config.instance_id,
            zone = %topology.zone,
            home = %layout.product_home.display(),
            "Configured role instance"
        );

        Ok(
            ClusterAgentController::new(topology, layout, self.directory.clone(), spawner)
                .with_timings(self.config.timings.to_timings())
                .with_redirection(self.config.redirection())
                .with_elevated_agent(self.config.elevated_agent),
        )
    }

    /// Describe the bootstrap without starting anything
    pub fn plan(&self) -> Result<Plan> {
        let topology = self.config.topology(self.config.lookup_locators.clone());
        let local_address = self
            .directory
            .resolve_local_endpoint(topology.ports.transport_min, topology.ports.transport_max)?;

        Ok(Plan {
            instance_id: self.config.instance_id.clone(),
            zone: topology.zone.clone(),
            generated_at: Utc::now(),
            local_address,
            starts_manager: topology.starts_manager(),
            starts_web_ui: topology.starts_web_ui(),
            starts_rest_admin: topology.starts_rest_admin(),
            starts_proxy: topology.starts_proxy(),
            waits_for_quorum: topology.waits_for_quorum(),
            agent_arguments: agent_arguments(&topology),
            reserved_memory_mb: topology.reserved_memory_mb(),
            rewrite_rules: if topology.starts_proxy() {
                proxy::rules_for(&topology, local_address)
            } else {
                Vec::new()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RoleInstance;
    use crate::process::OsSpawner;
    use std::net::SocketAddr;

    fn addr(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    const CONFIG: &str = r#"
zone: management
instance_id: management_0
memory:
  agent: 256
  lookup: 128
  manager: 512
  elastic_manager: 256
  web_ui: 512
install:
  product_home: /opt/grid
  jdk_home: /opt/jdk
endpoints:
  local:
    id: management_0
    endpoints: ["10.0.0.4:7010", "10.0.0.4:4174"]
"#;

    #[test]
    fn test_lookup_wait_polls_until_expected_count() {
        let directory = Arc::new(StaticEndpointDirectory::new(
            RoleInstance::new("management_0", "management", vec![addr("10.0.0.4:4174")]),
            Vec::new(),
        ));

        let waiter = {
            let directory = directory.clone();
            thread::spawn(move || {
                wait_for_lookup_locators(directory.as_ref(), 4174, 2, Duration::from_millis(10))
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        directory
            .add_peer(RoleInstance::new("management_1", "management", vec![addr("10.0.0.5:4174")]))
            .unwrap();
        let locators = waiter.join().unwrap();
        assert_eq!(locators, vec!["10.0.0.4:4174", "10.0.0.5:4174"]);
    }

    #[test]
    fn test_single_manager_uses_visible_lookups_immediately() {
        let directory = StaticEndpointDirectory::new(
            RoleInstance::new("worker_0", "worker", vec![addr("10.0.0.7:7010")]),
            Vec::new(),
        );
        let locators = wait_for_lookup_locators(&directory, 4174, 1, Duration::from_secs(60));
        assert!(locators.is_empty());
    }

    #[test]
    fn test_plan() {
        let host = Host::new(HostConfig::parse_str(CONFIG).unwrap());
        let plan = host.plan().unwrap();

        assert_eq!(plan.local_address, "10.0.0.4".parse::<IpAddr>().unwrap());
        assert!(plan.starts_manager);
        assert!(plan.starts_web_ui);
        assert!(!plan.starts_rest_admin);
        assert!(plan.starts_proxy);
        assert!(!plan.waits_for_quorum);
        assert_eq!(plan.agent_arguments[..2], ["gsa.lus", "1"]);
        assert_eq!(plan.reserved_memory_mb, 1152);
        assert_eq!(plan.rewrite_rules.len(), 1);
        assert_eq!(plan.rewrite_rules[0].name, "webui");

        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["zone"], "management");
        assert_eq!(json["rewrite_rules"][0]["pattern"], "^webui/(.*)");
    }

    #[test]
    fn test_controller_from_config() {
        let host = Host::new(HostConfig::parse_str(CONFIG).unwrap());
        let controller = host.controller(Arc::new(OsSpawner)).unwrap();

        assert_eq!(controller.topology().lookup_locators, vec!["10.0.0.4:4174"]);
        assert!(!controller.is_stopped());
        assert!(!controller.is_agent_running());
    }
}
