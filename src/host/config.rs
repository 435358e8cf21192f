//! Host configuration file

use super::install::{find_installation, jdk_marker, product_marker};
use crate::agent::{Redirection, Timings};
use crate::endpoint::RoleInstance;
use crate::error::{Result, WardenError};
use crate::topology::{ContextPaths, InstallLayout, MemoryBudgets, PortMap, RoleTopology};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the product and the JDK live
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Product installation root; discovered under `search_root` when unset
    pub product_home: Option<PathBuf>,
    /// JDK root; discovered under `search_root` when unset
    pub jdk_home: Option<PathBuf>,
    /// Directory searched for installation markers
    pub search_root: Option<PathBuf>,
    /// Where rendered scripts are written
    pub script_dir: Option<PathBuf>,
    /// Reverse-proxy service recipe directory
    pub proxy_service_dir: Option<PathBuf>,
    /// Executable name of agent processes, for the fleet-wide kill
    pub agent_process_name: Option<String>,
}

/// Poll intervals and timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub quorum_poll_secs: u64,
    pub deploy_poll_secs: u64,
    pub discovery_poll_secs: u64,
    pub steady_state_poll_secs: u64,
    pub lookup_poll_secs: u64,
    pub install_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            quorum_poll_secs: 10,
            deploy_poll_secs: 10,
            discovery_poll_secs: 10,
            steady_state_poll_secs: 5,
            lookup_poll_secs: 10,
            install_timeout_secs: 5 * 60,
            command_timeout_secs: 60,
            stop_timeout_secs: 60,
        }
    }
}

impl TimingSettings {
    /// Controller timings
    pub fn to_timings(&self) -> Timings {
        Timings {
            quorum_poll: Duration::from_secs(self.quorum_poll_secs),
            deploy_poll: Duration::from_secs(self.deploy_poll_secs),
            discovery_poll: Duration::from_secs(self.discovery_poll_secs),
            steady_state_poll: Duration::from_secs(self.steady_state_poll_secs),
            install_timeout: Duration::from_secs(self.install_timeout_secs),
            command_timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    pub fn lookup_poll(&self) -> Duration {
        Duration::from_secs(self.lookup_poll_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// This instance and the peers visible to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSettings {
    pub local: RoleInstance,
    #[serde(default)]
    pub peers: Vec<RoleInstance>,
}

/// Host configuration for one role instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Role name, also the placement zone
    pub zone: String,
    /// Instance identifier; defaults to the machine hostname
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
    /// Number of management instances in the deployment
    #[serde(default = "default_expected_managers")]
    pub expected_managers: u32,
    #[serde(default)]
    pub memory: MemoryBudgets,
    #[serde(default)]
    pub context_paths: ContextPaths,
    #[serde(default)]
    pub ports: PortMap,
    /// Explicit lookup locators (`host:port`); resolved from peers when empty
    #[serde(default)]
    pub lookup_locators: Vec<String>,
    #[serde(default)]
    pub install: InstallSettings,
    /// Forward all process output to the log
    #[serde(default)]
    pub redirect_all: bool,
    /// Forward the core agent's own output to the log
    #[serde(default)]
    pub redirect_agent: bool,
    /// Launch the core agent elevated
    #[serde(default)]
    pub elevated_agent: bool,
    #[serde(default)]
    pub timings: TimingSettings,
    pub endpoints: EndpointSettings,
}

fn default_instance_id() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn default_expected_managers() -> u32 {
    1
}

impl HostConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WardenError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse_str(&content)
    }

    /// Parse configuration from YAML text
    pub fn parse_str(content: &str) -> Result<Self> {
        let config: HostConfig = serde_yaml::from_str(content)
            .map_err(|e| WardenError::Yaml(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the controller cannot act on
    pub fn validate(&self) -> Result<()> {
        if self.zone.trim().is_empty() {
            return Err(WardenError::Configuration("zone must not be empty".to_string()));
        }
        if self.expected_managers == 0 {
            return Err(WardenError::Configuration(
                "expected_managers must be at least 1".to_string(),
            ));
        }
        if self.ports.transport_min > self.ports.transport_max {
            return Err(WardenError::Configuration(format!(
                "Invalid transport port range {}-{}",
                self.ports.transport_min, self.ports.transport_max
            )));
        }
        if let Some(home) = &self.install.product_home {
            if home.as_os_str().is_empty() {
                return Err(WardenError::Configuration(
                    "install.product_home must not be empty".to_string(),
                ));
            }
        }
        if self.install.product_home.is_none() && self.install.search_root.is_none() {
            return Err(WardenError::Configuration(
                "Either install.product_home or install.search_root is required".to_string(),
            ));
        }
        if self.install.jdk_home.is_none() && self.install.search_root.is_none() {
            return Err(WardenError::Configuration(
                "Either install.jdk_home or install.search_root is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Topology with the given lookup locators
    pub fn topology(&self, lookup_locators: Vec<String>) -> RoleTopology {
        RoleTopology {
            zone: self.zone.clone(),
            memory: self.memory.clone(),
            lookup_locators,
            context_paths: self.context_paths.clone(),
            expected_managers: self.expected_managers,
            ports: self.ports.clone(),
        }
    }

    /// Installation layout, discovering roots that were not given
    pub fn layout(&self) -> Result<InstallLayout> {
        let install = &self.install;
        let locate = |explicit: &Option<PathBuf>, marker: &str| -> Result<PathBuf> {
            match (explicit, &install.search_root) {
                (Some(path), _) => Ok(path.clone()),
                (None, Some(root)) => find_installation(root, marker),
                (None, None) => Err(WardenError::Provision(format!(
                    "No search root to look for {}",
                    marker
                ))),
            }
        };

        let mut layout = InstallLayout::new(
            locate(&install.product_home, product_marker())?,
            locate(&install.jdk_home, jdk_marker())?,
        );
        layout.script_dir = install.script_dir.clone();
        layout.proxy_service_dir = install.proxy_service_dir.clone();
        if let Some(name) = &install.agent_process_name {
            layout.agent_process_name = name.clone();
        }
        Ok(layout)
    }

    pub fn redirection(&self) -> Redirection {
        Redirection {
            all: self.redirect_all,
            agent: self.redirect_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const CONFIG: &str = r#"
zone: management
instance_id: management_0
expected_managers: 2
memory:
  agent: 256
  lookup: 128
  manager: 512
  elastic_manager: 256
  web_ui: 512
  rest_admin: 256
install:
  product_home: /opt/grid
  jdk_home: /opt/jdk
redirect_agent: true
timings:
  steady_state_poll_secs: 1
endpoints:
  local:
    id: management_0
    role: management
    endpoints: ["10.0.0.4:7010", "10.0.0.4:4174"]
  peers:
    - id: management_1
      endpoints: ["10.0.0.5:7010", "10.0.0.5:4174"]
"#;

    #[test]
    fn test_parse_config() {
        let config = HostConfig::parse_str(CONFIG).unwrap();

        assert_eq!(config.zone, "management");
        assert_eq!(config.instance_id, "management_0");
        assert_eq!(config.expected_managers, 2);
        assert_eq!(config.memory.manager, 512);
        assert_eq!(config.ports, PortMap::default());
        assert_eq!(config.context_paths.rest_admin, "/rest");
        assert_eq!(config.endpoints.peers.len(), 1);
        assert!(config.redirection().agent);
        assert!(!config.redirection().all);

        let timings = config.timings.to_timings();
        assert_eq!(timings.steady_state_poll, Duration::from_secs(1));
        assert_eq!(timings.install_timeout, Duration::from_secs(300));
        assert_eq!(config.timings.stop_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_instance_id_defaults_to_hostname() {
        let config = HostConfig::parse_str(
            "zone: worker\ninstall: {product_home: /opt/grid, jdk_home: /opt/jdk}\nendpoints: {local: {id: w}}\n",
        )
        .unwrap();
        assert!(!config.instance_id.is_empty());
        assert_eq!(config.expected_managers, 1);
    }

    #[test]
    fn test_validation() {
        let bad_zone = CONFIG.replace("zone: management", "zone: \"\"");
        assert!(matches!(
            HostConfig::parse_str(&bad_zone),
            Err(WardenError::Configuration(_))
        ));

        let inverted = format!("{}ports:\n  transport_min: 8000\n  transport_max: 7000\n", CONFIG);
        assert!(matches!(
            HostConfig::parse_str(&inverted),
            Err(WardenError::Configuration(_))
        ));

        let no_install = CONFIG
            .replace("  product_home: /opt/grid\n", "")
            .replace("  jdk_home: /opt/jdk\n", "");
        assert!(matches!(
            HostConfig::parse_str(&no_install),
            Err(WardenError::Configuration(_))
        ));

        assert!(matches!(
            HostConfig::parse_str("zone: [unclosed"),
            Err(WardenError::Yaml(_))
        ));
    }

    #[test]
    fn test_layout_discovers_installations() {
        let dir = tempdir().unwrap();
        let grid_bin = dir.path().join("grid").join("bin");
        let jdk_bin = dir.path().join("java").join("jdk1.6").join("bin");
        fs::create_dir_all(&grid_bin).unwrap();
        fs::create_dir_all(&jdk_bin).unwrap();
        fs::write(grid_bin.join(product_marker()), "").unwrap();
        fs::write(jdk_bin.join(jdk_marker()), "").unwrap();

        let yaml = CONFIG
            .replace("  product_home: /opt/grid\n", "")
            .replace(
                "  jdk_home: /opt/jdk\n",
                &format!("  search_root: {}\n  agent_process_name: java\n", dir.path().display()),
            );
        let config = HostConfig::parse_str(&yaml).unwrap();
        let layout = config.layout().unwrap();

        assert_eq!(layout.product_home, dir.path().join("grid"));
        assert_eq!(layout.jdk_home, dir.path().join("java").join("jdk1.6"));
        assert_eq!(layout.agent_process_name, "java");
    }

    #[test]
    fn test_layout_missing_marker_is_provision_error() {
        let dir = tempdir().unwrap();
        let yaml = CONFIG.replace(
            "  jdk_home: /opt/jdk\n",
            &format!("  search_root: {}\n", dir.path().display()),
        );
        let config = HostConfig::parse_str(&yaml).unwrap();
        assert!(matches!(config.layout(), Err(WardenError::Provision(_))));
    }

    #[test]
    fn test_topology_from_config() {
        let config = HostConfig::parse_str(CONFIG).unwrap();
        let topology = config.topology(vec!["10.0.0.4:4174".to_string()]);

        assert_eq!(topology.zone, "management");
        assert!(topology.starts_manager());
        assert!(topology.waits_for_quorum());
        assert_eq!(topology.reserved_memory_mb(), 1152);
        assert_eq!(topology.lookup_locators, vec!["10.0.0.4:4174"]);
    }
}
