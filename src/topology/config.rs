//! Role topology configuration

use super::ports::PortMap;
use serde::{Deserialize, Serialize};

/// Optional sub-components a role instance may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubComponent {
    /// The core agent itself
    Agent,
    /// Lookup service
    Lookup,
    /// Manager
    Manager,
    /// Elastic manager
    ElasticManager,
    /// Web UI
    WebUi,
    /// REST admin endpoint
    RestAdmin,
}

impl SubComponent {
    /// All sub-components in launch order
    pub const ALL: [SubComponent; 6] = [
        SubComponent::Agent,
        SubComponent::Lookup,
        SubComponent::Manager,
        SubComponent::ElasticManager,
        SubComponent::WebUi,
        SubComponent::RestAdmin,
    ];

    /// Whether this sub-component is deployed onto the cluster as a workload
    /// rather than launched directly by the core agent
    pub fn is_workload(&self) -> bool {
        matches!(self, SubComponent::WebUi | SubComponent::RestAdmin)
    }
}

impl std::fmt::Display for SubComponent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubComponent::Agent => write!(f, "agent"),
            SubComponent::Lookup => write!(f, "lookup"),
            SubComponent::Manager => write!(f, "manager"),
            SubComponent::ElasticManager => write!(f, "elastic-manager"),
            SubComponent::WebUi => write!(f, "web-ui"),
            SubComponent::RestAdmin => write!(f, "rest-admin"),
        }
    }
}

/// Memory budgets in megabytes. A zero budget disables the sub-component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBudgets {
    pub agent: u32,
    pub lookup: u32,
    pub manager: u32,
    pub elastic_manager: u32,
    pub web_ui: u32,
    pub rest_admin: u32,
}

impl MemoryBudgets {
    /// Budget of a sub-component
    pub fn of(&self, component: SubComponent) -> u32 {
        match component {
            SubComponent::Agent => self.agent,
            SubComponent::Lookup => self.lookup,
            SubComponent::Manager => self.manager,
            SubComponent::ElasticManager => self.elastic_manager,
            SubComponent::WebUi => self.web_ui,
            SubComponent::RestAdmin => self.rest_admin,
        }
    }
}

/// URL context paths of deployed web artifacts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextPaths {
    pub web_ui: String,
    pub rest_admin: String,
}

impl Default for ContextPaths {
    fn default() -> Self {
        Self {
            web_ui: "/webui".to_string(),
            rest_admin: "/rest".to_string(),
        }
    }
}

/// Immutable per-machine topology resolved at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTopology {
    /// Placement zone; machines of this role are tagged with it
    pub zone: String,
    /// Memory budgets per sub-component
    pub memory: MemoryBudgets,
    /// Known lookup locators (`host:port`)
    pub lookup_locators: Vec<String>,
    /// Context paths of deployed web artifacts
    pub context_paths: ContextPaths,
    /// Number of management role instances expected in the cluster
    pub expected_managers: u32,
    /// Well-known ports
    pub ports: PortMap,
}

impl Default for RoleTopology {
    fn default() -> Self {
        Self {
            zone: String::new(),
            memory: MemoryBudgets::default(),
            lookup_locators: Vec::new(),
            context_paths: ContextPaths::default(),
            expected_managers: 1,
            ports: PortMap::default(),
        }
    }
}

impl RoleTopology {
    /// Whether a sub-component is enabled (non-zero budget)
    pub fn is_enabled(&self, component: SubComponent) -> bool {
        self.memory.of(component) != 0
    }

    /// Whether this machine hosts lookup, manager and elastic manager
    pub fn starts_manager(&self) -> bool {
        self.is_enabled(SubComponent::Manager)
    }

    pub fn starts_web_ui(&self) -> bool {
        self.is_enabled(SubComponent::WebUi)
    }

    pub fn starts_rest_admin(&self) -> bool {
        self.is_enabled(SubComponent::RestAdmin)
    }

    /// Whether the reverse proxy is installed and wired on this machine
    pub fn starts_proxy(&self) -> bool {
        self.starts_rest_admin() || self.starts_web_ui()
    }

    /// Whether the manager quorum wait runs before deployment
    pub fn waits_for_quorum(&self) -> bool {
        self.expected_managers > 1
    }

    /// Enabled web-facing sub-components, REST admin first
    pub fn web_components(&self) -> Vec<SubComponent> {
        [SubComponent::RestAdmin, SubComponent::WebUi]
            .into_iter()
            .filter(|c| self.is_enabled(*c))
            .collect()
    }

    /// Memory kept free on this machine for every co-located process that is
    /// not itself a deployed workload.
    pub fn reserved_memory_mb(&self) -> u64 {
        SubComponent::ALL
            .iter()
            .filter(|c| !c.is_workload())
            .map(|c| u64::from(self.memory.of(*c)))
            .sum()
    }

    /// Port a web-facing sub-component serves on
    pub fn port_of(&self, component: SubComponent) -> Option<u16> {
        match component {
            SubComponent::WebUi => Some(self.ports.web_ui),
            SubComponent::RestAdmin => Some(self.ports.rest_admin),
            _ => None,
        }
    }

    /// Context path of a web-facing sub-component
    pub fn context_path_of(&self, component: SubComponent) -> Option<&str> {
        match component {
            SubComponent::WebUi => Some(&self.context_paths.web_ui),
            SubComponent::RestAdmin => Some(&self.context_paths.rest_admin),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(memory: MemoryBudgets) -> RoleTopology {
        RoleTopology {
            zone: "management".to_string(),
            memory,
            ..Default::default()
        }
    }

    #[test]
    fn test_zero_budget_disables_component() {
        let topology = topology(MemoryBudgets {
            agent: 256,
            ..Default::default()
        });

        assert!(topology.is_enabled(SubComponent::Agent));
        assert!(!topology.starts_manager());
        assert!(!topology.starts_web_ui());
        assert!(!topology.starts_rest_admin());
        assert!(!topology.starts_proxy());
        assert!(topology.web_components().is_empty());
    }

    #[test]
    fn test_reserved_memory_excludes_workloads() {
        let topology = topology(MemoryBudgets {
            agent: 256,
            manager: 512,
            elastic_manager: 256,
            lookup: 128,
            rest_admin: 1024,
            web_ui: 0,
        });

        assert_eq!(topology.reserved_memory_mb(), 1152);
    }

    #[test]
    fn test_web_ui_alone_enables_proxy() {
        let topology = topology(MemoryBudgets {
            agent: 256,
            web_ui: 512,
            ..Default::default()
        });

        assert!(topology.starts_proxy());
        assert_eq!(topology.web_components(), vec![SubComponent::WebUi]);
    }

    #[test]
    fn test_quorum_wait_needs_more_than_one_manager() {
        let mut topology = topology(MemoryBudgets::default());
        topology.expected_managers = 1;
        assert!(!topology.waits_for_quorum());
        topology.expected_managers = 2;
        assert!(topology.waits_for_quorum());
    }

    #[test]
    fn test_sub_component_display() {
        assert_eq!(SubComponent::ElasticManager.to_string(), "elastic-manager");
        assert_eq!(SubComponent::RestAdmin.to_string(), "rest-admin");
    }
}
