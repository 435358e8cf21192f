//! Core agent launch contract
//!
//! The argument shape and environment variables understood by the external
//! agent launcher. Both are fixed by the launcher and reproduced verbatim.

use super::config::{RoleTopology, SubComponent};
use super::layout::InstallLayout;
use crate::process::EnvMap;
use std::net::IpAddr;

/// Agent arguments on a machine hosting lookup, manager and elastic manager
const MANAGER_AGENT_ARGS: [&str; 12] = [
    "gsa.lus", "1", "gsa.gsm", "1", "gsa.global.esm", "1",
    "gsa.gsc", "0", "gsa.global.gsm", "0", "gsa.global.lus", "0",
];

/// Agent arguments on every other machine
const WORKER_AGENT_ARGS: [&str; 12] = [
    "gsa.lus", "0", "gsa.gsm", "0", "gsa.global.esm", "0",
    "gsa.gsc", "0", "gsa.global.gsm", "0", "gsa.global.lus", "0",
];

/// Arguments telling the agent how many local instances of each role to start
pub fn agent_arguments(topology: &RoleTopology) -> Vec<String> {
    let args = if topology.starts_manager() {
        &MANAGER_AGENT_ARGS
    } else {
        &WORKER_AGENT_ARGS
    };
    args.iter().map(|s| s.to_string()).collect()
}

/// JVM options shared by every process the agent starts
pub fn shared_java_options(topology: &RoleTopology) -> String {
    let ports = &topology.ports;
    let mut options = String::new();

    if !topology.lookup_locators.is_empty() {
        options.push_str("-Dcom.gs.multicast.enabled=false ");
    }
    // re-read the hosts file every 10 seconds
    options.push_str("-Dsun.net.inetaddr.ttl=10 ");
    options.push_str(&format!(
        "-Dcom.gs.transport_protocol.lrmi.bind-port={}-{} ",
        ports.transport_min, ports.transport_max
    ));
    options.push_str(&format!("-Dcom.gigaspaces.start.httpPort={} ", ports.class_server));
    options.push_str(&format!("-Dcom.gigaspaces.system.registryPort={}", ports.registry));
    options
}

/// Environment handed to the agent and to every admin script
pub fn agent_environment(
    topology: &RoleTopology,
    layout: &InstallLayout,
    local_address: IpAddr,
) -> EnvMap {
    let java_options = shared_java_options(topology);
    let heap = |component: SubComponent| format!("-Xmx{}m", topology.memory.of(component));

    let mut env = EnvMap::new();
    env.insert("VERBOSE".to_string(), "true".to_string());
    env.insert(
        "JAVA_HOME".to_string(),
        layout.jdk_home.to_string_lossy().to_string(),
    );
    env.insert(
        "JSHOMEDIR".to_string(),
        layout.product_home.to_string_lossy().to_string(),
    );
    env.insert(
        "LOOKUPLOCATORS".to_string(),
        topology.lookup_locators.join(","),
    );
    env.insert(
        "GSA_JAVA_OPTIONS".to_string(),
        format!(
            "{} -Dcom.gs.zones={} {}",
            java_options,
            topology.zone,
            heap(SubComponent::Agent)
        ),
    );
    env.insert(
        "WEBUI_JAVA_OPTIONS".to_string(),
        format!(
            "{} -Dcom.gs.webui.port={} {}",
            java_options,
            topology.ports.web_ui,
            heap(SubComponent::WebUi)
        ),
    );
    env.insert(
        "GSM_JAVA_OPTIONS".to_string(),
        format!("{} {}", java_options, heap(SubComponent::Manager)),
    );
    env.insert(
        "LUS_JAVA_OPTIONS".to_string(),
        format!("{} {}", java_options, heap(SubComponent::Lookup)),
    );
    env.insert(
        "ESM_JAVA_OPTIONS".to_string(),
        format!("{} {}", java_options, heap(SubComponent::ElasticManager)),
    );
    env.insert("NIC_ADDR".to_string(), local_address.to_string());
    env
}
