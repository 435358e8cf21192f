//! Admin script rendering
//!
//! Pure functions from named parameters to script text. Every script runs
//! inside [`wrap`], which turns any uncaught failure into exit code
//! [`SCRIPT_FAILURE_EXIT_CODE`] and success into exit code zero.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Exit code of a script that failed with an uncaught error
pub const SCRIPT_FAILURE_EXIT_CODE: i32 = 1;

/// Isolation id shared by every workload deployed onto this role
pub const SHARED_MACHINE_ISOLATION_ID: &str = "public";

/// Application all management workloads belong to
pub const MANAGEMENT_APPLICATION: &str = "Management";

/// Name of the internal coordination workload
pub const MANAGEMENT_SPACE_NAME: &str = "cloudifyManagementSpace";

/// Poll period used inside rendered wait loops, in milliseconds
const SCRIPT_POLL_MILLIS: u64 = 10_000;

const CREATE_ADMIN: &str =
    "new org.openspaces.admin.AdminFactory().useDaemonThreads(true).createAdmin()";

/// Parameters of one workload deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    /// Logical workload name
    pub name: String,
    /// Artifact to deploy, if the workload is file based
    pub artifact: Option<PathBuf>,
    /// Memory per container in megabytes
    pub memory_mb: u32,
    /// HTTP port of a web workload
    pub port: Option<u16>,
    /// URL context path of a web workload
    pub context_path: Option<String>,
    /// Placement zone
    pub zone: String,
    /// Memory the placement engine must leave free per machine
    pub reserved_memory_mb: u64,
}

/// Escape text for a double-quoted script string literal
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Wrap a script body so failures exit non-zero and success exits zero
pub fn wrap(body: &str) -> String {
    let mut script = String::new();
    script.push_str("try {\n");
    script.push_str(body);
    if !body.ends_with('\n') {
        script.push('\n');
    }
    script.push_str("} catch (Throwable t) {\n");
    script.push_str("  org.codehaus.groovy.runtime.StackTraceUtils.sanitize(t);\n");
    script.push_str("  t.printStackTrace();\n");
    script.push_str(&format!("  System.exit({});\n", SCRIPT_FAILURE_EXIT_CODE));
    script.push_str("}\n");
    script.push_str("System.exit(0);\n");
    script
}

/// Block until `expected` managers and exactly one elastic manager are visible
pub fn wait_for_managers(expected: u32) -> String {
    format!(
        r#"org.openspaces.admin.Admin admin = {admin};
admin.getGridServiceManagers().waitFor({n});
while (admin.getGridServiceManagers().getSize() != {n}) {{
  System.out.println("Waiting for {n} Grid Service Managers");
  Thread.sleep({poll});
}};
while (admin.getElasticServiceManagers().getSize() != 1) {{
  System.out.println("Waiting for one Elastic Service Manager");
  Thread.sleep({poll});
}}
"#,
        admin = CREATE_ADMIN,
        n = expected,
        poll = SCRIPT_POLL_MILLIS,
    )
}

/// Shared provisioning and scale clauses: every workload shares the machines
/// of its zone, keeps `reserved_memory_mb` free, and runs at most one
/// container per machine.
fn placement(deployment: &DeploymentDescriptor) -> String {
    format!(
        r#"  .addContextProperty("com.gs.application", "{app}")
  .sharedMachineProvisioning("{isolation}",
    new org.openspaces.admin.pu.elastic.config.DiscoveredMachineProvisioningConfigurer()
      .addGridServiceAgentZone("{zone}")
      .reservedMemoryCapacityPerMachine("{reserved}m")
      .create())
  .scale(new org.openspaces.admin.pu.elastic.config.EagerScaleConfigurer()
      .atMostOneContainerPerMachine()
      .create())"#,
        app = MANAGEMENT_APPLICATION,
        isolation = SHARED_MACHINE_ISOLATION_ID,
        zone = escape(&deployment.zone),
        reserved = deployment.reserved_memory_mb,
    )
}

fn wait_for_instances(name: &str, instances: u32) -> String {
    format!(
        r#"while (!pu.waitFor({instances}, {poll}, java.util.concurrent.TimeUnit.MILLISECONDS)) {{
  System.out.println("waiting for processing unit {name}");
}}
"#,
        instances = instances,
        poll = SCRIPT_POLL_MILLIS,
        name = escape(name),
    )
}

/// Deploy a web artifact as an elastic stateless workload and wait for it
pub fn deploy_web_artifact(deployment: &DeploymentDescriptor) -> String {
    let artifact = deployment
        .artifact
        .as_ref()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut context = String::new();
    if let Some(port) = deployment.port {
        context.push_str(&format!("  .addContextProperty(\"web.port\", \"{}\")\n", port));
    }
    if let Some(path) = &deployment.context_path {
        context.push_str(&format!(
            "  .addContextProperty(\"web.context\", \"{}\")\n",
            escape(path)
        ));
        context.push_str("  .addContextProperty(\"web.context.unique\", \"true\")\n");
    }

    format!(
        r#"org.openspaces.admin.Admin admin = {admin};
admin.getElasticServiceManagers().waitForAtLeastOne();
org.openspaces.admin.pu.ProcessingUnit pu = admin.getGridServiceManagers().waitForAtLeastOne().deploy(
  new org.openspaces.admin.pu.elastic.ElasticStatelessProcessingUnitDeployment("{artifact}")
  .memoryCapacityPerContainer("{memory}m")
{context}  .name("{name}")
{placement}
);
{wait}"#,
        admin = CREATE_ADMIN,
        artifact = escape(&artifact),
        memory = deployment.memory_mb,
        context = context,
        name = escape(&deployment.name),
        placement = placement(deployment),
        wait = wait_for_instances(&deployment.name, 1),
    )
}

/// Deploy the coordination space with one partition; a backup is placed on
/// another machine when `highly_available`
pub fn deploy_management_space(deployment: &DeploymentDescriptor, highly_available: bool) -> String {
    let instances = if highly_available { 2 } else { 1 };
    format!(
        r#"org.openspaces.admin.Admin admin = {admin};
admin.getElasticServiceManagers().waitForAtLeastOne();
org.openspaces.admin.pu.ProcessingUnit pu = admin.getGridServiceManagers().waitForAtLeastOne().deploy(
  new org.openspaces.admin.space.ElasticSpaceDeployment("{name}")
  .memoryCapacityPerContainer("{memory}m")
  .highlyAvailable({ha})
  .numberOfPartitions(1)
{placement}
);
{wait}"#,
        admin = CREATE_ADMIN,
        name = escape(&deployment.name),
        memory = deployment.memory_mb,
        ha = highly_available,
        placement = placement(deployment),
        wait = wait_for_instances(&deployment.name, instances),
    )
}

/// Find this machine within `timeout` and shut down all of its agents
pub fn shutdown_agents(address: IpAddr, timeout: Duration) -> String {
    format!(
        r#"org.openspaces.admin.machine.Machine m = {admin}.getMachines()
  .waitFor("{address}", {millis}, java.util.concurrent.TimeUnit.MILLISECONDS);
if (m != null) {{ m.getGridServiceAgents().waitForAtLeastOne().shutdown(); }};
"#,
        admin = CREATE_ADMIN,
        address = address,
        millis = timeout.as_millis(),
    )
}
