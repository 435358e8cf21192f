//! Cluster agent controller
//!
//! Drives one machine through the bootstrap sequence: resolve identity,
//! start the core agent, wait for the manager quorum, deploy management
//! workloads, wire the reverse proxy, then watch the agent until it exits.
//! `stop` may run on another thread at any point and tears everything down.

use super::proxy::{self, ProxyDiscovery, RewriteRule};
use crate::bridge::script::{self, DeploymentDescriptor, MANAGEMENT_SPACE_NAME};
use crate::bridge::{cli, OutputMode, ScriptBridge};
use crate::endpoint::EndpointDirectory;
use crate::error::{Result, WardenError};
use crate::process::{EnvMap, ProcessDescriptor, ProcessSupervisor, Spawner};
use crate::topology::{
    agent_arguments, agent_environment, shared_java_options, InstallLayout, RoleTopology,
    SubComponent,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Memory per container of the coordination space, in megabytes
pub const MANAGEMENT_SPACE_MEMORY_MB: u32 = 64;

/// Polling intervals and command timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Between checks of the quorum script
    pub quorum_poll: Duration,
    /// Between checks of a deploy script
    pub deploy_poll: Duration,
    /// Between proxy instance listings
    pub discovery_poll: Duration,
    /// Between checks of the core agent once everything is up
    pub steady_state_poll: Duration,
    /// Bound on the proxy install command
    pub install_timeout: Duration,
    /// Bound on every other CLI command
    pub command_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            quorum_poll: Duration::from_secs(10),
            deploy_poll: Duration::from_secs(10),
            discovery_poll: Duration::from_secs(10),
            steady_state_poll: Duration::from_secs(5),
            install_timeout: Duration::from_secs(5 * 60),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Which output streams are forwarded to the log.
///
/// The core agent writes its own output on stderr and its children's on
/// stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Redirection {
    /// Forward everything, including child process output
    pub all: bool,
    /// Forward the core agent's own output
    pub agent: bool,
}

impl Redirection {
    fn agent_stdout(&self) -> bool {
        self.all
    }

    fn agent_stderr(&self) -> bool {
        self.agent || self.all
    }
}

/// What the proxy phase set up, so `stop` can take it down
#[derive(Debug, Default)]
struct ProxyState {
    installed: bool,
    connect_target: String,
    rules: Vec<RewriteRule>,
}

/// Whether the bootstrap may continue after a blocking phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Continue,
    AgentExited,
    /// `stop` was called while the phase was waiting
    Stopped,
}

/// Bootstraps and supervises the cluster agent on this machine
pub struct ClusterAgentController {
    topology: RoleTopology,
    layout: InstallLayout,
    endpoints: Arc<dyn EndpointDirectory>,
    spawner: Arc<dyn Spawner>,
    timings: Timings,
    redirection: Redirection,
    elevated: bool,
    /// Set once by `stop`; `run` refuses to start afterwards
    stopped: AtomicBool,
    /// Core agent, shared between `run` and `stop`
    agent: ProcessSupervisor,
    local_address: OnceLock<IpAddr>,
    bridge: OnceLock<ScriptBridge>,
    proxy: Mutex<ProxyState>,
}

impl ClusterAgentController {
    /// Create a controller for one machine
    pub fn new(
        topology: RoleTopology,
        layout: InstallLayout,
        endpoints: Arc<dyn EndpointDirectory>,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        Self {
            agent: ProcessSupervisor::new("agent", spawner.clone()),
            topology,
            layout,
            endpoints,
            spawner,
            timings: Timings::default(),
            redirection: Redirection::default(),
            elevated: false,
            stopped: AtomicBool::new(false),
            local_address: OnceLock::new(),
            bridge: OnceLock::new(),
            proxy: Mutex::new(ProxyState::default()),
        }
    }

    /// Override polling intervals and timeouts
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Choose which process output is forwarded to the log
    pub fn with_redirection(mut self, redirection: Redirection) -> Self {
        self.redirection = redirection;
        self
    }

    /// Launch the core agent with elevated privileges
    pub fn with_elevated_agent(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    pub fn topology(&self) -> &RoleTopology {
        &self.topology
    }

    /// Local address, once resolved by `run`
    pub fn local_address(&self) -> Option<IpAddr> {
        self.local_address.get().copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_agent_running(&self) -> bool {
        self.agent.is_running()
    }

    fn proxy_state(&self) -> Result<MutexGuard<'_, ProxyState>> {
        self.proxy
            .lock()
            .map_err(|_| WardenError::Lock("Failed to acquire proxy state lock".to_string()))
    }

    /// Bootstrap this machine and block until the core agent exits
    pub fn run(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(WardenError::AlreadyStopped);
        }
        if self.layout.product_home.as_os_str().is_empty() {
            return Err(WardenError::Configuration(
                "Installation root path is empty".to_string(),
            ));
        }

        let address = self.resolve_identity()?;
        let bridge = self.bridge.get_or_init(|| {
            ScriptBridge::new(
                self.layout.clone(),
                agent_environment(&self.topology, &self.layout, address),
                &shared_java_options(&self.topology),
                self.spawner.clone(),
            )
        });

        self.start_agent(address)?;

        let mut progress = Progress::Continue;
        if self.topology.waits_for_quorum() {
            progress = self.wait_for_quorum(bridge)?;
        }
        if progress == Progress::Continue {
            progress = self.bootstrap_workloads(bridge)?;
        }
        if progress == Progress::Continue && self.topology.starts_proxy() {
            progress = self.wire_proxy(bridge, address)?;
        }
        if progress == Progress::Stopped {
            info!("Stop requested, bootstrap abandoned");
        }

        self.watch_agent();
        Ok(())
    }

    fn resolve_identity(&self) -> Result<IpAddr> {
        let ports = &self.topology.ports;
        let address = self
            .endpoints
            .resolve_local_endpoint(ports.transport_min, ports.transport_max)?;
        let address = *self.local_address.get_or_init(|| address);
        info!(address = %address, zone = %self.topology.zone, "Resolved local endpoint");
        Ok(address)
    }

    fn start_agent(&self, address: IpAddr) -> Result<()> {
        let descriptor =
            ProcessDescriptor::new(self.layout.agent_dir(), &self.layout.agent_command())
                .args(agent_arguments(&self.topology))
                .envs(&agent_environment(&self.topology, &self.layout, address))
                .redirect_stdout(self.redirection.agent_stdout())
                .redirect_stderr(self.redirection.agent_stderr())
                .elevated(self.elevated);

        info!(
            manager = self.topology.starts_manager(),
            "Starting core agent"
        );
        self.agent.start(descriptor)
    }

    fn script_output(&self) -> OutputMode {
        OutputMode::redirected(self.redirection.all)
    }

    fn wait_for_quorum(&self, bridge: &ScriptBridge) -> Result<Progress> {
        let expected = self.topology.expected_managers;
        info!(expected, "Waiting for manager quorum");

        let process = bridge.render_and_run(
            &script::wait_for_managers(expected),
            &EnvMap::new(),
            self.script_output(),
        )?;
        while process.is_running() {
            if self.is_stopped() {
                process.kill()?;
                process.dispose();
                return Ok(Progress::Stopped);
            }
            debug!(expected, "Manager quorum not reached yet");
            thread::sleep(self.timings.quorum_poll);
        }
        ScriptBridge::check_exit(&process, None)?;

        info!(expected, "Manager quorum reached");
        Ok(Progress::Continue)
    }

    /// Management space first, then each enabled web component
    fn bootstrap_workloads(&self, bridge: &ScriptBridge) -> Result<Progress> {
        let zone = self.topology.zone.clone();
        let reserved_memory_mb = self.topology.reserved_memory_mb();

        if self.topology.starts_rest_admin() {
            let space = DeploymentDescriptor {
                name: MANAGEMENT_SPACE_NAME.to_string(),
                artifact: None,
                memory_mb: MANAGEMENT_SPACE_MEMORY_MB,
                port: None,
                context_path: None,
                zone: zone.clone(),
                reserved_memory_mb,
            };
            let body = script::deploy_management_space(&space, self.topology.waits_for_quorum());
            if self.deploy(bridge, &space, &body)? == Progress::AgentExited {
                return Ok(Progress::AgentExited);
            }
        }

        for component in self.topology.web_components() {
            let (name, artifact) = match component {
                SubComponent::RestAdmin => ("rest", self.layout.rest_admin_artifact()),
                _ => ("web-ui", self.layout.web_ui_artifact()),
            };
            let deployment = DeploymentDescriptor {
                name: name.to_string(),
                artifact: Some(artifact),
                memory_mb: self.topology.memory.of(component),
                port: self.topology.port_of(component),
                context_path: self.topology.context_path_of(component).map(str::to_string),
                zone: zone.clone(),
                reserved_memory_mb,
            };
            let body = script::deploy_web_artifact(&deployment);
            if self.deploy(bridge, &deployment, &body)? == Progress::AgentExited {
                return Ok(Progress::AgentExited);
            }
        }

        Ok(Progress::Continue)
    }

    /// Run a deploy script, polling it together with the core agent
    fn deploy(
        &self,
        bridge: &ScriptBridge,
        deployment: &DeploymentDescriptor,
        body: &str,
    ) -> Result<Progress> {
        info!(
            workload = %deployment.name,
            memory_mb = deployment.memory_mb,
            reserved_memory_mb = deployment.reserved_memory_mb,
            "Deploying workload"
        );

        let process = bridge.render_and_run(body, &EnvMap::new(), self.script_output())?;
        while process.is_running() {
            if !self.agent.is_running() {
                warn!(workload = %deployment.name, "Core agent exited, abandoning deployment");
                process.kill()?;
                process.dispose();
                return Ok(Progress::AgentExited);
            }
            thread::sleep(self.timings.deploy_poll);
        }
        ScriptBridge::check_exit(&process, None)?;

        info!(workload = %deployment.name, "Workload deployed");
        Ok(Progress::Continue)
    }

    /// Connect prefix for the first visible REST admin endpoint. Polls
    /// until one becomes visible; `None` once `stop` has been called.
    fn wait_for_connect_target(&self) -> Option<String> {
        let port = self.topology.ports.rest_admin;
        loop {
            if self.is_stopped() {
                return None;
            }
            if let Some(endpoint) = self.endpoints.resolve_internal_endpoints(port).into_iter().next() {
                return Some(cli::connect(endpoint, &self.topology.context_paths.rest_admin));
            }
            info!(port, "Waiting for a REST admin endpoint");
            thread::sleep(self.timings.discovery_poll);
        }
    }

    /// Install the proxy and add one rule per web component. The proxy
    /// state lock is held across each install and add so `unwire_proxy`
    /// sees every rule that was added, and nothing is added once it ran.
    fn wire_proxy(&self, bridge: &ScriptBridge, address: IpAddr) -> Result<Progress> {
        let Some(target) = self.wait_for_connect_target() else {
            return Ok(Progress::Stopped);
        };
        let recipe_dir = self.layout.proxy_service_dir();

        {
            let mut state = self.proxy_state()?;
            if self.is_stopped() {
                return Ok(Progress::Stopped);
            }
            info!(recipe = %recipe_dir.display(), "Installing reverse proxy");
            bridge.run_cli_checked(
                &target,
                &proxy::install_command(&recipe_dir.to_string_lossy()),
                OutputMode::redirected(self.redirection.all),
                self.timings.install_timeout,
            )?;
            state.installed = true;
            state.connect_target = target.clone();
        }

        if self.discover_proxy_instances(bridge, &target)? == Progress::Stopped {
            return Ok(Progress::Stopped);
        }

        for rule in proxy::rules_for(&self.topology, address) {
            let mut state = self.proxy_state()?;
            if self.is_stopped() || !state.installed {
                return Ok(Progress::Stopped);
            }
            info!(rule = %rule.name, url = %rule.rewrite_url, "Adding rewrite rule");
            bridge.run_cli_checked(
                &target,
                &rule.add_command(),
                OutputMode::redirected(self.redirection.agent),
                self.timings.command_timeout,
            )?;
            state.rules.push(rule);
        }
        Ok(Progress::Continue)
    }

    /// Block until every expected proxy instance has answered at least once
    fn discover_proxy_instances(&self, bridge: &ScriptBridge, target: &str) -> Result<Progress> {
        let mut discovery = ProxyDiscovery::new(self.topology.expected_managers)?;

        loop {
            if self.is_stopped() {
                return Ok(Progress::Stopped);
            }
            let process =
                bridge.render_and_run_cli_command(target, &proxy::discovery_command(), OutputMode::Capture)?;
            if let Err(e) = ScriptBridge::check_exit(&process, Some(self.timings.command_timeout)) {
                debug!("Proxy instance listing failed: {}", e);
            }
            discovery.observe(&process.captured_output());

            if discovery.is_complete() {
                info!("All reverse proxy instances are running");
                return Ok(Progress::Continue);
            }
            info!(missing = ?discovery.missing(), "Waiting for reverse proxy instances");
            thread::sleep(self.timings.discovery_poll);
        }
    }

    fn watch_agent(&self) {
        info!("Watching core agent");
        while self.agent.is_running() {
            thread::sleep(self.timings.steady_state_poll);
        }
        info!(exit_code = ?self.agent.exit_code(), "Core agent is no longer running");
    }

    /// Tear down this machine. Every step is attempted; the first failure
    /// is returned once all of them have run.
    pub fn stop(&self, timeout: Duration) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        info!(?timeout, "Stopping");

        let mut first_error = None;

        if self.agent.is_running() {
            keep_first(&mut first_error, self.shutdown_agents(timeout));
            keep_first(
                &mut first_error,
                self.agent.wait_for_exit(Some(timeout)).map(|_| ()),
            );
        }

        if self.agent.is_running() {
            keep_first(&mut first_error, self.kill_agents());
        }

        keep_first(&mut first_error, self.unwire_proxy());

        self.agent.dispose();

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Stopped");
                Ok(())
            }
        }
    }

    /// Ask the cluster to shut down every agent on this machine
    fn shutdown_agents(&self, timeout: Duration) -> Result<()> {
        let (Some(bridge), Some(address)) = (self.bridge.get(), self.local_address()) else {
            return Ok(());
        };

        info!(address = %address, "Requesting graceful agent shutdown");
        let process = bridge.render_and_run(
            &script::shutdown_agents(address, timeout),
            &EnvMap::new(),
            self.script_output(),
        )?;
        ScriptBridge::check_exit(&process, Some(timeout))
    }

    /// Kill every process with the agent's executable name, then the agent
    /// itself, even when the fleet-wide kill could not be run
    fn kill_agents(&self) -> Result<()> {
        let name = &self.layout.agent_process_name;
        warn!(process = %name, "Agent still running after graceful shutdown, killing");

        let fleet = self.kill_all(name);
        let agent = self.agent.kill();
        fleet.and(agent)
    }

    fn kill_all(&self, name: &str) -> Result<()> {
        let killer = ProcessSupervisor::spawn(
            "kill-all",
            self.spawner.clone(),
            ProcessDescriptor::kill_all(name),
        )?;
        let outcome = killer.wait_for_exit(Some(self.timings.command_timeout))?;
        debug!(?outcome, "Kill command finished");
        killer.kill()?;
        killer.dispose();
        Ok(())
    }

    /// Remove added rewrite rules, then uninstall the proxy
    fn unwire_proxy(&self) -> Result<()> {
        let (target, rules) = {
            let mut state = self.proxy_state()?;
            if !state.installed {
                return Ok(());
            }
            state.installed = false;
            (state.connect_target.clone(), std::mem::take(&mut state.rules))
        };
        let Some(bridge) = self.bridge.get() else {
            return Ok(());
        };

        let mut first_error = None;
        for rule in &rules {
            info!(rule = %rule.name, "Removing rewrite rule");
            keep_first(
                &mut first_error,
                bridge.run_cli_checked(
                    &target,
                    &rule.remove_command(),
                    OutputMode::redirected(self.redirection.agent),
                    self.timings.command_timeout,
                ),
            );
        }

        info!("Uninstalling reverse proxy");
        keep_first(
            &mut first_error,
            bridge.run_cli_checked(
                &target,
                &proxy::uninstall_command(),
                OutputMode::redirected(self.redirection.agent),
                self.timings.command_timeout,
            ),
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn keep_first(first: &mut Option<WardenError>, result: Result<()>) {
    if let Err(e) = result {
        error!("Teardown step failed: {}", e);
        if first.is_none() {
            *first = Some(e);
        }
    }
}
