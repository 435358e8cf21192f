//! Running rendered scripts and CLI commands as supervised processes

use super::script;
use crate::error::{Result, WardenError};
use crate::process::{EnvMap, ProcessDescriptor, ProcessSupervisor, Spawner, WaitOutcome};
use crate::topology::InstallLayout;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Prefix of every generated script file
pub const SCRIPT_PREFIX: &str = "AdminScript_";

/// Extension of generated script files
pub const SCRIPT_EXTENSION: &str = "groovy";

/// Heap limit for the script interpreter
const INTERPRETER_HEAP: &str = "-Xmx512m";

/// What happens to the output of a bridged process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Leave both streams attached to the supervisor's own
    Inherit,
    /// Forward every line to the log
    Log,
    /// Forward every line to the log and keep it for inspection
    Capture,
}

impl OutputMode {
    /// `Log` when `redirect` is set, otherwise `Inherit`
    pub fn redirected(redirect: bool) -> Self {
        if redirect {
            OutputMode::Log
        } else {
            OutputMode::Inherit
        }
    }

    fn apply(self, descriptor: ProcessDescriptor) -> ProcessDescriptor {
        match self {
            OutputMode::Inherit => descriptor,
            OutputMode::Log => descriptor.redirect_stdout(true).redirect_stderr(true),
            OutputMode::Capture => descriptor.capture(true),
        }
    }
}

/// A running admin script. The rendered script file is removed when this
/// is dropped.
pub struct ScriptProcess {
    process: ProcessSupervisor,
    script: PathBuf,
}

impl ScriptProcess {
    /// Path of the rendered script
    pub fn script(&self) -> &Path {
        &self.script
    }
}

impl Deref for ScriptProcess {
    type Target = ProcessSupervisor;

    fn deref(&self) -> &ProcessSupervisor {
        &self.process
    }
}

impl Drop for ScriptProcess {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.script) {
            warn!(script = %self.script.display(), "Failed to remove admin script: {}", e);
        }
    }
}

/// Runs admin scripts and admin CLI commands against the cluster
pub struct ScriptBridge {
    layout: InstallLayout,
    base_env: EnvMap,
    spawner: Arc<dyn Spawner>,
}

impl ScriptBridge {
    /// Create a bridge. `base_env` is the agent environment; `java_options`
    /// are the shared JVM options handed to the interpreter.
    pub fn new(
        layout: InstallLayout,
        base_env: EnvMap,
        java_options: &str,
        spawner: Arc<dyn Spawner>,
    ) -> Self {
        let mut base_env = base_env;
        base_env.insert(
            "JAVA_OPTS".to_string(),
            format!("{} {}", INTERPRETER_HEAP, java_options),
        );
        Self {
            layout,
            base_env,
            spawner,
        }
    }

    /// A script path that does not exist yet
    fn unique_script_path(&self) -> PathBuf {
        let dir = self.layout.script_dir();
        loop {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(12)
                .map(char::from)
                .collect();
            let path = dir.join(format!("{}{}.{}", SCRIPT_PREFIX, suffix, SCRIPT_EXTENSION));
            if !path.exists() {
                return path;
            }
        }
    }

    /// Write `body` wrapped for exit-code reporting to a fresh file and run
    /// it with the interpreter
    pub fn render_and_run(
        &self,
        body: &str,
        overrides: &EnvMap,
        output: OutputMode,
    ) -> Result<ScriptProcess> {
        let path = self.unique_script_path();
        fs::write(&path, script::wrap(body))?;
        debug!(script = %path.display(), "Rendered admin script");

        let descriptor = ProcessDescriptor::new(
            self.layout.interpreter_dir(),
            &self.layout.interpreter_command(),
        )
        .arg(&path.to_string_lossy())
        .envs(&self.base_env)
        .envs(overrides);

        if output == OutputMode::Capture {
            for (key, value) in &descriptor.env {
                debug!("{}={}", key, value);
            }
        }

        match ProcessSupervisor::spawn("admin-script", self.spawner.clone(), output.apply(descriptor)) {
            Ok(process) => Ok(ScriptProcess {
                process,
                script: path,
            }),
            Err(e) => {
                let _ = fs::remove_file(&path);
                Err(e)
            }
        }
    }

    /// Run the admin CLI: connect to `connect_target`, then execute
    /// `command_text`
    pub fn render_and_run_cli_command(
        &self,
        connect_target: &str,
        command_text: &str,
        output: OutputMode,
    ) -> Result<ProcessSupervisor> {
        let descriptor = ProcessDescriptor::new(self.layout.cli_dir(), &self.layout.cli_command())
            .arg(&format!("{}{}", connect_target, command_text))
            .envs(&self.base_env);

        ProcessSupervisor::spawn("admin-cli", self.spawner.clone(), output.apply(descriptor))
    }

    /// Wait for a bridged process and turn a non-zero exit into an error.
    /// A process still running after `timeout` is killed. Never retries.
    pub fn check_exit(process: &ProcessSupervisor, timeout: Option<Duration>) -> Result<()> {
        let command = process.command_line();
        let outcome = process.wait_for_exit(timeout)?;
        if outcome == WaitOutcome::TimedOut {
            process.kill()?;
        }
        process.dispose();

        match outcome {
            WaitOutcome::Exited(0) => {
                info!(command = %command, "Command completed");
                Ok(())
            }
            WaitOutcome::Exited(exit_code) => {
                error!(command = %command, exit_code, "Command failed");
                Err(WardenError::CommandExecution { command, exit_code })
            }
            WaitOutcome::TimedOut => {
                error!(command = %command, ?timeout, "Command timed out");
                Err(WardenError::CommandTimedOut {
                    command,
                    timeout: timeout.unwrap_or_default(),
                })
            }
        }
    }

    /// Run a CLI command and check its exit code
    pub fn run_cli_checked(
        &self,
        connect_target: &str,
        command_text: &str,
        output: OutputMode,
        timeout: Duration,
    ) -> Result<()> {
        let process = self.render_and_run_cli_command(connect_target, command_text, output)?;
        Self::check_exit(&process, Some(timeout))
    }
}
