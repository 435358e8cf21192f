//! Process descriptors

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variable overrides, ordered by name
pub type EnvMap = BTreeMap<String, String>;

/// Everything needed to launch one external process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessDescriptor {
    /// Working directory
    pub working_dir: PathBuf,
    /// Executable name, resolved against the working directory first
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// Overrides applied on top of the inherited environment
    pub env: EnvMap,
    /// Read stdout lines into the logging sink
    pub redirect_stdout: bool,
    /// Read stderr lines into the logging sink
    pub redirect_stderr: bool,
    /// Keep redirected lines in a buffer for later inspection
    pub capture_output: bool,
    /// Launch with elevated privileges
    pub elevated: bool,
}

impl ProcessDescriptor {
    /// Create a new descriptor for a command run from a working directory
    pub fn new(working_dir: impl Into<PathBuf>, command: &str) -> Self {
        Self {
            working_dir: working_dir.into(),
            command: command.to_string(),
            ..Default::default()
        }
    }

    /// Add an argument
    pub fn arg(mut self, arg: &str) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// Add arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment override
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Merge environment overrides; later entries replace earlier ones
    pub fn envs(mut self, env: &EnvMap) -> Self {
        self.env = merge_environment(&self.env, env);
        self
    }

    /// Redirect stdout into the logging sink
    pub fn redirect_stdout(mut self, redirect: bool) -> Self {
        self.redirect_stdout = redirect;
        self
    }

    /// Redirect stderr into the logging sink
    pub fn redirect_stderr(mut self, redirect: bool) -> Self {
        self.redirect_stderr = redirect;
        self
    }

    /// Redirect both streams and keep their lines
    pub fn capture(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        if capture {
            self.redirect_stdout = true;
            self.redirect_stderr = true;
        }
        self
    }

    /// Mark the process as requiring elevated privileges
    pub fn elevated(mut self, elevated: bool) -> Self {
        self.elevated = elevated;
        self
    }

    /// Path of the executable to launch
    pub fn program(&self) -> PathBuf {
        let local = self.working_dir.join(&self.command);
        if local.exists() {
            local
        } else {
            PathBuf::from(&self.command)
        }
    }

    /// Command and arguments as one line, for logs and errors
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Descriptor that forcibly terminates every process with the given
    /// executable name on this machine
    pub fn kill_all(process_name: &str) -> Self {
        let descriptor = if cfg!(windows) {
            let system_root =
                std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".to_string());
            ProcessDescriptor::new(PathBuf::from(system_root).join("System32"), "cmd.exe")
                .args(["/c", "taskkill", "/im"])
                .arg(&format!("{}.exe", process_name))
                .arg("/f")
        } else {
            ProcessDescriptor::new("/", "pkill").args(["-KILL", "-x", process_name])
        };

        descriptor.redirect_stdout(true).redirect_stderr(true)
    }
}

/// Merge `overrides` on top of `base`; overrides win by key
pub fn merge_environment(base: &EnvMap, overrides: &EnvMap) -> EnvMap {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
