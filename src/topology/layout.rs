//! Product installation layout

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(windows)]
const SCRIPT_SUFFIX: &str = ".bat";
#[cfg(not(windows))]
const SCRIPT_SUFFIX: &str = ".sh";

/// Locations inside the product and JDK installations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLayout {
    /// Product installation root
    pub product_home: PathBuf,
    /// JDK installation root
    pub jdk_home: PathBuf,
    /// Directory receiving rendered admin scripts (defaults to the product root)
    #[serde(default)]
    pub script_dir: Option<PathBuf>,
    /// Directory holding the reverse-proxy service recipe
    #[serde(default)]
    pub proxy_service_dir: Option<PathBuf>,
    /// Executable name the core agent's children run under
    #[serde(default = "default_agent_process_name")]
    pub agent_process_name: String,
}

fn default_agent_process_name() -> String {
    "java".to_string()
}

impl InstallLayout {
    pub fn new(product_home: impl Into<PathBuf>, jdk_home: impl Into<PathBuf>) -> Self {
        Self {
            product_home: product_home.into(),
            jdk_home: jdk_home.into(),
            script_dir: None,
            proxy_service_dir: None,
            agent_process_name: default_agent_process_name(),
        }
    }

    /// Working directory of the core agent launcher
    pub fn agent_dir(&self) -> PathBuf {
        self.product_home.join("bin")
    }

    /// Core agent launcher file name
    pub fn agent_command(&self) -> String {
        format!("gs-agent{}", SCRIPT_SUFFIX)
    }

    /// Working directory of the script interpreter
    pub fn interpreter_dir(&self) -> PathBuf {
        self.product_home.join("tools").join("groovy").join("bin")
    }

    /// Script interpreter launcher file name
    pub fn interpreter_command(&self) -> String {
        if cfg!(windows) {
            "groovy.bat".to_string()
        } else {
            "groovy".to_string()
        }
    }

    /// Working directory of the admin CLI
    pub fn cli_dir(&self) -> PathBuf {
        self.product_home.join("tools").join("cli")
    }

    /// Admin CLI launcher file name
    pub fn cli_command(&self) -> String {
        format!("cloudify{}", SCRIPT_SUFFIX)
    }

    /// Where rendered scripts are written
    pub fn script_dir(&self) -> &Path {
        self.script_dir.as_deref().unwrap_or(&self.product_home)
    }

    /// REST admin web archive
    pub fn rest_admin_artifact(&self) -> PathBuf {
        self.product_home.join("tools").join("rest").join("rest.war")
    }

    /// Web UI web archive
    pub fn web_ui_artifact(&self) -> PathBuf {
        self.product_home
            .join("tools")
            .join("gs-webui")
            .join("gs-webui.war")
    }

    /// Reverse-proxy service recipe directory
    pub fn proxy_service_dir(&self) -> PathBuf {
        self.proxy_service_dir
            .clone()
            .unwrap_or_else(|| self.product_home.join("recipes").join("iisproxy"))
    }
}
