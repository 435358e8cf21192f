//! Bridge to the cluster's admin interpreter and admin CLI
//!
//! Script and command text is produced by pure renderers in [`script`] and
//! [`cli`]; [`runner`] writes and launches it under a process supervisor.

pub mod cli;
pub mod runner;
pub mod script;

pub use runner::{OutputMode, ScriptBridge, ScriptProcess, SCRIPT_EXTENSION, SCRIPT_PREFIX};
pub use script::DeploymentDescriptor;
