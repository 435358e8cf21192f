//! Warden - grid role instance bootstrapper
//!
//! Warden brings one machine of a grid deployment up and keeps it there:
//!
//! - Starts the core agent with the process counts its topology calls for
//! - Waits for the manager quorum before deploying anything
//! - Deploys the coordination space, REST admin and web UI workloads
//! - Installs the reverse proxy and wires rewrite rules to local workloads
//! - Tears all of it down again, forcibly if it has to

pub mod agent;
pub mod bridge;
pub mod endpoint;
pub mod error;
pub mod host;
pub mod process;
pub mod topology;

pub use error::{Result, WardenError};
