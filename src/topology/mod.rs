//! Role topology
//!
//! The per-machine configuration describing which sub-components run on a
//! role instance, their memory budgets, the ports they bind, and where the
//! product installation lives.

pub mod config;
pub mod launch;
pub mod layout;
pub mod ports;

pub use config::{ContextPaths, MemoryBudgets, RoleTopology, SubComponent};
pub use launch::{agent_arguments, agent_environment, shared_java_options};
pub use layout::InstallLayout;
pub use ports::PortMap;
