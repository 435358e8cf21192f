//! External process supervision
//!
//! Provides process descriptors, the OS launcher with asynchronous output
//! line delivery, and the lock-guarded supervisor that owns one process.

pub mod descriptor;
pub mod spawner;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod fake;

pub use descriptor::{merge_environment, EnvMap, ProcessDescriptor};
pub use spawner::{ChildProcess, LineSink, OsSpawner, Spawner};
pub use supervisor::{ProcessState, ProcessSupervisor, WaitOutcome};
