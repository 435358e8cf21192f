//! Supervision of a single external process
//!
//! A `ProcessSupervisor` owns exactly one process for its whole life:
//! `Unstarted -> Running -> Exited`. Every access to the live handle goes
//! through one lock, so a shutdown request on another thread never observes
//! a half-started or half-disposed process.

use super::descriptor::ProcessDescriptor;
use super::spawner::{ChildProcess, LineSink, Spawner};
use crate::error::{Result, WardenError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often a bounded or unbounded wait re-checks the process
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Supervised process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not started yet
    Unstarted,
    /// Started and not yet observed to exit
    Running,
    /// Exited, killed or disposed
    Exited,
}

/// Result of waiting for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The process exited with this code
    Exited(i32),
    /// The timeout elapsed while the process was still running
    TimedOut,
}

impl WaitOutcome {
    /// Exit code, if the process exited
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            WaitOutcome::Exited(code) => Some(*code),
            WaitOutcome::TimedOut => None,
        }
    }
}

/// The live process and what is known about it
struct ProcessHandle {
    state: ProcessState,
    child: Option<Box<dyn ChildProcess>>,
    exit_code: Option<i32>,
    command_line: String,
}

impl ProcessHandle {
    /// Observe a pending exit without blocking
    fn refresh(&mut self, label: &str) {
        if self.state != ProcessState::Running {
            return;
        }
        let Some(child) = self.child.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(code)) => {
                info!(process = %label, exit_code = code, "Process exited");
                self.state = ProcessState::Exited;
                self.exit_code = Some(code);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(process = %label, "Failed to query process status: {}", e);
                self.state = ProcessState::Exited;
                self.exit_code = Some(-1);
            }
        }
    }
}

/// Owns and supervises one external process
pub struct ProcessSupervisor {
    /// Name used in logs
    label: String,
    /// Process launcher
    spawner: Arc<dyn Spawner>,
    /// Live handle; the lock covers start, state checks, waits and dispose
    handle: Mutex<ProcessHandle>,
    /// Captured output lines
    captured: Arc<Mutex<String>>,
}

impl ProcessSupervisor {
    /// Create an unstarted supervisor
    pub fn new(label: &str, spawner: Arc<dyn Spawner>) -> Self {
        Self {
            label: label.to_string(),
            spawner,
            handle: Mutex::new(ProcessHandle {
                state: ProcessState::Unstarted,
                child: None,
                exit_code: None,
                command_line: String::new(),
            }),
            captured: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Create a supervisor and start it immediately
    pub fn spawn(label: &str, spawner: Arc<dyn Spawner>, descriptor: ProcessDescriptor) -> Result<Self> {
        let supervisor = Self::new(label, spawner);
        supervisor.start(descriptor)?;
        Ok(supervisor)
    }

    /// A poisoned lock only means another thread panicked mid-access; the
    /// handle itself stays consistent, so teardown keeps going.
    fn handle(&self) -> MutexGuard<'_, ProcessHandle> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Start the process. Valid only once, from `Unstarted`.
    pub fn start(&self, descriptor: ProcessDescriptor) -> Result<()> {
        let mut handle = self.handle();
        if handle.state != ProcessState::Unstarted {
            return Err(WardenError::InvalidState(format!(
                "{} was already started",
                self.label
            )));
        }

        let command_line = descriptor.command_line();
        info!(
            process = %self.label,
            working_dir = %descriptor.working_dir.display(),
            elevated = descriptor.elevated,
            "Starting {}",
            command_line
        );

        let label = self.label.clone();
        let capture = descriptor.capture_output;
        let captured = self.captured.clone();
        let sink: LineSink = Arc::new(move |line: &str| {
            debug!(process = %label, "{}", line);
            if capture {
                let mut buffer = match captured.lock() {
                    Ok(buffer) => buffer,
                    Err(poisoned) => poisoned.into_inner(),
                };
                buffer.push_str(line);
                buffer.push('\n');
            }
        });

        let child = self.spawner.spawn(&descriptor, sink).map_err(|e| {
            error!(process = %self.label, command = %command_line, "Failed to start: {}", e);
            e
        })?;

        handle.child = Some(child);
        handle.command_line = command_line;
        handle.state = ProcessState::Running;
        Ok(())
    }

    /// Point-in-time check; never blocks on the process itself
    pub fn is_running(&self) -> bool {
        let mut handle = self.handle();
        handle.refresh(&self.label);
        handle.state == ProcessState::Running && handle.child.is_some()
    }

    /// Current state
    pub fn state(&self) -> ProcessState {
        let mut handle = self.handle();
        handle.refresh(&self.label);
        handle.state
    }

    /// Exit code once exited
    pub fn exit_code(&self) -> Option<i32> {
        let mut handle = self.handle();
        handle.refresh(&self.label);
        handle.exit_code
    }

    /// Command line the process was started with
    pub fn command_line(&self) -> String {
        self.handle().command_line.clone()
    }

    /// Output captured so far
    pub fn captured_output(&self) -> String {
        match self.captured.lock() {
            Ok(buffer) => buffer.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Block until the process exits or `timeout` elapses. `None` waits
    /// indefinitely. The lock is released between checks so other threads
    /// can still inspect or kill the process.
    pub fn wait_for_exit(&self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            {
                let mut handle = self.handle();
                handle.refresh(&self.label);
                match handle.state {
                    ProcessState::Unstarted => {
                        return Err(WardenError::InvalidState(format!(
                            "{} was never started",
                            self.label
                        )));
                    }
                    ProcessState::Exited => {
                        return Ok(WaitOutcome::Exited(handle.exit_code.unwrap_or(-1)));
                    }
                    ProcessState::Running if handle.child.is_none() => {
                        return Err(WardenError::InvalidState(format!(
                            "{} was disposed while running",
                            self.label
                        )));
                    }
                    ProcessState::Running => {}
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(process = %self.label, "Wait timed out");
                        return Ok(WaitOutcome::TimedOut);
                    }
                    WAIT_POLL_INTERVAL.min(deadline - now)
                }
                None => WAIT_POLL_INTERVAL,
            };
            std::thread::sleep(pause);
        }
    }

    /// Forcibly terminate the process if it is still running
    pub fn kill(&self) -> Result<()> {
        let mut handle = self.handle();
        handle.refresh(&self.label);
        if handle.state != ProcessState::Running {
            return Ok(());
        }

        if let Some(child) = handle.child.as_mut() {
            warn!(process = %self.label, pid = ?child.id(), "Killing process");
            let code = child.kill()?;
            handle.exit_code = Some(code);
        }
        handle.state = ProcessState::Exited;
        Ok(())
    }

    /// Release the OS handle. Safe on unstarted or exited processes and
    /// idempotent. A process that is still running keeps its handle, so it
    /// stays visible to `is_running` and can still be killed.
    pub fn dispose(&self) {
        let mut handle = self.handle();
        handle.refresh(&self.label);
        if handle.state == ProcessState::Running {
            warn!(process = %self.label, "Process still running, keeping its handle");
            return;
        }
        if handle.child.take().is_some() {
            debug!(process = %self.label, "Disposed process handle");
        }
        if handle.state == ProcessState::Unstarted {
            handle.state = ProcessState::Exited;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::{FakeBehavior, FakeSpawner};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn descriptor() -> ProcessDescriptor {
        ProcessDescriptor::new("/opt/grid/bin", "gs-agent.sh").capture(true)
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::exits(0));
        let supervisor = ProcessSupervisor::new("agent", spawner);

        supervisor.start(descriptor()).unwrap();
        let err = supervisor.start(descriptor()).unwrap_err();
        assert!(matches!(err, WardenError::InvalidState(_)));
    }

    #[test]
    fn test_capture_collects_lines() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::exits(0).with_output(&["first", "second"]));
        let supervisor = ProcessSupervisor::spawn("script", spawner, descriptor()).unwrap();

        assert_eq!(supervisor.wait_for_exit(None).unwrap(), WaitOutcome::Exited(0));
        assert_eq!(supervisor.captured_output(), "first\nsecond\n");
    }

    #[test]
    fn test_output_not_kept_without_capture() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::exits(0).with_output(&["line"]));
        let supervisor = ProcessSupervisor::spawn(
            "script",
            spawner,
            ProcessDescriptor::new("/", "true").redirect_stdout(true),
        )
        .unwrap();

        supervisor.wait_for_exit(None).unwrap();
        assert!(supervisor.captured_output().is_empty());
    }

    #[test]
    fn test_bounded_wait_times_out() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::never_exits());
        let supervisor = ProcessSupervisor::spawn("agent", spawner, descriptor()).unwrap();

        let outcome = supervisor
            .wait_for_exit(Some(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(supervisor.is_running());
    }

    #[test]
    fn test_wait_returns_exit_code() {
        let release = Arc::new(AtomicBool::new(false));
        let flag = release.clone();
        let spawner = FakeSpawner::new(move |_| {
            let flag = flag.clone();
            FakeBehavior::exits_when(move || flag.load(Ordering::SeqCst).then_some(7))
        });
        let supervisor = Arc::new(ProcessSupervisor::spawn("agent", spawner, descriptor()).unwrap());

        let waiter = {
            let supervisor = supervisor.clone();
            std::thread::spawn(move || supervisor.wait_for_exit(None))
        };
        std::thread::sleep(Duration::from_millis(100));
        assert!(supervisor.is_running());
        release.store(true, Ordering::SeqCst);

        assert_eq!(waiter.join().unwrap().unwrap(), WaitOutcome::Exited(7));
        assert_eq!(supervisor.exit_code(), Some(7));
        assert_eq!(supervisor.state(), ProcessState::Exited);
    }

    #[test]
    fn test_wait_on_unstarted_is_invalid() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::exits(0));
        let supervisor = ProcessSupervisor::new("agent", spawner);
        assert!(matches!(
            supervisor.wait_for_exit(Some(Duration::from_millis(10))),
            Err(WardenError::InvalidState(_))
        ));
    }

    #[test]
    fn test_dispose_is_idempotent_and_safe_unstarted() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::never_exits());
        let unstarted = ProcessSupervisor::new("agent", spawner);
        unstarted.dispose();
        unstarted.dispose();
        assert!(!unstarted.is_running());

        let spawner = FakeSpawner::new(|_| FakeBehavior::exits(0));
        let exited = ProcessSupervisor::spawn("script", spawner, descriptor()).unwrap();
        exited.wait_for_exit(None).unwrap();
        exited.dispose();
        exited.dispose();
        assert_eq!(exited.state(), ProcessState::Exited);
        assert_eq!(exited.exit_code(), Some(0));
    }

    #[test]
    fn test_dispose_keeps_running_process_visible() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::never_exits());
        let supervisor = ProcessSupervisor::spawn("agent", spawner, descriptor()).unwrap();

        supervisor.dispose();
        assert!(supervisor.is_running());

        supervisor.kill().unwrap();
        supervisor.dispose();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.exit_code(), Some(137));
    }

    #[test]
    fn test_kill_stops_running_process() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::never_exits());
        let supervisor = ProcessSupervisor::spawn("agent", spawner, descriptor()).unwrap();

        supervisor.kill().unwrap();
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.exit_code(), Some(137));
        // killing again is a no-op
        supervisor.kill().unwrap();
    }

    #[test]
    fn test_concurrent_polling_and_kill() {
        let spawner = FakeSpawner::new(|_| FakeBehavior::never_exits());
        let supervisor = Arc::new(ProcessSupervisor::spawn("agent", spawner, descriptor()).unwrap());

        let pollers: Vec<_> = (0..4)
            .map(|_| {
                let supervisor = supervisor.clone();
                std::thread::spawn(move || {
                    while supervisor.is_running() {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        supervisor.kill().unwrap();
        supervisor.dispose();

        for poller in pollers {
            poller.join().unwrap();
        }
        assert!(!supervisor.is_running());
    }
}
