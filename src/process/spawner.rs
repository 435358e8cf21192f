//! Launching operating-system processes
//!
//! `Spawner` is the seam between supervision logic and the OS. `OsSpawner`
//! launches real processes and delivers each redirected output line to a
//! sink from a dedicated reader thread per stream.

use super::descriptor::ProcessDescriptor;
use crate::error::{Result, WardenError};
use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Receives output lines in emission order per stream
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// How long a finished process's readers get to drain remaining output
const READER_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A launched process
pub trait ChildProcess: Send {
    /// OS process id, when there is one
    fn id(&self) -> Option<u32>;

    /// Exit code if the process has exited, without blocking
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Terminate the process and reap it, returning its exit code
    fn kill(&mut self) -> io::Result<i32>;
}

/// Launches processes from descriptors
pub trait Spawner: Send + Sync {
    fn spawn(&self, descriptor: &ProcessDescriptor, sink: LineSink) -> Result<Box<dyn ChildProcess>>;
}

/// Spawner for real operating-system processes
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpawner;

impl OsSpawner {
    pub fn new() -> Self {
        Self
    }

    fn command(descriptor: &ProcessDescriptor) -> Command {
        let program = descriptor.program();

        #[cfg(unix)]
        {
            // SAFETY: geteuid has no preconditions and cannot fail
            let is_root = unsafe { libc::geteuid() } == 0;
            if descriptor.elevated && !is_root {
                let mut command = Command::new("sudo");
                command.arg("-n").arg("-E").arg(&program);
                return command;
            }
        }

        #[cfg(not(unix))]
        if descriptor.elevated {
            debug!(
                command = %descriptor.command,
                "Elevated launch requested; relying on host privileges"
            );
        }

        Command::new(program)
    }
}

impl Spawner for OsSpawner {
    fn spawn(&self, descriptor: &ProcessDescriptor, sink: LineSink) -> Result<Box<dyn ChildProcess>> {
        let mut command = Self::command(descriptor);
        command
            .args(&descriptor.args)
            .current_dir(&descriptor.working_dir)
            .envs(&descriptor.env)
            .stdin(Stdio::null())
            .stdout(if descriptor.redirect_stdout {
                Stdio::piped()
            } else {
                Stdio::inherit()
            })
            .stderr(if descriptor.redirect_stderr {
                Stdio::piped()
            } else {
                Stdio::inherit()
            });

        let mut child = command.spawn().map_err(|e| {
            WardenError::Io(io::Error::new(
                e.kind(),
                format!("failed to spawn {}: {}", descriptor.command_line(), e),
            ))
        })?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, sink.clone())?);
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, sink)?);
        }

        Ok(Box::new(OsChild { child, readers }))
    }
}

fn spawn_reader<R>(stream: R, sink: LineSink) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name("output-reader".to_string())
        .spawn(move || {
            for line in BufReader::new(stream).lines() {
                match line {
                    Ok(line) => sink(&line),
                    Err(e) => {
                        debug!("Output reader stopped: {}", e);
                        break;
                    }
                }
            }
        })?;
    Ok(handle)
}

/// A real child process plus its output readers
struct OsChild {
    child: Child,
    readers: Vec<JoinHandle<()>>,
}

impl OsChild {
    /// Give readers a bounded chance to deliver trailing output. Readers held
    /// open by grandchildren that inherited the pipe are detached.
    fn drain_readers(&mut self) {
        let deadline = Instant::now() + READER_DRAIN_GRACE;
        while self.readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        for reader in self.readers.drain(..) {
            if reader.is_finished() && reader.join().is_err() {
                warn!("Output reader panicked");
            }
        }
    }
}

impl ChildProcess for OsChild {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        match self.child.try_wait()? {
            Some(status) => {
                self.drain_readers();
                Ok(Some(exit_code(status)))
            }
            None => Ok(None),
        }
    }

    fn kill(&mut self) -> io::Result<i32> {
        if let Err(e) = self.child.kill() {
            // already exited; fall through and reap
            if e.kind() != io::ErrorKind::InvalidInput {
                return Err(e);
            }
        }
        let status = self.child.wait()?;
        self.drain_readers();
        Ok(exit_code(status))
    }
}

/// Exit code of a finished process; signals map to 128 + signal number
fn exit_code(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_sink() -> (LineSink, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let sink: LineSink = Arc::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string());
        });
        (sink, lines)
    }

    fn wait(child: &mut Box<dyn ChildProcess>) -> i32 {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(code) = child.try_wait().unwrap() {
                return code;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_output_lines_reach_sink_in_order() {
        let (sink, lines) = collecting_sink();
        let descriptor = ProcessDescriptor::new("/", "sh")
            .args(["-c", "echo one; echo two; echo three"])
            .capture(true);

        let mut child = OsSpawner::new().spawn(&descriptor, sink).unwrap();
        assert_eq!(wait(&mut child), 0);
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_environment_overrides_reach_child() {
        let (sink, lines) = collecting_sink();
        let descriptor = ProcessDescriptor::new("/", "sh")
            .args(["-c", "echo $WARDEN_TEST_VALUE"])
            .env("WARDEN_TEST_VALUE", "overridden")
            .capture(true);

        let mut child = OsSpawner::new().spawn(&descriptor, sink).unwrap();
        wait(&mut child);
        assert_eq!(*lines.lock().unwrap(), vec!["overridden"]);
    }

    #[test]
    fn test_exit_code_is_reported() {
        let (sink, _) = collecting_sink();
        let descriptor = ProcessDescriptor::new("/", "sh").args(["-c", "exit 3"]);

        let mut child = OsSpawner::new().spawn(&descriptor, sink).unwrap();
        assert_eq!(wait(&mut child), 3);
    }

    #[test]
    fn test_kill_reports_signal() {
        let (sink, _) = collecting_sink();
        let descriptor = ProcessDescriptor::new("/", "sleep").arg("30");

        let mut child = OsSpawner::new().spawn(&descriptor, sink).unwrap();
        assert!(child.try_wait().unwrap().is_none());
        assert_eq!(child.kill().unwrap(), 128 + libc::SIGKILL);
    }

    #[test]
    fn test_spawn_failure_names_command() {
        let (sink, _) = collecting_sink();
        let descriptor = ProcessDescriptor::new("/", "warden-no-such-binary");

        let err = match OsSpawner::new().spawn(&descriptor, sink) {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("warden-no-such-binary"));
    }
}
