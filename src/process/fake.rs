//! Scripted processes for tests

use super::descriptor::ProcessDescriptor;
use super::spawner::{ChildProcess, LineSink, Spawner};
use crate::error::{Result, WardenError};
use std::io;
use std::sync::{Arc, Mutex};

type ExitCheck = Box<dyn FnMut() -> Option<i32> + Send>;
type KillHook = Box<dyn FnMut() + Send>;

/// How a fake process behaves once launched
pub struct FakeBehavior {
    output: Vec<String>,
    exit: ExitCheck,
    on_kill: Option<KillHook>,
    spawn_fails: bool,
}

impl FakeBehavior {
    /// Exits with `code` on the first check
    pub fn exits(code: i32) -> Self {
        Self::exits_when(move || Some(code))
    }

    /// Stays running until killed
    pub fn never_exits() -> Self {
        Self::exits_when(|| None)
    }

    /// The launch itself fails, as for a missing executable
    pub fn fails_to_spawn() -> Self {
        let mut behavior = Self::never_exits();
        behavior.spawn_fails = true;
        behavior
    }

    /// Exits with whatever `check` reports, once it reports something
    pub fn exits_when(check: impl FnMut() -> Option<i32> + Send + 'static) -> Self {
        Self {
            output: Vec::new(),
            exit: Box::new(check),
            on_kill: None,
            spawn_fails: false,
        }
    }

    /// Lines emitted right after launch
    pub fn with_output(mut self, lines: &[&str]) -> Self {
        self.output = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Hook invoked when the process is killed
    pub fn on_kill(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_kill = Some(Box::new(hook));
        self
    }
}

struct FakeChild {
    exit: ExitCheck,
    on_kill: Option<KillHook>,
    exited: Option<i32>,
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        None
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        if self.exited.is_none() {
            self.exited = (self.exit)();
        }
        Ok(self.exited)
    }

    fn kill(&mut self) -> io::Result<i32> {
        if let Some(code) = self.exited {
            return Ok(code);
        }
        if let Some(hook) = self.on_kill.as_mut() {
            hook();
        }
        self.exited = Some(137);
        Ok(137)
    }
}

type BehaviorFn = dyn Fn(&ProcessDescriptor) -> FakeBehavior + Send + Sync;

/// Spawner that records descriptors and launches scripted fakes
pub struct FakeSpawner {
    behavior: Box<BehaviorFn>,
    launched: Mutex<Vec<ProcessDescriptor>>,
}

impl FakeSpawner {
    pub fn new(behavior: impl Fn(&ProcessDescriptor) -> FakeBehavior + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            behavior: Box::new(behavior),
            launched: Mutex::new(Vec::new()),
        })
    }

    /// Every descriptor launched so far, in launch order
    pub fn launched(&self) -> Vec<ProcessDescriptor> {
        self.launched.lock().unwrap().clone()
    }
}

impl Spawner for FakeSpawner {
    fn spawn(&self, descriptor: &ProcessDescriptor, sink: LineSink) -> Result<Box<dyn ChildProcess>> {
        self.launched.lock().unwrap().push(descriptor.clone());
        let behavior = (self.behavior)(descriptor);
        if behavior.spawn_fails {
            return Err(WardenError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("failed to spawn {}", descriptor.command_line()),
            )));
        }
        for line in &behavior.output {
            sink(line);
        }
        Ok(Box::new(FakeChild {
            exit: behavior.exit,
            on_kill: behavior.on_kill,
            exited: None,
        }))
    }
}
