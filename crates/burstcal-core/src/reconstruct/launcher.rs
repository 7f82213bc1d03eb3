use std::fs::File;
use std::io;
use std::process::{Child, Command, Stdio};

use super::command::LaunchCommand;

/// Captured stdout/stderr of the external program, inside the job directory.
pub const PROCESS_LOG_NAME: &str = "reconstruction.log";

/// How a finished process exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A launched external process.
pub trait RunningProcess: Send {
    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;

    /// Terminate the process and reap it.
    fn kill(&mut self) -> io::Result<()>;
}

/// Starts external processes. Swapped for a fake in tests.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn RunningProcess>>;
}

/// Launches real child processes via `std::process`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, command: &LaunchCommand) -> io::Result<Box<dyn RunningProcess>> {
        let log = File::create(command.cwd.join(PROCESS_LOG_NAME))?;
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .spawn()?;
        Ok(Box::new(ChildProcess { child }))
    }
}

struct ChildProcess {
    child: Child,
}

impl RunningProcess for ChildProcess {
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.kill() {
            Ok(()) => {}
            // Already exited.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait()?;
        Ok(())
    }
}
