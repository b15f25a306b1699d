use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use wait_timeout::ChildExt;

use super::Error;

/// Default bound on any scheduler command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Captured result of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Everything the backends need from the operating system.
/// Tests swap in a fake that records invocations and replays canned output.
pub trait Shell: Send + Sync {
    /// Run `program` with `args` to completion, capturing its output.
    /// Fails if the program can't be spawned or doesn't finish in time;
    /// a non-zero exit is reported through [`CmdOutput::success`].
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput, Error>;
}

/// Runs commands as real subprocesses, killing them after `timeout`.
#[derive(Debug, Clone)]
pub struct SystemShell {
    timeout: Duration,
}

impl SystemShell {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemShell {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Shell for SystemShell {
    fn run(&self, program: &str, args: &[String]) -> Result<CmdOutput, Error> {
        log::debug!("running {program} {args:?}");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Spawn(program.to_owned(), e))?;

        // drain both pipes while waiting, so a chatty child can't block on a full pipe:
        let out = child.stdout.take().map(drain);
        let err = child.stderr.take().map(drain);

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // best effort; the child may have exited in the meantime
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout(program.to_owned(), self.timeout));
            }
            Err(e) => return Err(Error::Spawn(program.to_owned(), e)),
        };

        let output = CmdOutput {
            success: status.success(),
            stdout: out.map(join).unwrap_or_default(),
            stderr: err.map(join).unwrap_or_default(),
        };
        log::trace!("{program} finished with {status}: {output:?}");
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut stream: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::with_capacity(1024);
        if let Err(e) = stream.read_to_end(&mut buf) {
            log::warn!("error reading child output: {e}");
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
