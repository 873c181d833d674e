//! Command execution abstraction with timeouts and privilege escalation.
//!
//! Every external tool the library runs goes through a [`CommandRunner`].
//! The real implementation, [`ExecutionContext`], spawns the process
//! (optionally wrapped in `pkexec` or `sudo`), kills it once the timeout
//! expires, and maps spawn failures onto the library's error kinds.

use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use wait_timeout::ChildExt;

use crate::error::{Error, IoResultExt, Result};

/// Exit code pkexec uses when the authentication dialog is dismissed.
const PKEXEC_AUTH_DISMISSED: i32 = 126;

/// How long output collection may run past the deadline.
const PIPE_GRACE: Duration = Duration::from_millis(100);

/// Privilege escalation method for executing commands that require root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivilegeEscalation {
    /// Execute directly without privilege escalation.
    #[default]
    None,
    /// Use `pkexec` for GUI-based privilege escalation (polkit).
    Pkexec,
    /// Use `sudo` for TTY-based privilege escalation.
    Sudo,
}

impl PrivilegeEscalation {
    fn wrapper(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Pkexec => Some("pkexec"),
            Self::Sudo => Some("sudo"),
        }
    }
}

/// Runs an external program to completion within a time bound.
///
/// Implementations return the captured output for any exit status; only
/// failures to run the program at all (missing binary, permission denied,
/// timeout) are errors.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output>;
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
        (**self).run(program, args, timeout)
    }
}

/// Execution context for running system commands.
///
/// # Example
///
/// ```
/// use mountrix_core::executor::{ExecutionContext, PrivilegeEscalation};
///
/// // Default: no privilege escalation
/// let ctx = ExecutionContext::default();
/// assert_eq!(ctx.escalation(), PrivilegeEscalation::None);
///
/// // For terminal applications
/// let tty_ctx = ExecutionContext::with_sudo();
/// assert_eq!(tty_ctx.escalation(), PrivilegeEscalation::Sudo);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    escalation: PrivilegeEscalation,
}

impl ExecutionContext {
    /// Creates a new execution context with no privilege escalation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an execution context that uses `pkexec` for privileged commands.
    pub fn with_pkexec() -> Self {
        Self {
            escalation: PrivilegeEscalation::Pkexec,
        }
    }

    /// Creates an execution context that uses `sudo` for privileged commands.
    pub fn with_sudo() -> Self {
        Self {
            escalation: PrivilegeEscalation::Sudo,
        }
    }

    /// Creates an execution context with a specific escalation method.
    pub fn with_escalation(escalation: PrivilegeEscalation) -> Self {
        Self { escalation }
    }

    /// Returns the current privilege escalation method.
    pub fn escalation(&self) -> PrivilegeEscalation {
        self.escalation
    }

    /// Builds the program and argument list, prefixed with the wrapper.
    fn command_line<'a>(&self, program: &'a str, args: &[&'a str]) -> (&'a str, Vec<&'a str>) {
        match self.escalation.wrapper() {
            None => (program, args.to_vec()),
            Some(wrapper) => {
                let mut wrapped = Vec::with_capacity(args.len() + 1);
                wrapped.push(program);
                wrapped.extend_from_slice(args);
                (wrapper, wrapped)
            }
        }
    }
}

impl CommandRunner for ExecutionContext {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<Output> {
        let (exe, argv) = self.command_line(program, args);
        log::debug!("running {} {}", exe, argv.join(" "));

        let mut cmd = Command::new(exe);
        cmd.args(&argv);
        // sudo may prompt on the terminal, which a background group cannot read.
        if self.escalation != PrivilegeEscalation::Sudo {
            cmd.process_group(0);
        }
        let output = output_with_timeout(program, &mut cmd, timeout)?;

        if self.escalation == PrivilegeEscalation::Pkexec
            && output.status.code() == Some(PKEXEC_AUTH_DISMISSED)
        {
            return Err(Error::PermissionDenied {
                action: format!("authentication for {} was cancelled", program),
            });
        }

        Ok(output)
    }
}

/// Maps an I/O error from spawning `program` onto an error kind.
fn spawn_error(program: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::ToolMissing {
            tool: program.to_string(),
        },
        io::ErrorKind::PermissionDenied => Error::PermissionDenied {
            action: format!("running {}", program),
        },
        _ => Error::CommandExecution {
            command: program.to_string(),
            source: err,
        },
    }
}

/// Spawns `cmd`, collects stdout/stderr, and kills it after `timeout`.
///
/// If `cmd` was put in its own process group the whole group is killed on
/// timeout, so helpers forked by the tool go too. Either way the call
/// returns by the deadline; output still held open by surviving helpers
/// is abandoned.
pub fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;

    let stdout_rx = spawn_drain(child.stdout.take());
    let stderr_rx = spawn_drain(child.stderr.take());

    let status = match child.wait_timeout(timeout).command_context(program)? {
        Some(status) => status,
        None => {
            kill_process_group(child.id());
            let _ = child.kill();
            let _ = child.wait();
            log::warn!("{} timed out after {:?}", program, timeout);
            return Err(Error::Timeout {
                command: program.to_string(),
                timeout,
            });
        }
    };

    Ok(Output {
        status,
        stdout: collect(&stdout_rx, deadline),
        stderr: collect(&stderr_rx, deadline),
    })
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(drain(pipe));
    });
    rx
}

fn collect(rx: &Receiver<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    let wait = deadline.saturating_duration_since(Instant::now()).max(PIPE_GRACE);
    rx.recv_timeout(wait).unwrap_or_else(|_| {
        log::debug!("output still held open by a background process, dropping it");
        Vec::new()
    })
}

/// Sends SIGKILL to the process group led by `pid`, if there is one.
fn kill_process_group(pid: u32) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        log::debug!("could not kill process group {}: {}", pid, e);
    }
}

fn drain<R: Read>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    buf
}
