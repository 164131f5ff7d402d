//! Process supervision for the real game server.
//!
//! The supervisor starts the server's launch script as a child process,
//! forwards everything the child prints to the tracing log, and lets a
//! monitor task wait for the child to exit.
//!
//! # Why drain output continuously? (for beginners)
//!
//! A child's stdout and stderr are OS pipes with a small fixed buffer
//! (often 64 KiB).  If nobody reads from them, the buffer fills and the
//! child blocks on its next `println`: the game server would freeze
//! mid-tick.  Each pipe therefore gets its own drain task that runs for as
//! long as the child keeps the pipe open.
//!
//! # Testability
//!
//! The [`ProcessLauncher`] trait is the seam the port controller depends
//! on.  Production uses [`script::ScriptLauncher`]; tests use
//! [`mock::MockLauncher`] or a `mockall` mock.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

pub mod mock;
pub mod script;

/// How long `wait` gives the output drains to flush after the child exits.
///
/// A grandchild that inherited the pipes can keep them open indefinitely;
/// after this grace period the drains are detached instead of awaited.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Error type for process supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// The child process could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// Waiting for the child failed.
    #[error("failed to wait for server process: {0}")]
    Wait(#[source] std::io::Error),
    /// The exit notification was dropped before the child reported an exit.
    #[error("exit notification lost before the server process exited")]
    ExitSignalLost,
}

/// Trait abstracting how the real server is started.
///
/// `start` must either return a handle to a live child or an error; it must
/// never report success for a process that failed to launch.
#[cfg_attr(test, mockall::automock)]
pub trait ProcessLauncher: Send + Sync {
    /// Starts the server process and returns its handle.
    fn start(&self) -> Result<ChildHandle, SupervisorError>;
}

// ── Launch command ────────────────────────────────────────────────────────────

/// How the launch script is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpreter {
    /// PowerShell on Windows, the configured shell everywhere else.
    #[default]
    Auto,
    /// `<shell> <script>`.
    Shell,
    /// `powershell.exe -ExecutionPolicy Bypass -File <script>`.
    PowerShell,
}

impl Interpreter {
    /// Resolves [`Interpreter::Auto`] for the current platform.
    pub fn resolve(self) -> Self {
        match self {
            Interpreter::Auto if cfg!(windows) => Interpreter::PowerShell,
            Interpreter::Auto => Interpreter::Shell,
            other => other,
        }
    }
}

/// Fully resolved command line for the server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    /// Builds the invocation for `script` using `interpreter`.
    ///
    /// `shell` is only used when the interpreter resolves to
    /// [`Interpreter::Shell`].
    pub fn for_script(script: &Path, shell: &str, interpreter: Interpreter) -> Self {
        let script = script.display().to_string();
        match interpreter.resolve() {
            Interpreter::PowerShell => Self {
                program: "powershell.exe".to_string(),
                args: vec![
                    "-ExecutionPolicy".to_string(),
                    "Bypass".to_string(),
                    "-File".to_string(),
                    script,
                ],
                working_dir: None,
            },
            Interpreter::Shell | Interpreter::Auto => Self {
                program: shell.to_string(),
                args: vec![script],
                working_dir: None,
            },
        }
    }

    /// Runs the command from `dir` instead of the daemon's own directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

// ── Child handle ──────────────────────────────────────────────────────────────

/// How the child finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    /// Exit code, or `None` if the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ChildExit {
    /// Whether the child exited with code 0.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// Exclusive handle to one running child.
///
/// Consumed by [`ChildHandle::wait`]; once the exit is observed the process
/// object is gone.
pub struct ChildHandle {
    pid: Option<u32>,
    source: ExitSource,
}

enum ExitSource {
    Process {
        child: Child,
        drains: Vec<JoinHandle<()>>,
    },
    Signal(oneshot::Receiver<ChildExit>),
}

impl ChildHandle {
    /// Wraps a spawned OS process and the tasks draining its output.
    pub fn from_process(child: Child, drains: Vec<JoinHandle<()>>) -> Self {
        Self {
            pid: child.id(),
            source: ExitSource::Process { child, drains },
        }
    }

    /// A handle whose exit is reported through a channel instead of an OS
    /// process.  Used by launchers that do not own a real child.
    pub fn from_exit_signal(pid: Option<u32>, exit: oneshot::Receiver<ChildExit>) -> Self {
        Self {
            pid,
            source: ExitSource::Signal(exit),
        }
    }

    /// OS process id, if known.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Blocks the calling task until the child terminates.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::Wait`] if the OS wait fails, or
    /// [`SupervisorError::ExitSignalLost`] if a channel-backed handle's
    /// sender was dropped.
    pub async fn wait(self) -> Result<ChildExit, SupervisorError> {
        match self.source {
            ExitSource::Process { mut child, drains } => {
                let status = child.wait().await.map_err(SupervisorError::Wait)?;
                for drain in drains {
                    if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
                        debug!(pid = self.pid, "output pipe still open after exit; detaching drain");
                    }
                }
                Ok(ChildExit::from(status))
            }
            ExitSource::Signal(exit) => exit.await.map_err(|_| SupervisorError::ExitSignalLost),
        }
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle").field("pid", &self.pid).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
