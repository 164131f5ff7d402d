//! Launches the real server by running its start script.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{ChildHandle, LaunchCommand, ProcessLauncher, SupervisorError};

/// Which pipe a drain task is reading.
#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Production [`ProcessLauncher`]: spawns [`LaunchCommand`] as an OS process.
///
/// The child's stdin is closed; stdout lines are logged at `info`, stderr
/// lines at `warn`, both under the `server` target.
#[derive(Debug, Clone)]
pub struct ScriptLauncher {
    command: LaunchCommand,
}

impl ScriptLauncher {
    pub fn new(command: LaunchCommand) -> Self {
        Self { command }
    }
}

impl ProcessLauncher for ScriptLauncher {
    fn start(&self) -> Result<ChildHandle, SupervisorError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: self.command.to_string(),
            source,
        })?;

        let mut drains = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            drains.push(spawn_drain(out, Stream::Stdout));
        }
        if let Some(err) = child.stderr.take() {
            drains.push(spawn_drain(err, Stream::Stderr));
        }

        info!(pid = child.id(), command = %self.command, "server process started");
        Ok(ChildHandle::from_process(child, drains))
    }
}

/// Forwards one pipe to the log until the child closes it.
///
/// Reads raw lines rather than `String`s so non-UTF-8 output cannot stop the
/// drain and back the pipe up.
fn spawn_drain<R>(pipe: R, stream: Stream) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\r', '\n']);
                    match stream {
                        Stream::Stdout => info!(target: "server", ?stream, "{text}"),
                        Stream::Stderr => warn!(target: "server", ?stream, "{text}"),
                    }
                }
                Err(e) => {
                    warn!(?stream, "error reading server output: {e}");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::infrastructure::supervisor::Interpreter;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_exit_code_is_reported() {
        // Arrange
        let launcher = ScriptLauncher::new(LaunchCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo hello; echo oops >&2; exit 3".to_string()],
            working_dir: None,
        });

        // Act
        let handle = launcher.start().expect("sh should spawn");
        assert!(handle.id().is_some());
        let exit = handle.wait().await.expect("wait should succeed");

        // Assert
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_script_runs_in_working_dir() {
        // Arrange – a directory holding a marker only the child can see relatively
        let dir = std::env::temp_dir().join(format!("slumber-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("marker"), b"").unwrap();
        let launcher = ScriptLauncher::new(
            LaunchCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "test -f marker".to_string()],
                working_dir: None,
            }
            .in_dir(&dir),
        );

        // Act
        let exit = launcher.start().unwrap().wait().await.unwrap();

        // Assert
        assert!(exit.success());
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_forwarded_lines_carry_stream_name() {
        // Arrange – a subscriber scoped to this test's thread
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let launcher = ScriptLauncher::new(LaunchCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo to-stdout; echo to-stderr >&2".to_string()],
            working_dir: None,
        });

        // Act – `wait` joins both drains, so every line has been logged
        launcher.start().unwrap().wait().await.unwrap();

        // Assert
        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        let stdout_line = text.lines().find(|l| l.contains("to-stdout")).expect("stdout line logged");
        let stderr_line = text.lines().find(|l| l.contains("to-stderr")).expect("stderr line logged");
        assert!(stdout_line.contains("INFO") && stdout_line.contains("stream=Stdout"));
        assert!(stderr_line.contains("WARN") && stderr_line.contains("stream=Stderr"));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let launcher = ScriptLauncher::new(LaunchCommand::for_script(
            Path::new("start.sh"),
            "definitely-not-a-real-shell-7f3a",
            Interpreter::Shell,
        ));

        let err = launcher.start().unwrap_err();

        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-shell-7f3a start.sh"));
    }
}
