//! # External Command Runner
//!
//! Channel discovery and scanning shell out to BlueZ utilities
//! (`sdptool`, `bluetoothctl`). Those tools can hang when the adapter or
//! the remote device misbehaves, so every invocation here is bounded.
//!
//! - [`run`]: run to completion, killed after a timeout
//! - [`LineStream`]: stream stdout line by line while the process runs
//! - [`stop`]: SIGTERM, then SIGKILL after a grace period

use std::io::{self, BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::debug;

/// How often a running child is polled for exit.
const WAIT_POLL: Duration = Duration::from_millis(20);

/// A program plus the arguments that always precede per-call arguments.
///
/// Lets callers swap `bluetoothctl` for a wrapper (`sudo`, a test script)
/// without touching the code that builds the per-call arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: String,
    leading_args: Vec<String>,
}

impl Tool {
    /// A tool invoked directly by name or path.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Prepend `args` to every invocation.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Program name or path
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args).args(args);
        cmd
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `tool args...` to completion.
///
/// ## Errors
///
/// - `NotFound` if the program does not exist
/// - `TimedOut` if it is still running after `timeout` (the child is
///   stopped before returning)
pub fn run(tool: &Tool, args: &[&str], timeout: Duration) -> io::Result<CommandOutput> {
    let mut child = tool
        .command(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if started.elapsed() >= timeout {
            debug!(program = tool.program(), ?args, "command timed out");
            stop(&mut child, WAIT_POLL * 10)?;
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not finish within {:?}", tool.program(), timeout),
            ));
        }
        thread::sleep(WAIT_POLL);
    };

    Ok(CommandOutput {
        status,
        stdout: join_drain(stdout),
        stderr: join_drain(stderr),
    })
}

/// Ask `child` to exit, escalating to a hard kill after `grace`.
pub fn stop(child: &mut Child, grace: Duration) -> io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
        let started = Instant::now();
        while started.elapsed() < grace {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            thread::sleep(WAIT_POLL);
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    debug!(pid = child.id(), "process ignored SIGTERM, killing");
    match child.kill() {
        Ok(()) => {}
        // Exited between the last poll and the kill
        Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
        Err(e) => return Err(e),
    }
    child.wait()?;
    Ok(())
}

/// A running process whose stdout arrives as lines on a channel.
pub struct LineStream {
    child: Child,
    lines: Receiver<String>,
}

impl LineStream {
    /// Spawn `tool args...` with stdout piped into a reader thread.
    pub fn spawn(tool: &Tool, args: &[&str]) -> io::Result<Self> {
        let mut child = tool
            .command(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let (tx, lines) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(Self { child, lines })
    }

    /// Line receiver; disconnects once stdout closes.
    pub fn lines(&self) -> &Receiver<String> {
        &self.lines
    }

    /// `true` once the process has exited.
    pub fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    /// Stop the process (no-op if it already exited).
    pub fn stop(&mut self, grace: Duration) -> io::Result<()> {
        stop(&mut self.child, grace)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> (Tool, Vec<String>) {
        (
            Tool::new("sh").with_leading_args(["-c"]),
            vec![script.to_string()],
        )
    }

    #[test]
    fn test_run_captures_output() {
        let (tool, args) = sh("echo hello; echo oops >&2");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let out = run(&tool, &args, Duration::from_secs(5)).unwrap();

        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[test]
    fn test_run_missing_program() {
        let tool = Tool::new("/nonexistent/coreprint-test-tool");
        let err = run(&tool, &[], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_run_times_out() {
        let (tool, args) = sh("sleep 5");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let started = Instant::now();
        let err = run(&tool, &args, Duration::from_millis(100)).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_line_stream_stop() {
        let (tool, args) = sh("echo first; sleep 5");
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut stream = LineStream::spawn(&tool, &args).unwrap();

        let line = stream.lines().recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(line, "first");
        assert!(!stream.has_exited().unwrap());

        stream.stop(Duration::from_millis(500)).unwrap();
        assert!(stream.has_exited().unwrap());
    }
}
