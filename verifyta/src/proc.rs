// Copyright 2022-2023 VMware, Inc.
// SPDX-License-Identifier: BSD-2-Clause

//! Run one external command to completion, with an optional timeout.
//!
//! Output goes to anonymous temporary files rather than pipes, so a child
//! that prints a lot never blocks waiting for us to read. Each child runs in
//! its own process group, and a timeout signals the whole group: first
//! `SIGTERM`, then `SIGKILL` if the group is still around after
//! [`KILL_GRACE`].

use std::{
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use serde::Serialize;
use thiserror::Error;

use crate::conf::{split_words, VerifierCmd, VerifierConf};

/// How long a timed-out process group gets between `SIGTERM` and `SIGKILL`.
pub const KILL_GRACE: Duration = Duration::from_secs(1);

/// How often running children are polled.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Error, Debug)]
/// An error from trying to run the verifier or one of its tools
pub enum VerifierError {
    /// The configured path is not a working `verifyta`
    #[error("{} is not a usable verifyta: {reason}", .path.display())]
    InvalidVerifierPath {
        /// Path that was checked
        path: PathBuf,
        /// What went wrong
        reason: String,
    },
    /// The binary could not be started at all
    #[error("could not launch `{cmd}`: {source}")]
    Launch {
        /// Command line that was attempted
        cmd: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// The command itself was unusable (empty, unbalanced quotes, ...)
    #[error("bad command: {0}")]
    BadCommand(String),
    /// The verifier ran but reported a problem (syntax error, resource
    /// exhaustion, non-zero exit)
    #[error("`{cmd}` failed ({}):\n{message}", describe_status(.status))]
    VerifierFailure {
        /// Command line that failed
        cmd: String,
        /// Exit status, `None` if killed by a signal
        status: Option<i32>,
        /// The verifier's complaint
        message: String,
    },
    /// Lists that must correspond one-to-one have different lengths
    #[error("got {models} models but {traces} traces")]
    Mismatched {
        /// Number of models
        models: usize,
        /// Number of traces
        traces: usize,
    },
    /// I/O went wrong
    #[error("some I/O went wrong: {0}")]
    Io(#[from] io::Error),
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit status {code}"),
        None => "killed by a signal".to_string(),
    }
}

/// Everything a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// Exit code, `None` if the process was killed by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the timeout expired and the process group was signaled
    pub timed_out: bool,
    /// Wall-clock time from launch to exit
    pub elapsed: Duration,
}

impl CommandOutput {
    /// True if the command exited normally with status 0 before the timeout.
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }

    /// Standard output followed by standard error.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }

    /// Pass a successful run through, and turn anything else into a
    /// [`VerifierError::VerifierFailure`] for `command`.
    pub fn check(self, command: &str) -> Result<Self, VerifierError> {
        if self.success() {
            return Ok(self);
        }
        let message = if self.timed_out {
            format!("timed out after {:?}", self.elapsed)
        } else if !self.stderr.trim().is_empty() {
            self.stderr.trim().to_string()
        } else {
            self.stdout.trim().to_string()
        };
        Err(VerifierError::VerifierFailure {
            cmd: command.to_string(),
            status: self.status,
            message,
        })
    }
}

/// The outcome of one command submitted to the dispatcher.
#[derive(Debug)]
pub struct CommandResult {
    /// The command line that was issued
    pub command: String,
    /// Its output, or the error that kept it from running
    pub outcome: Result<CommandOutput, VerifierError>,
}

impl CommandResult {
    /// Run `cmd` and record the outcome.
    pub fn of(cmd: &VerifierCmd, timeout: Option<Duration>) -> Self {
        Self {
            command: cmd.cmdline(),
            outcome: run(cmd, timeout),
        }
    }

    /// True if the command ran, was not timed out and exited with status 0.
    pub fn success(&self) -> bool {
        matches!(&self.outcome, Ok(out) if out.success())
    }

    /// The captured output, if the command ran.
    pub fn output(&self) -> Option<&CommandOutput> {
        self.outcome.as_ref().ok()
    }

    /// The error that kept the command from running.
    pub fn error(&self) -> Option<&VerifierError> {
        self.outcome.as_ref().err()
    }
}

/// A launched child that has not been reaped yet.
#[derive(Debug)]
pub(crate) struct RunningCmd {
    cmdline: String,
    child: Child,
    stdout: File,
    stderr: File,
    start: Instant,
    deadline: Option<Instant>,
    terminated_at: Option<Instant>,
    killed: bool,
    reaped: bool,
}

impl RunningCmd {
    pub(crate) fn spawn(cmd: &VerifierCmd, timeout: Option<Duration>) -> Result<Self, VerifierError> {
        if cmd.cmd.is_empty() {
            return Err(VerifierError::BadCommand("empty command".to_string()));
        }
        let cmdline = cmd.cmdline();
        let stdout = tempfile::tempfile()?;
        let stderr = tempfile::tempfile()?;
        log::debug!("running {cmdline}");
        let child = Command::new(&cmd.cmd)
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(stdout.try_clone()?)
            .stderr(stderr.try_clone()?)
            .process_group(0)
            .spawn()
            .map_err(|source| VerifierError::Launch {
                cmd: cmdline.clone(),
                source,
            })?;
        let start = Instant::now();
        Ok(Self {
            cmdline,
            child,
            stdout,
            stderr,
            start,
            deadline: timeout.map(|t| start + t),
            terminated_at: None,
            killed: false,
            reaped: false,
        })
    }

    pub(crate) fn cmdline(&self) -> &str {
        &self.cmdline
    }

    fn signal_group(&self, sig: Signal) {
        let pgid = Pid::from_raw(self.child.id() as i32);
        if let Err(errno) = killpg(pgid, sig) {
            // the group is already gone
            if errno != Errno::ESRCH && errno != Errno::EPERM {
                log::warn!("could not send {sig} to `{}`: {errno}", self.cmdline);
            }
        }
    }

    /// Check on the child without blocking: reap it if it exited, and
    /// enforce the deadline otherwise.
    pub(crate) fn try_finish(&mut self) -> Result<Option<CommandOutput>, VerifierError> {
        if let Some(status) = self.child.try_wait()? {
            return self.collect(status).map(Some);
        }
        let now = Instant::now();
        match self.terminated_at {
            None => {
                if self.deadline.is_some_and(|deadline| now >= deadline) {
                    log::debug!("timeout expired for {}", self.cmdline);
                    self.signal_group(Signal::SIGTERM);
                    self.terminated_at = Some(now);
                }
            }
            Some(t) if !self.killed && now >= t + KILL_GRACE => {
                log::debug!("sending SIGKILL to {}", self.cmdline);
                self.signal_group(Signal::SIGKILL);
                self.killed = true;
            }
            Some(_) => {}
        }
        Ok(None)
    }

    /// Block until the child exits (or is killed by the timeout).
    pub(crate) fn wait(mut self) -> Result<CommandOutput, VerifierError> {
        if self.deadline.is_none() {
            let status = self.child.wait()?;
            return self.collect(status);
        }
        loop {
            if let Some(out) = self.try_finish()? {
                return Ok(out);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn collect(&mut self, status: ExitStatus) -> Result<CommandOutput, VerifierError> {
        self.reaped = true;
        let elapsed = self.start.elapsed();
        let out = CommandOutput {
            status: status.code(),
            stdout: read_all(&mut self.stdout)?,
            stderr: read_all(&mut self.stderr)?,
            timed_out: self.terminated_at.is_some(),
            elapsed,
        };
        log::debug!(
            "finished {} ({}) in {elapsed:?}",
            self.cmdline,
            describe_status(&out.status)
        );
        Ok(out)
    }
}

impl Drop for RunningCmd {
    fn drop(&mut self) {
        if !self.reaped {
            self.signal_group(Signal::SIGKILL);
            _ = self.child.wait();
        }
    }
}

fn read_all(f: &mut File) -> io::Result<String> {
    f.seek(SeekFrom::Start(0))?;
    let mut buf = vec![];
    f.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Run one command and wait for it, killing it if `timeout` expires.
///
/// A non-zero exit status or a timeout is a normal outcome, reported in the
/// [`CommandOutput`]; only failing to run the command at all is an error.
pub fn run(cmd: &VerifierCmd, timeout: Option<Duration>) -> Result<CommandOutput, VerifierError> {
    RunningCmd::spawn(cmd, timeout)?.wait()
}

/// Run the configured `verifyta` with the arguments in `args`, a single
/// string split like a shell would (double quotes group words).
pub fn run_command(conf: &VerifierConf, args: &str) -> Result<CommandOutput, VerifierError> {
    let words = split_words(args)?;
    let cmd = conf.command(words);
    run(&cmd, conf.timeout())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> VerifierCmd {
        let mut cmd = VerifierCmd::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_capture_output() {
        let out = run(&sh("echo hello; echo oops >&2; exit 3"), None).unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert!(!out.timed_out);
        assert!(!out.success());
    }

    #[test]
    fn test_env() {
        let mut cmd = sh("echo $PATTERN_FINDER_TEST");
        cmd.env("PATTERN_FINDER_TEST", "42");
        let out = run(&cmd, Some(Duration::from_secs(10))).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "42");
    }

    #[test]
    fn test_large_output_does_not_block() {
        let out = run(&sh("head -c 300000 /dev/zero | tr '\\0' x"), None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.len(), 300000);
    }

    #[test]
    fn test_timeout() {
        let out = run(&sh("sleep 20"), Some(Duration::from_millis(100))).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_escalates_to_kill() {
        let out = run(
            &sh("trap '' TERM; sleep 20"),
            Some(Duration::from_millis(100)),
        )
        .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.status, None);
        assert!(out.elapsed >= KILL_GRACE);
        assert!(out.elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_tooling_errors() {
        let err = run(&VerifierCmd::new("/nonexistent/verifyta"), None).unwrap_err();
        assert!(matches!(err, VerifierError::Launch { .. }));
        let err = run(&VerifierCmd::new(""), None).unwrap_err();
        assert!(matches!(err, VerifierError::BadCommand(_)));
    }

    #[test]
    fn test_command_result() {
        let ok = CommandResult::of(&sh("true"), None);
        assert!(ok.success());
        assert!(ok.error().is_none());
        let failed = CommandResult::of(&sh("exit 1"), None);
        assert!(!failed.success());
        assert_eq!(failed.output().unwrap().status, Some(1));
        let missing = CommandResult::of(&VerifierCmd::new("/nonexistent/verifyta"), None);
        assert!(!missing.success());
        assert!(missing.output().is_none());
        assert_eq!(missing.command, "/nonexistent/verifyta");
    }

    #[test]
    fn test_failure_message() {
        let err = VerifierError::VerifierFailure {
            cmd: "verifyta m.xml q.q".to_string(),
            status: Some(1),
            message: "syntax error".to_string(),
        };
        insta::assert_display_snapshot!(err, @r###"
        `verifyta m.xml q.q` failed (exit status 1):
        syntax error
        "###);
    }
}
