use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// Default deadline for external invocations. Every subprocess the daemon
/// runs (tmux, git) is bounded; a command that exceeds its deadline is
/// killed and reported as a failure.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// A builder for executing external commands with unified error handling
/// and a hard per-invocation deadline.
pub struct Cmd<'a> {
    command: &'a str,
    args: Vec<&'a str>,
    workdir: Option<&'a Path>,
    deadline: Duration,
}

impl<'a> Cmd<'a> {
    /// Create a new command builder
    pub fn new(command: &'a str) -> Self {
        Self {
            command,
            args: Vec::new(),
            workdir: None,
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Add multiple arguments
    pub fn args(mut self, args: &[&'a str]) -> Self {
        self.args.extend_from_slice(args);
        self
    }

    /// Set the working directory for the command
    pub fn workdir(mut self, path: &'a Path) -> Self {
        self.workdir = Some(path);
        self
    }

    /// Run the command to completion and return its raw output without
    /// treating a non-zero exit as an error. Callers that need to inspect
    /// stderr to classify failures use this.
    pub fn output(self) -> Result<Output> {
        let Cmd {
            command,
            args,
            workdir,
            deadline,
        } = self;
        let workdir_display = workdir.map(|p| p.display().to_string());

        trace!(command, args = ?args, workdir = ?workdir_display, "cmd:output start");

        let mut cmd = Command::new(command);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        let mut child = cmd
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute command: {} {}", command, args.join(" ")))?;

        let status = match child.wait_timeout(deadline)? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                debug!(command, args = ?args, ?deadline, "cmd:output deadline exceeded");
                return Err(anyhow!(
                    "Command timed out after {:?}: {} {}",
                    deadline,
                    command,
                    args.join(" ")
                ));
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            use std::io::Read;
            let _ = out.read_to_end(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            use std::io::Read;
            let _ = err.read_to_end(&mut stderr);
        }

        trace!(command, status = ?status.code(), "cmd:output done");
        Ok(Output {
            status,
            stdout,
            stderr,
        })
    }

    /// Execute the command and return the output.
    /// Returns an error if the command fails (non-zero exit code).
    pub fn run(self) -> Result<Output> {
        let command = self.command;
        let args = self.args.clone();
        let output = self.output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command,
                args = ?args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {} {}\n{}",
                command,
                args.join(" "),
                stderr.trim()
            ));
        }
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}
