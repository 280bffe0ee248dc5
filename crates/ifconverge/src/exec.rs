//! Executing actions against the host.
//!
//! [`ActionSink`] is the seam between scheduling and the operating system.
//! [`ShellSink`] drives the usual `ifup`/`ifdown` tooling; tests substitute a
//! recording sink.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::platform::KernelModule;

/// Receives host-level interface actions, one at a time.
///
/// Every call completes before the next one is issued.
#[async_trait]
pub trait ActionSink: Send {
    /// Bring an interface up. Safe on an interface that is already up.
    async fn bring_up(&mut self, interface: &str) -> Result<()>;

    /// Bring an interface down.
    async fn bring_down(&mut self, interface: &str) -> Result<()>;

    /// Stop any DHCP client bound to an interface.
    async fn stop_dhcp(&mut self, interface: &str) -> Result<()>;

    /// Load a kernel module unless it is loaded already.
    async fn load_module(&mut self, module: &KernelModule) -> Result<()>;
}

/// Result of running an external command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code, -1 if the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command exited zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Combined output for error messages.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Run a program with arguments and capture its output.
///
/// No shell is involved, so arguments need no quoting.
pub async fn exec(program: &str, args: &[&str]) -> Result<ExecResult> {
    let command = command_line(program, args);
    tracing::debug!(command = %command, "executing");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| Error::Spawn {
            command: command.clone(),
            source,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %command, "command succeeded");
    } else {
        tracing::debug!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "command failed"
        );
    }
    Ok(result)
}

/// Run a program and fail unless it exits with one of `ok_codes`.
pub async fn exec_checked(program: &str, args: &[&str], ok_codes: &[i32]) -> Result<String> {
    let result = exec(program, args).await?;
    if ok_codes.contains(&result.exit_code) {
        Ok(result.stdout)
    } else {
        Err(Error::Command {
            command: command_line(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        })
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extended regex matching a dhclient command line naming `interface`.
fn dhclient_pattern(interface: &str) -> String {
    let mut escaped = String::with_capacity(interface.len());
    for c in interface.chars() {
        if r"\.^$|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("dhclient.*[[:space:]]{escaped}([[:space:]]|$)")
}

/// Action sink running `ifup`, `ifdown`, `pkill` and `modprobe`.
#[derive(Debug, Clone)]
pub struct ShellSink {
    root: PathBuf,
}

impl ShellSink {
    /// Create a sink for the host rooted at `root`.
    ///
    /// `root` is only consulted for `/sys/module`; commands always act on the
    /// running system.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ShellSink {
    fn default() -> Self {
        Self::new("/")
    }
}

#[async_trait]
impl ActionSink for ShellSink {
    async fn bring_up(&mut self, interface: &str) -> Result<()> {
        exec_checked("ifup", &[interface], &[0]).await?;
        Ok(())
    }

    async fn bring_down(&mut self, interface: &str) -> Result<()> {
        exec_checked("ifdown", &[interface], &[0]).await?;
        Ok(())
    }

    async fn stop_dhcp(&mut self, interface: &str) -> Result<()> {
        let pattern = dhclient_pattern(interface);
        // pkill exits 1 when nothing matched.
        exec_checked("pkill", &["-f", &pattern], &[0, 1]).await?;
        Ok(())
    }

    async fn load_module(&mut self, module: &KernelModule) -> Result<()> {
        if self.root.join("sys/module").join(&module.name).exists() {
            tracing::debug!(module = %module.name, "module already loaded");
            return Ok(());
        }
        let mut args = vec![module.name.as_str()];
        args.extend(module.params.iter().map(String::as_str));
        exec_checked("modprobe", &args, &[0]).await?;
        Ok(())
    }
}
