//! Remote command execution over ssh.
//!
//! Thin subprocess wrapper: one ssh invocation per call, hardened options,
//! all failures reduced to a `CommandOutput` — retry is the caller's job.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::config::Config;

/// Connection hardening shared by direct invocations and the rsync
/// remote shell.
const KEEPALIVE_OPTS: &[&str] = &[
    "ConnectTimeout=30",
    "ServerAliveInterval=60",
    "ServerAliveCountMax=3",
];

/// Outcome of one remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// One configured remote endpoint. Cheap to clone; holds no live connection.
#[derive(Debug, Clone)]
pub struct SshSession {
    ssh_bin: String,
    host: String,
    port: u16,
    user: String,
    key: PathBuf,
    command_timeout: Duration,
}

impl SshSession {
    pub fn new(config: &Config) -> Self {
        Self {
            ssh_bin: config.ssh.ssh_bin.clone(),
            host: config.ssh.host.clone(),
            port: config.ssh.port,
            user: config.ssh.user.clone(),
            key: config.identity_key(),
            command_timeout: Duration::from_secs(config.ssh.command_timeout_secs),
        }
    }

    /// `user@host` target spec.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Base ssh argv up to and including the target.
    /// BatchMode fails fast instead of hanging on a password prompt.
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key.display().to_string(),
            "-p".to_string(),
            self.port.to_string(),
        ];
        for opt in KEEPALIVE_OPTS {
            args.push("-o".to_string());
            args.push((*opt).to_string());
        }
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push(self.target());
        args
    }

    /// Remote-shell override string for rsync's `-e` flag, using the same
    /// binary and keepalive options as direct invocations.
    /// No BatchMode here: rsync drives its own ssh session.
    pub fn rsync_rsh(&self) -> String {
        let opts: String = KEEPALIVE_OPTS
            .iter()
            .map(|opt| format!(" -o {opt}"))
            .collect();
        format!(
            "{} -i {} -p {}{}",
            self.ssh_bin,
            self.key.display(),
            self.port,
            opts
        )
    }

    /// Run one remote command with the default command timeout.
    pub async fn run(&self, command: &str) -> CommandOutput {
        self.run_with_timeout(command, self.command_timeout).await
    }

    /// Run one remote command. Never returns an error: timeouts, spawn
    /// failures and non-zero exits all reduce to the output tuple.
    pub async fn run_with_timeout(&self, command: &str, timeout: Duration) -> CommandOutput {
        debug!("ssh {}: {}", self.target(), command);

        let child = Command::new(&self.ssh_bin)
            .args(self.base_args())
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                return CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("failed to launch {}: {}", self.ssh_bin, e),
                }
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => CommandOutput {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            Ok(Err(e)) => CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: format!("command error: {}", e),
            },
            Err(_) => CommandOutput {
                success: false,
                stdout: String::new(),
                stderr: "timeout".to_string(),
            },
        }
    }

    /// Preflight probe: can we reach the host at all?
    pub async fn test_connection(&self, timeout: Duration) -> (bool, String) {
        let out = self
            .run_with_timeout("echo \"SSH connection successful\"", timeout)
            .await;
        if out.success {
            (true, "Connection successful".to_string())
        } else if out.stderr == "timeout" {
            (false, "Connection timeout".to_string())
        } else {
            let msg = if out.stderr.is_empty() {
                "Unknown error".to_string()
            } else {
                out.stderr
            };
            (false, format!("Connection failed: {}", msg))
        }
    }

    /// Check whether a remote directory exists.
    pub async fn check_remote_path(&self, path: &str) -> (bool, String) {
        let out = self
            .run(&format!(
                "[ -d \"{path}\" ] && echo \"EXISTS\" || echo \"NOT_EXISTS\""
            ))
            .await;

        if out.success && out.stdout.contains("EXISTS") && !out.stdout.contains("NOT_EXISTS") {
            (true, format!("Path exists: {}", path))
        } else if out.success {
            (false, format!("Path does not exist: {}", path))
        } else {
            (false, format!("Cannot check path: {}", out.stderr))
        }
    }
}
