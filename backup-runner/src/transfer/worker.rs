//! One rsync invocation per chunk, with bounded retry.
//!
//! Every attempt on a chunk appends a delimited block (command line plus
//! start/end timestamps) to the same per-chunk log file, so a post-mortem
//! sees the whole attempt history in one artifact.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::ssh::SshSession;
use crate::transfer::retry::RetryPolicy;

/// Final state of one chunk after all attempts.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub index: usize,
    pub success: bool,
    /// Log file path on success, descriptive failure (with log path) otherwise.
    pub log: String,
}

enum AttemptResult {
    Success,
    Failed(i32),
    TimedOut,
}

pub struct TransferWorker {
    config: Arc<Config>,
    rsh: String,
    /// `user@host:<remote_root>/` rsync source spec.
    source: String,
    policy: RetryPolicy,
}

impl TransferWorker {
    pub fn new(config: Arc<Config>, session: &SshSession) -> Self {
        let root = config.paths.remote_root.trim_end_matches('/');
        let source = format!("{}:{}/", session.target(), root);
        let policy = RetryPolicy::new(
            config.transfer.max_retries,
            Duration::from_secs(config.transfer.retry_delay_secs),
        );
        Self {
            config,
            rsh: session.rsync_rsh(),
            source,
            policy,
        }
    }

    /// rsync argv for one chunk. The remote-shell override carries the ssh
    /// options; --timeout/--contimeout are rsync's own, distinct from the
    /// per-attempt process timeout.
    fn command_args(&self, chunk_path: &Path) -> Vec<String> {
        let t = &self.config.transfer;
        let mut args = vec![
            format!("--files-from={}", chunk_path.display()),
            "-e".to_string(),
            self.rsh.clone(),
            format!("--bwlimit={}", t.bwlimit),
            format!("--timeout={}", t.io_timeout_secs),
            format!("--contimeout={}", t.connect_timeout_secs),
        ];
        args.extend(t.rsync_opts.iter().cloned());
        args.push(self.source.clone());
        args.push(self.config.paths.local_root.display().to_string());
        args
    }

    /// Transfer one chunk, retrying per the policy. Never returns an error:
    /// exhaustion is reported through the outcome.
    pub async fn transfer(&self, chunk_path: &Path, index: usize) -> ChunkOutcome {
        let log_path = self.config.paths.log_dir.join(format!("chunk_{index}.log"));
        let args = self.command_args(chunk_path);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_attempt(&log_path, &args, attempt).await {
                Ok(AttemptResult::Success) => {
                    debug!("Chunk {} succeeded on attempt {}", index, attempt);
                    return ChunkOutcome {
                        index,
                        success: true,
                        log: log_path.display().to_string(),
                    };
                }
                Ok(AttemptResult::Failed(code)) => {
                    warn!(
                        "Chunk {} attempt {} exited with code {}",
                        index, attempt, code
                    );
                }
                Ok(AttemptResult::TimedOut) => {
                    warn!(
                        "Chunk {} attempt {} timed out after {}s",
                        index, attempt, self.config.transfer.rsync_timeout_secs
                    );
                }
                Err(e) => {
                    warn!("Chunk {} attempt {} error: {}", index, attempt, e);
                }
            }

            if !self.policy.should_retry(attempt) {
                break;
            }
            if !self.policy.delay.is_zero() {
                debug!(
                    "Chunk {}: retrying in {}s",
                    index,
                    self.policy.delay.as_secs()
                );
                sleep(self.policy.delay).await;
            }
        }

        ChunkOutcome {
            index,
            success: false,
            log: format!(
                "failed after {} attempts, see {}",
                attempt,
                log_path.display()
            ),
        }
    }

    /// One rsync invocation. Attempt 1 truncates the chunk log, retries
    /// append; stdout and stderr both stream into it. A process timeout
    /// kills the child and counts as a failed attempt.
    async fn run_attempt(
        &self,
        log_path: &PathBuf,
        args: &[String],
        attempt: u32,
    ) -> std::io::Result<AttemptResult> {
        let rsync_bin = &self.config.transfer.rsync_bin;

        let mut opts = tokio::fs::OpenOptions::new();
        opts.create(true).write(true);
        if attempt == 1 {
            opts.truncate(true);
        } else {
            opts.append(true);
        }
        let mut log = opts.open(log_path).await?;

        let started = chrono::Utc::now();
        log.write_all(
            format!(
                "===== attempt {} started {} =====\n$ {} {}\n",
                attempt,
                started.format("%Y-%m-%d %H:%M:%S UTC"),
                rsync_bin,
                args.join(" ")
            )
            .as_bytes(),
        )
        .await?;
        log.flush().await?;

        let stdout_log = log.into_std().await;
        let stderr_log = stdout_log.try_clone()?;

        let mut child = Command::new(rsync_bin)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_log))
            .stderr(Stdio::from(stderr_log))
            .spawn()?;

        let timeout = Duration::from_secs(self.config.transfer.rsync_timeout_secs);
        let result = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                if status.success() {
                    AttemptResult::Success
                } else {
                    AttemptResult::Failed(status.code().unwrap_or(-1))
                }
            }
            Err(_) => {
                let _ = child.kill().await;
                AttemptResult::TimedOut
            }
        };

        let mut log = tokio::fs::OpenOptions::new()
            .append(true)
            .open(log_path)
            .await?;
        let ended = chrono::Utc::now();
        let verdict = match &result {
            AttemptResult::Success => "ok".to_string(),
            AttemptResult::Failed(code) => format!("failed (exit {code})"),
            AttemptResult::TimedOut => "timed out".to_string(),
        };
        log.write_all(
            format!(
                "===== attempt {} ended {} : {} =====\n",
                attempt,
                ended.format("%Y-%m-%d %H:%M:%S UTC"),
                verdict
            )
            .as_bytes(),
        )
        .await?;
        log.flush().await?;

        Ok(result)
    }
}
