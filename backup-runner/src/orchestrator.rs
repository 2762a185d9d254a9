//! Top-level backup coordination.
//!
//! Builds the remote file list, chunks it, runs one transfer worker per
//! chunk in parallel while the bandwidth monitor samples in the background,
//! then retries failed chunks in bounded rounds. Chunk failures are
//! reported through the final result, never raised; only a failed remote
//! enumeration aborts the run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::listing::{chunk_file_list, FileListBuilder};
use crate::net::{BandwidthMonitor, InterfaceSampler};
use crate::ssh::SshSession;
use crate::transfer::{ChunkOutcome, TransferWorker};
use crate::utils::errors::Result;
use crate::utils::format::format_duration;

/// Final, immutable result of one backup run.
#[derive(Debug, Serialize)]
pub struct BackupReport {
    pub run_id: Uuid,
    pub success: bool,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub backup_type: String,
    pub chunks: BTreeMap<usize, ChunkOutcome>,
}

pub struct BackupOrchestrator {
    config: Arc<Config>,
    session: SshSession,
    cancel: CancellationToken,
}

impl BackupOrchestrator {
    pub fn new(config: Arc<Config>, cancel: CancellationToken) -> Self {
        let session = SshSession::new(&config);
        Self {
            config,
            session,
            cancel,
        }
    }

    /// Run one backup. The bandwidth monitor is stopped on every exit path,
    /// including the fatal enumeration error.
    pub async fn run(&self, backup_type: &str, use_monitoring: bool) -> Result<BackupReport> {
        let start_time = Utc::now();
        let started = Instant::now();

        info!(
            "Starting {} backup: {}:{} -> {} ({} workers)",
            backup_type,
            self.session.target(),
            self.config.paths.remote_root,
            self.config.paths.local_root.display(),
            self.config.transfer.threads
        );

        self.prepare_directories().await?;

        let mut monitor = if use_monitoring && self.config.monitor.enabled {
            let sampler = InterfaceSampler::new(self.session.clone());
            let mut m = BandwidthMonitor::new(
                sampler,
                Duration::from_secs(self.config.monitor.interval_secs),
            );
            m.start();
            Some(m)
        } else {
            None
        };

        let transfers = self.run_transfers().await;

        if let Some(m) = monitor.as_mut() {
            m.stop().await;
        }

        let chunks = transfers?;

        let end_time = Utc::now();
        let total_chunks = chunks.len();
        let successful_chunks = chunks.values().filter(|o| o.success).count();
        let failed_chunks = total_chunks - successful_chunks;

        let report = BackupReport {
            run_id: Uuid::new_v4(),
            success: failed_chunks == 0,
            total_chunks,
            successful_chunks,
            failed_chunks,
            start_time,
            end_time,
            duration_secs: started.elapsed().as_secs(),
            backup_type: backup_type.to_string(),
            chunks,
        };

        self.log_summary(&report);
        self.write_summary(&report).await;

        Ok(report)
    }

    async fn prepare_directories(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.paths.local_root).await?;
        tokio::fs::create_dir_all(&self.config.paths.tmp_dir).await?;
        tokio::fs::create_dir_all(&self.config.paths.log_dir).await?;
        Ok(())
    }

    /// Enumerate, chunk, run the parallel workers, then retry rounds.
    async fn run_transfers(&self) -> Result<BTreeMap<usize, ChunkOutcome>> {
        info!("Building file list from remote host...");
        let builder = FileListBuilder::new(
            &self.session,
            &self.config.paths.remote_root,
            &self.config.paths.tmp_dir,
            Duration::from_secs(self.config.ssh.command_timeout_secs),
        );
        let list_path = builder.build().await?;

        let chunks = chunk_file_list(
            &list_path,
            &self.config.paths.remote_root,
            self.config.transfer.threads,
            &self.config.paths.tmp_dir,
        )
        .await?;

        let worker = Arc::new(TransferWorker::new(self.config.clone(), &self.session));

        info!("Starting transfers for {} chunks...", chunks.len());
        let mut results: BTreeMap<usize, ChunkOutcome> = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();

        for (index, chunk_path) in chunks.iter().enumerate() {
            // the stopping flag only gates work not yet begun
            if self.cancel.is_cancelled() {
                warn!("Shutdown requested; chunk {} not started", index);
                results.insert(
                    index,
                    ChunkOutcome {
                        index,
                        success: false,
                        log: "cancelled before start".to_string(),
                    },
                );
                continue;
            }

            let worker = Arc::clone(&worker);
            let chunk_path = chunk_path.clone();
            in_flight.push(tokio::spawn(async move {
                worker.transfer(&chunk_path, index).await
            }));
        }

        // completion order, not chunk order
        while let Some(joined) = in_flight.next().await {
            match joined {
                Ok(outcome) => {
                    if outcome.success {
                        info!("Chunk {}: OK", outcome.index);
                    } else {
                        warn!("Chunk {}: FAILED ({})", outcome.index, outcome.log);
                    }
                    results.insert(outcome.index, outcome);
                }
                Err(e) => {
                    warn!("Transfer task failed to complete: {}", e);
                }
            }
        }
        for index in 0..chunks.len() {
            results.entry(index).or_insert_with(|| ChunkOutcome {
                index,
                success: false,
                log: "worker task did not complete".to_string(),
            });
        }

        self.retry_rounds(worker.as_ref(), &chunks, &mut results)
            .await;

        Ok(results)
    }

    /// Bounded retry rounds over the still-failing chunk set, sequential
    /// within a round, with a cooldown between rounds while failures remain.
    async fn retry_rounds(
        &self,
        worker: &TransferWorker,
        chunks: &[PathBuf],
        results: &mut BTreeMap<usize, ChunkOutcome>,
    ) {
        let rounds = self.config.transfer.retry_rounds;
        let cooldown = Duration::from_secs(self.config.transfer.round_cooldown_secs);

        for round in 1..=rounds {
            let failed: Vec<usize> = results
                .values()
                .filter(|o| !o.success)
                .map(|o| o.index)
                .collect();
            if failed.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                warn!("Shutdown requested; skipping remaining retry rounds");
                break;
            }

            info!(
                "Retry round {}/{}: {} failed chunk(s)",
                round,
                rounds,
                failed.len()
            );

            for index in failed {
                if self.cancel.is_cancelled() {
                    break;
                }
                let outcome = worker.transfer(&chunks[index], index).await;
                if outcome.success {
                    info!("Chunk {} retry: OK", index);
                } else {
                    warn!("Chunk {} retry: FAILED ({})", index, outcome.log);
                }
                results.insert(index, outcome);
            }

            let remaining = results.values().filter(|o| !o.success).count();
            if remaining > 0 && round < rounds && !cooldown.is_zero() {
                info!(
                    "{} chunk(s) still failing; next round in {}s",
                    remaining,
                    cooldown.as_secs()
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(cooldown) => {}
                }
            }
        }
    }

    fn log_summary(&self, report: &BackupReport) {
        if report.success {
            info!(
                "Backup completed: {}/{} chunks in {}",
                report.successful_chunks,
                report.total_chunks,
                format_duration(report.duration_secs)
            );
        } else {
            error!(
                "Backup completed with errors: {}/{} chunks succeeded in {}",
                report.successful_chunks,
                report.total_chunks,
                format_duration(report.duration_secs)
            );
            for outcome in report.chunks.values().filter(|o| !o.success) {
                error!("  chunk {}: {}", outcome.index, outcome.log);
            }
        }
    }

    /// Summary artifact alongside the chunk logs; not fatal if it cannot
    /// be written.
    async fn write_summary(&self, report: &BackupReport) {
        let name = format!(
            "summary_{}_{}.json",
            report.backup_type,
            report.start_time.format("%Y%m%d_%H%M%S")
        );
        let path = self.config.paths.log_dir.join(name);
        match serde_json::to_vec_pretty(report) {
            Ok(body) => {
                if let Err(e) = tokio::fs::write(&path, body).await {
                    warn!("Failed to write run summary {}: {}", path.display(), e);
                } else {
                    info!("Run summary written to {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize run summary: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::BackupError;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh\n{}", body).unwrap();
        let mut perms = f.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn test_config(dir: &Path, ssh_bin: &Path, rsync_bin: &Path, threads: usize) -> Config {
        let key = dir.join("key");
        std::fs::write(&key, "").unwrap();
        let toml_str = format!(
            r#"
[ssh]
host = "remote.test"
user = "tester"
key = "{}"
ssh_bin = "{}"
command_timeout_secs = 10

[paths]
remote_root = "/srv/data"
local_root = "{}"
tmp_dir = "{}"
log_dir = "{}"

[transfer]
threads = {}
max_retries = 0
retry_delay_secs = 0
retry_rounds = 3
round_cooldown_secs = 0
rsync_timeout_secs = 30
rsync_bin = "{}"

[monitor]
enabled = false
"#,
            key.display(),
            ssh_bin.display(),
            dir.join("local").display(),
            dir.join("tmp").display(),
            dir.join("logs").display(),
            threads,
            rsync_bin.display()
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[tokio::test]
    async fn test_all_chunks_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = write_script(
            dir.path(),
            "fake-ssh",
            "printf '/srv/data/f0\\n/srv/data/f1\\n/srv/data/f2\\n/srv/data/f3\\n'",
        );
        let rsync = write_script(dir.path(), "fake-rsync", "exit 0");
        let config = Arc::new(test_config(dir.path(), &ssh, &rsync, 2));
        let orchestrator = BackupOrchestrator::new(config, CancellationToken::new());

        let report = orchestrator.run("full", false).await.unwrap();
        assert!(report.success);
        assert_eq!(report.total_chunks, 2);
        assert_eq!(report.successful_chunks, 2);
        assert_eq!(report.failed_chunks, 0);
    }

    #[tokio::test]
    async fn test_persistently_failing_chunk_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        // enumeration puts "failme" at index 2, so with 4 workers it lands
        // in chunk 2; the fake rsync rejects any chunk containing it
        let ssh = write_script(
            dir.path(),
            "fake-ssh",
            "printf '/srv/data/f0\\n/srv/data/f1\\n/srv/data/failme\\n/srv/data/f3\\n'",
        );
        let rsync = write_script(
            dir.path(),
            "fake-rsync",
            r#"for a in "$@"; do case "$a" in --files-from=*) f=${a#--files-from=};; esac; done
grep -q failme "$f" && exit 1
exit 0"#,
        );
        let config = Arc::new(test_config(dir.path(), &ssh, &rsync, 4));
        let orchestrator = BackupOrchestrator::new(config.clone(), CancellationToken::new());

        let report = orchestrator.run("full", false).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.total_chunks, 4);
        assert_eq!(report.successful_chunks, 3);
        assert_eq!(report.failed_chunks, 1);
        let failing = &report.chunks[&2];
        assert!(!failing.success);
        assert!(failing.log.contains("chunk_2.log"));
    }

    #[tokio::test]
    async fn test_retry_round_recovers_failed_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = write_script(
            dir.path(),
            "fake-ssh",
            "printf '/srv/data/f0\\n/srv/data/f1\\n'",
        );
        // fails the first time each chunk is attempted, succeeds after
        let rsync = write_script(
            dir.path(),
            "fake-rsync",
            &format!(
                r#"for a in "$@"; do case "$a" in --files-from=*) f=${{a#--files-from=}};; esac; done
marker={}/seen-$(basename "$f")
if [ -f "$marker" ]; then exit 0; fi
touch "$marker"
exit 1"#,
                dir.path().display()
            ),
        );
        let config = Arc::new(test_config(dir.path(), &ssh, &rsync, 2));
        let orchestrator = BackupOrchestrator::new(config, CancellationToken::new());

        let report = orchestrator.run("full", false).await.unwrap();
        assert!(report.success);
        assert_eq!(report.successful_chunks, 2);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = write_script(dir.path(), "fake-ssh", "echo 'no such directory' >&2; exit 1");
        let rsync = write_script(dir.path(), "fake-rsync", "exit 0");
        let config = Arc::new(test_config(dir.path(), &ssh, &rsync, 2));
        let orchestrator = BackupOrchestrator::new(config, CancellationToken::new());

        let err = orchestrator.run("full", false).await.unwrap_err();
        match err {
            BackupError::FileList(msg) => assert!(msg.contains("no such directory")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let ssh = write_script(
            dir.path(),
            "fake-ssh",
            "printf '/srv/data/f0\\n/srv/data/f1\\n'",
        );
        let rsync = write_script(dir.path(), "fake-rsync", "exit 0");
        let config = Arc::new(test_config(dir.path(), &ssh, &rsync, 2));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let orchestrator = BackupOrchestrator::new(config, cancel);

        let report = orchestrator.run("full", false).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.failed_chunks, 2);
        assert!(report
            .chunks
            .values()
            .all(|o| o.log.contains("cancelled before start")));
    }
}
