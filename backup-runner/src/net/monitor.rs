//! Background bandwidth monitoring.
//!
//! Runs the interface sampler on a repeating schedule in its own task,
//! tracks running maxima, and publishes the most recent sample through a
//! watch channel. Sampling errors never stop the loop. Single-use: once
//! stopped, a new monitor is required to sample again.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::net::sampler::{BandwidthSample, InterfaceSampler};
use crate::utils::format::format_rate;

/// Fixed gap between the two snapshots of one sampling cycle.
/// The configured interval is slept on top of this, so the real cadence is
/// `interval + SAMPLE_GAP`.
pub const SAMPLE_GAP: Duration = Duration::from_secs(1);

const HIGH_DOWNLOAD_BPS: f64 = 100.0 * 1024.0 * 1024.0;
const HIGH_UPLOAD_BPS: f64 = 50.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    Idle,
    Running,
    Stopped,
}

/// Everything the loop publishes after a successful cycle. The maxima ride
/// along with the sample so they stay readable even when the loop itself is
/// stuck mid-sample on a slow remote round-trip.
#[derive(Debug, Clone, Default)]
struct MonitorReading {
    latest: Option<BandwidthSample>,
    max_download: f64,
    max_upload: f64,
}

pub struct BandwidthMonitor {
    sampler: InterfaceSampler,
    interval: Duration,
    sample_gap: Duration,
    state: MonitorState,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    reading_tx: Option<watch::Sender<MonitorReading>>,
    reading_rx: watch::Receiver<MonitorReading>,
}

impl BandwidthMonitor {
    pub fn new(sampler: InterfaceSampler, interval: Duration) -> Self {
        let (reading_tx, reading_rx) = watch::channel(MonitorReading::default());
        Self {
            sampler,
            interval,
            sample_gap: SAMPLE_GAP,
            state: MonitorState::Idle,
            cancel: CancellationToken::new(),
            handle: None,
            reading_tx: Some(reading_tx),
            reading_rx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == MonitorState::Running
    }

    /// Most recent successful sample, if any cycle has completed yet.
    pub fn latest(&self) -> Option<BandwidthSample> {
        self.reading_rx.borrow().latest.clone()
    }

    /// Running maxima (download, upload) in bytes/sec observed so far.
    pub fn maxima(&self) -> (f64, f64) {
        let reading = self.reading_rx.borrow();
        (reading.max_download, reading.max_upload)
    }

    /// Spawn the sampling loop. No-op unless the monitor is still Idle;
    /// returns immediately without waiting for the first sample.
    pub fn start(&mut self) {
        if self.state != MonitorState::Idle {
            return;
        }
        let Some(tx) = self.reading_tx.take() else {
            return;
        };
        self.state = MonitorState::Running;

        let sampler = self.sampler.clone();
        let interval = self.interval;
        let sample_gap = self.sample_gap;
        let cancel = self.cancel.clone();

        self.handle = Some(tokio::spawn(async move {
            sample_loop(sampler, interval, sample_gap, cancel, tx).await
        }));

        info!(
            "Bandwidth monitoring started (interval: {}s)",
            self.interval.as_secs()
        );
    }

    /// Stop the loop and log the maxima summary. Idempotent; safe to call
    /// without a prior `start()`. The summary reads the published maxima,
    /// so it stays accurate even when the loop cannot be joined in time.
    pub async fn stop(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.state = MonitorState::Stopped;
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Bandwidth monitor task failed: {}", e),
                Err(_) => warn!("Bandwidth monitor did not stop within 5s"),
            }
        }

        let (max_download, max_upload) = self.maxima();
        info!(
            "Max bandwidth observed: down {} | up {}",
            format_rate(max_download),
            format_rate(max_upload)
        );
    }
}

async fn sample_loop(
    sampler: InterfaceSampler,
    interval: Duration,
    sample_gap: Duration,
    cancel: CancellationToken,
    tx: watch::Sender<MonitorReading>,
) {
    let mut max_download = 0.0f64;
    let mut max_upload = 0.0f64;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match sampler.sample(sample_gap).await {
            Some(sample) => {
                max_download = max_download.max(sample.total_download_bps);
                max_upload = max_upload.max(sample.total_upload_bps);

                info!(
                    "Bandwidth: down {} | up {} ({}/{} interfaces active)",
                    format_rate(sample.total_download_bps),
                    format_rate(sample.total_upload_bps),
                    sample.active_count,
                    sample.interface_count
                );

                if sample.active_count > 1 {
                    let mut active: Vec<_> = sample.active_interfaces().collect();
                    active.sort_by(|a, b| {
                        (b.download_bps + b.upload_bps).total_cmp(&(a.download_bps + a.upload_bps))
                    });
                    for rate in active.iter().take(3) {
                        debug!(
                            "  {}: down {} | up {}",
                            rate.name,
                            format_rate(rate.download_bps),
                            format_rate(rate.upload_bps)
                        );
                    }
                } else if let Some(main) = &sample.main_interface {
                    debug!("  main interface: {}", main);
                }

                if sample.total_download_bps > HIGH_DOWNLOAD_BPS {
                    warn!("High download traffic on remote host");
                }
                if sample.total_upload_bps > HIGH_UPLOAD_BPS {
                    warn!("High upload traffic on remote host");
                }

                tx.send_replace(MonitorReading {
                    latest: Some(sample),
                    max_download,
                    max_upload,
                });
            }
            None => {
                warn!("Bandwidth sampling failed; retrying next cycle");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
}
