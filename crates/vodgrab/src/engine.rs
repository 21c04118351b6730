// Segment download engine: drives every segment of a parsed playlist to
// completion, resumably, under the adaptive parallelism ceiling.
//
// Scheduling model: a cursor over the pending set feeds a FuturesUnordered
// of per-segment fetches. The ceiling is re-read at every scheduling point,
// so controller adjustments take effect without interrupting in-flight
// work. Any terminal per-segment failure cancels the rest and fails the
// job; the workdir is preserved for resume.

use crate::adaptive::ConcurrencyController;
use crate::atomic;
use crate::config::EngineConfig;
use crate::decrypt::{decrypt_or_passthrough, sequence_iv};
use crate::error::DownloadError;
use crate::headers::HeaderProvider;
use crate::merge::MergeQueue;
use crate::monitor::NetworkMonitor;
use crate::playlist::Playlist;
use crate::pool::ClientPool;
use crate::retry::delay_for_attempt;
use crate::speed::ThroughputEstimator;
use crate::state::{segment_file_name, StateStore};
use crate::task::{ProgressFn, TaskProgress, TaskStatus};
use crate::throttle::BandwidthThrottle;
use bytes::Bytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

pub struct SegmentEngine {
    config: Arc<EngineConfig>,
    playlist: Playlist,
    key: Option<[u8; 16]>,
    /// Explicit IV from the playlist; overrides the sequence-derived IV.
    explicit_iv: Option<[u8; 16]>,
    workdir: PathBuf,
    pool: Arc<ClientPool>,
    headers: Arc<dyn HeaderProvider>,
    merge: Arc<MergeQueue>,
    token: CancellationToken,
    progress: ProgressFn,

    monitor: Arc<NetworkMonitor>,
    controller: ConcurrencyController,
    throttle: BandwidthThrottle,
    estimator: ThroughputEstimator,

    completed: AtomicUsize,
    failed: AtomicUsize,
    bytes_done: AtomicU64,
}

impl SegmentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        playlist: Playlist,
        key: Option<[u8; 16]>,
        workdir: PathBuf,
        pool: Arc<ClientPool>,
        headers: Arc<dyn HeaderProvider>,
        merge: Arc<MergeQueue>,
        token: CancellationToken,
        progress: ProgressFn,
    ) -> Self {
        // One shared monitor: the engine records, the controller reads.
        let monitor = Arc::new(NetworkMonitor::new());
        let controller = ConcurrencyController::new(&config.concurrency, Arc::clone(&monitor));
        let throttle = BandwidthThrottle::new(config.max_bytes_per_sec);
        let explicit_iv = playlist.encryption.as_ref().and_then(|e| e.iv);
        Self {
            config,
            playlist,
            key,
            explicit_iv,
            workdir,
            pool,
            headers,
            merge,
            token,
            progress,
            monitor,
            controller,
            throttle,
            estimator: ThroughputEstimator::new(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            bytes_done: AtomicU64::new(0),
        }
    }

    /// Drive all segments to completion. Returns `Cancelled` when the token
    /// fired first, the first terminal segment error otherwise.
    pub async fn run(&self) -> Result<(), DownloadError> {
        let total = self.playlist.segments.len();
        let (state, survivors) = StateStore::load_or_init(&self.workdir, total as u32).await?;

        for &index in &survivors {
            let path = self.workdir.join(segment_file_name(index));
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                self.bytes_done.fetch_add(meta.len(), Ordering::Relaxed);
            }
            self.merge.add(index, path);
        }
        self.completed.store(survivors.len(), Ordering::Relaxed);

        let snapshot = state.snapshot().await;
        let mut pending: VecDeque<usize> =
            (0..total).filter(|&i| !snapshot.is_set(i)).collect();

        info!(
            total = total,
            resumed = survivors.len(),
            pending = pending.len(),
            encrypted = self.key.is_some(),
            "segment engine starting"
        );

        if pending.is_empty() {
            self.emit_progress();
            info!(
                total = total,
                completed = self.completed.load(Ordering::Relaxed),
                failed = 0,
                bytes = self.bytes_done.load(Ordering::Relaxed),
                "segment engine finished"
            );
            return Ok(());
        }

        let mut in_flight = FuturesUnordered::new();
        let mut draining = false;
        let mut failure: Option<DownloadError> = None;

        loop {
            self.controller.maybe_tick();

            while !draining
                && !self.token.is_cancelled()
                && in_flight.len() < self.controller.current()
            {
                let Some(index) = pending.pop_front() else {
                    break;
                };
                debug!(segment = index, active = in_flight.len() + 1, "scheduling fetch");
                in_flight.push(self.download_segment(&state, index));
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = self.token.cancelled(), if !draining => {
                    info!("cancellation requested, draining in-flight fetches");
                    draining = true;
                }

                Some((index, result)) = in_flight.next() => {
                    match result {
                        Ok(()) => {}
                        Err(DownloadError::Cancelled) => {
                            draining = true;
                        }
                        Err(e) => {
                            self.failed.fetch_add(1, Ordering::Relaxed);
                            self.controller.adjust();
                            if failure.is_none() {
                                error!(segment = index, error = %e, "terminal segment failure, cancelling job");
                                failure = Some(e);
                                draining = true;
                                self.token.cancel();
                            }
                        }
                    }
                }
            }
        }

        info!(
            total = total,
            completed = self.completed.load(Ordering::Relaxed),
            failed = self.failed.load(Ordering::Relaxed),
            bytes = self.bytes_done.load(Ordering::Relaxed),
            "segment engine finished"
        );

        if let Some(e) = failure {
            return Err(e);
        }
        if self.token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        Ok(())
    }

    async fn download_segment(
        &self,
        state: &StateStore,
        index: usize,
    ) -> (usize, Result<(), DownloadError>) {
        let result = self.fetch_segment(state, index).await;
        (index, result)
    }

    /// Full per-segment attempt chain. The classifier decides retryability;
    /// a terminal error is returned annotated with the segment index and
    /// attempt count.
    async fn fetch_segment(&self, state: &StateStore, index: usize) -> Result<(), DownloadError> {
        let url = &self.playlist.segments[index];
        let path = self.workdir.join(segment_file_name(index));
        let mut attempt: u32 = 1;

        loop {
            if self.token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let started = Instant::now();
            match self.attempt_segment(index, url, &path).await {
                Ok(bytes) => {
                    let elapsed = started.elapsed();
                    self.commit_segment(state, index, &path, bytes, elapsed)
                        .await
                        .map_err(|e| DownloadError::segment(index, e.to_string()))?;
                    return Ok(());
                }
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(e) => {
                    self.record(false, started.elapsed());
                    let directive = e.category().directive();
                    if directive.max_attempts == 0 || attempt >= directive.max_attempts {
                        let noun = if attempt == 1 { "attempt" } else { "attempts" };
                        return Err(DownloadError::segment(
                            index,
                            format!("{e} after {attempt} {noun}"),
                        ));
                    }
                    let delay = delay_for_attempt(directive.base_delay, attempt);
                    warn!(
                        segment = index,
                        attempt = attempt,
                        max = directive.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "segment fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// One fetch attempt: GET, stream the body through the throttle into the
    /// temp sibling, atomic rename, then the decryption pass. The client
    /// handle goes back to the pool as soon as the body is drained.
    async fn attempt_segment(
        &self,
        index: usize,
        url: &Url,
        path: &Path,
    ) -> Result<u64, DownloadError> {
        let client = self.pool.acquire().await?;

        let mut request = client
            .get(url.clone())
            .timeout(self.config.http.segment_timeout);
        for (name, value) in self.headers.headers_for(url) {
            request = request.header(&name, &value);
        }

        let response = tokio::select! {
            _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
            response = request.send() => response?,
        };
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::http_status(status, url.as_str()));
        }

        let body = response.bytes_stream().then(|chunk| async move {
            if self.token.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk.map_err(DownloadError::from)?;
            self.throttle.throttle(chunk.len()).await;
            Ok(chunk)
        });
        let written = atomic::write_stream(path, body).await?;
        drop(client);

        if let Some(key) = &self.key {
            self.decrypt_in_place(index, path, key).await?;
        }

        Ok(written)
    }

    /// Read the segment back, decrypt, atomically rewrite. The whole
    /// segment is held in memory for the duration, accounted against the
    /// controller's budget.
    async fn decrypt_in_place(
        &self,
        index: usize,
        path: &Path,
        key: &[u8; 16],
    ) -> Result<(), DownloadError> {
        let iv = self
            .explicit_iv
            .unwrap_or_else(|| sequence_iv(index as u64));
        let ciphertext = tokio::fs::read(path).await?;
        let held = ciphertext.len() as u64;

        self.controller.reserve(held);
        let plaintext = decrypt_or_passthrough(Bytes::from(ciphertext), key, &iv, index as u64);
        let result = atomic::write_bytes(path, &plaintext).await;
        self.controller.release(held);
        result?;
        Ok(())
    }

    /// Steps after the segment file is durable: flip the bit, record
    /// telemetry, enqueue for merge, report progress.
    async fn commit_segment(
        &self,
        state: &StateStore,
        index: usize,
        path: &Path,
        bytes: u64,
        elapsed: std::time::Duration,
    ) -> Result<(), DownloadError> {
        state.mark_complete(index).await?;
        self.record(true, elapsed);
        self.estimator.add_sample(bytes, elapsed);
        self.bytes_done.fetch_add(bytes, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.merge.add(index, path.to_path_buf());
        self.emit_progress();
        Ok(())
    }

    fn record(&self, success: bool, elapsed: std::time::Duration) {
        self.monitor.record(success, elapsed);
    }

    fn emit_progress(&self) {
        let total = self.merge.total();
        let completed = self.completed.load(Ordering::Relaxed);
        let bytes_done = self.bytes_done.load(Ordering::Relaxed);
        let bytes_total_estimate = if completed > 0 {
            Some(bytes_done / completed as u64 * total as u64)
        } else {
            None
        };
        let remaining = bytes_total_estimate.map(|t| t.saturating_sub(bytes_done));
        (self.progress)(TaskProgress {
            status: TaskStatus::Downloading,
            // Download covers 0.0..=0.8; the muxing phase owns the rest.
            progress: completed as f64 / total as f64 * 0.8,
            bytes_done,
            bytes_total_estimate,
            speed_bps: self.estimator.avg_bps(),
            eta_seconds: remaining.and_then(|r| self.estimator.eta_seconds(r)),
            error_message: None,
        });
    }
}
