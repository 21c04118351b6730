// Job controller: end-to-end lifecycle for one download task.
//
// Playlist fetch → parse → key fetch → segment engine → concat manifest →
// external muxer. Only a completed job deletes the workdir; every other
// outcome preserves it so a later run can resume.

use crate::atomic;
use crate::config::EngineConfig;
use crate::engine::SegmentEngine;
use crate::error::DownloadError;
use crate::headers::HeaderProvider;
use crate::merge::{manifest_path, render_manifest, MergeQueue};
use crate::mux::Muxer;
use crate::playlist::parse_media_playlist;
use crate::pool::ClientPool;
use crate::retry::retry_with_backoff;
use crate::state::state_file_path;
use crate::task::{DownloadTask, ProgressFn, TaskProgress, TaskStatus};
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use url::Url;

pub struct JobController {
    config: Arc<EngineConfig>,
    headers: Arc<dyn HeaderProvider>,
    muxer: Arc<dyn Muxer>,
    progress: ProgressFn,
    token: CancellationToken,
    last_progress: Arc<AtomicU64>,
}

impl JobController {
    pub fn new(
        config: Arc<EngineConfig>,
        headers: Arc<dyn HeaderProvider>,
        muxer: Arc<dyn Muxer>,
        progress: ProgressFn,
    ) -> Self {
        Self {
            config,
            headers,
            muxer,
            progress,
            token: CancellationToken::new(),
            last_progress: Arc::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    /// Token for cooperative cancellation of the running job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run the task to a terminal state.
    ///
    /// `Ok(Completed)` or `Ok(Cancelled)` (cancellation is not an error to
    /// callers); `Err` carries the failure already reported through the
    /// progress callback.
    pub async fn run(&self, task: &DownloadTask) -> Result<TaskStatus, DownloadError> {
        info!(task = %task.task_id, url = %task.playlist_url, "starting download task");
        match self.run_inner(task).await {
            Ok(()) => Ok(TaskStatus::Completed),
            Err(DownloadError::Cancelled) => {
                info!(task = %task.task_id, "task cancelled, workdir preserved");
                self.emit(TaskStatus::Cancelled, self.last(), None);
                Ok(TaskStatus::Cancelled)
            }
            Err(e) => {
                let message = e.to_string();
                error!(task = %task.task_id, error = %message, "task failed, workdir preserved");
                self.emit(TaskStatus::Failed, self.last(), Some(message));
                Err(e)
            }
        }
    }

    async fn run_inner(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        let playlist_url = Url::parse(&task.playlist_url)
            .map_err(|e| DownloadError::invalid_url(&task.playlist_url, e.to_string()))?;
        let workdir = self.config.workdir_for(&task.task_id);
        tokio::fs::create_dir_all(&workdir).await?;

        let pool = ClientPool::new(&self.config.http)?;

        self.emit(TaskStatus::FetchingPlaylist, 0.0, None);
        let body = self.fetch_playlist(&pool, &playlist_url).await?;
        let playlist = parse_media_playlist(&body, &playlist_url)?;
        info!(
            segments = playlist.segments.len(),
            encrypted = playlist.encryption.is_some(),
            "playlist parsed"
        );

        let key = match &playlist.encryption {
            Some(enc) => Some(self.fetch_key(&pool, &enc.key_url).await?),
            None => None,
        };

        let merge = Arc::new(MergeQueue::new(playlist.segments.len()));
        self.emit(TaskStatus::Downloading, 0.0, None);
        let engine = SegmentEngine::new(
            Arc::clone(&self.config),
            playlist,
            key,
            workdir.clone(),
            Arc::clone(&pool),
            Arc::clone(&self.headers),
            Arc::clone(&merge),
            self.token.clone(),
            self.progress_tap(),
        );
        engine.run().await?;

        self.emit(TaskStatus::Muxing, 0.8, None);
        merge.validate()?;
        let paths = merge.all_in_order()?;
        let manifest = manifest_path(&workdir);
        atomic::write_bytes(&manifest, render_manifest(&paths).as_bytes()).await?;
        self.muxer
            .concatenate(&manifest, &task.output_path)
            .await?;

        // Completed is the only state that tears the workdir down.
        let _ = tokio::fs::remove_file(state_file_path(&workdir)).await;
        tokio::fs::remove_dir_all(&workdir).await?;
        pool.close_all();

        self.emit(TaskStatus::Completed, 1.0, None);
        info!(task = %task.task_id, output = %task.output_path.display(), "task completed");
        Ok(())
    }

    async fn fetch_playlist(
        &self,
        pool: &Arc<ClientPool>,
        url: &Url,
    ) -> Result<String, DownloadError> {
        let timeout = self.config.http.playlist_timeout;
        retry_with_backoff(&self.token, "playlist", |_| {
            let url = url.clone();
            async move {
                let client = pool.acquire().await?;
                let mut request = client.get(url.clone()).timeout(timeout);
                for (name, value) in self.headers.headers_for(&url) {
                    request = request.header(&name, &value);
                }
                let response = tokio::select! {
                    _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
                    response = request.send() => response?,
                };
                if response.status() != StatusCode::OK {
                    return Err(DownloadError::http_status(response.status(), url.as_str()));
                }
                Ok(response.text().await?)
            }
        })
        .await
    }

    async fn fetch_key(
        &self,
        pool: &Arc<ClientPool>,
        url: &Url,
    ) -> Result<[u8; 16], DownloadError> {
        let timeout = self.config.http.key_timeout;
        retry_with_backoff(&self.token, "key", |_| {
            let url = url.clone();
            async move {
                let client = pool.acquire().await?;
                let mut request = client.get(url.clone()).timeout(timeout);
                for (name, value) in self.headers.headers_for(&url) {
                    request = request.header(&name, &value);
                }
                let response = tokio::select! {
                    _ = self.token.cancelled() => return Err(DownloadError::Cancelled),
                    response = request.send() => response?,
                };
                if response.status() != StatusCode::OK {
                    return Err(DownloadError::http_status(response.status(), url.as_str()));
                }
                let bytes = response.bytes().await?;
                if bytes.len() != 16 {
                    return Err(DownloadError::decryption(format!(
                        "key from {url} has length {} (expected 16)",
                        bytes.len()
                    )));
                }
                let mut key = [0u8; 16];
                key.copy_from_slice(&bytes);
                Ok(key)
            }
        })
        .await
    }

    /// Callback handed to the engine: forwards snapshots and remembers the
    /// last progress value for terminal emissions.
    fn progress_tap(&self) -> ProgressFn {
        let downstream = Arc::clone(&self.progress);
        let last = Arc::clone(&self.last_progress);
        Arc::new(move |snapshot: TaskProgress| {
            last.store(snapshot.progress.to_bits(), Ordering::Relaxed);
            downstream(snapshot);
        })
    }

    fn emit(&self, status: TaskStatus, progress: f64, error_message: Option<String>) {
        self.last_progress
            .store(progress.to_bits(), Ordering::Relaxed);
        let mut snapshot = TaskProgress::status_only(status, progress);
        snapshot.error_message = error_message;
        (self.progress)(snapshot);
    }

    fn last(&self) -> f64 {
        f64::from_bits(self.last_progress.load(Ordering::Relaxed))
    }
}
