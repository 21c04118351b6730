use std::path::PathBuf;
use std::sync::Arc;

/// Lifecycle states of one download job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    FetchingPlaylist,
    Downloading,
    Muxing,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Immutable inputs of one download job, owned by the application.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Opaque stable identifier; names the workdir.
    pub task_id: String,
    pub playlist_url: String,
    pub output_path: PathBuf,
    pub display_name: String,
    pub quality_tag: String,
}

/// One progress snapshot, delivered through the progress callback on every
/// state mutation.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub status: TaskStatus,
    /// 0.0..=1.0. Downloading covers 0.0..=0.8, muxing the rest.
    pub progress: f64,
    pub bytes_done: u64,
    pub bytes_total_estimate: Option<u64>,
    pub speed_bps: f64,
    pub eta_seconds: Option<u64>,
    /// Set only on `Failed`.
    pub error_message: Option<String>,
}

impl TaskProgress {
    pub fn status_only(status: TaskStatus, progress: f64) -> Self {
        Self {
            status,
            progress,
            bytes_done: 0,
            bytes_total_estimate: None,
            speed_bps: 0.0,
            eta_seconds: None,
            error_message: None,
        }
    }
}

/// Callback invoked by the controller and engine on every progress mutation.
pub type ProgressFn = Arc<dyn Fn(TaskProgress) + Send + Sync>;
