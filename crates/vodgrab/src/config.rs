use std::path::PathBuf;
use std::time::Duration;

// --- HTTP Configuration ---

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Number of pooled client handles. Also caps concurrent transport use.
    pub pool_size: usize,
    /// Per-attempt timeout for the playlist document.
    pub playlist_timeout: Duration,
    /// Per-attempt timeout for one media segment.
    pub segment_timeout: Duration,
    /// Per-attempt timeout for the AES key body.
    pub key_timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Idle keep-alive window for pooled connections.
    pub pool_idle_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            playlist_timeout: Duration::from_secs(60),
            segment_timeout: Duration::from_secs(45),
            key_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(30),
        }
    }
}

// --- Concurrency Configuration ---

#[derive(Debug, Clone)]
pub struct ConcurrencyConfig {
    /// Floor for the parallelism ceiling.
    pub min_parallel: usize,
    /// Hard cap for the parallelism ceiling.
    pub max_parallel: usize,
    /// Starting ceiling.
    pub initial_parallel: usize,
    /// Buffered-bytes budget; above 80% the ceiling is cut to 70%.
    pub memory_cap_bytes: u64,
    /// Minimum interval between periodic ceiling re-evaluations.
    pub tick_interval: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            min_parallel: 1,
            max_parallel: 8,
            initial_parallel: 4,
            memory_cap_bytes: 50 * 1024 * 1024,
            tick_interval: Duration::from_secs(5),
        }
    }
}

// --- Top-Level Configuration ---

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub http: HttpConfig,
    pub concurrency: ConcurrencyConfig,
    /// Byte-per-second ceiling for segment body reads. `None` disables
    /// throttling. Fixed for the lifetime of the job.
    pub max_bytes_per_sec: Option<u64>,
    /// Root under which per-task workdirs are created. Defaults to the
    /// system temp directory.
    pub workdir_root: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            max_bytes_per_sec: None,
            workdir_root: None,
        }
    }
}

impl EngineConfig {
    pub fn workdir_root(&self) -> PathBuf {
        self.workdir_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Per-task scratch directory: `<root>/m3u8_download_<task_id>/`.
    pub fn workdir_for(&self, task_id: &str) -> PathBuf {
        self.workdir_root()
            .join(format!("m3u8_download_{task_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.http.pool_size, 8);
        assert_eq!(cfg.http.playlist_timeout, Duration::from_secs(60));
        assert_eq!(cfg.http.segment_timeout, Duration::from_secs(45));
        assert_eq!(cfg.http.key_timeout, Duration::from_secs(30));
        assert_eq!(cfg.concurrency.min_parallel, 1);
        assert_eq!(cfg.concurrency.max_parallel, 8);
        assert_eq!(cfg.concurrency.initial_parallel, 4);
        assert_eq!(cfg.concurrency.memory_cap_bytes, 50 * 1024 * 1024);
        assert!(cfg.max_bytes_per_sec.is_none());
    }

    #[test]
    fn workdir_layout() {
        let cfg = EngineConfig {
            workdir_root: Some(PathBuf::from("/tmp/dl")),
            ..Default::default()
        };
        assert_eq!(
            cfg.workdir_for("abc123"),
            PathBuf::from("/tmp/dl/m3u8_download_abc123")
        );
    }
}
