//! Resumable, crash-safe, parallel HLS segment downloader.
//!
//! Feed [`JobController::run`] an M3U8 playlist URL and it downloads every
//! media segment concurrently (decrypting AES-128 segments on the way),
//! persists per-segment completion to a CRC-guarded bitfield so a crash or
//! cancellation resumes instead of restarting, and finally hands an ordered
//! concat manifest to the injected [`Muxer`].

pub mod adaptive;
pub mod atomic;
pub mod config;
pub mod controller;
pub mod crc32;
pub mod decrypt;
pub mod engine;
pub mod error;
pub mod headers;
pub mod merge;
pub mod monitor;
pub mod mux;
pub mod playlist;
pub mod pool;
pub mod retry;
pub mod speed;
pub mod state;
pub mod task;
pub mod throttle;

// Re-exports for easier access
pub use adaptive::ConcurrencyController;
pub use config::{ConcurrencyConfig, EngineConfig, HttpConfig};
pub use controller::JobController;
pub use engine::SegmentEngine;
pub use error::{DownloadError, ErrorCategory};
pub use headers::{BrowserHeaderProvider, HeaderProvider};
pub use merge::MergeQueue;
pub use monitor::{HealthSnapshot, NetworkMonitor};
pub use mux::Muxer;
pub use playlist::{parse_media_playlist, EncryptionInfo, Playlist};
pub use speed::ThroughputEstimator;
pub use state::{SegmentBitfield, StateStore};
pub use task::{DownloadTask, ProgressFn, TaskProgress, TaskStatus};
pub use throttle::BandwidthThrottle;
