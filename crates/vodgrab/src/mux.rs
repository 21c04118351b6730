// Muxer seam. The engine produces the ordered concat manifest; turning it
// into the final container is an external collaborator's job (conventionally
// ffmpeg's concat demuxer with stream copy).

use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::Path;

/// External concatenating muxer contract.
#[async_trait]
pub trait Muxer: Send + Sync {
    /// Concatenate the segments listed in `manifest` (concat-demuxer format,
    /// one `file '<absolute-path>'` line per segment) into `output`.
    async fn concatenate(&self, manifest: &Path, output: &Path) -> Result<(), DownloadError>;
}
