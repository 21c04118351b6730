// Atomic file writer: write-to-temp, fsync, rename.
//
// Both segment files and the resume state file go through this path so a
// crash at any point leaves either the previous contents or the new
// contents, never a torn file.

use crate::error::DownloadError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Temp sibling of `path`: the same name with `.tmp` appended.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Atomically replace `path` with `bytes`.
///
/// Writes to `path + ".tmp"`, flushes and fsyncs, then renames over `path`.
/// On any error the temp file is unlinked and `path` is left untouched.
pub async fn write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_sibling(path);
    let result = async {
        let mut file = File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

/// Atomically replace `path` with the contents of `stream`.
///
/// Chunks are written to the temp sibling as they arrive; the rename happens
/// only after the stream ends cleanly and the file is fsync-durable. Returns
/// the number of bytes written. A mid-stream error unlinks the temp file.
pub async fn write_stream<S>(path: &Path, stream: S) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<Bytes, DownloadError>>,
{
    let tmp = temp_sibling(path);
    let result = async {
        futures::pin_mut!(stream);
        let mut file = File::create(&tmp).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;
        Ok(written)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn write_bytes_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_bytes(&path, b"hello world").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
        assert!(!temp_sibling(&path).exists());
    }

    #[tokio::test]
    async fn write_bytes_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        write_bytes(&path, b"old").await.unwrap();
        write_bytes(&path, b"new contents").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"new contents");
    }

    #[tokio::test]
    async fn write_stream_concatenates_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.ts");
        let chunks: Vec<Result<Bytes, DownloadError>> = vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
            Ok(Bytes::from_static(b"ef")),
        ];
        let written = write_stream(&path, stream::iter(chunks)).await.unwrap();
        assert_eq!(written, 6);
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn failed_stream_leaves_target_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.ts");
        write_bytes(&path, b"previous").await.unwrap();

        let chunks: Vec<Result<Bytes, DownloadError>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(DownloadError::Cancelled),
        ];
        let err = write_stream(&path, stream::iter(chunks)).await;
        assert!(err.is_err());
        // Original survives, temp is gone.
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"previous");
        assert!(!temp_sibling(&path).exists());
    }
}
