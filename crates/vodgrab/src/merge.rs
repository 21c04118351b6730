// Ordered merge queue: completions arrive in any order, the muxer gets a
// strictly ascending file list.

use crate::error::DownloadError;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub struct MergeQueue {
    total: usize,
    entries: Mutex<BTreeMap<usize, PathBuf>>,
}

impl MergeQueue {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Record a completed segment. Idempotent for the same `(index, path)`;
    /// a conflicting path for an index is replaced with a warning.
    pub fn add(&self, index: usize, path: PathBuf) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&index) {
            if existing != &path {
                warn!(
                    index = index,
                    old = %existing.display(),
                    new = %path.display(),
                    "merge queue entry replaced"
                );
            }
        }
        entries.insert(index, path);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_complete(&self) -> bool {
        self.len() == self.total
    }

    /// All paths in ascending index order. Fails naming the first gap.
    pub fn all_in_order(&self) -> Result<Vec<PathBuf>, DownloadError> {
        let entries = self.entries.lock().unwrap();
        let mut paths = Vec::with_capacity(self.total);
        for index in 0..self.total {
            match entries.get(&index) {
                Some(path) => paths.push(path.clone()),
                None => {
                    return Err(DownloadError::Internal {
                        reason: format!("merge queue missing segment {index} of {}", self.total),
                    });
                }
            }
        }
        Ok(paths)
    }

    /// Verify every recorded path exists on disk and is non-empty.
    pub fn validate(&self) -> Result<(), DownloadError> {
        let entries = self.entries.lock().unwrap();
        for (index, path) in entries.iter() {
            let ok = std::fs::metadata(path)
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if !ok {
                return Err(DownloadError::segment(
                    *index,
                    format!("segment file missing or empty: {}", path.display()),
                ));
            }
        }
        Ok(())
    }
}

/// Render the concat-demuxer manifest: one `file '<path>'` line per segment.
pub fn render_manifest(paths: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str("file '");
        out.push_str(&path.display().to_string());
        out.push_str("'\n");
    }
    out
}

/// Manifest path inside the task workdir.
pub fn manifest_path(workdir: &Path) -> PathBuf {
    workdir.join("concat.txt")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_adds_come_back_sorted() {
        let queue = MergeQueue::new(4);
        queue.add(2, PathBuf::from("/w/segment_000002.ts"));
        queue.add(0, PathBuf::from("/w/segment_000000.ts"));
        queue.add(3, PathBuf::from("/w/segment_000003.ts"));
        queue.add(1, PathBuf::from("/w/segment_000001.ts"));

        let paths = queue.all_in_order().unwrap();
        assert_eq!(paths.len(), 4);
        for (i, path) in paths.iter().enumerate() {
            assert_eq!(path, &PathBuf::from(format!("/w/segment_{i:06}.ts")));
        }
    }

    #[test]
    fn gap_is_an_error() {
        let queue = MergeQueue::new(3);
        queue.add(0, PathBuf::from("/w/a.ts"));
        queue.add(2, PathBuf::from("/w/c.ts"));
        let err = queue.all_in_order().unwrap_err();
        assert!(err.to_string().contains("segment 1"));
    }

    #[test]
    fn add_is_idempotent() {
        let queue = MergeQueue::new(1);
        queue.add(0, PathBuf::from("/w/a.ts"));
        queue.add(0, PathBuf::from("/w/a.ts"));
        assert_eq!(queue.len(), 1);
        assert!(queue.is_complete());
    }

    #[test]
    fn validate_rejects_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("segment_000000.ts");
        std::fs::write(&present, b"data").unwrap();
        let empty = dir.path().join("segment_000001.ts");
        std::fs::write(&empty, b"").unwrap();

        let queue = MergeQueue::new(2);
        queue.add(0, present.clone());
        queue.add(1, empty);
        assert!(queue.validate().is_err());

        let queue = MergeQueue::new(1);
        queue.add(0, present);
        assert!(queue.validate().is_ok());
    }

    #[test]
    fn manifest_format() {
        let paths = vec![
            PathBuf::from("/w/segment_000000.ts"),
            PathBuf::from("/w/segment_000001.ts"),
        ];
        assert_eq!(
            render_manifest(&paths),
            "file '/w/segment_000000.ts'\nfile '/w/segment_000001.ts'\n"
        );
    }
}
